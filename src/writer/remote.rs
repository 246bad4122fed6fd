use std::time::Duration;

use prost::Message;
use reqwest::header::{
    CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT,
};
use serde::Deserialize;

use super::prompb::{TimeSeries, WriteRequest};
use crate::error::{DeliveryError, Error, Result};

pub const REMOTE_WRITE_VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";
pub const USER_AGENT_VALUE: &str = env!("CARGO_PKG_NAME");

const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 3;
const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 2;

/// Longest response body kept in a delivery error.
const MAX_ERROR_BODY: usize = 512;

// ------------------------------------------------------------
// Destination options
// ------------------------------------------------------------
//
// Mirrors the host's remote-write object. Zero / absent numeric
// fields fall back to defaults.
//
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DestinationOptions {
    pub url: String,

    pub basic_auth_user: String,

    pub basic_auth_pass: String,

    /// Flat list of alternating header names and values.
    ///
    /// A `Host` entry also overrides the request's host.
    pub headers: Vec<String>,

    /// Whole-request timeout in seconds
    pub timeout: u64,

    /// Connect timeout in seconds
    pub dial_timeout: u64,

    pub max_idle_conns_per_host: usize,
}

impl DestinationOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(or_default(self.timeout, DEFAULT_TIMEOUT_SECS))
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(or_default(self.dial_timeout, DEFAULT_DIAL_TIMEOUT_SECS))
    }

    pub fn max_idle_conns_per_host(&self) -> usize {
        or_default(self.max_idle_conns_per_host, DEFAULT_MAX_IDLE_CONNS_PER_HOST)
    }

    /// Parses the flat header list into a header map.
    pub fn header_map(&self) -> Result<HeaderMap> {
        if self.headers.len() % 2 != 0 {
            return Err(Error::Config(format!(
                "headers must be key/value pairs, got {} entries",
                self.headers.len()
            )));
        }

        let mut map = HeaderMap::new();
        for pair in self.headers.chunks_exact(2) {
            let name = HeaderName::from_bytes(pair[0].as_bytes())
                .map_err(|e| Error::Config(format!("header name {:?}: {e}", pair[0])))?;
            let value = HeaderValue::from_str(&pair[1])
                .map_err(|e| Error::Config(format!("header {:?} value: {e}", pair[0])))?;
            map.append(name, value);
        }
        Ok(map)
    }
}

fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
    if value == T::default() { default } else { value }
}

/// One configured remote-write endpoint.
///
/// Owns its own connection pool so that a slow destination only
/// ever ties up its own sockets.
#[derive(Debug, Clone)]
pub struct RemoteWriter {
    name: String,
    url: reqwest::Url,
    opts: DestinationOptions,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl RemoteWriter {
    pub fn new(name: impl Into<String>, opts: DestinationOptions) -> Result<Self> {
        let name = name.into();

        let url = reqwest::Url::parse(&opts.url)
            .map_err(|e| Error::Config(format!("destination `{name}` url {:?}: {e}", opts.url)))?;
        let headers = opts.header_map()?;

        let client = reqwest::Client::builder()
            .timeout(opts.timeout())
            .connect_timeout(opts.dial_timeout())
            .pool_max_idle_per_host(opts.max_idle_conns_per_host())
            .build()
            .map_err(|e| Error::Config(format!("destination `{name}` client: {e}")))?;

        Ok(Self {
            name,
            url,
            opts,
            headers,
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &DestinationOptions {
        &self.opts
    }

    /// Encodes and posts one batch. Nothing is retried.
    pub async fn write(&self, series: &[TimeSeries]) -> Result<(), DeliveryError> {
        if series.is_empty() {
            return Ok(());
        }
        let body = encode(series)?;
        self.post(body).await
    }

    /// Posts an already encoded and compressed payload.
    pub async fn post(&self, body: Vec<u8>) -> Result<(), DeliveryError> {
        let mut req = self
            .client
            .post(self.url.clone())
            .header(CONTENT_ENCODING, "snappy")
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(REMOTE_WRITE_VERSION_HEADER, REMOTE_WRITE_VERSION);

        // extra headers replace same-named defaults; a Host entry
        // becomes the request host
        if !self.headers.is_empty() {
            req = req.headers(self.headers.clone());
        }

        if !self.opts.basic_auth_user.is_empty() {
            req = req.basic_auth(&self.opts.basic_auth_user, Some(&self.opts.basic_auth_pass));
        }

        let resp = req.body(body).send().await?;
        let status = resp.status();

        if status.is_client_error() || status.is_server_error() {
            let mut body = match resp.text().await {
                Ok(body) => body,
                Err(e) => format!("<unreadable body: {e}>"),
            };
            truncate(&mut body, MAX_ERROR_BODY);
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Serializes a batch as a snappy-compressed `WriteRequest`.
pub fn encode(series: &[TimeSeries]) -> Result<Vec<u8>, DeliveryError> {
    let req = WriteRequest {
        timeseries: series.to_vec(),
    };

    let mut raw = Vec::with_capacity(req.encoded_len());
    req.encode(&mut raw)?;

    Ok(snap::raw::Encoder::new().compress_vec(&raw)?)
}

fn truncate(s: &mut String, max: usize) {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HOST;

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let opts = DestinationOptions::new("http://localhost:9090/api/v1/write");
        assert_eq!(opts.timeout(), Duration::from_secs(5));
        assert_eq!(opts.dial_timeout(), Duration::from_secs(3));
        assert_eq!(opts.max_idle_conns_per_host(), 2);

        let opts = DestinationOptions {
            timeout: 30,
            max_idle_conns_per_host: 16,
            ..opts
        };
        assert_eq!(opts.timeout(), Duration::from_secs(30));
        assert_eq!(opts.max_idle_conns_per_host(), 16);
    }

    #[test]
    fn odd_header_list_is_a_config_error() {
        let opts = DestinationOptions {
            headers: vec!["X-Scope-OrgID".into()],
            ..DestinationOptions::new("http://localhost/write")
        };
        assert!(matches!(opts.header_map(), Err(Error::Config(_))));
        assert!(RemoteWriter::new("prom", opts).is_err());
    }

    #[test]
    fn header_pairs_are_parsed() {
        let opts = DestinationOptions {
            headers: vec![
                "X-Scope-OrgID".into(),
                "tenant-a".into(),
                "Host".into(),
                "metrics.internal".into(),
            ],
            ..DestinationOptions::new("http://localhost/write")
        };
        let map = opts.header_map().unwrap();
        assert_eq!(map["x-scope-orgid"], "tenant-a");
        assert_eq!(map[HOST], "metrics.internal");
    }

    #[test]
    fn bad_url_is_a_config_error() {
        let err = RemoteWriter::new("prom", DestinationOptions::new("not a url")).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("prom")));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: DestinationOptions = serde_json::from_str(
            r#"{"url": "http://vm:8428/api/v1/write", "basic_auth_user": "u", "timeout": 10}"#,
        )
        .unwrap();
        assert_eq!(opts.basic_auth_user, "u");
        assert_eq!(opts.timeout(), Duration::from_secs(10));
        assert!(opts.headers.is_empty());
    }

    #[tokio::test]
    async fn unreadable_error_body_is_reported() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // answers 500 with a body shorter than its declared length
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                req.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&req) {
                    break;
                }
            }
            sock.write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\nshort")
                .await
                .unwrap();
            sock.shutdown().await.unwrap();
        });

        let writer =
            RemoteWriter::new("prom", DestinationOptions::new(format!("http://{addr}/write"))).unwrap();
        match writer.post(b"payload".to_vec()).await {
            Err(DeliveryError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.starts_with("<unreadable body"), "got {body:?}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn request_complete(req: &[u8]) -> bool {
        let text = String::from_utf8_lossy(req);
        let Some(end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..end]
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length")
                    .then(|| v.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        req.len() >= end + 4 + length
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut s = "ééé".to_string();
        truncate(&mut s, 3);
        assert_eq!(s, "é");
    }
}
