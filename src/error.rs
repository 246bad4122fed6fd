use std::fmt;

use thiserror::Error;

/// Which table an unknown name was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Task,
    Model,
    Destination,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Task => f.write_str("task"),
            Kind::Model => f.write_str("model"),
            Kind::Destination => f.write_str("destination"),
        }
    }
}

// ------------------------------------------------------------
// Core error taxonomy
// ------------------------------------------------------------
//
// Every variant is scoped to one model / task / destination.
// Callers log it and carry on with the siblings.
//
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed destination or collector configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation on a name the corresponding table does not know.
    #[error("{kind} `{name}` is not registered")]
    NotRegistered { kind: Kind, name: String },

    #[error("init config for model `{model}` failed: {source}")]
    ConfigInit {
        model: String,
        #[source]
        source: CollectorError,
    },

    #[error("gather for model `{model}` failed: {source}")]
    Gather {
        model: String,
        #[source]
        source: CollectorError,
    },

    #[error("delivery to `{destination}` failed: {source}")]
    Delivery {
        destination: String,
        #[source]
        source: DeliveryError,
    },
}

impl Error {
    pub fn not_registered(kind: Kind, name: impl Into<String>) -> Self {
        Error::NotRegistered {
            kind,
            name: name.into(),
        }
    }

    /// True for lookups of names that are already gone.
    ///
    /// Hosts treat these as non-fatal (the object was deleted twice).
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Error::NotRegistered { .. })
    }
}

/// Failure reported by a collector's own `init` or `gather`.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("missing required config field `{0}`")]
    MissingField(String),

    #[error("invalid value for `{key}`: {reason}")]
    InvalidField { key: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

/// Failure of a single remote-write request to one destination.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("encode write request: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("snappy compress: {0}")]
    Compress(#[from] snap::Error),

    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote write got status code {status}, response body: {body}")]
    Status { status: u16, body: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
