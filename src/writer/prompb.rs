//! Prometheus remote-write (v1) messages.
//!
//! Field numbers follow `prometheus/prompb/{remote,types}.proto`.
//! Only the parts a writer needs are modelled.

use std::collections::HashMap;

use crate::sample::Sample;
use crate::util::{metric_name, sanitize_name, to_millis};

pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeries {
    /// Sorted by name.
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    /// Ordered by timestamp.
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Point>,
}

#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// `prometheus.Sample`: one (value, timestamp) pair.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Point {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

impl TimeSeries {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }
}

/// Label set of `sample` in wire form, `__name__` included.
///
/// Names are sanitized, empty values dropped, and the result sorted.
/// An empty result marks the sample as unsampleable.
pub fn wire_labels(sample: &Sample) -> Vec<Label> {
    let mut labels = Vec::with_capacity(sample.labels.len() + 1);

    let name = metric_name(&sample.source, &sample.metric);
    if !name.is_empty() {
        labels.push(Label {
            name: METRIC_NAME_LABEL.to_string(),
            value: name,
        });
    }

    for (k, v) in &sample.labels {
        let key = sanitize_name(k);
        if key.is_empty() || v.is_empty() || key == METRIC_NAME_LABEL {
            continue;
        }
        labels.push(Label {
            name: key,
            value: v.clone(),
        });
    }

    labels.sort_by(|a, b| a.name.cmp(&b.name));
    labels.dedup_by(|a, b| a.name == b.name);
    labels
}

/// Converts samples into wire records, one per distinct label set.
///
/// Samples without a usable label set are dropped. Series keep the
/// order in which their label set was first seen; points inside a
/// series are ordered by timestamp.
pub fn to_time_series(samples: &[Sample]) -> Vec<TimeSeries> {
    let mut index: HashMap<Vec<Label>, usize> = HashMap::new();
    let mut series: Vec<TimeSeries> = Vec::new();

    for sample in samples {
        let labels = wire_labels(sample);
        if labels.is_empty() {
            log::debug!("dropping unsampleable sample {}/{}", sample.source, sample.metric);
            continue;
        }

        let point = Point {
            value: sample.value.as_f64(),
            timestamp: sample.timestamp.as_ref().map_or_else(crate::util::now_ms, to_millis),
        };

        match index.get(&labels) {
            Some(&i) => series[i].samples.push(point),
            None => {
                index.insert(labels.clone(), series.len());
                series.push(TimeSeries {
                    labels,
                    samples: vec![point],
                });
            }
        }
    }

    for ts in &mut series {
        ts.samples.sort_by_key(|p| p.timestamp);
    }
    series
}
