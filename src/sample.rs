use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Label set of a sample. Ordered so that identical sets compare and
/// encode identically.
pub type Labels = BTreeMap<String, String>;

// ------------------------------------------------------------
// Sample value
// ------------------------------------------------------------
//
// Collectors report whatever numeric form their backend hands
// them. The distinction only disappears at the wire boundary,
// where everything becomes an f64.
//
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::UInt(v) => v as f64,
            Value::Float(v) => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! value_from {
    ($variant:ident: $($t:ty),+) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v.into())
            }
        })+
    };
}

value_from!(Int: i8, i16, i32, i64);
value_from!(UInt: u8, u16, u32, u64);
value_from!(Float: f32, f64);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

// ------------------------------------------------------------
// Sample
// ------------------------------------------------------------
//
// One observed metric point. Owned by exactly one pipeline
// stage at a time:
//
//   collector -> normalizer -> writer queue -> destination
//
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Collector / model name, used as metric name prefix
    pub source: String,

    /// Metric name without the source prefix
    pub metric: String,

    pub value: Value,

    pub labels: Labels,

    /// Collection time. `None` until the normalizer stamps it.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Sample {
    pub fn new(
        source: impl Into<String>,
        metric: impl Into<String>,
        value: impl Into<Value>,
        labels: Labels,
    ) -> Self {
        Self {
            source: source.into(),
            metric: metric.into(),
            value: value.into(),
            labels,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

// ------------------------------------------------------------
// SampleList
// ------------------------------------------------------------
//
// Thread-safe accumulator. Producers push to the front, the
// drain takes everything from the back, so `pop_back_all`
// yields samples oldest first.
//
#[derive(Debug, Default)]
pub struct SampleList {
    inner: Mutex<VecDeque<Sample>>,
}

impl SampleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&self, sample: Sample) {
        self.inner.lock().push_front(sample);
    }

    /// Convenience wrapper used by collectors.
    pub fn push_sample(
        &self,
        source: &str,
        metric: &str,
        value: impl Into<Value>,
        labels: &Labels,
    ) {
        self.push_front(Sample::new(source, metric, value, labels.clone()));
    }

    pub fn push_front_many(&self, samples: impl IntoIterator<Item = Sample>) {
        let mut inner = self.inner.lock();
        for sample in samples {
            inner.push_front(sample);
        }
    }

    /// Atomically drains the list, oldest sample first.
    pub fn pop_back_all(&self) -> Vec<Sample> {
        let drained = std::mem::take(&mut *self.inner.lock());
        drained.into_iter().rev().collect()
    }

    /// Drops every pending sample, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.len();
        inner.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
