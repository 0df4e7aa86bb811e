//! Metric model shared by the agent and the server.
//!
//! A metric is identified by `(kind, id)`. Gauges carry a float that
//! replaces the stored value; counters carry an integer delta that is
//! added to the running total.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for metric input (paths, JSON records, raw values).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("unknown metric type: {0:?}")]
    UnknownKind(String),

    #[error("metric id must not be empty")]
    EmptyId,

    #[error("invalid {kind} value: {raw:?}")]
    InvalidValue { kind: MetricKind, raw: String },

    #[error("gauge {0:?} must have a finite value")]
    NonFinite(String),

    #[error("{kind} metric {id:?} is missing the `{field}` field")]
    MissingField {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },
}

// ── Kind ───────────────────────────────────────────────────────────

/// The two metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_string())),
        }
    }
}

// ── Updates ────────────────────────────────────────────────────────

/// The payload of a single update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricChange {
    /// Replace the stored value.
    Gauge(f64),
    /// Add to the running total.
    Counter(i64),
}

impl MetricChange {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricChange::Gauge(_) => MetricKind::Gauge,
            MetricChange::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a raw path segment according to `kind`.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        let invalid = || MetricError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .map(MetricChange::Gauge)
                .map_err(|_| invalid()),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricChange::Counter)
                .map_err(|_| invalid()),
        }
    }
}

/// One validated metric update: the unit of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricUpdate {
    pub id: String,
    pub change: MetricChange,
}

impl MetricUpdate {
    /// Build an update, rejecting empty ids and non-finite gauge values.
    pub fn new(id: impl Into<String>, change: MetricChange) -> Result<Self, MetricError> {
        let id = id.into();
        if id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        if let MetricChange::Gauge(v) = change {
            if !v.is_finite() {
                return Err(MetricError::NonFinite(id));
            }
        }
        Ok(Self { id, change })
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            change: MetricChange::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            change: MetricChange::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.change.kind()
    }
}

/// A stored value as returned by reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }
}

impl fmt::Display for MetricValue {
    /// Gauges print as the shortest decimal that round-trips, never in
    /// exponent notation (`123456`, `0.25`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(v) => write!(f, "{v}"),
        }
    }
}

// ── Wire record ────────────────────────────────────────────────────

/// JSON wire record: `{"id", "type", "delta"?, "value"?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    /// Record carrying a stored value.
    pub fn with_value(id: impl Into<String>, value: MetricValue) -> Self {
        let id = id.into();
        match value {
            MetricValue::Gauge(v) => Self {
                id,
                kind: MetricKind::Gauge,
                delta: None,
                value: Some(v),
            },
            MetricValue::Counter(d) => Self {
                id,
                kind: MetricKind::Counter,
                delta: Some(d),
                value: None,
            },
        }
    }
}

impl TryFrom<Metric> for MetricUpdate {
    type Error = MetricError;

    fn try_from(m: Metric) -> Result<Self, Self::Error> {
        let change = match m.kind {
            MetricKind::Gauge => MetricChange::Gauge(m.value.ok_or(MetricError::MissingField {
                id: m.id.clone(),
                kind: m.kind,
                field: "value",
            })?),
            MetricKind::Counter => MetricChange::Counter(m.delta.ok_or(MetricError::MissingField {
                id: m.id.clone(),
                kind: m.kind,
                field: "delta",
            })?),
        };
        MetricUpdate::new(m.id, change)
    }
}

impl From<&MetricUpdate> for Metric {
    fn from(u: &MetricUpdate) -> Self {
        match u.change {
            MetricChange::Gauge(v) => Metric::with_value(u.id.clone(), MetricValue::Gauge(v)),
            MetricChange::Counter(d) => Metric::with_value(u.id.clone(), MetricValue::Counter(d)),
        }
    }
}

/// Decode a JSON array of wire records into validated updates, keeping order.
pub fn decode_batch(body: &[u8]) -> Result<Vec<MetricUpdate>, BatchDecodeError> {
    let records: Vec<Metric> = serde_json::from_slice(body)?;
    records
        .into_iter()
        .map(|m| MetricUpdate::try_from(m).map_err(BatchDecodeError::from))
        .collect()
}

/// Encode updates as a JSON array of wire records.
pub fn encode_batch(updates: &[MetricUpdate]) -> serde_json::Result<Vec<u8>> {
    let records: Vec<Metric> = updates.iter().map(Metric::from).collect();
    serde_json::to_vec(&records)
}

/// Failure decoding a batch body.
#[derive(Debug, Error)]
pub enum BatchDecodeError {
    #[error("malformed batch: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Metric(#[from] MetricError),
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Full storage state: current gauge values and counter totals.
///
/// Ordered maps keep the on-disk document stable across saves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    pub fn get(&self, kind: MetricKind, id: &str) -> Option<MetricValue> {
        match kind {
            MetricKind::Gauge => self.gauges.get(id).copied().map(MetricValue::Gauge),
            MetricKind::Counter => self.counters.get(id).copied().map(MetricValue::Counter),
        }
    }

    /// All entries as wire records, gauges first.
    pub fn to_metrics(&self) -> Vec<Metric> {
        let gauges = self
            .gauges
            .iter()
            .map(|(id, v)| Metric::with_value(id.clone(), MetricValue::Gauge(*v)));
        let counters = self
            .counters
            .iter()
            .map(|(id, d)| Metric::with_value(id.clone(), MetricValue::Counter(*d)));
        gauges.chain(counters).collect()
    }
}
