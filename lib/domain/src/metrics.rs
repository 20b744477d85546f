use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// A single typed cell as reported by the backend.
///
/// Integer and floating point values stay distinct so a `long` column is
/// never widened into `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Unsigned(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Boolean(_) | Self::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Unsigned(_) | Self::Float(_))
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Unsigned(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One result row with its named fields. Empty cells are omitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: BTreeMap<String, MetricValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The scalar extracted from the first row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarResult {
    pub value: MetricValue,
    pub attributes: BTreeMap<String, String>,
}

impl ScalarResult {
    pub fn new(value: impl Into<MetricValue>) -> Self {
        Self {
            value: value.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// What a query that executed without failing produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Scalar(ScalarResult),
    NoData,
}

/// Everything a single poll can end in, as fed to the registry.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Scalar(ScalarResult),
    NoData,
    Failed(QueryError),
}

impl From<Result<QueryOutcome, QueryError>> for PollOutcome {
    fn from(result: Result<QueryOutcome, QueryError>) -> Self {
        match result {
            Ok(QueryOutcome::Scalar(scalar)) => Self::Scalar(scalar),
            Ok(QueryOutcome::NoData) => Self::NoData,
            Err(err) => Self::Failed(err),
        }
    }
}

/// Last known snapshot of one metric.
///
/// `available` is true exactly when `value` is present. A failed or empty
/// poll clears `value` but leaves `last_known` in place for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricState {
    value: Option<MetricValue>,
    last_known: Option<MetricValue>,
    available: bool,
    attributes: BTreeMap<String, String>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    static_attributes: BTreeMap<String, String>,
}

impl Default for MetricState {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl MetricState {
    pub fn unavailable() -> Self {
        Self {
            value: None,
            last_known: None,
            available: false,
            attributes: BTreeMap::new(),
            updated_at: None,
            static_attributes: BTreeMap::new(),
        }
    }

    /// Attributes given here survive every poll; row attributes are
    /// replaced on each successful one.
    pub fn with_attributes(attributes: BTreeMap<String, String>) -> Self {
        Self {
            static_attributes: attributes.clone(),
            attributes,
            ..Self::unavailable()
        }
    }

    pub fn value(&self) -> Option<&MetricValue> {
        self.value.as_ref()
    }

    pub fn last_known(&self) -> Option<&MetricValue> {
        self.last_known.as_ref()
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Fold one poll outcome into the state.
    pub fn apply(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Scalar(scalar) => {
                self.value = Some(scalar.value.clone());
                self.last_known = Some(scalar.value.clone());
                self.available = true;
                let mut attributes = scalar.attributes.clone();
                attributes.extend(
                    self.static_attributes
                        .iter()
                        .map(|(key, value)| (key.clone(), value.clone())),
                );
                self.attributes = attributes;
            }
            PollOutcome::NoData | PollOutcome::Failed(_) => {
                self.value = None;
                self.available = false;
            }
        }
        self.updated_at = Some(Utc::now());
        debug_assert_eq!(self.available, self.value.is_some());
    }
}
