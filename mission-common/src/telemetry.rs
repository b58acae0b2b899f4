use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// One immutable set of telemetry values captured by a sensor source.
///
/// A snapshot carries no identity and no timestamp; both are attached when
/// the snapshot is emitted (see [`TelemetryRecord::stamp`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// What kind of telemetry this is.
    pub category: Category,

    /// Metric values in the order the source produced them.
    pub metrics: Metrics,
}

impl TelemetrySnapshot {
    /// Create an empty snapshot for a category.
    pub fn new(category: Category) -> Self {
        Self {
            category,
            metrics: Metrics::default(),
        }
    }

    /// Append a metric to this snapshot.
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<TelemetryValue>) -> Self {
        self.metrics.push(name, value);
        self
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<&TelemetryValue> {
        self.metrics.get(name)
    }
}

/// A snapshot stamped with its emitter identity and emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Unix epoch milliseconds when the snapshot was emitted.
    pub timestamp: i64,

    /// Worker/instance identity (e.g., "Threaded-Computer", "Process-2").
    pub source: String,

    /// What kind of telemetry this is.
    pub category: Category,

    /// Metric values in source order.
    pub metrics: Metrics,
}

impl TelemetryRecord {
    /// Stamp a snapshot with an identity and the current time.
    pub fn stamp(source: impl Into<String>, snapshot: TelemetrySnapshot) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source: source.into(),
            category: snapshot.category,
            metrics: snapshot.metrics,
        }
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<&TelemetryValue> {
        self.metrics.get(name)
    }
}

/// Insertion-ordered metric name/value pairs.
///
/// Serialized as a map whose keys keep the order the source produced them.
/// Equality ignores order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(IndexMap<String, TelemetryValue>);

impl Metrics {
    /// Append a metric. A repeated name replaces the earlier value in place.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<TelemetryValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&TelemetryValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TelemetryValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Typed telemetry value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Counter (monotonically increasing, or a plain count).
    Counter(u64),

    /// Gauge (can go up or down).
    Gauge(f64),

    /// Text value.
    Text(String),

    /// Boolean value.
    Boolean(bool),
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Counter(v) => write!(f, "{}", v),
            TelemetryValue::Gauge(v) => write!(f, "{}", v),
            TelemetryValue::Text(v) => f.write_str(v),
            TelemetryValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        TelemetryValue::Counter(v)
    }
}

impl From<usize> for TelemetryValue {
    fn from(v: usize) -> Self {
        TelemetryValue::Counter(v as u64)
    }
}

impl From<i64> for TelemetryValue {
    fn from(v: i64) -> Self {
        TelemetryValue::Gauge(v as f64)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Gauge(v)
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::Text(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        TelemetryValue::Boolean(v)
    }
}

/// Telemetry category, one per kind of sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Static system information (OS, CPU model, memory size).
    Info,
    /// Resource load (CPU and memory usage).
    Load,
    /// Environmental sensor readings.
    Environment,
}

impl Category {
    /// All categories in their canonical order.
    pub const ALL: [Category; 3] = [Category::Info, Category::Load, Category::Environment];

    /// Get the string representation used in configuration and on the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Info => "info",
            Category::Load => "load",
            Category::Environment => "environment",
        }
    }

    /// Human-readable heading for text output.
    pub fn title(&self) -> &'static str {
        match self {
            Category::Info => "Mission Computer Info",
            Category::Load => "System Load",
            Category::Environment => "Sensor Data",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Category::Info),
            "load" => Ok(Category::Load),
            "environment" | "env" | "sensor" => Ok(Category::Environment),
            other => Err(format!(
                "unknown category '{}' (expected info, load or environment)",
                other
            )),
        }
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
