use serde::{Deserialize, Serialize};

/// Name of the node control metric that requests a full rebirth.
pub const REBIRTH_METRIC: &str = "Node Control/Rebirth";

/// Name of the birth/death sequence metric carried by NBIRTH and NDEATH.
pub const BD_SEQ_METRIC: &str = "bdSeq";

/// A single Sparkplug metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    /// Metric name (may contain `/` separated folders).
    pub name: String,

    /// Unix epoch milliseconds when the value was captured.
    pub timestamp: i64,

    /// Declared datatype of the value.
    pub datatype: DataType,

    /// The metric value. `Null` when no value is known yet.
    pub value: MetricValue,

    /// Typed metadata attached to the metric.
    #[serde(default, skip_serializing_if = "PropertySet::is_empty")]
    pub properties: PropertySet,
}

impl Metric {
    /// Create a new metric stamped with the current time.
    pub fn new(name: impl Into<String>, datatype: DataType, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            timestamp: current_timestamp_millis(),
            datatype,
            value,
            properties: PropertySet::default(),
        }
    }

    /// Create a string metric; `None` becomes a null value.
    pub fn string(name: impl Into<String>, value: Option<String>) -> Self {
        let value = value.map(MetricValue::String).unwrap_or(MetricValue::Null);
        Self::new(name, DataType::String, value)
    }

    /// Create a boolean metric.
    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, DataType::Boolean, MetricValue::Boolean(value))
    }

    /// Set the capture timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a property set.
    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = properties;
        self
    }
}

/// Sparkplug datatype of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int64,
    Double,
    Boolean,
    String,
}

/// Typed metric or property value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    /// No value.
    Null,

    /// Boolean value.
    Boolean(bool),

    /// Signed integer value.
    Int(i64),

    /// Floating point value.
    Double(f64),

    /// Text value.
    String(String),
}

impl MetricValue {
    /// Returns the boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Null => write!(f, "null"),
            MetricValue::Boolean(v) => write!(f, "{}", v),
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Double(v) => write!(f, "{}", v),
            MetricValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Boolean(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Double(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::String(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::String(v.to_string())
    }
}

/// Ordered set of metric properties.
///
/// Keys and values are kept in two parallel lists, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    keys: Vec<String>,
    values: Vec<MetricValue>,
}

impl PropertySet {
    /// Create an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<MetricValue>) {
        self.keys.push(key.into());
        self.values.push(value.into());
    }

    /// Builder-style variant of [`push`](Self::push).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.push(key, value);
        self
    }

    /// Look up the first property with the given key.
    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|idx| &self.values[idx])
    }

    /// Iterate properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.keys.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no properties.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A Sparkplug message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Unix epoch milliseconds when the payload was built.
    pub timestamp: i64,

    /// Message sequence number (0-255, wrapping).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u8>,

    /// Metrics carried by the payload.
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl Payload {
    /// Create a payload stamped with the current time.
    pub fn new(seq: Option<u8>, metrics: Vec<Metric>) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            seq,
            metrics,
        }
    }

    /// Find a metric by name.
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_metric_creation() {
        let metric = Metric::string("Linear-X/Load", Some("12.5".to_string()))
            .with_properties(PropertySet::new().with("MTC.Id", "xl"));

        assert_eq!(metric.name, "Linear-X/Load");
        assert_eq!(metric.datatype, DataType::String);
        assert_eq!(metric.value, MetricValue::String("12.5".to_string()));
        assert_eq!(
            metric.properties.get("MTC.Id"),
            Some(&MetricValue::String("xl".to_string()))
        );
    }

    #[test]
    fn test_missing_value_is_null() {
        let metric = Metric::string("Availability", None);
        assert_eq!(metric.value, MetricValue::Null);
    }

    #[test]
    fn test_property_order_preserved() {
        let props = PropertySet::new()
            .with("ReadOnly", true)
            .with("CanWrite", false)
            .with("MTC.Id", "avail");

        let keys: Vec<&str> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ReadOnly", "CanWrite", "MTC.Id"]);
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(MetricValue::from(42i64), MetricValue::Int(42));
        assert_eq!(MetricValue::from(2.5), MetricValue::Double(2.5));
        assert_eq!(
            MetricValue::from("test"),
            MetricValue::String("test".to_string())
        );
        assert_eq!(MetricValue::from(true), MetricValue::Boolean(true));
        assert_eq!(MetricValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(MetricValue::Null.as_str(), None);
    }

    #[test]
    fn test_payload_metric_lookup() {
        let payload = Payload::new(
            Some(0),
            vec![
                Metric::boolean(REBIRTH_METRIC, false),
                Metric::string("Availability", Some("AVAILABLE".to_string())),
            ],
        );

        assert_eq!(
            payload.metric(REBIRTH_METRIC).map(|m| m.value.clone()),
            Some(MetricValue::Boolean(false))
        );
        assert!(payload.metric("missing").is_none());
    }
}
