//! Metric records: a measurement name, tags, typed fields and a timestamp.
//!
//! A [`Metric`] is the unit every other module moves around. Its grouping
//! identity is the triple (name, tags, timestamp); fields are payload and may
//! be merged freely between records sharing that identity.
//!
//! # Example
//!
//! ```rust
//! use seriesmerge::metric::{FieldValue, Metric};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metric = Metric::new("cpu", [("cpu", "cpu0")], 0)
//!     .with_field("time_idle", 42)?
//!     .with_field("time_guest", 42)?;
//!
//! assert_eq!(metric.field("time_idle"), Some(&FieldValue::Integer(42)));
//! assert_eq!(metric.to_string(), "cpu,cpu=cpu0 time_idle=42i,time_guest=42i 0");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, Result};

/// A typed field value.
///
/// Floats are expected to be finite; conversions through [`IntoFieldValue`]
/// reject NaN and infinities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Signed 64-bit integer.
    Integer(i64),
    /// Unsigned 64-bit integer.
    Unsigned(u64),
    /// Finite 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Boolean(bool),
}

impl FieldValue {
    /// Returns a short name for the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Unsigned(_) => "unsigned",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
        }
    }
}

impl fmt::Display for FieldValue {
    /// Formats the value the way line protocol writes it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}i"),
            Self::Unsigned(v) => write!(f, "{v}u"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => {
                f.write_str("\"")?;
                for c in v.chars() {
                    match c {
                        '"' | '\\' => write!(f, "\\{c}")?,
                        '\n' => f.write_str("\\n")?,
                        _ => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// Conversion into a [`FieldValue`] that may fail for unrepresentable input.
///
/// Implemented for the primitive integer, float, boolean and string types,
/// for [`FieldValue`] and for [`serde_json::Value`].
pub trait IntoFieldValue {
    /// Converts `self` into a field value destined for the field `key`.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnsupportedValueType`] if the value has no field
    /// representation.
    fn into_field_value(self, key: &str) -> std::result::Result<FieldValue, FieldError>;
}

fn unsupported(key: &str, reason: impl Into<String>) -> FieldError {
    FieldError::UnsupportedValueType {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn checked_float(key: &str, value: f64) -> std::result::Result<FieldValue, FieldError> {
    if value.is_finite() {
        Ok(FieldValue::Float(value))
    } else {
        Err(unsupported(key, format!("non-finite float {value}")))
    }
}

macro_rules! impl_into_field_value {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl IntoFieldValue for $ty {
                fn into_field_value(self, _key: &str) -> std::result::Result<FieldValue, FieldError> {
                    Ok(FieldValue::$variant(<$target>::from(self)))
                }
            }
        )*
    };
}

impl_into_field_value! {
    i8 => Integer as i64,
    i16 => Integer as i64,
    i32 => Integer as i64,
    i64 => Integer as i64,
    u8 => Unsigned as u64,
    u16 => Unsigned as u64,
    u32 => Unsigned as u64,
    u64 => Unsigned as u64,
    bool => Boolean as bool,
    String => String as String,
    &str => String as String,
}

impl IntoFieldValue for f64 {
    fn into_field_value(self, key: &str) -> std::result::Result<FieldValue, FieldError> {
        checked_float(key, self)
    }
}

impl IntoFieldValue for f32 {
    fn into_field_value(self, key: &str) -> std::result::Result<FieldValue, FieldError> {
        checked_float(key, f64::from(self))
    }
}

impl IntoFieldValue for FieldValue {
    fn into_field_value(self, key: &str) -> std::result::Result<FieldValue, FieldError> {
        match self {
            Self::Float(v) => checked_float(key, v),
            other => Ok(other),
        }
    }
}

impl IntoFieldValue for serde_json::Value {
    fn into_field_value(self, key: &str) -> std::result::Result<FieldValue, FieldError> {
        match self {
            Self::Bool(b) => Ok(FieldValue::Boolean(b)),
            Self::String(s) => Ok(FieldValue::String(s)),
            Self::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(FieldValue::Integer(v))
                } else if let Some(v) = n.as_u64() {
                    Ok(FieldValue::Unsigned(v))
                } else if let Some(v) = n.as_f64() {
                    checked_float(key, v)
                } else {
                    Err(unsupported(key, format!("number {n} out of range")))
                }
            }
            Self::Null => Err(unsupported(key, "null")),
            Self::Array(_) => Err(unsupported(key, "array")),
            Self::Object(_) => Err(unsupported(key, "object")),
        }
    }
}

/// A single field of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The field key, unique within a metric.
    pub key: String,
    /// The field value.
    pub value: FieldValue,
}

/// A metric record.
///
/// Tags are kept sorted by key. Fields keep their first-insertion order and
/// a repeated key overwrites the value in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default, with = "field_map")]
    fields: Vec<Field>,
    /// Nanoseconds since the Unix epoch.
    timestamp: i64,
}

impl Metric {
    /// Creates a metric without fields.
    ///
    /// # Arguments
    ///
    /// * `name` - Measurement name
    /// * `tags` - Tag key-value pairs; a repeated key keeps the last value
    /// * `timestamp` - Nanoseconds since the Unix epoch
    pub fn new<N, I, K, V>(name: N, tags: I, timestamp: i64) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            fields: Vec::new(),
            timestamp,
        }
    }

    /// Adds a field and returns the metric, for building records inline.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnsupportedValueType`] if the value cannot be
    /// represented.
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Result<Self>
    where
        K: Into<String>,
        V: IntoFieldValue,
    {
        self.try_add_field(key, value)?;
        Ok(self)
    }

    /// Converts and adds a field, overwriting any existing value for `key`.
    ///
    /// The metric is left unchanged on error.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnsupportedValueType`] if the value cannot be
    /// represented.
    pub fn try_add_field<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: Into<String>,
        V: IntoFieldValue,
    {
        let key = key.into();
        let value = value.into_field_value(&key)?;
        self.add_field(key, value);
        Ok(())
    }

    /// Adds a field, overwriting any existing value for `key` in place.
    pub fn add_field(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { key, value }),
        }
    }

    /// Moves every field of `other` into this metric, last write wins.
    ///
    /// Only fields are taken; the identity of `other` is ignored.
    pub fn merge_fields(&mut self, other: Metric) {
        for Field { key, value } in other.fields {
            self.add_field(key, value);
        }
    }

    /// Returns the measurement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tags, sorted by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Returns the value of a tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the fields in insertion order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the value of a field.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }

    /// Returns the timestamp in nanoseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Rounds the timestamp to the nearest multiple of `precision`.
    ///
    /// Halves round away from zero. A precision of one nanosecond or less
    /// leaves the timestamp untouched.
    pub fn round_timestamp(&mut self, precision: Duration) {
        let Ok(step) = i128::try_from(precision.as_nanos()) else {
            return;
        };
        if step <= 1 {
            return;
        }

        let ts = i128::from(self.timestamp);
        let rem = ts % step;
        let mut rounded = ts - rem;
        if rem.abs() * 2 >= step {
            rounded += step * rem.signum();
        }

        let clamped = rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX));
        if let Ok(ts) = i64::try_from(clamped) {
            self.timestamp = ts;
        }
    }
}

/// Writes `s` with `special` characters backslash-escaped. Newlines are
/// always written as `\n` so a record stays on one line.
fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str, special: &[char]) -> fmt::Result {
    for c in s.chars() {
        if c == '\n' {
            f.write_str("\\n")?;
            continue;
        }
        if special.contains(&c) {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

impl fmt::Display for Metric {
    /// Formats the metric as an InfluxDB line-protocol line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAME: &[char] = &[',', ' '];
        const KEY: &[char] = &[',', '=', ' '];

        write_escaped(f, &self.name, NAME)?;
        for (key, value) in &self.tags {
            f.write_str(",")?;
            write_escaped(f, key, KEY)?;
            f.write_str("=")?;
            write_escaped(f, value, KEY)?;
        }
        f.write_str(" ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write_escaped(f, &field.key, KEY)?;
            write!(f, "={}", field.value)?;
        }
        write!(f, " {}", self.timestamp)
    }
}

/// Serializes fields as a JSON object while keeping document order.
mod field_map {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::{Field, FieldValue};

    pub fn serialize<S>(fields: &[Field], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for field in fields {
            map.serialize_entry(&field.key, &field.value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Field>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Vec<Field>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field keys to scalar values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields: Vec<Field> = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, FieldValue>()? {
                    match fields.iter_mut().find(|f| f.key == key) {
                        Some(field) => field.value = value,
                        None => fields.push(Field { key, value }),
                    }
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}
