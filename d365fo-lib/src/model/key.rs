//! Entity key values

use rust_decimal::Decimal;
use uuid::Uuid;

/// A single key field value supplied by a caller.
///
/// Values are stored as given; the OData serializer renders them according to
/// the entity schema's X++ type for the field.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// Text value (also accepted for numeric fields when the text parses).
    String(String),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Decimal value.
    Decimal(Decimal),
    /// Boolean value.
    Bool(bool),
    /// GUID value.
    Guid(Uuid),
}

impl KeyValue {
    /// Returns the raw textual form of this value, without OData quoting.
    pub fn raw(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Decimal(d) => d.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Guid(g) => g.to_string(),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for KeyValue {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<i64> for KeyValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for KeyValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for KeyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Uuid> for KeyValue {
    fn from(g: Uuid) -> Self {
        Self::Guid(g)
    }
}

impl From<Decimal> for KeyValue {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

/// An entity key: either a single scalar or a composite field mapping.
///
/// Composite fields keep their insertion order; the URL builder re-orders
/// them by the schema's key order when a schema is available.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKey {
    /// Single-field key.
    Single(KeyValue),
    /// Multi-field key as ordered (field, value) pairs.
    Composite(Vec<(String, KeyValue)>),
}

impl EntityKey {
    /// Creates a single-field key.
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self::Single(value.into())
    }

    /// Creates a composite key from (field, value) pairs.
    pub fn composite<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<KeyValue>,
    {
        Self::Composite(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns `true` if any composite field is named `dataAreaId`,
    /// compared case-insensitively.
    pub fn has_data_area_id(&self) -> bool {
        match self {
            Self::Single(_) => false,
            Self::Composite(fields) => fields
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("dataareaid")),
        }
    }

    /// Returns the number of fields in this key.
    pub fn field_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Composite(fields) => fields.len(),
        }
    }
}

impl From<KeyValue> for EntityKey {
    fn from(value: KeyValue) -> Self {
        Self::Single(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_area_id_detection() {
        let key = EntityKey::composite([("dataAreaId", "usmf"), ("CustomerAccount", "C1")]);
        assert!(key.has_data_area_id());

        let key = EntityKey::composite([("DATAAREAID", "usmf")]);
        assert!(key.has_data_area_id());

        let key = EntityKey::composite([("CustomerAccount", "C1")]);
        assert!(!key.has_data_area_id());

        let key = EntityKey::single("dataAreaId");
        assert!(!key.has_data_area_id());
    }

    #[test]
    fn test_composite_preserves_insertion_order() {
        let key = EntityKey::composite([("B", "2"), ("A", "1")]);
        match key {
            EntityKey::Composite(fields) => {
                assert_eq!(fields[0].0, "B");
                assert_eq!(fields[1].0, "A");
            }
            _ => panic!("expected composite"),
        }
    }
}
