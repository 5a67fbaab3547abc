//! OData literal serialization for D365 key values.
//!
//! D365 F&O keys are typed: the same caller-supplied `"7"` renders as `7`
//! for an `Int32` field but `'7'` for a `String` field. The entity schema
//! supplies the type per field; without a schema every field is treated as
//! `String`.

use crate::error::ApiError;
use crate::model::EntityKey;
use crate::model::KeyValue;
use crate::model::PublicEntityInfo;
use crate::model::XppType;

/// Percent-encodes a value for use inside a URL path or query, leaving the
/// OData structural characters `'`, `(`, `)`, `,` and `$` intact.
pub fn encode_preserving_structure(s: &str) -> String {
    urlencoding::encode(s)
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2C", ",")
        .replace("%24", "$")
}

/// Serializes a single key value to its OData literal form.
///
/// `odata_type_name` is the property's OData type name; it is required for
/// `Enum` fields to produce the qualified
/// `Microsoft.Dynamics.DataEntities.<EnumType>'<Member>'` literal.
pub fn serialize_value(
    value: &KeyValue,
    data_type: XppType,
    odata_type_name: Option<&str>,
) -> Result<String, ApiError> {
    // Booleans render bare regardless of the declared field type.
    if let KeyValue::Bool(b) = value {
        return Ok(b.to_string());
    }

    match data_type {
        XppType::String => {
            let raw = value.raw();
            let escaped = raw.replace('\'', "''");
            Ok(format!("'{}'", encode_preserving_structure(&escaped)))
        }
        XppType::Int32 | XppType::Int64 => serialize_integer(value),
        XppType::Real => serialize_real(value),
        XppType::Guid => serialize_guid(value),
        XppType::Date | XppType::Time | XppType::UtcDateTime => match value {
            KeyValue::String(s) if !s.is_empty() => Ok(s.clone()),
            other => Err(ApiError::InvalidKey(format!(
                "cannot serialize {:?} as {}",
                other,
                data_type.as_str()
            ))),
        },
        XppType::Enum => {
            let type_name = odata_type_name.ok_or_else(|| {
                ApiError::InvalidKey("enum key field requires a schema type name".to_string())
            })?;
            let enum_type = type_name
                .trim_start_matches('#')
                .trim_start_matches("Microsoft.Dynamics.DataEntities.");
            Ok(format!(
                "Microsoft.Dynamics.DataEntities.{}'{}'",
                enum_type,
                encode_preserving_structure(&value.raw())
            ))
        }
        XppType::Container | XppType::Record | XppType::Void => Err(ApiError::InvalidKey(format!(
            "{} fields cannot appear in URL keys",
            data_type.as_str()
        ))),
    }
}

fn serialize_integer(value: &KeyValue) -> Result<String, ApiError> {
    match value {
        KeyValue::Int(n) => Ok(n.to_string()),
        KeyValue::Float(f) if f.fract() == 0.0 => Ok(format!("{}", *f as i64)),
        KeyValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| ApiError::InvalidKey(format!("'{}' is not a valid integer", s))),
        other => Err(ApiError::InvalidKey(format!(
            "cannot serialize {:?} as an integer",
            other
        ))),
    }
}

fn serialize_real(value: &KeyValue) -> Result<String, ApiError> {
    let rendered = match value {
        KeyValue::Int(n) => n.to_string(),
        KeyValue::Float(f) => f.to_string(),
        KeyValue::Decimal(d) => d.to_string(),
        KeyValue::String(s) => {
            s.trim()
                .parse::<f64>()
                .map_err(|_| ApiError::InvalidKey(format!("'{}' is not a valid number", s)))?;
            s.trim().to_string()
        }
        other => {
            return Err(ApiError::InvalidKey(format!(
                "cannot serialize {:?} as a number",
                other
            )));
        }
    };

    // OData reals carry a decimal separator.
    if rendered.contains('.') || rendered.contains('e') || rendered.contains('E') {
        Ok(rendered)
    } else {
        Ok(format!("{}.0", rendered))
    }
}

fn serialize_guid(value: &KeyValue) -> Result<String, ApiError> {
    match value {
        KeyValue::Guid(g) => Ok(g.hyphenated().to_string()),
        KeyValue::String(s) => uuid::Uuid::parse_str(s.trim())
            .map(|g| g.hyphenated().to_string())
            .map_err(|_| ApiError::InvalidKey(format!("'{}' is not a valid GUID", s))),
        other => Err(ApiError::InvalidKey(format!(
            "cannot serialize {:?} as a GUID",
            other
        ))),
    }
}

/// Serializes every field of a composite key, typed by the schema where one
/// is available.
///
/// With a schema, fields are emitted in the schema's key order first (matched
/// case-insensitively), followed by any extra fields in insertion order.
/// Without a schema, insertion order is kept and every field serializes as
/// `String`.
pub fn serialize_key_fields(
    fields: &[(String, KeyValue)],
    schema: Option<&PublicEntityInfo>,
) -> Result<Vec<(String, String)>, ApiError> {
    for (name, value) in fields {
        if name.is_empty() {
            return Err(ApiError::InvalidKey("empty key field name".to_string()));
        }
        if value.raw().is_empty() {
            return Err(ApiError::InvalidKey(format!(
                "empty value for key field {}",
                name
            )));
        }
    }

    let Some(schema) = schema else {
        return fields
            .iter()
            .map(|(name, value)| {
                serialize_value(value, XppType::String, None).map(|lit| (name.clone(), lit))
            })
            .collect();
    };

    let key_props = schema.key_properties();
    let mut ordered: Vec<(String, String)> = Vec::with_capacity(fields.len());
    let mut consumed = vec![false; fields.len()];

    for prop in &key_props {
        let Some(idx) = fields
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(&prop.name))
        else {
            continue;
        };
        let (name, value) = &fields[idx];
        let literal = serialize_value(value, prop.xpp_type(), Some(&prop.type_name))?;
        ordered.push((name.clone(), literal));
        consumed[idx] = true;
    }

    for (idx, (name, value)) in fields.iter().enumerate() {
        if consumed[idx] {
            continue;
        }
        let prop = schema
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name));
        let literal = match prop {
            Some(p) => serialize_value(value, p.xpp_type(), Some(&p.type_name))?,
            None => serialize_value(value, XppType::String, None)?,
        };
        ordered.push((name.clone(), literal));
    }

    Ok(ordered)
}

/// Formats serialized key fields as `k1=lit1,k2=lit2,…`.
pub fn format_composite_key(serialized: &[(String, String)]) -> String {
    serialized
        .iter()
        .map(|(name, literal)| format!("{}={}", name, literal))
        .collect::<Vec<_>>()
        .join(",")
}

/// Encodes an entity key to the literal that goes between the parentheses
/// of a record URL.
pub fn encode_key(
    key: &EntityKey,
    schema: Option<&PublicEntityInfo>,
) -> Result<String, ApiError> {
    match key {
        EntityKey::Single(value) => {
            if value.raw().is_empty() {
                return Err(ApiError::InvalidKey("empty key value".to_string()));
            }
            serialize_value(value, XppType::String, None)
        }
        EntityKey::Composite(fields) => {
            if fields.is_empty() {
                return Err(ApiError::InvalidKey("empty composite key".to_string()));
            }
            let serialized = serialize_key_fields(fields, schema)?;
            Ok(format_composite_key(&serialized))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyInfo;

    fn prop(name: &str, data_type: &str, is_key: bool, order: i32) -> PropertyInfo {
        PropertyInfo {
            name: name.to_string(),
            type_name: format!("Edm.{}", data_type),
            data_type: data_type.to_string(),
            label_id: None,
            label_text: None,
            is_key,
            is_mandatory: false,
            configuration_enabled: true,
            allow_edit: true,
            allow_edit_on_create: true,
            is_dimension: false,
            dimension_relation: None,
            property_order: order,
        }
    }

    fn schema(properties: Vec<PropertyInfo>) -> PublicEntityInfo {
        PublicEntityInfo {
            name: "Test".to_string(),
            entity_set_name: "Tests".to_string(),
            label_id: None,
            label_text: None,
            is_read_only: false,
            configuration_enabled: true,
            properties,
            navigation_properties: Vec::new(),
            property_groups: Vec::new(),
            actions: Vec::new(),
        }
    }

    #[test]
    fn test_string_quoting_and_escaping() {
        let lit = serialize_value(&KeyValue::from("O'Brien"), XppType::String, None).unwrap();
        assert_eq!(lit, "'O''Brien'");
    }

    #[test]
    fn test_string_percent_encoding() {
        let lit = serialize_value(&KeyValue::from("A B"), XppType::String, None).unwrap();
        assert_eq!(lit, "'A%20B'");
    }

    #[test]
    fn test_integers_render_bare() {
        assert_eq!(
            serialize_value(&KeyValue::from("7"), XppType::Int32, None).unwrap(),
            "7"
        );
        assert_eq!(
            serialize_value(&KeyValue::from(42i64), XppType::Int64, None).unwrap(),
            "42"
        );
    }

    #[test]
    fn test_non_numeric_string_rejected_for_int() {
        assert!(serialize_value(&KeyValue::from("JRN-1"), XppType::Int32, None).is_err());
    }

    #[test]
    fn test_real_gets_decimal_separator() {
        assert_eq!(
            serialize_value(&KeyValue::from(7i64), XppType::Real, None).unwrap(),
            "7.0"
        );
        assert_eq!(
            serialize_value(&KeyValue::from(2.5f64), XppType::Real, None).unwrap(),
            "2.5"
        );
    }

    #[test]
    fn test_guid_renders_bare() {
        let lit = serialize_value(
            &KeyValue::from("6f9619ff-8b86-d011-b42d-00c04fc964ff"),
            XppType::Guid,
            None,
        )
        .unwrap();
        assert_eq!(lit, "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[test]
    fn test_bool_renders_bare() {
        assert_eq!(
            serialize_value(&KeyValue::from(true), XppType::String, None).unwrap(),
            "true"
        );
    }

    #[test]
    fn test_enum_literal_uses_type_name() {
        let lit = serialize_value(
            &KeyValue::from("Yes"),
            XppType::Enum,
            Some("Microsoft.Dynamics.DataEntities.NoYes"),
        )
        .unwrap();
        assert_eq!(lit, "Microsoft.Dynamics.DataEntities.NoYes'Yes'");
    }

    #[test]
    fn test_enum_without_type_name_rejected() {
        assert!(serialize_value(&KeyValue::from("Yes"), XppType::Enum, None).is_err());
    }

    #[test]
    fn test_container_rejected_in_keys() {
        assert!(serialize_value(&KeyValue::from("x"), XppType::Container, None).is_err());
        assert!(serialize_value(&KeyValue::from("x"), XppType::Record, None).is_err());
        assert!(serialize_value(&KeyValue::from("x"), XppType::Void, None).is_err());
    }

    #[test]
    fn test_composite_without_schema_treats_all_as_string() {
        let key = EntityKey::composite([("LineNum", "7"), ("JournalId", "JRN-1")]);
        assert_eq!(encode_key(&key, None).unwrap(), "LineNum='7',JournalId='JRN-1'");
    }

    #[test]
    fn test_composite_with_schema_uses_field_types() {
        let s = schema(vec![
            prop("LineNum", "Int32", true, 1),
            prop("JournalId", "String", true, 2),
        ]);
        let key = EntityKey::composite([("LineNum", "7"), ("JournalId", "JRN-1")]);
        assert_eq!(
            encode_key(&key, Some(&s)).unwrap(),
            "LineNum=7,JournalId='JRN-1'"
        );
    }

    #[test]
    fn test_schema_key_order_wins_over_insertion_order() {
        let s = schema(vec![
            prop("A", "String", true, 1),
            prop("B", "String", true, 2),
        ]);
        let key = EntityKey::composite([("B", "2"), ("A", "1")]);
        assert_eq!(encode_key(&key, Some(&s)).unwrap(), "A='1',B='2'");
    }

    #[test]
    fn test_empty_values_rejected() {
        assert!(encode_key(&EntityKey::single(""), None).is_err());
        let key = EntityKey::composite([("A", "")]);
        assert!(encode_key(&key, None).is_err());
    }
}
