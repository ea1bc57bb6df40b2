//! Schema validation and payload normalization.
//!
//! Pure functions from declared field definitions to normalized payloads.
//! No storage access happens here; uniqueness is enforced by indexes at the
//! storage layer.

use crate::error::FieldIssue;
use serde_json::{Map, Value};
use strata_core::{FieldDefinition, FieldType};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use uuid::Uuid;

/// JSON type name of a value, for mismatch reporting.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a value to a declared field type.
///
/// Only safe coercions happen: an integral float becomes an integer, an
/// integer widens to a decimal, and date/timestamp/uuid strings are
/// re-rendered in canonical form. Anything else is a mismatch, never a
/// silent cast.
pub fn coerce(field_type: FieldType, value: &Value) -> Result<Value, ()> {
    match field_type {
        FieldType::String | FieldType::Text => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(()),
        },
        FieldType::Integer => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i))
                } else if let Some(f) = n.as_f64() {
                    // Integral floats (e.g. 30.0 from a JSON encoder) are safe.
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        Ok(Value::from(f as i64))
                    } else {
                        Err(())
                    }
                } else {
                    Err(())
                }
            }
            _ => Err(()),
        },
        FieldType::Decimal => match value {
            Value::Number(n) => n.as_f64().map(Value::from).ok_or(()),
            _ => Err(()),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(()),
        },
        FieldType::Date => match value {
            Value::String(s) => {
                let format = format_description!("[year]-[month]-[day]");
                time::Date::parse(s, &format)
                    .map(|d| {
                        Value::String(d.format(&format).unwrap_or_else(|_| s.clone()))
                    })
                    .map_err(|_| ())
            }
            _ => Err(()),
        },
        FieldType::Timestamp => match value {
            Value::String(s) => time::OffsetDateTime::parse(s, &Rfc3339)
                .map(|t| {
                    Value::String(t.format(&Rfc3339).unwrap_or_else(|_| s.clone()))
                })
                .map_err(|_| ()),
            _ => Err(()),
        },
        FieldType::Json => Ok(value.clone()),
        FieldType::Uuid => match value {
            Value::String(s) => Uuid::parse_str(s)
                .map(|u| Value::String(u.hyphenated().to_string()))
                .map_err(|_| ()),
            _ => Err(()),
        },
    }
}

/// Normalize a candidate payload against declared fields.
///
/// On success the returned map is canonical: defaults applied, values
/// coerced, keys limited to declared fields (plus extras when `open_schema`).
/// Explicit JSON `null` is treated exactly like an absent key, uniformly:
/// a required field set to null is an error, an optional one is dropped.
pub fn normalize(
    fields: &[FieldDefinition],
    payload: &Map<String, Value>,
    open_schema: bool,
) -> Result<Map<String, Value>, Vec<FieldIssue>> {
    let mut issues = Vec::new();
    let mut normalized = Map::new();

    if !open_schema {
        for key in payload.keys() {
            if !fields.iter().any(|f| &f.name == key) {
                issues.push(FieldIssue::new(key.clone(), "unknown field"));
            }
        }
    }

    for field in fields {
        let supplied = match payload.get(&field.name) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        };

        let value = match supplied {
            Some(value) => Some(value.clone()),
            None => field.default.clone(),
        };

        match value {
            Some(value) => match coerce(field.field_type, &value) {
                Ok(coerced) => {
                    normalized.insert(field.name.clone(), coerced);
                }
                Err(()) => {
                    issues.push(FieldIssue::mismatch(
                        field.name.clone(),
                        field.field_type,
                        json_type_name(&value),
                    ));
                }
            },
            None => {
                if field.required {
                    issues.push(FieldIssue::new(
                        field.name.clone(),
                        "required field missing",
                    ));
                }
            }
        }
    }

    if open_schema {
        for (key, value) in payload {
            if !fields.iter().any(|f| &f.name == key) && !value.is_null() {
                normalized.insert(key.clone(), value.clone());
            }
        }
    }

    if issues.is_empty() {
        Ok(normalized)
    } else {
        Err(issues)
    }
}

/// Check a stored payload against a proposed field set.
///
/// Used when a schema update retypes or removes fields: every existing
/// document is classified, and incompatible ones block the update unless it
/// is forced. Defaults are not applied here; a stored document either
/// conforms to the new schema as-is or it does not.
pub fn conforms(
    fields: &[FieldDefinition],
    payload: &Map<String, Value>,
    open_schema: bool,
) -> Result<(), Vec<FieldIssue>> {
    let mut issues = Vec::new();

    if !open_schema {
        for key in payload.keys() {
            if !fields.iter().any(|f| &f.name == key) {
                issues.push(FieldIssue::new(key.clone(), "field no longer declared"));
            }
        }
    }

    for field in fields {
        match payload.get(&field.name) {
            Some(Value::Null) | None => {
                if field.required && field.default.is_none() {
                    issues.push(FieldIssue::new(
                        field.name.clone(),
                        "required field missing",
                    ));
                }
            }
            Some(value) => {
                if coerce(field.field_type, value).is_err() {
                    issues.push(FieldIssue::mismatch(
                        field.name.clone(),
                        field.field_type,
                        json_type_name(value),
                    ));
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn user_fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("email", FieldType::String).required().unique(),
            FieldDefinition::new("age", FieldType::Integer),
            FieldDefinition::new("active", FieldType::Boolean).with_default(json!(true)),
        ]
    }

    #[test]
    fn test_normalize_applies_defaults() {
        let payload = obj(json!({"email": "a@x.com", "age": 30}));
        let normalized = normalize(&user_fields(), &payload, false).unwrap();
        assert_eq!(normalized["email"], json!("a@x.com"));
        assert_eq!(normalized["age"], json!(30));
        assert_eq!(normalized["active"], json!(true));
    }

    #[test]
    fn test_normalize_rejects_unknown_keys() {
        let payload = obj(json!({"email": "a@x.com", "nickname": "al"}));
        let issues = normalize(&user_fields(), &payload, false).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "nickname"));
    }

    #[test]
    fn test_open_schema_keeps_unknown_keys() {
        let payload = obj(json!({"email": "a@x.com", "nickname": "al"}));
        let normalized = normalize(&user_fields(), &payload, true).unwrap();
        assert_eq!(normalized["nickname"], json!("al"));
    }

    #[test]
    fn test_required_missing_names_the_field() {
        let payload = obj(json!({"age": 30}));
        let issues = normalize(&user_fields(), &payload, false).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "email");
        assert!(issues[0].message.contains("required"));
    }

    #[test]
    fn test_null_is_treated_as_absent() {
        // Required + null: error. Optional + null: dropped.
        let payload = obj(json!({"email": null, "age": null}));
        let issues = normalize(&user_fields(), &payload, false).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "email");

        let payload = obj(json!({"email": "a@x.com", "age": null}));
        let normalized = normalize(&user_fields(), &payload, false).unwrap();
        assert!(!normalized.contains_key("age"));
    }

    #[test]
    fn test_type_mismatch_carries_both_types() {
        let payload = obj(json!({"email": "a@x.com", "age": "thirty"}));
        let issues = normalize(&user_fields(), &payload, false).unwrap_err();
        assert_eq!(issues[0].field, "age");
        assert_eq!(issues[0].expected, Some(FieldType::Integer));
        assert_eq!(issues[0].received.as_deref(), Some("string"));
    }

    #[test]
    fn test_integral_float_coerces_to_integer() {
        assert_eq!(coerce(FieldType::Integer, &json!(30.0)).unwrap(), json!(30));
        assert!(coerce(FieldType::Integer, &json!(30.5)).is_err());
    }

    #[test]
    fn test_integer_widens_to_decimal() {
        assert_eq!(coerce(FieldType::Decimal, &json!(3)).unwrap(), json!(3.0));
    }

    #[test]
    fn test_no_silent_string_casts() {
        assert!(coerce(FieldType::Integer, &json!("30")).is_err());
        assert!(coerce(FieldType::Boolean, &json!("true")).is_err());
        assert!(coerce(FieldType::String, &json!(30)).is_err());
    }

    #[test]
    fn test_date_and_timestamp_canonicalized() {
        assert_eq!(
            coerce(FieldType::Date, &json!("2024-02-29")).unwrap(),
            json!("2024-02-29")
        );
        assert!(coerce(FieldType::Date, &json!("2023-02-29")).is_err());
        assert!(coerce(FieldType::Date, &json!("yesterday")).is_err());

        assert!(coerce(FieldType::Timestamp, &json!("2024-06-01T12:00:00Z")).is_ok());
        assert!(coerce(FieldType::Timestamp, &json!("2024-06-01")).is_err());
    }

    #[test]
    fn test_uuid_canonicalized_to_lowercase() {
        let coerced = coerce(
            FieldType::Uuid,
            &json!("67E55044-10B1-426F-9247-BB680E5FE0C8"),
        )
        .unwrap();
        assert_eq!(coerced, json!("67e55044-10b1-426f-9247-bb680e5fe0c8"));
    }

    #[test]
    fn test_json_field_accepts_anything() {
        assert!(coerce(FieldType::Json, &json!({"nested": [1, 2]})).is_ok());
        assert!(coerce(FieldType::Json, &json!(42)).is_ok());
    }

    #[test]
    fn test_conforms_flags_retype() {
        let old_payload = obj(json!({"email": "a@x.com", "age": 30}));
        let mut fields = user_fields();
        fields[1].field_type = FieldType::Boolean; // retype age
        let issues = conforms(&fields, &old_payload, false).unwrap_err();
        assert_eq!(issues[0].field, "age");
    }

    #[test]
    fn test_conforms_flags_removed_field_data() {
        let old_payload = obj(json!({"email": "a@x.com", "age": 30}));
        let fields = vec![FieldDefinition::new("email", FieldType::String).required()];
        let issues = conforms(&fields, &old_payload, false).unwrap_err();
        assert_eq!(issues[0].field, "age");
    }
}
