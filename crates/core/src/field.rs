//! Field type descriptors for user-declared collection schemas.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for field, index, and collection names.
pub const MAX_NAME_LEN: usize = 64;

/// The declared type of a collection field.
///
/// This is a closed set: the schema validator and query translator switch
/// over it exhaustively, so adding a variant is a compile-time event, not a
/// runtime surprise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Short UTF-8 string.
    String,
    /// 64-bit signed integer.
    Integer,
    /// Double-precision float.
    Decimal,
    /// True/false.
    Boolean,
    /// Calendar date, stored as `YYYY-MM-DD`.
    Date,
    /// Point in time, stored as RFC 3339.
    Timestamp,
    /// Long UTF-8 text.
    Text,
    /// Arbitrary JSON value.
    Json,
    /// UUID, stored in hyphenated lowercase form.
    Uuid,
}

impl FieldType {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "decimal" => Ok(Self::Decimal),
            "boolean" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "timestamp" => Ok(Self::Timestamp),
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "uuid" => Ok(Self::Uuid),
            _ => Err(crate::Error::InvalidFieldDefinition(format!(
                "unknown field type: {s}"
            ))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Text => "text",
            Self::Json => "json",
            Self::Uuid => "uuid",
        }
    }

    /// Whether values of this type compare numerically rather than lexically.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One declared field of a collection schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name; must be a valid identifier, unique within the collection.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether every document must carry this field.
    #[serde(default)]
    pub required: bool,
    /// Whether values must be unique within the collection (index-enforced).
    #[serde(default)]
    pub unique: bool,
    /// Default applied when the field is absent from a payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl FieldDefinition {
    /// Create a plain optional field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            default: None,
        }
    }

    /// Builder-style required flag.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder-style unique flag.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Builder-style default value.
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A declared secondary index over one or more fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name; must be a valid identifier, unique within the collection.
    pub name: String,
    /// Fields covered, in order.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness over the field tuple.
    #[serde(default)]
    pub unique: bool,
}

/// Validate an identifier used for field, index, or collection names.
///
/// Names are restricted to `[A-Za-z_][A-Za-z0-9_]*` so that DDL derived from
/// them (index names, JSON paths) cannot carry SQL metacharacters. Values
/// are always bound as parameters regardless.
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidFieldDefinition(
            "name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(crate::Error::InvalidFieldDefinition(format!(
            "name '{name}' exceeds {MAX_NAME_LEN} characters"
        )));
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => {
            return Err(crate::Error::InvalidFieldDefinition(format!(
                "name '{name}' must start with a letter or underscore"
            )));
        }
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(crate::Error::InvalidFieldDefinition(format!(
            "name '{name}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Validate a full field list: identifier rules plus name uniqueness.
pub fn validate_fields(fields: &[FieldDefinition]) -> crate::Result<()> {
    let mut seen = std::collections::HashSet::new();
    for field in fields {
        validate_name(&field.name)?;
        if !seen.insert(field.name.as_str()) {
            return Err(crate::Error::InvalidFieldDefinition(format!(
                "duplicate field name: {}",
                field.name
            )));
        }
    }
    Ok(())
}

/// Validate index definitions against the declared fields.
pub fn validate_indexes(
    indexes: &[IndexDefinition],
    fields: &[FieldDefinition],
) -> crate::Result<()> {
    let mut seen = std::collections::HashSet::new();
    for index in indexes {
        validate_name(&index.name)?;
        if !seen.insert(index.name.as_str()) {
            return Err(crate::Error::InvalidIndexDefinition(format!(
                "duplicate index name: {}",
                index.name
            )));
        }
        if index.fields.is_empty() {
            return Err(crate::Error::InvalidIndexDefinition(format!(
                "index '{}' covers no fields",
                index.name
            )));
        }
        for field in &index.fields {
            if !fields.iter().any(|f| &f.name == field) {
                return Err(crate::Error::InvalidIndexDefinition(format!(
                    "index '{}' references unknown field '{}'",
                    index.name, field
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_parse() {
        assert_eq!(FieldType::parse("integer").unwrap(), FieldType::Integer);
        assert_eq!(FieldType::parse("uuid").unwrap(), FieldType::Uuid);
        assert!(FieldType::parse("float").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("email").is_ok());
        assert!(validate_name("_private").is_ok());
        assert!(validate_name("field_2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("2fast").is_err());
        assert!(validate_name("drop table").is_err());
        assert!(validate_name("a\"; --").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_fields_rejects_duplicates() {
        let fields = vec![
            FieldDefinition::new("email", FieldType::String),
            FieldDefinition::new("email", FieldType::Text),
        ];
        assert!(validate_fields(&fields).is_err());
    }

    #[test]
    fn test_validate_indexes_requires_known_fields() {
        let fields = vec![FieldDefinition::new("age", FieldType::Integer)];
        let indexes = vec![IndexDefinition {
            name: "by_name".to_string(),
            fields: vec!["name".to_string()],
            unique: false,
        }];
        assert!(validate_indexes(&indexes, &fields).is_err());
    }

    #[test]
    fn test_field_serde_shape() {
        let field: FieldDefinition =
            serde_json::from_str(r#"{"name":"age","type":"integer","required":true}"#).unwrap();
        assert_eq!(field.field_type, FieldType::Integer);
        assert!(field.required);
        assert!(!field.unique);
        assert!(field.default.is_none());
    }
}
