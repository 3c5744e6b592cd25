use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use trailguard_core::{AppError, AppResult, NonEmptyString};

use crate::classification::PiiType;

/// Declared type of a schema field supplied by the schema source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFieldType {
    /// UTF-8 string field.
    Text,
    /// Numeric field.
    Number,
    /// Boolean field.
    Boolean,
    /// Date-only field.
    Date,
    /// Date-time field.
    DateTime,
    /// Arbitrary JSON field.
    Json,
}

impl SchemaFieldType {
    /// Returns a stable storage value for the field type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Json => "json",
        }
    }
}

impl FromStr for SchemaFieldType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "datetime" => Ok(Self::DateTime),
            "json" => Ok(Self::Json),
            _ => Err(AppError::Configuration(format!(
                "unknown schema field type '{value}'"
            ))),
        }
    }
}

/// One field of an entity schema as supplied by the schema source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    name: NonEmptyString,
    field_type: SchemaFieldType,
    annotation: Option<PiiType>,
    is_identifier: bool,
}

impl SchemaField {
    /// Creates a validated schema field.
    pub fn new(
        name: impl Into<String>,
        field_type: SchemaFieldType,
        annotation: Option<PiiType>,
        is_identifier: bool,
    ) -> AppResult<Self> {
        Ok(Self {
            name: NonEmptyString::new(name)?,
            field_type,
            annotation,
            is_identifier,
        })
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &NonEmptyString {
        &self.name
    }

    /// Returns the declared field type.
    #[must_use]
    pub fn field_type(&self) -> SchemaFieldType {
        self.field_type
    }

    /// Returns the explicit PII annotation, when present.
    #[must_use]
    pub fn annotation(&self) -> Option<PiiType> {
        self.annotation
    }

    /// Returns whether the field is the entity identifier.
    #[must_use]
    pub fn is_identifier(&self) -> bool {
        self.is_identifier
    }
}

/// Entity schema consumed by the audit configuration generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    entity_name: NonEmptyString,
    storage_name: NonEmptyString,
    fields: Vec<SchemaField>,
}

impl EntitySchema {
    /// Creates a validated entity schema.
    ///
    /// Requires a non-empty field list with unique names and exactly one
    /// identifier field.
    pub fn new(
        entity_name: impl Into<String>,
        storage_name: impl Into<String>,
        fields: Vec<SchemaField>,
    ) -> AppResult<Self> {
        let entity_name = NonEmptyString::new(entity_name)?;
        let storage_name = NonEmptyString::new(storage_name)?;

        if fields.is_empty() {
            return Err(AppError::Configuration(format!(
                "entity '{}' has no fields",
                entity_name.as_str()
            )));
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name().as_str().to_owned()) {
                return Err(AppError::Configuration(format!(
                    "duplicate field '{}' in schema for entity '{}'",
                    field.name().as_str(),
                    entity_name.as_str()
                )));
            }
        }

        let identifier_count = fields.iter().filter(|field| field.is_identifier()).count();
        if identifier_count != 1 {
            return Err(AppError::Configuration(format!(
                "entity '{}' must declare exactly one identifier field, found {identifier_count}",
                entity_name.as_str()
            )));
        }

        Ok(Self {
            entity_name,
            storage_name,
            fields,
        })
    }

    /// Returns the entity logical name.
    #[must_use]
    pub fn entity_name(&self) -> &NonEmptyString {
        &self.entity_name
    }

    /// Returns the physical storage name.
    #[must_use]
    pub fn storage_name(&self) -> &NonEmptyString {
        &self.storage_name
    }

    /// Returns the schema fields.
    #[must_use]
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Returns the identifier field.
    #[must_use]
    pub fn identifier_field(&self) -> &SchemaField {
        // Constructor guarantees exactly one identifier.
        self.fields
            .iter()
            .find(|field| field.is_identifier())
            .unwrap_or(&self.fields[0])
    }
}

#[cfg(test)]
mod tests {
    use super::{EntitySchema, SchemaField, SchemaFieldType};

    fn field(name: &str, is_identifier: bool) -> SchemaField {
        SchemaField::new(name, SchemaFieldType::Text, None, is_identifier)
            .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn schema_requires_fields() {
        let result = EntitySchema::new("user", "users", Vec::new());
        assert!(result.is_err());
    }

    #[test]
    fn schema_rejects_duplicate_field_names() {
        let result = EntitySchema::new(
            "user",
            "users",
            vec![field("id", true), field("email", false), field("email", false)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn schema_requires_exactly_one_identifier() {
        let none = EntitySchema::new("user", "users", vec![field("email", false)]);
        assert!(none.is_err());

        let two = EntitySchema::new("user", "users", vec![field("id", true), field("uid", true)]);
        assert!(two.is_err());
    }

    #[test]
    fn identifier_field_is_reachable() {
        let schema = EntitySchema::new(
            "user",
            "users",
            vec![field("id", true), field("email", false)],
        )
        .unwrap_or_else(|_| unreachable!());
        assert_eq!(schema.identifier_field().name().as_str(), "id");
    }
}
