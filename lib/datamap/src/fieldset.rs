//! Declarative entity schema and the field validation algorithm.

use std::cmp::Ordering;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::time::Temporal;
use crate::{Data, ModelError, ValidationError, Value, validate};

/// Name of the identity field every entity carries.
pub const ID_FIELD: &str = "id";

/// Storage/validation type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    Time,
    Text,
    Email,
    Url,
    Ip,
    Enum,
    Binary,
    Json,
}

impl FieldType {
    /// Value a field of this type holds when nothing else was supplied.
    pub fn empty_value(&self) -> Value {
        match self {
            FieldType::Integer => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Boolean => Value::Bool(false),
            FieldType::DateTime => Value::from(Temporal::DateTime.zero()),
            FieldType::Date => Value::from(Temporal::Date.zero()),
            FieldType::Time => Value::from(Temporal::Time.zero()),
            FieldType::Ip => Value::from("0.0.0.0"),
            FieldType::Text | FieldType::Email | FieldType::Url | FieldType::Binary => {
                Value::from("")
            }
            FieldType::Json => Value::Json(serde_json::Value::Object(Default::default())),
            FieldType::Enum => Value::Null,
        }
    }
}

/// A single field of a [`Fieldset`].
///
/// Built with chained setters and frozen once added to a fieldset.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    name: String,
    kind: FieldType,
    required: bool,
    nullable: bool,
    default: Option<Value>,
    min: Option<Value>,
    max: Option<Value>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<String>,
    regex: Option<Regex>,
    values: Vec<Value>,
    column: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into().trim().to_string(),
            kind,
            required: false,
            nullable: false,
            default: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            regex: None,
            values: Vec::new(),
            column: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn min(mut self, min: impl Into<Value>) -> Self {
        self.min = Some(min.into());
        self
    }

    pub fn max(mut self, max: impl Into<Value>) -> Self {
        self.max = Some(max.into());
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Pattern the value's text must match. Compiled when the field is added.
    pub fn regex(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn values<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Storage column name, when it differs from the field name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldType {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn allowed_values(&self) -> &[Value] {
        &self.values
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Declared default, falling back to the first allowed value for enums and
    /// to the type's empty value otherwise.
    pub fn default(&self) -> Value {
        match (&self.default, self.kind) {
            (Some(v), _) => v.clone(),
            (None, FieldType::Enum) => self.values.first().cloned().unwrap_or(Value::Null),
            (None, kind) => kind.empty_value(),
        }
    }

    fn freeze(mut self) -> Result<Self, ModelError> {
        if self.name.is_empty() {
            return Err(ModelError::InvalidField {
                field: self.name,
                reason: "field name is empty".to_string(),
            });
        }
        if self.kind == FieldType::Enum && self.values.is_empty() {
            return Err(ModelError::InvalidField {
                field: self.name,
                reason: "enum fields need at least one allowed value".to_string(),
            });
        }
        if let Some(pattern) = &self.pattern {
            let regex = Regex::new(pattern).map_err(|e| ModelError::InvalidField {
                field: self.name.clone(),
                reason: e.to_string(),
            })?;
            self.regex = Some(regex);
        }
        Ok(self)
    }

    /// Validate a raw value against this field.
    ///
    /// Returns the clean value and no error, or the untouched raw value and the
    /// first error found.
    pub fn validate(&self, raw: impl Into<Value>) -> (Value, Option<ValidationError>) {
        let raw = raw.into();

        if raw.is_empty() && self.required {
            return (raw, Some(ValidationError::Required));
        }
        if raw.is_null() {
            return if self.nullable {
                (Value::Null, None)
            } else {
                (raw, Some(ValidationError::Null))
            };
        }

        let checked = self.coerce(&raw).and_then(|clean| match self.post_check(&clean) {
            Some(error) => Err(error),
            None => Ok(clean),
        });

        match checked {
            Ok(clean) => (clean, None),
            Err(error) => (raw, Some(error)),
        }
    }

    fn coerce(&self, raw: &Value) -> Result<Value, ValidationError> {
        match self.kind {
            FieldType::Integer => validate::integer(raw),
            FieldType::Float => validate::float(raw),
            FieldType::Boolean => validate::boolean(raw),
            FieldType::DateTime => validate::temporal(raw, Temporal::DateTime, self.required),
            FieldType::Date => validate::temporal(raw, Temporal::Date, self.required),
            FieldType::Time => validate::temporal(raw, Temporal::Time, self.required),
            FieldType::Ip => validate::ip(raw, self.required),
            FieldType::Email => validate::email(raw),
            FieldType::Url => validate::url(raw),
            FieldType::Enum => validate::enumeration(raw, &self.values),
            FieldType::Text => validate::text(raw),
            FieldType::Binary => validate::binary(raw),
            FieldType::Json => validate::json(raw),
        }
    }

    // min, max, min_length, max_length, regex, values: first failure wins
    fn post_check(&self, value: &Value) -> Option<ValidationError> {
        if let Some(min) = &self.min {
            if value.loose_cmp(min) == Some(Ordering::Less) {
                return Some(ValidationError::Min);
            }
        }
        if let Some(max) = &self.max {
            if value.loose_cmp(max) == Some(Ordering::Greater) {
                return Some(ValidationError::Max);
            }
        }
        if self.min_length.is_some() || self.max_length.is_some() {
            let len = value.to_text().chars().count();
            if self.min_length.is_some_and(|min| len < min) {
                return Some(ValidationError::TooShort);
            }
            if self.max_length.is_some_and(|max| len > max) {
                return Some(ValidationError::TooLong);
            }
        }
        if let Some(regex) = &self.regex {
            if !regex.is_match(&value.to_text()) {
                return Some(ValidationError::Regex);
            }
        }
        if self.kind != FieldType::Enum
            && !self.values.is_empty()
            && !self.values.iter().any(|allowed| allowed.loose_eq(value))
        {
            return Some(ValidationError::Value);
        }
        None
    }
}

/// Ordered, immutable set of field definitions for one entity type.
#[derive(Debug, Clone, Default)]
pub struct Fieldset {
    fields: IndexMap<String, FieldDefinition>,
}

impl Fieldset {
    pub fn builder() -> FieldsetBuilder {
        FieldsetBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Find the field whose storage column is `column`.
    pub fn by_column(&self, column: &str) -> Option<&FieldDefinition> {
        self.fields.values().find(|f| f.column_name() == column)
    }

    /// Validate a value for a named field.
    ///
    /// Validation failures are reported in the returned tuple; only an
    /// undeclared field name is an `Err`.
    pub fn validate(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(Value, Option<ValidationError>), ModelError> {
        let definition = self
            .get(field)
            .ok_or_else(|| ModelError::UnknownField(field.to_string()))?;
        Ok(definition.validate(value))
    }

    /// Validate every entry of `data`, returning clean values and the errors
    /// for the fields that failed.
    pub fn validate_all(
        &self,
        data: &Data,
    ) -> Result<(Data, IndexMap<String, ValidationError>), ModelError> {
        let mut values = Data::with_capacity(data.len());
        let mut errors = IndexMap::new();
        for (name, raw) in data {
            let (value, error) = self.validate(name, raw.clone())?;
            if let Some(error) = error {
                errors.insert(name.clone(), error);
            }
            values.insert(name.clone(), value);
        }
        Ok((values, errors))
    }
}

impl<'a> IntoIterator for &'a Fieldset {
    type Item = &'a FieldDefinition;
    type IntoIter = indexmap::map::Values<'a, String, FieldDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.values()
    }
}

/// Collects field definitions and freezes them into a [`Fieldset`].
#[derive(Debug, Default)]
pub struct FieldsetBuilder {
    fields: Vec<FieldDefinition>,
}

impl FieldsetBuilder {
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Shorthand for an optional integer `id` field.
    pub fn id(self) -> Self {
        self.field(FieldDefinition::new(ID_FIELD, FieldType::Integer))
    }

    pub fn build(self) -> Result<Fieldset, ModelError> {
        let mut fields = IndexMap::with_capacity(self.fields.len());
        for field in self.fields {
            let field = field.freeze()?;
            if fields.contains_key(field.name()) {
                return Err(ModelError::DuplicateField(field.name));
            }
            fields.insert(field.name.clone(), field);
        }
        Ok(Fieldset { fields })
    }
}
