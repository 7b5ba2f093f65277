use crate::{
    convert::Converter,
    db::Database,
    entity::Entity,
    error::Error,
    types::Datatype,
    value::{Value, partial_cmp_values},
};
use regex::Regex;
use std::{fmt::Debug, sync::Arc};
use thiserror::Error as ThisError;

///
/// ValidateError
///
/// Validator failures, raised in chain order: required, choices, range,
/// pattern, custom. The first failure aborts the assignment.
///

#[derive(Debug, ThisError)]
pub enum ValidateError {
    #[error("property '{0}' requires a value")]
    PropertyRequired(String),

    #[error("value {value} is invalid for property '{name}'")]
    InvalidChoice { name: String, value: String },

    #[error("value {value} out of range for property '{name}'")]
    OutOfRange { name: String, value: String },

    #[error("value '{value}' does not match the pattern for property '{name}'")]
    PatternNotMatched { name: String, value: String },

    #[error("property '{name}': {message}")]
    Custom { name: String, message: String },
}

///
/// Validate
///
/// Custom validator hook; runs after the built-in chain.
///

pub trait Validate: Debug + Send + Sync {
    fn validate(&self, property: &str, value: &Value) -> Result<(), ValidateError>;
}

///
/// ComputedProperty
///
/// Accessor pair for transient properties. Getters may run sub-queries
/// (an account balance summing child transactions); setters may write
/// related entities (upserting an opening-balance row). A computed
/// property never owns a column.
///

pub trait ComputedProperty: Debug + Send + Sync {
    fn get(&self, instance: &Entity, db: &Database) -> Result<Value, Error>;

    fn set(&self, instance: &Entity, db: &Database, value: Value) -> Result<(), Error> {
        let _ = (instance, db, value);
        Ok(())
    }

    /// Whether [`ComputedProperty::set`] is implemented; assignment to a
    /// getter-only property is rejected before `set` is ever called.
    fn has_setter(&self) -> bool {
        false
    }
}

///
/// ValidatorDef
///

#[derive(Clone, Debug)]
pub enum ValidatorDef {
    Required,
    Choices(Vec<Value>),
    Range {
        min: Option<Value>,
        max: Option<Value>,
    },
    Pattern(Regex),
    Custom(Arc<dyn Validate>),
}

impl ValidatorDef {
    const fn rank(&self) -> u8 {
        match self {
            Self::Required => 0,
            Self::Choices(_) => 1,
            Self::Range { .. } => 2,
            Self::Pattern(_) => 3,
            Self::Custom(_) => 4,
        }
    }

    fn run(&self, name: &str, value: &Value) -> Result<(), ValidateError> {
        match self {
            Self::Required => {
                if value.is_null() {
                    Err(ValidateError::PropertyRequired(name.to_string()))
                } else {
                    Ok(())
                }
            }
            // Null passes every validator except Required.
            _ if value.is_null() => Ok(()),
            Self::Choices(choices) => {
                if choices.contains(value) {
                    Ok(())
                } else {
                    Err(ValidateError::InvalidChoice {
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                }
            }
            Self::Range { min, max } => {
                let below = min.as_ref().is_some_and(|m| {
                    partial_cmp_values(value, m) == Some(std::cmp::Ordering::Less)
                });
                let above = max.as_ref().is_some_and(|m| {
                    partial_cmp_values(value, m) == Some(std::cmp::Ordering::Greater)
                });
                if below || above {
                    Err(ValidateError::OutOfRange {
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            Self::Pattern(pattern) => match value.as_str() {
                Some(s) if !s.is_empty() && !pattern.is_match(s) => {
                    Err(ValidateError::PatternNotMatched {
                        name: name.to_string(),
                        value: s.to_string(),
                    })
                }
                _ => Ok(()),
            },
            Self::Custom(validator) => validator.validate(name, value),
        }
    }
}

/// Configuration-time pattern errors surface at validation time rather
/// than panicking while a schema module is being assembled.
#[derive(Debug)]
struct BrokenPattern {
    message: String,
}

impl Validate for BrokenPattern {
    fn validate(&self, property: &str, _value: &Value) -> Result<(), ValidateError> {
        Err(ValidateError::Custom {
            name: property.to_string(),
            message: self.message.clone(),
        })
    }
}

///
/// PropertyDef
///
/// A typed, named, validated attribute of a kind. The name, column name,
/// and sequence number are assigned when the definition is attached to a
/// kind during sealing, so definitions can be written without repeating
/// the name.
///

#[derive(Clone, Debug)]
pub struct PropertyDef {
    pub(crate) name: String,
    pub(crate) column: String,
    pub(crate) verbose: Option<String>,
    pub(crate) datatype: Datatype,
    pub(crate) default: Option<Value>,
    pub(crate) required: bool,
    pub(crate) readonly: bool,
    pub(crate) private: bool,
    pub(crate) indexed: bool,
    pub(crate) is_key: bool,
    pub(crate) is_label: bool,
    pub(crate) auto_now: bool,
    pub(crate) auto_now_add: bool,
    pub(crate) suffix: Option<String>,
    pub(crate) validators: Vec<ValidatorDef>,
    pub(crate) converter: Option<Arc<dyn Converter>>,
    pub(crate) computed: Option<Arc<dyn ComputedProperty>>,
    pub(crate) parts: Vec<PropertyDef>,
    pub(crate) seq: u32,
}

impl PropertyDef {
    #[must_use]
    pub fn new(datatype: Datatype) -> Self {
        Self {
            name: String::new(),
            column: String::new(),
            verbose: None,
            datatype,
            default: None,
            required: false,
            readonly: false,
            private: false,
            indexed: false,
            is_key: false,
            is_label: false,
            auto_now: false,
            auto_now_add: false,
            suffix: None,
            validators: Vec::new(),
            converter: None,
            computed: None,
            parts: Vec::new(),
            seq: 0,
        }
    }

    /// One logical property backed by several physical columns. Each part
    /// should carry a column-name suffix; reads and writes distribute over
    /// the parts as a `Value::List` in declaration order.
    #[must_use]
    pub fn compound(parts: Vec<Self>) -> Self {
        let mut def = Self::new(Datatype::List);
        def.parts = parts;
        def
    }

    // ── Builder surface ────────────────────────────────

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self.validators.push(ValidatorDef::Required);
        self
    }

    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    #[must_use]
    pub const fn private(mut self) -> Self {
        self.private = true;
        self
    }

    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    #[must_use]
    pub const fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    #[must_use]
    pub const fn label(mut self) -> Self {
        self.is_label = true;
        self
    }

    #[must_use]
    pub const fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    #[must_use]
    pub const fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self
    }

    #[must_use]
    pub fn verbose_name(mut self, verbose: impl Into<String>) -> Self {
        self.verbose = Some(verbose.into());
        self
    }

    #[must_use]
    pub fn column_name(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    #[must_use]
    pub fn default_value(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn choices(mut self, choices: Vec<Value>) -> Self {
        self.validators.push(ValidatorDef::Choices(choices));
        self
    }

    #[must_use]
    pub fn range(mut self, min: Option<Value>, max: Option<Value>) -> Self {
        self.validators.push(ValidatorDef::Range { min, max });
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(regex) => self.validators.push(ValidatorDef::Pattern(regex)),
            Err(err) => self.validators.push(ValidatorDef::Custom(Arc::new(
                BrokenPattern {
                    message: format!("invalid pattern '{pattern}': {err}"),
                },
            ))),
        }
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validate>) -> Self {
        self.validators.push(ValidatorDef::Custom(validator));
        self
    }

    #[must_use]
    pub fn converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Attach a computed accessor; implies transient (no column).
    #[must_use]
    pub fn computed(mut self, accessor: Arc<dyn ComputedProperty>) -> Self {
        self.computed = Some(accessor);
        self
    }

    // ── Introspection ──────────────────────────────────

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    #[must_use]
    pub fn verbose(&self) -> &str {
        self.verbose.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub const fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    #[must_use]
    pub const fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.computed.is_some()
    }

    #[must_use]
    pub fn is_compound(&self) -> bool {
        !self.parts.is_empty()
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    #[must_use]
    pub const fn is_private(&self) -> bool {
        self.private
    }

    #[must_use]
    pub const fn is_key_property(&self) -> bool {
        self.is_key
    }

    #[must_use]
    pub fn parts(&self) -> &[Self] {
        &self.parts
    }

    /// Assign name, column, and sequence number at attach time; compound
    /// parts get `name + suffix` for both.
    pub(crate) fn attach(&mut self, name: &str, seq: &mut u32) {
        self.name = name.to_string();
        if self.column.is_empty() {
            self.column = name.to_string();
        }
        self.seq = *seq;
        *seq += 1;
        for part in &mut self.parts {
            let suffix = part.suffix.clone().unwrap_or_default();
            let part_name = format!("{name}{suffix}");
            part.attach(&part_name, seq);
        }
    }

    /// Run the validator chain in rank order; first failure wins.
    pub(crate) fn validate(&self, value: &Value) -> Result<(), ValidateError> {
        let mut validators: Vec<&ValidatorDef> = self.validators.iter().collect();
        validators.sort_by_key(|v| v.rank());
        for validator in validators {
            validator.run(&self.name, value)?;
        }
        Ok(())
    }

    pub(crate) fn schema_json(&self) -> serde_json::Value {
        if self.is_compound() {
            return serde_json::json!({
                "name": self.name,
                "type": "compound",
                "verboseName": self.verbose(),
                "readonly": self.readonly,
                "isKey": false,
                "components": self.parts.iter().map(Self::schema_json).collect::<Vec<_>>(),
            });
        }
        serde_json::json!({
            "name": self.name,
            "type": if self.is_transient() { "computed" } else { "stored" },
            "verboseName": self.verbose(),
            "default": self.default.as_ref().map(crate::value::json_from_value),
            "readonly": self.readonly,
            "isKey": self.is_key,
            "datatype": self.datatype.to_string(),
        })
    }
}
