
use crate::{
    key::Key,
    types::{Datatype, DatatypeFamily},
    value::{
        DATE_FORMAT, DATETIME_FORMAT, DATETIME_PARSE, StorageValue, TIME_FORMAT, TIME_PARSE,
        Value, json_from_value, value_from_json,
    },
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use thiserror::Error as ThisError;

///
/// ConversionError
///

#[derive(Debug, ThisError)]
pub enum ConversionError {
    #[error("cannot convert {found} value '{value}' to {expected}")]
    Incompatible {
        expected: &'static str,
        found: &'static str,
        value: String,
    },

    #[error("'{value}' is not a variant of enum '{name}'")]
    UnknownEnumVariant { name: String, value: String },

    #[error("stored value '{value}' cannot be decoded as {expected}")]
    Storage { expected: &'static str, value: String },
}

fn incompatible(expected: &'static str, value: &Value) -> ConversionError {
    ConversionError::Incompatible {
        expected,
        found: value.type_label(),
        value: value.to_string(),
    }
}

fn bad_storage(expected: &'static str, value: &StorageValue) -> ConversionError {
    ConversionError::Storage {
        expected,
        value: format!("{value:?}"),
    }
}

///
/// Converter
///
/// Bidirectional mapping between a datatype's canonical representation and
/// its storage and wire shapes.
///
/// Contract: `from_storage(to_storage(v)) == v` and
/// `from_wire(to_wire(v)) == v` for every canonical `v`. Enum values are
/// type-shifted (label ⇄ backing scalar), temporal values are carried as
/// ISO text / component objects. Null never reaches a converter; the
/// property layer short-circuits it.
///

pub trait Converter: Debug + Send + Sync {
    /// Coerce arbitrary input into the canonical representation.
    fn convert(&self, datatype: &Datatype, value: Value) -> Result<Value, ConversionError>;

    fn to_storage(&self, datatype: &Datatype, value: &Value)
    -> Result<StorageValue, ConversionError>;

    fn from_storage(
        &self,
        datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError>;

    fn to_wire(
        &self,
        datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError>;

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError>;
}

///
/// ConverterRegistry
///
/// Family-keyed converter table with a text fallback. Registration is by
/// datatype family, which gives subtype-compatible fallback: every enum
/// datatype resolves to the registered enum converter, every reference to
/// the reference converter.
///

#[derive(Debug)]
pub struct ConverterRegistry {
    by_family: HashMap<DatatypeFamily, Arc<dyn Converter>>,
    fallback: Arc<dyn Converter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConverterRegistry {
    /// Registry preloaded with the built-in converter per family.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self {
            by_family: HashMap::new(),
            fallback: Arc::new(TextConverter),
        };
        registry.register(DatatypeFamily::Text, Arc::new(TextConverter));
        registry.register(DatatypeFamily::Integer, Arc::new(IntegerConverter));
        registry.register(DatatypeFamily::Float, Arc::new(FloatConverter));
        registry.register(DatatypeFamily::Boolean, Arc::new(BooleanConverter));
        registry.register(DatatypeFamily::DateTime, Arc::new(DateTimeConverter));
        registry.register(DatatypeFamily::Date, Arc::new(DateConverter));
        registry.register(DatatypeFamily::Time, Arc::new(TimeConverter));
        registry.register(DatatypeFamily::Duration, Arc::new(DurationConverter));
        registry.register(DatatypeFamily::Bytes, Arc::new(BytesConverter));
        registry.register(DatatypeFamily::List, Arc::new(ListConverter));
        registry.register(DatatypeFamily::Map, Arc::new(MapConverter));
        registry.register(DatatypeFamily::Enum, Arc::new(EnumConverter));
        registry.register(DatatypeFamily::Reference, Arc::new(ReferenceConverter));
        registry
    }

    pub fn register(&mut self, family: DatatypeFamily, converter: Arc<dyn Converter>) {
        self.by_family.insert(family, converter);
    }

    #[must_use]
    pub fn get(&self, datatype: &Datatype) -> Arc<dyn Converter> {
        self.by_family
            .get(&datatype.family())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

///
/// TextConverter
///

#[derive(Debug)]
pub struct TextConverter;

impl Converter for TextConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Text(_) => Ok(value),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Key(_) => {
                Ok(Value::Text(value.to_text()))
            }
            other => Err(incompatible("text", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Text(s) => Ok(StorageValue::Text(s.clone())),
            other => Err(incompatible("text", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Text(s) => Ok(Value::Text(s)),
            StorageValue::Integer(n) => Ok(Value::Text(n.to_string())),
            StorageValue::Real(f) => Ok(Value::Text(f.to_string())),
            other => Err(bad_storage("text", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Text(s) => Ok(serde_json::Value::String(s.clone())),
            other => Err(incompatible("text", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// IntegerConverter
///

#[derive(Debug)]
pub struct IntegerConverter;

impl Converter for IntegerConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Int(_) => Ok(value),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            Value::Text(ref s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| incompatible("integer", &value)),
            other => Err(incompatible("integer", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Int(n) => Ok(StorageValue::Integer(*n)),
            other => Err(incompatible("integer", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Integer(n) => Ok(Value::Int(n)),
            other => Err(bad_storage("integer", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Int(n) => Ok(serde_json::Value::from(*n)),
            other => Err(incompatible("integer", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// FloatConverter
///

#[derive(Debug)]
pub struct FloatConverter;

impl Converter for FloatConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Float(_) => Ok(value),
            Value::Int(n) => Ok(Value::Float(n as f64)),
            Value::Text(ref s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| incompatible("float", &value)),
            other => Err(incompatible("float", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Float(f) => Ok(StorageValue::Real(*f)),
            other => Err(incompatible("float", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Real(f) => Ok(Value::Float(f)),
            StorageValue::Integer(n) => Ok(Value::Float(n as f64)),
            other => Err(bad_storage("float", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Float(f) => Ok(serde_json::Value::from(*f)),
            other => Err(incompatible("float", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// BooleanConverter
///

#[derive(Debug)]
pub struct BooleanConverter;

impl Converter for BooleanConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Bool(_) => Ok(value),
            Value::Int(n) => Ok(Value::Bool(n != 0)),
            Value::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(incompatible("boolean", &value)),
            },
            other => Err(incompatible("boolean", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Bool(b) => Ok(StorageValue::Integer(i64::from(*b))),
            other => Err(incompatible("boolean", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Integer(n) => Ok(Value::Bool(n != 0)),
            other => Err(bad_storage("boolean", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            other => Err(incompatible("boolean", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// DateTimeConverter
///
/// Storage: ISO-8601 text. Wire: a component object, so clients never have
/// to agree on a text format.
///

#[derive(Debug)]
pub struct DateTimeConverter;

fn datetime_from_text(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_PARSE)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

impl Converter for DateTimeConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::DateTime(_) => Ok(value),
            Value::Int(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| Value::DateTime(dt.naive_utc()))
                .ok_or_else(|| incompatible("datetime", &Value::Int(secs))),
            Value::Text(ref s) => datetime_from_text(s)
                .map(Value::DateTime)
                .ok_or_else(|| incompatible("datetime", &value)),
            other => Err(incompatible("datetime", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::DateTime(_) => Ok(value.to_storage_lossy()),
            other => Err(incompatible("datetime", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Text(ref s) => datetime_from_text(s)
                .map(Value::DateTime)
                .ok_or_else(|| bad_storage("datetime", &value)),
            other => Err(bad_storage("datetime", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::DateTime(dt) => {
                Ok(serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string()))
            }
            other => Err(incompatible("datetime", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// DateConverter
///

#[derive(Debug)]
pub struct DateConverter;

impl Converter for DateConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Date(_) => Ok(value),
            Value::DateTime(dt) => Ok(Value::Date(dt.date())),
            Value::Text(ref s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .map(Value::Date)
                .map_err(|_| incompatible("date", &value)),
            other => Err(incompatible("date", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Date(_) => Ok(value.to_storage_lossy()),
            other => Err(incompatible("date", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Text(ref s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|_| bad_storage("date", &value)),
            other => Err(bad_storage("date", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Date(d) => Ok(serde_json::Value::String(d.format(DATE_FORMAT).to_string())),
            other => Err(incompatible("date", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// TimeConverter
///

#[derive(Debug)]
pub struct TimeConverter;

impl Converter for TimeConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Time(_) => Ok(value),
            Value::DateTime(dt) => Ok(Value::Time(dt.time())),
            Value::Text(ref s) => NaiveTime::parse_from_str(s.trim(), TIME_PARSE)
                .map(Value::Time)
                .map_err(|_| incompatible("time", &value)),
            other => Err(incompatible("time", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Time(_) => Ok(value.to_storage_lossy()),
            other => Err(incompatible("time", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Text(ref s) => NaiveTime::parse_from_str(s, TIME_PARSE)
                .map(Value::Time)
                .map_err(|_| bad_storage("time", &value)),
            other => Err(bad_storage("time", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Time(t) => Ok(serde_json::Value::String(t.format(TIME_FORMAT).to_string())),
            other => Err(incompatible("time", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// DurationConverter
///
/// Storage: integer milliseconds. Wire: fractional seconds.
///

#[derive(Debug)]
pub struct DurationConverter;

impl Converter for DurationConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Duration(_) => Ok(value),
            Value::Int(secs) => TimeDelta::try_seconds(secs)
                .map(Value::Duration)
                .ok_or_else(|| incompatible("duration", &Value::Int(secs))),
            Value::Float(secs) => TimeDelta::try_milliseconds((secs * 1000.0) as i64)
                .map(Value::Duration)
                .ok_or_else(|| incompatible("duration", &Value::Float(secs))),
            other => Err(incompatible("duration", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Duration(d) => Ok(StorageValue::Integer(d.num_milliseconds())),
            other => Err(incompatible("duration", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Integer(ms) => TimeDelta::try_milliseconds(ms)
                .map(Value::Duration)
                .ok_or_else(|| bad_storage("duration", &StorageValue::Integer(ms))),
            other => Err(bad_storage("duration", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Duration(d) => {
                Ok(serde_json::Value::from(d.num_milliseconds() as f64 / 1000.0))
            }
            other => Err(incompatible("duration", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// BytesConverter
///
/// Storage: blob. Wire: standard base64 text.
///

#[derive(Debug)]
pub struct BytesConverter;

impl Converter for BytesConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Bytes(_) => Ok(value),
            Value::Text(ref s) => STANDARD
                .decode(s)
                .map(Value::Bytes)
                .map_err(|_| incompatible("bytes", &value)),
            other => Err(incompatible("bytes", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Bytes(b) => Ok(StorageValue::Blob(b.clone())),
            other => Err(incompatible("bytes", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Blob(b) => Ok(Value::Bytes(b)),
            other => Err(bad_storage("bytes", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Bytes(b) => Ok(serde_json::Value::String(STANDARD.encode(b))),
            other => Err(incompatible("bytes", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// ListConverter
///
/// Storage: JSON array text. A scalar input is wrapped into a one-element
/// list; JSON array text is parsed.
///

#[derive(Debug)]
pub struct ListConverter;

impl Converter for ListConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::List(_) => Ok(value),
            Value::Text(ref s) if s.trim_start().starts_with('[') => {
                serde_json::from_str::<serde_json::Value>(s)
                    .map(value_from_json)
                    .map_err(|_| incompatible("list", &value))
            }
            other => Ok(Value::List(vec![other])),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::List(_) => Ok(StorageValue::Text(json_from_value(value).to_string())),
            other => Err(incompatible("list", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Text(ref s) => serde_json::from_str::<serde_json::Value>(s)
                .map(value_from_json)
                .map_err(|_| bad_storage("list", &value)),
            other => Err(bad_storage("list", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::List(_) => Ok(json_from_value(value)),
            other => Err(incompatible("list", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// MapConverter
///

#[derive(Debug)]
pub struct MapConverter;

impl Converter for MapConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Map(_) => Ok(value),
            Value::Text(ref s) => serde_json::from_str::<serde_json::Value>(s)
                .ok()
                .map(value_from_json)
                .filter(|v| matches!(v, Value::Map(_)))
                .ok_or_else(|| incompatible("map", &value)),
            other => Err(incompatible("map", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Map(_) => Ok(StorageValue::Text(json_from_value(value).to_string())),
            other => Err(incompatible("map", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Text(ref s) => serde_json::from_str::<serde_json::Value>(s)
                .map(value_from_json)
                .map_err(|_| bad_storage("map", &value)),
            other => Err(bad_storage("map", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Map(_) => Ok(json_from_value(value)),
            other => Err(incompatible("map", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// EnumConverter
///
/// Canonical: the variant label as text. Storage and wire: the backing
/// scalar. Input may be either the label or the scalar.
///

#[derive(Debug)]
pub struct EnumConverter;

impl EnumConverter {
    fn def(datatype: &Datatype) -> Option<&crate::types::EnumDef> {
        match datatype {
            Datatype::Enum(def) => Some(def),
            _ => None,
        }
    }
}

impl Converter for EnumConverter {
    fn convert(&self, datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        let Some(def) = Self::def(datatype) else {
            return Err(incompatible("enum", &value));
        };
        if let Value::Text(label) = &value
            && def.by_label(label).is_some()
        {
            return Ok(value);
        }
        def.by_scalar(&value)
            .map(|variant| Value::Text(variant.label.clone()))
            .ok_or_else(|| ConversionError::UnknownEnumVariant {
                name: def.name().to_string(),
                value: value.to_string(),
            })
    }

    fn to_storage(
        &self,
        datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        let def = Self::def(datatype).ok_or_else(|| incompatible("enum", value))?;
        let label = value.as_str().ok_or_else(|| incompatible("enum", value))?;
        def.by_label(label)
            .map(|variant| variant.scalar.to_storage_lossy())
            .ok_or_else(|| ConversionError::UnknownEnumVariant {
                name: def.name().to_string(),
                value: label.to_string(),
            })
    }

    fn from_storage(
        &self,
        datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        let scalar = match value {
            StorageValue::Integer(n) => Value::Int(n),
            StorageValue::Real(f) => Value::Float(f),
            StorageValue::Text(s) => Value::Text(s),
            other => return Err(bad_storage("enum", &other)),
        };
        self.convert(datatype, scalar)
    }

    fn to_wire(
        &self,
        datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        let def = Self::def(datatype).ok_or_else(|| incompatible("enum", value))?;
        let label = value.as_str().ok_or_else(|| incompatible("enum", value))?;
        def.by_label(label)
            .map(|variant| json_from_value(&variant.scalar))
            .ok_or_else(|| ConversionError::UnknownEnumVariant {
                name: def.name().to_string(),
                value: label.to_string(),
            })
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}

///
/// ReferenceConverter
///
/// Canonical: a `Key`. Storage and wire: the canonical key string, which
/// is what the reference operator and join key expressions compare
/// against.
///

#[derive(Debug)]
pub struct ReferenceConverter;

impl Converter for ReferenceConverter {
    fn convert(&self, _datatype: &Datatype, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::Key(_) => Ok(value),
            Value::Text(ref s) => Key::parse_raw(s)
                .map(Value::Key)
                .map_err(|_| incompatible("reference", &value)),
            other => Err(incompatible("reference", &other)),
        }
    }

    fn to_storage(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<StorageValue, ConversionError> {
        match value {
            Value::Key(k) => Ok(StorageValue::Text(k.to_string())),
            other => Err(incompatible("reference", other)),
        }
    }

    fn from_storage(
        &self,
        _datatype: &Datatype,
        value: StorageValue,
    ) -> Result<Value, ConversionError> {
        match value {
            StorageValue::Text(ref s) => Key::parse_raw(s)
                .map(Value::Key)
                .map_err(|_| bad_storage("reference", &value)),
            other => Err(bad_storage("reference", &other)),
        }
    }

    fn to_wire(
        &self,
        _datatype: &Datatype,
        value: &Value,
    ) -> Result<serde_json::Value, ConversionError> {
        match value {
            Value::Key(k) => Ok(serde_json::Value::String(k.to_string())),
            other => Err(incompatible("reference", other)),
        }
    }

    fn from_wire(
        &self,
        datatype: &Datatype,
        value: serde_json::Value,
    ) -> Result<Value, ConversionError> {
        self.convert(datatype, value_from_json(value))
    }
}
