use crate::value::Value;
use std::{fmt, sync::Arc};

///
/// EnumDef
///
/// A named enumeration backed by an arbitrary scalar per variant. The
/// logical value of an enum property is the variant label; storage and
/// wire carry the backing scalar.
///

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDef {
    name: String,
    variants: Vec<EnumVariant>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumVariant {
    pub label: String,
    pub scalar: Value,
}

impl EnumDef {
    pub fn new(name: impl Into<String>, variants: Vec<(&str, Value)>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            variants: variants
                .into_iter()
                .map(|(label, scalar)| EnumVariant {
                    label: label.to_string(),
                    scalar,
                })
                .collect(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn variants(&self) -> &[EnumVariant] {
        &self.variants
    }

    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.label == label)
    }

    #[must_use]
    pub fn by_scalar(&self, scalar: &Value) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| &v.scalar == scalar)
    }

    /// SQL type of the backing scalar; enums with no variants fall back to
    /// text.
    #[must_use]
    pub fn scalar_sql_type(&self) -> &'static str {
        match self.variants.first().map(|v| &v.scalar) {
            Some(Value::Int(_)) => "INTEGER",
            Some(Value::Float(_)) => "REAL",
            _ => "TEXT",
        }
    }
}

///
/// Datatype
///
/// The logical datatype of a property. Each datatype maps onto one SQLite
/// column type and selects a converter by family.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Datatype {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    Time,
    Duration,
    Bytes,
    List,
    Map,
    Enum(Arc<EnumDef>),
    Reference(String),
}

impl Datatype {
    #[must_use]
    pub fn family(&self) -> DatatypeFamily {
        match self {
            Self::Text => DatatypeFamily::Text,
            Self::Integer => DatatypeFamily::Integer,
            Self::Float => DatatypeFamily::Float,
            Self::Boolean => DatatypeFamily::Boolean,
            Self::DateTime => DatatypeFamily::DateTime,
            Self::Date => DatatypeFamily::Date,
            Self::Time => DatatypeFamily::Time,
            Self::Duration => DatatypeFamily::Duration,
            Self::Bytes => DatatypeFamily::Bytes,
            Self::List => DatatypeFamily::List,
            Self::Map => DatatypeFamily::Map,
            Self::Enum(_) => DatatypeFamily::Enum,
            Self::Reference(_) => DatatypeFamily::Reference,
        }
    }

    #[must_use]
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Text | Self::DateTime | Self::Date | Self::Time | Self::List | Self::Map
            | Self::Reference(_) => "TEXT",
            Self::Integer | Self::Boolean | Self::Duration => "INTEGER",
            Self::Float => "REAL",
            Self::Bytes => "BLOB",
            Self::Enum(def) => def.scalar_sql_type(),
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enum(def) => write!(f, "enum({})", def.name()),
            Self::Reference(kind) => write!(f, "reference({kind})"),
            other => write!(f, "{}", other.family()),
        }
    }
}

///
/// DatatypeFamily
///
/// Converter-registry key: every concrete datatype resolves to exactly one
/// family, which is how subtype-compatible fallback works (any enum uses
/// the enum converter, any reference the reference converter).
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DatatypeFamily {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    Time,
    Duration,
    Bytes,
    List,
    Map,
    Enum,
    Reference,
}

impl DatatypeFamily {
    pub const ALL: [Self; 13] = [
        Self::Text,
        Self::Integer,
        Self::Float,
        Self::Boolean,
        Self::DateTime,
        Self::Date,
        Self::Time,
        Self::Duration,
        Self::Bytes,
        Self::List,
        Self::Map,
        Self::Enum,
        Self::Reference,
    ];
}

impl fmt::Display for DatatypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Date => "date",
            Self::Time => "time",
            Self::Duration => "duration",
            Self::Bytes => "bytes",
            Self::List => "list",
            Self::Map => "map",
            Self::Enum => "enum",
            Self::Reference => "reference",
        };
        write!(f, "{label}")
    }
}
