use std::sync::Arc;
use taproot_core::{
    model::PropertyDef,
    types::{Datatype, EnumDef},
};

/// Anchored http(s) URL, or empty. Empty strings pass so the property can
/// stay optional without a separate required flag.
const LINK_PATTERN: &str =
    r"^(|https?://[\w\-]+(\.[\w\-]+)+([\w\-.,@?^=%&:/~+#]*[\w\-@?^=%&/~+#])?)$";

#[must_use]
pub fn text() -> PropertyDef {
    PropertyDef::new(Datatype::Text)
}

#[must_use]
pub fn integer() -> PropertyDef {
    PropertyDef::new(Datatype::Integer)
}

#[must_use]
pub fn float() -> PropertyDef {
    PropertyDef::new(Datatype::Float)
}

#[must_use]
pub fn boolean() -> PropertyDef {
    PropertyDef::new(Datatype::Boolean)
}

#[must_use]
pub fn datetime() -> PropertyDef {
    PropertyDef::new(Datatype::DateTime)
}

#[must_use]
pub fn date() -> PropertyDef {
    PropertyDef::new(Datatype::Date)
}

#[must_use]
pub fn time_of_day() -> PropertyDef {
    PropertyDef::new(Datatype::Time)
}

#[must_use]
pub fn duration() -> PropertyDef {
    PropertyDef::new(Datatype::Duration)
}

#[must_use]
pub fn bytes() -> PropertyDef {
    PropertyDef::new(Datatype::Bytes)
}

#[must_use]
pub fn list() -> PropertyDef {
    PropertyDef::new(Datatype::List)
}

#[must_use]
pub fn map() -> PropertyDef {
    PropertyDef::new(Datatype::Map)
}

#[must_use]
pub fn enumeration(def: Arc<EnumDef>) -> PropertyDef {
    PropertyDef::new(Datatype::Enum(def))
}

#[must_use]
pub fn reference(kind: &str) -> PropertyDef {
    PropertyDef::new(Datatype::Reference(kind.to_string()))
}

/// Text constrained to an http(s) URL.
#[must_use]
pub fn link() -> PropertyDef {
    text().pattern(LINK_PATTERN)
}

/// Private text; never exported over the wire by default.
#[must_use]
pub fn password() -> PropertyDef {
    text().private()
}
