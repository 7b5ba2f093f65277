use crate::base::{bytes, text};
use sha2::{Digest, Sha256};
use taproot_core::{model::PropertyDef, value::Value};

/// One logical image backed by three columns: the blob, its content type,
/// and a content hash for change detection.
#[must_use]
pub fn image() -> PropertyDef {
    PropertyDef::compound(vec![
        bytes().suffix("_blob"),
        text().suffix("_ct"),
        text().suffix("_hash"),
    ])
}

/// Assemble the compound value for an [`image`] property, computing the
/// content hash.
#[must_use]
pub fn image_value(content: &[u8], content_type: &str) -> Value {
    let digest = Sha256::digest(content);
    let mut hash = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hash.push_str(&format!("{byte:02x}"));
    }
    Value::List(vec![
        Value::Bytes(content.to_vec()),
        Value::Text(content_type.to_string()),
        Value::Text(hash),
    ])
}
