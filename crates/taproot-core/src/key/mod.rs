#[cfg(test)]
mod tests;

use crate::model::registry::{Registry, RegistryError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use std::fmt;
use thiserror::Error as ThisError;

///
/// Key
///
/// Hierarchical entity identifier: a kind, an optional parent scope, and a
/// local name, collapsed into one opaque, comparable, parseable token.
///
/// The canonical string form is a `/`-joined path of `kind:escaped-name`
/// segments, root first. Name components are URL-escaped, so neither `/`
/// nor `:` can occur inside a segment; this is what makes ancestor
/// matching on the encoded parent path delimiter-safe.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Key {
    kind: String,
    scope: Option<Box<Key>>,
    name: String,
    canonical: String,
}

///
/// KeyError
///

#[derive(Debug, ThisError)]
pub enum KeyError {
    #[error("key name must not be empty")]
    EmptyName,

    #[error("malformed key '{0}'")]
    Malformed(String),

    #[error(transparent)]
    Kind(#[from] RegistryError),
}

impl Key {
    /// Construct a key, resolving `kind` through the registry (suffix
    /// names are accepted). The canonical form is computed eagerly.
    pub fn new(
        registry: &Registry,
        kind: &str,
        scope: Option<Key>,
        name: &str,
    ) -> Result<Self, KeyError> {
        if name.is_empty() {
            return Err(KeyError::EmptyName);
        }
        let kind = registry.resolve_name(kind)?;
        Ok(Self::from_parts(kind, scope, name.to_string()))
    }

    /// Assemble a key from trusted parts: `kind` must already be a
    /// canonical registry name. Used by parsers and row decoding.
    #[must_use]
    pub(crate) fn from_parts(kind: String, scope: Option<Key>, name: String) -> Self {
        let mut canonical = match &scope {
            Some(parent) => format!("{}/", parent.canonical),
            None => String::new(),
        };
        canonical.push_str(&kind);
        canonical.push(':');
        canonical.push_str(&urlencoding::encode(&name));

        Self {
            kind,
            scope: scope.map(Box::new),
            name,
            canonical,
        }
    }

    /// Parse the canonical form or the base64 id form, resolving each
    /// segment's kind through the registry.
    pub fn parse(registry: &Registry, input: &str) -> Result<Self, KeyError> {
        let raw = Self::parse_raw(input)?;
        raw.canonicalized(registry)
    }

    /// Structural parse without registry resolution; kind segments are
    /// taken verbatim. Reserved for values that already carry canonical
    /// kind names (stored parent paths, reference columns).
    pub(crate) fn parse_raw(input: &str) -> Result<Self, KeyError> {
        // The id form is base64 over the canonical form; fall back to
        // treating the input as canonical when it does not decode.
        let decoded = URL_SAFE
            .decode(input)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        let raw = decoded.as_deref().unwrap_or(input);

        let mut key: Option<Self> = None;
        for segment in raw.split('/') {
            let (kind, escaped_name) = segment
                .split_once(':')
                .ok_or_else(|| KeyError::Malformed(input.to_string()))?;
            if kind.is_empty() || escaped_name.is_empty() {
                return Err(KeyError::Malformed(input.to_string()));
            }
            let name = urlencoding::decode(escaped_name)
                .map_err(|_| KeyError::Malformed(input.to_string()))?;
            key = Some(Self::from_parts(
                kind.to_string(),
                key.take(),
                name.into_owned(),
            ));
        }
        key.ok_or_else(|| KeyError::Malformed(input.to_string()))
    }

    /// Rebuild this key with every kind segment resolved to its canonical
    /// registry name.
    pub(crate) fn canonicalized(&self, registry: &Registry) -> Result<Self, KeyError> {
        let scope = match &self.scope {
            Some(parent) => Some(parent.canonicalized(registry)?),
            None => None,
        };
        let kind = registry.resolve_name(&self.kind)?;
        Ok(Self::from_parts(kind, scope, self.name.clone()))
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The final component of a dotted kind name.
    #[must_use]
    pub fn basekind(&self) -> &str {
        self.kind.rsplit('.').next().unwrap_or(&self.kind)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn scope(&self) -> Option<&Self> {
        self.scope.as_deref()
    }

    /// The scope chain, root first.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        let mut chain = Vec::new();
        let mut current = self.scope();
        while let Some(key) = current {
            chain.insert(0, key.clone());
            current = key.scope();
        }
        chain
    }

    /// The topmost ancestor, or the key itself when unscoped.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut root = self;
        while let Some(parent) = root.scope() {
            root = parent;
        }
        root
    }

    /// Opaque id: URL-safe base64 over the canonical form.
    #[must_use]
    pub fn id(&self) -> String {
        URL_SAFE.encode(self.canonical.as_bytes())
    }

    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical)
    }
}
