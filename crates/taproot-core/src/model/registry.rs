use crate::{
    convert::ConverterRegistry,
    error::Error,
    model::{
        kind::{KindBuilder, KindDef, SealedKind},
        property::PropertyDef,
    },
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use thiserror::Error as ThisError;

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("kind '{0}' already registered")]
    DuplicateKind(String),

    #[error("unknown kind '{0}'")]
    UnknownKind(String),

    #[error("ambiguous kind '{name}': matches '{first}' and '{second}'")]
    AmbiguousKind {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid kind name '{0}'")]
    InvalidKindName(String),

    #[error("sealing cycle detected at kind '{0}'")]
    SealingCycle(String),
}

///
/// Registry
///
/// Maps kind names to definitions and memoizes sealed kinds. One registry
/// value is constructed at process start, populated, and then shared by
/// reference; after registration completes it is safe for concurrent
/// readers.
///

#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Inner>,
    converters: ConverterRegistry,
}

#[derive(Debug, Default)]
struct Inner {
    kinds: BTreeMap<String, Arc<KindDef>>,
    sealed: BTreeMap<String, Arc<SealedKind>>,
    sealing: BTreeSet<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_converters(ConverterRegistry::builtin())
    }

    #[must_use]
    pub fn with_converters(converters: ConverterRegistry) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            converters,
        }
    }

    #[must_use]
    pub const fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a kind definition under its dotted name.
    pub fn register(&self, builder: KindBuilder) -> Result<(), RegistryError> {
        let def = builder.into_def();
        let name = def.kind.clone();
        if name.is_empty() || name.contains([':', '/']) || name.contains(char::is_whitespace) {
            return Err(RegistryError::InvalidKindName(name));
        }

        let mut inner = self.write();
        if inner.kinds.contains_key(&name) {
            return Err(RegistryError::DuplicateKind(name));
        }
        tracing::debug!(kind = %name, "registering kind");
        inner.kinds.insert(name, Arc::new(def));
        Ok(())
    }

    /// Resolve a kind name to its canonical registered form. Exact match
    /// first; a name without a `.` separator also matches as a unique
    /// suffix across all registered kinds.
    pub fn resolve_name(&self, name: &str) -> Result<String, RegistryError> {
        let lookup = name.to_ascii_lowercase().replace('/', ".");
        let inner = self.read();

        if inner.kinds.contains_key(&lookup) {
            return Ok(lookup);
        }
        if !lookup.contains('.') {
            let suffix = format!(".{lookup}");
            let mut matched: Option<&String> = None;
            for kind in inner.kinds.keys() {
                if kind.ends_with(&suffix) {
                    if let Some(first) = matched {
                        return Err(RegistryError::AmbiguousKind {
                            name: lookup,
                            first: first.clone(),
                            second: kind.clone(),
                        });
                    }
                    matched = Some(kind);
                }
            }
            if let Some(kind) = matched {
                return Ok(kind.clone());
            }
        }
        Err(RegistryError::UnknownKind(lookup))
    }

    pub fn kind_def(&self, name: &str) -> Result<Arc<KindDef>, RegistryError> {
        let canonical = self.resolve_name(name)?;
        self.read()
            .kinds
            .get(&canonical)
            .cloned()
            .ok_or(RegistryError::UnknownKind(canonical))
    }

    /// All transitive subclasses of `name`, abstract ones included.
    pub fn subclasses_of(&self, name: &str) -> Result<Vec<String>, RegistryError> {
        let root = self.resolve_name(name)?;
        let inner = self.read();
        let mut subclasses = Vec::new();
        for (kind, def) in &inner.kinds {
            if *kind == root {
                continue;
            }
            let mut seen = BTreeSet::new();
            let mut parent = def.parent.clone();
            while let Some(p) = parent {
                if p == root {
                    subclasses.push(kind.clone());
                    break;
                }
                if !seen.insert(p.clone()) {
                    break;
                }
                parent = inner.kinds.get(&p).and_then(|d| d.parent.clone());
            }
        }
        Ok(subclasses)
    }

    /// Registered kind names, in sorted order.
    #[must_use]
    pub fn kind_names(&self) -> Vec<String> {
        self.read().kinds.keys().cloned().collect()
    }

    /// Seal a kind: merge inherited properties, assign names and sequence
    /// numbers, resolve the key/label properties, and derive the table
    /// layout. Idempotent; concurrent or re-entrant sealing of the same
    /// kind is guarded.
    pub fn seal(&self, name: &str) -> Result<Arc<SealedKind>, Error> {
        let canonical = self.resolve_name(name)?;

        if let Some(sealed) = self.read().sealed.get(&canonical) {
            return Ok(sealed.clone());
        }

        let def = self
            .read()
            .kinds
            .get(&canonical)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownKind(canonical.clone()))?;
        {
            let mut inner = self.write();
            if let Some(sealed) = inner.sealed.get(&canonical) {
                return Ok(sealed.clone());
            }
            if !inner.sealing.insert(canonical.clone()) {
                return Err(RegistryError::SealingCycle(canonical).into());
            }
        }

        let result = self.seal_def(&canonical, &def);

        let mut inner = self.write();
        inner.sealing.remove(&canonical);
        if let Ok(sealed) = &result {
            inner.sealed.insert(canonical, sealed.clone());
        }
        result
    }

    /// Seal every registered kind eagerly, surfacing schema mistakes at
    /// startup instead of on first use.
    pub fn seal_all(&self) -> Result<(), Error> {
        for name in self.kind_names() {
            self.seal(&name)?;
        }
        Ok(())
    }

    fn seal_def(&self, canonical: &str, def: &KindDef) -> Result<Arc<SealedKind>, Error> {
        tracing::debug!(kind = %canonical, "sealing kind");

        let mut merged: Vec<PropertyDef> = Vec::new();
        let mut seq: u32 = 0;

        // Inherited properties are cloned, never aliased; overriding a
        // validator in a subclass cannot touch the parent's descriptor.
        if let Some(parent_name) = &def.parent {
            let parent = self.seal(parent_name)?;
            for prop in parent.properties.iter().filter(|p| !p.is_transient()) {
                let mut inherited = prop.clone();
                let name = inherited.name.clone();
                inherited.attach(&name, &mut seq);
                merged.push(inherited);
            }
        }

        for (name, propdef) in &def.properties {
            let mut prop = propdef.clone();
            prop.attach(name, &mut seq);
            // A redeclared name replaces the inherited descriptor in place.
            if let Some(slot) = merged.iter_mut().find(|p| p.name == prop.name) {
                prop.seq = slot.seq;
                *slot = prop;
            } else {
                merged.push(prop);
            }
        }

        let key_property = merged
            .iter()
            .filter(|p| p.is_key && !p.is_transient() && !p.is_compound())
            .next_back();
        let label_property = merged
            .iter()
            .filter(|p| p.is_label && !p.is_transient())
            .next_back()
            .map(|p| p.name.clone());
        let key_column = key_property
            .map_or(crate::schema::COL_KEY_NAME, |p| p.column.as_str())
            .to_string();
        let key_property_name = key_property.map(|p| p.name.clone());

        let table = if def.is_abstract {
            None
        } else {
            Some(SealedKind::build_table(
                def,
                &merged,
                key_property,
                &self.converters,
            )?)
        };

        Ok(Arc::new(SealedKind {
            kind: canonical.to_string(),
            verbose: def.verbose.clone(),
            parent: def.parent.clone(),
            flat: def.flat,
            audited: def.audited,
            is_abstract: def.is_abstract,
            properties: merged,
            key_property: key_property_name,
            label_property,
            key_column,
            table,
            on_delete: def.on_delete.clone(),
        }))
    }
}
