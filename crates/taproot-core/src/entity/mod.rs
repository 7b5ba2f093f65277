#[cfg(test)]
mod tests;

use crate::{
    convert::Converter,
    db::{Database, Row, StoreError},
    error::Error,
    key::Key,
    model::{kind::SealedKind, property::PropertyDef, registry::Registry},
    query::{Query, render},
    schema::{
        COL_ACL, COL_CREATED, COL_CREATEDBY, COL_KEY_NAME, COL_OWNERID, COL_PARENT, COL_UPDATED,
        COL_UPDATEDBY,
    },
    types::Datatype,
    value::{DATETIME_FORMAT, DATETIME_PARSE, StorageValue, Value},
};
use chrono::{NaiveDateTime, Utc};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc, sync::Arc};

///
/// WireOptions
///

#[derive(Clone, Copy, Debug, Default)]
pub struct WireOptions {
    /// Include properties flagged private.
    pub include_private: bool,
}

///
/// AuditInfo
///

#[derive(Clone, Debug, Default)]
pub struct AuditInfo {
    pub created: Option<NaiveDateTime>,
    pub created_by: Option<String>,
    pub updated: Option<NaiveDateTime>,
    pub updated_by: Option<String>,
}

#[derive(Debug)]
struct EntityInner {
    key_name: Option<String>,
    parent: Option<Key>,
    /// `None` until the row is loaded; populated lazily on first stored
    /// read.
    values: Option<BTreeMap<String, Value>>,
    joined: BTreeMap<String, StorageValue>,
    acl: BTreeMap<String, String>,
    owner_id: Option<String>,
    audit: AuditInfo,
    brand_new: bool,
    exists: bool,
}

///
/// Entity
///
/// A live instance of a kind. Cheap to clone — clones share the same
/// underlying state, which is what makes the per-transaction identity
/// cache meaningful: every holder of "the same" entity sees mutations
/// before `put`.
///

#[derive(Clone)]
pub struct Entity {
    registry: Arc<Registry>,
    kind: Arc<SealedKind>,
    inner: Rc<RefCell<EntityInner>>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Entity")
            .field("kind", &self.kind.kind())
            .field("key_name", &inner.key_name)
            .field("brand_new", &inner.brand_new)
            .finish_non_exhaustive()
    }
}

impl Entity {
    /// Construct a brand-new, unsaved instance. Seals the kind; stored
    /// properties start at their declared defaults.
    pub fn new(
        registry: &Arc<Registry>,
        kind: &str,
        parent: Option<&Key>,
    ) -> Result<Self, Error> {
        let sealed = registry.seal(kind)?;
        if sealed.is_abstract() {
            return Err(StoreError::AbstractKind(sealed.kind().to_string()).into());
        }

        let mut values = BTreeMap::new();
        for prop in sealed.stored_properties() {
            values.insert(
                prop.name().to_string(),
                prop.default().cloned().unwrap_or(Value::Null),
            );
        }

        let parent = if sealed.is_flat() {
            None
        } else {
            parent.cloned()
        };

        Ok(Self {
            registry: registry.clone(),
            kind: sealed,
            inner: Rc::new(RefCell::new(EntityInner {
                key_name: None,
                parent,
                values: Some(values),
                joined: BTreeMap::new(),
                acl: BTreeMap::new(),
                owner_id: None,
                audit: AuditInfo::default(),
                brand_new: true,
                exists: false,
            })),
        })
    }

    /// Handle onto a persisted row that has not been loaded yet.
    pub(crate) fn from_persisted(
        registry: Arc<Registry>,
        kind: Arc<SealedKind>,
        key: &Key,
    ) -> Self {
        Self {
            registry,
            kind,
            inner: Rc::new(RefCell::new(EntityInner {
                key_name: Some(key.name().to_string()),
                parent: key.scope().cloned(),
                values: None,
                joined: BTreeMap::new(),
                acl: BTreeMap::new(),
                owner_id: None,
                audit: AuditInfo::default(),
                brand_new: false,
                exists: true,
            })),
        }
    }

    /// Instance identity: do two handles share the same live state?
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    #[must_use]
    pub const fn kind(&self) -> &Arc<SealedKind> {
        &self.kind
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.inner.borrow().brand_new
    }

    #[must_use]
    pub fn key_name(&self) -> Option<String> {
        self.inner.borrow().key_name.clone()
    }

    #[must_use]
    pub fn parent_key(&self) -> Option<Key> {
        self.inner.borrow().parent.clone()
    }

    /// The entity's key. Brand-new entities have no key until one is
    /// assigned or the first `put` generates one.
    pub fn key(&self) -> Result<Key, Error> {
        let inner = self.inner.borrow();
        let name = inner
            .key_name
            .clone()
            .ok_or_else(|| StoreError::Unkeyed(self.kind.kind().to_string()))?;
        Ok(Key::from_parts(
            self.kind.kind().to_string(),
            inner.parent.clone(),
            name,
        ))
    }

    fn converter_for(&self, prop: &PropertyDef) -> Arc<dyn Converter> {
        prop.converter
            .clone()
            .unwrap_or_else(|| self.registry.converters().get(&prop.datatype))
    }

    // ── Reads ──────────────────────────────────────────

    /// Read a property. Computed getters run against the live entity;
    /// stored reads trigger a full row load on first access.
    pub fn get(&self, db: &Database, name: &str) -> Result<Value, Error> {
        let prop = self
            .kind
            .property(name)
            .ok_or_else(|| StoreError::UnknownProperty {
                kind: self.kind.kind().to_string(),
                name: name.to_string(),
            })?
            .clone();

        if let Some(computed) = &prop.computed {
            return computed.get(self, db);
        }
        if prop.is_compound() {
            let mut parts = Vec::with_capacity(prop.parts().len());
            for part in prop.parts() {
                parts.push(self.get(db, part.name())?);
            }
            return Ok(Value::List(parts));
        }

        self.load(db)?;
        let inner = self.inner.borrow();
        Ok(inner
            .values
            .as_ref()
            .and_then(|values| values.get(name))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Joined column carried along by the last query that produced this
    /// instance, addressed as `alias.column`.
    #[must_use]
    pub fn joined_value(&self, name: &str) -> Option<StorageValue> {
        self.inner.borrow().joined.get(name).cloned()
    }

    // ── Writes ─────────────────────────────────────────

    /// Assign a property: converter first, then the validator chain,
    /// all-or-nothing. Assigning the key property updates the pending key
    /// name; computed setters delegate entirely.
    pub fn set(&self, db: &Database, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();
        let prop = self
            .kind
            .property(name)
            .ok_or_else(|| StoreError::UnknownProperty {
                kind: self.kind.kind().to_string(),
                name: name.to_string(),
            })?
            .clone();

        if let Some(computed) = &prop.computed {
            if !computed.has_setter() {
                return Err(StoreError::NoSetter(name.to_string()).into());
            }
            return computed.set(self, db, value);
        }

        if prop.is_compound() {
            let Value::List(items) = value else {
                return Err(crate::convert::ConversionError::Incompatible {
                    expected: "compound value list",
                    found: value.type_label(),
                    value: value.to_string(),
                }
                .into());
            };
            // Convert and validate every part before writing any of them.
            let mut converted = Vec::with_capacity(prop.parts().len());
            for (part, item) in prop.parts().iter().zip(items) {
                let item = if item.is_null() {
                    Value::Null
                } else {
                    self.converter_for(part).convert(&part.datatype, item)?
                };
                part.validate(&item)?;
                converted.push((part.name().to_string(), item));
            }
            self.load(db)?;
            let mut inner = self.inner.borrow_mut();
            if let Some(values) = inner.values.as_mut() {
                for (part_name, item) in converted {
                    values.insert(part_name, item);
                }
            }
            return Ok(());
        }

        let converted = if value.is_null() {
            Value::Null
        } else {
            self.converter_for(&prop).convert(&prop.datatype, value)?
        };
        prop.validate(&converted)?;

        self.load(db)?;
        let mut inner = self.inner.borrow_mut();
        if prop.is_key {
            inner.key_name = match &converted {
                Value::Null => None,
                other => Some(other.to_text()),
            };
        }
        if let Some(values) = inner.values.as_mut() {
            values.insert(prop.name.clone(), converted);
        }
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────

    /// Load the backing row if this is a persisted entity whose values
    /// have not been fetched yet.
    pub fn load(&self, db: &Database) -> Result<(), Error> {
        {
            let inner = self.inner.borrow();
            if inner.values.is_some() || inner.key_name.is_none() {
                return Ok(());
            }
        }
        let key = self.key()?;
        db.ensure_reconciled(&self.kind)?;

        let mut query = Query::new(self.kind.kind());
        query.set_key(key);
        let plan = render::render(
            &self.registry,
            &query,
            self.kind.kind(),
            crate::query::QueryMode::Columns,
            false,
        )?;
        let rows = db.run_select(&plan)?;
        match rows.first() {
            Some(row) => self.populate_from_row(row)?,
            None => {
                let mut inner = self.inner.borrow_mut();
                inner.exists = false;
                inner.values = Some(BTreeMap::new());
            }
        }
        Ok(())
    }

    /// Refresh state from a full result row.
    pub(crate) fn populate_from_row(&self, row: &Row) -> Result<(), Error> {
        let mut values = BTreeMap::new();
        for prop in self.kind.stored_properties() {
            let stored = row.get(&prop.column).cloned().unwrap_or(StorageValue::Null);
            let value = if stored.is_null() {
                Value::Null
            } else {
                self.converter_for(prop).from_storage(&prop.datatype, stored)?
            };
            values.insert(prop.name.clone(), value);
        }

        let key_name = match row.get(COL_KEY_NAME).and_then(StorageValue::as_str) {
            Some(name) => Some(name.to_string()),
            None => self.kind.key_property().and_then(|key_prop| {
                values
                    .get(key_prop)
                    .filter(|value| !value.is_null())
                    .map(Value::to_text)
            }),
        };

        let mut inner = self.inner.borrow_mut();
        inner.values = Some(values);

        if let Some(StorageValue::Text(parent)) = row.get(COL_PARENT) {
            inner.parent = Key::parse_raw(parent).ok();
        }
        if key_name.is_some() {
            inner.key_name = key_name;
        }

        inner.acl = row
            .get(COL_ACL)
            .and_then(StorageValue::as_str)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        inner.owner_id = row
            .get(COL_OWNERID)
            .and_then(StorageValue::as_str)
            .map(ToString::to_string);
        inner.audit = AuditInfo {
            created: parse_audit_time(row.get(COL_CREATED)),
            created_by: audit_text(row.get(COL_CREATEDBY)),
            updated: parse_audit_time(row.get(COL_UPDATED)),
            updated_by: audit_text(row.get(COL_UPDATEDBY)),
        };

        inner.joined = row
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(index, column)| {
                column.strip_prefix('+').and_then(|name| {
                    row.at(index).map(|value| (name.to_string(), value.clone()))
                })
            })
            .collect();

        inner.brand_new = false;
        inner.exists = true;
        Ok(())
    }

    /// Store the entity: INSERT on first put (assigning a key name),
    /// UPDATE afterwards. Audit metadata is injected here.
    pub fn put(&self, db: &Database) -> Result<(), Error> {
        let tx = db.begin()?;
        let insert = self.is_new();
        if !insert {
            self.load(db)?;
        }

        self.resolve_key_name(insert)?;
        self.apply_auto_now(insert)?;
        self.validate_all()?;

        let now = Utc::now().naive_utc();
        let user = db.user();
        let values = self.column_values(insert, now, user.as_deref())?;

        db.ensure_reconciled(&self.kind)?;
        let key = self.key()?;
        let plan = if insert {
            render::render_insert(&self.kind, &values).map_err(Error::from)?
        } else {
            render::render_update(&self.kind, &key, &values).map_err(Error::from)?
        };
        db.run_write(&plan)?;

        {
            let mut inner = self.inner.borrow_mut();
            if self.kind.is_audited() {
                if insert {
                    inner.audit.created = Some(now);
                    inner.audit.created_by.clone_from(&user);
                    if inner.owner_id.is_none() {
                        inner.owner_id.clone_from(&user);
                    }
                }
                inner.audit.updated = Some(now);
                inner.audit.updated_by = user;
            }
            inner.brand_new = false;
            inner.exists = true;
        }
        tracing::debug!(kind = %self.kind.kind(), key = %key, insert, "stored entity");
        db.cache_put(key, self);
        tx.commit()
    }

    /// Delete the backing row. The kind's delete hook (when declared) may
    /// veto the delete or cascade to dependents first.
    pub fn delete(&self, db: &Database) -> Result<usize, Error> {
        if self.is_new() {
            return Ok(0);
        }
        let tx = db.begin()?;
        if let Some(hook) = self.kind.on_delete.clone() {
            if !hook.on_delete(self, db)? {
                tracing::debug!(kind = %self.kind.kind(), "delete vetoed by hook");
                tx.commit()?;
                return Ok(0);
            }
        }
        let key = self.key()?;
        db.ensure_reconciled(&self.kind)?;
        let plan = render::render_delete_by_key(&self.kind, &key).map_err(Error::from)?;
        let deleted = db.run_write(&plan)?;
        db.cache_remove(&key);
        self.inner.borrow_mut().exists = false;
        tracing::debug!(kind = %self.kind.kind(), key = %key, deleted, "deleted entity");
        tx.commit()?;
        Ok(deleted)
    }

    pub fn exists(&self, db: &Database) -> Result<bool, Error> {
        if self.is_new() {
            return Ok(true);
        }
        self.load(db)?;
        Ok(self.inner.borrow().exists)
    }

    fn resolve_key_name(&self, insert: bool) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if let Some(key_prop) = self.kind.key_property() {
            let value = inner
                .values
                .as_ref()
                .and_then(|values| values.get(key_prop))
                .cloned()
                .unwrap_or(Value::Null);
            if value.is_null() {
                return Err(StoreError::KeyPropertyRequired {
                    kind: self.kind.kind().to_string(),
                    property: key_prop.clone(),
                }
                .into());
            }
            inner.key_name = Some(value.to_text());
        } else if insert && inner.key_name.is_none() {
            inner.key_name = Some(uuid::Uuid::new_v4().simple().to_string());
        }
        Ok(())
    }

    /// Maintain `auto_now` / `auto_now_add` temporal properties.
    fn apply_auto_now(&self, insert: bool) -> Result<(), Error> {
        let now = Utc::now().naive_utc();
        let mut pending: Vec<(String, Value)> = Vec::new();
        {
            let inner = self.inner.borrow();
            let values = inner.values.as_ref();
            for prop in self.kind.stored_properties() {
                let stamp = prop.auto_now || (insert && prop.auto_now_add);
                if !stamp {
                    continue;
                }
                let current = values.and_then(|v| v.get(prop.name())).cloned();
                if prop.auto_now_add && !prop.auto_now && current.is_some_and(|v| !v.is_null()) {
                    continue;
                }
                let value = match &prop.datatype {
                    Datatype::Date => Value::Date(now.date()),
                    Datatype::Time => Value::Time(now.time()),
                    _ => Value::DateTime(now),
                };
                pending.push((prop.name().to_string(), value));
            }
        }
        let mut inner = self.inner.borrow_mut();
        if let Some(values) = inner.values.as_mut() {
            for (name, value) in pending {
                values.insert(name, value);
            }
        }
        Ok(())
    }

    fn validate_all(&self) -> Result<(), Error> {
        let inner = self.inner.borrow();
        let values = inner.values.as_ref();
        for prop in self.kind.stored_properties() {
            let value = values
                .and_then(|v| v.get(prop.name()))
                .cloned()
                .unwrap_or(Value::Null);
            prop.validate(&value)?;
        }
        Ok(())
    }

    /// Column/value pairs for the write statement, converters applied.
    fn column_values(
        &self,
        insert: bool,
        now: NaiveDateTime,
        user: Option<&str>,
    ) -> Result<Vec<(String, StorageValue)>, Error> {
        let inner = self.inner.borrow();
        let empty = BTreeMap::new();
        let values = inner.values.as_ref().unwrap_or(&empty);
        let mut columns: Vec<(String, StorageValue)> = Vec::new();

        for prop in self.kind.stored_properties() {
            let value = values.get(prop.name()).cloned().unwrap_or(Value::Null);
            let stored = if value.is_null() {
                StorageValue::Null
            } else {
                self.converter_for(prop).to_storage(&prop.datatype, &value)?
            };
            columns.push((prop.column.clone(), stored));
        }

        if self.kind.key_property().is_none() {
            let name = inner
                .key_name
                .clone()
                .ok_or_else(|| StoreError::Unkeyed(self.kind.kind().to_string()))?;
            columns.push((COL_KEY_NAME.to_string(), StorageValue::Text(name)));
        }
        if !self.kind.is_flat() {
            let parent = inner
                .parent
                .as_ref()
                .map_or(StorageValue::Null, |p| StorageValue::Text(p.to_string()));
            columns.push((COL_PARENT.to_string(), parent));
        }

        let acl = serde_json::to_string(&inner.acl).unwrap_or_else(|_| "{}".to_string());
        columns.push((COL_ACL.to_string(), StorageValue::Text(acl)));

        if self.kind.is_audited() {
            let stamp = StorageValue::Text(now.format(DATETIME_FORMAT).to_string());
            let by = user.map_or(StorageValue::Null, |u| StorageValue::Text(u.to_string()));
            if insert {
                columns.push((COL_CREATED.to_string(), stamp.clone()));
                columns.push((COL_CREATEDBY.to_string(), by.clone()));
            }
            columns.push((COL_UPDATED.to_string(), stamp));
            columns.push((COL_UPDATEDBY.to_string(), by.clone()));
            let owner = match &inner.owner_id {
                Some(owner) => StorageValue::Text(owner.clone()),
                None if insert => by,
                None => StorageValue::Null,
            };
            columns.push((COL_OWNERID.to_string(), owner));
        }

        Ok(columns)
    }

    // ── Hierarchy ──────────────────────────────────────

    /// Query for direct children of this entity, of the given kind.
    pub fn children(&self, kind: &str) -> Result<Query, Error> {
        let mut query = Query::new(kind);
        query.set_parent(Some(self.key()?));
        Ok(query)
    }

    /// Query for all transitive descendants of this entity.
    pub fn descendants(&self, kind: &str) -> Result<Query, Error> {
        let mut query = Query::new(kind);
        query.set_ancestor(self.key()?);
        Ok(query)
    }

    // ── ACL / ownership / audit ────────────────────────

    #[must_use]
    pub fn permission(&self, role: &str) -> Option<String> {
        self.inner.borrow().acl.get(role).cloned()
    }

    pub fn set_permission(&self, role: &str, perms: &str) {
        self.inner
            .borrow_mut()
            .acl
            .insert(role.to_string(), perms.to_string());
    }

    #[must_use]
    pub fn acl(&self) -> BTreeMap<String, String> {
        self.inner.borrow().acl.clone()
    }

    #[must_use]
    pub fn owner_id(&self) -> Option<String> {
        self.inner.borrow().owner_id.clone()
    }

    pub fn set_owner_id(&self, owner: Option<&str>) {
        self.inner.borrow_mut().owner_id = owner.map(ToString::to_string);
    }

    #[must_use]
    pub fn audit(&self) -> AuditInfo {
        self.inner.borrow().audit.clone()
    }

    /// The label property's value as display text, falling back to the
    /// key name.
    pub fn label(&self, db: &Database) -> Result<String, Error> {
        if let Some(label_prop) = self.kind.label_property() {
            let value = self.get(db, &label_prop.clone())?;
            if !value.is_null() {
                return Ok(value.to_text());
            }
        }
        Ok(self.key_name().unwrap_or_default())
    }

    // ── Wire serialization ─────────────────────────────

    /// JSON-style export: key, parent, and property values through their
    /// converters' wire mappings. Computed properties are included;
    /// private ones only on request; compound wrappers are skipped.
    pub fn to_wire(&self, db: &Database, options: WireOptions) -> Result<serde_json::Value, Error> {
        self.load(db)?;
        let mut map = serde_json::Map::new();
        map.insert(
            "key".to_string(),
            self.key()
                .map_or(serde_json::Value::Null, |k| serde_json::Value::String(k.id())),
        );
        map.insert(
            "parent".to_string(),
            self.parent_key()
                .map_or(serde_json::Value::Null, |p| serde_json::Value::String(p.id())),
        );

        for prop in self.kind.properties() {
            if (prop.is_private() && !options.include_private) || prop.is_compound() {
                continue;
            }
            let value = self.get(db, prop.name())?;
            let wire = if value.is_null() {
                serde_json::Value::Null
            } else {
                self.converter_for(prop).to_wire(prop.datatype(), &value)?
            };
            map.insert(prop.name().to_string(), wire);
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Apply a JSON-style import map to non-private, non-readonly
    /// properties, then store.
    pub fn update_from_wire(
        &self,
        db: &Database,
        descriptor: &serde_json::Value,
    ) -> Result<(), Error> {
        let Some(object) = descriptor.as_object() else {
            return Ok(());
        };
        for prop in self.kind.properties() {
            if prop.is_private() || prop.is_readonly() || prop.is_compound() {
                continue;
            }
            let Some(wire) = object.get(prop.name()) else {
                continue;
            };
            let value = if wire.is_null() {
                Value::Null
            } else {
                self.converter_for(prop)
                    .from_wire(prop.datatype(), wire.clone())?
            };
            self.set(db, prop.name(), value)?;
        }
        self.put(db)
    }

    /// Build, populate, and store a new entity from an import map.
    pub fn create_from_wire(
        db: &Database,
        kind: &str,
        parent: Option<&Key>,
        descriptor: &serde_json::Value,
    ) -> Result<Self, Error> {
        let entity = Self::new(db.registry(), kind, parent)?;
        entity.update_from_wire(db, descriptor)?;
        Ok(entity)
    }
}

fn parse_audit_time(value: Option<&StorageValue>) -> Option<NaiveDateTime> {
    value
        .and_then(StorageValue::as_str)
        .and_then(|s| NaiveDateTime::parse_from_str(s, DATETIME_PARSE).ok())
}

fn audit_text(value: Option<&StorageValue>) -> Option<String> {
    value.and_then(StorageValue::as_str).map(ToString::to_string)
}
