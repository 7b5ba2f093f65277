use crate::{
    db::{Database, StoreError},
    entity::Entity,
    error::Error,
    key::Key,
    schema::COL_KIND,
    value::StorageValue,
};
use std::sync::Arc;

///
/// Row
///
/// One decoded result row: the rendered column list plus positional
/// values, with the key and parent column indexes recorded so a `Key` can
/// be rebuilt without a second query. Aggregate and raw queries surface
/// rows directly; entity queries decode them.
///

#[derive(Clone, Debug)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<StorageValue>,
    key_index: Option<usize>,
    parent_index: Option<usize>,
    full: bool,
}

impl Row {
    pub(crate) const fn new(
        columns: Arc<Vec<String>>,
        values: Vec<StorageValue>,
        key_index: Option<usize>,
        parent_index: Option<usize>,
        full: bool,
    ) -> Self {
        Self {
            columns,
            values,
            key_index,
            parent_index,
            full,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&StorageValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|index| &self.values[index])
    }

    #[must_use]
    pub fn at(&self, index: usize) -> Option<&StorageValue> {
        self.values.get(index)
    }

    /// Whether this row carries the full reconciled column set (as opposed
    /// to a keys-only or aggregate projection).
    #[must_use]
    pub(crate) const fn is_full(&self) -> bool {
        self.full
    }

    pub(crate) fn key_value(&self) -> Option<&StorageValue> {
        self.key_index.map(|index| &self.values[index])
    }

    pub(crate) fn parent_value(&self) -> Option<&StorageValue> {
        self.parent_index.map(|index| &self.values[index])
    }
}

/// Rebuild the entity a result row describes: kind label → sealed kind,
/// key/parent columns → `Key`, then either refresh the transaction-cached
/// instance or decode a fresh one.
pub(crate) fn decode_entity(db: &Database, row: &Row) -> Result<Entity, Error> {
    let kind_label = row
        .get(COL_KIND)
        .and_then(StorageValue::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| StoreError::UnknownProperty {
            kind: String::new(),
            name: COL_KIND.to_string(),
        })?;
    let kind = db.registry().seal(&kind_label)?;

    let name = match row.key_value() {
        Some(StorageValue::Text(s)) => s.clone(),
        Some(StorageValue::Integer(n)) => n.to_string(),
        _ => return Err(StoreError::Unkeyed(kind_label).into()),
    };
    let parent = match row.parent_value() {
        Some(StorageValue::Text(s)) => Some(Key::parse_raw(s)?),
        _ => None,
    };
    let key = Key::from_parts(kind.kind().to_string(), parent, name);

    if let Some(cached) = db.cache_get(&key) {
        if row.is_full() {
            cached.populate_from_row(row)?;
        }
        return Ok(cached);
    }

    let entity = Entity::from_persisted(db.registry().clone(), kind, &key);
    if row.is_full() {
        entity.populate_from_row(row)?;
    }
    db.cache_put(key, &entity);
    Ok(entity)
}
