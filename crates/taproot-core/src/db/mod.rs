mod row;

pub use row::Row;
pub(crate) use row::decode_entity;

use crate::{
    entity::Entity,
    error::Error,
    key::Key,
    model::{kind::SealedKind, registry::Registry},
    query::render::RenderedQuery,
    schema,
    value::StorageValue,
};
use rusqlite::Connection;
use serde::Deserialize;
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error as ThisError;

///
/// StoreError
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("object {kind}:{id} does not exist")]
    ObjectDoesNotExist { kind: String, id: String },

    #[error("key property '{property}' not set when storing kind '{kind}'")]
    KeyPropertyRequired { kind: String, property: String },

    #[error("'{name}' is not a property of kind '{kind}'")]
    UnknownProperty { kind: String, name: String },

    #[error("cannot assign to computed property '{0}' with no setter")]
    NoSetter(String),

    #[error("entity of kind '{0}' has no key yet")]
    Unkeyed(String),

    #[error("kind '{0}' is abstract and owns no table")]
    AbstractKind(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

///
/// DbConfig
///

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Database file; `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// Switch the journal to WAL on open.
    pub wal: bool,
    /// SQLite busy timeout, in milliseconds.
    pub busy_timeout_ms: Option<u64>,
}

///
/// Database
///
/// One SQLite connection plus the engine state scoped to it: transaction
/// depth, the per-transaction identity cache, the set of kinds whose
/// tables have been reconciled, and the user id stamped into audit
/// columns. Deliberately single-threaded; share a `Registry`, not a
/// `Database`.
///

pub struct Database {
    registry: Arc<Registry>,
    conn: RefCell<Connection>,
    depth: Cell<u32>,
    rollback_only: Cell<bool>,
    cache: RefCell<HashMap<Key, Entity>>,
    reconciled: RefCell<HashSet<String>>,
    user: RefCell<Option<String>>,
}

impl Database {
    pub fn open(registry: Arc<Registry>, config: &DbConfig) -> Result<Self, Error> {
        let conn = match &config.path {
            Some(path) => Connection::open(path).map_err(StoreError::Sqlite)?,
            None => Connection::open_in_memory().map_err(StoreError::Sqlite)?,
        };
        if config.wal {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StoreError::Sqlite)?;
        }
        if let Some(ms) = config.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))
                .map_err(StoreError::Sqlite)?;
        }

        Ok(Self {
            registry,
            conn: RefCell::new(conn),
            depth: Cell::new(0),
            rollback_only: Cell::new(false),
            cache: RefCell::new(HashMap::new()),
            reconciled: RefCell::new(HashSet::new()),
            user: RefCell::new(None),
        })
    }

    pub fn in_memory(registry: Arc<Registry>) -> Result<Self, Error> {
        Self::open(registry, &DbConfig::default())
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// User id recorded in `_createdby`/`_updatedby` on store.
    pub fn set_user(&self, user: Option<&str>) {
        *self.user.borrow_mut() = user.map(ToString::to_string);
    }

    #[must_use]
    pub fn user(&self) -> Option<String> {
        self.user.borrow().clone()
    }

    // ── Transactions ───────────────────────────────────

    /// Begin a transaction, or join the active one. Only the outermost
    /// guard commits or rolls back; a guard dropped without `commit`
    /// poisons the whole stack rollback-only.
    pub fn begin(&self) -> Result<Tx<'_>, Error> {
        if self.depth.get() == 0 {
            self.conn
                .borrow()
                .execute_batch("BEGIN")
                .map_err(StoreError::Sqlite)?;
            self.rollback_only.set(false);
        }
        self.depth.set(self.depth.get() + 1);
        Ok(Tx {
            db: self,
            done: false,
        })
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.depth.get() > 0
    }

    fn end_tx(&self, commit: bool) -> Result<(), Error> {
        debug_assert!(self.depth.get() > 0, "transaction underflow");
        if !commit {
            self.rollback_only.set(true);
        }
        self.depth.set(self.depth.get().saturating_sub(1));
        if self.depth.get() == 0 {
            // The identity cache lives exactly as long as the outermost
            // transaction, on both paths.
            self.cache.borrow_mut().clear();
            let sql = if self.rollback_only.get() {
                "ROLLBACK"
            } else {
                "COMMIT"
            };
            self.conn
                .borrow()
                .execute_batch(sql)
                .map_err(StoreError::Sqlite)?;
        }
        Ok(())
    }

    // ── Identity cache ─────────────────────────────────

    pub(crate) fn cache_get(&self, key: &Key) -> Option<Entity> {
        self.cache.borrow().get(key).cloned()
    }

    pub(crate) fn cache_put(&self, key: Key, entity: &Entity) {
        if self.depth.get() > 0 {
            self.cache.borrow_mut().insert(key, entity.clone());
        }
    }

    pub(crate) fn cache_remove(&self, key: &Key) {
        self.cache.borrow_mut().remove(key);
    }

    // ── Schema ─────────────────────────────────────────

    /// Reconcile the kind's table on first use of this database.
    pub(crate) fn ensure_reconciled(&self, kind: &SealedKind) -> Result<(), Error> {
        if kind.is_abstract() || self.reconciled.borrow().contains(kind.kind()) {
            return Ok(());
        }
        if let Some(table) = kind.table() {
            tracing::debug!(kind = %kind.kind(), table = %table.name, "reconciling table");
            schema::reconcile(&self.conn.borrow(), table).map_err(StoreError::Sqlite)?;
        }
        self.reconciled.borrow_mut().insert(kind.kind().to_string());
        Ok(())
    }

    // ── Execution ──────────────────────────────────────

    pub(crate) fn run_select(&self, rendered: &RenderedQuery) -> Result<Vec<Row>, Error> {
        tracing::debug!(sql = %rendered.sql, params = ?rendered.params, "select");
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(&rendered.sql).map_err(StoreError::Sqlite)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(rendered.params.iter()))
            .map_err(StoreError::Sqlite)?;

        let columns: Arc<Vec<String>> = Arc::new(rendered.columns.clone());
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(StoreError::Sqlite)? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let value: rusqlite::types::Value =
                    row.get(index).map_err(StoreError::Sqlite)?;
                values.push(StorageValue::from(value));
            }
            out.push(Row::new(
                columns.clone(),
                values,
                rendered.key_index,
                rendered.parent_index,
                rendered.full,
            ));
        }
        Ok(out)
    }

    pub(crate) fn run_write(&self, rendered: &RenderedQuery) -> Result<usize, Error> {
        tracing::debug!(sql = %rendered.sql, params = ?rendered.params, "write");
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(&rendered.sql).map_err(StoreError::Sqlite)?;
        let changed = stmt
            .execute(rusqlite::params_from_iter(rendered.params.iter()))
            .map_err(StoreError::Sqlite)?;
        Ok(changed)
    }

    // ── Entity lookups ─────────────────────────────────

    /// Fetch by key, consulting the identity cache first. Within one
    /// transaction, repeated fetches of the same key return the same
    /// instance.
    pub fn get(&self, key: &Key) -> Result<Option<Entity>, Error> {
        let tx = self.begin()?;
        if let Some(cached) = self.cache_get(key) {
            tx.commit()?;
            return Ok(Some(cached));
        }
        let mut query = crate::query::Query::new(key.kind());
        query.set_key(key.clone());
        let found = query.get(self)?;
        tx.commit()?;
        Ok(found)
    }

    /// Fetch by key, failing with `ObjectDoesNotExist` when absent.
    pub fn get_existing(&self, key: &Key) -> Result<Entity, Error> {
        self.get(key)?.ok_or_else(|| {
            StoreError::ObjectDoesNotExist {
                kind: key.kind().to_string(),
                id: key.to_string(),
            }
            .into()
        })
    }

    /// First entity of `kind` whose property equals `value`.
    pub fn by(
        &self,
        kind: &str,
        property: &str,
        value: impl Into<crate::value::Value>,
    ) -> Result<Option<Entity>, Error> {
        let mut query = crate::query::Query::new(kind);
        query.add_filter(property, crate::query::CompareOp::Eq, value);
        query.get(self)
    }
}

///
/// Tx
///
/// Scoped transaction guard returned by [`Database::begin`].
///

pub struct Tx<'db> {
    db: &'db Database,
    done: bool,
}

impl Tx<'_> {
    pub fn commit(mut self) -> Result<(), Error> {
        self.done = true;
        self.db.end_tx(true)
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if !self.done
            && let Err(err) = self.db.end_tx(false)
        {
            tracing::warn!(error = %err, "transaction rollback failed");
        }
    }
}
