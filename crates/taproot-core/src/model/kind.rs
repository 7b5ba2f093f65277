use crate::{
    db::Database,
    entity::Entity,
    error::Error,
    model::property::PropertyDef,
    schema::{
        AUDIT_COLUMNS, COL_ACL, COL_KEY_NAME, COL_PARENT, ColumnDef, TableDef,
    },
};
use std::{fmt::Debug, sync::Arc};

///
/// DeleteHook
///
/// Kind-level delete interceptor. Returning `false` vetoes the delete;
/// cascading deletes of children or dependents happen inside the hook,
/// under the ambient transaction.
///

pub trait DeleteHook: Debug + Send + Sync {
    fn on_delete(&self, instance: &Entity, db: &Database) -> Result<bool, Error>;
}

///
/// KindDef
///
/// Declarative definition of one entity kind, assembled once at process
/// start through [`KindBuilder`] and registered with the registry.
/// Everything derived (merged properties, key property, table layout) is
/// computed at seal time into a [`SealedKind`].
///

#[derive(Clone, Debug)]
pub struct KindDef {
    pub(crate) kind: String,
    pub(crate) table: String,
    pub(crate) verbose: String,
    pub(crate) parent: Option<String>,
    pub(crate) flat: bool,
    pub(crate) audited: bool,
    pub(crate) is_abstract: bool,
    pub(crate) properties: Vec<(String, PropertyDef)>,
    pub(crate) on_delete: Option<Arc<dyn DeleteHook>>,
}

impl KindDef {
    /// Start a kind definition. `name` is the full dotted kind name
    /// (`"ledger.account"`); case is folded at registration.
    #[must_use]
    pub fn build(name: &str) -> KindBuilder {
        let name = name.to_ascii_lowercase();
        let base = name.rsplit('.').next().unwrap_or(&name).to_string();
        KindBuilder {
            def: Self {
                kind: name,
                table: base.clone(),
                verbose: base,
                parent: None,
                flat: false,
                audited: true,
                is_abstract: false,
                properties: Vec::new(),
                on_delete: None,
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub const fn parent_kind(&self) -> Option<&String> {
        self.parent.as_ref()
    }
}

///
/// KindBuilder
///

#[derive(Debug)]
pub struct KindBuilder {
    def: KindDef,
}

impl KindBuilder {
    #[must_use]
    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.def.table = table.into();
        self
    }

    #[must_use]
    pub fn verbose_name(mut self, verbose: impl Into<String>) -> Self {
        self.def.verbose = verbose.into();
        self
    }

    /// No `_parent` column; the kind cannot take part in parent or
    /// ancestor scoping.
    #[must_use]
    pub const fn flat(mut self) -> Self {
        self.def.flat = true;
        self
    }

    /// Contributes properties to subclasses but owns no table.
    #[must_use]
    pub const fn abstract_kind(mut self) -> Self {
        self.def.is_abstract = true;
        self
    }

    #[must_use]
    pub const fn unaudited(mut self) -> Self {
        self.def.audited = false;
        self
    }

    /// Inherit every stored property of `parent` (cloned at seal time,
    /// never aliased).
    #[must_use]
    pub fn extends(mut self, parent: &str) -> Self {
        self.def.parent = Some(parent.to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn property(mut self, name: &str, def: PropertyDef) -> Self {
        self.def.properties.push((name.to_string(), def));
        self
    }

    #[must_use]
    pub fn on_delete(mut self, hook: Arc<dyn DeleteHook>) -> Self {
        self.def.on_delete = Some(hook);
        self
    }

    #[must_use]
    pub fn into_def(self) -> KindDef {
        self.def
    }
}

///
/// SealedKind
///
/// The frozen result of sealing a kind: the merged property list with
/// names, columns, and sequence numbers assigned, the resolved key and
/// label properties, and the physical table layout. Once sealed, none of
/// this changes for the lifetime of the registry.
///

#[derive(Debug)]
pub struct SealedKind {
    pub(crate) kind: String,
    pub(crate) verbose: String,
    pub(crate) parent: Option<String>,
    pub(crate) flat: bool,
    pub(crate) audited: bool,
    pub(crate) is_abstract: bool,
    pub(crate) properties: Vec<PropertyDef>,
    pub(crate) key_property: Option<String>,
    pub(crate) label_property: Option<String>,
    pub(crate) key_column: String,
    pub(crate) table: Option<TableDef>,
    pub(crate) on_delete: Option<Arc<dyn DeleteHook>>,
}

impl SealedKind {
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn basekind(&self) -> &str {
        self.kind.rsplit('.').next().unwrap_or(&self.kind)
    }

    #[must_use]
    pub fn verbose_name(&self) -> &str {
        &self.verbose
    }

    #[must_use]
    pub const fn is_flat(&self) -> bool {
        self.flat
    }

    #[must_use]
    pub const fn is_audited(&self) -> bool {
        self.audited
    }

    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    #[must_use]
    pub const fn key_property(&self) -> Option<&String> {
        self.key_property.as_ref()
    }

    #[must_use]
    pub const fn label_property(&self) -> Option<&String> {
        self.label_property.as_ref()
    }

    #[must_use]
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    #[must_use]
    pub const fn table(&self) -> Option<&TableDef> {
        self.table.as_ref()
    }

    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        self.table.as_ref().map(|t| t.name.as_str())
    }

    /// Top-level properties in sequence order (compound wrappers, not
    /// their parts).
    #[must_use]
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    /// Look up a property by name, including compound parts.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        for prop in &self.properties {
            if prop.name == name {
                return Some(prop);
            }
            if let Some(part) = prop.parts.iter().find(|p| p.name == name) {
                return Some(part);
            }
        }
        None
    }

    /// Every stored leaf property: non-transient top-level properties with
    /// compound wrappers flattened into their parts.
    pub fn stored_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties
            .iter()
            .filter(|p| !p.is_transient())
            .flat_map(|p| {
                if p.is_compound() {
                    p.parts.iter().collect::<Vec<_>>()
                } else {
                    vec![p]
                }
            })
    }

    /// SQL expression rebuilding the canonical key string of a row of this
    /// kind, for the given table alias. Used for join conditions and the
    /// reference operator.
    #[must_use]
    pub(crate) fn key_sql_expr(&self, alias: &str) -> String {
        let tagged = format!("'{}:' || {alias}.\"{}\"", self.kind, self.key_column);
        if self.flat {
            tagged
        } else {
            format!(
                "CASE WHEN {alias}.\"{COL_PARENT}\" IS NULL THEN {tagged} \
                 ELSE {alias}.\"{COL_PARENT}\" || '/' || {tagged} END"
            )
        }
    }

    /// Introspection schema used to drive generic form/table construction.
    #[must_use]
    pub fn schema_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "flat": self.flat,
            "audited": self.audited,
            "properties": self
                .properties
                .iter()
                .filter(|p| !p.private)
                .map(PropertyDef::schema_json)
                .collect::<Vec<_>>(),
        })
    }

    /// Derive the physical layout: key column first, declared stored
    /// columns in sequence order, then parent, ACL, and audit columns.
    pub(crate) fn build_table(
        def: &KindDef,
        properties: &[PropertyDef],
        key_property: Option<&PropertyDef>,
        converters: &crate::convert::ConverterRegistry,
    ) -> Result<TableDef, Error> {
        let mut columns = Vec::new();

        if key_property.is_none() {
            let mut key_col = ColumnDef::plain(COL_KEY_NAME, "TEXT");
            key_col.required = true;
            key_col.is_key = true;
            key_col.indexed = true;
            columns.push(key_col);
        }

        for prop in properties.iter().filter(|p| !p.is_transient()) {
            let leaves = if prop.is_compound() {
                prop.parts.iter().collect::<Vec<_>>()
            } else {
                vec![prop]
            };
            for leaf in leaves {
                let default = match &leaf.default {
                    Some(value) if !value.is_null() => {
                        let converter = leaf
                            .converter
                            .clone()
                            .unwrap_or_else(|| converters.get(&leaf.datatype));
                        Some(converter.to_storage(&leaf.datatype, value)?)
                    }
                    _ => None,
                };
                columns.push(ColumnDef {
                    name: leaf.column.clone(),
                    sql_type: leaf.datatype.sql_type(),
                    required: leaf.required,
                    default,
                    indexed: leaf.indexed || leaf.is_key,
                    is_key: leaf.is_key,
                });
            }
        }

        if !def.flat {
            let mut parent_col = ColumnDef::plain(COL_PARENT, "TEXT");
            parent_col.indexed = true;
            columns.push(parent_col);
        }
        columns.push(ColumnDef::plain(COL_ACL, "TEXT"));
        if def.audited {
            for name in AUDIT_COLUMNS {
                columns.push(ColumnDef::plain(name, "TEXT"));
            }
        }

        Ok(TableDef {
            name: def.table.clone(),
            columns,
        })
    }
}
