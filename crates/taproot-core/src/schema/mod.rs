
use crate::value::StorageValue;
use rusqlite::Connection;

///
/// System column names. `_kind` and `_count` are virtual: they only exist
/// in rendered result sets, never as physical columns.
///

pub const COL_KEY_NAME: &str = "_key_name";
pub const COL_PARENT: &str = "_parent";
pub const COL_ACL: &str = "_acl";
pub const COL_CREATED: &str = "_created";
pub const COL_CREATEDBY: &str = "_createdby";
pub const COL_UPDATED: &str = "_updated";
pub const COL_UPDATEDBY: &str = "_updatedby";
pub const COL_OWNERID: &str = "_ownerid";
pub const COL_KIND: &str = "_kind";
pub const COL_COUNT: &str = "_count";

pub const AUDIT_COLUMNS: [&str; 5] = [
    COL_CREATED,
    COL_CREATEDBY,
    COL_UPDATED,
    COL_UPDATEDBY,
    COL_OWNERID,
];

///
/// ColumnDef
///

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: &'static str,
    pub required: bool,
    pub default: Option<StorageValue>,
    pub indexed: bool,
    pub is_key: bool,
}

impl ColumnDef {
    #[must_use]
    pub fn plain(name: &str, sql_type: &'static str) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            required: false,
            default: None,
            indexed: false,
            is_key: false,
        }
    }

    fn definition_sql(&self) -> String {
        let mut sql = format!("\"{}\" {}", self.name, self.sql_type);
        if let Some(default) = &self.default
            && let Some(literal) = default_literal(default)
        {
            sql.push_str(" DEFAULT ");
            sql.push_str(&literal);
        }
        sql
    }
}

fn default_literal(value: &StorageValue) -> Option<String> {
    match value {
        StorageValue::Integer(n) => Some(n.to_string()),
        StorageValue::Real(f) => Some(f.to_string()),
        StorageValue::Text(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        StorageValue::Null | StorageValue::Blob(_) => None,
    }
}

///
/// TableDef
///
/// The reconciled physical layout of one kind: declared property columns
/// plus the key, parent, ACL, and audit columns.
///

#[derive(Clone, Debug, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(ColumnDef::definition_sql)
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS \"{}\" ({columns})", self.name)
    }

    fn add_column_sql(&self, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE \"{}\" ADD COLUMN {}",
            self.name,
            column.definition_sql()
        )
    }

    fn index_sql(&self, column: &ColumnDef) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS \"{}_{}\" ON \"{}\" (\"{}\")",
            self.name, column.name, self.name, column.name
        )
    }
}

/// Reconcile the physical table against the declared layout: create it
/// when absent, add missing columns, create requested indexes. Additive
/// only; existing columns are never altered or dropped.
pub fn reconcile(conn: &Connection, table: &TableDef) -> Result<(), rusqlite::Error> {
    conn.execute_batch(&table.create_sql())?;

    let existing = existing_columns(conn, &table.name)?;
    for column in &table.columns {
        if !existing.contains(&column.name) {
            tracing::debug!(table = %table.name, column = %column.name, "adding column");
            conn.execute_batch(&table.add_column_sql(column))?;
        }
        if column.indexed {
            conn.execute_batch(&table.index_sql(column))?;
        }
    }
    Ok(())
}

fn existing_columns(
    conn: &Connection,
    table: &str,
) -> Result<std::collections::HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<std::collections::HashSet<_>, _>>()?;
    Ok(names)
}
