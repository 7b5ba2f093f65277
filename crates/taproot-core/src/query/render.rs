use crate::{
    error::Error,
    key::Key,
    model::{kind::SealedKind, registry::Registry},
    query::{
        QueryError,
        ast::{CompareOp, Query, Scope},
    },
    schema::{COL_COUNT, COL_KIND, COL_OWNERID, COL_PARENT},
    value::{StorageValue, Value},
};
use std::sync::Arc;

///
/// QueryMode
///
/// What shape of statement to render for a query.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryMode {
    /// Full reconciled column set; rows decode into loaded entities.
    Columns,
    /// Kind, parent, and key columns only; rows decode into lazy entities.
    KeyName,
    /// Aggregate projection, optionally grouped by a joined kind.
    Aggregate,
    /// `COUNT(*)` over the would-be result set.
    Count,
    /// `DELETE` over the root kind's table.
    Delete,
}

///
/// RenderedQuery
///
/// A compiled statement: parameterized SQL, the bound parameters in
/// positional order, the projected column names, and the positional key
/// and parent column indexes for row decoding.
///

#[derive(Clone, Debug)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<StorageValue>,
    pub columns: Vec<String>,
    pub key_index: Option<usize>,
    pub parent_index: Option<usize>,
    pub(crate) full: bool,
}

/// Escape `LIKE` metacharacters. Mandatory before prefix-matching encoded
/// key paths: URL-escaped names contain literal `%`.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn quote(column: &str) -> String {
    format!("\"{column}\"")
}

/// Split an optionally alias-qualified column reference.
fn split_alias(column: &str) -> (Option<&str>, &str) {
    match column.split_once('.') {
        Some((alias, name)) => (Some(alias.trim()), name.trim()),
        None => (None, column.trim()),
    }
}

struct ResolvedJoin {
    kind: Arc<SealedKind>,
    alias: String,
    property: String,
    join_type: &'static str,
    extra: Option<String>,
}

/// Compile a query against one root kind into a parameterized statement.
pub(crate) fn render(
    registry: &Registry,
    query: &Query,
    kind: &str,
    mode: QueryMode,
    include_subclasses: bool,
) -> Result<RenderedQuery, Error> {
    if mode == QueryMode::Count {
        let inner_mode = if query.has_aggregates() {
            QueryMode::Aggregate
        } else {
            QueryMode::KeyName
        };
        let inner = render(registry, query, kind, inner_mode, include_subclasses)?;
        return Ok(RenderedQuery {
            sql: format!(
                "SELECT COUNT(*) {} FROM ({}) results",
                quote(COL_COUNT),
                inner.sql
            ),
            params: inner.params,
            columns: vec![COL_COUNT.to_string()],
            key_index: None,
            parent_index: None,
            full: false,
        });
    }

    let root = registry.seal(kind)?;

    // The root plus, when requested, every concrete subclass.
    let mut targets: Vec<Arc<SealedKind>> = Vec::new();
    if !root.is_abstract() {
        targets.push(root.clone());
    }
    if include_subclasses {
        for sub in registry.subclasses_of(kind)? {
            let sealed = registry.seal(&sub)?;
            if !sealed.is_abstract() {
                targets.push(sealed);
            }
        }
    }
    if targets.is_empty() {
        return Err(QueryError::NoConcreteKinds(root.kind().to_string()).into());
    }

    if mode == QueryMode::Delete {
        return render_scoped_delete(registry, query, &root);
    }

    // Reconciled column set: ordered union over the target tables.
    let mut union_columns: Vec<String> = Vec::new();
    for target in &targets {
        if let Some(table) = target.table() {
            for column in &table.columns {
                if !union_columns.contains(&column.name) {
                    union_columns.push(column.name.clone());
                }
            }
        }
    }

    let joins = resolve_joins(registry, query)?;
    let mut params: Vec<StorageValue> = Vec::new();

    // ── Step 1+2: per-kind selects, unioned into one CTE ──
    let mut sql = String::from("WITH objects AS (");
    for (index, target) in targets.iter().enumerate() {
        let table = target
            .table()
            .ok_or_else(|| QueryError::NoConcreteKinds(target.kind().to_string()))?;
        if index > 0 {
            sql.push_str(" UNION ALL");
        }
        sql.push_str(&format!(" SELECT '{}' AS {}", target.kind(), quote(COL_KIND)));
        for column in &union_columns {
            if table.column(column).is_some() {
                sql.push_str(&format!(", {}", quote(column)));
            } else {
                sql.push_str(&format!(", NULL AS {}", quote(column)));
            }
        }
        for synthetic in &query.synthetics {
            sql.push_str(&format!(", {} AS {}", synthetic.formula, quote(&synthetic.name)));
        }
        sql.push_str(&format!(" FROM {}", quote(&table.name)));
    }
    sql.push_str(") ");

    let synthetic_names: Vec<&str> = query.synthetics.iter().map(|s| s.name.as_str()).collect();
    let column_exists = |column: &str, alias: Option<&str>| -> bool {
        match alias {
            None | Some("k") => {
                column == COL_KIND
                    || union_columns.iter().any(|c| c == column)
                    || synthetic_names.contains(&column)
            }
            Some(alias) => joins.iter().any(|join| {
                join.alias == alias
                    && join
                        .kind
                        .table()
                        .is_some_and(|table| table.column(column).is_some())
            }),
        }
    };

    // ── Steps 3+4: outer select ──
    let mut columns: Vec<String> = Vec::new();
    let mut key_index: Option<usize> = None;
    let mut parent_index: Option<usize> = None;
    let full = mode == QueryMode::Columns;

    match mode {
        QueryMode::Columns => {
            columns.push(COL_KIND.to_string());
            let mut select_list = format!("k.{}", quote(COL_KIND));
            for column in &union_columns {
                columns.push(column.clone());
                select_list.push_str(&format!(", k.{}", quote(column)));
            }
            for synthetic in &query.synthetics {
                columns.push(synthetic.name.clone());
                select_list.push_str(&format!(", k.{}", quote(&synthetic.name)));
            }
            key_index = columns.iter().position(|c| c == root.key_column());
            parent_index = columns.iter().position(|c| c == COL_PARENT);
            for join in &joins {
                if let Some(table) = join.kind.table() {
                    for column in &table.columns {
                        columns.push(format!("+{}.{}", join.alias, column.name));
                        select_list
                            .push_str(&format!(", {}.{}", join.alias, quote(&column.name)));
                    }
                }
            }
            sql.push_str(&format!("SELECT {select_list} FROM objects k"));
        }

        QueryMode::KeyName => {
            columns.push(COL_KIND.to_string());
            let mut select_list = format!("k.{}", quote(COL_KIND));
            if !root.is_flat() {
                columns.push(COL_PARENT.to_string());
                select_list.push_str(&format!(", k.{}", quote(COL_PARENT)));
                parent_index = Some(1);
            }
            columns.push(root.key_column().to_string());
            select_list.push_str(&format!(", k.{}", quote(root.key_column())));
            key_index = Some(columns.len() - 1);
            sql.push_str(&format!("SELECT {select_list} FROM objects k"));
        }

        QueryMode::Aggregate => {
            // At most one distinct group-by kind across all aggregates.
            let mut group_by: Option<String> = None;
            for aggregate in &query.aggregates {
                if let Some(kind_name) = &aggregate.group_by {
                    let canonical = registry.resolve_name(kind_name)?;
                    match &group_by {
                        Some(existing) if *existing != canonical => {
                            return Err(QueryError::MixedGroupBy(
                                existing.clone(),
                                canonical,
                            )
                            .into());
                        }
                        Some(_) => {}
                        None => group_by = Some(canonical),
                    }
                }
            }

            let group = match &group_by {
                Some(kind_name) => {
                    let sealed = registry.seal(kind_name)?;
                    let join = joins
                        .iter()
                        .find(|j| j.kind.kind() == sealed.kind())
                        .ok_or_else(|| {
                            QueryError::GroupByNotJoined(sealed.kind().to_string())
                        })?;
                    Some((sealed, join.alias.clone()))
                }
                None => None,
            };

            let kind_label = group
                .as_ref()
                .map_or_else(|| root.kind().to_string(), |(k, _)| k.kind().to_string());
            columns.push(COL_KIND.to_string());
            let mut select_list = format!("'{kind_label}' AS {}", quote(COL_KIND));

            for aggregate in &query.aggregates {
                let (alias, column) = split_alias(&aggregate.column);
                if !column_exists(column, alias) {
                    return Err(QueryError::UnknownColumn(aggregate.column.clone()).into());
                }
                let qualified = format!("{}.{}", alias.unwrap_or("k"), quote(column));
                let expr = match &aggregate.default {
                    Some(default) => {
                        params.push(default.to_storage_lossy());
                        format!("COALESCE({}({qualified}), ?)", aggregate.func.sql())
                    }
                    None => format!("{}({qualified})", aggregate.func.sql()),
                };
                columns.push(aggregate.name.clone());
                select_list.push_str(&format!(", {expr} AS {}", quote(&aggregate.name)));
            }

            if let Some((sealed, alias)) = &group
                && let Some(table) = sealed.table()
            {
                for column in &table.columns {
                    columns.push(format!("{alias}.{}", column.name));
                    select_list.push_str(&format!(", {alias}.{}", quote(&column.name)));
                }
                key_index = columns
                    .iter()
                    .position(|c| *c == format!("{alias}.{}", sealed.key_column()));
                parent_index = columns
                    .iter()
                    .position(|c| *c == format!("{alias}.{COL_PARENT}"));
            }
            sql.push_str(&format!("SELECT {select_list} FROM objects k"));

            // GROUP BY is appended after the WHERE clause below.
        }

        QueryMode::Count | QueryMode::Delete => unreachable!("handled above"),
    }

    // ── Step 3: joins ──
    for join in &joins {
        let table = join
            .kind
            .table()
            .ok_or_else(|| QueryError::NoConcreteKinds(join.kind.kind().to_string()))?;
        sql.push_str(&format!(
            " {} JOIN {} {} ON ({} = k.{})",
            join.join_type,
            quote(&table.name),
            join.alias,
            join.kind.key_sql_expr(&join.alias),
            quote(&join.property),
        ));
        if let Some(extra) = &join.extra {
            sql.truncate(sql.len() - 1);
            sql.push_str(&format!(" AND {extra})"));
        }
    }

    // ── Steps 5+6: scoping and filter conditions ──
    let clauses = build_clauses(registry, query, &root, Some("k"), &mut params, &column_exists)?;
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if mode == QueryMode::Aggregate {
        let group = query
            .aggregates
            .iter()
            .find_map(|a| a.group_by.as_ref());
        if let Some(kind_name) = group {
            let sealed = registry.seal(kind_name)?;
            if let Some(join) = joins.iter().find(|j| j.kind.kind() == sealed.kind())
                && let Some(table) = sealed.table()
            {
                let group_cols = table
                    .columns
                    .iter()
                    .map(|c| format!("{}.{}", join.alias, quote(&c.name)))
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" GROUP BY {group_cols}"));
            }
        }
    }

    if !query.sorts.is_empty() && matches!(mode, QueryMode::Columns | QueryMode::Aggregate) {
        let order = query
            .sorts
            .iter()
            .map(|sort| {
                let (alias, column) = split_alias(&sort.column);
                format!(
                    "{}.{} {}",
                    alias.unwrap_or("k"),
                    quote(column),
                    if sort.ascending { "ASC" } else { "DESC" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {order}"));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok(RenderedQuery {
        sql,
        params,
        columns,
        key_index,
        parent_index,
        full,
    })
}

fn resolve_joins(registry: &Registry, query: &Query) -> Result<Vec<ResolvedJoin>, Error> {
    let mut resolved = Vec::new();
    for join in &query.joins {
        let sealed = registry.seal(&join.kind)?;
        let alias = join
            .alias
            .clone()
            .unwrap_or_else(|| sealed.basekind().to_string());
        resolved.push(ResolvedJoin {
            alias,
            property: join.property.clone(),
            join_type: join.join_type.sql(),
            extra: join.extra.clone(),
            kind: sealed,
        });
    }
    Ok(resolved)
}

/// DELETE over the root table, honoring scoping and filters but no joins.
fn render_scoped_delete(
    registry: &Registry,
    query: &Query,
    root: &Arc<SealedKind>,
) -> Result<RenderedQuery, Error> {
    let table = root
        .table()
        .ok_or_else(|| QueryError::NoConcreteKinds(root.kind().to_string()))?;
    let mut params = Vec::new();
    let column_exists =
        |column: &str, alias: Option<&str>| alias.is_none() && table.column(column).is_some();
    let clauses = build_clauses(registry, query, root, None, &mut params, &column_exists)?;

    let mut sql = format!("DELETE FROM {}", quote(&table.name));
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    Ok(RenderedQuery {
        sql,
        params,
        columns: Vec::new(),
        key_index: None,
        parent_index: None,
        full: false,
    })
}

/// Render scoping clauses and filter conditions, appending parameters in
/// emission order.
fn build_clauses(
    registry: &Registry,
    query: &Query,
    root: &Arc<SealedKind>,
    alias: Option<&str>,
    params: &mut Vec<StorageValue>,
    column_exists: &dyn Fn(&str, Option<&str>) -> bool,
) -> Result<Vec<String>, Error> {
    let qual = |column: &str| match alias {
        Some(a) => format!("{a}.{}", quote(column)),
        None => quote(column),
    };
    let mut clauses = Vec::new();

    match &query.scope {
        Scope::None => {}
        Scope::Key(key) => {
            if let Some(scope) = key.scope() {
                clauses.push(format!("({} = ?)", qual(COL_PARENT)));
                params.push(StorageValue::Text(scope.to_string()));
            } else if !root.is_flat() {
                clauses.push(format!("({} IS NULL)", qual(COL_PARENT)));
            }
            clauses.push(format!("({} = ?)", qual(root.key_column())));
            params.push(StorageValue::Text(key.name().to_string()));
        }
        Scope::Ancestor(ancestor) => {
            if root.is_flat() {
                return Err(QueryError::FlatScope {
                    kind: root.kind().to_string(),
                    scope: "ancestor",
                }
                .into());
            }
            // Delimiter-safe: equality on the ancestor itself, or a
            // path-prefix match that requires the next byte to be '/'.
            clauses.push(format!(
                "({col} = ? OR {col} LIKE ? ESCAPE '\\')",
                col = qual(COL_PARENT)
            ));
            params.push(StorageValue::Text(ancestor.to_string()));
            params.push(StorageValue::Text(format!(
                "{}/%",
                escape_like(ancestor.canonical())
            )));
        }
        Scope::Parent(parent) => {
            if root.is_flat() {
                return Err(QueryError::FlatScope {
                    kind: root.kind().to_string(),
                    scope: "parent",
                }
                .into());
            }
            match parent {
                Some(parent) => {
                    clauses.push(format!("({} = ?)", qual(COL_PARENT)));
                    params.push(StorageValue::Text(parent.to_string()));
                }
                None => clauses.push(format!("({} IS NULL)", qual(COL_PARENT))),
            }
        }
    }

    if let Some(owner) = &query.owner {
        clauses.push(format!("({} = ?)", qual(COL_OWNERID)));
        params.push(StorageValue::Text(owner.clone()));
    }

    for filter in &query.filters {
        let (filter_alias, column) = split_alias(&filter.column);
        if !column_exists(column, filter_alias) {
            return Err(QueryError::UnknownColumn(filter.column.clone()).into());
        }
        let qcol = match (alias, filter_alias) {
            (None, _) => quote(column),
            (Some(_), Some(a)) => format!("{a}.{}", quote(column)),
            (Some(fallback), None) => format!("{fallback}.{}", quote(column)),
        };

        match (&filter.op, &filter.value) {
            (CompareOp::Eq, Value::Null) => clauses.push(format!("({qcol} IS NULL)")),
            (CompareOp::Ne, Value::Null) => clauses.push(format!("({qcol} IS NOT NULL)")),
            (CompareOp::In | CompareOp::NotIn, value) => {
                let items: Vec<Value> = match value {
                    Value::List(items) => items.clone(),
                    single => vec![single.clone()],
                };
                if items.is_empty() {
                    // Empty IN matches nothing; empty NOT IN everything.
                    clauses.push(
                        if filter.op == CompareOp::In { "(1 = 0)" } else { "(1 = 1)" }.to_string(),
                    );
                } else {
                    let placeholders = vec!["?"; items.len()].join(", ");
                    let op = if filter.op == CompareOp::In {
                        "IN"
                    } else {
                        "NOT IN"
                    };
                    clauses.push(format!("({qcol} {op} ({placeholders}))"));
                    params.extend(items.iter().map(Value::to_storage_lossy));
                }
            }
            (CompareOp::RefersTo, value) => {
                clauses.push(render_reference_filter(registry, &qcol, value, params)?);
            }
            (op, value) => {
                clauses.push(format!("({qcol} {op} ?)"));
                params.push(value.to_storage_lossy());
            }
        }
    }

    Ok(clauses)
}

/// The reference operator: the column's stored key equals the target, or
/// names a descendant of it. Compiles to membership in the target kind's
/// descendants-or-self key set.
fn render_reference_filter(
    registry: &Registry,
    qcol: &str,
    value: &Value,
    params: &mut Vec<StorageValue>,
) -> Result<String, Error> {
    let key = match value {
        Value::Key(key) => key.clone(),
        Value::Text(text) => Key::parse_raw(text)?,
        other => return Err(QueryError::ReferenceFilterValue(other.to_string()).into()),
    };
    let key = key.canonicalized(registry)?;
    let target = registry.seal(key.kind())?;
    let canonical = key.to_string();

    if target.is_flat() {
        params.push(StorageValue::Text(canonical));
        return Ok(format!("({qcol} = ?)"));
    }

    let table = target
        .table()
        .ok_or_else(|| QueryError::NoConcreteKinds(target.kind().to_string()))?;
    let key_expr = target.key_sql_expr("t");
    let clause = format!(
        "({qcol} IN (SELECT {key_expr} FROM {} t \
         WHERE {key_expr} = ? OR t.{parent} = ? OR t.{parent} LIKE ? ESCAPE '\\'))",
        quote(&table.name),
        parent = quote(COL_PARENT),
    );
    params.push(StorageValue::Text(canonical.clone()));
    params.push(StorageValue::Text(canonical.clone()));
    params.push(StorageValue::Text(format!("{}/%", escape_like(&canonical))));
    Ok(clause)
}

///
/// Write-path statements
///

pub(crate) fn render_insert(
    kind: &SealedKind,
    values: &[(String, StorageValue)],
) -> Result<RenderedQuery, crate::db::StoreError> {
    let table = kind
        .table()
        .ok_or_else(|| crate::db::StoreError::AbstractKind(kind.kind().to_string()))?;
    let columns = values
        .iter()
        .map(|(name, _)| quote(name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; values.len()].join(", ");
    Ok(RenderedQuery {
        sql: format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            quote(&table.name)
        ),
        params: values.iter().map(|(_, v)| v.clone()).collect(),
        columns: Vec::new(),
        key_index: None,
        parent_index: None,
        full: false,
    })
}

pub(crate) fn render_update(
    kind: &SealedKind,
    key: &Key,
    values: &[(String, StorageValue)],
) -> Result<RenderedQuery, crate::db::StoreError> {
    let table = kind
        .table()
        .ok_or_else(|| crate::db::StoreError::AbstractKind(kind.kind().to_string()))?;
    let assignments = values
        .iter()
        .map(|(name, _)| format!("{} = ?", quote(name)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<StorageValue> = values.iter().map(|(_, v)| v.clone()).collect();
    let mut sql = format!(
        "UPDATE {} SET {assignments} WHERE {} = ?",
        quote(&table.name),
        quote(kind.key_column())
    );
    params.push(StorageValue::Text(key.name().to_string()));
    if !kind.is_flat() {
        match key.scope() {
            Some(scope) => {
                sql.push_str(&format!(" AND {} = ?", quote(COL_PARENT)));
                params.push(StorageValue::Text(scope.to_string()));
            }
            None => sql.push_str(&format!(" AND {} IS NULL", quote(COL_PARENT))),
        }
    }
    Ok(RenderedQuery {
        sql,
        params,
        columns: Vec::new(),
        key_index: None,
        parent_index: None,
        full: false,
    })
}

pub(crate) fn render_delete_by_key(
    kind: &SealedKind,
    key: &Key,
) -> Result<RenderedQuery, crate::db::StoreError> {
    let table = kind
        .table()
        .ok_or_else(|| crate::db::StoreError::AbstractKind(kind.kind().to_string()))?;
    let mut params = vec![StorageValue::Text(key.name().to_string())];
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        quote(&table.name),
        quote(kind.key_column())
    );
    if !kind.is_flat() {
        match key.scope() {
            Some(scope) => {
                sql.push_str(&format!(" AND {} = ?", quote(COL_PARENT)));
                params.push(StorageValue::Text(scope.to_string()));
            }
            None => sql.push_str(&format!(" AND {} IS NULL", quote(COL_PARENT))),
        }
    }
    Ok(RenderedQuery {
        sql,
        params,
        columns: Vec::new(),
        key_index: None,
        parent_index: None,
        full: false,
    })
}
