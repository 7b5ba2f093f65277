use crate::{
    entity::Entity,
    error::Error,
    key::Key,
    query::{
        Aggregate, AggregateFunc, CompareOp, Join, Query, QueryError,
        render::{QueryMode, render},
    },
    test_fixtures,
    value::{StorageValue, Value},
};

fn transaction_under(db: &crate::db::Database, parent: &Key, amount: f64) -> Entity {
    let tx = Entity::new(db.registry(), "ledger.transaction", Some(parent)).unwrap();
    tx.set(db, "amt", amount).unwrap();
    tx.put(db).unwrap();
    tx
}

fn category(db: &crate::db::Database, parent: Option<&Key>, name: &str) -> Entity {
    let cat = Entity::new(db.registry(), "ledger.category", parent).unwrap();
    cat.set(db, "cat_name", name).unwrap();
    cat.put(db).unwrap();
    cat
}

fn account(db: &crate::db::Database, name: &str) -> Entity {
    let acc = Entity::new(db.registry(), "ledger.account", None).unwrap();
    acc.set(db, "acc_name", name).unwrap();
    acc.put(db).unwrap();
    acc
}

// ── Render shape ───────────────────────────────────────

#[test]
fn polymorphic_render_unions_subclass_tables_with_null_padding() {
    let registry = test_fixtures::registry();
    let query = Query::new("ledger.transaction");
    let rendered = render(&registry, &query, "ledger.transaction", QueryMode::Columns, true)
        .unwrap();

    assert!(rendered.sql.starts_with("WITH objects AS ("));
    assert_eq!(rendered.sql.matches("UNION ALL").count(), 1);
    // The transaction branch NULL-pads the transfer-only column.
    assert!(rendered.sql.contains("NULL AS \"counter\""));
    assert!(rendered.sql.contains("'ledger.transaction' AS \"_kind\""));
    assert!(rendered.sql.contains("'ledger.transfer' AS \"_kind\""));

    // Key and parent positions are recorded for row decoding.
    assert_eq!(rendered.columns[0], "_kind");
    assert!(rendered.key_index.is_some());
    assert!(rendered.parent_index.is_some());
}

#[test]
fn synthetic_columns_render_into_every_union_branch() {
    let registry = test_fixtures::registry();
    let mut query = Query::new("ledger.transaction");
    query.add_synthetic_column("debit", "(CASE WHEN amt < 0 THEN -amt ELSE 0 END)");
    let rendered = render(&registry, &query, "ledger.transaction", QueryMode::Columns, true)
        .unwrap();

    assert_eq!(
        rendered
            .sql
            .matches("(CASE WHEN amt < 0 THEN -amt ELSE 0 END) AS \"debit\"")
            .count(),
        2
    );
    assert!(rendered.columns.iter().any(|c| c == "debit"));
}

#[test]
fn unknown_filter_column_is_invalid() {
    let registry = test_fixtures::registry();
    let mut query = Query::new("ledger.transaction");
    query.add_filter("no_such_column", CompareOp::Eq, 1);
    let err = render(&registry, &query, "ledger.transaction", QueryMode::Columns, false)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryError::UnknownColumn(_))
    ));
}

#[test]
fn mixed_group_by_kinds_are_invalid() {
    let registry = test_fixtures::registry();
    let mut query = Query::new("ledger.transaction");
    query
        .add_aggregate(Aggregate::new("amt", "a").group_by("ledger.category"))
        .add_aggregate(Aggregate::new("amt", "b").group_by("ledger.account"));
    let err = render(&registry, &query, "ledger.transaction", QueryMode::Aggregate, false)
        .unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::MixedGroupBy(..))));
}

#[test]
fn group_by_kind_must_be_joined() {
    let registry = test_fixtures::registry();
    let mut query = Query::new("ledger.transaction");
    query.add_aggregate(Aggregate::new("amt", "total").group_by("ledger.category"));
    let err = render(&registry, &query, "ledger.transaction", QueryMode::Aggregate, false)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryError::GroupByNotJoined(_))
    ));
}

#[test]
fn flat_kinds_reject_hierarchical_scoping() {
    let registry = test_fixtures::registry();
    let ancestor = Key::new(&registry, "ledger.user", None, "jan").unwrap();
    let mut query = Query::new("ledger.user");
    query.set_ancestor(ancestor);
    let err = render(&registry, &query, "ledger.user", QueryMode::Columns, false).unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::FlatScope { .. })));
}

#[test]
fn abstract_kind_without_subclasses_has_no_targets() {
    let registry = test_fixtures::registry();
    let query = Query::new("ledger.entry");
    let err = render(&registry, &query, "ledger.entry", QueryMode::Columns, false).unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryError::NoConcreteKinds(_))
    ));
}

// ── Execution ──────────────────────────────────────────

#[test]
fn filters_compare_convert_and_handle_null() {
    let db = test_fixtures::database();
    let acc = account(&db, "Main");
    let key = acc.key().unwrap();
    transaction_under(&db, &key, -10.0);
    transaction_under(&db, &key, 25.0);
    let unset = Entity::new(db.registry(), "ledger.transaction", Some(&key)).unwrap();
    unset.set(&db, "amt", Value::Null).unwrap();
    unset.put(&db).unwrap();

    let mut negative = Query::new("ledger.transaction");
    negative.add_filter("amt", CompareOp::Lt, 0.0);
    assert_eq!(negative.count(&db).unwrap(), 1);

    let mut null_amount = Query::new("ledger.transaction");
    null_amount.add_filter("amt", CompareOp::Eq, Value::Null);
    assert_eq!(null_amount.count(&db).unwrap(), 1);

    let mut non_null = Query::new("ledger.transaction");
    non_null.add_filter("amt", CompareOp::Ne, Value::Null);
    assert_eq!(non_null.count(&db).unwrap(), 2);

    let mut in_list = Query::new("ledger.transaction");
    in_list.add_filter(
        "amt",
        CompareOp::In,
        Value::List(vec![Value::Float(-10.0), Value::Float(99.0)]),
    );
    assert_eq!(in_list.count(&db).unwrap(), 1);

    let mut empty_in = Query::new("ledger.transaction");
    empty_in.add_filter("amt", CompareOp::In, Value::List(Vec::new()));
    assert_eq!(empty_in.count(&db).unwrap(), 0);
}

#[test]
fn sort_and_limit_shape_the_result() {
    let db = test_fixtures::database();
    let acc = account(&db, "Main");
    let key = acc.key().unwrap();
    for amount in [5.0, -3.0, 12.0] {
        transaction_under(&db, &key, amount);
    }

    let mut query = Query::new("ledger.transaction");
    query.add_sort("amt", false).set_limit(2);
    let amounts: Vec<f64> = query
        .fetch_all(&db)
        .unwrap()
        .iter()
        .map(|tx| tx.get(&db, "amt").unwrap().as_f64().unwrap())
        .collect();
    assert_eq!(amounts, vec![12.0, 5.0]);
}

#[test]
fn ancestor_queries_match_descendants_not_name_prefixes() {
    let db = test_fixtures::database();
    let hundred = category(&db, None, "100");
    let lookalike = category(&db, None, "100%");
    let under_hundred = category(&db, Some(&hundred.key().unwrap()), "child-a");
    category(&db, Some(&lookalike.key().unwrap()), "child-b");
    let grandchild = category(
        &db,
        Some(&under_hundred.key().unwrap()),
        "grandchild",
    );

    let mut query = Query::new("ledger.category");
    query.set_ancestor(hundred.key().unwrap());
    let names: Vec<String> = query
        .fetch_all(&db)
        .unwrap()
        .iter()
        .map(|cat| cat.get(&db, "cat_name").unwrap().to_text())
        .collect();

    assert_eq!(names.len(), 2, "descendants only: {names:?}");
    assert!(names.contains(&"child-a".to_string()));
    assert!(names.contains(&"grandchild".to_string()));
    assert!(!names.contains(&"child-b".to_string()));
    drop(grandchild);
}

#[test]
fn ancestor_matching_escapes_like_metacharacters() {
    let db = test_fixtures::database();
    let percent = category(&db, None, "50%");
    let decoy = category(&db, None, "50%x");
    category(&db, Some(&percent.key().unwrap()), "mine");
    category(&db, Some(&decoy.key().unwrap()), "theirs");

    let mut query = Query::new("ledger.category");
    query.set_ancestor(percent.key().unwrap());
    let names: Vec<String> = query
        .fetch_all(&db)
        .unwrap()
        .iter()
        .map(|cat| cat.get(&db, "cat_name").unwrap().to_text())
        .collect();
    assert_eq!(names, vec!["mine".to_string()]);
}

#[test]
fn parent_scope_matches_direct_children_only() {
    let db = test_fixtures::database();
    let root = category(&db, None, "root");
    let child = category(&db, Some(&root.key().unwrap()), "child");
    category(&db, Some(&child.key().unwrap()), "grandchild");

    let mut query = Query::new("ledger.category");
    query.set_parent(Some(root.key().unwrap()));
    assert_eq!(query.count(&db).unwrap(), 1);

    let mut roots = Query::new("ledger.category");
    roots.set_parent(None);
    assert_eq!(roots.count(&db).unwrap(), 1);
}

#[test]
fn reference_operator_matches_target_and_descendants() {
    let db = test_fixtures::database();
    let expenses = category(&db, None, "Expenses");
    let groceries = category(&db, Some(&expenses.key().unwrap()), "Groceries");
    let income = category(&db, None, "Income");

    let acc = account(&db, "Main");
    let acc_key = acc.key().unwrap();

    let tagged = |cat: &Entity, amount: f64| {
        let tx = transaction_under(&db, &acc_key, amount);
        tx.set(&db, "category", cat.key().unwrap()).unwrap();
        tx.put(&db).unwrap();
    };
    tagged(&groceries, -42.5);
    tagged(&expenses, -10.0);
    tagged(&income, 100.0);

    let mut query = Query::new("ledger.transaction");
    query.add_filter("category", CompareOp::RefersTo, expenses.key().unwrap());
    assert_eq!(query.count(&db).unwrap(), 2);

    let mut narrow = Query::new("ledger.transaction");
    narrow.add_filter("category", CompareOp::RefersTo, groceries.key().unwrap());
    assert_eq!(narrow.count(&db).unwrap(), 1);
}

#[test]
fn polymorphic_queries_decode_each_subclass() {
    let db = test_fixtures::database();
    let acc = account(&db, "Main");
    let key = acc.key().unwrap();
    transaction_under(&db, &key, 10.0);

    let transfer = Entity::new(db.registry(), "ledger.transfer", Some(&key)).unwrap();
    transfer.set(&db, "amt", -10.0).unwrap();
    transfer.put(&db).unwrap();

    let mut all = Query::new("ledger.entry");
    all.include_subclasses(true);
    let kinds: Vec<String> = all
        .fetch_all(&db)
        .unwrap()
        .iter()
        .map(|e| e.kind().kind().to_string())
        .collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&"ledger.transaction".to_string()));
    assert!(kinds.contains(&"ledger.transfer".to_string()));

    let mut base_only = Query::new("ledger.transaction");
    base_only.include_subclasses(false);
    assert_eq!(base_only.count(&db).unwrap(), 1);
}

#[test]
fn aggregate_defaults_cover_empty_groups() {
    let db = test_fixtures::database();
    let groceries = category(&db, None, "Groceries");
    let idle = category(&db, None, "Idle");

    let acc = account(&db, "Main");
    let tx = transaction_under(&db, &acc.key().unwrap(), -42.5);
    tx.set(&db, "category", groceries.key().unwrap()).unwrap();
    tx.put(&db).unwrap();

    let mut query = Query::new("ledger.transaction");
    query
        .add_aggregate(
            Aggregate::new("amt", "total")
                .group_by("ledger.category")
                .func(AggregateFunc::Sum)
                .default(0.0),
        )
        .add_join(Join::new("ledger.category", "category").right().alias("cat"));

    let rows = query.fetch_rows(&db).unwrap();
    assert_eq!(rows.len(), 2);

    let total_for = |name: &str| -> f64 {
        rows.iter()
            .find(|row| {
                row.get("cat.cat_name").and_then(StorageValue::as_str) == Some(name)
            })
            .and_then(|row| row.get("total"))
            .and_then(StorageValue::as_f64)
            .unwrap()
    };
    assert_eq!(total_for("Groceries"), -42.5);
    assert_eq!(total_for("Idle"), 0.0);
    drop(idle);
}

#[test]
fn count_wraps_the_rendered_select() {
    let db = test_fixtures::database();
    let acc = account(&db, "Main");
    let key = acc.key().unwrap();
    transaction_under(&db, &key, 1.0);
    transaction_under(&db, &key, 2.0);

    let mut query = Query::new("ledger.transaction");
    query.set_parent(Some(key));
    assert_eq!(query.count(&db).unwrap(), 2);
}

#[test]
fn bulk_delete_without_hook_removes_matching_rows() {
    let db = test_fixtures::database();
    let acc = account(&db, "Main");
    let key = acc.key().unwrap();
    transaction_under(&db, &key, 1.0);
    transaction_under(&db, &key, -1.0);

    let mut doomed = Query::new("ledger.transaction");
    doomed.add_filter("amt", CompareOp::Lt, 0.0);
    assert_eq!(doomed.delete(&db).unwrap(), 1);
    assert_eq!(Query::new("ledger.transaction").count(&db).unwrap(), 1);
}

#[test]
fn synthetic_columns_support_filters_and_aggregates() {
    let db = test_fixtures::database();
    let acc = account(&db, "Main");
    let key = acc.key().unwrap();
    transaction_under(&db, &key, -40.0);
    transaction_under(&db, &key, -2.5);
    transaction_under(&db, &key, 100.0);

    let mut query = Query::new("ledger.transaction");
    query
        .add_synthetic_column("debit", "(CASE WHEN amt < 0 THEN -amt ELSE 0 END)")
        .add_aggregate(Aggregate::new("debit", "total_debit").default(0.0));
    let rows = query.fetch_rows(&db).unwrap();
    assert_eq!(
        rows[0].get("total_debit").and_then(StorageValue::as_f64),
        Some(42.5)
    );

    let mut filtered = Query::new("ledger.transaction");
    filtered
        .add_synthetic_column("debit", "(CASE WHEN amt < 0 THEN -amt ELSE 0 END)")
        .add_filter("debit", CompareOp::Gt, 0.0);
    assert_eq!(filtered.count(&db).unwrap(), 2);
}

#[test]
fn fetch_all_refuses_aggregate_queries() {
    let db = test_fixtures::database();
    account(&db, "Main");

    let mut query = Query::new("ledger.transaction");
    query.add_aggregate(Aggregate::new("amt", "total"));
    assert!(query.fetch_all(&db).is_err());
}
