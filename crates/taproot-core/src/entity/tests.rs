use crate::{
    db::StoreError,
    entity::{Entity, WireOptions},
    error::Error,
    model::property::ValidateError,
    query::Query,
    test_fixtures,
    value::Value,
};

#[test]
fn new_entities_start_from_declared_defaults() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();

    assert!(account.is_new());
    assert_eq!(
        account.get(&db, "currency").unwrap(),
        Value::Text("CAD".to_string())
    );
    assert_eq!(
        account.get(&db, "status").unwrap(),
        Value::Text("open".to_string())
    );
    assert_eq!(account.get(&db, "acc_name").unwrap(), Value::Null);
}

#[test]
fn unknown_properties_are_rejected() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();
    let err = account.get(&db, "no_such_thing").unwrap_err();
    assert!(matches!(
        err,
        Error::Store(StoreError::UnknownProperty { .. })
    ));
}

#[test]
fn assignment_converts_then_validates() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();

    // The enum converter coerces the backing scalar to its label.
    account.set(&db, "status", 2).unwrap();
    assert_eq!(
        account.get(&db, "status").unwrap(),
        Value::Text("frozen".to_string())
    );

    // Required check runs first on null assignment.
    let err = account.set(&db, "acc_name", Value::Null).unwrap_err();
    assert!(matches!(
        err,
        Error::Validate(ValidateError::PropertyRequired(_))
    ));

    // A failed assignment leaves the old value in place.
    account.set(&db, "acc_name", "Chequing").unwrap();
    assert!(account.set(&db, "status", "liquid").is_err());
    assert_eq!(
        account.get(&db, "status").unwrap(),
        Value::Text("frozen".to_string())
    );
}

#[test]
fn first_put_inserts_and_generates_a_key_name() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();
    account.set(&db, "acc_name", "Chequing").unwrap();

    assert!(account.key().is_err());
    account.put(&db).unwrap();
    assert!(!account.is_new());

    let key = account.key().unwrap();
    assert_eq!(key.kind(), "ledger.account");
    assert_eq!(key.name().len(), 32); // uuid4, simple format

    // Second put is an update, not a second row.
    account.set(&db, "acc_nr", "001").unwrap();
    account.put(&db).unwrap();
    assert_eq!(Query::new("ledger.account").count(&db).unwrap(), 1);
}

#[test]
fn required_property_unset_at_store_time_fails() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();
    let err = account.put(&db).unwrap_err();
    assert!(matches!(
        err,
        Error::Validate(ValidateError::PropertyRequired(_))
    ));
    assert!(account.is_new());
}

#[test]
fn key_property_supplies_the_key_name() {
    let db = test_fixtures::database();
    let user = Entity::new(db.registry(), "ledger.user", None).unwrap();
    user.set(&db, "username", "jan").unwrap();
    assert_eq!(user.key_name().as_deref(), Some("jan"));

    user.put(&db).unwrap();
    let key = user.key().unwrap();
    assert_eq!(key.name(), "jan");

    let fetched = db.get(&key).unwrap().expect("stored user resolves by key");
    assert_eq!(fetched.get(&db, "username").unwrap(), Value::Text("jan".to_string()));
}

#[test]
fn missing_key_property_fails_with_key_property_required() {
    let db = test_fixtures::database();
    let user = Entity::new(db.registry(), "ledger.user", None).unwrap();
    let err = user.put(&db).unwrap_err();
    assert!(matches!(
        err,
        Error::Store(StoreError::KeyPropertyRequired { .. })
    ));
}

#[test]
fn lazy_load_pulls_the_row_on_first_stored_read() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();
    account.set(&db, "acc_name", "Lazy").unwrap();
    account.put(&db).unwrap();
    let key = account.key().unwrap();

    let mut query = Query::new("ledger.account");
    query.keys_only(true);
    let sparse = query.get(&db).unwrap().unwrap();
    assert_eq!(sparse.key().unwrap(), key);
    // Values were not projected by the keys-only query; the first read
    // loads the row.
    assert_eq!(
        sparse.get(&db, "acc_name").unwrap(),
        Value::Text("Lazy".to_string())
    );
}

#[test]
fn computed_properties_run_subqueries_and_reject_writes() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();
    account.set(&db, "acc_name", "Running").unwrap();
    account.put(&db).unwrap();

    assert_eq!(account.get(&db, "balance").unwrap(), Value::Float(0.0));

    for amount in [-42.5, 100.0] {
        let tx = Entity::new(
            db.registry(),
            "ledger.transaction",
            Some(&account.key().unwrap()),
        )
        .unwrap();
        tx.set(&db, "amt", amount).unwrap();
        tx.put(&db).unwrap();
    }
    assert_eq!(account.get(&db, "balance").unwrap(), Value::Float(57.5));

    let err = account.set(&db, "balance", 1.0).unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::NoSetter(_))));
}

#[test]
fn delete_hook_vetoes_and_cascades() {
    let db = test_fixtures::database();

    let locked = Entity::new(db.registry(), "ledger.account", None).unwrap();
    locked.set(&db, "acc_name", "locked").unwrap();
    locked.put(&db).unwrap();
    assert_eq!(locked.delete(&db).unwrap(), 0);
    assert!(locked.exists(&db).unwrap());

    let doomed = Entity::new(db.registry(), "ledger.account", None).unwrap();
    doomed.set(&db, "acc_name", "doomed").unwrap();
    doomed.put(&db).unwrap();
    let tx = Entity::new(
        db.registry(),
        "ledger.transaction",
        Some(&doomed.key().unwrap()),
    )
    .unwrap();
    tx.set(&db, "amt", 5.0).unwrap();
    tx.put(&db).unwrap();

    assert_eq!(doomed.delete(&db).unwrap(), 1);
    assert_eq!(Query::new("ledger.transaction").count(&db).unwrap(), 0);
    assert_eq!(Query::new("ledger.account").count(&db).unwrap(), 1);
}

#[test]
fn wire_round_trip_respects_private_and_readonly() {
    let db = test_fixtures::database();
    let user = Entity::new(db.registry(), "ledger.user", None).unwrap();
    user.set(&db, "username", "jan").unwrap();
    user.set(&db, "email", "jan@example.com").unwrap();
    user.set(&db, "password", "s3cret").unwrap();
    user.put(&db).unwrap();

    let exported = user.to_wire(&db, WireOptions::default()).unwrap();
    assert_eq!(exported["username"], "jan");
    assert_eq!(exported["email"], "jan@example.com");
    assert!(exported.get("password").is_none());
    assert!(exported["key"].is_string());

    let with_private = user
        .to_wire(
            &db,
            WireOptions {
                include_private: true,
            },
        )
        .unwrap();
    assert_eq!(with_private["password"], "s3cret");

    // Import path: build a fresh user from the exported map.
    let imported = Entity::create_from_wire(
        &db,
        "ledger.user",
        None,
        &serde_json::json!({"username": "copy", "email": "copy@example.com"}),
    )
    .unwrap();
    assert_eq!(imported.key().unwrap().name(), "copy");
    assert_eq!(
        imported.get(&db, "email").unwrap(),
        Value::Text("copy@example.com".to_string())
    );
}

#[test]
fn update_from_wire_validates_like_direct_assignment() {
    let db = test_fixtures::database();
    let user = Entity::new(db.registry(), "ledger.user", None).unwrap();
    user.set(&db, "username", "jan").unwrap();
    user.put(&db).unwrap();

    let err = user
        .update_from_wire(&db, &serde_json::json!({"email": "not-an-address"}))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validate(ValidateError::PatternNotMatched { .. })
    ));
}

#[test]
fn children_and_descendants_scope_queries() {
    let db = test_fixtures::database();
    let inst = Entity::new(db.registry(), "ledger.institution", None).unwrap();
    inst.set(&db, "inst_name", "First Bank").unwrap();
    inst.put(&db).unwrap();

    let account = Entity::new(
        db.registry(),
        "ledger.account",
        Some(&inst.key().unwrap()),
    )
    .unwrap();
    account.set(&db, "acc_name", "Nested").unwrap();
    account.put(&db).unwrap();

    let tx = Entity::new(
        db.registry(),
        "ledger.transaction",
        Some(&account.key().unwrap()),
    )
    .unwrap();
    tx.set(&db, "amt", 1.0).unwrap();
    tx.put(&db).unwrap();

    assert_eq!(inst.children("ledger.account").unwrap().count(&db).unwrap(), 1);
    assert_eq!(inst.children("ledger.transaction").unwrap().count(&db).unwrap(), 0);
    assert_eq!(
        inst.descendants("ledger.transaction").unwrap().count(&db).unwrap(),
        1
    );
}

#[test]
fn per_entity_acl_round_trips_through_storage() {
    let db = test_fixtures::database();
    let account = Entity::new(db.registry(), "ledger.account", None).unwrap();
    account.set(&db, "acc_name", "Shared").unwrap();
    account.set_permission("admin", "RUDQC");
    account.set_permission("owner", "RUDQ");
    account.put(&db).unwrap();
    let key = account.key().unwrap();

    let reloaded = db.get(&key).unwrap().unwrap();
    reloaded.load(&db).unwrap();
    assert_eq!(reloaded.permission("admin").as_deref(), Some("RUDQC"));
    assert_eq!(reloaded.permission("owner").as_deref(), Some("RUDQ"));
    assert_eq!(reloaded.permission("world"), None);
}
