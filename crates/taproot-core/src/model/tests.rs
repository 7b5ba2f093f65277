use crate::{
    model::{
        kind::KindDef,
        property::{PropertyDef, ValidateError, ValidatorDef},
        registry::{Registry, RegistryError},
    },
    schema::{COL_ACL, COL_CREATED, COL_KEY_NAME, COL_PARENT},
    test_fixtures,
    types::Datatype,
    value::Value,
};
use std::sync::Arc;

#[test]
fn duplicate_registration_is_rejected() {
    let registry = Registry::new();
    registry
        .register(KindDef::build("app.thing").property("name", PropertyDef::new(Datatype::Text)))
        .unwrap();
    let err = registry
        .register(KindDef::build("app.thing"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateKind(_)));
}

#[test]
fn resolution_prefers_exact_then_unique_suffix() {
    let registry = test_fixtures::registry();

    assert_eq!(
        registry.resolve_name("ledger.account").unwrap(),
        "ledger.account"
    );
    assert_eq!(registry.resolve_name("Account").unwrap(), "ledger.account");
    assert_eq!(
        registry.resolve_name("ledger/account").unwrap(),
        "ledger.account"
    );

    assert!(matches!(
        registry.resolve_name("widget"),
        Err(RegistryError::UnknownKind(_))
    ));
}

#[test]
fn ambiguous_suffix_is_reported() {
    let registry = Registry::new();
    registry
        .register(KindDef::build("billing.record"))
        .unwrap();
    registry
        .register(KindDef::build("audit.record"))
        .unwrap();
    assert!(matches!(
        registry.resolve_name("record"),
        Err(RegistryError::AmbiguousKind { .. })
    ));
}

#[test]
fn sealing_is_idempotent() {
    let registry = test_fixtures::registry();
    let first = registry.seal("ledger.transaction").unwrap();
    let second = registry.seal("ledger.transaction").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.properties().len(), second.properties().len());
}

#[test]
fn self_referencing_kind_seals() {
    let registry = Registry::new();
    registry
        .register(
            KindDef::build("tree.node")
                .property("name", PropertyDef::new(Datatype::Text).required())
                .property(
                    "next",
                    PropertyDef::new(Datatype::Reference("tree.node".to_string())),
                ),
        )
        .unwrap();
    let sealed = registry.seal("tree.node").unwrap();
    assert_eq!(sealed.properties().len(), 2);
    // And again, to prove the guard does not wedge.
    assert!(registry.seal("tree.node").is_ok());
}

#[test]
fn parent_cycle_is_a_sealing_error() {
    let registry = Registry::new();
    registry
        .register(KindDef::build("a.first").extends("a.second"))
        .unwrap();
    registry
        .register(KindDef::build("a.second").extends("a.first"))
        .unwrap();
    let err = registry.seal("a.first").unwrap_err();
    assert!(err.to_string().contains("sealing cycle"));
}

#[test]
fn inheritance_merges_stored_properties_in_order() {
    let registry = test_fixtures::registry();
    let transaction = registry.seal("ledger.transaction").unwrap();

    let names: Vec<&str> = transaction.properties().iter().map(|p| p.name()).collect();
    assert_eq!(
        names,
        vec!["date", "amt", "description", "category", "consolidated"]
    );

    // Sequence numbers follow merge order.
    let seqs: Vec<u32> = transaction.properties().iter().map(|p| p.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);
}

#[test]
fn inherited_descriptors_are_copies_not_aliases() {
    let registry = Registry::new();
    registry
        .register(
            KindDef::build("shape.base")
                .abstract_kind()
                .property("size", PropertyDef::new(Datatype::Integer)),
        )
        .unwrap();
    registry
        .register(
            KindDef::build("shape.bounded")
                .extends("shape.base")
                .property(
                    "size",
                    PropertyDef::new(Datatype::Integer)
                        .range(Some(Value::Int(0)), Some(Value::Int(10))),
                ),
        )
        .unwrap();

    let base = registry.seal("shape.base").unwrap();
    let bounded = registry.seal("shape.bounded").unwrap();

    let base_size = base.property("size").unwrap();
    let bounded_size = bounded.property("size").unwrap();
    assert!(base_size.validators.is_empty());
    assert!(
        bounded_size
            .validators
            .iter()
            .any(|v| matches!(v, ValidatorDef::Range { .. }))
    );
}

#[test]
fn abstract_kinds_carry_no_table() {
    let registry = test_fixtures::registry();
    let entry = registry.seal("ledger.entry").unwrap();
    assert!(entry.is_abstract());
    assert!(entry.table().is_none());
    assert_eq!(entry.properties().len(), 3);
}

#[test]
fn table_layout_includes_system_columns() {
    let registry = test_fixtures::registry();
    let account = registry.seal("ledger.account").unwrap();
    let table = account.table().unwrap();

    let names = table.column_names();
    assert!(names.contains(&COL_KEY_NAME));
    assert!(names.contains(&COL_PARENT));
    assert!(names.contains(&COL_ACL));
    assert!(names.contains(&COL_CREATED));
    assert!(names.contains(&"acc_name"));
    // The computed balance never owns a column.
    assert!(!names.contains(&"balance"));
}

#[test]
fn key_property_replaces_the_generated_key_column() {
    let registry = test_fixtures::registry();
    let user = registry.seal("ledger.user").unwrap();
    assert_eq!(user.key_property(), Some(&"username".to_string()));
    assert_eq!(user.key_column(), "username");

    let table = user.table().unwrap();
    assert!(!table.column_names().contains(&COL_KEY_NAME));
    assert!(!table.column_names().contains(&COL_PARENT));
    assert!(table.column("username").unwrap().is_key);
}

#[test]
fn subclass_enumeration_is_transitive() {
    let registry = test_fixtures::registry();
    let subs = registry.subclasses_of("ledger.entry").unwrap();
    assert!(subs.contains(&"ledger.transaction".to_string()));
    assert!(subs.contains(&"ledger.transfer".to_string()));
    assert!(!subs.contains(&"ledger.entry".to_string()));
}

#[test]
fn validator_chain_orders_required_first() {
    let prop_def = PropertyDef::new(Datatype::Text)
        .choices(vec![Value::Text("a".to_string()), Value::Text("b".to_string())])
        .required();
    let mut prop = prop_def;
    let mut seq = 0;
    prop.attach("flavor", &mut seq);

    // Null fails the required check, not the choices check, even though
    // choices was registered first.
    let err = prop.validate(&Value::Null).unwrap_err();
    assert!(matches!(err, ValidateError::PropertyRequired(_)));

    let err = prop.validate(&Value::Text("c".to_string())).unwrap_err();
    assert!(matches!(err, ValidateError::InvalidChoice { .. }));

    assert!(prop.validate(&Value::Text("a".to_string())).is_ok());
}

#[test]
fn range_and_pattern_validators() {
    let mut seq = 0;

    let mut amount = PropertyDef::new(Datatype::Float)
        .range(Some(Value::Float(0.0)), Some(Value::Float(100.0)));
    amount.attach("amount", &mut seq);
    assert!(amount.validate(&Value::Float(50.0)).is_ok());
    assert!(matches!(
        amount.validate(&Value::Float(-1.0)),
        Err(ValidateError::OutOfRange { .. })
    ));

    let mut code = PropertyDef::new(Datatype::Text).pattern("^[A-Z]{3}$");
    code.attach("code", &mut seq);
    assert!(code.validate(&Value::Text("CAD".to_string())).is_ok());
    assert!(matches!(
        code.validate(&Value::Text("cad".to_string())),
        Err(ValidateError::PatternNotMatched { .. })
    ));
    // Null and empty text pass; required-ness is a separate validator.
    assert!(code.validate(&Value::Null).is_ok());
    assert!(code.validate(&Value::Text(String::new())).is_ok());
}

#[test]
fn schema_json_skips_private_properties() {
    let registry = test_fixtures::registry();
    let user = registry.seal("ledger.user").unwrap();
    let schema = user.schema_json();

    assert_eq!(schema["kind"], "ledger.user");
    assert_eq!(schema["flat"], true);
    let names: Vec<&str> = schema["properties"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"username"));
    assert!(!names.contains(&"password"));
}

#[test]
fn seal_all_is_a_startup_safety_net() {
    let registry = test_fixtures::registry();
    registry.seal_all().unwrap();
    assert!(registry.seal("ledger.transfer").is_ok());
}
