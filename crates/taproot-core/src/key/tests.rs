use crate::{key::Key, key::KeyError, test_fixtures};
use proptest::prelude::*;

#[test]
fn canonical_form_is_stable_and_parseable() {
    let registry = test_fixtures::registry();
    let root = Key::new(&registry, "ledger.institution", None, "First Bank").unwrap();
    let account = Key::new(&registry, "ledger.account", Some(root.clone()), "Chequing").unwrap();

    assert_eq!(
        root.to_string(),
        "ledger.institution:First%20Bank"
    );
    assert_eq!(
        account.to_string(),
        "ledger.institution:First%20Bank/ledger.account:Chequing"
    );

    let reparsed = Key::parse(&registry, &account.to_string()).unwrap();
    assert_eq!(reparsed, account);
}

#[test]
fn id_form_round_trips() {
    let registry = test_fixtures::registry();
    let key = Key::new(&registry, "ledger.category", None, "Groceries & Household").unwrap();
    let id = key.id();
    assert_ne!(id, key.to_string());

    let reparsed = Key::parse(&registry, &id).unwrap();
    assert_eq!(reparsed, key);
}

#[test]
fn suffix_kind_names_resolve_during_construction() {
    let registry = test_fixtures::registry();
    let key = Key::new(&registry, "category", None, "Utilities").unwrap();
    assert_eq!(key.kind(), "ledger.category");
    assert_eq!(key.basekind(), "category");
}

#[test]
fn equality_is_structural() {
    let registry = test_fixtures::registry();
    let parent = Key::new(&registry, "ledger.category", None, "Expenses").unwrap();
    let a = Key::new(&registry, "ledger.category", Some(parent.clone()), "Food").unwrap();
    let b = Key::new(&registry, "ledger.category", Some(parent.clone()), "Food").unwrap();
    assert_eq!(a, b);

    let other_name = Key::new(&registry, "ledger.category", Some(parent.clone()), "Rent").unwrap();
    assert_ne!(a, other_name);

    let other_kind = Key::new(&registry, "ledger.account", Some(parent), "Food").unwrap();
    assert_ne!(a, other_kind);

    let other_scope = Key::new(&registry, "ledger.category", None, "Food").unwrap();
    assert_ne!(a, other_scope);
}

#[test]
fn ancestors_are_root_first() {
    let registry = test_fixtures::registry();
    let root = Key::new(&registry, "ledger.category", None, "a").unwrap();
    let mid = Key::new(&registry, "ledger.category", Some(root.clone()), "b").unwrap();
    let leaf = Key::new(&registry, "ledger.category", Some(mid.clone()), "c").unwrap();

    assert_eq!(leaf.ancestors(), vec![root.clone(), mid]);
    assert_eq!(leaf.root(), &root);
    assert!(root.ancestors().is_empty());
    assert_eq!(root.root(), &root);
}

#[test]
fn empty_name_is_rejected() {
    let registry = test_fixtures::registry();
    let err = Key::new(&registry, "ledger.category", None, "").unwrap_err();
    assert!(matches!(err, KeyError::EmptyName));
}

#[test]
fn unknown_kind_is_rejected() {
    let registry = test_fixtures::registry();
    assert!(Key::new(&registry, "ledger.widget", None, "x").is_err());
    assert!(Key::parse(&registry, "ledger.widget:x").is_err());
}

#[test]
fn malformed_input_is_rejected_without_panicking() {
    let registry = test_fixtures::registry();
    for input in ["", "no-colon", "kind:", ":name", "a:b//c:d"] {
        assert!(
            Key::parse(&registry, input).is_err(),
            "expected '{input}' to be rejected"
        );
    }
}

#[test]
fn escaped_names_cannot_smuggle_delimiters() {
    let registry = test_fixtures::registry();
    let tricky = Key::new(&registry, "ledger.category", None, "a/b:c%d").unwrap();
    // The raw delimiters never appear unescaped in the canonical form.
    let canonical = tricky.to_string();
    assert_eq!(canonical.matches(':').count(), 1);
    assert!(!canonical["ledger.category:".len()..].contains('/'));

    let reparsed = Key::parse(&registry, &canonical).unwrap();
    assert_eq!(reparsed.name(), "a/b:c%d");
    assert_eq!(reparsed, tricky);
}

proptest! {
    /// parse(to_string(new(kind, scope, name))) == new(kind, scope, name)
    /// for arbitrary name chains.
    #[test]
    fn round_trip_law(names in proptest::collection::vec(".{1,24}", 1..4)) {
        let registry = test_fixtures::registry();
        let mut key: Option<Key> = None;
        for name in &names {
            key = Some(
                Key::new(&registry, "ledger.category", key.take(), name)
                    .expect("non-empty names construct"),
            );
        }
        let key = key.expect("at least one segment");

        let via_canonical = Key::parse(&registry, &key.to_string()).unwrap();
        prop_assert_eq!(&via_canonical, &key);

        let via_id = Key::parse(&registry, &key.id()).unwrap();
        prop_assert_eq!(&via_id, &key);
    }
}
