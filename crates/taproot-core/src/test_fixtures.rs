//! Shared ledger schema used across the crate's tests: a small
//! institution/account/category/transaction hierarchy with inheritance,
//! an enum, a reference, a computed balance, and a delete hook.

use crate::{
    db::Database,
    entity::Entity,
    error::Error,
    model::{
        kind::{DeleteHook, KindDef},
        property::{ComputedProperty, PropertyDef},
        registry::Registry,
    },
    query::{Aggregate, Query},
    types::{Datatype, EnumDef},
    value::{StorageValue, Value},
};
use std::sync::Arc;

/// Balance of an account: SUM over the amounts of its child transactions.
#[derive(Debug)]
pub(crate) struct AccountBalance;

impl ComputedProperty for AccountBalance {
    fn get(&self, instance: &Entity, db: &Database) -> Result<Value, Error> {
        if instance.is_new() {
            return Ok(Value::Float(0.0));
        }
        let mut query = instance.children("ledger.transaction")?;
        query.add_aggregate(Aggregate::new("amt", "balance").default(0.0));
        let balance = query
            .singleton(db)?
            .and_then(|v| StorageValue::as_f64(&v))
            .unwrap_or(0.0);
        Ok(Value::Float(balance))
    }
}

/// Accounts named "locked" refuse deletion; everything else cascades to
/// its child transactions first.
#[derive(Debug)]
pub(crate) struct AccountDelete;

impl DeleteHook for AccountDelete {
    fn on_delete(&self, instance: &Entity, db: &Database) -> Result<bool, Error> {
        if instance.get(db, "acc_name")?.as_str() == Some("locked") {
            return Ok(false);
        }
        let mut children = Query::new("ledger.transaction");
        children.set_parent(Some(instance.key()?));
        children.delete(db)?;
        Ok(true)
    }
}

pub(crate) fn registry() -> Arc<Registry> {
    let registry = Registry::new();
    let status_enum = EnumDef::new(
        "account_status",
        vec![
            ("open", Value::Int(0)),
            ("closed", Value::Int(1)),
            ("frozen", Value::Int(2)),
        ],
    );

    registry
        .register(
            KindDef::build("ledger.institution")
                .property("inst_name", PropertyDef::new(Datatype::Text).required().label())
                .property("description", PropertyDef::new(Datatype::Text)),
        )
        .expect("register institution");

    registry
        .register(
            KindDef::build("ledger.account")
                .property(
                    "acc_name",
                    PropertyDef::new(Datatype::Text)
                        .required()
                        .label()
                        .verbose_name("Account name"),
                )
                .property("acc_nr", PropertyDef::new(Datatype::Text))
                .property(
                    "currency",
                    PropertyDef::new(Datatype::Text).default_value("CAD"),
                )
                .property(
                    "status",
                    PropertyDef::new(Datatype::Enum(status_enum)).default_value("open"),
                )
                .property(
                    "balance",
                    PropertyDef::new(Datatype::Float)
                        .readonly()
                        .computed(Arc::new(AccountBalance)),
                )
                .on_delete(Arc::new(AccountDelete)),
        )
        .expect("register account");

    registry
        .register(
            KindDef::build("ledger.category")
                .property("cat_name", PropertyDef::new(Datatype::Text).required().label()),
        )
        .expect("register category");

    registry
        .register(
            KindDef::build("ledger.entry")
                .abstract_kind()
                .property("date", PropertyDef::new(Datatype::Date))
                .property(
                    "amt",
                    PropertyDef::new(Datatype::Float)
                        .verbose_name("Amount")
                        .default_value(0.0),
                )
                .property("description", PropertyDef::new(Datatype::Text)),
        )
        .expect("register entry");

    registry
        .register(
            KindDef::build("ledger.transaction")
                .extends("ledger.entry")
                .property(
                    "category",
                    PropertyDef::new(Datatype::Reference("ledger.category".to_string())),
                )
                .property("consolidated", PropertyDef::new(Datatype::Boolean)),
        )
        .expect("register transaction");

    registry
        .register(
            KindDef::build("ledger.transfer")
                .extends("ledger.transaction")
                .property(
                    "counter",
                    PropertyDef::new(Datatype::Reference("ledger.account".to_string())),
                ),
        )
        .expect("register transfer");

    registry
        .register(
            KindDef::build("ledger.user")
                .flat()
                .property("username", PropertyDef::new(Datatype::Text).required().key())
                .property(
                    "email",
                    PropertyDef::new(Datatype::Text).pattern(r"^[^@\s]+@[^@\s]+$"),
                )
                .property("password", PropertyDef::new(Datatype::Text).private()),
        )
        .expect("register user");

    Arc::new(registry)
}

fn init_logging() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub(crate) fn database() -> Database {
    init_logging();
    let db = Database::in_memory(registry()).expect("open in-memory database");
    db.set_user(Some("tester"));
    db
}
