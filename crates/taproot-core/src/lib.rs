//! Core runtime for taproot: hierarchical keys, typed properties with
//! converters and validators, the kind registry with schema sealing, the
//! declarative query AST and its SQL renderer, and the transaction-scoped
//! entity store over SQLite.

pub mod convert;
pub mod db;
pub mod entity;
pub mod error;
pub mod key;
pub mod model;
pub mod query;
pub mod schema;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use error::{Error, Result};

///
/// Prelude
///
/// The vocabulary a schema module and its callers need; executors,
/// renderers, and converter internals stay out.
///

pub mod prelude {
    pub use crate::{
        db::{Database, DbConfig, Row, Tx},
        entity::{Entity, WireOptions},
        error::{Error, Result},
        key::Key,
        model::{
            ComputedProperty, DeleteHook, KindDef, PropertyDef, Registry, Validate,
        },
        query::{Aggregate, AggregateFunc, CompareOp, Join, JoinType, Query},
        types::{Datatype, EnumDef},
        value::Value,
    };
}
