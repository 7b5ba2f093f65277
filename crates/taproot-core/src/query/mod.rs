pub mod ast;
pub(crate) mod render;
#[cfg(test)]
mod tests;

pub use ast::{Aggregate, AggregateFunc, CompareOp, Filter, Join, JoinType, Query, Sort, Synthetic};
pub use render::{QueryMode, RenderedQuery};

use thiserror::Error as ThisError;

///
/// QueryError
///
/// AST inconsistencies detected at render time. Scope conflicts are
/// unrepresentable in the AST itself (scoping is a sum type); everything
/// else surfaces here.
///

#[derive(Debug, ThisError)]
pub enum QueryError {
    #[error("column '{0}' does not exist on any target kind")]
    UnknownColumn(String),

    #[error("aggregates reference more than one group-by kind: '{0}' and '{1}'")]
    MixedGroupBy(String, String),

    #[error("group-by kind '{0}' is not joined into the query")]
    GroupByNotJoined(String),

    #[error("cannot scope flat kind '{kind}' by {scope}")]
    FlatScope { kind: String, scope: &'static str },

    #[error("query resolves to no concrete kinds for '{0}'")]
    NoConcreteKinds(String),

    #[error("reference filter value '{0}' is not a key")]
    ReferenceFilterValue(String),

    #[error("aggregate queries produce rows, not entities; fetch rows instead")]
    AggregateRows,
}
