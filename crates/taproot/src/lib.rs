//! taproot — a hierarchical-key entity mapping and query-compilation
//! engine over SQLite.
//!
//! ## Crate layout
//! - `core`: keys, values, converters, the property system, the kind
//!   registry, the query AST and SQL renderer, and the transactional
//!   entity store.
//! - `base`: ready-made property constructors and compound properties for
//!   schema modules.
//!
//! The `prelude` module mirrors the surface a schema module and its
//! callers use.

pub use taproot_core as core;

pub mod base;

/// Workspace version re-export for downstream tooling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use taproot_core::{Error, Result};

///
/// Prelude
///

pub mod prelude {
    pub use crate::base;
    pub use taproot_core::prelude::*;
}
