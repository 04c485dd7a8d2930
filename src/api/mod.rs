//! Purpose: Define the stable public Rust API boundary for csvtable.
//! Exports: The store, its options, rows/values, predicates, updates, and errors.
//! Role: Public, additive-only surface; callers should not need `core` paths.
//! Invariants: Everything a caller needs to load, query, mutate, and save is re-exported here.

mod store;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::codec::{LoadOptions, SaveOptions};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::row::{Row, RowView};
pub use crate::core::table::{
    All, Compute, Predicate, Schema, SchemaPolicy, Table, UnknownColumns, Update, Updates,
};
pub use crate::core::value::Value;
pub use crate::where_expr::{ExprUpdate, WhereClause, WherePredicate, compile_where_clause};
pub use store::{Store, StoreOptions};
