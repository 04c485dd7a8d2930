//! Purpose: Library crate behind the `csvtable` CLI: a CSV file as a queryable, mutable table.
//! Exports: `api` (stable surface), `core` (table engine, codec, errors), `where_expr` (jq predicates).
//! Role: Load once, query and mutate in memory, save explicitly.
//! Invariants: Only load and save perform I/O; mutations are all-or-nothing.
//! Invariants: Prefer `api` paths; `core` layout may change between releases.
pub mod api;
pub mod core;
pub mod where_expr;
