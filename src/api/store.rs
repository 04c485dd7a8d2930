//! Purpose: The tabular store: one CSV-backed table loaded eagerly, mutated in memory, saved on request.
//! Exports: `Store`, `StoreOptions`.
//! Role: Public entry point composing the codec (load/save) with the table engine (query/mutate).
//! Invariants: Only `open*` and `save*` touch the filesystem; everything else is in-memory.
//! Invariants: A failed mutation or save leaves the in-memory table unchanged.
//! Invariants: The index column is advisory; duplicates are logged, never rejected.
//! Invariants: Single owner, single thread; callers serialize access themselves.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::core::codec::{self, LoadOptions, SaveOptions};
use crate::core::error::{Error, ErrorKind};
use crate::core::row::Row;
use crate::core::table::{All, Predicate, SchemaPolicy, Table, Updates};
use crate::core::value::Value;

#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    pub load: LoadOptions,
    pub schema_policy: SchemaPolicy,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index_column(mut self, column: impl Into<String>) -> Self {
        self.load = self.load.with_index_column(column);
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.load = self.load.with_create_if_missing(create);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.load = self.load.with_delimiter(delimiter);
        self
    }

    pub fn with_infer_types(mut self, infer: bool) -> Self {
        self.load = self.load.with_infer_types(infer);
        self
    }

    pub fn with_schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }
}

#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    options: StoreOptions,
    table: Table,
}

impl Store {
    /// Loads `path` with default options; a missing file is `NotFound`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(path, StoreOptions::new())
    }

    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let table = codec::load(&path, &options.load)?;

        if let Some(index) = &options.load.index_column {
            if !table.schema().is_empty() && !table.schema().contains(index) {
                return Err(Error::new(ErrorKind::UnknownColumn)
                    .with_message("index column is not in the header")
                    .with_column(index.clone())
                    .with_path(&path));
            }
        }

        let store = Self {
            path,
            options,
            table,
        };
        let (rows, columns) = store.shape();
        tracing::info!(path = %store.path.display(), rows, columns, "loaded table");
        store.warn_duplicate_index();
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[String] {
        self.table.schema().columns()
    }

    pub fn index_column(&self) -> Option<&str> {
        self.options.load.index_column.as_deref()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.table.len(), self.table.schema().len())
    }

    /// Rows matching `predicate`, in table order. Never fails; no match is empty.
    pub fn query<P: Predicate + ?Sized>(&self, predicate: &P) -> Vec<Row> {
        self.table.query(predicate)
    }

    pub fn query_all(&self) -> Vec<Row> {
        self.table.query(&All)
    }

    /// Like [`Store::query`], keeping only `columns` in the order given.
    /// Columns the table does not have are skipped with a warning.
    pub fn query_columns<P: Predicate + ?Sized>(&self, predicate: &P, columns: &[&str]) -> Vec<Row> {
        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|name| !self.table.schema().contains(name))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "ignoring columns not in the table");
        }
        self.table.query_columns(predicate, columns)
    }

    /// First row whose index column equals `key`; `None` without an index column.
    pub fn get(&self, key: &Value) -> Option<Row> {
        let index = self.index_column()?;
        self.table
            .rows()
            .find(|row| row.get(index) == Some(key))
            .map(|row| row.to_row())
    }

    /// Appends `row`. Missing columns become `Null`; unknown columns follow
    /// the insert side of the schema policy.
    pub fn add_row(&mut self, row: Row) -> Result<(), Error> {
        if let Some(key) = self.index_column().and_then(|index| row.get(index)) {
            if !key.is_null() && self.get(key).is_some() {
                tracing::warn!(key = %key, "added row duplicates an existing index value");
            }
        }
        self.table
            .add_row(row, self.options.schema_policy.insert)
            .map_err(|err| err.with_path(&self.path))?;
        tracing::debug!(rows = self.table.len(), "row added");
        Ok(())
    }

    /// Applies `updates` to matching rows; returns how many matched.
    pub fn update_data<P: Predicate + ?Sized>(
        &mut self,
        predicate: &P,
        updates: &Updates,
    ) -> Result<usize, Error> {
        let count = self
            .table
            .update(predicate, updates, self.options.schema_policy.update)
            .map_err(|err| err.with_path(&self.path))?;
        tracing::debug!(count, "rows updated");
        Ok(count)
    }

    /// Removes matching rows; returns how many were removed.
    pub fn delete_rows<P: Predicate + ?Sized>(&mut self, predicate: &P) -> usize {
        let count = self.table.delete(predicate);
        tracing::debug!(count, rows = self.table.len(), "rows deleted");
        count
    }

    /// Overwrites the backing file with the current table.
    pub fn save_changes(&self, options: &SaveOptions) -> Result<(), Error> {
        self.save_as(&self.path, options)
    }

    /// Writes the current table to `path`; the backing path is unchanged.
    pub fn save_as(&self, path: impl AsRef<Path>, options: &SaveOptions) -> Result<(), Error> {
        let path = path.as_ref();
        codec::save(&self.table, path, self.options.load.delimiter, options)?;
        tracing::info!(path = %path.display(), rows = self.table.len(), "saved table");
        Ok(())
    }

    fn warn_duplicate_index(&self) {
        let Some(index) = self.index_column() else {
            return;
        };
        let mut seen = HashSet::new();
        let duplicates = self
            .table
            .rows()
            .filter_map(|row| row.get(index))
            .filter(|value| !value.is_null())
            .filter(|value| !seen.insert(value.render()))
            .count();
        if duplicates > 0 {
            tracing::warn!(column = index, duplicates, "index column has duplicate values");
        }
    }
}
