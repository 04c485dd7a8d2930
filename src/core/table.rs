// In-memory table: schema, row storage, and the select/mutate engine.
//
// Rows are addressed positionally. Every mutation validates its input and
// computes all new cells before touching storage, so a failed call leaves the
// table exactly as it was.
use std::fmt;

use crate::core::error::{Error, ErrorKind};
use crate::core::row::{Row, RowView};
use crate::core::value::Value;

/// Row selector. Implemented for any `Fn(&RowView) -> bool`.
pub trait Predicate {
    fn matches(&self, row: &RowView<'_>) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&RowView<'_>) -> bool,
{
    fn matches(&self, row: &RowView<'_>) -> bool {
        self(row)
    }
}

/// Selects every row.
#[derive(Clone, Copy, Debug, Default)]
pub struct All;

impl Predicate for All {
    fn matches(&self, _row: &RowView<'_>) -> bool {
        true
    }
}

/// Computes a new cell value from the row as it was before the update began.
/// Implemented for any `Fn(&RowView) -> Value`.
pub trait Compute {
    fn compute(&self, row: &RowView<'_>) -> Result<Value, Error>;
}

impl<F> Compute for F
where
    F: Fn(&RowView<'_>) -> Value,
{
    fn compute(&self, row: &RowView<'_>) -> Result<Value, Error> {
        Ok(self(row))
    }
}

pub enum Update {
    Literal(Value),
    Computed(Box<dyn Compute>),
}

impl Update {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn computed(compute: impl Compute + 'static) -> Self {
        Self::Computed(Box::new(compute))
    }

    fn evaluate(&self, row: &RowView<'_>) -> Result<Value, Error> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Computed(compute) => compute.compute(row),
        }
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<Value> for Update {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// Column assignments for one `update` call, applied in insertion order.
/// Setting the same column twice keeps the last assignment.
#[derive(Debug, Default)]
pub struct Updates {
    entries: Vec<(String, Update)>,
}

impl Updates {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, Update::literal(value));
        self
    }

    pub fn compute<F>(mut self, column: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&RowView<'_>) -> Value + 'static,
    {
        self.insert(column, Update::computed(compute));
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, update: Update) {
        let column = column.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = update,
            None => self.entries.push((column, update)),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a mutation does with a column the schema does not know.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnknownColumns {
    /// Append the column to the schema and backfill `Null` into existing rows.
    Extend,
    /// Fail the whole call.
    Reject,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchemaPolicy {
    /// Unknown keys in `add_row`; rejection is a `SchemaMismatch`.
    pub insert: UnknownColumns,
    /// Unknown columns in `update`; rejection is an `UnknownColumn`.
    pub update: UnknownColumns,
}

impl SchemaPolicy {
    pub fn new() -> Self {
        Self {
            insert: UnknownColumns::Extend,
            update: UnknownColumns::Reject,
        }
    }

    pub fn strict() -> Self {
        Self {
            insert: UnknownColumns::Reject,
            update: UnknownColumns::Reject,
        }
    }

    pub fn lenient() -> Self {
        Self {
            insert: UnknownColumns::Extend,
            update: UnknownColumns::Extend,
        }
    }
}

impl Default for SchemaPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered, duplicate-free column names.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    pub fn new<I, S>(columns: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Self::default();
        for column in columns {
            let column = column.into();
            if schema.contains(&column) {
                return Err(Error::new(ErrorKind::MalformedInput)
                    .with_message("duplicate column name")
                    .with_column(column));
            }
            schema.columns.push(column);
        }
        Ok(schema)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Every row must already be as wide as the schema.
    pub(crate) fn from_parts(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == schema.len()));
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<RowView<'_>> {
        self.rows
            .get(idx)
            .map(|values| RowView::new(self.schema.columns(), values))
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        let columns = self.schema.columns();
        self.rows
            .iter()
            .map(move |values| RowView::new(columns, values))
    }

    /// Matching rows in table order.
    pub fn query<P: Predicate + ?Sized>(&self, predicate: &P) -> Vec<Row> {
        self.rows()
            .filter(|row| predicate.matches(row))
            .map(|row| row.to_row())
            .collect()
    }

    /// Like [`Table::query`], projected onto `columns` in the requested order.
    /// Columns outside the schema are left out of the result.
    pub fn query_columns<P: Predicate + ?Sized>(&self, predicate: &P, columns: &[&str]) -> Vec<Row> {
        let positions: Vec<(&str, usize)> = columns
            .iter()
            .filter_map(|name| self.schema.position(name).map(|idx| (*name, idx)))
            .collect();
        self.rows
            .iter()
            .filter(|values| predicate.matches(&RowView::new(self.schema.columns(), values)))
            .map(|values| {
                positions
                    .iter()
                    .map(|(name, idx)| (*name, values[*idx].clone()))
                    .collect()
            })
            .collect()
    }

    /// Appends `row`. Columns the row omits are filled with `Null`; columns the
    /// schema lacks are handled per `unknown`. A table without columns takes
    /// its schema from the first row regardless of policy.
    pub fn add_row(&mut self, row: Row, unknown: UnknownColumns) -> Result<(), Error> {
        let new_columns: Vec<&str> = row
            .columns()
            .filter(|name| !self.schema.contains(name))
            .collect();
        if !new_columns.is_empty() && !self.schema.is_empty() && unknown == UnknownColumns::Reject
        {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message(format!(
                    "row has columns not in the table: {}",
                    new_columns.join(", ")
                ))
                .with_column(new_columns[0]));
        }
        if self.schema.is_empty() && new_columns.is_empty() {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message("row establishes no columns for an empty table"));
        }
        let new_columns: Vec<String> = new_columns.into_iter().map(str::to_string).collect();
        self.extend_schema(new_columns);

        let values = self
            .schema
            .columns()
            .iter()
            .map(|name| row.get(name).cloned().unwrap_or_default())
            .collect();
        self.rows.push(values);
        Ok(())
    }

    /// Applies `updates` to every row matching `predicate`; returns the match count.
    ///
    /// Predicates and computed values all see rows as they were before this
    /// call, so a computed column never observes a sibling's new value.
    pub fn update<P: Predicate + ?Sized>(
        &mut self,
        predicate: &P,
        updates: &Updates,
        unknown: UnknownColumns,
    ) -> Result<usize, Error> {
        let new_columns: Vec<String> = updates
            .columns()
            .filter(|name| !self.schema.contains(name))
            .map(str::to_string)
            .collect();
        if let Some(first) = new_columns.first() {
            if unknown == UnknownColumns::Reject {
                return Err(Error::new(ErrorKind::UnknownColumn)
                    .with_message(format!("update references unknown column `{first}`"))
                    .with_column(first.clone()));
            }
        }

        let mut staged: Vec<(usize, Vec<Value>)> = Vec::new();
        for (idx, row) in self.rows().enumerate() {
            if !predicate.matches(&row) {
                continue;
            }
            let cells = updates
                .entries
                .iter()
                .map(|(column, update)| {
                    update
                        .evaluate(&row)
                        .map_err(|err| err.with_column(column.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            staged.push((idx, cells));
        }

        self.extend_schema(new_columns);
        let targets: Vec<usize> = updates
            .columns()
            .map(|name| self.schema.position(name))
            .collect::<Option<_>>()
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("update column missing after extend")
            })?;
        let count = staged.len();
        for (idx, cells) in staged {
            let row = &mut self.rows[idx];
            for (target, cell) in targets.iter().zip(cells) {
                row[*target] = cell;
            }
        }
        Ok(count)
    }

    /// Removes every row matching `predicate`, keeping survivors in order.
    pub fn delete<P: Predicate + ?Sized>(&mut self, predicate: &P) -> usize {
        let before = self.rows.len();
        let columns = self.schema.columns();
        self.rows
            .retain(|values| !predicate.matches(&RowView::new(columns, values)));
        before - self.rows.len()
    }

    fn extend_schema(&mut self, columns: Vec<String>) {
        if columns.is_empty() {
            return;
        }
        let added = columns.len();
        self.schema.columns.extend(columns);
        for row in &mut self.rows {
            row.extend(std::iter::repeat_n(Value::Null, added));
        }
    }
}
