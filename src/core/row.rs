// Owned rows handed to and returned from the store, plus the borrowed view predicates see.
use std::ops::Index;

use serde_json::{Map, Value as JsonValue};

use crate::core::value::Value;

static NULL: Value = Value::Null;

/// An ordered mapping from column name to value.
///
/// Column order matters: the first row added to a table without columns
/// establishes the schema in this order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder form of [`Row::insert`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Sets `column`, keeping its original position if it was already present.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((column, value));
                None
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        fields_to_json(self.iter())
    }

    /// Builds a row from a JSON object, keeping key order.
    pub fn from_json(object: &Map<String, JsonValue>) -> Self {
        object
            .iter()
            .map(|(name, value)| (name.clone(), Value::from_json(value)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl Index<&str> for Row {
    type Output = Value;

    /// Unknown columns read as `Null`.
    fn index(&self, column: &str) -> &Value {
        self.get(column).unwrap_or(&NULL)
    }
}

/// Read-only view of one stored row, as seen by predicates and computed updates.
#[derive(Clone, Copy, Debug)]
pub struct RowView<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    pub(crate) fn new(columns: &'a [String], values: &'a [Value]) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|idx| &self.values[idx])
    }

    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + use<'a> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn to_row(&self) -> Row {
        Row {
            fields: self
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        fields_to_json(self.iter())
    }
}

impl<'a> Index<&str> for RowView<'a> {
    type Output = Value;

    fn index(&self, column: &str) -> &Value {
        self.get(column).unwrap_or(&NULL)
    }
}

fn fields_to_json<'a>(fields: impl Iterator<Item = (&'a str, &'a Value)>) -> JsonValue {
    let mut object = Map::new();
    for (name, value) in fields {
        object.insert(name.to_string(), value.to_json());
    }
    JsonValue::Object(object)
}
