//! Fetched rows with positional and named access.

use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::error::{Error, Result};
use super::value::{FromValue, Value};

/// Column layout shared by every row of one result set.
#[derive(Debug, PartialEq)]
pub struct RowLayout {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl RowLayout {
    pub fn new(names: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(names.len());
        // First occurrence wins for duplicated result names (e.g. joins).
        for (i, name) in names.iter().enumerate() {
            index.entry(name.clone()).or_insert(i);
        }
        Self { names, index }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Anything that can address a column of a [`Row`].
pub trait ColumnIndex {
    fn position(&self, layout: &RowLayout) -> Option<usize>;
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn position(&self, layout: &RowLayout) -> Option<usize> {
        (*self < layout.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("#{self}")
    }
}

impl ColumnIndex for &str {
    fn position(&self, layout: &RowLayout) -> Option<usize> {
        layout.position(self)
    }

    fn describe(&self) -> String {
        (*self).to_string()
    }
}

/// A read-only record produced by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    layout: Arc<RowLayout>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(layout: Arc<RowLayout>, values: Vec<Value>) -> Self {
        Self { layout, values }
    }

    pub(crate) fn from_sqlite(layout: &Arc<RowLayout>, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(layout.len());
        for i in 0..layout.len() {
            values.push(Value::from(row.get_ref(i)?));
        }
        Ok(Self::new(Arc::clone(layout), values))
    }

    pub fn columns(&self) -> &[String] {
        self.layout.names()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&Value> {
        self.layout.position(name).map(|i| &self.values[i])
    }

    /// Typed access by position or by column name.
    pub fn get_as<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T> {
        let column = index.describe();
        let value = index
            .position(&self.layout)
            .map(|i| &self.values[i])
            .ok_or_else(|| Error::UnknownColumn {
                table: String::from("<row>"),
                column: column.clone(),
            })?;
        T::from_value(value).ok_or(Error::Conversion {
            column,
            expected: T::EXPECTED,
            found: value.type_name(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.layout
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.by_name(name) {
            Some(value) => value,
            None => panic!("no column named '{name}' in row"),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Maps a fetched row onto a caller-defined type.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

/// Turns a caller-defined type into named column values for writing.
pub trait ToRow {
    fn to_row(&self) -> Vec<(String, Value)>;
}

impl ToRow for Row {
    fn to_row(&self) -> Vec<(String, Value)> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

impl ToRow for [(&str, Value)] {
    fn to_row(&self) -> Vec<(String, Value)> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Row {
        let layout = Arc::new(RowLayout::new(vec!["ID".into(), "name".into(), "age".into()]));
        Row::new(layout, vec![Value::Integer(1), Value::Text("Ada".into()), Value::Integer(30)])
    }

    #[test]
    fn positional_and_named_access_agree() {
        let row = person();
        assert_eq!(row[1], row["name"]);
        assert_eq!(row.get(2), row.by_name("age"));
        assert_eq!(row.get_as::<i64, _>("age").unwrap(), 30);
        assert_eq!(row.get_as::<String, _>(1).unwrap(), "Ada");
    }

    #[test]
    fn typed_access_reports_conversion_and_missing_columns() {
        let row = person();
        assert!(matches!(
            row.get_as::<String, _>("age"),
            Err(Error::Conversion { expected: "TEXT", found: "INTEGER", .. })
        ));
        assert!(matches!(
            row.get_as::<i64, _>("email"),
            Err(Error::UnknownColumn { .. })
        ));
        assert!(row.by_name("email").is_none());
        assert!(row.get(3).is_none());
    }

    #[test]
    fn rows_write_back_as_named_fields() {
        let fields = person().to_row();
        assert_eq!(fields[0], ("ID".to_string(), Value::Integer(1)));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn serializes_as_ordered_map() {
        let json = serde_json::to_string(&person()).unwrap();
        assert_eq!(json, r#"{"ID":1,"name":"Ada","age":30}"#);
    }
}
