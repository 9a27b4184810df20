//! Table metadata and the per-table proxy bound to a context.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::context::{Cursor, ExecutionContext};
use super::error::{Error, Result};
use super::query::{build_insert, build_insert_positional, is_identifier, Query, QueryOperator, Select};
use super::row::{FromRow, Row, ToRow};
use super::value::{Params, Value};

/// Registered tables by name.
pub type Catalog = BTreeMap<String, Arc<TableSchema>>;

/// Static description of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<String>,
    id_cols: Vec<String>,
    aliases: Vec<String>,
}

impl TableSchema {
    pub fn new<C, I, S, T>(name: impl Into<String>, columns: C, id_cols: I) -> Self
    where
        C: IntoIterator<Item = S>,
        I: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            id_cols: id_cols.into_iter().map(Into::into).collect(),
            aliases: Vec::new(),
        }
    }

    /// Also register the table under `alias`.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared columns in order. Empty means the table accepts any column.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn id_cols(&self) -> &[String] {
        &self.id_cols
    }

    /// The single identifier column, if exactly one is declared. Positional
    /// inserts may omit it when it aliases the rowid.
    pub fn auto_id(&self) -> Option<&str> {
        match self.id_cols.as_slice() {
            [id] => Some(id),
            _ => None,
        }
    }

    /// Columns that are not identifier columns, in declared order.
    pub fn data_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !self.id_cols.contains(c))
            .map(String::as_str)
            .collect()
    }

    pub fn check_column(&self, column: &str) -> Result<()> {
        if self.columns.is_empty() || self.columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(Error::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
        }
    }

    /// Problems strict mode warns about.
    pub fn design_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !is_identifier(column) {
                issues.push(format!("column '{column}' is not a plain identifier"));
            }
            if !seen.insert(column.as_str()) {
                issues.push(format!("column '{column}' is declared twice"));
            }
        }
        for id in &self.id_cols {
            if !self.columns.is_empty() && !self.columns.contains(id) {
                issues.push(format!("id column '{id}' is not a declared column"));
            }
        }
        issues
    }
}

/// Convenience view of one table through one execution context.
///
/// Borrowed from the context; it never owns the connection.
#[derive(Debug, Clone)]
pub struct TableProxy<'c> {
    schema: Arc<TableSchema>,
    ctx: &'c ExecutionContext,
}

impl<'c> TableProxy<'c> {
    pub(crate) fn new(schema: Arc<TableSchema>, ctx: &'c ExecutionContext) -> Self {
        Self { schema, ctx }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    fn check_select(&self, select: &Select) -> Result<()> {
        // Expressions such as `count(*)` are passed through unchecked.
        for column in select.columns.iter().flatten() {
            if is_identifier(column) {
                self.schema.check_column(column)?;
            }
        }
        Ok(())
    }

    pub fn select(&self, select: &Select) -> Result<Vec<Row>> {
        self.select_iter(select)?.fetch_all()
    }

    pub fn select_iter(&self, select: &Select) -> Result<Cursor<'c>> {
        self.check_select(select)?;
        self.ctx.select_iter(self.name(), select)
    }

    /// First matching row, if any.
    pub fn select_single(&self, select: &Select) -> Result<Option<Row>> {
        self.select_iter(select)?.fetch_one()
    }

    pub fn select_as<T: FromRow>(&self, select: &Select) -> Result<Vec<T>> {
        let mut cursor = self.select_iter(select)?;
        let mapped: Result<Vec<T>> = cursor
            .rows()
            .map(|row| row.and_then(|row| T::from_row(&row)))
            .collect();
        mapped
    }

    /// Identifier columns, `rowid` when none are declared.
    fn key_columns(&self) -> Vec<&str> {
        match self.schema.id_cols() {
            [] => vec!["rowid"],
            cols => cols.iter().map(String::as_str).collect(),
        }
    }

    fn key_query(&self, ids: &[Value]) -> Result<Query> {
        let id_cols = self.key_columns();
        if ids.len() != id_cols.len() {
            return Err(Error::ColumnCount {
                table: self.name().to_string(),
                expected: format!("{} id values", id_cols.len()),
                found: ids.len(),
            });
        }
        Ok(id_cols
            .into_iter()
            .zip(ids)
            .fold(Query::new(), |q, (col, id)| {
                q.with_condition(col, QueryOperator::Equal(id.clone()))
            }))
    }

    /// Identifier values taken from a record, failing on a missing or null id.
    fn record_ids(&self, fields: &[(String, Value)]) -> Result<Vec<Value>> {
        self.key_columns()
            .into_iter()
            .map(|col| {
                fields
                    .iter()
                    .find(|(name, _)| name == col)
                    .map(|(_, v)| v.clone())
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| Error::MissingId {
                        table: self.name().to_string(),
                        column: col.to_string(),
                    })
            })
            .collect()
    }

    /// Look up a row by its identifier columns (`rowid` when none are declared).
    pub fn by_id(&self, ids: &[Value]) -> Result<Option<Row>> {
        let query = self.key_query(ids)?;
        self.select_single(&Select::new().matching(&query))
    }

    /// Insert values in declared column order, or named values.
    ///
    /// Positional values may skip the identifier columns, which the engine
    /// then generates. Returns the generated identifier if there is one.
    pub fn insert(&self, values: impl Into<Params>) -> Result<Option<i64>> {
        let values = match values.into() {
            Params::Named(pairs) => {
                let fields: Vec<(&str, Value)> = pairs
                    .iter()
                    .map(|(name, v)| (name.trim_start_matches([':', '@', '$']), v.clone()))
                    .collect();
                return self.insert_named(&fields);
            }
            Params::Positional(values) => values,
            Params::None => Vec::new(),
        };

        let all = self.schema.columns();
        if all.is_empty() {
            let sql = build_insert_positional(self.name(), values.len());
            return self.ctx.insert_sql(self.name(), &sql, Params::Positional(values));
        }
        // Only an id the engine generates may be left out.
        let generated = match self.schema.auto_id() {
            Some(id) => self
                .ctx
                .rowid_alias(self.name())?
                .is_some_and(|alias| alias.eq_ignore_ascii_case(id)),
            None => false,
        };
        let data = self.schema.data_columns();
        let columns: Vec<&str> = if values.len() == all.len() {
            all.iter().map(String::as_str).collect()
        } else if generated && values.len() == data.len() {
            data
        } else {
            return Err(Error::ColumnCount {
                table: self.name().to_string(),
                expected: if generated {
                    format!("{} or {}", all.len(), data.len())
                } else {
                    all.len().to_string()
                },
                found: values.len(),
            });
        };
        let sql = build_insert(self.name(), &columns);
        self.ctx.insert_sql(self.name(), &sql, Params::Positional(values))
    }

    pub fn insert_named(&self, fields: &[(&str, Value)]) -> Result<Option<i64>> {
        for (column, _) in fields {
            self.schema.check_column(column)?;
        }
        self.ctx.insert(self.name(), fields)
    }

    pub fn update(
        &self,
        set_expr: &str,
        where_clause: Option<&str>,
        values: impl Into<Params>,
    ) -> Result<usize> {
        self.ctx.update(self.name(), set_expr, where_clause, values)
    }

    /// Set the named columns on matching rows.
    pub fn update_record(
        &self,
        fields: &[(&str, Value)],
        where_clause: Option<&str>,
        values: impl Into<Params>,
    ) -> Result<usize> {
        for (column, _) in fields {
            self.schema.check_column(column)?;
        }
        self.ctx.update_record(self.name(), fields, where_clause, values)
    }

    pub fn delete(&self, where_clause: Option<&str>, values: impl Into<Params>) -> Result<usize> {
        self.ctx.delete(self.name(), where_clause, values)
    }

    /// Update the row identified by the record's id fields with its other
    /// fields. Returns the number of rows changed.
    pub fn update_by_id<T: ToRow + ?Sized>(&self, record: &T) -> Result<usize> {
        let fields = record.to_row();
        for (column, _) in &fields {
            self.schema.check_column(column)?;
        }
        let query = self.key_query(&self.record_ids(&fields)?)?;
        let id_cols = self.key_columns();
        let sets: Vec<(&str, Value)> = fields
            .iter()
            .filter(|(name, _)| !id_cols.contains(&name.as_str()))
            .map(|(name, v)| (name.as_str(), v.clone()))
            .collect();
        if sets.is_empty() {
            return Ok(0);
        }
        let (clause, values) = query.to_sql();
        self.ctx.update_record(self.name(), &sets, Some(&clause), values)
    }

    /// Delete the row with the given identifier values.
    pub fn delete_by_id(&self, ids: &[Value]) -> Result<usize> {
        let (clause, values) = self.key_query(ids)?.to_sql();
        self.delete(Some(&clause), values)
    }

    /// Insert the record, or update the existing row carrying its ids.
    ///
    /// Returns the record's identifier when it is a single integer, either
    /// taken from the record or generated by the insert.
    pub fn save<T: ToRow + ?Sized>(&self, record: &T) -> Result<Option<i64>> {
        let fields = record.to_row();
        for (column, _) in &fields {
            self.schema.check_column(column)?;
        }
        if !self.schema.id_cols().is_empty() {
            if let Ok(ids) = self.record_ids(&fields) {
                if self.by_id(&ids)?.is_some() {
                    self.update_by_id(record)?;
                    return Ok(match ids.as_slice() {
                        [Value::Integer(id)] => Some(*id),
                        _ => None,
                    });
                }
            }
        }
        let named: Vec<(&str, Value)> = fields
            .iter()
            .map(|(name, v)| (name.as_str(), v.clone()))
            .collect();
        self.insert_named(&named)
    }
}
