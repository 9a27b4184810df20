//! Statement builders for select/insert/update/delete.
//!
//! Builders only assemble statement text from identifiers and caller
//! supplied clause fragments. Values always travel separately as
//! [`Params`] and are bound by the engine.

use super::value::{Params, Value};

/// Escape character used by the LIKE helpers.
pub const LIKE_ESCAPE: char = '@';

/// Query operators for building advanced queries
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    /// Pattern matched with `ESCAPE '@'`, see [`escape_like`].
    Like(String),
    In(Vec<Value>),
}

/// AND-joined column conditions, rendered to a `where` fragment.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Query {
    pub conditions: Vec<(String, QueryOperator)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, field: &str, op: QueryOperator) -> Self {
        self.conditions.push((field.to_string(), op));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|(field, _)| field.as_str())
    }

    /// Render as a `where` fragment plus its positional values.
    pub fn to_sql(&self) -> (String, Params) {
        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut values = Vec::new();
        for (field, op) in &self.conditions {
            let column = quote_ident(field);
            let clause = match op {
                QueryOperator::Equal(v) if v.is_null() => format!("{column} IS NULL"),
                QueryOperator::NotEqual(v) if v.is_null() => format!("{column} IS NOT NULL"),
                QueryOperator::Equal(v) => push(&mut values, v, format!("{column} = ?")),
                QueryOperator::NotEqual(v) => push(&mut values, v, format!("{column} <> ?")),
                QueryOperator::GreaterThan(v) => push(&mut values, v, format!("{column} > ?")),
                QueryOperator::GreaterThanOrEqual(v) => {
                    push(&mut values, v, format!("{column} >= ?"))
                }
                QueryOperator::LessThan(v) => push(&mut values, v, format!("{column} < ?")),
                QueryOperator::LessThanOrEqual(v) => {
                    push(&mut values, v, format!("{column} <= ?"))
                }
                QueryOperator::Like(pattern) => {
                    values.push(Value::Text(pattern.clone()));
                    format!("{column} LIKE ? ESCAPE '{LIKE_ESCAPE}'")
                }
                // `x IN ()` is valid in SQLite and matches nothing.
                QueryOperator::In(items) => {
                    values.extend(items.iter().cloned());
                    format!("{column} IN ({})", placeholders(items.len()))
                }
            };
            clauses.push(clause);
        }
        (clauses.join(" AND "), Params::Positional(values))
    }
}

fn push(values: &mut Vec<Value>, value: &Value, clause: String) -> String {
    values.push(value.clone());
    clause
}

/// Options for a select: filter, projection, ordering and paging.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Select {
    pub where_clause: Option<String>,
    pub values: Params,
    pub columns: Option<Vec<String>>,
    pub order_by: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw `where` fragment with bound values, e.g. `("age > ?", [35])`.
    pub fn filter(mut self, where_clause: &str, values: impl Into<Params>) -> Self {
        self.where_clause = Some(where_clause.to_string()).filter(|w| !w.trim().is_empty());
        self.values = values.into();
        self
    }

    /// Filter from structured conditions.
    pub fn matching(self, query: &Query) -> Self {
        let (clause, values) = query.to_sql();
        self.filter(&clause, values)
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order_by(mut self, order_by: &str) -> Self {
        self.order_by = Some(order_by.to_string());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether `name` is a plain SQL identifier (letters, digits, underscore).
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn where_suffix(where_clause: Option<&str>) -> String {
    match where_clause.map(str::trim) {
        Some(w) if !w.is_empty() => format!(" WHERE {w}"),
        _ => String::new(),
    }
}

/// `SELECT cols FROM table [WHERE ..] [ORDER BY ..] [LIMIT ..] [OFFSET ..]`.
///
/// `default_columns` is used when the select names no columns; both empty
/// selects `*`. Column entries are emitted verbatim so expressions work.
pub fn build_select(table: &str, select: &Select, default_columns: &[String]) -> String {
    let columns = match select.columns.as_deref() {
        Some(columns) if !columns.is_empty() => columns.join(", "),
        _ if !default_columns.is_empty() => default_columns.join(", "),
        _ => String::from("*"),
    };
    let mut sql = format!("SELECT {columns} FROM {}", quote_ident(table));
    sql.push_str(&where_suffix(select.where_clause.as_deref()));
    if let Some(order_by) = &select.order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    match (select.limit, select.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }
    sql
}

/// `INSERT INTO table (cols) VALUES (?, ..)`, or `DEFAULT VALUES` when empty.
pub fn build_insert(table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    }
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders(columns.len())
    )
}

/// `INSERT INTO table VALUES (?, ..)` for tables without declared columns.
pub fn build_insert_positional(table: &str, count: usize) -> String {
    format!(
        "INSERT INTO {} VALUES ({})",
        quote_ident(table),
        placeholders(count)
    )
}

/// `UPDATE table SET set_expr [WHERE ..]`.
pub fn build_update(table: &str, set_expr: &str, where_clause: Option<&str>) -> String {
    format!(
        "UPDATE {} SET {set_expr}{}",
        quote_ident(table),
        where_suffix(where_clause)
    )
}

/// `UPDATE table SET c1 = ?1, c2 = ?2 [WHERE ..]`.
///
/// Set placeholders are numbered so that the `where` fragment's own `?`
/// placeholders continue after them.
pub fn build_update_record(table: &str, columns: &[&str], where_clause: Option<&str>) -> String {
    let sets: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i + 1))
        .collect();
    build_update(table, &sets.join(", "), where_clause)
}

/// `DELETE FROM table [WHERE ..]`.
pub fn build_delete(table: &str, where_clause: Option<&str>) -> String {
    format!(
        "DELETE FROM {}{}",
        quote_ident(table),
        where_suffix(where_clause)
    )
}

/// Escape `%`, `_` and the escape char itself for use with `ESCAPE '@'`.
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Pattern matching values that start with `input`.
pub fn head_like(input: &str) -> String {
    format!("{}%", escape_like(input))
}

/// Pattern matching values that end with `input`.
pub fn tail_like(input: &str) -> String {
    format!("%{}", escape_like(input))
}

/// Pattern matching values that contain `input`.
pub fn contain_like(input: &str) -> String {
    format!("%{}%", escape_like(input))
}
