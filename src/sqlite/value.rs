//! Values and parameter bindings exchanged with the engine.

use std::collections::HashSet;
use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::Statement;
use serde::{Deserialize, Serialize};

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    /// Engine storage class name, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
            Value::Boolean(_) => "BOOLEAN",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::Integer(i64::from(value))
            }
        })*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Real(f64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Blob(value.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a fetched [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Name of the expected type, reported when the conversion fails.
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "INTEGER";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "32-bit INTEGER";

    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|i| i32::try_from(i).ok())
    }
}

impl FromValue for u32 {
    const EXPECTED: &'static str = "unsigned 32-bit INTEGER";

    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|i| u32::try_from(i).ok())
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "REAL";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "BOOLEAN";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "TEXT";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const EXPECTED: &'static str = "BLOB";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(b) => Some(b.clone()),
            Value::Text(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Parameter bindings for SQL statements.
///
/// Values are always bound through the engine, never spliced into the
/// statement text.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum Params {
    #[default]
    None,
    /// Bound in order to `?` / `?NNN` placeholders.
    Positional(Vec<Value>),
    /// Bound by name to `:name`, `@name` or `$name` placeholders.
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Add a named value. Positional values already present are kept
    /// under their `?NNN` index name.
    pub fn with_value(self, name: &str, value: impl Into<Value>) -> Self {
        let mut pairs = match self {
            Params::None => Vec::new(),
            Params::Named(pairs) => pairs,
            Params::Positional(values) => values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("?{}", i + 1), v))
                .collect(),
        };
        pairs.push((name.to_string(), value.into()));
        Params::Named(pairs)
    }

    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional concatenation of two parameter sets.
    ///
    /// Named sets are kept as they are; only positional values are
    /// renumbered.
    pub(crate) fn chain(&self, other: &Params) -> Params {
        match (self, other) {
            (Params::None, p) | (p, Params::None) => p.clone(),
            (Params::Positional(a), Params::Positional(b)) => {
                Params::Positional(a.iter().chain(b).cloned().collect())
            }
            (a, b) => {
                let mut pairs = named_pairs(a, 0);
                let offset = match a {
                    Params::Positional(values) => values.len(),
                    _ => 0,
                };
                pairs.extend(named_pairs(b, offset));
                Params::Named(pairs)
            }
        }
    }

    /// Bind onto a prepared statement, failing on a count mismatch for
    /// positional sets and on any placeholder a named set leaves unbound.
    pub(crate) fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
        match self {
            Params::None => {
                let expected = stmt.parameter_count();
                if expected != 0 {
                    return Err(rusqlite::Error::InvalidParameterCount(0, expected));
                }
            }
            Params::Positional(values) => {
                let expected = stmt.parameter_count();
                if expected != values.len() {
                    return Err(rusqlite::Error::InvalidParameterCount(
                        values.len(),
                        expected,
                    ));
                }
                for (i, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(i + 1, value)?;
                }
            }
            Params::Named(pairs) => {
                let mut bound = HashSet::with_capacity(pairs.len());
                for (name, value) in pairs {
                    let index = match name.strip_prefix('?') {
                        Some(n) => n.parse::<usize>().ok(),
                        None if name.starts_with([':', '@', '$']) => {
                            stmt.parameter_index(name)?
                        }
                        None => stmt.parameter_index(&format!(":{name}"))?,
                    };
                    let index =
                        index.ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
                    stmt.raw_bind_parameter(index, value)?;
                    bound.insert(index);
                }
                // The engine would silently bind NULL to anything left out.
                if let Some(missing) = (1..=stmt.parameter_count()).find(|i| !bound.contains(i)) {
                    let name = stmt
                        .parameter_name(missing)
                        .map_or_else(|| format!("?{missing}"), String::from);
                    return Err(rusqlite::Error::InvalidParameterName(name));
                }
            }
        }
        Ok(())
    }
}

fn named_pairs(params: &Params, offset: usize) -> Vec<(String, Value)> {
    match params {
        Params::None => Vec::new(),
        Params::Named(pairs) => pairs.clone(),
        Params::Positional(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("?{}", offset + i + 1), v.clone()))
            .collect(),
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        match self {
            Params::None => {}
            Params::Positional(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
            }
            Params::Named(pairs) => {
                for (i, (name, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
            }
        }
        f.write_str(")")
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl<V: Into<Value>> From<Vec<V>> for Params {
    fn from(values: Vec<V>) -> Self {
        Params::positional(values)
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Params {
    fn from(values: [V; N]) -> Self {
        Params::positional(values)
    }
}

/// Build positional [`Params`] from a list of expressions.
///
/// ```ignore
/// ctx.query_all("SELECT * FROM person WHERE age > ?", params![35])?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($value)),+])
    };
}

/// Build named [`Params`]; names may omit the leading `:`.
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::Params::None
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Params::Named(vec![$((::std::string::String::from($name), $crate::Value::from($value))),+])
    };
}
