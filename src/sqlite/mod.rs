//! SQLite execution contexts and table helpers.
//!
//! Leaf first:
//!
//! - [`source`]: where connections come from (file, memory, memory mirror)
//! - [`context`]: a connection, its transaction policy and its cursors
//! - [`table`]: table metadata and per-table proxies
//! - [`schema`]: setup scripts and tables bound to a data source

pub mod config;
pub mod context;
pub mod error;
pub mod query;
pub mod row;
pub mod schema;
pub mod source;
pub mod table;
pub mod value;

pub use config::{BulkConfig, JournalMode, SetupMode, SqliteConfig};
pub use context::{Cursor, ExecutionContext, RowIter, Secondary};
pub use error::{Error, Result};
pub use query::{
    contain_like, escape_like, head_like, tail_like, Query, QueryOperator, Select,
};
pub use row::{ColumnIndex, FromRow, Row, RowLayout, ToRow};
pub use schema::Schema;
pub use source::{DataSource, SourceKind};
pub use table::{Catalog, TableProxy, TableSchema};
pub use value::{FromValue, Params, Value};
