//! Scoped SQLite execution contexts on top of rusqlite.
//!
//! # Intention
//!
//! - Hand out connections as scoped execution contexts that commit on a
//!   normal exit and roll back on failure.
//! - Offer small select/insert/update/delete helpers with bound parameters,
//!   plus per-table proxies aware of declared columns.
//! - Run schema setup scripts once, against file, in-memory or
//!   memory-mirrored databases.
//!
//! # Architectural Boundaries
//!
//! - Not an ORM: no relationship mapping, no migrations, no query planning.
//! - SQL fragments (`where`, `set`) are passed through verbatim; values are
//!   always bound by the engine.
//! - Single-threaded: a context belongs to one thread; use one context per
//!   thread and let SQLite coordinate between connections.
//!
//! # Example
//!
//! ```ignore
//! use sqlite_ctx::{params, Schema, Select};
//!
//! let mut db = Schema::in_memory();
//! db.add_script("CREATE TABLE person (ID INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
//!     .add_table("person", ["ID", "name", "age"], ["ID"]);
//!
//! let mut ctx = db.context()?;
//! let person = ctx.table("person")?;
//! person.insert(params!["Ada", 30])?;
//! person.insert(params!["Bo", 40])?;
//! let older = person.select(&Select::new().filter("age > ?", [35]))?;
//! assert_eq!(older[0]["name"], "Bo".into());
//! ctx.close()?;
//! ```

pub mod sqlite;

pub use sqlite::*;
