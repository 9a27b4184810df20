//! Execution contexts: one connection, its transaction and its cursors.
//!
//! An [`ExecutionContext`] is a scoped owner of a connection. It is
//! released with [`ExecutionContext::close`] (commit), with
//! [`ExecutionContext::discard`] (rollback) or when dropped:
//!
//! - dropped while the thread panics: rollback
//! - dropped with auto-commit enabled: commit
//! - dropped with auto-commit disabled or suspended by bulk mode: rollback
//!
//! With auto-commit enabled every statement outside an explicit
//! [`begin`](ExecutionContext::begin) commits on its own. With auto-commit
//! disabled the first mutating statement opens a transaction that lasts
//! until `commit`, `rollback` or the end of the context.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{CachedStatement, Connection};
use tracing::{debug, error, warn};

use super::config::BulkConfig;
use super::error::{Error, Result};
use super::query::{build_delete, build_insert, build_select, build_update, build_update_record, Select};
use super::row::{Row, RowLayout};
use super::table::{Catalog, TableProxy};
use super::value::{FromValue, Params, Value};

/// Pragmas captured before bulk mode so they can be restored afterwards.
#[derive(Debug, Clone, PartialEq)]
struct SavedPragmas {
    synchronous: i64,
    cache_size: i64,
    temp_store: i64,
    locking_mode: String,
    journal_mode: String,
}

/// A connection plus transaction state, handed out by a schema.
#[derive(Debug)]
pub struct ExecutionContext {
    conn: Option<Connection>,
    tables: Arc<Catalog>,
    auto_commit: bool,
    bulk_config: BulkConfig,
    bulk: Option<SavedPragmas>,
    rowid_aliases: RefCell<HashMap<String, Option<String>>>,
}

impl ExecutionContext {
    pub fn new(conn: Connection, tables: Arc<Catalog>, auto_commit: bool) -> Self {
        Self {
            conn: Some(conn),
            tables,
            auto_commit,
            bulk_config: BulkConfig::default(),
            bulk: None,
            rowid_aliases: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_bulk_config(mut self, bulk_config: BulkConfig) -> Self {
        self.bulk_config = bulk_config;
        self
    }

    pub(crate) fn set_tables(&mut self, tables: Arc<Catalog>) {
        self.tables = tables;
    }

    /// Get raw connection (for advanced usage).
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::ContextClosed)
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Change the auto-commit policy. Takes effect again once bulk mode ends.
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    pub fn is_bulk(&self) -> bool {
        self.bulk.is_some()
    }

    fn commits_each_statement(&self) -> bool {
        self.auto_commit && self.bulk.is_none()
    }

    pub fn in_transaction(&self) -> Result<bool> {
        Ok(!self.connection()?.is_autocommit())
    }

    // ── transactions ─────────────────────────────────────────────────

    fn control(&self, sql: &str) -> Result<()> {
        self.connection()?
            .execute_batch(sql)
            .map_err(|e| query_error(sql, &Params::None, e))
    }

    /// Start a transaction explicitly.
    pub fn begin(&self) -> Result<()> {
        self.control("BEGIN")
    }

    /// Commit the open transaction, if any.
    pub fn commit(&self) -> Result<()> {
        if self.in_transaction()? {
            self.control("COMMIT")?;
        }
        Ok(())
    }

    /// Roll back the open transaction, if any.
    pub fn rollback(&self) -> Result<()> {
        if self.in_transaction()? {
            self.control("ROLLBACK")?;
        }
        Ok(())
    }

    fn begin_if_deferred(&self, conn: &Connection) -> Result<()> {
        if !self.commits_each_statement() && conn.is_autocommit() {
            conn.execute_batch("BEGIN")
                .map_err(|e| query_error("BEGIN", &Params::None, e))?;
        }
        Ok(())
    }

    /// Switch to bulk mode: relaxed durability and one transaction for
    /// everything until [`bulk_off`](Self::bulk_off) or the end of the context.
    ///
    /// Any open transaction is committed first. Auto-commit is suspended
    /// while bulk mode lasts: [`close`](Self::close) commits the bulk
    /// transaction, dropping the context rolls it back.
    pub fn bulk(&mut self) -> Result<()> {
        if self.bulk.is_some() {
            return Ok(());
        }
        self.commit()?;
        let conn = self.connection()?;
        let saved = read_pragmas(conn).map_err(|e| query_error("PRAGMA", &Params::None, e))?;
        self.control(&format!(
            "PRAGMA synchronous = OFF;
             PRAGMA cache_size = {};
             PRAGMA temp_store = MEMORY;
             PRAGMA locking_mode = EXCLUSIVE;
             PRAGMA journal_mode = {};",
            self.bulk_config.cache_size,
            self.bulk_config.journal_mode.as_str()
        ))?;
        self.begin()?;
        debug!(journal_mode = self.bulk_config.journal_mode.as_str(), "bulk mode on");
        self.bulk = Some(saved);
        Ok(())
    }

    /// Leave bulk mode: commit the bulk transaction and restore the pragmas
    /// and auto-commit policy in force before [`bulk`](Self::bulk).
    pub fn bulk_off(&mut self) -> Result<()> {
        let Some(saved) = self.bulk.clone() else {
            return Ok(());
        };
        self.commit()?;
        self.control(&format!(
            "PRAGMA synchronous = {};
             PRAGMA cache_size = {};
             PRAGMA temp_store = {};
             PRAGMA locking_mode = {};
             PRAGMA journal_mode = {};",
            saved.synchronous,
            saved.cache_size,
            saved.temp_store,
            saved.locking_mode,
            saved.journal_mode
        ))?;
        self.bulk = None;
        debug!("bulk mode off");
        Ok(())
    }

    // ── statements ───────────────────────────────────────────────────

    fn prepare(&self, sql: &str, params: &Params) -> Result<CachedStatement<'_>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| query_error(sql, params, e))?;
        if !stmt.readonly() {
            self.begin_if_deferred(conn)?;
        }
        params
            .bind(&mut stmt)
            .map_err(|e| query_error(sql, params, e))?;
        Ok(stmt)
    }

    /// Run one statement that returns no rows; returns the number of changed rows.
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<usize> {
        let params = params.into();
        let mut stmt = self.prepare(sql, &params)?;
        stmt.raw_execute().map_err(|e| query_error(sql, &params, e))
    }

    /// Run multi-statement text verbatim, without parameters.
    ///
    /// With auto-commit disabled the script runs inside the context's
    /// transaction, so it must not contain its own `BEGIN`/`COMMIT`.
    pub fn execute_script(&self, script: &str) -> Result<()> {
        let conn = self.connection()?;
        self.begin_if_deferred(conn)?;
        conn.execute_batch(script)
            .map_err(|e| query_error(script, &Params::None, e))
    }

    pub fn execute_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let script = std::fs::read_to_string(path).map_err(|source| Error::Script {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "executing script file");
        self.execute_script(&script)
    }

    /// Prepare and bind a query; rows are produced lazily by [`Cursor::rows`].
    pub fn query(&self, sql: &str, params: impl Into<Params>) -> Result<Cursor<'_>> {
        let params = params.into();
        let stmt = self.prepare(sql, &params)?;
        let names = stmt.column_names().into_iter().map(String::from).collect();
        Ok(Cursor {
            stmt,
            sql: sql.to_string(),
            params,
            layout: Arc::new(RowLayout::new(names)),
        })
    }

    /// Select, fetch and return all rows
    pub fn query_all(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Row>> {
        self.query(sql, params)?.fetch_all()
    }

    /// Select, fetch and return the first row
    pub fn query_row(&self, sql: &str, params: impl Into<Params>) -> Result<Option<Row>> {
        self.query(sql, params)?.fetch_one()
    }

    /// Select and return the first value of the first row
    pub fn query_scalar<T: FromValue>(&self, sql: &str, params: impl Into<Params>) -> Result<Option<T>> {
        match self.query_row(sql, params)? {
            Some(row) if !row.is_empty() => row.get_as(0).map(Some),
            _ => Ok(None),
        }
    }

    /// A second cursor handle on this connection and transaction.
    pub fn double(&self) -> Secondary<'_> {
        Secondary { ctx: self }
    }

    pub fn vacuum(&self) -> Result<()> {
        self.control("VACUUM")
    }

    // ── table helpers ────────────────────────────────────────────────

    /// Proxy for a registered table.
    pub fn table(&self, name: &str) -> Result<TableProxy<'_>> {
        let schema = self
            .tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))?;
        Ok(TableProxy::new(Arc::clone(schema), self))
    }

    /// Names of the registered tables, aliases excluded.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter(|(key, table)| *key == table.name())
            .map(|(key, _)| key.as_str())
    }

    fn declared_columns(&self, table: &str) -> &[String] {
        self.tables.get(table).map(|t| t.columns()).unwrap_or(&[])
    }

    pub fn select(&self, table: &str, select: &Select) -> Result<Vec<Row>> {
        self.select_iter(table, select)?.fetch_all()
    }

    pub fn select_iter(&self, table: &str, select: &Select) -> Result<Cursor<'_>> {
        let sql = build_select(table, select, self.declared_columns(table));
        self.query(&sql, select.values.clone())
    }

    /// Insert named fields; returns the generated row id when the table has
    /// an auto-generated integer key.
    pub fn insert(&self, table: &str, fields: &[(&str, Value)]) -> Result<Option<i64>> {
        if let Some(schema) = self.tables.get(table) {
            for (column, _) in fields {
                schema.check_column(column)?;
            }
        }
        let columns: Vec<&str> = fields.iter().map(|(c, _)| *c).collect();
        let values = Params::Positional(fields.iter().map(|(_, v)| v.clone()).collect());
        self.insert_sql(table, &build_insert(table, &columns), values)
    }

    pub(crate) fn insert_sql(&self, table: &str, sql: &str, values: Params) -> Result<Option<i64>> {
        self.execute(sql, values)?;
        let rowid = self.connection()?.last_insert_rowid();
        Ok(self.rowid_alias(table)?.map(|_| rowid))
    }

    /// Name of the column aliasing the rowid (a lone `INTEGER PRIMARY KEY`).
    pub fn rowid_alias(&self, table: &str) -> Result<Option<String>> {
        if let Some(alias) = self.rowid_aliases.borrow().get(table) {
            return Ok(alias.clone());
        }
        let columns = self.query_all(
            "SELECT name, type, pk FROM pragma_table_info(?1) WHERE pk > 0",
            [table],
        )?;
        // WITHOUT ROWID tables keep their primary key in a pk-origin index.
        let pk_indexes = self
            .query_scalar::<i64>(
                "SELECT count(*) FROM pragma_index_list(?1) WHERE origin = 'pk'",
                [table],
            )?
            .unwrap_or(0);
        let alias = match columns.as_slice() {
            [pk] if pk_indexes == 0
                && pk
                    .get_as::<String, _>(1)
                    .is_ok_and(|t| t.eq_ignore_ascii_case("INTEGER")) =>
            {
                Some(pk.get_as::<String, _>(0)?)
            }
            _ => None,
        };
        self.rowid_aliases
            .borrow_mut()
            .insert(table.to_string(), alias.clone());
        Ok(alias)
    }

    pub fn update(
        &self,
        table: &str,
        set_expr: &str,
        where_clause: Option<&str>,
        values: impl Into<Params>,
    ) -> Result<usize> {
        self.execute(&build_update(table, set_expr, where_clause), values)
    }

    /// Set the named columns on rows matching `where_clause`.
    pub fn update_record(
        &self,
        table: &str,
        fields: &[(&str, Value)],
        where_clause: Option<&str>,
        values: impl Into<Params>,
    ) -> Result<usize> {
        let columns: Vec<&str> = fields.iter().map(|(c, _)| *c).collect();
        let sets = Params::Positional(fields.iter().map(|(_, v)| v.clone()).collect());
        let sql = build_update_record(table, &columns, where_clause);
        self.execute(&sql, sets.chain(&values.into()))
    }

    pub fn delete(&self, table: &str, where_clause: Option<&str>, values: impl Into<Params>) -> Result<usize> {
        self.execute(&build_delete(table, where_clause), values)
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Commit any open transaction and release the connection.
    ///
    /// Closing twice is a no-op; any other call afterwards fails with
    /// [`Error::ContextClosed`].
    pub fn close(&mut self) -> Result<()> {
        self.release(true)
    }

    /// Roll back any open transaction and release the connection.
    pub fn discard(&mut self) -> Result<()> {
        self.release(false)
    }

    fn release(&mut self, commit: bool) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.bulk = None;
        let mut outcome = Ok(());
        if !conn.is_autocommit() {
            let sql = if commit { "COMMIT" } else { "ROLLBACK" };
            outcome = conn
                .execute_batch(sql)
                .map_err(|e| query_error(sql, &Params::None, e));
            if outcome.is_err() && !conn.is_autocommit() {
                // A failed COMMIT leaves the transaction open.
                let _ = conn.execute_batch("ROLLBACK");
            }
            debug!(commit, ok = outcome.is_ok(), "transaction finished");
        }
        if let Err((_, e)) = conn.close() {
            warn!(error = %e, "failed to close connection");
        }
        outcome
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        // Bulk mode suspends auto-commit, so its transaction is not kept.
        let commit = self.commits_each_statement() && !std::thread::panicking();
        if !conn.is_autocommit() && !commit {
            warn!("execution context dropped with an open transaction, rolling back");
        }
        if let Err(e) = self.release(commit) {
            error!(error = %e, "failed to release execution context");
        }
    }
}

fn read_pragmas(conn: &Connection) -> rusqlite::Result<SavedPragmas> {
    Ok(SavedPragmas {
        synchronous: conn.pragma_query_value(None, "synchronous", |r| r.get(0))?,
        cache_size: conn.pragma_query_value(None, "cache_size", |r| r.get(0))?,
        temp_store: conn.pragma_query_value(None, "temp_store", |r| r.get(0))?,
        locking_mode: conn.pragma_query_value(None, "locking_mode", |r| r.get(0))?,
        journal_mode: conn.pragma_query_value(None, "journal_mode", |r| r.get(0))?,
    })
}

fn query_error(sql: &str, params: &Params, source: rusqlite::Error) -> Error {
    error!(statement = sql, params = %params, error = %source, "query failed");
    Error::Query {
        statement: sql.to_string(),
        params: params.clone(),
        source,
    }
}

/// A prepared, bound statement.
pub struct Cursor<'c> {
    stmt: CachedStatement<'c>,
    sql: String,
    params: Params,
    layout: Arc<RowLayout>,
}

impl<'c> Cursor<'c> {
    pub fn columns(&self) -> &[String] {
        self.layout.names()
    }

    pub fn statement(&self) -> &str {
        &self.sql
    }

    /// Run the statement and step through its rows one at a time.
    ///
    /// Calling this again runs the statement again from the start.
    pub fn rows(&mut self) -> RowIter<'_> {
        let Cursor {
            stmt,
            sql,
            params,
            layout,
        } = self;
        RowIter {
            rows: stmt.raw_query(),
            layout,
            sql,
            params,
            done: false,
        }
    }

    pub fn fetch_all(mut self) -> Result<Vec<Row>> {
        let rows: Result<Vec<Row>> = self.rows().collect();
        rows
    }

    pub fn fetch_one(mut self) -> Result<Option<Row>> {
        let first = self.rows().next().transpose();
        first
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("columns", &self.layout.names())
            .finish()
    }
}

/// Lazy rows of a [`Cursor`]; stops after the first error.
pub struct RowIter<'s> {
    rows: rusqlite::Rows<'s>,
    layout: &'s Arc<RowLayout>,
    sql: &'s str,
    params: &'s Params,
    done: bool,
}

impl Iterator for RowIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match self.rows.next() {
            Ok(Some(row)) => Row::from_sqlite(self.layout, row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match step {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(query_error(self.sql, self.params, e)))
            }
        }
    }
}

/// Second cursor handle sharing the context's connection and transaction,
/// for reading while another statement is in progress.
#[derive(Debug, Clone, Copy)]
pub struct Secondary<'c> {
    ctx: &'c ExecutionContext,
}

impl<'c> Secondary<'c> {
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<usize> {
        self.ctx.execute(sql, params)
    }

    pub fn query(&self, sql: &str, params: impl Into<Params>) -> Result<Cursor<'c>> {
        self.ctx.query(sql, params)
    }

    pub fn query_all(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Row>> {
        self.ctx.query_all(sql, params)
    }

    pub fn select_iter(&self, table: &str, select: &Select) -> Result<Cursor<'c>> {
        self.ctx.select_iter(table, select)
    }

    pub fn table(&self, name: &str) -> Result<TableProxy<'c>> {
        self.ctx.table(name)
    }
}
