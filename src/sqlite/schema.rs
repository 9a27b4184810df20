//! The top-level object callers build: data source, setup scripts and tables.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config::{SetupMode, SqliteConfig};
use super::context::ExecutionContext;
use super::error::{Error, Result};
use super::source::DataSource;
use super::table::{Catalog, TableSchema};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Script {
    Inline(String),
    File(PathBuf),
}

/// A database schema bound to one data source.
///
/// Setup scripts run on the first context opened during the schema's
/// lifetime (see [`SetupMode`]). Contexts are opened explicitly with
/// [`context`](Self::context) / [`with_context`](Self::with_context), or
/// implicitly through the long-lived default context of
/// [`with_default`](Self::with_default).
///
/// ```ignore
/// let mut db = Schema::new("~/data/people.db");
/// db.add_script("CREATE TABLE IF NOT EXISTS person(ID INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
///     .add_table("person", ["ID", "name", "age"], ["ID"]);
///
/// db.with_context(|ctx| {
///     let person = ctx.table("person")?;
///     person.insert(params!["Ada", 30])?;
///     Ok::<_, Error>(())
/// })?;
/// ```
#[derive(Debug)]
pub struct Schema {
    // Declared first so it is released before the source's anchor connection.
    default_ctx: RefCell<Option<ExecutionContext>>,
    source: DataSource,
    config: SqliteConfig,
    scripts: Vec<Script>,
    tables: Arc<Catalog>,
    // Undecided until the first context; stays `Some(true)` until setup succeeds.
    pending_setup: Cell<Option<bool>>,
}

impl Schema {
    /// Schema over the database at `db_path` with default settings.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        let db_path = db_path.as_ref();
        Self::from_config(SqliteConfig::new(db_path.to_string_lossy()))
    }

    pub fn in_memory() -> Self {
        Self::from_config(SqliteConfig::default())
    }

    pub fn from_config(config: SqliteConfig) -> Self {
        let source = if config.mirror {
            DataSource::mirror(&config.db_path, config.expand_user)
        } else {
            DataSource::from_path(&config.db_path, config.expand_user)
        };
        Self::with_source(source, config)
    }

    /// Schema over an existing source; `config.db_path`, `expand_user` and
    /// `mirror` are ignored.
    pub fn with_source(source: DataSource, config: SqliteConfig) -> Self {
        Self {
            default_ctx: RefCell::new(None),
            source,
            config,
            scripts: Vec::new(),
            tables: Arc::new(Catalog::new()),
            pending_setup: Cell::new(None),
        }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Register a setup script, executed verbatim.
    pub fn add_script(&mut self, script: impl Into<String>) -> &mut Self {
        self.scripts.push(Script::Inline(script.into()));
        self
    }

    /// Register a setup script file, read when setup runs.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.scripts.push(Script::File(path.into()));
        self
    }

    pub fn add_table<C, I, S, T>(&mut self, name: &str, columns: C, id_cols: I) -> &mut Self
    where
        C: IntoIterator<Item = S>,
        I: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.add_table_schema(TableSchema::new(name, columns, id_cols))
    }

    /// Register a table, and any aliases it carries, for proxy lookups.
    pub fn add_table_schema(&mut self, table: TableSchema) -> &mut Self {
        if self.config.strict {
            for issue in table.design_issues() {
                warn!(table = table.name(), issue = %issue, "bad database design detected");
            }
        }
        let table = Arc::new(table);
        let catalog = Arc::make_mut(&mut self.tables);
        for alias in table.aliases() {
            catalog.insert(alias.clone(), Arc::clone(&table));
        }
        catalog.insert(table.name().to_string(), table);
        if let Some(ctx) = self.default_ctx.get_mut().as_mut() {
            ctx.set_tables(Arc::clone(&self.tables));
        }
        self
    }

    pub fn table_schema(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name).map(Arc::as_ref)
    }

    /// Registered tables, each once regardless of aliases.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables
            .iter()
            .filter(|(key, table)| *key == table.name())
            .map(|(_, table)| table.as_ref())
    }

    fn location(&self) -> String {
        self.source
            .path()
            .map_or_else(|| String::from(":memory:"), |p| p.display().to_string())
    }

    /// Open a new execution context with the configured auto-commit policy.
    pub fn context(&self) -> Result<ExecutionContext> {
        self.context_with(self.config.auto_commit)
    }

    pub fn context_with(&self, auto_commit: bool) -> Result<ExecutionContext> {
        let needs_setup = match self.pending_setup.get() {
            Some(pending) => pending,
            None => self.config.setup == SetupMode::Always || self.source.is_fresh(),
        };
        self.pending_setup.set(Some(needs_setup));
        let conn = self.source.open()?;
        if let Some(timeout) = self.config.busy_timeout() {
            conn.busy_timeout(timeout)
                .map_err(|e| Error::source_unavailable(self.location(), e))?;
        }
        let mut ctx = ExecutionContext::new(conn, Arc::clone(&self.tables), auto_commit)
            .with_bulk_config(self.config.bulk.clone());
        if needs_setup {
            if let Err(e) = self.run_setup(&ctx) {
                if let Err(cleanup) = ctx.discard() {
                    warn!(error = %cleanup, "failed to roll back setup");
                }
                return Err(e);
            }
            self.pending_setup.set(Some(false));
        }
        debug!(location = %self.location(), auto_commit, "opened execution context");
        Ok(ctx)
    }

    fn run_setup(&self, ctx: &ExecutionContext) -> Result<()> {
        if self.scripts.is_empty() {
            return Ok(());
        }
        match self.config.setup {
            SetupMode::Fresh => warn!(
                location = %self.location(),
                "database does not exist, running setup"
            ),
            SetupMode::Always => info!(location = %self.location(), "running setup scripts"),
        }
        for script in &self.scripts {
            match script {
                Script::Inline(text) => ctx.execute_script(text)?,
                Script::File(path) => ctx.execute_file(path)?,
            }
        }
        ctx.commit()
    }

    /// Run `f` in a fresh context: commit and close on `Ok`, roll back on `Err`.
    ///
    /// A panic inside `f` also rolls back.
    pub fn with_context<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ExecutionContext) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut ctx = self.context()?;
        match f(&mut ctx) {
            Ok(value) => {
                ctx.close()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(cleanup) = ctx.discard() {
                    warn!(error = %cleanup, "rollback after failed scope did not complete");
                }
                Err(e)
            }
        }
    }

    /// Run `f` against the schema's default context, opening it on first use.
    ///
    /// The context stays open across calls until
    /// [`close_default`](Self::close_default) or until the schema is dropped.
    /// `f` must not call `with_default` on the same schema.
    pub fn with_default<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ExecutionContext) -> Result<T>,
    {
        let mut slot = self.default_ctx.borrow_mut();
        if !slot.as_ref().is_some_and(ExecutionContext::is_open) {
            *slot = Some(self.context()?);
        }
        let Some(ctx) = slot.as_mut() else {
            return Err(Error::ContextClosed);
        };
        f(ctx)
    }

    /// Commit and release the default context, if one is open.
    pub fn close_default(&self) -> Result<()> {
        let ctx = self.default_ctx.borrow_mut().take();
        match ctx {
            Some(mut ctx) => ctx.close(),
            None => Ok(()),
        }
    }
}
