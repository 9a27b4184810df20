//! Data sources: where connections come from.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OpenFlags};
use tracing::{debug, info};

use super::error::{Error, Result};

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

/// Kind of storage behind a [`DataSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// A database file, created on first open.
    File(PathBuf),
    /// A private in-memory database shared by every connection of the source.
    Memory,
    /// An in-memory copy of a database file. Writes are never persisted back.
    Mirror(PathBuf),
}

/// Produces connections to one store.
///
/// In-memory kinds keep an anchor connection alive for as long as the
/// source exists so that every context opened from it sees the same data.
#[derive(Debug)]
pub struct DataSource {
    kind: SourceKind,
    uri: Option<String>,
    anchor: RefCell<Option<Connection>>,
}

impl DataSource {
    /// Source for `path`; an empty path or `:memory:` selects [`SourceKind::Memory`].
    pub fn from_path(path: impl AsRef<Path>, expand_user: bool) -> Self {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || path == Path::new(":memory:") {
            return Self::memory();
        }
        let path = if expand_user { expand_home(path) } else { path.to_path_buf() };
        Self::with_kind(SourceKind::File(path))
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::from_path(path, true)
    }

    pub fn memory() -> Self {
        Self::with_kind(SourceKind::Memory)
    }

    /// Mirror the file at `path` into memory on first open.
    pub fn mirror(path: impl AsRef<Path>, expand_user: bool) -> Self {
        let path = path.as_ref();
        let path = if expand_user { expand_home(path) } else { path.to_path_buf() };
        Self::with_kind(SourceKind::Mirror(path))
    }

    fn with_kind(kind: SourceKind) -> Self {
        let uri = match kind {
            SourceKind::File(_) => None,
            SourceKind::Memory | SourceKind::Mirror(_) => Some(format!(
                "file:sqlite-ctx-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed)
            )),
        };
        Self {
            kind,
            uri,
            anchor: RefCell::new(None),
        }
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    /// File path of the store, if it has one.
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            SourceKind::File(path) | SourceKind::Mirror(path) => Some(path),
            SourceKind::Memory => None,
        }
    }

    /// Whether the store holds no database yet and needs its setup scripts.
    pub fn is_fresh(&self) -> bool {
        match &self.kind {
            SourceKind::File(path) => std::fs::metadata(path).map_or(true, |m| m.len() == 0),
            SourceKind::Memory => self.anchor.borrow().is_none(),
            SourceKind::Mirror(_) => false,
        }
    }

    /// Open a new connection.
    pub fn open(&self) -> Result<Connection> {
        match &self.kind {
            SourceKind::File(path) => open_file(path),
            SourceKind::Memory | SourceKind::Mirror(_) => {
                self.ensure_anchor()?;
                let uri = self.memory_uri();
                debug!(uri, "opening in-memory connection");
                Connection::open_with_flags(uri, memory_flags())
                    .map_err(|e| Error::source_unavailable(uri, e))
            }
        }
    }

    fn memory_uri(&self) -> &str {
        self.uri.as_deref().unwrap_or(":memory:")
    }

    fn ensure_anchor(&self) -> Result<()> {
        let mut anchor = self.anchor.borrow_mut();
        if anchor.is_some() {
            return Ok(());
        }
        let uri = self.memory_uri();
        let mut conn = Connection::open_with_flags(uri, memory_flags())
            .map_err(|e| Error::source_unavailable(uri, e))?;
        if let SourceKind::Mirror(origin) = &self.kind {
            load_into(&mut conn, origin)?;
        }
        *anchor = Some(conn);
        Ok(())
    }
}

fn memory_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(Error::source_unavailable(
                path,
                format!("directory '{}' does not exist", parent.display()),
            ));
        }
    }
    debug!(path = %path.display(), "opening database file");
    Connection::open(path).map_err(|e| Error::source_unavailable(path, e))
}

fn load_into(conn: &mut Connection, origin: &Path) -> Result<()> {
    // restore() would silently create a missing origin.
    let meta = std::fs::metadata(origin).map_err(|e| Error::source_unavailable(origin, e))?;
    if !meta.is_file() {
        return Err(Error::source_unavailable(origin, "not a regular file"));
    }
    info!(path = %origin.display(), "fetching database into memory");
    conn.restore(DatabaseName::Main, origin, None::<fn(Progress)>)
        .map_err(|e| Error::source_unavailable(origin, e))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
