//! Catalog record store
//!
//! Opens and configures the SQLite connection the catalog runs on. All
//! connection-level configuration happens here, once, at open time - nothing
//! in this crate toggles ambient process-wide state.

use std::path::Path;

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS fragments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    raw_size    INTEGER NOT NULL,
    stored_size INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS locations (
    fragment_id INTEGER NOT NULL UNIQUE
                REFERENCES fragments(id) ON DELETE CASCADE,
    address     TEXT NOT NULL UNIQUE
);
";

/// Open (creating if needed) a catalog database on disk
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    debug!("opened catalog store at {:?}", path);
    Ok(conn)
}

/// Open a throwaway in-memory catalog database
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

/// One-time connection configuration plus schema migration
fn configure(conn: &Connection) -> Result<()> {
    // Explicit per-connection init: SQLite ships with foreign keys off
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
