//! Transactional fragment catalog
//!
//! Durable, unique mapping from content fingerprint to fragment metadata,
//! with memory-bounded streaming enumeration. The catalog exclusively owns
//! its SQLite connection; every record it hands out is a detached snapshot.
//!
//! Concurrency: one live transaction per catalog instance, guarded by a
//! reentrant lock - a thread already holding it may nest further catalog
//! calls, other threads block until release. The fingerprint's uniqueness
//! constraint, not locking, is what resolves write races: a losing insert
//! surfaces as `AlreadyExists` and the caller retries as a pure lookup.

mod fragment;
mod location;
pub mod store;

pub use fragment::{Fingerprint, Fragment, FragmentFilter, FragmentOrder, NewFragment, FINGERPRINT_LEN};
pub use location::{LocationStream, StoredLocation};

use std::collections::VecDeque;
use std::path::Path;

use parking_lot::ReentrantMutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::allocator::SlotAddress;
use crate::error::{Result, StoreError};

/// Default page size for streaming enumeration.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

const FRAGMENT_COLUMNS: &str = "id, fingerprint, raw_size, stored_size";

/// SQLite extended result codes for uniqueness violations.
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn row_to_fragment(row: &rusqlite::Row<'_>) -> Result<Fragment> {
    let fingerprint: String = row.get(1)?;
    Ok(Fragment {
        id: row.get(0)?,
        fingerprint: fingerprint.parse()?,
        raw_size: row.get::<_, i64>(2)? as u64,
        stored_size: row.get::<_, i64>(3)? as u64,
    })
}

/// Catalog of fragment records backed by SQLite
pub struct FragmentCatalog {
    conn: ReentrantMutex<Connection>,
}

impl FragmentCatalog {
    /// Open (creating if needed) a catalog database on disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = store::open(path.as_ref())?;
        info!("opened fragment catalog at {:?}", path.as_ref());
        Ok(FragmentCatalog {
            conn: ReentrantMutex::new(conn),
        })
    }

    /// Open a throwaway in-memory catalog
    pub fn open_in_memory() -> Result<Self> {
        Ok(FragmentCatalog {
            conn: ReentrantMutex::new(store::open_in_memory()?),
        })
    }

    /// Insert a new fragment record
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the fingerprint is
    /// already cataloged - the signal to retry as a pure lookup.
    pub fn create(&self, new: &NewFragment) -> Result<Fragment> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let inserted = tx
            .execute(
                "INSERT INTO fragments (fingerprint, raw_size, stored_size) VALUES (?, ?, ?)",
                params![
                    new.fingerprint.to_hex(),
                    new.raw_size as i64,
                    new.stored_size as i64
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists(new.fingerprint.to_hex())
                } else {
                    e.into()
                }
            });
        inserted?; // on failure tx drops here and rolls back
        let id = tx.last_insert_rowid();
        let fragment = tx.query_row(
            &format!("SELECT {} FROM fragments WHERE id = ?", FRAGMENT_COLUMNS),
            params![id],
            |row| Ok(row_to_fragment(row)),
        )??;
        tx.commit()?;
        debug!("created fragment {} ({})", fragment.id, fragment.fingerprint);
        Ok(fragment)
    }

    /// Return the record for a fingerprint, inserting it on first occurrence
    ///
    /// A concurrent insert that wins the race is tolerated: the losing
    /// insert's `AlreadyExists` is retried as a lookup, so exactly one row
    /// exists afterwards no matter how many callers raced.
    pub fn get_or_create(&self, new: &NewFragment) -> Result<Fragment> {
        let _guard = self.conn.lock();
        match self.get(&FragmentFilter::Fingerprint(new.fingerprint)) {
            Ok(found) => Ok(found),
            Err(StoreError::NotFound) => match self.create(new) {
                Ok(created) => Ok(created),
                Err(StoreError::AlreadyExists(_)) => {
                    self.get(&FragmentFilter::Fingerprint(new.fingerprint))
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Update the record matching the filter, creating it when absent
    ///
    /// The update applies every attribute of `new` atomically and returns
    /// the refreshed record. Insert races resolve the same way as
    /// [`FragmentCatalog::get_or_create`].
    pub fn create_or_update(&self, filter: &FragmentFilter, new: &NewFragment) -> Result<Fragment> {
        let _guard = self.conn.lock();
        match self.get(filter) {
            Ok(found) => self.update_row(found.id, new),
            Err(StoreError::NotFound) => match self.create(new) {
                Ok(created) => Ok(created),
                Err(StoreError::AlreadyExists(_)) => {
                    let found = self.get(filter)?;
                    self.update_row(found.id, new)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn update_row(&self, id: i64, new: &NewFragment) -> Result<Fragment> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let result = tx.execute(
            "UPDATE fragments SET fingerprint = ?, raw_size = ?, stored_size = ? WHERE id = ?",
            params![
                new.fingerprint.to_hex(),
                new.raw_size as i64,
                new.stored_size as i64,
                id
            ],
        );
        if let Err(e) = result {
            return Err(if is_unique_violation(&e) {
                StoreError::AlreadyExists(new.fingerprint.to_hex())
            } else {
                e.into()
            });
        }
        let fragment = tx.query_row(
            &format!("SELECT {} FROM fragments WHERE id = ?", FRAGMENT_COLUMNS),
            params![id],
            |row| Ok(row_to_fragment(row)),
        )??;
        tx.commit()?;
        Ok(fragment)
    }

    /// Exact lookup
    ///
    /// Fails with [`StoreError::NotFound`] on zero matches; more than one
    /// match means the filter was not exact, a programmer error surfaced as
    /// [`StoreError::AmbiguousMatch`].
    pub fn get(&self, filter: &FragmentFilter) -> Result<Fragment> {
        let conn = self.conn.lock();
        let (where_sql, values) = filter.to_sql();
        let sql = format!(
            "SELECT {} FROM fragments WHERE {} LIMIT 2",
            FRAGMENT_COLUMNS, where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let fragment = match rows.next()? {
            Some(row) => row_to_fragment(row)?,
            None => return Err(StoreError::NotFound),
        };
        if rows.next()?.is_some() {
            return Err(StoreError::AmbiguousMatch);
        }
        Ok(fragment)
    }

    /// Number of records matching the filter
    pub fn count(&self, filter: &FragmentFilter) -> Result<u64> {
        let conn = self.conn.lock();
        let (where_sql, values) = filter.to_sql();
        let sql = format!("SELECT COUNT(*) FROM fragments WHERE {}", where_sql);
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Stream every matching record in bounded pages
    ///
    /// The matching count is computed once up front and caps the stream, so
    /// the sequence is finite even while other, non-overlapping operations
    /// mutate the catalog. Each yielded record is detached before the next
    /// page is fetched; the whole catalog is never resident at once.
    pub fn stream_all(
        &self,
        filter: FragmentFilter,
        order: FragmentOrder,
        page_size: usize,
    ) -> Result<FragmentStream<'_>> {
        let total = self.count(&filter)?;
        Ok(FragmentStream {
            catalog: self,
            filter,
            order,
            page_size: page_size.max(1),
            total,
            yielded: 0,
            offset: 0,
            page: VecDeque::new(),
        })
    }

    /// Bulk delete of every record matching the filter
    ///
    /// Fails with [`StoreError::NotExisting`] when nothing matched.
    pub fn delete(&self, filter: &FragmentFilter) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let (where_sql, values) = filter.to_sql();
        let sql = format!("DELETE FROM fragments WHERE {}", where_sql);
        let affected = tx.execute(&sql, params_from_iter(values))?;
        if affected == 0 {
            return Err(StoreError::NotExisting); // tx drops and rolls back
        }
        tx.commit()?;
        debug!("deleted {} fragment record(s)", affected);
        Ok(())
    }

    /// Record where a fragment's payload was written
    pub fn record_location(&self, fragment_id: i64, address: &SlotAddress) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let result = tx.execute(
            "INSERT INTO locations (fragment_id, address) VALUES (?, ?)",
            params![fragment_id, address.to_string()],
        );
        if let Err(e) = result {
            return Err(if is_unique_violation(&e) {
                StoreError::AlreadyExists(address.to_string())
            } else {
                e.into()
            });
        }
        tx.commit()?;
        Ok(())
    }

    /// Where a fragment's payload lives, if it has been written
    pub fn location_of(&self, fragment_id: i64) -> Result<Option<SlotAddress>> {
        let conn = self.conn.lock();
        let rendered: Option<String> = conn
            .query_row(
                "SELECT address FROM locations WHERE fragment_id = ?",
                params![fragment_id],
                |row| row.get(0),
            )
            .optional()?;
        rendered.map(|s| s.parse()).transpose()
    }

    /// Stream every persisted location in bounded pages (allocator replay)
    pub fn locations(&self, page_size: usize) -> Result<LocationStream<'_>> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(LocationStream {
            catalog: self,
            page_size: page_size.max(1),
            total: total as u64,
            yielded: 0,
            offset: 0,
            page: VecDeque::new(),
        })
    }

    pub(crate) fn fetch_location_page(
        &self,
        offset: u64,
        page_size: usize,
        page: &mut VecDeque<StoredLocation>,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT fragment_id, address FROM locations ORDER BY fragment_id LIMIT ? OFFSET ?",
        )?;
        let mut rows = stmt.query(params![page_size as i64, offset as i64])?;
        let mut fetched = 0;
        while let Some(row) = rows.next()? {
            let rendered: String = row.get(1)?;
            page.push_back(StoredLocation {
                fragment_id: row.get(0)?,
                address: rendered.parse()?,
            });
            fetched += 1;
        }
        Ok(fetched)
    }

    fn fetch_fragment_page(
        &self,
        filter: &FragmentFilter,
        order: FragmentOrder,
        offset: u64,
        page_size: usize,
        page: &mut VecDeque<Fragment>,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let (where_sql, mut values) = filter.to_sql();
        let sql = format!(
            "SELECT {} FROM fragments WHERE {} ORDER BY {}, id LIMIT ? OFFSET ?",
            FRAGMENT_COLUMNS,
            where_sql,
            order.column()
        );
        values.push(rusqlite::types::Value::Integer(page_size as i64));
        values.push(rusqlite::types::Value::Integer(offset as i64));
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut fetched = 0;
        while let Some(row) = rows.next()? {
            page.push_back(row_to_fragment(row)?);
            fetched += 1;
        }
        Ok(fetched)
    }
}

/// Bounded-page iterator over matching fragment records
///
/// Finite (capped by the count taken at stream creation) and restartable.
pub struct FragmentStream<'a> {
    catalog: &'a FragmentCatalog,
    filter: FragmentFilter,
    order: FragmentOrder,
    page_size: usize,
    total: u64,
    yielded: u64,
    offset: u64,
    page: VecDeque<Fragment>,
}

impl FragmentStream<'_> {
    /// Records this stream will yield in total
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Rewind to the first record
    pub fn restart(&mut self) {
        self.yielded = 0;
        self.offset = 0;
        self.page.clear();
    }
}

impl Iterator for FragmentStream<'_> {
    type Item = Result<Fragment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.total {
            return None;
        }
        if self.page.is_empty() {
            let fetched = self.catalog.fetch_fragment_page(
                &self.filter,
                self.order,
                self.offset,
                self.page_size,
                &mut self.page,
            );
            match fetched {
                Ok(0) => return None,
                Ok(n) => self.offset += n as u64,
                Err(e) => return Some(Err(e)),
            }
        }
        let fragment = self.page.pop_front()?;
        self.yielded += 1;
        Some(Ok(fragment))
    }
}
