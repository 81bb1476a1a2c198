use crate::config::{Config, Retention};
use crate::error::{StoreError, is_contention};
use crate::identity::FileIdentity;
use crate::model::FileRecord;
use rand::Rng;
use rusqlite::{Batch, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

mod migrations;

pub use migrations::SCHEMA;

/// Store file looked up by [`Store::discover`].
pub const FILE_NAME: &str = "findstore.sqlite";

/// What a unit of work asks the storage engine to do with its transaction.
#[derive(Debug)]
pub enum Outcome<T> {
    Commit(T),
    Rollback(T),
    /// Roll back and run the unit of work again.
    Retry,
    /// Roll back and give up.
    Error(String),
}

/// How a transaction settled.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<T> {
    Committed(T),
    RolledBack(T),
}

impl<T> Resolution<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Resolution::Committed(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Resolution::Committed(value) | Resolution::RolledBack(value) => value,
        }
    }
}

/// Bounded, randomized exponential backoff between transaction attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.backoff_base(),
        }
    }

    /// Delay before the 1-based `attempt`. The first attempt runs immediately;
    /// after that the mean doubles each time, starting at `base_delay`.
    ///
    /// Each delay is drawn from `[2/3, 4/3]` of its mean, so consecutive
    /// ranges touch and the sequence never decreases.
    pub fn delay_before<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base = self.base_delay.as_micros().min(u64::MAX as u128) as u64;
        let mean = base.saturating_mul(1u64 << (attempt - 2).min(32));
        let low = mean.saturating_mul(2) / 3;
        let high = mean.saturating_mul(4) / 3;
        if high <= low {
            return Duration::from_micros(mean);
        }
        Duration::from_micros(rng.gen_range(low..=high))
    }
}

enum Attempt<T> {
    Settled(Resolution<T>),
    Transient(String),
    Failed(StoreError),
}

fn classify<T>(context: &str, err: rusqlite::Error) -> Attempt<T> {
    if is_contention(&err) {
        Attempt::Transient(format!("{err} [{context}]"))
    } else {
        Attempt::Failed(StoreError::sqlite(context, err))
    }
}

fn run_attempt<T, F>(conn: &mut Connection, work: &mut F) -> Attempt<T>
where
    F: FnMut(&Transaction<'_>) -> rusqlite::Result<Outcome<T>>,
{
    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(tx) => tx,
        Err(err) => return classify("BEGIN", err),
    };
    let outcome = match work(&tx) {
        Ok(outcome) => outcome,
        Err(err) => {
            rollback(tx);
            return classify("unit of work", err);
        }
    };
    match outcome {
        // A failed COMMIT drops the transaction, which rolls it back.
        Outcome::Commit(value) => match tx.commit() {
            Ok(()) => Attempt::Settled(Resolution::Committed(value)),
            Err(err) => classify("COMMIT", err),
        },
        Outcome::Rollback(value) => match tx.rollback() {
            Ok(()) => Attempt::Settled(Resolution::RolledBack(value)),
            Err(err) => Attempt::Failed(StoreError::sqlite("ROLLBACK", err)),
        },
        Outcome::Retry => {
            rollback(tx);
            Attempt::Transient("unit of work requested a retry".to_string())
        }
        Outcome::Error(message) => {
            rollback(tx);
            Attempt::Failed(StoreError::Aborted(message))
        }
    }
}

fn rollback(tx: Transaction<'_>) {
    if let Err(err) = tx.rollback() {
        warn!("rollback failed: {err}");
    }
}

fn run_batch(conn: &Connection, sql: &str) -> Result<(), StoreError> {
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next().map_err(|err| StoreError::sqlite("prepare", err))? {
        let text = stmt.expanded_sql().unwrap_or_default();
        if stmt.parameter_count() != 0 {
            return Err(StoreError::UnboundParameters(text));
        }
        // PRAGMA produces a row, so rows are consumed instead of rejected.
        let mut rows = stmt.raw_query();
        while rows
            .next()
            .map_err(|err| StoreError::sqlite(text.clone(), err))?
            .is_some()
        {}
    }
    Ok(())
}

/// Single point of contact with the backing sqlite file.
pub struct Store {
    path: PathBuf,
    conn: Connection,
    policy: RetryPolicy,
    retention: Retention,
    last_error: Option<String>,
}

impl Store {
    /// Creates the store file if needed and applies the schema.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        Self::create_with_config(path, Config::get())
    }

    pub fn create_with_config(path: &Path, config: &Config) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let mut store = Self::connect(path, config, flags)?;
        store.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "store schema ready");
        Ok(store)
    }

    /// Opens an existing store; never creates one.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_config(path, Config::get())
    }

    pub fn open_with_config(path: &Path, config: &Config) -> Result<Self, StoreError> {
        Self::connect(path, config, OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    /// Opens the store found in `start` or the nearest ancestor holding one.
    pub fn discover(start: &Path) -> Result<Self, StoreError> {
        let path = locate(start)?;
        debug!(path = %path.display(), "discovered store");
        Self::open(&path)
    }

    fn connect(path: &Path, config: &Config, flags: OpenFlags) -> Result<Self, StoreError> {
        let open_error = |source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        let conn = Connection::open_with_flags(path, flags).map_err(open_error)?;
        conn.busy_timeout(config.busy_timeout()).map_err(open_error)?;
        let mut store = Self {
            path: path.to_path_buf(),
            conn,
            policy: RetryPolicy::from_config(config),
            retention: config.retention,
            last_error: None,
        };
        store.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Text of the most recent failure, kept for diagnostics.
    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Runs parameterless statements in order, stopping at the first failure.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        let result = run_batch(&self.conn, sql);
        if let Err(err) = &result {
            self.last_error = Some(err.to_string());
        }
        result
    }

    /// Runs `work` inside a transaction, retrying on contention.
    pub fn transact<T, F>(&mut self, work: F) -> Result<Resolution<T>, StoreError>
    where
        F: FnMut(&Transaction<'_>) -> rusqlite::Result<Outcome<T>>,
    {
        self.transact_with_sleep(std::thread::sleep, work)
    }

    /// Like [`Store::transact`], with the backoff wait supplied by the caller.
    ///
    /// Errors returned by `work` are classified: busy/locked codes retry,
    /// anything else aborts. Every attempt that does not commit is rolled back.
    pub fn transact_with_sleep<T, F, S>(
        &mut self,
        mut sleep: S,
        mut work: F,
    ) -> Result<Resolution<T>, StoreError>
    where
        F: FnMut(&Transaction<'_>) -> rusqlite::Result<Outcome<T>>,
        S: FnMut(Duration),
    {
        let mut rng = rand::thread_rng();
        let mut last = String::from("no attempt made");
        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay_before(attempt, &mut rng);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                sleep(delay);
            }
            match run_attempt(&mut self.conn, &mut work) {
                Attempt::Settled(resolution) => {
                    self.last_error = None;
                    return Ok(resolution);
                }
                Attempt::Transient(message) => {
                    warn!(attempt, "transient store failure: {message}");
                    last = message;
                }
                Attempt::Failed(err) => {
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            }
        }
        let err = StoreError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last,
        };
        self.last_error = Some(err.to_string());
        Err(err)
    }

    /// Deletes every FileRecord row that is not the newest for its path,
    /// together with its findings. Returns the number of rows removed.
    pub fn prune_superseded(&mut self) -> Result<usize, StoreError> {
        let resolution = self.transact(|tx| {
            let removed = tx.execute(
                "DELETE FROM files
                 WHERE id NOT IN (SELECT MAX(id) FROM files GROUP BY path)",
                [],
            )?;
            Ok(Outcome::Commit(removed))
        })?;
        Ok(resolution.into_inner())
    }

    /// All FileRecord rows for `path`, oldest first.
    pub fn file_records(&self, path: &str) -> Result<Vec<FileRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, path, mtime, size FROM files WHERE path = ? ORDER BY id")
            .map_err(|err| StoreError::sqlite("file_records", err))?;
        let rows = stmt
            .query_map(params![path], |row| {
                Ok(FileRecord {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    mtime: row.get(2)?,
                    size: row.get::<_, i64>(3)?.max(0) as u64,
                })
            })
            .map_err(|err| StoreError::sqlite("file_records", err))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|err| StoreError::sqlite("file_records", err))
    }
}

/// Finds [`FILE_NAME`] in `start` or its ancestors.
pub fn locate(start: &Path) -> Result<PathBuf, StoreError> {
    let start = std::fs::canonicalize(start).map_err(|source| StoreError::Resolve {
        path: start.to_path_buf(),
        source,
    })?;
    for dir in start.ancestors() {
        let candidate = dir.join(FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(StoreError::NotFound {
        file_name: FILE_NAME,
        start,
    })
}

pub(crate) fn insert_file(conn: &Connection, identity: &FileIdentity) -> rusqlite::Result<i64> {
    let mut stmt = conn.prepare_cached("INSERT INTO files (path, mtime, size) VALUES (?, ?, ?)")?;
    stmt.execute(params![
        identity.path,
        identity.mtime,
        i64::try_from(identity.size).unwrap_or(i64::MAX)
    ])?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn latest_file_id(conn: &Connection, path: &str) -> rusqlite::Result<Option<i64>> {
    conn.prepare_cached("SELECT id FROM files WHERE path = ? ORDER BY id DESC LIMIT 1")?
        .query_row(params![path], |row| row.get(0))
        .optional()
}

/// Newest row for the identity's path whose fingerprint equals the identity's.
pub(crate) fn matching_file_id(
    conn: &Connection,
    identity: &FileIdentity,
) -> rusqlite::Result<Option<i64>> {
    conn.prepare_cached(
        "SELECT id FROM files
         WHERE path = ? AND mtime = ? AND size = ?
         ORDER BY id DESC LIMIT 1",
    )?
    .query_row(
        params![
            identity.path,
            identity.mtime,
            i64::try_from(identity.size).unwrap_or(i64::MAX)
        ],
        |row| row.get(0),
    )
    .optional()
}

pub(crate) fn insert_report(
    conn: &Connection,
    file_id: i64,
    line: u32,
    column: u32,
    tool: &str,
    message: &str,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO reports (file, line, column, tool, message) VALUES (?, ?, ?, ?, ?)",
    )?;
    stmt.execute(params![file_id, line, column, tool, message])?;
    Ok(())
}

pub(crate) fn prune_older_rows(conn: &Connection, path: &str, keep_id: i64) -> rusqlite::Result<usize> {
    conn.prepare_cached("DELETE FROM files WHERE path = ? AND id < ?")?
        .execute(params![path, keep_id])
}

/// Distinct paths that have at least one stored finding, in byte order.
pub(crate) fn finding_paths(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT f.path FROM files f
         WHERE EXISTS (SELECT 1 FROM reports r WHERE r.file = f.id)
         ORDER BY f.path",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Findings of one FileRecord row, duplicates folded, in insertion order.
pub(crate) fn reports_for_file(
    conn: &Connection,
    file_id: i64,
) -> rusqlite::Result<Vec<(u32, u32, String, String)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT line, column, tool, message FROM reports
         WHERE file = ?
         GROUP BY line, column, tool, message
         ORDER BY MIN(rowid)",
    )?;
    let rows = stmt.query_map(params![file_id], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rusqlite::ffi;
    use tempfile::TempDir;

    fn test_config() -> Config {
        Config {
            max_attempts: 6,
            backoff_base_ms: 1,
            busy_timeout_ms: 0,
            retention: Retention::KeepAll,
        }
    }

    fn setup_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::create_with_config(&temp_dir.path().join(FILE_NAME), &test_config())
            .unwrap();
        (temp_dir, store)
    }

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    fn file_count(store: &Store) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .unwrap()
    }

    fn insert_dummy(tx: &Transaction<'_>) -> rusqlite::Result<i64> {
        tx.execute(
            "INSERT INTO files (path, mtime, size) VALUES ('/x', 1, 2)",
            [],
        )?;
        Ok(tx.last_insert_rowid())
    }

    #[test]
    fn create_is_idempotent_and_open_requires_existing() {
        let (temp_dir, store) = setup_store();
        let path = store.path().to_path_buf();
        drop(store);
        Store::create_with_config(&path, &test_config()).unwrap();
        Store::open_with_config(&path, &test_config()).unwrap();

        let missing = temp_dir.path().join("other.sqlite");
        let err = Store::open_with_config(&missing, &test_config()).err().unwrap();
        assert!(matches!(err, StoreError::Open { .. }));
        assert!(!missing.exists());
    }

    #[test]
    fn foreign_keys_and_wal_enabled() {
        let (_temp_dir, store) = setup_store();
        let fk: i64 = store
            .connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        let mode: String = store
            .connection()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn execute_batch_runs_in_order_and_fails_fast() {
        let (_temp_dir, mut store) = setup_store();
        let err = store
            .execute_batch(
                "CREATE TABLE t (x INTEGER);
                 INSERT INTO t VALUES (1);
                 INSERT INTO missing VALUES (2);
                 INSERT INTO t VALUES (3);",
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite { .. }));
        assert!(store.error_message().unwrap().contains("missing"));
        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn execute_batch_rejects_parameters() {
        let (_temp_dir, mut store) = setup_store();
        let err = store
            .execute_batch("INSERT INTO files (path, mtime, size) VALUES (?, 1, 2);")
            .unwrap_err();
        assert!(matches!(err, StoreError::UnboundParameters(_)));
        assert_eq!(file_count(&store), 0);
    }

    #[test]
    fn commit_and_rollback_outcomes() {
        let (_temp_dir, mut store) = setup_store();
        let committed = store
            .transact(|tx| Ok(Outcome::Commit(insert_dummy(tx)?)))
            .unwrap();
        assert!(committed.is_committed());
        assert_eq!(file_count(&store), 1);

        let rolled_back = store
            .transact(|tx| Ok(Outcome::Rollback(insert_dummy(tx)?)))
            .unwrap();
        assert!(!rolled_back.is_committed());
        assert_eq!(file_count(&store), 1);
    }

    #[test]
    fn error_outcome_aborts_without_retry() {
        let (_temp_dir, mut store) = setup_store();
        let mut calls = 0;
        let err = store
            .transact_with_sleep(
                |_| panic!("no backoff expected"),
                |tx| {
                    calls += 1;
                    insert_dummy(tx)?;
                    Ok(Outcome::<()>::Error("bad payload".to_string()))
                },
            )
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, StoreError::Aborted(ref m) if m == "bad payload"));
        assert_eq!(file_count(&store), 0);
    }

    #[test]
    fn fatal_sqlite_error_is_not_retried() {
        let (_temp_dir, mut store) = setup_store();
        let mut calls = 0;
        let err = store
            .transact(|tx| {
                calls += 1;
                insert_dummy(tx)?;
                tx.execute("INSERT INTO reports (file, line, column, tool, message) VALUES (999, 1, 1, 't', 'm')", [])?;
                Ok(Outcome::Commit(()))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, StoreError::Sqlite { .. }));
        assert!(store.error_message().is_some());
        assert_eq!(file_count(&store), 0);
    }

    #[test]
    fn contention_is_retried_until_success() {
        let (_temp_dir, mut store) = setup_store();
        let mut calls = 0;
        let mut delays = Vec::new();
        let resolution = store
            .transact_with_sleep(
                |delay| delays.push(delay),
                |tx| {
                    calls += 1;
                    insert_dummy(tx)?;
                    if calls <= 3 {
                        return Err(busy());
                    }
                    Ok(Outcome::Commit(calls))
                },
            )
            .unwrap();
        assert_eq!(resolution, Resolution::Committed(4));
        assert_eq!(file_count(&store), 1);
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(store.error_message().is_none());
    }

    #[test]
    fn retry_outcome_exhausts_budget_and_rolls_back() {
        let (_temp_dir, mut store) = setup_store();
        let mut calls = 0;
        let mut sleeps = 0;
        let err = store
            .transact_with_sleep(
                |_| sleeps += 1,
                |tx| {
                    calls += 1;
                    insert_dummy(tx)?;
                    Ok(Outcome::<()>::Retry)
                },
            )
            .unwrap_err();
        assert_eq!(calls, 6);
        assert_eq!(sleeps, 5);
        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 6, .. }));
        assert!(store.error_message().unwrap().contains("6 attempts"));
        assert_eq!(file_count(&store), 0);
    }

    #[test]
    fn concurrent_writer_lock_is_contention() {
        let (_temp_dir, store) = setup_store();
        let config = Config {
            max_attempts: 2,
            ..test_config()
        };
        let other = Store::open_with_config(store.path(), &config).unwrap();
        other.connection().execute_batch("BEGIN IMMEDIATE;").unwrap();

        let mut blocked = Store::open_with_config(store.path(), &config).unwrap();
        let err = blocked
            .transact(|tx| Ok(Outcome::Commit(insert_dummy(tx)?)))
            .unwrap_err();
        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 2, .. }));

        other.connection().execute_batch("COMMIT;").unwrap();
        blocked
            .transact(|tx| Ok(Outcome::Commit(insert_dummy(tx)?)))
            .unwrap();
        assert_eq!(file_count(&store), 1);
    }

    #[test]
    fn backoff_doubles_and_never_decreases() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(policy.delay_before(1, &mut rng), Duration::ZERO);
        for _ in 0..200 {
            let delays: Vec<_> = (2..=6)
                .map(|attempt| policy.delay_before(attempt, &mut rng))
                .collect();
            assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
            assert!(delays[0] >= Duration::from_micros(66_666));
            assert!(delays[0] <= Duration::from_micros(133_333));
            assert!(delays[4] >= Duration::from_micros(1_066_666));
            assert!(delays[4] <= Duration::from_micros(2_133_333));
        }
    }

    #[test]
    fn prune_keeps_newest_row_per_path() {
        let (_temp_dir, mut store) = setup_store();
        store
            .execute_batch(
                "INSERT INTO files (path, mtime, size) VALUES ('/a', 1, 1);
                 INSERT INTO reports VALUES (1, 1, 1, 't', 'old');
                 INSERT INTO files (path, mtime, size) VALUES ('/a', 2, 2);
                 INSERT INTO reports VALUES (2, 1, 1, 't', 'new');
                 INSERT INTO files (path, mtime, size) VALUES ('/b', 1, 1);",
            )
            .unwrap();
        assert_eq!(store.prune_superseded().unwrap(), 1);
        let rows = store.file_records("/a").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 2);
        let reports: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))
            .unwrap();
        assert_eq!(reports, 1);
    }

    #[test]
    fn locate_walks_up_parents() {
        let (temp_dir, store) = setup_store();
        let nested = temp_dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = locate(&nested).unwrap();
        assert_eq!(found, std::fs::canonicalize(store.path()).unwrap());

        let elsewhere = TempDir::new().unwrap();
        let err = locate(elsewhere.path()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
