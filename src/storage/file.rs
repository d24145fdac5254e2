//! JSON-file-based storage backend.
//!
//! Stores each entity type in a separate JSON file under a configurable
//! directory (default: `$XDG_DATA_HOME/marketplace-ledger/`).

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::LedgerBatch;
use super::batch::{
    StoredView, agent_key, check_preconditions, coupon_key, deposit_key, merchant_key,
    transaction_key, upsert_by_key,
};
use crate::error::{LedgerError, Result};
use crate::models::{Agent, CouponCode, Deposit, Merchant, Transaction};

/// Application name used for the XDG data directory.
const APP_NAME: &str = "marketplace-ledger";

/// File name for agents.
const AGENTS_FILE: &str = "agents.json";
/// File name for merchants.
const MERCHANTS_FILE: &str = "merchants.json";
/// File name for deposits.
const DEPOSITS_FILE: &str = "deposits.json";
/// File name for transactions.
const TRANSACTIONS_FILE: &str = "transactions.json";
/// File name for coupons.
const COUPONS_FILE: &str = "coupons.json";
/// Write-ahead record of the batch currently being applied.
const JOURNAL_FILE: &str = "journal.json";
/// Sentinel file used for cross-process file locking.
const LOCK_FILE: &str = "storage.lock";

/// File-backed storage that persists the ledger as JSON files.
///
/// # Concurrency
///
/// Thread safety within a single process is provided by an in-process
/// [`Mutex`]. Cross-process safety is achieved via an advisory file lock
/// on `storage.lock` (using [`std::fs::File::lock`] /
/// [`std::fs::File::lock_shared`]).
///
/// Read operations acquire a shared lock (allowing concurrent readers),
/// while commits acquire an exclusive lock.
///
/// # Atomicity
///
/// A commit first writes the whole batch to `journal.json`, then rewrites
/// each affected entity file (write-to-tmp then rename), then deletes the
/// journal. A journal that is still present means a commit stopped part
/// way, whether the process died or an entity write failed. It is
/// replayed when the storage is opened, before every commit and before
/// every read. Until the replay succeeds, commits and reads fail with the
/// replay error. Replaying is safe because every write is an upsert by ID.
///
/// # File layout
///
/// ```text
/// <dir>/
///   storage.lock          (cross-process lock sentinel)
///   journal.json          (only while a commit is in flight)
///   agents.json
///   merchants.json
///   deposits.json
///   transactions.json
///   coupons.json
/// ```
#[derive(Debug)]
pub struct FileStorage {
    /// Root directory containing all JSON files.
    dir: PathBuf,
    /// Mutex serializing concurrent in-process access.
    lock: Mutex<()>,
    /// Sentinel file for cross-process advisory locking.
    lock_file: fs::File,
}

impl FileStorage {
    /// Creates a new file storage rooted at the given directory.
    ///
    /// Creates the directory (and parents) if it does not exist, opens (or
    /// creates) the `storage.lock` sentinel, and replays an unfinished
    /// journal left behind by an interrupted commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the lock file
    /// cannot be opened, or journal recovery fails.
    #[inline]
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(storage_io_error)?;
        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(storage_io_error)?;
        let storage = Self {
            dir,
            lock: Mutex::new(()),
            lock_file,
        };
        storage.recover()?;
        Ok(storage)
    }

    /// Returns the default XDG-compliant data directory for this application.
    ///
    /// On Linux: `$XDG_DATA_HOME/marketplace-ledger/` (typically
    /// `~/.local/share/marketplace-ledger/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the platform data directory cannot be determined.
    #[inline]
    pub fn default_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|data_path| data_path.join(APP_NAME))
            .ok_or_else(|| {
                LedgerError::Storage("could not determine platform data directory".into())
            })
    }

    // ── Private helpers ─────────────────────────────────────────────

    /// Returns the full path for a given file name.
    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Acquires an in-process mutex guard and a shared (read) file lock,
    /// executes `op`, then releases the file lock.
    fn with_shared_lock<R, F: FnOnce() -> Result<R>>(&self, op: F) -> Result<R> {
        let _guard: MutexGuard<'_, ()> = self.lock.lock().map_err(|err| lock_poison_error(&err))?;
        self.lock_file.lock_shared().map_err(storage_io_error)?;
        let result = op();
        // Only surface the unlock error when the operation succeeded;
        // otherwise the original error is more useful.
        if let Err(err) = self.lock_file.unlock()
            && result.is_ok()
        {
            return Err(storage_io_error(err));
        }
        result
    }

    /// Acquires an in-process mutex guard and an exclusive (write) file
    /// lock, executes `op`, then releases the file lock.
    fn with_exclusive_lock<R, F: FnOnce() -> Result<R>>(&self, op: F) -> Result<R> {
        let _guard: MutexGuard<'_, ()> = self.lock.lock().map_err(|err| lock_poison_error(&err))?;
        self.lock_file.lock().map_err(storage_io_error)?;
        let result = op();
        if let Err(err) = self.lock_file.unlock()
            && result.is_ok()
        {
            return Err(storage_io_error(err));
        }
        result
    }

    /// Reads and deserializes a JSON file. Returns an empty `Vec` if the
    /// file does not exist.
    fn read_entities<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        match fs::read_to_string(self.path(name)) {
            Ok(contents) => serde_json::from_str(&contents).map_err(LedgerError::from),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(storage_io_error(err)),
        }
    }

    /// Atomically writes a serialized JSON file (write-to-tmp then rename).
    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        let tmp_path = self.path(&format!("{name}.tmp"));
        let json = serde_json::to_string_pretty(value).map_err(LedgerError::from)?;
        fs::write(&tmp_path, json).map_err(storage_io_error)?;
        fs::rename(&tmp_path, &path).map_err(storage_io_error)?;
        Ok(())
    }

    /// Merges `items` into an entity file by key. Skips the file entirely
    /// when there is nothing to write.
    fn upsert_file<T, K>(&self, name: &str, items: Vec<T>, key_fn: fn(&T) -> K) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        K: core::hash::Hash + Eq,
    {
        if items.is_empty() {
            return Ok(());
        }
        let mut existing: Vec<T> = self.read_entities(name)?;
        upsert_by_key(&mut existing, items, key_fn);
        self.write_json(name, &existing)
    }

    /// Writes every upsert of a batch to its entity file. Caller holds the
    /// exclusive lock.
    fn apply_batch(&self, batch: LedgerBatch) -> Result<()> {
        self.upsert_file(AGENTS_FILE, batch.agents, agent_key)?;
        self.upsert_file(MERCHANTS_FILE, batch.merchants, merchant_key)?;
        self.upsert_file(DEPOSITS_FILE, batch.deposits, deposit_key)?;
        self.upsert_file(TRANSACTIONS_FILE, batch.transactions, transaction_key)?;
        self.upsert_file(COUPONS_FILE, batch.coupons, coupon_key)
    }

    /// Removes a file, treating "not found" as success.
    fn remove_if_exists(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_io_error(err)),
        }
    }

    /// Finishes any interrupted commit, then checks preconditions,
    /// journals the batch, applies it, and drops the journal.
    fn commit_batch(&self, batch: LedgerBatch) -> Result<()> {
        self.with_exclusive_lock(|| {
            self.replay_journal()?;
            let agents: Vec<Agent> = self.read_entities(AGENTS_FILE)?;
            let merchants: Vec<Merchant> = self.read_entities(MERCHANTS_FILE)?;
            let deposits: Vec<Deposit> = self.read_entities(DEPOSITS_FILE)?;
            let coupons: Vec<CouponCode> = self.read_entities(COUPONS_FILE)?;
            check_preconditions(
                &batch.preconditions,
                StoredView {
                    agents: &agents,
                    merchants: &merchants,
                    deposits: &deposits,
                    coupons: &coupons,
                },
            )?;
            if batch.is_empty() {
                return Ok(());
            }
            self.write_json(JOURNAL_FILE, &batch)?;
            if let Err(err) = self.apply_batch(batch) {
                tracing::error!(
                    dir = %self.dir.display(),
                    error = %err,
                    "commit failed part way, journal kept for replay"
                );
                return Err(err);
            }
            self.remove_if_exists(JOURNAL_FILE)
        })
    }

    /// Replays a journal left by an interrupted commit.
    fn recover(&self) -> Result<()> {
        self.with_exclusive_lock(|| self.replay_journal())
    }

    /// Returns `true` if a journal is waiting to be replayed.
    fn journal_pending(&self) -> bool {
        self.path(JOURNAL_FILE).exists()
    }

    /// Applies and removes a leftover journal, if any. Caller holds the
    /// exclusive lock.
    fn replay_journal(&self) -> Result<()> {
        let contents = match fs::read_to_string(self.path(JOURNAL_FILE)) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(storage_io_error(err)),
        };
        let batch: LedgerBatch = serde_json::from_str(&contents)?;
        tracing::warn!(
            dir = %self.dir.display(),
            transactions = batch.transactions.len(),
            "replaying unfinished ledger journal"
        );
        self.apply_batch(batch)?;
        self.remove_if_exists(JOURNAL_FILE)
    }

    /// Deletes all entity files and any pending journal.
    ///
    /// The `storage.lock` sentinel is kept.
    fn clear_all(&self) -> Result<()> {
        self.with_exclusive_lock(|| {
            let files = [
                JOURNAL_FILE,
                AGENTS_FILE,
                MERCHANTS_FILE,
                DEPOSITS_FILE,
                TRANSACTIONS_FILE,
                COUPONS_FILE,
            ];
            for name in files {
                self.remove_if_exists(name)?;
            }
            Ok(())
        })
    }

    /// Reads one entity file under a shared lock, first finishing any
    /// interrupted commit under the exclusive lock.
    fn read_locked<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        if self.journal_pending() {
            self.recover()?;
        }
        self.with_shared_lock(|| {
            if self.journal_pending() {
                return Err(LedgerError::Storage(
                    "a commit is still being applied, retry the read".into(),
                ));
            }
            self.read_entities(name)
        })
    }
}

// ── Free-standing helpers ───────────────────────────────────────────────

/// Wraps an I/O error into a [`LedgerError::Storage`].
fn storage_io_error(err: std::io::Error) -> LedgerError {
    LedgerError::Storage(Box::new(err))
}

/// Wraps a mutex poison error into a [`LedgerError::Storage`].
fn lock_poison_error<T>(err: &std::sync::PoisonError<T>) -> LedgerError {
    LedgerError::Storage(err.to_string().into())
}

// ── BlockingStorage implementation ──────────────────────────────────────

#[cfg(feature = "blocking")]
impl super::BlockingStorage for FileStorage {
    #[inline]
    fn agents(&self) -> Result<Vec<Agent>> {
        self.read_locked(AGENTS_FILE)
    }

    #[inline]
    fn merchants(&self) -> Result<Vec<Merchant>> {
        self.read_locked(MERCHANTS_FILE)
    }

    #[inline]
    fn deposits(&self) -> Result<Vec<Deposit>> {
        self.read_locked(DEPOSITS_FILE)
    }

    #[inline]
    fn transactions(&self) -> Result<Vec<Transaction>> {
        self.read_locked(TRANSACTIONS_FILE)
    }

    #[inline]
    fn coupons(&self) -> Result<Vec<CouponCode>> {
        self.read_locked(COUPONS_FILE)
    }

    #[inline]
    fn commit(&self, batch: LedgerBatch) -> Result<()> {
        self.commit_batch(batch)
    }

    #[inline]
    fn clear(&self) -> Result<()> {
        self.clear_all()
    }
}

// ── Storage (async) implementation ──────────────────────────────────────

#[cfg(feature = "async")]
impl super::Storage for FileStorage {
    #[inline]
    fn agents(&self) -> impl Future<Output = Result<Vec<Agent>>> + Send {
        core::future::ready(self.read_locked(AGENTS_FILE))
    }

    #[inline]
    fn merchants(&self) -> impl Future<Output = Result<Vec<Merchant>>> + Send {
        core::future::ready(self.read_locked(MERCHANTS_FILE))
    }

    #[inline]
    fn deposits(&self) -> impl Future<Output = Result<Vec<Deposit>>> + Send {
        core::future::ready(self.read_locked(DEPOSITS_FILE))
    }

    #[inline]
    fn transactions(&self) -> impl Future<Output = Result<Vec<Transaction>>> + Send {
        core::future::ready(self.read_locked(TRANSACTIONS_FILE))
    }

    #[inline]
    fn coupons(&self) -> impl Future<Output = Result<Vec<CouponCode>>> + Send {
        core::future::ready(self.read_locked(COUPONS_FILE))
    }

    #[inline]
    fn commit(&self, batch: LedgerBatch) -> impl Future<Output = Result<()>> + Send {
        core::future::ready(self.commit_batch(batch))
    }

    #[inline]
    fn clear(&self) -> impl Future<Output = Result<()>> + Send {
        core::future::ready(self.clear_all())
    }
}
