//! In-memory storage backend for testing.
//!
//! Provides [`InMemoryStorage`], a thread-safe in-memory implementation of
//! the storage traits. Ideal for unit and integration tests where file I/O
//! is undesirable.

use std::sync::Mutex;

#[cfg(feature = "async")]
use core::future::{self, Future};

use super::batch::{
    StoredView, agent_key, check_preconditions, coupon_key, deposit_key, merchant_key,
    transaction_key, upsert_by_key,
};
use super::LedgerBatch;
use crate::error::{LedgerError, Result};
use crate::models::{Agent, CouponCode, Deposit, Merchant, Transaction};

/// Thread-safe in-memory storage for testing.
///
/// This type implements both [`super::Storage`] (async) and
/// [`super::BlockingStorage`] (blocking) traits, providing a zero-setup
/// storage backend for tests.
///
/// # Commit semantics
///
/// A batch is checked and applied while holding a single mutex, so
/// concurrent commits are serialised and a failed precondition leaves the
/// state untouched.
///
/// # Example
///
/// ```rust
/// use marketplace_ledger::storage::InMemoryStorage;
///
/// let storage = InMemoryStorage::new();
/// // Use with the Ledger or LedgerBlocking builders:
/// // LedgerBlocking::builder().storage(storage).build()
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    /// All state behind a single mutex for thread-safe interior mutability.
    inner: Mutex<Inner>,
}

/// Inner mutable state.
#[derive(Debug, Default)]
struct Inner {
    /// Stored agents.
    agents: Vec<Agent>,
    /// Stored merchants.
    merchants: Vec<Merchant>,
    /// Stored deposits.
    deposits: Vec<Deposit>,
    /// Stored transactions.
    transactions: Vec<Transaction>,
    /// Stored coupons.
    coupons: Vec<CouponCode>,
}

impl Inner {
    /// Validates the batch against the current state, then applies it.
    fn apply(&mut self, batch: LedgerBatch) -> Result<()> {
        check_preconditions(
            &batch.preconditions,
            StoredView {
                agents: &self.agents,
                merchants: &self.merchants,
                deposits: &self.deposits,
                coupons: &self.coupons,
            },
        )?;
        upsert_by_key(&mut self.agents, batch.agents, agent_key);
        upsert_by_key(&mut self.merchants, batch.merchants, merchant_key);
        upsert_by_key(&mut self.deposits, batch.deposits, deposit_key);
        upsert_by_key(&mut self.transactions, batch.transactions, transaction_key);
        upsert_by_key(&mut self.coupons, batch.coupons, coupon_key);
        Ok(())
    }
}

impl InMemoryStorage {
    /// Creates a new empty in-memory storage.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the inner lock and applies a closure.
    fn with_lock<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Result<R> {
        let mut inner = self.inner.lock().map_err(|err| lock_error(&err))?;
        Ok(f(&mut inner))
    }

    /// Acquires the inner lock and commits a batch.
    fn commit_locked(&self, batch: LedgerBatch) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|err| lock_error(&err))?;
        inner.apply(batch)
    }
}

/// Wraps a mutex poison error.
fn lock_error<T>(err: &std::sync::PoisonError<T>) -> LedgerError {
    LedgerError::Storage(err.to_string().into())
}

// ── BlockingStorage implementation ──────────────────────────────────────

#[cfg(feature = "blocking")]
impl super::BlockingStorage for InMemoryStorage {
    #[inline]
    fn agents(&self) -> Result<Vec<Agent>> {
        self.with_lock(|inner| inner.agents.clone())
    }

    #[inline]
    fn merchants(&self) -> Result<Vec<Merchant>> {
        self.with_lock(|inner| inner.merchants.clone())
    }

    #[inline]
    fn deposits(&self) -> Result<Vec<Deposit>> {
        self.with_lock(|inner| inner.deposits.clone())
    }

    #[inline]
    fn transactions(&self) -> Result<Vec<Transaction>> {
        self.with_lock(|inner| inner.transactions.clone())
    }

    #[inline]
    fn coupons(&self) -> Result<Vec<CouponCode>> {
        self.with_lock(|inner| inner.coupons.clone())
    }

    #[inline]
    fn commit(&self, batch: LedgerBatch) -> Result<()> {
        self.commit_locked(batch)
    }

    #[inline]
    fn clear(&self) -> Result<()> {
        self.with_lock(|inner| *inner = Inner::default())
    }
}

// ── Storage (async) implementation ──────────────────────────────────────

#[cfg(feature = "async")]
impl super::Storage for InMemoryStorage {
    #[inline]
    fn agents(&self) -> impl Future<Output = Result<Vec<Agent>>> + Send {
        future::ready(self.with_lock(|inner| inner.agents.clone()))
    }

    #[inline]
    fn merchants(&self) -> impl Future<Output = Result<Vec<Merchant>>> + Send {
        future::ready(self.with_lock(|inner| inner.merchants.clone()))
    }

    #[inline]
    fn deposits(&self) -> impl Future<Output = Result<Vec<Deposit>>> + Send {
        future::ready(self.with_lock(|inner| inner.deposits.clone()))
    }

    #[inline]
    fn transactions(&self) -> impl Future<Output = Result<Vec<Transaction>>> + Send {
        future::ready(self.with_lock(|inner| inner.transactions.clone()))
    }

    #[inline]
    fn coupons(&self) -> impl Future<Output = Result<Vec<CouponCode>>> + Send {
        future::ready(self.with_lock(|inner| inner.coupons.clone()))
    }

    #[inline]
    fn commit(&self, batch: LedgerBatch) -> impl Future<Output = Result<()>> + Send {
        future::ready(self.commit_locked(batch))
    }

    #[inline]
    fn clear(&self) -> impl Future<Output = Result<()>> + Send {
        future::ready(self.with_lock(|inner| *inner = Inner::default()))
    }
}
