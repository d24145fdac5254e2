//! Pluggable storage backends for persisting the ledger.
//!
//! This module defines the [`Storage`] (async) and [`BlockingStorage`]
//! (blocking) traits via a shared macro, mirroring the engine generation
//! pattern in [`crate::ledger`].
//!
//! Backends never interpret ledger rules. They store what they are given,
//! but every write goes through [`LedgerBatch`], which is applied
//! all-or-nothing after its [`Precondition`]s have been checked.

mod batch;
#[cfg(feature = "storage-file")]
mod file;
mod memory;

pub use batch::{LedgerBatch, Precondition};
#[cfg(feature = "storage-file")]
pub use file::FileStorage;
pub use memory::InMemoryStorage;

/// Generates a storage trait (async or blocking) with all entity methods.
///
/// Uses `@methods` to define the method list once, and `@method` to render
/// each method in async (`impl Future + Send`) or blocking (`fn`) style.
macro_rules! define_storage {
    // ── Entry points ────────────────────────────────────────────────
    (
        trait_name: $trait_name:ident,
        trait_doc: $trait_doc:expr,
        mode: async_mode,
    ) => {
        #[doc = $trait_doc]
        pub trait $trait_name: core::fmt::Debug + Send + Sync {
            define_storage!(@methods async_mode);
        }
    };
    (
        trait_name: $trait_name:ident,
        trait_doc: $trait_doc:expr,
        mode: blocking,
    ) => {
        #[doc = $trait_doc]
        pub trait $trait_name: core::fmt::Debug + Send + Sync {
            define_storage!(@methods blocking);
        }
    };

    // ── Single method list (shared between both variants) ───────────
    (@methods $mode:ident) => {
        // Read
        define_storage!(@method $mode, agents,
            "Returns all stored agents.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Agent>>);
        define_storage!(@method $mode, merchants,
            "Returns all stored merchants.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Merchant>>);
        define_storage!(@method $mode, deposits,
            "Returns all stored deposits.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Deposit>>);
        define_storage!(@method $mode, transactions,
            "Returns all stored transactions.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Transaction>>);
        define_storage!(@method $mode, coupons,
            "Returns all stored coupons.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<CouponCode>>);

        // Write
        define_storage!(@method $mode, commit,
            "Checks the batch preconditions and applies every write of the batch, or none.\n\n# Errors\n\nReturns [`LedgerError::Conflict`](crate::error::LedgerError::Conflict), [`LedgerError::DuplicateCouponCode`](crate::error::LedgerError::DuplicateCouponCode) or [`LedgerError::DuplicateReceipt`](crate::error::LedgerError::DuplicateReceipt) if a precondition fails, or a storage error if the backend fails to write.",
            batch: LedgerBatch, -> Result<()>);

        // Clear
        define_storage!(@method $mode, clear,
            "Removes all stored data.\n\n# Errors\n\nReturns an error if the storage backend fails to write.",
            -> Result<()>);
    };

    // ── Blocking method renderer ────────────────────────────────────
    (@method blocking, $name:ident, $doc:expr,
     $($param:ident: $param_ty:ty,)* -> $ret:ty) => {
        #[doc = $doc]
        fn $name(&self $(, $param: $param_ty)*) -> $ret;
    };

    // ── Async method renderer (returns impl Future + Send) ──────────
    (@method async_mode, $name:ident, $doc:expr,
     $($param:ident: $param_ty:ty,)* -> $ret:ty) => {
        #[doc = $doc]
        fn $name(&self $(, $param: $param_ty)*)
            -> impl core::future::Future<Output = $ret> + Send;
    };
}

#[cfg(feature = "async")]
mod async_storage {
    //! Async storage trait definition.

    use super::LedgerBatch;
    use crate::error::Result;
    use crate::models::{Agent, CouponCode, Deposit, Merchant, Transaction};

    define_storage! {
        trait_name: Storage,
        trait_doc: "Async storage backend for persisting the ledger.\n\nAll methods take `&self`; implementations should use interior mutability\n(e.g. `Mutex`) for thread-safe mutation.",
        mode: async_mode,
    }
}

#[cfg(feature = "blocking")]
mod blocking_storage {
    //! Blocking storage trait definition.

    use super::LedgerBatch;
    use crate::error::Result;
    use crate::models::{Agent, CouponCode, Deposit, Merchant, Transaction};

    define_storage! {
        trait_name: BlockingStorage,
        trait_doc: "Blocking storage backend for persisting the ledger.\n\nAll methods take `&self`; implementations should use interior mutability\n(e.g. `Mutex`) for thread-safe mutation.",
        mode: blocking,
    }
}

#[cfg(feature = "async")]
pub use async_storage::Storage;
#[cfg(feature = "blocking")]
pub use blocking_storage::BlockingStorage;
