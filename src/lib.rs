//! Merchant incentive ledger for a marketplace network.
//!
//! Field agents onboard merchants and collect cash deposits into each
//! merchant's wallet. Deposits stay locked until they mature, after which
//! the funds pay for the discounts of the merchant's usage-limited coupons.
//! Every balance movement is an immutable, sequenced transaction.
//!
//! The [`ledger`] module exposes the engine in async ([`ledger::Ledger`])
//! and blocking ([`ledger::LedgerBlocking`]) flavours over any
//! [`storage`] backend.

pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod storage;
