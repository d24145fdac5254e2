//! Data models for the merchant incentive ledger.
//!
//! This module contains strongly-typed representations of every ledger
//! entity, newtype ID wrappers, and enumeration types for constrained
//! values.

mod actor;
mod agent;
mod coupon;
mod deposit;
mod enums;
mod ids;
mod merchant;
mod transaction;

pub use actor::Actor;
pub use agent::{Agent, NewAgent};
pub use chrono::{DateTime, NaiveDate, Utc};
pub use coupon::{CouponCode, NewCoupon, Redemption, RedemptionRequest};
pub use deposit::Deposit;
pub use enums::{
    AdjustmentDirection, AgentStatus, DepositStatus, DiscountType, Effect, MerchantStatus,
    RedemptionStatus, TransactionKind, TransactionStatus,
};
pub use ids::{AgentId, CouponId, DepositId, MerchantId, RedemptionId, TransactionId};
pub use merchant::{BusinessProfile, Merchant, NewMerchant, Wallet};
pub use rust_decimal::Decimal;
pub use transaction::Transaction;
