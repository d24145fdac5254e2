//! Agent-collected cash deposit model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AgentId, DepositId, DepositStatus, MerchantId};

/// Cash collected by an agent from a merchant.
///
/// Deposits are append-only. The single permitted change is the
/// `Locked → Matured` release once `maturity_date` has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    /// Unique identifier (UUID).
    pub id: DepositId,
    /// Merchant credited with the deposit.
    pub merchant: MerchantId,
    /// Agent who collected the cash.
    pub agent: AgentId,
    /// Collected amount (> 0).
    pub amount: Decimal,
    /// Printed receipt number, unique across the ledger.
    pub receipt_number: String,
    /// When the amount becomes available.
    pub maturity_date: DateTime<Utc>,
    /// Maturity state.
    pub status: DepositStatus,
    /// Collection timestamp.
    pub created: DateTime<Utc>,
    /// When the deposit was released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl Deposit {
    /// Returns `true` if the deposit is locked and due for release at `now`.
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DepositStatus::Locked && self.maturity_date <= now
    }
}
