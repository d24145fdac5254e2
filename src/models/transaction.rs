//! Ledger transaction model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Actor, Effect, MerchantId, TransactionId, TransactionKind, TransactionStatus};

/// One entry of a merchant's append-only audit trail.
///
/// `balance_after - balance_before` always equals [`Transaction::signed_amount`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique identifier (UUID).
    pub id: TransactionId,
    /// Merchant whose wallet moved.
    pub merchant: MerchantId,
    /// Position in the merchant's chain, starting at 1.
    pub sequence: u64,
    /// Kind of movement.
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Magnitude of the movement (>= 0).
    pub amount: Decimal,
    /// Settlement state.
    pub status: TransactionStatus,
    /// Wallet balance before the movement.
    pub balance_before: Decimal,
    /// Wallet balance after the movement.
    pub balance_after: Decimal,
    /// Related record (deposit, redemption or original transaction ID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Party who performed the operation.
    pub actor: Actor,
    /// Free-form note (adjustment reason, payout reference, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

impl Transaction {
    /// Returns the balance change implied by the kind and amount.
    #[inline]
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        match self.kind.effect() {
            Effect::Credit => self.amount,
            Effect::Debit => -self.amount,
            Effect::Neutral => Decimal::ZERO,
        }
    }

    /// Returns the balance change actually recorded by the snapshots, or
    /// `None` if it is out of the decimal range.
    #[inline]
    #[must_use]
    pub fn recorded_delta(&self) -> Option<Decimal> {
        self.balance_after.checked_sub(self.balance_before)
    }
}
