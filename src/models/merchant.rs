//! Merchant and wallet models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AgentId, MerchantId, MerchantStatus};

/// Business details supplied when an agent registers a merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessProfile {
    /// Trading name shown to customers.
    pub business_name: String,
    /// Name of the owner or primary contact.
    pub owner_name: String,
    /// Contact phone number.
    pub phone: String,
    /// Contact email.
    pub email: String,
    /// Postal address.
    pub address: String,
    /// Business category (e.g. "grocery", "salon").
    pub category: String,
}

/// Incentive wallet embedded in every merchant.
///
/// `balance` includes funds that are still maturing; only
/// [`Wallet::available`] may be spent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Total balance, including locked funds.
    pub balance: Decimal,
    /// Portion of the balance still maturing.
    pub locked_amount: Decimal,
    /// Date the last locked deposit matures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity_date: Option<DateTime<Utc>>,
}

impl Wallet {
    /// Returns the spendable part of the balance, saturating at the
    /// decimal bounds.
    #[inline]
    #[must_use]
    pub fn available(&self) -> Decimal {
        self.balance.saturating_sub(self.locked_amount)
    }
}

/// A business on the marketplace, owned by exactly one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    /// Unique identifier (UUID).
    pub id: MerchantId,
    /// Agent who registered and services this merchant.
    pub agent: AgentId,
    /// Business details.
    pub profile: BusinessProfile,
    /// Approval state.
    pub status: MerchantStatus,
    /// Incentive wallet.
    pub wallet: Wallet,
    /// Reason given when the merchant was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// When an admin approved the merchant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency revision (starts at 1).
    pub revision: u64,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub changed: DateTime<Utc>,
}

impl Merchant {
    /// Returns `true` if the merchant has been approved.
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == MerchantStatus::Approved
    }
}

/// Input for registering a new merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMerchant {
    /// Business details.
    pub profile: BusinessProfile,
}
