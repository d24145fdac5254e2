//! Atomic write unit shared by every storage backend.

use core::hash::Hash;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::{
    Agent, AgentId, CouponCode, CouponId, Deposit, DepositId, Merchant, MerchantId, Transaction,
    TransactionId,
};

/// A condition the stored state must satisfy for a batch to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "camelCase")]
pub enum Precondition {
    /// The agent's stored revision equals `revision` (0 = absent).
    AgentRevision {
        /// Agent to check.
        id: AgentId,
        /// Expected revision.
        revision: u64,
    },
    /// The merchant's stored revision equals `revision` (0 = absent).
    MerchantRevision {
        /// Merchant to check.
        id: MerchantId,
        /// Expected revision.
        revision: u64,
    },
    /// The coupon's stored revision equals `revision` (0 = absent).
    CouponRevision {
        /// Coupon to check.
        id: CouponId,
        /// Expected revision.
        revision: u64,
    },
    /// No stored coupon uses `code`.
    CouponCodeAvailable {
        /// Normalised code.
        code: String,
    },
    /// No stored deposit uses `receipt`.
    ReceiptAvailable {
        /// Receipt number.
        receipt: String,
    },
}

/// Everything one ledger operation writes, applied all-or-nothing.
///
/// Items are upserted by ID. Preconditions are checked against the
/// stored state before anything is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerBatch {
    /// Checks evaluated before the batch applies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<Precondition>,
    /// Agents to insert or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<Agent>,
    /// Merchants to insert or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merchants: Vec<Merchant>,
    /// Deposits to insert or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposits: Vec<Deposit>,
    /// Transactions to insert or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Transaction>,
    /// Coupons to insert or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coupons: Vec<CouponCode>,
}

impl LedgerBatch {
    /// Creates an empty batch.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a precondition.
    #[inline]
    #[must_use]
    pub fn require(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// Adds an agent write guarded by its previous revision.
    #[inline]
    #[must_use]
    pub fn put_agent(mut self, agent: Agent, previous_revision: u64) -> Self {
        self.preconditions.push(Precondition::AgentRevision {
            id: agent.id.clone(),
            revision: previous_revision,
        });
        self.agents.push(agent);
        self
    }

    /// Adds a merchant write guarded by its previous revision.
    #[inline]
    #[must_use]
    pub fn put_merchant(mut self, merchant: Merchant, previous_revision: u64) -> Self {
        self.preconditions.push(Precondition::MerchantRevision {
            id: merchant.id.clone(),
            revision: previous_revision,
        });
        self.merchants.push(merchant);
        self
    }

    /// Adds a coupon write guarded by its previous revision.
    #[inline]
    #[must_use]
    pub fn put_coupon(mut self, coupon: CouponCode, previous_revision: u64) -> Self {
        self.preconditions.push(Precondition::CouponRevision {
            id: coupon.id.clone(),
            revision: previous_revision,
        });
        self.coupons.push(coupon);
        self
    }

    /// Adds a deposit write.
    #[inline]
    #[must_use]
    pub fn put_deposit(mut self, deposit: Deposit) -> Self {
        self.deposits.push(deposit);
        self
    }

    /// Adds a transaction write.
    #[inline]
    #[must_use]
    pub fn put_transaction(mut self, transaction: Transaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    /// Returns `true` if the batch writes nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
            && self.merchants.is_empty()
            && self.deposits.is_empty()
            && self.transactions.is_empty()
            && self.coupons.is_empty()
    }
}

/// Borrowed view of the stored entities a precondition can inspect.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StoredView<'state> {
    /// Stored agents.
    pub(crate) agents: &'state [Agent],
    /// Stored merchants.
    pub(crate) merchants: &'state [Merchant],
    /// Stored deposits.
    pub(crate) deposits: &'state [Deposit],
    /// Stored coupons.
    pub(crate) coupons: &'state [CouponCode],
}

/// Fails with the matching error for the first unmet precondition.
pub(crate) fn check_preconditions(
    preconditions: &[Precondition],
    view: StoredView<'_>,
) -> Result<()> {
    for precondition in preconditions {
        match *precondition {
            Precondition::AgentRevision { ref id, revision } => {
                let stored = view
                    .agents
                    .iter()
                    .find(|a| a.id == *id)
                    .map_or(0, |a| a.revision);
                if stored != revision {
                    return Err(conflict("agent", id.as_inner()));
                }
            }
            Precondition::MerchantRevision { ref id, revision } => {
                let stored = view
                    .merchants
                    .iter()
                    .find(|m| m.id == *id)
                    .map_or(0, |m| m.revision);
                if stored != revision {
                    return Err(conflict("merchant", id.as_inner()));
                }
            }
            Precondition::CouponRevision { ref id, revision } => {
                let stored = view
                    .coupons
                    .iter()
                    .find(|c| c.id == *id)
                    .map_or(0, |c| c.revision);
                if stored != revision {
                    return Err(conflict("coupon", id.as_inner()));
                }
            }
            Precondition::CouponCodeAvailable { ref code } => {
                if view.coupons.iter().any(|c| c.code == *code) {
                    return Err(LedgerError::DuplicateCouponCode(code.clone()));
                }
            }
            Precondition::ReceiptAvailable { ref receipt } => {
                if view.deposits.iter().any(|d| d.receipt_number == *receipt) {
                    return Err(LedgerError::DuplicateReceipt(receipt.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Builds a [`LedgerError::Conflict`].
fn conflict(entity: &'static str, id: &str) -> LedgerError {
    tracing::warn!(entity, id, "precondition failed: concurrent modification");
    LedgerError::Conflict {
        entity,
        id: id.to_owned(),
    }
}

/// Merges `new_items` into `existing` by key, replacing duplicates in place
/// and appending new keys in order.
pub(crate) fn upsert_by_key<T, K>(existing: &mut Vec<T>, new_items: Vec<T>, key_fn: fn(&T) -> K)
where
    K: Hash + Eq,
{
    let mut positions: HashMap<K, usize> = existing
        .iter()
        .enumerate()
        .map(|(idx, item)| (key_fn(item), idx))
        .collect();
    for item in new_items {
        let key = key_fn(&item);
        if let Some(slot) = positions.get(&key).and_then(|&idx| existing.get_mut(idx)) {
            *slot = item;
        } else {
            let _previous = positions.insert(key, existing.len());
            existing.push(item);
        }
    }
}

/// Key extractor for agents.
pub(crate) fn agent_key(agent: &Agent) -> AgentId {
    agent.id.clone()
}

/// Key extractor for merchants.
pub(crate) fn merchant_key(merchant: &Merchant) -> MerchantId {
    merchant.id.clone()
}

/// Key extractor for deposits.
pub(crate) fn deposit_key(deposit: &Deposit) -> DepositId {
    deposit.id.clone()
}

/// Key extractor for transactions.
pub(crate) fn transaction_key(transaction: &Transaction) -> TransactionId {
    transaction.id.clone()
}

/// Key extractor for coupons.
pub(crate) fn coupon_key(coupon: &CouponCode) -> CouponId {
    coupon.id.clone()
}
