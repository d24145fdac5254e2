//! High-level ledger engine with integrated storage.
//!
//! [`Ledger`] (async) and [`LedgerBlocking`] (blocking) are generated from
//! one macro. Every mutating operation reads a snapshot of the stored
//! ledger, plans the change with the shared rules, and commits the result
//! as a single [`LedgerBatch`](crate::storage::LedgerBatch). A batch whose
//! preconditions no longer hold is rejected with
//! [`LedgerError::Conflict`](crate::error::LedgerError::Conflict) and the
//! caller may retry the operation.

mod audit;
mod plan;
mod receipt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use audit::{AuditIssue, AuditReport};

use crate::error::{LedgerError, Result};
use crate::models::{
    AdjustmentDirection, AgentId, CouponCode, DateTime, Deposit, DepositStatus, Merchant,
    MerchantId, MerchantStatus, NaiveDate, Redemption, Transaction, TransactionKind,
    TransactionStatus, Utc, Wallet,
};

/// Composable filter for querying transactions.
///
/// All set criteria must match.
///
/// # Examples
///
/// ```
/// use marketplace_ledger::ledger::TransactionFilter;
/// use marketplace_ledger::models::{MerchantId, NaiveDate, TransactionKind};
///
/// let filter = TransactionFilter::new()
///     .merchant(MerchantId::new("m-1".to_owned()))
///     .kind(TransactionKind::Redemption)
///     .date_range(
///         NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
///         NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
///     );
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Merchant whose wallet moved.
    pub merchant: Option<MerchantId>,
    /// Kind of movement.
    pub kind: Option<TransactionKind>,
    /// Start date (inclusive, UTC).
    pub date_from: Option<NaiveDate>,
    /// End date (inclusive, UTC).
    pub date_to: Option<NaiveDate>,
}

impl TransactionFilter {
    /// Creates an empty filter that matches all transactions.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one merchant.
    #[inline]
    #[must_use]
    pub fn merchant(mut self, id: MerchantId) -> Self {
        self.merchant = Some(id);
        self
    }

    /// Restricts to one kind of movement.
    #[inline]
    #[must_use]
    pub const fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restricts to transactions created within the given dates.
    #[inline]
    #[must_use]
    pub const fn date_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    /// Returns `true` if the transaction satisfies all set criteria.
    #[inline]
    pub(crate) fn matches(&self, tx: &Transaction) -> bool {
        let date = tx.created.date_naive();
        self.merchant.as_ref().is_none_or(|id| tx.merchant == *id)
            && self.kind.is_none_or(|kind| tx.kind == kind)
            && self.date_from.is_none_or(|from| date >= from)
            && self.date_to.is_none_or(|to| date <= to)
    }
}

/// Composable filter for querying deposits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DepositFilter {
    /// Credited merchant.
    pub merchant: Option<MerchantId>,
    /// Collecting agent.
    pub agent: Option<AgentId>,
    /// Maturity state.
    pub status: Option<DepositStatus>,
}

impl DepositFilter {
    /// Creates an empty filter that matches all deposits.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one merchant.
    #[inline]
    #[must_use]
    pub fn merchant(mut self, id: MerchantId) -> Self {
        self.merchant = Some(id);
        self
    }

    /// Restricts to deposits collected by one agent.
    #[inline]
    #[must_use]
    pub fn agent(mut self, id: AgentId) -> Self {
        self.agent = Some(id);
        self
    }

    /// Restricts to one maturity state.
    #[inline]
    #[must_use]
    pub const fn status(mut self, status: DepositStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns `true` if the deposit satisfies all set criteria.
    #[inline]
    pub(crate) fn matches(&self, deposit: &Deposit) -> bool {
        self.merchant.as_ref().is_none_or(|id| deposit.merchant == *id)
            && self.agent.as_ref().is_none_or(|id| deposit.agent == *id)
            && self.status.is_none_or(|status| deposit.status == status)
    }
}

/// A manual balance correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
    /// Credit or debit.
    pub direction: AdjustmentDirection,
    /// Amount to move (> 0).
    pub amount: Decimal,
    /// Why the correction was made.
    pub reason: String,
}

/// Result of collecting a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositReceipt {
    /// The stored deposit, including its receipt number.
    pub deposit: Deposit,
    /// The deposit transaction.
    pub transaction: Transaction,
    /// Wallet after the deposit.
    pub wallet: Wallet,
}

/// Result of redeeming a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    /// Coupon after the redemption.
    pub coupon: CouponCode,
    /// The new redemption record.
    pub redemption: Redemption,
    /// The debit that funded the discount.
    pub transaction: Transaction,
    /// Wallet after the redemption.
    pub wallet: Wallet,
    /// Release transactions written for deposits that matured first.
    pub released: Vec<Transaction>,
}

/// Point-in-time view of a merchant's wallet and activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    /// Merchant.
    pub merchant: MerchantId,
    /// Business name.
    pub business_name: String,
    /// Approval state.
    pub status: MerchantStatus,
    /// Total balance, including locked funds.
    pub balance: Decimal,
    /// Funds still maturing.
    pub locked_amount: Decimal,
    /// Spendable funds.
    pub available: Decimal,
    /// Date the last locked deposit matures.
    pub maturity_date: Option<DateTime<Utc>>,
    /// Sum of all deposits.
    pub total_deposited: Decimal,
    /// Sum of redemption discounts that were not reversed.
    pub total_redeemed: Decimal,
    /// Sum of withdrawals.
    pub total_withdrawn: Decimal,
    /// Coupons that are still active.
    pub active_coupons: usize,
}

impl WalletSummary {
    /// Summarises a merchant from its transactions and coupons.
    fn build(merchant: &Merchant, snapshot: &plan::Snapshot) -> Result<Self> {
        let mut total_deposited = Decimal::ZERO;
        let mut total_redeemed = Decimal::ZERO;
        let mut total_withdrawn = Decimal::ZERO;
        for tx in snapshot.transactions_of(&merchant.id) {
            let (total, what) = match tx.kind {
                TransactionKind::Deposit => (&mut total_deposited, "total deposited"),
                TransactionKind::Redemption if tx.status == TransactionStatus::Completed => {
                    (&mut total_redeemed, "total redeemed")
                }
                TransactionKind::Withdrawal => (&mut total_withdrawn, "total withdrawn"),
                TransactionKind::Redemption
                | TransactionKind::Release
                | TransactionKind::Reversal
                | TransactionKind::AdjustmentCredit
                | TransactionKind::AdjustmentDebit => continue,
            };
            *total = total
                .checked_add(tx.amount)
                .ok_or_else(|| LedgerError::amount_overflow(what))?;
        }
        let active_coupons = snapshot
            .coupons
            .iter()
            .filter(|c| c.merchant == merchant.id && c.active)
            .count();
        Ok(Self {
            merchant: merchant.id.clone(),
            business_name: merchant.profile.business_name.clone(),
            status: merchant.status,
            balance: merchant.wallet.balance,
            locked_amount: merchant.wallet.locked_amount,
            available: merchant.wallet.available(),
            maturity_date: merchant.wallet.maturity_date,
            total_deposited,
            total_redeemed,
            total_withdrawn,
            active_coupons,
        })
    }
}

/// Orders transactions by time, then by merchant chain position.
fn sort_transactions(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.merchant.cmp(&b.merchant))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

/// Generates a high-level ledger engine (async or blocking).
macro_rules! define_ledger {
    (
        ledger_name: $ledger:ident,
        builder_name: $builder:ident,
        storage_trait: $storage_trait:ident,
        ledger_doc: $ledger_doc:expr,
        builder_doc: $builder_doc:expr,
        $(async_kw: $async_kw:tt,)?
        $(await_kw: $await_ext:tt,)?
    ) => {
        #[doc = $builder_doc]
        #[derive(Debug)]
        pub struct $builder<S: $storage_trait> {
            /// Storage backend.
            storage: Option<S>,
            /// Ledger rules.
            config: Option<LedgerConfig>,
        }

        impl<S: $storage_trait> $builder<S> {
            /// Sets the storage backend.
            #[inline]
            #[must_use]
            pub fn storage(mut self, storage: S) -> Self {
                self.storage = Some(storage);
                self
            }

            /// Sets the ledger rules. Defaults to [`LedgerConfig::default`].
            #[inline]
            #[must_use]
            pub fn config(mut self, config: LedgerConfig) -> Self {
                self.config = Some(config);
                self
            }

            /// Builds the ledger.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Config`] if no storage was provided or
            /// the configuration is invalid.
            #[inline]
            pub fn build(self) -> Result<$ledger<S>> {
                let storage = self.storage.ok_or_else(|| {
                    LedgerError::Config("storage backend is required".to_owned())
                })?;
                let config = self.config.unwrap_or_default();
                config.validate()?;
                Ok($ledger { storage, config })
            }
        }

        #[doc = $ledger_doc]
        #[derive(Debug)]
        pub struct $ledger<S: $storage_trait> {
            /// Storage backend.
            storage: S,
            /// Ledger rules.
            config: LedgerConfig,
        }

        impl<S: $storage_trait> $ledger<S> {
            /// Creates a new builder for configuring the ledger.
            #[inline]
            #[must_use]
            pub const fn builder() -> $builder<S> {
                $builder {
                    storage: None,
                    config: None,
                }
            }

            /// Returns the active configuration.
            #[inline]
            #[must_use]
            pub const fn config(&self) -> &LedgerConfig {
                &self.config
            }

            /// Returns the storage backend.
            #[inline]
            #[must_use]
            pub const fn storage(&self) -> &S {
                &self.storage
            }

            /// Reads everything the planners need.
            $($async_kw)? fn snapshot(&self) -> Result<Snapshot> {
                Ok(Snapshot {
                    agents: self.storage.agents() $( .$await_ext )? ?,
                    merchants: self.storage.merchants() $( .$await_ext )? ?,
                    deposits: self.storage.deposits() $( .$await_ext )? ?,
                    transactions: self.storage.transactions() $( .$await_ext )? ?,
                    coupons: self.storage.coupons() $( .$await_ext )? ?,
                })
            }

            // ── Network management ──────────────────────────────────

            /// Registers a field agent. Admin only.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`] for non-admins,
            /// [`LedgerError::Validation`] for incomplete contact details,
            /// or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor))]
            pub $($async_kw)? fn register_agent(
                &self,
                actor: &Actor,
                new: NewAgent,
                now: DateTime<Utc>,
            ) -> Result<Agent> {
                let (agent, batch) = plan::register_agent(actor, new, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(agent = %agent.id, name = %agent.name, "agent registered");
                Ok(agent)
            }

            /// Activates or suspends an agent. Admin only.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::Conflict`] or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, agent = %id, %status))]
            pub $($async_kw)? fn set_agent_status(
                &self,
                actor: &Actor,
                id: &AgentId,
                status: AgentStatus,
                now: DateTime<Utc>,
            ) -> Result<Agent> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (agent, batch) = plan::set_agent_status(&snapshot, actor, id, status, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(agent = %agent.id, status = %agent.status, "agent status set");
                Ok(agent)
            }

            /// Registers a pending merchant under the acting agent.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`] unless the actor is an
            /// agent, [`LedgerError::InvalidState`] if the agent is
            /// suspended, [`LedgerError::Validation`] for an incomplete
            /// profile, or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor))]
            pub $($async_kw)? fn register_merchant(
                &self,
                actor: &Actor,
                new: NewMerchant,
                now: DateTime<Utc>,
            ) -> Result<Merchant> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (merchant, batch) = plan::register_merchant(&snapshot, actor, new, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(
                    merchant = %merchant.id,
                    agent = %merchant.agent,
                    business = %merchant.profile.business_name,
                    "merchant registered"
                );
                Ok(merchant)
            }

            /// Approves a pending merchant. Admin only.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::InvalidState`] unless the merchant is pending,
            /// [`LedgerError::Conflict`] or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, merchant = %id))]
            pub $($async_kw)? fn approve_merchant(
                &self,
                actor: &Actor,
                id: &MerchantId,
                now: DateTime<Utc>,
            ) -> Result<Merchant> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (merchant, batch) = plan::approve_merchant(&snapshot, actor, id, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(merchant = %merchant.id, "merchant approved");
                Ok(merchant)
            }

            /// Rejects a pending merchant with a reason. Admin only.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::Validation`] for a blank reason,
            /// [`LedgerError::InvalidState`] unless the merchant is pending,
            /// [`LedgerError::Conflict`] or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, merchant = %id))]
            pub $($async_kw)? fn reject_merchant(
                &self,
                actor: &Actor,
                id: &MerchantId,
                reason: &str,
                now: DateTime<Utc>,
            ) -> Result<Merchant> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (merchant, batch) = plan::reject_merchant(&snapshot, actor, id, reason, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(merchant = %merchant.id, reason, "merchant rejected");
                Ok(merchant)
            }

            // ── Deposits and maturity ───────────────────────────────

            /// Records cash collected by the merchant's agent. The amount
            /// is credited to the balance and locked until the maturity
            /// date.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`] unless the actor is the
            /// merchant's agent, [`LedgerError::InvalidState`] for a
            /// suspended agent or unapproved merchant,
            /// [`LedgerError::Validation`] for a non-positive amount,
            /// [`LedgerError::DuplicateReceipt`] or
            /// [`LedgerError::Conflict`] on concurrent writes, or a storage
            /// error.
            #[tracing::instrument(skip_all, fields(actor = %actor, merchant = %merchant, %amount))]
            pub $($async_kw)? fn collect_deposit(
                &self,
                actor: &Actor,
                merchant: &MerchantId,
                amount: Decimal,
                now: DateTime<Utc>,
            ) -> Result<DepositReceipt> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (receipt, batch) =
                    plan::collect_deposit(&snapshot, &self.config, actor, merchant, amount, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(
                    receipt = %receipt.deposit.receipt_number,
                    maturity = %receipt.deposit.maturity_date,
                    balance = %receipt.wallet.balance,
                    "deposit collected"
                );
                Ok(receipt)
            }

            /// Releases every locked deposit whose maturity date has
            /// passed. Running it again at the same time does nothing.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Conflict`] on concurrent writes, or a
            /// storage error.
            #[tracing::instrument(skip_all)]
            pub $($async_kw)? fn release_matured(
                &self,
                now: DateTime<Utc>,
            ) -> Result<Vec<Transaction>> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (released, batch) = plan::release_matured(&snapshot, None, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(released = released.len(), "matured deposits released");
                Ok(released)
            }

            /// Releases the matured deposits of one merchant.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::NotFound`], [`LedgerError::Conflict`]
            /// or a storage error.
            #[tracing::instrument(skip_all, fields(merchant = %merchant))]
            pub $($async_kw)? fn release_matured_for(
                &self,
                merchant: &MerchantId,
                now: DateTime<Utc>,
            ) -> Result<Vec<Transaction>> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (released, batch) = plan::release_matured(&snapshot, Some(merchant), now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(released = released.len(), "matured deposits released");
                Ok(released)
            }

            // ── Coupons ─────────────────────────────────────────────

            /// Issues a coupon for an approved merchant. Merchant (own
            /// coupons) or admin.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::InvalidState`] for an unapproved merchant,
            /// [`LedgerError::Validation`] for bad terms or code,
            /// [`LedgerError::DuplicateCouponCode`], or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, merchant = %new.merchant))]
            pub $($async_kw)? fn create_coupon(
                &self,
                actor: &Actor,
                new: NewCoupon,
                now: DateTime<Utc>,
            ) -> Result<CouponCode> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (coupon, batch) = plan::create_coupon(&snapshot, actor, new, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(code = %coupon.code, limit = coupon.usage_limit, "coupon created");
                Ok(coupon)
            }

            /// Deactivates a coupon. Merchant (own coupons) or admin.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::Conflict`] or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, code = %code))]
            pub $($async_kw)? fn deactivate_coupon(
                &self,
                actor: &Actor,
                code: &str,
                now: DateTime<Utc>,
            ) -> Result<CouponCode> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (coupon, batch) = plan::deactivate_coupon(&snapshot, actor, code, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(code = %coupon.code, "coupon deactivated");
                Ok(coupon)
            }

            /// Previews the discount a coupon grants on an order. Runs
            /// every eligibility rule except the wallet check.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::NotFound`],
            /// [`LedgerError::CouponRejected`], [`LedgerError::Validation`]
            /// or a storage error.
            #[tracing::instrument(skip_all, fields(code = %code, %order_amount))]
            pub $($async_kw)? fn quote_coupon(
                &self,
                code: &str,
                order_amount: Decimal,
                now: DateTime<Utc>,
            ) -> Result<Decimal> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                plan::quote_coupon(&snapshot, code, order_amount, now)
            }

            /// Redeems a coupon at checkout, funding the discount from the
            /// merchant's available balance. Matured deposits are released
            /// first. Merchant (own coupons) or admin.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::CouponRejected`],
            /// [`LedgerError::InsufficientFunds`],
            /// [`LedgerError::InvalidState`] for an unapproved merchant,
            /// [`LedgerError::Conflict`] on concurrent redemption, or a
            /// storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, code = %code))]
            pub $($async_kw)? fn redeem_coupon(
                &self,
                actor: &Actor,
                code: &str,
                request: RedemptionRequest,
                now: DateTime<Utc>,
            ) -> Result<RedemptionReceipt> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (receipt, batch) = plan::redeem_coupon(&snapshot, actor, code, request, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(
                    code = %receipt.coupon.code,
                    discount = %receipt.redemption.discount_amount,
                    remaining = receipt.coupon.remaining_uses(),
                    "coupon redeemed"
                );
                Ok(receipt)
            }

            /// Reverses an applied redemption, crediting the discount back
            /// and freeing one use of the coupon. Admin only.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::InvalidState`] if already reversed,
            /// [`LedgerError::Conflict`] or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, code = %code, redemption = %redemption))]
            pub $($async_kw)? fn reverse_redemption(
                &self,
                actor: &Actor,
                code: &str,
                redemption: &RedemptionId,
                reason: &str,
                now: DateTime<Utc>,
            ) -> Result<Transaction> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (reversal, batch) =
                    plan::reverse_redemption(&snapshot, actor, code, redemption, reason, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(amount = %reversal.amount, "redemption reversed");
                Ok(reversal)
            }

            // ── Administrative movements ────────────────────────────

            /// Applies a manual credit or debit. Admin only; debits are
            /// bounded by the available balance.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::Validation`],
            /// [`LedgerError::InsufficientFunds`],
            /// [`LedgerError::Conflict`] or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, merchant = %merchant))]
            pub $($async_kw)? fn adjust_balance(
                &self,
                actor: &Actor,
                merchant: &MerchantId,
                adjustment: Adjustment,
                now: DateTime<Utc>,
            ) -> Result<Transaction> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (tx, batch) = plan::adjust_balance(&snapshot, actor, merchant, adjustment, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(kind = %tx.kind, amount = %tx.amount, balance = %tx.balance_after, "balance adjusted");
                Ok(tx)
            }

            /// Records a payout of available balance. Admin only.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::Forbidden`], [`LedgerError::NotFound`],
            /// [`LedgerError::Validation`],
            /// [`LedgerError::InsufficientFunds`],
            /// [`LedgerError::Conflict`] or a storage error.
            #[tracing::instrument(skip_all, fields(actor = %actor, merchant = %merchant, %amount))]
            pub $($async_kw)? fn record_withdrawal(
                &self,
                actor: &Actor,
                merchant: &MerchantId,
                amount: Decimal,
                reference: &str,
                now: DateTime<Utc>,
            ) -> Result<Transaction> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let (tx, batch) =
                    plan::record_withdrawal(&snapshot, actor, merchant, amount, reference, now)?;
                self.storage.commit(batch) $( .$await_ext )? ?;
                tracing::info!(balance = %tx.balance_after, "withdrawal recorded");
                Ok(tx)
            }

            // ── Queries ─────────────────────────────────────────────

            /// Returns all agents.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[inline]
            pub $($async_kw)? fn agents(&self) -> Result<Vec<Agent>> {
                self.storage.agents() $( .$await_ext )?
            }

            /// Looks up an agent by ID.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn agent(&self, id: &AgentId) -> Result<Option<Agent>> {
                let all = self.storage.agents() $( .$await_ext )? ?;
                Ok(all.into_iter().find(|a| a.id == *id))
            }

            /// Returns all merchants.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[inline]
            pub $($async_kw)? fn merchants(&self) -> Result<Vec<Merchant>> {
                self.storage.merchants() $( .$await_ext )?
            }

            /// Returns the merchants owned by one agent.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn merchants_by_agent(&self, agent: &AgentId) -> Result<Vec<Merchant>> {
                let all = self.storage.merchants() $( .$await_ext )? ?;
                Ok(all.into_iter().filter(|m| m.agent == *agent).collect())
            }

            /// Looks up a merchant by ID.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn merchant(&self, id: &MerchantId) -> Result<Option<Merchant>> {
                let all = self.storage.merchants() $( .$await_ext )? ?;
                Ok(all.into_iter().find(|m| m.id == *id))
            }

            /// Returns deposits matching the filter, oldest first.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn deposits(&self, filter: &DepositFilter) -> Result<Vec<Deposit>> {
                let all = self.storage.deposits() $( .$await_ext )? ?;
                let mut matching: Vec<Deposit> =
                    all.into_iter().filter(|d| filter.matches(d)).collect();
                matching.sort_by_key(|d| d.created);
                Ok(matching)
            }

            /// Finds a deposit by receipt number (case-insensitive).
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn find_deposit_by_receipt(
                &self,
                receipt: &str,
            ) -> Result<Option<Deposit>> {
                let all = self.storage.deposits() $( .$await_ext )? ?;
                let wanted = receipt.trim();
                Ok(all
                    .into_iter()
                    .find(|d| d.receipt_number.eq_ignore_ascii_case(wanted)))
            }

            /// Returns transactions matching the filter, ordered by time and
            /// chain position.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn transactions(
                &self,
                filter: &TransactionFilter,
            ) -> Result<Vec<Transaction>> {
                let all = self.storage.transactions() $( .$await_ext )? ?;
                let mut matching: Vec<Transaction> =
                    all.into_iter().filter(|tx| filter.matches(tx)).collect();
                sort_transactions(&mut matching);
                Ok(matching)
            }

            /// Returns the coupons issued by one merchant.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn coupons_for(&self, merchant: &MerchantId) -> Result<Vec<CouponCode>> {
                let all = self.storage.coupons() $( .$await_ext )? ?;
                Ok(all.into_iter().filter(|c| c.merchant == *merchant).collect())
            }

            /// Finds a coupon by code (case-insensitive).
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            pub $($async_kw)? fn find_coupon(&self, code: &str) -> Result<Option<CouponCode>> {
                let all = self.storage.coupons() $( .$await_ext )? ?;
                let wanted = code.trim().to_uppercase();
                Ok(all.into_iter().find(|c| c.code == wanted))
            }

            /// Summarises a merchant's wallet and activity.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::NotFound`] or a storage error.
            pub $($async_kw)? fn wallet_summary(&self, merchant: &MerchantId) -> Result<WalletSummary> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let stored = snapshot.merchant(merchant)?;
                WalletSummary::build(stored, &snapshot)
            }

            // ── Audit ───────────────────────────────────────────────

            /// Checks one merchant's wallet against its transactions,
            /// deposits and coupons.
            ///
            /// # Errors
            ///
            /// Returns [`LedgerError::NotFound`] or a storage error.
            #[tracing::instrument(skip_all, fields(merchant = %merchant))]
            pub $($async_kw)? fn audit_merchant(&self, merchant: &MerchantId) -> Result<AuditReport> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let stored = snapshot.merchant(merchant)?;
                Ok(audit::audit_merchant(&snapshot, stored))
            }

            /// Audits every merchant.
            ///
            /// # Errors
            ///
            /// Returns an error if the storage backend fails to read.
            #[tracing::instrument(skip_all)]
            pub $($async_kw)? fn audit_all(&self) -> Result<Vec<AuditReport>> {
                let snapshot = self.snapshot() $( .$await_ext )? ?;
                let reports: Vec<AuditReport> = snapshot
                    .merchants
                    .iter()
                    .map(|m| audit::audit_merchant(&snapshot, m))
                    .collect();
                let dirty = reports.iter().filter(|r| !r.is_clean()).count();
                tracing::info!(merchants = reports.len(), dirty, "audit finished");
                Ok(reports)
            }
        }
    };
}

// ── Async variant ───────────────────────────────────────────────────────

#[cfg(feature = "async")]
mod async_ledger {
    //! Async ledger engine.

    use rust_decimal::Decimal;

    use super::plan::{self, Snapshot};
    use super::{
        Adjustment, AuditReport, DepositFilter, DepositReceipt, RedemptionReceipt,
        TransactionFilter, WalletSummary, audit, sort_transactions,
    };
    use crate::config::LedgerConfig;
    use crate::error::{LedgerError, Result};
    use crate::models::{
        Actor, Agent, AgentId, AgentStatus, CouponCode, DateTime, Deposit, Merchant, MerchantId,
        NewAgent, NewCoupon, NewMerchant, RedemptionId, RedemptionRequest, Transaction, Utc,
    };
    use crate::storage::Storage;

    define_ledger! {
        ledger_name: Ledger,
        builder_name: LedgerBuilder,
        storage_trait: Storage,
        ledger_doc: "Async merchant incentive ledger with integrated storage.\n\nUse [`Ledger::builder()`] to construct an instance.",
        builder_doc: "Builder for constructing a [`Ledger`].",
        async_kw: async,
        await_kw: await,
    }
}

// ── Blocking variant ────────────────────────────────────────────────────

#[cfg(feature = "blocking")]
mod blocking_ledger {
    //! Blocking ledger engine.

    use rust_decimal::Decimal;

    use super::plan::{self, Snapshot};
    use super::{
        Adjustment, AuditReport, DepositFilter, DepositReceipt, RedemptionReceipt,
        TransactionFilter, WalletSummary, audit, sort_transactions,
    };
    use crate::config::LedgerConfig;
    use crate::error::{LedgerError, Result};
    use crate::models::{
        Actor, Agent, AgentId, AgentStatus, CouponCode, DateTime, Deposit, Merchant, MerchantId,
        NewAgent, NewCoupon, NewMerchant, RedemptionId, RedemptionRequest, Transaction, Utc,
    };
    use crate::storage::BlockingStorage;

    define_ledger! {
        ledger_name: LedgerBlocking,
        builder_name: LedgerBlockingBuilder,
        storage_trait: BlockingStorage,
        ledger_doc: "Blocking merchant incentive ledger with integrated storage.\n\nUse [`LedgerBlocking::builder()`] to construct an instance.",
        builder_doc: "Builder for constructing a [`LedgerBlocking`].",
    }
}

#[cfg(feature = "async")]
pub use async_ledger::{Ledger, LedgerBuilder};
#[cfg(feature = "blocking")]
pub use blocking_ledger::{LedgerBlocking, LedgerBlockingBuilder};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CouponRejection, LedgerError};
    use crate::models::{
        Actor, AgentStatus, BusinessProfile, DiscountType, NewAgent, NewCoupon, NewMerchant,
        RedemptionRequest, RedemptionStatus,
    };
    use crate::storage::InMemoryStorage;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn money(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn new_agent(name: &str) -> NewAgent {
        NewAgent {
            name: name.to_owned(),
            phone: "555-0100".to_owned(),
            email: format!("{}@example.com", name.to_lowercase()),
            region: Some("North".to_owned()),
        }
    }

    fn new_merchant(name: &str) -> NewMerchant {
        NewMerchant {
            profile: BusinessProfile {
                business_name: name.to_owned(),
                owner_name: "Anita".to_owned(),
                phone: "555-0101".to_owned(),
                email: "owner@shop.test".to_owned(),
                address: "12 Market Road".to_owned(),
                category: "grocery".to_owned(),
            },
        }
    }

    fn new_coupon(merchant: &MerchantId, code: &str, limit: u32) -> NewCoupon {
        NewCoupon {
            merchant: merchant.clone(),
            code: Some(code.to_owned()),
            description: Some("Ten percent off".to_owned()),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::TEN,
            min_order_amount: Some(money("20")),
            max_discount: Some(money("50")),
            usage_limit: limit,
            valid_from: at("2026-01-01T00:00:00Z"),
            valid_until: at("2026-12-31T23:59:59Z"),
        }
    }

    fn order(amount: &str) -> RedemptionRequest {
        RedemptionRequest {
            customer: "cust-42".to_owned(),
            order_amount: money(amount),
        }
    }

    #[test]
    fn transaction_filter_matches_all_criteria() {
        let tx = Transaction {
            id: crate::models::TransactionId::new("t-1".to_owned()),
            merchant: MerchantId::new("m-1".to_owned()),
            sequence: 1,
            kind: TransactionKind::Deposit,
            amount: Decimal::TEN,
            status: TransactionStatus::Completed,
            balance_before: Decimal::ZERO,
            balance_after: Decimal::TEN,
            reference_id: None,
            actor: Actor::Admin,
            note: None,
            created: at("2026-03-15T23:30:00Z"),
        };
        let march = |d| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        assert!(TransactionFilter::new().matches(&tx));
        assert!(
            TransactionFilter::new()
                .merchant(MerchantId::new("m-1".to_owned()))
                .kind(TransactionKind::Deposit)
                .date_range(march(15), march(15))
                .matches(&tx)
        );
        assert!(
            !TransactionFilter::new()
                .kind(TransactionKind::Withdrawal)
                .matches(&tx)
        );
        assert!(
            !TransactionFilter::new()
                .date_range(march(16), march(31))
                .matches(&tx)
        );
    }

    #[cfg(feature = "blocking")]
    mod blocking {
        use super::*;
        use crate::config::LedgerConfig;
        use crate::ledger::plan;
        use crate::storage::{BlockingStorage, LedgerBatch};

        type TestLedger = LedgerBlocking<InMemoryStorage>;

        fn ledger() -> TestLedger {
            LedgerBlocking::builder()
                .storage(InMemoryStorage::new())
                .build()
                .unwrap()
        }

        /// Registers an agent and an approved merchant.
        fn onboard(ledger: &TestLedger) -> (Actor, MerchantId) {
            let agent = ledger
                .register_agent(&Actor::Admin, new_agent("Ravi"), at("2026-01-01T08:00:00Z"))
                .unwrap();
            let agent_actor = Actor::Agent(agent.id);
            let merchant = ledger
                .register_merchant(
                    &agent_actor,
                    new_merchant("Fresh Mart"),
                    at("2026-01-02T08:00:00Z"),
                )
                .unwrap();
            let _approved = ledger
                .approve_merchant(&Actor::Admin, &merchant.id, at("2026-01-03T08:00:00Z"))
                .unwrap();
            (agent_actor, merchant.id)
        }

        #[test]
        fn build_without_storage_fails() {
            let err = LedgerBlocking::<InMemoryStorage>::builder()
                .build()
                .unwrap_err();
            assert!(matches!(err, LedgerError::Config(_)));
        }

        #[test]
        fn build_rejects_invalid_config() {
            let err = LedgerBlocking::builder()
                .storage(InMemoryStorage::new())
                .config(LedgerConfig::default().with_maturity_months(0))
                .build()
                .unwrap_err();
            assert!(matches!(err, LedgerError::Config(_)));
        }

        #[test]
        fn deposit_matures_then_funds_redemption() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let deposit = ledger
                .collect_deposit(&agent, &merchant, money("1000"), at("2026-01-18T10:00:00Z"))
                .unwrap();
            assert_eq!(deposit.wallet.available(), Decimal::ZERO);
            let coupon = ledger
                .create_coupon(
                    &Actor::Merchant(merchant.clone()),
                    new_coupon(&merchant, " save10 ", 5),
                    at("2026-01-20T00:00:00Z"),
                )
                .unwrap();
            assert_eq!(coupon.code, "SAVE10");

            let owner = Actor::Merchant(merchant.clone());
            let early = ledger
                .redeem_coupon(&owner, "SAVE10", order("200"), at("2026-02-01T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(early, LedgerError::InsufficientFunds { .. }));

            let receipt = ledger
                .redeem_coupon(&owner, "save10", order("200"), at("2026-04-18T10:00:00Z"))
                .unwrap();
            assert_eq!(receipt.released.len(), 1);
            assert_eq!(receipt.redemption.discount_amount, money("20"));
            assert_eq!(receipt.wallet.balance, money("980"));
            assert_eq!(receipt.wallet.locked_amount, Decimal::ZERO);
            assert!(receipt.wallet.maturity_date.is_none());
            assert_eq!(receipt.coupon.used_count, 1);
            assert_eq!(receipt.transaction.sequence, 3);

            let stored = ledger.find_coupon("save10").unwrap().unwrap();
            assert_eq!(stored.redemptions.len(), 1);
            let report = ledger.audit_merchant(&merchant).unwrap();
            assert!(report.is_clean(), "{:?}", report.issues);
            assert_eq!(report.transactions_checked, 3);
        }

        #[test]
        fn only_owning_agent_collects_deposits() {
            let ledger = ledger();
            let (_agent, merchant) = onboard(&ledger);
            let other = ledger
                .register_agent(&Actor::Admin, new_agent("Meera"), at("2026-01-04T00:00:00Z"))
                .unwrap();
            let err = ledger
                .collect_deposit(
                    &Actor::Agent(other.id),
                    &merchant,
                    money("10"),
                    at("2026-01-05T00:00:00Z"),
                )
                .unwrap_err();
            assert!(matches!(err, LedgerError::Forbidden { .. }));
        }

        #[test]
        fn suspended_agent_is_blocked() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let Actor::Agent(ref agent_id) = agent else {
                unreachable!()
            };
            let suspended = ledger
                .set_agent_status(
                    &Actor::Admin,
                    agent_id,
                    AgentStatus::Suspended,
                    at("2026-01-10T00:00:00Z"),
                )
                .unwrap();
            assert_eq!(suspended.revision, 2);
            let err = ledger
                .collect_deposit(&agent, &merchant, money("10"), at("2026-01-11T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidState { entity: "agent", .. }));
            let err = ledger
                .register_merchant(&agent, new_merchant("Corner"), at("2026-01-11T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidState { .. }));
        }

        #[test]
        fn pending_merchant_cannot_take_deposits() {
            let ledger = ledger();
            let agent = ledger
                .register_agent(&Actor::Admin, new_agent("Ravi"), at("2026-01-01T00:00:00Z"))
                .unwrap();
            let agent_actor = Actor::Agent(agent.id.clone());
            let merchant = ledger
                .register_merchant(&agent_actor, new_merchant("Corner"), at("2026-01-02T00:00:00Z"))
                .unwrap();
            assert_eq!(merchant.status, MerchantStatus::Pending);
            let err = ledger
                .collect_deposit(
                    &agent_actor,
                    &merchant.id,
                    money("10"),
                    at("2026-01-03T00:00:00Z"),
                )
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidState { entity: "merchant", .. }));
            assert_eq!(ledger.merchants_by_agent(&agent.id).unwrap().len(), 1);
        }

        #[test]
        fn rejection_needs_reason_and_pending_state() {
            let ledger = ledger();
            let agent = ledger
                .register_agent(&Actor::Admin, new_agent("Ravi"), at("2026-01-01T00:00:00Z"))
                .unwrap();
            let merchant = ledger
                .register_merchant(
                    &Actor::Agent(agent.id),
                    new_merchant("Corner"),
                    at("2026-01-02T00:00:00Z"),
                )
                .unwrap();
            let blank = ledger
                .reject_merchant(&Actor::Admin, &merchant.id, "  ", at("2026-01-03T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(blank, LedgerError::Validation(_)));
            let rejected = ledger
                .reject_merchant(
                    &Actor::Admin,
                    &merchant.id,
                    "incomplete documents",
                    at("2026-01-03T00:00:00Z"),
                )
                .unwrap();
            assert_eq!(rejected.status, MerchantStatus::Rejected);
            let again = ledger
                .approve_merchant(&Actor::Admin, &merchant.id, at("2026-01-04T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(again, LedgerError::InvalidState { .. }));
        }

        #[test]
        fn release_sweep_is_idempotent() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let _first = ledger
                .collect_deposit(&agent, &merchant, money("100"), at("2026-01-10T00:00:00Z"))
                .unwrap();
            let _second = ledger
                .collect_deposit(&agent, &merchant, money("40"), at("2026-02-10T00:00:00Z"))
                .unwrap();
            assert!(ledger.release_matured(at("2026-03-01T00:00:00Z")).unwrap().is_empty());

            let released = ledger.release_matured(at("2026-04-10T00:00:00Z")).unwrap();
            assert_eq!(released.len(), 1);
            assert!(ledger.release_matured(at("2026-04-10T00:00:00Z")).unwrap().is_empty());

            let summary = ledger.wallet_summary(&merchant).unwrap();
            assert_eq!(summary.balance, money("140"));
            assert_eq!(summary.locked_amount, money("40"));
            assert_eq!(summary.available, money("100"));
            assert_eq!(summary.maturity_date, Some(at("2026-05-10T00:00:00Z")));
            assert_eq!(summary.total_deposited, money("140"));

            let locked = ledger
                .deposits(&DepositFilter::new().status(DepositStatus::Locked))
                .unwrap();
            assert_eq!(locked.len(), 1);
            let released_for = ledger
                .release_matured_for(&merchant, at("2026-06-01T00:00:00Z"))
                .unwrap();
            assert_eq!(released_for.len(), 1);
            assert!(ledger.audit_all().unwrap().iter().all(AuditReport::is_clean));
        }

        #[test]
        fn usage_limit_is_enforced() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let _deposit = ledger
                .collect_deposit(&agent, &merchant, money("500"), at("2026-01-05T00:00:00Z"))
                .unwrap();
            let _released = ledger.release_matured(at("2026-04-05T00:00:00Z")).unwrap();
            let owner = Actor::Merchant(merchant.clone());
            let _coupon = ledger
                .create_coupon(&owner, new_coupon(&merchant, "ONCE", 1), at("2026-04-05T00:00:00Z"))
                .unwrap();
            let _used = ledger
                .redeem_coupon(&owner, "ONCE", order("100"), at("2026-04-06T00:00:00Z"))
                .unwrap();
            let err = ledger
                .redeem_coupon(&owner, "ONCE", order("100"), at("2026-04-07T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(
                err,
                LedgerError::CouponRejected {
                    reason: CouponRejection::UsageLimitReached { limit: 1 },
                    ..
                }
            ));
        }

        #[test]
        fn duplicate_codes_are_rejected() {
            let ledger = ledger();
            let (_agent, merchant) = onboard(&ledger);
            let owner = Actor::Merchant(merchant.clone());
            let _coupon = ledger
                .create_coupon(
                    &owner,
                    new_coupon(&merchant, "WELCOME", 3),
                    at("2026-01-05T00:00:00Z"),
                )
                .unwrap();
            let err = ledger
                .create_coupon(
                    &owner,
                    new_coupon(&merchant, "welcome", 3),
                    at("2026-01-06T00:00:00Z"),
                )
                .unwrap_err();
            assert!(matches!(err, LedgerError::DuplicateCouponCode(ref code) if code == "WELCOME"));
        }

        #[test]
        fn generated_code_when_absent() {
            let ledger = ledger();
            let (_agent, merchant) = onboard(&ledger);
            let mut request = new_coupon(&merchant, "UNUSED", 3);
            request.code = None;
            let coupon = ledger
                .create_coupon(&Actor::Admin, request, at("2026-01-05T00:00:00Z"))
                .unwrap();
            assert_eq!(coupon.code.len(), 10);
            assert_eq!(ledger.coupons_for(&merchant).unwrap().len(), 1);
        }

        #[test]
        fn merchants_cannot_touch_other_coupons() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let rival = ledger
                .register_merchant(&agent, new_merchant("Rival"), at("2026-01-04T00:00:00Z"))
                .unwrap();
            let _coupon = ledger
                .create_coupon(
                    &Actor::Merchant(merchant.clone()),
                    new_coupon(&merchant, "MINE", 3),
                    at("2026-01-05T00:00:00Z"),
                )
                .unwrap();
            let err = ledger
                .deactivate_coupon(&Actor::Merchant(rival.id), "MINE", at("2026-01-06T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(err, LedgerError::Forbidden { .. }));
        }

        #[test]
        fn quote_previews_without_wallet_check() {
            let ledger = ledger();
            let (_agent, merchant) = onboard(&ledger);
            let owner = Actor::Merchant(merchant.clone());
            let _coupon = ledger
                .create_coupon(
                    &owner,
                    new_coupon(&merchant, "SAVE10", 3),
                    at("2026-01-05T00:00:00Z"),
                )
                .unwrap();
            let discount = ledger
                .quote_coupon("SAVE10", money("1000"), at("2026-01-06T00:00:00Z"))
                .unwrap();
            assert_eq!(discount, money("50"));
            let small = ledger
                .quote_coupon("SAVE10", money("10"), at("2026-01-06T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(
                small,
                LedgerError::CouponRejected {
                    reason: CouponRejection::BelowMinimumOrder { .. },
                    ..
                }
            ));
            let deactivated = ledger
                .deactivate_coupon(&owner, "SAVE10", at("2026-01-07T00:00:00Z"))
                .unwrap();
            assert!(!deactivated.active);
            let inactive = ledger
                .quote_coupon("SAVE10", money("1000"), at("2026-01-08T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(
                inactive,
                LedgerError::CouponRejected {
                    reason: CouponRejection::Inactive,
                    ..
                }
            ));
        }

        #[test]
        fn reversal_restores_balance_and_usage() {
            let ledger = ledger();
            let (_agent, merchant) = onboard(&ledger);
            let _credit = ledger
                .adjust_balance(
                    &Actor::Admin,
                    &merchant,
                    Adjustment {
                        direction: AdjustmentDirection::Credit,
                        amount: money("100"),
                        reason: "launch bonus".to_owned(),
                    },
                    at("2026-01-04T00:00:00Z"),
                )
                .unwrap();
            let owner = Actor::Merchant(merchant.clone());
            let _coupon = ledger
                .create_coupon(
                    &owner,
                    new_coupon(&merchant, "SAVE10", 1),
                    at("2026-01-05T00:00:00Z"),
                )
                .unwrap();
            let receipt = ledger
                .redeem_coupon(&owner, "SAVE10", order("80"), at("2026-01-06T00:00:00Z"))
                .unwrap();
            assert_eq!(receipt.wallet.balance, money("92"));

            let forbidden = ledger
                .reverse_redemption(
                    &owner,
                    "SAVE10",
                    &receipt.redemption.id,
                    "refund",
                    at("2026-01-07T00:00:00Z"),
                )
                .unwrap_err();
            assert!(matches!(forbidden, LedgerError::Forbidden { .. }));

            let reversal = ledger
                .reverse_redemption(
                    &Actor::Admin,
                    "SAVE10",
                    &receipt.redemption.id,
                    "order refunded",
                    at("2026-01-07T00:00:00Z"),
                )
                .unwrap();
            assert_eq!(reversal.kind, TransactionKind::Reversal);
            assert_eq!(reversal.balance_after, money("100"));

            let coupon = ledger.find_coupon("SAVE10").unwrap().unwrap();
            assert_eq!(coupon.used_count, 0);
            assert_eq!(
                coupon.redemptions.first().map(|r| r.status),
                Some(RedemptionStatus::Reversed)
            );
            let original = ledger
                .transactions(&TransactionFilter::new().kind(TransactionKind::Redemption))
                .unwrap();
            assert_eq!(
                original.first().map(|t| t.status),
                Some(TransactionStatus::Reversed)
            );
            let summary = ledger.wallet_summary(&merchant).unwrap();
            assert_eq!(summary.total_redeemed, Decimal::ZERO);

            let twice = ledger
                .reverse_redemption(
                    &Actor::Admin,
                    "SAVE10",
                    &receipt.redemption.id,
                    "again",
                    at("2026-01-08T00:00:00Z"),
                )
                .unwrap_err();
            assert!(matches!(twice, LedgerError::InvalidState { entity: "redemption", .. }));
            assert!(ledger.audit_merchant(&merchant).unwrap().is_clean());
        }

        #[test]
        fn withdrawal_is_bounded_by_available_balance() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let _deposit = ledger
                .collect_deposit(&agent, &merchant, money("300"), at("2026-01-05T00:00:00Z"))
                .unwrap();
            let err = ledger
                .record_withdrawal(
                    &Actor::Admin,
                    &merchant,
                    money("50"),
                    "BANK-1",
                    at("2026-02-01T00:00:00Z"),
                )
                .unwrap_err();
            assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
            let payout = ledger
                .record_withdrawal(
                    &Actor::Admin,
                    &merchant,
                    money("50"),
                    "BANK-1",
                    at("2026-04-05T00:00:00Z"),
                )
                .unwrap();
            assert_eq!(payout.balance_after, money("250"));
            let summary = ledger.wallet_summary(&merchant).unwrap();
            assert_eq!(summary.total_withdrawn, money("50"));
            assert_eq!(summary.available, money("250"));
        }

        #[test]
        fn transactions_are_filtered_and_ordered() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            for day in ["2026-01-20T00:00:00Z", "2026-01-10T00:00:00Z"] {
                let _deposit = ledger
                    .collect_deposit(&agent, &merchant, money("10"), at(day))
                    .unwrap();
            }
            let all = ledger
                .transactions(&TransactionFilter::new().merchant(merchant.clone()))
                .unwrap();
            let times: Vec<DateTime<Utc>> = all.iter().map(|t| t.created).collect();
            assert_eq!(
                times,
                [at("2026-01-10T00:00:00Z"), at("2026-01-20T00:00:00Z")]
            );
            let deposits = ledger
                .deposits(&DepositFilter::new().merchant(merchant))
                .unwrap();
            let receipt = deposits.first().unwrap().receipt_number.to_lowercase();
            let found = ledger.find_deposit_by_receipt(&receipt).unwrap();
            assert_eq!(found.map(|d| d.created), Some(at("2026-01-10T00:00:00Z")));
        }

        #[test]
        fn audit_flags_tampered_wallet() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let _deposit = ledger
                .collect_deposit(&agent, &merchant, money("100"), at("2026-01-05T00:00:00Z"))
                .unwrap();
            let mut tampered = ledger.merchant(&merchant).unwrap().unwrap();
            let revision = tampered.revision;
            tampered.wallet.balance = money("5000");
            tampered.revision += 1;
            ledger
                .storage()
                .commit(LedgerBatch::new().put_merchant(tampered, revision))
                .unwrap();
            let report = ledger.audit_merchant(&merchant).unwrap();
            assert!(
                report
                    .issues
                    .iter()
                    .any(|issue| matches!(*issue, AuditIssue::BalanceMismatch { .. }))
            );
        }

        /// Reads everything stored, as the engine does before planning.
        fn stored_snapshot(ledger: &TestLedger) -> plan::Snapshot {
            let storage = ledger.storage();
            plan::Snapshot {
                agents: storage.agents().unwrap(),
                merchants: storage.merchants().unwrap(),
                deposits: storage.deposits().unwrap(),
                transactions: storage.transactions().unwrap(),
                coupons: storage.coupons().unwrap(),
            }
        }

        fn credit(amount: &str) -> Adjustment {
            Adjustment {
                direction: AdjustmentDirection::Credit,
                amount: money(amount),
                reason: "promotion bonus".to_owned(),
            }
        }

        #[test]
        fn stale_snapshot_commit_is_a_conflict() {
            let ledger = ledger();
            let (_agent, merchant) = onboard(&ledger);
            let snapshot = stored_snapshot(&ledger);
            let (_first, first_batch) = plan::adjust_balance(
                &snapshot,
                &Actor::Admin,
                &merchant,
                credit("10"),
                at("2026-01-05T00:00:00Z"),
            )
            .unwrap();
            let (_second, second_batch) = plan::adjust_balance(
                &snapshot,
                &Actor::Admin,
                &merchant,
                credit("20"),
                at("2026-01-05T00:00:01Z"),
            )
            .unwrap();
            ledger.storage().commit(first_batch).unwrap();
            let err = ledger.storage().commit(second_batch).unwrap_err();
            assert!(matches!(err, LedgerError::Conflict { entity: "merchant", .. }));

            let summary = ledger.wallet_summary(&merchant).unwrap();
            assert_eq!(summary.balance, money("10"));
            let recorded = ledger.transactions(&TransactionFilter::new()).unwrap();
            assert_eq!(recorded.len(), 1);
            assert!(ledger.audit_merchant(&merchant).unwrap().is_clean());

            // Replanning from fresh state succeeds.
            let retried = ledger
                .adjust_balance(&Actor::Admin, &merchant, credit("20"), at("2026-01-05T00:00:02Z"))
                .unwrap();
            assert_eq!(retried.sequence, 2);
            assert_eq!(retried.balance_after, money("30"));
        }

        #[test]
        fn overflowing_deposit_is_rejected_and_ledger_stays_clean() {
            let ledger = ledger();
            let (agent, merchant) = onboard(&ledger);
            let _full = ledger
                .collect_deposit(&agent, &merchant, Decimal::MAX, at("2026-01-05T00:00:00Z"))
                .unwrap();
            let err = ledger
                .collect_deposit(&agent, &merchant, Decimal::ONE, at("2026-01-06T00:00:00Z"))
                .unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));
            assert_eq!(ledger.deposits(&DepositFilter::new()).unwrap().len(), 1);
            assert!(ledger.audit_merchant(&merchant).unwrap().is_clean());
        }

        #[test]
        fn lookups_return_none_for_unknown_ids() {
            let ledger = ledger();
            assert!(ledger.agent(&AgentId::new("nope".to_owned())).unwrap().is_none());
            assert!(ledger.merchant(&MerchantId::new("nope".to_owned())).unwrap().is_none());
            assert!(ledger.find_coupon("NOPE").unwrap().is_none());
            let err = ledger
                .wallet_summary(&MerchantId::new("nope".to_owned()))
                .unwrap_err();
            assert!(matches!(err, LedgerError::NotFound { entity: "merchant", .. }));
        }
    }

    #[cfg(feature = "async")]
    mod async_tests {
        use super::*;

        #[tokio::test]
        async fn async_ledger_runs_full_flow() {
            let ledger = Ledger::builder()
                .storage(InMemoryStorage::new())
                .build()
                .unwrap();
            let agent = ledger
                .register_agent(&Actor::Admin, new_agent("Ravi"), at("2026-01-01T00:00:00Z"))
                .await
                .unwrap();
            let agent_actor = Actor::Agent(agent.id.clone());
            let merchant = ledger
                .register_merchant(
                    &agent_actor,
                    new_merchant("Fresh Mart"),
                    at("2026-01-02T00:00:00Z"),
                )
                .await
                .unwrap();
            let _approved = ledger
                .approve_merchant(&Actor::Admin, &merchant.id, at("2026-01-03T00:00:00Z"))
                .await
                .unwrap();
            let receipt = ledger
                .collect_deposit(
                    &agent_actor,
                    &merchant.id,
                    money("250"),
                    at("2026-01-04T00:00:00Z"),
                )
                .await
                .unwrap();
            assert_eq!(receipt.wallet.locked_amount, money("250"));
            let released = ledger
                .release_matured(at("2026-04-04T00:00:00Z"))
                .await
                .unwrap();
            assert_eq!(released.len(), 1);
            let summary = ledger.wallet_summary(&merchant.id).await.unwrap();
            assert_eq!(summary.available, money("250"));
            let reports = ledger.audit_all().await.unwrap();
            assert!(reports.iter().all(AuditReport::is_clean));
            assert_eq!(ledger.agents().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn async_adjusting_unknown_merchant_is_not_found() {
            let ledger = Ledger::builder()
                .storage(InMemoryStorage::new())
                .build()
                .unwrap();
            let err = ledger
                .adjust_balance(
                    &Actor::Admin,
                    &MerchantId::new("ghost".to_owned()),
                    Adjustment {
                        direction: AdjustmentDirection::Credit,
                        amount: Decimal::ONE,
                        reason: "test".to_owned(),
                    },
                    at("2026-01-01T00:00:00Z"),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::NotFound { .. }));
        }
    }
}
