//! Pure planning of ledger operations.
//!
//! Every planner takes a [`Snapshot`] of the stored ledger, enforces the
//! rules of one operation and returns its result together with the
//! [`LedgerBatch`] that persists it. Nothing here touches storage, so the
//! async and blocking engines share the same rules.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;

use super::receipt;
use super::{Adjustment, DepositReceipt, RedemptionReceipt};
use crate::config::LedgerConfig;
use crate::error::{CouponRejection, LedgerError, Result};
use crate::models::{
    Actor, Agent, AgentId, AgentStatus, CouponCode, CouponId, Deposit, DepositId, DepositStatus,
    DiscountType, Effect, Merchant, MerchantId, MerchantStatus, NewAgent, NewCoupon, NewMerchant,
    Redemption, RedemptionId, RedemptionRequest, RedemptionStatus, Transaction, TransactionId,
    TransactionKind, TransactionStatus, Wallet,
};
use crate::storage::{LedgerBatch, Precondition};

/// Everything read from storage before planning an operation.
#[derive(Debug, Default, Clone)]
pub(crate) struct Snapshot {
    /// Stored agents.
    pub(crate) agents: Vec<Agent>,
    /// Stored merchants.
    pub(crate) merchants: Vec<Merchant>,
    /// Stored deposits.
    pub(crate) deposits: Vec<Deposit>,
    /// Stored transactions.
    pub(crate) transactions: Vec<Transaction>,
    /// Stored coupons.
    pub(crate) coupons: Vec<CouponCode>,
}

impl Snapshot {
    /// Looks up an agent.
    pub(crate) fn agent(&self, id: &AgentId) -> Result<&Agent> {
        self.agents
            .iter()
            .find(|a| a.id == *id)
            .ok_or_else(|| not_found("agent", id.as_inner()))
    }

    /// Looks up a merchant.
    pub(crate) fn merchant(&self, id: &MerchantId) -> Result<&Merchant> {
        self.merchants
            .iter()
            .find(|m| m.id == *id)
            .ok_or_else(|| not_found("merchant", id.as_inner()))
    }

    /// Looks up a coupon by its normalised code.
    pub(crate) fn coupon(&self, code: &str) -> Result<&CouponCode> {
        self.coupons
            .iter()
            .find(|c| c.code == code)
            .ok_or_else(|| not_found("coupon", code))
    }

    /// Returns the merchant's deposits in stored order.
    pub(crate) fn deposits_of<'snap>(
        &'snap self,
        merchant: &'snap MerchantId,
    ) -> impl Iterator<Item = &'snap Deposit> + 'snap {
        self.deposits.iter().filter(move |d| d.merchant == *merchant)
    }

    /// Returns the merchant's transactions in stored order.
    pub(crate) fn transactions_of<'snap>(
        &'snap self,
        merchant: &'snap MerchantId,
    ) -> impl Iterator<Item = &'snap Transaction> + 'snap {
        self.transactions
            .iter()
            .filter(move |t| t.merchant == *merchant)
    }

    /// Returns `true` if a deposit already carries `receipt`.
    fn receipt_taken(&self, receipt: &str) -> bool {
        self.deposits.iter().any(|d| d.receipt_number == receipt)
    }

    /// Returns `true` if a coupon already uses `code`.
    fn code_taken(&self, code: &str) -> bool {
        self.coupons.iter().any(|c| c.code == code)
    }
}

// ── Rule helpers ────────────────────────────────────────────────────────

/// Builds a [`LedgerError::NotFound`].
fn not_found(entity: &'static str, id: &str) -> LedgerError {
    LedgerError::NotFound {
        entity,
        id: id.to_owned(),
    }
}

/// Builds a [`LedgerError::Forbidden`] and logs the refusal.
fn forbidden(actor: &Actor, action: &'static str) -> LedgerError {
    tracing::warn!(%actor, action, "operation refused");
    LedgerError::Forbidden {
        actor: actor.to_string(),
        action,
    }
}

/// Only the platform administrator may perform `action`.
fn require_admin(actor: &Actor, action: &'static str) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(forbidden(actor, action))
    }
}

/// The actor must be an agent in active standing.
fn require_active_agent<'snap>(
    snapshot: &'snap Snapshot,
    actor: &Actor,
    action: &'static str,
) -> Result<&'snap Agent> {
    let Actor::Agent(ref id) = *actor else {
        return Err(forbidden(actor, action));
    };
    let agent = snapshot.agent(id)?;
    if !agent.is_active() {
        return Err(LedgerError::InvalidState {
            entity: "agent",
            id: id.to_string(),
            state: agent.status.to_string(),
            action,
        });
    }
    Ok(agent)
}

/// The actor must be an admin or the merchant itself.
fn require_merchant_access(actor: &Actor, merchant: &Merchant, action: &'static str) -> Result<()> {
    match *actor {
        Actor::Admin => Ok(()),
        Actor::Merchant(ref id) if *id == merchant.id => Ok(()),
        Actor::Agent(_) | Actor::Merchant(_) => Err(forbidden(actor, action)),
    }
}

/// The merchant must be approved.
fn require_approved(merchant: &Merchant, action: &'static str) -> Result<()> {
    if merchant.is_approved() {
        Ok(())
    } else {
        Err(invalid_merchant_state(merchant, action))
    }
}

/// Builds an [`LedgerError::InvalidState`] for a merchant.
fn invalid_merchant_state(merchant: &Merchant, action: &'static str) -> LedgerError {
    LedgerError::InvalidState {
        entity: "merchant",
        id: merchant.id.to_string(),
        state: merchant.status.to_string(),
        action,
    }
}

/// Rejects zero and negative amounts.
fn require_positive(amount: Decimal, what: &str) -> Result<()> {
    if amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "{what} must be positive, got {amount}"
        )))
    }
}

/// Rejects blank text fields.
fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(LedgerError::Validation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// Rejects values that can not be an email address.
fn require_email(value: &str) -> Result<()> {
    let trimmed = value.trim();
    let valid = trimmed
        .split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "invalid email address: {value:?}"
        )))
    }
}

/// Returns trimmed optional text, mapping blanks to `None`.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

/// Sums the locked deposits and finds the latest locked maturity date.
pub(crate) fn lock_state<'dep, I>(deposits: I) -> Result<(Decimal, Option<DateTime<Utc>>)>
where
    I: IntoIterator<Item = &'dep Deposit>,
{
    deposits
        .into_iter()
        .filter(|d| d.status == DepositStatus::Locked)
        .try_fold((Decimal::ZERO, None), |(locked, latest), d| {
            let maturity = latest.map_or(d.maturity_date, |prev: DateTime<Utc>| {
                prev.max(d.maturity_date)
            });
            locked
                .checked_add(d.amount)
                .map(|total| (total, Some(maturity)))
                .ok_or_else(|| LedgerError::amount_overflow("locked amount"))
        })
}

// ── Wallet posting ──────────────────────────────────────────────────────

/// Accumulates the wallet movements of one merchant within one batch.
///
/// Every movement is written as a transaction whose balance snapshots
/// continue the merchant's chain, and the wallet's locked amount and
/// maturity date are recomputed from the merchant's deposits.
#[derive(Debug)]
struct WalletPosting {
    /// Working copy of the merchant.
    merchant: Merchant,
    /// Stored revision the batch is guarded by.
    previous_revision: u64,
    /// Sequence number of the next transaction.
    next_sequence: u64,
    /// The merchant's deposits, including changes made so far.
    deposits: Vec<Deposit>,
    /// Deposits to write.
    changed_deposits: Vec<Deposit>,
    /// Transactions to write.
    transactions: Vec<Transaction>,
}

impl WalletPosting {
    /// Starts posting against the stored state of `merchant`.
    fn open(snapshot: &Snapshot, merchant: &Merchant) -> Self {
        let last_sequence = snapshot
            .transactions_of(&merchant.id)
            .map(|t| t.sequence)
            .max()
            .unwrap_or(0);
        Self {
            merchant: merchant.clone(),
            previous_revision: merchant.revision,
            next_sequence: last_sequence.saturating_add(1),
            deposits: snapshot.deposits_of(&merchant.id).cloned().collect(),
            changed_deposits: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// Current wallet state.
    const fn wallet(&self) -> &Wallet {
        &self.merchant.wallet
    }

    /// Fails unless the available balance covers `required`.
    fn ensure_available(&self, required: Decimal) -> Result<()> {
        let available = self.wallet().available();
        if available < required {
            tracing::warn!(
                merchant = %self.merchant.id,
                %available,
                %required,
                "insufficient available balance"
            );
            return Err(LedgerError::InsufficientFunds {
                available,
                required,
            });
        }
        Ok(())
    }

    /// Records one movement and applies it to the balance.
    fn post(
        &mut self,
        kind: TransactionKind,
        amount: Decimal,
        reference_id: Option<String>,
        actor: &Actor,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let balance_before = self.merchant.wallet.balance;
        let balance_after = match kind.effect() {
            Effect::Credit => balance_before.checked_add(amount),
            Effect::Debit => balance_before.checked_sub(amount),
            Effect::Neutral => Some(balance_before),
        }
        .ok_or_else(|| LedgerError::amount_overflow("wallet balance"))?;
        self.merchant.wallet.balance = balance_after;
        let transaction = Transaction {
            id: TransactionId::generate(),
            merchant: self.merchant.id.clone(),
            sequence: self.next_sequence,
            kind,
            amount,
            status: TransactionStatus::Completed,
            balance_before,
            balance_after,
            reference_id,
            actor: actor.clone(),
            note,
            created: now,
        };
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    /// Adds a freshly collected deposit.
    fn add_deposit(&mut self, deposit: Deposit) -> Result<()> {
        self.deposits.push(deposit.clone());
        self.changed_deposits.push(deposit);
        self.relock()
    }

    /// Releases every deposit that is due at `now`, writing one neutral
    /// release transaction per deposit.
    fn release_due(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let mut released = Vec::new();
        for deposit in &mut self.deposits {
            if deposit.is_due(now) {
                deposit.status = DepositStatus::Matured;
                deposit.released_at = Some(now);
                released.push(deposit.clone());
            }
        }
        let mut transactions = Vec::with_capacity(released.len());
        for deposit in released {
            let transaction = self.post(
                TransactionKind::Release,
                deposit.amount,
                Some(deposit.id.to_string()),
                actor,
                Some(deposit.receipt_number.clone()),
                now,
            )?;
            transactions.push(transaction);
            self.changed_deposits.push(deposit);
        }
        self.relock()?;
        Ok(transactions)
    }

    /// Recomputes the locked amount and maturity date from the deposits.
    fn relock(&mut self) -> Result<()> {
        let (locked, maturity) = lock_state(&self.deposits)?;
        self.merchant.wallet.locked_amount = locked;
        self.merchant.wallet.maturity_date = maturity;
        Ok(())
    }

    /// Bumps the merchant revision and appends every write to `batch`.
    fn finish(
        mut self,
        mut batch: LedgerBatch,
        now: DateTime<Utc>,
    ) -> Result<(Merchant, LedgerBatch)> {
        self.relock()?;
        self.merchant.revision = self.previous_revision.saturating_add(1);
        self.merchant.changed = now;
        batch = batch.put_merchant(self.merchant.clone(), self.previous_revision);
        for deposit in self.changed_deposits {
            batch = batch.put_deposit(deposit);
        }
        for transaction in self.transactions {
            batch = batch.put_transaction(transaction);
        }
        Ok((self.merchant, batch))
    }
}

// ── Network management ──────────────────────────────────────────────────

/// Plans the creation of an agent by an admin.
pub(crate) fn register_agent(
    actor: &Actor,
    new: NewAgent,
    now: DateTime<Utc>,
) -> Result<(Agent, LedgerBatch)> {
    require_admin(actor, "register agents")?;
    require_text(&new.name, "agent name")?;
    require_text(&new.phone, "agent phone")?;
    require_email(&new.email)?;
    let agent = Agent {
        id: AgentId::generate(),
        name: new.name.trim().to_owned(),
        phone: new.phone.trim().to_owned(),
        email: new.email.trim().to_owned(),
        region: non_blank(new.region),
        status: AgentStatus::Active,
        revision: 1,
        created: now,
        changed: now,
    };
    let batch = LedgerBatch::new().put_agent(agent.clone(), 0);
    Ok((agent, batch))
}

/// Plans an agent activation or suspension. Setting the current status
/// again is a no-op.
pub(crate) fn set_agent_status(
    snapshot: &Snapshot,
    actor: &Actor,
    id: &AgentId,
    status: AgentStatus,
    now: DateTime<Utc>,
) -> Result<(Agent, LedgerBatch)> {
    require_admin(actor, "change agent status")?;
    let mut agent = snapshot.agent(id)?.clone();
    if agent.status == status {
        return Ok((agent, LedgerBatch::new()));
    }
    let previous_revision = agent.revision;
    agent.status = status;
    agent.revision = previous_revision.saturating_add(1);
    agent.changed = now;
    let batch = LedgerBatch::new().put_agent(agent.clone(), previous_revision);
    Ok((agent, batch))
}

/// Plans the registration of a pending merchant by an active agent.
pub(crate) fn register_merchant(
    snapshot: &Snapshot,
    actor: &Actor,
    new: NewMerchant,
    now: DateTime<Utc>,
) -> Result<(Merchant, LedgerBatch)> {
    let agent = require_active_agent(snapshot, actor, "register merchants")?;
    let profile = new.profile;
    require_text(&profile.business_name, "business name")?;
    require_text(&profile.owner_name, "owner name")?;
    require_text(&profile.phone, "merchant phone")?;
    require_email(&profile.email)?;
    let merchant = Merchant {
        id: MerchantId::generate(),
        agent: agent.id.clone(),
        profile,
        status: MerchantStatus::Pending,
        wallet: Wallet::default(),
        rejection_reason: None,
        approved_at: None,
        revision: 1,
        created: now,
        changed: now,
    };
    let batch = LedgerBatch::new()
        .require(Precondition::AgentRevision {
            id: agent.id.clone(),
            revision: agent.revision,
        })
        .put_merchant(merchant.clone(), 0);
    Ok((merchant, batch))
}

/// Plans the approval of a pending merchant.
pub(crate) fn approve_merchant(
    snapshot: &Snapshot,
    actor: &Actor,
    id: &MerchantId,
    now: DateTime<Utc>,
) -> Result<(Merchant, LedgerBatch)> {
    require_admin(actor, "approve merchants")?;
    let mut merchant = snapshot.merchant(id)?.clone();
    if merchant.status != MerchantStatus::Pending {
        return Err(invalid_merchant_state(&merchant, "approve"));
    }
    let previous_revision = merchant.revision;
    merchant.status = MerchantStatus::Approved;
    merchant.approved_at = Some(now);
    merchant.rejection_reason = None;
    merchant.revision = previous_revision.saturating_add(1);
    merchant.changed = now;
    let batch = LedgerBatch::new().put_merchant(merchant.clone(), previous_revision);
    Ok((merchant, batch))
}

/// Plans the rejection of a pending merchant.
pub(crate) fn reject_merchant(
    snapshot: &Snapshot,
    actor: &Actor,
    id: &MerchantId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(Merchant, LedgerBatch)> {
    require_admin(actor, "reject merchants")?;
    require_text(reason, "rejection reason")?;
    let mut merchant = snapshot.merchant(id)?.clone();
    if merchant.status != MerchantStatus::Pending {
        return Err(invalid_merchant_state(&merchant, "reject"));
    }
    let previous_revision = merchant.revision;
    merchant.status = MerchantStatus::Rejected;
    merchant.rejection_reason = Some(reason.trim().to_owned());
    merchant.revision = previous_revision.saturating_add(1);
    merchant.changed = now;
    let batch = LedgerBatch::new().put_merchant(merchant.clone(), previous_revision);
    Ok((merchant, batch))
}

// ── Deposits ────────────────────────────────────────────────────────────

/// Plans the collection of a cash deposit by the merchant's own agent.
pub(crate) fn collect_deposit(
    snapshot: &Snapshot,
    config: &LedgerConfig,
    actor: &Actor,
    merchant_id: &MerchantId,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<(DepositReceipt, LedgerBatch)> {
    let agent = require_active_agent(snapshot, actor, "collect deposits")?;
    let merchant = snapshot.merchant(merchant_id)?;
    if merchant.agent != agent.id {
        return Err(forbidden(actor, "collect deposits for another agent's merchant"));
    }
    require_approved(merchant, "accept deposits")?;
    require_positive(amount, "deposit amount")?;

    let receipt_number = receipt::draw_unused(
        || receipt::receipt_number(&config.receipt_prefix, now),
        |candidate| snapshot.receipt_taken(candidate),
        "receipt number",
    )?;
    let maturity_date = now
        .checked_add_months(Months::new(config.maturity_months))
        .ok_or_else(|| LedgerError::Validation("maturity date out of range".to_owned()))?;
    let deposit = Deposit {
        id: DepositId::generate(),
        merchant: merchant.id.clone(),
        agent: agent.id.clone(),
        amount,
        receipt_number: receipt_number.clone(),
        maturity_date,
        status: DepositStatus::Locked,
        created: now,
        released_at: None,
    };
    tracing::debug!(
        receipt = %receipt_number,
        maturity = %maturity_date,
        "planned deposit"
    );

    let mut posting = WalletPosting::open(snapshot, merchant);
    let transaction = posting.post(
        TransactionKind::Deposit,
        amount,
        Some(deposit.id.to_string()),
        actor,
        Some(receipt_number.clone()),
        now,
    )?;
    posting.add_deposit(deposit.clone())?;
    let guard = LedgerBatch::new()
        .require(Precondition::ReceiptAvailable {
            receipt: receipt_number,
        })
        .require(Precondition::AgentRevision {
            id: agent.id.clone(),
            revision: agent.revision,
        });
    let (updated, batch) = posting.finish(guard, now)?;
    let receipt = DepositReceipt {
        deposit,
        transaction,
        wallet: updated.wallet,
    };
    Ok((receipt, batch))
}

/// Plans the release of every deposit due at `now`, optionally limited to
/// one merchant. Returns the release transactions in merchant order.
pub(crate) fn release_matured(
    snapshot: &Snapshot,
    only: Option<&MerchantId>,
    now: DateTime<Utc>,
) -> Result<(Vec<Transaction>, LedgerBatch)> {
    if let Some(id) = only {
        let _merchant = snapshot.merchant(id)?;
    }
    let mut batch = LedgerBatch::new();
    let mut released = Vec::new();
    for merchant in &snapshot.merchants {
        if only.is_some_and(|id| *id != merchant.id) {
            continue;
        }
        let has_due = snapshot.deposits_of(&merchant.id).any(|d| d.is_due(now));
        if !has_due {
            continue;
        }
        let mut posting = WalletPosting::open(snapshot, merchant);
        released.extend(posting.release_due(&Actor::Admin, now)?);
        let (_updated, next) = posting.finish(batch, now)?;
        batch = next;
    }
    Ok((released, batch))
}

// ── Coupons ─────────────────────────────────────────────────────────────

/// Plans the issue of a coupon for an approved merchant.
pub(crate) fn create_coupon(
    snapshot: &Snapshot,
    actor: &Actor,
    new: NewCoupon,
    now: DateTime<Utc>,
) -> Result<(CouponCode, LedgerBatch)> {
    let merchant = snapshot.merchant(&new.merchant)?;
    require_merchant_access(actor, merchant, "manage coupons")?;
    require_approved(merchant, "issue coupons")?;

    let code = match new.code {
        Some(ref raw) => {
            let code = receipt::normalize_code(raw)?;
            if snapshot.code_taken(&code) {
                return Err(LedgerError::DuplicateCouponCode(code));
            }
            code
        }
        None => receipt::draw_unused(
            receipt::generated_code,
            |candidate| snapshot.code_taken(candidate),
            "coupon code",
        )?,
    };
    validate_coupon_terms(&new)?;

    let coupon = CouponCode {
        id: CouponId::generate(),
        code: code.clone(),
        merchant: merchant.id.clone(),
        description: non_blank(new.description),
        discount_type: new.discount_type,
        discount_value: new.discount_value,
        min_order_amount: new.min_order_amount,
        max_discount: new.max_discount,
        usage_limit: new.usage_limit,
        used_count: 0,
        valid_from: new.valid_from,
        valid_until: new.valid_until,
        active: true,
        redemptions: Vec::new(),
        revision: 1,
        created: now,
        changed: now,
    };
    let batch = LedgerBatch::new()
        .require(Precondition::CouponCodeAvailable { code })
        .put_coupon(coupon.clone(), 0);
    Ok((coupon, batch))
}

/// Checks the discount, usage and window terms of a new coupon.
fn validate_coupon_terms(new: &NewCoupon) -> Result<()> {
    require_positive(new.discount_value, "discount value")?;
    if new.discount_type == DiscountType::Percentage && new.discount_value > Decimal::ONE_HUNDRED
    {
        return Err(LedgerError::Validation(format!(
            "percentage discount must not exceed 100, got {}",
            new.discount_value
        )));
    }
    if let Some(cap) = new.max_discount {
        require_positive(cap, "maximum discount")?;
    }
    if let Some(minimum) = new.min_order_amount
        && minimum < Decimal::ZERO
    {
        return Err(LedgerError::Validation(format!(
            "minimum order amount must not be negative, got {minimum}"
        )));
    }
    if new.usage_limit == 0 {
        return Err(LedgerError::Validation(
            "usage limit must be at least 1".to_owned(),
        ));
    }
    if new.valid_from >= new.valid_until {
        return Err(LedgerError::Validation(format!(
            "validity window is empty: {} to {}",
            new.valid_from, new.valid_until
        )));
    }
    Ok(())
}

/// Plans the deactivation of a coupon. Deactivating twice is a no-op.
pub(crate) fn deactivate_coupon(
    snapshot: &Snapshot,
    actor: &Actor,
    code: &str,
    now: DateTime<Utc>,
) -> Result<(CouponCode, LedgerBatch)> {
    let code = receipt::normalize_code(code)?;
    let mut coupon = snapshot.coupon(&code)?.clone();
    let merchant = snapshot.merchant(&coupon.merchant)?;
    require_merchant_access(actor, merchant, "manage coupons")?;
    if !coupon.active {
        return Ok((coupon, LedgerBatch::new()));
    }
    let previous_revision = coupon.revision;
    coupon.active = false;
    coupon.revision = previous_revision.saturating_add(1);
    coupon.changed = now;
    let batch = LedgerBatch::new().put_coupon(coupon.clone(), previous_revision);
    Ok((coupon, batch))
}

/// Builds a [`LedgerError::CouponRejected`] and logs it.
fn rejected(code: &str, reason: CouponRejection) -> LedgerError {
    tracing::warn!(code, %reason, "coupon rejected");
    LedgerError::CouponRejected {
        code: code.to_owned(),
        reason,
    }
}

/// Previews the discount a coupon would grant, without the wallet check.
pub(crate) fn quote_coupon(
    snapshot: &Snapshot,
    code: &str,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal> {
    let code = receipt::normalize_code(code)?;
    let coupon = snapshot.coupon(&code)?;
    require_positive(order_amount, "order amount")?;
    coupon
        .check_redeemable(order_amount, now)
        .map_err(|reason| rejected(&code, reason))?;
    coupon.discount_for(order_amount)
}

/// Plans a coupon redemption funded from the merchant's available
/// balance. Deposits that have matured are released first.
pub(crate) fn redeem_coupon(
    snapshot: &Snapshot,
    actor: &Actor,
    code: &str,
    request: RedemptionRequest,
    now: DateTime<Utc>,
) -> Result<(RedemptionReceipt, LedgerBatch)> {
    let code = receipt::normalize_code(code)?;
    let mut coupon = snapshot.coupon(&code)?.clone();
    let merchant = snapshot.merchant(&coupon.merchant)?;
    require_merchant_access(actor, merchant, "redeem coupons")?;
    require_text(&request.customer, "customer")?;
    require_positive(request.order_amount, "order amount")?;
    coupon
        .check_redeemable(request.order_amount, now)
        .map_err(|reason| rejected(&code, reason))?;
    require_approved(merchant, "fund coupon discounts")?;

    let discount = coupon.discount_for(request.order_amount)?;
    if discount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "coupon {code} grants no discount on {}",
            request.order_amount
        )));
    }

    let mut posting = WalletPosting::open(snapshot, merchant);
    let released = posting.release_due(actor, now)?;
    posting.ensure_available(discount)?;

    let redemption_id = RedemptionId::generate();
    let transaction = posting.post(
        TransactionKind::Redemption,
        discount,
        Some(redemption_id.to_string()),
        actor,
        Some(format!("coupon {code}")),
        now,
    )?;
    let redemption = Redemption {
        id: redemption_id,
        customer: request.customer.trim().to_owned(),
        order_amount: request.order_amount,
        discount_amount: discount,
        transaction: transaction.id.clone(),
        status: RedemptionStatus::Applied,
        redeemed_at: now,
        reversed_at: None,
    };
    let previous_revision = coupon.revision;
    coupon.used_count = coupon.used_count.saturating_add(1);
    coupon.redemptions.push(redemption.clone());
    coupon.revision = previous_revision.saturating_add(1);
    coupon.changed = now;

    let (updated, batch) = posting.finish(LedgerBatch::new(), now)?;
    let batch = batch.put_coupon(coupon.clone(), previous_revision);
    let receipt = RedemptionReceipt {
        coupon,
        redemption,
        transaction,
        wallet: updated.wallet,
        released,
    };
    Ok((receipt, batch))
}

/// Plans the reversal of an applied redemption by an admin.
pub(crate) fn reverse_redemption(
    snapshot: &Snapshot,
    actor: &Actor,
    code: &str,
    redemption_id: &RedemptionId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(Transaction, LedgerBatch)> {
    require_admin(actor, "reverse redemptions")?;
    require_text(reason, "reversal reason")?;
    let code = receipt::normalize_code(code)?;
    let mut coupon = snapshot.coupon(&code)?.clone();
    let merchant = snapshot.merchant(&coupon.merchant)?;

    let redemption = coupon
        .redemptions
        .iter_mut()
        .find(|r| r.id == *redemption_id)
        .ok_or_else(|| not_found("redemption", redemption_id.as_inner()))?;
    if redemption.status == RedemptionStatus::Reversed {
        return Err(LedgerError::InvalidState {
            entity: "redemption",
            id: redemption_id.to_string(),
            state: redemption.status.to_string(),
            action: "reverse",
        });
    }
    let mut original = snapshot
        .transactions
        .iter()
        .find(|t| t.id == redemption.transaction)
        .cloned()
        .ok_or_else(|| not_found("transaction", redemption.transaction.as_inner()))?;

    let mut posting = WalletPosting::open(snapshot, merchant);
    let reversal = posting.post(
        TransactionKind::Reversal,
        redemption.discount_amount,
        Some(original.id.to_string()),
        actor,
        Some(reason.trim().to_owned()),
        now,
    )?;
    redemption.status = RedemptionStatus::Reversed;
    redemption.reversed_at = Some(now);
    original.status = TransactionStatus::Reversed;

    let previous_revision = coupon.revision;
    coupon.used_count = coupon.used_count.saturating_sub(1);
    coupon.revision = previous_revision.saturating_add(1);
    coupon.changed = now;

    let (_updated, batch) = posting.finish(LedgerBatch::new(), now)?;
    let batch = batch
        .put_transaction(original)
        .put_coupon(coupon, previous_revision);
    Ok((reversal, batch))
}

// ── Administrative movements ────────────────────────────────────────────

/// Plans a manual credit or debit by an admin.
pub(crate) fn adjust_balance(
    snapshot: &Snapshot,
    actor: &Actor,
    merchant_id: &MerchantId,
    adjustment: Adjustment,
    now: DateTime<Utc>,
) -> Result<(Transaction, LedgerBatch)> {
    require_admin(actor, "adjust balances")?;
    require_positive(adjustment.amount, "adjustment amount")?;
    require_text(&adjustment.reason, "adjustment reason")?;
    let merchant = snapshot.merchant(merchant_id)?;
    require_approved(merchant, "adjust the balance")?;

    let kind = adjustment.direction.kind();
    let mut posting = WalletPosting::open(snapshot, merchant);
    if kind.effect() == Effect::Debit {
        posting.ensure_available(adjustment.amount)?;
    }
    let transaction = posting.post(
        kind,
        adjustment.amount,
        None,
        actor,
        Some(adjustment.reason.trim().to_owned()),
        now,
    )?;
    let (_updated, batch) = posting.finish(LedgerBatch::new(), now)?;
    Ok((transaction, batch))
}

/// Plans a payout of available balance to the merchant.
pub(crate) fn record_withdrawal(
    snapshot: &Snapshot,
    actor: &Actor,
    merchant_id: &MerchantId,
    amount: Decimal,
    reference: &str,
    now: DateTime<Utc>,
) -> Result<(Transaction, LedgerBatch)> {
    require_admin(actor, "record withdrawals")?;
    require_positive(amount, "withdrawal amount")?;
    require_text(reference, "payout reference")?;
    let merchant = snapshot.merchant(merchant_id)?;
    require_approved(merchant, "withdraw")?;

    let mut posting = WalletPosting::open(snapshot, merchant);
    let _released = posting.release_due(actor, now)?;
    posting.ensure_available(amount)?;
    let transaction = posting.post(
        TransactionKind::Withdrawal,
        amount,
        Some(reference.trim().to_owned()),
        actor,
        None,
        now,
    )?;
    let (_updated, batch) = posting.finish(LedgerBatch::new(), now)?;
    Ok((transaction, batch))
}
