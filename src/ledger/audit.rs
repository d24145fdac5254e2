//! Consistency audit of stored wallets, deposits, transactions and coupons.
//!
//! The audit only reads. It recomputes every wallet from its transaction
//! chain and deposits, and every coupon's usage from its redemptions, and
//! reports each mismatch it finds.

use core::fmt;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::plan::{Snapshot, lock_state};
use crate::models::{
    Merchant, MerchantId, RedemptionId, RedemptionStatus, Transaction, TransactionId,
};

/// One inconsistency found by the audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "camelCase")]
pub enum AuditIssue {
    /// A transaction's snapshots disagree with its kind and amount.
    #[serde(rename_all = "camelCase")]
    DeltaMismatch {
        /// Offending transaction.
        transaction: TransactionId,
        /// Change implied by kind and amount.
        expected: Decimal,
        /// `balance_after - balance_before`.
        recorded: Decimal,
    },
    /// Sequence numbers skip or repeat.
    #[serde(rename_all = "camelCase")]
    SequenceGap {
        /// Offending transaction.
        transaction: TransactionId,
        /// Sequence the chain expected.
        expected: u64,
        /// Sequence actually stored.
        found: u64,
    },
    /// A transaction does not start where the previous one ended.
    #[serde(rename_all = "camelCase")]
    ChainBreak {
        /// Offending transaction.
        transaction: TransactionId,
        /// Previous `balance_after` (zero for the first transaction).
        expected_before: Decimal,
        /// Stored `balance_before`.
        recorded_before: Decimal,
    },
    /// The wallet balance disagrees with the transaction chain.
    #[serde(rename_all = "camelCase")]
    BalanceMismatch {
        /// Stored wallet balance.
        wallet: Decimal,
        /// Sum of signed movements.
        ledger: Decimal,
        /// `balance_after` of the last transaction.
        last_recorded: Decimal,
    },
    /// The locked amount disagrees with the locked deposits.
    #[serde(rename_all = "camelCase")]
    LockedMismatch {
        /// Stored locked amount.
        wallet: Decimal,
        /// Sum of locked deposits.
        deposits: Decimal,
    },
    /// The locked amount is negative or larger than the balance.
    #[serde(rename_all = "camelCase")]
    LockedOutOfRange {
        /// Stored locked amount.
        locked: Decimal,
        /// Stored balance.
        balance: Decimal,
    },
    /// The maturity date is not the latest locked maturity.
    #[serde(rename_all = "camelCase")]
    MaturityMismatch {
        /// Stored maturity date.
        wallet: Option<DateTime<Utc>>,
        /// Latest maturity among locked deposits.
        deposits: Option<DateTime<Utc>>,
    },
    /// A coupon's `used_count` disagrees with its applied redemptions.
    #[serde(rename_all = "camelCase")]
    UsageCountMismatch {
        /// Coupon code.
        code: String,
        /// Stored counter.
        used_count: u32,
        /// Applied redemptions.
        applied: usize,
    },
    /// A coupon has more applied redemptions than its limit.
    #[serde(rename_all = "camelCase")]
    UsageLimitExceeded {
        /// Coupon code.
        code: String,
        /// Applied redemptions.
        applied: usize,
        /// Configured limit.
        limit: u32,
    },
    /// A redemption happened outside the coupon's validity window.
    #[serde(rename_all = "camelCase")]
    RedeemedOutsideWindow {
        /// Coupon code.
        code: String,
        /// Offending redemption.
        redemption: RedemptionId,
        /// When it was redeemed.
        redeemed_at: DateTime<Utc>,
    },
    /// A receipt number is shared by several deposits.
    #[serde(rename_all = "camelCase")]
    DuplicateReceipt {
        /// Receipt number.
        receipt: String,
        /// Deposits carrying it.
        count: usize,
    },
    /// A stored amount or total falls outside the decimal range.
    #[serde(rename_all = "camelCase")]
    AmountOverflow {
        /// Which amount overflowed.
        what: String,
    },
}

impl fmt::Display for AuditIssue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DeltaMismatch {
                ref transaction,
                expected,
                recorded,
            } => write!(
                f,
                "transaction {transaction} moves the balance by {recorded}, expected {expected}"
            ),
            Self::SequenceGap {
                ref transaction,
                expected,
                found,
            } => write!(
                f,
                "transaction {transaction} has sequence {found}, expected {expected}"
            ),
            Self::ChainBreak {
                ref transaction,
                expected_before,
                recorded_before,
            } => write!(
                f,
                "transaction {transaction} starts at {recorded_before}, previous ended at {expected_before}"
            ),
            Self::BalanceMismatch {
                wallet,
                ledger,
                last_recorded,
            } => write!(
                f,
                "wallet balance {wallet} but transactions sum to {ledger} (last recorded {last_recorded})"
            ),
            Self::LockedMismatch { wallet, deposits } => write!(
                f,
                "locked amount {wallet} but locked deposits sum to {deposits}"
            ),
            Self::LockedOutOfRange { locked, balance } => write!(
                f,
                "locked amount {locked} outside 0..={balance}"
            ),
            Self::MaturityMismatch { wallet, deposits } => write!(
                f,
                "maturity date {} but latest locked deposit matures {}",
                display_date(wallet),
                display_date(deposits)
            ),
            Self::UsageCountMismatch {
                ref code,
                used_count,
                applied,
            } => write!(
                f,
                "coupon {code} counts {used_count} uses but has {applied} applied redemptions"
            ),
            Self::UsageLimitExceeded {
                ref code,
                applied,
                limit,
            } => write!(
                f,
                "coupon {code} has {applied} applied redemptions, limit {limit}"
            ),
            Self::RedeemedOutsideWindow {
                ref code,
                ref redemption,
                redeemed_at,
            } => write!(
                f,
                "coupon {code} redemption {redemption} at {redeemed_at} is outside its window"
            ),
            Self::DuplicateReceipt { ref receipt, count } => {
                write!(f, "receipt {receipt} issued {count} times")
            }
            Self::AmountOverflow { ref what } => write!(f, "{what} is out of range"),
        }
    }
}

/// Renders an optional timestamp.
fn display_date(date: Option<DateTime<Utc>>) -> String {
    date.map_or_else(|| "none".to_owned(), |d| d.to_rfc3339())
}

/// Audit result for one merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// Audited merchant.
    pub merchant: MerchantId,
    /// Merchant's business name.
    pub business_name: String,
    /// Number of transactions replayed.
    pub transactions_checked: usize,
    /// Number of coupons checked.
    pub coupons_checked: usize,
    /// Every inconsistency found.
    pub issues: Vec<AuditIssue>,
}

impl AuditReport {
    /// Returns `true` if no issue was found.
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Audits one merchant against the stored records.
pub(crate) fn audit_merchant(snapshot: &Snapshot, merchant: &Merchant) -> AuditReport {
    let mut issues = Vec::new();

    let mut chain: Vec<&Transaction> = snapshot.transactions_of(&merchant.id).collect();
    chain.sort_by_key(|t| t.sequence);
    let (ledger, last_recorded) = check_chain(&chain, &mut issues);
    let wallet = &merchant.wallet;
    if wallet.balance != ledger || wallet.balance != last_recorded {
        issues.push(AuditIssue::BalanceMismatch {
            wallet: wallet.balance,
            ledger,
            last_recorded,
        });
    }

    match lock_state(snapshot.deposits_of(&merchant.id)) {
        Ok((locked, maturity)) => {
            if wallet.locked_amount != locked {
                issues.push(AuditIssue::LockedMismatch {
                    wallet: wallet.locked_amount,
                    deposits: locked,
                });
            }
            if wallet.maturity_date != maturity {
                issues.push(AuditIssue::MaturityMismatch {
                    wallet: wallet.maturity_date,
                    deposits: maturity,
                });
            }
        }
        Err(_) => issues.push(AuditIssue::AmountOverflow {
            what: "sum of locked deposits".to_owned(),
        }),
    }
    if wallet.locked_amount < Decimal::ZERO || wallet.locked_amount > wallet.balance {
        issues.push(AuditIssue::LockedOutOfRange {
            locked: wallet.locked_amount,
            balance: wallet.balance,
        });
    }

    check_receipts(snapshot, &merchant.id, &mut issues);
    let coupons_checked = check_coupons(snapshot, &merchant.id, &mut issues);

    if !issues.is_empty() {
        tracing::warn!(
            merchant = %merchant.id,
            issues = issues.len(),
            "audit found inconsistencies"
        );
    }
    AuditReport {
        merchant: merchant.id.clone(),
        business_name: merchant.profile.business_name.clone(),
        transactions_checked: chain.len(),
        coupons_checked,
        issues,
    }
}

/// Replays a merchant's chain, returning the summed movements and the last
/// recorded balance.
fn check_chain(chain: &[&Transaction], issues: &mut Vec<AuditIssue>) -> (Decimal, Decimal) {
    let mut ledger = Decimal::ZERO;
    let mut previous_after = Decimal::ZERO;
    let mut expected_sequence: u64 = 1;
    for &tx in chain {
        if tx.sequence != expected_sequence {
            issues.push(AuditIssue::SequenceGap {
                transaction: tx.id.clone(),
                expected: expected_sequence,
                found: tx.sequence,
            });
        }
        if tx.balance_before != previous_after {
            issues.push(AuditIssue::ChainBreak {
                transaction: tx.id.clone(),
                expected_before: previous_after,
                recorded_before: tx.balance_before,
            });
        }
        let expected = tx.signed_amount();
        match tx.recorded_delta() {
            Some(recorded) if recorded != expected => issues.push(AuditIssue::DeltaMismatch {
                transaction: tx.id.clone(),
                expected,
                recorded,
            }),
            Some(_) => {}
            None => issues.push(AuditIssue::AmountOverflow {
                what: format!("balance change of transaction {}", tx.id),
            }),
        }
        match ledger.checked_add(expected) {
            Some(total) => ledger = total,
            None => issues.push(AuditIssue::AmountOverflow {
                what: format!("transaction total at {}", tx.id),
            }),
        }
        previous_after = tx.balance_after;
        expected_sequence = tx.sequence.saturating_add(1);
    }
    (ledger, previous_after)
}

/// Flags receipt numbers of the merchant's deposits that appear more than
/// once across the ledger.
fn check_receipts(snapshot: &Snapshot, merchant: &MerchantId, issues: &mut Vec<AuditIssue>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for deposit in &snapshot.deposits {
        *counts.entry(deposit.receipt_number.as_str()).or_default() += 1;
    }
    let mut seen: Vec<&str> = Vec::new();
    for deposit in snapshot.deposits_of(merchant) {
        let receipt = deposit.receipt_number.as_str();
        let count = counts.get(receipt).copied().unwrap_or_default();
        if count > 1 && !seen.contains(&receipt) {
            seen.push(receipt);
            issues.push(AuditIssue::DuplicateReceipt {
                receipt: receipt.to_owned(),
                count,
            });
        }
    }
}

/// Checks usage counters and windows of the merchant's coupons.
fn check_coupons(
    snapshot: &Snapshot,
    merchant: &MerchantId,
    issues: &mut Vec<AuditIssue>,
) -> usize {
    let mut checked = 0_usize;
    for coupon in snapshot.coupons.iter().filter(|c| c.merchant == *merchant) {
        checked += 1;
        let applied = coupon.applied_redemptions();
        if usize::try_from(coupon.used_count).ok() != Some(applied) {
            issues.push(AuditIssue::UsageCountMismatch {
                code: coupon.code.clone(),
                used_count: coupon.used_count,
                applied,
            });
        }
        if usize::try_from(coupon.usage_limit).is_ok_and(|limit| applied > limit) {
            issues.push(AuditIssue::UsageLimitExceeded {
                code: coupon.code.clone(),
                applied,
                limit: coupon.usage_limit,
            });
        }
        for redemption in &coupon.redemptions {
            let outside = redemption.redeemed_at < coupon.valid_from
                || redemption.redeemed_at > coupon.valid_until;
            if redemption.status == RedemptionStatus::Applied && outside {
                issues.push(AuditIssue::RedeemedOutsideWindow {
                    code: coupon.code.clone(),
                    redemption: redemption.id.clone(),
                    redeemed_at: redemption.redeemed_at,
                });
            }
        }
    }
    checked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Actor, AgentId, BusinessProfile, CouponCode, CouponId, Deposit, DepositId, DepositStatus,
        DiscountType, MerchantStatus, Redemption, TransactionKind, TransactionStatus, Wallet,
    };

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn merchant(balance: i64, locked: i64) -> Merchant {
        Merchant {
            id: MerchantId::new("m-1".to_owned()),
            agent: AgentId::new("a-1".to_owned()),
            profile: BusinessProfile {
                business_name: "Fresh Mart".to_owned(),
                owner_name: "Anita".to_owned(),
                phone: "555-0101".to_owned(),
                email: "anita@freshmart.test".to_owned(),
                address: "12 Market Road".to_owned(),
                category: "grocery".to_owned(),
            },
            status: MerchantStatus::Approved,
            wallet: Wallet {
                balance: Decimal::from(balance),
                locked_amount: Decimal::from(locked),
                maturity_date: (locked > 0).then(|| at("2026-04-01T00:00:00Z")),
            },
            rejection_reason: None,
            approved_at: None,
            revision: 3,
            created: at("2026-01-01T00:00:00Z"),
            changed: at("2026-01-01T00:00:00Z"),
        }
    }

    fn tx(
        id: &str,
        sequence: u64,
        kind: TransactionKind,
        amount: i64,
        before: i64,
        after: i64,
    ) -> Transaction {
        Transaction {
            id: TransactionId::new(id.to_owned()),
            merchant: MerchantId::new("m-1".to_owned()),
            sequence,
            kind,
            amount: Decimal::from(amount),
            status: TransactionStatus::Completed,
            balance_before: Decimal::from(before),
            balance_after: Decimal::from(after),
            reference_id: None,
            actor: Actor::Admin,
            note: None,
            created: at("2026-01-01T00:00:00Z"),
        }
    }

    fn locked_deposit(amount: i64) -> Deposit {
        Deposit {
            id: DepositId::new("d-1".to_owned()),
            merchant: MerchantId::new("m-1".to_owned()),
            agent: AgentId::new("a-1".to_owned()),
            amount: Decimal::from(amount),
            receipt_number: "RCP-20260101-00000001".to_owned(),
            maturity_date: at("2026-04-01T00:00:00Z"),
            status: DepositStatus::Locked,
            created: at("2026-01-01T00:00:00Z"),
            released_at: None,
        }
    }

    fn consistent() -> Snapshot {
        Snapshot {
            merchants: vec![merchant(80, 100)],
            deposits: vec![locked_deposit(100)],
            transactions: vec![
                tx("t-1", 1, TransactionKind::Deposit, 100, 0, 100),
                tx("t-2", 2, TransactionKind::AdjustmentCredit, 30, 100, 130),
                tx("t-3", 3, TransactionKind::Withdrawal, 50, 130, 80),
            ],
            ..Snapshot::default()
        }
    }

    #[test]
    fn locked_above_balance_is_reported() {
        let snapshot = consistent();
        let report = audit_merchant(&snapshot, snapshot.merchants.first().unwrap());
        assert_eq!(report.transactions_checked, 3);
        assert_eq!(
            report.issues,
            vec![AuditIssue::LockedOutOfRange {
                locked: Decimal::from(100),
                balance: Decimal::from(80),
            }]
        );
    }

    #[test]
    fn clean_chain_has_no_issues() {
        let mut snapshot = consistent();
        snapshot.transactions.truncate(2);
        snapshot.merchants = vec![merchant(130, 100)];
        let report = audit_merchant(&snapshot, snapshot.merchants.first().unwrap());
        assert!(report.is_clean(), "{:?}", report.issues);
    }

    #[test]
    fn tampered_balance_is_reported() {
        let mut snapshot = consistent();
        snapshot.transactions.truncate(2);
        snapshot.merchants = vec![merchant(999, 100)];
        let report = audit_merchant(&snapshot, snapshot.merchants.first().unwrap());
        assert!(report.issues.iter().any(|issue| matches!(
            *issue,
            AuditIssue::BalanceMismatch { wallet, .. } if wallet == Decimal::from(999)
        )));
    }

    #[test]
    fn overflowing_records_are_reported() {
        let mut first = tx("t-1", 1, TransactionKind::Deposit, 0, 0, 0);
        first.amount = Decimal::MAX;
        first.balance_after = Decimal::MAX;
        let mut second = tx("t-2", 2, TransactionKind::AdjustmentCredit, 0, 0, 0);
        second.amount = Decimal::MAX;
        second.balance_before = Decimal::MIN;
        second.balance_after = Decimal::MAX;
        let mut big = locked_deposit(0);
        big.amount = Decimal::MAX;
        let mut bigger = big.clone();
        bigger.id = DepositId::new("d-2".to_owned());
        bigger.receipt_number = "RCP-20260101-00000002".to_owned();

        let mut wallet_owner = merchant(0, 0);
        wallet_owner.wallet.balance = Decimal::MAX;
        let snapshot = Snapshot {
            merchants: vec![wallet_owner],
            deposits: vec![big, bigger],
            transactions: vec![first, second],
            ..Snapshot::default()
        };
        let report = audit_merchant(&snapshot, snapshot.merchants.first().unwrap());
        let overflows = report
            .issues
            .iter()
            .filter(|issue| matches!(issue, AuditIssue::AmountOverflow { .. }))
            .count();
        assert_eq!(overflows, 3, "{:?}", report.issues);
        assert!(!report.is_clean());
    }

    #[test]
    fn broken_chain_and_bad_delta_are_reported() {
        let mut snapshot = consistent();
        snapshot.merchants = vec![merchant(130, 100)];
        snapshot.transactions = vec![
            tx("t-1", 1, TransactionKind::Deposit, 100, 0, 100),
            tx("t-2", 3, TransactionKind::AdjustmentCredit, 30, 90, 130),
        ];
        let report = audit_merchant(&snapshot, snapshot.merchants.first().unwrap());
        assert!(report.issues.contains(&AuditIssue::SequenceGap {
            transaction: TransactionId::new("t-2".to_owned()),
            expected: 2,
            found: 3,
        }));
        assert!(report.issues.contains(&AuditIssue::ChainBreak {
            transaction: TransactionId::new("t-2".to_owned()),
            expected_before: Decimal::from(100),
            recorded_before: Decimal::from(90),
        }));
        assert!(report.issues.contains(&AuditIssue::DeltaMismatch {
            transaction: TransactionId::new("t-2".to_owned()),
            expected: Decimal::from(30),
            recorded: Decimal::from(40),
        }));
    }

    #[test]
    fn coupon_usage_drift_is_reported() {
        let mut snapshot = consistent();
        snapshot.transactions.truncate(2);
        snapshot.merchants = vec![merchant(130, 100)];
        snapshot.coupons = vec![CouponCode {
            id: CouponId::new("c-1".to_owned()),
            code: "SAVE10".to_owned(),
            merchant: MerchantId::new("m-1".to_owned()),
            description: None,
            discount_type: DiscountType::Fixed,
            discount_value: Decimal::TEN,
            min_order_amount: None,
            max_discount: None,
            usage_limit: 1,
            used_count: 1,
            valid_from: at("2026-01-01T00:00:00Z"),
            valid_until: at("2026-02-01T00:00:00Z"),
            active: true,
            redemptions: vec![Redemption {
                id: RedemptionId::new("r-1".to_owned()),
                customer: "cust-1".to_owned(),
                order_amount: Decimal::ONE_HUNDRED,
                discount_amount: Decimal::TEN,
                transaction: TransactionId::new("t-9".to_owned()),
                status: RedemptionStatus::Applied,
                redeemed_at: at("2026-03-01T00:00:00Z"),
                reversed_at: None,
            }],
            revision: 2,
            created: at("2026-01-01T00:00:00Z"),
            changed: at("2026-03-01T00:00:00Z"),
        }];
        let report = audit_merchant(&snapshot, snapshot.merchants.first().unwrap());
        assert_eq!(report.coupons_checked, 1);
        assert!(
            report
                .issues
                .iter()
                .any(|issue| matches!(*issue, AuditIssue::RedeemedOutsideWindow { .. }))
        );
        assert!(
            !report
                .issues
                .iter()
                .any(|issue| matches!(*issue, AuditIssue::UsageCountMismatch { .. }))
        );
    }

    #[test]
    fn duplicate_receipts_are_reported_once() {
        let mut snapshot = consistent();
        snapshot.transactions.truncate(2);
        snapshot.merchants = vec![merchant(130, 200)];
        let mut twin = locked_deposit(100);
        twin.id = DepositId::new("d-2".to_owned());
        snapshot.deposits.push(twin);
        let report = audit_merchant(&snapshot, snapshot.merchants.first().unwrap());
        let duplicates: Vec<&AuditIssue> = report
            .issues
            .iter()
            .filter(|issue| matches!(**issue, AuditIssue::DuplicateReceipt { .. }))
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert!(duplicates.first().unwrap().to_string().contains("2 times"));
    }
}
