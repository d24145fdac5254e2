//! Enumeration types for constrained ledger values.

use serde::{Deserialize, Serialize};

/// Implements `as_str` and `Display` from a variant → wire-name table.
macro_rules! impl_wire_name {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Returns the wire name of the variant.
            #[inline]
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl core::fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Lifecycle state of a field agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    /// May register merchants and collect deposits.
    Active,
    /// Blocked from every agent action.
    Suspended,
}

impl_wire_name!(AgentStatus {
    Active => "active",
    Suspended => "suspended",
});

/// Approval state of a merchant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MerchantStatus {
    /// Registered by an agent, awaiting admin review.
    Pending,
    /// Approved by an admin; the wallet is live.
    Approved,
    /// Rejected by an admin.
    Rejected,
}

impl_wire_name!(MerchantStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Maturity state of a cash deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepositStatus {
    /// Counted in the wallet's locked amount until the maturity date.
    Locked,
    /// Released into the available balance.
    Matured,
}

impl_wire_name!(DepositStatus {
    Locked => "locked",
    Matured => "matured",
});

/// Direction in which a transaction moves the wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Increases the balance by the amount.
    Credit,
    /// Decreases the balance by the amount.
    Debit,
    /// Leaves the balance unchanged.
    Neutral,
}

/// Kind of ledger movement recorded by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    /// Agent-collected cash credited to the wallet (locked until maturity).
    Deposit,
    /// Matured deposit moved from locked to available.
    Release,
    /// Coupon discount funded from the wallet.
    Redemption,
    /// Reversed redemption credited back.
    Reversal,
    /// Manual admin credit.
    AdjustmentCredit,
    /// Manual admin debit.
    AdjustmentDebit,
    /// Payout of available balance to the merchant.
    Withdrawal,
}

impl TransactionKind {
    /// Returns how this kind of movement affects the wallet balance.
    #[inline]
    #[must_use]
    pub const fn effect(self) -> Effect {
        match self {
            Self::Deposit | Self::Reversal | Self::AdjustmentCredit => Effect::Credit,
            Self::Redemption | Self::AdjustmentDebit | Self::Withdrawal => Effect::Debit,
            Self::Release => Effect::Neutral,
        }
    }
}

impl_wire_name!(TransactionKind {
    Deposit => "deposit",
    Release => "release",
    Redemption => "redemption",
    Reversal => "reversal",
    AdjustmentCredit => "adjustmentCredit",
    AdjustmentDebit => "adjustmentDebit",
    Withdrawal => "withdrawal",
});

impl core::str::FromStr for TransactionKind {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kinds = [
            Self::Deposit,
            Self::Release,
            Self::Redemption,
            Self::Reversal,
            Self::AdjustmentCredit,
            Self::AdjustmentDebit,
            Self::Withdrawal,
        ];
        kinds
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown transaction kind: {s}"))
    }
}

/// Settlement state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    /// Applied to the wallet.
    Completed,
    /// Later offset by a compensating transaction.
    Reversed,
}

impl_wire_name!(TransactionStatus {
    Completed => "completed",
    Reversed => "reversed",
});

/// How a coupon's discount value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscountType {
    /// Percentage of the order amount, `(0, 100]`.
    Percentage,
    /// Fixed amount off the order.
    Fixed,
}

impl_wire_name!(DiscountType {
    Percentage => "percentage",
    Fixed => "fixed",
});

/// State of a single coupon redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RedemptionStatus {
    /// Counted against the usage limit.
    Applied,
    /// Reversed by an admin; no longer counted.
    Reversed,
}

impl_wire_name!(RedemptionStatus {
    Applied => "applied",
    Reversed => "reversed",
});

/// Direction of a manual balance adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdjustmentDirection {
    /// Add to the balance.
    Credit,
    /// Remove from the available balance.
    Debit,
}

impl AdjustmentDirection {
    /// Returns the transaction kind recorded for this direction.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> TransactionKind {
        match self {
            Self::Credit => TransactionKind::AdjustmentCredit,
            Self::Debit => TransactionKind::AdjustmentDebit,
        }
    }
}
