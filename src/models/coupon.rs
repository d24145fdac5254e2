//! Coupon registry models.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::{CouponId, DiscountType, MerchantId, RedemptionId, RedemptionStatus, TransactionId};
use crate::error::{CouponRejection, LedgerError};

/// Decimal places discounts are rounded to.
const MONEY_SCALE: u32 = 2;

/// One use of a coupon, embedded in its [`CouponCode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    /// Unique identifier (UUID).
    pub id: RedemptionId,
    /// Customer reference supplied by the merchant.
    pub customer: String,
    /// Order amount before discount.
    pub order_amount: Decimal,
    /// Discount granted and debited from the wallet.
    pub discount_amount: Decimal,
    /// Wallet transaction that funded the discount.
    pub transaction: TransactionId,
    /// Whether the redemption still counts.
    pub status: RedemptionStatus,
    /// Redemption timestamp.
    pub redeemed_at: DateTime<Utc>,
    /// When an admin reversed the redemption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversed_at: Option<DateTime<Utc>>,
}

/// A merchant-issued discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponCode {
    /// Unique identifier (UUID).
    pub id: CouponId,
    /// Upper-case code, unique across the ledger.
    pub code: String,
    /// Issuing merchant.
    pub merchant: MerchantId,
    /// Customer-facing description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How `discount_value` is applied.
    pub discount_type: DiscountType,
    /// Percentage or fixed amount.
    pub discount_value: Decimal,
    /// Smallest order the coupon applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_order_amount: Option<Decimal>,
    /// Cap on a percentage discount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_discount: Option<Decimal>,
    /// Maximum number of applied redemptions.
    pub usage_limit: u32,
    /// Number of applied redemptions.
    pub used_count: u32,
    /// Start of the validity window (inclusive).
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (inclusive).
    pub valid_until: DateTime<Utc>,
    /// Cleared when the coupon is deactivated.
    pub active: bool,
    /// Every redemption, applied or reversed.
    #[serde(default)]
    pub redemptions: Vec<Redemption>,
    /// Optimistic concurrency revision (starts at 1).
    pub revision: u64,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub changed: DateTime<Utc>,
}

impl CouponCode {
    /// Returns how many more times the coupon can be redeemed.
    #[inline]
    #[must_use]
    pub const fn remaining_uses(&self) -> u32 {
        self.usage_limit.saturating_sub(self.used_count)
    }

    /// Counts redemptions that are still applied.
    #[inline]
    #[must_use]
    pub fn applied_redemptions(&self) -> usize {
        self.redemptions
            .iter()
            .filter(|r| r.status == RedemptionStatus::Applied)
            .count()
    }

    /// Checks every coupon-level rule for redeeming against `order_amount`
    /// at `now`. Wallet funding is checked separately.
    ///
    /// # Errors
    ///
    /// Returns the first [`CouponRejection`] that applies.
    #[inline]
    pub fn check_redeemable(
        &self,
        order_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), CouponRejection> {
        if !self.active {
            return Err(CouponRejection::Inactive);
        }
        if now < self.valid_from {
            return Err(CouponRejection::NotYetValid);
        }
        if now > self.valid_until {
            return Err(CouponRejection::Expired);
        }
        if self.used_count >= self.usage_limit {
            return Err(CouponRejection::UsageLimitReached {
                limit: self.usage_limit,
            });
        }
        if let Some(minimum) = self.min_order_amount
            && order_amount < minimum
        {
            return Err(CouponRejection::BelowMinimumOrder { minimum });
        }
        Ok(())
    }

    /// Computes the discount for an order, rounded half-up to cents and
    /// never larger than the order itself.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] if the percentage discount of
    /// `order_amount` is out of the decimal range.
    #[inline]
    pub fn discount_for(&self, order_amount: Decimal) -> Result<Decimal, LedgerError> {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = order_amount
                    .checked_mul(self.discount_value)
                    .ok_or_else(|| LedgerError::amount_overflow("percentage discount"))?
                    / Decimal::ONE_HUNDRED;
                self.max_discount.map_or(pct, |cap| pct.min(cap))
            }
            DiscountType::Fixed => self.discount_value,
        };
        Ok(raw
            .min(order_amount)
            .max(Decimal::ZERO)
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Finds an embedded redemption by ID.
    #[inline]
    #[must_use]
    pub fn redemption(&self, id: &RedemptionId) -> Option<&Redemption> {
        self.redemptions.iter().find(|r| r.id == *id)
    }
}

/// Input for issuing a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCoupon {
    /// Issuing merchant.
    pub merchant: MerchantId,
    /// Requested code; generated when absent.
    #[serde(default)]
    pub code: Option<String>,
    /// Customer-facing description.
    #[serde(default)]
    pub description: Option<String>,
    /// How `discount_value` is applied.
    pub discount_type: DiscountType,
    /// Percentage or fixed amount.
    pub discount_value: Decimal,
    /// Smallest order the coupon applies to.
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    /// Cap on a percentage discount.
    #[serde(default)]
    pub max_discount: Option<Decimal>,
    /// Maximum number of redemptions (>= 1).
    pub usage_limit: u32,
    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the validity window.
    pub valid_until: DateTime<Utc>,
}

/// Input for redeeming a coupon at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRequest {
    /// Customer reference.
    pub customer: String,
    /// Order amount before discount.
    pub order_amount: Decimal,
}
