//! Error types for the marketplace ledger.

use rust_decimal::Decimal;

/// All errors that can occur when operating the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend failed.
    #[error("storage error: {0}")]
    Storage(Box<dyn core::error::Error + Send + Sync>),

    /// Configuration value is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (e.g. "merchant").
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The actor is not allowed to perform the action.
    #[error("{actor} is not allowed to {action}")]
    Forbidden {
        /// Display form of the acting party.
        actor: String,
        /// Action that was attempted.
        action: &'static str,
    },

    /// The entity is not in a state that permits the operation.
    #[error("{entity} {id} is {state}: cannot {action}")]
    InvalidState {
        /// Entity kind.
        entity: &'static str,
        /// Entity identifier.
        id: String,
        /// Current state of the entity.
        state: String,
        /// Action that was attempted.
        action: &'static str,
    },

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The wallet's available balance does not cover the movement.
    #[error("insufficient available balance: available {available}, required {required}")]
    InsufficientFunds {
        /// Balance minus locked amount.
        available: Decimal,
        /// Amount the operation needs.
        required: Decimal,
    },

    /// Coupon exists but can not be redeemed right now.
    #[error("coupon {code} rejected: {reason}")]
    CouponRejected {
        /// Normalised coupon code.
        code: String,
        /// Why the coupon was rejected.
        reason: CouponRejection,
    },

    /// Another coupon already uses this code.
    #[error("coupon code already in use: {0}")]
    DuplicateCouponCode(String),

    /// Another deposit already uses this receipt number.
    #[error("receipt number already issued: {0}")]
    DuplicateReceipt(String),

    /// A concurrent writer changed the entity since it was read.
    #[error("concurrent modification of {entity} {id}")]
    Conflict {
        /// Entity kind.
        entity: &'static str,
        /// Entity identifier.
        id: String,
    },
}

impl LedgerError {
    /// Builds the [`LedgerError::Validation`] raised when `what` would leave
    /// the range a [`Decimal`] can represent.
    #[inline]
    #[must_use]
    pub fn amount_overflow(what: &str) -> Self {
        Self::Validation(format!("{what} exceeds the supported amount range"))
    }
}

/// Reasons a coupon redemption is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    /// The coupon was deactivated.
    #[error("coupon is inactive")]
    Inactive,
    /// The validity window has not started.
    #[error("coupon is not valid yet")]
    NotYetValid,
    /// The validity window has ended.
    #[error("coupon has expired")]
    Expired,
    /// Every permitted use has been consumed.
    #[error("usage limit of {limit} reached")]
    UsageLimitReached {
        /// Configured usage limit.
        limit: u32,
    },
    /// The order is smaller than the coupon's minimum.
    #[error("order amount below minimum of {minimum}")]
    BelowMinimumOrder {
        /// Minimum order amount.
        minimum: Decimal,
    },
}

/// Convenience result alias for ledger operations.
pub type Result<T> = core::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_from_serde_json() {
        let serde_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err = LedgerError::from(serde_err);
        assert!(matches!(err, LedgerError::Serialization(_)));
        let msg = err.to_string();
        assert!(msg.contains("serialization error"));
    }

    #[test]
    fn amount_overflow_is_a_validation_error() {
        let err = LedgerError::amount_overflow("wallet balance");
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(err.to_string().contains("wallet balance exceeds"));
    }

    #[test]
    fn error_storage_display() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = LedgerError::Storage(Box::new(inner));
        let msg = err.to_string();
        assert!(msg.contains("storage error"));
        assert!(msg.contains("file missing"));
    }

    #[test]
    fn insufficient_funds_display() {
        let err = LedgerError::InsufficientFunds {
            available: Decimal::new(1050, 2),
            required: Decimal::new(2000, 2),
        };
        assert_eq!(
            err.to_string(),
            "insufficient available balance: available 10.50, required 20.00"
        );
    }

    #[test]
    fn coupon_rejection_display() {
        let err = LedgerError::CouponRejected {
            code: "SAVE10".to_owned(),
            reason: CouponRejection::UsageLimitReached { limit: 5 },
        };
        assert_eq!(err.to_string(), "coupon SAVE10 rejected: usage limit of 5 reached");
    }

    #[test]
    fn invalid_state_display() {
        let err = LedgerError::InvalidState {
            entity: "merchant",
            id: "m-1".to_owned(),
            state: "pending".to_owned(),
            action: "collect a deposit",
        };
        assert_eq!(
            err.to_string(),
            "merchant m-1 is pending: cannot collect a deposit"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LedgerError>();
    }
}
