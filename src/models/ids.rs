//! Newtype wrappers for entity identifiers.
//!
//! These prevent accidentally mixing up IDs of different entity types
//! at compile time.

use serde::{Deserialize, Serialize};

/// Macro to define a newtype ID wrapping a `String` inner type.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from the given string.
            #[inline]
            #[must_use]
            pub const fn new(value: String) -> Self {
                Self(value)
            }

            /// Generates a fresh random (UUID v4) identifier.
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Returns a reference to the inner string.
            #[inline]
            #[must_use]
            pub fn as_inner(&self) -> &str {
                &self.0
            }

            /// Consumes the wrapper and returns the inner string.
            #[inline]
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

define_string_id! {
    /// Unique identifier for a field agent (UUID string).
    AgentId
}

define_string_id! {
    /// Unique identifier for a merchant (UUID string).
    MerchantId
}

define_string_id! {
    /// Unique identifier for a cash deposit (UUID string).
    DepositId
}

define_string_id! {
    /// Unique identifier for a ledger transaction (UUID string).
    TransactionId
}

define_string_id! {
    /// Unique identifier for a coupon (UUID string).
    CouponId
}

define_string_id! {
    /// Unique identifier for a single coupon redemption (UUID string).
    RedemptionId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_id_serde_roundtrip() {
        let id = MerchantId::new("550e8400-e29b-41d4-a716-446655440000".to_owned());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""550e8400-e29b-41d4-a716-446655440000""#);
        let deserialized: MerchantId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, id);
    }

    #[test]
    fn string_id_display() {
        let id = AgentId::new("abc-123".to_owned());
        assert_eq!(id.to_string(), "abc-123");
    }

    #[test]
    fn generated_ids_are_distinct_uuids() {
        let first = DepositId::generate();
        let second = DepositId::generate();
        assert_ne!(first, second);
        assert_eq!(first.as_inner().len(), 36);
        assert!(uuid::Uuid::parse_str(first.as_inner()).is_ok());
    }

    #[test]
    fn id_from_inner() {
        let id: CouponId = "c-1".into();
        assert_eq!(id.as_inner(), "c-1");

        let id: TransactionId = "t-1".to_owned().into();
        assert_eq!(id.into_inner(), "t-1");
    }
}
