//! Acting party of a ledger operation.

use serde::{Deserialize, Serialize};

use super::{AgentId, MerchantId};

/// The already-authenticated party performing an operation.
///
/// Tiers follow the network hierarchy: admins manage agents and approve
/// merchants, agents register merchants and collect deposits, merchants
/// run their own coupons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "camelCase")]
pub enum Actor {
    /// Platform administrator.
    Admin,
    /// A field agent.
    Agent(AgentId),
    /// A merchant acting on its own account.
    Merchant(MerchantId),
}

impl Actor {
    /// Returns `true` for the platform administrator.
    #[inline]
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(*self, Self::Admin)
    }
}

impl core::fmt::Display for Actor {
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::Admin => f.write_str("admin"),
            Self::Agent(ref id) => write!(f, "agent {id}"),
            Self::Merchant(ref id) => write!(f, "merchant {id}"),
        }
    }
}
