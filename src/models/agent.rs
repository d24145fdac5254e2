//! Field agent model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, AgentStatus};

/// A platform-appointed intermediary who recruits merchants and collects
/// cash deposits on the platform's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Unique identifier (UUID).
    pub id: AgentId,
    /// Full name.
    pub name: String,
    /// Contact phone number.
    pub phone: String,
    /// Contact email.
    pub email: String,
    /// Operating region, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Lifecycle state.
    pub status: AgentStatus,
    /// Optimistic concurrency revision (starts at 1).
    pub revision: u64,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub changed: DateTime<Utc>,
}

impl Agent {
    /// Returns `true` if the agent may act on the network.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// Input for registering a new agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgent {
    /// Full name.
    pub name: String,
    /// Contact phone number.
    pub phone: String,
    /// Contact email.
    pub email: String,
    /// Operating region.
    #[serde(default)]
    pub region: Option<String>,
}
