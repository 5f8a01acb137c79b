//! Resolved actor context.
//!
//! Every call into the core arrives with a `{tenant, actor, role}` triple
//! already resolved by the surrounding application. The core trusts it and
//! performs no authentication of its own; the role only gates the operations
//! that require a privileged actor.

use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Coarse role of the acting user.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Accountant,
    Dispatcher,
    Driver,
}

impl Role {
    /// Whether this role may approve (or reject) financial adjustments on
    /// locked shipments.
    pub fn can_approve_adjustments(self) -> bool {
        matches!(self, Role::Admin | Role::Accountant)
    }
}

/// The acting user behind a mutation. Attached to every command dispatch and
/// recorded on every event envelope and audit entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: UserId,
    pub role: Role,
}

impl ActorContext {
    pub fn new(actor_id: UserId, role: Role) -> Self {
        Self { actor_id, role }
    }
}
