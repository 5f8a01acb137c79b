//! Post-lock correction workflow records.
//!
//! Once a shipment is delivered its financial fields freeze. The only way to
//! change them afterwards is an [`Adjustment`]: a patch plus a mandatory
//! reason, approved (or auto-approved) by a privileged actor. Adjustments
//! live inside their shipment aggregate and are replayed from its events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use haulbooks_core::{AggregateId, Entity, Money, UserId};

use crate::shipment::Accessorial;

/// Adjustment identifier, unique within the owning shipment's tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdjustmentId(pub AggregateId);

impl AdjustmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AdjustmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentStatus {
    Pending,
    Approved,
    Rejected,
}

/// How a tenant routes adjustment requests.
///
/// `AutoApprove` applies the patch in the same command that records the
/// request; `RequireApproval` parks it as `Pending` until a privileged actor
/// approves or rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentPolicy {
    AutoApprove,
    RequireApproval,
}

/// Requested new values for the locked financial fields. `None` means the
/// field is left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AdjustmentPatch {
    pub base_rate: Option<Money>,
    pub miles: Option<u32>,
    pub accessorials: Option<Vec<Accessorial>>,
}

impl AdjustmentPatch {
    pub fn is_empty(&self) -> bool {
        self.base_rate.is_none() && self.miles.is_none() && self.accessorials.is_none()
    }
}

/// One correction request against a locked shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub status: AdjustmentStatus,
    pub patch: AdjustmentPatch,
    pub reason: String,
    pub created_by: UserId,
    pub approved_by: Option<UserId>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Adjustment {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, AdjustmentStatus::Pending)
    }
}

impl Entity for Adjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One line of a shipment's adjustment log: a single field that actually
/// changed, with its old and new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLogEntry {
    pub adjustment_id: AdjustmentId,
    pub field: String,
    pub old_value: JsonValue,
    pub new_value: JsonValue,
    pub actor_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}
