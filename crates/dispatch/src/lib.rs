//! Shipment lifecycle domain module (event-sourced).
//!
//! This crate contains the shipment state machine, the delivery lock that
//! freezes financial fields, and the adjustment workflow that is the only
//! sanctioned path past the lock. Pure deterministic domain logic (no IO,
//! no HTTP, no storage).

pub mod adjustment;
pub mod shipment;

pub use adjustment::{
    Adjustment, AdjustmentId, AdjustmentLogEntry, AdjustmentPatch, AdjustmentPolicy,
    AdjustmentStatus,
};
pub use shipment::{
    Accessorial, AccessorialCharge, AccessorialKind, AdjustmentApproved, AdjustmentRejected,
    AdjustmentRequested, ApproveAdjustment, AssignToSettlement, AssignedToSettlement,
    CancelShipment, CreateShipment, DeleteShipment, DispatchShipment, DocumentKind,
    DocumentVerified, FinancialsUpdated, InvoiceLink, InvoiceRecorded, MarkCompleted,
    MarkDelivered, MarkInTransit, RecordDocumentVerified, RecordInvoice, RejectAdjustment,
    ReleaseFromSettlement, ReleasedFromSettlement, RequestAdjustment, Shipment, ShipmentCancelled,
    ShipmentCommand, ShipmentCompleted, ShipmentCreated, ShipmentDeleted, ShipmentDelivered,
    ShipmentDispatched, ShipmentEvent, ShipmentId, ShipmentInTransit, ShipmentStatus,
    UpdateFinancials,
};
