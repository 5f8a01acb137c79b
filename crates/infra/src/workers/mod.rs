//! Background workers pumping the event bus into read models.

pub mod projection_worker;

pub use projection_worker::{ProjectionWorker, WorkerHandle};
