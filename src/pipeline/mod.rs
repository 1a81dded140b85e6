//! Message processing pipeline: types, confidence routing, the per-message
//! state machine, and the batch coordinator.

pub mod coordinator;
pub mod processor;
pub mod router;
pub mod types;

pub use coordinator::{BatchCoordinator, CycleReport, spawn_cycle_loop};
pub use processor::MessageProcessor;
pub use router::{Thresholds, route};
