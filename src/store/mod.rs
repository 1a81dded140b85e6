//! Outcome store — the durable record the dashboard and reporting
//! collaborators observe engine activity through.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::OutcomeStore;
