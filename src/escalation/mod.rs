//! Escalation handling — responder directory and team assembly for
//! low-confidence messages.

pub mod assembler;
pub mod directory;

pub use assembler::{AssemblyResult, TeamAssembler};
pub use directory::ResponderDirectory;
