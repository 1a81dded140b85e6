//! Confidence-based email processing and escalation engine.

pub mod channels;
pub mod classify;
pub mod config;
pub mod error;
pub mod escalation;
pub mod pipeline;
pub mod resilience;
pub mod store;
