//! Shared domain types for the analysis orchestrator.
//!
//! This crate holds pure data: jobs, plans, phase specs, phase outputs,
//! documents, and the registry entity shapes. No I/O and no orchestration
//! logic lives here — see the root crate for that.

pub mod documents;
pub mod model;
pub mod plan;
pub mod registry;

pub use documents::*;
pub use model::*;
pub use plan::*;
pub use registry::*;
