//! Shared domain types for the render relay.
//!
//! Holds the job error taxonomy, the inbound job and outbound result
//! documents, media classification by file extension, and the workload
//! heuristic that picks a poll timeout profile.

pub mod error;
pub mod job;
pub mod media;
pub mod workload;
