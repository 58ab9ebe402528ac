//! ComfyUI REST client and job-completion tracking.
//!
//! Provides the HTTP API wrapper behind the [`api::GenerationBackend`]
//! trait, a process-wide readiness gate with exponential backoff, typed
//! parsing and classification of `/history` entries, confinement of
//! reported output files to the output directory, and the bounded
//! completion poller.

pub mod api;
pub mod history;
pub mod poller;
pub mod readiness;
pub mod resolver;
