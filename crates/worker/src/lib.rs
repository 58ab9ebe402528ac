//! `relay-worker` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod delivery;
pub mod orchestrator;
pub mod thumbnail;
