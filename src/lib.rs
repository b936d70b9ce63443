//! Ferry Bridge - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod attestation;
pub mod clock;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod events;
pub mod hash;
pub mod ledger;
pub mod metrics;
pub mod relay;
pub mod tracker;
pub mod types;
