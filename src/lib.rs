//! Batch upload and session orchestration client for the Platinum Sequence
//! analysis backend.

pub mod config;
pub mod upload;

pub use config::Config;
