//! Aegis-Common: Shared error handling for Aegis-Flow
//!
//! This crate provides the error type used across the Aegis-Flow lifecycle
//! orchestrator crates.

pub mod error;

pub use error::{AegisError, Result};
