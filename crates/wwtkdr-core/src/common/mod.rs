//! Shared types and error definitions used across the relay.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type and its HTTP mapping.
//! - [`types`] - Keys, producer and correlation identifiers, poll policy.

pub mod error;
pub mod types;
