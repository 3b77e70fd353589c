//! Built-in demo producer.
//!
//! Serves files from a local directory under a single key, speaking the same
//! claim/request/reply contract a notebook kernel would. It runs in-process on
//! the [`MemoryDirectory`](wwtkdr_core::directory::MemoryDirectory) and is
//! meant for trying out the relay without a kernel.
//!
//! ## Structure
//!
//! - [`worker`] - Producer and session loops.
//! - [`files`] - Entry resolution and chunked file replies.

pub mod files;
pub mod worker;

pub use worker::producer_loop;
