#![doc = include_str!("../README.md")]

mod common;
pub mod directory;
pub mod dispatch;
pub mod proto;
pub mod registry;
pub mod relay;

pub use common::*;
pub use common::error::{Error, Result};
pub use common::types::{CorrelationId, Key, PollPolicy, ProducerId};
pub use registry::KeyRegistry;
pub use relay::{Relay, RelayBody, RelayResponse};
