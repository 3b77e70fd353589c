pub mod config;
pub mod producer;
pub mod service;
pub mod telemetry;
