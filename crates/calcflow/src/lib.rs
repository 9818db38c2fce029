//! calcflow library: application logic behind the `calcflow` binary.

pub mod app;
pub mod config;
pub mod errors;
pub mod plan;
pub mod version;
