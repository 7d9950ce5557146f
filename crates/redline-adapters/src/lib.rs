//! Runtime adapters for Redline (config, logging, file inputs).

pub mod config;
pub mod inputs;
pub mod logging;

pub use config::Config;
pub use logging::init_logging;
