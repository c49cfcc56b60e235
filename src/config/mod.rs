//! Configuration module for spoof-router
//!
//! # Example
//!
//! ```no_run
//! use spoof_router::config::{load_config, Config};
//!
//! let config = load_config("/etc/spoof-router/config.json").unwrap();
//! println!("Spoof IP: {}", config.spoof_ip);
//! ```

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_str};
pub use types::{
    Config, ListenConfig, LogConfig, TimeoutConfig, DEFAULT_SPOOF_SUFFIXES,
};
