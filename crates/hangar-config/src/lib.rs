#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Layered configuration for the Hangar capability store.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hangar_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! println!("agent registry: {}", resolved.config.registry.agent_url);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **User** (`$HANGAR_HOME/config.toml`, default `~/.hangar/config.toml`)
//! 2. **Environment variables** (`HANGAR_*`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate depends on no other hangar crate; conversion into domain
//! types happens where the store is wired together.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered configuration merging with source tracking.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ResolvedConfig;
pub use merge::{ConfigLayer, FieldSources};
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// `home_override` points at a Hangar home directory whose
    /// `config.toml` is used as the user layer. When `None`, the home is
    /// `$HANGAR_HOME` or `~/.hangar`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the config file is malformed or the
    /// final configuration fails validation.
    pub fn load(home_override: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(home_override, &env::collect_env_vars())
    }
}
