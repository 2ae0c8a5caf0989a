//! Hangar Telemetry - logging for the Hangar capability store.
//!
//! # Example
//!
//! ```rust,no_run
//! use hangar_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), hangar_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("hangar_store=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("capability store ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
