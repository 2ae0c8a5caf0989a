//! CLI command implementations.

pub(crate) mod capabilities;
pub(crate) mod invoke;

use hangar_store::ErrorKind;
use serde::Serialize;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// Colored, human-readable.
    Pretty,
    /// One pretty-printed JSON document on stdout.
    Json,
}

/// Print `value` as JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The install stage an error kind belongs to, for failure messages.
pub(crate) fn stage(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::UnknownCapability | ErrorKind::RegistryFetchFailed => "lookup",
        ErrorKind::FetchError => "download",
        ErrorKind::EnvCreationFailed => "environment",
        ErrorKind::DependencyInstallFailed => "dependencies",
        ErrorKind::EntryPointNotFound => "entry point",
        ErrorKind::InstallInProgress => "queue",
        ErrorKind::StateError => "state",
        ErrorKind::CapabilityNotInstalled
        | ErrorKind::CapabilityDisabled
        | ErrorKind::InvocationTimeout
        | ErrorKind::ProcessError
        | ErrorKind::InvocationCancelled => "invocation",
    }
}
