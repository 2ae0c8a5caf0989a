//! Hangar CLI - capability store operator tool.
//!
//! Lists, installs, toggles and invokes agents, tool servers and
//! applications published in the configured registries.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hangar_core::{CapabilityId, CapabilityKind, HangarHome};
use hangar_store::{CapabilityStore, InvocationRequest};

mod commands;
mod config_bridge;
mod theme;

use commands::{OutputFormat, capabilities, invoke};

/// Hangar - install and run capability packages
#[derive(Parser)]
#[command(name = "hangar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    /// Data directory (defaults to $HANGAR_HOME or ~/.hangar)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered and installed capabilities
    List {
        /// agent, tool-server or application
        kind: CapabilityKind,
    },

    /// Fetch a registry (falls back to the cached copy)
    Refresh {
        /// agent, tool-server or application
        kind: CapabilityKind,
    },

    /// Install a capability from its registry
    Install {
        /// agent, tool-server or application
        kind: CapabilityKind,
        /// Capability id
        id: String,
    },

    /// Re-create an installed capability's environment and dependencies
    Reprovision {
        /// agent, tool-server or application
        kind: CapabilityKind,
        /// Capability id
        id: String,
    },

    /// Enable an installed capability
    Enable {
        /// agent, tool-server or application
        kind: CapabilityKind,
        /// Capability id
        id: String,
    },

    /// Disable an installed capability
    Disable {
        /// agent, tool-server or application
        kind: CapabilityKind,
        /// Capability id
        id: String,
    },

    /// Send a message to a capability
    Invoke {
        /// agent, tool-server or application
        kind: CapabilityKind,
        /// Capability id
        id: String,
        /// Message text
        message: String,
        /// Extra context passed with the message
        #[arg(long, default_value = "")]
        context: String,
        /// Timeout in seconds (defaults to invocation.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show on-disk diagnostics for a capability
    Inspect {
        /// agent, tool-server or application
        kind: CapabilityKind,
        /// Capability id
        id: String,
    },

    /// Point a registry at another URL for this run
    SetRegistry {
        /// agent, tool-server or application
        kind: CapabilityKind,
        /// Registry URL (http or https)
        url: String,
    },

    /// Install and enable the registry's default capabilities
    InstallDefaults {
        /// agent, tool-server or application
        kind: CapabilityKind,
    },

    /// Print the default agent named by the agent registry
    DefaultAgent,
}

fn parse_id(id: &str) -> Result<CapabilityId> {
    CapabilityId::new(id).with_context(|| format!("invalid capability id '{id}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = hangar_config::Config::load(cli.home.as_deref());

    // Set up logging from config, with --verbose override.
    let log_config = if let Ok(r) = &resolved {
        let logs_dir = cli
            .home
            .as_deref()
            .map_or_else(|| HangarHome::from_path(r.home_dir()), HangarHome::from_path)
            .logs_dir();
        let mut lc = config_bridge::to_log_config(&r.config, &logs_dir);
        if cli.verbose {
            "debug".clone_into(&mut lc.level);
        }
        lc
    } else {
        // Fallback if config loading fails.
        let level = if cli.verbose { "debug" } else { "warn" };
        hangar_telemetry::LogConfig::new(level)
            .with_format(hangar_telemetry::LogFormat::Compact)
            .with_target(hangar_telemetry::LogTarget::Stderr)
    };
    if let Err(e) = hangar_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let resolved = resolved.context("failed to load configuration")?;
    let home = match &cli.home {
        Some(path) => HangarHome::from_path(path),
        None => HangarHome::from_path(resolved.home_dir()),
    };
    tracing::debug!(home = %home.root().display(), files = ?resolved.loaded_files, "Configuration loaded");

    let format = match cli.format.as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Pretty,
    };

    let store = CapabilityStore::open(home, &resolved.config)
        .context("failed to open the capability store")?;

    let result = run(&store, cli.command, &resolved.config, format).await;
    store.shutdown();
    result
}

async fn run(
    store: &CapabilityStore,
    command: Commands,
    config: &hangar_config::Config,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Commands::List { kind } => capabilities::list(store, kind, format).await,
        Commands::Refresh { kind } => {
            capabilities::refresh(store, kind, config.store.auto_install_defaults, format).await
        },
        Commands::Install { kind, id } => {
            capabilities::install(store, kind, &parse_id(&id)?, format).await
        },
        Commands::Reprovision { kind, id } => {
            capabilities::reprovision(store, kind, &parse_id(&id)?, format).await
        },
        Commands::Enable { kind, id } => {
            capabilities::set_enabled(store, kind, &parse_id(&id)?, true, format)
        },
        Commands::Disable { kind, id } => {
            capabilities::set_enabled(store, kind, &parse_id(&id)?, false, format)
        },
        Commands::Invoke {
            kind,
            id,
            message,
            context,
            timeout,
        } => {
            let request = InvocationRequest {
                context,
                ..InvocationRequest::new(message)
            };
            invoke::invoke(
                store,
                kind,
                &parse_id(&id)?,
                request,
                timeout.map(Duration::from_secs),
                format,
            )
            .await
        },
        Commands::Inspect { kind, id } => capabilities::inspect(store, kind, &parse_id(&id)?, format),
        Commands::SetRegistry { kind, url } => {
            capabilities::set_registry(store, kind, &url, format).await
        },
        Commands::InstallDefaults { kind } => {
            capabilities::install_defaults(store, kind, format).await
        },
        Commands::DefaultAgent => capabilities::default_agent(store, format).await,
    }
}
