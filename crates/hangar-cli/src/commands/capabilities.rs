//! Registry, install and state commands.

use anyhow::{Context, bail};
use colored::Colorize;
use hangar_core::{CapabilityId, CapabilityKind};
use hangar_store::{CapabilityStore, Registry, RegistryOrigin};

use super::{OutputFormat, print_json, stage};
use crate::theme::Theme;

/// List registered and installed capabilities.
pub(crate) async fn list(
    store: &CapabilityStore,
    kind: CapabilityKind,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let rows = store.list(kind).await;
    if format == OutputFormat::Json {
        return print_json(&rows);
    }

    report_origin(&store.registry(kind));
    if rows.is_empty() {
        println!("{}", Theme::info(&format!("No {kind} capabilities found")));
        return Ok(());
    }

    println!("\n{}", Theme::header(&format!("{kind} capabilities")));
    println!(
        "{:<24} {:<10} {:<10} {}",
        "ID".dimmed(),
        "STATUS".dimmed(),
        "DEFAULT".dimmed(),
        "NAME".dimmed()
    );
    println!("{}", Theme::separator());
    for row in rows {
        let name = if row.registered {
            row.name
        } else {
            format!("{} {}", row.name, Theme::dimmed("(no longer in registry)"))
        };
        println!(
            "{:<24} {:<10} {:<10} {}",
            row.id.as_str().cyan(),
            Theme::status(row.installed, row.enabled),
            if row.enable_by_default { "yes" } else { "" },
            name
        );
    }
    println!();
    Ok(())
}

/// Fetch the registry and show where it came from.
pub(crate) async fn refresh(
    store: &CapabilityStore,
    kind: CapabilityKind,
    auto_install_defaults: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let registry = store.refresh(kind).await;
    let defaults = if auto_install_defaults {
        Some(store.install_defaults(kind).await)
    } else {
        None
    };

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "registry": &*registry,
            "defaults": defaults,
        }));
    }

    report_origin(&registry);
    println!(
        "{}",
        Theme::success(&format!(
            "{} {kind} capabilities from {}",
            registry.len(),
            registry.source_url
        ))
    );
    for dropped in &registry.dropped {
        println!(
            "{}",
            Theme::warning(&format!("skipped entry '{}': {}", dropped.key, dropped.reason))
        );
    }
    if let Some(defaults) = defaults {
        print_defaults(&defaults);
    }
    Ok(())
}

/// Install one capability.
pub(crate) async fn install(
    store: &CapabilityStore,
    kind: CapabilityKind,
    id: &CapabilityId,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if format == OutputFormat::Pretty {
        println!("{}", Theme::info(&format!("Installing {kind} '{id}'...")));
    }

    let report = match store.install(kind, id).await {
        Ok(report) => report,
        Err(e) => {
            let kind = e.kind();
            if format == OutputFormat::Json {
                print_json(&serde_json::json!({ "error": kind, "message": e.to_string() }))?;
            }
            bail!("install of '{id}' failed at {} stage: {e}", stage(kind));
        },
    };

    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!(
        "{}",
        Theme::success(&format!(
            "Installed '{id}' ({} files, {} bytes)",
            report.fetch.files, report.fetch.bytes
        ))
    );
    for skipped in &report.fetch.skipped {
        println!(
            "{}",
            Theme::warning(&format!("skipped {}: {}", skipped.path, skipped.reason))
        );
    }
    if let Some(path) = &report.record.install_path {
        println!("{}", Theme::kv("Path", &path.display().to_string()));
    }
    println!("{}", Theme::kv("Environment", &report.env.root.display().to_string()));
    println!(
        "{}",
        Theme::kv("Status", &Theme::status(true, report.record.enabled))
    );
    Ok(())
}

/// Provision an installed capability again.
pub(crate) async fn reprovision(
    store: &CapabilityStore,
    kind: CapabilityKind,
    id: &CapabilityId,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let env = store
        .reprovision(kind, id)
        .await
        .with_context(|| format!("failed to provision '{id}'"))?;
    if format == OutputFormat::Json {
        return print_json(&env);
    }
    println!(
        "{}",
        Theme::success(&format!("Environment ready at {}", env.root.display()))
    );
    Ok(())
}

/// Enable or disable an installed capability.
pub(crate) fn set_enabled(
    store: &CapabilityStore,
    kind: CapabilityKind,
    id: &CapabilityId,
    enabled: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let record = store
        .set_enabled(kind, id, enabled)
        .with_context(|| format!("failed to update '{id}'"))?;
    if format == OutputFormat::Json {
        return print_json(&record);
    }
    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{}", Theme::success(&format!("{verb} {kind} '{id}'")));
    if !record.installed {
        println!(
            "{}",
            Theme::warning("not installed; the flag applies after the next install")
        );
    }
    Ok(())
}

/// Point a registry at a new URL and fetch it.
pub(crate) async fn set_registry(
    store: &CapabilityStore,
    kind: CapabilityKind,
    url: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let registry = store
        .set_registry_url(kind, url)
        .await
        .context("failed to change registry")?;
    if format == OutputFormat::Json {
        return print_json(&*registry);
    }
    report_origin(&registry);
    println!(
        "{}",
        Theme::success(&format!("{kind} registry now {url} ({} entries)", registry.len()))
    );
    println!(
        "{}",
        Theme::dimmed("Only this run uses the new URL; set it in config.toml to keep it.")
    );
    Ok(())
}

/// Install and enable the registry's default capabilities.
pub(crate) async fn install_defaults(
    store: &CapabilityStore,
    kind: CapabilityKind,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let report = store.install_defaults(kind).await;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    print_defaults(&report);
    if !report.failed.is_empty() {
        bail!("{} default capabilities failed", report.failed.len());
    }
    Ok(())
}

/// Show on-disk diagnostics for one capability.
pub(crate) fn inspect(
    store: &CapabilityStore,
    kind: CapabilityKind,
    id: &CapabilityId,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let diag = store.inspect(kind, id);
    if format == OutputFormat::Json {
        return print_json(&diag);
    }

    println!("\n{}", Theme::header(&format!("{kind} '{id}'")));
    println!("{}", Theme::separator());
    println!("{}", Theme::kv("Registered", &Theme::flag(diag.registered)));
    match &diag.record {
        Some(record) => {
            println!(
                "{}",
                Theme::kv("Status", &Theme::status(record.installed, record.enabled))
            );
            if let Some(at) = &record.installed_at {
                println!("{}", Theme::kv("Installed at", &Theme::timestamp(at)));
            }
        },
        None => println!("{}", Theme::kv("Status", &Theme::dimmed("no record"))),
    }
    println!(
        "{}",
        Theme::kv(
            "Install dir",
            &format!(
                "{} ({})",
                diag.install_dir.display(),
                Theme::flag(diag.install_dir_present)
            )
        )
    );
    let entry = diag
        .entry_point_present
        .map_or_else(|| Theme::dimmed("n/a"), Theme::flag);
    println!("{}", Theme::kv("Entry point", &entry));
    println!("{}", Theme::kv("Environment", &Theme::flag(diag.env_present)));
    if let Some(interpreter) = &diag.interpreter {
        println!("{}", Theme::kv("Interpreter", &interpreter.display().to_string()));
    }
    println!();
    Ok(())
}

/// Print the default agent id.
pub(crate) async fn default_agent(store: &CapabilityStore, format: OutputFormat) -> anyhow::Result<()> {
    store.refresh(CapabilityKind::Agent).await;
    let id = store.default_agent();
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "default_agent": id }));
    }
    match id {
        Some(id) => println!("{id}"),
        None => println!("{}", Theme::info("The agent registry names no default")),
    }
    Ok(())
}

fn report_origin(registry: &Registry) {
    match &registry.origin {
        RegistryOrigin::Remote => {},
        RegistryOrigin::Cache { reason } => println!(
            "{}",
            Theme::warning(&format!("registry unreachable, using cached copy ({reason})"))
        ),
        RegistryOrigin::Empty { reason } => println!(
            "{}",
            Theme::warning(&format!("registry unavailable and no cache ({reason})"))
        ),
    }
}

fn print_defaults(report: &hangar_store::DefaultsReport) {
    for id in &report.installed {
        println!("{}", Theme::success(&format!("Installed default '{id}'")));
    }
    for id in &report.enabled {
        println!("{}", Theme::success(&format!("Enabled default '{id}'")));
    }
    for failure in &report.failed {
        println!(
            "{}",
            Theme::error(&format!(
                "'{}' failed at {} stage: {}",
                failure.id,
                stage(failure.error),
                failure.message
            ))
        );
    }
    if report.installed.is_empty() && report.enabled.is_empty() && report.failed.is_empty() {
        println!("{}", Theme::info("Defaults already installed and enabled"));
    }
}
