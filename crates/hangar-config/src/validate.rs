//! Post-merge configuration validation.
//!
//! Checks that deserialized [`Config`](crate::Config) values are usable
//! before anything is wired up from them.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_store(config)?;
    validate_registry(config)?;
    validate_fetch(config)?;
    validate_provisioning(config)?;
    validate_invocation(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_store(config: &Config) -> ConfigResult<()> {
    if let Some(home) = &config.store.home
        && !std::path::Path::new(home).is_absolute()
    {
        return Err(invalid(
            "store.home",
            format!("'{home}' must be an absolute path"),
        ));
    }
    Ok(())
}

fn validate_http_url(field: &str, raw: &str) -> ConfigResult<()> {
    let parsed = url::Url::parse(raw).map_err(|e| invalid(field, format!("'{raw}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(
            field,
            format!("scheme '{}' is not supported; use http or https", parsed.scheme()),
        ));
    }
    Ok(())
}

fn validate_registry(config: &Config) -> ConfigResult<()> {
    let r = &config.registry;
    validate_http_url("registry.agent_url", &r.agent_url)?;
    validate_http_url("registry.tool_server_url", &r.tool_server_url)?;
    validate_http_url("registry.application_url", &r.application_url)?;
    if r.timeout_secs == 0 {
        return Err(invalid("registry.timeout_secs", "must be greater than 0"));
    }
    Ok(())
}

fn validate_fetch(config: &Config) -> ConfigResult<()> {
    let f = &config.fetch;
    validate_http_url("fetch.api_base", &f.api_base)?;
    if f.git_ref.trim().is_empty() {
        return Err(invalid("fetch.git_ref", "must not be empty"));
    }
    if f.timeout_secs == 0 {
        return Err(invalid("fetch.timeout_secs", "must be greater than 0"));
    }
    if f.max_file_bytes == 0 {
        return Err(invalid("fetch.max_file_bytes", "must be greater than 0"));
    }
    if f.max_entries == 0 {
        return Err(invalid("fetch.max_entries", "must be greater than 0"));
    }
    Ok(())
}

fn validate_provisioning(config: &Config) -> ConfigResult<()> {
    let p = &config.provisioning;
    if !matches!(p.backend.as_str(), "venv" | "none") {
        return Err(invalid(
            "provisioning.backend",
            format!("unsupported backend '{}'; expected venv or none", p.backend),
        ));
    }
    if p.python.trim().is_empty() {
        return Err(invalid("provisioning.python", "must not be empty"));
    }
    if p.timeout_secs == 0 {
        return Err(invalid("provisioning.timeout_secs", "must be greater than 0"));
    }
    Ok(())
}

fn validate_invocation(config: &Config) -> ConfigResult<()> {
    let i = &config.invocation;
    if i.timeout_secs == 0 {
        return Err(invalid("invocation.timeout_secs", "must be greater than 0"));
    }
    if i.wasm_max_memory_mb == 0 {
        return Err(invalid("invocation.wasm_max_memory_mb", "must be greater than 0"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}'", l.level),
        ));
    }
    if !matches!(
        l.format.to_lowercase().as_str(),
        "pretty" | "compact" | "json" | "full"
    ) {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}'; expected pretty, compact, json or full", l.format),
        ));
    }
    if !matches!(l.target.as_str(), "stderr" | "file") {
        return Err(invalid(
            "logging.target",
            format!("unknown target '{}'; expected stderr or file", l.target),
        ));
    }
    if !matches!(l.rotation.as_str(), "daily" | "hourly" | "never") {
        return Err(invalid(
            "logging.rotation",
            format!("unknown rotation '{}'", l.rotation),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn relative_store_home_rejected() {
        let mut config = Config::default();
        config.store.home = Some("relative/dir".to_owned());
        assert_eq!(field_of(validate(&config)), "store.home");
    }

    #[test]
    fn non_http_registry_url_rejected() {
        let mut config = Config::default();
        config.registry.tool_server_url = "ftp://example.test/skills.json".to_owned();
        assert_eq!(field_of(validate(&config)), "registry.tool_server_url");
    }

    #[test]
    fn unparseable_registry_url_rejected() {
        let mut config = Config::default();
        config.registry.agent_url = "not a url".to_owned();
        assert_eq!(field_of(validate(&config)), "registry.agent_url");
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = Config::default();
        config.invocation.timeout_secs = 0;
        assert_eq!(field_of(validate(&config)), "invocation.timeout_secs");

        let mut config = Config::default();
        config.provisioning.timeout_secs = 0;
        assert_eq!(field_of(validate(&config)), "provisioning.timeout_secs");
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = Config::default();
        config.provisioning.backend = "conda".to_owned();
        assert_eq!(field_of(validate(&config)), "provisioning.backend");
    }

    #[test]
    fn none_backend_accepted() {
        let mut config = Config::default();
        config.provisioning.backend = "none".to_owned();
        validate(&config).unwrap();
    }

    #[test]
    fn unknown_log_format_rejected() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }

    #[test]
    fn log_target_must_be_stderr_or_file() {
        let mut config = Config::default();
        config.logging.target = "file".to_owned();
        validate(&config).unwrap();

        config.logging.target = "syslog".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.target");

        config.logging.target = "stderr".to_owned();
        config.logging.rotation = "weekly".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.rotation");
    }
}
