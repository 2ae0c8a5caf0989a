//! Config file discovery and layered loading.
//!
//! 1. Parse `defaults.toml` → base
//! 2. Merge `<home>/config.toml` (user)
//! 3. Apply env var fallbacks for fields no file set
//! 4. Deserialize the merged tree → [`Config`]
//! 5. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::apply_env_fallbacks;
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration plus where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final configuration.
    pub config: Config,
    /// Which layer set each leaf field.
    pub field_sources: FieldSources,
    /// Config files that contributed, in load order.
    pub loaded_files: Vec<String>,
    /// Home directory the user layer was discovered in.
    pub discovered_home: PathBuf,
}

impl ResolvedConfig {
    /// Data directory: `store.home` when set, otherwise the discovered home.
    #[must_use]
    pub fn home_dir(&self) -> PathBuf {
        self.config
            .store
            .home
            .as_ref()
            .map_or_else(|| self.discovered_home.clone(), PathBuf::from)
    }
}

/// Load the configuration with layered precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the user config file is unreadable or
/// malformed, or if the merged configuration fails validation.
pub fn load<S: ::std::hash::BuildHasher>(
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<ResolvedConfig> {
    let home = match home_override {
        Some(h) => h.to_path_buf(),
        None => discover_home(env_vars)?,
    };

    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    let user_path = home.join("config.toml");
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            &ConfigLayer::User,
            &mut field_sources,
        );
        loaded_files.push(user_path.display().to_string());
        info!(path = %user_path.display(), "loaded user config");
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
        discovered_home: home,
    })
}

/// Load a config from a specific file path (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

/// `$HANGAR_HOME` when set and absolute, otherwise `~/.hangar`.
fn discover_home<S: ::std::hash::BuildHasher>(
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<PathBuf> {
    if let Some(custom) = env_vars.get("HANGAR_HOME") {
        let p = PathBuf::from(custom);
        if p.is_absolute() {
            return Ok(p);
        }
        tracing::warn!(path = %custom, "HANGAR_HOME is not absolute; ignoring");
    }
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".hangar"))
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_without_user_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load(Some(dir.path()), &no_env()).unwrap();
        assert_eq!(resolved.config.invocation.timeout_secs, 120);
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(resolved.home_dir(), dir.path());
    }

    #[test]
    fn user_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
            [registry]
            agent_url = "https://mirror.example.test/agents.json"

            [invocation]
            timeout_secs = 30
            "#,
        )
        .unwrap();

        let resolved = load(Some(dir.path()), &no_env()).unwrap();
        assert_eq!(
            resolved.config.registry.agent_url,
            "https://mirror.example.test/agents.json"
        );
        assert_eq!(resolved.config.invocation.timeout_secs, 30);
        assert_eq!(resolved.config.registry.timeout_secs, 20);
        assert_eq!(
            resolved.field_sources.get("invocation.timeout_secs"),
            Some(&ConfigLayer::User)
        );
        assert_eq!(resolved.loaded_files.len(), 1);
    }

    #[test]
    fn env_fallback_applies_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let env: HashMap<String, String> =
            [("HANGAR_PYTHON".to_owned(), "python3.12".to_owned())].into();
        let resolved = load(Some(dir.path()), &env).unwrap();
        assert_eq!(resolved.config.provisioning.python, "python3.12");
    }

    #[test]
    fn store_home_overrides_discovered_home() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[store]\nhome = \"/srv/hangar\"\n",
        )
        .unwrap();
        let resolved = load(Some(dir.path()), &no_env()).unwrap();
        assert_eq!(resolved.home_dir(), PathBuf::from("/srv/hangar"));
    }

    #[test]
    fn malformed_user_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[invocation\n").unwrap();
        let result = load(Some(dir.path()), &no_env());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }

    #[test]
    fn load_file_missing_is_read_error() {
        let result = load_file(Path::new("/nonexistent/hangar/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
