//! Bridge from `hangar_config::Config` to telemetry types.

use std::path::Path;

use hangar_config::Config;
use hangar_telemetry::{FileRotation, LogConfig, LogFormat, LogTarget};

/// File name prefix of rolling log files.
const LOG_FILE_PREFIX: &str = "hangar";

/// Convert the `[logging]` section to a [`LogConfig`].
///
/// Stderr is the default so stdout carries only command output. A `file`
/// target writes rolling files into `logs_dir`.
pub(crate) fn to_log_config(cfg: &Config, logs_dir: &Path) -> LogConfig {
    let format = cfg.logging.format.parse().unwrap_or(LogFormat::Compact);

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    log_config = if cfg.logging.target == "file" {
        let rotation = cfg.logging.rotation.parse().unwrap_or(FileRotation::Daily);
        log_config.with_file_logging(logs_dir, LOG_FILE_PREFIX, rotation)
    } else {
        log_config.with_target(LogTarget::Stderr)
    };

    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }

    log_config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_section_maps_to_stderr_config() {
        let mut cfg = Config::default();
        cfg.logging.level = "warn".to_owned();
        cfg.logging.format = "json".to_owned();
        cfg.logging.directives = vec!["hangar_store=debug".to_owned()];

        let lc = to_log_config(&cfg, Path::new("/tmp/hangar/logs"));
        assert_eq!(lc.level, "warn");
        assert_eq!(lc.format, LogFormat::Json);
        assert_eq!(lc.target, LogTarget::Stderr);
        assert_eq!(lc.directives, ["hangar_store=debug"]);
    }

    #[test]
    fn unknown_format_falls_back_to_compact() {
        let mut cfg = Config::default();
        cfg.logging.format = "fancy".to_owned();
        let lc = to_log_config(&cfg, Path::new("/tmp/hangar/logs"));
        assert_eq!(lc.format, LogFormat::Compact);
    }

    #[test]
    fn file_target_writes_into_the_logs_dir() {
        let mut cfg = Config::default();
        cfg.logging.target = "file".to_owned();
        cfg.logging.rotation = "hourly".to_owned();

        let lc = to_log_config(&cfg, Path::new("/tmp/hangar/logs"));
        assert_eq!(lc.target, LogTarget::File("/tmp/hangar/logs".into()));
        assert_eq!(lc.file.prefix, "hangar");
        assert_eq!(lc.file.rotation, FileRotation::Hourly);
        assert!(!lc.ansi);
    }
}
