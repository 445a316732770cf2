//! Config file discovery, table merging, and environment overlay.

use crate::{ConfigError, PhlengConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Where the effective values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded, in order
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode file values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// Returns paths in load order (system, user, local/cli). Only existing
/// files are returned. A CLI path replaces `./phleng.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/phleng/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("phleng/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("phleng.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Tables merge key by key; any other value,
/// arrays included, replaces what was there.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn the merged table into a typed config, filling gaps with defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<PhlengConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Apply `PHLENG_*` (and a few standard) environment variables.
pub fn apply_env_overrides(config: &mut PhlengConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an injectable lookup.
pub fn apply_overrides_from(
    config: &mut PhlengConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let mut take = |key: &str| {
        let value = lookup(key)?;
        sources.env_overrides.push(key.to_string());
        Some(value)
    };

    if let Some(v) = take("PHLENG_ARTIFACT_DIR") {
        config.paths.artifact_dir = expand_path(&v);
    }
    if let Some(v) = take("PHLENG_SOUNDFONT") {
        config.paths.soundfont = expand_path(&v);
    }
    if let Some(v) = take("PHLENG_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.http_port = port;
        }
    }
    if let Some(v) = take("PHLENG_HOST") {
        config.bind.host = v;
    }

    if let Some(v) = take("PHLENG_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
    }
    // Also support the standard OTEL variable
    if let Some(v) = take("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
    }
    if let Some(v) = take("PHLENG_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    if let Some(v) = take("RUST_LOG") {
        config.telemetry.log_level = v;
    }

    if let Some(v) = take("PHLENG_DEFAULT_MODEL") {
        config.agent.default_model = v;
    }
    if let Some(v) = take("PHLENG_STRICT_CONTRACT") {
        config.agent.strict_contract = matches!(v.as_str(), "1" | "true" | "yes" | "on");
    }
}

/// Expand `~/` and a leading `$VAR` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(slash) => (&stripped[..slash], Some(&stripped[slash + 1..])),
            None => (stripped, None),
        };
        if let Ok(value) = env::var(var_name) {
            let base = PathBuf::from(value);
            return match rest {
                Some(rest) => base.join(rest),
                None => base,
            };
        }
    }

    PathBuf::from(path)
}
