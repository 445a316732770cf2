//! Layered configuration for phleng.
//!
//! # Config File Locations
//!
//! Files are loaded in order, later wins:
//! 1. `/etc/phleng/config.toml` (system)
//! 2. `~/.config/phleng/config.toml` (user)
//! 3. `./phleng.toml`, or the `--config` path which replaces it
//! 4. Environment variables (`PHLENG_*`)
//!
//! Files are merged as TOML tables before deserializing, so a later file
//! only needs the keys it changes. `[[models]]` is an array and replaces
//! the built-in model list wholesale.
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! artifact_dir = "~/phleng/out"
//! soundfont = "~/soundfonts/thai-ensemble.sf2"
//!
//! [bind]
//! http_port = 8501
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info,phleng=debug"
//!
//! [agent]
//! default_model = "gpt-5-mini"
//! strict_contract = true
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use settings::{
    default_models, AgentConfig, BindConfig, ModelChoice, PathsConfig, RetrievalConfig,
    TelemetryConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Complete phleng configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhlengConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default = "default_models")]
    pub models: Vec<ModelChoice>,
}

impl Default for PhlengConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            bind: BindConfig::default(),
            telemetry: TelemetryConfig::default(),
            agent: AgentConfig::default(),
            retrieval: RetrievalConfig::default(),
            models: default_models(),
        }
    }
}

impl PhlengConfig {
    /// Load from the standard locations plus environment.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with an explicit file standing in for `./phleng.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = Self::from_files(&files)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        Ok((config, sources))
    }

    /// Merge the given files in order, without looking at the environment.
    pub fn from_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let origin = files.last().map_or_else(|| PathBuf::from("<defaults>"), Clone::clone);
        let mut config = loader::from_table(merged, &origin)?;
        config.expand_paths();
        Ok((config, sources))
    }

    fn expand_paths(&mut self) {
        let expand = |p: &Path| expand_path(&p.to_string_lossy());
        self.paths.artifact_dir = expand(&self.paths.artifact_dir);
        self.paths.soundfont = expand(&self.paths.soundfont);
        self.paths.examples_index = expand(&self.paths.examples_index);
        self.paths.theories_index = expand(&self.paths.theories_index);
        for dir in &mut self.paths.soundfont_dirs {
            *dir = expand(dir);
        }
    }

    /// Look up a model picker entry by id.
    pub fn model(&self, id: &str) -> Option<&ModelChoice> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self)?;
        Ok(format!("# phleng configuration\n\n{body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let config = PhlengConfig::default();
        assert_eq!(config.bind.http_port, 8501);
        assert_eq!(config.retrieval.top_k, 4);
        assert!(config.model("gpt-5-mini").is_some());
        assert!(config.model("nope").is_none());
    }

    #[test]
    fn to_toml_renders_sections() {
        let toml = PhlengConfig::default().to_toml().unwrap();
        assert!(toml.starts_with("# phleng configuration"));
        assert!(toml.contains("[paths]"));
        assert!(toml.contains("[agent]"));
        assert!(toml.contains("[[models]]"));
        assert!(toml.contains("gemini-2.5-flash"));
    }

    #[test]
    fn rendered_toml_loads_back() {
        let config = PhlengConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let (loaded, sources) = PhlengConfig::from_files(&[file.path().to_path_buf()]).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(sources.files.len(), 1);
    }

    #[test]
    fn later_files_win() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        std::fs::write(&first, "[agent]\nmax_steps = 5\nstrict_contract = true\n").unwrap();
        std::fs::write(&second, "[agent]\nmax_steps = 7\n").unwrap();

        let (config, _) = PhlengConfig::from_files(&[first, second]).unwrap();
        assert_eq!(config.agent.max_steps, 7);
        assert!(config.agent.strict_contract);
    }

    #[test]
    fn missing_cli_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = PhlengConfig::from_files(&[missing]).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
