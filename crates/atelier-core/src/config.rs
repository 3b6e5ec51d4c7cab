//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration, loaded from .atelier/config.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtelierConfig {
    /// Config version
    pub version: Option<String>,

    /// Canonical store settings
    pub store: StoreConfig,

    /// Client-side reconciliation settings
    pub sync: SyncConfig,

    /// AI collaborator settings
    pub ai: AiConfig,

    /// Execution sandbox settings
    pub sandbox: SandboxConfig,
}

/// Canonical store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one JSON document per project.
    /// Defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the data directory, falling back to the platform default.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "atelier", "atelier")
            .map(|dirs| dirs.data_dir().join("projects"))
            .unwrap_or_else(|| PathBuf::from(".atelier/projects"))
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet window after the last edit before the tree is saved
    #[serde(default = "default_debounce_ms")]
    pub save_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: default_debounce_ms(),
        }
    }
}

impl SyncConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    1_500
}

/// Which AI responder to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// OpenAI-compatible chat completions endpoint
    #[default]
    Http,
    /// Local CLI that prints the response on stdout
    Command,
    /// AI disabled; `@ai` mentions are answered with a notice
    Disabled,
}

/// AI collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProvider,

    /// Base URL of the chat completions API
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,

    /// Program and leading args for the command provider
    #[serde(default = "default_ai_command")]
    pub command: Vec<String>,

    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            endpoint: default_ai_endpoint(),
            model: default_ai_model(),
            api_key_env: default_ai_key_env(),
            command: default_ai_command(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

fn default_ai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ai_key_env() -> String {
    "ATELIER_AI_API_KEY".to_string()
}
fn default_ai_command() -> Vec<String> {
    vec!["claude".to_string(), "--print".to_string()]
}
fn default_ai_timeout() -> u64 {
    120
}

/// Execution sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Dependency installer, run when a manifest is present
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,

    /// Start command used when the manifest declares a start script
    #[serde(default = "default_start_command")]
    pub start_command: Vec<String>,

    /// Interpreter for JavaScript entry files
    #[serde(default = "default_node")]
    pub node_binary: String,

    /// Interpreter for Python entry files
    #[serde(default = "default_python")]
    pub python_binary: String,

    /// Install steps running longer than this fail the run; 0 disables the limit
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    /// Running processes are stopped after this long; 0 disables the limit
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Bytes of output retained per run
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            install_command: default_install_command(),
            start_command: default_start_command(),
            node_binary: default_node(),
            python_binary: default_python(),
            install_timeout_secs: default_install_timeout(),
            run_timeout_secs: default_run_timeout(),
            max_output_bytes: default_max_output(),
        }
    }
}

impl SandboxConfig {
    pub fn install_timeout(&self) -> Option<Duration> {
        (self.install_timeout_secs > 0).then(|| Duration::from_secs(self.install_timeout_secs))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

fn default_install_command() -> Vec<String> {
    vec!["npm".to_string(), "install".to_string()]
}
fn default_start_command() -> Vec<String> {
    vec!["npm".to_string(), "start".to_string()]
}
fn default_node() -> String {
    "node".to_string()
}
fn default_python() -> String {
    "python3".to_string()
}
fn default_install_timeout() -> u64 {
    600
}
fn default_run_timeout() -> u64 {
    3_600
}
fn default_max_output() -> usize {
    1024 * 1024
}

impl AtelierConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from a root directory (looks for .atelier/config.yaml)
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = root.join(".atelier/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve relative paths against the root directory
    pub fn resolve_paths(&mut self, root: &Path) {
        if let Some(dir) = &self.store.data_dir {
            if dir.is_relative() {
                self.store.data_dir = Some(root.join(dir));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AtelierConfig::load_from_root(dir.path()).unwrap();
        assert_eq!(config.sync.save_debounce(), Duration::from_millis(1_500));
        assert_eq!(config.sandbox.install_command, vec!["npm", "install"]);
        assert_eq!(config.ai.provider, AiProvider::Http);
        assert_eq!(config.sandbox.install_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".atelier")).unwrap();
        std::fs::write(
            dir.path().join(".atelier/config.yaml"),
            "store:\n  data_dir: data\nsandbox:\n  run_timeout_secs: 0\n  install_timeout_secs: 0\nai:\n  provider: disabled\n",
        )
        .unwrap();

        let mut config = AtelierConfig::load_from_root(dir.path()).unwrap();
        config.resolve_paths(dir.path());

        assert_eq!(config.store.resolve_data_dir(), dir.path().join("data"));
        assert_eq!(config.sandbox.run_timeout(), None);
        assert_eq!(config.sandbox.install_timeout(), None);
        assert_eq!(config.sandbox.max_output_bytes, 1024 * 1024);
        assert_eq!(config.ai.provider, AiProvider::Disabled);
    }
}
