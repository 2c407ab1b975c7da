use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_FILE: &str = "promptgrid.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_db")]
    pub db: PathBuf,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Full argv of the engine binary; defaults to the project-local promptfoo.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}
fn default_db() -> PathBuf {
    PathBuf::from(".promptgrid/promptgrid.db")
}
fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_timeout_seconds() -> u64 {
    600
}
fn default_id_prefix() -> String {
    "openai:chat:".to_string()
}
fn default_api_base_url() -> String {
    "https://api.together.xyz/v1".to_string()
}
fn default_api_key_env() -> String {
    "TOGETHER_API_KEY".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            db: default_db(),
            log_level: None,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: None,
            project_root: default_project_root(),
            timeout_seconds: default_timeout_seconds(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id_prefix: default_id_prefix(),
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EngineConfig {
    /// Argv used to start the engine: `command` if set, otherwise
    /// `<project_root>/node_modules/.bin/promptfoo`.
    pub fn argv(&self) -> Vec<String> {
        match &self.command {
            Some(cmd) if !cmd.is_empty() => cmd.clone(),
            _ => vec![self
                .project_root
                .join("node_modules")
                .join(".bin")
                .join("promptfoo")
                .to_string_lossy()
                .to_string()],
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Load a config file. Relative `db` and `engine.project_root` paths are
/// taken relative to the file's directory.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    let mut cfg: Config = serde_yaml::from_str(&raw)
        .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;
    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    if cfg.engine.timeout_seconds == 0 {
        return Err(ConfigError("engine.timeout_seconds must be positive".into()));
    }

    let base = path.parent().unwrap_or(Path::new("."));
    if cfg.db.is_relative() {
        cfg.db = base.join(&cfg.db);
    }
    if cfg.engine.project_root.is_relative() {
        cfg.engine.project_root = base.join(&cfg.engine.project_root);
    }
    Ok(cfg)
}

/// `load_config` when the file exists, defaults otherwise.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

impl Config {
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|k| std::env::var(k).ok());
    }

    /// Env override hook with an injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PROMPTGRID_DB") {
            if !v.trim().is_empty() {
                self.db = PathBuf::from(v);
            }
        }
        if let Some(v) = lookup("PROMPTGRID_LOG") {
            self.log_level = Some(v);
        }
        if let Some(v) = lookup("PROMPTGRID_ENGINE_TIMEOUT") {
            match v.parse::<u64>() {
                Ok(n) if n > 0 => self.engine.timeout_seconds = n,
                _ => tracing::warn!(
                    event = "promptgrid.config.invalid_override",
                    key = "PROMPTGRID_ENGINE_TIMEOUT",
                    value = %v,
                    "ignoring invalid override"
                ),
            }
        }
        if let Some(v) = lookup("PROMPTGRID_ENGINE_COMMAND") {
            let argv: Vec<String> = v.split_whitespace().map(str::to_string).collect();
            if !argv.is_empty() {
                self.engine.command = Some(argv);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = serde_yaml::from_str("version: 1\n").unwrap();
        assert_eq!(cfg.db, PathBuf::from(".promptgrid/promptgrid.db"));
        assert_eq!(cfg.engine.timeout_seconds, 600);
        assert_eq!(cfg.engine.provider.id_prefix, "openai:chat:");
        assert_eq!(cfg.engine.provider.api_key_env, "TOGETHER_API_KEY");
        assert!(cfg.engine.argv()[0].ends_with("node_modules/.bin/promptfoo"));
    }

    #[test]
    fn rejects_unsupported_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promptgrid.yaml");
        std::fs::write(&path, "version: 2\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config version 2"));
    }

    #[test]
    fn relative_paths_follow_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promptgrid.yaml");
        std::fs::write(
            &path,
            "version: 1\ndb: data/grid.db\nengine:\n  project_root: web\n  timeout_seconds: 30\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.db, dir.path().join("data/grid.db"));
        assert_eq!(cfg.engine.project_root, dir.path().join("web"));
        assert_eq!(cfg.engine.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("PROMPTGRID_DB", "/tmp/other.db"),
            ("PROMPTGRID_ENGINE_TIMEOUT", "45"),
            ("PROMPTGRID_ENGINE_COMMAND", "npx promptfoo"),
            ("PROMPTGRID_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.db, PathBuf::from("/tmp/other.db"));
        assert_eq!(cfg.engine.timeout_seconds, 45);
        assert_eq!(cfg.engine.argv(), vec!["npx".to_string(), "promptfoo".to_string()]);
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn invalid_timeout_override_is_ignored() {
        let mut cfg = Config::default();
        cfg.apply_overrides_from(|k| (k == "PROMPTGRID_ENGINE_TIMEOUT").then(|| "soon".to_string()));
        assert_eq!(cfg.engine.timeout_seconds, 600);
    }
}
