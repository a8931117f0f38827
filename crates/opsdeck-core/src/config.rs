use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18710;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Hard cap on a single inbound WS text frame.
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB

/// Output chunks retained per terminal session for late-joiner replay.
pub const HISTORY_CAPACITY: usize = 10_000;

/// Outbound chunk queue depth per viewer before frames are dropped.
pub const VIEWER_QUEUE_DEPTH: usize = 256;

/// Top-level config (opsdeck.toml + OPSDECK_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsdeckConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

impl Default for OpsdeckConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            modules: ModulesConfig::default(),
            terminal: TerminalConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where installed module packages live (each subdirectory carries a
/// `module.toml` manifest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default = "default_modules_dir")]
    pub dir: String,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            dir: default_modules_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shell binary for "system" sessions. Falls back to $SHELL, then
    /// /bin/bash.
    pub shell: Option<String>,
    /// Timeout for read-only status/version probes (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// How long cached module context data stays fresh (seconds). A viewer
    /// switching tabs may see data up to this old.
    #[serde(default = "default_context_ttl")]
    pub context_cache_ttl_secs: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            context_cache_ttl_secs: default_context_ttl(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_context_ttl() -> u64 {
    15
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.opsdeck/opsdeck.db", home)
}
fn default_modules_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.opsdeck/modules", home)
}

impl OpsdeckConfig {
    /// Load config from a TOML file with OPSDECK_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.opsdeck/opsdeck.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: OpsdeckConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("OPSDECK_").split("_"))
            .extract()
            .map_err(|e| crate::error::OpsdeckError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.opsdeck/opsdeck.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OpsdeckConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.gateway.bind, DEFAULT_BIND);
        assert_eq!(cfg.terminal.probe_timeout_secs, 10);
        assert_eq!(cfg.ui.context_cache_ttl_secs, 15);
        assert!(cfg.database.path.ends_with("opsdeck.db"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        // Figment merges nothing from a nonexistent file; every section
        // falls back to its serde default.
        let cfg = OpsdeckConfig::load(Some("/nonexistent/opsdeck.toml")).unwrap();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
    }
}
