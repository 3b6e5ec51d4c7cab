//! Server configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use atelier_core::AtelierConfig;
use serde::{Deserialize, Serialize};

/// Everything `atelier serve` reads from `.atelier/config.yaml`.
///
/// Gateway settings live under `gateway:`; the remaining keys are the
/// shared workspace configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(flatten)]
    pub workspace: AtelierConfig,
}

/// Gateway configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind the WebSocket listener
    pub bind_address: SocketAddr,
    /// Seconds a new connection has to send its handshake
    pub handshake_timeout_secs: u64,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 4870)),
            handshake_timeout_secs: 10,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Token settings. The signing secret itself is read from the environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret_env: String,
    pub issuer: String,
    /// Lifetime of tokens minted by `atelier token`
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: "ATELIER_JWT_SECRET".to_string(),
            issuer: "atelier".to_string(),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl AuthConfig {
    pub fn secret_from_env(&self) -> Result<String> {
        let secret = std::env::var(&self.jwt_secret_env)
            .with_context(|| format!("{} is not set", self.jwt_secret_env))?;
        anyhow::ensure!(!secret.is_empty(), "{} is empty", self.jwt_secret_env);
        Ok(secret)
    }
}

/// Per-connection event budget
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_events: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_events: 60,
            window_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load `.atelier/config.yaml` under `root`, or defaults.
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let path = root.join(".atelier/config.yaml");
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.workspace.resolve_paths(root);
        Ok(config)
    }
}
