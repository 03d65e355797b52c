//! Configuration for the gateway
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`--config`, `$GATEWAY_CONFIG`, `./config/gateway.toml`,
//!    or `~/.config/llm-gateway/config.toml`, first one found)
//! 3. Built-in defaults (lowest priority)

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod accounting;
mod backends;
mod observability;
mod serialization;


// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use accounting::{
    AuthConfig, DatabaseConfig, FileAuth, FileDatabase, FileUsage, UsageConfig,
};
pub use backends::{BackendConfig, BalancerConfig, FileBackend, FileBalancer};
pub use observability::{ConsoleFormat, FileLogging, LogRotation, LoggingConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const LOCAL_CONFIG: &str = "./config/gateway.toml";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the gateway to
    pub bind_addr: SocketAddr,

    /// SQLite database location
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Verification codes and key cache refresh
    pub auth: AuthConfig,

    /// Usage collector and daily rollup
    pub usage: UsageConfig,

    /// Backend health tracking and timeouts
    pub balancer: BalancerConfig,

    /// Upstream backends, in file order
    pub backends: Vec<BackendConfig>,

    /// File the config was read from, if any
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            auth: AuthConfig::default(),
            usage: UsageConfig::default(),
            balancer: BalancerConfig::default(),
            backends: Vec::new(),
            source: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,

    /// Optional [database] section
    pub database: Option<FileDatabase>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// Optional [auth] section
    pub auth: Option<FileAuth>,

    /// Optional [usage] section
    pub usage: Option<FileUsage>,

    /// Optional [balancer] section
    pub balancer: Option<FileBalancer>,

    /// [[backends]] entries
    #[serde(default)]
    pub backends: Vec<FileBackend>,
}

/// Environment overrides, captured once so loading stays testable
#[derive(Debug, Default, Clone)]
pub(crate) struct EnvOverrides {
    pub config_path: Option<String>,
    pub bind_addr: Option<String>,
    pub db_path: Option<String>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    fn from_process() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            config_path: var("GATEWAY_CONFIG"),
            bind_addr: var("GATEWAY_BIND"),
            db_path: var("GATEWAY_DB_PATH"),
            log_level: var("GATEWAY_LOG_LEVEL"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// User-level config file: ~/.config/llm-gateway/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("llm-gateway").join("config.toml"))
    }

    /// Pick the config file: explicit > $GATEWAY_CONFIG > local > user-level.
    ///
    /// Explicit and env paths are returned even when missing so the read
    /// fails loudly; the fallbacks are only used if they exist.
    fn resolve_path(explicit: Option<&Path>, env: &EnvOverrides) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = &env.config_path {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Some(local);
        }
        Self::user_config_path().filter(|p| p.exists())
    }

    fn read_file(path: &Path) -> Result<FileConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Load configuration: env > file > defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env = EnvOverrides::from_process();
        let path = Self::resolve_path(explicit, &env);
        let file = match &path {
            Some(p) => Self::read_file(p)?,
            None => FileConfig::default(),
        };

        let mut config = Self::from_sources(file, &env, &|name| std::env::var(name).ok())?;
        config.source = path;
        Ok(config)
    }

    /// Merge a parsed file with environment overrides
    pub(crate) fn from_sources(
        file: FileConfig,
        env: &EnvOverrides,
        key_env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Bind address: env > file > default
        let bind = env
            .bind_addr
            .clone()
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", bind))?;

        let mut database = DatabaseConfig::from_file(file.database);
        if let Some(path) = &env.db_path {
            database.path = PathBuf::from(path);
        }

        let mut logging = LoggingConfig::from_file(file.logging);
        if let Some(level) = &env.log_level {
            logging.level = level.clone();
        }

        let backends = file
            .backends
            .into_iter()
            .enumerate()
            .map(|(i, b)| BackendConfig::from_file(i, b, key_env))
            .collect();

        Ok(Self {
            bind_addr,
            database,
            logging,
            auth: AuthConfig::from_file(file.auth),
            usage: UsageConfig::from_file(file.usage),
            balancer: BalancerConfig::from_file(file.balancer),
            backends,
            source: None,
        })
    }

    /// Checks needed before serving traffic
    pub fn validate_backends(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("no backends configured; add at least one [[backends]] entry");
        }
        for backend in &self.backends {
            if backend.url.is_empty() {
                bail!("backend {:?} has no url", backend.name);
            }
            if backend.api_key.is_empty() {
                bail!("backend {:?} has no api_key", backend.name);
            }
        }
        if !self.backends.iter().any(|b| b.enabled) {
            bail!("every configured backend is disabled");
        }
        Ok(())
    }
}
