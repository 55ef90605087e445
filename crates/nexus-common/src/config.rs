//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load(
        config::Environment::with_prefix("NEXUS")
            .separator("__")
            .try_parsing(true),
    )?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build an [`AppConfig`] from defaults, the optional `config.toml`, and `env`.
fn load(env: config::Environment) -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        // Defaults
        .set_default("server.name", "localhost")?
        .set_default("database.max_connections", 10)?
        .set_default("database.min_connections", 1)?
        .set_default("federation.attempt_timeout_secs", 30)?
        .set_default("federation.key_fetch_timeout_secs", 30)?
        .set_default("federation.discovery_ttl_secs", 86_400)? // 24h
        .set_default("federation.default_port", 8448)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (NEXUS__SERVER__NAME, NEXUS__DATABASE__URL, etc.)
        .add_source(env)
        .build()?
        .try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Public server name used as the origin of outbound federation requests
    /// (e.g. "nexus.example.com").
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Optional; omit for lite / in-memory mode.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Tunables for outbound federation resolution.
#[derive(Debug, Deserialize, Clone)]
pub struct FederationSettings {
    /// Hard cap on a single attempt against one remote server.
    pub attempt_timeout_secs: u64,
    /// Hard cap on a direct server-key fetch.
    pub key_fetch_timeout_secs: u64,
    /// How long a discovered base URL is reused before re-resolving.
    pub discovery_ttl_secs: u64,
    /// Port assumed when a server name carries none and has no delegation.
    pub default_port: u16,
    /// Hex-encoded 32-byte Ed25519 seed. A fresh key is generated when unset.
    pub signing_key_seed_hex: Option<String>,
}
