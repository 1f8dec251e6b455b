//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchSettings;
use crate::session::profile_for;
use crate::session::compat::supported_series;
use crate::tools::GateSettings;
use crate::{Error, Result};

/// Environment prefix for nested configuration keys
pub const ENV_PREFIX: &str = "ODOO_GATEWAY_";

const DATABASE_KEY: &str = "odoo.database";
const DATABASE_SHORTHAND: &str = "odoo.db";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Odoo connection
    pub odoo: OdooConfig,
    /// Metadata cache configuration
    pub cache: CacheConfig,
    /// Tool gates
    pub tools: ToolsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Overall deadline of one tool call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Authentication configuration for gateway access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret callers must present. None admits every request.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (generates random token)
    pub api_key: Option<String>,

    /// Header carrying the secret; `Authorization: Bearer` is accepted too
    pub header: String,

    /// Paths that bypass authentication (default: `["/health", "/ready"]`)
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string(), "/ready".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            header: "x-api-key".to_string(),
            public_paths: default_public_paths(),
        }
    }
}

impl AuthConfig {
    /// Resolve the shared secret (expand env vars, generate if `auto`)
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.as_deref().and_then(|key| {
            if key == "auto" {
                use rand::RngExt;
                let random_bytes: [u8; 32] = rand::rng().random();
                Some(format!(
                    "ogw_{}",
                    base64::Engine::encode(
                        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                        random_bytes
                    )
                ))
            } else {
                resolve_secret(key)
            }
        })
    }
}

/// `env:VAR` reads the variable; anything else is the literal value.
/// Empty results count as unset.
fn resolve_secret(value: &str) -> Option<String> {
    let resolved = match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).ok()?,
        None => value.to_string(),
    };
    (!resolved.is_empty()).then_some(resolved)
}

/// Odoo connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OdooConfig {
    /// Server base URL
    pub url: String,
    /// Database name (`odoo.db` in a config layer is read as this key)
    pub database: String,
    /// Login
    pub username: String,
    /// Password (supports `env:VAR_NAME`)
    pub password: Option<String>,
    /// API key, preferred over the password (supports `env:VAR_NAME`)
    pub api_key: Option<String>,
    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Version used when the server declares one the gateway does not know
    pub version: String,
    /// Default `lang` context key
    pub lang: Option<String>,
    /// Default `tz` context key
    pub tz: Option<String>,
    /// Verify the server's TLS certificate
    pub verify_ssl: bool,
}

impl Default for OdooConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            database: String::new(),
            username: String::new(),
            password: None,
            api_key: None,
            timeout: Duration::from_secs(120),
            version: "18.0".to_string(),
            lang: None,
            tz: None,
            verify_ssl: true,
        }
    }
}

impl OdooConfig {
    /// The credential to log in with: the API key if set, else the password
    #[must_use]
    pub fn resolve_secret(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .and_then(resolve_secret)
            .or_else(|| self.password.as_deref().and_then(resolve_secret))
    }
}

/// Metadata cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable metadata caching
    pub enabled: bool,
    /// Entry lifetime; `0s` never expires
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of entries per cache before eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_entries: 1000,
        }
    }
}

/// Tool gates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Generic `execute_kw` tool
    pub passthrough: PassthroughConfig,
    /// Expose `list_databases`
    pub database_admin: bool,
    /// Check model and field names against cached metadata before calling
    pub preflight: bool,
}

/// Generic method passthrough
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughConfig {
    /// Expose the `execute_kw` tool
    pub enabled: bool,
    /// Methods refused even when enabled (exact names or `prefix*`)
    pub denied_methods: Vec<String>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = merge_layer(figment, Yaml::file(p));
        }

        // Merge environment variables (ODOO_GATEWAY_ prefix)
        figment = merge_layer(figment, Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in connection values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(format!("env expansion pattern: {e}")))?;

        for value in [
            &mut self.odoo.url,
            &mut self.odoo.database,
            &mut self.odoo.username,
        ] {
            *value = Self::expand_string(&re, value);
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Check required values and normalize the URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing or invalid key.
    pub fn validate(&mut self) -> Result<()> {
        let url = self.odoo.url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(Error::Config(
                "odoo.url is required (set ODOO_URL or odoo.url in the config file)".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "odoo.url must start with http:// or https://, got '{url}'"
            )));
        }
        url::Url::parse(&url).map_err(|e| Error::Config(format!("odoo.url is invalid: {e}")))?;
        self.odoo.url = url;

        if self.odoo.database.trim().is_empty() {
            return Err(Error::Config(
                "odoo.database is required (set ODOO_DB or odoo.database)".to_string(),
            ));
        }
        if self.odoo.username.trim().is_empty() {
            return Err(Error::Config(
                "odoo.username is required (set ODOO_USERNAME or odoo.username)".to_string(),
            ));
        }
        if self.odoo.resolve_secret().is_none() {
            return Err(Error::Config(
                "odoo.api_key or odoo.password is required (set ODOO_API_KEY or ODOO_PASSWORD)"
                    .to_string(),
            ));
        }
        if self.odoo.timeout.is_zero() {
            return Err(Error::Config("odoo.timeout must be greater than 0".to_string()));
        }
        if profile_for(&self.odoo.version).is_none() {
            return Err(Error::Config(format!(
                "odoo.version '{}' is not supported (supported: {})",
                self.odoo.version,
                supported_series().join(", ")
            )));
        }
        if self.server.request_timeout.is_zero() {
            return Err(Error::Config(
                "server.request_timeout must be greater than 0".to_string(),
            ));
        }
        if self.auth.header.trim().is_empty() {
            return Err(Error::Config("auth.header must not be empty".to_string()));
        }
        if self.call_timeout_shadowed() {
            tracing::warn!(
                odoo_timeout = ?self.odoo.timeout,
                request_timeout = ?self.server.request_timeout,
                "odoo.timeout is not shorter than server.request_timeout; \
                 slow backend calls will hit the request deadline first"
            );
        }
        Ok(())
    }

    /// Whether the per-call backend timeout can never fire before the
    /// request deadline does
    #[must_use]
    pub fn call_timeout_shadowed(&self) -> bool {
        self.odoo.timeout >= self.server.request_timeout
    }

    /// Which tool gates are open
    #[must_use]
    pub fn gates(&self) -> GateSettings {
        GateSettings {
            passthrough: self.tools.passthrough.enabled,
            database_admin: self.tools.database_admin,
        }
    }

    /// Dispatcher settings derived from this configuration
    #[must_use]
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            request_timeout: self.server.request_timeout,
            preflight: self.tools.preflight,
            denied_methods: self.tools.passthrough.denied_methods.clone(),
            lang: self.odoo.lang.clone(),
            tz: self.odoo.tz.clone(),
        }
    }
}

/// Merge one provider, reading its `odoo.db` shorthand as `odoo.database`.
///
/// The shorthand is resolved per layer so that a later layer's `database`
/// still overrides an earlier layer's `db`. When one layer sets both, the
/// full key wins.
fn merge_layer(figment: Figment, provider: impl Provider) -> Figment {
    let layer = Figment::from(&provider);
    let shorthand = layer
        .find_value(DATABASE_SHORTHAND)
        .ok()
        .filter(|_| layer.find_value(DATABASE_KEY).is_err());
    let figment = figment.merge(provider);
    match shorthand {
        Some(database) => figment.merge(Serialized::default(DATABASE_KEY, database)),
        None => figment,
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s.trim().to_string(),
        };

        // "ms" before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
