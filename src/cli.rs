//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Config;

/// Odoo MCP Gateway - curated Odoo tools for AI clients over MCP
#[derive(Parser, Debug)]
#[command(name = "odoo-mcp-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ODOO_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Odoo server URL
    #[arg(long, env = "ODOO_URL", global = true)]
    pub odoo_url: Option<String>,

    /// Odoo database
    #[arg(long, env = "ODOO_DB", global = true)]
    pub odoo_db: Option<String>,

    /// Odoo login
    #[arg(long, env = "ODOO_USERNAME", global = true)]
    pub odoo_username: Option<String>,

    /// Odoo password
    #[arg(long, env = "ODOO_PASSWORD", hide_env_values = true, global = true)]
    pub odoo_password: Option<String>,

    /// Odoo API key (preferred over the password)
    #[arg(long, env = "ODOO_API_KEY", hide_env_values = true, global = true)]
    pub odoo_api_key: Option<String>,

    /// Per-call Odoo timeout in seconds
    #[arg(long, env = "ODOO_TIMEOUT", global = true)]
    pub odoo_timeout: Option<u64>,

    /// Odoo version used when the server reports an unknown one
    #[arg(long, env = "ODOO_VERSION", global = true)]
    pub odoo_version: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_HOST")]
    pub host: Option<String>,

    /// Shared secret callers must present
    #[arg(long, env = "MCP_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "ODOO_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "ODOO_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Print the tool registry without contacting Odoo
    Tools {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Log in to Odoo once and report the negotiated version
    Check,
}

/// Output format for `tools`
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One line per tool
    Table,
    /// The `tools/list` payload
    Json,
}

impl Cli {
    /// Apply flag and flat-variable overrides on top of the loaded config
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref url) = self.odoo_url {
            config.odoo.url.clone_from(url);
        }
        if let Some(ref db) = self.odoo_db {
            config.odoo.database.clone_from(db);
        }
        if let Some(ref username) = self.odoo_username {
            config.odoo.username.clone_from(username);
        }
        if let Some(ref password) = self.odoo_password {
            config.odoo.password = Some(password.clone());
        }
        if let Some(ref api_key) = self.odoo_api_key {
            config.odoo.api_key = Some(api_key.clone());
        }
        if let Some(secs) = self.odoo_timeout {
            config.odoo.timeout = Duration::from_secs(secs);
        }
        if let Some(ref version) = self.odoo_version {
            config.odoo.version.clone_from(version);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if let Some(ref api_key) = self.api_key {
            config.auth.api_key = Some(api_key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flags_override_config_values() {
        let cli = Cli::try_parse_from([
            "odoo-mcp-gateway",
            "--odoo-url",
            "http://odoo:8069",
            "--odoo-db",
            "demo",
            "--odoo-timeout",
            "15",
            "--port",
            "9000",
            "check",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.odoo.url, "http://odoo:8069");
        assert_eq!(config.odoo.database, "demo");
        assert_eq!(config.odoo.timeout, Duration::from_secs(15));
        assert_eq!(config.server.port, 9000);
        assert!(matches!(cli.command, Some(Command::Check)));
    }

    #[test]
    fn tools_subcommand_defaults_to_table() {
        let cli = Cli::try_parse_from(["odoo-mcp-gateway", "tools"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Tools {
                format: OutputFormat::Table
            })
        ));
    }
}
