//! Odoo MCP Gateway
//!
//! Exposes an Odoo database to MCP clients through curated tools.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use odoo_mcp_gateway::{
    LogLevelHandle,
    cli::{Cli, Command, OutputFormat},
    config::Config,
    gateway::{Gateway, envelope},
    normalize::normalize,
    protocol::ToolsListResult,
    setup_tracing,
    tools::ToolRegistry,
};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Setup tracing
    let log_level = match setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to setup tracing: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Handle subcommands
    match cli.command {
        Some(Command::Tools { format }) => run_tools(&cli, format),
        Some(Command::Check) => run_check(&cli, log_level).await,
        Some(Command::Serve) | None => run_server(&cli, log_level).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli, validate: bool) -> Option<Config> {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return None;
        }
    };
    cli.apply_overrides(&mut config);

    if validate {
        if let Err(e) = config.validate() {
            error!("{e}");
            return None;
        }
    }
    Some(config)
}

/// Print the registry
fn run_tools(cli: &Cli, format: OutputFormat) -> ExitCode {
    let Some(config) = load_config(cli, false) else {
        return ExitCode::FAILURE;
    };

    let registry = match ToolRegistry::builtin(config.gates()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match format {
        OutputFormat::Json => {
            let listing = ToolsListResult {
                tools: registry.list(),
            };
            match serde_json::to_string_pretty(&listing) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("❌ Failed to serialize to JSON: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        OutputFormat::Table => {
            println!("{} tool(s) registered:\n", registry.all().len());
            for tool in registry.all() {
                let state = if registry.is_enabled(tool) {
                    String::new()
                } else {
                    format!(" [disabled: {}]", tool.gate.setting())
                };
                println!("  {:<18} {}{}", tool.name, tool.title, state);
            }
        }
    }
    ExitCode::SUCCESS
}

/// Authenticate once and report the result
async fn run_check(cli: &Cli, log_level: LogLevelHandle) -> ExitCode {
    let Some(config) = load_config(cli, true) else {
        return ExitCode::FAILURE;
    };

    let gateway = match Gateway::new(config, log_level) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    match gateway.dispatcher().session().ensure_session().await {
        Ok(session) => {
            println!(
                "✅ Connected: Odoo {} (series {}), uid {}",
                session.server_version, session.profile.series, session.uid
            );
            ExitCode::SUCCESS
        }
        Err(fault) => {
            error!(fault = %fault, "Login check failed");
            let correlation_id = uuid::Uuid::new_v4().to_string();
            eprintln!("{}", envelope::failure(&normalize(&fault), &correlation_id));
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: &Cli, log_level: LogLevelHandle) -> ExitCode {
    let Some(config) = load_config(cli, true) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        odoo = %config.odoo.url,
        "Starting Odoo MCP Gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config, log_level) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
