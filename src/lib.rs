//! Odoo MCP Gateway Library
//!
//! Model Context Protocol (MCP) server that exposes an Odoo instance to AI
//! clients through curated, schema-validated tools over the XML-RPC API.
//!
//! # Features
//!
//! - **Curated tools**: search, read, create, update, delete, model metadata, reports
//! - **Version compatibility**: Odoo 7.0 through 19.0 from one calling convention
//! - **Metadata cache**: TTL cache with request coalescing for `fields_get` and `ir.model`
//! - **Pre-call validation**: argument schemas and domain filters checked before any backend call
//! - **Normalized errors**: every failure becomes one envelope with kind, hint and retryability
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05 and 2025-03-26 over HTTP POST.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod gateway;
pub mod metadata;
pub mod normalize;
pub mod protocol;
pub mod schema;
pub mod session;
pub mod tools;
pub mod transport;
pub mod xmlrpc;

pub use error::{Error, Result};

use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Handle for changing the live log level (`logging/setLevel`)
#[derive(Clone, Default)]
pub struct LogLevelHandle {
    inner: Option<reload::Handle<EnvFilter, Registry>>,
}

impl std::fmt::Debug for LogLevelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLevelHandle")
            .field("attached", &self.inner.is_some())
            .finish()
    }
}

impl LogLevelHandle {
    /// A handle not connected to any subscriber; level changes are accepted
    /// and ignored. Used when tracing is set up elsewhere (tests, embedding).
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Replace the active filter with `directive`
    pub fn set_level(&self, directive: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::Config(format!("Invalid log level '{directive}': {e}")))?;
        if let Some(ref handle) = self.inner {
            handle
                .reload(filter)
                .map_err(|e| Error::Internal(format!("Failed to change log level: {e}")))?;
        }
        tracing::info!(level = %directive, "Log level changed");
        Ok(())
    }
}

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<LogLevelHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (filter, handle) = reload::Layer::new(filter);

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))?;

    Ok(LogLevelHandle {
        inner: Some(handle),
    })
}
