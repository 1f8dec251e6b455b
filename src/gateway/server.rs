//! Gateway server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::ResolvedAuthConfig;
use super::router::{AppState, create_router};
use crate::LogLevelHandle;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::metadata::MetadataCache;
use crate::session::{Credentials, SessionManager};
use crate::tools::ToolRegistry;
use crate::transport::{Transport, XmlRpcTransport};
use crate::{Error, Result};

/// Odoo MCP Gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Tool dispatcher
    dispatcher: Arc<Dispatcher>,
    /// Live log level
    log_level: LogLevelHandle,
}

impl Gateway {
    /// Create a gateway talking XML-RPC to the configured server
    pub fn new(config: Config, log_level: LogLevelHandle) -> Result<Self> {
        let transport = XmlRpcTransport::new(
            &config.odoo.url,
            config.odoo.timeout,
            config.odoo.verify_ssl,
        )?;
        Self::with_transport(config, Arc::new(transport), log_level)
    }

    /// Create a gateway over any transport
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
        log_level: LogLevelHandle,
    ) -> Result<Self> {
        let secret = config
            .odoo
            .resolve_secret()
            .ok_or_else(|| Error::Config("odoo.api_key or odoo.password is required".to_string()))?;
        let credentials = Credentials::new(&config.odoo.database, &config.odoo.username, secret);
        let session = Arc::new(SessionManager::new(
            transport,
            credentials,
            &config.odoo.version,
        )?);

        let metadata = Arc::new(MetadataCache::new(
            Arc::clone(&session),
            config.cache.enabled,
            config.cache.ttl,
            config.cache.max_entries,
        ));

        let registry = Arc::new(ToolRegistry::builtin(config.gates())?);
        info!(
            tools = registry.list().len(),
            registered = registry.all().len(),
            "Tool registry ready"
        );

        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            session,
            metadata,
            config.dispatch_settings(),
        ));

        Ok(Self {
            config,
            dispatcher,
            log_level,
        })
    }

    /// Tool dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// HTTP application, without binding a socket
    pub fn router(&self) -> Router {
        let auth_config = Arc::new(ResolvedAuthConfig::from_config(&self.config.auth));
        let state = Arc::new(AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            auth_config,
            log_level: self.log_level.clone(),
            max_body_size: self.config.server.max_body_size,
        });
        create_router(state)
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("ODOO MCP GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            url = %self.config.odoo.url,
            database = %self.config.odoo.database,
            version_hint = %self.config.odoo.version,
            "Odoo backend"
        );

        if self.config.auth.api_key.is_some() {
            info!("AUTHENTICATION enabled (header={})", self.config.auth.header);
        } else {
            warn!("AUTHENTICATION disabled - gateway is open to all requests");
        }
        if self.config.tools.passthrough.enabled {
            warn!("PASSTHROUGH enabled - execute_kw can call any public model method");
        }
        if self.config.tools.database_admin {
            info!("DATABASE ADMIN tools enabled");
        }

        info!(
            "  POST http://{}:{}/mcp  (requests)",
            self.config.server.host, self.config.server.port
        );
        info!("============================================================");

        // Log in early so the first tool call does not pay for it
        let session = Arc::clone(self.dispatcher.session());
        tokio::spawn(async move {
            match session.ensure_session().await {
                Ok(s) => info!(uid = s.uid, server_version = %s.server_version, "Odoo session established"),
                Err(e) => warn!(error = %e, "Initial Odoo login failed; will retry on first request"),
            }
        });

        // Run server with graceful shutdown; in-flight requests get
        // `shutdown_timeout` to finish once the signal arrives.
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = drain_tx.send(());
            })
            .into_future();
        tokio::pin!(serve);

        let drain_deadline = async move {
            if drain_rx.await.is_ok() {
                tokio::time::sleep(shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = &mut serve => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline => {
                warn!(timeout = ?shutdown_timeout, "Graceful shutdown timed out");
                return Err(Error::Shutdown);
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
