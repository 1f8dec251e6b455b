//! Authenticated Odoo session
//!
//! The [`SessionManager`] owns the credentials, the backend-issued uid and
//! the negotiated [`VersionProfile`]. Reads of a valid session are lock-free
//! clones of an `Arc`; (re-)authentication is serialized so a burst of
//! expired-session faults causes a single login.

pub mod compat;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use self::compat::{VERSION_PROFILES, VersionProfile, profile_for, series_of};

use crate::fault::Fault;
use crate::transport::{Endpoint, Transport};
use crate::xmlrpc::{RpcStruct, RpcValue};

/// Login material for the backend
#[derive(Clone)]
pub struct Credentials {
    /// Database name
    pub database: String,
    /// Login (usually an email)
    pub login: String,
    /// Password or API key
    secret: String,
}

impl Credentials {
    /// Bundle credentials; `secret` is a password or an API key
    pub fn new(database: impl Into<String>, login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            login: login.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("database", &self.database)
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// An authenticated identity for one negotiated version
#[derive(Debug, Clone)]
pub struct Session {
    /// Backend-issued user id
    pub uid: i64,
    /// Version string declared by the server
    pub server_version: String,
    /// Calling conventions selected for that version
    pub profile: &'static VersionProfile,
    /// When the session was established
    pub established_at: DateTime<Utc>,
    generation: u64,
}

/// Session state for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Whether a session is currently cached
    pub connected: bool,
    /// Database name
    pub database: String,
    /// Login
    pub login: String,
    /// Backend user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    /// Declared server version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Negotiated series
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<&'static str>,
    /// When the session was established
    #[serde(skip_serializing_if = "Option::is_none")]
    pub established_at: Option<DateTime<Utc>>,
    /// Number of logins performed since startup
    pub authentications: u64,
}

/// Owner of the backend session
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    fallback: &'static VersionProfile,
    current: RwLock<Option<Arc<Session>>>,
    auth_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    authentications: AtomicU64,
}

impl SessionManager {
    /// Create a manager. `version_hint` is used when the server declares a
    /// version missing from the compatibility table.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        version_hint: &str,
    ) -> crate::Result<Self> {
        let fallback = profile_for(version_hint).ok_or_else(|| {
            crate::Error::Config(format!(
                "Unsupported Odoo version '{version_hint}' (supported: {})",
                compat::supported_series().join(", ")
            ))
        })?;

        Ok(Self {
            transport,
            credentials,
            fallback,
            current: RwLock::new(None),
            auth_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            authentications: AtomicU64::new(0),
        })
    }

    /// The cached session, if any, without contacting the backend
    #[must_use]
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    /// Number of logins performed since startup
    #[must_use]
    pub fn authentications(&self) -> u64 {
        self.authentications.load(Ordering::Relaxed)
    }

    /// Drop the cached session so the next call logs in again
    pub fn invalidate(&self) {
        *self.current.write() = None;
    }

    /// Session state for status reporting
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let session = self.current();
        SessionStatus {
            connected: session.is_some(),
            database: self.credentials.database.clone(),
            login: self.credentials.login.clone(),
            uid: session.as_ref().map(|s| s.uid),
            server_version: session.as_ref().map(|s| s.server_version.clone()),
            series: session.as_ref().map(|s| s.profile.series),
            established_at: session.as_ref().map(|s| s.established_at),
            authentications: self.authentications(),
        }
    }

    /// Return the cached session, logging in first if there is none
    pub async fn ensure_session(&self) -> Result<Arc<Session>, Fault> {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let _guard = self.auth_lock.lock().await;
        // Another caller may have logged in while we waited.
        if let Some(session) = self.current() {
            return Ok(session);
        }
        self.authenticate().await
    }

    /// Replace the session that produced an auth fault. Callers holding the
    /// same stale generation share one login.
    async fn reauthenticate(&self, stale_generation: u64) -> Result<Arc<Session>, Fault> {
        let _guard = self.auth_lock.lock().await;
        if let Some(session) = self.current() {
            if session.generation != stale_generation {
                return Ok(session);
            }
        }
        self.invalidate();
        self.authenticate().await
    }

    /// Negotiate the version and log in. Must hold `auth_lock`.
    async fn authenticate(&self) -> Result<Arc<Session>, Fault> {
        self.authentications.fetch_add(1, Ordering::Relaxed);

        let (server_version, profile) = self.negotiate_version().await?;

        let Credentials {
            database,
            login,
            secret,
        } = &self.credentials;
        let uid = self
            .transport
            .invoke(
                Endpoint::Common,
                "authenticate",
                vec![database.as_str().into(), login.as_str().into(), secret.as_str().into()],
                Some(RpcStruct::new()),
            )
            .await
            .map_err(|fault| match fault {
                Fault::Backend { message, .. } => {
                    warn!(database = %database, login = %login, error = %message, "Odoo login raised a fault");
                    Fault::Auth(format!("Odoo refused the login for database '{database}'"))
                }
                other => other,
            })?;

        let uid = match uid {
            RpcValue::Int(uid) if uid > 0 => uid,
            _ => {
                warn!(database = %database, login = %login, "Odoo rejected the credentials");
                return Err(Fault::Auth(format!(
                    "Odoo rejected the credentials for login '{login}' on database '{database}'"
                )));
            }
        };

        let session = Arc::new(Session {
            uid,
            server_version,
            profile,
            established_at: Utc::now(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
        });
        *self.current.write() = Some(Arc::clone(&session));

        info!(
            uid,
            database = %database,
            version = %session.server_version,
            series = profile.series,
            "Authenticated with Odoo"
        );
        Ok(session)
    }

    async fn negotiate_version(&self) -> Result<(String, &'static VersionProfile), Fault> {
        let declared = match self
            .transport
            .invoke(Endpoint::Common, "version", vec![], None)
            .await
        {
            Ok(info) => info
                .as_struct()
                .and_then(|m| m.get("server_version"))
                .and_then(RpcValue::as_str)
                .map(str::to_string),
            Err(Fault::Backend { message, .. }) => {
                warn!(error = %message, "common.version() raised a fault");
                None
            }
            Err(other) => return Err(other),
        };

        let profile = declared
            .as_deref()
            .and_then(series_of)
            .and_then(|series| profile_for(&series));

        match (declared, profile) {
            (Some(version), Some(profile)) => Ok((version, profile)),
            (declared, None) => {
                warn!(
                    declared = declared.as_deref().unwrap_or("<none>"),
                    fallback = self.fallback.series,
                    "Unrecognized Odoo version, using configured version"
                );
                Ok((
                    declared.unwrap_or_else(|| self.fallback.series.to_string()),
                    self.fallback,
                ))
            }
            (None, Some(profile)) => Ok((profile.series.to_string(), profile)),
        }
    }

    /// Run `call` with a valid session, re-authenticating exactly once if it
    /// reports an auth-class fault.
    async fn with_session<F, Fut>(&self, call: F) -> Result<RpcValue, Fault>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<RpcValue, Fault>>,
    {
        let session = self.ensure_session().await?;
        match call(Arc::clone(&session)).await {
            Err(fault) if fault.is_auth_class() => {
                warn!(uid = session.uid, "Odoo session rejected, re-authenticating once");
                let fresh = self.reauthenticate(session.generation).await?;
                match call(fresh).await {
                    Err(fault) if fault.is_auth_class() => {
                        self.invalidate();
                        Err(Fault::Auth(
                            "Odoo rejected the session again after re-authenticating".to_string(),
                        ))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Call `method` on `model` through the object endpoint, using the
    /// calling convention of the negotiated version.
    pub async fn execute(
        &self,
        model: &str,
        method: &str,
        args: Vec<RpcValue>,
        kwargs: RpcStruct,
    ) -> Result<RpcValue, Fault> {
        debug!(model = %model, method = %method, "Odoo object call");
        self.with_session(|session| {
            let args = args.clone();
            let kwargs = kwargs.clone();
            async move {
                let profile = session.profile;
                let mut params = vec![
                    RpcValue::from(self.credentials.database.as_str()),
                    RpcValue::Int(session.uid),
                    RpcValue::from(self.credentials.secret.as_str()),
                    RpcValue::from(model),
                    RpcValue::from(method),
                ];

                if profile.keyword_arguments {
                    params.push(RpcValue::Array(args));
                    self.transport
                        .invoke(Endpoint::Object, profile.object_method, params, Some(kwargs))
                        .await
                } else {
                    positional_kwargs(&session, kwargs)?;
                    params.extend(args);
                    self.transport
                        .invoke(Endpoint::Object, profile.object_method, params, None)
                        .await
                }
            }
        })
        .await
    }

    /// Render a report through the report endpoint
    pub async fn render_report(
        &self,
        report_name: &str,
        docids: Vec<RpcValue>,
        kwargs: RpcStruct,
    ) -> Result<RpcValue, Fault> {
        self.with_session(|session| {
            let docids = docids.clone();
            let kwargs = kwargs.clone();
            async move {
                if !session.profile.report_service {
                    return Err(Fault::Unsupported {
                        version: session.profile.series.to_string(),
                        detail: "the XML-RPC report service was removed in Odoo 11".to_string(),
                    });
                }
                let params = vec![
                    RpcValue::from(self.credentials.database.as_str()),
                    RpcValue::Int(session.uid),
                    RpcValue::from(self.credentials.secret.as_str()),
                    RpcValue::from(report_name),
                    RpcValue::Array(docids),
                ];
                self.transport
                    .invoke(Endpoint::Report, "render_report", params, Some(kwargs))
                    .await
            }
        })
        .await
    }

    /// Unauthenticated call on the common endpoint (`version`, `about`)
    pub async fn call_common(&self, method: &str, args: Vec<RpcValue>) -> Result<RpcValue, Fault> {
        self.transport.invoke(Endpoint::Common, method, args, None).await
    }

    /// Call on the database endpoint (`list`)
    pub async fn call_db(&self, method: &str, args: Vec<RpcValue>) -> Result<RpcValue, Fault> {
        self.transport.invoke(Endpoint::Database, method, args, None).await
    }
}

/// The positional-only `execute` form has no slot for keyword arguments.
/// The per-request `context` is dropped there; anything else cannot be
/// expressed.
fn positional_kwargs(session: &Session, mut kwargs: RpcStruct) -> Result<(), Fault> {
    if kwargs.remove("context").is_some() {
        debug!(series = session.profile.series, "Dropping context for positional-only call");
    }
    if kwargs.is_empty() {
        Ok(())
    } else {
        let names: Vec<&str> = kwargs.keys().map(String::as_str).collect();
        Err(Fault::Unsupported {
            version: session.profile.series.to_string(),
            detail: format!(
                "keyword arguments ({}) cannot be passed to the positional-only '{}' method",
                names.join(", "),
                session.profile.object_method
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted backend: `version` and `authenticate` succeed, object calls
    /// fail with an expired session until `healthy_after` logins happened.
    struct ScriptedOdoo {
        version: &'static str,
        logins: AtomicUsize,
        healthy_after: usize,
        calls: Mutex<Vec<(Endpoint, String, usize)>>,
    }

    impl ScriptedOdoo {
        fn new(version: &'static str, healthy_after: usize) -> Arc<Self> {
            Arc::new(Self {
                version,
                logins: AtomicUsize::new(0),
                healthy_after,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedOdoo {
        async fn invoke(
            &self,
            endpoint: Endpoint,
            method: &str,
            args: Vec<RpcValue>,
            kwargs: Option<RpcStruct>,
        ) -> Result<RpcValue, Fault> {
            self.calls
                .lock()
                .push((endpoint, method.to_string(), args.len() + usize::from(kwargs.is_some())));
            match (endpoint, method) {
                (Endpoint::Common, "version") => {
                    let mut info = RpcStruct::new();
                    info.insert("server_version".into(), self.version.into());
                    Ok(RpcValue::Struct(info))
                }
                (Endpoint::Common, "authenticate") => {
                    let attempt = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(RpcValue::Int(i64::try_from(attempt).unwrap_or(1) + 1))
                }
                (Endpoint::Object, _) => {
                    if self.logins.load(Ordering::SeqCst) > self.healthy_after {
                        Ok(RpcValue::Bool(true))
                    } else {
                        Err(Fault::Backend {
                            code: 0,
                            message: "odoo.http.SessionExpiredException: Session expired".into(),
                        })
                    }
                }
                _ => Ok(RpcValue::Nil),
            }
        }
    }

    fn manager(odoo: &Arc<ScriptedOdoo>) -> SessionManager {
        SessionManager::new(
            Arc::clone(odoo) as Arc<dyn Transport>,
            Credentials::new("db", "admin", "secret"),
            "18.0",
        )
        .unwrap()
    }

    #[test]
    fn unsupported_version_hint_is_a_config_error() {
        let odoo = ScriptedOdoo::new("17.0", 0);
        let err = SessionManager::new(odoo, Credentials::new("d", "u", "p"), "5.0").err().unwrap();
        assert!(err.to_string().contains("Unsupported Odoo version '5.0'"));
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let debug = format!("{:?}", Credentials::new("db", "admin", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn session_is_established_lazily_and_reused() {
        let odoo = ScriptedOdoo::new("17.0+e", 0);
        let sessions = manager(&odoo);
        assert!(sessions.current().is_none());

        let first = sessions.ensure_session().await.unwrap();
        let second = sessions.ensure_session().await.unwrap();
        assert_eq!(first.uid, second.uid);
        assert_eq!(first.profile.series, "17.0");
        assert_eq!(sessions.authentications(), 1);
    }

    #[tokio::test]
    async fn unknown_declared_version_falls_back_to_hint() {
        let odoo = ScriptedOdoo::new("master", 0);
        let sessions = manager(&odoo);
        let session = sessions.ensure_session().await.unwrap();
        assert_eq!(session.profile.series, "18.0");
        assert_eq!(session.server_version, "master");
    }

    #[tokio::test]
    async fn expired_session_triggers_exactly_one_reauthentication() {
        let odoo = ScriptedOdoo::new("18.0", 1);
        let sessions = manager(&odoo);

        let result = sessions
            .execute("res.partner", "check", vec![], RpcStruct::new())
            .await
            .unwrap();
        assert_eq!(result, RpcValue::Bool(true));
        assert_eq!(odoo.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_expiry_is_terminal_auth_failure() {
        let odoo = ScriptedOdoo::new("18.0", usize::MAX);
        let sessions = manager(&odoo);

        let err = sessions
            .execute("res.partner", "check", vec![], RpcStruct::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::Auth(_)));
        assert_eq!(odoo.logins.load(Ordering::SeqCst), 2);
        assert!(sessions.current().is_none());
    }

    #[tokio::test]
    async fn legacy_series_uses_positional_execute() {
        let odoo = ScriptedOdoo::new("7.0", 0);
        let sessions = manager(&odoo);
        let mut kwargs = RpcStruct::new();
        kwargs.insert("context".into(), RpcValue::Struct(RpcStruct::new()));

        sessions
            .execute("res.partner", "search", vec![RpcValue::Array(vec![])], kwargs)
            .await
            .unwrap();
        let calls = odoo.calls.lock();
        let (endpoint, method, arity) = calls.last().unwrap().clone();
        assert_eq!(endpoint, Endpoint::Object);
        assert_eq!(method, "execute");
        // db, uid, secret, model, method, domain
        assert_eq!(arity, 6);
    }

    #[tokio::test]
    async fn legacy_series_rejects_keyword_arguments() {
        let odoo = ScriptedOdoo::new("7.0", 0);
        let sessions = manager(&odoo);
        let mut kwargs = RpcStruct::new();
        kwargs.insert("limit".into(), RpcValue::Int(5));

        let err = sessions
            .execute("res.partner", "search", vec![], kwargs)
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::Unsupported { .. }));
    }

    #[tokio::test]
    async fn report_rendering_is_unsupported_on_modern_series() {
        let odoo = ScriptedOdoo::new("17.0", 0);
        let sessions = manager(&odoo);
        let err = sessions
            .render_report("sale.report_saleorder", vec![RpcValue::Int(1)], RpcStruct::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::Unsupported { .. }));
    }
}
