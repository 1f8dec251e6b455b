//! Transport to the Odoo XML-RPC endpoints

mod xmlrpc;

pub use self::xmlrpc::XmlRpcTransport;

use std::fmt;

use async_trait::async_trait;

use crate::fault::Fault;
use crate::xmlrpc::{RpcStruct, RpcValue};

/// Logical backend endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Authentication and version metadata (`/xmlrpc/2/common`)
    Common,
    /// Model method invocation (`/xmlrpc/2/object`)
    Object,
    /// Database administration (`/xmlrpc/2/db`)
    Database,
    /// Report rendering (`/xmlrpc/2/report`)
    Report,
}

impl Endpoint {
    /// URL path of the endpoint
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Common => "/xmlrpc/2/common",
            Self::Object => "/xmlrpc/2/object",
            Self::Database => "/xmlrpc/2/db",
            Self::Report => "/xmlrpc/2/report",
        }
    }

    /// Short name used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Object => "object",
            Self::Database => "db",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low-level call primitive against the backend.
///
/// `kwargs`, when present, travel as the trailing struct parameter, which is
/// how `execute_kw` and `authenticate` receive keyword arguments.
/// Implementations never panic or leak library errors: network problems are
/// [`Fault::Transport`] and server-side faults are [`Fault::Backend`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke `method` on `endpoint`
    async fn invoke(
        &self,
        endpoint: Endpoint,
        method: &str,
        args: Vec<RpcValue>,
        kwargs: Option<RpcStruct>,
    ) -> Result<RpcValue, Fault>;
}
