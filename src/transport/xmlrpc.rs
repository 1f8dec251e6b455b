//! XML-RPC over HTTP(S)
//!
//! One pooled `reqwest` client serves all four endpoints, so the connection
//! to the Odoo server is reused across authentication and object calls.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header};
use tracing::{debug, warn};

use super::{Endpoint, Transport};
use crate::fault::{Fault, TransportFault};
use crate::xmlrpc::{Response, RpcStruct, RpcValue, decode_response, encode_call};
use crate::{Error, Result};

/// HTTP transport speaking XML-RPC to an Odoo server
pub struct XmlRpcTransport {
    /// HTTP client
    client: Client,
    /// Server base URL without trailing slash
    base_url: String,
}

impl XmlRpcTransport {
    /// Create a transport for `base_url` with a per-call `timeout`
    pub fn new(base_url: &str, timeout: Duration, verify_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .danger_accept_invalid_certs(!verify_tls)
            .user_agent(concat!("odoo-mcp-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Cannot build HTTP client: {e}")))?;

        if !verify_tls {
            warn!("TLS certificate verification is disabled for the Odoo connection");
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Full URL of an endpoint
    #[must_use]
    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> TransportFault {
    if err.is_timeout() {
        TransportFault::Timeout
    } else if err.is_decode() || err.is_body() {
        TransportFault::Malformed(err.to_string())
    } else {
        TransportFault::Connect(err.to_string())
    }
}

#[async_trait]
impl Transport for XmlRpcTransport {
    async fn invoke(
        &self,
        endpoint: Endpoint,
        method: &str,
        mut args: Vec<RpcValue>,
        kwargs: Option<RpcStruct>,
    ) -> std::result::Result<RpcValue, Fault> {
        if let Some(kwargs) = kwargs {
            args.push(RpcValue::Struct(kwargs));
        }
        let body = encode_call(method, &args);
        let started = Instant::now();

        let response = self
            .client
            .post(self.endpoint_url(endpoint))
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint = %endpoint, method = %method, status = %status, "XML-RPC call rejected");
            return Err(TransportFault::Status(status.as_u16()).into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(endpoint = %endpoint, method = %method, elapsed_ms, "XML-RPC call completed");

        match decode_response(&text) {
            Ok(Response::Value(value)) => Ok(value),
            Ok(Response::Fault { code, message }) => Err(Fault::Backend { code, message }),
            Err(e) => Err(TransportFault::Malformed(e.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls_strip_trailing_slash() {
        let transport =
            XmlRpcTransport::new("https://odoo.example.com/", Duration::from_secs(5), true).unwrap();
        assert_eq!(
            transport.endpoint_url(Endpoint::Object),
            "https://odoo.example.com/xmlrpc/2/object"
        );
        assert_eq!(
            transport.endpoint_url(Endpoint::Database),
            "https://odoo.example.com/xmlrpc/2/db"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_fault() {
        // Port 9 (discard) on localhost is almost never listening
        let transport =
            XmlRpcTransport::new("http://127.0.0.1:9", Duration::from_secs(2), true).unwrap();
        let err = transport
            .invoke(Endpoint::Common, "version", vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::Transport(_)));
    }
}
