//! Connection factory (C5): dials a fresh TLS+HTTP/2 connection to the
//! gateway. Optionally routes the TCP dial through a caller-supplied proxy
//! connector, inserted at the head of the pipeline before TLS per
//! spec.md §4.5. Reconnect backoff is owned by the pool actor that drives
//! repeated calls to [`ConnectionFactory::dial`], not by the factory
//! itself — see [`crate::backoff::ReconnectBackoff`].

use crate::config::ClientCredentials;
use crate::error::{Error, Result};
use crate::tls::{build_client_config, check_alpn_is_h2};
use rustls_pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// A TCP dialer, overridable to route through a proxy. The default simply
/// connects directly to `host:port`.
#[async_trait::async_trait]
pub trait ProxyConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<TcpStream>;
}

/// Direct TCP connector; the default when no proxy is configured.
pub(crate) struct DirectConnector;

#[async_trait::async_trait]
impl ProxyConnector for DirectConnector {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}

/// Cheaply cloneable dial parameters. Cloning lets the pool actor hand a
/// copy to each spawned dial attempt without holding the factory itself
/// across an await on a task it doesn't own.
#[derive(Clone)]
pub(crate) struct ConnectionFactory {
    host: String,
    port: u16,
    credentials: ClientCredentials,
    connect_timeout: Duration,
    proxy: Arc<dyn ProxyConnector>,
    trust_anchor_pem: Option<Arc<[u8]>>,
}

/// The raw materials handed to `connection::spawn` once a dial succeeds.
pub(crate) struct DialedConnection {
    pub(crate) send_request: h2::client::SendRequest<bytes::Bytes>,
    pub(crate) connection: h2::client::Connection<TlsStream<TcpStream>, bytes::Bytes>,
}

impl ConnectionFactory {
    pub(crate) fn new(
        host: String,
        port: u16,
        credentials: ClientCredentials,
        connect_timeout: Duration,
        proxy: Option<Arc<dyn ProxyConnector>>,
        trust_anchor_pem: Option<Arc<[u8]>>,
    ) -> Self {
        Self {
            host,
            port,
            credentials,
            connect_timeout,
            proxy: proxy.unwrap_or_else(|| Arc::new(DirectConnector)),
            trust_anchor_pem,
        }
    }

    pub(crate) fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Dial once, applying `connect_timeout`. Does not sleep for backoff;
    /// callers (the pool actor) sleep between attempts using their own
    /// [`crate::backoff::ReconnectBackoff`].
    pub(crate) async fn dial(&self) -> Result<DialedConnection> {
        match tokio::time::timeout(self.connect_timeout, self.dial_once()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(format!(
                "connect timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }

    async fn dial_once(&self) -> Result<DialedConnection> {
        let tcp = self
            .proxy
            .connect(&self.host, self.port)
            .await
            .map_err(|e| Error::Transport(format!("TCP connect to {}:{} failed: {e}", self.host, self.port)))?;
        tcp.set_nodelay(true).ok();

        let tls_config = build_client_config(&self.credentials, self.trust_anchor_pem.as_deref())?;
        let connector = TlsConnector::from(tls_config);
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| Error::Config(format!("invalid server name {}: {e}", self.host)))?;

        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Transport(format!("TLS handshake with {} failed: {e}", self.host)))?;

        let negotiated = tls_stream.get_ref().1.alpn_protocol().map(|p| p.to_vec());
        check_alpn_is_h2(negotiated.as_deref())?;

        let (send_request, connection) = h2::client::handshake(tls_stream)
            .await
            .map_err(|e| Error::Transport(format!("HTTP/2 handshake with {} failed: {e}", self.host)))?;

        debug!(host = %self.host, "connection factory dialed a new h2 connection");
        Ok(DialedConnection { send_request, connection })
    }
}

/// Sleep for `delay` unless it's zero, logging at debug level.
pub(crate) async fn wait_backoff(host: &str, delay: Duration) {
    if !delay.is_zero() {
        tracing::warn!(%host, ?delay, "backing off before reconnecting");
        tokio::time::sleep(delay).await;
    }
}
