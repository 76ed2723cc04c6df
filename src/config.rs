//! Client configuration (C11): a plain config value plus a `build()`
//! function, in place of a builder class with implicit state — see the
//! design notes on mutual exclusivity of client-cert vs. signing-key auth.

use crate::error::{Error, Result};
use crate::factory::ProxyConnector;
use crate::metrics::{MetricsListener, NoopMetricsListener};
use std::sync::Arc;
use std::time::Duration;

/// Named APNs gateways, plus an escape hatch for test/mock endpoints.
#[derive(Debug, Clone)]
pub enum ApnsEnvironment {
    /// `api.push.apple.com:443`.
    Production,
    /// `api.development.push.apple.com:443`.
    Sandbox,
    /// An arbitrary host/port, e.g. a mock server under test.
    Custom { host: String, port: u16 },
}

impl ApnsEnvironment {
    pub(crate) fn host_port(&self) -> (&str, u16) {
        match self {
            Self::Production => ("api.push.apple.com", 443),
            Self::Sandbox => ("api.development.push.apple.com", 443),
            Self::Custom { host, port } => (host.as_str(), *port),
        }
    }
}

/// Exactly one of these must be supplied to [`ClientBuilder`].
#[derive(Clone)]
pub enum ClientCredentials {
    /// mTLS: client certificate presented during the TLS handshake.
    Certificate { cert_pem: Vec<u8>, key_pem: Vec<u8> },
    /// Token auth: an ES256 signing key used to mint provider JWTs.
    SigningKey(crate::auth::SigningKey),
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Certificate { .. } => f.debug_struct("Certificate").finish_non_exhaustive(),
            Self::SigningKey(key) => f.debug_tuple("SigningKey").field(&key.key_id).finish(),
        }
    }
}

/// Resolved, immutable client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) environment: ApnsEnvironment,
    pub(crate) credentials: ClientCredentials,
    pub(crate) pool_capacity: usize,
    pub(crate) connect_timeout: Duration,
    pub(crate) idle_ping_interval: Duration,
    pub(crate) graceful_shutdown_timeout: Duration,
    pub(crate) metrics: Arc<dyn MetricsListener>,
    pub(crate) proxy: Option<Arc<dyn ProxyConnector>>,
    pub(crate) trust_anchor_pem: Option<Arc<[u8]>>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("environment", &self.environment)
            .field("credentials", &self.credentials)
            .field("pool_capacity", &self.pool_capacity)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_ping_interval", &self.idle_ping_interval)
            .field("graceful_shutdown_timeout", &self.graceful_shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn builder(environment: ApnsEnvironment) -> ClientBuilder {
        ClientBuilder::new(environment)
    }
}

/// Builder for [`ClientConfig`].
pub struct ClientBuilder {
    environment: ApnsEnvironment,
    credentials: Option<ClientCredentials>,
    pool_capacity: usize,
    connect_timeout: Duration,
    idle_ping_interval: Duration,
    graceful_shutdown_timeout: Duration,
    metrics: Option<Arc<dyn MetricsListener>>,
    proxy: Option<Arc<dyn ProxyConnector>>,
    trust_anchor_pem: Option<Arc<[u8]>>,
}

impl ClientBuilder {
    fn new(environment: ApnsEnvironment) -> Self {
        Self {
            environment,
            credentials: None,
            pool_capacity: 1,
            connect_timeout: Duration::from_secs(10),
            idle_ping_interval: Duration::from_secs(60),
            graceful_shutdown_timeout: Duration::from_secs(5),
            metrics: None,
            proxy: None,
            trust_anchor_pem: None,
        }
    }

    /// Use mTLS with a client certificate.
    pub fn client_certificate(mut self, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Self {
        self.credentials = Some(ClientCredentials::Certificate { cert_pem, key_pem });
        self
    }

    /// Use token-based auth with an ES256 signing key.
    pub fn signing_key(mut self, signing_key: crate::auth::SigningKey) -> Self {
        self.credentials = Some(ClientCredentials::SigningKey(signing_key));
        self
    }

    /// Number of concurrent connections to keep open (default 1).
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Max time to establish TLS + the HTTP/2 handshake (default 10s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Idle-keepalive PING interval (default 60s). See the connection
    /// handler's state machine for the corresponding ping-timeout rule.
    pub fn idle_ping_interval(mut self, interval: Duration) -> Self {
        self.idle_ping_interval = interval;
        self
    }

    /// Time `close()` waits for in-flight streams before forcing shutdown
    /// (default 5s).
    pub fn graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }

    /// Install an observability sink. Defaults to a no-op implementation
    /// if never called — never a process-wide singleton.
    pub fn metrics(mut self, listener: Arc<dyn MetricsListener>) -> Self {
        self.metrics = Some(listener);
        self
    }

    /// Route outbound TCP dials through a proxy, inserted at the head of
    /// the pipeline before TLS.
    pub fn proxy(mut self, proxy: Arc<dyn ProxyConnector>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Trust an additional PEM certificate chain for the gateway's TLS
    /// handshake, alongside the platform's webpki roots. Used to point a
    /// client at a mock server's self-signed certificate in tests; real
    /// APNs connections never need this.
    pub fn trust_anchor(mut self, cert_pem: Vec<u8>) -> Self {
        self.trust_anchor_pem = Some(Arc::from(cert_pem.into_boxed_slice()));
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ClientConfig> {
        let credentials = self
            .credentials
            .ok_or_else(|| Error::Config("exactly one of {client certificate, signing key} must be configured".into()))?;

        if self.pool_capacity == 0 {
            return Err(Error::Config("pool capacity must be at least 1".into()));
        }

        Ok(ClientConfig {
            environment: self.environment,
            credentials,
            pool_capacity: self.pool_capacity,
            connect_timeout: self.connect_timeout,
            idle_ping_interval: self.idle_ping_interval,
            graceful_shutdown_timeout: self.graceful_shutdown_timeout,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetricsListener)),
            proxy: self.proxy,
            trust_anchor_pem: self.trust_anchor_pem,
        })
    }
}
