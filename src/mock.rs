//! Mock server core (C8): an HTTP/2 + TLS listener that validates
//! APNs-shaped requests and answers with the bit-exact response envelope
//! APNs uses, for tests and benchmarks.
//!
//! Registration (device tokens, verification keys) follows spec.md §5:
//! all "register" calls happen on the builder before `start()`; the
//! resulting [`Registry`] is read-only for the life of the server except
//! for the per-connection `expected_team_id` (owned by that connection's
//! own task, wrapped in a `parking_lot::Mutex` only because concurrent
//! streams on the same connection may race to set it) and the one-shot
//! test hooks (`one_shot_rejections`/`one_shot_stream_resets`), each
//! consumed at most once across every connection.

use crate::auth::{peek_key_id, verify_token, VerificationKey, MAX_TOKEN_AGE};
use crate::codec::encode_error_body;
use crate::notification::{RejectionReason, MAX_PAYLOAD_BYTES};
use crate::tls::{build_server_config, check_alpn_is_h2};
use bytes::Bytes;
use h2::server::SendResponse;
use h2::RecvStream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};
use uuid::Uuid;

/// `topic -> (device_token -> expiration_or_null)`, per spec.md §3.
#[derive(Default)]
struct Registry {
    device_tokens_by_topic: HashMap<String, HashMap<String, Option<i64>>>,
    verification_keys_by_kid: HashMap<String, VerificationKey>,
    allowed_topics_by_kid: HashMap<String, HashSet<String>>,
    /// Device tokens whose next request should be force-rejected once,
    /// consumed on use. Exercises the client's per-reason retry logic
    /// (e.g. `ExpiredProviderToken`) without depending on real token
    /// expiry timing. The only other field mutated after `start()`.
    one_shot_rejections: Mutex<HashMap<String, (u16, RejectionReason)>>,
    /// Device tokens whose next stream should be reset with
    /// `REFUSED_STREAM` instead of answered, consumed on use.
    one_shot_stream_resets: Mutex<HashSet<String>>,
}

impl Registry {
    fn device_token_entry(&self, topic: &str, token: &str) -> Option<Option<i64>> {
        self.device_tokens_by_topic.get(topic).and_then(|m| m.get(token).copied())
    }
}

/// Builder for [`MockServer`]. Every `register_*` call must happen before
/// [`MockServerBuilder::start`]; there is no supported path to mutate the
/// registry once the server is serving.
pub struct MockServerBuilder {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    client_cert_roots: Option<Vec<u8>>,
    emulate_internal_errors: bool,
    registry: Registry,
}

impl MockServerBuilder {
    /// Start building a mock server presenting `cert_pem`/`key_pem` as its
    /// TLS server identity.
    pub fn new(cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Self {
        Self {
            cert_pem,
            key_pem,
            client_cert_roots: None,
            emulate_internal_errors: false,
            registry: Registry::default(),
        }
    }

    /// Accept client certificates signed by `roots_pem`, enabling
    /// TLS-based (mTLS) authentication per spec.md §4.8. Without this,
    /// every connection is treated as token-auth.
    pub fn client_cert_roots(mut self, roots_pem: Vec<u8>) -> Self {
        self.client_cert_roots = Some(roots_pem);
        self
    }

    /// Respond 500 with an empty body to every request, regardless of
    /// validation outcome — spec.md §4.8's `emulate_internal_errors` mode.
    pub fn emulate_internal_errors(mut self, emulate: bool) -> Self {
        self.emulate_internal_errors = emulate;
        self
    }

    /// Register a device token under `topic`. `expiration` mirrors the
    /// data model's "expiration or null": `Some(ts)` makes the token
    /// respond `Unregistered` with `ts` as `token_invalidation_time`;
    /// `None` makes it a live, deliverable token.
    pub fn register_device_token(
        mut self,
        topic: impl Into<String>,
        device_token: impl Into<String>,
        expiration: Option<i64>,
    ) -> Self {
        self.registry
            .device_tokens_by_topic
            .entry(topic.into())
            .or_default()
            .insert(device_token.into(), expiration);
        self
    }

    /// Register a provider verification key (the public counterpart of a
    /// signing key used by a client) and the topics it's allowed to send
    /// to. Unknown key ids yield `InvalidProviderToken`.
    pub fn register_verification_key(
        mut self,
        key: VerificationKey,
        allowed_topics: impl IntoIterator<Item = String>,
    ) -> Self {
        self.registry
            .allowed_topics_by_kid
            .insert(key.key_id.clone(), allowed_topics.into_iter().collect());
        self.registry.verification_keys_by_kid.insert(key.key_id.clone(), key);
        self
    }

    /// Force the first request carrying `device_token` to be rejected
    /// with `status`/`reason` before any other check runs, then validate
    /// normally after that. Lets a test drive the client's stream-level
    /// retry for a reason (e.g. `ExpiredProviderToken`) deterministically,
    /// without waiting on real token expiry.
    pub fn fail_first_attempt(mut self, device_token: impl Into<String>, status: u16, reason: RejectionReason) -> Self {
        self.registry.one_shot_rejections.get_mut().insert(device_token.into(), (status, reason));
        self
    }

    /// Force the first stream opened for `device_token` to be reset with
    /// `h2::Reason::REFUSED_STREAM` instead of answered, then accept the
    /// retried stream normally. Lets a test drive the client's
    /// `REFUSED_STREAM` retry deterministically.
    pub fn refuse_first_stream(mut self, device_token: impl Into<String>) -> Self {
        self.registry.one_shot_stream_resets.get_mut().insert(device_token.into());
        self
    }

    /// Bind and start serving, returning a handle once the listener is
    /// live. `addr`'s port `0` asks the OS to pick a free port; read it
    /// back via [`MockServer::local_addr`].
    pub async fn start(self, addr: SocketAddr) -> crate::error::Result<MockServer> {
        let server_config =
            build_server_config(&self.cert_pem, &self.key_pem, self.client_cert_roots.as_deref())?;
        let mode = ServingMode::Validating {
            registry: Arc::new(self.registry),
            emulate_internal_errors: self.emulate_internal_errors,
            client_auth_enabled: self.client_cert_roots.is_some(),
        };
        start_listener(addr, server_config, mode).await
    }
}

/// Build the always-accept, no-validation benchmark variant (spec.md
/// §4.8 "Benchmark variant"), kept as a distinct construction path rather
/// than a runtime flag so it can never be reached by misconfiguring a
/// validating instance.
pub async fn start_benchmark_server(
    addr: SocketAddr,
    cert_pem: &[u8],
    key_pem: &[u8],
) -> crate::error::Result<MockServer> {
    let server_config = build_server_config(cert_pem, key_pem, None)?;
    start_listener(addr, server_config, ServingMode::Benchmark).await
}

/// A running mock server. Dropping this without calling [`Self::shutdown`]
/// leaves the accept loop running until the process exits; prefer
/// `shutdown` in tests to release the bound port promptly.
pub struct MockServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MockServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections and wait for the accept loop to
    /// exit. In-flight connections are dropped, not drained.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[derive(Clone)]
enum ServingMode {
    Validating {
        registry: Arc<Registry>,
        emulate_internal_errors: bool,
        client_auth_enabled: bool,
    },
    Benchmark,
}

async fn start_listener(
    addr: SocketAddr,
    server_config: Arc<rustls::ServerConfig>,
    mode: ServingMode,
) -> crate::error::Result<MockServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let acceptor = TlsAcceptor::from(server_config);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(accept_loop(listener, acceptor, mode, shutdown_rx));

    Ok(MockServer { local_addr, shutdown: Some(shutdown_tx), task: Some(task) })
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    mode: ServingMode,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (tcp, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "mock server accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let mode = mode.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(tcp, acceptor, mode).await {
                        debug!(%peer, error = %e, "mock server connection ended");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    tcp: TcpStream,
    acceptor: TlsAcceptor,
    mode: ServingMode,
) -> crate::error::Result<()> {
    tcp.set_nodelay(true).ok();
    let tls_stream = acceptor
        .accept(tcp)
        .await
        .map_err(|e| crate::error::Error::Transport(format!("mock TLS accept failed: {e}")))?;

    let (_, session) = tls_stream.get_ref();
    let negotiated = session.alpn_protocol().map(|p| p.to_vec());
    check_alpn_is_h2(negotiated.as_deref())?;
    let peer_certs = session.peer_certificates().map(|certs| certs.to_vec());

    let mut connection = h2::server::handshake(tls_stream)
        .await
        .map_err(|e| crate::error::Error::Transport(format!("mock h2 handshake failed: {e}")))?;

    match mode {
        ServingMode::Benchmark => {
            let stable_apns_id = Uuid::new_v4();
            while let Some(result) = connection.accept().await {
                let (request, respond) = result?;
                tokio::spawn(async move {
                    let _ = serve_benchmark(request, respond, stable_apns_id).await;
                });
            }
        }
        ServingMode::Validating { registry, emulate_internal_errors, client_auth_enabled } => {
            let auth = ConnectionAuth::new(client_auth_enabled, peer_certs.as_deref())?;
            while let Some(result) = connection.accept().await {
                let (request, respond) = result?;
                let registry = registry.clone();
                let auth = auth.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_validating(request, respond, registry, auth, emulate_internal_errors).await {
                        debug!(error = %e, "mock server stream ended with an error");
                    }
                });
            }
        }
    }

    Ok(())
}

#[derive(Clone)]
enum ConnectionAuth {
    /// mTLS connection; `allowed_topics` is `{base, base.voip, base.complication}`.
    Tls { allowed_topics: HashSet<String> },
    /// Provider-token connection; `expected_team_id` is sticky once a
    /// token first passes signature and expiry checks.
    Token { expected_team_id: Arc<Mutex<Option<String>>> },
}

impl ConnectionAuth {
    fn new(client_auth_enabled: bool, peer_certs: Option<&[rustls::pki_types::CertificateDer<'_>]>) -> crate::error::Result<Self> {
        if client_auth_enabled {
            if let Some(certs) = peer_certs {
                if let Some(leaf) = certs.first() {
                    let base = extract_base_topic(leaf.as_ref())?;
                    let mut allowed_topics = HashSet::new();
                    allowed_topics.insert(base.clone());
                    allowed_topics.insert(format!("{base}.voip"));
                    allowed_topics.insert(format!("{base}.complication"));
                    return Ok(Self::Tls { allowed_topics });
                }
            }
        }
        Ok(Self::Token { expected_team_id: Arc::new(Mutex::new(None)) })
    }
}

/// Pull the base topic out of a client certificate's Subject UID
/// attribute, the way a real APNs mTLS connection identifies its app —
/// mirrored from the original server's `X500Principal` UID lookup.
fn extract_base_topic(cert_der: &[u8]) -> crate::error::Result<String> {
    let bad_cert = || crate::error::Error::Rejection { reason: RejectionReason::BadCertificate, timestamp: None };

    let (_, cert) = x509_parser::parse_x509_certificate(cert_der).map_err(|e| {
        warn!(error = %e, "failed to parse client certificate");
        bad_cert()
    })?;

    cert.subject()
        .iter_attributes()
        .find(|attr| attr.attr_type() == &x509_parser::oid_registry::OID_X509_UID)
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
        .ok_or_else(bad_cert)
}

struct Rejection {
    status: u16,
    reason: RejectionReason,
    timestamp: Option<i64>,
}

impl Rejection {
    fn new(status: u16, reason: RejectionReason) -> Self {
        Self { status, reason, timestamp: None }
    }

    fn with_timestamp(status: u16, reason: RejectionReason, timestamp: Option<i64>) -> Self {
        Self { status, reason, timestamp }
    }
}

async fn serve_benchmark(
    request: http::Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    stable_apns_id: Uuid,
) -> crate::error::Result<()> {
    drain_body(request.into_body()).await.ok();
    let response = http::Response::builder()
        .status(200)
        .header("apns-id", stable_apns_id.to_string())
        .body(())
        .expect("benchmark response is well-formed");
    respond.send_response(response, true)?;
    Ok(())
}

async fn serve_validating(
    request: http::Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    registry: Arc<Registry>,
    auth: ConnectionAuth,
    emulate_internal_errors: bool,
) -> crate::error::Result<()> {
    if emulate_internal_errors {
        drain_body(request.into_body()).await.ok();
        let response = http::Response::builder().status(500).body(()).expect("500 response is well-formed");
        respond.send_response(response, true)?;
        return Ok(());
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    if let Some(token) = device_token_from_path(&path) {
        if registry.one_shot_stream_resets.lock().remove(token) {
            drain_body(request.into_body()).await.ok();
            respond.send_reset(h2::Reason::REFUSED_STREAM);
            return Ok(());
        }
    }

    // Whether to reject this request with `PayloadEmpty` is decided by
    // `validate` itself, not here — the method check (table row 1) must
    // still run first even when HEADERS carried no body (table row 2), so
    // a non-POST request with an empty body is `MethodNotAllowed`, not
    // `PayloadEmpty`.
    let (body, body_was_empty) = match read_body(request.into_body()).await {
        Ok(body) => (body, false),
        Err(_) => (Vec::new(), true),
    };

    let requested_apns_id = headers
        .get("apns-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| (s.to_string(), Uuid::parse_str(s)));

    let outcome = validate(&method, &path, &headers, &body, body_was_empty, &registry, &auth, &requested_apns_id);

    let apns_id = match &requested_apns_id {
        Some((_, Ok(id))) => *id,
        _ => Uuid::new_v4(),
    };

    match outcome {
        Ok(()) => {
            let response = http::Response::builder()
                .status(200)
                .header("apns-id", apns_id.to_string())
                .body(())
                .expect("200 response is well-formed");
            respond.send_response(response, true)?;
            Ok(())
        }
        Err(rejection) => respond_rejection(&mut respond, apns_id, rejection),
    }
}

fn respond_rejection(
    respond: &mut SendResponse<Bytes>,
    apns_id: Uuid,
    rejection: Rejection,
) -> crate::error::Result<()> {
    let body = encode_error_body(&rejection.reason, rejection.timestamp);
    let response = http::Response::builder()
        .status(rejection.status)
        .header("apns-id", apns_id.to_string())
        .header("content-type", "application/json")
        .body(())
        .expect("rejection response is well-formed");
    let mut send_stream = respond.send_response(response, false)?;
    send_stream.send_data(Bytes::from(body), true)?;
    Ok(())
}

/// Read the full request body. The `bool` in the error case distinguishes
/// "no DATA frames were sent at all" (true — spec.md's "end-of-stream on
/// HEADERS") from any other read failure (false).
async fn read_body(mut body: RecvStream) -> std::result::Result<Vec<u8>, bool> {
    let mut buffer = Vec::new();
    let mut saw_any_frame = false;
    loop {
        match std::future::poll_fn(|cx| body.poll_data(cx)).await {
            Some(Ok(chunk)) => {
                saw_any_frame = true;
                let _ = body.flow_control().release_capacity(chunk.len());
                buffer.extend_from_slice(&chunk);
            }
            Some(Err(_)) => return Err(false),
            None => break,
        }
    }
    if !saw_any_frame && buffer.is_empty() {
        return Err(true);
    }
    Ok(buffer)
}

async fn drain_body(mut body: RecvStream) -> crate::error::Result<()> {
    while let Some(chunk) = std::future::poll_fn(|cx| body.poll_data(cx)).await {
        let chunk = chunk?;
        let _ = body.flow_control().release_capacity(chunk.len());
    }
    Ok(())
}

/// Shape-agnostic path parse shared by the one-shot test hooks, which
/// need the device token before `validate`'s own (shape-checked) parse
/// of the same path runs.
fn device_token_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/3/device/").filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

#[allow(clippy::too_many_arguments)]
fn validate(
    method: &http::Method,
    path: &str,
    headers: &http::HeaderMap,
    body: &[u8],
    body_was_empty: bool,
    registry: &Registry,
    auth: &ConnectionAuth,
    requested_apns_id: &Option<(String, std::result::Result<Uuid, uuid::Error>)>,
) -> std::result::Result<(), Rejection> {
    if *method != http::Method::POST {
        return Err(Rejection::new(405, RejectionReason::MethodNotAllowed));
    }

    if body_was_empty {
        return Err(Rejection::new(400, RejectionReason::PayloadEmpty));
    }

    let device_token = path
        .strip_prefix("/3/device/")
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .ok_or_else(|| Rejection::new(404, RejectionReason::BadPath))?;

    if let Some((status, reason)) = registry.one_shot_rejections.lock().remove(device_token) {
        return Err(Rejection::new(status, reason));
    }

    // Shape-only: needs no topic, so it runs before the topic-presence
    // check even though the registration lookup below (which does need a
    // topic) is deferred until after it.
    let require_64_hex = matches!(auth, ConnectionAuth::Tls { .. });
    if !is_valid_device_token(device_token, require_64_hex) {
        return Err(Rejection::new(400, RejectionReason::BadDeviceToken));
    }

    let topic = headers
        .get("apns-topic")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Rejection::new(400, RejectionReason::MissingTopic))?;

    match auth {
        ConnectionAuth::Tls { allowed_topics } => {
            if !allowed_topics.contains(topic) {
                return Err(Rejection::new(400, RejectionReason::BadTopic));
            }
        }
        ConnectionAuth::Token { .. } => match registry.device_token_entry(topic, device_token) {
            None => return Err(Rejection::new(400, RejectionReason::DeviceTokenNotForTopic)),
            Some(Some(expiration)) => {
                return Err(Rejection::with_timestamp(410, RejectionReason::Unregistered, Some(expiration)))
            }
            Some(None) => {}
        },
    }

    if let Some(priority) = headers.get("apns-priority").and_then(|v| v.to_str().ok()) {
        if priority != "10" && priority != "5" {
            return Err(Rejection::new(400, RejectionReason::BadPriority));
        }
    }

    if let Some((_, parsed)) = requested_apns_id {
        if parsed.is_err() {
            return Err(Rejection::new(400, RejectionReason::BadMessageId));
        }
    }

    if body.len() > MAX_PAYLOAD_BYTES {
        return Err(Rejection::new(413, RejectionReason::PayloadTooLarge));
    }

    if let ConnectionAuth::Token { expected_team_id } = auth {
        let bearer = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bearer "))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Rejection::new(403, RejectionReason::MissingProviderToken))?;

        let key_id = peek_key_id(bearer).map_err(|_| Rejection::new(403, RejectionReason::InvalidProviderToken))?;
        let key = registry
            .verification_keys_by_kid
            .get(&key_id)
            .ok_or_else(|| Rejection::new(403, RejectionReason::InvalidProviderToken))?;
        let (team_id, issued_at) =
            verify_token(bearer, key).map_err(|_| Rejection::new(403, RejectionReason::InvalidProviderToken))?;

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
        if now - issued_at > MAX_TOKEN_AGE.as_secs() as i64 {
            return Err(Rejection::new(403, RejectionReason::ExpiredProviderToken));
        }

        {
            let mut sticky = expected_team_id.lock();
            match sticky.as_ref() {
                Some(expected) if expected != &team_id => {
                    return Err(Rejection::new(403, RejectionReason::InvalidProviderToken));
                }
                Some(_) => {}
                None => *sticky = Some(team_id.clone()),
            }
        }

        let allowed = registry.allowed_topics_by_kid.get(&key_id);
        if !allowed.is_some_and(|topics| topics.contains(topic)) {
            return Err(Rejection::new(403, RejectionReason::InvalidProviderToken));
        }
    }

    Ok(())
}

fn is_valid_device_token(token: &str, require_64_hex: bool) -> bool {
    let well_formed = !token.is_empty()
        && token.len() <= 200
        && token.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if require_64_hex {
        well_formed && token.len() == 64
    } else {
        well_formed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_token_format_rejects_non_hex() {
        assert!(!is_valid_device_token("not-hex", false));
        assert!(!is_valid_device_token("", false));
        assert!(is_valid_device_token(&"aa".repeat(32), false));
    }

    #[test]
    fn device_token_format_requires_64_hex_for_tls_auth() {
        assert!(!is_valid_device_token(&"aa".repeat(10), true));
        assert!(is_valid_device_token(&"aa".repeat(32), true));
    }

    #[test]
    fn device_token_format_rejects_uppercase_hex() {
        assert!(!is_valid_device_token(&"AA".repeat(32), false));
    }

    #[test]
    fn registry_distinguishes_unregistered_from_not_for_topic() {
        let mut registry = Registry::default();
        registry
            .device_tokens_by_topic
            .entry("com.example.app".to_string())
            .or_default()
            .insert("aa".repeat(32), None);
        registry
            .device_tokens_by_topic
            .entry("com.example.app".to_string())
            .or_default()
            .insert("bb".repeat(32), Some(1_577_836_800_000));

        assert_eq!(registry.device_token_entry("com.example.app", &"aa".repeat(32)), Some(None));
        assert_eq!(
            registry.device_token_entry("com.example.app", &"bb".repeat(32)),
            Some(Some(1_577_836_800_000))
        );
        assert_eq!(registry.device_token_entry("com.example.app", &"cc".repeat(32)), None);
        assert_eq!(registry.device_token_entry("com.other.app", &"aa".repeat(32)), None);
    }

    #[test]
    fn validate_rejects_missing_topic_once_device_token_shape_is_valid() {
        let registry = Registry::default();
        let auth = ConnectionAuth::Token { expected_team_id: Arc::new(Mutex::new(None)) };
        let mut headers = http::HeaderMap::new();
        headers.insert("apns-topic", http::HeaderValue::from_static(""));
        let result = validate(
            &http::Method::POST,
            &format!("/3/device/{}", "aa".repeat(32)),
            &headers,
            b"{}",
            false,
            &registry,
            &auth,
            &None,
        );
        assert!(matches!(result, Err(Rejection { reason: RejectionReason::MissingTopic, .. })));
    }

    #[test]
    fn validate_rejects_malformed_device_token_before_missing_topic() {
        // Per the spec's validation table, `BadDeviceToken` (row 4) is
        // checked before `MissingTopic` (row 6) — a malformed token with no
        // `apns-topic` at all must still surface as `BadDeviceToken`.
        let registry = Registry::default();
        let auth = ConnectionAuth::Token { expected_team_id: Arc::new(Mutex::new(None)) };
        let result = validate(
            &http::Method::POST,
            "/3/device/not-hex",
            &http::HeaderMap::new(),
            b"{}",
            false,
            &registry,
            &auth,
            &None,
        );
        assert!(matches!(result, Err(Rejection { reason: RejectionReason::BadDeviceToken, status: 400, .. })));
    }

    #[test]
    fn validate_rejects_non_post_method_first() {
        let registry = Registry::default();
        let auth = ConnectionAuth::Token { expected_team_id: Arc::new(Mutex::new(None)) };
        let result = validate(
            &http::Method::GET,
            "/3/device/aa",
            &http::HeaderMap::new(),
            b"",
            false,
            &registry,
            &auth,
            &None,
        );
        assert!(matches!(result, Err(Rejection { reason: RejectionReason::MethodNotAllowed, status: 405, .. })));
    }

    #[test]
    fn validate_rejects_non_post_method_before_empty_payload() {
        // Table row 1 (method) must win over row 2 (payload empty) even
        // when both conditions hold at once.
        let registry = Registry::default();
        let auth = ConnectionAuth::Token { expected_team_id: Arc::new(Mutex::new(None)) };
        let result = validate(
            &http::Method::GET,
            "/3/device/aa",
            &http::HeaderMap::new(),
            b"",
            true,
            &registry,
            &auth,
            &None,
        );
        assert!(matches!(result, Err(Rejection { reason: RejectionReason::MethodNotAllowed, status: 405, .. })));
    }

    #[test]
    fn validate_rejects_empty_payload_before_bad_path() {
        let registry = Registry::default();
        let auth = ConnectionAuth::Token { expected_team_id: Arc::new(Mutex::new(None)) };
        let result = validate(
            &http::Method::POST,
            "/not/a/device/path",
            &http::HeaderMap::new(),
            b"",
            true,
            &registry,
            &auth,
            &None,
        );
        assert!(matches!(result, Err(Rejection { reason: RejectionReason::PayloadEmpty, status: 400, .. })));
    }

    #[test]
    fn validate_rejects_bad_path() {
        let registry = Registry::default();
        let auth = ConnectionAuth::Token { expected_team_id: Arc::new(Mutex::new(None)) };
        let mut headers = http::HeaderMap::new();
        headers.insert("apns-topic", http::HeaderValue::from_static("com.example.app"));
        let result = validate(
            &http::Method::POST,
            "/not/a/device/path",
            &headers,
            b"{}",
            false,
            &registry,
            &auth,
            &None,
        );
        assert!(matches!(result, Err(Rejection { reason: RejectionReason::BadPath, status: 404, .. })));
    }

    #[test]
    fn validate_rejects_payload_too_large() {
        let mut registry = Registry::default();
        let token = "aa".repeat(32);
        registry
            .device_tokens_by_topic
            .entry("com.example.app".to_string())
            .or_default()
            .insert(token.clone(), None);
        let auth = ConnectionAuth::Token { expected_team_id: Arc::new(Mutex::new(None)) };
        let mut headers = http::HeaderMap::new();
        headers.insert("apns-topic", http::HeaderValue::from_static("com.example.app"));
        let body = vec![b'a'; MAX_PAYLOAD_BYTES + 1];
        let result = validate(
            &http::Method::POST,
            &format!("/3/device/{token}"),
            &headers,
            &body,
            false,
            &registry,
            &auth,
            &None,
        );
        assert!(matches!(result, Err(Rejection { reason: RejectionReason::PayloadTooLarge, status: 413, .. })));
    }
}
