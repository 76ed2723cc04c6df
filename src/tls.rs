//! TLS assembly for both sides of the connection: a client `rustls::ClientConfig`
//! for the sender core (C5) and a server `rustls::ServerConfig` for the mock
//! server (C8). Both restrict ALPN to `h2` only, per spec.md §4.5 — anything
//! else negotiated is an `UnexpectedProtocol` transport error.

use crate::config::ClientCredentials;
use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use std::io::BufReader;
use std::sync::Arc;

const ALPN_H2: &[u8] = b"h2";

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("invalid certificate PEM: {e}")))
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem);
    private_key(&mut reader)
        .map_err(|e| Error::Config(format!("invalid private key PEM: {e}")))?
        .ok_or_else(|| Error::Config("no private key found in PEM".into()))
}

/// Build the client-side `rustls::ClientConfig` for one [`ClientCredentials`]
/// variant. Token-auth connections present no client certificate; mTLS
/// connections present the configured certificate chain and key.
///
/// `extra_trust_anchor_pem`, when set, is added alongside the platform's
/// webpki roots — the external collaborator for "PEM for trusted chains"
/// named in spec.md §6, used in practice to trust a mock server's
/// self-signed certificate in tests.
pub(crate) fn build_client_config(
    credentials: &ClientCredentials,
    extra_trust_anchor_pem: Option<&[u8]>,
) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(pem) = extra_trust_anchor_pem {
        for cert in parse_certs(pem)? {
            roots
                .add(cert)
                .map_err(|e| Error::Config(format!("invalid trust anchor certificate: {e}")))?;
        }
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let mut config = match credentials {
        ClientCredentials::Certificate { cert_pem, key_pem } => {
            let certs = parse_certs(cert_pem)?;
            let key = parse_private_key(key_pem)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Config(format!("invalid client certificate: {e}")))?
        }
        ClientCredentials::SigningKey(_) => builder.with_no_client_auth(),
    };

    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(Arc::new(config))
}

/// Build the mock server's `rustls::ServerConfig`. `client_cert_roots`, when
/// present, enables (optional, not required) client certificate requests so
/// the server can distinguish TLS-auth from token-auth connections the way
/// spec.md §4.8 describes.
pub(crate) fn build_server_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_cert_roots: Option<&[u8]>,
) -> Result<Arc<ServerConfig>> {
    let certs = parse_certs(cert_pem)?;
    let key = parse_private_key(key_pem)?;

    let builder = ServerConfig::builder();
    let mut config = match client_cert_roots {
        Some(roots_pem) => {
            let mut roots = RootCertStore::empty();
            for cert in parse_certs(roots_pem)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::Config(format!("invalid client CA root: {e}")))?;
            }
            let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|e| Error::Config(format!("invalid client verifier: {e}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|e| Error::Config(format!("invalid server certificate: {e}")))?
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Config(format!("invalid server certificate: {e}")))?,
    };

    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(Arc::new(config))
}

/// Verify the negotiated ALPN protocol is `h2`, per spec.md §4.5.
pub(crate) fn check_alpn_is_h2(negotiated: Option<&[u8]>) -> Result<()> {
    match negotiated {
        Some(proto) if proto == ALPN_H2 => Ok(()),
        other => Err(Error::Transport(format!(
            "unexpected ALPN protocol negotiated: {:?}",
            other.map(String::from_utf8_lossy)
        ))),
    }
}
