//! Standalone mock APNs server binary, for manual testing and benchmarks
//! against a real process rather than an in-test `MockServer`.
//!
//! Configuration is read from the environment (`ServiceConfig::from_env`
//! style): `MOCK_APNS_ADDR` (default `127.0.0.1:2197`) and
//! `MOCK_APNS_BENCHMARK` (`1` selects the no-validation benchmark variant).
//! With no TLS cert/key path configured, a self-signed certificate is
//! generated for `localhost` on startup.

use apns_sender::mock::{start_benchmark_server, MockServerBuilder};
use std::net::SocketAddr;
use tracing::info;

fn self_signed_cert() -> (Vec<u8>, Vec<u8>) {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("self-signed certificate generation cannot fail for a bare localhost SAN");
    let cert_pem = generated.cert.pem();
    let key_pem = generated.key_pair.serialize_pem();
    (cert_pem.into_bytes(), key_pem.into_bytes())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(true)
        .init();

    let addr: SocketAddr = std::env::var("MOCK_APNS_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:2197".to_string())
        .parse()?;
    let benchmark_mode = std::env::var("MOCK_APNS_BENCHMARK").as_deref() == Ok("1");

    let (cert_pem, key_pem) = self_signed_cert();

    let server = if benchmark_mode {
        info!(%addr, "starting mock APNs server in benchmark mode (no validation)");
        start_benchmark_server(addr, &cert_pem, &key_pem).await?
    } else {
        info!(%addr, "starting mock APNs server");
        MockServerBuilder::new(cert_pem, key_pem).start(addr).await?
    };

    info!(addr = %server.local_addr(), "mock APNs server listening");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown().await;

    Ok(())
}
