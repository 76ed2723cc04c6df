//! # apns-sender
//!
//! A pooled HTTP/2 client for Apple's Push Notification service, plus a
//! mock APNs server used by this crate's own tests and by downstream
//! benchmarks.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use apns_sender::{ApnsClient, ApnsEnvironment, ClientConfig, PushNotification, SigningKey};
//!
//! # async fn run() -> apns_sender::Result<()> {
//! let signing_key = SigningKey {
//!     key_id: "ABC123DEFG".into(),
//!     team_id: "TEAM123456".into(),
//!     private_key_pem: std::fs::read("AuthKey_ABC123DEFG.p8")?,
//! };
//!
//! let config = ClientConfig::builder(ApnsEnvironment::Production)
//!     .signing_key(signing_key)
//!     .build()?;
//!
//! let client = ApnsClient::new(config);
//!
//! let notification = PushNotification::builder("<device token>", "com.example.app")
//!     .payload(br#"{"aps":{"alert":"hi"}}"#.to_vec())
//!     .build()?;
//!
//! let response = client.send(notification).await?;
//! println!("accepted: {}", response.accepted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module layout
//!
//! - [`auth`] — ES256 provider-token minting and verification
//! - [`codec`] — request/response wire encoding
//! - [`notification`] — [`PushNotification`], [`PushResponse`], [`RejectionReason`]
//! - [`backoff`] — reconnect backoff policy
//! - [`tls`] — client and server `rustls` config assembly
//! - [`factory`] — dials a single connection
//! - [`connection`] — one connection's state machine
//! - [`pool`] — the connection pool actor
//! - [`client`] — [`ApnsClient`], the public façade
//! - [`config`] — [`ClientConfig`]/[`ClientBuilder`]
//! - [`metrics`] — the pluggable [`MetricsListener`] trait
//! - [`mock`] — the mock APNs server

mod auth;
mod backoff;
mod client;
mod codec;
mod config;
mod connection;
mod error;
mod factory;
mod metrics;
pub mod mock;
mod notification;
mod pool;
mod stream;
mod tls;

pub use auth::{AuthToken, SigningKey, VerificationKey, MAX_TOKEN_AGE};
pub use client::ApnsClient;
pub use config::{ApnsEnvironment, ClientBuilder, ClientConfig, ClientCredentials};
pub use error::{Error, Result};
pub use factory::ProxyConnector;
pub use metrics::{MetricsListener, NoopMetricsListener};
pub use notification::{
    Priority, PushNotification, PushNotificationBuilder, PushResponse, PushType, RejectionReason,
    MAX_PAYLOAD_BYTES,
};

/// Convenience re-exports for the common "send one notification" path.
pub mod prelude {
    pub use crate::{
        ApnsClient, ApnsEnvironment, ClientConfig, Error, PushNotification, PushResponse,
        RejectionReason, Result, SigningKey,
    };
}
