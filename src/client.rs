//! Client façade (C7): the public entry point. Accepts a notification,
//! acquires a connection from the pool, and resolves once the server's
//! final reply (or a terminal error) arrives.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsListener;
use crate::notification::{PushNotification, PushResponse};
use crate::pool::PoolHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A pooled HTTP/2 client for Apple Push Notification service.
///
/// Cloning an `ApnsClient` is cheap: clones share the same connection pool
/// and closed-state flag.
#[derive(Clone)]
pub struct ApnsClient {
    pool: PoolHandle,
    metrics: Arc<dyn MetricsListener>,
    graceful_shutdown_timeout: std::time::Duration,
    closed: Arc<AtomicBool>,
}

impl ApnsClient {
    /// Build a client from a resolved [`ClientConfig`].
    pub fn new(config: ClientConfig) -> Self {
        let metrics = config.metrics.clone();
        let graceful_shutdown_timeout = config.graceful_shutdown_timeout;
        let pool = PoolHandle::spawn(config);
        Self {
            pool,
            metrics,
            graceful_shutdown_timeout,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send one notification, resolving once APNs accepts or rejects it,
    /// or a transport-level error terminates the attempt. Every call
    /// resolves exactly once.
    pub async fn send(&self, notification: PushNotification) -> Result<PushResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }

        let topic = notification.topic().to_string();
        let lease = self.pool.acquire().await?;

        let (write_ack, respond_to) = lease.handle.submit(notification).await?;

        // The connection is released back to the pool as soon as the write
        // future resolves, regardless of outcome — a failed write still
        // leaves the connection alive and able to serve the next acquire
        // (per spec.md §5: "every acquire is matched by exactly one
        // release"). Only a dead command channel (the connection task
        // itself exited) means there is no longer a slot to give back.
        match write_ack.await {
            Ok(Ok(())) => {
                self.metrics.notification_sent(&topic);
                self.pool.release(lease.token);
            }
            Ok(Err(reason)) => {
                self.metrics.write_failure();
                warn!(%topic, %reason, "notification write failed");
                self.pool.release(lease.token);
            }
            Err(_) => {
                // The connection task died before acknowledging the write;
                // `respond_to` below will also fail, carrying the real error.
                // Releasing here is harmless: the pool's `ConnectionClosed`
                // path (or a stale-idle-entry discard on the next acquire)
                // will already be pruning this slot from `all`.
                self.metrics.write_failure();
                self.pool.release(lease.token);
            }
        }

        let response = respond_to.await.map_err(|_| Error::StreamClosedBeforeReply)??;

        if response.accepted {
            self.metrics.notification_accepted(&topic);
        } else if let Some(reason) = &response.rejection_reason {
            self.metrics.notification_rejected(&topic, reason);
        }

        Ok(response)
    }

    /// Gracefully close the client: no new sends are accepted, in-flight
    /// streams are given up to `graceful_shutdown_timeout` to finish, and
    /// anything still pending after that is abandoned as the pool and its
    /// connections tear down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if tokio::time::timeout(self.graceful_shutdown_timeout, self.pool.close())
            .await
            .is_err()
        {
            warn!(timeout = ?self.graceful_shutdown_timeout, "graceful shutdown timed out; connections closing abruptly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApnsEnvironment, ClientConfig};

    fn test_signing_key() -> crate::auth::SigningKey {
        crate::auth::SigningKey {
            key_id: "KEYID1234".into(),
            team_id: "TEAMID123".into(),
            private_key_pem: std::fs::read("tests/fixtures/es256_private_key.pem").unwrap(),
        }
    }

    #[tokio::test]
    async fn send_after_close_fails_with_client_closed() {
        let config = ClientConfig::builder(ApnsEnvironment::Custom { host: "127.0.0.1".into(), port: 0 })
            .signing_key(test_signing_key())
            .build()
            .unwrap();
        let client = ApnsClient::new(config);
        client.close().await;

        let notification = PushNotification::builder("aa".repeat(32), "com.example.app").build().unwrap();
        let err = client.send(notification).await.unwrap_err();
        assert!(matches!(err, Error::ClientClosed));
    }

    #[tokio::test]
    async fn double_close_is_a_no_op() {
        let config = ClientConfig::builder(ApnsEnvironment::Custom { host: "127.0.0.1".into(), port: 0 })
            .signing_key(test_signing_key())
            .build()
            .unwrap();
        let client = ApnsClient::new(config);
        client.close().await;
        client.close().await;
    }
}
