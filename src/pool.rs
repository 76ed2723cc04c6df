//! Channel pool (C6): a fixed-capacity pool of [`ConnectionHandle`]s with an
//! idle queue and a pending-acquire queue, creating connections on demand.
//!
//! Pool state is owned by a single task driving `run()`, reached only
//! through [`PoolHandle`]'s command channel — never a shared, locked map.
//! See the concurrency model's "own shared maps on one executor" guidance.

use crate::backoff::ReconnectBackoff;
use crate::config::ClientConfig;
use crate::connection::{self, ConnectionHandle};
use crate::error::{Error, Result};
use crate::factory::{wait_backoff, ConnectionFactory};
use crate::metrics::MetricsListener;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type ConnId = u64;

/// Opaque identifier pairing an acquired [`ConnectionHandle`] with the
/// pool slot it came from, so [`PoolHandle::release`] returns the exact
/// slot rather than "a" connection.
#[derive(Clone, Copy)]
pub(crate) struct ConnectionToken(ConnId);

/// A connection acquired from the pool, paired with the token used to
/// release it.
pub(crate) struct Lease {
    pub(crate) handle: ConnectionHandle,
    pub(crate) token: ConnectionToken,
}

enum PoolCommand {
    Acquire(oneshot::Sender<Result<(ConnId, ConnectionHandle)>>),
    Release(ConnId),
    CreateDone(ConnId, Result<(ConnectionHandle, oneshot::Receiver<()>)>),
    ConnectionClosed(ConnId),
    Close(oneshot::Sender<()>),
}

/// Handle used by the client façade to talk to the pool's background task.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    commands: mpsc::Sender<PoolCommand>,
}

impl PoolHandle {
    /// Spawn the pool actor and return a handle to it.
    pub(crate) fn spawn(config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let handle = PoolHandle { commands: tx.clone() };
        tokio::spawn(run(config, tx, rx));
        handle
    }

    /// Acquire a connection, creating one on demand if the pool has spare
    /// capacity, or waiting in FIFO order if not. Fails with `PoolClosed`
    /// once the pool has been closed.
    pub(crate) async fn acquire(&self) -> Result<Lease> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PoolCommand::Acquire(tx))
            .await
            .map_err(|_| Error::PoolClosed)?;
        let (id, handle) = rx.await.map_err(|_| Error::PoolClosed)??;
        Ok(Lease { handle, token: ConnectionToken(id) })
    }

    /// Return a previously acquired connection to the idle queue. Silently
    /// ignored if the pool has since closed or the slot no longer exists.
    pub(crate) fn release(&self, token: ConnectionToken) {
        let _ = self.commands.try_send(PoolCommand::Release(token.0));
    }

    /// Close the pool: stop accepting new acquires, close every tracked
    /// connection, and fail every pending acquire with `PoolClosed`.
    pub(crate) async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(PoolCommand::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run(
    config: ClientConfig,
    self_tx: mpsc::Sender<PoolCommand>,
    mut commands: mpsc::Receiver<PoolCommand>,
) {
    let capacity = config.pool_capacity;
    let (host, port) = config.environment.host_port();
    let host = host.to_string();
    let factory = ConnectionFactory::new(
        host.clone(),
        port,
        config.credentials.clone(),
        config.connect_timeout,
        config.proxy.clone(),
        config.trust_anchor_pem.clone(),
    );
    let idle_ping_interval = config.idle_ping_interval;
    let metrics = config.metrics.clone();

    let mut all: HashMap<ConnId, ConnectionHandle> = HashMap::new();
    let mut idle: VecDeque<ConnId> = VecDeque::new();
    let mut pending_acquires: VecDeque<oneshot::Sender<Result<(ConnId, ConnectionHandle)>>> = VecDeque::new();
    let mut pending_creates: usize = 0;
    let mut closed = false;
    let mut next_id: ConnId = 1;
    let mut backoff = ReconnectBackoff::new();

    let mut closed_watchers: FuturesUnordered<std::pin::Pin<Box<dyn std::future::Future<Output = ConnId> + Send>>> =
        FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;

            Some(cmd) = commands.recv() => match cmd {
                PoolCommand::Acquire(respond_to) => {
                    if closed {
                        let _ = respond_to.send(Err(Error::PoolClosed));
                        continue;
                    }

                    // Drain stale idle entries (their connection died without
                    // yet being pruned by `ConnectionClosed`) until a live one
                    // is found or the idle queue is exhausted.
                    let mut served = false;
                    while let Some(id) = idle.pop_front() {
                        match all.get(&id) {
                            Some(handle) if handle.is_alive() => {
                                let _ = respond_to.send(Ok((id, handle.clone())));
                                served = true;
                                break;
                            }
                            _ => {
                                all.remove(&id);
                            }
                        }
                    }
                    if served {
                        continue;
                    }

                    if all.len() + pending_creates < capacity {
                        pending_creates += 1;
                        let id = next_id;
                        next_id += 1;
                        let delay = backoff.current_delay();
                        spawn_create(id, factory.clone(), host.clone(), idle_ping_interval, metrics.clone(), delay, self_tx.clone());
                        pending_acquires.push_back(respond_to);
                        continue;
                    }

                    pending_acquires.push_back(respond_to);
                }

                PoolCommand::Release(id) => {
                    if !closed && all.contains_key(&id) {
                        if let Some(respond_to) = pending_acquires.pop_front() {
                            let handle = all.get(&id).unwrap().clone();
                            let _ = respond_to.send(Ok((id, handle)));
                        } else {
                            idle.push_back(id);
                        }
                    }
                }

                PoolCommand::CreateDone(id, result) => {
                    pending_creates = pending_creates.saturating_sub(1);
                    match result {
                        Ok((handle, on_closed)) => {
                            backoff.on_success();
                            closed_watchers.push(Box::pin(async move {
                                let _ = on_closed.await;
                                id
                            }));
                            all.insert(id, handle.clone());
                            if let Some(respond_to) = pending_acquires.pop_front() {
                                let _ = respond_to.send(Ok((id, handle)));
                            } else {
                                idle.push_back(id);
                            }
                        }
                        Err(e) => {
                            backoff.on_failure();
                            if let Some(respond_to) = pending_acquires.pop_front() {
                                let _ = respond_to.send(Err(e));
                            }
                        }
                    }
                }

                PoolCommand::ConnectionClosed(id) => {
                    all.remove(&id);
                    idle.retain(|existing| *existing != id);
                }

                PoolCommand::Close(done) => {
                    closed = true;
                    for (_, handle) in all.drain() {
                        handle.close();
                    }
                    idle.clear();
                    while let Some(respond_to) = pending_acquires.pop_front() {
                        let _ = respond_to.send(Err(Error::PoolClosed));
                    }
                    let _ = done.send(());
                }
            },

            Some(closed_id) = closed_watchers.next() => {
                all.remove(&closed_id);
                idle.retain(|existing| *existing != closed_id);
            }

            else => break,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_create(
    id: ConnId,
    factory: ConnectionFactory,
    host: String,
    idle_ping_interval: std::time::Duration,
    metrics: Arc<dyn MetricsListener>,
    delay: std::time::Duration,
    pool_tx: mpsc::Sender<PoolCommand>,
) {
    tokio::spawn(async move {
        wait_backoff(&host, delay).await;
        let outcome = match factory.dial().await {
            Ok(dialed) => {
                metrics.connection_created();
                let (on_closed_tx, on_closed_rx) = oneshot::channel();
                let handle = connection::spawn(
                    host.clone(),
                    dialed.send_request,
                    dialed.connection,
                    factory.credentials().clone(),
                    idle_ping_interval,
                    metrics.clone(),
                    on_closed_tx,
                );
                Ok((handle, on_closed_rx))
            }
            Err(e) => Err(e),
        };
        let _ = pool_tx.send(PoolCommand::CreateDone(id, outcome)).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApnsEnvironment;

    fn test_signing_key() -> crate::auth::SigningKey {
        crate::auth::SigningKey {
            key_id: "KEYID1234".into(),
            team_id: "TEAMID123".into(),
            private_key_pem: std::fs::read("tests/fixtures/es256_private_key.pem").unwrap(),
        }
    }

    #[tokio::test]
    async fn close_resolves_a_parked_pending_acquire_with_pool_closed() {
        // A listener that accepts the TCP connection but never speaks
        // TLS, so `factory.dial()` blocks in the handshake forever — the
        // same state a slow-to-create connection leaves the pool in
        // while the first acquire's creation is still in flight.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                std::mem::forget(socket);
            }
        });

        let config = ClientConfig::builder(ApnsEnvironment::Custom { host: "127.0.0.1".into(), port: addr.port() })
            .signing_key(test_signing_key())
            .pool_capacity(1)
            .build()
            .unwrap();
        let pool = PoolHandle::spawn(config);

        // Pins the one permitted connection creation, which never resolves.
        let first = pool.clone();
        let first_task = tokio::spawn(async move { first.acquire().await });
        tokio::task::yield_now().await;

        // Capacity is already spoken for, so this one parks in
        // `pending_acquires` rather than triggering a second create.
        let second = pool.clone();
        let second_task = tokio::spawn(async move { second.acquire().await });
        tokio::task::yield_now().await;

        pool.close().await;

        let second_result = second_task.await.unwrap();
        assert!(matches!(second_result, Err(Error::PoolClosed)));

        first_task.abort();
    }
}
