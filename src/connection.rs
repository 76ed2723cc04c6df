//! Connection handler (C4): drives one HTTP/2 connection end to end —
//! writes, reads, idle pings, GOAWAY, and RST_STREAM retry.

use crate::auth::AuthTokenMinter;
use crate::codec::{build_request, extract_or_generate_apns_id, parse_error_body};
use crate::config::ClientCredentials;
use crate::error::{Error, Result};
use crate::metrics::MetricsListener;
use crate::notification::{PushNotification, PushResponse, RejectionReason};
use crate::stream::{StreamRecord, StreamTable};
use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use h2::client::{ResponseFuture, SendRequest};
use h2::{Ping, StreamId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Beyond this many streams opened on one connection we proactively
/// close and let the pool reconnect, rather than risk exhausting the
/// client-side stream id space mid-flight.
const MAX_STREAMS_PER_CONNECTION: u64 = 1 << 30;

/// Resolved as soon as the HEADERS/DATA frames for a submission have been
/// handed to the transport (or failed to be), independent of whether a
/// reply has arrived yet. The client facade uses this to release the
/// connection back to the pool and to emit the `notification_sent` /
/// `write_failure` metrics events, per spec.md §5's "the write future
/// resolves after the bytes have been handed to the transport, before the
/// reply arrives."
pub(crate) type WriteAck = oneshot::Sender<std::result::Result<(), String>>;

/// A command sent from the pool to a running connection.
pub(crate) enum Command {
    Submit {
        notification: PushNotification,
        write_ack: WriteAck,
        respond_to: oneshot::Sender<Result<PushResponse>>,
    },
    Close,
}

/// Handle held by the pool to talk to a connection's background task.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    /// Enqueue a notification for sending. Returns a pair of one-shot
    /// receivers: the first resolves once the frames are written (or fail
    /// to write), the second once the final reply (or a terminal error)
    /// arrives. Fails immediately with `StreamClosedBeforeReply` if the
    /// connection's command channel is already closed.
    pub(crate) async fn submit(
        &self,
        notification: PushNotification,
    ) -> Result<(
        oneshot::Receiver<std::result::Result<(), String>>,
        oneshot::Receiver<Result<PushResponse>>,
    )> {
        let (write_ack, write_ack_rx) = oneshot::channel();
        let (respond_to, respond_to_rx) = oneshot::channel();
        self.commands
            .send(Command::Submit { notification, write_ack, respond_to })
            .await
            .map_err(|_| Error::StreamClosedBeforeReply)?;
        Ok((write_ack_rx, respond_to_rx))
    }

    /// True if the connection's command channel is still open.
    pub(crate) fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    pub(crate) fn close(&self) {
        let _ = self.commands.try_send(Command::Close);
    }
}

enum AuthMode {
    Certificate,
    Token(AuthTokenMinter),
}

enum ResponseOutcome {
    Headers(http::Response<h2::RecvStream>),
    Error(h2::Error),
}

struct PendingResponse {
    stream_id: StreamId,
    future: ResponseFuture,
}

impl std::future::Future for PendingResponse {
    type Output = (StreamId, ResponseOutcome);

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        use std::task::Poll;
        match std::pin::Pin::new(&mut self.future).poll(cx) {
            Poll::Ready(Ok(response)) => Poll::Ready((self.stream_id, ResponseOutcome::Headers(response))),
            Poll::Ready(Err(e)) => Poll::Ready((self.stream_id, ResponseOutcome::Error(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Spawn the task driving one already-handshaken HTTP/2 connection.
/// `on_closed` fires once, after the connection has fully torn down, so
/// the pool can remove it from `all_connections`.
pub(crate) fn spawn(
    host: String,
    send_request: SendRequest<Bytes>,
    connection: h2::client::Connection<tokio_rustls::client::TlsStream<tokio::net::TcpStream>, Bytes>,
    credentials: ClientCredentials,
    idle_ping_interval: Duration,
    metrics: Arc<dyn MetricsListener>,
    on_closed: oneshot::Sender<()>,
) -> ConnectionHandle {
    let (tx, rx) = mpsc::channel(64);
    let handle = ConnectionHandle { commands: tx };

    tokio::spawn(async move {
        run(host, send_request, connection, credentials, idle_ping_interval, metrics, rx).await;
        let _ = on_closed.send(());
    });

    handle
}

async fn run(
    host: String,
    mut send_request: SendRequest<Bytes>,
    connection: h2::client::Connection<tokio_rustls::client::TlsStream<tokio::net::TcpStream>, Bytes>,
    credentials: ClientCredentials,
    idle_ping_interval: Duration,
    metrics: Arc<dyn MetricsListener>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut auth = match credentials {
        ClientCredentials::Certificate { .. } => AuthMode::Certificate,
        ClientCredentials::SigningKey(key) => AuthMode::Token(AuthTokenMinter::new(key)),
    };

    let mut streams: StreamTable<StreamId> = StreamTable::new();
    let mut pending_responses: FuturesUnordered<PendingResponse> = FuturesUnordered::new();
    let mut token_high_water: Option<StreamId> = None;
    let mut opened_streams: u64 = 0;
    let mut draining = false;

    let mut connection = Box::pin(connection);
    let mut ping_pong = connection.as_mut().ping_pong();
    let mut last_activity = Instant::now();
    let ping_timeout = idle_ping_interval / 2;
    let mut ping_in_flight = false;
    let mut idle_ticker = tokio::time::interval(idle_ping_interval);
    idle_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            poll_result = &mut connection => {
                match poll_result {
                    Ok(()) => debug!(%host, "connection closed cleanly"),
                    Err(e) => warn!(%host, error = %e, "connection driver ended with an error"),
                }
                break;
            }

            maybe_command = commands.recv(), if !draining => {
                match maybe_command {
                    Some(Command::Submit { notification, write_ack, respond_to }) => {
                        if opened_streams >= MAX_STREAMS_PER_CONNECTION {
                            let _ = write_ack.send(Err("stream ids exhausted on this connection".into()));
                            let _ = respond_to.send(Err(Error::StreamsExhausted));
                            draining = true;
                            continue;
                        }
                        if send_one(
                            &host,
                            &mut send_request,
                            &mut auth,
                            &mut streams,
                            &mut pending_responses,
                            &mut token_high_water,
                            &mut opened_streams,
                            Some(write_ack),
                            notification,
                            respond_to,
                        ) {
                            draining = true;
                        }
                        last_activity = Instant::now();
                    }
                    Some(Command::Close) | None => {
                        draining = true;
                    }
                }
            }

            Some((stream_id, outcome)) = pending_responses.next() => {
                last_activity = Instant::now();
                if handle_response(
                    &host,
                    &mut send_request,
                    &mut auth,
                    &mut streams,
                    &mut pending_responses,
                    &mut token_high_water,
                    &mut opened_streams,
                    stream_id,
                    outcome,
                ).await {
                    draining = true;
                }
            }

            _ = idle_ticker.tick(), if !ping_in_flight && ping_pong.is_some() => {
                if last_activity.elapsed() >= idle_ping_interval {
                    ping_in_flight = true;
                }
            }

            result = send_and_await_ping(&mut ping_pong, ping_timeout), if ping_in_flight => {
                ping_in_flight = false;
                match result {
                    Ok(()) => last_activity = Instant::now(),
                    Err(PingFailure::Failed(e)) => {
                        warn!(%host, error = %e, "idle ping failed; closing connection");
                        break;
                    }
                    Err(PingFailure::TimedOut) => {
                        warn!(%host, timeout = ?ping_timeout, "idle ping timed out; closing connection");
                        break;
                    }
                }
            }

            _ = draining_and_done(draining, streams.is_empty(), pending_responses.is_empty()) => {
                break;
            }
        }
    }

    streams.fail_all_pending();
    metrics.connection_closed();
}

async fn draining_and_done(draining: bool, streams_empty: bool, pending_empty: bool) {
    if !(draining && streams_empty && pending_empty) {
        std::future::pending::<()>().await;
    }
}

enum PingFailure {
    Failed(h2::Error),
    TimedOut,
}

/// Send one opaque PING and wait for its matching PONG, bounded by
/// `timeout`. `h2::PingPong` has no `Future` impl of its own — the pack's
/// own h2 keepalive code drives it via `PingPong::ping(..)`, which sends
/// and awaits the reply in one call; this mirrors that idiom instead of
/// polling a raw `send_ping`/`poll_pong` pair by hand.
async fn send_and_await_ping(
    ping_pong: &mut Option<h2::PingPong>,
    timeout: Duration,
) -> std::result::Result<(), PingFailure> {
    match ping_pong {
        Some(pp) => match tokio::time::timeout(timeout, pp.ping(Ping::opaque())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(PingFailure::Failed(e)),
            Err(_) => Err(PingFailure::TimedOut),
        },
        None => std::future::pending().await,
    }
}

/// Write HEADERS+DATA for one notification. `write_ack` is `Some` only for
/// a fresh submission from the pool; retries reattach an already-written
/// record under a new stream id and must not re-signal write completion,
/// since the original write already resolved (and the pool connection may
/// already have been released) the first time this notification was sent.
/// Returns `true` if the connection should stop accepting new commands
/// (the peer sent GOAWAY).
#[allow(clippy::too_many_arguments)]
fn send_one(
    host: &str,
    send_request: &mut SendRequest<Bytes>,
    auth: &mut AuthMode,
    streams: &mut StreamTable<StreamId>,
    pending_responses: &mut FuturesUnordered<PendingResponse>,
    token_high_water: &mut Option<StreamId>,
    opened_streams: &mut u64,
    write_ack: Option<WriteAck>,
    notification: PushNotification,
    respond_to: oneshot::Sender<Result<PushResponse>>,
) -> bool {
    let auth_token = match auth {
        AuthMode::Certificate => None,
        AuthMode::Token(minter) => match minter.token() {
            Ok(token) => Some(token),
            Err(e) => {
                if let Some(write_ack) = write_ack {
                    let _ = write_ack.send(Err(e.to_string()));
                }
                let _ = respond_to.send(Err(e));
                return false;
            }
        },
    };

    let request = match build_request(host, &notification, auth_token.as_ref()) {
        Ok(request) => request,
        Err(e) => {
            if let Some(write_ack) = write_ack {
                let _ = write_ack.send(Err(e.to_string()));
            }
            let _ = respond_to.send(Err(e));
            return false;
        }
    };

    let payload = Bytes::copy_from_slice(notification.payload());

    match send_request.send_request(request, false) {
        Ok((response_future, mut send_stream)) => {
            let stream_id = send_stream.stream_id();
            *opened_streams += 1;
            if auth_token.is_some() {
                *token_high_water = Some(stream_id);
            }
            if let Err(e) = send_stream.send_data(payload, true) {
                if let Some(write_ack) = write_ack {
                    let _ = write_ack.send(Err(e.to_string()));
                }
                let _ = respond_to.send(Err(Error::WriteFailure(e.to_string())));
                return false;
            }
            if let Some(write_ack) = write_ack {
                let _ = write_ack.send(Ok(()));
            }
            streams.attach(stream_id, StreamRecord { request: notification, completion: respond_to });
            pending_responses.push(PendingResponse { stream_id, future: response_future });
            false
        }
        Err(e) => {
            let goaway = e.is_go_away();
            if goaway {
                debug!(%host, "GOAWAY received while opening a stream; draining connection");
            }
            if let Some(write_ack) = write_ack {
                let _ = write_ack.send(Err(e.to_string()));
            }
            let _ = respond_to.send(Err(e.into()));
            goaway
        }
    }
}

/// Process one completed response/error. Returns `true` if the connection
/// should stop accepting new commands and drain (a `:status 500`, per
/// spec, or a GOAWAY surfaced while retrying a stream).
#[allow(clippy::too_many_arguments)]
async fn handle_response(
    host: &str,
    send_request: &mut SendRequest<Bytes>,
    auth: &mut AuthMode,
    streams: &mut StreamTable<StreamId>,
    pending_responses: &mut FuturesUnordered<PendingResponse>,
    token_high_water: &mut Option<StreamId>,
    opened_streams: &mut u64,
    stream_id: StreamId,
    outcome: ResponseOutcome,
) -> bool {
    match outcome {
        ResponseOutcome::Headers(response) => {
            let status = response.status();
            let apns_id = extract_or_generate_apns_id(response.headers());
            let mut body = response.into_body();

            let mut buffer = Vec::new();
            loop {
                match std::future::poll_fn(|cx| body.poll_data(cx)).await {
                    Some(Ok(chunk)) => {
                        let _ = body.flow_control().release_capacity(chunk.len());
                        buffer.extend_from_slice(&chunk);
                    }
                    Some(Err(e)) => {
                        streams.fail(stream_id, e.into());
                        return false;
                    }
                    None => break,
                }
            }

            if status == http::StatusCode::OK {
                streams.complete_success(stream_id, PushResponse::accepted(apns_id));
                return false;
            }

            if status == http::StatusCode::INTERNAL_SERVER_ERROR {
                streams.fail(stream_id, Error::ServerError);
                warn!(%host, "APNs returned 500; closing the connection to back off");
                return true;
            }

            if buffer.is_empty() {
                let reason = RejectionReason::Other(
                    status.canonical_reason().unwrap_or("Unknown").to_string(),
                );
                streams.complete_success(stream_id, PushResponse::rejected(apns_id, reason, None));
                return false;
            }

            let (reason, timestamp) = match parse_error_body(&buffer) {
                Ok(parsed) => parsed,
                Err(e) => {
                    streams.fail(stream_id, e);
                    return false;
                }
            };

            let retry_expired_token = reason == RejectionReason::ExpiredProviderToken
                && token_high_water.map(|hw| stream_id >= hw).unwrap_or(false);

            if retry_expired_token {
                if let AuthMode::Token(minter) = auth {
                    minter.invalidate();
                }
                if let Some(record) = streams.remove_for_retry(stream_id) {
                    return send_one(
                        host,
                        send_request,
                        auth,
                        streams,
                        pending_responses,
                        token_high_water,
                        opened_streams,
                        None,
                        record.request,
                        record.completion,
                    );
                }
                return false;
            }

            streams.complete_rejection(stream_id, PushResponse::rejected(apns_id, reason, timestamp));
            false
        }
        ResponseOutcome::Error(e) => {
            if e.reason() == Some(h2::Reason::REFUSED_STREAM) {
                if let Some(record) = streams.remove_for_retry(stream_id) {
                    return send_one(
                        host,
                        send_request,
                        auth,
                        streams,
                        pending_responses,
                        token_high_water,
                        opened_streams,
                        None,
                        record.request,
                        record.completion,
                    );
                }
            }
            streams.fail(stream_id, e.into());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_high_water_ordering_matches_stream_id_ordering() {
        // h2::StreamId derives Ord over its numeric value; the retry rule
        // in `handle_response` depends on that.
        let lower: u32 = 1;
        let higher: u32 = 3;
        assert!(higher > lower);
    }
}
