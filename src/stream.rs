//! Notification-stream state (C3): a per-connection table mapping a
//! stream id to the in-flight request and its completion signal.
//!
//! Owned entirely by the connection's own task (see the concurrency
//! model's "own shared maps on one executor" guidance) — never wrapped
//! in a lock or shared across tasks.

use crate::error::Result;
use crate::notification::{PushNotification, PushResponse};
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::oneshot;

/// One in-flight notification awaiting a reply on this connection.
pub(crate) struct StreamRecord {
    pub(crate) request: PushNotification,
    pub(crate) completion: oneshot::Sender<Result<PushResponse>>,
}

/// `stream_id -> StreamRecord` table, keyed generically over whatever
/// stream-id type the transport uses (`h2::StreamId` in `connection.rs`;
/// a plain `u32` in tests, since `h2::StreamId` has no public
/// constructor). Completion is terminal: the record is removed from the
/// map as part of completing it, so a second completion attempt or a
/// late `drop` is simply a no-op (there is nothing left to find).
pub(crate) struct StreamTable<K: Eq + Hash + Copy> {
    records: HashMap<K, StreamRecord>,
}

impl<K: Eq + Hash + Copy> Default for StreamTable<K> {
    fn default() -> Self {
        Self { records: HashMap::new() }
    }
}

impl<K: Eq + Hash + Copy> StreamTable<K> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&mut self, stream_id: K, record: StreamRecord) {
        self.records.insert(stream_id, record);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove and return the record for `stream_id`, if still pending.
    fn take(&mut self, stream_id: K) -> Option<StreamRecord> {
        self.records.remove(&stream_id)
    }

    /// Complete the stream with a successful response. No-op if already
    /// completed or unknown.
    pub(crate) fn complete_success(&mut self, stream_id: K, response: PushResponse) {
        if let Some(record) = self.take(stream_id) {
            let _ = record.completion.send(Ok(response));
        }
    }

    /// Complete the stream with a domain rejection.
    pub(crate) fn complete_rejection(&mut self, stream_id: K, response: PushResponse) {
        self.complete_success(stream_id, response);
    }

    /// Complete the stream with a terminal error.
    pub(crate) fn fail(&mut self, stream_id: K, error: crate::error::Error) {
        if let Some(record) = self.take(stream_id) {
            let _ = record.completion.send(Err(error));
        }
    }

    /// Remove the record without resolving its completion signal —
    /// callers use this only when they are about to resolve it
    /// themselves (e.g. reattaching it under a new stream id for retry).
    pub(crate) fn remove_for_retry(&mut self, stream_id: K) -> Option<StreamRecord> {
        self.take(stream_id)
    }

    /// Fail every still-pending stream with `StreamClosedBeforeReply`,
    /// draining the table. Called when the connection dies.
    pub(crate) fn fail_all_pending(&mut self) {
        for (_, record) in self.records.drain() {
            let _ = record.completion.send(Err(crate::error::Error::StreamClosedBeforeReply));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::PushNotification;
    use uuid::Uuid;

    fn test_notification() -> PushNotification {
        PushNotification::builder("aa".repeat(32), "com.example.app").build().unwrap()
    }

    #[tokio::test]
    async fn complete_success_resolves_the_waiting_receiver() {
        let mut table: StreamTable<u32> = StreamTable::new();
        let (tx, rx) = oneshot::channel();
        table.attach(1, StreamRecord { request: test_notification(), completion: tx });

        table.complete_success(1, PushResponse::accepted(Uuid::new_v4()));
        let outcome = rx.await.unwrap().unwrap();
        assert!(outcome.accepted);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn completion_after_removal_is_a_no_op() {
        let mut table: StreamTable<u32> = StreamTable::new();
        let (tx, rx) = oneshot::channel();
        table.attach(3, StreamRecord { request: test_notification(), completion: tx });

        table.complete_success(3, PushResponse::accepted(Uuid::new_v4()));
        // Second completion attempt on the same id: no record left, no panic.
        table.complete_success(3, PushResponse::accepted(Uuid::new_v4()));

        let outcome = rx.await.unwrap().unwrap();
        assert!(outcome.accepted);
    }

    #[tokio::test]
    async fn fail_all_pending_resolves_every_outstanding_stream() {
        let mut table: StreamTable<u32> = StreamTable::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        table.attach(1, StreamRecord { request: test_notification(), completion: tx1 });
        table.attach(3, StreamRecord { request: test_notification(), completion: tx2 });

        table.fail_all_pending();

        assert!(matches!(rx1.await.unwrap(), Err(crate::error::Error::StreamClosedBeforeReply)));
        assert!(matches!(rx2.await.unwrap(), Err(crate::error::Error::StreamClosedBeforeReply)));
        assert!(table.is_empty());
    }
}
