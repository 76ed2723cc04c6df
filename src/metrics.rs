//! Observability (C12): a pluggable metrics sink installed per-client,
//! never a global mutable singleton (see the design notes on
//! `NoopMetricsListener`-style statics).

/// Sink for the events the client facade and connection handler emit.
///
/// All methods have no-op default implementations; implement only the
/// ones you care about.
pub trait MetricsListener: Send + Sync {
    /// A notification's bytes were handed to the transport successfully.
    fn notification_sent(&self, _topic: &str) {}

    /// The server replied `:status 200`.
    fn notification_accepted(&self, _topic: &str) {}

    /// The server rejected the notification.
    fn notification_rejected(&self, _topic: &str, _reason: &crate::notification::RejectionReason) {}

    /// A new connection was created by the factory.
    fn connection_created(&self) {}

    /// A connection was closed (cleanly or due to error).
    fn connection_closed(&self) {}

    /// A frame write to the socket failed.
    fn write_failure(&self) {}
}

/// Default listener installed when a client isn't given one explicitly.
pub struct NoopMetricsListener;

impl MetricsListener for NoopMetricsListener {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_listener_accepts_all_events_without_panicking() {
        let listener = NoopMetricsListener;
        listener.notification_sent("com.example.app");
        listener.notification_accepted("com.example.app");
        listener.notification_rejected("com.example.app", &crate::notification::RejectionReason::BadDeviceToken);
        listener.connection_created();
        listener.connection_closed();
        listener.write_failure();
    }
}
