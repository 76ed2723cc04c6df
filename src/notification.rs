//! Notification, response, and rejection-reason types.

use crate::error::{Error, Result};
use std::str::FromStr;
use uuid::Uuid;

/// APNs delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Deliver immediately (header value `10`).
    Immediate,
    /// Deliver at a time that conserves battery (header value `5`).
    ConservePower,
}

impl Priority {
    pub(crate) fn header_value(self) -> &'static str {
        match self {
            Self::Immediate => "10",
            Self::ConservePower => "5",
        }
    }
}

/// `apns-push-type` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
    Voip,
    Complication,
    FileProvider,
    Mdm,
}

impl PushType {
    pub(crate) fn header_value(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
            Self::Voip => "voip",
            Self::Complication => "complication",
            Self::FileProvider => "fileprovider",
            Self::Mdm => "mdm",
        }
    }
}

/// An immutable push notification ready to be handed to the client facade.
///
/// Constructed only via [`PushNotification::builder`]; the builder enforces
/// the device-token and payload-size invariants at `build()` time so every
/// live `PushNotification` is already well-formed.
#[derive(Debug, Clone)]
pub struct PushNotification {
    device_token: String,
    topic: String,
    payload: Vec<u8>,
    expiration: Option<i64>,
    priority: Option<Priority>,
    push_type: Option<PushType>,
    collapse_id: Option<String>,
    apns_id: Option<Uuid>,
    channel_id: Option<String>,
    bundle_id: Option<String>,
}

impl PushNotification {
    /// Start building a notification for `device_token`/`topic`.
    pub fn builder(device_token: impl Into<String>, topic: impl Into<String>) -> PushNotificationBuilder {
        PushNotificationBuilder::new(device_token, topic)
    }

    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn expiration(&self) -> Option<i64> {
        self.expiration
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn push_type(&self) -> Option<PushType> {
        self.push_type
    }

    pub fn collapse_id(&self) -> Option<&str> {
        self.collapse_id.as_deref()
    }

    pub fn apns_id(&self) -> Option<Uuid> {
        self.apns_id
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn bundle_id(&self) -> Option<&str> {
        self.bundle_id.as_deref()
    }
}

/// Maximum payload size APNs accepts, per §6.
pub const MAX_PAYLOAD_BYTES: usize = 4096;

/// Builder for [`PushNotification`].
pub struct PushNotificationBuilder {
    device_token: String,
    topic: String,
    payload: Vec<u8>,
    expiration: Option<i64>,
    priority: Option<Priority>,
    push_type: Option<PushType>,
    collapse_id: Option<String>,
    apns_id: Option<Uuid>,
    channel_id: Option<String>,
    bundle_id: Option<String>,
}

impl PushNotificationBuilder {
    fn new(device_token: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            device_token: device_token.into(),
            topic: topic.into(),
            payload: Vec::new(),
            expiration: None,
            priority: None,
            push_type: None,
            collapse_id: None,
            apns_id: None,
            channel_id: None,
            bundle_id: None,
        }
    }

    /// Set the raw JSON payload bytes (the `{"aps": ...}` document).
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the expiration as a unix-seconds instant. `0` disables
    /// store-and-forward.
    pub fn expiration(mut self, unix_seconds: i64) -> Self {
        self.expiration = Some(unix_seconds);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn push_type(mut self, push_type: PushType) -> Self {
        self.push_type = Some(push_type);
        self
    }

    pub fn collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    pub fn apns_id(mut self, apns_id: Uuid) -> Self {
        self.apns_id = Some(apns_id);
        self
    }

    pub fn channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    /// Validate and build the notification.
    pub fn build(self) -> Result<PushNotification> {
        if self.device_token.is_empty() || self.device_token.len() > 200 {
            return Err(Error::Config(format!(
                "device token length {} out of range 1..=200",
                self.device_token.len()
            )));
        }
        if self.topic.is_empty() {
            return Err(Error::Config("topic must not be empty".into()));
        }
        if self.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(Error::Rejection {
                reason: RejectionReason::PayloadTooLarge,
                timestamp: None,
            });
        }
        Ok(PushNotification {
            device_token: self.device_token,
            topic: self.topic,
            payload: self.payload,
            expiration: self.expiration,
            priority: self.priority,
            push_type: self.push_type,
            collapse_id: self.collapse_id,
            apns_id: self.apns_id,
            channel_id: self.channel_id,
            bundle_id: self.bundle_id,
        })
    }
}

/// Outcome of a single `send`.
#[derive(Debug, Clone)]
pub struct PushResponse {
    /// The `apns-id` echoed by the server, or a client-synthesized UUID if
    /// the server omitted it.
    pub apns_id: Uuid,
    pub accepted: bool,
    pub rejection_reason: Option<RejectionReason>,
    /// Present only when `rejection_reason == Some(Unregistered)`.
    pub token_invalidation_time: Option<i64>,
}

impl PushResponse {
    pub(crate) fn accepted(apns_id: Uuid) -> Self {
        Self {
            apns_id,
            accepted: true,
            rejection_reason: None,
            token_invalidation_time: None,
        }
    }

    pub(crate) fn rejected(apns_id: Uuid, reason: RejectionReason, timestamp: Option<i64>) -> Self {
        Self {
            apns_id,
            accepted: false,
            rejection_reason: Some(reason),
            token_invalidation_time: if reason == RejectionReason::Unregistered {
                timestamp
            } else {
                None
            },
        }
    }
}

/// Rejection reason token, wire-compatible with APNs' `reason` field.
///
/// Every known variant's `Debug`/`Display` form IS the wire token (APNs
/// already uses PascalCase), so no rename table is needed in either
/// direction. `Other` preserves forward compatibility with reasons this
/// crate doesn't yet enumerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    BadCollapseId,
    BadDeviceToken,
    BadExpirationDate,
    BadMessageId,
    BadPriority,
    BadTopic,
    DeviceTokenNotForTopic,
    DuplicateHeaders,
    IdleTimeout,
    MissingDeviceToken,
    MissingTopic,
    PayloadEmpty,
    TopicDisallowed,
    BadCertificate,
    BadCertificateEnvironment,
    ExpiredProviderToken,
    Forbidden,
    InvalidProviderToken,
    MissingProviderToken,
    BadPath,
    MethodNotAllowed,
    Unregistered,
    PayloadTooLarge,
    TooManyProviderTokenUpdates,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    Shutdown,
    /// A reason token this crate does not (yet) enumerate by name.
    Other(String),
}

impl RejectionReason {
    /// The mock server's default `:status` for this reason, per §4.8.
    pub fn status_code(&self) -> u16 {
        use RejectionReason::*;
        match self {
            MethodNotAllowed => 405,
            BadPath => 404,
            Unregistered => 410,
            PayloadTooLarge => 413,
            MissingProviderToken | InvalidProviderToken | ExpiredProviderToken | Forbidden => 403,
            TooManyRequests => 429,
            InternalServerError | ServiceUnavailable | Shutdown => 500,
            BadCollapseId | BadDeviceToken | BadExpirationDate | BadMessageId | BadPriority
            | BadTopic | DeviceTokenNotForTopic | DuplicateHeaders | IdleTimeout
            | MissingDeviceToken | MissingTopic | PayloadEmpty | TopicDisallowed
            | BadCertificate | BadCertificateEnvironment | TooManyProviderTokenUpdates => 400,
            Other(_) => 400,
        }
    }

    fn as_str(&self) -> &str {
        use RejectionReason::*;
        match self {
            BadCollapseId => "BadCollapseId",
            BadDeviceToken => "BadDeviceToken",
            BadExpirationDate => "BadExpirationDate",
            BadMessageId => "BadMessageId",
            BadPriority => "BadPriority",
            BadTopic => "BadTopic",
            DeviceTokenNotForTopic => "DeviceTokenNotForTopic",
            DuplicateHeaders => "DuplicateHeaders",
            IdleTimeout => "IdleTimeout",
            MissingDeviceToken => "MissingDeviceToken",
            MissingTopic => "MissingTopic",
            PayloadEmpty => "PayloadEmpty",
            TopicDisallowed => "TopicDisallowed",
            BadCertificate => "BadCertificate",
            BadCertificateEnvironment => "BadCertificateEnvironment",
            ExpiredProviderToken => "ExpiredProviderToken",
            Forbidden => "Forbidden",
            InvalidProviderToken => "InvalidProviderToken",
            MissingProviderToken => "MissingProviderToken",
            BadPath => "BadPath",
            MethodNotAllowed => "MethodNotAllowed",
            Unregistered => "Unregistered",
            PayloadTooLarge => "PayloadTooLarge",
            TooManyProviderTokenUpdates => "TooManyProviderTokenUpdates",
            TooManyRequests => "TooManyRequests",
            InternalServerError => "InternalServerError",
            ServiceUnavailable => "ServiceUnavailable",
            Shutdown => "Shutdown",
            Other(s) => s,
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectionReason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use RejectionReason::*;
        Ok(match s {
            "BadCollapseId" => BadCollapseId,
            "BadDeviceToken" => BadDeviceToken,
            "BadExpirationDate" => BadExpirationDate,
            "BadMessageId" => BadMessageId,
            "BadPriority" => BadPriority,
            "BadTopic" => BadTopic,
            "DeviceTokenNotForTopic" => DeviceTokenNotForTopic,
            "DuplicateHeaders" => DuplicateHeaders,
            "IdleTimeout" => IdleTimeout,
            "MissingDeviceToken" => MissingDeviceToken,
            "MissingTopic" => MissingTopic,
            "PayloadEmpty" => PayloadEmpty,
            "TopicDisallowed" => TopicDisallowed,
            "BadCertificate" => BadCertificate,
            "BadCertificateEnvironment" => BadCertificateEnvironment,
            "ExpiredProviderToken" => ExpiredProviderToken,
            "Forbidden" => Forbidden,
            "InvalidProviderToken" => InvalidProviderToken,
            "MissingProviderToken" => MissingProviderToken,
            "BadPath" => BadPath,
            "MethodNotAllowed" => MethodNotAllowed,
            "Unregistered" => Unregistered,
            "PayloadTooLarge" => PayloadTooLarge,
            "TooManyProviderTokenUpdates" => TooManyProviderTokenUpdates,
            "TooManyRequests" => TooManyRequests,
            "InternalServerError" => InternalServerError,
            "ServiceUnavailable" => ServiceUnavailable,
            "Shutdown" => Shutdown,
            other => Other(other.to_string()),
        })
    }
}

impl serde::Serialize for RejectionReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for RejectionReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("RejectionReason::from_str is infallible"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_empty_device_token() {
        let err = PushNotification::builder("", "com.example.app").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_rejects_empty_topic() {
        let err = PushNotification::builder("aa", "").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_rejects_oversized_payload() {
        let payload = vec![b'a'; MAX_PAYLOAD_BYTES + 1];
        let err = PushNotification::builder("aa", "com.example.app")
            .payload(payload)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Rejection {
                reason: RejectionReason::PayloadTooLarge,
                ..
            }
        ));
    }

    #[test]
    fn builder_accepts_well_formed_notification() {
        let notification = PushNotification::builder("aa".repeat(32), "com.example.app")
            .payload(br#"{"aps":{"alert":"hi"}}"#.to_vec())
            .priority(Priority::Immediate)
            .push_type(PushType::Alert)
            .build()
            .unwrap();
        assert_eq!(notification.topic(), "com.example.app");
        assert_eq!(notification.priority(), Some(Priority::Immediate));
    }

    #[test]
    fn rejection_reason_roundtrips_through_wire_text() {
        for reason in [
            RejectionReason::BadDeviceToken,
            RejectionReason::Unregistered,
            RejectionReason::ExpiredProviderToken,
        ] {
            let text = reason.to_string();
            let parsed: RejectionReason = text.parse().unwrap();
            assert_eq!(parsed, reason);
        }
    }

    #[test]
    fn unknown_reason_text_round_trips_as_other() {
        let parsed: RejectionReason = "SomeFutureReason".parse().unwrap();
        assert_eq!(parsed, RejectionReason::Other("SomeFutureReason".to_string()));
        assert_eq!(parsed.to_string(), "SomeFutureReason");
    }

    #[test]
    fn token_invalidation_time_only_set_for_unregistered() {
        let id = Uuid::nil();
        let r = PushResponse::rejected(id, RejectionReason::Unregistered, Some(1_577_836_800_000));
        assert_eq!(r.token_invalidation_time, Some(1_577_836_800_000));

        let r = PushResponse::rejected(id, RejectionReason::BadDeviceToken, Some(123));
        assert_eq!(r.token_invalidation_time, None);
    }
}
