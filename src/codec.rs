//! Payload/header encoder (C2): builds the HEADERS for one notification
//! request and decodes the JSON error body APNs sends with rejections.

use crate::auth::AuthToken;
use crate::error::Result;
use crate::notification::{PushNotification, RejectionReason};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build the `http::Request` carrying the pseudo-headers and `apns-*`
/// headers for one notification. The body (the JSON payload) is written
/// separately via `h2::SendStream::send_data`.
pub fn build_request(
    host: &str,
    notification: &PushNotification,
    auth_token: Option<&AuthToken>,
) -> Result<http::Request<()>> {
    let uri: http::Uri = format!("https://{}/3/device/{}", host, notification.device_token())
        .parse()
        .map_err(|e| crate::error::Error::Config(format!("invalid request URI: {e}")))?;

    let mut builder = http::Request::builder()
        .method(http::Method::POST)
        .uri(uri)
        .version(http::Version::HTTP_2);

    {
        let headers = builder.headers_mut().expect("request builder has no error yet");

        headers.insert(
            "apns-expiration",
            http::HeaderValue::from_str(&notification.expiration().unwrap_or(0).to_string())?,
        );
        headers.insert("apns-topic", http::HeaderValue::from_str(notification.topic())?);

        if let Some(priority) = notification.priority() {
            headers.insert("apns-priority", http::HeaderValue::from_static(priority.header_value()));
        }
        if let Some(collapse_id) = notification.collapse_id() {
            headers.insert("apns-collapse-id", http::HeaderValue::from_str(collapse_id)?);
        }
        if let Some(push_type) = notification.push_type() {
            headers.insert("apns-push-type", http::HeaderValue::from_static(push_type.header_value()));
        }
        if let Some(apns_id) = notification.apns_id() {
            headers.insert("apns-id", http::HeaderValue::from_str(&apns_id.to_string())?);
        }
        if let Some(channel_id) = notification.channel_id() {
            headers.insert("apns-channel-id", http::HeaderValue::from_str(channel_id)?);
        }
        if let Some(bundle_id) = notification.bundle_id() {
            headers.insert("apns-bundle-id", http::HeaderValue::from_str(bundle_id)?);
        }
        if let Some(token) = auth_token {
            let value = format!("bearer {}", token.encoded_jwt);
            let mut header_value = http::HeaderValue::from_str(&value)?;
            header_value.set_sensitive(true);
            headers.insert(http::header::AUTHORIZATION, header_value);
        }
    }

    Ok(builder.body(())?)
}

/// Wire shape of APNs' rejection body: `{"reason": "...", "timestamp": ms?}`.
#[derive(Serialize, Deserialize)]
struct ErrorBody {
    reason: RejectionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
}

/// Parse a rejection body into `(reason, timestamp)`.
pub fn parse_error_body(body: &[u8]) -> Result<(RejectionReason, Option<i64>)> {
    let parsed: ErrorBody = serde_json::from_slice(body)?;
    Ok((parsed.reason, parsed.timestamp))
}

/// Serialize a rejection as the bytes APNs (or the mock server) would send.
pub fn encode_error_body(reason: &RejectionReason, timestamp: Option<i64>) -> Vec<u8> {
    let body = ErrorBody { reason: reason.clone(), timestamp };
    serde_json::to_vec(&body).expect("ErrorBody serialization cannot fail")
}

/// Extract `apns-id` from a response's headers, generating one if absent.
pub fn extract_or_generate_apns_id(headers: &http::HeaderMap) -> Uuid {
    headers
        .get("apns-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{Priority, PushNotification, PushType};

    #[test]
    fn build_request_sets_required_pseudo_and_apns_headers() {
        let notification = PushNotification::builder("aa".repeat(32), "com.example.app")
            .payload(br#"{"aps":{"alert":"hi"}}"#.to_vec())
            .priority(Priority::Immediate)
            .push_type(PushType::Alert)
            .collapse_id("c1")
            .build()
            .unwrap();

        let request = build_request("api.push.apple.com", &notification, None).unwrap();
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri().path(), format!("/3/device/{}", "aa".repeat(32)));
        assert_eq!(request.headers().get("apns-topic").unwrap(), "com.example.app");
        assert_eq!(request.headers().get("apns-priority").unwrap(), "10");
        assert_eq!(request.headers().get("apns-push-type").unwrap(), "alert");
        assert_eq!(request.headers().get("apns-collapse-id").unwrap(), "c1");
        assert_eq!(request.headers().get("apns-expiration").unwrap(), "0");
        assert!(request.headers().get(http::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn build_request_attaches_bearer_auth_when_token_present() {
        let notification = PushNotification::builder("aa".repeat(32), "com.example.app")
            .build()
            .unwrap();
        let token = AuthToken {
            key_id: "K1".into(),
            team_id: "T1".into(),
            issued_at: 0,
            encoded_jwt: "header.claims.sig".into(),
        };

        let request = build_request("api.push.apple.com", &notification, Some(&token)).unwrap();
        assert_eq!(
            request.headers().get(http::header::AUTHORIZATION).unwrap(),
            "bearer header.claims.sig"
        );
    }

    #[test]
    fn parse_error_body_round_trips_unregistered_with_timestamp() {
        let body = encode_error_body(&RejectionReason::Unregistered, Some(1_577_836_800_000));
        let (reason, timestamp) = parse_error_body(&body).unwrap();
        assert_eq!(reason, RejectionReason::Unregistered);
        assert_eq!(timestamp, Some(1_577_836_800_000));
    }

    #[test]
    fn parse_error_body_omits_timestamp_when_absent() {
        let body = encode_error_body(&RejectionReason::BadDeviceToken, None);
        assert!(!String::from_utf8_lossy(&body).contains("timestamp"));
        let (reason, timestamp) = parse_error_body(&body).unwrap();
        assert_eq!(reason, RejectionReason::BadDeviceToken);
        assert_eq!(timestamp, None);
    }

    #[test]
    fn extract_or_generate_apns_id_falls_back_to_fresh_uuid() {
        let headers = http::HeaderMap::new();
        let id = extract_or_generate_apns_id(&headers);
        assert_ne!(id, Uuid::nil());
    }
}
