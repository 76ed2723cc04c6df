//! End-to-end coverage driving a real [`ApnsClient`] against a real
//! [`MockServer`] over TLS + HTTP/2 on loopback.

use apns_sender::mock::MockServerBuilder;
use apns_sender::{
    ApnsClient, ApnsEnvironment, ClientConfig, PushNotification, RejectionReason, SigningKey,
    VerificationKey,
};
use std::net::SocketAddr;

const PRIVATE_KEY_PEM: &str = include_str!("fixtures/es256_private_key.pem");
const PUBLIC_KEY_PEM: &str = include_str!("fixtures/es256_public_key.pem");
const KEY_ID: &str = "ABC123DEFG";
const TEAM_ID: &str = "TEAM123456";
const TOPIC: &str = "com.example.app";

fn self_signed_cert() -> (Vec<u8>, Vec<u8>) {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    (generated.cert.pem().into_bytes(), generated.key_pair.serialize_pem().into_bytes())
}

fn signing_key() -> SigningKey {
    SigningKey {
        key_id: KEY_ID.to_string(),
        team_id: TEAM_ID.to_string(),
        private_key_pem: PRIVATE_KEY_PEM.as_bytes().to_vec(),
    }
}

fn verification_key() -> VerificationKey {
    VerificationKey {
        key_id: KEY_ID.to_string(),
        team_id: TEAM_ID.to_string(),
        public_key_pem: PUBLIC_KEY_PEM.as_bytes().to_vec(),
    }
}

fn client_for(addr: SocketAddr, cert_pem: &[u8]) -> ApnsClient {
    let config = ClientConfig::builder(ApnsEnvironment::Custom { host: "localhost".into(), port: addr.port() })
        .signing_key(signing_key())
        .trust_anchor(cert_pem.to_vec())
        .build()
        .unwrap();
    ApnsClient::new(config)
}

#[tokio::test]
async fn accepts_a_registered_device_token() {
    let (cert_pem, key_pem) = self_signed_cert();
    let device_token = "aa".repeat(32);
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), [TOPIC.to_string()])
        .register_device_token(TOPIC, &device_token, None)
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder(device_token, TOPIC)
        .payload(br#"{"aps":{"alert":"hi"}}"#.to_vec())
        .build()
        .unwrap();

    let response = client.send(notification).await.unwrap();
    assert!(response.accepted);
    assert!(response.rejection_reason.is_none());

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn rejects_an_unregistered_device_token_with_invalidation_time() {
    let (cert_pem, key_pem) = self_signed_cert();
    let device_token = "bb".repeat(32);
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), [TOPIC.to_string()])
        .register_device_token(TOPIC, &device_token, Some(1_577_836_800_000))
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder(device_token, TOPIC).build().unwrap();

    let response = client.send(notification).await.unwrap();
    assert!(!response.accepted);
    assert_eq!(response.rejection_reason, Some(RejectionReason::Unregistered));
    assert_eq!(response.token_invalidation_time, Some(1_577_836_800_000));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn rejects_a_device_token_not_registered_for_the_topic() {
    let (cert_pem, key_pem) = self_signed_cert();
    let device_token = "cc".repeat(32);
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), [TOPIC.to_string()])
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder(device_token, TOPIC).build().unwrap();

    let response = client.send(notification).await.unwrap();
    assert!(!response.accepted);
    assert_eq!(response.rejection_reason, Some(RejectionReason::DeviceTokenNotForTopic));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn rejects_a_provider_token_for_a_topic_its_key_cannot_send_to() {
    let (cert_pem, key_pem) = self_signed_cert();
    let device_token = "dd".repeat(32);
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), ["com.other.app".to_string()])
        .register_device_token(TOPIC, &device_token, None)
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder(device_token, TOPIC).build().unwrap();

    let response = client.send(notification).await.unwrap();
    assert!(!response.accepted);
    assert_eq!(response.rejection_reason, Some(RejectionReason::InvalidProviderToken));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn emulate_internal_errors_mode_always_responds_500() {
    let (cert_pem, key_pem) = self_signed_cert();
    let device_token = "ee".repeat(32);
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), [TOPIC.to_string()])
        .register_device_token(TOPIC, &device_token, None)
        .emulate_internal_errors(true)
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder(device_token, TOPIC).build().unwrap();

    let err = client.send(notification).await.unwrap_err();
    assert!(matches!(err, apns_sender::Error::ServerError));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn payload_too_large_is_rejected_client_side_before_any_connection() {
    let (cert_pem, key_pem) = self_signed_cert();
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), [TOPIC.to_string()])
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let oversized = vec![b'a'; apns_sender::MAX_PAYLOAD_BYTES + 1];
    let err = PushNotification::builder("ff".repeat(32), TOPIC).payload(oversized).build().unwrap_err();
    assert!(matches!(
        err,
        apns_sender::Error::Rejection { reason: RejectionReason::PayloadTooLarge, .. }
    ));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn retries_transparently_past_an_expired_provider_token_rejection() {
    let (cert_pem, key_pem) = self_signed_cert();
    let device_token = "11".repeat(32);
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), [TOPIC.to_string()])
        .register_device_token(TOPIC, &device_token, None)
        .fail_first_attempt(&device_token, 403, RejectionReason::ExpiredProviderToken)
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder(device_token, TOPIC).build().unwrap();

    // The first attempt is force-rejected `ExpiredProviderToken`; the
    // connection retries under a fresh provider token transparently, so
    // the caller only ever observes the eventual acceptance.
    let response = client.send(notification).await.unwrap();
    assert!(response.accepted);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn retries_transparently_past_a_refused_stream() {
    let (cert_pem, key_pem) = self_signed_cert();
    let device_token = "22".repeat(32);
    let server = MockServerBuilder::new(cert_pem.clone(), key_pem)
        .register_verification_key(verification_key(), [TOPIC.to_string()])
        .register_device_token(TOPIC, &device_token, None)
        .refuse_first_stream(&device_token)
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder(device_token, TOPIC).build().unwrap();

    // The first stream opened for this token is reset with
    // `REFUSED_STREAM`; the connection reattaches the same notification
    // under a new stream id, so the caller sees a clean acceptance.
    let response = client.send(notification).await.unwrap();
    assert!(response.accepted);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn local_addr_reports_the_bound_ephemeral_port() {
    let (cert_pem, key_pem) = self_signed_cert();
    let server = MockServerBuilder::new(cert_pem, key_pem).start("127.0.0.1:0".parse().unwrap()).await.unwrap();
    assert_ne!(server.local_addr().port(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn benchmark_variant_accepts_unconditionally_without_registration() {
    let (cert_pem, key_pem) = self_signed_cert();
    let server = apns_sender::mock::start_benchmark_server("127.0.0.1:0".parse().unwrap(), &cert_pem, &key_pem)
        .await
        .unwrap();

    let client = client_for(server.local_addr(), &cert_pem);
    let notification = PushNotification::builder("00".repeat(32), "com.never.registered").build().unwrap();

    let response = client.send(notification).await.unwrap();
    assert!(response.accepted);

    client.close().await;
    server.shutdown().await;
}
