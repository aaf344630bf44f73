//! End-to-end login flows against the mock identity provider.
//!
//! These tests only use the public API:
//!
//! - Health card login within the discovery document window
//! - State binding of the verify response
//! - Federation with an unknown callback state
//! - Bearer token middleware over a logged in session
//! - Demo mode

#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use composable_rust_idp::crypto::base64url_encode;
use composable_rust_idp::interceptor::AuthorizationLayer;
use composable_rust_idp::mocks::{
    ManualClock, MockTransport, MockTrustStore, SequenceRandom, SoftwareSigner, TransportCall,
};
use composable_rust_idp::providers::{
    DemoTransport, IdpStorage, MemoryExtAuthRequestStorage, MemoryStorage,
};
use composable_rust_idp::{
    ClientConfig, DiscoveryState, IdpConfig, IdpEnvironment, IdpError, IdpSession,
};
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use tower::{Layer, ServiceExt};
use url::Url;

const T: i64 = 1_700_000_000;

type Session = IdpSession<MockTransport, MockTrustStore, MemoryStorage, MemoryExtAuthRequestStorage>;

struct World {
    clock: ManualClock,
    transport: Arc<MockTransport>,
    storage: Arc<MemoryStorage>,
    session: Arc<Session>,
}

fn client() -> ClientConfig {
    ClientConfig::new(
        "eRezeptApp",
        Url::parse("https://redirect.test/erezept").unwrap(),
        Url::parse("https://redirect.test/extauth").unwrap(),
    )
}

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

fn world(random: SequenceRandom) -> World {
    let clock = ManualClock::at_timestamp(T);
    let transport = Arc::new(MockTransport::with_clock(Arc::new(clock.clone())));
    let storage = Arc::new(MemoryStorage::new());
    let env = IdpEnvironment::new(
        Arc::clone(&transport),
        Arc::new(MockTrustStore::accepting()),
        Arc::clone(&storage),
        Arc::new(MemoryExtAuthRequestStorage::new()),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_random(Arc::new(random));
    World {
        clock,
        transport,
        storage,
        session: Arc::new(IdpSession::new(IdpConfig::default(), client(), env)),
    }
}

#[tokio::test]
async fn test_card_login_within_document_window() {
    let w = world(SequenceRandom::new([vec![0xA1; 32], vec![0xB2; 16], vec![0xC3; 16]]));
    w.transport.set_discovery_window(at(T), at(T + 300));
    w.clock.advance(Duration::seconds(60));

    let challenge = w.session.request_challenge().await.unwrap();
    assert_eq!(challenge.verifier_code, base64url_encode(&[0xA1; 32]));
    assert_eq!(challenge.state, base64url_encode(&[0xB2; 16]));
    assert_eq!(challenge.nonce, base64url_encode(&[0xC3; 16]));
    assert_eq!(*w.session.discovery_state().borrow(), DiscoveryState::Valid);

    let signed = challenge.sign(&SoftwareSigner::card()).await.unwrap();
    let exchange = w.session.verify(&signed).await.unwrap();
    let token = w.session.exchange(&exchange, &challenge).await.unwrap();

    assert!(w.session.is_logged_in().await);
    assert_eq!(w.storage.token(), Some(token.clone()));
    assert_eq!(token.id_token_payload().unwrap().nonce.as_deref(), Some(challenge.nonce.as_str()));
    assert_eq!(w.transport.call_count(TransportCall::FetchDiscoveryDocument), 1);
}

#[tokio::test]
async fn test_verify_response_with_foreign_state_is_rejected() {
    let w = world(SequenceRandom::default());
    w.transport.override_state(Some("other"));

    let challenge = w.session.request_challenge().await.unwrap();
    let signed = challenge.sign(&SoftwareSigner::card()).await.unwrap();
    let error = w.session.verify(&signed).await.unwrap_err();

    assert_eq!(error, IdpError::InvalidStateParameter);
    assert!(!w.session.is_logged_in().await);
}

#[tokio::test]
async fn test_document_past_its_window_is_fetched_again() {
    let w = world(SequenceRandom::default());
    w.transport.set_discovery_window(at(T), at(T + 300));
    w.session.request_challenge().await.unwrap();

    w.clock.advance(Duration::seconds(301));
    w.transport.set_discovery_window(at(T + 301), at(T + 601));
    w.session.request_challenge().await.unwrap();

    assert_eq!(w.transport.call_count(TransportCall::FetchDiscoveryDocument), 2);
    assert_eq!(
        w.storage.discovery_document().unwrap().created_on(),
        at(T + 301)
    );
}

#[tokio::test]
async fn test_federation_callback_with_unknown_state_sends_nothing() {
    let w = world(SequenceRandom::default());
    let callback = Url::parse(
        "https://redirect.test/extauth?code=c&state=never-issued&kk_app_redirect_uri=https%3A%2F%2Fkk.test",
    )
    .unwrap();

    let error = w
        .session
        .ext_auth_verify_and_exchange(&callback, |_| Ok(()))
        .await
        .unwrap_err();

    assert_eq!(error, IdpError::ExtAuthOriginalRequestMissing);
    assert!(w.transport.calls().is_empty());
}

#[tokio::test]
async fn test_middleware_uses_logged_in_session() {
    let w = world(SequenceRandom::default());
    let challenge = w.session.request_challenge().await.unwrap();
    let signed = challenge.sign(&SoftwareSigner::card()).await.unwrap();
    let exchange = w.session.verify(&signed).await.unwrap();
    let token = w.session.exchange(&exchange, &challenge).await.unwrap();

    let service = AuthorizationLayer::new(Arc::clone(&w.session)).layer(tower::service_fn(
        |request: Request<()>| async move {
            let status = if request.headers().contains_key(http::header::AUTHORIZATION) {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::OK
            };
            Ok::<_, std::convert::Infallible>(Response::builder().status(status).body(()).unwrap())
        },
    ));
    let request = Request::builder().uri("https://erp.test/Task").body(()).unwrap();

    let response = service.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_ne!(w.storage.token(), Some(token));
    assert!(!w.session.is_logged_in().await);
}

#[tokio::test]
async fn test_demo_mode_refuses_login() {
    let session = IdpSession::new(
        IdpConfig::default(),
        client(),
        IdpEnvironment::new(
            Arc::new(DemoTransport),
            Arc::new(MockTrustStore::accepting()),
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryExtAuthRequestStorage::new()),
        ),
    );

    let error = session.request_challenge().await.unwrap_err();

    assert_eq!(error, IdpError::NotAvailableInDemoMode);
    assert_eq!(*session.discovery_state().borrow(), DiscoveryState::Invalid);
}
