//! Tower middleware attaching the session's access token to outgoing requests.
//!
//! # Flow
//!
//! 1. **Decide** whether the request needs authorization (optional delegate)
//! 2. **Attach** `Authorization: Bearer <access token>`, or fail with
//!    [`IdpError::TokenUnavailable`] when no token is available
//! 3. **Forward** to the inner service
//! 4. **Invalidate** the token when the response is `401 Unauthorized`,
//!    whether or not the request was authorized
//!
//! # Example
//!
//! ```ignore
//! use composable_rust_idp::interceptor::AuthorizationLayer;
//! use tower::ServiceBuilder;
//!
//! let client = ServiceBuilder::new()
//!     .layer(AuthorizationLayer::new(Arc::clone(&session)))
//!     .service(http_client);
//! ```

use crate::constants::http_auth;
use crate::error::{IdpError, InternalError, Result};
use crate::models::Token;
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};
use crate::session::IdpSession;
use http::header::AUTHORIZATION;
use http::{HeaderValue, Method, Request, Response, StatusCode, Uri};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tower::{Layer, Service};

/// Source of the access token to attach.
pub trait AccessTokenProvider: Send + Sync {
    /// Current access token, renewed if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if renewal failed in a way the caller should see.
    fn access_token(&self) -> impl Future<Output = Result<Option<Token>>> + Send;

    /// Drop the current access token.
    fn invalidate_access_token(&self);
}

impl<T, TS, S, E> AccessTokenProvider for IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    async fn access_token(&self) -> Result<Option<Token>> {
        self.auto_refreshed_token().await
    }

    fn invalidate_access_token(&self) {
        IdpSession::invalidate_access_token(self);
    }
}

/// Decides per request whether to attach the access token.
pub trait AuthorizationDelegate: Send + Sync {
    /// Whether a request to `uri` needs the access token.
    fn should_authorize(&self, method: &Method, uri: &Uri) -> bool;
}

impl<F> AuthorizationDelegate for F
where
    F: Fn(&Method, &Uri) -> bool + Send + Sync,
{
    fn should_authorize(&self, method: &Method, uri: &Uri) -> bool {
        self(method, uri)
    }
}

/// Error of an [`AuthorizationService`].
#[derive(Debug, Error)]
pub enum AuthorizationError<E> {
    /// No access token could be attached.
    #[error("Authentication failed: {0}")]
    Authentication(IdpError),

    /// The inner service failed.
    #[error("Transport failed: {0}")]
    Transport(E),
}

/// Layer attaching access tokens.
pub struct AuthorizationLayer<P> {
    provider: Arc<P>,
    delegate: Option<Arc<dyn AuthorizationDelegate>>,
}

impl<P> AuthorizationLayer<P> {
    /// Authorize every request with tokens from `provider`.
    #[must_use]
    pub const fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            delegate: None,
        }
    }

    /// Only authorize requests `delegate` accepts.
    #[must_use]
    pub fn with_delegate(mut self, delegate: impl AuthorizationDelegate + 'static) -> Self {
        self.delegate = Some(Arc::new(delegate));
        self
    }
}

impl<P> Clone for AuthorizationLayer<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            delegate: self.delegate.clone(),
        }
    }
}

impl<P> std::fmt::Debug for AuthorizationLayer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationLayer")
            .field("has_delegate", &self.delegate.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, P> Layer<S> for AuthorizationLayer<P> {
    type Service = AuthorizationService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizationService {
            inner,
            provider: Arc::clone(&self.provider),
            delegate: self.delegate.clone(),
        }
    }
}

/// Middleware service attaching access tokens.
pub struct AuthorizationService<S, P> {
    inner: S,
    provider: Arc<P>,
    delegate: Option<Arc<dyn AuthorizationDelegate>>,
}

impl<S: Clone, P> Clone for AuthorizationService<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            provider: Arc::clone(&self.provider),
            delegate: self.delegate.clone(),
        }
    }
}

impl<S: std::fmt::Debug, P> std::fmt::Debug for AuthorizationService<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<S, P, ReqBody, ResBody> Service<Request<ReqBody>> for AuthorizationService<S, P>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    P: AccessTokenProvider + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = AuthorizationError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AuthorizationError::Transport)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let provider = Arc::clone(&self.provider);
        let authorize = self
            .delegate
            .as_ref()
            .is_none_or(|delegate| delegate.should_authorize(request.method(), request.uri()));

        Box::pin(async move {
            if authorize {
                let token = provider
                    .access_token()
                    .await
                    .map_err(AuthorizationError::Authentication)?
                    .ok_or(AuthorizationError::Authentication(IdpError::TokenUnavailable))?;
                let value = HeaderValue::from_str(&format!("{} {}", http_auth::BEARER, token.access_token))
                    .map_err(|_| {
                        AuthorizationError::Authentication(InternalError::InvalidHeaderValue.into())
                    })?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }

            let response = inner.call(request).await.map_err(AuthorizationError::Transport)?;
            if response.status() == StatusCode::UNAUTHORIZED {
                tracing::info!("Received 401, invalidating access token");
                provider.invalidate_access_token();
            }
            Ok::<_, AuthorizationError<S::Error>>(response)
        })
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::IdpConfig;
    use crate::environment::IdpEnvironment;
    use crate::mocks::{ManualClock, MockTransport, MockTrustStore};
    use crate::providers::{MemoryExtAuthRequestStorage, MemoryStorage};
    use crate::session::test_support::{START, client};
    use chrono::DateTime;
    use std::convert::Infallible;
    use tower::ServiceExt;

    type Session = IdpSession<MockTransport, MockTrustStore, MemoryStorage, MemoryExtAuthRequestStorage>;

    fn session_with(token: Option<Token>) -> (Arc<Session>, Arc<MemoryStorage>) {
        let clock = ManualClock::at_timestamp(START);
        let storage = Arc::new(MemoryStorage::with_contents(token, None));
        let env = IdpEnvironment::new(
            Arc::new(MockTransport::with_clock(Arc::new(clock.clone()))),
            Arc::new(MockTrustStore::accepting()),
            Arc::clone(&storage),
            Arc::new(MemoryExtAuthRequestStorage::new()),
        )
        .with_clock(Arc::new(clock));
        (
            Arc::new(IdpSession::new(IdpConfig::default(), client(), env)),
            storage,
        )
    }

    fn token(access_token: &str) -> Token {
        Token::new(
            access_token,
            "I1",
            DateTime::from_timestamp(START + 300, 0).unwrap(),
            "https://redirect.test/erezept",
        )
    }

    /// Echoes the Authorization header back with a fixed status.
    #[derive(Clone)]
    struct Echo(StatusCode);

    impl Service<Request<()>> for Echo {
        type Response = Response<String>;
        type Error = Infallible;
        type Future = std::future::Ready<std::result::Result<Response<String>, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: Request<()>) -> Self::Future {
            let header = request
                .headers()
                .get(AUTHORIZATION)
                .map(|value| value.to_str().unwrap().to_string())
                .unwrap_or_default();
            std::future::ready(Ok(Response::builder().status(self.0).body(header).unwrap()))
        }
    }

    fn echo(status: StatusCode) -> Echo {
        Echo(status)
    }

    fn request(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_token_is_attached() {
        let (session, _) = session_with(Some(token("T1")));
        let service = AuthorizationLayer::new(session).layer(echo(StatusCode::OK));

        let response = service.oneshot(request("https://erp.test/Task")).await.unwrap();

        assert_eq!(response.body(), "Bearer T1");
    }

    #[tokio::test]
    async fn test_unauthorized_response_invalidates_token() {
        let (session, storage) = session_with(Some(token("T1")));
        let layer = AuthorizationLayer::new(session);

        let response = layer
            .layer(echo(StatusCode::UNAUTHORIZED))
            .oneshot(request("https://erp.test/Task"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(storage.token().is_none());

        let error = layer
            .layer(echo(StatusCode::OK))
            .oneshot(request("https://erp.test/Task"))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            AuthorizationError::Authentication(IdpError::TokenUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_delegate_skips_authorization() {
        let (session, storage) = session_with(Some(token("T1")));
        let layer = AuthorizationLayer::new(session)
            .with_delegate(|_: &Method, uri: &Uri| uri.path() != "/public");

        let response = layer
            .layer(echo(StatusCode::OK))
            .oneshot(request("https://erp.test/public"))
            .await
            .unwrap();
        assert_eq!(response.body(), "");

        // A 401 still invalidates, whatever the delegate decided.
        layer
            .layer(echo(StatusCode::UNAUTHORIZED))
            .oneshot(request("https://erp.test/public"))
            .await
            .unwrap();
        assert!(storage.token().is_none());
    }

    #[tokio::test]
    async fn test_skipped_request_needs_no_token() {
        let (session, _) = session_with(None);
        let layer = AuthorizationLayer::new(session).with_delegate(|_: &Method, _: &Uri| false);

        let response = layer
            .layer(echo(StatusCode::OK))
            .oneshot(request("https://erp.test/public"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_header_invalid_token_is_rejected() {
        let (session, _) = session_with(Some(token("T1\nInjected: yes")));
        let service = AuthorizationLayer::new(session).layer(echo(StatusCode::OK));

        let error = service.oneshot(request("https://erp.test/Task")).await.unwrap_err();

        assert!(matches!(
            error,
            AuthorizationError::Authentication(IdpError::Internal(InternalError::InvalidHeaderValue))
        ));
    }
}
