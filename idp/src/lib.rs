//! # Composable Rust Identity Provider Session
//!
//! Client-side session engine for an OpenID Connect style identity provider
//! that authenticates insurants with their health card, a paired device key
//! or a sectoral identity provider.
//!
//! ## Features
//!
//! - **Discovery**: signed discovery documents, checked against a trust store
//!   and a validity window
//! - **Challenge/response**: PKCE bound challenges signed with the health card
//! - **Token lifecycle**: encrypted exchange, single-flight SSO refresh and
//!   update streams
//! - **Pairing**: device registration and biometric login
//! - **Federation**: signed app directory and redirect based login
//! - **Middleware**: a tower layer attaching bearer tokens
//!
//! ## Architecture
//!
//! The session orchestrates the protocol. Network, storage and certificate
//! trust are injected as providers:
//!
//! ```text
//! IdpSession ──▶ IdpTransport / TrustStore / IdpStorage / ExtAuthRequestStorage
//!     │
//!     └──▶ CryptoBox (random values, JWE content keys)
//! ```
//!
//! ## Example: Health Card Login
//!
//! ```rust,ignore
//! use composable_rust_idp::*;
//!
//! let session = IdpSession::new(IdpConfig::default(), client, env);
//!
//! // Reconcile the cached discovery document before first use
//! session.connect().await;
//!
//! // 1. Fetch a challenge bound to fresh verifier, state and nonce
//! let challenge = session.request_challenge().await?;
//!
//! // 2. Sign it with the health card
//! let signed = challenge.sign(&card).await?;
//!
//! // 3. Verify and exchange the authorization code
//! let exchange = session.verify(&signed).await?;
//! let token = session.exchange(&exchange, &challenge).await?;
//!
//! assert!(session.is_logged_in().await);
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod config;
pub mod constants;
pub mod crypto;
pub mod environment;
pub mod error;
pub mod interceptor;
pub mod models;
pub mod providers;
pub mod session;

#[cfg(feature = "test-utils")]
pub mod mocks;

// Re-export main types for convenience
pub use config::{ClientConfig, IdpConfig, RandomLengths};
pub use environment::{Clock, IdpEnvironment, SystemClock};
pub use error::{IdpError, Result};
pub use interceptor::{AccessTokenProvider, AuthorizationDelegate, AuthorizationLayer};
pub use models::{
    ChallengeSession, DiscoveryDocument, ExchangeToken, KKAppDirectory, KKAppEntry, Token,
};
pub use session::{DiscoveryState, IdpSession};
