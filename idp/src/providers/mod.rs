//! Collaborator interfaces of an identity provider session.
//!
//! The session orchestrates the protocol; everything that touches the
//! network, persistent state or certificate trust sits behind one of these
//! traits and is injected through [`IdpEnvironment`](crate::environment::IdpEnvironment).
//!
//! ```text
//! ┌────────────────────┐      ┌──────────────────┐
//! │ IdpSession         │─────▶│ IdpTransport     │  HTTP to the IDP
//! │ - discovery        │      └──────────────────┘
//! │ - challenge        │      ┌──────────────────┐
//! │ - token lifecycle  │─────▶│ TrustStore       │  chain + OCSP
//! │ - pairing          │      └──────────────────┘
//! │ - federation       │      ┌──────────────────┐
//! │                    │─────▶│ IdpStorage       │  token, document
//! │                    │      └──────────────────┘
//! │                    │      ┌──────────────────────────┐
//! │                    │─────▶│ ExtAuthRequestStorage    │  pending federation
//! └────────────────────┘      └──────────────────────────┘
//! ```

pub mod demo;
pub mod ext_auth_storage;
pub mod storage;
pub mod transport;
pub mod trust_store;

pub use demo::DemoTransport;
pub use ext_auth_storage::{ExtAuthRequestStorage, MemoryExtAuthRequestStorage, PendingExtAuth};
pub use storage::{IdpStorage, MemoryStorage};
pub use transport::IdpTransport;
pub use trust_store::TrustStore;
