//! Mock provider implementations for testing.
//!
//! In-memory implementations of every provider trait plus deterministic
//! clock, randomness and signers, for use in unit and integration tests.

pub mod clock;
pub mod fixtures;
pub mod random;
pub mod signer;
pub mod transport;
pub mod trust_store;

pub use clock::ManualClock;
pub use random::SequenceRandom;
pub use signer::SoftwareSigner;
pub use transport::{MockTransport, TransportCall};
pub use trust_store::{MockTrustStore, TrustVerdict};
