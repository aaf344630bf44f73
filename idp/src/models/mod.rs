//! Domain types exchanged with the identity provider.

pub mod challenge;
pub mod directory;
pub mod discovery;
pub mod ext_auth;
pub mod pairing;
pub mod token;

pub use challenge::{
    ChallengeClaims, ChallengeSession, IdpChallenge, SignedAuthenticationData, SignedChallenge,
    UserConsent,
};
pub use directory::{DirectorySchema, KKAppDirectory, KKAppEntry};
pub use discovery::{DiscoveryDocument, DiscoveryDocumentPayload};
pub use ext_auth::{ExtAuthChallengeSession, ExtAuthRequest, ExtAuthVerify};
pub use pairing::{
    AuthenticationData, DeviceInformation, DeviceType, PairingData, PairingEntries, PairingEntry,
    RegistrationData,
};
pub use token::{
    AccessTokenPayload, DecryptedTokenPayload, ExchangeToken, IdTokenPayload, KeyVerifier, Token,
    TokenPayload,
};
