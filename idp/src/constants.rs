//! Protocol constants.
//!
//! Identifiers exchanged with the identity provider on the wire.

/// PKCE parameters.
pub mod pkce {
    /// Code challenge method: `base64url(SHA-256(verifier))`.
    pub const CODE_CHALLENGE_METHOD: &str = "S256";
}

/// JOSE algorithm and encryption identifiers.
pub mod jose {
    /// Ephemeral-static ECDH with direct key agreement.
    pub const ALG_ECDH_ES: &str = "ECDH-ES";

    /// Direct use of a shared symmetric key.
    pub const ALG_DIR: &str = "dir";

    /// AES-256-GCM content encryption.
    pub const ENC_A256GCM: &str = "A256GCM";

    /// ECDSA over NIST P-256 with SHA-256.
    pub const ALG_ES256: &str = "ES256";

    /// ECDSA over brainpoolP256r1 with SHA-256.
    pub const ALG_BP256R1: &str = "BP256R1";

    /// Token type header value.
    pub const TYP_JWT: &str = "JWT";

    /// Key type of elliptic curve JWKs.
    pub const KTY_EC: &str = "EC";

    /// Curve name of P-256 JWKs.
    pub const CRV_P256: &str = "P-256";

    /// Curve name of brainpoolP256r1 JWKs.
    pub const CRV_BP256: &str = "BP-256";
}

/// Content types carried in JOSE headers.
pub mod content_type {
    /// Payload is `{"njwt": "<compact JWT>"}`.
    pub const NESTED_JWT: &str = "NJWT";

    /// Payload is a JWT or JWT claims.
    pub const JWT: &str = "JWT";

    /// Payload is plain JSON.
    pub const JSON: &str = "JSON";
}

/// Query parameters of redirect and callback URLs.
pub mod callback {
    /// Authorization state.
    pub const STATE: &str = "state";

    /// Authorization code.
    pub const CODE: &str = "code";

    /// Redirect URI of the sectoral identity provider.
    pub const KK_APP_REDIRECT_URI: &str = "kk_app_redirect_uri";

    /// SSO token handed out with an authorization code.
    pub const SSO_TOKEN: &str = "ssotoken";
}

/// HTTP authorization.
pub mod http_auth {
    /// Authorization scheme for access tokens.
    pub const BEARER: &str = "Bearer";
}

/// Versions of signed client documents.
pub mod versions {
    /// Version of `AuthenticationData` documents.
    pub const AUTHENTICATION_DATA: &str = "1.0";

    /// Version of `PairingData` documents.
    pub const PAIRING_DATA: &str = "1.0";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header_format() {
        let header = format!("{} {}", http_auth::BEARER, "T1");
        assert_eq!(header, "Bearer T1");
    }

    #[test]
    fn test_challenge_method() {
        assert_eq!(pkce::CODE_CHALLENGE_METHOD, "S256");
    }
}
