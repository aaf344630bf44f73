//! JWS compact serialization.
//!
//! `base64url(header) . base64url(payload) . base64url(signature)` without
//! padding. Signatures are raw `r || s` as required by JWS for ECDSA.

use crate::constants::{content_type, jose};
use crate::crypto::backend::Curves;
use crate::crypto::curve::{Certificate, Curve, EcPublicKey};
use crate::crypto::{base64url_decode, base64url_encode};
use crate::error::{IdpError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JWS signature algorithms a signer may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    /// ECDSA P-256 SHA-256 (secp256r1, secure enclave keys).
    Es256,
    /// ECDSA brainpoolP256r1 SHA-256 (health cards).
    Bp256r1,
}

impl JwsAlgorithm {
    /// JOSE identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Es256 => jose::ALG_ES256,
            Self::Bp256r1 => jose::ALG_BP256R1,
        }
    }

    /// Curve the signing key lives on.
    #[must_use]
    pub const fn curve(self) -> Curve {
        match self {
            Self::Es256 => Curve::P256,
            Self::Bp256r1 => Curve::BrainpoolP256r1,
        }
    }
}

impl FromStr for JwsAlgorithm {
    type Err = IdpError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            jose::ALG_ES256 => Ok(Self::Es256),
            jose::ALG_BP256R1 => Ok(Self::Bp256r1),
            other => Err(IdpError::Unsupported(Some(format!("algorithm {other}")))),
        }
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWS protected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
    /// Signature algorithm.
    pub alg: String,

    /// Token type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Content type; `NJWT` for nested tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,

    /// Key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Signer certificate chain, standard base64 DER.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

impl JwtHeader {
    /// Header for `algorithm` with `typ: JWT`.
    #[must_use]
    pub fn new(algorithm: JwsAlgorithm) -> Self {
        Self {
            alg: algorithm.as_str().to_string(),
            typ: Some(jose::TYP_JWT.to_string()),
            cty: None,
            kid: None,
            x5c: None,
        }
    }

    /// Header of a token wrapping another token.
    #[must_use]
    pub fn nested(algorithm: JwsAlgorithm) -> Self {
        Self {
            cty: Some(content_type::NESTED_JWT.to_string()),
            ..Self::new(algorithm)
        }
    }

    /// Attach a key id.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Attach the signer's certificate chain.
    #[must_use]
    pub fn with_certificates(mut self, certificates: &[Certificate]) -> Self {
        if !certificates.is_empty() {
            self.x5c = Some(certificates.iter().map(Certificate::to_base64).collect());
        }
        self
    }

    /// Declared algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] for unknown algorithms.
    pub fn algorithm(&self) -> Result<JwsAlgorithm> {
        self.alg.parse()
    }

    /// Leaf certificate of `x5c`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::NoCertificateFound`] if the header carries none.
    pub fn certificate(&self) -> Result<Certificate> {
        let leaf = self
            .x5c
            .as_ref()
            .and_then(|chain| chain.first())
            .ok_or(IdpError::NoCertificateFound)?;
        Certificate::from_base64(leaf)
    }
}

/// Signs JWS signing input on behalf of the session.
///
/// Key custody stays outside the engine: health card, secure enclave or a
/// software key all plug in here.
pub trait JwtSigner: Send + Sync {
    /// Algorithm of the produced signatures.
    fn algorithm(&self) -> JwsAlgorithm;

    /// Certificate chain announced in the `x5c` header, leaf first.
    fn certificates(&self) -> Vec<Certificate>;

    /// Sign `message`, returning a raw `r || s` signature.
    ///
    /// # Errors
    ///
    /// Implementation specific; card and biometric failures should map to
    /// [`IdpError::Biometrics`] or [`IdpError::Pairing`].
    fn sign(&self, message: &[u8]) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

/// Signed (or to-be-signed) JWT in compact form.
#[derive(Clone, PartialEq, Eq)]
pub struct Jwt {
    header: JwtHeader,
    encoded_header: String,
    encoded_payload: String,
    signature: Vec<u8>,
}

/// Claims payload of a nested token: `{"njwt": "<compact JWT>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedJwt {
    /// Compact serialization of the wrapped token.
    pub njwt: String,
}

impl Jwt {
    /// Build an unsigned token.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if header or claims fail to serialize.
    pub fn new<C: Serialize>(header: JwtHeader, claims: &C) -> Result<Self> {
        let encoded_header = base64url_encode(&serde_json::to_vec(&header)?);
        let encoded_payload = base64url_encode(&serde_json::to_vec(claims)?);
        Ok(Self {
            header,
            encoded_header,
            encoded_payload,
            signature: Vec::new(),
        })
    }

    /// Build and sign a token with `signer`.
    ///
    /// The header algorithm and `x5c` come from the signer.
    ///
    /// # Errors
    ///
    /// Propagates serialization and signer failures.
    pub async fn sign<C, S>(header: JwtHeader, claims: &C, signer: &S) -> Result<Self>
    where
        C: Serialize + Sync,
        S: JwtSigner,
    {
        let header = JwtHeader {
            alg: signer.algorithm().as_str().to_string(),
            ..header
        }
        .with_certificates(&signer.certificates());
        let unsigned = Self::new(header, claims)?;
        let signature = signer.sign(unsigned.signing_input().as_bytes()).await?;
        Ok(unsigned.with_signature(signature))
    }

    /// Parse a compact serialization.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] for anything but three base64url parts
    /// with a JSON header.
    pub fn parse(compact: &str) -> Result<Self> {
        let mut parts = compact.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdpError::Decoding("JWT must have three parts".to_string()));
        };
        let decoded_header: JwtHeader = serde_json::from_slice(&base64url_decode(header)?)?;
        base64url_decode(payload)?;
        Ok(Self {
            header: decoded_header,
            encoded_header: header.to_string(),
            encoded_payload: payload.to_string(),
            signature: base64url_decode(signature)?,
        })
    }

    /// Replace the signature.
    #[must_use]
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// Protected header.
    #[must_use]
    pub const fn header(&self) -> &JwtHeader {
        &self.header
    }

    /// `header.payload`, the bytes covered by the signature.
    #[must_use]
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.encoded_header, self.encoded_payload)
    }

    /// Raw signature.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Decoded payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] on invalid base64url.
    pub fn payload(&self) -> Result<Vec<u8>> {
        base64url_decode(&self.encoded_payload)
    }

    /// Decode the payload as JSON claims.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if the payload does not match `C`.
    pub fn decode_payload<C: DeserializeOwned>(&self) -> Result<C> {
        Ok(serde_json::from_slice(&self.payload()?)?)
    }

    /// Verify the signature against `certificate` with the built-in P-256
    /// backend only.
    ///
    /// # Errors
    ///
    /// Same as [`Jwt::verify_with`].
    pub fn verify(&self, certificate: &Certificate) -> Result<bool> {
        self.verify_with(certificate, &Curves::default())
    }

    /// Verify the signature against `certificate` using `curves`.
    ///
    /// Returns `Ok(false)` for a well-formed token whose signature does not
    /// match.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if the header names an unknown
    /// algorithm or one whose curve has no registered backend.
    pub fn verify_with(&self, certificate: &Certificate, curves: &Curves) -> Result<bool> {
        self.verify_key(certificate.public_key(), curves)
    }

    /// Verify the signature against a bare public key using `curves`.
    ///
    /// # Errors
    ///
    /// Same as [`Jwt::verify_with`].
    pub fn verify_key(&self, public_key: &EcPublicKey, curves: &Curves) -> Result<bool> {
        curves.verify(
            self.header.algorithm()?,
            public_key,
            self.signing_input().as_bytes(),
            &self.signature,
        )
    }

    /// Compact serialization.
    #[must_use]
    pub fn encoded(&self) -> String {
        format!(
            "{}.{}.{}",
            self.encoded_header,
            self.encoded_payload,
            base64url_encode(&self.signature)
        )
    }
}

impl FromStr for Jwt {
    type Err = IdpError;

    fn from_str(compact: &str) -> Result<Self> {
        Self::parse(compact)
    }
}

impl fmt::Display for Jwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}

impl fmt::Debug for Jwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwt")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl Serialize for Jwt {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded())
    }
}

impl<'de> Deserialize<'de> for Jwt {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let compact = String::deserialize(deserializer)?;
        Self::parse(&compact).map_err(serde::de::Error::custom)
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::backend::tests::RecordingBrainpool;
    use crate::mocks::SoftwareSigner;
    use crate::mocks::fixtures;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_signed_token_verifies_against_signer_certificate() {
        let signer = SoftwareSigner::card();
        let jwt = Jwt::sign(JwtHeader::new(JwsAlgorithm::Es256), &json!({"sub": "x"}), &signer)
            .await
            .unwrap();

        assert_eq!(jwt.header().alg, "ES256");
        assert!(jwt.verify(&fixtures::card_certificate()).unwrap());
        assert!(!jwt.verify(&fixtures::signing_certificate()).unwrap());
        assert_eq!(jwt.header().certificate().unwrap(), fixtures::card_certificate());
    }

    #[tokio::test]
    async fn test_compact_form_parses_back() {
        let signer = SoftwareSigner::card();
        let jwt = Jwt::sign(JwtHeader::nested(JwsAlgorithm::Es256), &json!({"njwt": "a.b.c"}), &signer)
            .await
            .unwrap();
        let parsed: Jwt = jwt.encoded().parse().unwrap();

        assert_eq!(parsed, jwt);
        assert_eq!(parsed.header().cty.as_deref(), Some("NJWT"));
        let nested: NestedJwt = parsed.decode_payload().unwrap();
        assert_eq!(nested.njwt, "a.b.c");
        assert!(parsed.verify(&fixtures::card_certificate()).unwrap());
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let jwt = Jwt::new(JwtHeader::new(JwsAlgorithm::Es256), &json!({"a": 1})).unwrap();
        let signature = fixtures::sign_es256(&fixtures::signing_key(), jwt.signing_input().as_bytes());
        let signed = jwt.with_signature(signature).encoded();
        let forged = base64url_encode(br#"{"a":2}"#);

        let mut parts: Vec<&str> = signed.split('.').collect();
        parts[1] = &forged;
        let tampered = Jwt::parse(&parts.join(".")).unwrap();
        assert!(!tampered.verify(&fixtures::signing_certificate()).unwrap());
    }

    #[test]
    fn test_brainpool_verification_is_unsupported() {
        let header = JwtHeader::new(JwsAlgorithm::Bp256r1);
        let jwt = Jwt::new(header, &json!({})).unwrap();
        assert!(matches!(
            jwt.verify(&fixtures::signing_certificate()),
            Err(IdpError::Unsupported(_))
        ));
    }

    #[test]
    fn test_brainpool_signature_uses_registered_backend() {
        let brainpool = Arc::new(RecordingBrainpool::default());
        let curves = Curves::new().with_backend(brainpool.clone());
        let jwt = Jwt::new(JwtHeader::new(JwsAlgorithm::Bp256r1), &json!({"sub": "x"}))
            .unwrap()
            .with_signature(vec![1u8; 64]);

        assert!(jwt.verify_key(&RecordingBrainpool::key(), &curves).unwrap());
        assert_eq!(
            *brainpool.verified.lock().unwrap(),
            vec![jwt.signing_input().into_bytes()]
        );
        assert!(matches!(
            jwt.verify_key(&RecordingBrainpool::key(), &Curves::default()),
            Err(IdpError::Unsupported(_))
        ));
    }

    #[test]
    fn test_malformed_compact_forms() {
        assert!(matches!(Jwt::parse("a.b"), Err(IdpError::Decoding(_))));
        assert!(matches!(Jwt::parse("a.b.c.d"), Err(IdpError::Decoding(_))));
        assert!(matches!(Jwt::parse("!!.e30.AA"), Err(IdpError::Decoding(_))));
    }
}
