//! Elliptic curve keys, JWKs and X.509 certificates.
//!
//! Keys are held as curve-tagged affine points ([`EcPublicKey`]). Arithmetic
//! on them happens in a [`CurveBackend`](crate::crypto::backend::CurveBackend)
//! for the key's curve. Only P-256 points are checked at construction;
//! points on other curves are checked by their backend when used.

use crate::constants::jose;
use crate::crypto::{base64url_decode, base64url_encode};
use crate::error::{IdpError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use p256::elliptic_curve::sec1::{EncodedPoint, FromEncodedPoint, ToEncodedPoint};
use p256::NistP256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use x509_parser::prelude::{FromDer, X509Certificate};

pub use p256::{PublicKey, SecretKey};

/// Named curve OID of NIST P-256 (prime256v1).
const OID_P256: &str = "1.2.840.10045.3.1.7";

/// Named curve OID of brainpoolP256r1.
const OID_BRAINPOOL_P256R1: &str = "1.3.36.3.3.2.8.1.1.7";

/// SEC1 tag of an uncompressed point.
const SEC1_UNCOMPRESSED: u8 = 0x04;

/// Elliptic curves keys may live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256 (secp256r1): identity provider keys, secure enclave keys.
    P256,
    /// brainpoolP256r1: health card keys.
    BrainpoolP256r1,
}

impl Curve {
    /// JWK `crv` name.
    #[must_use]
    pub const fn jwk_name(self) -> &'static str {
        match self {
            Self::P256 => jose::CRV_P256,
            Self::BrainpoolP256r1 => jose::CRV_BP256,
        }
    }

    /// Curve of a JWK `crv` name.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] for other curves.
    pub fn from_jwk_name(name: &str) -> Result<Self> {
        match name {
            jose::CRV_P256 => Ok(Self::P256),
            jose::CRV_BP256 => Ok(Self::BrainpoolP256r1),
            other => Err(IdpError::Unsupported(Some(format!("curve {other}")))),
        }
    }

    /// Curve of a named curve OID in dotted form.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] for other curves.
    pub fn from_oid(oid: &str) -> Result<Self> {
        match oid {
            OID_P256 => Ok(Self::P256),
            OID_BRAINPOOL_P256R1 => Ok(Self::BrainpoolP256r1),
            other => Err(IdpError::Unsupported(Some(format!("curve {other}")))),
        }
    }

    /// Length in bytes of a field element.
    #[must_use]
    pub const fn coordinate_len(self) -> usize {
        match self {
            Self::P256 | Self::BrainpoolP256r1 => 32,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.jwk_name())
    }
}

/// Public key on a named curve, as affine coordinates.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EcPublicKey {
    curve: Curve,
    x: Vec<u8>,
    y: Vec<u8>,
}

impl EcPublicKey {
    /// Build a key from raw affine coordinates.
    ///
    /// Coordinates shorter than a field element are left-padded, since JWKs
    /// may omit leading zeros.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if a coordinate is too long or a
    /// P-256 point is not on the curve.
    pub fn from_coordinates(curve: Curve, x: &[u8], y: &[u8]) -> Result<Self> {
        let len = curve.coordinate_len();
        if x.len() > len || y.len() > len {
            return Err(IdpError::Unsupported(Some("coordinate length".to_string())));
        }
        let pad = |coordinate: &[u8]| {
            let mut padded = vec![0u8; len - coordinate.len()];
            padded.extend_from_slice(coordinate);
            padded
        };
        let key = Self {
            curve,
            x: pad(x),
            y: pad(y),
        };
        if curve == Curve::P256 {
            key.to_p256()?;
        }
        Ok(key)
    }

    /// Build a key from a SEC1 encoded point.
    ///
    /// Compressed points are only accepted on P-256.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decoding`] for malformed P-256 encodings
    /// - [`IdpError::Unsupported`] for compressed or off-curve points
    pub fn from_sec1(curve: Curve, bytes: &[u8]) -> Result<Self> {
        let len = curve.coordinate_len();
        match bytes.split_first() {
            Some((&SEC1_UNCOMPRESSED, coordinates)) if coordinates.len() == 2 * len => {
                let (x, y) = coordinates.split_at(len);
                Self::from_coordinates(curve, x, y)
            }
            _ if curve == Curve::P256 => PublicKey::from_sec1_bytes(bytes)
                .map(Self::from)
                .map_err(|error| IdpError::Decoding(format!("EC point: {error}"))),
            _ => Err(IdpError::Unsupported(Some(format!("{curve} point encoding")))),
        }
    }

    /// Curve of the key.
    #[must_use]
    pub const fn curve(&self) -> Curve {
        self.curve
    }

    /// Affine x coordinate, big endian, full field length.
    #[must_use]
    pub fn x(&self) -> &[u8] {
        &self.x
    }

    /// Affine y coordinate, big endian, full field length.
    #[must_use]
    pub fn y(&self) -> &[u8] {
        &self.y
    }

    /// Uncompressed SEC1 encoding.
    #[must_use]
    pub fn to_sec1(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(1 + self.x.len() + self.y.len());
        encoded.push(SEC1_UNCOMPRESSED);
        encoded.extend_from_slice(&self.x);
        encoded.extend_from_slice(&self.y);
        encoded
    }

    /// The key as a P-256 point.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] for keys on other curves or points
    /// not on P-256.
    pub fn to_p256(&self) -> Result<PublicKey> {
        if self.curve != Curve::P256 {
            return Err(IdpError::Unsupported(Some(format!("curve {}", self.curve))));
        }
        let point = EncodedPoint::<NistP256>::from_bytes(self.to_sec1())
            .map_err(|error| IdpError::Decoding(format!("EC point: {error}")))?;
        Option::from(PublicKey::from_encoded_point(&point))
            .ok_or_else(|| IdpError::Unsupported(Some("point not on P-256".to_string())))
    }
}

impl From<PublicKey> for EcPublicKey {
    fn from(public_key: PublicKey) -> Self {
        let point = public_key.to_encoded_point(false);
        Self {
            curve: Curve::P256,
            x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
            y: point.y().map(|y| y.to_vec()).unwrap_or_default(),
        }
    }
}

impl From<&PublicKey> for EcPublicKey {
    fn from(public_key: &PublicKey) -> Self {
        Self::from(*public_key)
    }
}

impl fmt::Debug for EcPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcPublicKey")
            .field("curve", &self.curve)
            .field("x", &base64url_encode(&self.x))
            .finish_non_exhaustive()
    }
}

/// Elliptic curve JSON Web Key.
///
/// Used for the identity provider's published keys and for the ephemeral
/// key in JWE headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `EC`.
    pub kty: String,

    /// Curve name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// X coordinate, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Y coordinate, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Intended use (`sig` or `enc`).
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Certificate chain, standard base64 DER, leaf first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

impl Jwk {
    /// JWK of a public key.
    #[must_use]
    pub fn from_public_key(public_key: &EcPublicKey) -> Self {
        Self {
            kty: jose::KTY_EC.to_string(),
            crv: Some(public_key.curve().jwk_name().to_string()),
            x: Some(base64url_encode(public_key.x())),
            y: Some(base64url_encode(public_key.y())),
            kid: None,
            key_use: None,
            x5c: None,
        }
    }

    /// Attach a key id.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Attach a certificate chain.
    #[must_use]
    pub fn with_certificate(mut self, certificate: &Certificate) -> Self {
        self.x5c = Some(vec![certificate.to_base64()]);
        self
    }

    /// Public key from the coordinates, or from the leaf certificate when
    /// the coordinates are absent. A missing `crv` means P-256.
    ///
    /// # Errors
    ///
    /// - [`IdpError::NoCertificateFound`] if neither coordinates nor a chain is present
    /// - [`IdpError::Unsupported`] if the curve is unknown
    /// - [`IdpError::Decoding`] if a coordinate is malformed
    pub fn public_key(&self) -> Result<EcPublicKey> {
        match (&self.x, &self.y) {
            (Some(x), Some(y)) => {
                let curve = self
                    .crv
                    .as_deref()
                    .map_or(Ok(Curve::P256), Curve::from_jwk_name)?;
                EcPublicKey::from_coordinates(curve, &base64url_decode(x)?, &base64url_decode(y)?)
            }
            _ => Ok(self.certificate()?.public_key().clone()),
        }
    }

    /// Leaf certificate of the `x5c` chain.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::NoCertificateFound`] if the chain is absent or empty.
    pub fn certificate(&self) -> Result<Certificate> {
        let leaf = self
            .x5c
            .as_ref()
            .and_then(|chain| chain.first())
            .ok_or(IdpError::NoCertificateFound)?;
        Certificate::from_base64(leaf)
    }
}

/// Parsed X.509 certificate.
///
/// Keeps the DER encoding for trust store validation and `x5c` headers,
/// plus the fields the session reads.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    spki: Vec<u8>,
    public_key: EcPublicKey,
    subject: String,
    issuer: String,
    serial: String,
    not_after: i64,
}

impl Certificate {
    /// Parse a DER encoded certificate.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decoding`] if the DER is not a certificate
    /// - [`IdpError::Unsupported`] if the subject key is not an EC key on a
    ///   known named curve
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, parsed) = X509Certificate::from_der(der)
            .map_err(|error| IdpError::Decoding(format!("X.509: {error}")))?;
        let spki = parsed.public_key();
        let curve_oid = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|parameters| parameters.as_oid().ok())
            .ok_or_else(|| IdpError::Unsupported(Some("certificate key algorithm".to_string())))?;
        let curve = Curve::from_oid(&curve_oid.to_id_string())?;
        let public_key = EcPublicKey::from_sec1(curve, &spki.subject_public_key.data)?;
        Ok(Self {
            der: der.to_vec(),
            spki: spki.raw.to_vec(),
            public_key,
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            serial: parsed.raw_serial_as_string(),
            not_after: parsed.validity().not_after.timestamp(),
        })
    }

    /// Parse a standard base64 DER certificate, as found in `x5c`.
    ///
    /// # Errors
    ///
    /// Same as [`Certificate::from_der`], plus [`IdpError::Decoding`] for bad base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let der = STANDARD
            .decode(encoded)
            .map_err(|error| IdpError::Decoding(format!("x5c: {error}")))?;
        Self::from_der(&der)
    }

    /// DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Standard base64 DER encoding.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    /// Subject public key.
    #[must_use]
    pub const fn public_key(&self) -> &EcPublicKey {
        &self.public_key
    }

    /// DER `SubjectPublicKeyInfo` of the subject key, as found in the
    /// certificate.
    #[must_use]
    pub fn subject_public_key_info(&self) -> &[u8] {
        &self.spki
    }

    /// Subject distinguished name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as colon separated hex.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// End of validity, seconds since the epoch.
    #[must_use]
    pub const fn not_after(&self) -> i64 {
        self.not_after
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl Serialize for Certificate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Certificate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::fixtures;

    #[test]
    fn test_certificate_parses_fixture() {
        let certificate = fixtures::signing_certificate();
        assert!(certificate.subject().contains("sig.idp.test"));
        assert_eq!(
            certificate.public_key(),
            &EcPublicKey::from(fixtures::signing_key().public_key())
        );
        assert_eq!(certificate.public_key().curve(), Curve::P256);
    }

    #[test]
    fn test_jwk_round_trips_public_key() {
        let public_key = EcPublicKey::from(fixtures::encryption_key().public_key());
        let jwk = Jwk::from_public_key(&public_key);
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        assert_eq!(jwk.public_key().unwrap(), public_key);
    }

    #[test]
    fn test_jwk_falls_back_to_certificate() {
        let certificate = fixtures::signing_certificate();
        let jwk = Jwk {
            kty: "EC".to_string(),
            crv: None,
            x: None,
            y: None,
            kid: Some("puk_idp_sig".to_string()),
            key_use: Some("sig".to_string()),
            x5c: Some(vec![certificate.to_base64()]),
        };
        assert_eq!(jwk.public_key().unwrap(), *certificate.public_key());
    }

    #[test]
    fn test_jwk_without_material_has_no_certificate() {
        let jwk = Jwk {
            kty: "EC".to_string(),
            crv: None,
            x: None,
            y: None,
            kid: None,
            key_use: None,
            x5c: None,
        };
        assert_eq!(jwk.public_key(), Err(IdpError::NoCertificateFound));
    }

    #[test]
    fn test_certificate_serde_is_base64_der() {
        let certificate = fixtures::discovery_certificate();
        let json = serde_json::to_string(&certificate).unwrap();
        let decoded: Certificate = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, certificate);
    }

    #[test]
    fn test_garbage_der_is_decoding_error() {
        assert!(matches!(
            Certificate::from_der(b"not a certificate"),
            Err(IdpError::Decoding(_))
        ));
    }

    #[test]
    fn test_brainpool_jwk_keeps_its_curve() {
        let x = base64url_encode(&[7u8; 32]);
        let y = base64url_encode(&[9u8; 31]);
        let jwk = Jwk {
            kty: "EC".to_string(),
            crv: Some("BP-256".to_string()),
            x: Some(x),
            y: Some(y),
            kid: None,
            key_use: None,
            x5c: None,
        };

        let public_key = jwk.public_key().unwrap();

        assert_eq!(public_key.curve(), Curve::BrainpoolP256r1);
        assert_eq!(public_key.y().len(), 32);
        assert_eq!(public_key.y()[0], 0);
        assert!(matches!(public_key.to_p256(), Err(IdpError::Unsupported(_))));
        assert_eq!(Jwk::from_public_key(&public_key).crv.as_deref(), Some("BP-256"));
    }

    #[test]
    fn test_off_curve_p256_point_is_rejected() {
        assert!(matches!(
            EcPublicKey::from_coordinates(Curve::P256, &[1u8; 32], &[2u8; 32]),
            Err(IdpError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unknown_curve_names() {
        assert!(matches!(Curve::from_jwk_name("P-384"), Err(IdpError::Unsupported(_))));
        assert_eq!(Curve::from_oid("1.3.36.3.3.2.8.1.1.7").unwrap(), Curve::BrainpoolP256r1);
    }

    #[test]
    fn test_certificate_exposes_subject_public_key_info() {
        let certificate = fixtures::device_certificate();
        let spki = certificate.subject_public_key_info();
        assert_eq!(spki[0], 0x30);
        assert!(spki.ends_with(&certificate.public_key().to_sec1()));
    }
}
