//! Device pairing documents.
//!
//! A paired device holds a key whose public part is registered with the
//! identity provider, signed by the health card. Later logins sign
//! [`AuthenticationData`] with that key instead of the card.

use crate::constants::{content_type, versions};
use crate::crypto::curve::{Certificate, PublicKey};
use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::{Jwt, JwtHeader, JwtSigner};
use crate::crypto::{CryptoBox, base64url_encode};
use crate::error::{IdpError, Result};
use crate::models::discovery::DiscoveryDocument;
use p256::pkcs8::EncodePublicKey;
use serde::{Deserialize, Serialize};

/// Authentication methods asserted by a biometric login.
const BIOMETRIC_AMR: [&str; 3] = ["mfa", "hwk", "generic-biometric"];

/// Hardware and operating system of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    /// Product name.
    pub product: String,

    /// Model identifier.
    pub model: String,

    /// Operating system.
    pub os: String,

    /// Operating system version.
    pub os_version: String,

    /// Manufacturer.
    pub manufacturer: String,
}

/// User visible device metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInformation {
    /// Device name chosen by the user.
    pub name: String,

    /// Hardware description.
    pub device_type: DeviceType,
}

/// Binding between a device key and a card certificate, signed by the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingData {
    /// Document version.
    pub pairing_data_version: String,

    /// Device key as base64url DER `SubjectPublicKeyInfo`.
    pub se_subject_public_key_info: String,

    /// Identifier of the device key.
    pub key_identifier: String,

    /// Device product name.
    pub device_product: String,

    /// Serial number of the card certificate.
    pub serialnumber: String,

    /// Issuer of the card certificate.
    pub issuer: String,

    /// End of validity of the card certificate, seconds since the epoch.
    pub not_after: i64,

    /// Card key as base64url DER `SubjectPublicKeyInfo`.
    pub auth_cert_subject_public_key_info: String,
}

impl PairingData {
    /// Describe a pairing of `device_key` with the card behind `auth_certificate`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Pairing`] if a key cannot be encoded.
    pub fn new(
        key_identifier: impl Into<String>,
        device_product: impl Into<String>,
        device_key: &PublicKey,
        auth_certificate: &Certificate,
    ) -> Result<Self> {
        Ok(Self {
            pairing_data_version: versions::PAIRING_DATA.to_string(),
            se_subject_public_key_info: subject_public_key_info(device_key)?,
            key_identifier: key_identifier.into(),
            device_product: device_product.into(),
            serialnumber: auth_certificate.serial().to_string(),
            issuer: auth_certificate.issuer().to_string(),
            not_after: auth_certificate.not_after(),
            auth_cert_subject_public_key_info: base64url_encode(
                auth_certificate.subject_public_key_info(),
            ),
        })
    }

    /// Sign with the card.
    ///
    /// # Errors
    ///
    /// Propagates signer failures.
    pub async fn sign<S: JwtSigner>(&self, signer: &S) -> Result<Jwt> {
        Jwt::sign(JwtHeader::new(signer.algorithm()), self, signer).await
    }
}

fn subject_public_key_info(key: &PublicKey) -> Result<String> {
    key.to_public_key_der()
        .map(|der| base64url_encode(der.as_bytes()))
        .map_err(|error| IdpError::Pairing(format!("public key encoding: {error}")))
}

/// Registration request of a new pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationData {
    /// Card-signed [`PairingData`].
    pub signed_pairing_data: Jwt,

    /// Card authentication certificate.
    pub auth_cert: Certificate,

    /// Metadata of the device being paired.
    pub device_information: DeviceInformation,
}

impl RegistrationData {
    /// Encrypt for the identity provider.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if sealing fails.
    pub fn encrypted(&self, document: &DiscoveryDocument, crypto: &CryptoBox) -> Result<Jwe> {
        let payload = serde_json::to_vec(self)?;
        Jwe::encrypt(
            &payload,
            document.encryption_public_key(),
            Some(content_type::JSON),
            None,
            crypto,
        )
    }
}

/// Biometric login document signed by a paired device key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationData {
    /// Document version.
    pub authentication_data_version: String,

    /// The challenge being answered, compact JWT.
    pub challenge_token: String,

    /// Card certificate the device was paired with.
    pub auth_cert: Certificate,

    /// Identifier of the paired device key.
    pub key_identifier: String,

    /// Metadata of the signing device.
    pub device_information: DeviceInformation,

    /// Asserted authentication methods.
    pub amr: Vec<String>,
}

impl AuthenticationData {
    /// Authentication methods of a biometric login.
    #[must_use]
    pub fn biometric_amr() -> Vec<String> {
        BIOMETRIC_AMR.iter().map(ToString::to_string).collect()
    }
}

/// Pairing as stored by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEntry {
    /// Device name.
    pub name: String,

    /// Card-signed pairing data, compact JWT.
    pub signed_pairing_data: String,

    /// Registration time, seconds since the epoch.
    pub creation_time: i64,
}

/// Pairings of the authenticated insurant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEntries {
    /// Registered pairings.
    pub pairing_entries: Vec<PairingEntry>,
}
