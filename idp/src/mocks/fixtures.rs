//! Fixed keys and certificates of a test identity provider.
//!
//! Self-signed P-256 certificates:
//!
//! | Role       | Subject CN         |
//! |------------|--------------------|
//! | discovery  | `disc.idp.test`    |
//! | signing    | `sig.idp.test`     |
//! | card       | `card.idp.test`    |
//! | device     | `device.idp.test`  |
//!
//! The encryption key has no certificate; it is published as a JWK.

#![allow(clippy::unwrap_used)] // Test fixtures: constant inputs that always decode

use crate::config::RandomLengths;
use crate::constants::content_type;
use crate::crypto::curve::{Certificate, SecretKey};
use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::{JwsAlgorithm, Jwt, JwtHeader, NestedJwt};
use crate::crypto::random::OsRandom;
use crate::crypto::{CryptoBox, SymmetricKey, base64url_decode};
use crate::models::{
    DeviceInformation, DeviceType, DiscoveryDocument, DiscoveryDocumentPayload, IdpChallenge,
    TokenPayload,
};
use chrono::{DateTime, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

const DISCOVERY_KEY: &str = "nLX4YNRQolT517WJaWIon9wMlba_0zIBsrmO4HtSAy8";
const SIGNING_KEY: &str = "EDL0XSoeE-X6ezkrthSmkXQsG7yExxz9su2YqRuovZM";
const CARD_KEY: &str = "ZWOrCcAdFw7yM4vUtbi1fFJRIDwabik44orS0FbIDfw";
const DEVICE_KEY: &str = "s_SyygYR9iNQTk4Vza5C6U3bU10a1RFf6xgRiKevkNs";
const ENCRYPTION_KEY: &str = "R3tFovrMoy43Eq9hPilTD-9aUFaXol9qK18vrOK3r4E";

const DISCOVERY_CERTIFICATE: &str = "MIIBxzCCAW2gAwIBAgIUWIuvNe+ABU0sW5cEKRh9AH2kYKEwCgYIKoZIzj0EAwIwODELMAkGA1UEBhMCREUxETAPBgNVBAoMCFRlc3QgSURQMRYwFAYDVQQDDA1kaXNjLmlkcC50ZXN0MCAXDTI2MTAxNjA2MjgwOVoYDzIxMjYwOTIyMDYyODA5WjA4MQswCQYDVQQGEwJERTERMA8GA1UECgwIVGVzdCBJRFAxFjAUBgNVBAMMDWRpc2MuaWRwLnRlc3QwWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAASGAB9kEa+aV8O0c8JrTZpbsGzom9YqyBOIvwZQDV83teT0XBsgnot68+cbXBGDZFQXzXJJTCXy7Qhy2c/GYPgJo1MwUTAdBgNVHQ4EFgQU6kRsPxMAQ03mbYR+6nD6QBSXNs4wHwYDVR0jBBgwFoAU6kRsPxMAQ03mbYR+6nD6QBSXNs4wDwYDVR0TAQH/BAUwAwEB/zAKBggqhkjOPQQDAgNIADBFAiBFbWwKxLxFBfTGvG+TpOgz+BRMuvQDV0BA6evzFXOczQIhALSQQdaNe3JuBUtnzYeCjiYed4Yw6o2TOoowFWdRE4bE";
const SIGNING_CERTIFICATE: &str = "MIIBxTCCAWugAwIBAgIUL40Oq1AYCM4hCckkZhuzeGDpMyUwCgYIKoZIzj0EAwIwNzELMAkGA1UEBhMCREUxETAPBgNVBAoMCFRlc3QgSURQMRUwEwYDVQQDDAxzaWcuaWRwLnRlc3QwIBcNMjYxMDE2MDYyODA5WhgPMjEyNjA5MjIwNjI4MDlaMDcxCzAJBgNVBAYTAkRFMREwDwYDVQQKDAhUZXN0IElEUDEVMBMGA1UEAwwMc2lnLmlkcC50ZXN0MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEg2/E9q4j8DZDCkb3u/9e2elJUZYOmf/6FMR5kXBhPNFtQrJYvto7fpsGID7OtUNn/ER1Dh+fujLLhS7ShlRD3qNTMFEwHQYDVR0OBBYEFPt8qOelk22vaabUgIGTJec3/bUSMB8GA1UdIwQYMBaAFPt8qOelk22vaabUgIGTJec3/bUSMA8GA1UdEwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSAAwRQIhANi0akxVjyWu9YhMxXmm8XlzBJv0U1FKq3Ahp23d8ZXGAiBdARnsz2ak1kMazA9BUb+q4KWPnFBxT1FT5VQWKej4vA==";
const CARD_CERTIFICATE: &str = "MIIByDCCAW2gAwIBAgIUDsuiUgzzMs3KKo2sBLqqmmxBpzgwCgYIKoZIzj0EAwIwODELMAkGA1UEBhMCREUxETAPBgNVBAoMCFRlc3QgSURQMRYwFAYDVQQDDA1jYXJkLmlkcC50ZXN0MCAXDTI2MTAxNjA2MjgwOVoYDzIxMjYwOTIyMDYyODA5WjA4MQswCQYDVQQGEwJERTERMA8GA1UECgwIVGVzdCBJRFAxFjAUBgNVBAMMDWNhcmQuaWRwLnRlc3QwWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAATUnsouCJWziwlHwZETCWtmsWnD4F6d6zwgU8BGfptVgtylX3TjeuJL+4T54KlcT2elPVV6Yi0lBvTAbum8FCoko1MwUTAdBgNVHQ4EFgQUco1hfqJPjkdUxqruTaTkM1g8hHswHwYDVR0jBBgwFoAUco1hfqJPjkdUxqruTaTkM1g8hHswDwYDVR0TAQH/BAUwAwEB/zAKBggqhkjOPQQDAgNJADBGAiEAlzDnqe4bgw4GelszpoWN71qtiegbXDXH3UIx9lilNXYCIQDh5fwU1rwKDnnoXD9McqjCv8eT+/Lh4UXbL8wdfH5yhw==";
const DEVICE_CERTIFICATE: &str = "MIIBzDCCAXGgAwIBAgIUEsFmJ8Oi2m78cFzllqeRyTowxrAwCgYIKoZIzj0EAwIwOjELMAkGA1UEBhMCREUxETAPBgNVBAoMCFRlc3QgSURQMRgwFgYDVQQDDA9kZXZpY2UuaWRwLnRlc3QwIBcNMjYxMDE2MDYyODA5WhgPMjEyNjA5MjIwNjI4MDlaMDoxCzAJBgNVBAYTAkRFMREwDwYDVQQKDAhUZXN0IElEUDEYMBYGA1UEAwwPZGV2aWNlLmlkcC50ZXN0MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEavT2hrOggLqjBz95APK09gq4ZMxgJR7O4ymBnyOhC/AOzo2O2wcyj5SvaNxt9H/y5KUaTimwtSMsxn6y2qWQZaNTMFEwHQYDVR0OBBYEFPFm9wCMzQKl92FYZmQmhZYzMO0jMB8GA1UdIwQYMBaAFPFm9wCMzQKl92FYZmQmhZYzMO0jMA8GA1UdEwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSQAwRgIhAJYrDY3Em1QK2O2z4pY1xMfm3g5VZbEejzAN9gx8INLFAiEA0heTWVxn4tw+0ppD8Pdn7yNjZim6YbhNO/1oXGSCHn0=";

fn secret_key(encoded: &str) -> SecretKey {
    SecretKey::from_slice(&base64url_decode(encoded).unwrap()).unwrap()
}

/// Key signing the discovery document.
#[must_use]
pub fn discovery_key() -> SecretKey {
    secret_key(DISCOVERY_KEY)
}

/// Key signing challenges, ID tokens and directories.
#[must_use]
pub fn signing_key() -> SecretKey {
    secret_key(SIGNING_KEY)
}

/// Health card key.
#[must_use]
pub fn card_key() -> SecretKey {
    secret_key(CARD_KEY)
}

/// Paired device key.
#[must_use]
pub fn device_key() -> SecretKey {
    secret_key(DEVICE_KEY)
}

/// Identity provider encryption key.
#[must_use]
pub fn encryption_key() -> SecretKey {
    secret_key(ENCRYPTION_KEY)
}

/// Certificate of [`discovery_key`].
#[must_use]
pub fn discovery_certificate() -> Certificate {
    Certificate::from_base64(DISCOVERY_CERTIFICATE).unwrap()
}

/// Certificate of [`signing_key`].
#[must_use]
pub fn signing_certificate() -> Certificate {
    Certificate::from_base64(SIGNING_CERTIFICATE).unwrap()
}

/// Certificate of [`card_key`].
#[must_use]
pub fn card_certificate() -> Certificate {
    Certificate::from_base64(CARD_CERTIFICATE).unwrap()
}

/// Certificate of [`device_key`].
#[must_use]
pub fn device_certificate() -> Certificate {
    Certificate::from_base64(DEVICE_CERTIFICATE).unwrap()
}

/// Raw `r || s` ES256 signature.
#[must_use]
pub fn sign_es256(key: &SecretKey, message: &[u8]) -> Vec<u8> {
    let signature: Signature = SigningKey::from(key).sign(message);
    signature.to_bytes().to_vec()
}

/// Sign `claims` under `header` with `key`.
#[must_use]
pub fn sign_jwt<C: Serialize>(header: JwtHeader, claims: &C, key: &SecretKey) -> Jwt {
    let unsigned = Jwt::new(header, claims).unwrap();
    let signature = sign_es256(key, unsigned.signing_input().as_bytes());
    unsigned.with_signature(signature)
}

/// Claims signed by the identity provider signing key.
#[must_use]
pub fn signed_jwt<C: Serialize>(claims: &C) -> Jwt {
    let header =
        JwtHeader::new(JwsAlgorithm::Es256).with_certificates(&[signing_certificate()]);
    sign_jwt(header, claims, &signing_key())
}

/// Endpoints of the test identity provider.
#[must_use]
pub fn discovery_payload(created_on: DateTime<Utc>, expires_on: DateTime<Utc>) -> DiscoveryDocumentPayload {
    let url = |path: &str| Url::parse(&format!("https://idp.test/{path}")).unwrap();
    DiscoveryDocumentPayload {
        authorization_endpoint: url("sign_response"),
        sso_endpoint: url("sso_response"),
        token_endpoint: url("token"),
        uri_pair: url("pairings"),
        auth_pair_endpoint: url("alt_response"),
        fed_idp_list_uri: Some(url("directory/fed_idp_list")),
        federation_authorization_endpoint: Some(url("federation_authorization")),
        issuer: Some("https://idp.test".to_string()),
        exp: expires_on.timestamp(),
        iat: created_on.timestamp(),
    }
}

/// Discovery document signed by the discovery key.
#[must_use]
pub fn discovery_document(created_on: DateTime<Utc>, expires_on: DateTime<Utc>) -> DiscoveryDocument {
    let header = JwtHeader::new(JwsAlgorithm::Es256)
        .with_kid("puk_disc_sig")
        .with_certificates(&[discovery_certificate()]);
    let jwt = sign_jwt(header, &discovery_payload(created_on, expires_on), &discovery_key());
    DiscoveryDocument::new(
        jwt,
        encryption_key().public_key().into(),
        signing_certificate(),
        created_on,
    )
    .unwrap()
}

/// The same document with its signature replaced by one from `key`.
#[must_use]
pub fn resign_discovery_document(document: &DiscoveryDocument, key: &SecretKey) -> DiscoveryDocument {
    let jwt = sign_jwt(document.backing().header().clone(), document.payload(), key);
    DiscoveryDocument::new(
        jwt,
        document.encryption_public_key().clone(),
        document.signing_certificate().clone(),
        document.created_on(),
    )
    .unwrap()
}

/// Challenge signed by the signing key, expiring at `exp`.
#[must_use]
pub fn challenge(exp: i64) -> IdpChallenge {
    IdpChallenge {
        challenge: signed_jwt(&json!({
            "exp": exp,
            "iat": exp - 180,
            "iss": "https://idp.test",
            "token_type": "challenge",
            "jti": format!("challenge-{exp}"),
        })),
        user_consent: None,
    }
}

/// Token response with both tokens encrypted under `token_key`.
#[must_use]
pub fn encrypted_token_payload(
    access_token: &Jwt,
    id_token: &Jwt,
    token_key: &SymmetricKey,
    sso_token: Option<&str>,
    expires_in: i64,
) -> TokenPayload {
    let crypto = CryptoBox::new(Arc::new(OsRandom), RandomLengths::default());
    let seal = |jwt: &Jwt| {
        let nested = serde_json::to_vec(&NestedJwt { njwt: jwt.encoded() }).unwrap();
        Jwe::encrypt_direct(&nested, token_key, Some(content_type::NESTED_JWT), &crypto).unwrap()
    };
    TokenPayload {
        access_token: seal(access_token),
        expires_in,
        id_token: seal(id_token),
        sso_token: sso_token.map(str::to_string),
        token_type: "Bearer".to_string(),
    }
}

/// Metadata of a test phone.
#[must_use]
pub fn device_information() -> DeviceInformation {
    DeviceInformation {
        name: "Test Phone".to_string(),
        device_type: DeviceType {
            product: "Phone".to_string(),
            model: "T1".to_string(),
            os: "iOS".to_string(),
            os_version: "18.0".to_string(),
            manufacturer: "Apple".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curve::EcPublicKey;

    #[test]
    fn test_certificates_match_keys() {
        let pairs = [
            (discovery_certificate(), discovery_key()),
            (signing_certificate(), signing_key()),
            (card_certificate(), card_key()),
            (device_certificate(), device_key()),
        ];
        for (certificate, key) in pairs {
            assert_eq!(certificate.public_key(), &EcPublicKey::from(key.public_key()));
        }
    }
}
