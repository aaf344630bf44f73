//! Property tests for the time windows and bindings every login relies on.

#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use composable_rust_idp::RandomLengths;
use composable_rust_idp::crypto::CryptoBox;
use composable_rust_idp::crypto::curve::EcPublicKey;
use composable_rust_idp::crypto::jwe::Jwe;
use composable_rust_idp::crypto::random::OsRandom;
use composable_rust_idp::mocks::fixtures;
use composable_rust_idp::models::ChallengeSession;
use composable_rust_idp::{DiscoveryDocument, Token};
use proptest::prelude::*;
use std::sync::Arc;

const T: i64 = 1_700_000_000;
const DAY: i64 = 24 * 60 * 60;

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

fn document(created_on: i64, expires_on: i64) -> DiscoveryDocument {
    fixtures::discovery_document(at(created_on), at(expires_on))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn discovery_window_is_bounded_by_expiry_and_max_age(
        lifetime in 0i64..(3 * DAY),
        offset in -DAY..(3 * DAY),
    ) {
        let document = document(T, T + lifetime);
        let now = T + offset;

        let expected = now >= T && now <= (T + lifetime).min(T + DAY);
        prop_assert_eq!(document.is_valid(at(now)), expected);
    }

    #[test]
    fn shorter_max_age_never_widens_the_window(
        offset in 0i64..DAY,
        max_age in 0i64..DAY,
    ) {
        let document = document(T, T + DAY);
        let now = at(T + offset);

        if document.is_valid_within(now, Duration::seconds(max_age)) {
            prop_assert!(document.is_valid(now));
        }
        prop_assert_eq!(
            document.is_valid_within(now, Duration::seconds(max_age)),
            offset <= max_age
        );
    }

    #[test]
    fn state_binding_accepts_only_the_issued_state(
        state in "[A-Za-z0-9_-]{1,43}",
        returned in "[A-Za-z0-9_-]{0,43}",
    ) {
        let session = ChallengeSession::new(
            fixtures::challenge(T + 180),
            "verifier".to_string(),
            state.clone(),
            "nonce".to_string(),
        );

        prop_assert!(session.validate_state(&state));
        prop_assert_eq!(session.validate_state(&returned), returned == state);
    }

    #[test]
    fn expiry_checks_agree_and_are_stable(offset in -600i64..600) {
        let token = Token::new("A", "I", at(T), "https://redirect.test/erezept");
        let challenge = fixtures::challenge(T);
        let now = at(T + offset);

        let valid = token.is_valid_at(now);
        prop_assert_eq!(valid, offset < 0);
        prop_assert_eq!(token.is_valid_at(now), valid);
        prop_assert_eq!(challenge.is_expired(now).unwrap(), !valid);
        prop_assert_eq!(token.needs_refresh(now, Duration::zero()), !valid);
    }

    #[test]
    fn envelopes_round_trip_under_fresh_keys(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
        let crypto = CryptoBox::new(Arc::new(OsRandom), RandomLengths::default());
        let recipient = fixtures::encryption_key();
        let public_key = EcPublicKey::from(recipient.public_key());

        let first = Jwe::encrypt(&plaintext, &public_key, None, None, &crypto).unwrap();
        let second = Jwe::encrypt(&plaintext, &public_key, None, None, &crypto).unwrap();

        prop_assert_ne!(first.encoded(), second.encoded());
        prop_assert_eq!(first.decrypt(&recipient).unwrap(), plaintext.clone());
        prop_assert_eq!(Jwe::parse(&second.encoded()).unwrap().decrypt(&recipient).unwrap(), plaintext);
    }
}
