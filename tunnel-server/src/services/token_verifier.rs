//! Credential verification for kiosk connections.
//!
//! This module defines the [`TokenVerifier`] trait, which turns an opaque
//! bearer credential into a kiosk identity, and the default
//! [`JwtTokenVerifier`] implementation (HS256 tokens carrying a `kiosk_id`
//! claim).
//!
//! Verification is a pure function of the credential and a process-wide
//! secret. Malformed, expired and badly-signed tokens are rejected
//! uniformly; callers cannot distinguish the cases.

use std::{sync::Arc, time::Duration};

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use tunnel_types::KioskId;

use crate::unix_now;

/// Shared handle to the verifier the server was wired with.
pub type TokenVerifierService = Arc<dyn TokenVerifier + Send + Sync>;

/// Turns an opaque bearer credential into a kiosk identity.
pub trait TokenVerifier {
    /// Verifies the credential and returns the kiosk identity it was issued
    /// for, or `None` on any failure.
    fn verify(&self, token: &str) -> Option<KioskId>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    kiosk_id: String,
    iat: u64,
    exp: u64,
}

/// HS256 JWT verifier bound to a shared signing secret.
pub struct JwtTokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    /// Creates a verifier from the shared secret.
    pub fn new(secret: &SecretString) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::default(),
        }
    }

    /// Issues a credential for the given kiosk, valid for `ttl`.
    ///
    /// Token issuance itself belongs to the provisioning surface; the
    /// verifier exposes it so provisioning and tests mint tokens with the
    /// exact claims [`verify`](TokenVerifier::verify) expects.
    pub fn issue(&self, kiosk_id: &KioskId, ttl: Duration) -> eyre::Result<String> {
        let now = unix_now();
        let claims = Claims {
            kiosk_id: kiosk_id.to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &self.encoding_key,
        )?)
    }
}

impl TokenVerifier for JwtTokenVerifier {
    fn verify(&self, token: &str) -> Option<KioskId> {
        match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(KioskId::new(data.claims.kiosk_id)),
            Err(err) => {
                tracing::debug!("token verification failed: {err:?}");
                None
            }
        }
    }
}
