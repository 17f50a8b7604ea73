//! Nonces and PKCE code verifiers for authorization code flows
//!
//! These are not used when verifying tokens, but are needed by clients that
//! request the tokens a verifier later checks: the nonce is echoed back in
//! the ID token's `nonce` claim, and the PKCE code verifier binds the
//! authorization code to the client that requested it ([RFC 7636]).
//!
//! [RFC 7636]: https://www.rfc-editor.org/rfc/rfc7636

use std::ops::RangeInclusive;

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use rand::{rngs::OsRng, RngCore};
use ring::digest;
use thiserror::Error;

const NONCE_BYTES: usize = 32;

/// The number of random bytes a code verifier may be generated from
///
/// Encoded, these yield the 43 to 128 characters RFC 7636 permits.
pub const PKCE_VERIFIER_BYTES: RangeInclusive<usize> = 32..=96;

/// Generates a random nonce for an authentication request
///
/// The nonce is 32 random bytes, base64url-encoded with padding.
pub fn generate_nonce() -> String {
    let mut bytes = [0_u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// An error generating a code verifier
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PkceError {
    /// The requested number of random bytes is outside the permitted range
    #[error("a code verifier must be generated from 32 to 96 random bytes, not {0}")]
    InvalidLength(usize),
}

/// A PKCE code verifier
#[derive(Clone, PartialEq, Eq)]
pub struct PkceCodeVerifier(String);

impl PkceCodeVerifier {
    /// Generates a verifier from 32 random bytes
    pub fn generate() -> Self {
        let mut bytes = [0_u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Generates a verifier from `len` random bytes
    ///
    /// # Errors
    ///
    /// Fails unless `len` is within [`PKCE_VERIFIER_BYTES`].
    pub fn with_length(len: usize) -> Result<Self, PkceError> {
        if !PKCE_VERIFIER_BYTES.contains(&len) {
            return Err(PkceError::InvalidLength(len));
        }

        let mut bytes = vec![0_u8; len];
        OsRng.fill_bytes(&mut bytes);
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Wraps an existing verifier
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        Self(verifier.into())
    }

    /// The verifier, as sent with the token request
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `plain` code challenge, which is the verifier itself
    pub fn code_challenge_plain(&self) -> &str {
        &self.0
    }

    /// The `S256` code challenge: the base64url-encoded SHA-256 digest of
    /// the verifier
    pub fn code_challenge_s256(&self) -> String {
        let digest = digest::digest(&digest::SHA256, self.0.as_bytes());
        URL_SAFE_NO_PAD.encode(digest.as_ref())
    }
}

impl std::fmt::Debug for PkceCodeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PkceCodeVerifier(***)")
    }
}
