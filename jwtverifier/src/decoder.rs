//! Signature verification and payload decoding

use std::fmt;

use ring::signature::{RsaPublicKeyComponents, RSA_PKCS1_2048_8192_SHA256};

use crate::{
    claims::ClaimSet,
    error::DecodeError,
    jwks::Jwk,
    token::{decode_segment, TokenParts, SUPPORTED_ALGORITHM},
};

/// A strategy for verifying a token's signature and reading its claims
///
/// Implementations receive the key selected by the token's `kid` and must
/// only return claims once the signature has been verified against it.
pub trait KeyDecoder: fmt::Debug + Send + Sync {
    /// Verifies `token` against `key` and decodes its payload
    ///
    /// # Errors
    ///
    /// Fails if the key is unusable, the signature does not match, or the
    /// payload is not a JSON object.
    fn decode(&self, token: &str, key: &Jwk) -> Result<ClaimSet, DecodeError>;
}

/// Verifies RSASSA-PKCS1-v1_5 signatures using SHA-256
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rs256Decoder;

impl Rs256Decoder {
    fn public_key(key: &Jwk) -> Result<(Vec<u8>, Vec<u8>), DecodeError> {
        if key.key_type() != Some("RSA") {
            return Err(DecodeError::KeyRejected {
                reason: "key is not an RSA key",
            });
        }

        if key.algorithm().map_or(false, |alg| alg != SUPPORTED_ALGORITHM) {
            return Err(DecodeError::KeyRejected {
                reason: "key is restricted to another algorithm",
            });
        }

        let n = key.modulus().ok_or(DecodeError::KeyRejected {
            reason: "key has no modulus",
        })?;
        let e = key.exponent().ok_or(DecodeError::KeyRejected {
            reason: "key has no exponent",
        })?;

        let n = decode_segment(n).map_err(|_| DecodeError::KeyRejected {
            reason: "key modulus is not base64url",
        })?;
        let e = decode_segment(e).map_err(|_| DecodeError::KeyRejected {
            reason: "key exponent is not base64url",
        })?;

        Ok((n, e))
    }
}

impl KeyDecoder for Rs256Decoder {
    fn decode(&self, token: &str, key: &Jwk) -> Result<ClaimSet, DecodeError> {
        let parts = TokenParts::split(token).ok_or(DecodeError::MalformedToken)?;
        let (n, e) = Self::public_key(key)?;

        let signature = decode_segment(parts.signature).map_err(|_| DecodeError::SignatureInvalid)?;

        RsaPublicKeyComponents { n: &n, e: &e }
            .verify(
                &RSA_PKCS1_2048_8192_SHA256,
                parts.signing_input().as_bytes(),
                &signature,
            )
            .map_err(|_| DecodeError::SignatureInvalid)?;

        let payload = decode_segment(parts.payload).map_err(DecodeError::payload)?;

        serde_json::from_slice(&payload).map_err(DecodeError::payload)
    }
}
