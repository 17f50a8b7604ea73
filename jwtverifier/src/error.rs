//! Common errors
//!
//! Each stage of the verification pipeline has its own error type. They are
//! gathered into [`VerifyError`], which is what the public verification
//! operations return.

use std::error::Error as StdError;

use thiserror::Error;

use crate::{claims::ClaimSet, jwks::KeyId};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The candidate token was rejected before any network or cryptographic work
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TokenError {
    /// No token was provided
    #[error("you must provide a jwt to verify")]
    EmptyToken,

    /// The token is not three `.`-separated base64url segments
    #[error("token must contain three '.'-separated segments of the characters 'a-z A-Z 0-9 - _'")]
    MalformedToken,

    /// The header segment is not valid base64
    #[error("the token header does not appear to be a base64 encoded string")]
    HeaderNotBase64,

    /// The header segment does not decode to a JSON object
    #[error("the token header is not a json object")]
    HeaderNotJson,

    /// The header does not have exactly two properties
    #[error("the token header must contain exactly `alg` and `kid`, but has {count} properties")]
    HeaderWrongPropertyCount {
        /// The number of properties found in the header
        count: usize,
    },

    /// The header has no `alg`
    #[error("the token header must contain an `alg`")]
    HeaderMissingAlg,

    /// The header has no `kid`
    #[error("the token header must contain a `kid`")]
    HeaderMissingKid,

    /// The header `kid` is present but is not a string
    #[error("the token header `kid` must be a string")]
    HeaderKidNotString,

    /// The header names an algorithm other than RS256
    #[error("the token header `alg` is {alg}, but the only supported alg is RS256")]
    UnsupportedAlgorithm {
        /// The algorithm named by the header, as JSON
        alg: String,
    },
}

/// The issuer's metadata could not be obtained
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The metadata endpoint could not be reached or answered with an error
    #[error("request for metadata at {url} was not successful")]
    MetadataFetchFailed {
        /// The metadata URL requested
        url: String,
        /// The underlying transport error
        #[source]
        source: BoxError,
    },

    /// The metadata response body is not a JSON object
    #[error("metadata at {url} could not be decoded")]
    MetadataDecodeFailed {
        /// The metadata URL requested
        url: String,
        /// The underlying decoding error
        #[source]
        source: BoxError,
    },

    /// The metadata does not name a keyset endpoint
    #[error("jwks_uri not present in metadata at {url}")]
    MetadataMissingKeysetUri {
        /// The metadata URL requested
        url: String,
    },
}

impl DiscoveryError {
    /// Constructs a transport failure for the metadata at `url`
    pub fn fetch_failed(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::MetadataFetchFailed {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Constructs a decoding failure for the metadata at `url`
    pub fn decode_failed(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::MetadataDecodeFailed {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// The key named by the token could not be resolved
#[derive(Debug, Error)]
pub enum KeyResolutionError {
    /// The issuer's keyset has no key with the requested identifier
    #[error("jwk not found for kid {kid}")]
    KeyNotFound {
        /// The key identifier requested by the token
        kid: KeyId,
    },

    /// The keyset endpoint could not be reached or answered with an error
    #[error("request for keyset at {url} was not successful")]
    KeysetFetchFailed {
        /// The keyset URL requested
        url: String,
        /// The underlying transport error
        #[source]
        source: BoxError,
    },

    /// The keyset response body is not a JSON Web Key Set
    #[error("keyset at {url} could not be decoded")]
    KeysetDecodeFailed {
        /// The keyset URL requested
        url: String,
        /// The underlying decoding error
        #[source]
        source: BoxError,
    },
}

/// The signature could not be verified or the payload could not be read
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The token is not made of three segments
    #[error("malformed JWT")]
    MalformedToken,

    /// The signature does not match the signed content under the resolved key
    #[error("signature mismatch")]
    SignatureInvalid,

    /// The resolved key cannot be used to verify an RS256 signature
    #[error("key rejected: {reason}")]
    KeyRejected {
        /// Why the key was rejected
        reason: &'static str,
    },

    /// The signature is valid, but the payload is not a JSON object
    #[error("malformed JWT payload")]
    PayloadDecodeFailed {
        /// The underlying decoding error
        #[source]
        source: BoxError,
    },
}

impl DecodeError {
    /// Constructs a payload decoding failure
    pub fn payload(source: impl Into<BoxError>) -> Self {
        Self::PayloadDecodeFailed {
            source: source.into(),
        }
    }
}

/// A single failed claim check
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ClaimError {
    /// `iss` does not equal the verifier's issuer
    #[error("iss: {actual} does not match {expected}")]
    IssuerMismatch {
        /// The configured issuer
        expected: String,
        /// The issuer in the token
        actual: String,
    },

    /// `aud` does not equal the expected audience
    #[error("aud: {actual} does not match {expected}")]
    AudienceMismatch {
        /// The expected audience
        expected: String,
        /// The audience in the token
        actual: String,
    },

    /// `cid` does not equal the expected client id
    #[error("cid: {actual} does not match {expected}")]
    ClientIdMismatch {
        /// The expected client id
        expected: String,
        /// The client id in the token
        actual: String,
    },

    /// `nonce` does not equal the expected nonce
    #[error("nonce: {actual} does not match {expected}")]
    NonceMismatch {
        /// The expected nonce
        expected: String,
        /// The nonce in the token
        actual: String,
    },

    /// The token expired earlier than the leeway allows
    #[error("the token is expired")]
    TokenExpired {
        /// The `exp` claim
        expired_at: f64,
    },

    /// The token was issued later than the leeway allows
    #[error("the token was issued in the future")]
    TokenIssuedInFuture {
        /// The `iat` claim
        issued_at: f64,
    },

    /// A claim that must be checked is absent
    #[error("the `{claim}` claim is missing")]
    MissingClaim {
        /// The name of the claim
        claim: &'static str,
    },

    /// A claim is present, but holds a value of the wrong type
    #[error("the `{claim}` claim must be a {expected}, but is a {found}")]
    ClaimTypeMismatch {
        /// The name of the claim
        claim: &'static str,
        /// The expected type
        expected: &'static str,
        /// The type found
        found: &'static str,
    },
}

/// Every claim check that failed for a token
#[derive(Clone, Debug, PartialEq, Error)]
#[error("the token claims were rejected: {}", join_reasons(.reasons))]
pub struct ClaimsRejected {
    reasons: Vec<ClaimError>,
}

impl ClaimsRejected {
    pub(crate) fn new(reasons: Vec<ClaimError>) -> Self {
        Self { reasons }
    }

    /// The failed checks, in the order they were run
    pub fn reasons(&self) -> &[ClaimError] {
        &self.reasons
    }

    /// Takes ownership of the failed checks
    pub fn into_reasons(self) -> Vec<ClaimError> {
        self.reasons
    }
}

fn join_reasons(reasons: &[ClaimError]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// An error verifying a token
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The token failed structural validation
    #[error("token is not valid")]
    TokenNotValid(#[from] TokenError),

    /// The issuer's metadata could not be resolved
    #[error("issuer metadata could not be resolved")]
    Discovery(#[from] DiscoveryError),

    /// The signing key could not be resolved
    #[error("signing key could not be resolved")]
    KeyResolution(#[from] KeyResolutionError),

    /// The signature or payload could not be verified
    #[error("could not decode token")]
    Decode(#[from] DecodeError),

    /// The token is authentic, but one or more claims were rejected
    #[error("token claims could not be validated")]
    ValidationFailed {
        /// The authentic claims of the rejected token
        claims: ClaimSet,
        /// The failed checks
        #[source]
        rejected: ClaimsRejected,
    },
}

impl VerifyError {
    /// The decoded claims of a token that was authentic but rejected
    ///
    /// Tokens rejected before their signature was verified carry no claims.
    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            Self::ValidationFailed { claims, .. } => Some(claims),
            _ => None,
        }
    }

    /// The failed claim checks, if the token was rejected on its claims
    pub fn claims_rejected(&self) -> Option<&ClaimsRejected> {
        match self {
            Self::ValidationFailed { rejected, .. } => Some(rejected),
            _ => None,
        }
    }
}
