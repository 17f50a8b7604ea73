//! Verification of OAuth2 access tokens and OpenID Connect ID tokens
//!
//! A [`JwtVerifier`] accepts RS256-signed tokens from a single issuer. The
//! issuer's signing keys are located through its published metadata
//! (`{issuer}/.well-known/openid-configuration` by default), and both the
//! metadata and the keys are cached by the verifier.
//!
//! Verifying a token runs these steps, stopping at the first that fails:
//!
//! 1. The token must be three base64url segments whose header holds exactly
//!    an `alg` of `RS256` and a `kid`. No network access happens before this
//!    check passes.
//! 2. The issuer's metadata is resolved, then the key named by `kid` is
//!    resolved from the issuer's keyset. A `kid` missing from the keyset is
//!    remembered, so it does not trigger another fetch until the key cache
//!    entry expires.
//! 3. The signature is verified and the payload decoded.
//! 4. The registered claims are checked. `iss`, `exp`, and `iat` are always
//!    checked; `aud`, and `cid` for access tokens or `nonce` for ID tokens,
//!    are checked only when [`VerificationOptions`] names an expected value.
//!    Every failing check is reported, and the claims of the rejected token
//!    are returned alongside the error.
//!
//! # Feature flags
//!
//! `rustls-tls` (the default) and `default-tls` select the TLS backend used
//! by `reqwest` when fetching metadata and keysets.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod cache;
mod claims;
mod decoder;
mod discovery;
pub mod error;
mod http;
mod jwks;
mod keys;
pub mod pkce;
mod settings;
mod token;
mod validation;
mod verifier;

pub use cache::{Cache, Fetch};
pub use claims::{ClaimSet, ClaimValue};
pub use decoder::{KeyDecoder, Rs256Decoder};
pub use discovery::{
    Discovery, DiscoveryCache, DiscoveryDocument, Issuer, IssuerRef, OidcDiscovery,
    StaticDiscovery, OIDC_WELL_KNOWN_PATH,
};
pub use error::{
    ClaimError, ClaimsRejected, DecodeError, DiscoveryError, KeyResolutionError, TokenError,
    VerifyError,
};
pub use http::{FetchError, HttpClient, DEFAULT_TIMEOUT};
pub use jwks::{Jwk, Jwks, KeyId, KeyIdRef};
pub use jwtverifier_clock as clock;
pub use keys::{KeyCache, ResolvedKey};
pub use settings::{SettingsError, VerifierSettings};
pub use token::{validate_structure, SUPPORTED_ALGORITHM};
pub use validation::{ExpectedClaim, VerificationOptions};
pub use verifier::{
    BuildError, Jwt, JwtVerifier, JwtVerifierBuilder, DEFAULT_DISCOVERY_CACHE_TTL,
    DEFAULT_KEY_CACHE_TTL,
};
