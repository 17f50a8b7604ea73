//! The token verifier
//!
//! A [`JwtVerifier`] is built once for an issuer and shared by every caller.
//! It owns the caches for that issuer's metadata and signing keys, so
//! independently configured verifiers in one process never share state.
//!
//! # Example
//!
//! ```no_run
//! use jwtverifier::{JwtVerifier, VerificationOptions};
//!
//! # async fn verify(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = JwtVerifier::new("https://example.com/oauth2/default")?;
//!
//! let options = VerificationOptions::new()
//!     .with_audience("api://default")
//!     .with_client_id("0oa1b2c3d4");
//!
//! let jwt = verifier.verify_access_token_with_options(token, &options).await?;
//! println!("subject: {:?}", jwt.claims().get_str("sub"));
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc, time::Duration};

use jwtverifier_clock::{Clock, DurationSecs, System};

use crate::{
    cache::{Cache, SharedClock, TtlCache},
    claims::ClaimSet,
    decoder::{KeyDecoder, Rs256Decoder},
    discovery::{
        Discovery, DiscoveryCache, DiscoveryDocument, DiscoveryResolver, Issuer, IssuerRef,
        OidcDiscovery,
    },
    error::{DiscoveryError, KeyResolutionError, VerifyError},
    http::{HttpClient, DEFAULT_TIMEOUT},
    jwks::KeyId,
    keys::{KeyCache, KeyResolver, ResolvedKey},
    token::validate_structure,
    validation::{ClaimsValidator, TokenKind, VerificationOptions},
};

/// How long issuer metadata is cached, unless overridden
pub const DEFAULT_DISCOVERY_CACHE_TTL: DurationSecs = DurationSecs(5 * 60);

/// How long resolved keys, and the absence of keys, are cached, unless
/// overridden
pub const DEFAULT_KEY_CACHE_TTL: DurationSecs = DurationSecs(24 * 60 * 60);

/// An error constructing a verifier
#[derive(Debug, thiserror::Error)]
#[error("unable to construct an HTTP client for the verifier")]
pub struct BuildError(#[from] reqwest::Error);

/// A verified token
#[derive(Clone, Debug, PartialEq)]
pub struct Jwt {
    claims: ClaimSet,
}

impl Jwt {
    /// The verified claims
    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Takes ownership of the verified claims
    pub fn into_claims(self) -> ClaimSet {
        self.claims
    }
}

struct Inner {
    issuer: Issuer,
    validator: ClaimsValidator,
    discovery: DiscoveryResolver,
    keys: KeyResolver,
    decoder: Arc<dyn KeyDecoder>,
    clock: SharedClock,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("issuer", &self.issuer)
            .field("validator", &self.validator)
            .field("discovery", &self.discovery)
            .field("keys", &self.keys)
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

/// Verifies access and ID tokens issued by a single issuer
///
/// Cloning a verifier is cheap; clones share their caches.
#[derive(Clone, Debug)]
#[must_use]
pub struct JwtVerifier {
    inner: Arc<Inner>,
}

impl JwtVerifier {
    /// Constructs a verifier for `issuer` with default settings
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(issuer: impl Into<Issuer>) -> Result<Self, BuildError> {
        Self::builder(issuer).build()
    }

    /// Starts configuring a verifier for `issuer`
    pub fn builder(issuer: impl Into<Issuer>) -> JwtVerifierBuilder {
        JwtVerifierBuilder::new(issuer.into())
    }

    /// The issuer whose tokens are accepted
    pub fn issuer(&self) -> &IssuerRef {
        &self.inner.issuer
    }

    /// The leeway applied when a call does not override it
    pub fn default_leeway(&self) -> DurationSecs {
        self.inner.validator.default_leeway()
    }

    /// Verifies an access token, checking `iss`, `exp`, and `iat`
    ///
    /// # Errors
    ///
    /// See [`verify_access_token_with_options`](Self::verify_access_token_with_options).
    pub async fn verify_access_token(&self, token: &str) -> Result<Jwt, VerifyError> {
        self.verify(token, TokenKind::Access, &VerificationOptions::new())
            .await
    }

    /// Verifies an access token, additionally checking `aud` and `cid` when
    /// `options` names expected values for them
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, its signing key cannot be
    /// resolved, its signature does not verify, or any checked claim is
    /// rejected. In the last case, the error also carries the token's claims.
    pub async fn verify_access_token_with_options(
        &self,
        token: &str,
        options: &VerificationOptions,
    ) -> Result<Jwt, VerifyError> {
        self.verify(token, TokenKind::Access, options).await
    }

    /// Verifies an ID token, checking `iss`, `exp`, and `iat`
    ///
    /// # Errors
    ///
    /// See [`verify_id_token_with_options`](Self::verify_id_token_with_options).
    pub async fn verify_id_token(&self, token: &str) -> Result<Jwt, VerifyError> {
        self.verify(token, TokenKind::Id, &VerificationOptions::new())
            .await
    }

    /// Verifies an ID token, additionally checking `aud` and `nonce` when
    /// `options` names expected values for them
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, its signing key cannot be
    /// resolved, its signature does not verify, or any checked claim is
    /// rejected. In the last case, the error also carries the token's claims.
    pub async fn verify_id_token_with_options(
        &self,
        token: &str,
        options: &VerificationOptions,
    ) -> Result<Jwt, VerifyError> {
        self.verify(token, TokenKind::Id, options).await
    }

    #[tracing::instrument(
        skip(self, token, kind, options),
        fields(token.kind = kind.as_str(), token.kid = tracing::field::Empty),
    )]
    async fn verify(
        &self,
        token: &str,
        kind: TokenKind,
        options: &VerificationOptions,
    ) -> Result<Jwt, VerifyError> {
        let inner = &*self.inner;

        let kid = validate_structure(token).map_err(|err| {
            tracing::debug!(error = %err, "token failed structural validation");
            err
        })?;
        tracing::Span::current().record("token.kid", kid.as_str());

        let document = inner.discovery.resolve(&inner.issuer).await?;
        let key = inner.keys.resolve(&kid, document.jwks_uri()).await?;
        let claims = inner.decoder.decode(token, &key)?;

        match inner
            .validator
            .validate(&claims, kind, options, inner.clock.now())
        {
            Ok(()) => {
                tracing::debug!("token verified");
                Ok(Jwt { claims })
            }
            Err(rejected) => Err(VerifyError::ValidationFailed { claims, rejected }),
        }
    }
}

/// Configures a [`JwtVerifier`]
#[must_use]
pub struct JwtVerifierBuilder {
    issuer: Issuer,
    discovery: Arc<dyn Discovery>,
    decoder: Arc<dyn KeyDecoder>,
    default_leeway: DurationSecs,
    http: Option<reqwest::Client>,
    timeout: Duration,
    discovery_cache_ttl: DurationSecs,
    key_cache_ttl: DurationSecs,
    discovery_cache: Option<Arc<DiscoveryCache>>,
    key_cache: Option<Arc<KeyCache>>,
    clock: SharedClock,
}

impl fmt::Debug for JwtVerifierBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifierBuilder")
            .field("issuer", &self.issuer)
            .field("discovery", &self.discovery)
            .field("decoder", &self.decoder)
            .field("default_leeway", &self.default_leeway)
            .field("timeout", &self.timeout)
            .field("discovery_cache_ttl", &self.discovery_cache_ttl)
            .field("key_cache_ttl", &self.key_cache_ttl)
            .field("discovery_cache", &self.discovery_cache)
            .field("key_cache", &self.key_cache)
            .finish_non_exhaustive()
    }
}

impl JwtVerifierBuilder {
    fn new(issuer: Issuer) -> Self {
        Self {
            issuer,
            discovery: Arc::new(OidcDiscovery::new()),
            decoder: Arc::new(Rs256Decoder),
            default_leeway: DurationSecs::ZERO,
            http: None,
            timeout: DEFAULT_TIMEOUT,
            discovery_cache_ttl: DEFAULT_DISCOVERY_CACHE_TTL,
            key_cache_ttl: DEFAULT_KEY_CACHE_TTL,
            discovery_cache: None,
            key_cache: None,
            clock: Arc::new(System),
        }
    }

    /// Locates issuer metadata with another strategy
    pub fn with_discovery(mut self, discovery: impl Discovery + 'static) -> Self {
        self.discovery = Arc::new(discovery);
        self
    }

    /// Verifies signatures and decodes payloads with another strategy
    pub fn with_decoder(mut self, decoder: impl KeyDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Sets the clock-skew tolerance applied to `exp` and `iat`
    pub fn with_default_leeway(mut self, leeway: DurationSecs) -> Self {
        self.default_leeway = leeway;
        self
    }

    /// Fetches metadata and keysets with an existing client
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Bounds each metadata and keyset request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how long issuer metadata is cached
    ///
    /// Has no effect if [`with_discovery_cache`](Self::with_discovery_cache)
    /// supplies the cache.
    pub fn with_discovery_cache_ttl(mut self, ttl: DurationSecs) -> Self {
        self.discovery_cache_ttl = ttl;
        self
    }

    /// Sets how long keys, and the absence of keys, are cached
    ///
    /// Has no effect if [`with_key_cache`](Self::with_key_cache) supplies
    /// the cache.
    pub fn with_key_cache_ttl(mut self, ttl: DurationSecs) -> Self {
        self.key_cache_ttl = ttl;
        self
    }

    /// Caches issuer metadata in `cache`, keyed by metadata URL
    pub fn with_discovery_cache(
        mut self,
        cache: impl Cache<String, Arc<DiscoveryDocument>, DiscoveryError> + 'static,
    ) -> Self {
        self.discovery_cache = Some(Arc::new(cache));
        self
    }

    /// Caches resolved keys, and the absence of keys, in `cache`
    pub fn with_key_cache(
        mut self,
        cache: impl Cache<KeyId, ResolvedKey, KeyResolutionError> + 'static,
    ) -> Self {
        self.key_cache = Some(Arc::new(cache));
        self
    }

    /// Reads the current time from another clock
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Constructs the verifier
    ///
    /// # Errors
    ///
    /// Returns an error if no HTTP client was given and the default one
    /// cannot be constructed.
    pub fn build(self) -> Result<JwtVerifier, BuildError> {
        let http = match self.http {
            Some(client) => HttpClient::new(client, self.timeout),
            None => HttpClient::with_timeout(self.timeout)?,
        };

        let discovery_cache: Arc<DiscoveryCache> = match self.discovery_cache {
            Some(cache) => cache,
            None => Arc::new(TtlCache::<String, Arc<DiscoveryDocument>>::new(
                "discovery",
                self.discovery_cache_ttl,
                Arc::clone(&self.clock),
            )),
        };
        let key_cache: Arc<KeyCache> = match self.key_cache {
            Some(cache) => cache,
            None => Arc::new(TtlCache::<KeyId, ResolvedKey>::new(
                "keys",
                self.key_cache_ttl,
                Arc::clone(&self.clock),
            )),
        };

        tracing::debug!(issuer = %self.issuer, "verifier constructed");

        Ok(JwtVerifier {
            inner: Arc::new(Inner {
                validator: ClaimsValidator::new(self.issuer.clone(), self.default_leeway),
                discovery: DiscoveryResolver::new(self.discovery, http.clone(), discovery_cache),
                keys: KeyResolver::new(http, key_cache),
                decoder: self.decoder,
                clock: self.clock,
                issuer: self.issuer,
            }),
        })
    }
}
