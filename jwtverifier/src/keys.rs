//! Signing key resolution
//!
//! Keys are cached by identifier. An identifier that the issuer's keyset
//! does not contain is remembered as missing for the same time-to-live as a
//! found key, so repeated tokens naming a bogus `kid` cost one keyset fetch
//! per cache window rather than one per token.

use std::sync::Arc;

use crate::{
    cache::Cache,
    error::KeyResolutionError,
    http::{FetchError, HttpClient},
    jwks::{Jwk, Jwks, KeyId, KeyIdRef},
};

/// The outcome of looking up a key identifier in an issuer's keyset
#[derive(Clone, Debug)]
pub enum ResolvedKey {
    /// The keyset contains the key
    Found(Arc<Jwk>),
    /// The keyset does not contain the key
    NotFound,
}

/// A cache of [`ResolvedKey`]s, keyed by key identifier
pub type KeyCache = dyn Cache<KeyId, ResolvedKey, KeyResolutionError>;

#[derive(Debug)]
pub(crate) struct KeyResolver {
    http: HttpClient,
    cache: Arc<KeyCache>,
}

impl KeyResolver {
    pub(crate) fn new(http: HttpClient, cache: Arc<KeyCache>) -> Self {
        Self { http, cache }
    }

    /// Resolves `kid` from the cache, or from the keyset at `jwks_uri`
    #[tracing::instrument(skip(self, jwks_uri), fields(jwks.url = jwks_uri))]
    pub(crate) async fn resolve(
        &self,
        kid: &KeyIdRef,
        jwks_uri: &str,
    ) -> Result<Arc<Jwk>, KeyResolutionError> {
        let resolved = self
            .cache
            .get_or_fetch(&kid.to_owned(), Box::pin(self.fetch(kid, jwks_uri)))
            .await?;

        match resolved {
            ResolvedKey::Found(key) => Ok(key),
            ResolvedKey::NotFound => {
                tracing::debug!(%kid, "key identifier not present in keyset");
                Err(KeyResolutionError::KeyNotFound {
                    kid: kid.to_owned(),
                })
            }
        }
    }

    async fn fetch(&self, kid: &KeyIdRef, jwks_uri: &str) -> Result<ResolvedKey, KeyResolutionError> {
        let jwks: Jwks = self.http.get_json(jwks_uri).await.map_err(|err| match err {
            FetchError::Transport(err) => KeyResolutionError::KeysetFetchFailed {
                url: jwks_uri.to_owned(),
                source: err.into(),
            },
            FetchError::Decode(err) => KeyResolutionError::KeysetDecodeFailed {
                url: jwks_uri.to_owned(),
                source: err.into(),
            },
        })?;

        tracing::info!(keys = jwks.keys().len(), "keyset fetched");

        Ok(jwks
            .get_key_by_id(kid)
            .cloned()
            .map_or(ResolvedKey::NotFound, |key| ResolvedKey::Found(Arc::new(key))))
    }
}
