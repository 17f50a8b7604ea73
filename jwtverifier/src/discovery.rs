//! Issuer metadata discovery
//!
//! The keyset used to verify an issuer's tokens is located through the
//! issuer's published metadata. By default, that metadata is read from the
//! OpenID Connect well-known location beneath the issuer URL.

use std::{fmt, sync::Arc};

use aliri_braid::braid;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    cache::Cache,
    error::DiscoveryError,
    http::{FetchError, HttpClient},
};

/// The path, relative to the issuer, of OpenID Connect provider metadata
pub const OIDC_WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The base URL of a token-issuing authority
///
/// Tokens are only accepted when their `iss` claim is exactly equal to the
/// issuer of the verifier checking them.
#[braid(serde, ref_doc = "A borrowed reference to an issuer ([`Issuer`])")]
pub struct Issuer;

/// Metadata published by an issuer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryDocument {
    jwks_uri: String,
    metadata: Map<String, Value>,
}

impl DiscoveryDocument {
    /// Constructs a document that names only a keyset endpoint
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            metadata: Map::new(),
        }
    }

    /// Interprets metadata fetched from `url`
    ///
    /// # Errors
    ///
    /// Fails if the metadata has no `jwks_uri`, or if it is not a string.
    pub fn from_metadata(url: &str, metadata: Map<String, Value>) -> Result<Self, DiscoveryError> {
        let jwks_uri = match metadata.get("jwks_uri") {
            None => {
                return Err(DiscoveryError::MetadataMissingKeysetUri {
                    url: url.to_owned(),
                })
            }
            Some(Value::String(uri)) => uri.clone(),
            Some(other) => {
                return Err(DiscoveryError::decode_failed(
                    url,
                    format!("jwks_uri must be a string, but is {other}"),
                ))
            }
        };

        Ok(Self { jwks_uri, metadata })
    }

    /// The URL of the issuer's keyset
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Any other metadata value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// A strategy for locating an issuer's metadata
#[async_trait]
pub trait Discovery: fmt::Debug + Send + Sync {
    /// The URL of the metadata for `issuer`
    ///
    /// Metadata is cached under this URL.
    fn metadata_url(&self, issuer: &IssuerRef) -> String;

    /// Obtains the metadata at `url`
    async fn fetch(&self, http: &HttpClient, url: &str) -> Result<DiscoveryDocument, DiscoveryError>;
}

/// Reads OpenID Connect provider metadata from a well-known path beneath the
/// issuer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcDiscovery {
    well_known_path: String,
}

impl OidcDiscovery {
    /// Reads metadata from the OpenID Connect well-known location
    pub fn new() -> Self {
        Self::with_well_known_path(OIDC_WELL_KNOWN_PATH)
    }

    /// Reads metadata from another path beneath the issuer, such as
    /// `/.well-known/oauth-authorization-server`
    pub fn with_well_known_path(path: impl Into<String>) -> Self {
        Self {
            well_known_path: path.into(),
        }
    }

    /// The path appended to the issuer
    pub fn well_known_path(&self) -> &str {
        &self.well_known_path
    }
}

impl Default for OidcDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Discovery for OidcDiscovery {
    fn metadata_url(&self, issuer: &IssuerRef) -> String {
        format!(
            "{}{}",
            issuer.as_str().trim_end_matches('/'),
            self.well_known_path
        )
    }

    async fn fetch(&self, http: &HttpClient, url: &str) -> Result<DiscoveryDocument, DiscoveryError> {
        let metadata = http.get_json::<Map<String, Value>>(url).await.map_err(|err| match err {
            FetchError::Transport(err) => DiscoveryError::fetch_failed(url, err),
            FetchError::Decode(err) => DiscoveryError::decode_failed(url, err),
        })?;

        DiscoveryDocument::from_metadata(url, metadata)
    }
}

/// Uses a fixed keyset endpoint without consulting any metadata
///
/// Useful for issuers that do not publish metadata, or whose keyset location
/// is already known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticDiscovery {
    document: DiscoveryDocument,
}

impl StaticDiscovery {
    /// Always resolves to the keyset at `jwks_uri`
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self {
            document: DiscoveryDocument::new(jwks_uri),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    fn metadata_url(&self, _issuer: &IssuerRef) -> String {
        self.document.jwks_uri.clone()
    }

    async fn fetch(&self, _http: &HttpClient, _url: &str) -> Result<DiscoveryDocument, DiscoveryError> {
        Ok(self.document.clone())
    }
}

/// A cache of issuer metadata, keyed by metadata URL
pub type DiscoveryCache = dyn Cache<String, Arc<DiscoveryDocument>, DiscoveryError>;

/// Resolves and caches issuer metadata
#[derive(Debug)]
pub(crate) struct DiscoveryResolver {
    discovery: Arc<dyn Discovery>,
    http: HttpClient,
    cache: Arc<DiscoveryCache>,
}

impl DiscoveryResolver {
    pub(crate) fn new(
        discovery: Arc<dyn Discovery>,
        http: HttpClient,
        cache: Arc<DiscoveryCache>,
    ) -> Self {
        Self {
            discovery,
            http,
            cache,
        }
    }

    #[tracing::instrument(skip(self), fields(metadata.url = tracing::field::Empty))]
    pub(crate) async fn resolve(&self, issuer: &IssuerRef) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        let url = self.discovery.metadata_url(issuer);
        tracing::Span::current().record("metadata.url", url.as_str());

        let fetch = Box::pin(async {
            let document = self.discovery.fetch(&self.http, &url).await?;
            tracing::info!(jwks.url = %document.jwks_uri(), "issuer metadata fetched");
            Ok::<_, DiscoveryError>(Arc::new(document))
        });

        self.cache.get_or_fetch(&url, fetch).await
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;

    fn metadata(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test metadata must be an object"),
        }
    }

    #[test]
    fn appends_well_known_path_to_issuer() {
        let discovery = OidcDiscovery::new();

        assert_eq!(
            discovery.metadata_url(IssuerRef::from_str("https://example.com/oauth2/default")),
            "https://example.com/oauth2/default/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery.metadata_url(IssuerRef::from_str("https://example.com/")),
            "https://example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn custom_well_known_path() {
        let discovery = OidcDiscovery::with_well_known_path("/.well-known/oauth-authorization-server");

        assert_eq!(
            discovery.metadata_url(IssuerRef::from_str("https://example.com")),
            "https://example.com/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn keeps_other_metadata() -> Result<()> {
        let doc = DiscoveryDocument::from_metadata(
            "https://example.com/.well-known/openid-configuration",
            metadata(json!({
                "issuer": "https://example.com",
                "jwks_uri": "https://example.com/keys",
            })),
        )?;

        assert_eq!(doc.jwks_uri(), "https://example.com/keys");
        assert_eq!(doc.get("issuer"), Some(&json!("https://example.com")));

        Ok(())
    }

    #[test]
    fn missing_jwks_uri_is_rejected() {
        let err = DiscoveryDocument::from_metadata(
            "https://example.com/.well-known/openid-configuration",
            metadata(json!({ "issuer": "https://example.com" })),
        )
        .unwrap_err();

        assert!(matches!(err, DiscoveryError::MetadataMissingKeysetUri { .. }));
    }

    #[test]
    fn non_string_jwks_uri_is_a_decode_failure() {
        let err = DiscoveryDocument::from_metadata(
            "https://example.com/.well-known/openid-configuration",
            metadata(json!({ "jwks_uri": 42 })),
        )
        .unwrap_err();

        assert!(matches!(err, DiscoveryError::MetadataDecodeFailed { .. }));
    }

    #[tokio::test]
    async fn static_discovery_needs_no_network() -> Result<()> {
        let discovery = StaticDiscovery::new("https://example.com/keys");
        let http = HttpClient::with_timeout(std::time::Duration::from_secs(1))?;

        let url = discovery.metadata_url(IssuerRef::from_str("https://example.com"));
        let doc = discovery.fetch(&http, &url).await?;

        assert_eq!(doc.jwks_uri(), "https://example.com/keys");

        Ok(())
    }
}
