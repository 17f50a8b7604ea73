use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use color_eyre::Result;
use httpmock::prelude::*;
use jwtverifier::{
    clock::DurationSecs, Cache, ClaimError, ClaimSet, DecodeError, DiscoveryDocument,
    DiscoveryError, Fetch, Jwk, JwtVerifier, KeyDecoder, KeyId, KeyResolutionError, ResolvedKey,
    StaticDiscovery, TokenError, VerificationOptions, VerifyError,
};
use tokio::sync::Mutex;
use serde_json::json;

mod common;

use common::{token, Issuer, NOW};

#[tokio::test]
async fn verifies_access_token_with_expected_audience_and_client() -> Result<()> {
    let issuer = Issuer::start().await;
    issuer.mock_discovery().await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;
    let token = token("k1", &issuer.access_claims());
    let options = VerificationOptions::new()
        .with_audience("api://default")
        .with_client_id("client1");

    let jwt = verifier
        .verify_access_token_with_options(&token, &options)
        .await?;

    let claims = jwt.claims();
    assert_eq!(claims.get_str("iss"), Some(issuer.url().as_str()));
    assert_eq!(claims.get_str("sub"), Some("user@example.com"));
    assert_eq!(claims.get_f64("exp"), Some(NOW.0 as f64 + 3600.0));
    assert_eq!(claims.len(), 6);

    Ok(())
}

#[tokio::test]
async fn expired_token_is_accepted_only_within_leeway() -> Result<()> {
    let issuer = Issuer::start().await;
    issuer.mock_discovery().await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let mut claims = issuer.access_claims();
    claims["exp"] = json!(NOW.0 - 3600);
    let token = token("k1", &claims);

    let verifier = issuer.verifier().build()?;
    let err = verifier.verify_access_token(&token).await.unwrap_err();
    let rejected = err.claims_rejected().expect("claims were rejected");
    assert_eq!(
        rejected.reasons(),
        &[ClaimError::TokenExpired {
            expired_at: NOW.0 as f64 - 3600.0
        }]
    );

    let options = VerificationOptions::new().with_leeway(DurationSecs(3600));
    verifier
        .verify_access_token_with_options(&token, &options)
        .await?;

    let lenient = issuer
        .verifier()
        .with_default_leeway(DurationSecs(3600))
        .build()?;
    lenient.verify_access_token(&token).await?;

    Ok(())
}

#[tokio::test]
async fn token_issued_in_the_future_is_rejected() -> Result<()> {
    let issuer = Issuer::start().await;
    issuer.mock_discovery().await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let mut claims = issuer.access_claims();
    claims["iat"] = json!(NOW.0 + 120);
    let token = token("k1", &claims);

    let verifier = issuer.verifier().build()?;
    let err = verifier.verify_access_token(&token).await.unwrap_err();
    assert!(matches!(
        err.claims_rejected().map(|r| r.reasons()),
        Some([ClaimError::TokenIssuedInFuture { .. }])
    ));

    let options = VerificationOptions::new().with_leeway(DurationSecs(120));
    verifier
        .verify_access_token_with_options(&token, &options)
        .await?;

    Ok(())
}

#[tokio::test]
async fn unknown_kid_is_not_fetched_twice() -> Result<()> {
    let issuer = Issuer::start().await;
    let discovery = issuer.mock_discovery().await;
    let keys = issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;
    let token = token("unknown", &issuer.access_claims());

    for _ in 0..2 {
        let err = verifier.verify_access_token(&token).await.unwrap_err();
        assert!(matches!(
            err,
            VerifyError::KeyResolution(KeyResolutionError::KeyNotFound { ref kid }) if kid.as_str() == "unknown"
        ));
        assert!(err.claims().is_none());
    }

    assert_eq!(keys.hits_async().await, 1);
    assert_eq!(discovery.hits_async().await, 1);

    Ok(())
}

#[tokio::test]
async fn every_failed_claim_is_reported_with_the_claims() -> Result<()> {
    let issuer = Issuer::start().await;
    issuer.mock_discovery().await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;
    let token = token("k1", &issuer.access_claims());
    let options = VerificationOptions::new()
        .with_audience("api://other")
        .with_client_id("client2");

    let err = verifier
        .verify_access_token_with_options(&token, &options)
        .await
        .unwrap_err();

    assert_eq!(
        err.claims_rejected().map(|r| r.reasons().to_vec()),
        Some(vec![
            ClaimError::AudienceMismatch {
                expected: "api://other".into(),
                actual: "api://default".into(),
            },
            ClaimError::ClientIdMismatch {
                expected: "client2".into(),
                actual: "client1".into(),
            },
        ])
    );
    assert_eq!(
        err.claims().and_then(|c| c.get_str("sub")),
        Some("user@example.com")
    );

    let message = err
        .claims_rejected()
        .map(ToString::to_string)
        .unwrap_or_default();
    assert!(message.contains("aud"));
    assert!(message.contains("cid"));

    Ok(())
}

#[tokio::test]
async fn id_tokens_check_nonce_but_not_client_id() -> Result<()> {
    let issuer = Issuer::start().await;
    issuer.mock_discovery().await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;
    let token = token("k1", &issuer.id_claims("n-0S6_WzA2Mj"));

    let options = VerificationOptions::new()
        .with_audience("client1")
        .with_nonce("n-0S6_WzA2Mj")
        .with_client_id("ignored-for-id-tokens");
    verifier.verify_id_token_with_options(&token, &options).await?;

    let replayed = VerificationOptions::new().with_nonce("another-nonce");
    let err = verifier
        .verify_id_token_with_options(&token, &replayed)
        .await
        .unwrap_err();
    assert!(matches!(
        err.claims_rejected().map(|r| r.reasons()),
        Some([ClaimError::NonceMismatch { .. }])
    ));

    // The same expectations are ignored for access tokens
    verifier
        .verify_access_token_with_options(&token, &replayed)
        .await?;

    Ok(())
}

#[tokio::test]
async fn tampered_signature_is_rejected() -> Result<()> {
    let issuer = Issuer::start().await;
    issuer.mock_discovery().await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;
    let token = token("k1", &issuer.access_claims());

    let forged = common::token("k1", &json!({ "iss": issuer.url(), "exp": NOW.0 + 60, "iat": NOW.0, "admin": true }));
    let (forged_body, _) = forged.rsplit_once('.').expect("three segments");
    let (_, signature) = token.rsplit_once('.').expect("three segments");
    let tampered = format!("{forged_body}.{signature}");

    let err = verifier.verify_access_token(&tampered).await.unwrap_err();
    assert!(matches!(err, VerifyError::Decode(DecodeError::SignatureInvalid)));
    assert!(err.claims().is_none());

    Ok(())
}

#[tokio::test]
async fn structural_failures_make_no_requests() -> Result<()> {
    let issuer = Issuer::start().await;
    let discovery = issuer.mock_discovery().await;
    let keys = issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;

    let hs256 = common::sign(
        &json!({ "alg": "HS256", "kid": "k1" }),
        &issuer.access_claims(),
    );
    let with_typ = common::sign(
        &json!({ "alg": "RS256", "kid": "k1", "typ": "JWT" }),
        &issuer.access_claims(),
    );

    let cases = [
        ("", TokenError::EmptyToken),
        ("abc.def", TokenError::MalformedToken),
        ("a.b.c.d", TokenError::MalformedToken),
        (
            hs256.as_str(),
            TokenError::UnsupportedAlgorithm {
                alg: "\"HS256\"".into(),
            },
        ),
        (
            with_typ.as_str(),
            TokenError::HeaderWrongPropertyCount { count: 3 },
        ),
    ];

    for (token, expected) in cases {
        let err = verifier.verify_id_token(token).await.unwrap_err();
        match err {
            VerifyError::TokenNotValid(actual) => assert_eq!(actual, expected),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(discovery.hits_async().await, 0);
    assert_eq!(keys.hits_async().await, 0);

    Ok(())
}

#[tokio::test]
async fn keys_are_refetched_after_ttl() -> Result<()> {
    let issuer = Issuer::start().await;
    let discovery = issuer.mock_discovery().await;
    let keys = issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer
        .verifier()
        .with_key_cache_ttl(DurationSecs(600))
        .with_default_leeway(DurationSecs(86_400))
        .build()?;
    let token = token("k1", &issuer.access_claims());

    verifier.verify_access_token(&token).await?;
    issuer.clock.advance(DurationSecs(599));
    verifier.verify_access_token(&token).await?;
    assert_eq!(keys.hits_async().await, 1);

    issuer.clock.advance(DurationSecs(1));
    verifier.verify_access_token(&token).await?;
    assert_eq!(keys.hits_async().await, 2);
    assert_eq!(discovery.hits_async().await, 2);

    Ok(())
}

/// Keeps every value it is given, and counts the fetches it runs
#[derive(Debug)]
struct ForeverCache<K, V> {
    values: Arc<Mutex<HashMap<K, V>>>,
    fetches: Arc<AtomicUsize>,
}

impl<K, V> ForeverCache<K, V> {
    fn new() -> Self {
        Self {
            values: Arc::default(),
            fetches: Arc::default(),
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl<K, V> Clone for ForeverCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            values: Arc::clone(&self.values),
            fetches: Arc::clone(&self.fetches),
        }
    }
}

#[async_trait]
impl<K, V, E> Cache<K, V, E> for ForeverCache<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + fmt::Debug + Send + Sync + 'static,
    E: Send + 'static,
{
    async fn get_or_fetch<'a>(&'a self, key: &'a K, fetch: Fetch<'a, V, E>) -> Result<V, E> {
        let mut values = self.values.lock().await;
        if let Some(value) = values.get(key) {
            return Ok(value.clone());
        }

        self.fetches.fetch_add(1, Ordering::SeqCst);
        let value = fetch.await?;
        values.insert(key.clone(), value.clone());
        Ok(value)
    }
}

#[tokio::test]
async fn custom_caches_replace_the_default_expiry() -> Result<()> {
    let issuer = Issuer::start().await;
    let discovery = issuer.mock_discovery().await;
    let keys = issuer.mock_keys(vec![common::jwk("k1")]).await;

    let discovery_cache = ForeverCache::<String, Arc<DiscoveryDocument>>::new();
    let key_cache = ForeverCache::<KeyId, ResolvedKey>::new();
    let verifier = issuer
        .verifier()
        .with_discovery_cache(discovery_cache.clone())
        .with_key_cache(key_cache.clone())
        .with_discovery_cache_ttl(DurationSecs(1))
        .with_key_cache_ttl(DurationSecs(1))
        .with_default_leeway(DurationSecs(7 * 86_400))
        .build()?;
    let token = token("k1", &issuer.access_claims());

    for _ in 0..3 {
        verifier.verify_access_token(&token).await?;
        issuer.clock.advance(DurationSecs(2 * 86_400));
    }

    let err = verifier
        .verify_access_token(&common::token("k2", &issuer.access_claims()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VerifyError::KeyResolution(KeyResolutionError::KeyNotFound { .. })
    ));
    let _ = verifier
        .verify_access_token(&common::token("k2", &issuer.access_claims()))
        .await;

    assert_eq!(discovery.hits_async().await, 1);
    assert_eq!(keys.hits_async().await, 2);
    assert_eq!(discovery_cache.fetches(), 1);
    assert_eq!(key_cache.fetches(), 2);

    Ok(())
}

#[tokio::test]
async fn failed_discovery_is_retried_on_next_call() -> Result<()> {
    let issuer = Issuer::start().await;
    let failing = issuer
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/oauth2/default/.well-known/openid-configuration");
            then.status(500);
        })
        .await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;
    let token = token("k1", &issuer.access_claims());

    let err = verifier.verify_access_token(&token).await.unwrap_err();
    assert!(matches!(
        err,
        VerifyError::Discovery(DiscoveryError::MetadataFetchFailed { .. })
    ));

    failing.delete_async().await;
    issuer.mock_discovery().await;

    verifier.verify_access_token(&token).await?;

    Ok(())
}

#[tokio::test]
async fn metadata_without_jwks_uri_is_rejected() -> Result<()> {
    let issuer = Issuer::start().await;
    issuer
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/oauth2/default/.well-known/openid-configuration");
            then.status(200).json_body(json!({ "issuer": "somewhere" }));
        })
        .await;

    let verifier = issuer.verifier().build()?;
    let token = token("k1", &issuer.access_claims());

    let err = verifier.verify_access_token(&token).await.unwrap_err();
    assert!(matches!(
        err,
        VerifyError::Discovery(DiscoveryError::MetadataMissingKeysetUri { .. })
    ));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_verifications_share_one_fetch() -> Result<()> {
    let issuer = Issuer::start().await;
    let discovery = issuer.mock_discovery().await;
    let keys = issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer.verifier().build()?;
    let token = Arc::new(token("k1", &issuer.access_claims()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let verifier = verifier.clone();
            let token = Arc::clone(&token);
            tokio::spawn(async move { verifier.verify_access_token(&token).await })
        })
        .collect();

    for task in tasks {
        task.await??;
    }

    assert_eq!(discovery.hits_async().await, 1);
    assert_eq!(keys.hits_async().await, 1);

    Ok(())
}

#[tokio::test]
async fn static_discovery_skips_metadata() -> Result<()> {
    let issuer = Issuer::start().await;
    let discovery = issuer.mock_discovery().await;
    issuer.mock_keys(vec![common::jwk("k1")]).await;

    let verifier = issuer
        .verifier()
        .with_discovery(StaticDiscovery::new(issuer.jwks_uri()))
        .build()?;
    let token = token("k1", &issuer.access_claims());

    verifier.verify_access_token(&token).await?;
    assert_eq!(discovery.hits_async().await, 0);

    Ok(())
}

#[derive(Debug)]
struct TrustingDecoder;

impl KeyDecoder for TrustingDecoder {
    fn decode(&self, _token: &str, key: &Jwk) -> Result<ClaimSet, DecodeError> {
        let kid = key.key_id().map(|kid| kid.as_str().to_owned()).unwrap_or_default();
        Ok(ClaimSet::new()
            .with("iss", "https://example.com")
            .with("kid", kid)
            .with("exp", NOW.0 as f64 + 60.0)
            .with("iat", NOW.0 as f64))
    }
}

#[tokio::test]
async fn custom_decoder_receives_the_resolved_key() -> Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/keys");
            then.status(200).json_body(json!({
                "keys": [{ "kty": "RSA", "kid": "k1", "n": "AQAB", "e": "AQAB" }]
            }));
        })
        .await;

    let verifier = JwtVerifier::builder("https://example.com")
        .with_discovery(StaticDiscovery::new(server.url("/keys")))
        .with_decoder(TrustingDecoder)
        .with_clock(jwtverifier::clock::TestClock::new(NOW))
        .build()?;

    let token = token("k1", &json!({}));
    let jwt = verifier.verify_access_token(&token).await?;

    assert_eq!(jwt.claims().get_str("kid"), Some("k1"));

    Ok(())
}
