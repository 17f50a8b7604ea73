#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use httpmock::{prelude::*, Mock};
use jwtverifier::{
    clock::{TestClock, UnixTime},
    JwtVerifier, JwtVerifierBuilder,
};
use once_cell::sync::Lazy;
use rsa::{
    pkcs1v15::SigningKey,
    sha2::Sha256,
    signature::{SignatureEncoding, Signer},
    traits::PublicKeyParts,
    RsaPrivateKey,
};
use serde_json::{json, Value};

pub const NOW: UnixTime = UnixTime(1_700_000_000);
pub const ISSUER_PATH: &str = "/oauth2/default";
pub const KEYS_PATH: &str = "/oauth2/default/v1/keys";

static SIGNING_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("key generation"));

/// The public half of the test signing key, as a JWK
pub fn jwk(kid: &str) -> Value {
    let public = SIGNING_KEY.to_public_key();
    json!({
        "kty": "RSA",
        "alg": "RS256",
        "use": "sig",
        "kid": kid,
        "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    })
}

/// Signs a token with the test signing key
pub fn sign(header: &Value, claims: &Value) -> String {
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
    );

    let signer = SigningKey::<Sha256>::new(SIGNING_KEY.clone());
    let signature = signer.sign(signing_input.as_bytes()).to_bytes();

    format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
}

/// Signs a token naming `kid` in its header
pub fn token(kid: &str, claims: &Value) -> String {
    sign(&json!({ "alg": "RS256", "kid": kid }), claims)
}

/// A mock issuer publishing metadata and a keyset
pub struct Issuer {
    pub server: MockServer,
    pub clock: TestClock,
}

impl Issuer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start_async().await,
            clock: TestClock::new(NOW),
        }
    }

    pub fn url(&self) -> String {
        self.server.url(ISSUER_PATH)
    }

    pub fn jwks_uri(&self) -> String {
        self.server.url(KEYS_PATH)
    }

    pub async fn mock_discovery(&self) -> Mock<'_> {
        let body = json!({
            "issuer": self.url(),
            "authorization_endpoint": self.server.url("/oauth2/default/v1/authorize"),
            "jwks_uri": self.jwks_uri(),
        });

        self.server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/oauth2/default/.well-known/openid-configuration");
                then.status(200).json_body(body);
            })
            .await
    }

    pub async fn mock_keys(&self, keys: Vec<Value>) -> Mock<'_> {
        self.server
            .mock_async(|when, then| {
                when.method(GET).path(KEYS_PATH);
                then.status(200).json_body(json!({ "keys": keys }));
            })
            .await
    }

    /// A builder for a verifier of this issuer's tokens, driven by the mock
    /// clock
    pub fn verifier(&self) -> JwtVerifierBuilder {
        JwtVerifier::builder(self.url()).with_clock(self.clock.clone())
    }

    /// Standard access token claims, valid for an hour from [`NOW`]
    pub fn access_claims(&self) -> Value {
        json!({
            "iss": self.url(),
            "aud": "api://default",
            "cid": "client1",
            "sub": "user@example.com",
            "exp": NOW.0 + 3600,
            "iat": NOW.0,
        })
    }

    /// Standard ID token claims, valid for an hour from [`NOW`]
    pub fn id_claims(&self, nonce: &str) -> Value {
        json!({
            "iss": self.url(),
            "aud": "client1",
            "sub": "user@example.com",
            "nonce": nonce,
            "exp": NOW.0 + 3600,
            "iat": NOW.0,
        })
    }
}
