//! JSON Web Keys and key sets, as published at an issuer's keyset endpoint

use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An identifier for a JSON Web Key
#[braid(serde, ref_doc = "A borrowed reference to a JWK identifier ([`KeyId`])")]
pub struct KeyId;

/// A public JSON Web Key
///
/// Only the members needed to verify RS256 signatures are interpreted;
/// anything else published alongside them is retained verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Jwk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    e: Option<String>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

impl Jwk {
    /// Constructs an RS256 signing key from its base64url-encoded modulus
    /// and exponent
    pub fn rsa(kid: impl Into<KeyId>, modulus: impl Into<String>, exponent: impl Into<String>) -> Self {
        Self {
            kid: Some(kid.into()),
            kty: Some("RSA".to_owned()),
            alg: Some("RS256".to_owned()),
            usage: Some("sig".to_owned()),
            n: Some(modulus.into()),
            e: Some(exponent.into()),
            other: Map::new(),
        }
    }

    /// The key identifier
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.kid.as_deref()
    }

    /// The key type, such as `RSA`
    pub fn key_type(&self) -> Option<&str> {
        self.kty.as_deref()
    }

    /// The algorithm this key is intended for, if restricted
    pub fn algorithm(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// The intended usage of the key, such as `sig`
    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    /// The base64url-encoded RSA modulus
    pub fn modulus(&self) -> Option<&str> {
        self.n.as_deref()
    }

    /// The base64url-encoded RSA public exponent
    pub fn exponent(&self) -> Option<&str> {
        self.e.as_deref()
    }

    /// Any other published member of the key
    pub fn get(&self, member: &str) -> Option<&Value> {
        self.other.get(member)
    }
}

/// A JSON Web Key Set (JWKS)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    keys: Vec<Jwk>,
}

impl Jwks {
    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Gets the key with the given identifier
    ///
    /// When several keys share an identifier, the last one published wins.
    pub fn get_key_by_id(&self, kid: &KeyIdRef) -> Option<&Jwk> {
        self.keys.iter().rev().find(|k| k.key_id() == Some(kid))
    }
}

impl FromIterator<Jwk> for Jwks {
    fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
