//! Verifier settings that can be embedded in application configuration

use std::{num::ParseIntError, time::Duration};

use jwtverifier_clock::DurationSecs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    discovery::Issuer,
    http::DEFAULT_TIMEOUT,
    verifier::{JwtVerifier, JwtVerifierBuilder, DEFAULT_DISCOVERY_CACHE_TTL, DEFAULT_KEY_CACHE_TTL},
};

const ISSUER_VAR: &str = "JWT_VERIFIER_ISSUER";
const LEEWAY_VAR: &str = "JWT_VERIFIER_LEEWAY_SECS";
const TIMEOUT_VAR: &str = "JWT_VERIFIER_TIMEOUT_SECS";
const DISCOVERY_TTL_VAR: &str = "JWT_VERIFIER_DISCOVERY_TTL_SECS";
const KEY_TTL_VAR: &str = "JWT_VERIFIER_KEY_TTL_SECS";

/// An error reading settings from the environment
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A required variable is not set
    #[error("environment variable {0} must be set")]
    MissingVariable(&'static str),

    /// A variable is set, but is not a whole number of seconds
    #[error("environment variable {name} must be a whole number of seconds")]
    InvalidNumber {
        /// The variable name
        name: &'static str,
        /// The parse failure
        #[source]
        source: ParseIntError,
    },
}

/// Plain settings for a [`JwtVerifier`]
///
/// Every field except the issuer has a default, so the smallest valid
/// configuration names only the issuer:
///
/// ```
/// # use jwtverifier::VerifierSettings;
/// let settings: VerifierSettings =
///     serde_json::from_str(r#"{ "issuer": "https://example.com" }"#).unwrap();
///
/// assert_eq!(settings.timeout_secs, 15);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierSettings {
    /// The issuer whose tokens are accepted
    pub issuer: Issuer,
    /// Clock-skew tolerance for `exp` and `iat`
    #[serde(default)]
    pub default_leeway: DurationSecs,
    /// Timeout, in seconds, for each metadata or keyset request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long issuer metadata is cached
    #[serde(default = "default_discovery_cache_ttl")]
    pub discovery_cache_ttl: DurationSecs,
    /// How long keys, and the absence of keys, are cached
    #[serde(default = "default_key_cache_ttl")]
    pub key_cache_ttl: DurationSecs,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_discovery_cache_ttl() -> DurationSecs {
    DEFAULT_DISCOVERY_CACHE_TTL
}

fn default_key_cache_ttl() -> DurationSecs {
    DEFAULT_KEY_CACHE_TTL
}

impl VerifierSettings {
    /// Default settings for `issuer`
    pub fn new(issuer: impl Into<Issuer>) -> Self {
        Self {
            issuer: issuer.into(),
            default_leeway: DurationSecs::ZERO,
            timeout_secs: default_timeout_secs(),
            discovery_cache_ttl: DEFAULT_DISCOVERY_CACHE_TTL,
            key_cache_ttl: DEFAULT_KEY_CACHE_TTL,
        }
    }

    /// Reads settings from `JWT_VERIFIER_*` environment variables
    ///
    /// `JWT_VERIFIER_ISSUER` is required. `JWT_VERIFIER_LEEWAY_SECS`,
    /// `JWT_VERIFIER_TIMEOUT_SECS`, `JWT_VERIFIER_DISCOVERY_TTL_SECS` and
    /// `JWT_VERIFIER_KEY_TTL_SECS` override the defaults when set.
    ///
    /// # Errors
    ///
    /// Fails if the issuer is not set, or if any number cannot be parsed.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let issuer = lookup(ISSUER_VAR)
            .filter(|issuer| !issuer.is_empty())
            .ok_or(SettingsError::MissingVariable(ISSUER_VAR))?;

        let seconds = |name: &'static str| -> Result<Option<u64>, SettingsError> {
            lookup(name)
                .map(|raw| {
                    raw.trim()
                        .parse()
                        .map_err(|source| SettingsError::InvalidNumber { name, source })
                })
                .transpose()
        };

        let mut settings = Self::new(issuer);
        if let Some(leeway) = seconds(LEEWAY_VAR)? {
            settings.default_leeway = DurationSecs(leeway);
        }
        if let Some(timeout) = seconds(TIMEOUT_VAR)? {
            settings.timeout_secs = timeout;
        }
        if let Some(ttl) = seconds(DISCOVERY_TTL_VAR)? {
            settings.discovery_cache_ttl = DurationSecs(ttl);
        }
        if let Some(ttl) = seconds(KEY_TTL_VAR)? {
            settings.key_cache_ttl = DurationSecs(ttl);
        }

        Ok(settings)
    }

    /// A builder preconfigured with these settings
    pub fn into_builder(self) -> JwtVerifierBuilder {
        JwtVerifier::builder(self.issuer)
            .with_default_leeway(self.default_leeway)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_discovery_cache_ttl(self.discovery_cache_ttl)
            .with_key_cache_ttl(self.key_cache_ttl)
    }
}
