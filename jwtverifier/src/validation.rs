//! Registered claim validation
//!
//! Every check runs regardless of whether an earlier one failed, and all
//! failures are reported together.

use std::collections::HashMap;

use jwtverifier_clock::{DurationSecs, UnixTime};

use crate::{
    claims::{ClaimSet, ClaimValue},
    discovery::Issuer,
    error::{ClaimError, ClaimsRejected},
};

/// A claim that is only checked when an expected value is given
///
/// `iss`, `exp`, and `iat` are always checked and cannot be listed here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExpectedClaim {
    /// The `aud` claim, checked for both kinds of token
    Audience,
    /// The `cid` claim, checked for access tokens
    ClientId,
    /// The `nonce` claim, checked for ID tokens
    Nonce,
}

impl ExpectedClaim {
    /// The registered name of the claim
    pub const fn name(self) -> &'static str {
        match self {
            Self::Audience => "aud",
            Self::ClientId => "cid",
            Self::Nonce => "nonce",
        }
    }

    fn mismatch(self, expected: String, actual: String) -> ClaimError {
        match self {
            Self::Audience => ClaimError::AudienceMismatch { expected, actual },
            Self::ClientId => ClaimError::ClientIdMismatch { expected, actual },
            Self::Nonce => ClaimError::NonceMismatch { expected, actual },
        }
    }
}

/// Per-call overrides for a verification
///
/// The optional `aud`, `cid`, and `nonce` claims are only checked when an
/// expected value has been given for them here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct VerificationOptions {
    leeway: Option<DurationSecs>,
    claims: HashMap<ExpectedClaim, String>,
}

impl VerificationOptions {
    /// Options that check no optional claims and use the default leeway
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the verifier's default leeway for this call
    pub fn with_leeway(mut self, leeway: DurationSecs) -> Self {
        self.leeway = Some(leeway);
        self
    }

    /// Requires `claim` to equal `value`
    ///
    /// Only the claims named by [`ExpectedClaim`] can be required:
    ///
    /// ```compile_fail
    /// # use jwtverifier::VerificationOptions;
    /// let options = VerificationOptions::new().expect_claim("sub", "user@example.com");
    /// ```
    pub fn expect_claim(mut self, claim: ExpectedClaim, value: impl Into<String>) -> Self {
        self.claims.insert(claim, value.into());
        self
    }

    /// Requires the `aud` claim to equal `audience`
    pub fn with_audience(self, audience: impl Into<String>) -> Self {
        self.expect_claim(ExpectedClaim::Audience, audience)
    }

    /// Requires the `cid` claim of an access token to equal `client_id`
    pub fn with_client_id(self, client_id: impl Into<String>) -> Self {
        self.expect_claim(ExpectedClaim::ClientId, client_id)
    }

    /// Requires the `nonce` claim of an ID token to equal `nonce`
    pub fn with_nonce(self, nonce: impl Into<String>) -> Self {
        self.expect_claim(ExpectedClaim::Nonce, nonce)
    }

    /// The leeway override, if any
    pub fn leeway(&self) -> Option<DurationSecs> {
        self.leeway
    }

    /// The expected value of `claim`, if any
    pub fn expected(&self, claim: ExpectedClaim) -> Option<&str> {
        self.claims.get(&claim).map(String::as_str)
    }
}

/// The kind of token being verified, which selects the claims checked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Scoped by client id (`cid`)
    Access,
    /// Scoped by replay nonce (`nonce`)
    Id,
}

impl TokenKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Id => "id",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ClaimsValidator {
    issuer: Issuer,
    default_leeway: DurationSecs,
}

impl ClaimsValidator {
    pub(crate) fn new(issuer: Issuer, default_leeway: DurationSecs) -> Self {
        Self {
            issuer,
            default_leeway,
        }
    }

    pub(crate) fn default_leeway(&self) -> DurationSecs {
        self.default_leeway
    }

    pub(crate) fn validate(
        &self,
        claims: &ClaimSet,
        kind: TokenKind,
        options: &VerificationOptions,
        now: UnixTime,
    ) -> Result<(), ClaimsRejected> {
        let leeway = options.leeway().unwrap_or(self.default_leeway).as_secs_f64();
        let now = now.as_secs_f64();

        let mut reasons = Vec::new();
        let mut check = |result: Result<(), ClaimError>| {
            if let Err(reason) = result {
                reasons.push(reason);
            }
        };

        check(validate_issuer(claims, self.issuer.as_str()));
        check(validate_optional(claims, options, ExpectedClaim::Audience));

        if kind == TokenKind::Access {
            check(validate_optional(claims, options, ExpectedClaim::ClientId));
        }

        check(validate_expiration(claims, now, leeway));
        check(validate_issued_at(claims, now, leeway));

        if kind == TokenKind::Id {
            check(validate_optional(claims, options, ExpectedClaim::Nonce));
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            tracing::debug!(failed = reasons.len(), "claims rejected");
            Err(ClaimsRejected::new(reasons))
        }
    }
}

fn string_claim<'a>(claims: &'a ClaimSet, name: &'static str) -> Result<&'a str, ClaimError> {
    match claims.get(name) {
        None => Err(ClaimError::MissingClaim { claim: name }),
        Some(ClaimValue::String(s)) => Ok(s),
        Some(other) => Err(ClaimError::ClaimTypeMismatch {
            claim: name,
            expected: "string",
            found: other.kind(),
        }),
    }
}

fn numeric_claim(claims: &ClaimSet, name: &'static str) -> Result<f64, ClaimError> {
    match claims.get(name) {
        None => Err(ClaimError::MissingClaim { claim: name }),
        Some(ClaimValue::Number(n)) => Ok(*n),
        Some(other) => Err(ClaimError::ClaimTypeMismatch {
            claim: name,
            expected: "number",
            found: other.kind(),
        }),
    }
}

fn validate_issuer(claims: &ClaimSet, issuer: &str) -> Result<(), ClaimError> {
    let actual = string_claim(claims, "iss")?;
    if actual == issuer {
        Ok(())
    } else {
        Err(ClaimError::IssuerMismatch {
            expected: issuer.to_owned(),
            actual: actual.to_owned(),
        })
    }
}

fn validate_optional(
    claims: &ClaimSet,
    options: &VerificationOptions,
    claim: ExpectedClaim,
) -> Result<(), ClaimError> {
    let Some(expected) = options.expected(claim) else {
        return Ok(());
    };

    let actual = string_claim(claims, claim.name())?;
    if actual == expected {
        Ok(())
    } else {
        Err(claim.mismatch(expected.to_owned(), actual.to_owned()))
    }
}

fn validate_expiration(claims: &ClaimSet, now: f64, leeway: f64) -> Result<(), ClaimError> {
    let exp = numeric_claim(claims, "exp")?;
    if now - leeway > exp {
        Err(ClaimError::TokenExpired { expired_at: exp })
    } else {
        Ok(())
    }
}

fn validate_issued_at(claims: &ClaimSet, now: f64, leeway: f64) -> Result<(), ClaimError> {
    let iat = numeric_claim(claims, "iat")?;
    if now + leeway < iat {
        Err(ClaimError::TokenIssuedInFuture { issued_at: iat })
    } else {
        Ok(())
    }
}
