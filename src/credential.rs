/// Signed, time-bounded credentials (tickets and access tokens)
///
/// Every credential is an HS256 JWT whose single audience entry encodes
/// `"{identity}-{purpose}"`. The encoding is kept as-is for compatibility
/// with already issued tokens; once decoded, identity and purpose travel as
/// separate typed fields.
use crate::error::{LinkError, LinkResult};
use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Fixed issuer of every credential
pub const ISSUER: &str = "sast";

/// What a credential may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    RegisterTicket,
    LoginTicket,
    ResetPasswordTicket,
    AccessToken,
    OAuthCheckEmailTicket,
    OAuthAccessToken,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::RegisterTicket => "register-ticket",
            Purpose::LoginTicket => "login-ticket",
            Purpose::ResetPasswordTicket => "reset-password-ticket",
            Purpose::AccessToken => "access-token",
            Purpose::OAuthCheckEmailTicket => "oauth-check-email-ticket",
            Purpose::OAuthAccessToken => "oauth-access-token",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register-ticket" => Ok(Purpose::RegisterTicket),
            "login-ticket" => Ok(Purpose::LoginTicket),
            "reset-password-ticket" => Ok(Purpose::ResetPasswordTicket),
            "access-token" => Ok(Purpose::AccessToken),
            "oauth-check-email-ticket" => Ok(Purpose::OAuthCheckEmailTicket),
            "oauth-access-token" => Ok(Purpose::OAuthAccessToken),
            _ => Err(LinkError::PurposeMismatch),
        }
    }
}

/// Registered claims carried by every credential
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: Vec<String>,
}

/// Decoded audience: who the credential is for and what it is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub identity: String,
    pub purpose: Purpose,
}

impl Subject {
    /// Split an audience entry on its first `-`
    fn parse(audience: &str) -> LinkResult<Self> {
        let (identity, purpose) = audience.split_once('-').ok_or(LinkError::Malformed)?;
        if identity.is_empty() {
            return Err(LinkError::Malformed);
        }
        Ok(Self {
            identity: identity.to_lowercase(),
            purpose: purpose.parse()?,
        })
    }
}

/// Issues and validates credentials with a single symmetric secret
#[derive(Clone)]
pub struct CredentialCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl CredentialCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a credential valid for `ttl` from now
    pub fn issue(&self, identity: &str, purpose: Purpose, ttl: Duration) -> LinkResult<String> {
        self.issue_at(identity, purpose, ttl, Utc::now().timestamp())
    }

    /// Issue a credential as if the current time were `now` (unix seconds)
    pub fn issue_at(
        &self,
        identity: &str,
        purpose: Purpose,
        ttl: Duration,
        now: i64,
    ) -> LinkResult<String> {
        let claims = Claims {
            iss: ISSUER.to_string(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            aud: vec![format!("{}-{}", identity, purpose)],
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| LinkError::Jwt(format!("Failed to sign credential: {}", e)))
    }

    /// Verify signature and expiry; does not look at the purpose
    pub fn validate(&self, token: &str) -> LinkResult<Claims> {
        self.validate_at(token, Utc::now().timestamp())
    }

    /// Verify signature and expiry against an explicit clock
    pub fn validate_at(&self, token: &str, now: i64) -> LinkResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the supplied clock, with no leeway
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!("credential rejected: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => LinkError::Expired,
                _ => LinkError::Malformed,
            }
        })?;

        if now >= data.claims.exp {
            return Err(LinkError::Expired);
        }

        Ok(data.claims)
    }

    /// Validate and decode the audience into identity and purpose
    pub fn subject(&self, token: &str) -> LinkResult<Subject> {
        self.subject_at(token, Utc::now().timestamp())
    }

    pub fn subject_at(&self, token: &str, now: i64) -> LinkResult<Subject> {
        let claims = self.validate_at(token, now)?;
        match claims.aud.as_slice() {
            [audience] => Subject::parse(audience),
            _ => Err(LinkError::Malformed),
        }
    }

    /// Validate the credential and return its lower-cased identity, provided
    /// it was issued for `expected`
    pub fn identity_for(&self, token: &str, expected: Purpose) -> LinkResult<String> {
        self.identity_for_at(token, expected, Utc::now().timestamp())
    }

    pub fn identity_for_at(&self, token: &str, expected: Purpose, now: i64) -> LinkResult<String> {
        let subject = self.subject_at(token, now)?;
        if subject.purpose != expected {
            return Err(LinkError::PurposeMismatch);
        }
        Ok(subject.identity)
    }
}
