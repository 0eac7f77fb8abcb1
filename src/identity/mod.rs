pub mod token;

use crate::config::FormVaultConfig;
use crate::error::{AuthError, FormVaultError};
use crate::ids::UserId;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

pub use token::{TokenCodec, TokenKind, VerifiedClaims};

/// Verified caller identity. Only produced by [`IdentityResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    user_id: UserId,
    email: String,
}

impl Principal {
    pub(crate) fn new(user_id: UserId, email: String) -> Self {
        Self { user_id, email }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    codec: TokenCodec,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl IdentityResolver {
    pub fn from_config(config: &FormVaultConfig) -> Result<Self, FormVaultError> {
        let secret = config
            .token_secret
            .clone()
            .ok_or_else(|| FormVaultError::InvalidConfig {
                message: "token_secret is required".into(),
            })?;
        Ok(Self {
            codec: TokenCodec::new(secret, config.token_leeway_secs),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        })
    }

    /// Resolves an access token into a principal.
    pub fn resolve(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        self.resolve_kind(credential, TokenKind::Access)
    }

    /// Resolves a refresh token. Access tokens are rejected here.
    pub fn resolve_refresh(&self, credential: &str) -> Result<Principal, AuthError> {
        self.resolve_kind(Some(credential), TokenKind::Refresh)
    }

    fn resolve_kind(
        &self,
        credential: Option<&str>,
        expected: TokenKind,
    ) -> Result<Principal, AuthError> {
        let result = match credential.map(str::trim).filter(|c| !c.is_empty()) {
            None => Err(AuthError::MissingCredential),
            Some(token) => self.codec.decode(token).and_then(|claims| {
                if claims.kind == expected {
                    Ok(Principal::new(claims.user_id, claims.email))
                } else {
                    Err(AuthError::WrongTokenKind)
                }
            }),
        };
        if let Err(err) = &result {
            warn!(
                cause = err.log_cause(),
                expected_kind = expected.as_str(),
                "credential rejected"
            );
        }
        result
    }

    pub fn issue_token(
        &self,
        kind: TokenKind,
        user_id: UserId,
        email: &str,
        issued_at: u64,
    ) -> Result<String, FormVaultError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };
        self.codec.encode(kind, user_id, email, issued_at, ttl)
    }

    pub fn issue_access_token(&self, user_id: UserId, email: &str) -> Result<String, FormVaultError> {
        self.issue_token(TokenKind::Access, user_id, email, unix_now())
    }

    pub fn issue_refresh_token(
        &self,
        user_id: UserId,
        email: &str,
    ) -> Result<String, FormVaultError> {
        self.issue_token(TokenKind::Refresh, user_id, email, unix_now())
    }

    pub fn issue_pair(&self, user_id: UserId, email: &str) -> Result<TokenPair, FormVaultError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(user_id, email)?,
            refresh_token: self.issue_refresh_token(user_id, email)?,
            token_type: "bearer",
            expires_in: self.access_ttl_secs,
        })
    }

    /// Exchanges a valid refresh token for a fresh access/refresh pair.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, FormVaultError> {
        let principal = self.resolve_refresh(refresh_token)?;
        self.issue_pair(principal.user_id(), principal.email())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
