use crate::error::{AuthError, FormVaultError};
use crate::ids::UserId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Claims as they appear on the wire. Nothing outside this module sees them.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    exp: u64,
    #[serde(default)]
    iat: Option<u64>,
    #[serde(default, rename = "type")]
    kind: Option<TokenKind>,
}

/// Claims after structure, signature and expiry checks passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub user_id: UserId,
    pub email: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub kind: TokenKind,
}

/// HS256 JWT codec.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<Zeroizing<Vec<u8>>>,
    leeway_secs: u64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret_len", &self.secret.len())
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: Arc<Zeroizing<Vec<u8>>>, leeway_secs: u64) -> Self {
        Self {
            secret,
            leeway_secs,
        }
    }

    pub fn encode(
        &self,
        kind: TokenKind,
        user_id: UserId,
        email: &str,
        issued_at: u64,
        ttl_secs: u64,
    ) -> Result<String, FormVaultError> {
        let claims = WireClaims {
            sub: user_id.to_string(),
            email: Some(email.to_string()),
            exp: issued_at.saturating_add(ttl_secs),
            iat: Some(issued_at),
            kind: Some(kind),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| FormVaultError::Encode(e.to_string()))
    }

    /// Verifies structure, algorithm, signature and expiry against the
    /// system clock. Token kind is left to the caller so refresh and access
    /// paths share one verifier.
    pub fn decode(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = jsonwebtoken::decode::<WireClaims>(
            token.trim(),
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
            _ => AuthError::InvalidCredential,
        })?;

        let claims = data.claims;
        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::InvalidCredential)?;
        let email = claims
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or(AuthError::InvalidCredential)?;

        Ok(VerifiedClaims {
            user_id,
            email,
            issued_at: claims.iat.unwrap_or(0),
            expires_at: claims.exp,
            kind: claims.kind.unwrap_or(TokenKind::Access),
        })
    }
}
