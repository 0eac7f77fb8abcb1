use crate::error::FormVaultError;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

pub const MIN_PRODUCTION_SECRET_BYTES: usize = 32;

/// Runtime configuration for a FormVault instance.
#[derive(Debug, Clone)]
pub struct FormVaultConfig {
    /// HMAC key for bearer tokens. Wrapped in Arc<Zeroizing<>> so the key is
    /// zeroed when the last reference is dropped.
    pub token_secret: Option<Arc<Zeroizing<Vec<u8>>>>,
    pub require_strong_secret: bool,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub token_leeway_secs: u64,
    pub authenticated_pool_size: usize,
    pub service_pool_size: usize,
    pub service_sessions_enabled: bool,
    pub pool_acquire_timeout_ms: u64,
}

impl Default for FormVaultConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            require_strong_secret: false,
            access_token_ttl_secs: 30 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            token_leeway_secs: 0,
            authenticated_pool_size: 15,
            service_pool_size: 7,
            service_sessions_enabled: true,
            pool_acquire_timeout_ms: 5_000,
        }
    }
}

impl FormVaultConfig {
    pub fn production(secret: Vec<u8>) -> Self {
        Self {
            token_secret: Some(Arc::new(Zeroizing::new(secret))),
            require_strong_secret: true,
            ..Self::default()
        }
    }

    /// Small pools and a short acquire wait, for local runs and tests.
    pub fn development() -> Self {
        Self {
            token_secret: Some(Arc::new(Zeroizing::new(
                b"formvault-development-secret-not-for-production".to_vec(),
            ))),
            require_strong_secret: false,
            authenticated_pool_size: 4,
            service_pool_size: 2,
            pool_acquire_timeout_ms: 1_000,
            ..Self::default()
        }
    }

    pub fn secret(&self) -> Option<&[u8]> {
        self.token_secret.as_ref().map(|arc| &***arc as &[u8])
    }

    pub fn with_token_secret(mut self, secret: Vec<u8>) -> Self {
        self.token_secret = Some(Arc::new(Zeroizing::new(secret)));
        self
    }

    pub fn with_token_ttls(mut self, access_secs: u64, refresh_secs: u64) -> Self {
        self.access_token_ttl_secs = access_secs;
        self.refresh_token_ttl_secs = refresh_secs;
        self
    }

    pub fn with_token_leeway(mut self, secs: u64) -> Self {
        self.token_leeway_secs = secs;
        self
    }

    pub fn with_pool_sizes(mut self, authenticated: usize, service: usize) -> Self {
        self.authenticated_pool_size = authenticated;
        self.service_pool_size = service;
        self
    }

    pub fn with_service_sessions(mut self, enabled: bool) -> Self {
        self.service_sessions_enabled = enabled;
        self
    }

    pub fn with_pool_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.pool_acquire_timeout_ms = ms;
        self
    }

    pub fn pool_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_acquire_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), FormVaultError> {
        let invalid = |message: &str| FormVaultError::InvalidConfig {
            message: message.to_string(),
        };
        let secret = self
            .secret()
            .ok_or_else(|| invalid("token_secret is required"))?;
        if secret.is_empty() {
            return Err(invalid("token_secret must not be empty"));
        }
        if self.require_strong_secret && secret.len() < MIN_PRODUCTION_SECRET_BYTES {
            return Err(FormVaultError::InvalidConfig {
                message: format!(
                    "token_secret must be at least {MIN_PRODUCTION_SECRET_BYTES} bytes"
                ),
            });
        }
        if self.access_token_ttl_secs == 0 {
            return Err(invalid("access_token_ttl_secs must be > 0"));
        }
        if self.refresh_token_ttl_secs <= self.access_token_ttl_secs {
            return Err(invalid(
                "refresh_token_ttl_secs must exceed access_token_ttl_secs",
            ));
        }
        if self.authenticated_pool_size == 0 {
            return Err(invalid("authenticated_pool_size must be > 0"));
        }
        if self.service_sessions_enabled && self.service_pool_size == 0 {
            return Err(invalid(
                "service_pool_size must be > 0 when service sessions are enabled",
            ));
        }
        if self.pool_acquire_timeout_ms == 0 {
            return Err(invalid("pool_acquire_timeout_ms must be > 0"));
        }
        Ok(())
    }
}
