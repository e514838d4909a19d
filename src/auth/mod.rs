//! Auth gate: API keys, bearer validation, the JWT exchange, and the admin
//! gate for key-lifecycle operations.

pub mod keys;
pub mod rate_limit;
pub mod token;

use rand::RngCore;

use crate::error::{FindexError, Result};

pub use keys::{ApiKeyStore, KeyInfo, Permission};
pub use rate_limit::{RateLimiter, RouteClass};
pub use token::TOKEN_TTL_SECS;

/// The authenticated caller, as derived from its bearer credential.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: String,
    pub key_name: String,
    pub permissions: Vec<Permission>,
}

impl AuthContext {
    pub fn has_permission(&self, needed: Permission) -> bool {
        self.permissions.contains(&needed) || self.permissions.contains(&Permission::Admin)
    }
}

/// Validates bearer credentials (raw API keys or exchanged JWTs) and gates
/// admin operations.
pub struct AuthService {
    store: ApiKeyStore,
    admin_key: Option<String>,
    jwt_secret: Vec<u8>,
}

impl AuthService {
    /// `admin_key` comes from configuration; when absent, key-lifecycle
    /// endpoints are disabled. The JWT signing secret is derived from the
    /// admin key when present, otherwise generated per process (tokens then
    /// survive only as long as the process, which is fine for a local
    /// service).
    pub fn new(store: ApiKeyStore, admin_key: Option<String>) -> Self {
        let jwt_secret = match &admin_key {
            Some(key) => key.as_bytes().to_vec(),
            None => {
                let mut secret = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                secret
            }
        };
        Self {
            store,
            admin_key,
            jwt_secret,
        }
    }

    pub fn store(&self) -> &ApiKeyStore {
        &self.store
    }

    /// Validate a bearer credential: either an exchanged JWT or a raw key.
    pub async fn authenticate(&self, bearer: &str) -> Result<AuthContext> {
        // JWTs have two dots; raw keys are `ds_...`
        if bearer.matches('.').count() == 2 {
            let claims = token::verify(&self.jwt_secret, bearer)?;
            return Ok(AuthContext {
                key_id: claims.sub,
                key_name: claims.name,
                permissions: claims.permissions,
            });
        }

        let info = self.store.validate(bearer).await?;
        Ok(AuthContext {
            key_id: info.id,
            key_name: info.name,
            permissions: info.permissions,
        })
    }

    /// Gate for key-lifecycle endpoints: the configured admin key itself, or
    /// any valid key carrying the `admin` permission.
    pub async fn require_admin(&self, bearer: &str) -> Result<()> {
        if let Some(ref admin_key) = self.admin_key {
            if bearer == admin_key {
                return Ok(());
            }
        }

        match self.authenticate(bearer).await {
            Ok(ctx) if ctx.has_permission(Permission::Admin) => Ok(()),
            Ok(_) => Err(FindexError::Forbidden("admin permission required".to_string())),
            Err(_) if self.admin_key.is_none() => Err(FindexError::Forbidden(
                "admin key not configured; key management is disabled".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Exchange a valid API key for a signed token.
    pub async fn login(&self, api_key: &str) -> Result<(String, i64, KeyInfo)> {
        let info = self.store.validate(api_key).await?;
        let jwt = token::issue(&self.jwt_secret, &info, TOKEN_TTL_SECS)?;
        Ok((jwt, TOKEN_TTL_SECS, info))
    }
}
