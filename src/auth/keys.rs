//! API key store: creation, listing, revocation, validation.
//!
//! The plaintext secret is returned exactly once at creation; only its
//! SHA-256 hash is persisted.

use chrono::{Duration, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{FindexError, Result};

/// Capability tag carried by an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Search,
    Index,
    Admin,
}

/// Key metadata exposed to callers. Never contains the secret or its hash.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub permissions: Vec<Permission>,
    pub active: bool,
}

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Base62-encode bytes (big-endian repeated division).
fn base62_encode(bytes: &[u8]) -> String {
    let mut digits: Vec<u8> = bytes.to_vec();
    let mut out = Vec::new();

    while digits.iter().any(|&d| d != 0) {
        let mut remainder = 0u32;
        for digit in digits.iter_mut() {
            let value = (remainder << 8) | *digit as u32;
            *digit = (value / 62) as u8;
            remainder = value % 62;
        }
        out.push(BASE62[remainder as usize]);
    }

    if out.is_empty() {
        out.push(BASE62[0]);
    }
    out.reverse();
    String::from_utf8(out).expect("alphabet is ASCII")
}

/// SHA-256 (hex) of the full presented token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate a fresh secret: `ds_` + base62 of 32 random bytes.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ds_{}", base62_encode(&bytes))
}

/// Key store over the `api_keys` table.
#[derive(Clone)]
pub struct ApiKeyStore {
    db: Db,
}

impl ApiKeyStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a key. Returns the plaintext secret (shown once) and the
    /// stored metadata. Key names must be unique.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        expires_days: Option<i64>,
        permissions: Vec<Permission>,
    ) -> Result<(String, KeyInfo)> {
        if name.trim().is_empty() {
            return Err(FindexError::InvalidInput("key name must not be empty".to_string()));
        }

        let secret = generate_secret();
        let info = KeyInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.map(String::from),
            created_at: Utc::now().to_rfc3339(),
            expires_at: expires_days.map(|d| (Utc::now() + Duration::days(d)).to_rfc3339()),
            permissions: if permissions.is_empty() {
                vec![Permission::Read, Permission::Search]
            } else {
                permissions
            },
            active: true,
        };

        let key_hash = hash_token(&secret);
        let row = info.clone();
        self.db
            .with_connection(move |conn| {
                let taken: Option<String> = conn
                    .query_row(
                        "SELECT key_id FROM api_keys WHERE name = ?1",
                        params![row.name],
                        |r| r.get(0),
                    )
                    .optional()?;
                if taken.is_some() {
                    return Err(FindexError::Conflict(format!("key name taken: {}", row.name)));
                }

                conn.execute(
                    "INSERT INTO api_keys (key_id, name, description, key_hash, created_at,
                                           expires_at, permissions, active)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
                    params![
                        row.id,
                        row.name,
                        row.description,
                        key_hash,
                        row.created_at,
                        row.expires_at,
                        serde_json::to_string(&row.permissions)
                            .map_err(|e| FindexError::Internal(e.to_string()))?,
                    ],
                )?;
                Ok::<(), FindexError>(())
            })
            .await?;

        log::info!("Created API key {} ({})", info.name, info.id);
        Ok((secret, info))
    }

    /// All keys, hashes excluded.
    pub async fn list(&self) -> Result<Vec<KeyInfo>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT key_id, name, description, created_at, expires_at, permissions, active
                     FROM api_keys ORDER BY created_at",
                )?;
                let rows = stmt.query_map([], row_to_info)?;
                let mut keys = Vec::new();
                for row in rows {
                    keys.push(row?);
                }
                Ok::<Vec<KeyInfo>, FindexError>(keys)
            })
            .await
    }

    /// Soft-revoke a key by id.
    pub async fn revoke(&self, key_id: &str) -> Result<KeyInfo> {
        let key_id = key_id.to_string();
        self.db
            .with_connection(move |conn| {
                let updated = conn.execute(
                    "UPDATE api_keys SET active = 0 WHERE key_id = ?1",
                    params![key_id],
                )?;
                if updated == 0 {
                    return Err(FindexError::NotFound(format!("API key not found: {}", key_id)));
                }
                let info = conn.query_row(
                    "SELECT key_id, name, description, created_at, expires_at, permissions, active
                     FROM api_keys WHERE key_id = ?1",
                    params![key_id],
                    row_to_info,
                )?;
                Ok::<KeyInfo, FindexError>(info)
            })
            .await
    }

    /// Validate a presented token: must exist, be active, and be unexpired.
    pub async fn validate(&self, token: &str) -> Result<KeyInfo> {
        let key_hash = hash_token(token);
        let info = self
            .db
            .with_connection(move |conn| {
                let info = conn
                    .query_row(
                        "SELECT key_id, name, description, created_at, expires_at, permissions, active
                         FROM api_keys WHERE key_hash = ?1",
                        params![key_hash],
                        row_to_info,
                    )
                    .optional()?;
                Ok::<Option<KeyInfo>, FindexError>(info)
            })
            .await?;

        let info = info.ok_or_else(|| FindexError::Unauthenticated("invalid API key".to_string()))?;

        if !info.active {
            return Err(FindexError::Unauthenticated("API key has been revoked".to_string()));
        }

        if let Some(ref expires_at) = info.expires_at {
            let expiry = chrono::DateTime::parse_from_rfc3339(expires_at)
                .map_err(|e| FindexError::Internal(format!("bad expiry in store: {}", e)))?;
            if Utc::now() > expiry {
                return Err(FindexError::Forbidden("API key has expired".to_string()));
            }
        }

        Ok(info)
    }

    /// Number of stored keys (stats endpoint).
    pub async fn count(&self) -> Result<usize> {
        self.db
            .with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM api_keys", [], |r| r.get(0))?;
                Ok::<usize, FindexError>(n as usize)
            })
            .await
    }
}

fn row_to_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyInfo> {
    let permissions_json: String = row.get(5)?;
    Ok(KeyInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        permissions: serde_json::from_str(&permissions_json).unwrap_or_default(),
        active: row.get::<_, i64>(6)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    async fn setup() -> (ApiKeyStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = Db::new(tmp.path().join("test.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| crate::db::migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (ApiKeyStore::new(db), tmp)
    }

    #[test]
    fn test_base62_encode() {
        assert_eq!(base62_encode(&[0]), "0");
        assert_eq!(base62_encode(&[61]), "z");
        assert_eq!(base62_encode(&[1, 0]), "48"); // 256 = 4*62 + 8
    }

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_secret();
        assert!(secret.starts_with("ds_"));
        assert!(secret.len() > 40);
        assert!(secret[3..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_secret());
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let (store, _tmp) = setup().await;

        let (secret, info) = store
            .create("ci", Some("integration tests"), None, vec![Permission::Search])
            .await
            .unwrap();

        assert!(secret.starts_with("ds_"));
        assert_eq!(info.permissions, vec![Permission::Search]);

        let validated = store.validate(&secret).await.unwrap();
        assert_eq!(validated.id, info.id);
        assert_eq!(validated.name, "ci");
    }

    #[tokio::test]
    async fn test_default_permissions() {
        let (store, _tmp) = setup().await;
        let (_, info) = store.create("plain", None, None, vec![]).await.unwrap();
        assert_eq!(info.permissions, vec![Permission::Read, Permission::Search]);
    }

    #[tokio::test]
    async fn test_name_conflict() {
        let (store, _tmp) = setup().await;
        store.create("dup", None, None, vec![]).await.unwrap();
        let err = store.create("dup", None, None, vec![]).await.unwrap_err();
        assert!(matches!(err, FindexError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let (store, _tmp) = setup().await;
        let err = store.validate("ds_not_a_real_key").await.unwrap_err();
        assert!(matches!(err, FindexError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_revoked_key_rejected() {
        let (store, _tmp) = setup().await;
        let (secret, info) = store.create("gone", None, None, vec![]).await.unwrap();

        let revoked = store.revoke(&info.id).await.unwrap();
        assert!(!revoked.active);

        let err = store.validate(&secret).await.unwrap_err();
        assert!(matches!(err, FindexError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_revoke_unknown_key() {
        let (store, _tmp) = setup().await;
        let err = store.revoke("missing-id").await.unwrap_err();
        assert!(matches!(err, FindexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_key_forbidden() {
        let (store, _tmp) = setup().await;
        // Negative expiry puts the deadline in the past
        let (secret, _) = store.create("stale", None, Some(-1), vec![]).await.unwrap();

        let err = store.validate(&secret).await.unwrap_err();
        assert!(matches!(err, FindexError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_list_excludes_secrets() {
        let (store, _tmp) = setup().await;
        store.create("a", None, None, vec![]).await.unwrap();
        store.create("b", None, None, vec![Permission::Admin]).await.unwrap();

        let keys = store.list().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
