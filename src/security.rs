use crate::config::validate_secret;
use crate::database::Database;
use crate::errors::{ApiError, AuthError};
use crate::models::{mask_fingerprint, IssuedKey, KeyRecord};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of randomness in a raw token (256 bits).
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Keyed one-way transform from raw token to stored fingerprint
/// (HMAC-SHA256, lowercase hex, 64 chars).
#[derive(Clone)]
pub struct KeyHasher {
    mac: HmacSha256,
}

impl std::fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyHasher { .. }")
    }
}

impl KeyHasher {
    pub fn new(secret: &str) -> Result<Self, ApiError> {
        validate_secret(secret)?;
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ApiError::Config(format!("invalid HMAC key: {}", e)))?;
        Ok(Self { mac })
    }

    pub fn hash(&self, raw_token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw_token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// `<prefix>_<base32 of 32 random bytes>`
pub fn generate_raw_token(prefix: &str) -> String {
    let mut random_bytes = [0u8; TOKEN_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut random_bytes);

    let encoded = base32::encode(base32::Alphabet::RFC4648 { padding: false }, &random_bytes);
    if prefix.is_empty() {
        encoded
    } else {
        format!("{}_{}", prefix, encoded)
    }
}

/// Issues, resolves and administers API keys.
#[derive(Clone)]
pub struct ApiKeyService {
    pub db: Database,
    pub hasher: KeyHasher,
    pub prefix: String,
}

impl ApiKeyService {
    pub fn new(db: Database, hasher: KeyHasher, prefix: String) -> Self {
        Self { db, hasher, prefix }
    }

    pub fn fingerprint(&self, raw_token: &str) -> String {
        self.hasher.hash(raw_token)
    }

    /// Generates a token, persists its fingerprint with `expires_at = now + ttl`
    /// and hands the raw token back. It is not kept anywhere else.
    pub fn issue(&self, label: Option<&str>, ttl: Duration) -> Result<IssuedKey, ApiError> {
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or_else(|| ApiError::BadRequest("ttl out of range".to_string()))?;
        self.issue_until(label, created_at, expires_at)
    }

    pub fn issue_until(
        &self,
        label: Option<&str>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedKey, ApiError> {
        let raw_token = generate_raw_token(&self.prefix);
        let fingerprint = self.hasher.hash(&raw_token);
        let record = self.db.insert_key(&fingerprint, label, created_at, expires_at)?;

        tracing::info!(
            key_id = record.id,
            label = ?record.label,
            fingerprint = %record.masked_fingerprint(),
            expires_at = %record.expires_at,
            "issued API key"
        );

        Ok(IssuedKey {
            id: record.id,
            raw_token,
            record,
        })
    }

    pub fn authorize(&self, raw_token: Option<&str>) -> Result<KeyRecord, ApiError> {
        self.authorize_at(raw_token, Utc::now())
    }

    /// Resolves a presented token. Checks run in a fixed order: missing,
    /// not found, revoked, expired. Any string is hashed and looked up; there
    /// is no format pre-check that would answer faster for malformed input.
    pub fn authorize_at(
        &self,
        raw_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<KeyRecord, ApiError> {
        let raw_token = match raw_token.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthError::Missing.into()),
        };

        let fingerprint = self.hasher.hash(raw_token);
        let record = match self.db.get_key_by_fingerprint(&fingerprint)? {
            Some(record) => record,
            None => {
                tracing::warn!(fingerprint = %mask_fingerprint(&fingerprint), "unknown API key");
                return Err(AuthError::Invalid.into());
            }
        };

        if record.revoked {
            tracing::warn!(key_id = record.id, "revoked API key presented");
            return Err(AuthError::Revoked.into());
        }

        if record.is_expired_at(now) {
            tracing::warn!(key_id = record.id, expires_at = %record.expires_at, "expired API key presented");
            return Err(AuthError::Expired.into());
        }

        Ok(record)
    }

    pub fn revoke(&self, id: i64) -> Result<(), ApiError> {
        self.db.revoke_key(id)?;
        tracing::info!(key_id = id, "revoked API key");
        Ok(())
    }

    pub fn relabel(&self, id: i64, label: Option<&str>) -> Result<KeyRecord, ApiError> {
        self.db.update_label(id, label)
    }

    pub fn list_all(&self) -> Result<Vec<KeyRecord>, ApiError> {
        self.db.list_keys()
    }

    pub fn purge_inactive(&self) -> Result<usize, ApiError> {
        let purged = self.db.purge_inactive(Utc::now())?;
        tracing::info!(purged, "purged inactive API keys");
        Ok(purged)
    }
}
