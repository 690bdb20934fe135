use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: i64,
    pub fingerprint: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl KeyRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    pub fn masked_fingerprint(&self) -> String {
        mask_fingerprint(&self.fingerprint)
    }
}

/// Keeps the first eight characters of a fingerprint for display and logs.
pub fn mask_fingerprint(fingerprint: &str) -> String {
    let visible: String = fingerprint.chars().take(8).collect();
    format!("{}…", visible)
}

/// The one place a raw token exists after issuance. Not `Serialize`, so it
/// can only leave the process through an explicit response body.
#[derive(Debug)]
pub struct IssuedKey {
    pub id: i64,
    pub raw_token: String,
    pub record: KeyRecord,
}

// Request/Response models
#[derive(Debug, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    pub label: Option<String>,
    pub ttl_seconds: Option<i64>,
    /// RFC 3339 timestamp, or `YYYY-MM-DD` meaning the end of that day (UTC).
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub id: i64,
    pub api_key: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLabelRequest {
    pub label: Option<String>,
}

/// Listing view: metadata only, the fingerprint is masked.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeySummary {
    pub id: i64,
    pub label: Option<String>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub usable: bool,
}

impl KeySummary {
    pub fn from_record(record: &KeyRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            label: record.label.clone(),
            fingerprint: record.masked_fingerprint(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            revoked: record.revoked,
            usable: record.is_usable_at(now),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub text: Option<String>,
    pub url: Option<String>,
    pub length: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TicketResolveRequest {
    pub ticket_id: Option<String>,
}
