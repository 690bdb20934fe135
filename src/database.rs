use crate::errors::ApiError;
use crate::models::KeyRecord;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const KEY_COLUMNS: &str = "id, fingerprint, label, created_at, expires_at, revoked";

// Duplicate fingerprints are rejected by the UNIQUE constraint only
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ApiError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ApiError::Storage(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(include_str!("../db/schema.sql"))?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, ApiError> {
        Self::new(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.conn
            .lock()
            .map_err(|_| ApiError::Storage("connection lock poisoned".to_string()))
    }

    pub fn ping(&self) -> Result<(), ApiError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn insert_key(
        &self,
        fingerprint: &str,
        label: Option<&str>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<KeyRecord, ApiError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO api_keys (fingerprint, label, created_at, expires_at, revoked) VALUES (?, ?, ?, ?, 0)",
            params![fingerprint, label, created_at, expires_at],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(ApiError::Storage("fingerprint already exists".to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(KeyRecord {
            id: conn.last_insert_rowid(),
            fingerprint: fingerprint.to_string(),
            label: label.map(str::to_string),
            created_at,
            expires_at,
            revoked: false,
        })
    }

    pub fn get_key_by_fingerprint(&self, fingerprint: &str) -> Result<Option<KeyRecord>, ApiError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM api_keys WHERE fingerprint = ?", KEY_COLUMNS),
                params![fingerprint],
                key_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_key(&self, id: i64) -> Result<Option<KeyRecord>, ApiError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM api_keys WHERE id = ?", KEY_COLUMNS),
                params![id],
                key_from_row,
            )
            .optional()?;
        Ok(record)
    }

    // Idempotent; unknown id is KeyNotFound
    pub fn revoke_key(&self, id: i64) -> Result<(), ApiError> {
        let conn = self.lock()?;
        let matched = conn.execute("UPDATE api_keys SET revoked = 1 WHERE id = ?", params![id])?;
        if matched == 0 {
            return Err(ApiError::KeyNotFound);
        }
        Ok(())
    }

    pub fn update_label(&self, id: i64, label: Option<&str>) -> Result<KeyRecord, ApiError> {
        let conn = self.lock()?;
        let matched = conn.execute(
            "UPDATE api_keys SET label = ? WHERE id = ?",
            params![label, id],
        )?;
        if matched == 0 {
            return Err(ApiError::KeyNotFound);
        }

        let record = conn.query_row(
            &format!("SELECT {} FROM api_keys WHERE id = ?", KEY_COLUMNS),
            params![id],
            key_from_row,
        )?;
        Ok(record)
    }

    pub fn list_keys(&self) -> Result<Vec<KeyRecord>, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM api_keys ORDER BY created_at ASC, id ASC",
            KEY_COLUMNS
        ))?;
        let records = stmt
            .query_map([], key_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // Deletes revoked or expired records
    pub fn purge_inactive(&self, now: DateTime<Utc>) -> Result<usize, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, expires_at, revoked FROM api_keys")?;
        let doomed = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(_, expires_at, revoked)| *revoked || now >= *expires_at)
            .map(|(id, _, _)| id)
            .collect::<Vec<_>>();
        drop(stmt);

        let tx = conn.unchecked_transaction()?;
        for id in &doomed {
            tx.execute("DELETE FROM api_keys WHERE id = ?", params![id])?;
        }
        tx.commit()?;
        Ok(doomed.len())
    }
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<KeyRecord> {
    Ok(KeyRecord {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        label: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        revoked: row.get(5)?,
    })
}
