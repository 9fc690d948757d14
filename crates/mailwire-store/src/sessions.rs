use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// One login session. The token is the credential carried (sealed) in the
/// session cookie; the principal is the email it was issued for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    pub principal: String,
    pub created_at: String,
    pub expires_at: Option<String>,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a session for a principal. `ttl_secs: None` means the session
    /// only dies on logout.
    #[instrument(skip(self))]
    pub fn create(
        &self,
        principal: &str,
        ttl_secs: Option<i64>,
    ) -> Result<SessionRecord, StoreError> {
        let token = generate_token();
        let now = Utc::now();
        let expires_at = ttl_secs.map(|secs| (now + Duration::seconds(secs)).to_rfc3339());
        let created_at = now.to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, principal, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![token, principal, created_at, expires_at],
            )?;
            Ok(())
        })?;

        tracing::info!(principal, "session created");

        Ok(SessionRecord {
            token,
            principal: principal.to_string(),
            created_at,
            expires_at,
        })
    }

    /// Look up a session by token. Expired sessions resolve to `None`.
    pub fn lookup(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        let record = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT token, principal, created_at, expires_at FROM sessions WHERE token = ?1",
            )?;
            let mut rows = stmt.query_map([token], |row| {
                Ok(SessionRecord {
                    token: row.get(0)?,
                    principal: row.get(1)?,
                    created_at: row.get(2)?,
                    expires_at: row.get(3)?,
                })
            })?;
            Ok(rows.next().transpose()?)
        })?;

        let Some(record) = record else {
            return Ok(None);
        };

        if let Some(expires_at) = &record.expires_at {
            if expires_at.as_str() <= Utc::now().to_rfc3339().as_str() {
                return Ok(None);
            }
        }

        Ok(Some(record))
    }

    /// Delete a session (logout). Returns whether a row was removed;
    /// deleting an unknown token is not an error.
    #[instrument(skip(self, token))]
    pub fn delete(&self, token: &str) -> Result<bool, StoreError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?)
        })?;
        Ok(removed > 0)
    }

    /// Remove all expired sessions. Returns how many were purged.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now().to_rfc3339();
        let purged = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM sessions WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                [&now],
            )?)
        })?;
        if purged > 0 {
            tracing::info!(purged, "expired sessions purged");
        }
        Ok(purged)
    }
}

/// 256-bit random token, hex-encoded. Unguessable session credential.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
