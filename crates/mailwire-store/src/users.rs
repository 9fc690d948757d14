use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mailwire_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

/// One row in the identity store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a user, or refresh the display name if the email is already
    /// known. Called when a login completes.
    #[instrument(skip(self))]
    pub fn upsert(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<UserRecord, StoreError> {
        let id = UserId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(email) DO UPDATE SET
                     display_name = COALESCE(excluded.display_name, users.display_name)",
                rusqlite::params![id.as_str(), email, display_name, now],
            )?;

            let mut found = query_by_email(conn, email)?;
            found
                .pop()
                .ok_or_else(|| StoreError::NotFound(format!("user {email}")))
        })
    }

    /// All user records matching a principal. The schema enforces email
    /// uniqueness, so more than one row is a data-integrity violation the
    /// caller must treat as fatal, never resolved by picking one.
    pub fn find_by_principal(&self, principal: &str) -> Result<Vec<UserRecord>, StoreError> {
        self.db.with_conn(|conn| query_by_email(conn, principal))
    }

    /// Get a user by ID.
    pub fn get(&self, id: &UserId) -> Result<UserRecord, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, display_name, created_at FROM users WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map([id.as_str()], row_to_user)?;
            rows.next()
                .transpose()?
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }
}

fn query_by_email(conn: &Connection, email: &str) -> Result<Vec<UserRecord>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, email, display_name, created_at FROM users WHERE email = ?1")?;
    let rows = stmt.query_map([email], row_to_user)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: UserId::from_raw(row.get::<_, String>(0)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
    })
}
