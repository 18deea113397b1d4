use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Auth session persisted between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = match opts.path {
            Some(path) => path,
            None => default_path().context("storage: resolve default path")?,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("storage: create directory {}", dir.display()))?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        prepare(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Replaces the persisted session. Only one session is kept.
    pub fn save_session(&self, mut session: StoredSession) -> Result<()> {
        if session.user_id.is_empty() {
            bail!("storage: user id required");
        }
        if session.access_token.is_empty() {
            bail!("storage: access token required");
        }
        session.updated_at = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO session (slot, user_id, email, access_token, refresh_token, token_type, expires_at, updated_at)
VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(slot) DO UPDATE SET
  user_id = excluded.user_id,
  email = excluded.email,
  access_token = excluded.access_token,
  refresh_token = excluded.refresh_token,
  token_type = excluded.token_type,
  expires_at = excluded.expires_at,
  updated_at = excluded.updated_at
"#,
            params![
                session.user_id,
                session.email,
                session.access_token,
                session.refresh_token,
                session.token_type,
                session.expires_at.timestamp(),
                session.updated_at.timestamp(),
            ],
        )
        .context("storage: save session")?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<StoredSession>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT user_id, email, access_token, refresh_token, token_type, expires_at, updated_at
FROM session
WHERE slot = 1
"#,
            [],
            session_from_row,
        )
        .optional()
        .context("storage: query session")
    }

    pub fn clear_session(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM session", [])
            .context("storage: clear session")?;
        Ok(())
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSession> {
    let expires: i64 = row.get(5)?;
    let updated: i64 = row.get(6)?;
    Ok(StoredSession {
        user_id: row.get(0)?,
        email: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        token_type: row.get(4)?,
        expires_at: Utc
            .timestamp_opt(expires, 0)
            .single()
            .unwrap_or_else(Utc::now),
        updated_at: Utc
            .timestamp_opt(updated, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn prepare(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("storage: enable WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .context("storage: set busy timeout")?;

    // Schema version lives in `user_version`; each entry bumps it by one.
    let applied: usize = conn
        .pragma_query_value(None, "user_version", |row| row.get::<_, i64>(0))
        .context("storage: read schema version")?
        .try_into()
        .unwrap_or(0);
    for (version, sql) in migrations().iter().enumerate().skip(applied) {
        let tx = conn
            .unchecked_transaction()
            .context("storage: begin migration")?;
        tx.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {}", version + 1))?;
        tx.pragma_update(None, "user_version", (version + 1) as i64)?;
        tx.commit().context("storage: commit migration")?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS session (
  slot INTEGER PRIMARY KEY CHECK (slot = 1),
  user_id TEXT NOT NULL,
  email TEXT NOT NULL,
  access_token TEXT NOT NULL,
  refresh_token TEXT NOT NULL,
  token_type TEXT NOT NULL,
  expires_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("picshare").join("state.db"))
}
