use arbor_core::codec::{
    decode_session, decode_snapshot, decode_tree_spec, encode_session, encode_snapshot,
    encode_tree_spec, CodecError,
};
use arbor_core::plan::{PlanningSession, SessionId, SessionStatus, TreeSpec};
use arbor_core::types::{ObservedSnapshot, PinId, RepoId, RepositoryPin, ReparentedEdge};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("stored payload error: {source}")]
    Codec {
        #[from]
        source: CodecError,
    },
    #[error("timestamp parse error for value '{value}': {source}")]
    TimestampParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("repository pin {id} not found")]
    UnknownPin { id: PinId },
    #[error("planning session {id} is confirmed and can no longer be rewritten")]
    SessionConfirmed { id: SessionId },
    #[error("stored snapshot version {value} is negative")]
    InvalidVersion { value: i64 },
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

const PIN_COLUMNS: &str = "id, repo_id, local_path, base_branch, last_used_at, snapshot_version";

struct PinRow {
    id: i64,
    repo_id: String,
    local_path: String,
    base_branch: String,
    last_used_at: String,
    snapshot_version: i64,
}

impl PinRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            local_path: row.get(2)?,
            base_branch: row.get(3)?,
            last_used_at: row.get(4)?,
            snapshot_version: row.get(5)?,
        })
    }

    fn into_pin(self) -> Result<RepositoryPin, PersistenceError> {
        Ok(RepositoryPin {
            id: PinId(self.id),
            repo_id: RepoId(self.repo_id),
            local_path: PathBuf::from(self.local_path),
            base_branch: self.base_branch,
            last_used_at: parse_timestamp(self.last_used_at)?,
            snapshot_version: version_from_sql(self.snapshot_version)?,
        })
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS repository_pins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    local_path TEXT NOT NULL UNIQUE,
    repo_id TEXT NOT NULL,
    base_branch TEXT NOT NULL,
    last_used_at TEXT NOT NULL,
    snapshot_json TEXT,
    snapshot_version INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS planning_sessions (
    session_id TEXT PRIMARY KEY,
    repo_id TEXT NOT NULL,
    base_branch TEXT NOT NULL,
    status TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_repo ON planning_sessions(repo_id, base_branch, status);

CREATE TABLE IF NOT EXISTS tree_specs (
    repo_id TEXT NOT NULL,
    base_branch TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (repo_id, base_branch)
);
"#,
        )?;
        Ok(())
    }

    /// Registers `local_path`, or touches `last_used_at` when it is already pinned.
    pub fn register_pin(
        &self,
        local_path: &Path,
        repo_id: &RepoId,
        base_branch: &str,
        at: DateTime<Utc>,
    ) -> Result<RepositoryPin, PersistenceError> {
        let sql = format!(
            r#"
INSERT INTO repository_pins (local_path, repo_id, base_branch, last_used_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(local_path) DO UPDATE SET
  last_used_at = excluded.last_used_at
RETURNING {PIN_COLUMNS}
"#
        );
        let row = self.conn.query_row(
            &sql,
            params![
                local_path.to_string_lossy(),
                repo_id.0,
                base_branch,
                at.to_rfc3339()
            ],
            PinRow::from_row,
        )?;
        row.into_pin()
    }

    pub fn load_pin(&self, id: PinId) -> Result<Option<RepositoryPin>, PersistenceError> {
        let sql = format!("SELECT {PIN_COLUMNS} FROM repository_pins WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id.0], PinRow::from_row)
            .optional()?
            .map(PinRow::into_pin)
            .transpose()
    }

    pub fn list_pins(&self) -> Result<Vec<RepositoryPin>, PersistenceError> {
        let sql = format!("SELECT {PIN_COLUMNS} FROM repository_pins ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], PinRow::from_row)?;
        let mut pins = Vec::new();
        for row in rows {
            pins.push(row?.into_pin()?);
        }
        Ok(pins)
    }

    pub fn set_pin_repo_id(&self, id: PinId, repo_id: &RepoId) -> Result<(), PersistenceError> {
        let updated = self.conn.execute(
            "UPDATE repository_pins SET repo_id = ?1 WHERE id = ?2",
            params![repo_id.0, id.0],
        )?;
        if updated == 0 {
            return Err(PersistenceError::UnknownPin { id });
        }
        Ok(())
    }

    /// Replaces the cached snapshot and returns the bumped version.
    pub fn store_snapshot(
        &self,
        id: PinId,
        snapshot: &ObservedSnapshot,
    ) -> Result<u64, PersistenceError> {
        let payload = encode_snapshot(snapshot)?;
        let version: Option<i64> = self
            .conn
            .query_row(
                r#"
UPDATE repository_pins
SET snapshot_json = ?1, snapshot_version = snapshot_version + 1
WHERE id = ?2
RETURNING snapshot_version
"#,
                params![payload, id.0],
                |row| row.get(0),
            )
            .optional()?;
        match version {
            Some(value) => version_from_sql(value),
            None => Err(PersistenceError::UnknownPin { id }),
        }
    }

    pub fn load_snapshot(
        &self,
        id: PinId,
    ) -> Result<Option<(ObservedSnapshot, u64)>, PersistenceError> {
        let row: Option<(Option<String>, i64)> = self
            .conn
            .query_row(
                "SELECT snapshot_json, snapshot_version FROM repository_pins WHERE id = ?1",
                params![id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((payload, version)) = row else {
            return Err(PersistenceError::UnknownPin { id });
        };
        match payload {
            Some(raw) => Ok(Some((decode_snapshot(&raw)?, version_from_sql(version)?))),
            None => Ok(None),
        }
    }

    /// Inserts or rewrites a session. A session stored as confirmed is never rewritten.
    pub fn save_session(&self, session: &PlanningSession) -> Result<(), PersistenceError> {
        let stored_status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM planning_sessions WHERE session_id = ?1",
                params![session.id.0],
                |row| row.get(0),
            )
            .optional()?;
        if stored_status.as_deref() == Some(SessionStatus::Confirmed.as_str()) {
            return Err(PersistenceError::SessionConfirmed {
                id: session.id.clone(),
            });
        }

        let payload = encode_session(session)?;
        self.conn.execute(
            r#"
INSERT INTO planning_sessions (session_id, repo_id, base_branch, status, payload_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(session_id) DO UPDATE SET
  repo_id = excluded.repo_id,
  base_branch = excluded.base_branch,
  status = excluded.status,
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
            params![
                session.id.0,
                session.repo_id.0,
                session.base_branch,
                session.status.as_str(),
                payload,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_session(&self, id: &SessionId) -> Result<Option<PlanningSession>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM planning_sessions WHERE session_id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|raw| decode_session(&raw))
            .transpose()
            .map_err(PersistenceError::from)
    }

    /// Confirmed sessions for one repository and base branch, oldest first.
    pub fn list_confirmed_sessions(
        &self,
        repo_id: &RepoId,
        base_branch: &str,
    ) -> Result<Vec<PlanningSession>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT payload_json FROM planning_sessions
WHERE repo_id = ?1 AND base_branch = ?2 AND status = ?3
ORDER BY created_at ASC, session_id ASC
"#,
        )?;
        let rows = stmt.query_map(
            params![repo_id.0, base_branch, SessionStatus::Confirmed.as_str()],
            |row| row.get::<_, String>(0),
        )?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(decode_session(&row?)?);
        }
        Ok(sessions)
    }

    pub fn save_tree_spec(&self, spec: &TreeSpec) -> Result<(), PersistenceError> {
        write_tree_spec(&self.conn, spec)
    }

    pub fn load_tree_spec(
        &self,
        repo_id: &RepoId,
        base_branch: &str,
    ) -> Result<Option<TreeSpec>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM tree_specs WHERE repo_id = ?1 AND base_branch = ?2",
                params![repo_id.0, base_branch],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|raw| decode_tree_spec(&raw))
            .transpose()
            .map_err(PersistenceError::from)
    }

    /// Removes `deleted` from every tree spec of the repository in one transaction,
    /// handing its children to its parent. Returns the rewritten edges.
    pub fn reparent_tree_specs(
        &self,
        repo_id: &RepoId,
        deleted: &str,
    ) -> Result<Vec<ReparentedEdge>, PersistenceError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut reparented = Vec::new();
        for mut spec in read_tree_specs(&tx, repo_id)? {
            if !spec.mentions(deleted) {
                continue;
            }
            reparented.extend(spec.reparent_after_delete(deleted));
            write_tree_spec(&tx, &spec)?;
        }
        tx.commit()?;
        Ok(reparented)
    }
}

fn write_tree_spec(conn: &Connection, spec: &TreeSpec) -> Result<(), PersistenceError> {
    let payload = encode_tree_spec(spec)?;
    conn.execute(
        r#"
INSERT INTO tree_specs (repo_id, base_branch, payload_json, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(repo_id, base_branch) DO UPDATE SET
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
        params![spec.repo_id.0, spec.base_branch, payload, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn read_tree_specs(conn: &Connection, repo_id: &RepoId) -> Result<Vec<TreeSpec>, PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT payload_json FROM tree_specs WHERE repo_id = ?1 ORDER BY base_branch ASC",
    )?;
    let rows = stmt.query_map(params![repo_id.0], |row| row.get::<_, String>(0))?;
    let mut specs = Vec::new();
    for row in rows {
        specs.push(decode_tree_spec(&row?)?);
    }
    Ok(specs)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| PersistenceError::TimestampParse { value, source })
}

fn version_from_sql(value: i64) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::InvalidVersion { value })
}
