use crate::model::{Activity, ActivityKind, Student};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub const KEY_STUDENTS: &str = "students";
pub const KEY_ACTIVITIES: &str = "activities";

/// Activity log keeps only the most recent entries; older ones are dropped.
pub const ACTIVITY_CAP: usize = 50;

/// Workspace-local persistence: a single kv table holding two JSON blobs,
/// one for the student collection and one for the activity log.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(workspace: &Path) -> anyhow::Result<Store> {
        std::fs::create_dir_all(workspace)?;
        let db_path = workspace.join("roster.sqlite3");
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv(
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Store { conn })
    }

    pub fn read_blob(&self, key: &str) -> Option<String> {
        let res = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional();
        match res {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("read of blob '{key}' failed, treating as absent: {e}");
                None
            }
        }
    }

    pub fn write_blob(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO kv(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key, value),
        )?;
        Ok(())
    }

    /// Missing key, storage fault and corrupt payload all read as an empty
    /// collection; callers never see a load error.
    pub fn load_students(&self) -> Vec<Student> {
        let Some(raw) = self.read_blob(KEY_STUDENTS) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(students) => students,
            Err(e) => {
                tracing::warn!("student blob is corrupt, loading empty list: {e}");
                Vec::new()
            }
        }
    }

    /// Local writes never fail outward; a storage fault is logged and the
    /// in-memory copy stays authoritative until the next successful save.
    pub fn save_students(&self, students: &[Student]) {
        let raw = match serde_json::to_string(students) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("failed to serialize students, skipping save: {e}");
                return;
            }
        };
        if let Err(e) = self.write_blob(KEY_STUDENTS, &raw) {
            tracing::warn!("failed to persist students: {e}");
        }
    }

    pub fn load_activities(&self) -> Vec<Activity> {
        let Some(raw) = self.read_blob(KEY_ACTIVITIES) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!("activity blob is corrupt, loading empty log: {e}");
                Vec::new()
            }
        }
    }

    /// Prepends one entry, truncates to [`ACTIVITY_CAP`], persists, and
    /// returns the updated log (newest first).
    pub fn append_activity(&self, kind: ActivityKind, description: &str) -> Vec<Activity> {
        let mut log = self.load_activities();
        log.insert(
            0,
            Activity {
                id: Uuid::new_v4().to_string(),
                kind,
                description: description.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        );
        log.truncate(ACTIVITY_CAP);
        match serde_json::to_string(&log) {
            Ok(raw) => {
                if let Err(e) = self.write_blob(KEY_ACTIVITIES, &raw) {
                    tracing::warn!("failed to persist activity log: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize activity log: {e}"),
        }
        log
    }
}
