use crate::model::Student;
use crate::remote::{self, RemoteClient, RemoteConfig, SyncError};
use serde::Serialize;
use std::time::{Duration, Instant};

/// How long a replication failure stays `error` before it reads back as
/// plain `unsaved`. No automatic retry happens either way; the user must
/// resync manually.
const ERROR_DOWNGRADE: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum State {
    Synced,
    Syncing,
    Unsaved,
    Error { error: SyncError, at: Instant },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorView {
    pub category: &'static str,
    pub message: String,
}

/// Coordinates optimistic local writes with best-effort remote replication.
/// Local data is canonical after the initial load; replication only ever
/// moves the status, never rolls anything back.
pub struct SyncEngine {
    client: Option<RemoteClient>,
    state: State,
}

impl SyncEngine {
    pub fn from_env() -> SyncEngine {
        SyncEngine::new(RemoteConfig::from_env())
    }

    pub fn new(config: Option<RemoteConfig>) -> SyncEngine {
        SyncEngine {
            client: config.map(RemoteClient::new),
            state: State::Synced,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.client.is_some()
    }

    pub fn status(&self) -> StatusView {
        match &self.state {
            State::Synced => StatusView {
                status: "synced",
                error: None,
            },
            State::Syncing => StatusView {
                status: "syncing",
                error: None,
            },
            State::Unsaved => StatusView {
                status: "unsaved",
                error: None,
            },
            State::Error { error, at } => {
                // Stale errors read back as "not fatal, not retried".
                if at.elapsed() >= ERROR_DOWNGRADE {
                    StatusView {
                        status: "unsaved",
                        error: None,
                    }
                } else {
                    StatusView {
                        status: "error",
                        error: Some(ErrorView {
                            category: error.category(),
                            message: error.to_string(),
                        }),
                    }
                }
            }
        }
    }

    /// Called right after every local mutation, before replication.
    pub fn mark_local_write(&mut self) {
        if self.client.is_some() {
            self.state = State::Unsaved;
        }
    }

    fn finish(&mut self, result: Result<(), SyncError>, what: &str) {
        match result {
            Ok(()) => {
                self.state = State::Synced;
            }
            Err(error) => {
                tracing::warn!("replication of {what} failed: {error}");
                self.state = State::Error {
                    error,
                    at: Instant::now(),
                };
            }
        }
    }

    pub fn replicate_student(&mut self, student: &Student) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        self.state = State::Syncing;
        let result = client.push_student(student);
        self.finish(result, "student");
    }

    pub fn replicate_delete(&mut self, student_id: &str) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        self.state = State::Syncing;
        let result = client.delete_student(student_id);
        self.finish(result, "student delete");
    }

    /// Bulk-upserts the current list as-is; used by manual resync and bulk
    /// import. Does not fetch remote state first.
    pub fn replicate_all(&mut self, students: &[Student]) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        self.state = State::Syncing;
        let result = Self::push_all(client, students);
        self.finish(result, "full student list");
    }

    fn push_all(client: &RemoteClient, students: &[Student]) -> Result<(), SyncError> {
        let mut rows = Vec::with_capacity(students.len());
        let mut fees = Vec::new();
        for s in students {
            let (row, mut f) = remote::normalize(s);
            rows.push(row);
            fees.append(&mut f);
        }
        client.upsert_students(&rows)?;
        for s in students {
            client.delete_fees_for(&s.id)?;
        }
        client.upsert_fees(&fees)
    }

    /// Initial load: fetch both remote tables and hand back the denormalized
    /// list, which unconditionally replaces local state, even when the
    /// remote tables are empty. Returns `None` when no remote account is
    /// configured or the fetch failed; callers read the status for details.
    pub fn initial_load(&mut self) -> Option<Vec<Student>> {
        let Some(client) = self.client.as_ref() else {
            self.state = State::Synced;
            return None;
        };
        self.state = State::Syncing;
        let fetched = client
            .fetch_students()
            .and_then(|students| client.fetch_fees().map(|fees| (students, fees)));
        match fetched {
            Ok((students, fees)) => {
                self.state = State::Synced;
                Some(remote::denormalize(students, fees))
            }
            Err(error) => {
                tracing::warn!("initial remote load failed: {error}");
                self.state = State::Error {
                    error,
                    at: Instant::now(),
                };
                None
            }
        }
    }
}
