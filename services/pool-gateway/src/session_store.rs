//! Session storage
//!
//! Manages a JSON file mapping session ids to the header sets that make up a
//! session. All writes use atomic temp-file + rename, and a tokio Mutex
//! serializes concurrent writes from the admin API.
//!
//! The file is only read at startup. After that the pool owns the live
//! sessions and the store mirrors admin changes back to disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One stored session: the headers attached to every request it makes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Overrides the pool-wide failure threshold for this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
}

/// Thread-safe session file manager.
pub struct SessionStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, SessionRecord>>,
}

impl SessionStore {
    /// Load sessions from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}`. The pool then starts
    /// empty and reports `unhealthy` until sessions are added.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let sessions: BTreeMap<String, SessionRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), sessions = sessions.len(), "loaded sessions");
            sessions
        } else {
            info!(path = %path.display(), "session file not found, starting with empty store");
            let store = BTreeMap::new();
            write_atomic(&path, &store).await?;
            store
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of a specific session.
    #[cfg(test)]
    pub async fn get(&self, id: &str) -> Option<SessionRecord> {
        let state = self.state.lock().await;
        state.get(id).cloned()
    }

    /// All sessions, ordered by id.
    pub async fn entries(&self) -> Vec<(String, SessionRecord)> {
        let state = self.state.lock().await;
        state
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Add or replace a session and persist to disk.
    ///
    /// The in-memory map only changes once the write succeeds.
    pub async fn add(&self, id: String, record: SessionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.insert(id.clone(), record);
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(session_id = %id, "added session");
        Ok(())
    }

    /// Remove a session and persist to disk.
    ///
    /// Returns the removed session if it existed. On a failed write the
    /// session stays in the store.
    pub async fn remove(&self, id: &str) -> Result<Option<SessionRecord>> {
        let mut state = self.state.lock().await;
        if !state.contains_key(id) {
            return Ok(None);
        }
        let mut next = state.clone();
        let removed = next.remove(id);
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(session_id = id, "removed session");
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write sessions to a file atomically.
///
/// Sessions carry credentials in their headers, so the file is 0600.
async fn write_atomic(path: &Path, data: &BTreeMap<String, SessionRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing sessions: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".sessions.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted sessions");
    Ok(())
}
