//! Snapshot persistence for chat state.
//!
//! The persisted subset (conversations, per-peer messages, the identity
//! they belong to) is written as one JSON document. Saves go through a temp
//! file and a rename so a crash mid-write never truncates the previous
//! snapshot. Loading tolerates an absent file; a corrupt file surfaces as
//! an error the caller can log and ignore, starting fresh.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use wirechat_proto::user::UserId;

use crate::rest::ChatApi;
use crate::session::{Identity, Session};
use crate::store::{ChatStore, Conversation, Message, StoreSnapshot};
use crate::transport::Connector;

/// How often the flush task checks the store's dirty flag.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Errors from snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Could not determine the user's data directory.
    #[error("could not determine data directory (no HOME or XDG_DATA_HOME)")]
    NoDataDir,

    /// Failed to read the snapshot file.
    #[error("failed to read snapshot {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the snapshot file.
    #[error("failed to write snapshot {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot file is not valid JSON for the current schema.
    #[error("snapshot is not valid: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The on-disk document. Connection, presence, search, and error state are
/// deliberately absent; they are rebuilt fresh on every start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub conversations: Vec<Conversation>,
    pub messages: HashMap<UserId, Vec<Message>>,
    pub identity: Option<Identity>,
}

impl PersistedState {
    /// Capture the persisted subset from the live store and session.
    pub fn capture<A: ChatApi, C: Connector>(store: &ChatStore<A, C>, session: &Session) -> Self {
        let snapshot = store.snapshot();
        Self {
            conversations: snapshot.conversations,
            messages: snapshot.messages,
            identity: session.identity(),
        }
    }

    /// Rehydrate the store and session from this document. The session only
    /// regains its identity label, not credentials.
    pub fn restore_into<A: ChatApi, C: Connector>(self, store: &ChatStore<A, C>, session: &Session) {
        let current_user = self.identity.as_ref().map(|identity| identity.id);
        if let Some(identity) = self.identity {
            session.restore_identity(identity);
        }
        store.restore(StoreSnapshot {
            conversations: self.conversations,
            messages: self.messages,
            current_user,
        });
    }
}

/// Default location of the snapshot file.
///
/// # Errors
///
/// Returns [`PersistError::NoDataDir`] when no platform data directory can
/// be determined.
pub fn default_snapshot_path() -> Result<PathBuf, PersistError> {
    dirs::data_dir()
        .map(|dir| dir.join("wirechat").join("state.json"))
        .ok_or(PersistError::NoDataDir)
}

/// Write a snapshot atomically.
///
/// # Errors
///
/// Returns [`PersistError`] when the directory cannot be created or the
/// file cannot be written or renamed into place.
pub fn save_snapshot(path: &Path, state: &PersistedState) -> Result<(), PersistError> {
    // Step 1: make sure the parent directory exists.
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PersistError::WriteFile {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    // Step 2: serialize.
    let json = serde_json::to_vec_pretty(state)?;

    // Step 3: temp file plus rename keeps the previous snapshot intact if
    // the write dies halfway.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| PersistError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| PersistError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Read a snapshot. An absent file is a fresh start, not an error.
///
/// # Errors
///
/// Returns [`PersistError`] on I/O failure or when the file exists but does
/// not parse.
pub fn load_snapshot(path: &Path) -> Result<Option<PersistedState>, PersistError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PersistError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Delete the snapshot file, if any. Used at logout.
///
/// # Errors
///
/// Returns [`PersistError`] on I/O failure other than the file already
/// being absent.
pub fn remove_snapshot(path: &Path) -> Result<(), PersistError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Spawn the background flush task: every `interval`, write a snapshot if
/// the store saw a mutation since the last flush.
pub fn spawn_flush_task<A: ChatApi, C: Connector>(
    store: Arc<ChatStore<A, C>>,
    session: Arc<Session>,
    path: PathBuf,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so a fresh store is
        // not flushed before anything happened.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !store.take_dirty() {
                continue;
            }
            let state = PersistedState::capture(&store, &session);
            match save_snapshot(&path, &state) {
                Ok(()) => tracing::debug!(path = %path.display(), "snapshot flushed"),
                Err(e) => {
                    tracing::warn!(err = %e, path = %path.display(), "snapshot flush failed");
                    // Leave the data marked dirty so the next tick retries.
                    store.mark_dirty_for_retry();
                }
            }
        }
    })
}
