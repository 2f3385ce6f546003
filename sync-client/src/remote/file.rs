//! Directory-backed remote store.
//!
//! Keeps the whole remote state in a single `cloud.json` under a shared
//! directory. Several local stores pointed at the same directory behave
//! like devices signed in to one account, which is enough to exercise
//! multi-device sync from the command line.
//!
//! Every read-modify-write holds an exclusive advisory lock on `cloud.lock`
//! in the same directory, so separate processes never overwrite each
//! other's changes.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use quotesync_types::{AccountChange, SyncCursor};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;

use super::cloud::{CloudState, ResumeState, SessionContext};
use super::{
    BatchSource, OpenedSession, RemoteConnector, RemoteError, RemoteSession, SessionConfig,
    SessionEvent,
};

const STATE_FILE: &str = "cloud.json";
const LOCK_FILE: &str = "cloud.lock";
const ACCOUNT: &str = "local";

/// Remote store persisted in a directory.
#[derive(Debug, Clone)]
pub struct FileCloud {
    dir: PathBuf,
    // Serializes tasks of this process before they queue on the file lock
    local: Arc<Mutex<()>>,
}

/// Exclusive lock on the cloud directory, released on drop.
struct DirLock {
    file: File,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release cloud lock: {}", e);
        }
    }
}

impl FileCloud {
    /// Use `dir` as the remote store. The directory is created on first
    /// use.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            local: Arc::new(Mutex::new(())),
        }
    }

    /// Directory holding the remote state.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn storage_error(&self, e: impl std::fmt::Display) -> RemoteError {
        RemoteError::Storage(format!("{}: {}", self.dir.display(), e))
    }

    /// Block (off the runtime) until this process owns the directory.
    async fn lock_dir(&self) -> Result<DirLock, RemoteError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.storage_error(e))?;
        let path = self.dir.join(LOCK_FILE);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| self.storage_error(e))?
        .map_err(|e| self.storage_error(e))?;
        Ok(DirLock { file })
    }

    async fn read_state(&self) -> Result<CloudState, RemoteError> {
        let path = self.dir.join(STATE_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                RemoteError::Corrupt(format!("{}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CloudState::default()),
            Err(e) => Err(RemoteError::Storage(format!("{}: {}", path.display(), e))),
        }
    }

    /// Replace `cloud.json`. Callers hold the directory lock.
    async fn write_state(&self, state: &CloudState) -> Result<(), RemoteError> {
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| RemoteError::Corrupt(e.to_string()))?;

        let tmp = self
            .dir
            .join(format!(".{STATE_FILE}.{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.storage_error(e));
        }
        tokio::fs::rename(&tmp, self.dir.join(STATE_FILE))
            .await
            .map_err(|e| self.storage_error(e))
    }
}

#[async_trait]
impl RemoteConnector for FileCloud {
    async fn open(&self, config: SessionConfig) -> Result<OpenedSession, RemoteError> {
        let resume = ResumeState::from_cursor(config.resume.as_ref());
        let (tx, rx) = mpsc::unbounded_channel();

        let (device, position) = match resume {
            Some(state) if state.account == ACCOUNT => (state.device, state.position),
            Some(state) => {
                let _ = tx.send(SessionEvent::AccountChange(AccountChange::SwitchAccounts));
                (state.device, 0)
            }
            None => {
                let _ = tx.send(SessionEvent::AccountChange(AccountChange::SignIn));
                (uuid::Uuid::new_v4().to_string(), 0)
            }
        };
        tracing::debug!(
            "Opened file cloud at {} as device {} (position {})",
            self.dir.display(),
            device,
            position
        );

        let session = FileSession {
            cloud: self.clone(),
            ctx: SessionContext {
                device,
                zone: config.zone,
                record_type: config.record_type,
                batch_limit: config.batch_limit,
            },
            position: AtomicU64::new(position),
            _events: tx,
        };
        Ok(OpenedSession {
            session: Box::new(session),
            events: rx,
        })
    }
}

struct FileSession {
    cloud: FileCloud,
    ctx: SessionContext,
    position: AtomicU64,
    // Held so the event channel stays open for the session's lifetime
    _events: UnboundedSender<SessionEvent>,
}

impl FileSession {
    fn cursor(&self, position: u64) -> Result<SyncCursor, RemoteError> {
        ResumeState {
            account: ACCOUNT.to_string(),
            device: self.ctx.device.clone(),
            position,
        }
        .to_cursor()
    }
}

#[async_trait]
impl RemoteSession for FileSession {
    async fn send_changes(
        &self,
        source: &mut (dyn BatchSource + Send),
    ) -> Result<Vec<SessionEvent>, RemoteError> {
        let _local = self.cloud.local.lock().await;
        let _dir = self.cloud.lock_dir().await?;
        let mut state = self.cloud.read_state().await?;

        let mut events = vec![SessionEvent::WillSendChanges];
        events.extend(state.send(&self.ctx, source, &mut VecDeque::new()));
        self.cloud.write_state(&state).await?;

        events.push(SessionEvent::StateUpdate {
            cursor: self.cursor(self.position.load(Ordering::SeqCst))?,
        });
        events.push(SessionEvent::DidSendChanges);
        Ok(events)
    }

    async fn fetch_changes(&self) -> Result<Vec<SessionEvent>, RemoteError> {
        let _local = self.cloud.local.lock().await;
        let _dir = self.cloud.lock_dir().await?;
        let state = self.cloud.read_state().await?;

        let from = self.position.load(Ordering::SeqCst);
        let (changes, to) = state.changes_since(&self.ctx, from);
        self.position.store(to, Ordering::SeqCst);
        tracing::debug!("Fetched file cloud changes {}..{}", from, to);

        let mut events = vec![SessionEvent::WillFetchChanges];
        events.extend(changes);
        events.push(SessionEvent::StateUpdate {
            cursor: self.cursor(to)?,
        });
        events.push(SessionEvent::DidFetchChanges);
        Ok(events)
    }
}
