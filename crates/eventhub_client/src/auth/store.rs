use std::fmt;
use std::fs::{self, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use super::models::{Credential, Session};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credential is missing its access or refresh token")]
    Incomplete,
}

/// On-disk layout: the three keys are always written and removed together.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    access_token: String,
    refresh_token: String,
    user: Session,
}

impl PersistedSession {
    fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    fn credential(&self) -> Credential {
        Credential::new(self.access_token.clone(), self.refresh_token.clone())
    }
}

/// Holds the token pair and user profile, optionally backed by a JSON file so
/// a session survives restarts.
///
/// Every mutation happens under the write lock and the file is replaced via
/// rename, so readers see either the old pair or the new pair, never a mix.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: RwLock<Option<PersistedSession>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("authenticated", &!self.is_empty())
            .finish()
    }
}

impl CredentialStore {
    /// Opens a file-backed store, restoring any previously saved session.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = Self::load(&path)?;
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(path: &Path) -> Result<Option<PersistedSession>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str::<PersistedSession>(&content) {
            Ok(session) if session.is_complete() => {
                info!("Restored session for {}", session.user.email);
                Ok(Some(session))
            }
            Ok(_) => {
                warn!("Discarding partial credentials at {:?}", path);
                remove_if_exists(path)?;
                Ok(None)
            }
            Err(err) => {
                warn!("Discarding unreadable credentials at {:?}: {}", path, err);
                remove_if_exists(path)?;
                Ok(None)
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<PersistedSession>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<PersistedSession>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<Credential> {
        self.read().as_ref().map(PersistedSession::credential)
    }

    pub fn session(&self) -> Option<Session> {
        self.read().as_ref().map(|stored| stored.user.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|stored| stored.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().as_ref().map(|stored| stored.refresh_token.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_none()
    }

    /// Replaces the credential and session wholesale, as done on login.
    pub fn set(&self, credential: Credential, session: Session) -> Result<(), StoreError> {
        let next = PersistedSession {
            access_token: credential.access_token,
            refresh_token: credential.refresh_token,
            user: session,
        };
        if !next.is_complete() {
            return Err(StoreError::Incomplete);
        }

        let mut state = self.write();
        self.persist(&next)?;
        *state = Some(next);
        Ok(())
    }

    /// Installs a refreshed access token, keeping the current refresh token
    /// unless a non-empty replacement is given.
    ///
    /// Returns `false` without writing anything if the store was cleared in
    /// the meantime.
    pub fn rotate(
        &self,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut state = self.write();
        let Some(current) = state.as_ref() else {
            return Ok(false);
        };

        let refresh_token = refresh_token
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| current.refresh_token.clone());
        let next = PersistedSession {
            access_token,
            refresh_token,
            user: current.user.clone(),
        };
        if !next.is_complete() {
            return Err(StoreError::Incomplete);
        }

        self.persist(&next)?;
        *state = Some(next);
        Ok(true)
    }

    /// Removes both tokens and the session. Clearing an empty store is a no-op.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.write();
        // Memory goes first so a failed unlink never leaves a usable session behind.
        *state = None;
        if let Some(path) = &self.path {
            remove_if_exists(path)?;
        }
        Ok(())
    }

    fn persist(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        create_dir_all(parent)?;

        // Unique temp name per writer, created 0600, then renamed over the target.
        let mut tmp_file = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(tmp_file.as_file_mut(), session)?;
        tmp_file.as_file_mut().flush()?;
        tmp_file.as_file().sync_all()?;
        tmp_file.persist(path).map_err(|err| err.error)?;
        debug!("Persisted credentials to {:?}", path);
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
