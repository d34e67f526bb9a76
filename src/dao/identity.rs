//! Local device identity: the session and player this device last played as.
//!
//! Lives outside the shared store. A missing, unreadable or stale identity is never an error
//! for callers; it only means the device starts in the setup state.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifiers persisted by a device to resume its role after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Last active session.
    pub session_id: Uuid,
    /// Player row of this device in that session.
    pub player_id: Uuid,
}

/// Failure while writing or clearing the persisted identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Filesystem access failed.
    #[error("failed to {action} device identity at `{path}`")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The identity could not be encoded.
    #[error("failed to encode device identity")]
    Encode(#[from] serde_json::Error),
}

/// Storage for the local device identity.
pub trait IdentityStore: Send + Sync {
    /// Read the persisted identity. Unreadable data yields `None`.
    fn load(&self) -> Option<DeviceIdentity>;
    /// Persist `identity`, replacing any previous value.
    fn save(&self, identity: DeviceIdentity) -> Result<(), IdentityError>;
    /// Forget the persisted identity.
    fn clear(&self) -> Result<(), IdentityError>;
}

/// Identity kept in a small JSON file.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store the identity at `path`; parent directories are created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the identity file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Option<DeviceIdentity> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted device identity");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read device identity");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(identity) => Some(identity),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "ignoring malformed device identity"
                );
                None
            }
        }
    }

    fn save(&self, identity: DeviceIdentity) -> Result<(), IdentityError> {
        let io_error = |action, source| IdentityError::Io {
            action,
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| io_error("create directory for", source))?;
        }
        let contents = serde_json::to_string_pretty(&identity)?;
        fs::write(&self.path, contents).map_err(|source| io_error("write", source))
    }

    fn clear(&self) -> Result<(), IdentityError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(IdentityError::Io {
                action: "remove",
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Identity held in memory only, for tests and ephemeral devices.
#[derive(Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<DeviceIdentity>>,
}

impl MemoryIdentityStore {
    /// Start with an already persisted identity.
    pub fn with_identity(identity: DeviceIdentity) -> Self {
        Self {
            slot: Mutex::new(Some(identity)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Option<DeviceIdentity> {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self, identity: DeviceIdentity) -> Result<(), IdentityError> {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(identity);
        Ok(())
    }

    fn clear(&self) -> Result<(), IdentityError> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }
}
