//! Credential storage for the bearer token.
//!
//! The token is opaque to the client. It is written once after a sign-in
//! redirect (see [`redirect`]) and read on every outgoing request, so a
//! value changed by another process is picked up on the next read. An
//! absent token is a valid anonymous state.

pub mod redirect;

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Errors from durable credential storage.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to write or remove the credential file.
    #[error("credential file {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Refused to store an empty token.
    #[error("refusing to store an empty token")]
    EmptyToken,
}

/// Holds an opaque bearer token.
///
/// `get` never fails: unreadable storage is reported as anonymous.
pub trait CredentialStore: Send + Sync {
    /// Returns the current token, if any.
    fn get(&self) -> Option<String>;

    /// Stores a token, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the token is empty or cannot be persisted.
    fn set(&self, token: &str) -> Result<(), CredentialError>;

    /// Removes the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the stored token cannot be removed.
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Token kept in memory only. Used by tests and by `--token`.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty (anonymous) store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn set(&self, token: &str) -> Result<(), CredentialError> {
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.token.write() = None;
        Ok(())
    }
}

/// Token persisted in a single file.
///
/// Reads go to disk every time; writes replace the file atomically via a
/// sibling temp file and a rename. On Unix the file is created with mode
/// `0600`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store backed by `path`. The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `<data dir>/taskdeck/token`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("taskdeck").join("token"))
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomically(&self, token: &str) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("tmp");
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).map_err(|e| self.io_error(e))?;
        file.write_all(token.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable credential file");
                None
            }
        }
    }

    fn set(&self, token: &str) -> Result<(), CredentialError> {
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        self.write_atomically(token)?;
        tracing::info!(path = %self.path.display(), "stored credential");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "cleared credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
