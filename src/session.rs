//! Session identity storage
//!
//! The backend assigns an opaque session token on the first successful
//! exchange. The widget keeps at most one and forwards it on every call
//! until the user resets the conversation.

use std::path::{Path, PathBuf};

use crate::Result;

/// Storage for the current session identity
pub trait SessionStore: Send {
    /// Current session identity, if any
    fn get(&self) -> Option<String>;

    /// Replace the session identity
    ///
    /// # Errors
    ///
    /// Returns error if the identity could not be persisted. The in-memory
    /// value is updated regardless.
    fn set(&mut self, id: &str) -> Result<()>;

    /// Forget the session identity
    ///
    /// # Errors
    ///
    /// Returns error if the persisted identity could not be removed
    fn clear(&mut self) -> Result<()>;
}

/// Session store that lives only as long as the process
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    id: Option<String>,
}

impl MemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub const fn new() -> Self {
        Self { id: None }
    }

    /// Create a store already holding an identity
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Option<String> {
        self.id.clone()
    }

    fn set(&mut self, id: &str) -> Result<()> {
        self.id = Some(id.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.id = None;
        Ok(())
    }
}

/// Session store persisted to a single file so it survives restarts
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    id: Option<String>,
}

impl FileSessionStore {
    /// Open the store at `path`, loading any identity already saved there
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let trimmed = content.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read session file"
                );
                None
            }
        };

        if id.is_some() {
            tracing::debug!(path = %path.display(), "restored session identity");
        }

        Self { path, id }
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a truncated token
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, id)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Option<String> {
        self.id.clone()
    }

    fn set(&mut self, id: &str) -> Result<()> {
        self.id = Some(id.to_string());
        self.persist(id)
    }

    fn clear(&mut self) -> Result<()> {
        self.id = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
