use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::token::TokenSet;
use super::AuthError;

/// How concept hierarchies are displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyView {
    #[default]
    Tree,
    List,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub tokens: Option<TokenSet>,
    #[serde(default)]
    pub hierarchy_view: HierarchyView,
}

/// File-backed session cache. Concurrent CLI invocations may refresh tokens
/// at the same time, so every read and write holds a file lock.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means an empty session.
    pub fn load(&self) -> Result<SessionData, AuthError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No session file");
            return Ok(SessionData::default());
        }
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let lock = RwLock::new(file);
        let guard = lock.read()?;
        let mut reader: &File = &guard;
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(SessionData::default());
        }
        serde_json::from_str(&contents)
            .map_err(|e| AuthError::Session(format!("{}: {e}", self.path.display())))
    }

    pub fn save(&self, data: &SessionData) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| AuthError::Session(e.to_string()))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        let mut lock = RwLock::new(file);
        let mut guard = lock.write()?;
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        guard.write_all(json.as_bytes())?;
        guard.flush()?;
        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    pub fn tokens(&self) -> Result<Option<TokenSet>, AuthError> {
        Ok(self.load()?.tokens)
    }

    pub fn store_tokens(&self, tokens: TokenSet) -> Result<(), AuthError> {
        let mut data = self.load()?;
        data.tokens = Some(tokens);
        self.save(&data)
    }

    pub fn set_hierarchy_view(&self, view: HierarchyView) -> Result<(), AuthError> {
        let mut data = self.load()?;
        data.hierarchy_view = view;
        self.save(&data)
    }

    /// Log out: drop tokens, keep preferences.
    pub fn clear(&self) -> Result<(), AuthError> {
        let mut data = self.load()?;
        data.tokens = None;
        self.save(&data)?;
        info!("Session cleared");
        Ok(())
    }
}
