use std::path::{Path, PathBuf};

use crate::config::{ensure_data_dir, write_private};
use crate::error::StoreError;
use crate::session::{ChatMessage, ConversationContext};

const HISTORY_FILE: &str = "history.json";

/// Conversation history persisted as a JSON array in the data directory.
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(HISTORY_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means empty history.
    pub fn load(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, context: &ConversationContext) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            ensure_data_dir(parent)?;
        }
        let data = serde_json::to_string_pretty(&context.to_vec())?;
        write_private(&self.path, &data)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
