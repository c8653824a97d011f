//! CLI session state.
//!
//! Each `tm` invocation is a short-lived process, so the cascade tracker and
//! the last undoable change are kept in `session.json` next to the data.
//! This file belongs to the CLI; the engine only ever sees the tracker by
//! reference.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::engine::{CascadeTracker, StatusChange, UndoRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub cascades: CascadeTracker,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change: Option<UndoRecord>,
}

impl SessionState {
    /// Load from `path`; a missing file is an empty session.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Commit a planned change: apply its tracker delta and make it the
    /// change `tm undo` reverses. No-op changes leave the last change alone.
    pub fn commit(&mut self, change: &StatusChange) {
        if change.is_noop() {
            return;
        }
        self.cascades.apply(&change.cascade_delta);
        self.last_change = Some(change.undo.clone());
    }
}
