//! `tm system` commands.

use std::path::PathBuf;

use serde::Serialize;

use super::{Context, Output, to_json_string};
use crate::Result;
use crate::config::resolve_config;
use crate::storage::Storage;

#[derive(Serialize)]
pub struct InitResult {
    pub initialized: bool,
    pub data_dir: PathBuf,
    pub timezone: String,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.initialized {
            format!(
                "Initialized tidemark at {} (timezone {})",
                self.data_dir.display(),
                self.timezone
            )
        } else {
            format!(
                "Already initialized at {} (timezone {})",
                self.data_dir.display(),
                self.timezone
            )
        }
    }
}

/// Initialize storage in the context's data directory.
///
/// Configuration is validated here as well, so a bad config.kdl is reported
/// at setup rather than on the first status change.
pub fn system_init(ctx: &Context) -> Result<InitResult> {
    let existed = Storage::exists(&ctx.data_dir)?;
    let storage = Storage::init(&ctx.data_dir)?;
    let config = resolve_config(&storage, &ctx.overrides)?;

    Ok(InitResult {
        initialized: !existed,
        data_dir: ctx.data_dir.clone(),
        timezone: config.timezone.value.name().to_string(),
    })
}

#[derive(Serialize)]
pub struct RebuildResult {
    pub clients: usize,
    pub milestones: usize,
}

impl Output for RebuildResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Rebuilt cache: {} clients, {} milestones",
            self.clients, self.milestones
        )
    }
}

/// Rebuild the SQLite cache from the JSONL files.
pub fn system_rebuild(ctx: &Context) -> Result<RebuildResult> {
    let mut storage = Storage::open(&ctx.data_dir)?;
    let stats = storage.rebuild_cache()?;
    Ok(RebuildResult {
        clients: stats.clients,
        milestones: stats.milestones,
    })
}
