//! Command implementations for the Tidemark CLI.
//!
//! This module contains the business logic for each CLI command.
//! Commands are organized by entity type:
//! - `system` - Initialize storage, rebuild the cache
//! - `client` - Onboarding, pause/resume, recurring backfill
//! - `milestone` - Status changes with cascade, custom deadlines, undo
//! - `board` - Active stages across clients, consistency check
//! - `config` - Show and set config.kdl values
//!
//! Every command returns a value implementing [`Output`].

pub mod board;
pub mod client;
pub mod config;
pub mod milestone;
pub mod system;

pub use board::{Board, BoardCell, BoardRow, CheckResult, board, check};
pub use client::{
    BackfillResult, ClientCreated, ClientDetail, ClientList, ClientSummary, IntakeResult,
    PauseResult, client_backfill, client_create, client_list, client_pause, client_resume,
    client_set_intake, client_show,
};
pub use config::{ConfigEntry, ConfigSetResult, ConfigShow, config_set, config_show};
pub use milestone::{
    DueResult, MilestoneDetail, StatusChangeResult, UndoResult, milestone_due, milestone_set,
    milestone_show, undo,
};
pub use system::{InitResult, RebuildResult, system_init, system_rebuild};

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::Result;
use crate::config::{ConfigOverrides, ResolvedConfig, resolve_config};
use crate::engine::StageView;
use crate::storage::Storage;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Everything a command needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct Context {
    /// Data directory holding the JSONL files and cache
    pub data_dir: PathBuf,
    /// CLI-level config overrides
    pub overrides: ConfigOverrides,
    /// Wall-clock instant all derivations use
    pub now: DateTime<Utc>,
}

impl Context {
    pub fn new(data_dir: impl Into<PathBuf>, overrides: ConfigOverrides, now: DateTime<Utc>) -> Self {
        Self {
            data_dir: data_dir.into(),
            overrides,
            now,
        }
    }

    /// Open storage and resolve configuration.
    fn open(&self) -> Result<(Storage, ResolvedConfig)> {
        let storage = Storage::open(&self.data_dir)?;
        let config = resolve_config(&storage, &self.overrides)?;
        Ok((storage, config))
    }
}

/// Format signed seconds as `Nd HHh MMm SSs`.
pub fn format_duration(secs: i64) -> String {
    let sign = if secs < 0 { "-" } else { "" };
    let s = secs.unsigned_abs();
    format!(
        "{}{}d {:02}h {:02}m {:02}s",
        sign,
        s / 86_400,
        (s % 86_400) / 3_600,
        (s % 3_600) / 60,
        s % 60
    )
}

/// One human-readable line for a milestone view.
fn view_line(view: &StageView) -> String {
    use crate::engine::StagePhase;
    use crate::models::DerivedStatus;

    let timing = match (view.phase, view.status) {
        (StagePhase::Resolved, _) => String::new(),
        (_, DerivedStatus::Failed) => format!("  overdue by {}", format_duration(-view.remaining_secs)),
        (StagePhase::Live, _) => format!("  {} left", format_duration(view.remaining_secs)),
        (StagePhase::Future, _) => format!("  {} to due", format_duration(view.remaining_secs)),
    };
    format!(
        "{} {:<9} {:<9} due {}{}{}",
        view.milestone_id,
        view.kind.to_string(),
        view.status.as_str(),
        view.due_at_effective.format("%Y-%m-%d %H:%M UTC"),
        if view.is_active_stage { " *" } else { "" },
        timing
    )
}

fn to_json_string<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
