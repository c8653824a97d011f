//! `tm board` and `tm check`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Context, Output, format_duration, to_json_string};
use crate::Result;
use crate::engine::consistency::{self, Issue};
use crate::engine::{self, StageView};
use crate::models::{DerivedStatus, SequenceFamily};
use crate::storage::Storage;

/// The live milestone of one sequence.
#[derive(Serialize)]
pub struct BoardCell {
    pub milestone_id: String,
    pub kind: String,
    pub status: DerivedStatus,
    pub due_at_effective: DateTime<Utc>,
    pub remaining_secs: i64,
}

impl BoardCell {
    fn from_view(view: &StageView) -> Self {
        Self {
            milestone_id: view.milestone_id.clone(),
            kind: view.kind.to_string(),
            status: view.status,
            due_at_effective: view.due_at_effective,
            remaining_secs: view.remaining_secs,
        }
    }

    fn human(&self) -> String {
        if self.status == DerivedStatus::Failed {
            format!("{} failed ({} over)", self.kind, format_duration(-self.remaining_secs))
        } else {
            format!("{} {}", self.kind, format_duration(self.remaining_secs))
        }
    }
}

#[derive(Serialize)]
pub struct BoardRow {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub paused: bool,
    pub initial: Option<BoardCell>,
    pub recurring: Option<BoardCell>,
}

#[derive(Serialize)]
pub struct Board {
    pub now: DateTime<Utc>,
    pub rows: Vec<BoardRow>,
}

impl Output for Board {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.rows.is_empty() {
            return "No clients found.".to_string();
        }
        let cell = |c: &Option<BoardCell>| {
            c.as_ref()
                .map(BoardCell::human)
                .unwrap_or_else(|| "complete".to_string())
        };
        self.rows
            .iter()
            .map(|r| {
                format!(
                    "{}{}  initial: {}  recurring: {}{}",
                    r.client_id,
                    r.name.as_ref().map(|n| format!(" ({})", n)).unwrap_or_default(),
                    cell(&r.initial),
                    cell(&r.recurring),
                    if r.paused { "  [paused]" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One row per client with its active initial and recurring milestones.
pub fn board(ctx: &Context) -> Result<Board> {
    let (storage, config) = ctx.open()?;
    let rules = config.rules();
    let milestones = storage.list_milestones(None)?;

    let rows = storage
        .list_clients(None)?
        .into_iter()
        .map(|client| {
            let views = engine::stage_views(&client, &milestones, &rules, ctx.now);
            let active = |family: SequenceFamily| {
                views
                    .iter()
                    .find(|v| v.is_active_stage && v.kind.family() == family)
                    .map(BoardCell::from_view)
            };
            BoardRow {
                initial: active(SequenceFamily::Initial),
                recurring: active(SequenceFamily::Recurring),
                client_id: client.id,
                name: client.name,
                paused: client.paused,
            }
        })
        .collect();

    Ok(Board { now: ctx.now, rows })
}

#[derive(Serialize)]
pub struct CheckResult {
    pub ok: bool,
    pub issues: Vec<Issue>,
}

impl Output for CheckResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.ok {
            return "No inconsistencies found.".to_string();
        }
        let mut lines = vec![format!("{} inconsistenc(ies):", self.issues.len())];
        for issue in &self.issues {
            lines.push(format!("  {}: {}", issue.entity_id, issue.message));
        }
        lines.join("\n")
    }
}

/// Report stored state that violates the data model's invariants.
pub fn check(ctx: &Context) -> Result<CheckResult> {
    let storage = Storage::open(&ctx.data_dir)?;
    let session = storage.load_session()?;
    let issues = consistency::check_all(
        &storage.list_clients(None)?,
        &storage.list_milestones(None)?,
        &session.cascades,
    );
    Ok(CheckResult {
        ok: issues.is_empty(),
        issues,
    })
}
