//! `tm milestone` and `tm undo` commands.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Context, Output, to_json_string, view_line};
use crate::engine::{self, StageView, StatusChange, plan_status_change, plan_undo};
use crate::models::{Milestone, RawStatus};
use crate::storage::{BatchFailure, BatchOutcome, Storage, validate_milestone_id};
use crate::{Error, Result};

#[derive(Serialize)]
pub struct MilestoneDetail {
    pub milestone: Milestone,
    pub view: StageView,
}

impl Output for MilestoneDetail {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("{} (client {})", self.milestone.id, self.milestone.client_id),
            format!("  {}", view_line(&self.view)),
            format!("  raw status: {}", self.milestone.raw_status),
        ];
        if let Some(done) = self.milestone.completed_at {
            lines.push(format!("  completed: {}", done.to_rfc3339()));
        }
        if let Some(custom) = self.milestone.custom_due_at {
            lines.push(format!("  custom due: {}", custom.to_rfc3339()));
        }
        lines.join("\n")
    }
}

/// Find the view for `milestone` among its client's views.
fn view_for(storage: &Storage, milestone: &Milestone, ctx: &Context, rules: &engine::DeadlineRules) -> Result<StageView> {
    let client = storage.get_client(&milestone.client_id)?;
    let milestones = storage.list_milestones(Some(&client.id))?;
    engine::stage_views(&client, &milestones, rules, ctx.now)
        .into_iter()
        .find(|v| v.milestone_id == milestone.id)
        .ok_or_else(|| Error::NotFound(format!("Milestone not found: {}", milestone.id)))
}

pub fn milestone_show(ctx: &Context, id: &str) -> Result<MilestoneDetail> {
    validate_milestone_id(id)?;
    let (storage, config) = ctx.open()?;
    let milestone = storage.get_milestone(id)?;
    let view = view_for(&storage, &milestone, ctx, &config.rules())?;
    Ok(MilestoneDetail { milestone, view })
}

#[derive(Serialize)]
pub struct StatusChangeResult {
    pub milestone_id: String,
    pub raw_status: RawStatus,
    /// False when the milestone already had this status
    pub changed: bool,
    pub cascaded: Vec<String>,
    pub reverted: Vec<String>,
    pub applied: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<BatchFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inconsistencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_until: Option<DateTime<Utc>>,
}

impl Output for StatusChangeResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if !self.changed {
            return format!("{} is already {}", self.milestone_id, self.raw_status);
        }
        let mut lines = vec![format!("Set {} to {}", self.milestone_id, self.raw_status)];
        if !self.cascaded.is_empty() {
            lines.push(format!("  auto-failed: {}", self.cascaded.join(", ")));
        }
        if !self.reverted.is_empty() {
            lines.push(format!("  restored to pending: {}", self.reverted.join(", ")));
        }
        for f in &self.failed {
            lines.push(format!("  FAILED {}: {}", f.id, f.error));
        }
        for id in &self.inconsistencies {
            lines.push(format!("  missing milestone skipped: {}", id));
        }
        if let Some(until) = self.undo_until {
            lines.push(format!("  undo available until {}", until.to_rfc3339()));
        }
        lines.join("\n")
    }
}

/// Persist a planned change and commit it to the session.
///
/// Per-id write failures are reported, not rolled back; the tracker delta and
/// undo record are committed regardless so undo can restore what was written.
fn commit(storage: &mut Storage, change: &StatusChange, now: DateTime<Utc>) -> Result<BatchOutcome> {
    let mut session = storage.load_session()?;
    let outcome = storage.apply_mutations(&change.mutations, now)?;
    session.commit(change);
    storage.save_session(&session)?;
    Ok(outcome)
}

/// Set a milestone's raw status, cascading or reverting auto-failures.
pub fn milestone_set(ctx: &Context, id: &str, status: RawStatus) -> Result<StatusChangeResult> {
    validate_milestone_id(id)?;
    let (mut storage, config) = ctx.open()?;
    let trigger = storage.get_milestone(id)?;
    let sequence = storage.list_milestones(Some(&trigger.client_id))?;
    let session = storage.load_session()?;

    let change = plan_status_change(&trigger, status, &sequence, &session.cascades, ctx.now);
    if change.is_noop() {
        return Ok(StatusChangeResult {
            milestone_id: trigger.id,
            raw_status: status,
            changed: false,
            cascaded: Vec::new(),
            reverted: Vec::new(),
            applied: Vec::new(),
            failed: Vec::new(),
            inconsistencies: Vec::new(),
            undo_until: None,
        });
    }

    let outcome = commit(&mut storage, &change, ctx.now)?;
    Ok(StatusChangeResult {
        milestone_id: trigger.id,
        raw_status: status,
        changed: true,
        cascaded: change.cascaded_ids().into_iter().map(String::from).collect(),
        reverted: change.reverted_ids().into_iter().map(String::from).collect(),
        applied: outcome.applied,
        failed: outcome.failed,
        inconsistencies: change.inconsistencies.clone(),
        undo_until: Some(change.undo.created_at + config.undo_window()),
    })
}

#[derive(Serialize)]
pub struct UndoResult {
    pub trigger_id: String,
    pub restored: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<BatchFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inconsistencies: Vec<String>,
}

impl Output for UndoResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Undid change on {}: restored {}",
            self.trigger_id,
            if self.restored.is_empty() {
                "nothing".to_string()
            } else {
                self.restored.join(", ")
            }
        )];
        for f in &self.failed {
            lines.push(format!("  FAILED {}: {}", f.id, f.error));
        }
        for id in &self.inconsistencies {
            lines.push(format!("  missing milestone skipped: {}", id));
        }
        lines.join("\n")
    }
}

/// Reverse the last status change if it is still inside the undo window.
/// The undo becomes the new last change, so undoing again redoes it.
pub fn undo(ctx: &Context) -> Result<UndoResult> {
    let (mut storage, config) = ctx.open()?;
    let session = storage.load_session()?;
    let record = session
        .last_change
        .as_ref()
        .ok_or_else(|| Error::UndoUnavailable("No status change to undo".to_string()))?;

    let current = storage.list_milestones(None)?;
    let change = plan_undo(record, &current, &session.cascades, config.undo_window(), ctx.now)?;
    let outcome = commit(&mut storage, &change, ctx.now)?;

    Ok(UndoResult {
        trigger_id: change.trigger_id,
        restored: outcome.applied,
        failed: outcome.failed,
        inconsistencies: change.inconsistencies,
    })
}

#[derive(Serialize)]
pub struct DueResult {
    pub milestone_id: String,
    pub custom_due_at: Option<DateTime<Utc>>,
    pub view: StageView,
}

impl Output for DueResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let head = match self.custom_due_at {
            Some(t) => format!("Set custom deadline of {} to {}", self.milestone_id, t.to_rfc3339()),
            None => format!("Cleared custom deadline of {}", self.milestone_id),
        };
        format!("{}\n  {}", head, view_line(&self.view))
    }
}

/// Set or clear a milestone's custom deadline.
pub fn milestone_due(ctx: &Context, id: &str, due: Option<DateTime<Utc>>) -> Result<DueResult> {
    validate_milestone_id(id)?;
    let (mut storage, config) = ctx.open()?;
    let mut milestone = storage.get_milestone(id)?;
    milestone.custom_due_at = due;
    milestone.updated_at = ctx.now;
    storage.update_milestone(&milestone)?;

    let view = view_for(&storage, &milestone, ctx, &config.rules())?;
    Ok(DueResult {
        milestone_id: milestone.id,
        custom_due_at: milestone.custom_due_at,
        view,
    })
}
