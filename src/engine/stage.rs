//! Active-stage resolution.
//!
//! Within one ordered sequence, the active stage is the first milestone whose
//! derived status is `pending` or `failed`. Only the active stage runs a live
//! countdown; later unresolved milestones are "future".

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::deadline::DeadlineRules;
use super::status::{self, MilestoneTiming};
use crate::models::{
    Client, DerivedStatus, InitialKind, Milestone, MilestoneKind, RawStatus, SequenceFamily,
};

/// How a milestone should be presented relative to its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    /// The operative deadline, shown with a running countdown
    Live,
    /// Not yet operative; shown with a static time-until value
    Future,
    /// Delivered or failed
    Resolved,
}

/// A milestone with all derived values, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub milestone_id: String,
    pub kind: MilestoneKind,
    pub raw_status: RawStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub due_at: DateTime<Utc>,
    pub due_at_effective: DateTime<Utc>,
    pub status: DerivedStatus,
    pub is_active_stage: bool,
    pub phase: StagePhase,
    /// Effective due minus effective now; negative once overdue
    pub remaining_secs: i64,
}

fn is_open(status: DerivedStatus) -> bool {
    matches!(status, DerivedStatus::Pending | DerivedStatus::Failed)
}

/// Milestones of `client` in `family`, sorted by sequence order.
fn ordered<'a>(
    client: &Client,
    milestones: &'a [Milestone],
    family: SequenceFamily,
) -> Vec<&'a Milestone> {
    let mut seq: Vec<&Milestone> = milestones
        .iter()
        .filter(|m| m.client_id == client.id && m.kind.family() == family)
        .collect();
    seq.sort_by_key(|m| m.kind.order_key());
    seq
}

fn first_open<'a>(
    client: &Client,
    seq: &[&'a Milestone],
    rules: &DeadlineRules,
    now: DateTime<Utc>,
) -> Option<&'a Milestone> {
    seq.iter()
        .find(|m| is_open(status::evaluate(client, m, rules, now).status))
        .copied()
}

/// The live initial stage, or `None` when every initial milestone is done.
pub fn resolve_active_stage(
    client: &Client,
    milestones: &[Milestone],
    rules: &DeadlineRules,
    now: DateTime<Utc>,
) -> Option<InitialKind> {
    let seq = ordered(client, milestones, SequenceFamily::Initial);
    first_open(client, &seq, rules, now).and_then(|m| match m.kind {
        MilestoneKind::Initial { stage } => Some(stage),
        MilestoneKind::Recurring { .. } => None,
    })
}

/// The live recurring month, iterating by ascending sequence number.
pub fn resolve_active_recurring(
    client: &Client,
    milestones: &[Milestone],
    rules: &DeadlineRules,
    now: DateTime<Utc>,
) -> Option<u32> {
    let seq = ordered(client, milestones, SequenceFamily::Recurring);
    first_open(client, &seq, rules, now).and_then(|m| match m.kind {
        MilestoneKind::Recurring { sequence_number } => Some(sequence_number),
        MilestoneKind::Initial { .. } => None,
    })
}

fn view(
    milestone: &Milestone,
    timing: MilestoneTiming,
    is_active_stage: bool,
) -> StageView {
    let phase = if is_active_stage {
        StagePhase::Live
    } else if timing.status == DerivedStatus::Pending {
        StagePhase::Future
    } else {
        StagePhase::Resolved
    };
    StageView {
        milestone_id: milestone.id.clone(),
        kind: milestone.kind,
        raw_status: milestone.raw_status,
        completed_at: milestone.completed_at,
        due_at: timing.due_at,
        due_at_effective: timing.due_at_effective,
        status: timing.status,
        is_active_stage,
        phase,
        remaining_secs: timing.remaining_secs(),
    }
}

/// Views for every milestone of `client`: initial stages first, then recurring.
pub fn stage_views(
    client: &Client,
    milestones: &[Milestone],
    rules: &DeadlineRules,
    now: DateTime<Utc>,
) -> Vec<StageView> {
    let mut views = Vec::new();
    for family in [SequenceFamily::Initial, SequenceFamily::Recurring] {
        let seq = ordered(client, milestones, family);
        let active_id = first_open(client, &seq, rules, now).map(|m| m.id.clone());
        for m in seq {
            let timing = status::evaluate(client, m, rules, now);
            let is_active = active_id.as_deref() == Some(m.id.as_str());
            views.push(view(m, timing, is_active));
        }
    }
    views
}
