//! Auto-fail cascade and undo.
//!
//! Marking a milestone `yes` while earlier milestones in its sequence are
//! still `pending` force-fails those earlier milestones. The trigger -> failed
//! ids relationship is kept in a [`CascadeTracker`] owned by the caller, so
//! moving the trigger away from `yes` can put exactly those milestones back to
//! `pending`.
//!
//! Planning is pure: [`plan_status_change`] and [`plan_undo`] read the current
//! milestones and the tracker and return a [`StatusChange`] listing the field
//! writes to persist, the tracker delta to commit, and an [`UndoRecord`] that
//! reverses the whole change.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Milestone, MilestoneSnapshot, RawStatus};
use crate::{Error, Result};

/// Trigger milestone id -> ids auto-failed when the trigger was marked `yes`.
///
/// Keyed by milestone id, so cascades on different clients never collide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeTracker {
    entries: BTreeMap<String, Vec<String>>,
}

impl CascadeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids auto-failed by `trigger_id`, if any.
    pub fn get(&self, trigger_id: &str) -> Option<&[String]> {
        self.entries.get(trigger_id).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    /// Commit a delta produced by the planner.
    pub fn apply(&mut self, delta: &CascadeDelta) {
        for op in &delta.ops {
            match op {
                CascadeOp::Record {
                    trigger_id,
                    failed_ids,
                } => {
                    self.entries.insert(trigger_id.clone(), failed_ids.clone());
                }
                CascadeOp::Clear { trigger_id } => {
                    self.entries.remove(trigger_id);
                }
            }
        }
    }

    fn entry_snapshot(&self, trigger_id: &str) -> CascadeEntrySnapshot {
        CascadeEntrySnapshot {
            trigger_id: trigger_id.to_string(),
            failed_ids: self.entries.get(trigger_id).cloned(),
        }
    }
}

/// One change to the cascade tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CascadeOp {
    Record {
        trigger_id: String,
        failed_ids: Vec<String>,
    },
    Clear {
        trigger_id: String,
    },
}

/// Tracker changes the caller commits after persisting a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeDelta {
    pub ops: Vec<CascadeOp>,
}

impl CascadeDelta {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn restore(&mut self, snapshot: &CascadeEntrySnapshot) {
        let op = match &snapshot.failed_ids {
            Some(ids) => CascadeOp::Record {
                trigger_id: snapshot.trigger_id.clone(),
                failed_ids: ids.clone(),
            },
            None => CascadeOp::Clear {
                trigger_id: snapshot.trigger_id.clone(),
            },
        };
        self.ops.push(op);
    }
}

/// Why a milestone is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationReason {
    /// The milestone the caller asked to change
    Trigger,
    /// Earlier pending milestone force-failed by the trigger
    CascadeFail,
    /// Previously force-failed milestone returned to pending
    CascadeRevert,
    /// Restored from an undo snapshot
    Restore,
}

/// A field-level write the caller must persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneMutation {
    pub milestone_id: String,
    pub raw_status: RawStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub reason: MutationReason,
}

impl MilestoneMutation {
    /// Apply this write to an in-memory milestone.
    pub fn apply(&self, milestone: &mut Milestone, now: DateTime<Utc>) {
        milestone.raw_status = self.raw_status;
        milestone.completed_at = self.completed_at;
        milestone.updated_at = now;
    }
}

/// Prior value of one tracker entry, `None` meaning absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeEntrySnapshot {
    pub trigger_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_ids: Option<Vec<String>>,
}

/// Everything needed to reverse one status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoRecord {
    /// Milestone the original change was requested on
    pub trigger_id: String,
    /// When the change was planned; the undo window starts here
    pub created_at: DateTime<Utc>,
    /// Prior state of every milestone the change touched
    pub snapshots: Vec<MilestoneSnapshot>,
    /// Prior state of every tracker entry the change touched
    pub cascade_before: Vec<CascadeEntrySnapshot>,
}

impl UndoRecord {
    /// Whether the record is still inside the undo window at `now`.
    pub fn is_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at <= window
    }
}

/// The outcome of planning a status change or an undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub trigger_id: String,
    /// Writes in application order, trigger first
    pub mutations: Vec<MilestoneMutation>,
    pub cascade_delta: CascadeDelta,
    pub undo: UndoRecord,
    /// Referenced milestone ids that could not be found
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inconsistencies: Vec<String>,
}

impl StatusChange {
    fn empty(trigger_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            trigger_id: trigger_id.to_string(),
            mutations: Vec::new(),
            cascade_delta: CascadeDelta::default(),
            undo: UndoRecord {
                trigger_id: trigger_id.to_string(),
                created_at: now,
                snapshots: Vec::new(),
                cascade_before: Vec::new(),
            },
            inconsistencies: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.mutations.is_empty() && self.cascade_delta.is_empty()
    }

    /// Ids of the milestones force-failed by this change.
    pub fn cascaded_ids(&self) -> Vec<&str> {
        self.ids_with(MutationReason::CascadeFail)
    }

    /// Ids of the milestones returned to pending by this change.
    pub fn reverted_ids(&self) -> Vec<&str> {
        self.ids_with(MutationReason::CascadeRevert)
    }

    fn ids_with(&self, reason: MutationReason) -> Vec<&str> {
        self.mutations
            .iter()
            .filter(|m| m.reason == reason)
            .map(|m| m.milestone_id.as_str())
            .collect()
    }

    fn push(&mut self, current: &Milestone, raw_status: RawStatus, completed_at: Option<DateTime<Utc>>, reason: MutationReason) {
        self.undo.snapshots.push(current.snapshot());
        self.mutations.push(MilestoneMutation {
            milestone_id: current.id.clone(),
            raw_status,
            completed_at,
            reason,
        });
    }
}

/// Plan setting `trigger`'s raw status to `new_status` at `now`.
///
/// `sequence` holds the client's milestones as currently stored; only those
/// in the trigger's own sequence are considered for cascading. A transition to
/// the status the trigger already has plans nothing.
pub fn plan_status_change(
    trigger: &Milestone,
    new_status: RawStatus,
    sequence: &[Milestone],
    tracker: &CascadeTracker,
    now: DateTime<Utc>,
) -> StatusChange {
    let mut change = StatusChange::empty(&trigger.id, now);
    let old_status = trigger.raw_status;
    if old_status == new_status {
        return change;
    }

    let completed_at = (new_status == RawStatus::Yes).then_some(now);
    change.push(trigger, new_status, completed_at, MutationReason::Trigger);

    if new_status == RawStatus::Yes {
        let mut earlier: Vec<&Milestone> = sequence
            .iter()
            .filter(|m| {
                m.id != trigger.id
                    && m.same_sequence(trigger)
                    && m.kind.order_key() < trigger.kind.order_key()
                    && m.raw_status == RawStatus::Pending
            })
            .collect();
        earlier.sort_by_key(|m| m.kind.order_key());

        let failed_ids: Vec<String> = earlier.iter().map(|m| m.id.clone()).collect();
        for m in earlier {
            change.push(m, RawStatus::No, None, MutationReason::CascadeFail);
        }

        if !failed_ids.is_empty() {
            debug!(trigger = %trigger.id, ?failed_ids, "cascading failure to earlier milestones");
            change.undo.cascade_before.push(tracker.entry_snapshot(&trigger.id));
            change.cascade_delta.ops.push(CascadeOp::Record {
                trigger_id: trigger.id.clone(),
                failed_ids,
            });
        } else if tracker.get(&trigger.id).is_some() {
            // Stale entry from an earlier cycle; the trigger failed nothing this time
            change.undo.cascade_before.push(tracker.entry_snapshot(&trigger.id));
            change.cascade_delta.ops.push(CascadeOp::Clear {
                trigger_id: trigger.id.clone(),
            });
        }
    } else if old_status == RawStatus::Yes {
        if let Some(failed_ids) = tracker.get(&trigger.id) {
            debug!(trigger = %trigger.id, ?failed_ids, "reverting cascaded failures");
            for id in failed_ids {
                match sequence.iter().find(|m| &m.id == id) {
                    Some(m) if m.raw_status == RawStatus::No => {
                        change.push(m, RawStatus::Pending, None, MutationReason::CascadeRevert);
                    }
                    Some(_) => {}
                    None => {
                        warn!(trigger = %trigger.id, milestone = %id, "cascade entry references missing milestone");
                        change.inconsistencies.push(id.clone());
                    }
                }
            }
            change.undo.cascade_before.push(tracker.entry_snapshot(&trigger.id));
            change.cascade_delta.ops.push(CascadeOp::Clear {
                trigger_id: trigger.id.clone(),
            });
        }
    }

    change
}

/// Plan restoring every milestone and tracker entry captured in `record`.
///
/// The returned change carries its own undo record, so an undo can itself be
/// undone. Fails when the record is empty or older than `window`.
pub fn plan_undo(
    record: &UndoRecord,
    current: &[Milestone],
    tracker: &CascadeTracker,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<StatusChange> {
    if record.snapshots.is_empty() {
        return Err(Error::UndoUnavailable("Nothing to undo".to_string()));
    }
    if !record.is_within(window, now) {
        return Err(Error::UndoUnavailable(format!(
            "Undo window of {}s has expired",
            window.num_seconds()
        )));
    }

    let mut change = StatusChange::empty(&record.trigger_id, now);
    for snapshot in &record.snapshots {
        match current.iter().find(|m| m.id == snapshot.id) {
            Some(m) => change.push(m, snapshot.raw_status, snapshot.completed_at, MutationReason::Restore),
            None => {
                warn!(milestone = %snapshot.id, "undo snapshot references missing milestone");
                change.inconsistencies.push(snapshot.id.clone());
            }
        }
    }
    for before in &record.cascade_before {
        change.undo.cascade_before.push(tracker.entry_snapshot(&before.trigger_id));
        change.cascade_delta.restore(before);
    }
    debug!(
        trigger = %record.trigger_id,
        restored = change.mutations.len(),
        "planned undo"
    );
    Ok(change)
}

/// Apply a planned change to in-memory milestones and the tracker.
///
/// Returns ids of mutations whose milestone was not in `milestones`.
pub fn apply_in_memory(
    change: &StatusChange,
    milestones: &mut [Milestone],
    tracker: &mut CascadeTracker,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut missing = Vec::new();
    for mutation in &change.mutations {
        match milestones.iter_mut().find(|m| m.id == mutation.milestone_id) {
            Some(m) => mutation.apply(m, now),
            None => missing.push(mutation.milestone_id.clone()),
        }
    }
    tracker.apply(&change.cascade_delta);
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InitialKind, MilestoneKind};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        at("2026-01-02T12:00:00Z")
    }

    fn window() -> Duration {
        Duration::seconds(600)
    }

    /// Three initial milestones A (day1), B (day14), C (day30) plus two recurring.
    fn sequence() -> Vec<Milestone> {
        let kinds = [
            ("A", MilestoneKind::Initial { stage: InitialKind::Day1 }),
            ("B", MilestoneKind::Initial { stage: InitialKind::Day14 }),
            ("C", MilestoneKind::Initial { stage: InitialKind::Day30 }),
            ("M2", MilestoneKind::Recurring { sequence_number: 2 }),
            ("M3", MilestoneKind::Recurring { sequence_number: 3 }),
        ];
        kinds
            .into_iter()
            .map(|(id, kind)| {
                Milestone::new(id.to_string(), "tmc-0001".to_string(), kind, at("2026-01-01T00:00:00Z"))
            })
            .collect()
    }

    fn get<'a>(ms: &'a [Milestone], id: &str) -> &'a Milestone {
        ms.iter().find(|m| m.id == id).unwrap()
    }

    fn statuses(ms: &[Milestone], ids: &[&str]) -> Vec<RawStatus> {
        ids.iter().map(|id| get(ms, id).raw_status).collect()
    }

    fn change(
        ms: &mut Vec<Milestone>,
        tracker: &mut CascadeTracker,
        id: &str,
        status: RawStatus,
        now: DateTime<Utc>,
    ) -> StatusChange {
        let trigger = get(ms, id).clone();
        let planned = plan_status_change(&trigger, status, ms, tracker, now);
        assert!(apply_in_memory(&planned, ms, tracker, now).is_empty());
        planned
    }

    fn undo(
        ms: &mut Vec<Milestone>,
        tracker: &mut CascadeTracker,
        record: &UndoRecord,
        now: DateTime<Utc>,
    ) -> StatusChange {
        let planned = plan_undo(record, ms, tracker, window(), now).unwrap();
        assert!(apply_in_memory(&planned, ms, tracker, now).is_empty());
        planned
    }

    #[test]
    fn test_completing_last_fails_earlier_pending() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());

        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::No, RawStatus::No, RawStatus::Yes]
        );
        assert_eq!(get(&ms, "C").completed_at, Some(t0()));
        assert_eq!(get(&ms, "A").completed_at, None);
        assert_eq!(planned.mutations[0].milestone_id, "C");
        assert_eq!(planned.cascaded_ids(), vec!["A", "B"]);
        assert_eq!(
            tracker.get("C"),
            Some(&["A".to_string(), "B".to_string()][..])
        );
        // The recurring sequence is untouched
        assert_eq!(
            statuses(&ms, &["M2", "M3"]),
            vec![RawStatus::Pending, RawStatus::Pending]
        );
    }

    #[test]
    fn test_undo_restores_all_and_clears_entry() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());

        undo(&mut ms, &mut tracker, &planned.undo, t0() + Duration::seconds(5));

        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::Pending, RawStatus::Pending, RawStatus::Pending]
        );
        assert_eq!(get(&ms, "C").completed_at, None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_undoing_an_undo_reestablishes_cascade() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        let undone = undo(&mut ms, &mut tracker, &planned.undo, t0() + Duration::seconds(5));
        undo(&mut ms, &mut tracker, &undone.undo, t0() + Duration::seconds(10));

        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::No, RawStatus::No, RawStatus::Yes]
        );
        assert_eq!(get(&ms, "C").completed_at, Some(t0()));
        assert_eq!(
            tracker.get("C"),
            Some(&["A".to_string(), "B".to_string()][..])
        );

        // And a later revert of C still restores A and B
        change(&mut ms, &mut tracker, "C", RawStatus::Pending, t0() + Duration::seconds(20));
        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::Pending, RawStatus::Pending, RawStatus::Pending]
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_reverting_trigger_restores_targets_to_pending() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());

        let planned = change(&mut ms, &mut tracker, "C", RawStatus::No, t0() + Duration::hours(1));
        assert_eq!(planned.reverted_ids(), vec!["A", "B"]);
        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::Pending, RawStatus::Pending, RawStatus::No]
        );
        assert_eq!(get(&ms, "C").completed_at, None);
        assert!(tracker.get("C").is_none());
    }

    #[test]
    fn test_revert_skips_targets_no_longer_failed() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        // Someone delivered A after all
        change(&mut ms, &mut tracker, "A", RawStatus::Yes, t0() + Duration::minutes(1));

        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Pending, t0() + Duration::minutes(2));
        assert_eq!(planned.reverted_ids(), vec!["B"]);
        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::Yes, RawStatus::Pending, RawStatus::Pending]
        );
    }

    #[test]
    fn test_only_pending_earlier_milestones_cascade() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        change(&mut ms, &mut tracker, "A", RawStatus::Yes, t0());
        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0() + Duration::minutes(1));

        assert_eq!(planned.cascaded_ids(), vec!["B"]);
        assert_eq!(get(&ms, "A").raw_status, RawStatus::Yes);
        assert!(tracker.get("A").is_none());
    }

    #[test]
    fn test_completing_first_cascades_nothing() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        let planned = change(&mut ms, &mut tracker, "A", RawStatus::Yes, t0());
        assert_eq!(planned.mutations.len(), 1);
        assert!(planned.cascade_delta.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_recurring_sequence_cascades_by_number() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        let planned = change(&mut ms, &mut tracker, "M3", RawStatus::Yes, t0());
        assert_eq!(planned.cascaded_ids(), vec!["M2"]);
        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::Pending, RawStatus::Pending, RawStatus::Pending]
        );
    }

    #[test]
    fn test_same_status_is_noop() {
        let ms = sequence();
        let tracker = CascadeTracker::new();
        let planned = plan_status_change(&ms[0], RawStatus::Pending, &ms, &tracker, t0());
        assert!(planned.is_noop());
        assert!(planned.undo.snapshots.is_empty());
    }

    #[test]
    fn test_undo_of_revert_refails_targets() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        let revert = change(&mut ms, &mut tracker, "C", RawStatus::Pending, t0() + Duration::minutes(1));

        undo(&mut ms, &mut tracker, &revert.undo, t0() + Duration::minutes(2));
        assert_eq!(
            statuses(&ms, &["A", "B", "C"]),
            vec![RawStatus::No, RawStatus::No, RawStatus::Yes]
        );
        assert_eq!(get(&ms, "C").completed_at, Some(t0()));
        assert_eq!(
            tracker.get("C"),
            Some(&["A".to_string(), "B".to_string()][..])
        );
    }

    #[test]
    fn test_undo_window_expires() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        let err = plan_undo(&planned.undo, &ms, &tracker, window(), t0() + Duration::seconds(601))
            .unwrap_err();
        assert!(matches!(err, Error::UndoUnavailable(_)));
    }

    #[test]
    fn test_undo_reports_missing_milestones() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        ms.retain(|m| m.id != "A");

        let undone = plan_undo(&planned.undo, &ms, &tracker, window(), t0()).unwrap();
        assert_eq!(undone.inconsistencies, vec!["A".to_string()]);
        assert_eq!(undone.mutations.len(), 2);
    }

    #[test]
    fn test_revert_reports_missing_cascade_target() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        ms.retain(|m| m.id != "B");

        let trigger = get(&ms, "C").clone();
        let planned = plan_status_change(&trigger, RawStatus::Pending, &ms, &tracker, t0());
        assert_eq!(planned.inconsistencies, vec!["B".to_string()]);
        assert_eq!(planned.reverted_ids(), vec!["A"]);
    }

    #[test]
    fn test_cascades_on_different_clients_do_not_interfere() {
        let mut ms = sequence();
        let mut other = sequence();
        for m in &mut other {
            m.id = format!("X{}", m.id);
            m.client_id = "tmc-0002".to_string();
        }
        ms.extend(other);
        let mut tracker = CascadeTracker::new();

        let planned = change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        assert_eq!(planned.cascaded_ids(), vec!["A", "B"]);
        change(&mut ms, &mut tracker, "XC", RawStatus::Yes, t0());
        assert_eq!(tracker.len(), 2);

        change(&mut ms, &mut tracker, "C", RawStatus::Pending, t0());
        assert_eq!(
            statuses(&ms, &["XA", "XB", "XC"]),
            vec![RawStatus::No, RawStatus::No, RawStatus::Yes]
        );
        assert!(tracker.get("XC").is_some());
    }

    #[test]
    fn test_tracker_serde_roundtrip_preserves_entries() {
        let mut ms = sequence();
        let mut tracker = CascadeTracker::new();
        change(&mut ms, &mut tracker, "C", RawStatus::Yes, t0());
        let json = serde_json::to_string(&tracker).unwrap();
        let back: CascadeTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tracker);
    }
}
