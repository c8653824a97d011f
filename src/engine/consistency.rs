//! Invalid-state detection.
//!
//! The engine never coerces inconsistent stored state into something valid;
//! it reports it so an operator can reconcile.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::cascade::CascadeTracker;
use crate::models::{Client, Milestone, MilestoneKind, RawStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// `completed_at` set while `raw_status` is not `yes`
    CompletedWithoutYes,
    /// `paused` and `pause_started_at` disagree
    PauseFieldsMismatch,
    /// Negative accumulated pause time
    NegativePausedTotal,
    /// Two milestones of one client share a kind
    DuplicateKind,
    /// Milestone owned by a client that does not exist
    OrphanMilestone,
    /// Cascade entry keyed by a milestone that does not exist
    DanglingCascadeTrigger,
    /// Cascade entry listing a milestone that does not exist
    DanglingCascadeTarget,
}

/// One reported inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub entity_id: String,
    pub message: String,
}

impl Issue {
    fn new(kind: IssueKind, entity_id: &str, message: String) -> Self {
        Self {
            kind,
            entity_id: entity_id.to_string(),
            message,
        }
    }
}

/// Check a client's own fields.
pub fn check_client(client: &Client) -> Vec<Issue> {
    let mut issues = Vec::new();
    if client.paused != client.pause_started_at.is_some() {
        issues.push(Issue::new(
            IssueKind::PauseFieldsMismatch,
            &client.id,
            format!(
                "paused={} but pause_started_at is {}",
                client.paused,
                if client.pause_started_at.is_some() { "set" } else { "empty" }
            ),
        ));
    }
    if client.paused_total_secs < 0 {
        issues.push(Issue::new(
            IssueKind::NegativePausedTotal,
            &client.id,
            format!("paused_total_secs is {}", client.paused_total_secs),
        ));
    }
    issues
}

/// Check one milestone's fields.
pub fn check_milestone(milestone: &Milestone) -> Vec<Issue> {
    let mut issues = Vec::new();
    if milestone.completed_at.is_some() && milestone.raw_status != RawStatus::Yes {
        issues.push(Issue::new(
            IssueKind::CompletedWithoutYes,
            &milestone.id,
            format!(
                "completed_at is set but raw_status is {}",
                milestone.raw_status
            ),
        ));
    }
    issues
}

/// Check all clients, milestones and the cascade tracker together.
pub fn check_all(clients: &[Client], milestones: &[Milestone], tracker: &CascadeTracker) -> Vec<Issue> {
    let mut issues: Vec<Issue> = clients.iter().flat_map(check_client).collect();
    issues.extend(milestones.iter().flat_map(check_milestone));

    let client_ids: HashSet<&str> = clients.iter().map(|c| c.id.as_str()).collect();
    let mut seen: HashMap<(&str, MilestoneKind), &str> = HashMap::new();
    for m in milestones {
        if !client_ids.contains(m.client_id.as_str()) {
            issues.push(Issue::new(
                IssueKind::OrphanMilestone,
                &m.id,
                format!("owning client {} does not exist", m.client_id),
            ));
        }
        if let Some(first) = seen.insert((m.client_id.as_str(), m.kind), m.id.as_str()) {
            issues.push(Issue::new(
                IssueKind::DuplicateKind,
                &m.id,
                format!("client {} already has {} as {}", m.client_id, m.kind, first),
            ));
        }
    }

    let milestone_ids: HashSet<&str> = milestones.iter().map(|m| m.id.as_str()).collect();
    for (trigger, failed_ids) in tracker.iter() {
        if !milestone_ids.contains(trigger.as_str()) {
            issues.push(Issue::new(
                IssueKind::DanglingCascadeTrigger,
                trigger,
                "cascade trigger does not exist".to_string(),
            ));
        }
        for id in failed_ids {
            if !milestone_ids.contains(id.as_str()) {
                issues.push(Issue::new(
                    IssueKind::DanglingCascadeTarget,
                    id,
                    format!("listed by cascade trigger {} but does not exist", trigger),
                ));
            }
        }
    }

    issues
}
