//! Status derivation.
//!
//! Maps stored raw status plus time to one of four presentation statuses.
//! Nothing here writes back: an overdue pending milestone is shown as failed
//! but stays `pending` in storage until someone explicitly records `no`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::deadline::{self, DeadlineRules};
use super::pause;
use crate::models::{Client, DerivedStatus, Milestone, RawStatus};

/// Derive the presentation status of a milestone.
pub fn derive_status(
    raw_status: RawStatus,
    completed_at: Option<DateTime<Utc>>,
    due_at_effective: DateTime<Utc>,
    now_effective: DateTime<Utc>,
) -> DerivedStatus {
    match raw_status {
        RawStatus::Yes => match completed_at {
            Some(completed) if completed > due_at_effective => DerivedStatus::DoneLate,
            _ => DerivedStatus::Done,
        },
        RawStatus::No => DerivedStatus::Failed,
        RawStatus::Pending if now_effective > due_at_effective => DerivedStatus::Failed,
        RawStatus::Pending => DerivedStatus::Pending,
    }
}

/// All time-derived values for one milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneTiming {
    /// Deadline before pause shifting (custom override or computed)
    pub due_at: DateTime<Utc>,
    /// Deadline shifted by the client's accumulated paused time
    pub due_at_effective: DateTime<Utc>,
    /// Current instant as seen by the client's timers
    pub now_effective: DateTime<Utc>,
    pub status: DerivedStatus,
}

impl MilestoneTiming {
    /// Signed seconds until the effective deadline; negative once overdue.
    pub fn remaining_secs(&self) -> i64 {
        (self.due_at_effective - self.now_effective).num_seconds()
    }
}

/// Run the full derivation chain: deadline, pause shift, status.
pub fn evaluate(
    client: &Client,
    milestone: &Milestone,
    rules: &DeadlineRules,
    wall_clock_now: DateTime<Utc>,
) -> MilestoneTiming {
    let due_at = deadline::due_at(client, milestone, rules);
    let due_at_effective = pause::effective_due_at(due_at, client.paused_total_secs);
    let now_effective = pause::effective_now(client, wall_clock_now);
    let status = derive_status(
        milestone.raw_status,
        milestone.completed_at,
        due_at_effective,
        now_effective,
    );
    MilestoneTiming {
        due_at,
        due_at_effective,
        now_effective,
        status,
    }
}
