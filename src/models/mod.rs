//! Data models for Tidemark entities.
//!
//! This module defines the core data structures:
//! - `Client` - A tracked subject with a sign-on date and pause bookkeeping
//! - `Milestone` - One time-bound obligation (an "experience") owed to a client
//! - `MilestoneKind` - Which offset rule applies (fixed initial stage or monthly recurring)
//! - `RawStatus` / `DerivedStatus` - Stored truth vs. time-derived presentation status

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// The fixed, ordered set of initial milestone stages.
///
/// Order matters: a later stage completed while an earlier one is still
/// pending force-fails the earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialKind {
    Day1,
    Day14,
    Day30,
}

impl InitialKind {
    /// All initial kinds in sequence order.
    pub const ALL: [InitialKind; 3] = [InitialKind::Day1, InitialKind::Day14, InitialKind::Day30];

    /// Position of this kind within the initial sequence.
    pub fn index(self) -> usize {
        match self {
            InitialKind::Day1 => 0,
            InitialKind::Day14 => 1,
            InitialKind::Day30 => 2,
        }
    }

    /// Built-in day offset from the sign-on date.
    pub fn default_offset_days(self) -> u32 {
        match self {
            InitialKind::Day1 => 1,
            InitialKind::Day14 => 14,
            InitialKind::Day30 => 30,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InitialKind::Day1 => "day1",
            InitialKind::Day14 => "day14",
            InitialKind::Day30 => "day30",
        }
    }

    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "day1" => Some(InitialKind::Day1),
            "day14" => Some(InitialKind::Day14),
            "day30" => Some(InitialKind::Day30),
            _ => None,
        }
    }
}

impl fmt::Display for InitialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two independent orderings milestones can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceFamily {
    Initial,
    Recurring,
}

/// Which offset rule a milestone follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MilestoneKind {
    /// One of the fixed initial stages, offset in days from sign-on.
    Initial { stage: InitialKind },
    /// Monthly recurring milestone, offset in whole months.
    Recurring { sequence_number: u32 },
}

impl MilestoneKind {
    pub fn family(&self) -> SequenceFamily {
        match self {
            MilestoneKind::Initial { .. } => SequenceFamily::Initial,
            MilestoneKind::Recurring { .. } => SequenceFamily::Recurring,
        }
    }

    /// Sort key within the kind's own family.
    pub fn order_key(&self) -> u32 {
        match self {
            MilestoneKind::Initial { stage } => stage.index() as u32,
            MilestoneKind::Recurring { sequence_number } => *sequence_number,
        }
    }

    /// Parse a kind label such as `day14` or `month-3`.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(stage) = InitialKind::parse(s) {
            return Ok(MilestoneKind::Initial { stage });
        }
        let lower = s.to_lowercase();
        if let Some(n) = lower.strip_prefix("month-") {
            let sequence_number = n
                .parse::<u32>()
                .map_err(|_| Error::InvalidInput(format!("Invalid month number: {}", n)))?;
            return Ok(MilestoneKind::Recurring { sequence_number });
        }
        Err(Error::InvalidInput(format!("Unknown milestone kind: {}", s)))
    }
}

impl fmt::Display for MilestoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MilestoneKind::Initial { stage } => write!(f, "{}", stage),
            MilestoneKind::Recurring { sequence_number } => write!(f, "month-{}", sequence_number),
        }
    }
}

/// The only status value a caller may set directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStatus {
    #[default]
    Pending,
    Yes,
    No,
}

impl RawStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RawStatus::Pending => "pending",
            RawStatus::Yes => "yes",
            RawStatus::No => "no",
        }
    }

    /// Parse a raw status string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RawStatus::Pending),
            "yes" => Ok(RawStatus::Yes),
            "no" => Ok(RawStatus::No),
            _ => Err(Error::InvalidInput(format!(
                "Invalid status: {} (expected pending, yes or no)",
                s
            ))),
        }
    }
}

impl fmt::Display for RawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Presentation status derived from raw status plus time. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    Pending,
    Done,
    DoneLate,
    Failed,
}

impl DerivedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DerivedStatus::Pending => "pending",
            DerivedStatus::Done => "done",
            DerivedStatus::DoneLate => "done_late",
            DerivedStatus::Failed => "failed",
        }
    }

    /// Whether the milestone has been delivered, on time or not.
    pub fn is_resolved_done(self) -> bool {
        matches!(self, DerivedStatus::Done | DerivedStatus::DoneLate)
    }
}

impl fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Unique identifier (e.g., "tmc-a1b2")
    pub id: String,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Optional display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Start of all milestone offsets
    pub signed_on: NaiveDate,

    /// Overrides the base date of the recurring series when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_intake_date: Option<NaiveDate>,

    /// True while timers are frozen
    #[serde(default)]
    pub paused: bool,

    /// Set if and only if `paused` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_started_at: Option<DateTime<Utc>>,

    /// Cumulative seconds ever spent paused
    #[serde(default)]
    pub paused_total_secs: i64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Create a new, running client.
    pub fn new(id: String, signed_on: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id,
            entity_type: "client".to_string(),
            name: None,
            signed_on,
            initial_intake_date: None,
            paused: false,
            pause_started_at: None,
            paused_total_secs: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One trackable time-bound obligation belonging to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Unique identifier (e.g., "tme-c3d4")
    pub id: String,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Owning client
    pub client_id: String,

    /// Offset rule
    #[serde(flatten)]
    pub kind: MilestoneKind,

    /// Stored status
    #[serde(default)]
    pub raw_status: RawStatus,

    /// Present only when `raw_status` is `yes`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Overrides the computed deadline for this one milestone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_due_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Milestone {
    /// Create a new pending milestone.
    pub fn new(id: String, client_id: String, kind: MilestoneKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            entity_type: "milestone".to_string(),
            client_id,
            kind,
            raw_status: RawStatus::Pending,
            completed_at: None,
            custom_due_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Capture the fields a status change can touch.
    pub fn snapshot(&self) -> MilestoneSnapshot {
        MilestoneSnapshot {
            id: self.id.clone(),
            raw_status: self.raw_status,
            completed_at: self.completed_at,
        }
    }

    /// Whether `other` sits in the same ordered sequence as this milestone.
    pub fn same_sequence(&self, other: &Milestone) -> bool {
        self.client_id == other.client_id && self.kind.family() == other.kind.family()
    }
}

/// The `(id, raw_status, completed_at)` triple restored by undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSnapshot {
    pub id: String,
    pub raw_status: RawStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
