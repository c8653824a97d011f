//! Deadline & status derivation engine.
//!
//! Everything here is a pure function of already-fetched state and a
//! wall-clock reading. Data flows one way:
//!
//! - [`deadline`] computes a milestone's end-of-day deadline in the configured timezone
//! - [`pause`] shifts the deadline and "now" by the client's paused time
//! - [`status`] derives `pending | done | done_late | failed`
//! - [`stage`] picks the single live milestone of each sequence
//! - [`cascade`] plans auto-fail cascades, reverts and undo as explicit mutations
//!
//! The engine never persists; callers write the planned mutations and own the
//! [`CascadeTracker`].

pub mod cascade;
pub mod consistency;
pub mod deadline;
pub mod pause;
pub mod stage;
pub mod status;

pub use cascade::{
    CascadeDelta, CascadeOp, CascadeTracker, MilestoneMutation, MutationReason, StatusChange,
    UndoRecord, plan_status_change, plan_undo,
};
pub use consistency::{Issue, IssueKind};
pub use deadline::{DeadlineRules, OffsetTable, RecurringBounds, compute_due_at, due_at};
pub use pause::{effective_due_at, effective_now};
pub use stage::{StagePhase, StageView, resolve_active_recurring, resolve_active_stage, stage_views};
pub use status::{MilestoneTiming, derive_status, evaluate};
