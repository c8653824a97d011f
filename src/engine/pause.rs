//! Pause/resume time shifting.
//!
//! Pausing freezes a client's remaining time. The deadline is shifted by the
//! total seconds ever paused, and while paused "now" is pinned to the pause
//! start, so `due - now` stays constant until the client is resumed.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::models::Client;
use crate::{Error, Result};

/// Deadline shifted by the accumulated paused duration.
pub fn effective_due_at(due_at: DateTime<Utc>, paused_total_secs: i64) -> DateTime<Utc> {
    due_at + Duration::seconds(paused_total_secs)
}

/// The current instant as seen by this client's timers.
pub fn effective_now(client: &Client, wall_clock_now: DateTime<Utc>) -> DateTime<Utc> {
    match (client.paused, client.pause_started_at) {
        (true, Some(started)) => started,
        _ => wall_clock_now,
    }
}

/// Freeze the client's timers at `now`.
pub fn pause(client: &mut Client, now: DateTime<Utc>) -> Result<()> {
    if client.paused {
        return Err(Error::InvalidState(format!(
            "Client {} is already paused",
            client.id
        )));
    }
    client.paused = true;
    client.pause_started_at = Some(now);
    client.updated_at = now;
    info!(client = %client.id, %now, "paused client");
    Ok(())
}

/// Resume the client's timers, folding the paused interval into the total.
///
/// Returns the number of seconds added to `paused_total_secs`.
pub fn resume(client: &mut Client, now: DateTime<Utc>) -> Result<i64> {
    let started = match (client.paused, client.pause_started_at) {
        (true, Some(started)) => started,
        (false, _) => {
            return Err(Error::InvalidState(format!(
                "Client {} is not paused",
                client.id
            )));
        }
        (true, None) => {
            return Err(Error::InvalidState(format!(
                "Client {} is paused without a pause start time",
                client.id
            )));
        }
    };

    // A wall clock behind the pause start must not shrink the total
    let elapsed = (now - started).num_seconds().max(0);
    client.paused_total_secs += elapsed;
    client.paused = false;
    client.pause_started_at = None;
    client.updated_at = now;
    info!(client = %client.id, elapsed, total = client.paused_total_secs, "resumed client");
    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn client() -> Client {
        Client::new(
            "tmc-0001".to_string(),
            "2026-01-01".parse().unwrap(),
            at("2026-01-01T00:00:00Z"),
        )
    }

    #[test]
    fn test_effective_due_shifts_by_exact_seconds() {
        let due = at("2026-02-26T07:59:00Z");
        for secs in [0, 1, 59, 3600, 86_400 * 40 + 17] {
            assert_eq!((effective_due_at(due, secs) - due).num_seconds(), secs);
        }
    }

    #[test]
    fn test_effective_now_running_uses_wall_clock() {
        let wall = at("2026-01-05T10:00:00Z");
        assert_eq!(effective_now(&client(), wall), wall);
    }

    #[test]
    fn test_pause_then_resume_accumulates() {
        let mut c = client();
        let t0 = at("2026-01-05T10:00:00Z");
        pause(&mut c, t0).unwrap();
        assert!(c.paused);
        assert_eq!(c.pause_started_at, Some(t0));
        assert_eq!(effective_now(&c, at("2026-01-05T10:30:00Z")), t0);

        let added = resume(&mut c, t0 + Duration::seconds(3600)).unwrap();
        assert_eq!(added, 3600);
        assert_eq!(c.paused_total_secs, 3600);
        assert!(!c.paused);
        assert_eq!(c.pause_started_at, None);

        let due = at("2026-01-10T23:59:00Z");
        assert_eq!(
            effective_due_at(due, c.paused_total_secs),
            due + Duration::seconds(3600)
        );
    }

    #[test]
    fn test_remaining_time_is_frozen_while_paused() {
        let mut c = client();
        let due = at("2026-01-10T23:59:00Z");
        let t0 = at("2026-01-05T10:00:00Z");
        pause(&mut c, t0).unwrap();

        let remaining = |c: &Client, wall| {
            effective_due_at(due, c.paused_total_secs) - effective_now(c, wall)
        };
        let before = remaining(&c, t0);
        let later = remaining(&c, t0 + Duration::hours(5));
        assert_eq!(before, later);

        let resumed_at = t0 + Duration::hours(5);
        resume(&mut c, resumed_at).unwrap();
        assert_eq!(remaining(&c, resumed_at), before);
        assert_eq!(
            remaining(&c, resumed_at + Duration::minutes(1)),
            before - Duration::minutes(1)
        );
    }

    #[test]
    fn test_double_pause_and_resume_without_pause_fail() {
        let mut c = client();
        let t0 = at("2026-01-05T10:00:00Z");
        assert!(matches!(resume(&mut c, t0), Err(Error::InvalidState(_))));
        pause(&mut c, t0).unwrap();
        assert!(matches!(pause(&mut c, t0), Err(Error::InvalidState(_))));
        // The rejected pause left the original start untouched
        assert_eq!(c.pause_started_at, Some(t0));
    }

    #[test]
    fn test_resume_with_clock_behind_pause_start_adds_nothing() {
        let mut c = client();
        let t0 = at("2026-01-05T10:00:00Z");
        pause(&mut c, t0).unwrap();
        let added = resume(&mut c, t0 - Duration::seconds(30)).unwrap();
        assert_eq!(added, 0);
        assert_eq!(c.paused_total_secs, 0);
    }

    #[test]
    fn test_multiple_pauses_accumulate() {
        let mut c = client();
        let t0 = at("2026-01-05T10:00:00Z");
        pause(&mut c, t0).unwrap();
        resume(&mut c, t0 + Duration::seconds(100)).unwrap();
        pause(&mut c, t0 + Duration::seconds(1000)).unwrap();
        resume(&mut c, t0 + Duration::seconds(1250)).unwrap();
        assert_eq!(c.paused_total_secs, 350);
    }
}
