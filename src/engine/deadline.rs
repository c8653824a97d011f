//! Deadline calculation.
//!
//! A milestone's deadline is the end of its due day in the configured civil
//! timezone. The due day is the client's sign-on date plus a fixed day offset
//! (initial stages) or plus whole months (recurring stages).

use chrono::{DateTime, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Client, InitialKind, Milestone, MilestoneKind};
use crate::{Error, Result};

/// Wall-clock time of day every computed deadline lands on (23:59:00).
pub const END_OF_DAY_SECS: i64 = 23 * 3600 + 59 * 60;

/// Day offsets for each initial kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTable {
    days: [u32; 3],
}

impl Default for OffsetTable {
    fn default() -> Self {
        Self {
            days: InitialKind::ALL.map(InitialKind::default_offset_days),
        }
    }
}

impl OffsetTable {
    /// Build a table from explicit entries, falling back to built-in offsets
    /// for kinds not listed.
    ///
    /// Offsets must be strictly increasing along the initial kind order,
    /// otherwise the sequence order and deadline order would disagree.
    pub fn from_entries(entries: &[(InitialKind, u32)]) -> Result<Self> {
        let mut table = Self::default();
        for (kind, days) in entries {
            table.days[kind.index()] = *days;
        }
        table.validate()?;
        Ok(table)
    }

    /// Check that offsets strictly increase along the kind order.
    pub fn validate(&self) -> Result<()> {
        for pair in InitialKind::ALL.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            if self.days(earlier) >= self.days(later) {
                return Err(Error::Config(format!(
                    "initial-offsets must increase: {} is {} days but {} is {} days",
                    earlier,
                    self.days(earlier),
                    later,
                    self.days(later)
                )));
            }
        }
        Ok(())
    }

    pub fn days(&self, kind: InitialKind) -> u32 {
        self.days[kind.index()]
    }

    /// Entries in kind order.
    pub fn entries(&self) -> Vec<(InitialKind, u32)> {
        InitialKind::ALL.iter().map(|k| (*k, self.days(*k))).collect()
    }
}

/// Inclusive month bounds of the recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for RecurringBounds {
    fn default() -> Self {
        Self { min: 2, max: 12 }
    }
}

impl RecurringBounds {
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min < 1 {
            return Err(Error::Config(format!(
                "recurring-min must be at least 1, got {}",
                min
            )));
        }
        if min > max {
            return Err(Error::Config(format!(
                "recurring-min ({}) must not exceed recurring-max ({})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, sequence_number: u32) -> bool {
        (self.min..=self.max).contains(&sequence_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.min..=self.max
    }
}

/// Static deadline configuration: timezone, offsets, recurring bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineRules {
    pub timezone: Tz,
    pub offsets: OffsetTable,
    pub recurring: RecurringBounds,
}

impl Default for DeadlineRules {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            offsets: OffsetTable::default(),
            recurring: RecurringBounds::default(),
        }
    }
}

impl DeadlineRules {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            ..Self::default()
        }
    }

    /// All milestone kinds a newly onboarded client receives.
    pub fn onboarding_kinds(&self) -> Vec<MilestoneKind> {
        InitialKind::ALL
            .iter()
            .map(|stage| MilestoneKind::Initial { stage: *stage })
            .chain(
                self.recurring
                    .iter()
                    .map(|sequence_number| MilestoneKind::Recurring { sequence_number }),
            )
            .collect()
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::Config(format!("Unknown timezone: {}", name)))
}

/// Compute a milestone's deadline from its client's dates and its kind.
///
/// Initial kinds add a day offset to `signed_on`; recurring kinds add whole
/// months to `intake_date` if present, else to `signed_on`. The result is
/// 23:59 local time in `rules.timezone` on that day.
pub fn compute_due_at(
    signed_on: NaiveDate,
    kind: &MilestoneKind,
    intake_date: Option<NaiveDate>,
    rules: &DeadlineRules,
) -> DateTime<Utc> {
    let due_day = match kind {
        MilestoneKind::Initial { stage } => signed_on
            .checked_add_days(Days::new(u64::from(rules.offsets.days(*stage))))
            .unwrap_or(NaiveDate::MAX),
        MilestoneKind::Recurring { sequence_number } => intake_date
            .unwrap_or(signed_on)
            .checked_add_months(Months::new(*sequence_number))
            .unwrap_or(NaiveDate::MAX),
    };
    let due = end_of_day(due_day, &rules.timezone);
    debug!(%kind, %due_day, %due, "computed deadline");
    due
}

/// Deadline for a milestone, honoring its custom override.
pub fn due_at(client: &Client, milestone: &Milestone, rules: &DeadlineRules) -> DateTime<Utc> {
    match milestone.custom_due_at {
        Some(custom) => custom,
        None => compute_due_at(
            client.signed_on,
            &milestone.kind,
            client.initial_intake_date,
            rules,
        ),
    }
}

/// The instant the wall clock in `tz` reads 23:59:00 on `day`.
pub fn end_of_day(day: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let local = day.and_time(chrono::NaiveTime::MIN) + Duration::seconds(END_OF_DAY_SECS);
    local_to_utc(local, tz)
}

fn local_to_utc(local: NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        // Repeated hour: the first occurrence is the earlier deadline
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Skipped wall-clock time: move an hour forward, past a DST gap
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Timelike};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn la_rules() -> DeadlineRules {
        DeadlineRules::new(parse_timezone("America/Los_Angeles").unwrap())
    }

    fn initial(stage: InitialKind) -> MilestoneKind {
        MilestoneKind::Initial { stage }
    }

    #[test]
    fn test_one_day_offset_in_los_angeles() {
        let rules = la_rules();
        let due = compute_due_at(date("2026-02-24"), &initial(InitialKind::Day1), None, &rules);

        let local = due.with_timezone(&rules.timezone);
        assert_eq!(local.date_naive(), date("2026-02-25"));
        assert_eq!(local.time(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        // PST is UTC-8
        assert_eq!(due.to_rfc3339(), "2026-02-26T07:59:00+00:00");
    }

    #[test]
    fn test_deadline_after_dst_start_is_local_end_of_day() {
        // DST starts 2026-03-08 in America/Los_Angeles
        let rules = la_rules();
        let due = compute_due_at(date("2026-02-24"), &initial(InitialKind::Day14), None, &rules);

        let local = due.with_timezone(&rules.timezone);
        assert_eq!(local.date_naive(), date("2026-03-10"));
        assert_eq!((local.hour(), local.minute()), (23, 59));
        // PDT is UTC-7, a naive UTC day-add would land an hour off
        assert_eq!(due.to_rfc3339(), "2026-03-11T06:59:00+00:00");
    }

    #[test]
    fn test_end_of_day_inside_skipped_local_time() {
        // Samoa skipped 2011-12-30 entirely, jumping from UTC-10 to UTC+14
        let apia = parse_timezone("Pacific/Apia").unwrap();
        let local = date("2011-12-30").and_time(NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        assert!(matches!(apia.from_local_datetime(&local), LocalResult::None));

        // Lands one hour later on the wall clock: 2011-12-31 00:59 at UTC+14
        let due = end_of_day(date("2011-12-30"), &apia);
        assert_eq!(due, "2011-12-30T10:59:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_deadline_after_dst_end() {
        // DST ends 2026-11-01 in America/Los_Angeles
        let rules = la_rules();
        let due = compute_due_at(date("2026-10-20"), &initial(InitialKind::Day30), None, &rules);

        let local = due.with_timezone(&rules.timezone);
        assert_eq!(local.date_naive(), date("2026-11-19"));
        assert_eq!((local.hour(), local.minute()), (23, 59));
        assert_eq!(due.to_rfc3339(), "2026-11-20T07:59:00+00:00");
    }

    #[test]
    fn test_every_kind_lands_on_end_of_day() {
        let rules = la_rules();
        let signed_on = date("2026-01-15");
        for kind in rules.onboarding_kinds() {
            let due = compute_due_at(signed_on, &kind, None, &rules);
            let local = due.with_timezone(&rules.timezone);
            assert_eq!(
                (local.hour(), local.minute(), local.second()),
                (23, 59, 0),
                "kind {} landed at {}",
                kind,
                local
            );
        }
    }

    #[test]
    fn test_recurring_adds_months_and_clamps_month_end() {
        let rules = DeadlineRules::default();
        let due = compute_due_at(
            date("2026-01-31"),
            &MilestoneKind::Recurring { sequence_number: 1 },
            None,
            &rules,
        );
        assert_eq!(due.date_naive(), date("2026-02-28"));

        let due = compute_due_at(
            date("2026-01-10"),
            &MilestoneKind::Recurring { sequence_number: 12 },
            None,
            &rules,
        );
        assert_eq!(due.date_naive(), date("2027-01-10"));
    }

    #[test]
    fn test_recurring_uses_intake_date_when_present() {
        let rules = DeadlineRules::default();
        let due = compute_due_at(
            date("2026-01-10"),
            &MilestoneKind::Recurring { sequence_number: 2 },
            Some(date("2026-02-01")),
            &rules,
        );
        assert_eq!(due.date_naive(), date("2026-04-01"));

        // Initial kinds ignore the intake date
        let due = compute_due_at(
            date("2026-01-10"),
            &initial(InitialKind::Day1),
            Some(date("2026-02-01")),
            &rules,
        );
        assert_eq!(due.date_naive(), date("2026-01-11"));
    }

    #[test]
    fn test_custom_due_overrides_computation() {
        let rules = DeadlineRules::default();
        let now: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let client = Client::new("tmc-0001".to_string(), date("2026-01-01"), now);
        let mut milestone = Milestone::new(
            "tme-0001".to_string(),
            client.id.clone(),
            initial(InitialKind::Day14),
            now,
        );
        assert_eq!(due_at(&client, &milestone, &rules).date_naive(), date("2026-01-15"));

        let custom: DateTime<Utc> = "2026-05-05T10:00:00Z".parse().unwrap();
        milestone.custom_due_at = Some(custom);
        assert_eq!(due_at(&client, &milestone, &rules), custom);
    }

    #[test]
    fn test_offset_table_overrides_and_validation() {
        let table = OffsetTable::from_entries(&[(InitialKind::Day14, 10)]).unwrap();
        assert_eq!(table.days(InitialKind::Day1), 1);
        assert_eq!(table.days(InitialKind::Day14), 10);
        assert_eq!(table.days(InitialKind::Day30), 30);

        let err = OffsetTable::from_entries(&[(InitialKind::Day14, 45)]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_recurring_bounds_validation() {
        assert!(RecurringBounds::new(0, 3).is_err());
        assert!(RecurringBounds::new(5, 3).is_err());
        let bounds = RecurringBounds::new(2, 4).unwrap();
        assert_eq!(bounds.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(bounds.contains(4));
        assert!(!bounds.contains(1));
    }

    #[test]
    fn test_parse_timezone_rejects_unknown() {
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(matches!(
            parse_timezone("Mars/Olympus_Mons"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_onboarding_kinds() {
        let rules = DeadlineRules::default();
        let kinds = rules.onboarding_kinds();
        assert_eq!(kinds.len(), 3 + 11);
        assert_eq!(kinds[0], initial(InitialKind::Day1));
        assert_eq!(kinds[3], MilestoneKind::Recurring { sequence_number: 2 });
    }
}
