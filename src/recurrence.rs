/*
Recurrence rules and next-due-date computation.
Pure date arithmetic, kept apart from HTTP / storage for testing.
*/

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Task;

// Upper bound on the month-index search. Eight years covers the longest gap
// between two Feb 29ths (e.g. 2096 -> 2104).
const MONTH_SEARCH_LIMIT: u32 = 12 * 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("frequency field `{0}` is required")]
    MissingField(&'static str),
    #[error("frequency field `{0}` is not allowed for this frequency")]
    UnexpectedField(&'static str),
    #[error("`every` must be a positive number")]
    ZeroInterval,
    #[error("`days` must contain at least one weekday")]
    EmptyDaysOfWeek,
    #[error("`months` must contain at least one month")]
    EmptyMonths,
    #[error("`{field}` value {value} is out of range 0..={max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u8,
        max: u8,
    },
    #[error("no date after the anchor matches the configured months")]
    NoMatchingDate,
    #[error("next due date is outside the supported date range")]
    DateOutOfRange,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyKind {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepeatOn {
    Interval,
    DaysOfTheWeek,
    DayOfTheMonths,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

// Flat wire/persisted shape of a rule. Fields that do not apply to the
// chosen kind are null, never zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrequencySpec {
    #[serde(rename = "type")]
    pub kind: FrequencyKind,
    pub on: Option<RepeatOn>,
    pub every: Option<u32>,
    pub unit: Option<IntervalUnit>,
    pub days: Option<Vec<u8>>,
    pub months: Option<Vec<u8>>,
}

impl FrequencySpec {
    pub fn of(kind: FrequencyKind) -> Self {
        Self {
            kind,
            on: None,
            every: None,
            unit: None,
            days: None,
            months: None,
        }
    }
}

/// How a task repeats.
///
/// `Interval`, `DaysOfWeek` and `Months` are the three modes of a custom
/// frequency. Weekdays are numbered 0 (Sunday) to 6 (Saturday).
///
/// `Months` holds month indices 0 (January) to 11 (December), not days of
/// the month: the next occurrence keeps the anchor's day of month and lands
/// in the next listed month where that day exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FrequencySpec", into = "FrequencySpec")]
pub enum RecurrenceRule {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Interval { every: u32, unit: IntervalUnit },
    DaysOfWeek(BTreeSet<u8>),
    Months(BTreeSet<u8>),
}

impl RecurrenceRule {
    pub fn kind(&self) -> FrequencyKind {
        match self {
            RecurrenceRule::Once => FrequencyKind::Once,
            RecurrenceRule::Daily => FrequencyKind::Daily,
            RecurrenceRule::Weekly => FrequencyKind::Weekly,
            RecurrenceRule::Monthly => FrequencyKind::Monthly,
            RecurrenceRule::Yearly => FrequencyKind::Yearly,
            RecurrenceRule::Interval { .. }
            | RecurrenceRule::DaysOfWeek(_)
            | RecurrenceRule::Months(_) => FrequencyKind::Custom,
        }
    }

    /// Checks the payload constraints the enum shape alone cannot express.
    pub fn validate(&self) -> Result<(), RuleError> {
        match self {
            RecurrenceRule::Interval { every: 0, .. } => Err(RuleError::ZeroInterval),
            RecurrenceRule::DaysOfWeek(days) => check_set(days, "days", 6, RuleError::EmptyDaysOfWeek),
            RecurrenceRule::Months(months) => check_set(months, "months", 11, RuleError::EmptyMonths),
            _ => Ok(()),
        }
    }
}

fn check_set(set: &BTreeSet<u8>, field: &'static str, max: u8, empty: RuleError) -> Result<(), RuleError> {
    if set.is_empty() {
        return Err(empty);
    }
    match set.iter().find(|v| **v > max) {
        Some(&value) => Err(RuleError::ValueOutOfRange { field, value, max }),
        None => Ok(()),
    }
}

fn reject_present<T>(value: &Option<T>, field: &'static str) -> Result<(), RuleError> {
    match value {
        Some(_) => Err(RuleError::UnexpectedField(field)),
        None => Ok(()),
    }
}

impl TryFrom<FrequencySpec> for RecurrenceRule {
    type Error = RuleError;

    fn try_from(spec: FrequencySpec) -> Result<Self, Self::Error> {
        if spec.kind != FrequencyKind::Custom {
            reject_present(&spec.on, "on")?;
            reject_present(&spec.every, "every")?;
            reject_present(&spec.unit, "unit")?;
            reject_present(&spec.days, "days")?;
            reject_present(&spec.months, "months")?;
        }

        let rule = match spec.kind {
            FrequencyKind::Once => RecurrenceRule::Once,
            FrequencyKind::Daily => RecurrenceRule::Daily,
            FrequencyKind::Weekly => RecurrenceRule::Weekly,
            FrequencyKind::Monthly => RecurrenceRule::Monthly,
            FrequencyKind::Yearly => RecurrenceRule::Yearly,
            FrequencyKind::Custom => match spec.on.ok_or(RuleError::MissingField("on"))? {
                RepeatOn::Interval => {
                    reject_present(&spec.days, "days")?;
                    reject_present(&spec.months, "months")?;
                    RecurrenceRule::Interval {
                        every: spec.every.ok_or(RuleError::MissingField("every"))?,
                        unit: spec.unit.ok_or(RuleError::MissingField("unit"))?,
                    }
                }
                RepeatOn::DaysOfTheWeek => {
                    reject_present(&spec.every, "every")?;
                    reject_present(&spec.unit, "unit")?;
                    reject_present(&spec.months, "months")?;
                    let days = spec.days.ok_or(RuleError::MissingField("days"))?;
                    RecurrenceRule::DaysOfWeek(days.into_iter().collect())
                }
                RepeatOn::DayOfTheMonths => {
                    reject_present(&spec.every, "every")?;
                    reject_present(&spec.unit, "unit")?;
                    reject_present(&spec.days, "days")?;
                    let months = spec.months.ok_or(RuleError::MissingField("months"))?;
                    RecurrenceRule::Months(months.into_iter().collect())
                }
            },
        };

        rule.validate()?;
        Ok(rule)
    }
}

impl From<RecurrenceRule> for FrequencySpec {
    fn from(rule: RecurrenceRule) -> Self {
        let mut spec = FrequencySpec::of(rule.kind());
        match rule {
            RecurrenceRule::Interval { every, unit } => {
                spec.on = Some(RepeatOn::Interval);
                spec.every = Some(every);
                spec.unit = Some(unit);
            }
            RecurrenceRule::DaysOfWeek(days) => {
                spec.on = Some(RepeatOn::DaysOfTheWeek);
                spec.days = Some(days.into_iter().collect());
            }
            RecurrenceRule::Months(months) => {
                spec.on = Some(RepeatOn::DayOfTheMonths);
                spec.months = Some(months.into_iter().collect());
            }
            _ => {}
        }
        spec
    }
}

/// Next due date of `task`, advancing from `reference`.
///
/// For a completion `reference` is the completion time; for a skip it is the
/// task's own due date, so repeated skips step through the schedule instead of
/// drifting with the wall clock.
pub fn next_due_date(task: &Task, reference: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, RuleError> {
    compute_next_due_date(&task.frequency, task.next_due_date, reference, task.is_rolling)
}

/// Computes the occurrence after the anchor.
///
/// Rolling schedules anchor on `reference`; fixed schedules anchor on the
/// previous due date (or `reference` when the task never had one).
/// `Ok(None)` means the rule has no further occurrence.
pub fn compute_next_due_date(
    rule: &RecurrenceRule,
    due_date: Option<DateTime<Utc>>,
    reference: DateTime<Utc>,
    is_rolling: bool,
) -> Result<Option<DateTime<Utc>>, RuleError> {
    rule.validate()?;

    let anchor = if is_rolling {
        reference
    } else {
        due_date.unwrap_or(reference)
    };

    let next = match rule {
        RecurrenceRule::Once => return Ok(None),
        RecurrenceRule::Daily => add_duration(anchor, Duration::try_days(1)),
        RecurrenceRule::Weekly => add_duration(anchor, Duration::try_days(7)),
        RecurrenceRule::Monthly => add_months(anchor, 1),
        RecurrenceRule::Yearly => add_months(anchor, 12),
        RecurrenceRule::Interval { every, unit } => add_interval(anchor, *every, *unit),
        RecurrenceRule::DaysOfWeek(days) => next_weekday(anchor, days),
        RecurrenceRule::Months(months) => return next_in_months(anchor, months).map(Some),
    };

    next.map(Some).ok_or(RuleError::DateOutOfRange)
}

fn add_interval(anchor: DateTime<Utc>, every: u32, unit: IntervalUnit) -> Option<DateTime<Utc>> {
    let n = i64::from(every);
    match unit {
        IntervalUnit::Hours => add_duration(anchor, Duration::try_hours(n)),
        IntervalUnit::Days => add_duration(anchor, Duration::try_days(n)),
        IntervalUnit::Weeks => add_duration(anchor, Duration::try_weeks(n)),
        IntervalUnit::Months => add_months(anchor, every),
        IntervalUnit::Years => add_months(anchor, every.checked_mul(12)?),
    }
}

fn add_duration(anchor: DateTime<Utc>, step: Option<Duration>) -> Option<DateTime<Utc>> {
    anchor.checked_add_signed(step?)
}

// chrono clamps to the last day of the target month (Jan 31 + 1 -> Feb 28/29)
fn add_months(anchor: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    anchor.checked_add_months(Months::new(months))
}

// Soonest day strictly after the anchor whose weekday is listed.
fn next_weekday(anchor: DateTime<Utc>, days: &BTreeSet<u8>) -> Option<DateTime<Utc>> {
    (1..=7).find_map(|offset| {
        let candidate = anchor.checked_add_signed(Duration::try_days(offset)?)?;
        let weekday = u8::try_from(candidate.weekday().num_days_from_sunday()).ok()?;
        days.contains(&weekday).then_some(candidate)
    })
}

// Keeps the anchor's day of month and time, walking forward one month at a
// time until it lands on a listed month index where that day exists.
fn next_in_months(anchor: DateTime<Utc>, months: &BTreeSet<u8>) -> Result<DateTime<Utc>, RuleError> {
    let day = anchor.day();
    let time = anchor.time();
    let mut year = anchor.year();
    let mut month0 = anchor.month0();

    for _ in 0..MONTH_SEARCH_LIMIT {
        if month0 == 11 {
            month0 = 0;
            year = year.checked_add(1).ok_or(RuleError::DateOutOfRange)?;
        } else {
            month0 += 1;
        }

        let listed = u8::try_from(month0).is_ok_and(|m| months.contains(&m));
        if !listed {
            continue;
        }
        if let Some(date) = NaiveDate::from_ymd_opt(year, month0 + 1, day) {
            return Ok(date.and_time(time).and_utc());
        }
    }

    Err(RuleError::NoMatchingDate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    fn fixed(rule: &RecurrenceRule, due: DateTime<Utc>, reference: DateTime<Utc>) -> DateTime<Utc> {
        compute_next_due_date(rule, Some(due), reference, false).unwrap().unwrap()
    }

    fn set(values: &[u8]) -> BTreeSet<u8> {
        values.iter().copied().collect()
    }

    #[test]
    fn once_has_no_next_occurrence() {
        let next = compute_next_due_date(&RecurrenceRule::Once, Some(at(2024, 5, 1)), at(2024, 5, 2), false);
        assert_eq!(next, Ok(None));
    }

    #[test]
    fn daily_and_weekly_cross_month_boundaries() {
        let due = at(2024, 1, 31);
        assert_eq!(fixed(&RecurrenceRule::Daily, due, due), at(2024, 2, 1));
        assert_eq!(fixed(&RecurrenceRule::Weekly, due, due), at(2024, 2, 7));

        let new_year = at(2023, 12, 28);
        assert_eq!(fixed(&RecurrenceRule::Weekly, new_year, new_year), at(2024, 1, 4));
    }

    #[test]
    fn monthly_clamps_to_end_of_february() {
        assert_eq!(fixed(&RecurrenceRule::Monthly, at(2024, 1, 31), at(2024, 1, 31)), at(2024, 2, 29));
        assert_eq!(fixed(&RecurrenceRule::Monthly, at(2023, 1, 31), at(2023, 1, 31)), at(2023, 2, 28));
        assert_eq!(fixed(&RecurrenceRule::Monthly, at(2023, 3, 31), at(2023, 3, 31)), at(2023, 4, 30));
    }

    #[test]
    fn yearly_keeps_february_dates() {
        assert_eq!(fixed(&RecurrenceRule::Yearly, at(2023, 2, 28), at(2023, 2, 28)), at(2024, 2, 28));
        assert_eq!(fixed(&RecurrenceRule::Yearly, at(2024, 2, 29), at(2024, 2, 29)), at(2025, 2, 28));
    }

    #[test]
    fn rolling_anchors_on_completion_and_fixed_on_due_date() {
        let due = at(2024, 3, 10);
        let completed = at(2024, 3, 25);

        let rolling = compute_next_due_date(&RecurrenceRule::Weekly, Some(due), completed, true).unwrap();
        assert_eq!(rolling, Some(at(2024, 4, 1)));

        let grid = compute_next_due_date(&RecurrenceRule::Weekly, Some(due), completed, false).unwrap();
        assert_eq!(grid, Some(at(2024, 3, 17)));
    }

    #[test]
    fn skip_advances_from_due_date_not_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 4, 19, 18, 0, 0).unwrap();
        let mut task = Task::new("water plants".to_string(), uuid::Uuid::new_v4(), RecurrenceRule::Weekly, Some(at(2024, 3, 10)), now);

        task.is_rolling = true;
        let skip_reference = task.next_due_date.unwrap();
        assert_eq!(next_due_date(&task, skip_reference).unwrap(), Some(at(2024, 3, 17)));

        task.is_rolling = false;
        assert_eq!(next_due_date(&task, skip_reference).unwrap(), Some(at(2024, 3, 17)));
    }

    #[test]
    fn fixed_task_without_due_date_uses_reference() {
        let next = compute_next_due_date(&RecurrenceRule::Daily, None, at(2024, 6, 1), false).unwrap();
        assert_eq!(next, Some(at(2024, 6, 2)));
    }

    #[test]
    fn custom_intervals() {
        let due = at(2024, 1, 31);
        let hours = RecurrenceRule::Interval { every: 36, unit: IntervalUnit::Hours };
        assert_eq!(fixed(&hours, due, due), Utc.with_ymd_and_hms(2024, 2, 1, 21, 30, 0).unwrap());

        let days = RecurrenceRule::Interval { every: 3, unit: IntervalUnit::Days };
        assert_eq!(fixed(&days, due, due), at(2024, 2, 3));

        let weeks = RecurrenceRule::Interval { every: 2, unit: IntervalUnit::Weeks };
        assert_eq!(fixed(&weeks, due, due), at(2024, 2, 14));

        let months = RecurrenceRule::Interval { every: 3, unit: IntervalUnit::Months };
        assert_eq!(fixed(&months, due, due), at(2024, 4, 30));

        let years = RecurrenceRule::Interval { every: 4, unit: IntervalUnit::Years };
        assert_eq!(fixed(&years, at(2024, 2, 29), at(2024, 2, 29)), at(2028, 2, 29));
    }

    #[test]
    fn days_of_week_finds_next_listed_day() {
        let mon_wed = RecurrenceRule::DaysOfWeek(set(&[1, 3]));
        // 2024-04-01 is a Monday
        let monday = at(2024, 4, 1);
        let wednesday = at(2024, 4, 3);

        assert_eq!(fixed(&mon_wed, monday, monday), wednesday);
        assert_eq!(fixed(&mon_wed, wednesday, wednesday), at(2024, 4, 8));
    }

    #[test]
    fn days_of_week_single_day_wraps_a_full_week() {
        let sundays = RecurrenceRule::DaysOfWeek(set(&[0]));
        let sunday = at(2024, 4, 7);
        assert_eq!(fixed(&sundays, sunday, sunday), at(2024, 4, 14));
    }

    #[test]
    fn month_indices_keep_day_and_skip_missing_dates() {
        // March and June
        let rule = RecurrenceRule::Months(set(&[2, 5]));
        assert_eq!(fixed(&rule, at(2024, 1, 15), at(2024, 1, 15)), at(2024, 3, 15));
        assert_eq!(fixed(&rule, at(2024, 3, 15), at(2024, 3, 15)), at(2024, 6, 15));
        assert_eq!(fixed(&rule, at(2024, 6, 15), at(2024, 6, 15)), at(2025, 3, 15));

        // June has no 31st, so the 31st lands in March only
        assert_eq!(fixed(&rule, at(2024, 3, 31), at(2024, 3, 31)), at(2025, 3, 31));
    }

    #[test]
    fn february_29th_waits_for_a_leap_year() {
        let rule = RecurrenceRule::Months(set(&[1]));
        assert_eq!(fixed(&rule, at(2024, 2, 29), at(2024, 2, 29)), at(2028, 2, 29));
    }

    #[test]
    fn impossible_month_day_is_rejected() {
        let rule = RecurrenceRule::Months(set(&[1]));
        let due = at(2024, 1, 30);
        assert_eq!(compute_next_due_date(&rule, Some(due), due, false), Err(RuleError::NoMatchingDate));
    }

    #[test]
    fn empty_sets_are_rejected_at_compute_time() {
        let due = at(2024, 1, 1);
        let days = RecurrenceRule::DaysOfWeek(BTreeSet::new());
        assert_eq!(compute_next_due_date(&days, Some(due), due, false), Err(RuleError::EmptyDaysOfWeek));

        let months = RecurrenceRule::Months(BTreeSet::new());
        assert_eq!(compute_next_due_date(&months, Some(due), due, false), Err(RuleError::EmptyMonths));
    }

    #[test]
    fn interval_without_every_is_rejected() {
        let spec = FrequencySpec {
            on: Some(RepeatOn::Interval),
            unit: Some(IntervalUnit::Days),
            ..FrequencySpec::of(FrequencyKind::Custom)
        };
        assert_eq!(RecurrenceRule::try_from(spec), Err(RuleError::MissingField("every")));
    }

    #[test]
    fn spec_validation_rejects_bad_shapes() {
        let zero = FrequencySpec {
            on: Some(RepeatOn::Interval),
            every: Some(0),
            unit: Some(IntervalUnit::Weeks),
            ..FrequencySpec::of(FrequencyKind::Custom)
        };
        assert_eq!(RecurrenceRule::try_from(zero), Err(RuleError::ZeroInterval));

        let stray = FrequencySpec {
            days: Some(vec![1]),
            ..FrequencySpec::of(FrequencyKind::Daily)
        };
        assert_eq!(RecurrenceRule::try_from(stray), Err(RuleError::UnexpectedField("days")));

        let no_mode = FrequencySpec::of(FrequencyKind::Custom);
        assert_eq!(RecurrenceRule::try_from(no_mode), Err(RuleError::MissingField("on")));

        let bad_day = FrequencySpec {
            on: Some(RepeatOn::DaysOfTheWeek),
            days: Some(vec![2, 7]),
            ..FrequencySpec::of(FrequencyKind::Custom)
        };
        assert_eq!(
            RecurrenceRule::try_from(bad_day),
            Err(RuleError::ValueOutOfRange { field: "days", value: 7, max: 6 })
        );

        let bad_month = FrequencySpec {
            on: Some(RepeatOn::DayOfTheMonths),
            months: Some(vec![12]),
            ..FrequencySpec::of(FrequencyKind::Custom)
        };
        assert_eq!(
            RecurrenceRule::try_from(bad_month),
            Err(RuleError::ValueOutOfRange { field: "months", value: 12, max: 11 })
        );
    }

    #[test]
    fn rule_json_uses_flat_shape_with_nulls() {
        let rule = RecurrenceRule::DaysOfWeek(set(&[1, 3]));
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "custom",
                "on": "days_of_the_week",
                "every": null,
                "unit": null,
                "days": [1, 3],
                "months": null,
            })
        );

        let missing: Result<RecurrenceRule, _> =
            serde_json::from_value(serde_json::json!({ "type": "custom", "on": "interval", "unit": "days" }));
        assert!(missing.is_err());
    }
}
