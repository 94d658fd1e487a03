//! When each scheduled job is due, in exchange-local time.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;

fn due(now: DateTime<Tz>, at: NaiveTime, last_run: Option<NaiveDate>) -> Option<NaiveDate> {
    let today = now.date_naive();
    if matches!(today.weekday(), Weekday::Sat | Weekday::Sun) {
        return None;
    }
    if now.time() < at {
        return None;
    }
    if last_run.is_some_and(|d| d >= today) {
        return None;
    }
    Some(today)
}

/// Trade day to run the pipeline for, if the daily slot has opened and the
/// day has not been attempted yet.
pub fn pipeline_due(now: DateTime<Tz>, at: NaiveTime, last_run: Option<NaiveDate>) -> Option<NaiveDate> {
    due(now, at, last_run)
}

/// Same rule for the nightly learner, keyed by its own last run.
pub fn learning_due(now: DateTime<Tz>, at: NaiveTime, last_run: Option<NaiveDate>) -> Option<NaiveDate> {
    due(now, at, last_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::US::Eastern;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn waits_for_the_slot_then_runs_once() {
        let slot = at(8, 30);
        let tuesday = NaiveDate::from_ymd_opt(2024, 6, 4).unwrap();
        let early = Eastern.with_ymd_and_hms(2024, 6, 4, 8, 0, 0).unwrap();
        let late = Eastern.with_ymd_and_hms(2024, 6, 4, 9, 0, 0).unwrap();

        assert_eq!(pipeline_due(early, slot, None), None);
        assert_eq!(pipeline_due(late, slot, None), Some(tuesday));
        assert_eq!(pipeline_due(late, slot, Some(tuesday)), None);
        assert_eq!(pipeline_due(late, slot, tuesday.pred_opt()), Some(tuesday));
    }

    #[test]
    fn weekends_are_skipped() {
        let saturday = Eastern.with_ymd_and_hms(2024, 6, 8, 21, 0, 0).unwrap();
        assert_eq!(learning_due(saturday, at(20, 0), None), None);
    }
}
