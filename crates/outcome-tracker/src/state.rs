//! Per-candidate outcome state machine: TRACKING → (target hit | window expired) → CLOSED.

use chrono::{DateTime, NaiveDate, Utc};
use pick_core::{Bar, CloseReason, Direction, Pick, PickOutcome, PriceTargets, ShortlistCandidate, TrackingStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Calendar days after the trade date an outcome stays open
    pub window_days: i64,
    /// Extra days allowed for missing data before a silent symbol is expired
    pub grace_days: i64,
    /// Low/medium/high % moves used for candidates that were not picked
    pub default_target_pcts: [f64; 3],
    /// Stop distance (%) used when no structural level is known
    pub default_stop_pct: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            grace_days: 5,
            default_target_pcts: [3.0, 6.0, 10.0],
            default_stop_pct: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Bar already processed, outside the window, or outcome closed
    Ignored,
    Updated,
    Closed(CloseReason),
}

/// Outcome for a published pick, tracked against the pick's own levels.
pub fn seed_for_pick(pick: &Pick) -> PickOutcome {
    PickOutcome::new(
        pick.trade_date,
        pick.symbol.clone(),
        true,
        pick.direction,
        pick.entry_price,
        pick.targets,
        pick.stop,
    )
}

/// Outcome for a shortlisted symbol that was not picked: the prescreen bias is
/// the likely outcome, with default % targets and a structural stop.
pub fn seed_for_candidate(candidate: &ShortlistCandidate, config: &TrackerConfig) -> PickOutcome {
    let direction = candidate.bias;
    let entry = candidate.features.last_close;
    let targets = PriceTargets::from_percentages(direction, entry, config.default_target_pcts);
    let fallback = entry * (1.0 - direction.sign() * config.default_stop_pct / 100.0);
    let stop = match direction {
        Direction::Long => candidate.features.support.filter(|s| *s < entry && *s > 0.0),
        Direction::Short => candidate.features.resistance.filter(|r| *r > entry),
    }
    .unwrap_or(fallback);

    PickOutcome::new(
        candidate.trade_date,
        candidate.symbol.clone(),
        false,
        direction,
        entry,
        targets,
        stop,
    )
}

fn close(outcome: &mut PickOutcome, reason: CloseReason, now: DateTime<Utc>) -> Transition {
    outcome.status = TrackingStatus::Closed;
    outcome.close_reason = Some(reason);
    outcome.closed_at = Some(now);
    Transition::Closed(reason)
}

/// Fold one daily bar into the outcome. Closed outcomes are never touched.
pub fn apply_bar(outcome: &mut PickOutcome, bar: &Bar, config: &TrackerConfig, now: DateTime<Utc>) -> Transition {
    if outcome.is_closed() || bar.date < outcome.trade_date {
        return Transition::Ignored;
    }
    if outcome.last_bar_date.is_some_and(|last| bar.date <= last) {
        return Transition::Ignored;
    }
    if (bar.date - outcome.trade_date).num_days() > config.window_days {
        return Transition::Ignored;
    }

    let direction = outcome.direction;
    let entry = outcome.entry_price;
    let (favourable, adverse) = match direction {
        Direction::Long => (bar.high, bar.low),
        Direction::Short => (bar.low, bar.high),
    };
    let reached = |level: f64| direction.move_pct(entry, favourable) >= direction.move_pct(entry, level);

    outcome.days_tracked += 1;
    outcome.last_bar_date = Some(bar.date);
    outcome.last_return_pct = direction.move_pct(entry, bar.close);

    let gain = direction.move_pct(entry, favourable);
    if gain > outcome.max_gain_pct {
        outcome.max_gain_pct = gain;
        outcome.days_to_peak = Some(outcome.days_tracked);
    }
    outcome.max_loss_pct = outcome.max_loss_pct.min(direction.move_pct(entry, adverse).min(0.0));

    outcome.hit_low |= reached(outcome.targets.low);
    outcome.hit_medium |= reached(outcome.targets.medium);
    outcome.hit_high |= reached(outcome.targets.high);
    // Recorded for analysis only; a stop does not close tracking
    outcome.stop_hit |= direction.move_pct(entry, adverse) <= direction.move_pct(entry, outcome.stop);

    if outcome.hit_high {
        return close(outcome, CloseReason::TargetHit, now);
    }
    if (bar.date - outcome.trade_date).num_days() >= config.window_days {
        return close(outcome, CloseReason::WindowExpired, now);
    }
    Transition::Updated
}

/// Close an outcome whose window (plus grace) has passed without data.
pub fn expire_if_overdue(
    outcome: &mut PickOutcome,
    as_of: NaiveDate,
    config: &TrackerConfig,
    now: DateTime<Utc>,
) -> Transition {
    if outcome.is_closed() {
        return Transition::Ignored;
    }
    if (as_of - outcome.trade_date).num_days() > config.window_days + config.grace_days {
        return close(outcome, CloseReason::WindowExpired, now);
    }
    Transition::Ignored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn bar(offset: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            date: day0() + Duration::days(offset),
            open: close,
            high,
            low,
            close,
            volume: 1e6,
        }
    }

    fn long() -> PickOutcome {
        PickOutcome::new(
            day0(),
            "AAA".into(),
            true,
            Direction::Long,
            100.0,
            PriceTargets::from_percentages(Direction::Long, 100.0, [3.0, 6.0, 10.0]),
            95.0,
        )
    }

    #[test]
    fn long_tracks_excursions_and_tiers() {
        let cfg = TrackerConfig::default();
        let now = Utc::now();
        let mut o = long();

        assert_eq!(apply_bar(&mut o, &bar(0, 101.0, 99.0, 100.5), &cfg, now), Transition::Updated);
        assert_eq!(apply_bar(&mut o, &bar(1, 104.0, 94.0, 103.0), &cfg, now), Transition::Updated);
        assert!(o.hit_low && !o.hit_medium);
        assert!(o.stop_hit);
        assert_eq!(o.status, TrackingStatus::Tracking);
        assert!((o.max_gain_pct - 4.0).abs() < 1e-9);
        assert!((o.max_loss_pct + 6.0).abs() < 1e-9);
        assert_eq!(o.days_to_peak, Some(2));

        assert_eq!(
            apply_bar(&mut o, &bar(2, 111.0, 102.0, 110.0), &cfg, now),
            Transition::Closed(CloseReason::TargetHit)
        );
        assert!(o.hit_medium && o.hit_high);
        assert_eq!(o.days_to_peak, Some(3));
    }

    #[test]
    fn short_direction_is_mirrored() {
        let cfg = TrackerConfig::default();
        let mut o = PickOutcome::new(
            day0(),
            "XXX".into(),
            false,
            Direction::Short,
            100.0,
            PriceTargets::from_percentages(Direction::Short, 100.0, [3.0, 6.0, 10.0]),
            104.0,
        );
        apply_bar(&mut o, &bar(0, 102.0, 93.5, 95.0), &cfg, Utc::now());
        assert!(o.hit_low && o.hit_medium && !o.hit_high);
        assert!((o.max_gain_pct - 6.5).abs() < 1e-9);
        assert!((o.max_loss_pct + 2.0).abs() < 1e-9);
        assert!((o.last_return_pct - 5.0).abs() < 1e-9);
        assert!(!o.stop_hit);
    }

    #[test]
    fn window_expiry_closes() {
        let cfg = TrackerConfig::default();
        let mut o = long();
        apply_bar(&mut o, &bar(10, 101.0, 99.0, 100.0), &cfg, Utc::now());
        assert_eq!(
            apply_bar(&mut o, &bar(30, 101.0, 99.0, 100.0), &cfg, Utc::now()),
            Transition::Closed(CloseReason::WindowExpired)
        );
    }

    #[test]
    fn closed_outcome_is_immutable() {
        let cfg = TrackerConfig::default();
        let mut o = long();
        apply_bar(&mut o, &bar(0, 111.0, 99.0, 110.0), &cfg, Utc::now());
        assert!(o.is_closed());
        let frozen = o.clone();

        assert_eq!(apply_bar(&mut o, &bar(1, 150.0, 50.0, 60.0), &cfg, Utc::now()), Transition::Ignored);
        assert_eq!(expire_if_overdue(&mut o, day0() + Duration::days(90), &cfg, Utc::now()), Transition::Ignored);
        assert_eq!(o, frozen);
    }

    #[test]
    fn replayed_and_early_bars_are_ignored() {
        let cfg = TrackerConfig::default();
        let mut o = long();
        apply_bar(&mut o, &bar(1, 101.0, 99.0, 100.0), &cfg, Utc::now());
        assert_eq!(apply_bar(&mut o, &bar(1, 101.0, 99.0, 100.0), &cfg, Utc::now()), Transition::Ignored);
        assert_eq!(apply_bar(&mut o, &bar(-1, 101.0, 99.0, 100.0), &cfg, Utc::now()), Transition::Ignored);
        assert_eq!(o.days_tracked, 1);
    }

    #[test]
    fn silent_symbol_expires_after_grace() {
        let cfg = TrackerConfig::default();
        let mut o = long();
        assert_eq!(expire_if_overdue(&mut o, day0() + Duration::days(33), &cfg, Utc::now()), Transition::Ignored);
        assert_eq!(
            expire_if_overdue(&mut o, day0() + Duration::days(36), &cfg, Utc::now()),
            Transition::Closed(CloseReason::WindowExpired)
        );
    }
}
