//! Temporal classification: where an instant or a time window sits
//! relative to "now".
//!
//! Classification is always computed against the wall clock at call time,
//! never cached; a bucket that was `Future` a millisecond ago may be
//! `Current` now, and every scheduling decision re-derives it.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Position of a trigger instant or a bucket window on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalState {
    /// Entirely elapsed. For an instant: trigger time is behind now.
    Past,
    /// Straddles now. An instant equal to now is `Current` and counts as ready.
    Current,
    /// Lies entirely ahead of now.
    Future,
}

impl TemporalState {
    /// Ready means retrievable right now: `Past` or `Current`.
    pub fn is_ready(self) -> bool {
        matches!(self, TemporalState::Past | TemporalState::Current)
    }

    /// Classify a single instant against `now`.
    pub fn of_instant(instant: DateTime<Utc>, now: DateTime<Utc>) -> TemporalState {
        if instant < now {
            TemporalState::Past
        } else if instant > now {
            TemporalState::Future
        } else {
            TemporalState::Current
        }
    }
}

impl fmt::Display for TemporalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalState::Past => write!(f, "past"),
            TemporalState::Current => write!(f, "current"),
            TemporalState::Future => write!(f, "future"),
        }
    }
}

/// Half-open window on the timeline: `start` inclusive, `end` exclusive.
///
/// Bounds are value types: hashable and comparable so they can key the
/// scheduler's bucket map directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBound {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBound {
    /// Build a bound from explicit edges. `start` must precede `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeBound {
        assert!(start < end, "time bound start must precede end");
        TimeBound { start, end }
    }

    /// The canonical fixed-width bucket containing `instant`:
    /// start is `instant` floored to a multiple of `span`, end is one span later.
    ///
    /// Flooring happens at millisecond resolution (spans are whole
    /// milliseconds); sub-millisecond parts of `instant` stay inside the
    /// bucket, so two triggers in the same window always map to the same
    /// bound and `contains` holds for both.
    ///
    /// `None` when the aligned window would poke past either end of the
    /// representable timeline.
    pub fn containing(instant: DateTime<Utc>, span: Duration) -> Option<TimeBound> {
        let span_ms = span.num_milliseconds();
        assert!(span_ms > 0, "bucket span must be a positive number of milliseconds");

        let rem_ms = instant.timestamp_millis().rem_euclid(span_ms);
        let sub_ms_ns = i64::from(instant.timestamp_subsec_nanos() % 1_000_000);
        let start = instant
            .checked_sub_signed(Duration::milliseconds(rem_ms))?
            .checked_sub_signed(Duration::nanoseconds(sub_ms_ns))?;
        let end = start.checked_add_signed(span)?;
        Some(TimeBound { start, end })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Classify the whole window against `now`: `Past` once `end` has
    /// elapsed, `Future` while `start` is still ahead, `Current` in between.
    pub fn temporal_state(&self, now: DateTime<Utc>) -> TemporalState {
        if self.end <= now {
            TemporalState::Past
        } else if self.start > now {
            TemporalState::Future
        } else {
            TemporalState::Current
        }
    }
}

impl fmt::Display for TimeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} .. {})",
            self.start.format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.end.format("%Y-%m-%dT%H:%M:%S%.3f")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[test]
    fn instant_classification() {
        let now = at(10_000);
        assert_eq!(TemporalState::of_instant(at(9_999), now), TemporalState::Past);
        assert_eq!(TemporalState::of_instant(at(10_000), now), TemporalState::Current);
        assert_eq!(TemporalState::of_instant(at(10_001), now), TemporalState::Future);
        assert!(TemporalState::of_instant(at(10_000), now).is_ready());
        assert!(!TemporalState::of_instant(at(10_001), now).is_ready());
    }

    #[test]
    fn bound_classification_half_open() {
        let bound = TimeBound::new(at(1_000), at(2_000));
        assert_eq!(bound.temporal_state(at(999)), TemporalState::Future);
        assert_eq!(bound.temporal_state(at(1_000)), TemporalState::Current);
        assert_eq!(bound.temporal_state(at(1_999)), TemporalState::Current);
        // end is exclusive: the window is over the instant it "ends".
        assert_eq!(bound.temporal_state(at(2_000)), TemporalState::Past);
    }

    #[test]
    fn containment_half_open() {
        let bound = TimeBound::new(at(1_000), at(2_000));
        assert!(bound.contains(at(1_000)));
        assert!(bound.contains(at(1_999)));
        assert!(!bound.contains(at(2_000)));
        assert!(!bound.contains(at(999)));
    }

    #[test]
    fn containing_floors_to_span() {
        let span = Duration::milliseconds(10);
        let bound = TimeBound::containing(at(12_347), span).unwrap();
        assert_eq!(bound.start, at(12_340));
        assert_eq!(bound.end, at(12_350));
        assert!(bound.contains(at(12_347)));

        // Instants in the same window share a bound, and so a map key.
        assert_eq!(TimeBound::containing(at(12_341), span).unwrap(), bound);
        assert_ne!(TimeBound::containing(at(12_350), span).unwrap(), bound);
    }

    #[test]
    fn containing_handles_pre_epoch_instants() {
        let span = Duration::milliseconds(100);
        let bound = TimeBound::containing(at(-12_345), span).unwrap();
        assert_eq!(bound.start, at(-12_400));
        assert!(bound.contains(at(-12_345)));
    }

    #[test]
    fn containing_keeps_sub_millisecond_triggers_inside() {
        let span = Duration::milliseconds(10);
        let instant = at(12_340) + Duration::nanoseconds(4_500_123);
        let bound = TimeBound::containing(instant, span).unwrap();
        assert_eq!(bound.start, at(12_340));
        assert!(bound.contains(instant));
    }

    #[test]
    fn containing_refuses_windows_off_the_timeline() {
        let span = Duration::milliseconds(1_000);
        assert!(TimeBound::containing(DateTime::<Utc>::MAX_UTC, span).is_none());

        let near_edge = DateTime::<Utc>::MAX_UTC - Duration::milliseconds(1);
        assert!(TimeBound::containing(near_edge, span).is_none());
    }

    #[test]
    #[should_panic(expected = "start must precede end")]
    fn inverted_bound_is_rejected() {
        TimeBound::new(at(2_000), at(1_000));
    }
}
