use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::availability::{check_eligibility, free_window};
use super::EngineError;

/// One free window and the intervals that take its place.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub window_id: Ulid,
    /// Leading remainder, booked stay, trailing remainder, in that order.
    /// Remainders are present only when non-empty.
    pub intervals: Vec<Interval>,
}

impl Replacement {
    pub fn booked(&self) -> Option<&Interval> {
        self.intervals.iter().find(|i| !i.is_free())
    }
}

/// Compute the schedule change for booking `stay` on `kennel`.
///
/// Re-checks eligibility, then splits the containing free window into up to
/// three intervals covering exactly the same days. Does not mutate the kennel.
pub fn plan_booking(
    kennel: &KennelState,
    dog: &Dog,
    booking_id: Ulid,
    occupant: Occupant,
    stay: Span,
    now: DateTime<Utc>,
) -> Result<Replacement, EngineError> {
    check_eligibility(kennel, dog)?;
    let window = free_window(kennel, &stay).ok_or(EngineError::NoAvailableWindow {
        kennel_id: kennel.id,
        stay,
    })?;
    Ok(split_window(window, booking_id, occupant, stay, now))
}

/// Split `window` around `stay`. Caller guarantees `window.span` contains `stay`.
pub fn split_window(
    window: &Interval,
    booking_id: Ulid,
    occupant: Occupant,
    stay: Span,
    now: DateTime<Utc>,
) -> Replacement {
    debug_assert!(window.is_free() && window.span.contains_span(&stay));
    let mut intervals = Vec::with_capacity(3);
    if window.span.start < stay.start {
        intervals.push(Interval::free(
            Ulid::new(),
            Span::new(window.span.start, stay.start),
        ));
    }
    intervals.push(Interval::occupied(booking_id, stay, occupant, now));
    if stay.end < window.span.end {
        intervals.push(Interval::free(Ulid::new(), Span::new(stay.end, window.span.end)));
    }
    Replacement {
        window_id: window.id,
        intervals,
    }
}

/// Apply a replacement to the kennel in place. Unknown window ids are a no-op.
pub fn apply_replacement(kennel: &mut KennelState, window_id: Ulid, intervals: &[Interval]) {
    if kennel.remove_interval(window_id).is_none() {
        return;
    }
    for interval in intervals {
        kennel.insert_interval(interval.clone());
    }
}
