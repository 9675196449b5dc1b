use crate::model::*;

use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// Half-open overlap: adjacent ranges (`a.end == b.start`) do not overlap.
pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// The single free interval that fully contains `stay`, if any.
///
/// Free capacity split across adjacent windows does not count: a booking has to
/// fit inside one published window. Scans in start order, so when windows were
/// ever allowed to overlap the earliest one wins.
pub fn free_window<'a>(kennel: &'a KennelState, stay: &Span) -> Option<&'a Interval> {
    // A containing window starts at or before stay.start.
    let upper = kennel
        .intervals
        .partition_point(|i| i.span.start <= stay.start);
    kennel.intervals[..upper]
        .iter()
        .find(|i| i.is_free() && i.span.contains_span(stay))
}

pub fn free_subrange(kennel: &KennelState, stay: &Span) -> bool {
    free_window(kennel, stay).is_some()
}

/// Size and social compatibility, independent of dates.
pub fn check_eligibility(kennel: &KennelState, dog: &Dog) -> Result<(), EngineError> {
    if kennel.size < dog.size {
        return Err(EngineError::SizeMismatch {
            kennel: kennel.size,
            dog: dog.size,
        });
    }
    if dog.unsocial && !kennel.allow_unsocial {
        return Err(EngineError::UnsocialNotAllowed(kennel.id));
    }
    Ok(())
}

pub fn is_available(kennel: &KennelState, dog: &Dog, stay: &Span) -> bool {
    check_eligibility(kennel, dog).is_ok() && free_subrange(kennel, stay)
}

/// Interval already on the schedule that a new window would collide with.
pub fn first_overlap<'a>(kennel: &'a KennelState, window: &Span) -> Option<&'a Interval> {
    kennel.overlapping(window).next()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ulid::Ulid;

    use super::*;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::new(d(a), d(b))
    }

    fn make_kennel(size: SizeClass, allow_unsocial: bool, intervals: Vec<Interval>) -> KennelState {
        let mut k = KennelState::new(
            Ulid::new(),
            Ulid::new(),
            "Kennel".into(),
            25.0,
            size,
            false,
            allow_unsocial,
            Utc::now(),
        );
        for i in intervals {
            k.insert_interval(i);
        }
        k
    }

    fn free(a: &str, b: &str) -> Interval {
        Interval::free(Ulid::new(), span(a, b))
    }

    fn booked(a: &str, b: &str) -> Interval {
        let occupant = Occupant {
            owner_id: Ulid::new(),
            dog_id: Ulid::new(),
        };
        Interval::occupied(Ulid::new(), span(a, b), occupant, Utc::now())
    }

    fn dog(size: SizeClass, unsocial: bool) -> Dog {
        Dog {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Rex".into(),
            breed: "Mutt".into(),
            size,
            unsocial,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn overlaps_is_half_open() {
        assert!(overlaps(&span("2025-01-01", "2025-01-03"), &span("2025-01-02", "2025-01-04")));
        assert!(!overlaps(&span("2025-01-01", "2025-01-03"), &span("2025-01-03", "2025-01-04")));
    }

    #[test]
    fn free_subrange_inside_window() {
        let k = make_kennel(SizeClass::Small, false, vec![free("2025-01-01", "2025-01-10")]);
        assert!(free_subrange(&k, &span("2025-01-03", "2025-01-05")));
        assert!(free_subrange(&k, &span("2025-01-01", "2025-01-10")));
        assert!(!free_subrange(&k, &span("2024-12-31", "2025-01-05")));
        assert!(!free_subrange(&k, &span("2025-01-09", "2025-01-11")));
    }

    #[test]
    fn fragmented_capacity_does_not_count() {
        let k = make_kennel(
            SizeClass::Small,
            false,
            vec![free("2025-01-01", "2025-01-05"), free("2025-01-05", "2025-01-10")],
        );
        assert!(!free_subrange(&k, &span("2025-01-04", "2025-01-06")));
        assert!(free_subrange(&k, &span("2025-01-05", "2025-01-06")));
    }

    #[test]
    fn occupied_interval_is_not_free() {
        let k = make_kennel(SizeClass::Small, false, vec![booked("2025-01-01", "2025-01-10")]);
        assert!(!free_subrange(&k, &span("2025-01-02", "2025-01-03")));
    }

    #[test]
    fn empty_schedule_has_no_capacity() {
        let k = make_kennel(SizeClass::Large, true, vec![]);
        assert!(free_window(&k, &span("2025-01-01", "2025-01-02")).is_none());
    }

    #[test]
    fn free_window_returns_containing_interval() {
        let target = free("2025-02-01", "2025-02-20");
        let id = target.id;
        let k = make_kennel(
            SizeClass::Small,
            false,
            vec![free("2025-01-01", "2025-01-10"), target, free("2025-03-01", "2025-03-05")],
        );
        assert_eq!(free_window(&k, &span("2025-02-10", "2025-02-12")).map(|i| i.id), Some(id));
    }

    #[test]
    fn exactly_one_window_decides_availability() {
        // Non-overlapping free windows: available iff one window contains the stay.
        let k = make_kennel(
            SizeClass::Small,
            false,
            vec![
                free("2025-01-01", "2025-01-04"),
                free("2025-01-06", "2025-01-09"),
                free("2025-01-09", "2025-01-12"),
            ],
        );
        let candidates = [
            (span("2025-01-01", "2025-01-04"), true),
            (span("2025-01-02", "2025-01-03"), true),
            (span("2025-01-03", "2025-01-07"), false),
            (span("2025-01-04", "2025-01-06"), false),
            (span("2025-01-08", "2025-01-10"), false),
            (span("2025-01-09", "2025-01-12"), true),
        ];
        for (stay, expected) in candidates {
            let containing = k
                .intervals
                .iter()
                .filter(|i| i.is_free() && i.span.contains_span(&stay))
                .count();
            assert_eq!(free_subrange(&k, &stay), expected, "stay {stay}");
            assert_eq!(containing == 1, expected, "stay {stay}");
        }
    }

    #[test]
    fn small_dog_fits_large_kennel() {
        let k = make_kennel(SizeClass::Large, false, vec![free("2025-01-01", "2025-01-10")]);
        let small = dog(SizeClass::Small, false);
        assert!(check_eligibility(&k, &small).is_ok());
        assert!(is_available(&k, &small, &span("2025-01-02", "2025-01-04")));
    }

    #[test]
    fn large_dog_rejected_by_small_kennel() {
        let k = make_kennel(SizeClass::Small, true, vec![free("2025-01-01", "2025-01-10")]);
        let large = dog(SizeClass::Large, false);
        assert!(matches!(
            check_eligibility(&k, &large),
            Err(EngineError::SizeMismatch {
                kennel: SizeClass::Small,
                dog: SizeClass::Large
            })
        ));
        assert!(!is_available(&k, &large, &span("2025-01-02", "2025-01-04")));
    }

    #[test]
    fn unsocial_dog_needs_permission_regardless_of_dates() {
        let strict = make_kennel(SizeClass::Large, false, vec![free("2025-01-01", "2025-01-10")]);
        let relaxed = make_kennel(SizeClass::Large, true, vec![free("2025-01-01", "2025-01-10")]);
        let grumpy = dog(SizeClass::Medium, true);
        assert!(matches!(
            check_eligibility(&strict, &grumpy),
            Err(EngineError::UnsocialNotAllowed(_))
        ));
        assert!(!is_available(&strict, &grumpy, &span("2025-01-02", "2025-01-04")));
        assert!(is_available(&relaxed, &grumpy, &span("2025-01-02", "2025-01-04")));
    }

    #[test]
    fn first_overlap_detects_collisions() {
        let k = make_kennel(
            SizeClass::Small,
            false,
            vec![free("2025-01-01", "2025-01-05"), booked("2025-01-10", "2025-01-12")],
        );
        assert!(first_overlap(&k, &span("2025-01-05", "2025-01-10")).is_none());
        assert!(first_overlap(&k, &span("2025-01-04", "2025-01-06")).is_some());
        assert!(first_overlap(&k, &span("2025-01-11", "2025-01-20")).is_some());
    }
}
