use std::cmp::Ordering;

use ulid::Ulid;

use crate::model::*;

use super::availability::is_available;

/// Kennels that can host `dog` for `stay`, cheapest first.
///
/// Equal prices prefer the larger kennel; remaining ties break on id so the
/// order is total and repeated calls agree.
pub fn find_available<'a, I>(kennels: I, dog: &Dog, stay: &Span) -> Vec<&'a KennelState>
where
    I: IntoIterator<Item = &'a KennelState>,
{
    let mut hits: Vec<&KennelState> = kennels
        .into_iter()
        .filter(|k| is_available(k, dog, stay))
        .collect();
    hits.sort_by(|a, b| rank((a.price, a.size, a.id), (b.price, b.size, b.id)));
    hits
}

/// Order already-filtered kennel snapshots the same way `find_available` does.
pub fn rank_kennels(hits: &mut [KennelInfo]) {
    hits.sort_by(|a, b| rank((a.price, a.size, a.id), (b.price, b.size, b.id)));
}

fn rank(a: (f64, SizeClass, Ulid), b: (f64, SizeClass, Ulid)) -> Ordering {
    a.0.total_cmp(&b.0)
        .then_with(|| b.1.cmp(&a.1))
        .then_with(|| a.2.cmp(&b.2))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::new(d(a), d(b))
    }

    fn kennel(name: &str, price: f64, size: SizeClass, allow_unsocial: bool) -> KennelState {
        let mut k = KennelState::new(
            Ulid::new(),
            Ulid::new(),
            name.into(),
            price,
            size,
            false,
            allow_unsocial,
            Utc::now(),
        );
        k.insert_interval(Interval::free(Ulid::new(), span("2025-01-01", "2025-01-31")));
        k
    }

    fn dog(size: SizeClass, unsocial: bool) -> Dog {
        Dog {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Bo".into(),
            breed: "Collie".into(),
            size,
            unsocial,
            registered_at: Utc::now(),
        }
    }

    fn names(hits: &[&KennelState]) -> Vec<String> {
        hits.iter().map(|k| k.name.clone()).collect()
    }

    #[test]
    fn ranks_by_price_then_larger_size() {
        let kennels = vec![
            kennel("pricey", 80.0, SizeClass::Large, false),
            kennel("cheap-medium", 20.0, SizeClass::Medium, false),
            kennel("cheap-large", 20.0, SizeClass::Large, false),
            kennel("mid", 35.5, SizeClass::Small, false),
        ];
        let hits = find_available(&kennels, &dog(SizeClass::Small, false), &span("2025-01-05", "2025-01-07"));
        assert_eq!(names(&hits), vec!["cheap-large", "cheap-medium", "mid", "pricey"]);
    }

    #[test]
    fn filters_size_social_and_dates() {
        let mut booked_out = kennel("booked-out", 10.0, SizeClass::Large, true);
        booked_out.intervals.clear();
        let kennels = vec![
            kennel("too-small", 5.0, SizeClass::Small, true),
            kennel("no-unsocial", 6.0, SizeClass::Large, false),
            booked_out,
            kennel("fits", 50.0, SizeClass::Medium, true),
        ];
        let hits = find_available(&kennels, &dog(SizeClass::Medium, true), &span("2025-01-05", "2025-01-07"));
        assert_eq!(names(&hits), vec!["fits"]);
    }

    #[test]
    fn outside_published_window_yields_nothing() {
        let kennels = vec![kennel("a", 10.0, SizeClass::Large, true)];
        let hits = find_available(&kennels, &dog(SizeClass::Small, false), &span("2025-01-30", "2025-02-02"));
        assert!(hits.is_empty());
    }

    #[test]
    fn snapshots_rank_like_live_kennels() {
        let kennels = vec![
            kennel("pricey", 80.0, SizeClass::Large, false),
            kennel("cheap-medium", 20.0, SizeClass::Medium, false),
            kennel("cheap-large", 20.0, SizeClass::Large, false),
        ];
        let mut infos: Vec<KennelInfo> = kennels.iter().map(KennelInfo::from).collect();
        rank_kennels(&mut infos);
        let ranked: Vec<&str> = infos.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(ranked, vec!["cheap-large", "cheap-medium", "pricey"]);
    }

    #[test]
    fn repeated_calls_agree() {
        let kennels: Vec<KennelState> = (0..8)
            .map(|i| kennel(&format!("k{i}"), 20.0, SizeClass::Medium, false))
            .collect();
        let fido = dog(SizeClass::Small, false);
        let stay = span("2025-01-02", "2025-01-04");
        let first = names(&find_available(&kennels, &fido, &stay));
        let second = names(&find_available(kennels.iter().rev(), &fido, &stay));
        assert_eq!(first.len(), 8);
        assert_eq!(first, second);
    }
}
