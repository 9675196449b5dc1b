use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day. Stays are measured in whole nights.
pub type Day = NaiveDate;

/// Half-open date range `[start, end)`. `end` is the check-out day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Day,
    pub end: Day,
}

impl Span {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Day, end: Day) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Kennel and dog size. Ordered: a larger kennel also fits smaller dogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(SizeClass::Small),
            1 => Some(SizeClass::Medium),
            2 => Some(SizeClass::Large),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeClass {
    type Err = String;

    /// Accepts the numeric codes `0..=2` or the names `small|medium|large`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "small" => Ok(SizeClass::Small),
            "medium" => Ok(SizeClass::Medium),
            "large" => Ok(SizeClass::Large),
            other => other
                .parse::<i64>()
                .ok()
                .and_then(SizeClass::from_code)
                .ok_or_else(|| format!("unknown size class: {s}")),
        }
    }
}

/// Who a booked interval belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occupant {
    pub owner_id: Ulid,
    pub dog_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// 1..=5
    pub rating: u8,
    pub text: Option<String>,
}

/// A single interval on a kennel schedule. `occupant == None` is open capacity,
/// anything else is a confirmed booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub occupant: Option<Occupant>,
    pub booked_at: Option<DateTime<Utc>>,
    pub review: Option<Review>,
}

impl Interval {
    pub fn free(id: Ulid, span: Span) -> Self {
        Self {
            id,
            span,
            occupant: None,
            booked_at: None,
            review: None,
        }
    }

    pub fn occupied(id: Ulid, span: Span, occupant: Occupant, booked_at: DateTime<Utc>) -> Self {
        Self {
            id,
            span,
            occupant: Some(occupant),
            booked_at: Some(booked_at),
            review: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.occupant.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct KennelState {
    pub id: Ulid,
    pub host_id: Ulid,
    pub name: String,
    pub price: f64,
    pub size: SizeClass,
    pub has_toys: bool,
    pub allow_unsocial: bool,
    pub registered_at: DateTime<Utc>,
    /// Free windows and bookings, sorted by `span.start`, pairwise disjoint.
    pub intervals: Vec<Interval>,
}

impl KennelState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Ulid,
        host_id: Ulid,
        name: String,
        price: f64,
        size: SizeClass,
        has_toys: bool,
        allow_unsocial: bool,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            host_id,
            name,
            price,
            size,
            has_toys,
            allow_unsocial,
            registered_at,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn interval(&self, id: Ulid) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.id == id)
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter().filter(|i| !i.is_free())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dog {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub breed: String,
    pub size: SizeClass,
    pub unsocial: bool,
    pub registered_at: DateTime<Utc>,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OwnerCreated {
        owner: Owner,
    },
    KennelRegistered {
        id: Ulid,
        host_id: Ulid,
        name: String,
        price: f64,
        size: SizeClass,
        has_toys: bool,
        allow_unsocial: bool,
        registered_at: DateTime<Utc>,
    },
    DogAdded {
        dog: Dog,
    },
    AvailabilityPublished {
        kennel_id: Ulid,
        window: Interval,
    },
    /// A free window replaced by its 1-3 replacements in one step.
    StayBooked {
        kennel_id: Ulid,
        window_id: Ulid,
        replacements: Vec<Interval>,
    },
    BookingReviewed {
        kennel_id: Ulid,
        booking_id: Ulid,
        review: Review,
    },
    /// Whole schedule of one kennel, written by compaction.
    ScheduleRestored {
        kennel_id: Ulid,
        intervals: Vec<Interval>,
    },
}

/// Input for registering a kennel.
#[derive(Debug, Clone, PartialEq)]
pub struct NewKennel {
    pub id: Ulid,
    pub host_id: Ulid,
    pub name: String,
    pub price: f64,
    pub size: SizeClass,
    pub has_toys: bool,
    pub allow_unsocial: bool,
}

/// Input for adding a dog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDog {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub breed: String,
    pub size: SizeClass,
    pub unsocial: bool,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct KennelInfo {
    pub id: Ulid,
    pub host_id: Ulid,
    pub name: String,
    pub price: f64,
    pub size: SizeClass,
    pub has_toys: bool,
    pub allow_unsocial: bool,
}

impl From<&KennelState> for KennelInfo {
    fn from(k: &KennelState) -> Self {
        Self {
            id: k.id,
            host_id: k.host_id,
            name: k.name.clone(),
            price: k.price,
            size: k.size,
            has_toys: k.has_toys,
            allow_unsocial: k.allow_unsocial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub kennel_id: Ulid,
    pub kennel_name: String,
    pub host_id: Ulid,
    pub owner_id: Ulid,
    pub dog_id: Ulid,
    pub check_in: Day,
    pub check_out: Day,
    pub booked_at: Option<DateTime<Utc>>,
    pub review: Option<Review>,
}

impl BookingInfo {
    /// Project an occupied interval. Returns `None` for free windows.
    pub fn project(kennel: &KennelState, interval: &Interval) -> Option<Self> {
        let occupant = interval.occupant?;
        Some(Self {
            id: interval.id,
            kennel_id: kennel.id,
            kennel_name: kennel.name.clone(),
            host_id: kennel.host_id,
            owner_id: occupant.owner_id,
            dog_id: occupant.dog_id,
            check_in: interval.span.start,
            check_out: interval.span.end,
            booked_at: interval.booked_at,
            review: interval.review.clone(),
        })
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub id: Ulid,
    pub kennel_id: Ulid,
    pub start: Day,
    pub end: Day,
    pub occupant: Option<Occupant>,
    pub booked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

impl From<&Owner> for OwnerInfo {
    fn from(o: &Owner) -> Self {
        Self {
            id: o.id,
            name: o.name.clone(),
            email: o.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DogInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub breed: String,
    pub size: SizeClass,
    pub unsocial: bool,
}

impl From<&Dog> for DogInfo {
    fn from(d: &Dog) -> Self {
        Self {
            id: d.id,
            owner_id: d.owner_id,
            name: d.name.clone(),
            breed: d.breed.clone(),
            size: d.size,
            unsocial: d.unsocial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::new(d(a), d(b))
    }

    fn kennel() -> KennelState {
        KennelState::new(
            Ulid::new(),
            Ulid::new(),
            "Barn".into(),
            30.0,
            SizeClass::Medium,
            true,
            false,
            Utc::now(),
        )
    }

    #[test]
    fn span_basics() {
        let s = span("2025-01-01", "2025-01-10");
        assert_eq!(s.nights(), 9);
        assert_eq!(s.to_string(), "[2025-01-01, 2025-01-10)");
        assert!(Span::try_new(d("2025-01-02"), d("2025-01-02")).is_none());
        assert!(Span::try_new(d("2025-01-03"), d("2025-01-02")).is_none());
    }

    #[test]
    fn span_overlap() {
        let a = span("2025-01-01", "2025-01-05");
        let b = span("2025-01-04", "2025-01-08");
        let c = span("2025-01-05", "2025-01-09");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = span("2025-01-01", "2025-01-10");
        assert!(outer.contains_span(&span("2025-01-03", "2025-01-05")));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&span("2024-12-31", "2025-01-02")));
        assert!(!outer.contains_span(&span("2025-01-09", "2025-01-11")));
    }

    #[test]
    fn size_class_ordering_and_parsing() {
        assert!(SizeClass::Large > SizeClass::Medium);
        assert!(SizeClass::Medium > SizeClass::Small);
        assert_eq!("0".parse::<SizeClass>().unwrap(), SizeClass::Small);
        assert_eq!("Large".parse::<SizeClass>().unwrap(), SizeClass::Large);
        assert_eq!(" medium ".parse::<SizeClass>().unwrap(), SizeClass::Medium);
        assert!("3".parse::<SizeClass>().is_err());
        assert!("huge".parse::<SizeClass>().is_err());
        assert_eq!(SizeClass::from_code(-1), None);
    }

    #[test]
    fn interval_ordering() {
        let mut k = kennel();
        k.insert_interval(Interval::free(Ulid::new(), span("2025-03-01", "2025-03-05")));
        k.insert_interval(Interval::free(Ulid::new(), span("2025-01-01", "2025-01-05")));
        k.insert_interval(Interval::free(Ulid::new(), span("2025-02-01", "2025-02-05")));
        let starts: Vec<Day> = k.intervals.iter().map(|i| i.span.start).collect();
        assert_eq!(starts, vec![d("2025-01-01"), d("2025-02-01"), d("2025-03-01")]);
    }

    #[test]
    fn interval_remove() {
        let mut k = kennel();
        let id = Ulid::new();
        k.insert_interval(Interval::free(id, span("2025-01-01", "2025-01-05")));
        assert!(k.remove_interval(Ulid::new()).is_none());
        assert_eq!(k.intervals.len(), 1);
        assert_eq!(k.remove_interval(id).map(|i| i.id), Some(id));
        assert!(k.intervals.is_empty());
    }

    #[test]
    fn overlapping_skips_adjacent_and_distant() {
        let mut k = kennel();
        k.insert_interval(Interval::free(Ulid::new(), span("2025-01-01", "2025-01-05")));
        k.insert_interval(Interval::free(Ulid::new(), span("2025-01-05", "2025-01-08")));
        k.insert_interval(Interval::free(Ulid::new(), span("2025-02-01", "2025-02-03")));

        let hits: Vec<_> = k.overlapping(&span("2025-01-05", "2025-01-06")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, span("2025-01-05", "2025-01-08"));
    }

    #[test]
    fn booking_projection() {
        let mut k = kennel();
        let free = Interval::free(Ulid::new(), span("2025-01-01", "2025-01-03"));
        let occupant = Occupant {
            owner_id: Ulid::new(),
            dog_id: Ulid::new(),
        };
        let booked = Interval::occupied(Ulid::new(), span("2025-01-03", "2025-01-06"), occupant, Utc::now());
        assert!(BookingInfo::project(&k, &free).is_none());
        let info = BookingInfo::project(&k, &booked).unwrap();
        assert_eq!(info.owner_id, occupant.owner_id);
        assert_eq!(info.nights(), 3);
        assert_eq!(info.kennel_name, "Barn");

        k.insert_interval(free);
        k.insert_interval(booked);
        assert_eq!(k.bookings().count(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AvailabilityPublished {
            kennel_id: Ulid::new(),
            window: Interval::free(Ulid::new(), span("2025-01-01", "2025-01-10")),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
