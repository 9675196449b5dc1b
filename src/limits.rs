use chrono::NaiveDate;

pub const MAX_KENNELS: usize = 100_000;
pub const MAX_DOGS: usize = 1_000_000;
pub const MAX_OWNERS: usize = 1_000_000;
pub const MAX_INTERVALS_PER_KENNEL: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_REVIEW_LEN: usize = 4_096;

/// Longest window a host can publish in one call.
pub const MAX_WINDOW_DAYS: u64 = 731;
/// Longest single stay.
pub const MAX_STAY_NIGHTS: i64 = 366;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

pub fn min_valid_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub fn max_valid_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2200, 1, 1).unwrap_or(NaiveDate::MAX)
}
