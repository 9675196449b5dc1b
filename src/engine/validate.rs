use chrono::{DateTime, Days, Utc};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

fn check_day_bounds(day: Day) -> Result<(), EngineError> {
    if day < min_valid_day() || day > max_valid_day() {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// Validate a requested stay `[check_in, check_out)`.
pub(crate) fn validate_stay(check_in: Day, check_out: Day) -> Result<Span, EngineError> {
    let stay = Span::try_new(check_in, check_out).ok_or_else(|| EngineError::InvalidRange {
        start: check_in.to_string(),
        end: check_out.to_string(),
    })?;
    check_day_bounds(stay.start)?;
    check_day_bounds(stay.end)?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

/// Validate a host window `[start, start + days)`.
pub(crate) fn validate_window(start: Day, days: u64) -> Result<Span, EngineError> {
    if days == 0 {
        return Err(EngineError::Invalid("availability window must be at least one day"));
    }
    if days > MAX_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("availability window too long"));
    }
    let end = start
        .checked_add_days(Days::new(days))
        .ok_or(EngineError::LimitExceeded("date out of range"))?;
    check_day_bounds(start)?;
    check_day_bounds(end)?;
    Ok(Span::new(start, end))
}

pub(crate) fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Invalid(what));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// Trim and lower-case an e-mail address. Rejects obviously malformed input.
pub(crate) fn normalize_email(email: &str) -> Result<String, EngineError> {
    let email = email.trim().to_lowercase();
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(EngineError::Invalid("email must look like name@domain")),
    }
}

pub(crate) fn validate_price(price: f64) -> Result<(), EngineError> {
    if !price.is_finite() || price < 0.0 {
        return Err(EngineError::Invalid("price must be a non-negative number"));
    }
    Ok(())
}

pub(crate) fn validate_review(rating: u8, text: Option<&str>) -> Result<(), EngineError> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(EngineError::Invalid("rating must be between 1 and 5"));
    }
    if text.is_some_and(|t| t.len() > MAX_REVIEW_LEN) {
        return Err(EngineError::LimitExceeded("review too long"));
    }
    Ok(())
}
