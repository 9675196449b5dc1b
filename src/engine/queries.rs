use std::time::Instant;

use ulid::Ulid;

use crate::model::*;

use super::availability::is_available;
use super::selector::rank_kennels;
use super::validate::{normalize_email, validate_stay};
use super::{Engine, EngineError, SharedKennelState};

impl Engine {
    /// Kennels that can take the owner's dog for `[check_in, check_out)`,
    /// cheapest first. Read-only: repeated calls with no writes in between
    /// return the same list.
    pub async fn query_available_kennels(
        &self,
        owner_id: Ulid,
        dog_id: Ulid,
        check_in: Day,
        check_out: Day,
    ) -> Result<Vec<KennelInfo>, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let dog = self.resolve_dog(owner_id, dog_id)?;

        let start = Instant::now();
        let handles = self.store.all_kennels();
        // One kennel locked at a time; a kennel mid-commit never holds up the rest.
        let mut hits = Vec::new();
        for kennel in &handles {
            let guard = kennel.read().await;
            if is_available(&guard, &dog, &stay) {
                hits.push(KennelInfo::from(&*guard));
            }
        }
        rank_kennels(&mut hits);

        tracing::debug!(
            dog = %dog_id,
            scanned = handles.len(),
            matched = hits.len(),
            "availability {stay} in {:?}",
            start.elapsed()
        );
        Ok(hits)
    }

    /// Whether one kennel could take the dog for the stay right now.
    pub async fn is_kennel_available(
        &self,
        kennel_id: Ulid,
        owner_id: Ulid,
        dog_id: Ulid,
        check_in: Day,
        check_out: Day,
    ) -> Result<bool, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let dog = self.resolve_dog(owner_id, dog_id)?;
        let kennel = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::KennelNotFound(kennel_id))?;
        let guard = kennel.read().await;
        Ok(is_available(&guard, &dog, &stay))
    }

    /// Bookings made by an owner, ordered by check-in.
    pub async fn list_bookings_for_owner(&self, owner_id: Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        if self.store.get_owner(&owner_id).is_none() {
            return Err(EngineError::OwnerNotFound(owner_id));
        }
        let bookings = collect_bookings(&self.store.all_kennels(), |i| {
            i.occupant.is_some_and(|o| o.owner_id == owner_id)
        })
        .await;
        Ok(bookings)
    }

    /// Bookings on every kennel the host registered, ordered by check-in.
    pub async fn list_bookings_for_host(&self, host_id: Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        if self.store.get_owner(&host_id).is_none() {
            return Err(EngineError::OwnerNotFound(host_id));
        }
        let kennels = self.store.kennels_by_ids(&self.store.kennel_ids_of(&host_id));
        Ok(collect_bookings(&kennels, |_| true).await)
    }

    pub async fn list_kennels_for_host(&self, host_id: Ulid) -> Result<Vec<KennelInfo>, EngineError> {
        if self.store.get_owner(&host_id).is_none() {
            return Err(EngineError::OwnerNotFound(host_id));
        }
        let mut out = Vec::new();
        for kennel in self.store.kennels_by_ids(&self.store.kennel_ids_of(&host_id)) {
            out.push(KennelInfo::from(&*kennel.read().await));
        }
        out.sort_by_key(|k| k.id);
        Ok(out)
    }

    pub fn list_dogs_for_owner(&self, owner_id: Ulid) -> Result<Vec<DogInfo>, EngineError> {
        if self.store.get_owner(&owner_id).is_none() {
            return Err(EngineError::OwnerNotFound(owner_id));
        }
        let mut dogs: Vec<DogInfo> = self.store.dogs_of(&owner_id).iter().map(DogInfo::from).collect();
        dogs.sort_by_key(|d| d.id);
        Ok(dogs)
    }

    pub fn find_owner_by_email(&self, email: &str) -> Result<OwnerInfo, EngineError> {
        let email = normalize_email(email)?;
        self.store
            .owner_by_email(&email)
            .map(|o| OwnerInfo::from(&o))
            .ok_or(EngineError::EmailNotFound(email))
    }

    /// Every interval on a kennel, free and occupied, in date order.
    pub async fn kennel_schedule(&self, kennel_id: Ulid) -> Result<Vec<ScheduleEntry>, EngineError> {
        let kennel = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::KennelNotFound(kennel_id))?;
        let guard = kennel.read().await;
        Ok(guard
            .intervals
            .iter()
            .map(|i| ScheduleEntry {
                id: i.id,
                kennel_id,
                start: i.span.start,
                end: i.span.end,
                occupant: i.occupant,
                booked_at: i.booked_at,
            })
            .collect())
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<BookingInfo, EngineError> {
        let kennel_id = self
            .store
            .kennel_for_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let kennel = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::KennelNotFound(kennel_id))?;
        let guard = kennel.read().await;
        guard
            .interval(booking_id)
            .and_then(|i| BookingInfo::project(&guard, i))
            .ok_or(EngineError::BookingNotFound(booking_id))
    }
}

/// Project matching occupied intervals across kennels, ordered by check-in then id.
async fn collect_bookings(
    kennels: &[SharedKennelState],
    keep: impl Fn(&Interval) -> bool,
) -> Vec<BookingInfo> {
    let mut out = Vec::new();
    for kennel in kennels {
        let guard = kennel.read().await;
        out.extend(
            guard
                .bookings()
                .filter(|i| keep(i))
                .filter_map(|i| BookingInfo::project(&guard, i)),
        );
    }
    out.sort_by(|a, b| a.check_in.cmp(&b.check_in).then(a.id.cmp(&b.id)));
    out
}
