use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::first_overlap;
use super::booking::plan_booking;
use super::validate::{
    normalize_email, now, validate_name, validate_price, validate_review, validate_stay, validate_window,
};
use super::{Engine, EngineError, ErrorKind, WalCommand};

impl Engine {
    pub async fn create_owner(&self, id: Ulid, name: String, email: String) -> Result<OwnerInfo, EngineError> {
        validate_name(&name, "owner name must not be empty")?;
        let email = normalize_email(&email)?;

        let _registry = self.registry.lock().await;
        if self.store.owner_count() >= MAX_OWNERS {
            return Err(EngineError::LimitExceeded("too many owners"));
        }
        if self.store.get_owner(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.store.owner_by_email(&email).is_some() {
            return Err(EngineError::EmailTaken(email));
        }

        let owner = Owner {
            id,
            name,
            email,
            registered_at: now(),
        };
        let info = OwnerInfo::from(&owner);
        {
            let _gate = self.commit_gate.read().await;
            self.persist_registration(&Event::OwnerCreated { owner: owner.clone() })
                .await?;
            self.store.insert_owner(owner);
        }
        drop(_registry);

        tracing::info!(owner = %id, "owner created");
        self.maybe_compact().await;
        Ok(info)
    }

    pub async fn register_kennel(&self, new: NewKennel) -> Result<KennelInfo, EngineError> {
        validate_name(&new.name, "kennel name must not be empty")?;
        validate_price(new.price)?;

        let _registry = self.registry.lock().await;
        if self.store.kennel_count() >= MAX_KENNELS {
            return Err(EngineError::LimitExceeded("too many kennels"));
        }
        if self.store.get_owner(&new.host_id).is_none() {
            return Err(EngineError::OwnerNotFound(new.host_id));
        }
        if self.store.contains_kennel(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let registered_at = now();
        let event = Event::KennelRegistered {
            id: new.id,
            host_id: new.host_id,
            name: new.name.clone(),
            price: new.price,
            size: new.size,
            has_toys: new.has_toys,
            allow_unsocial: new.allow_unsocial,
            registered_at,
        };
        let kennel = KennelState::new(
            new.id,
            new.host_id,
            new.name,
            new.price,
            new.size,
            new.has_toys,
            new.allow_unsocial,
            registered_at,
        );
        let info = KennelInfo::from(&kennel);
        {
            let _gate = self.commit_gate.read().await;
            self.persist_registration(&event).await?;
            self.store.insert_kennel(kennel);
        }
        drop(_registry);

        tracing::info!(kennel = %info.id, host = %info.host_id, size = %info.size, "kennel registered");
        self.maybe_compact().await;
        Ok(info)
    }

    pub async fn add_dog(&self, new: NewDog) -> Result<DogInfo, EngineError> {
        validate_name(&new.name, "dog name must not be empty")?;
        if new.breed.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("breed too long"));
        }

        let _registry = self.registry.lock().await;
        if self.store.dog_count() >= MAX_DOGS {
            return Err(EngineError::LimitExceeded("too many dogs"));
        }
        if self.store.get_owner(&new.owner_id).is_none() {
            return Err(EngineError::OwnerNotFound(new.owner_id));
        }
        if self.store.get_dog(&new.id).is_some() {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let dog = Dog {
            id: new.id,
            owner_id: new.owner_id,
            name: new.name,
            breed: new.breed,
            size: new.size,
            unsocial: new.unsocial,
            registered_at: now(),
        };
        let info = DogInfo::from(&dog);
        {
            let _gate = self.commit_gate.read().await;
            self.persist_registration(&Event::DogAdded { dog: dog.clone() }).await?;
            self.store.insert_dog(dog);
        }
        drop(_registry);

        tracing::info!(dog = %info.id, owner = %info.owner_id, "dog added");
        self.maybe_compact().await;
        Ok(info)
    }

    /// Publish `[start, start + days)` as a free window on a kennel.
    ///
    /// Windows may touch but never overlap anything already on the schedule.
    pub async fn publish_availability(
        &self,
        window_id: Ulid,
        kennel_id: Ulid,
        start: Day,
        days: u64,
    ) -> Result<KennelInfo, EngineError> {
        let span = validate_window(start, days)?;
        let kennel = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::KennelNotFound(kennel_id))?;

        let info = {
            let _gate = self.commit_gate.read().await;
            let mut guard = kennel.write().await;
            if guard.intervals.len() >= MAX_INTERVALS_PER_KENNEL {
                return Err(EngineError::LimitExceeded("too many intervals on kennel"));
            }
            if guard.interval(window_id).is_some() || self.store.kennel_for_booking(&window_id).is_some() {
                return Err(EngineError::AlreadyExists(window_id));
            }
            if let Some(hit) = first_overlap(&guard, &span) {
                return Err(EngineError::WindowOverlap(hit.id));
            }

            let event = Event::AvailabilityPublished {
                kennel_id,
                window: Interval::free(window_id, span),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            KennelInfo::from(&*guard)
        };

        tracing::info!(kennel = %kennel_id, window = %span, "availability published");
        self.maybe_compact().await;
        Ok(info)
    }

    /// Book `[check_in, check_out)` on a kennel for one of the owner's dogs.
    ///
    /// The containing free window is re-checked under the kennel's write lock,
    /// so of two concurrent overlapping requests at most one succeeds.
    pub async fn book_kennel(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        check_in: Day,
        check_out: Day,
    ) -> Result<BookingInfo, EngineError> {
        let result = self
            .commit_booking(booking_id, owner_id, dog_id, kennel_id, check_in, check_out)
            .await;

        let outcome = match &result {
            Ok(_) => "booked",
            Err(e) => match e.kind() {
                ErrorKind::Conflict => "conflict",
                ErrorKind::Validation => "invalid",
                ErrorKind::NotFound => "not_found",
                ErrorKind::Storage => "error",
            },
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);

        match &result {
            Ok(b) => {
                tracing::info!(booking = %b.id, kennel = %kennel_id, dog = %dog_id, "booked {}..{}", b.check_in, b.check_out);
                self.maybe_compact().await;
            }
            Err(e) if e.kind() == ErrorKind::Storage => {
                tracing::error!(kennel = %kennel_id, "booking failed: {e}");
            }
            Err(e) => {
                tracing::debug!(kennel = %kennel_id, dog = %dog_id, "booking rejected: {e}");
            }
        }
        result
    }

    async fn commit_booking(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        check_in: Day,
        check_out: Day,
    ) -> Result<BookingInfo, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let dog = self.resolve_dog(owner_id, dog_id)?;
        let kennel = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::KennelNotFound(kennel_id))?;
        // Booking ids are unique across kennels, so the id is claimed before
        // the kennel lock and handed back if the booking does not commit.
        if !self.store.reserve_booking(booking_id, kennel_id) {
            return Err(EngineError::AlreadyExists(booking_id));
        }

        let _gate = self.commit_gate.read().await;
        let mut guard = kennel.write().await;
        let result = self
            .split_and_persist(&mut guard, &dog, booking_id, Occupant { owner_id, dog_id }, stay)
            .await;
        if let Err(e) = result {
            self.store.release_booking(&booking_id);
            return Err(e);
        }

        guard
            .interval(booking_id)
            .and_then(|i| BookingInfo::project(&guard, i))
            .ok_or(EngineError::BookingNotFound(booking_id))
    }

    async fn split_and_persist(
        &self,
        guard: &mut KennelState,
        dog: &Dog,
        booking_id: Ulid,
        occupant: Occupant,
        stay: Span,
    ) -> Result<(), EngineError> {
        if guard.interval(booking_id).is_some() {
            return Err(EngineError::AlreadyExists(booking_id));
        }
        if guard.intervals.len() + 2 > MAX_INTERVALS_PER_KENNEL {
            return Err(EngineError::LimitExceeded("too many intervals on kennel"));
        }

        let plan = plan_booking(guard, dog, booking_id, occupant, stay, now())?;
        let event = Event::StayBooked {
            kennel_id: guard.id,
            window_id: plan.window_id,
            replacements: plan.intervals,
        };
        self.persist_and_apply(guard, &event).await
    }

    /// Attach a rating and optional text to a booking. Only the owner who
    /// made the booking may review it; a later review replaces an earlier one.
    pub async fn review_booking(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
        rating: u8,
        text: Option<String>,
    ) -> Result<BookingInfo, EngineError> {
        validate_review(rating, text.as_deref())?;
        let kennel_id = self
            .store
            .kennel_for_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let kennel = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::KennelNotFound(kennel_id))?;

        let info = {
            let _gate = self.commit_gate.read().await;
            let mut guard = kennel.write().await;
            let owned = guard
                .interval(booking_id)
                .and_then(|i| i.occupant)
                .is_some_and(|o| o.owner_id == owner_id);
            if !owned {
                return Err(EngineError::BookingNotFound(booking_id));
            }

            let event = Event::BookingReviewed {
                kennel_id,
                booking_id,
                review: Review { rating, text },
            };
            self.persist_and_apply(&mut guard, &event).await?;
            guard
                .interval(booking_id)
                .and_then(|i| BookingInfo::project(&guard, i))
                .ok_or(EngineError::BookingNotFound(booking_id))?
        };

        tracing::info!(booking = %booking_id, rating, "booking reviewed");
        self.maybe_compact().await;
        Ok(info)
    }

    /// Rewrite the WAL as the minimal event sequence for the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        self.compact_locked().await
    }

    async fn compact_locked(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut owners = self.store.owners();
        owners.sort_by_key(|o| o.id);
        events.extend(owners.into_iter().map(|owner| Event::OwnerCreated { owner }));

        let mut dogs = self.store.dogs();
        dogs.sort_by_key(|d| d.id);
        events.extend(dogs.into_iter().map(|dog| Event::DogAdded { dog }));

        for kennel in self.store.all_kennels() {
            let guard = kennel.read().await;
            events.push(Event::KennelRegistered {
                id: guard.id,
                host_id: guard.host_id,
                name: guard.name.clone(),
                price: guard.price,
                size: guard.size,
                has_toys: guard.has_toys,
                allow_unsocial: guard.allow_unsocial,
                registered_at: guard.registered_at,
            });
            if !guard.intervals.is_empty() {
                events.push(Event::ScheduleRestored {
                    kennel_id: guard.id,
                    intervals: guard.intervals.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Compact once the WAL has grown past the configured threshold.
    /// Callers must not hold the commit gate or any kennel lock.
    pub(super) async fn maybe_compact(&self) {
        if self.compact_threshold == 0 || self.wal_appends_since_compact().await < self.compact_threshold {
            return;
        }
        let _gate = self.commit_gate.write().await;
        // Another writer may have compacted while we waited.
        if self.wal_appends_since_compact().await < self.compact_threshold {
            return;
        }
        if let Err(e) = self.compact_locked().await {
            tracing::warn!("automatic WAL compaction failed: {e}");
        }
    }
}
