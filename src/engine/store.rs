use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::booking::apply_replacement;
use super::SharedKennelState;

/// In-memory state: registry maps plus the per-kennel schedules and the
/// secondary indexes the queries need.
pub struct Store {
    kennels: DashMap<Ulid, SharedKennelState>,
    owners: DashMap<Ulid, Owner>,
    dogs: DashMap<Ulid, Dog>,
    /// Normalized e-mail → owner id.
    owner_emails: DashMap<String, Ulid>,
    /// Host → kennels they registered.
    host_kennels: DashMap<Ulid, Vec<Ulid>>,
    /// Owner → dogs they added.
    owner_dogs: DashMap<Ulid, Vec<Ulid>>,
    /// Booking (occupied interval) id → kennel id.
    booking_to_kennel: DashMap<Ulid, Ulid>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            kennels: DashMap::new(),
            owners: DashMap::new(),
            dogs: DashMap::new(),
            owner_emails: DashMap::new(),
            host_kennels: DashMap::new(),
            owner_dogs: DashMap::new(),
            booking_to_kennel: DashMap::new(),
        }
    }

    // ── Owners ───────────────────────────────────────────────

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn get_owner(&self, id: &Ulid) -> Option<Owner> {
        self.owners.get(id).map(|e| e.value().clone())
    }

    pub fn owner_by_email(&self, email: &str) -> Option<Owner> {
        let id = self.owner_emails.get(email).map(|e| *e.value())?;
        self.get_owner(&id)
    }

    pub fn insert_owner(&self, owner: Owner) {
        self.owner_emails.insert(owner.email.clone(), owner.id);
        self.owners.insert(owner.id, owner);
    }

    pub fn owners(&self) -> Vec<Owner> {
        self.owners.iter().map(|e| e.value().clone()).collect()
    }

    // ── Dogs ─────────────────────────────────────────────────

    pub fn dog_count(&self) -> usize {
        self.dogs.len()
    }

    pub fn get_dog(&self, id: &Ulid) -> Option<Dog> {
        self.dogs.get(id).map(|e| e.value().clone())
    }

    pub fn insert_dog(&self, dog: Dog) {
        self.owner_dogs.entry(dog.owner_id).or_default().push(dog.id);
        self.dogs.insert(dog.id, dog);
    }

    pub fn dogs_of(&self, owner_id: &Ulid) -> Vec<Dog> {
        let ids = self
            .owner_dogs
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_dog(id)).collect()
    }

    pub fn dogs(&self) -> Vec<Dog> {
        self.dogs.iter().map(|e| e.value().clone()).collect()
    }

    // ── Kennels ──────────────────────────────────────────────

    pub fn kennel_count(&self) -> usize {
        self.kennels.len()
    }

    pub fn contains_kennel(&self, id: &Ulid) -> bool {
        self.kennels.contains_key(id)
    }

    pub fn get_kennel(&self, id: &Ulid) -> Option<SharedKennelState> {
        self.kennels.get(id).map(|e| e.value().clone())
    }

    /// Register a kennel and index its existing bookings.
    pub fn insert_kennel(&self, kennel: KennelState) {
        let (id, host_id) = (kennel.id, kennel.host_id);
        for booking in kennel.bookings() {
            self.booking_to_kennel.insert(booking.id, id);
        }
        self.host_kennels.entry(host_id).or_default().push(id);
        self.kennels.insert(id, Arc::new(RwLock::new(kennel)));
    }

    pub fn kennel_ids_of(&self, host_id: &Ulid) -> Vec<Ulid> {
        self.host_kennels
            .get(host_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Handles to the given kennels, skipping unknown ids.
    pub fn kennels_by_ids(&self, ids: &[Ulid]) -> Vec<SharedKennelState> {
        ids.iter().filter_map(|id| self.get_kennel(id)).collect()
    }

    /// Handles to every kennel, ordered by id.
    pub fn all_kennels(&self) -> Vec<SharedKennelState> {
        let mut ids: Vec<Ulid> = self.kennels.iter().map(|e| *e.key()).collect();
        ids.sort();
        self.kennels_by_ids(&ids)
    }

    // ── Booking index ────────────────────────────────────────

    pub fn kennel_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_kennel.get(booking_id).map(|e| *e.value())
    }

    /// Claim a booking id for a kennel before the booking commits. False if
    /// the id is already taken, by a committed or an in-flight booking.
    pub fn reserve_booking(&self, booking_id: Ulid, kennel_id: Ulid) -> bool {
        match self.booking_to_kennel.entry(booking_id) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(kennel_id);
                true
            }
        }
    }

    /// Drop a claim taken by `reserve_booking` whose booking did not commit.
    pub fn release_booking(&self, booking_id: &Ulid) {
        self.booking_to_kennel.remove(booking_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a schedule event to a kennel the caller has locked.
    pub fn apply_schedule_event(&self, ks: &mut KennelState, event: &Event) {
        match event {
            Event::AvailabilityPublished { window, .. } => {
                ks.insert_interval(window.clone());
            }
            Event::StayBooked {
                window_id,
                replacements,
                ..
            } => {
                apply_replacement(ks, *window_id, replacements);
                for interval in replacements.iter().filter(|i| !i.is_free()) {
                    self.booking_to_kennel.insert(interval.id, ks.id);
                }
            }
            Event::BookingReviewed {
                booking_id, review, ..
            } => {
                if let Some(interval) = ks.intervals.iter_mut().find(|i| i.id == *booking_id) {
                    interval.review = Some(review.clone());
                }
            }
            Event::ScheduleRestored { intervals, .. } => {
                for interval in intervals {
                    if !interval.is_free() {
                        self.booking_to_kennel.insert(interval.id, ks.id);
                    }
                    ks.insert_interval(interval.clone());
                }
            }
            Event::OwnerCreated { .. } | Event::KennelRegistered { .. } | Event::DogAdded { .. } => {}
        }
    }
}

/// Extract the kennel id from a schedule event.
pub fn event_kennel_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AvailabilityPublished { kennel_id, .. }
        | Event::StayBooked { kennel_id, .. }
        | Event::BookingReviewed { kennel_id, .. }
        | Event::ScheduleRestored { kennel_id, .. } => Some(*kennel_id),
        Event::KennelRegistered { id, .. } => Some(*id),
        Event::OwnerCreated { .. } | Event::DogAdded { .. } => None,
    }
}
