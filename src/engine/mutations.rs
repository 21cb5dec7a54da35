//! Write paths. Every mutation follows the same shape: validate against a
//! snapshot, acquire locks in canonical order, re-verify, append to the WAL,
//! apply in memory, notify. State is only mutated after the WAL accepted the
//! event.

use tracing::{info, warn};
use ulid::Ulid;

use crate::catalog::CatalogSeed;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::permissions::{self, LifecycleAction};
use super::validate::{self, BookingDraft, BookingPatch, now_ms};
use super::{Engine, EngineError, availability, pricing, sorted_room_ids};

impl Engine {
    // ── Catalog administration ───────────────────────────

    pub async fn add_room_type(
        &self,
        actor: &Actor,
        name: String,
        price_per_night: Money,
        max_adult: u32,
        max_child: u32,
        description: Option<String>,
        amenities: Vec<String>,
    ) -> Result<RoomType, EngineError> {
        permissions::check_admin(actor)?;
        self.add_room_type_inner(name, price_per_night, max_adult, max_child, description, amenities)
            .await
    }

    async fn add_room_type_inner(
        &self,
        name: String,
        price_per_night: Money,
        max_adult: u32,
        max_child: u32,
        description: Option<String>,
        amenities: Vec<String>,
    ) -> Result<RoomType, EngineError> {
        validate_name(&name)?;
        validate_description(&description)?;
        if amenities.len() > MAX_AMENITIES {
            return Err(EngineError::LimitExceeded("too many amenities"));
        }
        if price_per_night < 0 {
            return Err(EngineError::Validation("price_per_night must be non-negative".into()));
        }
        if max_adult < 1 {
            return Err(EngineError::Validation("room type must hold at least one adult".into()));
        }
        if self.catalog.room_type_name_taken(&name) {
            return Err(EngineError::Validation(format!("room type '{name}' already exists")));
        }

        let room_type = RoomType {
            id: Ulid::new(),
            name,
            price_per_night,
            max_adult,
            max_child,
            description,
            amenities,
        };
        let _commit = self.commit_lock.read().await;
        self.wal_append(&Event::RoomTypeAdded { room_type: room_type.clone() })
            .await?;
        self.catalog.insert_room_type(room_type.clone());
        info!(room_type = %room_type.name, id = %room_type.id, "room type added");
        Ok(room_type)
    }

    pub async fn add_room(
        &self,
        actor: &Actor,
        name: String,
        room_type_id: Ulid,
        floor: i32,
    ) -> Result<Room, EngineError> {
        permissions::check_admin(actor)?;
        self.add_room_inner(name, room_type_id, floor).await
    }

    async fn add_room_inner(
        &self,
        name: String,
        room_type_id: Ulid,
        floor: i32,
    ) -> Result<Room, EngineError> {
        validate_name(&name)?;
        if !self.catalog.contains_room_type(&room_type_id) {
            return Err(EngineError::NotFound(room_type_id));
        }
        if self.catalog.room_name_taken(&name) {
            return Err(EngineError::Validation(format!("room '{name}' already exists")));
        }

        let room = Room { id: Ulid::new(), room_type_id, name, floor };
        let _commit = self.commit_lock.read().await;
        self.wal_append(&Event::RoomAdded { room: room.clone() }).await?;
        self.slates.insert(
            room.id,
            std::sync::Arc::new(tokio::sync::RwLock::new(RoomSlate::new(room.id))),
        );
        self.catalog.insert_room(room.clone());
        info!(room = %room.name, id = %room.id, "room added");
        Ok(room)
    }

    pub async fn add_service(
        &self,
        actor: &Actor,
        name: String,
        price: Money,
        description: Option<String>,
    ) -> Result<Service, EngineError> {
        permissions::check_admin(actor)?;
        self.add_service_inner(name, price, description).await
    }

    async fn add_service_inner(
        &self,
        name: String,
        price: Money,
        description: Option<String>,
    ) -> Result<Service, EngineError> {
        validate_name(&name)?;
        validate_description(&description)?;
        if price < 0 {
            return Err(EngineError::Validation("price must be non-negative".into()));
        }

        let service = Service { id: Ulid::new(), name, price, description };
        let _commit = self.commit_lock.read().await;
        self.wal_append(&Event::ServiceAdded { service: service.clone() }).await?;
        self.catalog.insert_service(service.clone());
        info!(service = %service.name, id = %service.id, "service added");
        Ok(service)
    }

    /// Bootstrap the catalog from a seed file. Only called on a fresh
    /// property (empty WAL); room seeds reference their type by name.
    pub async fn apply_seed(&self, seed: &CatalogSeed) -> Result<usize, EngineError> {
        let mut applied = 0;
        for rt in &seed.room_types {
            self.add_room_type_inner(
                rt.name.clone(),
                rt.price_per_night,
                rt.max_adult,
                rt.max_child,
                rt.description.clone(),
                rt.amenities.clone(),
            )
            .await?;
            applied += 1;
        }
        for room in &seed.rooms {
            let room_type_id = self
                .catalog
                .room_type_id_by_name(&room.room_type)
                .ok_or_else(|| {
                    EngineError::Validation(format!("seed room '{}' references unknown room type '{}'", room.name, room.room_type))
                })?;
            self.add_room_inner(room.name.clone(), room_type_id, room.floor).await?;
            applied += 1;
        }
        for service in &seed.services {
            self.add_service_inner(service.name.clone(), service.price, service.description.clone())
                .await?;
            applied += 1;
        }
        Ok(applied)
    }

    // ── Booking lifecycle ────────────────────────────────

    /// Create a booking. Availability is checked and the booking committed
    /// under the write locks of every involved room slate, so two
    /// concurrent requests for an overlapping window cannot both succeed.
    pub async fn create_booking(
        &self,
        draft: BookingDraft,
        actor: &Actor,
    ) -> Result<Booking, EngineError> {
        let customer_id = match actor.role {
            Role::Customer => actor.id,
            _ => draft.customer_id.ok_or_else(|| {
                EngineError::Validation("customer_id is required for staff-created bookings".into())
            })?,
        };
        if self.bookings.len() >= MAX_BOOKINGS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let rooms = validate::validate_rooms(&self.catalog, &draft.rooms)?;
        let staff_id = actor.is_staff_or_admin().then_some(actor.id);
        let services = validate::validate_services(&self.catalog, &draft.services, &rooms, staff_id)?;
        let total_amount = pricing::compute_total(&self.catalog, &rooms, &services)?;

        let _commit = self.commit_lock.read().await;
        let room_ids = sorted_room_ids(&rooms);
        let mut guards = self.lock_slates(&room_ids).await?;

        for (i, stay) in rooms.iter().enumerate() {
            let slate = &guards
                .iter()
                .find(|(rid, _)| *rid == stay.room_id)
                .ok_or(EngineError::Internal("slate guard missing"))?
                .1;
            if slate.stays.len() >= MAX_STAYS_PER_ROOM {
                return Err(EngineError::LimitExceeded("room occupancy table full"));
            }
            if let Some(hit) = availability::find_conflict(slate, &stay.span, None) {
                metrics::counter!(observability::AVAILABILITY_CONFLICTS_TOTAL).increment(1);
                warn!(room = %stay.room_id, requested = %stay.span, conflict = %hit.span, "availability conflict");
                return Err(EngineError::Availability {
                    room_id: stay.room_id,
                    requested: stay.span,
                    conflict: hit.span,
                });
            }
            // Two stays in this very draft may also collide with each other
            for prior in &rooms[..i] {
                if prior.room_id == stay.room_id && prior.span.overlaps(&stay.span) {
                    return Err(EngineError::Availability {
                        room_id: stay.room_id,
                        requested: stay.span,
                        conflict: prior.span,
                    });
                }
            }
        }

        let id = Ulid::new();
        let created_at = now_ms();
        let event = Event::BookingCreated {
            id,
            customer_id,
            rooms: rooms.clone(),
            services: services.clone(),
            total_amount,
            created_at,
        };
        self.wal_append(&event).await?;

        for stay in &rooms {
            for (rid, guard) in guards.iter_mut() {
                if *rid == stay.room_id {
                    guard.insert_stay(id, stay.span);
                }
            }
        }
        let booking = Booking {
            id,
            customer_id,
            staff_id: None,
            rooms,
            services,
            status: BookingStatus::Pending,
            total_amount,
            created_at,
            updated_at: created_at,
        };
        self.bookings.insert(
            id,
            std::sync::Arc::new(tokio::sync::RwLock::new(booking.clone())),
        );

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        metrics::gauge!(observability::BOOKINGS_ACTIVE).increment(1.0);
        info!(booking = %id, customer = %customer_id, rooms = booking.rooms.len(), total = total_amount, "booking created");
        self.notify_booking(id, &room_ids, &event);
        Ok(booking)
    }

    /// Replace a pending booking's rooms and/or services. The whole booking
    /// is re-validated and re-priced; its own slate entries are excluded
    /// from the availability check so it cannot conflict with itself.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
        actor: &Actor,
    ) -> Result<Booking, EngineError> {
        loop {
            let shared = self.booking_shared(&id)?;
            let snapshot = shared.read().await.clone();
            permissions::check_can_mutate(actor, snapshot.customer_id)?;
            if snapshot.status != BookingStatus::Pending {
                return Err(EngineError::InvalidState { status: snapshot.status, op: "update" });
            }

            let staff_id = actor.is_staff_or_admin().then_some(actor.id);
            let rooms = match &patch.rooms {
                Some(drafts) => validate::validate_rooms(&self.catalog, drafts)?,
                None => snapshot.rooms.clone(),
            };
            let services = match &patch.services {
                Some(drafts) => {
                    validate::validate_services(&self.catalog, drafts, &rooms, staff_id)?
                }
                None => {
                    // Kept services must still fit the (possibly new) rooms
                    revalidate_kept_services(&snapshot.services, &rooms)?;
                    snapshot.services.clone()
                }
            };
            let total_amount = pricing::compute_total(&self.catalog, &rooms, &services)?;

            // Lock the union of old and new rooms so both the removal of
            // stale entries and the insert of new ones are atomic.
            let mut union = sorted_room_ids(&rooms);
            union.extend(snapshot.rooms.iter().map(|r| r.room_id));
            union.sort();
            union.dedup();

            let _commit = self.commit_lock.read().await;
            let mut guards = self.lock_slates(&union).await?;
            let mut booking = shared.clone().write_owned().await;

            // Another writer slipped in between snapshot and lock — redo
            // validation against the fresh state.
            if booking.updated_at != snapshot.updated_at || booking.status != snapshot.status {
                drop(booking);
                drop(guards);
                continue;
            }
            if !self.bookings.contains_key(&id) {
                return Err(EngineError::NotFound(id));
            }

            for (i, stay) in rooms.iter().enumerate() {
                let slate = &guards
                    .iter()
                    .find(|(rid, _)| *rid == stay.room_id)
                    .ok_or(EngineError::Internal("slate guard missing"))?
                    .1;
                if let Some(hit) = availability::find_conflict(slate, &stay.span, Some(id)) {
                    metrics::counter!(observability::AVAILABILITY_CONFLICTS_TOTAL).increment(1);
                    return Err(EngineError::Availability {
                        room_id: stay.room_id,
                        requested: stay.span,
                        conflict: hit.span,
                    });
                }
                for prior in &rooms[..i] {
                    if prior.room_id == stay.room_id && prior.span.overlaps(&stay.span) {
                        return Err(EngineError::Availability {
                            room_id: stay.room_id,
                            requested: stay.span,
                            conflict: prior.span,
                        });
                    }
                }
            }

            let updated_at = now_ms();
            let event = Event::BookingUpdated {
                id,
                rooms: rooms.clone(),
                services: services.clone(),
                total_amount,
                updated_at,
            };
            self.wal_append(&event).await?;

            for (_, guard) in guards.iter_mut() {
                guard.remove_stays(id);
            }
            for stay in &rooms {
                for (rid, guard) in guards.iter_mut() {
                    if *rid == stay.room_id {
                        guard.insert_stay(id, stay.span);
                    }
                }
            }
            booking.apply_update(rooms, services, total_amount, updated_at);

            info!(booking = %id, total = total_amount, "booking updated");
            self.notify_booking(id, &union, &event);
            return Ok(booking.clone());
        }
    }

    /// Delete a pending booking outright, releasing its room claims.
    pub async fn delete_booking(&self, id: Ulid, actor: &Actor) -> Result<(), EngineError> {
        loop {
            let shared = self.booking_shared(&id)?;
            let snapshot = shared.read().await.clone();
            permissions::check_can_mutate(actor, snapshot.customer_id)?;
            if snapshot.status != BookingStatus::Pending {
                return Err(EngineError::InvalidState { status: snapshot.status, op: "delete" });
            }

            let _commit = self.commit_lock.read().await;
            let room_ids = sorted_room_ids(&snapshot.rooms);
            let mut guards = self.lock_slates(&room_ids).await?;
            let booking = shared.clone().write_owned().await;
            if booking.updated_at != snapshot.updated_at || booking.status != snapshot.status {
                drop(booking);
                drop(guards);
                continue;
            }
            if !self.bookings.contains_key(&id) {
                return Err(EngineError::NotFound(id));
            }

            let event = Event::BookingDeleted { id };
            self.wal_append(&event).await?;

            for (_, guard) in guards.iter_mut() {
                guard.remove_stays(id);
            }
            drop(booking);
            self.bookings.remove(&id);

            metrics::gauge!(observability::BOOKINGS_ACTIVE).decrement(1.0);
            info!(booking = %id, "booking deleted");
            self.notify_booking(id, &room_ids, &event);
            self.notify.remove(&id);
            return Ok(());
        }
    }

    /// Drive the booking through its state machine: check-in, check-out, or
    /// cancel. Terminal transitions release the room claims, making the
    /// rooms immediately bookable again.
    pub async fn transition(
        &self,
        id: Ulid,
        action: LifecycleAction,
        actor: &Actor,
    ) -> Result<Booking, EngineError> {
        loop {
            let shared = self.booking_shared(&id)?;
            let snapshot = shared.read().await.clone();

            let _commit = self.commit_lock.read().await;
            let room_ids = sorted_room_ids(&snapshot.rooms);
            let mut guards = self.lock_slates(&room_ids).await?;
            let mut booking = shared.clone().write_owned().await;
            if booking.updated_at != snapshot.updated_at {
                drop(booking);
                drop(guards);
                continue;
            }
            if !self.bookings.contains_key(&id) {
                return Err(EngineError::NotFound(id));
            }

            let target =
                permissions::transition_target(booking.status, action, actor, booking.customer_id)?;
            let staff_id = actor.is_staff_or_admin().then_some(actor.id);
            let at = now_ms();
            let event = Event::StatusChanged { id, status: target, staff_id, at };
            self.wal_append(&event).await?;

            booking.apply_status(target, staff_id, at);
            if !target.is_active() {
                for (_, guard) in guards.iter_mut() {
                    guard.remove_stays(id);
                }
                metrics::gauge!(observability::BOOKINGS_ACTIVE).decrement(1.0);
            }
            if target == BookingStatus::Cancelled {
                metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
            }

            info!(booking = %id, action = action.as_str(), status = %target, "booking transitioned");
            self.notify_booking(id, &room_ids, &event);
            if !target.is_active() {
                // A terminal booking emits no further events; dropping its
                // topic lets subscribers drain and see the channel close.
                self.notify.remove(&id);
            }
            return Ok(booking.clone());
        }
    }
}

/// Services carried over unchanged through a rooms-only update must still
/// reference a valid room position and a date inside that room's stay.
fn revalidate_kept_services(
    services: &[ServiceUse],
    rooms: &[RoomStay],
) -> Result<(), EngineError> {
    for su in services {
        let Some(stay) = rooms.get(su.room_index.as_usize()) else {
            return Err(EngineError::Validation(format!(
                "existing service {} references removed room position {}",
                su.service_id,
                su.room_index.raw()
            )));
        };
        if !stay.span.contains_date(su.use_date) {
            return Err(EngineError::Validation(format!(
                "existing service {} dated {} falls outside the new stay {}",
                su.service_id, su.use_date, stay.span
            )));
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::Validation("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_description(description: &Option<String>) -> Result<(), EngineError> {
    if let Some(d) = description
        && d.len() > MAX_DESCRIPTION_LEN
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}
