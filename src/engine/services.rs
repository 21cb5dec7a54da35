//! Service attachment: staff add ancillary charges to an in-house booking
//! and remove not-yet-consumed ones. These paths touch only the booking
//! lock — room occupancy is unaffected by service lines.

use tracing::info;
use ulid::Ulid;

use crate::limits::{MAX_SERVICE_QUANTITY, MAX_SERVICES_PER_BOOKING};
use crate::model::{Actor, Booking, BookingStatus, Event, Money, RoomIndex, ServiceUse, day_bucket};
use crate::observability;

use super::permissions;
use super::validate::now_ms;
use super::{Engine, EngineError};

impl Engine {
    /// Attach `quantity` units of a service to one of the booking's rooms.
    /// Only legal while the guest is checked in. A second attachment of the
    /// same service on the same calendar day merges into the existing line.
    /// The charge uses the catalog price at attachment time.
    pub async fn add_service_use(
        &self,
        booking_id: Ulid,
        room_index: u32,
        service_id: Ulid,
        quantity: u32,
        use_date: i64,
        actor: &Actor,
    ) -> Result<Booking, EngineError> {
        permissions::check_staff(actor)?;
        if quantity < 1 {
            return Err(EngineError::InvalidQuantity(quantity));
        }
        if quantity > MAX_SERVICE_QUANTITY {
            return Err(EngineError::LimitExceeded("service quantity too large"));
        }
        let service = self.catalog.get_service(&service_id)?;

        let _commit = self.commit_lock.read().await;
        let shared = self.booking_shared(&booking_id)?;
        let mut booking = shared.clone().write_owned().await;

        if booking.status != BookingStatus::CheckedIn {
            return Err(EngineError::InvalidState { status: booking.status, op: "add a service" });
        }
        let room_index = RoomIndex::checked(room_index, booking.rooms.len()).ok_or_else(|| {
            EngineError::Validation(format!(
                "room_index {room_index} out of bounds for {} rooms",
                booking.rooms.len()
            ))
        })?;
        let stay = booking.rooms[room_index.as_usize()].clone();
        if !stay.span.contains_date(use_date) {
            return Err(EngineError::Validation(format!(
                "service date {use_date} outside stay {}",
                stay.span
            )));
        }

        let day = day_bucket(use_date);
        let merges = booking.services.iter().any(|s| {
            s.room_index == room_index && s.service_id == service_id && day_bucket(s.use_date) == day
        });
        if !merges && booking.services.len() >= MAX_SERVICES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many services on one booking"));
        }

        let charge = service
            .price
            .checked_mul(quantity as Money)
            .ok_or(EngineError::Internal("service charge overflow"))?;
        // Verify the new total fits before committing anything
        booking
            .total_amount
            .checked_add(charge)
            .ok_or(EngineError::Internal("total overflow"))?;

        let service_use = ServiceUse {
            service_id,
            room_index,
            quantity,
            unit_price: service.price,
            use_date,
            staff_id: Some(actor.id),
        };
        let at = now_ms();
        let event = Event::ServiceAttached {
            booking_id,
            service_use: service_use.clone(),
            charge,
            at,
        };
        self.wal_append(&event).await?;
        booking.apply_attach(&service_use, charge, at);

        metrics::counter!(observability::SERVICE_ATTACHMENTS_TOTAL).increment(1);
        info!(booking = %booking_id, service = %service.name, quantity, charge, "service attached");
        self.notify_booking(booking_id, &[stay.room_id], &event);
        Ok(booking.clone())
    }

    /// Remove some or all units of an attached service, refunding against
    /// the unit price recorded at attachment; a catalog price change in
    /// between does not change the refund. A line whose use date has
    /// already passed is considered consumed and cannot be removed. When the
    /// service appears on several days, the earliest live line is addressed.
    pub async fn remove_service_use(
        &self,
        booking_id: Ulid,
        room_index: u32,
        service_id: Ulid,
        quantity_to_remove: Option<u32>,
        actor: &Actor,
    ) -> Result<Booking, EngineError> {
        permissions::check_staff(actor)?;

        let _commit = self.commit_lock.read().await;
        let shared = self.booking_shared(&booking_id)?;
        let mut booking = shared.clone().write_owned().await;

        if booking.status != BookingStatus::CheckedIn {
            return Err(EngineError::InvalidState {
                status: booking.status,
                op: "remove a service",
            });
        }
        let room_index = RoomIndex::checked(room_index, booking.rooms.len()).ok_or_else(|| {
            EngineError::Validation(format!(
                "room_index {room_index} out of bounds for {} rooms",
                booking.rooms.len()
            ))
        })?;
        // Pick the first still-removable line for this room and service. A
        // consumed line (use date already past) must not shadow a live one
        // on a later day.
        let today = day_bucket(now_ms());
        let mut consumed: Option<i64> = None;
        let mut live: Option<ServiceUse> = None;
        for s in booking
            .services
            .iter()
            .filter(|s| s.room_index == room_index && s.service_id == service_id)
        {
            if day_bucket(s.use_date) < today {
                consumed.get_or_insert(s.use_date);
            } else if live.is_none() {
                live = Some(s.clone());
            }
        }
        let entry = match (live, consumed) {
            (Some(entry), _) => entry,
            (None, Some(use_date)) => {
                return Err(EngineError::AlreadyUsed { service_id, use_date });
            }
            (None, None) => return Err(EngineError::NotFound(service_id)),
        };

        let quantity = quantity_to_remove.unwrap_or(entry.quantity);
        if quantity < 1 || quantity > entry.quantity {
            return Err(EngineError::InvalidQuantity(quantity));
        }
        let refund = entry
            .unit_price
            .checked_mul(quantity as Money)
            .ok_or(EngineError::Internal("refund overflow"))?;

        let at = now_ms();
        let event = Event::ServiceDetached {
            booking_id,
            room_index,
            service_id,
            use_date: entry.use_date,
            quantity,
            refund,
            at,
        };
        self.wal_append(&event).await?;
        booking.apply_detach(room_index, service_id, entry.use_date, quantity, refund, at);

        let room_id = booking.rooms[room_index.as_usize()].room_id;
        info!(booking = %booking_id, service = %service_id, quantity, refund, "service detached");
        self.notify_booking(booking_id, &[room_id], &event);
        Ok(booking.clone())
    }
}
