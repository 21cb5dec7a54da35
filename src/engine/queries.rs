//! Read paths. Availability answers are taken under the slate read lock;
//! they are authoritative at the moment of the answer, and any later create
//! re-checks under the write lock anyway.

use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::{Actor, Booking, Ms, Room};

use super::permissions;
use super::validate::validate_stay_span;
use super::{Engine, EngineError, availability};

impl Engine {
    /// Fetch one booking. Customers see only their own.
    pub async fn get_booking(&self, id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        let shared = self.booking_shared(&id)?;
        let booking = shared.read().await.clone();
        permissions::check_can_view(actor, booking.customer_id)?;
        Ok(booking)
    }

    /// All bookings visible to the actor: staff/admin see everything,
    /// customers their own. Sorted by creation time (ULID order).
    pub async fn list_bookings(&self, actor: &Actor) -> Vec<Booking> {
        let shareds: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shareds.len());
        for shared in shareds {
            let booking = shared.read().await.clone();
            if actor.is_staff_or_admin() || booking.customer_id == actor.id {
                out.push(booking);
            }
        }
        out.sort_by_key(|b| b.id);
        out
    }

    /// Whether a room is free for the window. `exclude` skips one booking's
    /// own entries (update previews).
    pub async fn is_room_available(
        &self,
        room_id: Ulid,
        check_in: Ms,
        check_out: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_stay_span(check_in, check_out)?;
        self.catalog.get_room(&room_id)?;
        let shared = self.slate_shared(&room_id)?;
        let slate = shared.read().await;
        Ok(availability::is_free(&slate, &span, exclude))
    }

    /// Every room free for the whole window, optionally narrowed to one
    /// room type. Sorted by room name for a stable listing.
    pub async fn list_available_rooms(
        &self,
        check_in: Ms,
        check_out: Ms,
        room_type_id: Option<Ulid>,
    ) -> Result<Vec<Room>, EngineError> {
        let span = validate_stay_span(check_in, check_out)?;
        if span.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        if let Some(rt) = room_type_id
            && !self.catalog.contains_room_type(&rt)
        {
            return Err(EngineError::NotFound(rt));
        }

        let mut out = Vec::new();
        for room in self.catalog.list_rooms() {
            if let Some(rt) = room_type_id
                && room.room_type_id != rt
            {
                continue;
            }
            let shared = self.slate_shared(&room.id)?;
            let slate = shared.read().await;
            if availability::is_free(&slate, &span, None) {
                out.push(room);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}
