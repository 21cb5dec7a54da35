use ulid::Ulid;

use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::{Ms, RoomIndex, RoomStay, ServiceUse, StaySpan};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

// ── Inbound payloads ─────────────────────────────────────────────

/// One requested room reservation, before validation.
#[derive(Debug, Clone)]
pub struct RoomStayDraft {
    pub room_id: Ulid,
    pub check_in: Ms,
    pub check_out: Ms,
    pub num_adult: u32,
    pub num_child: u32,
}

/// One requested service line, before validation. `room_index` is raw and
/// bounds-checked against the rooms list it will belong to.
#[derive(Debug, Clone)]
pub struct ServiceUseDraft {
    pub service_id: Ulid,
    pub quantity: u32,
    pub use_date: Ms,
    pub room_index: u32,
}

#[derive(Debug, Clone)]
pub struct BookingDraft {
    /// Required for staff/admin creates; ignored (forced to the actor) for
    /// customer creates.
    pub customer_id: Option<Ulid>,
    pub rooms: Vec<RoomStayDraft>,
    pub services: Vec<ServiceUseDraft>,
}

/// Partial update of a pending booking. `None` keeps the existing list;
/// `Some` replaces it wholesale and triggers full revalidation.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub rooms: Option<Vec<RoomStayDraft>>,
    pub services: Option<Vec<ServiceUseDraft>>,
}

// ── Validation ───────────────────────────────────────────────────

pub(crate) fn validate_stay_span(check_in: Ms, check_out: Ms) -> Result<StaySpan, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::Validation(format!(
            "check_out ({check_out}) must be after check_in ({check_in})"
        )));
    }
    if check_in < MIN_VALID_TIMESTAMP_MS || check_out > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = StaySpan::new(check_in, check_out);
    if span.duration_ms() > MAX_STAY_DURATION_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

/// Validate room-stay drafts against the catalog: date ordering, occupant
/// counts, room-type capacity. Order is preserved — indices into the result
/// are the positional `room_index` values services will reference.
pub(crate) fn validate_rooms(
    catalog: &Catalog,
    drafts: &[RoomStayDraft],
) -> Result<Vec<RoomStay>, EngineError> {
    if drafts.is_empty() {
        return Err(EngineError::Validation(
            "booking must contain at least one room".into(),
        ));
    }
    if drafts.len() > MAX_ROOMS_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many rooms in one booking"));
    }

    let mut rooms = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let span = validate_stay_span(draft.check_in, draft.check_out)?;
        if draft.num_adult < 1 {
            return Err(EngineError::Validation(
                "each room needs at least one adult".into(),
            ));
        }
        let room = catalog.get_room(&draft.room_id)?;
        let room_type = catalog.get_room_type(&room.room_type_id)?;
        if draft.num_adult > room_type.max_adult || draft.num_child > room_type.max_child {
            return Err(EngineError::Validation(format!(
                "room {} ({}) holds at most {} adults and {} children",
                room.name, room_type.name, room_type.max_adult, room_type.max_child
            )));
        }
        rooms.push(RoomStay {
            room_id: draft.room_id,
            span,
            num_adult: draft.num_adult,
            num_child: draft.num_child,
        });
    }
    Ok(rooms)
}

/// Validate service drafts against the rooms they attach to, snapshotting
/// the current catalog price into each resulting `ServiceUse`.
pub(crate) fn validate_services(
    catalog: &Catalog,
    drafts: &[ServiceUseDraft],
    rooms: &[RoomStay],
    staff_id: Option<Ulid>,
) -> Result<Vec<ServiceUse>, EngineError> {
    if drafts.len() > MAX_SERVICES_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many services in one booking"));
    }

    let mut services = Vec::with_capacity(drafts.len());
    for draft in drafts {
        if draft.quantity < 1 {
            return Err(EngineError::InvalidQuantity(draft.quantity));
        }
        if draft.quantity > MAX_SERVICE_QUANTITY {
            return Err(EngineError::LimitExceeded("service quantity too large"));
        }
        let room_index = RoomIndex::checked(draft.room_index, rooms.len()).ok_or_else(|| {
            EngineError::Validation(format!(
                "room_index {} out of bounds for {} rooms",
                draft.room_index,
                rooms.len()
            ))
        })?;
        let stay = &rooms[room_index.as_usize()];
        if !stay.span.contains_date(draft.use_date) {
            return Err(EngineError::Validation(format!(
                "service date {} outside stay {}",
                draft.use_date, stay.span
            )));
        }
        let service = catalog.get_service(&draft.service_id)?;
        services.push(ServiceUse {
            service_id: draft.service_id,
            room_index,
            quantity: draft.quantity,
            unit_price: service.price,
            use_date: draft.use_date,
            staff_id,
        });
    }
    Ok(services)
}
