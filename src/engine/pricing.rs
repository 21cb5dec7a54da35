use crate::catalog::Catalog;
use crate::model::{Money, RoomStay, ServiceUse};

use super::EngineError;

// ── Pricing Calculator ───────────────────────────────────────────
//
// All-or-nothing: a single unresolvable reference or overflowing product
// fails the whole computation. Nothing here writes; the lifecycle paths
// are the only writers of `total_amount`.

/// Charge for one room stay: nights × the room type's nightly price.
pub fn room_charge(catalog: &Catalog, stay: &RoomStay) -> Result<Money, EngineError> {
    let room = catalog.get_room(&stay.room_id)?;
    let room_type = catalog.get_room_type(&room.room_type_id)?;
    let nights = stay.span.nights();
    if nights <= 0 {
        return Err(EngineError::Validation(format!(
            "stay {} has no chargeable nights",
            stay.span
        )));
    }
    room_type
        .price_per_night
        .checked_mul(nights)
        .ok_or(EngineError::Internal("room charge overflow"))
}

/// Charge for one service line against its attachment-time unit price.
pub fn service_charge(service_use: &ServiceUse) -> Result<Money, EngineError> {
    service_use
        .line_total()
        .ok_or(EngineError::Internal("service charge overflow"))
}

/// Total for a booking's rooms + services. Checked accumulation throughout;
/// an overflow is a bug surfaced as `Internal`, never a corrupted total.
pub fn compute_total(
    catalog: &Catalog,
    rooms: &[RoomStay],
    services: &[ServiceUse],
) -> Result<Money, EngineError> {
    let mut total: Money = 0;
    for stay in rooms {
        total = total
            .checked_add(room_charge(catalog, stay)?)
            .ok_or(EngineError::Internal("total overflow"))?;
    }
    for service_use in services {
        total = total
            .checked_add(service_charge(service_use)?)
            .ok_or(EngineError::Internal("total overflow"))?;
    }
    Ok(total)
}
