use ulid::Ulid;

use crate::model::{RoomSlate, StayEntry, StaySpan};

// ── Availability Checker ─────────────────────────────────────────
//
// Pure functions over one room's committed occupancy. The engine calls
// these while holding the slate's write lock, so a "free" answer stays
// true until the same lock scope commits the booking.

/// First active stay overlapping `span`, skipping `exclude` (used when
/// re-validating an update so a booking does not conflict with itself).
pub fn find_conflict<'a>(
    slate: &'a RoomSlate,
    span: &StaySpan,
    exclude: Option<Ulid>,
) -> Option<&'a StayEntry> {
    slate
        .overlapping(span)
        .find(|entry| exclude != Some(entry.booking_id))
}

/// True when no active booking occupies the room for an overlapping window.
pub fn is_free(slate: &RoomSlate, span: &StaySpan, exclude: Option<Ulid>) -> bool {
    find_conflict(slate, span, exclude).is_none()
}
