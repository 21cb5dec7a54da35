//! Hard operational limits. Violations surface as `EngineError::LimitExceeded`.

use crate::model::Ms;

pub const MAX_ROOMS_PER_BOOKING: usize = 16;
pub const MAX_SERVICES_PER_BOOKING: usize = 256;
pub const MAX_STAYS_PER_ROOM: usize = 8192;
pub const MAX_BOOKINGS_PER_PROPERTY: usize = 1_000_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_AMENITIES: usize = 64;
pub const MAX_SERVICE_QUANTITY: u32 = 10_000;

/// 1970-01-01. Nothing in a hotel ledger predates the epoch.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01. Reject obviously garbage far-future dates.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single stay longer than a year is input error, not a reservation.
pub const MAX_STAY_DURATION_MS: Ms = 366 * 86_400_000;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 86_400_000;

pub const MAX_PROPERTIES: usize = 1024;
pub const MAX_PROPERTY_NAME_LEN: usize = 256;
