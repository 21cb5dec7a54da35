use ulid::Ulid;

use crate::model::{BookingStatus, Ms, StaySpan};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or missing input. Caller fixes and retries.
    Validation(String),
    /// Referenced room/room-type/service/booking does not exist.
    NotFound(Ulid),
    /// Requested room/date window collides with an active booking.
    /// The conflicting interval is part of the contract: callers use it to
    /// suggest alternatives.
    Availability {
        room_id: Ulid,
        requested: StaySpan,
        conflict: StaySpan,
    },
    /// Actor's role or ownership does not permit the action.
    Forbidden(&'static str),
    /// Requested status change is not legal from the current status.
    InvalidTransition {
        status: BookingStatus,
        action: &'static str,
    },
    /// Operation attempted on a booking whose status does not support it.
    InvalidState {
        status: BookingStatus,
        op: &'static str,
    },
    /// Service usage already consumed; cannot be removed.
    AlreadyUsed { service_id: Ulid, use_date: Ms },
    /// Removal quantity is zero or exceeds the attached quantity.
    InvalidQuantity(u32),
    LimitExceeded(&'static str),
    /// Arithmetic failure while computing a total. A bug, never user error.
    Internal(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Availability {
                room_id,
                requested,
                conflict,
            } => {
                write!(
                    f,
                    "room {room_id} unavailable: requested {requested} conflicts with existing booking {conflict}"
                )
            }
            EngineError::Forbidden(what) => write!(f, "forbidden: {what}"),
            EngineError::InvalidTransition { status, action } => {
                write!(f, "cannot {action} a booking with status '{status}'")
            }
            EngineError::InvalidState { status, op } => {
                write!(f, "cannot {op} on a booking with status '{status}'")
            }
            EngineError::AlreadyUsed { service_id, use_date } => {
                write!(
                    f,
                    "service {service_id} used on {use_date} has already been consumed"
                )
            }
            EngineError::InvalidQuantity(q) => write!(f, "invalid quantity: {q}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
