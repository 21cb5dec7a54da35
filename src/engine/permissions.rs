//! The booking state machine and its role guards, held as data so the legal
//! surface is testable in one place instead of scattered conditionals.

use crate::model::{Actor, BookingStatus, Role};
use ulid::Ulid;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    CheckIn,
    CheckOut,
    Cancel,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::CheckIn => "check_in",
            LifecycleAction::CheckOut => "check_out",
            LifecycleAction::Cancel => "cancel",
        }
    }
}

/// (current status, action, resulting status, roles allowed).
/// `pending` is the unique initial state; `checked_out` and `cancelled`
/// are terminal. Anything absent here is an illegal transition.
const TRANSITIONS: &[(BookingStatus, LifecycleAction, BookingStatus, &[Role])] = &[
    (
        BookingStatus::Pending,
        LifecycleAction::CheckIn,
        BookingStatus::CheckedIn,
        &[Role::Staff, Role::Admin],
    ),
    (
        BookingStatus::CheckedIn,
        LifecycleAction::CheckOut,
        BookingStatus::CheckedOut,
        &[Role::Staff, Role::Admin],
    ),
    (
        BookingStatus::Pending,
        LifecycleAction::Cancel,
        BookingStatus::Cancelled,
        &[Role::Customer, Role::Staff, Role::Admin],
    ),
];

/// Resolve the target status for `(status, action, actor)`, enforcing the
/// table and the customer-ownership rule (customers may only cancel their
/// own booking).
pub fn transition_target(
    status: BookingStatus,
    action: LifecycleAction,
    actor: &Actor,
    booking_customer: Ulid,
) -> Result<BookingStatus, EngineError> {
    let row = TRANSITIONS
        .iter()
        .find(|(from, act, _, _)| *from == status && *act == action);
    let Some((_, _, target, roles)) = row else {
        return Err(EngineError::InvalidTransition {
            status,
            action: action.as_str(),
        });
    };
    if !roles.contains(&actor.role) {
        return Err(EngineError::Forbidden("role may not perform this transition"));
    }
    if actor.role == Role::Customer && actor.id != booking_customer {
        return Err(EngineError::Forbidden("customers may only act on their own bookings"));
    }
    Ok(*target)
}

/// Read guard: customers see only their own bookings.
pub fn check_can_view(actor: &Actor, booking_customer: Ulid) -> Result<(), EngineError> {
    if actor.is_staff_or_admin() || actor.id == booking_customer {
        Ok(())
    } else {
        Err(EngineError::Forbidden("customers may only view their own bookings"))
    }
}

/// Guard for update/delete: staff/admin may touch any booking, customers
/// only their own. Status gating (pending-only) is checked by the caller,
/// which owns the booking lock.
pub fn check_can_mutate(actor: &Actor, booking_customer: Ulid) -> Result<(), EngineError> {
    if actor.is_staff_or_admin() || actor.id == booking_customer {
        Ok(())
    } else {
        Err(EngineError::Forbidden("customers may only modify their own bookings"))
    }
}

/// Guard for the service attachment desk: staff and admin only.
pub fn check_staff(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_staff_or_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("service attachment requires staff role"))
    }
}

/// Guard for catalog writes: admin only.
pub fn check_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(EngineError::Forbidden("catalog management requires admin role"))
    }
}
