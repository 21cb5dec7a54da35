//! innkeep — an embeddable, WAL-backed hotel booking engine.
//!
//! State lives in memory: a per-property catalog (room types, rooms,
//! services), booking aggregates, and one occupancy table per room.
//! Every mutation is validated, appended to a write-ahead log, and only
//! then applied, so a restart replays the log back to the exact same
//! state. Availability checks and booking commits happen under the same
//! room locks, which is what makes double-booking impossible.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod janitor;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod property;
pub mod wal;

pub use catalog::{Catalog, CatalogSeed};
pub use config::Config;
pub use engine::{
    BookingDraft, BookingPatch, Engine, EngineError, LifecycleAction, RoomStayDraft,
    ServiceUseDraft,
};
pub use model::{
    Actor, Booking, BookingStatus, Event, Money, Ms, Role, Room, RoomIndex, RoomStay, RoomType,
    Service, ServiceUse, StaySpan,
};
pub use notify::NotifyHub;
pub use property::PropertyManager;
