use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Monetary amounts in minor currency units. Integer arithmetic only;
/// every multiplication/addition on totals goes through checked ops.
pub type Money = i64;

pub const DAY_MS: Ms = 86_400_000;

/// UTC calendar-day bucket for a timestamp. Two service uses on the same
/// bucket count as "the same day" for the merge rule.
pub fn day_bucket(t: Ms) -> i64 {
    t.div_euclid(DAY_MS)
}

/// Half-open stay interval `[check_in, check_out)`.
///
/// Half-open so that a checkout on day N and a new check-in on day N for
/// the same room do not conflict (turn-around day reuse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaySpan {
    pub check_in: Ms,
    pub check_out: Ms,
}

impl StaySpan {
    pub fn new(check_in: Ms, check_out: Ms) -> Self {
        debug_assert!(check_in < check_out, "check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn duration_ms(&self) -> Ms {
        self.check_out - self.check_in
    }

    pub fn overlaps(&self, other: &StaySpan) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    /// Number of chargeable nights: ceil(duration / 1 day).
    pub fn nights(&self) -> i64 {
        (self.duration_ms() + DAY_MS - 1) / DAY_MS
    }

    /// Whether a service-use date falls inside the stay. Inclusive on both
    /// ends: breakfast on checkout morning is legitimate.
    pub fn contains_date(&self, t: Ms) -> bool {
        self.check_in <= t && t <= self.check_out
    }
}

impl std::fmt::Display for StaySpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

// ── Roles & actors ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Customer,
    Staff,
    Admin,
}

/// The acting user, as resolved by the (external) auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn customer(id: Ulid) -> Self {
        Self { id, role: Role::Customer }
    }

    pub fn staff(id: Ulid) -> Self {
        Self { id, role: Role::Staff }
    }

    pub fn admin(id: Ulid) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn is_staff_or_admin(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Admin)
    }
}

// ── Booking status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings count against room availability.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::CheckedIn)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::CheckedOut | BookingStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Booking aggregate ────────────────────────────────────────────

/// Bounds-checked position into a booking's `rooms` list. Service uses
/// reference their room positionally, so the list must never be reordered
/// for the life of the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomIndex(u32);

impl RoomIndex {
    /// Construct only if `raw` is within the rooms list.
    pub fn checked(raw: u32, rooms_len: usize) -> Option<Self> {
        if (raw as usize) < rooms_len {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One room reservation inside a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStay {
    pub room_id: Ulid,
    pub span: StaySpan,
    pub num_adult: u32,
    pub num_child: u32,
}

/// One ancillary service consumption inside a booking.
///
/// `unit_price` is the catalog price snapshotted at attachment time, so a
/// later catalog price change cannot skew refunds or the stored total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUse {
    pub service_id: Ulid,
    pub room_index: RoomIndex,
    pub quantity: u32,
    pub unit_price: Money,
    pub use_date: Ms,
    pub staff_id: Option<Ulid>,
}

impl ServiceUse {
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity as Money)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: Ulid,
    /// Staff member who last performed a lifecycle action, if any.
    pub staff_id: Option<Ulid>,
    /// Insertion order is load-bearing: `ServiceUse::room_index` is positional.
    pub rooms: Vec<RoomStay>,
    pub services: Vec<ServiceUse>,
    pub status: BookingStatus,
    /// Derived: rooms + services. Mutated only through the pricing and
    /// attachment paths, never written directly.
    pub total_amount: Money,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|r| r.room_id).collect()
    }

    /// Replace rooms/services/total after a pending-state update.
    pub fn apply_update(
        &mut self,
        rooms: Vec<RoomStay>,
        services: Vec<ServiceUse>,
        total_amount: Money,
        at: Ms,
    ) {
        self.rooms = rooms;
        self.services = services;
        self.total_amount = total_amount;
        self.updated_at = at;
    }

    pub fn apply_status(&mut self, status: BookingStatus, staff_id: Option<Ulid>, at: Ms) {
        self.status = status;
        if staff_id.is_some() {
            self.staff_id = staff_id;
        }
        self.updated_at = at;
    }

    /// A service line's identity: the room it belongs to, the service, and
    /// the calendar day. Attach merges on it; detach addresses by it.
    fn service_line_matches(s: &ServiceUse, room_index: RoomIndex, service_id: Ulid, day: i64) -> bool {
        s.room_index == room_index && s.service_id == service_id && day_bucket(s.use_date) == day
    }

    /// Attach a service use, merging into an existing entry when one already
    /// carries the same service for the same room on the same calendar day.
    /// `charge` was computed (checked) before the event was committed.
    pub fn apply_attach(&mut self, service_use: &ServiceUse, charge: Money, at: Ms) {
        let day = day_bucket(service_use.use_date);
        let merged = self.services.iter_mut().find(|s| {
            Self::service_line_matches(s, service_use.room_index, service_use.service_id, day)
        });
        match merged {
            Some(existing) => existing.quantity += service_use.quantity,
            None => self.services.push(service_use.clone()),
        }
        self.total_amount += charge;
        self.updated_at = at;
    }

    /// Detach `quantity` units from the service line identified by room,
    /// service, and the day of `use_date`, dropping the line when it reaches
    /// zero. `refund` was computed against the attachment snapshot.
    pub fn apply_detach(
        &mut self,
        room_index: RoomIndex,
        service_id: Ulid,
        use_date: Ms,
        quantity: u32,
        refund: Money,
        at: Ms,
    ) {
        let day = day_bucket(use_date);
        if let Some(pos) = self
            .services
            .iter()
            .position(|s| Self::service_line_matches(s, room_index, service_id, day))
        {
            if self.services[pos].quantity > quantity {
                self.services[pos].quantity -= quantity;
            } else {
                self.services.remove(pos);
            }
        }
        self.total_amount -= refund;
        self.updated_at = at;
    }
}

// ── Catalog entities ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: Ulid,
    pub name: String,
    pub price_per_night: Money,
    pub max_adult: u32,
    pub max_child: u32,
    pub description: Option<String>,
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub name: String,
    pub floor: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub price: Money,
    pub description: Option<String>,
}

// ── Per-room occupancy ───────────────────────────────────────────

/// One active booking's claim on a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StayEntry {
    pub booking_id: Ulid,
    pub span: StaySpan,
}

/// The committed occupancy of one room: stay entries of all *active*
/// bookings, sorted by `span.check_in`. Availability checks and commits
/// happen under this value's write lock — that lock is what closes the
/// read-check-write race.
#[derive(Debug, Clone)]
pub struct RoomSlate {
    pub room_id: Ulid,
    pub stays: Vec<StayEntry>,
}

impl RoomSlate {
    pub fn new(room_id: Ulid) -> Self {
        Self { room_id, stays: Vec::new() }
    }

    /// Insert keeping sort order by check_in.
    pub fn insert_stay(&mut self, booking_id: Ulid, span: StaySpan) {
        let pos = self
            .stays
            .binary_search_by_key(&span.check_in, |s| s.span.check_in)
            .unwrap_or_else(|e| e);
        self.stays.insert(pos, StayEntry { booking_id, span });
    }

    /// Drop every entry belonging to a booking (a booking may hold the same
    /// room for several disjoint spans).
    pub fn remove_stays(&mut self, booking_id: Ulid) {
        self.stays.retain(|s| s.booking_id != booking_id);
    }

    /// Entries whose span overlaps the query window. Binary search skips
    /// entries starting at or after `query.check_out`.
    pub fn overlapping(&self, query: &StaySpan) -> impl Iterator<Item = &StayEntry> {
        let right_bound = self
            .stays
            .partition_point(|s| s.span.check_in < query.check_out);
        self.stays[..right_bound]
            .iter()
            .filter(move |s| s.span.check_out > query.check_in)
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, no nesting. One committed mutation per event;
/// replay rebuilds catalog, bookings, and room slates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomTypeAdded {
        room_type: RoomType,
    },
    RoomAdded {
        room: Room,
    },
    ServiceAdded {
        service: Service,
    },
    BookingCreated {
        id: Ulid,
        customer_id: Ulid,
        rooms: Vec<RoomStay>,
        services: Vec<ServiceUse>,
        total_amount: Money,
        created_at: Ms,
    },
    BookingUpdated {
        id: Ulid,
        rooms: Vec<RoomStay>,
        services: Vec<ServiceUse>,
        total_amount: Money,
        updated_at: Ms,
    },
    BookingDeleted {
        id: Ulid,
    },
    StatusChanged {
        id: Ulid,
        status: BookingStatus,
        staff_id: Option<Ulid>,
        at: Ms,
    },
    ServiceAttached {
        booking_id: Ulid,
        service_use: ServiceUse,
        charge: Money,
        at: Ms,
    },
    ServiceDetached {
        booking_id: Ulid,
        room_index: RoomIndex,
        service_id: Ulid,
        use_date: Ms,
        quantity: u32,
        refund: Money,
        at: Ms,
    },
}
