use std::path::Path;

use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{Money, Room, RoomType, Service};

/// Reference data for one property: room types, rooms, ancillary services.
///
/// Read-mostly. The booking paths only ever read it; writes go through the
/// engine's admin operations so they hit the WAL like everything else.
pub struct Catalog {
    room_types: DashMap<Ulid, RoomType>,
    rooms: DashMap<Ulid, Room>,
    services: DashMap<Ulid, Service>,
    /// Unique-name indexes. Maintained alongside the primary maps.
    room_type_names: DashMap<String, Ulid>,
    room_names: DashMap<String, Ulid>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            room_types: DashMap::new(),
            rooms: DashMap::new(),
            services: DashMap::new(),
            room_type_names: DashMap::new(),
            room_names: DashMap::new(),
        }
    }

    // ── Read interface (consumed by availability/pricing/lifecycle) ──

    pub fn get_room(&self, id: &Ulid) -> Result<Room, EngineError> {
        self.rooms
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn get_room_type(&self, id: &Ulid) -> Result<RoomType, EngineError> {
        self.room_types
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn get_service(&self, id: &Ulid) -> Result<Service, EngineError> {
        self.services
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn room_type_id_by_name(&self, name: &str) -> Option<Ulid> {
        self.room_type_names.get(name).map(|e| *e.value())
    }

    pub fn room_name_taken(&self, name: &str) -> bool {
        self.room_names.contains_key(name)
    }

    pub fn room_type_name_taken(&self, name: &str) -> bool {
        self.room_type_names.contains_key(name)
    }

    pub fn contains_room_type(&self, id: &Ulid) -> bool {
        self.room_types.contains_key(id)
    }

    pub fn list_rooms(&self) -> Vec<Room> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_room_types(&self) -> Vec<RoomType> {
        self.room_types.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_services(&self) -> Vec<Service> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.room_types.is_empty() && self.rooms.is_empty() && self.services.is_empty()
    }

    // ── Event application (validated before the WAL accepted them) ──

    pub(crate) fn insert_room_type(&self, room_type: RoomType) {
        self.room_type_names.insert(room_type.name.clone(), room_type.id);
        self.room_types.insert(room_type.id, room_type);
    }

    pub(crate) fn insert_room(&self, room: Room) {
        self.room_names.insert(room.name.clone(), room.id);
        self.rooms.insert(room.id, room);
    }

    pub(crate) fn insert_service(&self, service: Service) {
        self.services.insert(service.id, service);
    }
}

// ── JSON seed ────────────────────────────────────────────────────

/// Catalog bootstrap file: room types, rooms (linked by type name), services.
/// Applied once, when a property starts with an empty WAL.
#[derive(Debug, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub room_types: Vec<RoomTypeSeed>,
    #[serde(default)]
    pub rooms: Vec<RoomSeed>,
    #[serde(default)]
    pub services: Vec<ServiceSeed>,
}

#[derive(Debug, Deserialize)]
pub struct RoomTypeSeed {
    pub name: String,
    pub price_per_night: Money,
    pub max_adult: u32,
    pub max_child: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoomSeed {
    pub name: String,
    /// Room type name, resolved against `room_types` at apply time.
    pub room_type: String,
    #[serde(default)]
    pub floor: i32,
}

#[derive(Debug, Deserialize)]
pub struct ServiceSeed {
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub description: Option<String>,
}

impl CatalogSeed {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Validation(format!("cannot read seed file: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::Validation(format!("malformed seed file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_room_is_not_found() {
        let catalog = Catalog::new();
        let id = Ulid::new();
        assert!(matches!(catalog.get_room(&id), Err(EngineError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn insert_then_lookup_by_name() {
        let catalog = Catalog::new();
        let rt = RoomType {
            id: Ulid::new(),
            name: "Deluxe".into(),
            price_per_night: 1_000_000,
            max_adult: 2,
            max_child: 1,
            description: None,
            amenities: vec!["wifi".into()],
        };
        catalog.insert_room_type(rt.clone());
        assert_eq!(catalog.room_type_id_by_name("Deluxe"), Some(rt.id));
        assert!(catalog.room_type_name_taken("Deluxe"));
        assert_eq!(catalog.get_room_type(&rt.id).unwrap(), rt);
    }

    #[test]
    fn seed_parses() {
        let raw = r#"{
            "room_types": [
                {"name": "Deluxe", "price_per_night": 1000000, "max_adult": 2, "max_child": 1}
            ],
            "rooms": [
                {"name": "R101", "room_type": "Deluxe", "floor": 1}
            ],
            "services": [
                {"name": "Breakfast", "price": 100000}
            ]
        }"#;
        let seed: CatalogSeed = serde_json::from_str(raw).unwrap();
        assert_eq!(seed.room_types.len(), 1);
        assert_eq!(seed.rooms[0].room_type, "Deluxe");
        assert_eq!(seed.services[0].price, 100_000);
    }
}
