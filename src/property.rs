//! Multi-property routing: one `Engine` (and one WAL file) per property,
//! created lazily on first use.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::catalog::CatalogSeed;
use crate::config::Config;
use crate::engine::{Engine, EngineError};
use crate::janitor;
use crate::limits::{MAX_PROPERTIES, MAX_PROPERTY_NAME_LEN};
use crate::notify::NotifyHub;
use crate::observability;

pub struct PropertyManager {
    config: Config,
    properties: DashMap<String, Arc<Engine>>,
    /// Serializes property creation so two first-requests for the same name
    /// cannot both replay the WAL and double-apply the seed.
    init_lock: Mutex<()>,
}

impl PropertyManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            properties: DashMap::new(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Engine>> {
        self.properties.get(name).map(|e| e.value().clone())
    }

    /// Fetch a property's engine, creating it (WAL replay + optional seed)
    /// on first access.
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<Engine>, EngineError> {
        validate_property_name(name)?;
        if let Some(engine) = self.get(name) {
            return Ok(engine);
        }

        let _guard = self.init_lock.lock().await;
        // Lost the race: someone else created it while we waited
        if let Some(engine) = self.get(name) {
            return Ok(engine);
        }
        if self.properties.len() >= MAX_PROPERTIES {
            return Err(EngineError::LimitExceeded("too many properties"));
        }

        std::fs::create_dir_all(&self.config.data_dir)
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        let wal_path = self.config.data_dir.join(format!("{name}.wal"));
        let engine = Arc::new(
            Engine::new(wal_path, Arc::new(NotifyHub::new()))
                .map_err(|e| EngineError::WalError(e.to_string()))?,
        );

        if engine.catalog.is_empty()
            && let Some(seed_path) = &self.config.seed_file
        {
            let seed = CatalogSeed::load(seed_path)?;
            let applied = engine.apply_seed(&seed).await?;
            info!(property = name, entities = applied, "seeded fresh catalog");
        }

        tokio::spawn(janitor::run_compactor(
            engine.clone(),
            self.config.compact_threshold,
        ));

        self.properties.insert(name.to_string(), engine.clone());
        metrics::gauge!(observability::PROPERTIES_ACTIVE).increment(1.0);
        info!(property = name, "property loaded");
        Ok(engine)
    }

    pub fn property_names(&self) -> Vec<String> {
        self.properties.iter().map(|e| e.key().clone()).collect()
    }
}

/// Property names become WAL file names, so the alphabet is restricted to
/// keep them path-safe.
fn validate_property_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::Validation("property name must not be empty".into()));
    }
    if name.len() > MAX_PROPERTY_NAME_LEN {
        return Err(EngineError::LimitExceeded("property name too long"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        error!(property = name, "rejected unsafe property name");
        return Err(EngineError::Validation(
            "property name may only contain alphanumerics, '-' and '_'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(name: &str) -> Config {
        let dir = std::env::temp_dir().join("innkeep_test_properties").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        Config { data_dir: dir, ..Config::default() }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let mgr = PropertyManager::new(test_config("idempotent"));
        let a = mgr.get_or_create("seaside").await.unwrap();
        let b = mgr.get_or_create("seaside").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mgr.property_names(), ["seaside"]);
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected() {
        let mgr = PropertyManager::new(test_config("unsafe_names"));
        assert!(mgr.get_or_create("../etc/passwd").await.is_err());
        assert!(mgr.get_or_create("").await.is_err());
        assert!(mgr.get_or_create("has space").await.is_err());
        assert!(mgr.get_or_create("grand-hotel_2").await.is_ok());
    }

    #[tokio::test]
    async fn properties_are_isolated() {
        let mgr = PropertyManager::new(test_config("isolation"));
        let a = mgr.get_or_create("north").await.unwrap();
        let b = mgr.get_or_create("south").await.unwrap();

        let admin = crate::model::Actor::admin(ulid::Ulid::new());
        a.add_room_type(&admin, "Deluxe".into(), 1_000_000, 2, 1, None, Vec::new())
            .await
            .unwrap();
        assert!(!a.catalog.is_empty());
        assert!(b.catalog.is_empty());
    }
}
