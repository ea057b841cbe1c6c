//! Registry of peers known through centrald's `device`/`client` notifications.
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Client,
    Device,
    Centrald,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub kind: EntityKind,
    pub type_code: Option<i32>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Single writer: only centrald-originated messages mutate this table
/// (invariant from the data model).
#[derive(Debug, Default)]
pub struct EntityRegistry {
    by_id: RwLock<HashMap<i64, Entity>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entity: Entity) {
        let mut map = self.by_id.write().unwrap_or_else(|e| e.into_inner());
        map.insert(entity.id, entity);
    }

    pub fn remove(&self, id: i64) -> Option<Entity> {
        let mut map = self.by_id.write().unwrap_or_else(|e| e.into_inner());
        map.remove(&id)
    }

    pub fn get(&self, id: i64) -> Option<Entity> {
        let map = self.by_id.read().unwrap_or_else(|e| e.into_inner());
        map.get(&id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Entity> {
        let map = self.by_id.read().unwrap_or_else(|e| e.into_inner());
        map.values().find(|e| e.name == name).cloned()
    }
}
