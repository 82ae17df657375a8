//! Serializable world views and state hashing.
//!
//! [`WorldSnapshot`] captures every live entity with its hierarchy links,
//! activity, scene and components (as JSON, keyed by registered name). It is
//! the form handed to persistence layers and the basis of
//! [`World::state_hash`], which determinism tests compare across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::scene::EcsScene;
use crate::scene::SceneId;
use crate::world::World;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One entity as seen by serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity: EntityId,
    pub scene: Option<SceneId>,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
    pub active_self: bool,
    pub active_in_hierarchy: bool,
    /// Component name -> serialized value. `BTreeMap` for a stable order.
    pub components: BTreeMap<String, serde_json::Value>,
}

/// All live entities and resident scenes of a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub world: String,
    pub frame: u64,
    pub scenes: Vec<EcsScene>,
    /// Ordered by entity slot index.
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    /// BLAKE3 hex digest of the canonical JSON form.
    pub fn hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.entity == id)
    }
}

// ---------------------------------------------------------------------------
// World snapshot impl
// ---------------------------------------------------------------------------

impl World {
    /// Capture a serializable view of the world.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        let mut entities = Vec::with_capacity(self.entity_count());
        for entity in self.entities() {
            let Some(record) = self.record(entity) else {
                continue;
            };
            let mut components = BTreeMap::new();
            for id in record.mask.iter() {
                let Some(info) = self.registry().get_info(id) else {
                    continue;
                };
                let Some(value) = self.component_any(entity, id) else {
                    continue;
                };
                match (self.registry().vtable(id).to_json)(value) {
                    Ok(json) => {
                        components.insert(info.name.clone(), json);
                    }
                    Err(error) => {
                        tracing::warn!(
                            entity = %entity,
                            component = %info.name,
                            %error,
                            "component could not be serialized -- skipping in snapshot"
                        );
                    }
                }
            }
            entities.push(EntitySnapshot {
                entity,
                scene: record.scene,
                parent: record.parent,
                children: record.children.clone(),
                active_self: record.active_self,
                active_in_hierarchy: record.active_in_hierarchy,
                components,
            });
        }

        WorldSnapshot {
            world: self.name().to_owned(),
            frame: self.frame(),
            scenes: self.scenes().cloned().collect(),
            entities,
        }
    }

    /// BLAKE3 hex digest of [`capture_snapshot`](Self::capture_snapshot).
    /// Equal for worlds built by the same operation sequence.
    pub fn state_hash(&self) -> String {
        self.capture_snapshot().hash()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
