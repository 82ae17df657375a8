//! Data-driven scenes.
//!
//! A [`SceneDefinition`] describes a tree of entities with their components
//! as JSON keyed by registered component name. The [`SceneManager`] keeps a
//! library of definitions and instantiates them into worlds: it creates the
//! world-side scene (state `Loading`), spawns the entity tree into it, and
//! activates it. A non-additive load first unloads every other scene of the
//! target world.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use loom_ecs::component::Name;
use loom_ecs::entity::EntityId;
use loom_ecs::scene::SceneId;
use loom_ecs::world::{ComponentBundle, World};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Attached as the builtin `Name` component when present.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub components: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<EntityDefinition>,
}

fn default_active() -> bool {
    true
}

impl EntityDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            active: true,
            components: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>, value: serde_json::Value) -> Self {
        self.components.insert(component.into(), value);
        self
    }

    pub fn with_child(mut self, child: EntityDefinition) -> Self {
        self.children.push(child);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// This entity plus all of its descendants.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Self::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDefinition {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
}

impl SceneDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: EntityDefinition) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|source| EngineError::Parse {
            what: "scene definition".to_owned(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// SceneManager
// ---------------------------------------------------------------------------

/// Library of scene definitions, instantiated on demand.
#[derive(Debug, Default)]
pub struct SceneManager {
    definitions: BTreeMap<String, SceneDefinition>,
}

impl SceneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a definition under its own name.
    pub fn add_definition(&mut self, definition: SceneDefinition) {
        tracing::debug!(scene = %definition.name, entities = definition.entities.len(), "scene definition added");
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn definition(&self, name: &str) -> Option<&SceneDefinition> {
        self.definitions.get(name)
    }

    pub fn definition_names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Instantiate the definition `name` into `world` and activate it.
    ///
    /// With `additive == false` every other scene of the world is unloaded
    /// first. If any entity fails to build, the partially built scene is
    /// unloaded again and the error returned.
    pub fn load_scene(&self, name: &str, world: &mut World, additive: bool) -> Result<SceneId, EngineError> {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| EngineError::UnknownSceneDefinition { name: name.to_owned() })?;
        if world.is_destroyed() {
            return Err(loom_ecs::EcsError::WorldDestroyed {
                world: world.name().to_owned(),
            }
            .into());
        }

        if !additive {
            let others: Vec<SceneId> = world.scenes().map(|s| s.id).collect();
            for other in others {
                world.unload_scene(other)?;
            }
        }

        let scene = world.create_scene(&definition.name);
        let built = definition
            .entities
            .iter()
            .try_for_each(|entity| spawn_definition(world, scene, None, entity).map(drop));
        if let Err(details) = built {
            tracing::error!(scene = %definition.name, %details, "scene failed to load, rolling back");
            if let Err(err) = world.unload_scene(scene) {
                tracing::warn!(scene = %scene, error = %err, "rollback of failed scene load did not complete");
            }
            return Err(EngineError::SceneLoad {
                scene: definition.name.clone(),
                details,
            });
        }

        world.activate_scene(scene)?;
        tracing::info!(
            world = world.name(),
            scene = %scene,
            definition = %definition.name,
            additive,
            entities = world.scene_entities(scene).len(),
            "scene loaded"
        );
        Ok(scene)
    }

    /// Tear a loaded scene down. Returns the number of entities removed.
    pub fn unload_scene(&self, world: &mut World, scene: SceneId) -> Result<usize, EngineError> {
        Ok(world.unload_scene(scene)?)
    }
}

/// Spawn `definition` (and its subtree) into `scene` under `parent`.
fn spawn_definition(
    world: &mut World,
    scene: SceneId,
    parent: Option<EntityId>,
    definition: &EntityDefinition,
) -> Result<EntityId, String> {
    let label = definition.name.as_deref().unwrap_or("<unnamed>");
    let mut bundle = ComponentBundle::new();
    if let Some(name) = &definition.name {
        bundle.add(world.registry(), Name::new(name.clone()));
    }
    for (component, value) in &definition.components {
        bundle
            .add_json(world.registry(), component, value)
            .map_err(|err| format!("entity '{label}': {err}"))?;
    }

    bundle.set_active(definition.active);

    let entity = world
        .spawn_in(Some(scene), parent, bundle)
        .map_err(|err| format!("entity '{label}': {err}"))?;
    for child in &definition.children {
        spawn_definition(world, scene, Some(entity), child)?;
    }
    Ok(entity)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
