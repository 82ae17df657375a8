//! Scene lifecycle inside a world.
//!
//! A scene is a named group of entities with a lifecycle:
//!
//! ```text
//! Loading -> Active <-> Paused -> Unloading -> Destroyed
//! ```
//!
//! Several scenes can live in one world at once. Entities created for a scene
//! carry its [`SceneId`]; unloading the scene removes exactly those entities.
//! Systems only see entities of scenes in the `Active` state (or entities
//! that belong to no scene).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::event::EcsSceneStateChanged;
use crate::world::{RemovalPolicy, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// SceneId / SceneState
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneId(pub(crate) u32);

impl fmt::Debug for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SceneId({})", self.0)
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneState {
    Loading,
    Active,
    Paused,
    Unloading,
    Destroyed,
}

impl SceneState {
    /// Whether the lifecycle allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: SceneState) -> bool {
        use SceneState::*;
        matches!(
            (self, to),
            (Loading, Active)
                | (Loading, Unloading)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Unloading)
                | (Paused, Unloading)
                | (Unloading, Destroyed)
        )
    }

    /// Systems dispatch to this scene's entities.
    pub fn is_ticking(self) -> bool {
        self == SceneState::Active
    }
}

impl fmt::Display for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bookkeeping for one scene of a world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcsScene {
    pub id: SceneId,
    pub name: String,
    pub state: SceneState,
}

// ---------------------------------------------------------------------------
// World scene API
// ---------------------------------------------------------------------------

impl World {
    /// Create a scene in the `Loading` state.
    pub fn create_scene(&mut self, name: &str) -> SceneId {
        let id = SceneId(self.next_scene);
        self.next_scene += 1;
        self.scenes.insert(
            id,
            EcsScene {
                id,
                name: name.to_owned(),
                state: SceneState::Loading,
            },
        );
        tracing::info!(world = %self.name(), scene = %id, name, "scene created");
        self.emit(EcsSceneStateChanged {
            scene: id,
            state: SceneState::Loading,
        });
        id
    }

    pub fn scene(&self, id: SceneId) -> Option<&EcsScene> {
        self.scenes.get(&id)
    }

    /// Current lifecycle state, `None` once the scene is destroyed.
    pub fn scene_state(&self, id: SceneId) -> Option<SceneState> {
        self.scenes.get(&id).map(|s| s.state)
    }

    /// Scenes currently resident, in creation order.
    pub fn scenes(&self) -> impl Iterator<Item = &EcsScene> {
        self.scenes.values()
    }

    /// First live scene called `name`, lowest id first.
    pub fn find_scene(&self, name: &str) -> Option<SceneId> {
        self.scenes.values().find(|s| s.name == name).map(|s| s.id)
    }

    /// Move `id` to `to`. `Unloading` and `Destroyed` are reached through
    /// [`unload_scene`](Self::unload_scene).
    pub fn set_scene_state(&mut self, id: SceneId, to: SceneState) -> Result<(), EcsError> {
        if matches!(to, SceneState::Unloading | SceneState::Destroyed) {
            let from = self.scene_state(id).ok_or(EcsError::UnknownScene { scene: id })?;
            return Err(EcsError::InvalidSceneTransition { scene: id, from, to });
        }
        self.transition(id, to)
    }

    /// Move a loading or paused scene to `Active`.
    pub fn activate_scene(&mut self, id: SceneId) -> Result<(), EcsError> {
        self.set_scene_state(id, SceneState::Active)
    }

    /// Stop dispatching systems to the scene's entities.
    pub fn pause_scene(&mut self, id: SceneId) -> Result<(), EcsError> {
        self.set_scene_state(id, SceneState::Paused)
    }

    fn transition(&mut self, id: SceneId, to: SceneState) -> Result<(), EcsError> {
        let scene = self.scenes.get_mut(&id).ok_or(EcsError::UnknownScene { scene: id })?;
        let from = scene.state;
        if !from.can_transition_to(to) {
            return Err(EcsError::InvalidSceneTransition { scene: id, from, to });
        }
        scene.state = to;
        tracing::debug!(scene = %id, %from, %to, "scene state changed");
        self.emit(EcsSceneStateChanged { scene: id, state: to });
        Ok(())
    }

    /// Entities tagged with `scene`, in slot order.
    pub fn scene_entities(&self, scene: SceneId) -> Vec<EntityId> {
        self.entities()
            .filter(|&e| self.entity_scene(e) == Some(scene))
            .collect()
    }

    /// Tear a scene down: `Unloading`, remove every entity it owns,
    /// `Destroyed`, then forget the scene.
    ///
    /// Children belonging to another scene are re-parented to the root
    /// instead of being removed with their parent.
    pub fn unload_scene(&mut self, id: SceneId) -> Result<usize, EcsError> {
        self.transition(id, SceneState::Unloading)?;

        let owned = self.scene_entities(id);
        for &entity in &owned {
            let foreign: Vec<EntityId> = self
                .children(entity)
                .iter()
                .copied()
                .filter(|&c| self.entity_scene(c) != Some(id))
                .collect();
            for child in foreign {
                // Handlers of earlier detach events may have removed it.
                if !self.is_alive(child) {
                    continue;
                }
                if let Err(err) = self.set_parent(child, None) {
                    tracing::warn!(scene = %id, entity = %child, error = %err, "could not detach foreign child during unload");
                }
            }
        }
        for &entity in &owned {
            // Already gone if an owned ancestor cascaded over it.
            self.remove_entity(entity, RemovalPolicy::Cascade);
        }
        let removed = owned.iter().filter(|&&e| !self.is_alive(e)).count();

        self.transition(id, SceneState::Destroyed)?;
        self.scenes.remove(&id);
        tracing::info!(world = %self.name(), scene = %id, "scene unloaded");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
