//! Loom ECS -- sparse-set Entity Component System with incremental samples,
//! typed events, constraint-ordered systems and scene lifecycles.
//!
//! Entities are generational ids; components live in per-type sparse columns.
//! A *sample* is the live set of entities matching a [`Signature`]; it is
//! updated synchronously on every structural change instead of by scanning.
//! Systems declare `after`/`before` constraints on names or tags and run in a
//! stable topological order, phase by phase.
//!
//! [`Signature`]: signature::Signature
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use loom_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register::<Position>("position");
//! registry.register::<Velocity>("velocity");
//! let mut world = World::new("main", Arc::new(registry));
//!
//! let moving = world.signature().with::<Position>().with::<Velocity>().build();
//! world
//!     .register_system(
//!         SystemDescriptor::new("integrate").sample(moving),
//!         |world: &mut World, ctx: &SystemContext| {
//!             for &e in &ctx.entities {
//!                 let Some(&Velocity { dx, dy }) = world.get_component::<Velocity>(e) else { continue };
//!                 if let Some(pos) = world.get_component_mut::<Position>(e) {
//!                     pos.x += dx * ctx.dt;
//!                     pos.y += dy * ctx.dt;
//!                 }
//!             }
//!         },
//!     )
//!     .unwrap();
//!
//! let bundle = ComponentBundle::new()
//!     .with(world.registry(), Position { x: 0.0, y: 0.0 })
//!     .with(world.registry(), Velocity { dx: 2.0, dy: 0.0 });
//! let entity = world.spawn_bundle(bundle);
//!
//! world.tick(0.5).unwrap();
//! assert_eq!(world.get_component::<Position>(entity), Some(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod event;
pub mod hierarchy;
pub mod sample;
pub mod scene;
pub mod schedule;
pub mod signature;
pub mod snapshot;
pub(crate) mod storage;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation, never allocated, or
    /// being removed).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// A type-erased value did not have the registered type.
    #[error("value does not match the registered type of component '{component}'")]
    ComponentTypeMismatch { component: String },

    /// (De)serialization of a component value failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserialization { component: String, details: String },

    #[error("entity {entity:?} has no component '{component}'")]
    MissingComponent { entity: entity::EntityId, component: String },

    #[error("component '{component}' has no property '{property}'")]
    UnknownProperty { component: String, property: String },

    /// The ordering constraints of a phase contain a cycle.
    #[error("ordering cycle in {phase} phase between systems [{}]", .systems.join(", "))]
    ScheduleCycle { phase: schedule::Phase, systems: Vec<String> },

    #[error("a system named '{name}' is already registered")]
    DuplicateSystem { name: String },

    #[error("no system named '{name}' is registered")]
    UnknownSystem { name: String },

    #[error("scene {scene} does not exist in this world")]
    UnknownScene { scene: scene::SceneId },

    #[error("scene {scene} cannot go from {from} to {to}")]
    InvalidSceneTransition {
        scene: scene::SceneId,
        from: scene::SceneState,
        to: scene::SceneState,
    },

    /// New entities cannot join a scene that is tearing down.
    #[error("scene {scene} is {state} and accepts no new entities")]
    SceneClosed { scene: scene::SceneId, state: scene::SceneState },

    #[error("making {parent:?} the parent of {entity:?} would create a cycle")]
    HierarchyCycle {
        entity: entity::EntityId,
        parent: entity::EntityId,
    },

    #[error("world '{world}' has been shut down")]
    WorldDestroyed { world: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentInfo, ComponentRegistry, ComponentTypeId, Name, PropertyInfo, PropertyKind};
    pub use crate::entity::EntityId;
    pub use crate::event::{
        ChildrenChanged, EcsSceneStateChanged, EntityActiveChanged, EntityAdded, EntityAddedToSample, EntityRemoved,
        EntityRemovedFromSample, ParentChanged, PostUpdate, PreUpdate, ReceiverId, SubscriptionId, Targeted, Update,
    };
    pub use crate::sample::{Sample, SampleId};
    pub use crate::scene::{EcsScene, SceneId, SceneState};
    pub use crate::schedule::{Phase, SystemCallable, SystemContext, SystemDescriptor};
    pub use crate::signature::{ComponentMask, Signature};
    pub use crate::snapshot::{EntitySnapshot, WorldSnapshot};
    pub use crate::world::{ComponentBundle, EntityEditor, RemovalPolicy, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
