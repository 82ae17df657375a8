//! Loom Engine -- host layer over [`loom_ecs`]: several worlds driven by one
//! fixed-timestep loop, a shared system catalog, data-driven scenes and a
//! bridge for scripted systems.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use loom_engine::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Score(u32);
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register::<Score>("score");
//!
//! let config = EngineConfig::from_json_str(r#"{ "worlds": [{ "name": "game" }] }"#).unwrap();
//! let mut engine = Engine::new(config, Arc::new(registry)).unwrap();
//!
//! let scoring = engine.world("game").unwrap().signature().with::<Score>().build();
//! engine
//!     .register_system(
//!         SystemDescriptor::new("scoring").sample(scoring),
//!         Arc::new(|world: &mut World, ctx: &SystemContext| {
//!             for &e in &ctx.entities {
//!                 if let Some(score) = world.get_component_mut::<Score>(e) {
//!                     score.0 += 1;
//!                 }
//!             }
//!         }),
//!     )
//!     .unwrap();
//!
//! let player = engine.world_mut("game").unwrap().spawn_with(Score(0));
//! engine.run_ticks(10).unwrap();
//! assert_eq!(engine.world("game").unwrap().get_component::<Score>(player), Some(&Score(10)));
//! ```

#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod engine;
pub mod logging;
pub mod scene;
pub mod script;
pub mod tick;

/// Re-export the ECS crate for convenience.
pub use loom_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the engine layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Ecs(#[from] loom_ecs::EcsError),

    #[error("could not read config file '{path}': {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON in a config file or scene definition.
    #[error("could not parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("no world named '{name}'")]
    UnknownWorld { name: String },

    #[error("a world named '{name}' already exists")]
    DuplicateWorld { name: String },

    #[error("no scene definition named '{name}'")]
    UnknownSceneDefinition { name: String },

    /// A scene definition could not be instantiated.
    #[error("scene '{scene}' failed to load: {details}")]
    SceneLoad { scene: String, details: String },

    #[error("invalid script system attributes '{input}': {details}")]
    ScriptAttributes { input: String, details: String },

    /// A scripted system's callable failed.
    #[error("script function '{function}' of system '{system}' failed: {source}")]
    Script {
        system: String,
        function: String,
        #[source]
        source: anyhow::Error,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use loom_ecs::prelude::*;

    pub use crate::catalog::SystemCatalog;
    pub use crate::config::{EngineConfig, LoggingConfig, WorldConfig};
    pub use crate::engine::Engine;
    pub use crate::logging::init_logging;
    pub use crate::scene::{EntityDefinition, SceneDefinition, SceneManager};
    pub use crate::script::{ScriptHost, ScriptSystemAttributes, ScriptedSystem};
    pub use crate::tick::{TickDiagnostics, TickLoop};
    pub use crate::EngineError;
}
