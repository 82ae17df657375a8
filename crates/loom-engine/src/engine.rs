//! The engine context object.
//!
//! [`Engine`] owns everything a host application drives: the shared
//! component registry, the worlds (through the [`TickLoop`]), the
//! [`SystemCatalog`] and the [`SceneManager`]. Every world it creates shares
//! the same frozen registry, so component ids and signatures mean the same
//! thing in all of them and catalog systems can attach anywhere.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use loom_ecs::component::ComponentRegistry;
use loom_ecs::scene::SceneId;
use loom_ecs::schedule::{SystemCallable, SystemDescriptor};
use loom_ecs::signature::Signature;
use loom_ecs::world::World;

use crate::catalog::SystemCatalog;
use crate::config::EngineConfig;
use crate::scene::{SceneDefinition, SceneManager};
use crate::script::{ScriptHost, ScriptedSystem};
use crate::tick::{TickDiagnostics, TickLoop};
use crate::EngineError;

pub struct Engine {
    config: EngineConfig,
    registry: Arc<ComponentRegistry>,
    tick_loop: TickLoop,
    catalog: SystemCatalog,
    scenes: SceneManager,
    editor_mode: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("worlds", &self.world_names())
            .field("systems", &self.catalog)
            .field("ticks", &self.tick_loop.tick_count())
            .field("editor_mode", &self.editor_mode)
            .finish()
    }
}

impl Engine {
    /// Validate `config` and create the worlds it lists.
    pub fn new(config: EngineConfig, registry: Arc<ComponentRegistry>) -> Result<Self, EngineError> {
        config.validate()?;
        let tick_loop = TickLoop::new(config.fixed_dt, config.max_ticks_per_frame)?;
        let mut engine = Self {
            editor_mode: config.editor_mode,
            config,
            registry,
            tick_loop,
            catalog: SystemCatalog::new(),
            scenes: SceneManager::new(),
        };
        for world in engine.config.worlds.clone() {
            let playing = world.playing && !engine.editor_mode;
            engine.create_world(&world.name, world.tags)?.set_playing(playing);
        }
        tracing::info!(
            worlds = engine.tick_loop.world_count(),
            fixed_dt = engine.config.fixed_dt,
            editor_mode = engine.editor_mode,
            "engine started"
        );
        Ok(engine)
    }

    /// Validated configuration the engine was started with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry shared by every world the engine creates.
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    // -- worlds -------------------------------------------------------------

    /// Create a world sharing the engine registry. Catalog systems whose
    /// world tags match are attached immediately.
    pub fn create_world(&mut self, name: &str, tags: BTreeSet<String>) -> Result<&mut World, EngineError> {
        let mut world = World::new(name, Arc::clone(&self.registry)).with_tags(tags);
        world.set_playing(!self.editor_mode);
        self.catalog.attach_to(&mut world)?;
        self.tick_loop.add_world(world)
    }

    /// Shut a world down (removing its entities with the usual events) and
    /// drop it.
    pub fn destroy_world(&mut self, name: &str) -> Result<(), EngineError> {
        let mut world = self.tick_loop.remove_world(name)?;
        world.shutdown();
        Ok(())
    }

    pub fn world(&self, name: &str) -> Option<&World> {
        self.tick_loop.world(name)
    }

    pub fn world_mut(&mut self, name: &str) -> Option<&mut World> {
        self.tick_loop.world_mut(name)
    }

    /// Names of all worlds in tick order.
    pub fn world_names(&self) -> Vec<&str> {
        self.tick_loop.worlds().map(World::name).collect()
    }

    /// Signature builder over the engine registry.
    pub fn signature(&self) -> loom_ecs::signature::SignatureBuilder<'_> {
        Signature::builder(&self.registry)
    }

    // -- systems ------------------------------------------------------------

    /// Add a system to the catalog. Returns how many worlds it attached to.
    pub fn register_system(
        &mut self,
        descriptor: SystemDescriptor,
        body: Arc<dyn SystemCallable>,
    ) -> Result<usize, EngineError> {
        self.catalog.register(descriptor, body, self.tick_loop.worlds_mut())
    }

    /// Add a system backed by the script function `function`.
    pub fn register_script_system(
        &mut self,
        name: &str,
        function: &str,
        attributes: &str,
        signature: Option<Signature>,
        host: Arc<dyn ScriptHost>,
    ) -> Result<Arc<ScriptedSystem>, EngineError> {
        let (descriptor, body) = ScriptedSystem::describe(name, function, attributes, signature, host)?;
        self.register_system(descriptor, Arc::clone(&body) as Arc<dyn SystemCallable>)?;
        Ok(body)
    }

    /// Hot reload a catalog system in every world.
    pub fn reload_system(
        &mut self,
        descriptor: SystemDescriptor,
        body: Arc<dyn SystemCallable>,
    ) -> Result<(), EngineError> {
        self.catalog.replace(descriptor, body, self.tick_loop.worlds_mut())
    }

    /// Remove a catalog system from the catalog and every world.
    pub fn unregister_system(&mut self, name: &str) -> Result<SystemDescriptor, EngineError> {
        self.catalog.unregister(name, self.tick_loop.worlds_mut())
    }

    pub fn catalog(&self) -> &SystemCatalog {
        &self.catalog
    }

    // -- scenes -------------------------------------------------------------

    /// Make a scene definition loadable by name. Replaces one with the same name.
    pub fn add_scene_definition(&mut self, definition: SceneDefinition) {
        self.scenes.add_definition(definition);
    }

    pub fn scene_manager(&self) -> &SceneManager {
        &self.scenes
    }

    /// Instantiate the definition `scene` into `world`.
    pub fn load_scene(&mut self, scene: &str, world: &str, additive: bool) -> Result<SceneId, EngineError> {
        let target = self
            .tick_loop
            .world_mut(world)
            .ok_or_else(|| EngineError::UnknownWorld { name: world.to_owned() })?;
        self.scenes.load_scene(scene, target, additive)
    }

    /// Tear down a loaded scene, returning how many entities it removed.
    pub fn unload_scene(&mut self, world: &str, scene: SceneId) -> Result<usize, EngineError> {
        let target = self
            .tick_loop
            .world_mut(world)
            .ok_or_else(|| EngineError::UnknownWorld { name: world.to_owned() })?;
        self.scenes.unload_scene(target, scene)
    }

    // -- play state ---------------------------------------------------------

    /// `true` while worlds only run editor-enabled systems.
    pub fn is_editor_mode(&self) -> bool {
        self.editor_mode
    }

    /// Switch every world between editor (not playing) and play mode.
    pub fn set_editor_mode(&mut self, editor: bool) {
        self.editor_mode = editor;
        for world in self.tick_loop.worlds_mut() {
            world.set_playing(!editor);
        }
        tracing::info!(editor_mode = editor, "engine mode changed");
    }

    // -- stepping -----------------------------------------------------------

    /// Run one fixed step across all worlds.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        self.tick_loop.tick()
    }

    /// Run `count` fixed steps back to back, stopping at the first error.
    pub fn run_ticks(&mut self, count: u64) -> Result<(), EngineError> {
        self.tick_loop.run_ticks(count)
    }

    /// Feed real elapsed time; see [`TickLoop::advance`].
    pub fn advance(&mut self, elapsed: Duration) -> Result<u32, EngineError> {
        self.tick_loop.advance(elapsed)
    }

    /// Fixed steps run since start.
    pub fn tick_count(&self) -> u64 {
        self.tick_loop.tick_count()
    }

    /// Simulated seconds: steps run times the fixed step.
    pub fn sim_time(&self) -> f64 {
        self.tick_loop.sim_time()
    }

    /// Timings and counts from the most recent step.
    pub fn diagnostics(&self) -> &TickDiagnostics {
        self.tick_loop.last_diagnostics()
    }

    /// BLAKE3 digest over the state hashes of all worlds, in world order.
    pub fn state_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for world in self.tick_loop.worlds() {
            hasher.update(world.name().as_bytes());
            hasher.update(world.state_hash().as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Shut every world down. The engine keeps its catalog and definitions.
    pub fn shutdown(&mut self) {
        let names: Vec<String> = self.world_names().into_iter().map(str::to_owned).collect();
        for name in names {
            if let Err(err) = self.destroy_world(&name) {
                tracing::warn!(world = %name, error = %err, "world did not shut down cleanly");
            }
        }
        tracing::info!(ticks = self.tick_loop.tick_count(), "engine shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
