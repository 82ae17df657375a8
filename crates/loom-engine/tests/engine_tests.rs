//! End-to-end tests for the engine host layer.
//!
//! These drive a configured [`Engine`] the way an application would: boot
//! from JSON, load scenes, register native and scripted systems through the
//! catalog, and step the fixed-timestep loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use loom_ecs::prelude::*;
use loom_engine::prelude::*;
use proptest::prelude::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Test component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Counter(u64);

type Log = Arc<Mutex<Vec<String>>>;

fn registry() -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register::<Position>("position");
    registry.register::<Velocity>("velocity");
    registry.register::<Counter>("counter");
    Arc::new(registry)
}

fn boot(json: &str) -> Engine {
    Engine::new(EngineConfig::from_json_str(json).unwrap(), registry()).unwrap()
}

fn movement() -> Arc<dyn SystemCallable> {
    Arc::new(|world: &mut World, ctx: &SystemContext| {
        for &e in &ctx.entities {
            let Some(vel) = world.get_component::<Velocity>(e).cloned() else { continue };
            if let Some(pos) = world.get_component_mut::<Position>(e) {
                pos.x += vel.dx * ctx.dt;
                pos.y += vel.dy * ctx.dt;
            }
        }
    })
}

fn counting() -> Arc<dyn SystemCallable> {
    Arc::new(|world: &mut World, ctx: &SystemContext| {
        for &e in &ctx.entities {
            if let Some(c) = world.get_component_mut::<Counter>(e) {
                c.0 += 1;
            }
        }
    })
}

fn logging(log: &Log) -> Arc<dyn SystemCallable> {
    let log = Arc::clone(log);
    Arc::new(move |world: &mut World, ctx: &SystemContext| {
        log.lock().unwrap().push(format!("{}@{}", ctx.system, world.name()));
    })
}

fn level() -> SceneDefinition {
    SceneDefinition::new("level")
        .with_entity(
            EntityDefinition::named("ball")
                .with_component("position", json!({ "x": 0.0, "y": 0.0 }))
                .with_component("velocity", json!({ "dx": 4.0, "dy": -2.0 })),
        )
        .with_entity(
            EntityDefinition::named("paddle")
                .with_component("position", json!({ "x": 10.0, "y": 0.0 }))
                .with_child(EntityDefinition::named("paddle-trail").with_component("counter", json!(0))),
        )
}

/// Script host that logs invocations and fails functions named `fail*`.
#[derive(Default)]
struct RecordingHost {
    calls: Mutex<Vec<String>>,
}

impl ScriptHost for RecordingHost {
    fn invoke(&self, function: &str, world: &mut World, ctx: &SystemContext) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{function}@{}#{}", world.name(), ctx.frame));
        if function.starts_with("fail") {
            anyhow::bail!("{function} raised");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 1. Booting from configuration
// ---------------------------------------------------------------------------

#[test]
fn boot_from_json_creates_tagged_worlds() {
    let engine = boot(
        r#"{
            "fixed_dt": 0.25,
            "max_ticks_per_frame": 3,
            "logging": { "filter": "loom_engine=debug", "ansi": false },
            "worlds": [
                { "name": "game", "tags": ["gameplay", "physics"] },
                { "name": "menu", "tags": ["ui"], "playing": false }
            ]
        }"#,
    );
    assert_eq!(engine.world_names(), vec!["game", "menu"]);
    assert!(engine.world("game").unwrap().has_tag("physics"));
    assert!(engine.world("game").unwrap().is_playing());
    assert!(!engine.world("menu").unwrap().is_playing());
    assert_eq!(engine.config().fixed_dt, 0.25);
    assert!(!engine.config().logging.ansi);
}

#[test]
fn invalid_configuration_is_rejected_before_any_world_exists() {
    let err = EngineConfig::from_json_str(r#"{ "fixed_dt": -1.0 }"#).unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig { .. }));

    let err = EngineConfig::from_json_str(r#"{ "worlds": [{ "name": "a" }, { "name": "a" }] }"#).unwrap_err();
    assert!(err.to_string().contains("configured twice"));

    let err = EngineConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, EngineError::Parse { .. }));
}

// ---------------------------------------------------------------------------
// 2. A full frame loop over a loaded scene
// ---------------------------------------------------------------------------

#[test]
fn loaded_scene_moves_under_fixed_steps() {
    let mut engine = boot(r#"{ "fixed_dt": 0.25, "worlds": [{ "name": "game", "tags": ["physics"] }] }"#);
    let moving = engine.signature().with::<Position>().with::<Velocity>().build();
    engine
        .register_system(
            SystemDescriptor::new("movement").sample(moving).tag("physics").world_tag("physics"),
            movement(),
        )
        .unwrap();
    engine.add_scene_definition(level());
    engine.load_scene("level", "game", false).unwrap();

    // 0.75 s of real time pays for exactly three ticks.
    assert_eq!(engine.advance(Duration::from_millis(750)).unwrap(), 3);
    assert_eq!(engine.tick_count(), 3);
    assert_eq!(engine.sim_time(), 0.75);

    let world = engine.world("game").unwrap();
    let ball = world.find_entity_by_name("ball").unwrap();
    let paddle = world.find_entity_by_name("paddle").unwrap();
    assert_eq!(world.get_component::<Position>(ball), Some(&Position { x: 3.0, y: -1.5 }));
    assert_eq!(world.get_component::<Position>(paddle), Some(&Position { x: 10.0, y: 0.0 }));
    assert_eq!(world.frame(), 3);
}

#[test]
fn inactive_subtree_and_paused_scene_are_skipped() {
    let mut engine = boot(r#"{ "worlds": [{ "name": "game" }] }"#);
    let counted = engine.signature().with::<Counter>().active_only().build();
    engine
        .register_system(SystemDescriptor::new("count").sample(counted), counting())
        .unwrap();
    engine.add_scene_definition(level());
    engine.add_scene_definition(
        SceneDefinition::new("overlay").with_entity(EntityDefinition::named("badge").with_component("counter", json!(0))),
    );
    let level_scene = engine.load_scene("level", "game", true).unwrap();
    let overlay = engine.load_scene("overlay", "game", true).unwrap();

    engine.run_ticks(2).unwrap();
    {
        let world = engine.world_mut("game").unwrap();
        let paddle = world.find_entity_by_name("paddle").unwrap();
        world.set_active(paddle, false).unwrap();
        world.pause_scene(overlay).unwrap();
    }
    engine.run_ticks(3).unwrap();

    let world = engine.world("game").unwrap();
    let trail = world.find_entity_by_name("paddle-trail").unwrap();
    let badge = world.find_entity_by_name("badge").unwrap();
    assert!(!world.is_active_in_hierarchy(trail));
    assert_eq!(world.get_component::<Counter>(trail), Some(&Counter(2)));
    assert_eq!(world.get_component::<Counter>(badge), Some(&Counter(2)));
    assert_eq!(world.scene_state(level_scene), Some(SceneState::Active));
    assert_eq!(world.scene_state(overlay), Some(SceneState::Paused));
}

#[test]
fn exclusive_scene_load_replaces_world_contents() {
    let mut engine = boot(r#"{ "worlds": [{ "name": "game" }, { "name": "menu" }] }"#);
    engine.add_scene_definition(level());
    engine.add_scene_definition(SceneDefinition::new("title").with_entity(EntityDefinition::named("logo")));

    engine.load_scene("level", "game", false).unwrap();
    engine.load_scene("title", "menu", false).unwrap();
    assert_eq!(engine.world("game").unwrap().entity_count(), 3);

    let title = engine.load_scene("title", "game", false).unwrap();
    let game = engine.world("game").unwrap();
    assert_eq!(game.entity_count(), 1);
    assert_eq!(game.scenes().map(|s| s.id).collect::<Vec<_>>(), vec![title]);
    // Other worlds are untouched.
    assert_eq!(engine.world("menu").unwrap().entity_count(), 1);
}

// ---------------------------------------------------------------------------
// 3. Catalog, hot reload and scripted systems
// ---------------------------------------------------------------------------

#[test]
fn catalog_systems_follow_world_tags_and_ordering() {
    let log: Log = Arc::default();
    let mut engine = boot(
        r#"{ "worlds": [{ "name": "game", "tags": ["gameplay"] }, { "name": "menu", "tags": ["ui"] }] }"#,
    );
    engine
        .register_system(SystemDescriptor::new("render").phase(Phase::PostUpdate), logging(&log))
        .unwrap();
    engine
        .register_system(SystemDescriptor::new("ai").world_tag("gameplay").after("Physics"), logging(&log))
        .unwrap();
    engine
        .register_system(
            SystemDescriptor::new("rigid-bodies").tag("Physics").world_tag("gameplay"),
            logging(&log),
        )
        .unwrap();
    engine
        .register_system(SystemDescriptor::new("input").phase(Phase::PreUpdate), logging(&log))
        .unwrap();

    engine.tick().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "input@game",
            "rigid-bodies@game",
            "ai@game",
            "render@game",
            "input@menu",
            "render@menu",
        ]
    );
    assert_eq!(engine.catalog().len(), 4);
}

#[test]
fn hot_reload_applies_to_every_world_without_restart() {
    let log: Log = Arc::default();
    let mut engine = boot(r#"{ "worlds": [{ "name": "a" }, { "name": "b" }] }"#);
    let counted = engine.signature().with::<Counter>().build();
    engine
        .register_system(SystemDescriptor::new("count").sample(counted), counting())
        .unwrap();
    let a = engine.world_mut("a").unwrap().spawn_with(Counter(0));
    engine.run_ticks(2).unwrap();

    engine
        .reload_system(SystemDescriptor::new("count").sample(counted), logging(&log))
        .unwrap();
    engine.run_ticks(1).unwrap();

    assert_eq!(engine.world("a").unwrap().get_component::<Counter>(a), Some(&Counter(2)));
    assert_eq!(*log.lock().unwrap(), vec!["count@a", "count@b"]);

    assert!(matches!(
        engine.reload_system(SystemDescriptor::new("ghost"), logging(&log)),
        Err(EngineError::Ecs(EcsError::UnknownSystem { .. }))
    ));
}

#[test]
fn scripted_systems_run_between_native_ones() {
    let log: Log = Arc::default();
    let host = Arc::new(RecordingHost::default());
    let mut engine = boot(r#"{ "worlds": [{ "name": "game", "tags": ["gameplay"] }] }"#);

    engine
        .register_system(SystemDescriptor::new("physics").tag("Physics"), logging(&log))
        .unwrap();
    let wander = engine
        .register_script_system("wander", "npc_wander", "after=Physics; world=gameplay", None, host.clone())
        .unwrap();
    engine
        .register_system(SystemDescriptor::new("render").after("wander"), logging(&log))
        .unwrap();

    engine.run_ticks(2).unwrap();
    assert_eq!(
        engine.world_mut("game").unwrap().compute_schedule(Phase::Update).unwrap(),
        vec!["physics", "wander", "render"]
    );
    assert_eq!(*host.calls.lock().unwrap(), vec!["npc_wander@game#0", "npc_wander@game#1"]);
    assert_eq!(wander.failures(), 0);
    assert_eq!(wander.function(), "npc_wander");
}

#[test]
fn failing_script_does_not_stop_the_loop() {
    let host = Arc::new(RecordingHost::default());
    let mut engine = boot(r#"{ "worlds": [{ "name": "game" }] }"#);
    let broken = engine
        .register_script_system("broken", "fail_hard", "", None, host)
        .unwrap();
    engine.run_ticks(4).unwrap();
    assert_eq!(broken.failures(), 4);
    assert_eq!(engine.tick_count(), 4);
}

#[test]
fn bad_script_attributes_register_nothing() {
    let host = Arc::new(RecordingHost::default());
    let mut engine = boot(r#"{ "worlds": [{ "name": "game" }] }"#);
    let err = engine
        .register_script_system("odd", "odd", "phase=sometime", None, host)
        .unwrap_err();
    assert!(matches!(err, EngineError::ScriptAttributes { .. }));
    assert!(engine.catalog().is_empty());
}

// ---------------------------------------------------------------------------
// 4. Failures and lifecycle
// ---------------------------------------------------------------------------

#[test]
fn ordering_cycle_fails_the_tick() {
    let log: Log = Arc::default();
    let mut engine = boot(r#"{ "worlds": [{ "name": "game" }] }"#);
    engine
        .register_system(SystemDescriptor::new("a").after("b"), logging(&log))
        .unwrap();
    engine
        .register_system(SystemDescriptor::new("b").after("a"), logging(&log))
        .unwrap();

    let err = engine.tick().unwrap_err();
    assert!(matches!(err, EngineError::Ecs(EcsError::ScheduleCycle { .. })));
    assert_eq!(engine.tick_count(), 0);
    assert!(log.lock().unwrap().is_empty());

    // Breaking the cycle with a reload lets the loop continue.
    engine.reload_system(SystemDescriptor::new("b"), logging(&log)).unwrap();
    engine.tick().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["b@game", "a@game"]);
}

#[test]
fn editor_toggle_switches_every_world() {
    let log: Log = Arc::default();
    let mut engine = boot(r#"{ "editor_mode": true, "worlds": [{ "name": "a" }, { "name": "b" }] }"#);
    engine
        .register_system(SystemDescriptor::new("gizmos").in_editor(), logging(&log))
        .unwrap();
    engine
        .register_system(SystemDescriptor::new("gameplay"), logging(&log))
        .unwrap();
    assert!(engine.is_editor_mode());

    engine.tick().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["gizmos@a", "gizmos@b"]);

    log.lock().unwrap().clear();
    engine.set_editor_mode(false);
    engine.tick().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["gizmos@a", "gameplay@a", "gizmos@b", "gameplay@b"]);
}

#[test]
fn shutdown_removes_entities_with_events() {
    let removed = Arc::new(Mutex::new(0usize));
    let mut engine = boot(r#"{ "worlds": [{ "name": "game" }] }"#);
    engine.add_scene_definition(level());
    engine.load_scene("level", "game", true).unwrap();
    {
        let world = engine.world_mut("game").unwrap();
        let receiver = world.register_receiver("watcher");
        let sink = Arc::clone(&removed);
        world.subscribe(receiver, move |_: &mut World, _: &EntityRemoved| *sink.lock().unwrap() += 1);
    }
    engine.shutdown();
    assert_eq!(*removed.lock().unwrap(), 3);
    assert!(engine.world_names().is_empty());
}

// ---------------------------------------------------------------------------
// 5. Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Every quarter second of fed time is either simulated or reported as
    /// dropped; nothing is lost or invented.
    #[test]
    fn advance_accounts_for_all_time(frames in prop::collection::vec(0u64..12, 1..40)) {
        let mut engine = boot(r#"{ "fixed_dt": 0.25, "max_ticks_per_frame": 4, "worlds": [{ "name": "w" }] }"#);
        let mut fed = 0u64;
        for quarters in frames {
            fed += quarters;
            let ran = engine.advance(Duration::from_millis(quarters * 250)).unwrap();
            prop_assert!(ran <= 4);
            prop_assert_eq!(engine.diagnostics().ticks_last_advance, ran);
        }
        let dropped = engine.diagnostics().dropped_time / 0.25;
        prop_assert_eq!(engine.tick_count() as f64 + dropped, fed as f64);
    }

    /// Two engines fed the same scene and steps end in the same state.
    #[test]
    fn identical_runs_hash_identically(
        bodies in prop::collection::vec((-5i32..5, -5i32..5), 0..12),
        ticks in 1u64..20,
    ) {
        let run = || {
            let mut engine = boot(r#"{ "worlds": [{ "name": "w" }] }"#);
            let moving = engine.signature().with::<Position>().with::<Velocity>().build();
            engine.register_system(SystemDescriptor::new("movement").sample(moving), movement()).unwrap();
            let world = engine.world_mut("w").unwrap();
            for &(dx, dy) in &bodies {
                let mut bundle = ComponentBundle::new();
                bundle
                    .add(world.registry(), Position::default())
                    .add(world.registry(), Velocity { dx: dx as f32, dy: dy as f32 });
                world.spawn_bundle(bundle);
            }
            engine.run_ticks(ticks).unwrap();
            engine.state_hash()
        };
        prop_assert_eq!(run(), run());
    }
}
