//! Engine-wide system catalog.
//!
//! Systems are registered once here and attached to every world whose tags
//! include all of the system's `world_tags`, including worlds created later.
//! Replacing a catalog entry (hot reload) swaps the body in every attached
//! world and re-evaluates which worlds it belongs to.

use std::sync::Arc;

use loom_ecs::schedule::{SystemCallable, SystemDescriptor};
use loom_ecs::world::World;
use loom_ecs::EcsError;

use crate::EngineError;

struct CatalogEntry {
    descriptor: SystemDescriptor,
    body: Arc<dyn SystemCallable>,
}

/// Registration-ordered list of the engine's systems.
#[derive(Default)]
pub struct SystemCatalog {
    entries: Vec<CatalogEntry>,
}

impl std::fmt::Debug for SystemCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemCatalog")
            .field("systems", &self.entries.iter().map(|e| &e.descriptor.name).collect::<Vec<_>>())
            .finish()
    }
}

impl SystemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system and attach it to each matching world. Returns the number
    /// of worlds it was attached to.
    pub fn register<'w>(
        &mut self,
        descriptor: SystemDescriptor,
        body: Arc<dyn SystemCallable>,
        worlds: impl IntoIterator<Item = &'w mut World>,
    ) -> Result<usize, EngineError> {
        if self.contains(&descriptor.name) {
            return Err(EcsError::DuplicateSystem { name: descriptor.name }.into());
        }
        let mut attached = 0;
        for world in worlds {
            if descriptor.attaches_to(world.tags()) && !world.is_destroyed() {
                world.register_system_shared(descriptor.clone(), Arc::clone(&body))?;
                attached += 1;
            }
        }
        tracing::debug!(system = %descriptor.name, attached, "system added to catalog");
        self.entries.push(CatalogEntry { descriptor, body });
        Ok(attached)
    }

    /// Register every matching catalog system in a newly created world.
    pub fn attach_to(&self, world: &mut World) -> Result<usize, EngineError> {
        let mut attached = 0;
        for entry in &self.entries {
            if entry.descriptor.attaches_to(world.tags()) && !world.scheduler().contains(&entry.descriptor.name) {
                world.register_system_shared(entry.descriptor.clone(), Arc::clone(&entry.body))?;
                attached += 1;
            }
        }
        tracing::debug!(world = world.name(), attached, "catalog systems attached");
        Ok(attached)
    }

    /// Hot reload: swap the descriptor and body of an existing system.
    ///
    /// Worlds that still match get the new version in place (their
    /// schedules are recomputed on the next tick); worlds that no longer
    /// match drop it; newly matching worlds gain it.
    pub fn replace<'w>(
        &mut self,
        descriptor: SystemDescriptor,
        body: Arc<dyn SystemCallable>,
        worlds: impl IntoIterator<Item = &'w mut World>,
    ) -> Result<(), EngineError> {
        let index = self.index_of(&descriptor.name)?;
        for world in worlds {
            if world.is_destroyed() {
                continue;
            }
            let present = world.scheduler().contains(&descriptor.name);
            match (present, descriptor.attaches_to(world.tags())) {
                (true, true) => world.replace_system(descriptor.clone(), Arc::clone(&body))?,
                (true, false) => {
                    world.unregister_system(&descriptor.name)?;
                }
                (false, true) => world.register_system_shared(descriptor.clone(), Arc::clone(&body))?,
                (false, false) => {}
            }
        }
        tracing::info!(system = %descriptor.name, "system reloaded");
        self.entries[index] = CatalogEntry { descriptor, body };
        Ok(())
    }

    /// Remove a system from the catalog and from every world that runs it.
    pub fn unregister<'w>(
        &mut self,
        name: &str,
        worlds: impl IntoIterator<Item = &'w mut World>,
    ) -> Result<SystemDescriptor, EngineError> {
        let index = self.index_of(name)?;
        for world in worlds {
            if world.scheduler().contains(name) {
                world.unregister_system(name)?;
            }
        }
        Ok(self.entries.remove(index).descriptor)
    }

    fn index_of(&self, name: &str) -> Result<usize, EngineError> {
        self.entries
            .iter()
            .position(|e| e.descriptor.name == name)
            .ok_or_else(|| EcsError::UnknownSystem { name: name.to_owned() }.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.descriptor.name == name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&SystemDescriptor> {
        self.entries.iter().find(|e| e.descriptor.name == name).map(|e| &e.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SystemDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use loom_ecs::prelude::*;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn world(name: &str, tags: &[&str]) -> World {
        World::new(name, Arc::new(ComponentRegistry::new())).with_tags(tags.iter().copied())
    }

    fn logging_body(log: &Log, label: &'static str) -> Arc<dyn SystemCallable> {
        let log = Arc::clone(log);
        Arc::new(move |world: &mut World, _: &SystemContext| {
            log.lock().unwrap().push(format!("{label}@{}", world.name()));
        })
    }

    #[test]
    fn world_tags_select_worlds() {
        let log: Log = Arc::default();
        let mut worlds = vec![world("game", &["gameplay"]), world("menu", &["ui"])];
        let mut catalog = SystemCatalog::new();

        let n = catalog
            .register(
                SystemDescriptor::new("ai").world_tag("gameplay"),
                logging_body(&log, "ai"),
                worlds.iter_mut(),
            )
            .unwrap();
        assert_eq!(n, 1);
        let n = catalog
            .register(SystemDescriptor::new("clock"), logging_body(&log, "clock"), worlds.iter_mut())
            .unwrap();
        assert_eq!(n, 2);

        for w in &mut worlds {
            w.tick(0.1).unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["ai@game", "clock@game", "clock@menu"]);
    }

    #[test]
    fn late_worlds_receive_matching_systems() {
        let log: Log = Arc::default();
        let mut catalog = SystemCatalog::new();
        catalog
            .register(
                SystemDescriptor::new("ai").world_tag("gameplay"),
                logging_body(&log, "ai"),
                std::iter::empty(),
            )
            .unwrap();

        let mut late = world("late", &["gameplay", "extra"]);
        assert_eq!(catalog.attach_to(&mut late).unwrap(), 1);
        let mut plain = world("plain", &[]);
        assert_eq!(catalog.attach_to(&mut plain).unwrap(), 0);
        assert!(late.scheduler().contains("ai"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let log: Log = Arc::default();
        let mut catalog = SystemCatalog::new();
        catalog
            .register(SystemDescriptor::new("a"), logging_body(&log, "a"), std::iter::empty())
            .unwrap();
        let err = catalog
            .register(SystemDescriptor::new("a"), logging_body(&log, "a"), std::iter::empty())
            .unwrap_err();
        assert!(matches!(err, EngineError::Ecs(EcsError::DuplicateSystem { .. })));
    }

    #[test]
    fn hot_reload_swaps_body_and_reorders() {
        let log: Log = Arc::default();
        let mut worlds = vec![world("game", &[])];
        let mut catalog = SystemCatalog::new();
        catalog
            .register(SystemDescriptor::new("physics"), logging_body(&log, "physics"), worlds.iter_mut())
            .unwrap();
        catalog
            .register(SystemDescriptor::new("render"), logging_body(&log, "render-v1"), worlds.iter_mut())
            .unwrap();

        catalog
            .replace(
                SystemDescriptor::new("render").before("physics"),
                logging_body(&log, "render-v2"),
                worlds.iter_mut(),
            )
            .unwrap();
        worlds[0].tick(0.1).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["render-v2@game", "physics@game"]);
        assert_eq!(catalog.descriptor("render").unwrap().before, vec!["physics"]);
    }

    #[test]
    fn hot_reload_follows_world_tag_changes() {
        let log: Log = Arc::default();
        let mut worlds = vec![world("game", &["gameplay"]), world("menu", &["ui"])];
        let mut catalog = SystemCatalog::new();
        catalog
            .register(
                SystemDescriptor::new("music").world_tag("gameplay"),
                logging_body(&log, "music"),
                worlds.iter_mut(),
            )
            .unwrap();

        catalog
            .replace(
                SystemDescriptor::new("music").world_tag("ui"),
                logging_body(&log, "music"),
                worlds.iter_mut(),
            )
            .unwrap();
        assert!(!worlds[0].scheduler().contains("music"));
        assert!(worlds[1].scheduler().contains("music"));
    }

    #[test]
    fn unregister_removes_everywhere() {
        let log: Log = Arc::default();
        let mut worlds = vec![world("a", &[]), world("b", &[])];
        let mut catalog = SystemCatalog::new();
        catalog
            .register(SystemDescriptor::new("x"), logging_body(&log, "x"), worlds.iter_mut())
            .unwrap();
        let removed = catalog.unregister("x", worlds.iter_mut()).unwrap();
        assert_eq!(removed.name, "x");
        assert!(catalog.is_empty());
        assert!(worlds.iter().all(|w| !w.scheduler().contains("x")));
        assert!(matches!(
            catalog.unregister("x", worlds.iter_mut()),
            Err(EngineError::Ecs(EcsError::UnknownSystem { .. }))
        ));
    }
}
