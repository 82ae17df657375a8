//! The [`World`] is the unit of simulation. It owns the entity allocator and
//! records, per-type component columns, the samples, the event bus, the
//! system scheduler and the scenes resident in it.
//!
//! All structural changes are synchronous: when `add_component` returns, the
//! samples already reflect the change and the corresponding events have been
//! delivered.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::component::{BoxedComponent, Component, ComponentRegistry, ComponentTypeId, Name};
use crate::entity::{EntityAllocator, EntityId};
use crate::event::{
    ChildrenChanged, EntityAdded, EntityAddedToSample, EntityRemoved, EntityRemovedFromSample, EventBus, ParentChanged,
    PostUpdate, PreUpdate, ReceiverId, SubscriptionId, Targeted, Update,
};
use crate::sample::{Sample, SampleChange, SampleId, SampleSet};
use crate::scene::{EcsScene, SceneId, SceneState};
use crate::schedule::{Phase, Scheduler, SystemCallable, SystemContext, SystemDescriptor};
use crate::signature::{ComponentMask, Signature, SignatureBuilder};
use crate::storage::{ComponentColumn, SparseColumn};
use crate::EcsError;

// ---------------------------------------------------------------------------
// RemovalPolicy
// ---------------------------------------------------------------------------

/// What happens to the children of a removed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Remove the whole subtree.
    #[default]
    Cascade,
    /// Detach the children and keep them as roots.
    ReparentToRoot,
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// Per-slot entity data. Only meaningful while the slot is alive.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityRecord {
    pub mask: ComponentMask,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
    pub active_self: bool,
    pub active_in_hierarchy: bool,
    pub scene: Option<SceneId>,
    /// Set while `remove_entity` is tearing the entity down.
    pub removing: bool,
}

// ---------------------------------------------------------------------------
// ComponentBundle
// ---------------------------------------------------------------------------

/// A set of component values to attach in one step.
///
/// Spawning from a bundle evaluates samples once for the final component
/// set, so an entity spawned with `{Position, Velocity}` produces one
/// added-to-sample event per matching sample. A bundle marked
/// [`inactive`](Self::inactive) spawns with its own active flag already off.
#[derive(Default)]
pub struct ComponentBundle {
    pub(crate) components: Vec<(ComponentTypeId, BoxedComponent)>,
    inactive: bool,
}

impl fmt::Debug for ComponentBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentBundle")
            .field("components", &self.components.iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .field("active", &!self.inactive)
            .finish()
    }
}

impl ComponentBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed value. Unregistered types are reported and skipped.
    pub fn add<T: Component>(&mut self, registry: &ComponentRegistry, value: T) -> &mut Self {
        match registry.lookup::<T>() {
            Some(id) => self.insert(id, Box::new(value)),
            None => {
                tracing::error!(component = std::any::type_name::<T>(), "bundle value of unregistered type");
                debug_assert!(false, "component type {} is not registered", std::any::type_name::<T>());
            }
        }
        self
    }

    /// Chaining form of [`add`](Self::add).
    pub fn with<T: Component>(mut self, registry: &ComponentRegistry, value: T) -> Self {
        self.add(registry, value);
        self
    }

    /// Add a value decoded from JSON by registered component name.
    pub fn add_json(
        &mut self,
        registry: &ComponentRegistry,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<&mut Self, EcsError> {
        let id = registry.resolve(name)?;
        let boxed = (registry.vtable(id).from_json)(value).map_err(|details| EcsError::ComponentDeserialization {
            component: name.to_owned(),
            details,
        })?;
        self.insert(id, boxed);
        Ok(self)
    }

    fn insert(&mut self, id: ComponentTypeId, value: BoxedComponent) {
        match self.components.iter_mut().find(|(c, _)| *c == id) {
            Some(slot) => slot.1 = value,
            None => self.components.push((id, value)),
        }
    }

    /// Spawn with `active_self == false`.
    pub fn inactive(mut self) -> Self {
        self.inactive = true;
        self
    }

    /// Choose the initial self-active flag of the spawned entity.
    pub fn set_active(&mut self, active: bool) -> &mut Self {
        self.inactive = !active;
        self
    }

    /// Initial own-active flag of the spawned entity.
    pub fn is_active(&self) -> bool {
        !self.inactive
    }

    /// Number of component values.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// One simulation universe: entities, components, samples, events, systems
/// and scenes. Worlds never share entities.
pub struct World {
    name: String,
    tags: BTreeSet<String>,
    registry: Arc<ComponentRegistry>,
    pub(crate) allocator: EntityAllocator,
    /// Indexed by entity slot.
    pub(crate) records: Vec<EntityRecord>,
    /// Indexed by `ComponentTypeId`; created on first use.
    columns: Vec<Option<Box<dyn ComponentColumn>>>,
    pub(crate) samples: SampleSet,
    pub(crate) events: EventBus,
    scheduler: Scheduler,
    pub(crate) scenes: BTreeMap<SceneId, EcsScene>,
    pub(crate) next_scene: u32,
    frame: u64,
    playing: bool,
    destroyed: bool,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("entities", &self.allocator.alive_count())
            .field("samples", &self.samples.len())
            .field("scheduler", &self.scheduler)
            .field("scenes", &self.scenes.len())
            .field("frame", &self.frame)
            .finish()
    }
}

impl World {
    /// Create an empty world over a shared component registry.
    pub fn new(name: impl Into<String>, registry: Arc<ComponentRegistry>) -> Self {
        let name = name.into();
        let mut columns = Vec::new();
        columns.resize_with(registry.len(), || None);
        tracing::info!(world = %name, components = registry.len(), "world created");
        Self {
            name,
            tags: BTreeSet::new(),
            registry,
            allocator: EntityAllocator::new(),
            records: Vec::new(),
            columns,
            samples: SampleSet::new(),
            events: EventBus::new(),
            scheduler: Scheduler::new(),
            scenes: BTreeMap::new(),
            next_scene: 0,
            frame: 0,
            playing: true,
            destroyed: false,
        }
    }

    /// Add world tags, used to match catalog systems to worlds.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Name the world was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Component registry shared with every world of the engine.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// A new handle to the shared registry.
    pub fn shared_registry(&self) -> Arc<ComponentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Frames completed by [`tick`](Self::tick).
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Whether gameplay systems dispatch on [`tick`](Self::tick).
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Outside play mode only systems flagged `enable_in_editor` run.
    pub fn set_playing(&mut self, playing: bool) {
        if self.playing != playing {
            tracing::info!(world = %self.name, playing, "world play state changed");
        }
        self.playing = playing;
    }

    /// Set once [`shutdown`](Self::shutdown) has run; the world rejects new work afterwards.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    // -- entities ------------------------------------------------------------

    /// Create an empty, active root entity that belongs to no scene.
    pub fn create_entity(&mut self) -> EntityId {
        if self.destroyed {
            tracing::error!(world = %self.name, "entity created in a destroyed world");
            debug_assert!(false, "entity created in destroyed world '{}'", self.name);
        }
        self.spawn_raw(None, None, Vec::new(), true)
    }

    /// Create an empty entity owned by `scene`.
    pub fn create_entity_in(&mut self, scene: SceneId) -> Result<EntityId, EcsError> {
        self.spawn_in(Some(scene), None, ComponentBundle::new())
    }

    /// Create a root entity carrying `bundle`.
    pub fn spawn_bundle(&mut self, bundle: ComponentBundle) -> EntityId {
        let active = bundle.is_active();
        self.spawn_raw(None, None, bundle.components, active)
    }

    /// Create an entity from a single component value.
    pub fn spawn_with<T: Component>(&mut self, value: T) -> EntityId {
        let bundle = ComponentBundle::new().with(&self.registry, value);
        self.spawn_bundle(bundle)
    }

    /// Create an entity with `bundle` in `scene` (if any) under `parent` (if
    /// any). A child without an explicit scene joins its parent's scene.
    pub fn spawn_in(
        &mut self,
        scene: Option<SceneId>,
        parent: Option<EntityId>,
        bundle: ComponentBundle,
    ) -> Result<EntityId, EcsError> {
        if self.destroyed {
            return Err(EcsError::WorldDestroyed { world: self.name.clone() });
        }
        if let Some(parent) = parent {
            self.live_record(parent)?;
        }
        let scene = scene.or_else(|| parent.and_then(|p| self.entity_scene(p)));
        if let Some(scene) = scene {
            let state = self.scene_state(scene).ok_or(EcsError::UnknownScene { scene })?;
            if !matches!(state, SceneState::Loading | SceneState::Active | SceneState::Paused) {
                return Err(EcsError::SceneClosed { scene, state });
            }
        }
        let active = bundle.is_active();
        Ok(self.spawn_raw(scene, parent, bundle.components, active))
    }

    /// Allocate, attach components, link to the parent, then publish:
    /// `EntityAdded`, sample admissions, hierarchy notifications.
    ///
    /// A handler may remove the new entity at any of those points; the
    /// remaining steps are then skipped.
    pub(crate) fn spawn_raw(
        &mut self,
        scene: Option<SceneId>,
        parent: Option<EntityId>,
        components: Vec<(ComponentTypeId, BoxedComponent)>,
        active_self: bool,
    ) -> EntityId {
        let entity = self.allocator.allocate();
        let idx = entity.index() as usize;
        if idx >= self.records.len() {
            self.records.resize_with(idx + 1, EntityRecord::default);
        }
        let parent_active = parent.map_or(true, |p| self.records[p.index() as usize].active_in_hierarchy);
        self.records[idx] = EntityRecord {
            mask: ComponentMask::EMPTY,
            parent,
            children: Vec::new(),
            active_self,
            active_in_hierarchy: active_self && parent_active,
            scene,
            removing: false,
        };
        for (id, value) in components {
            if let Err(err) = self.attach_raw(entity, id, value) {
                tracing::error!(entity = %entity, error = %err, "dropping component on spawn");
            }
        }
        if let Some(parent) = parent {
            self.records[parent.index() as usize].children.push(entity);
        }
        tracing::trace!(world = %self.name, entity = %entity, ?scene, ?parent, "entity created");

        self.emit(EntityAdded { entity });
        if !self.is_alive(entity) {
            return entity;
        }
        let record = &self.records[idx];
        let (mask, active) = (record.mask, record.active_in_hierarchy);
        let mut changes = Vec::new();
        self.samples.admit(entity, &mask, active, &mut changes);
        self.raise_sample_changes(changes);
        if !self.is_alive(entity) {
            return entity;
        }
        if let Some(parent) = parent.filter(|&p| self.is_alive(p)) {
            self.emit(ParentChanged {
                entity,
                old_parent: None,
                new_parent: Some(parent),
            });
            self.emit(ChildrenChanged { entity: parent });
        }
        entity
    }

    /// Remove `entity`. Returns `false` for stale ids (or an entity already
    /// being removed) without touching anything.
    ///
    /// Order: detach from the parent, dispose of the children per `policy`,
    /// leave every sample, raise `EntityRemoved`, recycle the slot.
    pub fn remove_entity(&mut self, entity: EntityId, policy: RemovalPolicy) -> bool {
        if !self.allocator.is_alive(entity) || self.records[entity.index() as usize].removing {
            return false;
        }
        let idx = entity.index() as usize;
        self.records[idx].removing = true;

        if let Some(parent) = self.records[idx].parent {
            self.records[parent.index() as usize].children.retain(|&c| c != entity);
            self.emit(ChildrenChanged { entity: parent });
        }

        let children = self.records[idx].children.clone();
        for child in children {
            match policy {
                RemovalPolicy::Cascade => {
                    self.remove_entity(child, policy);
                }
                RemovalPolicy::ReparentToRoot => {
                    if let Err(err) = self.set_parent(child, None) {
                        tracing::warn!(entity = %child, error = %err, "could not detach child of removed entity");
                    }
                }
            }
        }

        let mut changes = Vec::new();
        self.samples.evict(entity, &mut changes);
        self.raise_sample_changes(changes);
        self.emit(EntityRemoved { entity });

        let record = std::mem::take(&mut self.records[idx]);
        for id in record.mask.iter() {
            if let Some(column) = self.columns[id.index()].as_mut() {
                column.remove(entity);
            }
        }
        self.allocator.deallocate(entity);
        tracing::trace!(world = %self.name, entity = %entity, "entity removed");
        true
    }

    /// Whether `entity` names a live entity of this world (not a stale handle).
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Live entities, including ones of paused or loading scenes.
    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.allocator.iter_alive()
    }

    /// Scene owning `entity`, or `None` for scene-less entities and stale ids.
    pub fn entity_scene(&self, entity: EntityId) -> Option<SceneId> {
        self.record(entity).and_then(|r| r.scene)
    }

    /// Component types currently attached to `entity`.
    pub fn component_mask(&self, entity: EntityId) -> Option<ComponentMask> {
        self.record(entity).map(|r| r.mask)
    }

    /// First live entity (in slot order) whose [`Name`] equals `name`.
    pub fn find_entity_by_name(&self, name: &str) -> Option<EntityId> {
        let column = self.typed_column::<Name>()?;
        column
            .iter()
            .filter(|(e, n)| n.0 == name && self.is_alive(*e))
            .map(|(e, _)| e)
            .min_by_key(|e| e.index())
    }

    /// Whether systems currently dispatch to `entity`: it is alive and its
    /// scene (if any) is active.
    pub fn is_ticking(&self, entity: EntityId) -> bool {
        match self.record(entity) {
            Some(record) => record
                .scene
                .map_or(true, |s| self.scenes.get(&s).is_some_and(|scene| scene.state.is_ticking())),
            None => false,
        }
    }

    pub(crate) fn record(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.allocator
            .is_alive(entity)
            .then(|| &self.records[entity.index() as usize])
    }

    /// Record of a live entity that is not being torn down.
    pub(crate) fn live_record(&self, entity: EntityId) -> Result<&EntityRecord, EcsError> {
        match self.record(entity) {
            Some(record) if !record.removing => Ok(record),
            _ => Err(EcsError::StaleEntity { entity }),
        }
    }

    // -- component storage ---------------------------------------------------

    fn column_mut(&mut self, id: ComponentTypeId) -> &mut Box<dyn ComponentColumn> {
        let registry = &self.registry;
        self.columns[id.index()].get_or_insert_with(|| (registry.vtable(id).new_column)())
    }

    fn typed_column<T: 'static>(&self) -> Option<&SparseColumn<T>> {
        let id = self.registry.lookup::<T>()?;
        self.columns[id.index()].as_ref()?.as_any().downcast_ref::<SparseColumn<T>>()
    }

    fn typed_column_mut<T: 'static>(&mut self) -> Option<&mut SparseColumn<T>> {
        let id = self.registry.lookup::<T>()?;
        self.columns[id.index()].as_mut()?.as_any_mut().downcast_mut::<SparseColumn<T>>()
    }

    fn type_id_of<T: 'static>(&self) -> Result<ComponentTypeId, EcsError> {
        self.registry.lookup::<T>().ok_or_else(|| EcsError::UnknownComponent {
            name: std::any::type_name::<T>().to_owned(),
            registered: self.registry.registered_names().join(", "),
        })
    }

    /// Store a value and update the mask, without evaluating samples.
    /// Returns the previous value when overwriting.
    pub(crate) fn attach_raw(
        &mut self,
        entity: EntityId,
        id: ComponentTypeId,
        value: BoxedComponent,
    ) -> Result<Option<BoxedComponent>, EcsError> {
        self.live_record(entity)?;
        let Ok(previous) = self.column_mut(id).insert_boxed(entity, value) else {
            return Err(EcsError::ComponentTypeMismatch {
                component: self.registry.get_info(id).map(|i| i.name.clone()).unwrap_or_default(),
            });
        };
        self.records[entity.index() as usize].mask.insert(id);
        Ok(previous)
    }

    /// Drop a value and update the mask, without evaluating samples.
    pub(crate) fn detach_raw(&mut self, entity: EntityId, id: ComponentTypeId) -> Result<Option<BoxedComponent>, EcsError> {
        self.live_record(entity)?;
        let removed = self.columns[id.index()].as_mut().and_then(|c| c.remove(entity));
        self.records[entity.index() as usize].mask.remove(id);
        Ok(removed)
    }

    /// Re-evaluate the samples watching `changed` for `entity` and publish
    /// the membership flips.
    pub(crate) fn settle(&mut self, entity: EntityId, changed: ComponentMask, activity: bool) {
        let Some(record) = self.record(entity) else {
            return;
        };
        if record.removing || (changed.is_empty() && !activity) {
            return;
        }
        let (mask, active) = (record.mask, record.active_in_hierarchy);
        let mut changes = Vec::new();
        self.samples.reevaluate(entity, &mask, active, &changed, activity, &mut changes);
        self.raise_sample_changes(changes);
    }

    /// Raise the events for `changes`. A change that an earlier handler has
    /// already undone or superseded is dropped, so every event matches the
    /// membership at the moment it is raised.
    pub(crate) fn raise_sample_changes(&mut self, changes: Vec<SampleChange>) {
        for change in changes {
            let member = self
                .samples
                .get(change.sample)
                .is_some_and(|sample| sample.contains(change.entity));
            if member != change.added {
                tracing::trace!(entity = %change.entity, sample = %change.sample, "sample change superseded by a handler");
                continue;
            }
            tracing::trace!(entity = %change.entity, sample = %change.sample, added = change.added, "sample membership changed");
            if change.added {
                self.emit(EntityAddedToSample {
                    sample: change.sample,
                    entity: change.entity,
                });
            } else {
                self.emit(EntityRemovedFromSample {
                    sample: change.sample,
                    entity: change.entity,
                });
            }
        }
    }

    /// Attach `value` to `entity`, replacing (and returning) an existing value
    /// of the same type. Samples are updated before this returns.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, value: T) -> Result<Option<T>, EcsError> {
        let id = self.type_id_of::<T>()?;
        let had = self.live_record(entity)?.mask.contains(id);
        let previous = self.attach_raw(entity, id, Box::new(value))?;
        if !had {
            self.settle(entity, [id].into_iter().collect(), false);
        }
        Ok(previous.and_then(|b| b.downcast::<T>().ok()).map(|b| *b))
    }

    /// Detach the `T` of `entity`, returning it if present.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<Option<T>, EcsError> {
        let id = self.type_id_of::<T>()?;
        if !self.live_record(entity)?.mask.contains(id) {
            return Ok(None);
        }
        let removed = self.detach_raw(entity, id)?;
        self.settle(entity, [id].into_iter().collect(), false);
        Ok(removed.and_then(|b| b.downcast::<T>().ok()).map(|b| *b))
    }

    pub fn get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.typed_column::<T>()?.get(entity)
    }

    /// Mutable access to a component value. Not a structural change.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.typed_column_mut::<T>()?.get_mut(entity)
    }

    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        match (self.registry.lookup::<T>(), self.record(entity)) {
            (Some(id), Some(record)) => record.mask.contains(id),
            _ => false,
        }
    }

    /// Entities owning a `T`, with their values, in storage order.
    pub fn iter_component<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.typed_column::<T>().into_iter().flat_map(|c| c.iter())
    }

    /// Start a batch of component changes on `entity`; samples are evaluated
    /// once, for the net result, when the editor is dropped.
    pub fn edit(&mut self, entity: EntityId) -> Result<EntityEditor<'_>, EcsError> {
        let before = self.live_record(entity)?.mask;
        Ok(EntityEditor {
            world: self,
            entity,
            before,
        })
    }

    // -- reflection access ---------------------------------------------------

    /// Attach a default-constructed component by registered name.
    pub fn add_component_by_name(&mut self, entity: EntityId, name: &str) -> Result<(), EcsError> {
        let id = self.registry.resolve(name)?;
        let had = self.live_record(entity)?.mask.contains(id);
        let value = (self.registry.vtable(id).default_value)();
        self.attach_raw(entity, id, value)?;
        if !had {
            self.settle(entity, [id].into_iter().collect(), false);
        }
        Ok(())
    }

    /// Returns whether the entity had the component.
    pub fn remove_component_by_name(&mut self, entity: EntityId, name: &str) -> Result<bool, EcsError> {
        let id = self.registry.resolve(name)?;
        if !self.live_record(entity)?.mask.contains(id) {
            return Ok(false);
        }
        self.detach_raw(entity, id)?;
        self.settle(entity, [id].into_iter().collect(), false);
        Ok(true)
    }

    pub fn has_component_by_name(&self, entity: EntityId, name: &str) -> bool {
        match (self.registry.lookup_by_name(name), self.record(entity)) {
            (Some(id), Some(record)) => record.mask.contains(id),
            _ => false,
        }
    }

    /// Registered names of the components on `entity`, in id order.
    pub fn component_names(&self, entity: EntityId) -> Vec<&str> {
        self.record(entity)
            .map(|r| {
                r.mask
                    .iter()
                    .filter_map(|id| self.registry.get_info(id).map(|i| i.name.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serialize a component of `entity`; `Ok(None)` if it has none.
    pub fn component_json(&self, entity: EntityId, name: &str) -> Result<Option<serde_json::Value>, EcsError> {
        let id = self.registry.resolve(name)?;
        let Some(value) = self.component_any(entity, id) else {
            return Ok(None);
        };
        (self.registry.vtable(id).to_json)(value)
            .map(Some)
            .map_err(|details| EcsError::ComponentDeserialization {
                component: name.to_owned(),
                details,
            })
    }

    /// Decode `value` and attach it (adding or overwriting) by name.
    pub fn set_component_json(&mut self, entity: EntityId, name: &str, value: &serde_json::Value) -> Result<(), EcsError> {
        let id = self.registry.resolve(name)?;
        let had = self.live_record(entity)?.mask.contains(id);
        let boxed = (self.registry.vtable(id).from_json)(value).map_err(|details| EcsError::ComponentDeserialization {
            component: name.to_owned(),
            details,
        })?;
        self.attach_raw(entity, id, boxed)?;
        if !had {
            self.settle(entity, [id].into_iter().collect(), false);
        }
        Ok(())
    }

    /// Read one top-level property of a component as JSON.
    pub fn get_property(&self, entity: EntityId, component: &str, property: &str) -> Result<serde_json::Value, EcsError> {
        let json = self.component_json(entity, component)?.ok_or_else(|| EcsError::MissingComponent {
            entity,
            component: component.to_owned(),
        })?;
        json.get(property).cloned().ok_or_else(|| EcsError::UnknownProperty {
            component: component.to_owned(),
            property: property.to_owned(),
        })
    }

    /// Overwrite one top-level property of a component. The updated value
    /// must still decode as the component type.
    pub fn set_property(
        &mut self,
        entity: EntityId,
        component: &str,
        property: &str,
        value: serde_json::Value,
    ) -> Result<(), EcsError> {
        let mut json = self.component_json(entity, component)?.ok_or_else(|| EcsError::MissingComponent {
            entity,
            component: component.to_owned(),
        })?;
        match json.get_mut(property) {
            Some(slot) => *slot = value,
            None => {
                return Err(EcsError::UnknownProperty {
                    component: component.to_owned(),
                    property: property.to_owned(),
                })
            }
        }
        self.set_component_json(entity, component, &json)
    }

    pub(crate) fn component_any(&self, entity: EntityId, id: ComponentTypeId) -> Option<&dyn Any> {
        self.columns.get(id.index())?.as_ref()?.get_any(entity)
    }

    // -- samples -------------------------------------------------------------

    /// Start a signature over this world's registry.
    pub fn signature(&self) -> SignatureBuilder<'_> {
        Signature::builder(&self.registry)
    }

    /// The sample for `signature`, created (and filled from the live
    /// entities) on first request. Equal signatures share one sample.
    pub fn sample(&mut self, signature: Signature) -> SampleId {
        if let Some(id) = self.samples.find(&signature) {
            return id;
        }
        let id = self.samples.create(signature);
        let live: Vec<EntityId> = self.allocator.iter_alive().collect();
        for entity in live {
            let record = &self.records[entity.index() as usize];
            if !record.removing && signature.matches(&record.mask, record.active_in_hierarchy) {
                self.samples.seed(id, entity);
            }
        }
        tracing::debug!(world = %self.name, sample = %id, ?signature, "sample created");
        id
    }

    pub fn get_sample(&self, id: SampleId) -> Option<&Sample> {
        self.samples.get(id)
    }

    /// The existing sample for `signature`, if one was requested before.
    pub fn find_sample(&self, signature: &Signature) -> Option<&Sample> {
        self.samples.find(signature).and_then(|id| self.samples.get(id))
    }

    /// Members of a sample as an owned list, safe to iterate while mutating
    /// the world.
    pub fn sample_entities(&self, id: SampleId) -> Vec<EntityId> {
        self.samples.get(id).map(|s| s.entities().to_vec()).unwrap_or_default()
    }

    /// Every sample in creation order.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    // -- events --------------------------------------------------------------

    /// Register a subscriber identity; `label` only shows up in logs.
    pub fn register_receiver(&mut self, label: &str) -> ReceiverId {
        self.events.register_receiver(label)
    }

    /// Forget a receiver. It must have no live subscriptions left.
    pub fn release_receiver(&mut self, receiver: ReceiverId) {
        self.events.release_receiver(receiver)
    }

    /// Call `handler` for every `E` emitted from now on. Handlers may mutate the world.
    pub fn subscribe<E, F>(&mut self, receiver: ReceiverId, handler: F) -> SubscriptionId
    where
        E: Any + Send + Sync,
        F: Fn(&mut World, &E) + Send + Sync + 'static,
    {
        self.events.subscribe::<E>(receiver, Arc::new(handler))
    }

    /// Subscribe to events sent to entities with [`send_to`](Self::send_to).
    pub fn subscribe_targeted<E, F>(&mut self, receiver: ReceiverId, handler: F) -> SubscriptionId
    where
        E: Any + Send + Sync,
        F: Fn(&mut World, &Targeted<E>) + Send + Sync + 'static,
    {
        self.events.subscribe::<Targeted<E>>(receiver, Arc::new(handler))
    }

    /// Drop one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.events.unsubscribe(subscription)
    }

    /// Drop every subscription held by `receiver`, returning how many there were.
    pub fn unsubscribe_all(&mut self, receiver: ReceiverId) -> usize {
        self.events.unsubscribe_all(receiver)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Deliver `event` to every subscriber, in subscription order.
    ///
    /// Handlers subscribed during the dispatch do not see this event;
    /// handlers unsubscribed during it are skipped.
    pub fn emit<E: Any + Send + Sync>(&mut self, event: E) {
        let handlers = self.events.handlers::<E>();
        for (subscription, handler) in handlers {
            if self.events.is_live(subscription) {
                handler(self, &event);
            }
        }
    }

    /// Deliver `event` to the subscribers of `Targeted<E>` if `target` is
    /// alive. Returns whether it was delivered.
    pub fn send_to<E: Any + Send + Sync>(&mut self, target: EntityId, event: E) -> bool {
        if !self.is_alive(target) {
            tracing::trace!(entity = %target, "dropping event for dead entity");
            return false;
        }
        self.emit(Targeted { target, event });
        true
    }

    // -- systems -------------------------------------------------------------

    /// Register a system. A descriptor with a signature binds the system to
    /// the matching sample.
    pub fn register_system<S>(&mut self, descriptor: SystemDescriptor, body: S) -> Result<(), EcsError>
    where
        S: SystemCallable + 'static,
    {
        self.register_system_shared(descriptor, Arc::new(body))
    }

    /// Like [`register_system`](Self::register_system) for a body shared between worlds.
    pub fn register_system_shared(
        &mut self,
        descriptor: SystemDescriptor,
        body: Arc<dyn SystemCallable>,
    ) -> Result<(), EcsError> {
        if self.destroyed {
            return Err(EcsError::WorldDestroyed { world: self.name.clone() });
        }
        let sample = descriptor.signature.map(|sig| self.sample(sig));
        self.scheduler.register(descriptor, body, sample)
    }

    /// Replace an existing system in place (hot reload).
    pub fn replace_system(&mut self, descriptor: SystemDescriptor, body: Arc<dyn SystemCallable>) -> Result<(), EcsError> {
        let sample = descriptor.signature.map(|sig| self.sample(sig));
        self.scheduler.replace(descriptor, body, sample)
    }

    /// Remove a system, handing back its descriptor.
    pub fn unregister_system(&mut self, name: &str) -> Result<SystemDescriptor, EcsError> {
        self.scheduler.unregister(name)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// System names of `phase` in dispatch order. Fails on dependency cycles.
    pub fn compute_schedule(&mut self, phase: Phase) -> Result<Vec<String>, EcsError> {
        self.scheduler.compute_schedule(phase)
    }

    /// Run one frame: for each phase, raise its event and then run its
    /// systems in schedule order.
    ///
    /// All three phase orders are derived before anything runs, so a
    /// constraint cycle fails the frame without executing any system.
    pub fn tick(&mut self, dt: f32) -> Result<(), EcsError> {
        if self.destroyed {
            return Err(EcsError::WorldDestroyed { world: self.name.clone() });
        }
        let plans = [
            self.scheduler.plan(Phase::PreUpdate)?,
            self.scheduler.plan(Phase::Update)?,
            self.scheduler.plan(Phase::PostUpdate)?,
        ];
        for (phase, plan) in Phase::ALL.into_iter().zip(plans) {
            match phase {
                Phase::PreUpdate => self.emit(PreUpdate { dt }),
                Phase::Update => self.emit(Update { dt }),
                Phase::PostUpdate => self.emit(PostUpdate { dt }),
            }
            for system in plan {
                if !self.playing && !system.enable_in_editor {
                    continue;
                }
                let entities: Vec<EntityId> = match system.sample {
                    Some(sample) => self
                        .sample_entities(sample)
                        .into_iter()
                        .filter(|&e| self.is_ticking(e))
                        .collect(),
                    None => Vec::new(),
                };
                let ctx = SystemContext {
                    system: system.name,
                    phase,
                    dt,
                    frame: self.frame,
                    entities,
                };
                let _span = tracing::trace_span!("system", name = %ctx.system, %phase).entered();
                system.body.run(self, &ctx);
            }
        }
        self.frame += 1;
        Ok(())
    }

    /// Remove every entity (with the usual events), unload every scene and
    /// mark the world destroyed.
    pub fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        let scenes: Vec<SceneId> = self.scenes.keys().copied().collect();
        for scene in scenes {
            if let Err(err) = self.unload_scene(scene) {
                tracing::warn!(world = %self.name, %scene, error = %err, "scene did not unload cleanly");
            }
        }
        let roots: Vec<EntityId> = self.entities().filter(|&e| self.parent(e).is_none()).collect();
        for entity in roots {
            self.remove_entity(entity, RemovalPolicy::Cascade);
        }
        self.samples.clear_members();
        self.destroyed = true;
        tracing::info!(world = %self.name, frames = self.frame, "world destroyed");
    }
}

// ---------------------------------------------------------------------------
// EntityEditor
// ---------------------------------------------------------------------------

/// Batched component changes on one entity. Samples see only the net change,
/// evaluated when the editor is dropped.
pub struct EntityEditor<'w> {
    world: &'w mut World,
    entity: EntityId,
    before: ComponentMask,
}

impl<'w> EntityEditor<'w> {
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Attach or overwrite `T` without re-evaluating samples yet.
    pub fn insert<T: Component>(&mut self, value: T) -> Result<&mut Self, EcsError> {
        let id = self.world.type_id_of::<T>()?;
        self.world.attach_raw(self.entity, id, Box::new(value))?;
        Ok(self)
    }

    /// Detach `T`; missing components are ignored.
    pub fn remove<T: Component>(&mut self) -> Result<&mut Self, EcsError> {
        let id = self.world.type_id_of::<T>()?;
        self.world.detach_raw(self.entity, id)?;
        Ok(self)
    }

    /// Attach a component by registered name from its JSON form.
    pub fn insert_json(&mut self, name: &str, value: &serde_json::Value) -> Result<&mut Self, EcsError> {
        let id = self.world.registry.resolve(name)?;
        let boxed = (self.world.registry.vtable(id).from_json)(value).map_err(|details| {
            EcsError::ComponentDeserialization {
                component: name.to_owned(),
                details,
            }
        })?;
        self.world.attach_raw(self.entity, id, boxed)?;
        Ok(self)
    }

    pub fn world(&self) -> &World {
        self.world
    }
}

impl Drop for EntityEditor<'_> {
    fn drop(&mut self) {
        let Some(after) = self.world.component_mask(self.entity) else {
            return;
        };
        let before = self.before;
        let changed = (before & !after) | (after & !before);
        self.world.settle(self.entity, changed, false);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

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

    fn setup_world() -> World {
        let mut registry = ComponentRegistry::new();
        registry.register::<Position>("position");
        registry.register::<Velocity>("velocity");
        World::new("test", Arc::new(registry))
    }

    #[test]
    fn add_get_remove_component() {
        let mut world = setup_world();
        let e = world.create_entity();
        assert_eq!(world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap(), None);
        assert_eq!(world.get_component::<Position>(e), Some(&Position { x: 1.0, y: 2.0 }));
        assert_eq!(
            world.add_component(e, Position { x: 3.0, y: 4.0 }).unwrap(),
            Some(Position { x: 1.0, y: 2.0 })
        );
        assert_eq!(world.remove_component::<Position>(e).unwrap(), Some(Position { x: 3.0, y: 4.0 }));
        assert!(!world.has_component::<Position>(e));
        assert_eq!(world.remove_component::<Position>(e).unwrap(), None);
    }

    #[test]
    fn stale_entity_is_rejected_without_aliasing() {
        let mut world = setup_world();
        let old = world.spawn_with(Position { x: 1.0, y: 1.0 });
        assert!(world.remove_entity(old, RemovalPolicy::Cascade));
        let new = world.spawn_with(Position { x: 9.0, y: 9.0 });
        assert_eq!(old.index(), new.index());

        assert!(!world.remove_entity(old, RemovalPolicy::Cascade));
        assert!(world.get_component::<Position>(old).is_none());
        assert!(matches!(
            world.add_component(old, Velocity::default()),
            Err(EcsError::StaleEntity { .. })
        ));
        assert_eq!(world.get_component::<Position>(new), Some(&Position { x: 9.0, y: 9.0 }));
        assert!(!world.has_component::<Velocity>(new));
    }

    #[test]
    fn sample_tracks_component_changes() {
        let mut world = setup_world();
        let sig = world.signature().with::<Position>().with::<Velocity>().build();
        let sample = world.sample(sig);
        let e = world.create_entity();
        world.add_component(e, Position::default()).unwrap();
        assert!(!world.get_sample(sample).unwrap().contains(e));
        world.add_component(e, Velocity::default()).unwrap();
        assert!(world.get_sample(sample).unwrap().contains(e));
        world.remove_component::<Position>(e).unwrap();
        assert!(!world.get_sample(sample).unwrap().contains(e));
    }

    #[test]
    fn late_sample_is_seeded_from_existing_entities() {
        let mut world = setup_world();
        let a = world.spawn_with(Position::default());
        let _b = world.spawn_with(Velocity::default());
        let sig = world.signature().with::<Position>().build();
        let sample = world.sample(sig);
        assert_eq!(world.sample_entities(sample), vec![a]);
        assert_eq!(world.sample(sig), sample);
    }

    #[test]
    fn editor_evaluates_net_change_once() {
        let mut world = setup_world();
        let sig = world.signature().with::<Position>().build();
        let sample = world.sample(sig);
        let events = Arc::new(Mutex::new(Vec::new()));
        let receiver = world.register_receiver("test");
        let sink = Arc::clone(&events);
        world.subscribe(receiver, move |_: &mut World, ev: &EntityAddedToSample| {
            sink.lock().unwrap().push(("added", ev.entity));
        });
        let sink = Arc::clone(&events);
        world.subscribe(receiver, move |_: &mut World, ev: &EntityRemovedFromSample| {
            sink.lock().unwrap().push(("removed", ev.entity));
        });

        let e = world.create_entity();
        {
            let mut edit = world.edit(e).unwrap();
            edit.insert(Position::default()).unwrap();
            edit.remove::<Position>().unwrap();
        }
        assert!(events.lock().unwrap().is_empty());
        assert!(!world.get_sample(sample).unwrap().contains(e));

        {
            let mut edit = world.edit(e).unwrap();
            edit.insert(Position::default()).unwrap().insert(Velocity::default()).unwrap();
        }
        assert_eq!(*events.lock().unwrap(), vec![("added", e)]);
        world.unsubscribe_all(receiver);
        world.release_receiver(receiver);
    }

    #[test]
    fn json_and_property_access() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.add_component_by_name(e, "position").unwrap();
        assert_eq!(world.get_component::<Position>(e), Some(&Position::default()));

        world.set_property(e, "position", "x", serde_json::json!(5.0)).unwrap();
        assert_eq!(world.get_property(e, "position", "x").unwrap(), serde_json::json!(5.0));
        assert!(matches!(
            world.get_property(e, "position", "z"),
            Err(EcsError::UnknownProperty { .. })
        ));
        assert!(matches!(
            world.set_component_json(e, "velocity", &serde_json::json!({"dx": "fast"})),
            Err(EcsError::ComponentDeserialization { .. })
        ));
        assert!(matches!(
            world.component_json(e, "mass"),
            Err(EcsError::UnknownComponent { .. })
        ));
        assert_eq!(world.component_names(e), vec!["position"]);
        assert!(world.remove_component_by_name(e, "position").unwrap());
        assert!(!world.remove_component_by_name(e, "position").unwrap());
    }

    #[test]
    fn find_entity_by_name_uses_builtin_name() {
        let mut world = setup_world();
        let _a = world.spawn_with(Name::new("camera"));
        let b = world.spawn_with(Name::new("player"));
        assert_eq!(world.find_entity_by_name("player"), Some(b));
        assert_eq!(world.find_entity_by_name("ghost"), None);
    }

    #[test]
    fn unicast_events_reach_live_targets_only() {
        let mut world = setup_world();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let receiver = world.register_receiver("damage");
        let sink = Arc::clone(&hits);
        world.subscribe_targeted(receiver, move |_: &mut World, ev: &Targeted<u32>| {
            sink.lock().unwrap().push((ev.target, ev.event));
        });
        let e = world.create_entity();
        assert!(world.send_to(e, 7u32));
        world.remove_entity(e, RemovalPolicy::Cascade);
        assert!(!world.send_to(e, 8u32));
        assert_eq!(*hits.lock().unwrap(), vec![(e, 7)]);
        world.unsubscribe_all(receiver);
        world.release_receiver(receiver);
    }

    #[test]
    fn shutdown_removes_everything() {
        let mut world = setup_world();
        let parent = world.spawn_with(Position::default());
        world.spawn_in(None, Some(parent), ComponentBundle::new()).unwrap();
        world.shutdown();
        assert!(world.is_destroyed());
        assert_eq!(world.entity_count(), 0);
        assert!(matches!(world.tick(0.016), Err(EcsError::WorldDestroyed { .. })));
    }

    #[test]
    fn entity_removed_by_its_added_handler_joins_no_sample() {
        let mut world = setup_world();
        let every = world.sample(crate::signature::Signature::new());
        let positioned = world.sample(world.signature().with::<Position>().build());
        let parent = world.create_entity();
        let reparented = Arc::new(Mutex::new(0));

        let receiver = world.register_receiver("reaper");
        let removals = world.subscribe(receiver, move |w: &mut World, ev: &crate::event::EntityAdded| {
            w.remove_entity(ev.entity, RemovalPolicy::Cascade);
        });
        let sink = Arc::clone(&reparented);
        world.subscribe(receiver, move |_: &mut World, _: &crate::event::ParentChanged| {
            *sink.lock().unwrap() += 1;
        });

        let bundle = ComponentBundle::new().with(world.registry(), Position::default());
        let doomed = world.spawn_in(None, Some(parent), bundle).unwrap();
        assert!(!world.is_alive(doomed));
        assert!(world.sample_entities(every).iter().all(|&e| world.is_alive(e)));
        assert!(world.sample_entities(positioned).is_empty());
        assert!(world.children(parent).is_empty());
        assert_eq!(*reparented.lock().unwrap(), 0);

        // The recycled slot must not inherit the dead entity's membership.
        world.unsubscribe(removals);
        let reused = world.create_entity();
        assert_eq!(reused.index(), doomed.index());
        assert!(!world.sample_entities(positioned).contains(&reused));
        assert_eq!(world.sample_entities(every).len(), world.entity_count());

        world.unsubscribe_all(receiver);
        world.release_receiver(receiver);
    }

    #[test]
    fn inactive_bundle_spawns_without_sample_churn() {
        let mut world = setup_world();
        let visible = world.sample(world.signature().with::<Position>().active_only().build());
        let log = Arc::new(Mutex::new(Vec::new()));

        let receiver = world.register_receiver("log");
        let sink = Arc::clone(&log);
        world.subscribe(receiver, move |_: &mut World, ev: &crate::event::EntityAddedToSample| {
            sink.lock().unwrap().push(format!("add {}", ev.entity));
        });
        let sink = Arc::clone(&log);
        world.subscribe(receiver, move |_: &mut World, ev: &crate::event::EntityRemovedFromSample| {
            sink.lock().unwrap().push(format!("remove {}", ev.entity));
        });

        let bundle = ComponentBundle::new().with(world.registry(), Position::default()).inactive();
        assert!(!bundle.is_active());
        let hidden = world.spawn_bundle(bundle);
        assert!(!world.is_active_self(hidden));
        assert!(world.sample_entities(visible).is_empty());
        assert!(log.lock().unwrap().is_empty());

        world.set_active(hidden, true).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![format!("add {hidden}")]);

        world.unsubscribe_all(receiver);
        world.release_receiver(receiver);
    }

    #[test]
    fn handler_changes_during_propagation_are_not_reannounced() {
        let mut world = setup_world();
        let visible = world.sample(world.signature().with::<Position>().active_only().build());
        let root = world.create_entity();
        let a = world.spawn_child(root, ComponentBundle::new().with(world.registry(), Position::default())).unwrap();
        let b = world.spawn_child(root, ComponentBundle::new().with(world.registry(), Position::default())).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let receiver = world.register_receiver("observer");
        // Deactivating `a` drags its sibling out of the world before the
        // sibling's own events are raised.
        let sink = Arc::clone(&log);
        world.subscribe(receiver, move |w: &mut World, ev: &crate::event::EntityActiveChanged| {
            sink.lock().unwrap().push(format!("active {} {}", ev.entity, ev.active));
            if ev.entity == a && !ev.active {
                w.remove_entity(b, RemovalPolicy::Cascade);
            }
        });
        let sink = Arc::clone(&log);
        world.subscribe(receiver, move |_: &mut World, ev: &crate::event::EntityRemovedFromSample| {
            sink.lock().unwrap().push(format!("left {}", ev.entity));
        });

        world.set_active(root, false).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                format!("active {root} false"),
                format!("active {a} false"),
                format!("left {a}"),
                format!("left {b}"),
            ]
        );
        assert!(world.sample_entities(visible).is_empty());

        world.unsubscribe_all(receiver);
        world.release_receiver(receiver);
    }

    #[test]
    fn reactivation_by_a_handler_cancels_pending_removals() {
        let mut world = setup_world();
        let visible = world.sample(world.signature().with::<Position>().active_only().build());
        let root = world.create_entity();
        let a = world.spawn_child(root, ComponentBundle::new().with(world.registry(), Position::default())).unwrap();
        let b = world.spawn_child(root, ComponentBundle::new().with(world.registry(), Position::default())).unwrap();
        let left = Arc::new(Mutex::new(Vec::new()));

        let receiver = world.register_receiver("undo");
        world.subscribe(receiver, move |w: &mut World, ev: &crate::event::EntityActiveChanged| {
            if ev.entity == a && !ev.active {
                w.set_active(root, true).unwrap();
            }
        });
        let sink = Arc::clone(&left);
        world.subscribe(receiver, move |_: &mut World, ev: &crate::event::EntityRemovedFromSample| {
            sink.lock().unwrap().push(ev.entity);
        });

        world.set_active(root, false).unwrap();
        // `b` never saw its removal announced; membership is back to full.
        assert!(!left.lock().unwrap().contains(&b));
        assert!(world.is_active_in_hierarchy(b));
        let mut members = world.sample_entities(visible);
        members.sort();
        assert_eq!(members, vec![a, b]);

        world.unsubscribe_all(receiver);
        world.release_receiver(receiver);
    }
}
