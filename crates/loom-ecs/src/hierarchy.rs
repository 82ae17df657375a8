//! Parent/child links and active-state propagation.
//!
//! Links are plain [`EntityId`]s stored in the entity records; the world owns
//! every entity by slot, so parent and child references never own anything.
//! Child order is significant and preserved.
//!
//! An entity is *active in hierarchy* when its own flag and the flags of all
//! its ancestors are set. Changing a flag or re-parenting recomputes the
//! subtree eagerly, parent before child, and raises [`EntityActiveChanged`]
//! only for entities whose effective state flipped.

use crate::component::{BoxedComponent, ComponentTypeId};
use crate::entity::EntityId;
use crate::event::{ChildrenChanged, EntityActiveChanged, ParentChanged};
use crate::sample::SampleChange;
use crate::signature::ComponentMask;
use crate::world::{ComponentBundle, World};
use crate::EcsError;

impl World {
    /// Parent of `entity`, `None` for roots and stale ids.
    pub fn parent(&self, entity: EntityId) -> Option<EntityId> {
        self.record(entity).and_then(|r| r.parent)
    }

    /// Children in order; empty for stale ids.
    pub fn children(&self, entity: EntityId) -> &[EntityId] {
        self.record(entity).map_or(&[], |r| r.children.as_slice())
    }

    /// Live entities without a parent, in slot order.
    pub fn root_entities(&self) -> Vec<EntityId> {
        self.entities().filter(|&e| self.parent(e).is_none()).collect()
    }

    /// All descendants of `entity`, depth-first, parent before child.
    pub fn descendants(&self, entity: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack: Vec<EntityId> = self.children(entity).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// `true` if `ancestor` is `entity` or lies on its parent chain.
    pub fn is_ancestor_of(&self, ancestor: EntityId, entity: EntityId) -> bool {
        let mut cursor = Some(entity);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Move `child` under `parent` (appended last), or to the root with
    /// `None`. Refuses links that would make an entity its own ancestor.
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<(), EcsError> {
        let old_parent = self.live_record(child)?.parent;
        if let Some(parent) = parent {
            self.live_record(parent)?;
            if self.is_ancestor_of(child, parent) {
                return Err(EcsError::HierarchyCycle { entity: child, parent });
            }
        }
        if old_parent == parent {
            return Ok(());
        }

        if let Some(old) = old_parent {
            self.records[old.index() as usize].children.retain(|&c| c != child);
        }
        if let Some(new) = parent {
            self.records[new.index() as usize].children.push(child);
        }
        self.records[child.index() as usize].parent = parent;
        tracing::trace!(entity = %child, ?old_parent, new_parent = ?parent, "entity re-parented");

        self.emit(ParentChanged {
            entity: child,
            old_parent,
            new_parent: parent,
        });
        for changed in [old_parent, parent].into_iter().flatten() {
            if self.is_alive(changed) {
                self.emit(ChildrenChanged { entity: changed });
            }
        }
        if self.is_alive(child) {
            self.refresh_activity(child);
        }
        Ok(())
    }

    /// Create an entity under `parent`, in the parent's scene.
    pub fn spawn_child(&mut self, parent: EntityId, bundle: ComponentBundle) -> Result<EntityId, EcsError> {
        self.spawn_in(None, Some(parent), bundle)
    }

    /// The entity's own active flag, ignoring its ancestors.
    pub fn is_active_self(&self, entity: EntityId) -> bool {
        self.record(entity).is_some_and(|r| r.active_self)
    }

    /// Active itself and through every ancestor. `false` for stale ids.
    pub fn is_active_in_hierarchy(&self, entity: EntityId) -> bool {
        self.record(entity).is_some_and(|r| r.active_in_hierarchy)
    }

    /// Set the entity's own active flag and propagate to its subtree.
    pub fn set_active(&mut self, entity: EntityId, active: bool) -> Result<(), EcsError> {
        if self.live_record(entity)?.active_self == active {
            return Ok(());
        }
        self.records[entity.index() as usize].active_self = active;
        tracing::trace!(entity = %entity, active, "active flag set");
        self.refresh_activity(entity);
        Ok(())
    }

    /// Recompute `active_in_hierarchy` under `root` (inclusive).
    ///
    /// All flags and sample memberships are brought up to date first; events
    /// are raised afterwards, in depth-first order, so handlers observe a
    /// settled hierarchy.
    pub(crate) fn refresh_activity(&mut self, root: EntityId) {
        let mut flipped: Vec<(EntityId, bool, Vec<SampleChange>)> = Vec::new();
        let mut stack = vec![root];
        while let Some(entity) = stack.pop() {
            let idx = entity.index() as usize;
            let parent_active = self.records[idx]
                .parent
                .map_or(true, |p| self.records[p.index() as usize].active_in_hierarchy);
            let record = &self.records[idx];
            let effective = record.active_self && parent_active;
            if effective == record.active_in_hierarchy {
                // Unchanged here means unchanged below.
                continue;
            }
            let mask = record.mask;
            self.records[idx].active_in_hierarchy = effective;

            let mut changes = Vec::new();
            if !self.records[idx].removing {
                self.samples
                    .reevaluate(entity, &mask, effective, &ComponentMask::EMPTY, true, &mut changes);
            }
            flipped.push((entity, effective, changes));
            stack.extend(self.records[idx].children.iter().rev().copied());
        }

        for (entity, active, changes) in flipped {
            // An earlier handler may have removed or re-toggled this entity.
            if self.record(entity).is_some_and(|r| r.active_in_hierarchy == active) {
                self.emit(EntityActiveChanged { entity, active });
            }
            self.raise_sample_changes(changes);
        }
    }

    /// Deep-copy `source` and its subtree. The copy lands under `parent` (or
    /// at the root) in the source's scene, with child order preserved.
    pub fn clone_entity(&mut self, source: EntityId, parent: Option<EntityId>) -> Result<EntityId, EcsError> {
        let record = self.live_record(source)?;
        let (mask, active_self, scene) = (record.mask, record.active_self, record.scene);
        if let Some(parent) = parent {
            self.live_record(parent)?;
            if self.is_ancestor_of(source, parent) {
                return Err(EcsError::HierarchyCycle { entity: source, parent });
            }
        }

        let mut components: Vec<(ComponentTypeId, BoxedComponent)> = Vec::new();
        for id in mask.iter() {
            let Some(value) = self.component_any(source, id) else {
                continue;
            };
            match (self.registry().vtable(id).clone_value)(value) {
                Some(copy) => components.push((id, copy)),
                None => {
                    return Err(EcsError::ComponentTypeMismatch {
                        component: self.registry().get_info(id).map(|i| i.name.clone()).unwrap_or_default(),
                    })
                }
            }
        }

        let copy = self.spawn_raw(scene, parent, components, active_self);
        let children = self.children(source).to_vec();
        for child in children {
            self.clone_entity(child, Some(copy))?;
        }
        tracing::trace!(source = %source, copy = %copy, "entity cloned");
        Ok(copy)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
