//! Per-type component storage.
//!
//! Each registered component type gets one [`SparseColumn`]: a packed `Vec<T>`
//! of values, a parallel `Vec<EntityId>` of owners, and a sparse index keyed
//! by entity slot. Lookups compare the full generational id stored in the
//! owner list, so a column never hands out a value to a stale handle even if
//! the slot has been recycled.
//!
//! Columns are stored type-erased behind [`ComponentColumn`] so the world can
//! hold all of them in one `Vec` indexed by [`ComponentTypeId`].
//!
//! [`ComponentTypeId`]: crate::component::ComponentTypeId

use std::any::Any;

use crate::component::BoxedComponent;
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// ComponentColumn
// ---------------------------------------------------------------------------

/// Object-safe view over a [`SparseColumn<T>`] of unknown `T`.
pub(crate) trait ComponentColumn: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn contains(&self, entity: EntityId) -> bool;

    /// Remove and return the value owned by `entity`, if any.
    fn remove(&mut self, entity: EntityId) -> Option<BoxedComponent>;

    /// Insert (or overwrite) a boxed value, returning the previous one. Hands
    /// the box back if it does not hold this column's type.
    fn insert_boxed(
        &mut self,
        entity: EntityId,
        value: BoxedComponent,
    ) -> Result<Option<BoxedComponent>, BoxedComponent>;

    fn get_any(&self, entity: EntityId) -> Option<&dyn Any>;

    fn len(&self) -> usize;
}

// ---------------------------------------------------------------------------
// SparseColumn
// ---------------------------------------------------------------------------

/// Sparse-set storage for one component type.
pub(crate) struct SparseColumn<T> {
    dense: Vec<T>,
    owners: Vec<EntityId>,
    /// Entity slot index -> position in `dense`.
    sparse: Vec<Option<u32>>,
}

impl<T> SparseColumn<T> {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            owners: Vec::new(),
            sparse: Vec::new(),
        }
    }

    #[inline]
    fn slot(&self, entity: EntityId) -> Option<usize> {
        let pos = (*self.sparse.get(entity.index() as usize)?)? as usize;
        (self.owners[pos] == entity).then_some(pos)
    }

    pub fn get(&self, entity: EntityId) -> Option<&T> {
        self.slot(entity).map(|pos| &self.dense[pos])
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        self.slot(entity).map(|pos| &mut self.dense[pos])
    }

    /// Insert `value` for `entity`, returning the previous value if the
    /// entity already had one.
    ///
    /// A value still held by an older generation of the same slot is
    /// discarded.
    pub fn insert(&mut self, entity: EntityId, value: T) -> Option<T> {
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, None);
        }
        match self.sparse[idx] {
            Some(pos) if self.owners[pos as usize] == entity => {
                Some(std::mem::replace(&mut self.dense[pos as usize], value))
            }
            Some(pos) => {
                self.owners[pos as usize] = entity;
                self.dense[pos as usize] = value;
                None
            }
            None => {
                self.sparse[idx] = Some(self.dense.len() as u32);
                self.dense.push(value);
                self.owners.push(entity);
                None
            }
        }
    }

    pub fn take(&mut self, entity: EntityId) -> Option<T> {
        let pos = self.slot(entity)?;
        self.sparse[entity.index() as usize] = None;
        let value = self.dense.swap_remove(pos);
        self.owners.swap_remove(pos);
        if let Some(&moved) = self.owners.get(pos) {
            self.sparse[moved.index() as usize] = Some(pos as u32);
        }
        Some(value)
    }

    /// Iterate `(owner, value)` pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.owners.iter().copied().zip(self.dense.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.owners.iter().copied().zip(self.dense.iter_mut())
    }
}

impl<T: Send + Sync + 'static> ComponentColumn for SparseColumn<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn contains(&self, entity: EntityId) -> bool {
        self.slot(entity).is_some()
    }

    fn remove(&mut self, entity: EntityId) -> Option<BoxedComponent> {
        self.take(entity).map(|v| Box::new(v) as BoxedComponent)
    }

    fn insert_boxed(
        &mut self,
        entity: EntityId,
        value: BoxedComponent,
    ) -> Result<Option<BoxedComponent>, BoxedComponent> {
        let typed = value.downcast::<T>()?;
        Ok(self.insert(entity, *typed).map(|v| Box::new(v) as BoxedComponent))
    }

    fn get_any(&self, entity: EntityId) -> Option<&dyn Any> {
        self.get(entity).map(|v| v as &dyn Any)
    }

    fn len(&self) -> usize {
        self.dense.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
