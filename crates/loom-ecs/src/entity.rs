//! Entity handles and the slot table behind them.
//!
//! Each entity lives in a numbered slot. Freeing a slot bumps its generation,
//! and an [`EntityId`] names a slot *and* the generation it was issued for, so
//! a handle held past removal is recognised as stale instead of reaching the
//! next occupant.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Handle to an entity: slot index plus the slot generation it was issued for.
///
/// Ordering is by slot index first, which is the order snapshots and hashes
/// walk entities in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity[{}#{}]", self.index, self.generation)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// Slot table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    occupied: bool,
}

/// Hands out [`EntityId`]s and tells live handles from stale ones.
///
/// Vacated slots are reused oldest-first, which spreads generation bumps
/// across the table.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    vacant: VecDeque<u32>,
    live: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a handle, reusing a vacated slot when one exists.
    ///
    /// # Panics
    ///
    /// When every addressable slot is occupied. Exhausting the slot space is
    /// fatal.
    pub fn allocate(&mut self) -> EntityId {
        let index = match self.vacant.pop_front() {
            Some(index) => index,
            None => {
                let next = u32::try_from(self.slots.len())
                    .ok()
                    .filter(|&i| i != u32::MAX)
                    .expect("entity slot space exhausted");
                self.slots.push(Slot {
                    generation: 0,
                    occupied: false,
                });
                next
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.occupied = true;
        self.live += 1;
        EntityId::new(index, slot.generation)
    }

    /// Vacate the slot of `id`. Every copy of `id` is stale afterwards.
    ///
    /// Returns `false` when `id` was already stale.
    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let slot = &mut self.slots[id.index() as usize];
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push_back(id.index());
        self.live -= 1;
        true
    }

    #[inline]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|slot| slot.occupied && slot.generation == id.generation())
    }

    /// The handle currently occupying `index`, if the slot is in use.
    pub fn occupant(&self, index: u32) -> Option<EntityId> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.occupied)
            .map(|slot| EntityId::new(index, slot.generation))
    }

    /// Slots ever created, occupied or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn alive_count(&self) -> usize {
        self.live
    }

    /// Live handles in slot order.
    pub fn iter_alive(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.occupied)
            .map(|(index, slot)| EntityId::new(index as u32, slot.generation))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
