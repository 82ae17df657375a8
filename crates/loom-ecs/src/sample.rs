//! Incrementally maintained entity samples.
//!
//! A [`Sample`] is the live result set of a [`Signature`]. Membership is never
//! recomputed by scanning the world: the world reports each entity whose
//! component set or hierarchy activity changed, and [`SampleSet`] narrows the
//! re-check to the samples that watch one of the changed components (or, for
//! activity changes, to the active-only samples).
//!
//! Member order is insertion order with swap-removal. It is deterministic for
//! a given operation sequence but carries no meaning.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::MAX_COMPONENTS;
use crate::entity::EntityId;
use crate::signature::{ComponentMask, Signature};

// ---------------------------------------------------------------------------
// SampleId
// ---------------------------------------------------------------------------

/// Handle to a sample owned by a world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId(pub(crate) u32);

impl SampleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SampleId({})", self.0)
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sample#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// The entities currently satisfying one signature.
#[derive(Debug, Clone)]
pub struct Sample {
    id: SampleId,
    signature: Signature,
    members: Vec<EntityId>,
    positions: HashMap<EntityId, usize>,
}

impl Sample {
    fn new(id: SampleId, signature: Signature) -> Self {
        Self {
            id,
            signature,
            members: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn id(&self) -> SampleId {
        self.id
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Membership test, constant time.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.positions.contains_key(&entity)
    }

    /// Members in admission order. Removal swaps the last member into the gap.
    pub fn entities(&self) -> &[EntityId] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.members.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn insert(&mut self, entity: EntityId) -> bool {
        if self.positions.contains_key(&entity) {
            return false;
        }
        self.positions.insert(entity, self.members.len());
        self.members.push(entity);
        true
    }

    fn remove(&mut self, entity: EntityId) -> bool {
        let Some(pos) = self.positions.remove(&entity) else {
            return false;
        };
        self.members.swap_remove(pos);
        if let Some(&moved) = self.members.get(pos) {
            self.positions.insert(moved, pos);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// SampleChange
// ---------------------------------------------------------------------------

/// One membership flip produced by [`SampleSet::reevaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleChange {
    pub sample: SampleId,
    pub entity: EntityId,
    pub added: bool,
}

// ---------------------------------------------------------------------------
// SampleSet
// ---------------------------------------------------------------------------

/// All samples of a world plus the indexes used to find the samples an
/// entity change can affect.
pub(crate) struct SampleSet {
    samples: Vec<Sample>,
    by_signature: HashMap<Signature, SampleId>,
    /// Component index -> samples whose signature requires or excludes it.
    by_component: Vec<Vec<SampleId>>,
    /// Samples that filter on hierarchy activity.
    active_only: Vec<SampleId>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            by_signature: HashMap::new(),
            by_component: vec![Vec::new(); MAX_COMPONENTS],
            active_only: Vec::new(),
        }
    }

    /// The sample already created for an equal signature.
    pub fn find(&self, signature: &Signature) -> Option<SampleId> {
        self.by_signature.get(signature).copied()
    }

    /// Create the sample for `signature`. The caller fills it with
    /// [`seed`](Self::seed).
    pub fn create(&mut self, signature: Signature) -> SampleId {
        debug_assert!(!self.by_signature.contains_key(&signature));
        let id = SampleId(self.samples.len() as u32);
        self.samples.push(Sample::new(id, signature));
        self.by_signature.insert(signature, id);
        for component in signature.watched().iter() {
            self.by_component[component.index()].push(id);
        }
        if signature.is_active_only() {
            self.active_only.push(id);
        }
        id
    }

    /// Insert an entity into a freshly created sample without raising
    /// events. Used once, when a sample is created over existing entities.
    pub fn seed(&mut self, sample: SampleId, entity: EntityId) {
        self.samples[sample.index()].insert(entity);
    }

    pub fn get(&self, id: SampleId) -> Option<&Sample> {
        self.samples.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Samples whose membership may change when the components in `changed`
    /// are added or removed, or (with `activity`) when the entity's
    /// effective activity flips. Ascending id order, no duplicates.
    fn candidates(&self, changed: &ComponentMask, activity: bool) -> Vec<SampleId> {
        let mut out: Vec<SampleId> = changed
            .iter()
            .flat_map(|c| self.by_component[c.index()].iter().copied())
            .collect();
        if activity {
            out.extend_from_slice(&self.active_only);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Bring every affected sample in line with the entity's current state.
    pub fn reevaluate(
        &mut self,
        entity: EntityId,
        mask: &ComponentMask,
        active: bool,
        changed: &ComponentMask,
        activity: bool,
        out: &mut Vec<SampleChange>,
    ) {
        for id in self.candidates(changed, activity) {
            let sample = &mut self.samples[id.index()];
            let wanted = sample.signature.matches(mask, active);
            let flipped = if wanted {
                sample.insert(entity)
            } else {
                sample.remove(entity)
            };
            if flipped {
                out.push(SampleChange {
                    sample: id,
                    entity,
                    added: wanted,
                });
            }
        }
    }

    /// A new entity enters the world: every sample it matches gains it.
    pub fn admit(&mut self, entity: EntityId, mask: &ComponentMask, active: bool, out: &mut Vec<SampleChange>) {
        for sample in &mut self.samples {
            if sample.signature.matches(mask, active) && sample.insert(entity) {
                out.push(SampleChange {
                    sample: sample.id,
                    entity,
                    added: true,
                });
            }
        }
    }

    /// An entity leaves the world: every sample holding it loses it.
    pub fn evict(&mut self, entity: EntityId, out: &mut Vec<SampleChange>) {
        for sample in &mut self.samples {
            if sample.remove(entity) {
                out.push(SampleChange {
                    sample: sample.id,
                    entity,
                    added: false,
                });
            }
        }
    }

    pub fn clear_members(&mut self) {
        for sample in &mut self.samples {
            sample.members.clear();
            sample.positions.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentTypeId;

    fn mask(ids: &[u32]) -> ComponentMask {
        ids.iter().map(|&i| ComponentTypeId(i)).collect()
    }

    #[test]
    fn swap_remove_keeps_positions_consistent() {
        let mut sample = Sample::new(SampleId(0), Signature::new());
        let ids: Vec<EntityId> = (0..4).map(|i| EntityId::new(i, 0)).collect();
        for &e in &ids {
            assert!(sample.insert(e));
        }
        assert!(!sample.insert(ids[0]));
        assert!(sample.remove(ids[1]));
        assert!(!sample.remove(ids[1]));
        assert_eq!(sample.len(), 3);
        for &e in [ids[0], ids[2], ids[3]].iter() {
            assert!(sample.contains(e));
            assert!(sample.remove(e));
        }
        assert!(sample.is_empty());
    }

    #[test]
    fn only_watching_samples_are_reevaluated() {
        let mut set = SampleSet::new();
        let pos_vel = set.create(Signature::new().require(ComponentTypeId(1)).require(ComponentTypeId(2)));
        let health = set.create(Signature::new().require(ComponentTypeId(3)));

        let e = EntityId::new(0, 0);
        let mut changes = Vec::new();
        set.reevaluate(e, &mask(&[1, 2]), true, &mask(&[2]), false, &mut changes);
        assert_eq!(
            changes,
            vec![SampleChange {
                sample: pos_vel,
                entity: e,
                added: true
            }]
        );
        assert!(set.get(pos_vel).unwrap().contains(e));
        assert!(!set.get(health).unwrap().contains(e));
    }

    #[test]
    fn activity_change_touches_active_only_samples() {
        let mut set = SampleSet::new();
        let plain = set.create(Signature::new().require(ComponentTypeId(1)));
        let active = set.create(Signature::new().require(ComponentTypeId(1)).active_only());
        let e = EntityId::new(0, 0);
        let mut changes = Vec::new();
        set.admit(e, &mask(&[1]), true, &mut changes);
        assert_eq!(changes.len(), 2);

        changes.clear();
        set.reevaluate(e, &mask(&[1]), false, &ComponentMask::EMPTY, true, &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].sample, active);
        assert!(!changes[0].added);
        assert!(set.get(plain).unwrap().contains(e));
    }

    #[test]
    fn evict_removes_from_all_samples() {
        let mut set = SampleSet::new();
        let a = set.create(Signature::new());
        let b = set.create(Signature::new().exclude(ComponentTypeId(9)));
        let e = EntityId::new(4, 2);
        let mut changes = Vec::new();
        set.admit(e, &ComponentMask::EMPTY, true, &mut changes);
        changes.clear();
        set.evict(e, &mut changes);
        let evicted: Vec<SampleId> = changes.iter().map(|c| c.sample).collect();
        assert_eq!(evicted, vec![a, b]);
        assert_eq!(set.find(&Signature::new()), Some(a));
    }
}
