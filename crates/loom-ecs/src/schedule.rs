//! Constraint-based system scheduling.
//!
//! Systems are registered with a [`SystemDescriptor`]: a unique name, the
//! frame [`Phase`] they run in, free-form tags, and ordering constraints.
//! An `after`/`before` entry names either a system or a tag; a tag stands for
//! every system carrying it.
//!
//! The per-phase order is a topological sort of the constraint graph. Among
//! systems with no relative constraint, registration order wins, so the same
//! registrations always produce the same order. The order is cached and only
//! recomputed after the system set changes.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::sample::SampleId;
use crate::signature::Signature;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Frame phase a system runs in. Phases execute in declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    PreUpdate,
    #[default]
    Update,
    PostUpdate,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::PreUpdate, Phase::Update, Phase::PostUpdate];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PreUpdate => "pre-update",
            Phase::Update => "update",
            Phase::PostUpdate => "post-update",
        })
    }
}

// ---------------------------------------------------------------------------
// SystemContext / SystemCallable
// ---------------------------------------------------------------------------

/// Per-invocation data handed to a system.
#[derive(Debug, Clone)]
pub struct SystemContext {
    pub system: Arc<str>,
    pub phase: Phase,
    pub dt: f32,
    pub frame: u64,
    /// Members of the system's sample at invocation time, minus entities
    /// whose scene is not ticking. Empty for systems without a sample.
    pub entities: Vec<EntityId>,
}

/// The body of a system.
///
/// Implemented for every `Fn(&mut World, &SystemContext)`; scripted systems
/// implement it by calling out to their host.
pub trait SystemCallable: Send + Sync {
    fn run(&self, world: &mut World, ctx: &SystemContext);
}

impl<F> SystemCallable for F
where
    F: Fn(&mut World, &SystemContext) + Send + Sync,
{
    fn run(&self, world: &mut World, ctx: &SystemContext) {
        self(world, ctx)
    }
}

// ---------------------------------------------------------------------------
// SystemDescriptor
// ---------------------------------------------------------------------------

/// Registration data of a system, independent of what implements its body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDescriptor {
    pub name: String,
    pub phase: Phase,
    /// When set, the system is invoked with the members of this sample.
    pub signature: Option<Signature>,
    pub tags: BTreeSet<String>,
    /// Systems or tags this system must run after.
    pub after: Vec<String>,
    /// Systems or tags this system must run before.
    pub before: Vec<String>,
    /// Keep running while the world is not playing.
    pub enable_in_editor: bool,
    /// Worlds must carry all of these tags for the system to attach.
    pub world_tags: BTreeSet<String>,
}

impl SystemDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn sample(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn after(mut self, key: impl Into<String>) -> Self {
        self.after.push(key.into());
        self
    }

    pub fn before(mut self, key: impl Into<String>) -> Self {
        self.before.push(key.into());
        self
    }

    pub fn in_editor(mut self) -> Self {
        self.enable_in_editor = true;
        self
    }

    pub fn world_tag(mut self, tag: impl Into<String>) -> Self {
        self.world_tags.insert(tag.into());
        self
    }

    /// Does an ordering reference `key` designate this system?
    pub fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.tags.contains(key)
    }

    /// Whether a world carrying `tags` accepts this system.
    pub fn attaches_to(&self, tags: &BTreeSet<String>) -> bool {
        self.world_tags.is_subset(tags)
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Stable topological order of `systems` (given in registration order).
///
/// Returns positions into `systems`, or on a cycle the positions of the
/// systems that lie on (or between) cycles.
pub fn topological_order(systems: &[&SystemDescriptor]) -> Result<Vec<usize>, Vec<usize>> {
    let n = systems.len();
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

    for (s, desc) in systems.iter().enumerate() {
        for key in &desc.after {
            let mut matched = false;
            for (t, other) in systems.iter().enumerate() {
                if t != s && other.answers_to(key) {
                    successors[t].insert(s);
                    matched = true;
                }
            }
            if !matched {
                tracing::trace!(system = %desc.name, after = %key, "ordering constraint matches no system");
            }
        }
        for key in &desc.before {
            let mut matched = false;
            for (t, other) in systems.iter().enumerate() {
                if t != s && other.answers_to(key) {
                    successors[s].insert(t);
                    matched = true;
                }
            }
            if !matched {
                tracing::trace!(system = %desc.name, before = %key, "ordering constraint matches no system");
            }
        }
    }

    let mut indegree = vec![0usize; n];
    for next in &successors {
        for &t in next {
            indegree[t] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n).filter(|&i| indegree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &t in &successors[i] {
            indegree[t] -= 1;
            if indegree[t] == 0 {
                ready.push(Reverse(t));
            }
        }
    }
    if order.len() == n {
        return Ok(order);
    }

    // Leftover nodes are cycle members plus whatever hangs off them; peel off
    // the ones that cannot reach back into a cycle.
    let mut stuck: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] > 0).collect();
    loop {
        let sinks: Vec<usize> = stuck
            .iter()
            .copied()
            .filter(|i| successors[*i].iter().all(|t| !stuck.contains(t)))
            .collect();
        if sinks.is_empty() {
            break;
        }
        for i in sinks {
            stuck.remove(&i);
        }
    }
    Err(stuck.into_iter().collect())
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct RegisteredSystem {
    descriptor: SystemDescriptor,
    name: Arc<str>,
    body: Arc<dyn SystemCallable>,
    sample: Option<SampleId>,
}

/// What the world needs to invoke one system.
#[derive(Clone)]
pub(crate) struct ScheduledSystem {
    pub name: Arc<str>,
    pub body: Arc<dyn SystemCallable>,
    pub sample: Option<SampleId>,
    pub enable_in_editor: bool,
}

/// Registered systems of one world and their cached per-phase order.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<RegisteredSystem>,
    /// Indexed by `Phase::index`; positions into `systems`.
    cache: [Option<Vec<usize>>; 3],
    recomputations: u64,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("systems", &self.systems.iter().map(|s| &s.descriptor.name).collect::<Vec<_>>())
            .field("recomputations", &self.recomputations)
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &mut self,
        descriptor: SystemDescriptor,
        body: Arc<dyn SystemCallable>,
        sample: Option<SampleId>,
    ) -> Result<(), EcsError> {
        if self.position(&descriptor.name).is_some() {
            return Err(EcsError::DuplicateSystem {
                name: descriptor.name,
            });
        }
        tracing::debug!(system = %descriptor.name, phase = %descriptor.phase, "system registered");
        self.systems.push(RegisteredSystem {
            name: Arc::from(descriptor.name.as_str()),
            descriptor,
            body,
            sample,
        });
        self.invalidate();
        Ok(())
    }

    /// Swap the body and constraints of an existing system, keeping its
    /// registration position.
    pub(crate) fn replace(
        &mut self,
        descriptor: SystemDescriptor,
        body: Arc<dyn SystemCallable>,
        sample: Option<SampleId>,
    ) -> Result<(), EcsError> {
        let pos = self.position(&descriptor.name).ok_or_else(|| EcsError::UnknownSystem {
            name: descriptor.name.clone(),
        })?;
        tracing::debug!(system = %descriptor.name, "system replaced");
        let slot = &mut self.systems[pos];
        slot.descriptor = descriptor;
        slot.body = body;
        slot.sample = sample;
        self.invalidate();
        Ok(())
    }

    pub(crate) fn unregister(&mut self, name: &str) -> Result<SystemDescriptor, EcsError> {
        let pos = self.position(name).ok_or_else(|| EcsError::UnknownSystem { name: name.to_owned() })?;
        let removed = self.systems.remove(pos);
        tracing::debug!(system = name, "system unregistered");
        self.invalidate();
        Ok(removed.descriptor)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.systems.iter().position(|s| s.descriptor.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn descriptor(&self, name: &str) -> Option<&SystemDescriptor> {
        self.position(name).map(|p| &self.systems[p].descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SystemDescriptor> {
        self.systems.iter().map(|s| &s.descriptor)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// How many times an order has been derived. Stays flat across frames
    /// while the system set is unchanged.
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    fn invalidate(&mut self) {
        self.cache = Default::default();
    }

    fn order(&mut self, phase: Phase) -> Result<&[usize], EcsError> {
        if self.cache[phase.index()].is_none() {
            let members: Vec<usize> = (0..self.systems.len())
                .filter(|&i| self.systems[i].descriptor.phase == phase)
                .collect();
            let descriptors: Vec<&SystemDescriptor> = members.iter().map(|&i| &self.systems[i].descriptor).collect();
            let local = topological_order(&descriptors).map_err(|stuck| {
                let systems: Vec<String> = stuck.iter().map(|&i| descriptors[i].name.clone()).collect();
                tracing::error!(%phase, ?systems, "cycle in system ordering constraints");
                EcsError::ScheduleCycle { phase, systems }
            })?;
            self.recomputations += 1;
            let order: Vec<usize> = local.into_iter().map(|i| members[i]).collect();
            tracing::debug!(
                %phase,
                order = ?order.iter().map(|&i| self.systems[i].descriptor.name.as_str()).collect::<Vec<_>>(),
                "schedule recomputed"
            );
            self.cache[phase.index()] = Some(order);
        }
        Ok(self.cache[phase.index()].as_deref().unwrap_or_default())
    }

    /// Names of the systems of `phase` in execution order.
    pub fn compute_schedule(&mut self, phase: Phase) -> Result<Vec<String>, EcsError> {
        let order = self.order(phase)?.to_vec();
        Ok(order.into_iter().map(|i| self.systems[i].descriptor.name.clone()).collect())
    }

    pub(crate) fn plan(&mut self, phase: Phase) -> Result<Vec<ScheduledSystem>, EcsError> {
        let order = self.order(phase)?.to_vec();
        Ok(order
            .into_iter()
            .map(|i| {
                let s = &self.systems[i];
                ScheduledSystem {
                    name: Arc::clone(&s.name),
                    body: Arc::clone(&s.body),
                    sample: s.sample,
                    enable_in_editor: s.descriptor.enable_in_editor,
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
