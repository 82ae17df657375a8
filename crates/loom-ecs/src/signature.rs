//! Component masks and sample signatures.
//!
//! A [`ComponentMask`] is a fixed 256-bit set of [`ComponentTypeId`]s; every
//! entity carries one describing which components it currently owns. A
//! [`Signature`] is the query side: the components an entity must have, the
//! components it must not have, and whether it must be active in the
//! hierarchy.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use serde::{Deserialize, Serialize};

use crate::component::{ComponentRegistry, ComponentTypeId};

const WORDS: usize = crate::component::MAX_COMPONENTS / 64;

// ---------------------------------------------------------------------------
// ComponentMask
// ---------------------------------------------------------------------------

/// A 256-bit set of component type ids.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentMask([u64; WORDS]);

impl ComponentMask {
    pub const EMPTY: Self = Self([0; WORDS]);

    #[inline]
    pub fn insert(&mut self, id: ComponentTypeId) {
        self.0[id.index() / 64] |= 1 << (id.index() % 64);
    }

    #[inline]
    pub fn remove(&mut self, id: ComponentTypeId) {
        self.0[id.index() / 64] &= !(1 << (id.index() % 64));
    }

    #[inline]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.0[id.index() / 64] & (1 << (id.index() % 64)) != 0
    }

    /// `true` if every bit of `other` is set in `self`.
    #[inline]
    pub fn contains_all(&self, other: &ComponentMask) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a & b == *b)
    }

    /// `true` if `self` and `other` share at least one bit.
    #[inline]
    pub fn intersects(&self, other: &ComponentMask) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate the set ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.0.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64u32)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| ComponentTypeId(word_idx as u32 * 64 + bit))
        })
    }
}

impl FromIterator<ComponentTypeId> for ComponentMask {
    fn from_iter<I: IntoIterator<Item = ComponentTypeId>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for id in iter {
            mask.insert(id);
        }
        mask
    }
}

impl BitOr for ComponentMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(std::array::from_fn(|i| self.0[i] | rhs.0[i]))
    }
}

impl BitAnd for ComponentMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(std::array::from_fn(|i| self.0[i] & rhs.0[i]))
    }
}

impl Not for ComponentMask {
    type Output = Self;
    fn not(self) -> Self {
        Self(self.0.map(|w| !w))
    }
}

impl fmt::Debug for ComponentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.0)).finish()
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// The membership rule of a sample.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    required: ComponentMask,
    excluded: ComponentMask,
    active_only: bool,
    /// Set when the signature referenced a component type that was never
    /// registered; such a signature matches nothing.
    unresolved: bool,
}

impl Signature {
    /// A signature matching every live entity.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, id: ComponentTypeId) -> Self {
        self.required.insert(id);
        self
    }

    pub fn exclude(mut self, id: ComponentTypeId) -> Self {
        self.excluded.insert(id);
        self
    }

    /// Only entities active in the hierarchy match.
    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn required(&self) -> &ComponentMask {
        &self.required
    }

    pub fn excluded(&self) -> &ComponentMask {
        &self.excluded
    }

    pub fn is_active_only(&self) -> bool {
        self.active_only
    }

    /// `true` if this signature can never match (unregistered component).
    pub fn is_unresolved(&self) -> bool {
        self.unresolved
    }

    /// Every component whose addition or removal can change the outcome of
    /// [`matches`](Self::matches).
    pub fn watched(&self) -> ComponentMask {
        self.required | self.excluded
    }

    /// Does an entity with component set `mask` and effective activity
    /// `active` satisfy this signature?
    #[inline]
    pub fn matches(&self, mask: &ComponentMask, active: bool) -> bool {
        !self.unresolved
            && mask.contains_all(&self.required)
            && !mask.intersects(&self.excluded)
            && (active || !self.active_only)
    }

    /// Start a typed builder that resolves component types through `registry`.
    pub fn builder(registry: &ComponentRegistry) -> SignatureBuilder<'_> {
        SignatureBuilder {
            registry,
            signature: Signature::new(),
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Signature");
        s.field("required", &self.required)
            .field("excluded", &self.excluded)
            .field("active_only", &self.active_only);
        if self.unresolved {
            s.field("unresolved", &true);
        }
        s.finish()
    }
}

/// Resolves Rust types or registered names into a [`Signature`].
///
/// Referencing a type that was never registered is a configuration error:
/// it asserts in debug builds; in release the built signature matches
/// nothing.
pub struct SignatureBuilder<'r> {
    registry: &'r ComponentRegistry,
    signature: Signature,
}

impl<'r> SignatureBuilder<'r> {
    pub fn with<T: 'static>(self) -> Self {
        let id = self.registry.lookup::<T>();
        self.apply(id, std::any::type_name::<T>(), true)
    }

    pub fn without<T: 'static>(self) -> Self {
        let id = self.registry.lookup::<T>();
        self.apply(id, std::any::type_name::<T>(), false)
    }

    pub fn with_name(self, name: &str) -> Self {
        let id = self.registry.lookup_by_name(name);
        self.apply(id, name, true)
    }

    pub fn without_name(self, name: &str) -> Self {
        let id = self.registry.lookup_by_name(name);
        self.apply(id, name, false)
    }

    pub fn active_only(mut self) -> Self {
        self.signature.active_only = true;
        self
    }

    pub fn build(self) -> Signature {
        self.signature
    }

    fn apply(mut self, id: Option<ComponentTypeId>, label: &str, required: bool) -> Self {
        match id {
            Some(id) if required => self.signature.required.insert(id),
            Some(id) => self.signature.excluded.insert(id),
            None => {
                tracing::error!(component = label, "signature references an unregistered component type");
                debug_assert!(false, "component type '{label}' is not registered");
                self.signature.unresolved = true;
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ComponentTypeId {
        ComponentTypeId(n)
    }

    #[test]
    fn mask_insert_remove_contains() {
        let mut mask = ComponentMask::EMPTY;
        mask.insert(id(3));
        mask.insert(id(200));
        assert!(mask.contains(id(3)));
        assert!(mask.contains(id(200)));
        assert!(!mask.contains(id(4)));
        assert_eq!(mask.len(), 2);
        mask.remove(id(3));
        assert!(!mask.contains(id(3)));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![id(200)]);
    }

    #[test]
    fn mask_subset_and_intersection() {
        let a: ComponentMask = [id(1), id(2), id(70)].into_iter().collect();
        let b: ComponentMask = [id(2), id(70)].into_iter().collect();
        let c: ComponentMask = [id(5)].into_iter().collect();
        assert!(a.contains_all(&b));
        assert!(!b.contains_all(&a));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains_all(&ComponentMask::EMPTY));
    }

    #[test]
    fn signature_required_excluded_active() {
        let sig = Signature::new().require(id(0)).require(id(1)).exclude(id(2));
        let has_both: ComponentMask = [id(0), id(1)].into_iter().collect();
        let has_excluded: ComponentMask = [id(0), id(1), id(2)].into_iter().collect();
        let partial: ComponentMask = [id(0)].into_iter().collect();

        assert!(sig.matches(&has_both, true));
        assert!(sig.matches(&has_both, false));
        assert!(!sig.matches(&has_excluded, true));
        assert!(!sig.matches(&partial, true));

        let active = sig.active_only();
        assert!(active.matches(&has_both, true));
        assert!(!active.matches(&has_both, false));
    }

    #[test]
    fn empty_signature_matches_everything() {
        assert!(Signature::new().matches(&ComponentMask::EMPTY, false));
    }

    #[test]
    fn builder_resolves_by_type_and_name() {
        #[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
        struct Pos(f32);
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>("pos");
        let name = reg.lookup_by_name("name").unwrap();

        let sig = Signature::builder(&reg).with::<Pos>().without_name("name").build();
        assert!(sig.required().contains(pos));
        assert!(sig.excluded().contains(name));
        assert_eq!(sig.watched().len(), 2);
        assert!(!sig.is_unresolved());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "is not registered")]
    fn unregistered_component_asserts_in_debug() {
        let reg = ComponentRegistry::new();
        let _ = Signature::builder(&reg).with_name("velocity").build();
    }
}
