//! The population registry: an index-stable arena of live immortals.
//!
//! Structural changes (insert, remove, clear) take a single write lock and
//! rebuild a cached [`PopulationView`]. Readers take the read lock only
//! long enough to clone that view, then work against it lock-free, so a
//! removal can never be observed half-applied and no reader ever holds the
//! registry lock while touching an immortal.
//!
//! Slots are never reused within a run: a removed immortal's slot stays
//! empty, so a [`SlotKey`] always refers to the same immortal.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::AgentError;
use crate::ids::ImmortalId;
use crate::immortal::Immortal;

/// Stable position of an immortal in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey(usize);

impl SlotKey {
    /// Return the raw arena index.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Immutable snapshot of the live population.
///
/// Members are ordered by [`ImmortalId`]. Cloning a view is cheap.
#[derive(Debug, Clone)]
pub struct PopulationView {
    members: Arc<[Arc<Immortal>]>,
    epoch: u64,
}

impl PopulationView {
    fn empty() -> Self {
        Self {
            members: Arc::from(Vec::new()),
            epoch: 0,
        }
    }

    /// Number of live immortals in the view.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the view holds no immortals.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Immortal at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&Arc<Immortal>> {
        self.members.get(index)
    }

    /// Whether an immortal with `id` is a member.
    pub fn contains(&self, id: ImmortalId) -> bool {
        self.members
            .binary_search_by_key(&id, |member| member.id())
            .is_ok()
    }

    /// Iterate over the members in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Immortal>> {
        self.members.iter()
    }

    /// Number of structural changes made before this view was taken.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Lock-protected arena state.
#[derive(Debug)]
struct Arena {
    slots: Vec<Option<Arc<Immortal>>>,
    index: BTreeMap<ImmortalId, SlotKey>,
    view: PopulationView,
}

impl Arena {
    fn rebuild_view(&mut self) {
        let mut members: Vec<Arc<Immortal>> = self.slots.iter().flatten().cloned().collect();
        members.sort_by_key(|member| member.id());
        self.view = PopulationView {
            members: Arc::from(members),
            epoch: self.view.epoch.saturating_add(1),
        };
    }

    fn insert(&mut self, immortal: Arc<Immortal>) -> Result<SlotKey, AgentError> {
        let id = immortal.id();
        if self.index.contains_key(&id) {
            return Err(AgentError::DuplicateId(id));
        }
        let slot = SlotKey(self.slots.len());
        self.slots.push(Some(immortal));
        self.index.insert(id, slot);
        Ok(slot)
    }
}

/// Shared collection of live immortals.
#[derive(Debug)]
pub struct Registry {
    arena: RwLock<Arena>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(Arena {
                slots: Vec::new(),
                index: BTreeMap::new(),
                view: PopulationView::empty(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one immortal.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DuplicateId`] if an immortal with the same id
    /// was ever inserted during this run.
    pub fn insert(&self, immortal: Arc<Immortal>) -> Result<SlotKey, AgentError> {
        let mut arena = self.write();
        let slot = arena.insert(immortal)?;
        arena.rebuild_view();
        Ok(slot)
    }

    /// Add many immortals under one lock acquisition and one view rebuild.
    ///
    /// Either all immortals are inserted or none are.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DuplicateId`] if any id repeats, either within
    /// `immortals` or against an earlier insert.
    pub fn extend(
        &self,
        immortals: impl IntoIterator<Item = Arc<Immortal>>,
    ) -> Result<Vec<SlotKey>, AgentError> {
        let immortals: Vec<Arc<Immortal>> = immortals.into_iter().collect();
        let mut arena = self.write();

        let mut fresh = std::collections::BTreeSet::new();
        for immortal in &immortals {
            let id = immortal.id();
            if arena.index.contains_key(&id) || !fresh.insert(id) {
                return Err(AgentError::DuplicateId(id));
            }
        }

        let mut slots = Vec::with_capacity(immortals.len());
        for immortal in immortals {
            slots.push(arena.insert(immortal)?);
        }
        arena.rebuild_view();
        Ok(slots)
    }

    /// Remove the immortal with `id`.
    ///
    /// Returns `true` if it was present. Removing an absent immortal is a
    /// no-op that returns `false`.
    pub fn remove(&self, id: ImmortalId) -> bool {
        let mut arena = self.write();
        let Some(slot) = arena.index.get(&id).copied() else {
            return false;
        };
        let removed = arena
            .slots
            .get_mut(slot.index())
            .and_then(Option::take)
            .is_some();
        if removed {
            arena.rebuild_view();
        }
        removed
    }

    /// Remove every immortal. Slot keys already handed out stay reserved.
    pub fn clear(&self) {
        let mut arena = self.write();
        for slot in &mut arena.slots {
            *slot = None;
        }
        arena.rebuild_view();
    }

    /// Capture the current population.
    pub fn view(&self) -> PopulationView {
        self.read().view.clone()
    }

    /// Number of live immortals.
    pub fn len(&self) -> usize {
        self.read().view.len()
    }

    /// Whether no immortal is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the immortal with `id` is live.
    pub fn contains(&self, id: ImmortalId) -> bool {
        self.read().view.contains(id)
    }

    /// Slot assigned to `id`, if it was ever inserted.
    pub fn slot_of(&self, id: ImmortalId) -> Option<SlotKey> {
        self.read().index.get(&id).copied()
    }

    /// Immortal currently occupying `slot`.
    pub fn get(&self, slot: SlotKey) -> Option<Arc<Immortal>> {
        self.read().slots.get(slot.index()).cloned().flatten()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn immortal(raw: u64) -> Arc<Immortal> {
        Arc::new(Immortal::new(ImmortalId::from_raw(raw), format!("im{raw}"), 100, 10).unwrap())
    }

    #[test]
    fn extend_then_view_is_ordered_by_id() {
        let registry = Registry::new();
        registry
            .extend([immortal(2), immortal(0), immortal(1)])
            .unwrap();

        let view = registry.view();
        let ids: Vec<u64> = view.iter().map(|m| m.id().into_inner()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_ids_are_rejected_atomically() {
        let registry = Registry::new();
        let result = registry.extend([immortal(0), immortal(1), immortal(0)]);
        assert!(matches!(result, Err(AgentError::DuplicateId(_))));
        assert!(registry.is_empty());

        registry.insert(immortal(5)).unwrap();
        assert!(registry.insert(immortal(5)).is_err());
    }

    #[test]
    fn remove_is_idempotent_and_slot_is_not_reused() {
        let registry = Registry::new();
        let slots = registry.extend([immortal(0), immortal(1)]).unwrap();

        assert!(registry.remove(ImmortalId::from_raw(0)));
        assert!(!registry.remove(ImmortalId::from_raw(0)));
        assert!(!registry.contains(ImmortalId::from_raw(0)));
        assert!(registry.get(slots[0]).is_none());

        let fresh = registry.insert(immortal(9)).unwrap();
        assert_ne!(fresh, slots[0]);
        assert_eq!(registry.slot_of(ImmortalId::from_raw(1)), Some(slots[1]));
    }

    #[test]
    fn captured_view_is_stable_across_removal() {
        let registry = Registry::new();
        registry.extend([immortal(0), immortal(1), immortal(2)]).unwrap();

        let before = registry.view();
        registry.remove(ImmortalId::from_raw(1));
        let after = registry.view();

        assert_eq!(before.len(), 3);
        assert!(before.contains(ImmortalId::from_raw(1)));
        assert_eq!(after.len(), 2);
        assert!(!after.contains(ImmortalId::from_raw(1)));
        assert!(after.epoch() > before.epoch());
    }

    #[test]
    fn clear_empties_the_population() {
        let registry = Registry::new();
        registry.extend([immortal(0), immortal(1)]).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.view().is_empty());
        assert!(registry.slot_of(ImmortalId::from_raw(0)).is_some());
    }

    #[test]
    fn concurrent_readers_never_see_removed_members_resurrect() {
        use std::thread;

        let registry = Arc::new(Registry::new());
        registry
            .extend((0..64).map(immortal))
            .unwrap();

        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut last_len = usize::MAX;
                for _ in 0..2_000 {
                    let view = registry.view();
                    assert!(view.len() <= last_len, "population grew back");
                    last_len = view.len();
                }
            })
        };

        for raw in 0..64 {
            registry.remove(ImmortalId::from_raw(raw));
        }
        assert!(reader.join().is_ok());
        assert!(registry.is_empty());
    }
}
