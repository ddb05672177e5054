//! Arenas and the arena manager.

use sw_schemas::names::{EntityName, EntityNameRef};
use sw_schemas::persist::{ArenaGroup, PersistInterval};

use super::extra::{ExtraData, ExtraDataMap, ExtraSlotKey, ExtraSlotRegistry};
use crate::config::ConfigHandle;
use crate::prelude::*;

/// Base name used by the public arenas (`1`, `2`, ... strip to nothing).
pub static PUBLIC_BASE_NAME: &str = "(public)";

/// Arena lifecycle status.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum ArenaStatus {
    /// Created, config and persistent data still loading.
    Loading,
    /// Fully operational and observable from the mainloop.
    Running,
    /// Being shut down, persistent data save in flight.
    Closing,
    /// Torn down; the handle only lingers until the last holder drops it.
    Destroyed,
}

/// One long-lived gameplay instance.
pub struct Arena {
    /// Case-insensitive identity.
    pub name: EntityName,
    /// Lifecycle status; mutated only on the mainloop thread.
    pub status: ArenaStatus,
    /// The arena's configuration scope.
    pub config: ConfigHandle,
    /// Frequency spectators are placed on.
    pub spec_freq: i16,
    /// Slot-indexed module data.
    pub extra: ExtraDataMap,
}

/// Shared handle to one arena.
pub type ArenaHandle = Arc<RwLock<Arena>>;

impl Arena {
    /// The arena name with trailing digits stripped; public arenas all share
    /// [`PUBLIC_BASE_NAME`].
    pub fn base_name(&self) -> &str {
        let base = self.name.base_part();
        if base.is_empty() {
            PUBLIC_BASE_NAME
        } else {
            base
        }
    }

    /// Resolves the arena group this arena's data aggregates under for the
    /// given interval: the arena's own name for non-shared intervals, else
    /// the configured `General.ScoreGroup`, else the base name.
    pub fn group_for(&self, interval: PersistInterval) -> ArenaGroup {
        if !interval.is_shared() {
            return ArenaGroup::new(self.name.as_str());
        }
        if let Some(group) = self.config.current().get_str("General", "ScoreGroup") {
            return ArenaGroup::new(group);
        }
        ArenaGroup::new(self.base_name())
    }
}

/// Owns the arena table and the arena extra-data slot registry.
#[derive(Default)]
pub struct ArenaManager {
    arenas: RwLock<HashMap<EntityName, ArenaHandle>>,
    slots: Mutex<ExtraSlotRegistry>,
}

impl ArenaManager {
    /// Constructs an empty manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates an arena in [`ArenaStatus::Loading`] with every live
    /// extra-data slot materialized. Returns the existing handle if the name
    /// is already taken.
    pub fn create(&self, name: &str, config: ConfigHandle) -> ArenaHandle {
        let key = EntityName::new(name);
        let mut arenas = self.arenas.write().unwrap();
        if let Some(existing) = arenas.get(&key) {
            return Arc::clone(existing);
        }
        let mut extra = ExtraDataMap::default();
        self.slots.lock().unwrap().materialize(&mut extra);
        let arena = Arc::new(RwLock::new(Arena {
            name: key.clone(),
            status: ArenaStatus::Loading,
            config,
            spec_freq: 8025,
            extra,
        }));
        arenas.insert(key, Arc::clone(&arena));
        arena
    }

    /// Destroys an arena: marks it destroyed, recycles its extra data and
    /// removes it from the table.
    pub fn destroy(&self, name: &str) -> Option<ArenaHandle> {
        let arena = self.arenas.write().unwrap().remove(&EntityNameRef::new(name))?;
        {
            let mut guard = arena.write().unwrap();
            guard.status = ArenaStatus::Destroyed;
            let mut slots = self.slots.lock().unwrap();
            slots.recycle(&mut guard.extra);
        }
        Some(arena)
    }

    /// Looks an arena up by (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<ArenaHandle> {
        self.arenas.read().unwrap().get(&EntityNameRef::new(name)).cloned()
    }

    /// Snapshots every arena under the read lock.
    pub fn snapshot(&self) -> Vec<ArenaHandle> {
        self.arenas.read().unwrap().values().cloned().collect()
    }

    /// Allocates an extra-data slot and backfills a value into every arena
    /// that already exists.
    pub fn allocate_slot<T: ExtraData + Default>(&self) -> ExtraSlotKey<T> {
        let mut slots = self.slots.lock().unwrap();
        let key = slots.allocate::<T>();
        for arena in self.arenas.read().unwrap().values() {
            slots.produce_for(key, &mut arena.write().unwrap().extra);
        }
        key
    }

    /// Frees an extra-data slot, dropping every arena's value for it;
    /// stale lookups return `None`.
    pub fn free_slot<T: ExtraData>(&self, key: ExtraSlotKey<T>) {
        let mut slots = self.slots.lock().unwrap();
        slots.free(key);
        for arena in self.arenas.read().unwrap().values() {
            arena.write().unwrap().extra.discard(key);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::config::ConfigScope;

    use super::*;

    fn arena_with(name: &str, scope: ConfigScope) -> Arena {
        Arena {
            name: EntityName::new(name),
            status: ArenaStatus::Running,
            config: ConfigHandle::new(scope),
            spec_freq: 8025,
            extra: ExtraDataMap::default(),
        }
    }

    #[test]
    pub fn group_resolution_prefers_the_configured_score_group() {
        let mut scope = ConfigScope::new();
        scope.set("General", "ScoreGroup", "turfs");
        let arena = arena_with("turf3", scope);

        assert_eq!(arena.group_for(PersistInterval::Reset), ArenaGroup::new("turfs"));
        // non-shared intervals always use the arena's own name
        assert_eq!(
            arena.group_for(PersistInterval::ForeverNotShared),
            ArenaGroup::new("turf3")
        );
    }

    #[test]
    pub fn group_resolution_falls_back_to_the_base_name() {
        let arena = arena_with("duel2", ConfigScope::new());
        assert_eq!(arena.group_for(PersistInterval::Forever), ArenaGroup::new("duel"));
        assert_eq!(arena.base_name(), "duel");

        let public = arena_with("3", ConfigScope::new());
        assert_eq!(public.base_name(), PUBLIC_BASE_NAME);
        assert_eq!(
            public.group_for(PersistInterval::Game),
            ArenaGroup::new(PUBLIC_BASE_NAME)
        );
    }

    #[test]
    pub fn create_is_idempotent_per_name() {
        let manager = ArenaManager::new();
        let a = manager.create("Turf", ConfigHandle::default());
        let b = manager.create("tURF", ConfigHandle::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager.get("TURF").is_some());

        manager.destroy("turf").unwrap();
        assert!(manager.get("Turf").is_none());
    }

    #[derive(Default)]
    struct Captures(u32);

    impl ExtraData for Captures {
        fn try_reset(&mut self) -> bool {
            self.0 = 0;
            true
        }
    }

    #[test]
    pub fn freeing_a_slot_drops_materialized_values() {
        let manager = ArenaManager::new();
        let key = manager.allocate_slot::<Captures>();
        let arena = manager.create("turf", ConfigHandle::default());
        assert!(arena.read().unwrap().extra.get(key).is_some());

        manager.free_slot(key);
        assert!(arena.read().unwrap().extra.get(key).is_none());
        // arenas created afterwards never see the slot either
        let later = manager.create("duel", ConfigHandle::default());
        assert!(later.read().unwrap().extra.get(key).is_none());
    }
}
