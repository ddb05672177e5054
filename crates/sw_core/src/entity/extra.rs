//! Per-entity extra data: modules allocate a typed slot at load time and get
//! per-instance state on every arena or player by slot key.
//!
//! Slot keys are dense indexes into a `Vec` kept on each entity, so lookup
//! is O(1). When an entity is torn down, each slotted value gets a
//! [`ExtraData::try_reset`] call; values that report a clean reset go back
//! to a per-slot pool and are reused for the next entity.

use std::any::Any;
use std::marker::PhantomData;

type AnyValue = Box<dyn Any + Send + Sync>;

/// Implemented by every type stored in an extra-data slot.
pub trait ExtraData: Send + Sync + 'static {
    /// Restores the value to freshly-constructed semantics.
    /// Returning `false` drops the value instead of pooling it.
    fn try_reset(&mut self) -> bool;
}

/// A typed handle to one allocated slot.
pub struct ExtraSlotKey<T: ExtraData> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ExtraData> Clone for ExtraSlotKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ExtraData> Copy for ExtraSlotKey<T> {}

impl<T: ExtraData> std::fmt::Debug for ExtraSlotKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtraSlotKey({})", self.index)
    }
}

struct SlotEntry {
    make: Box<dyn Fn() -> AnyValue + Send + Sync>,
    reset: Box<dyn Fn(&mut AnyValue) -> bool + Send + Sync>,
    pool: Vec<AnyValue>,
}

/// Allocation state for one entity kind (one registry for arenas, one for
/// players). Owned by the respective entity manager.
#[derive(Default)]
pub struct ExtraSlotRegistry {
    slots: Vec<Option<SlotEntry>>,
}

impl ExtraSlotRegistry {
    /// Allocates a slot producing `T::default()` values.
    pub fn allocate<T: ExtraData + Default>(&mut self) -> ExtraSlotKey<T> {
        let entry = SlotEntry {
            make: Box::new(|| Box::new(T::default())),
            reset: Box::new(|value| match value.downcast_mut::<T>() {
                Some(typed) => typed.try_reset(),
                None => false,
            }),
            pool: Vec::new(),
        };
        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(entry);
                free
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        ExtraSlotKey {
            index,
            _marker: PhantomData,
        }
    }

    /// Frees the slot and its pooled values. The owning entity manager also
    /// walks the live entities and [`ExtraDataMap::discard`]s their values,
    /// so lookups with a stale key return `None` everywhere.
    pub fn free<T: ExtraData>(&mut self, key: ExtraSlotKey<T>) {
        if let Some(slot) = self.slots.get_mut(key.index) {
            *slot = None;
        }
    }

    /// Produces a value for the slot at `index`, reusing the pool if possible.
    fn produce(&mut self, index: usize) -> Option<AnyValue> {
        let entry = self.slots.get_mut(index)?.as_mut()?;
        Some(entry.pool.pop().unwrap_or_else(|| (entry.make)()))
    }

    /// Produces a fresh value for a just-allocated slot, for backfilling
    /// entities that already exist.
    pub fn produce_for<T: ExtraData>(&mut self, key: ExtraSlotKey<T>, map: &mut ExtraDataMap) {
        if let Some(value) = self.produce(key.index) {
            map.insert(key.index, value);
        }
    }

    /// Fills every live slot of a new entity's map.
    pub fn materialize(&mut self, map: &mut ExtraDataMap) {
        for index in 0..self.slots.len() {
            if let Some(value) = self.produce(index) {
                map.insert(index, value);
            }
        }
    }

    /// Resets each of the entity's slotted values; clean resets return to
    /// the slot pool, the rest are dropped.
    pub fn recycle(&mut self, map: &mut ExtraDataMap) {
        for (index, slot) in map.values.iter_mut().enumerate() {
            let Some(mut value) = slot.take() else { continue };
            if let Some(entry) = self.slots.get_mut(index).and_then(Option::as_mut) {
                if (entry.reset)(&mut value) {
                    entry.pool.push(value);
                }
            }
        }
    }
}

/// The slot-indexed extra data carried by one arena or player.
#[derive(Default)]
pub struct ExtraDataMap {
    values: Vec<Option<AnyValue>>,
}

impl ExtraDataMap {
    fn insert(&mut self, index: usize, value: AnyValue) {
        if self.values.len() <= index {
            self.values.resize_with(index + 1, || None);
        }
        self.values[index] = Some(value);
    }

    /// Looks up this entity's value for the slot, O(1).
    pub fn get<T: ExtraData>(&self, key: ExtraSlotKey<T>) -> Option<&T> {
        self.values.get(key.index)?.as_ref()?.downcast_ref()
    }

    /// Mutable variant of [`Self::get`].
    pub fn get_mut<T: ExtraData>(&mut self, key: ExtraSlotKey<T>) -> Option<&mut T> {
        self.values.get_mut(key.index)?.as_mut()?.downcast_mut()
    }

    /// Drops this entity's value for the slot, if any. Part of freeing a
    /// slot; the registry pool is not involved.
    pub fn discard<T: ExtraData>(&mut self, key: ExtraSlotKey<T>) {
        if let Some(slot) = self.values.get_mut(key.index) {
            *slot = None;
        }
    }
}
