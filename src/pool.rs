//! Slot pools with generational handles.
//!
//! [`ResourcePool`] is the storage behind every resource kind: fixed
//! capacity, stable indices, a generation per slot bumped on release, and a
//! reference count deciding when the stored value is actually destroyed.
//!
//! [`CachedPool`] layers a structural-hash index on top so that equal keys
//! always resolve to the same slot (render passes, framebuffers, descriptor
//! sets).

use crate::error::{Error, Result};
use crate::handle::{RawId, MAX_GENERATION, MAX_INDEX};
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::hash::Hash;
use std::sync::RwLock;

struct Slot<T> {
    value: Option<T>,
    generation: u32,
    refcount: u32,
}

struct PoolInner<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> PoolInner<T> {
    fn with_capacity(capacity: usize) -> PoolInner<T> {
        assert!(capacity as u32 <= MAX_INDEX + 1, "pool capacity exceeds index space");
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                value: None,
                generation: 0,
                refcount: 0,
            });
            // hand out low indices first
            free.push((capacity - 1 - i) as u32);
        }
        PoolInner { slots, free }
    }

    fn assign(&mut self, value: T) -> Result<RawId> {
        let index = self.free.pop().ok_or(Error::PoolOverflow)?;
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.value.is_none());
        slot.value = Some(value);
        slot.refcount = 1;
        Ok(RawId::new(index, slot.generation))
    }

    fn slot(&self, id: RawId) -> Result<&Slot<T>> {
        let slot = self
            .slots
            .get(id.index() as usize)
            .ok_or(Error::InvalidHandle)?;
        if slot.generation != id.generation() || slot.refcount == 0 {
            return Err(Error::InvalidHandle);
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, id: RawId) -> Result<&mut Slot<T>> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .ok_or(Error::InvalidHandle)?;
        if slot.generation != id.generation() || slot.refcount == 0 {
            return Err(Error::InvalidHandle);
        }
        Ok(slot)
    }

    /// Decrements the refcount; on the last reference the slot is recycled
    /// and the stored value handed back for destruction.
    fn release(&mut self, id: RawId) -> Result<Option<T>> {
        let index = id.index();
        let slot = self.slot_mut(id)?;
        slot.refcount -= 1;
        if slot.refcount > 0 {
            return Ok(None);
        }
        let value = slot.value.take();
        slot.generation = (slot.generation + 1) & MAX_GENERATION;
        self.free.push(index);
        Ok(value)
    }

    fn occupancy(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

pub(crate) struct ResourcePool<T> {
    inner: RwLock<PoolInner<T>>,
}

impl<T> ResourcePool<T> {
    pub fn with_capacity(capacity: usize) -> ResourcePool<T> {
        ResourcePool {
            inner: RwLock::new(PoolInner::with_capacity(capacity)),
        }
    }

    /// Finds a free slot, stores `value` with a refcount of one and returns
    /// its id.
    pub fn assign(&self, value: T) -> Result<RawId> {
        self.inner.write().unwrap().assign(value)
    }

    pub fn add_ref(&self, id: RawId) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.slot_mut(id)?.refcount += 1;
        Ok(())
    }

    /// See [`PoolInner::release`].
    pub fn release(&self, id: RawId) -> Result<Option<T>> {
        self.inner.write().unwrap().release(id)
    }

    pub fn is_alive(&self, id: RawId) -> bool {
        self.inner.read().unwrap().slot(id).is_ok()
    }

    /// Shared access to a validated slot.
    pub fn read<R>(&self, id: RawId, f: impl FnOnce(&T) -> R) -> Result<R> {
        let inner = self.inner.read().unwrap();
        let slot = inner.slot(id)?;
        // refcount > 0 implies the value is present
        Ok(f(slot.value.as_ref().ok_or(Error::InvalidHandle)?))
    }

    /// Exclusive access to a validated slot.
    pub fn write<R>(&self, id: RawId, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut inner = self.inner.write().unwrap();
        let slot = inner.slot_mut(id)?;
        Ok(f(slot.value.as_mut().ok_or(Error::InvalidHandle)?))
    }

    pub fn refcount(&self, id: RawId) -> Result<u32> {
        let inner = self.inner.read().unwrap();
        Ok(inner.slot(id)?.refcount)
    }

    pub fn occupancy(&self) -> usize {
        self.inner.read().unwrap().occupancy()
    }

    /// Tears the pool down, returning every live value for destruction.
    /// Remaining references are forfeited.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.write().unwrap();
        let mut values = Vec::new();
        for (i, slot) in inner.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                if slot.refcount > 1 {
                    warn!("pool slot {} still referenced at teardown", i);
                }
                slot.refcount = 0;
                slot.generation = (slot.generation + 1) & MAX_GENERATION;
                values.push(value);
            }
        }
        inner.free.clear();
        let count = inner.slots.len();
        for i in 0..count {
            inner.free.push((count - 1 - i) as u32);
        }
        values
    }
}

struct CachedSlot<K, V> {
    key: K,
    value: V,
    hash: u64,
}

struct CachedInner<K, V> {
    pool: PoolInner<CachedSlot<K, V>>,
    /// hash -> slot indices sharing that hash
    index: FxHashMap<u64, SmallVec<[u32; 1]>>,
}

/// Content-addressed pool: structurally equal keys share a slot.
pub(crate) struct CachedPool<K: Hash + Eq, V> {
    inner: RwLock<CachedInner<K, V>>,
}

impl<K: Hash + Eq, V> CachedPool<K, V> {
    pub fn with_capacity(capacity: usize) -> CachedPool<K, V> {
        CachedPool {
            inner: RwLock::new(CachedInner {
                pool: PoolInner::with_capacity(capacity),
                index: FxHashMap::default(),
            }),
        }
    }

    /// Looks the key up by hash, probing every entry that shares the hash;
    /// on a hit the slot gains a reference, on a miss `create` builds the
    /// value for a fresh slot. Returns `(id, inserted)`.
    pub fn find_or_insert(
        &self,
        key: K,
        create: impl FnOnce(&K) -> Result<V>,
    ) -> Result<(RawId, bool)> {
        let hash = fxhash::hash64(&key);
        let mut inner = self.inner.write().unwrap();

        let found = {
            let inner = &*inner;
            inner.index.get(&hash).and_then(|candidates| {
                candidates.iter().find_map(|&i| {
                    let slot = &inner.pool.slots[i as usize];
                    match slot.value.as_ref() {
                        Some(cached) if cached.key == key => {
                            Some(RawId::new(i, slot.generation))
                        }
                        _ => None,
                    }
                })
            })
        };
        if let Some(id) = found {
            inner.pool.slot_mut(id)?.refcount += 1;
            return Ok((id, false));
        }

        let value = create(&key)?;
        let id = inner.pool.assign(CachedSlot { key, value, hash })?;
        inner.index.entry(hash).or_default().push(id.index());
        Ok((id, true))
    }

    /// Drops one reference; on the last one the entry leaves the hash index
    /// and its value is handed back for destruction.
    pub fn release(&self, id: RawId) -> Result<Option<V>> {
        let mut inner = self.inner.write().unwrap();
        match inner.pool.release(id)? {
            Some(cached) => {
                if let Some(candidates) = inner.index.get_mut(&cached.hash) {
                    candidates.retain(|&mut i| i != id.index());
                    if candidates.is_empty() {
                        inner.index.remove(&cached.hash);
                    }
                }
                Ok(Some(cached.value))
            }
            None => Ok(None),
        }
    }

    pub fn read<R>(&self, id: RawId, f: impl FnOnce(&K, &V) -> R) -> Result<R> {
        let inner = self.inner.read().unwrap();
        let slot = inner.pool.slot(id)?;
        let cached = slot.value.as_ref().ok_or(Error::InvalidHandle)?;
        Ok(f(&cached.key, &cached.value))
    }

    pub fn refcount(&self, id: RawId) -> Result<u32> {
        let inner = self.inner.read().unwrap();
        Ok(inner.pool.slot(id)?.refcount)
    }

    pub fn occupancy(&self) -> usize {
        self.inner.read().unwrap().pool.occupancy()
    }

    pub fn drain(&self) -> Vec<V> {
        let mut inner = self.inner.write().unwrap();
        inner.index.clear();
        let mut values = Vec::new();
        for slot in inner.pool.slots.iter_mut() {
            if let Some(cached) = slot.value.take() {
                slot.refcount = 0;
                slot.generation = (slot.generation + 1) & MAX_GENERATION;
                values.push(cached.value);
            }
        }
        inner.pool.free.clear();
        let count = inner.pool.slots.len();
        for i in 0..count {
            inner.pool.free.push((count - 1 - i) as u32);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_release_roundtrip() {
        let pool = ResourcePool::with_capacity(4);
        let before = pool.occupancy();
        let id = pool.assign("a").unwrap();
        assert!(pool.is_alive(id));
        assert_eq!(pool.release(id).unwrap(), Some("a"));
        assert!(!pool.is_alive(id));
        assert_eq!(pool.occupancy(), before);

        // same slot, next generation
        let id2 = pool.assign("b").unwrap();
        assert_eq!(id2.index(), id.index());
        assert_eq!(id2.generation(), id.generation() + 1);
        pool.release(id2).unwrap();
    }

    #[test]
    fn stale_handles_fail() {
        let pool = ResourcePool::with_capacity(4);
        let id = pool.assign(1u32).unwrap();
        pool.release(id).unwrap();
        assert_eq!(pool.read(id, |v| *v), Err(Error::InvalidHandle));
        assert_eq!(pool.release(id), Err(Error::InvalidHandle));
    }

    #[test]
    fn refcount_defers_destruction() {
        let pool = ResourcePool::with_capacity(4);
        let id = pool.assign(1u32).unwrap();
        pool.add_ref(id).unwrap();
        assert_eq!(pool.release(id).unwrap(), None);
        assert!(pool.is_alive(id));
        assert_eq!(pool.release(id).unwrap(), Some(1));
        assert!(!pool.is_alive(id));
    }

    #[test]
    fn overflow() {
        let pool = ResourcePool::with_capacity(2);
        pool.assign(0u32).unwrap();
        pool.assign(1u32).unwrap();
        assert_eq!(pool.assign(2u32), Err(Error::PoolOverflow));
    }

    #[test]
    fn cached_pool_dedups_equal_keys() {
        let pool: CachedPool<u32, String> = CachedPool::with_capacity(8);
        let (a, inserted_a) = pool.find_or_insert(7, |k| Ok(k.to_string())).unwrap();
        let (b, inserted_b) = pool.find_or_insert(7, |_| panic!("must not rebuild")).unwrap();
        assert!(inserted_a);
        assert!(!inserted_b);
        assert_eq!(a, b);
        assert_eq!(pool.refcount(a).unwrap(), 2);

        let (c, inserted_c) = pool.find_or_insert(8, |k| Ok(k.to_string())).unwrap();
        assert!(inserted_c);
        assert_ne!(a, c);
    }

    #[test]
    fn cached_pool_release_evicts() {
        let pool: CachedPool<u32, u32> = CachedPool::with_capacity(8);
        let (id, _) = pool.find_or_insert(1, |_| Ok(10)).unwrap();
        let (_, _) = pool.find_or_insert(1, |_| Ok(10)).unwrap();
        assert_eq!(pool.release(id).unwrap(), None);
        assert_eq!(pool.release(id).unwrap(), Some(10));
        // a fresh insert rebuilds the value
        let (id2, inserted) = pool.find_or_insert(1, |_| Ok(11)).unwrap();
        assert!(inserted);
        assert_ne!(id, id2);
    }
}
