//! Command batches.
//!
//! A batch is one tracked submission: it owns the fences and semaphores
//! handed to the driver, the resource references that must survive until
//! the device signals, and the pending readback requests delivered on
//! completion. Batches live in a fixed pool addressed by
//! `(index, generation)` so stale ids are detectable after slot reuse.

use crate::driver::{NativeBuffer, NativeFence, NativeSemaphore};
use crate::error::{Error, Result};
use crate::handle::{FramebufferId, GfxResourceId, RenderPassId, UniqueId};
use crate::resources::ResourceManager;
use crate::staging::StagingIdx;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Bounded cooperative retries before an acquire fails.
const ACQUIRE_RETRIES: usize = 10;

/// Identifier of a submitted batch.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct CmdBatchId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl CmdBatchId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for CmdBatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CmdBatchId[{}:{}]", self.index, self.generation)
    }
}

/// A deferred GPU->CPU read served from a staging page once the batch
/// completes.
pub(crate) struct ReadbackRequest {
    pub buffer: NativeBuffer,
    pub offset: u64,
    pub size: u64,
    pub staging: StagingIdx,
    pub callback: Box<dyn FnOnce(&[u8]) + Send>,
}

#[derive(Default)]
pub(crate) struct CmdBatch {
    fences: Vec<NativeFence>,
    semaphores: Vec<NativeSemaphore>,
    retained: Vec<GfxResourceId>,
    render_passes: Vec<RenderPassId>,
    framebuffers: Vec<FramebufferId>,
    readbacks: Vec<ReadbackRequest>,
    complete: bool,
}

impl CmdBatch {
    /// Resets owned lists for reuse. The slot generation bumps on release,
    /// not here.
    pub fn initialize(&mut self) {
        debug_assert!(self.fences.is_empty() && self.retained.is_empty());
        self.fences.clear();
        self.semaphores.clear();
        self.retained.clear();
        self.render_passes.clear();
        self.framebuffers.clear();
        self.readbacks.clear();
        self.complete = false;
    }

    pub fn fences(&self) -> &[NativeFence] {
        &self.fences
    }

    pub fn acquire_fence(&mut self, manager: &ResourceManager) -> Result<NativeFence> {
        let fence = manager.create_fence()?;
        self.fences.push(fence);
        Ok(fence)
    }

    pub fn acquire_semaphore(&mut self, manager: &ResourceManager) -> Result<NativeSemaphore> {
        let semaphore = manager.create_semaphore()?;
        self.semaphores.push(semaphore);
        Ok(semaphore)
    }

    /// Holds a reference to `id` until the batch completes.
    pub fn retain(&mut self, manager: &ResourceManager, id: GfxResourceId) -> Result<()> {
        manager.retain_id(id)?;
        self.retained.push(id);
        Ok(())
    }

    pub fn add_readback(&mut self, request: ReadbackRequest) {
        self.readbacks.push(request);
    }

    /// Takes over a cached render-pass reference until completion.
    pub fn retain_render_pass(&mut self, id: UniqueId<RenderPassId>) {
        self.render_passes.push(id.release());
    }

    pub fn retain_framebuffer(&mut self, id: UniqueId<FramebufferId>) {
        self.framebuffers.push(id.release());
    }

    /// Non-destructive completion probe.
    pub fn is_complete(&self, manager: &ResourceManager) -> bool {
        self.complete
            || self
                .fences
                .iter()
                .all(|&fence| manager.driver().fence_signaled(fence))
    }

    /// Queries the driver fences; once all have signaled, delivers pending
    /// readbacks, returns sync primitives to the manager and drops every
    /// retained reference. Returns true iff fully completed.
    pub fn on_complete(&mut self, manager: &ResourceManager) -> bool {
        if self.complete {
            return true;
        }
        if !self
            .fences
            .iter()
            .all(|&fence| manager.driver().fence_signaled(fence))
        {
            return false;
        }

        for request in self.readbacks.drain(..) {
            let mut data = vec![0u8; request.size as usize];
            match manager
                .driver()
                .read_mapped(request.buffer, request.offset, &mut data)
            {
                Ok(()) => (request.callback)(&data),
                Err(e) => error!("readback failed: {}", e),
            }
            manager.release_staging_buffer(request.staging);
        }

        manager.release_fences(&mut self.fences);
        manager.release_semaphores(&mut self.semaphores);
        for id in self.retained.drain(..) {
            if let Err(e) = manager.release_id(id) {
                error!("batch release of {:?} failed: {}", id, e);
            }
        }
        for id in self.framebuffers.drain(..) {
            if let Err(e) = manager.release_framebuffer_raw(id) {
                error!("batch release of {:?} failed: {}", id, e);
            }
        }
        for id in self.render_passes.drain(..) {
            if let Err(e) = manager.release_render_pass_raw(id) {
                error!("batch release of {:?} failed: {}", id, e);
            }
        }
        self.complete = true;
        true
    }

    /// Force-releases everything without waiting for the device; readback
    /// callbacks are dropped unserved. Only for submissions that failed
    /// mid-record.
    pub fn abort(&mut self, manager: &ResourceManager) {
        warn!("aborting batch, readbacks dropped: {}", self.readbacks.len());
        for request in self.readbacks.drain(..) {
            manager.release_staging_buffer(request.staging);
        }
        manager.release_fences(&mut self.fences);
        manager.release_semaphores(&mut self.semaphores);
        for id in self.retained.drain(..) {
            let _ = manager.release_id(id);
        }
        for id in self.framebuffers.drain(..) {
            let _ = manager.release_framebuffer_raw(id);
        }
        for id in self.render_passes.drain(..) {
            let _ = manager.release_render_pass_raw(id);
        }
        self.complete = true;
    }
}

/// Fixed-capacity batch pool with a lock-free slot bitmap.
pub(crate) struct BatchPool {
    bits: Vec<AtomicU64>,
    generations: Vec<AtomicU32>,
    slots: Vec<Mutex<CmdBatch>>,
    capacity: usize,
}

impl BatchPool {
    pub fn new(capacity: usize) -> BatchPool {
        let words = (capacity + 63) / 64;
        let mut bits = Vec::with_capacity(words);
        for w in 0..words {
            let valid = (capacity - w * 64).min(64);
            // bits past the capacity stay permanently assigned
            let initial = if valid == 64 { 0 } else { !0u64 << valid };
            bits.push(AtomicU64::new(initial));
        }
        BatchPool {
            bits,
            generations: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            slots: (0..capacity).map(|_| Mutex::new(CmdBatch::default())).collect(),
            capacity,
        }
    }

    fn try_assign(&self) -> Option<u32> {
        for (w, word) in self.bits.iter().enumerate() {
            let mut current = word.load(Ordering::Relaxed);
            loop {
                let free = !current;
                if free == 0 {
                    break;
                }
                let bit = free.trailing_zeros();
                match word.compare_exchange_weak(
                    current,
                    current | 1 << bit,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some((w * 64) as u32 + bit),
                    Err(actual) => current = actual,
                }
            }
        }
        None
    }

    /// Bounded-retry acquisition; yields between scans.
    pub fn acquire(&self) -> Result<CmdBatchId> {
        for attempt in 0..ACQUIRE_RETRIES {
            if let Some(index) = self.try_assign() {
                self.slots[index as usize].lock().unwrap().initialize();
                return Ok(CmdBatchId {
                    index,
                    generation: self.generations[index as usize].load(Ordering::Acquire),
                });
            }
            if attempt + 1 < ACQUIRE_RETRIES {
                std::thread::yield_now();
            }
        }
        Err(Error::PoolOverflow)
    }

    /// Releases the slot; the generation bump invalidates outstanding ids.
    pub fn unassign(&self, index: u32) {
        debug_assert!((index as usize) < self.capacity);
        self.generations[index as usize].fetch_add(1, Ordering::AcqRel);
        let word = &self.bits[index as usize / 64];
        word.fetch_and(!(1u64 << (index % 64)), Ordering::AcqRel);
    }

    /// Current generation of a slot; a mismatch with a stored id means the
    /// batch was recycled.
    pub fn generation(&self, index: u32) -> Option<u32> {
        self.generations
            .get(index as usize)
            .map(|g| g.load(Ordering::Acquire))
    }

    pub fn batch(&self, index: u32) -> Option<MutexGuard<CmdBatch>> {
        self.slots.get(index as usize).map(|s| s.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_generation() {
        let pool = BatchPool::new(4);
        let id = pool.acquire().unwrap();
        assert_eq!(pool.generation(id.index()), Some(id.generation()));
        pool.unassign(id.index());
        assert_eq!(pool.generation(id.index()), Some(id.generation() + 1));

        // slot is reusable with the new generation
        let id2 = pool.acquire().unwrap();
        assert_eq!(id2.index(), id.index());
        assert_eq!(id2.generation(), id.generation() + 1);
        pool.unassign(id2.index());
    }

    #[test]
    fn overflow_after_capacity() {
        let pool = BatchPool::new(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(pool.acquire(), Err(Error::PoolOverflow));
        pool.unassign(a.index());
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn capacity_not_a_multiple_of_word_size() {
        let pool = BatchPool::new(3);
        let ids: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert!(ids.iter().all(|id| (id.index() as usize) < 3));
        assert_eq!(pool.acquire(), Err(Error::PoolOverflow));
    }
}
