//! Staging-buffer sub-allocation.
//!
//! Three fixed page pools back host<->device transfers: `write`
//! (host-coherent, CPU to GPU), `read` (host-cached, GPU to CPU) and
//! `uniform` (host-coherent uniform data). Page buffers are created lazily
//! and kept alive for reuse; a [`StagingIdx`] hands a page back to its pool.

use crate::driver::HostMemoryInfo;
use crate::error::{Error, Result};
use crate::handle::GfxResourceId;
use std::fmt;
use std::sync::Mutex;

const MIB: u64 = 1 << 20;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StagingPoolKind {
    /// CPU -> GPU transfer source pages.
    Write,
    /// GPU -> CPU readback pages.
    Read,
    /// Uniform-buffer pages.
    Uniform,
}

impl StagingPoolKind {
    fn tag(self) -> u32 {
        match self {
            StagingPoolKind::Write => 1,
            StagingPoolKind::Read => 2,
            StagingPoolKind::Uniform => 3,
        }
    }

    fn from_tag(tag: u32) -> Option<StagingPoolKind> {
        match tag {
            1 => Some(StagingPoolKind::Write),
            2 => Some(StagingPoolKind::Read),
            3 => Some(StagingPoolKind::Uniform),
            _ => None,
        }
    }
}

/// Encodes `pool_tag:2 | slot:30`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct StagingIdx(u32);

impl StagingIdx {
    pub(crate) fn new(pool: StagingPoolKind, slot: u32) -> StagingIdx {
        debug_assert!(slot < 1 << 30);
        StagingIdx(pool.tag() << 30 | slot)
    }

    pub fn pool(self) -> Option<StagingPoolKind> {
        StagingPoolKind::from_tag(self.0 >> 30)
    }

    pub(crate) fn slot(self) -> u32 {
        self.0 & !(3 << 30)
    }
}

impl fmt::Debug for StagingIdx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StagingIdx({:?}:{})", self.pool(), self.slot())
    }
}

/// Transfer and uniform page sizes picked from the host-visible heap totals.
///
/// The heap is split across the pool capacity, then clamped to a discrete
/// ladder so page sizes stay predictable across devices.
pub(crate) fn pick_page_sizes(host: &HostMemoryInfo, capacity: u64) -> (u64, u64) {
    let per_slot_transfer = host.transfer_heap_size / capacity.max(1);
    let transfer = if per_slot_transfer > 512 * MIB {
        256 * MIB
    } else if per_slot_transfer > 128 * MIB {
        128 * MIB
    } else {
        64 * MIB
    };

    let per_slot_uniform = host.uniform_heap_size / capacity.max(1);
    let uniform = if per_slot_uniform > 256 * MIB {
        64 * MIB
    } else if per_slot_uniform > 64 * MIB {
        32 * MIB
    } else {
        16 * MIB
    };

    (transfer, uniform)
}

struct StagingSlots {
    /// Page buffers are created on first use and kept for reuse.
    pages: Vec<Option<GfxResourceId>>,
    in_use: Vec<bool>,
}

pub(crate) struct StagingPool {
    page_size: u64,
    slots: Mutex<StagingSlots>,
}

impl StagingPool {
    pub fn new(page_size: u64, capacity: usize) -> StagingPool {
        StagingPool {
            page_size,
            slots: Mutex::new(StagingSlots {
                pages: vec![None; capacity],
                in_use: vec![false; capacity],
            }),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Grabs a free page slot, creating the page buffer through
    /// `create_page` the first time the slot is used.
    pub fn assign(
        &self,
        create_page: impl FnOnce() -> Result<GfxResourceId>,
    ) -> Result<(u32, GfxResourceId)> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(Error::PoolOverflow)?;
        let page = match slots.pages[slot] {
            Some(page) => page,
            None => {
                let page = create_page()?;
                slots.pages[slot] = Some(page);
                page
            }
        };
        slots.in_use[slot] = true;
        Ok((slot as u32, page))
    }

    pub fn unassign(&self, slot: u32) {
        let mut slots = self.slots.lock().unwrap();
        match slots.in_use.get_mut(slot as usize) {
            Some(used) if *used => *used = false,
            _ => warn!("staging slot {} released twice", slot),
        }
    }

    pub fn page(&self, slot: u32) -> Option<GfxResourceId> {
        self.slots.lock().unwrap().pages.get(slot as usize).copied().flatten()
    }

    /// Takes every created page for release at teardown.
    pub fn drain(&self) -> Vec<GfxResourceId> {
        let mut slots = self.slots.lock().unwrap();
        for used in slots.in_use.iter_mut() {
            *used = false;
        }
        slots.pages.iter_mut().filter_map(|p| p.take()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{RawId, ResourceKind};

    fn page_id(i: u32) -> GfxResourceId {
        GfxResourceId::new(ResourceKind::Buffer, RawId::new(i, 0))
    }

    #[test]
    fn idx_encoding() {
        let idx = StagingIdx::new(StagingPoolKind::Uniform, 17);
        assert_eq!(idx.pool(), Some(StagingPoolKind::Uniform));
        assert_eq!(idx.slot(), 17);
        let idx = StagingIdx::new(StagingPoolKind::Write, 0);
        assert_eq!(idx.pool(), Some(StagingPoolKind::Write));
        assert_eq!(idx.slot(), 0);
    }

    #[test]
    fn page_size_ladder() {
        let host = |transfer: u64, uniform: u64| HostMemoryInfo {
            transfer_heap_size: transfer,
            uniform_heap_size: uniform,
        };
        // per-slot share over the top rung
        assert_eq!(
            pick_page_sizes(&host(64 * 1024 * MIB, 32 * 1024 * MIB), 32),
            (256 * MIB, 64 * MIB)
        );
        // middle rung
        assert_eq!(
            pick_page_sizes(&host(8 * 1024 * MIB, 4 * 1024 * MIB), 32),
            (128 * MIB, 32 * MIB)
        );
        // bottom rung
        assert_eq!(pick_page_sizes(&host(1024 * MIB, 512 * MIB), 32), (64 * MIB, 16 * MIB));
    }

    #[test]
    fn pages_are_reused() {
        let pool = StagingPool::new(MIB, 2);
        let (slot_a, page_a) = pool.assign(|| Ok(page_id(1))).unwrap();
        let (_slot_b, _) = pool.assign(|| Ok(page_id(2))).unwrap();
        assert!(pool.assign(|| Ok(page_id(3))).is_err());

        pool.unassign(slot_a);
        let (slot_c, page_c) = pool.assign(|| panic!("page must be reused")).unwrap();
        assert_eq!(slot_a, slot_c);
        assert_eq!(page_a, page_c);
    }
}
