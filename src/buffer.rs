//! Buffer descriptions.

use crate::format::InitialState;
use bitflags::bitflags;

bitflags! {
    #[derive(Default)]
    pub struct BufferUsageFlags: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM      = 1 << 2;
        const STORAGE      = 1 << 3;
        const INDEX        = 1 << 4;
        const VERTEX       = 1 << 5;
        const INDIRECT     = 1 << 6;
    }
}

/// Memory pool a resource is allocated from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemoryType {
    DeviceLocal,
    /// Host-visible, coherent; used for CPU->GPU staging and uniforms.
    HostCoherent,
    /// Host-visible, cached; used for GPU->CPU readback.
    HostCached,
}

impl Default for MemoryType {
    fn default() -> MemoryType {
        MemoryType::DeviceLocal
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsageFlags,
    pub memory: MemoryType,
}

impl Default for BufferDesc {
    fn default() -> BufferDesc {
        BufferDesc {
            size: 0,
            usage: BufferUsageFlags::default(),
            memory: MemoryType::DeviceLocal,
        }
    }
}

/// Declaration of a logical buffer bound to a concrete one at submit time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct VirtualBufferDesc {
    pub size: u64,
    pub initial_state: InitialState,
}
