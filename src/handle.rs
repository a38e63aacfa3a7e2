//! Generational resource handles.
//!
//! Every resource owned by the manager is addressed by a slot index plus a
//! generation counter; the generation is bumped each time the slot is
//! released, so stale copies of a handle stop validating. The unified
//! [`GfxResourceId`] additionally carries the resource kind so the graph can
//! route an opaque handle to the right pool.

use std::fmt;

pub(crate) const INDEX_BITS: u32 = 20;
pub(crate) const GENERATION_BITS: u32 = 12;
pub(crate) const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;
pub(crate) const MAX_GENERATION: u32 = (1 << GENERATION_BITS) - 1;

/// Kind tag carried by a [`GfxResourceId`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ResourceKind {
    /// Pure ordering token, no driver object behind it.
    Dependency = 0,
    Buffer = 1,
    Image = 2,
    VirtualBuffer = 3,
    VirtualImage = 4,
    /// Reserved; creation is not supported yet.
    RayTracingGeometry = 5,
    /// Reserved; creation is not supported yet.
    RayTracingScene = 6,
}

impl ResourceKind {
    pub(crate) fn from_tag(tag: u8) -> Option<ResourceKind> {
        Some(match tag {
            0 => ResourceKind::Dependency,
            1 => ResourceKind::Buffer,
            2 => ResourceKind::Image,
            3 => ResourceKind::VirtualBuffer,
            4 => ResourceKind::VirtualImage,
            5 => ResourceKind::RayTracingGeometry,
            6 => ResourceKind::RayTracingScene,
            _ => return None,
        })
    }
}

/// Index + generation pair addressing a slot inside one pool.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct RawId(u32);

impl RawId {
    pub(crate) fn new(index: u32, generation: u32) -> RawId {
        debug_assert!(index <= MAX_INDEX);
        RawId((generation & MAX_GENERATION) << INDEX_BITS | index)
    }

    pub fn index(self) -> u32 {
        self.0 & MAX_INDEX
    }

    pub fn generation(self) -> u32 {
        self.0 >> INDEX_BITS
    }
}

impl fmt::Debug for RawId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}:{}]", self.index(), self.generation())
    }
}

/// Opaque handle to a graph-visible resource: `(index, generation, kind)`.
///
/// Plain copies are weak references and must be validated
/// (`ResourceManager::is_resource_alive`) before use.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct GfxResourceId(u64);

impl GfxResourceId {
    pub(crate) fn new(kind: ResourceKind, raw: RawId) -> GfxResourceId {
        GfxResourceId((kind as u64) << 32 | raw.0 as u64)
    }

    pub fn kind(self) -> ResourceKind {
        // the tag is only ever written from a valid ResourceKind
        ResourceKind::from_tag((self.0 >> 32) as u8).unwrap_or(ResourceKind::Dependency)
    }

    pub(crate) fn raw(self) -> RawId {
        RawId(self.0 as u32)
    }

    pub fn index(self) -> u32 {
        self.raw().index()
    }

    pub fn generation(self) -> u32 {
        self.raw().generation()
    }

    /// Virtual handles denote logical resources that the graph binds to a
    /// concrete one at submit time.
    pub fn is_virtual(self) -> bool {
        match self.kind() {
            ResourceKind::VirtualBuffer | ResourceKind::VirtualImage => true,
            _ => false,
        }
    }
}

impl fmt::Debug for GfxResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}{:?}", self.kind(), self.raw())
    }
}

macro_rules! typed_id {
    ($(#[$m:meta])* $name:ident) => {
        $(#[$m])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name(pub(crate) RawId);

        impl $name {
            pub fn index(self) -> u32 {
                self.0.index()
            }

            pub fn generation(self) -> u32 {
                self.0.generation()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}{:?}", stringify!($name), self.0)
            }
        }
    };
}

typed_id!(/// Immutable sampler object.
    SamplerId);
typed_id!(DescriptorSetLayoutId);
typed_id!(PipelineLayoutId);
typed_id!(GraphicsPipelineTemplateId);
typed_id!(MeshPipelineTemplateId);
typed_id!(ComputePipelineTemplateId);
typed_id!(/// Concrete (specialized) graphics pipeline.
    GraphicsPipelineId);
typed_id!(MeshPipelineId);
typed_id!(ComputePipelineId);
typed_id!(/// Cached render-pass descriptor.
    RenderPassId);
typed_id!(FramebufferId);
typed_id!(DescriptorSetId);
typed_id!(/// Baked (pre-recorded) command buffer.
    CommandBufferId);

/// Owning wrapper around a handle: holds at most one reference and must be
/// given back to the manager to release it.
///
/// Dropping an armed `UniqueId` leaks the reference; this is logged, and
/// trips an assertion in debug builds.
pub struct UniqueId<I: Copy + fmt::Debug> {
    id: I,
    armed: bool,
}

impl<I: Copy + fmt::Debug> UniqueId<I> {
    pub(crate) fn new(id: I) -> UniqueId<I> {
        UniqueId { id, armed: true }
    }

    /// Returns a weak copy of the wrapped handle.
    pub fn get(&self) -> I {
        self.id
    }

    /// Disarms the wrapper and returns the handle. Only the manager releases
    /// the reference itself.
    pub(crate) fn release(mut self) -> I {
        self.armed = false;
        self.id
    }
}

impl<I: Copy + fmt::Debug> fmt::Debug for UniqueId<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UniqueId({:?})", self.id)
    }
}

impl<I: Copy + fmt::Debug> Drop for UniqueId<I> {
    fn drop(&mut self) {
        if self.armed {
            error!("leaking unique resource id {:?}", self.id);
            debug_assert!(false, "leaking unique resource id");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_id_packing() {
        let id = RawId::new(MAX_INDEX, MAX_GENERATION);
        assert_eq!(id.index(), MAX_INDEX);
        assert_eq!(id.generation(), MAX_GENERATION);

        let id = RawId::new(42, 7);
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 7);
    }

    #[test]
    fn gfx_id_kind_roundtrip() {
        for &kind in &[
            ResourceKind::Dependency,
            ResourceKind::Buffer,
            ResourceKind::Image,
            ResourceKind::VirtualBuffer,
            ResourceKind::VirtualImage,
            ResourceKind::RayTracingGeometry,
            ResourceKind::RayTracingScene,
        ] {
            let id = GfxResourceId::new(kind, RawId::new(3, 1));
            assert_eq!(id.kind(), kind);
            assert_eq!(id.index(), 3);
            assert_eq!(id.generation(), 1);
        }
    }

    #[test]
    fn virtual_kinds() {
        let v = GfxResourceId::new(ResourceKind::VirtualImage, RawId::new(0, 0));
        let c = GfxResourceId::new(ResourceKind::Image, RawId::new(0, 0));
        assert!(v.is_virtual());
        assert!(!c.is_virtual());
    }

    #[test]
    fn stale_ids_compare_unequal() {
        let a = RawId::new(5, 1);
        let b = RawId::new(5, 2);
        assert_ne!(a, b);
    }
}
