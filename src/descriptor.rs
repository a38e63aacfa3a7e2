//! Descriptor set and layout descriptions.

use crate::handle::{DescriptorSetLayoutId, GfxResourceId, SamplerId};
use crate::pipeline::ShaderStageFlags;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorType {
    Sampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    /// Uniform buffer bound with a per-draw dynamic offset.
    UniformBufferDynamic,
    StorageBuffer,
    StorageBufferDynamic,
    InputAttachment,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub count: u32,
    pub stages: ShaderStageFlags,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutDesc {
    /// The layout substituted for unused set slots of a pipeline layout.
    pub fn empty() -> DescriptorSetLayoutDesc {
        DescriptorSetLayoutDesc::default()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct PipelineLayoutDesc {
    /// One entry per set slot; unused slots hold the empty layout.
    pub set_layouts: Vec<DescriptorSetLayoutId>,
    pub push_constant_size: u32,
    pub push_constant_stages: ShaderStageFlags,
}

/// One bound resource inside a descriptor set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Descriptor {
    Sampler {
        sampler: SamplerId,
    },
    SampledImage {
        image: GfxResourceId,
        sampler: SamplerId,
    },
    StorageImage {
        image: GfxResourceId,
    },
    UniformBuffer {
        buffer: GfxResourceId,
        offset: u64,
        size: u64,
    },
    StorageBuffer {
        buffer: GfxResourceId,
        offset: u64,
        size: u64,
    },
    InputAttachment {
        image: GfxResourceId,
    },
}

/// Structural key of a descriptor set; equal keys share one driver set.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DescriptorSetDesc {
    pub layout: DescriptorSetLayoutId,
    pub descriptors: Vec<(u32, Descriptor)>,
}
