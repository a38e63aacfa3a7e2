//! The driver boundary.
//!
//! Everything below this trait is an external collaborator: the graph and
//! the resource manager schedule, record and track, but never encode real
//! device commands themselves. Implementations translate the recorded
//! [`Command`](crate::Command) streams into their API of choice.

use crate::buffer::{BufferDesc, MemoryType};
use crate::command::{Command, QueueMask, QueueType};
use crate::descriptor::{DescriptorSetLayoutDesc, PipelineLayoutDesc};
use crate::error::Result;
use crate::image::ImageDesc;
use crate::pipeline::{DynamicStateFlags, RenderState, ShaderStageFlags, VertexInputState};
use crate::renderpass::RenderPassInfo;
use crate::sampler::SamplerDesc;
use std::fmt;
use std::time::Duration;

pub mod null;

macro_rules! native_handle {
    ($(#[$m:meta])* $name:ident) => {
        $(#[$m])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name(pub u64);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

native_handle!(NativeBuffer);
native_handle!(NativeImage);
native_handle!(NativeSampler);
native_handle!(NativeShaderModule);
native_handle!(NativeDescriptorSetLayout);
native_handle!(NativeDescriptorSet);
native_handle!(NativePipelineLayout);
native_handle!(NativePipeline);
native_handle!(NativeRenderPass);
native_handle!(NativeFramebuffer);
native_handle!(NativeFence);
native_handle!(NativeSemaphore);

/// Opaque memory-allocator policy handed through to the driver on resource
/// creation. Implementations are driver-specific; the core only routes them.
pub trait MemAllocator: Send + Sync {}

/// The default allocator: one uniform device-memory allocator backing every
/// allocation that does not name its own.
pub struct UniAllocator;

impl MemAllocator for UniAllocator {}

/// Device capabilities the core consults during validation.
#[derive(Copy, Clone, Debug)]
pub struct DriverCaps {
    pub dual_source_blend: bool,
    pub mesh_shaders: bool,
    pub uniform_buffer_offset_alignment: u64,
}

impl Default for DriverCaps {
    fn default() -> DriverCaps {
        DriverCaps {
            dual_source_blend: false,
            mesh_shaders: false,
            uniform_buffer_offset_alignment: 256,
        }
    }
}

/// Host-visible heap totals; drives the staging page-size ladder.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostMemoryInfo {
    pub uniform_heap_size: u64,
    pub transfer_heap_size: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct MemoryInfo {
    pub size: u64,
    pub memory_type: MemoryType,
}

/// One descriptor-set binding with every handle already resolved to its
/// native object.
#[derive(Copy, Clone, Debug)]
pub enum NativeDescriptor {
    Sampler {
        sampler: NativeSampler,
    },
    SampledImage {
        image: NativeImage,
        sampler: NativeSampler,
    },
    StorageImage {
        image: NativeImage,
    },
    UniformBuffer {
        buffer: NativeBuffer,
        offset: u64,
        size: u64,
    },
    StorageBuffer {
        buffer: NativeBuffer,
        offset: u64,
        size: u64,
    },
    InputAttachment {
        image: NativeImage,
    },
}

/// Everything needed to build one concrete graphics or mesh pipeline.
pub struct GraphicsPipelineCreateInfo<'a> {
    pub shaders: &'a [(ShaderStageFlags, NativeShaderModule)],
    pub layout: NativePipelineLayout,
    pub render_pass: NativeRenderPass,
    pub subpass: u32,
    pub render_state: &'a RenderState,
    pub dynamic_state: DynamicStateFlags,
    pub vertex_input: &'a VertexInputState,
    pub viewport_count: u32,
    pub patch_control_points: u32,
    pub specialization: &'a [(u32, u32)],
}

pub struct ComputePipelineCreateInfo<'a> {
    pub shader: NativeShaderModule,
    pub layout: NativePipelineLayout,
    pub local_group_size: [u32; 3],
    pub specialization: &'a [(u32, u32)],
}

/// One queue submission: a recorded command stream plus the synchronization
/// primitives the batch owns.
pub struct QueueSubmission<'a> {
    pub queue: QueueType,
    pub commands: &'a [Command],
    pub wait_semaphores: &'a [NativeSemaphore],
    pub signal_semaphores: &'a [NativeSemaphore],
    pub fence: Option<NativeFence>,
}

/// Thin interface to the device.
///
/// All methods take `&self`; implementations are internally synchronized.
pub trait Driver: Send + Sync {
    fn caps(&self) -> DriverCaps;
    fn host_memory(&self) -> HostMemoryInfo;
    /// Queues that accept `Present` commands.
    fn present_queues(&self) -> QueueMask;

    fn is_buffer_supported(&self, desc: &BufferDesc) -> bool;
    fn is_image_supported(&self, desc: &ImageDesc) -> bool;

    fn create_buffer(&self, desc: &BufferDesc, allocator: &dyn MemAllocator)
        -> Result<NativeBuffer>;
    fn destroy_buffer(&self, buffer: NativeBuffer);
    fn buffer_memory_info(&self, buffer: NativeBuffer) -> Result<MemoryInfo>;
    /// Writes into a host-visible buffer through its persistent mapping.
    fn write_mapped(&self, buffer: NativeBuffer, offset: u64, data: &[u8]) -> Result<()>;
    /// Reads back from a host-visible buffer.
    fn read_mapped(&self, buffer: NativeBuffer, offset: u64, out: &mut [u8]) -> Result<()>;

    fn create_image(&self, desc: &ImageDesc, allocator: &dyn MemAllocator) -> Result<NativeImage>;
    fn destroy_image(&self, image: NativeImage);
    fn image_memory_info(&self, image: NativeImage) -> Result<MemoryInfo>;

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<NativeSampler>;
    fn destroy_sampler(&self, sampler: NativeSampler);

    fn create_shader_module(
        &self,
        code: &[u8],
        stage: ShaderStageFlags,
    ) -> Result<NativeShaderModule>;
    fn destroy_shader_module(&self, module: NativeShaderModule);

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> Result<NativeDescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: NativeDescriptorSetLayout);

    fn create_pipeline_layout(
        &self,
        desc: &PipelineLayoutDesc,
        set_layouts: &[NativeDescriptorSetLayout],
    ) -> Result<NativePipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: NativePipelineLayout);

    fn create_descriptor_set(
        &self,
        layout: NativeDescriptorSetLayout,
        bindings: &[(u32, NativeDescriptor)],
    ) -> Result<NativeDescriptorSet>;
    fn destroy_descriptor_set(&self, set: NativeDescriptorSet);

    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<NativeRenderPass>;
    fn destroy_render_pass(&self, render_pass: NativeRenderPass);

    fn create_framebuffer(
        &self,
        render_pass: NativeRenderPass,
        attachments: &[NativeImage],
        width: u32,
        height: u32,
        layers: u32,
    ) -> Result<NativeFramebuffer>;
    fn destroy_framebuffer(&self, framebuffer: NativeFramebuffer);

    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineCreateInfo,
    ) -> Result<NativePipeline>;
    fn create_compute_pipeline(&self, info: &ComputePipelineCreateInfo) -> Result<NativePipeline>;
    fn destroy_pipeline(&self, pipeline: NativePipeline);

    fn create_fence(&self) -> Result<NativeFence>;
    fn reset_fence(&self, fence: NativeFence);
    fn destroy_fence(&self, fence: NativeFence);
    /// Non-blocking completion probe.
    fn fence_signaled(&self, fence: NativeFence) -> bool;
    /// Blocks until all fences signal or the timeout elapses; returns false
    /// on timeout.
    fn wait_fences(&self, fences: &[NativeFence], timeout: Duration) -> bool;

    fn create_semaphore(&self) -> Result<NativeSemaphore>;
    fn destroy_semaphore(&self, semaphore: NativeSemaphore);

    fn submit(&self, submission: QueueSubmission) -> Result<()>;
    /// Blocks until every pending submission completes.
    fn wait_idle(&self);
}
