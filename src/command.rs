//! The recorded driver command stream.
//!
//! Contexts translate high-level calls into [`Command`] values; the graph
//! hands the accumulated stream to the driver at submit. Commands carry
//! native handles only: resolution from graph handles happens at record
//! time.

use crate::driver::{
    NativeBuffer, NativeDescriptorSet, NativeFramebuffer, NativeImage, NativePipeline,
    NativeRenderPass,
};
use crate::image::{ImageSubresourceLayers, ImageSubresourceRange};
use crate::pipeline::{ScissorRect, ShaderStageFlags, Viewport};
use crate::renderpass::ClearValue;
use crate::sampler::Filter;
use bitflags::bitflags;
use smallvec::SmallVec;

/// Queue a node executes on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueueType {
    Graphics,
    AsyncCompute,
    Transfer,
}

bitflags! {
    #[derive(Default)]
    pub struct QueueMask: u32 {
        const GRAPHICS = 1 << 0;
        const ASYNC_COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

impl From<QueueType> for QueueMask {
    fn from(q: QueueType) -> QueueMask {
        match q {
            QueueType::Graphics => QueueMask::GRAPHICS,
            QueueType::AsyncCompute => QueueMask::ASYNC_COMPUTE,
            QueueType::Transfer => QueueMask::TRANSFER,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum ClearColor {
    Float([f32; 4]),
    Uint([u32; 4]),
    Sint([i32; 4]),
}

#[derive(Copy, Clone, Debug)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: [i32; 3],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: [i32; 3],
    pub extent: [u32; 3],
}

#[derive(Copy, Clone, Debug)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: [i32; 3],
    pub image_extent: [u32; 3],
}

#[derive(Copy, Clone, Debug)]
pub struct ImageBlit {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offsets: [[i32; 3]; 2],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offsets: [[i32; 3]; 2],
}

#[derive(Copy, Clone, Debug)]
pub struct ImageResolve {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: [i32; 3],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: [i32; 3],
    pub extent: [u32; 3],
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StencilFaces {
    Front,
    Back,
    FrontAndBack,
}

#[derive(Clone, Debug)]
pub enum Command {
    // transfer ------------------------------------------------------------
    ClearColorImage {
        image: NativeImage,
        color: ClearColor,
        ranges: SmallVec<[ImageSubresourceRange; 1]>,
    },
    ClearDepthStencilImage {
        image: NativeImage,
        depth: f32,
        stencil: Option<u32>,
        ranges: SmallVec<[ImageSubresourceRange; 1]>,
    },
    FillBuffer {
        buffer: NativeBuffer,
        offset: u64,
        size: u64,
        data: u32,
    },
    UpdateBuffer {
        buffer: NativeBuffer,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: NativeBuffer,
        dst: NativeBuffer,
        ranges: SmallVec<[BufferCopy; 1]>,
    },
    CopyImage {
        src: NativeImage,
        dst: NativeImage,
        ranges: SmallVec<[ImageCopy; 1]>,
    },
    CopyBufferToImage {
        src: NativeBuffer,
        dst: NativeImage,
        ranges: SmallVec<[BufferImageCopy; 1]>,
    },
    CopyImageToBuffer {
        src: NativeImage,
        dst: NativeBuffer,
        ranges: SmallVec<[BufferImageCopy; 1]>,
    },
    Present {
        image: NativeImage,
        mip_level: u32,
        array_layer: u32,
    },

    // compute -------------------------------------------------------------
    BindComputePipeline {
        pipeline: NativePipeline,
    },
    BindDescriptorSet {
        index: u32,
        set: NativeDescriptorSet,
        dynamic_offsets: SmallVec<[u32; 4]>,
    },
    PushConstants {
        offset: u32,
        data: Vec<u8>,
        stages: ShaderStageFlags,
    },
    Dispatch {
        group_count: [u32; 3],
    },
    DispatchIndirect {
        buffer: NativeBuffer,
        offset: u64,
    },
    DispatchBase {
        base_group: [u32; 3],
        group_count: [u32; 3],
    },

    // graphics ------------------------------------------------------------
    BlitImage {
        src: NativeImage,
        dst: NativeImage,
        filter: Filter,
        regions: SmallVec<[ImageBlit; 1]>,
    },
    ResolveImage {
        src: NativeImage,
        dst: NativeImage,
        regions: SmallVec<[ImageResolve; 1]>,
    },

    // render pass ---------------------------------------------------------
    BeginRenderPass {
        render_pass: NativeRenderPass,
        framebuffer: NativeFramebuffer,
        extent: (u32, u32),
        clear_values: SmallVec<[ClearValue; 8]>,
    },
    NextSubpass,
    EndRenderPass,
    BindGraphicsPipeline {
        pipeline: NativePipeline,
    },
    BindIndexBuffer {
        buffer: NativeBuffer,
        offset: u64,
        index_type: IndexType,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: NativeBuffer,
        offset: u64,
    },
    SetViewports {
        first: u32,
        viewports: SmallVec<[Viewport; 1]>,
    },
    SetScissors {
        first: u32,
        scissors: SmallVec<[ScissorRect; 1]>,
    },
    SetDepthBias {
        constant_factor: f32,
        clamp: f32,
        slope_factor: f32,
    },
    SetLineWidth {
        width: f32,
    },
    SetDepthBounds {
        min: f32,
        max: f32,
    },
    SetStencilCompareMask {
        faces: StencilFaces,
        mask: u32,
    },
    SetStencilWriteMask {
        faces: StencilFaces,
        mask: u32,
    },
    SetStencilReference {
        faces: StencilFaces,
        reference: u32,
    },
    SetBlendConstants {
        constants: [f32; 4],
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: NativeBuffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: NativeBuffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndirectCount {
        buffer: NativeBuffer,
        offset: u64,
        count_buffer: NativeBuffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirectCount {
        buffer: NativeBuffer,
        offset: u64,
        count_buffer: NativeBuffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    },
    DrawMeshTasks {
        task_count: u32,
        first_task: u32,
    },
    DrawMeshTasksIndirect {
        buffer: NativeBuffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawMeshTasksIndirectCount {
        buffer: NativeBuffer,
        offset: u64,
        count_buffer: NativeBuffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    },
}
