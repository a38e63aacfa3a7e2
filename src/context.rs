//! Recording contexts.
//!
//! A context wraps the batch being recorded and translates high-level calls
//! into [`Command`](crate::Command) values. Capabilities nest: a compute
//! context can do everything a transfer context can, a graphics context
//! everything a compute context can (expressed through `Deref`, so the
//! recorder stays monomorphic). The render context is separate and only
//! valid inside an active render pass.
//!
//! A context is only valid while its node's callback runs; callbacks must
//! not retain one past return.

use crate::batch::{CmdBatch, ReadbackRequest};
use crate::buffer::BufferUsageFlags;
use crate::command::{
    BufferCopy, BufferImageCopy, ClearColor, Command, ImageBlit, ImageCopy, ImageResolve,
    IndexType, QueueType, StencilFaces,
};
use crate::error::{Error, Result};
use crate::handle::{
    ComputePipelineId, DescriptorSetId, GfxResourceId, GraphicsPipelineId, MeshPipelineId,
    RenderPassId,
};
use crate::image::ImageSubresourceRange;
use crate::pipeline::{ScissorRect, ShaderStageFlags};
use crate::resources::ResourceManager;
use crate::sampler::Filter;
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::ops::{Deref, DerefMut};

/// Escape hatch to the raw command stream of the current node.
pub struct NativeContext<'a> {
    pub queue: QueueType,
    pub commands: &'a mut Vec<Command>,
}

/// What a render callback sees of its enclosing (possibly merged) pass.
#[derive(Copy, Clone, Debug)]
pub struct RenderContextInfo {
    pub render_pass: RenderPassId,
    pub subpass_index: u32,
    /// Same as the viewport count of the pipeline description.
    pub layer_count: u32,
}

pub(crate) struct Recorder<'a> {
    pub manager: &'a ResourceManager,
    pub queue: QueueType,
    pub commands: &'a mut Vec<Command>,
    pub batch: &'a mut CmdBatch,
    /// virtual handle -> concrete handle bound this frame
    pub outputs: &'a mut FxHashMap<GfxResourceId, GfxResourceId>,
}

impl<'a> Recorder<'a> {
    fn resolve(&self, id: GfxResourceId) -> Result<GfxResourceId> {
        if id.is_virtual() {
            self.outputs.get(&id).copied().ok_or(Error::InvalidHandle)
        } else {
            Ok(id)
        }
    }

    fn buffer(&mut self, id: GfxResourceId) -> Result<crate::driver::NativeBuffer> {
        let id = self.resolve(id)?;
        self.batch.retain(self.manager, id)?;
        self.manager.native_buffer_handle(id)
    }

    fn image(&mut self, id: GfxResourceId) -> Result<crate::driver::NativeImage> {
        let id = self.resolve(id)?;
        self.batch.retain(self.manager, id)?;
        self.manager.native_image_handle(id)
    }
}

//--------------------------------------------------------------------------------------------------

/// Transfer-class recorder: clears, fills, copies, host access, readbacks
/// and present.
pub struct TransferContext<'a> {
    pub(crate) rec: Recorder<'a>,
}

impl<'a> TransferContext<'a> {
    pub(crate) fn new(rec: Recorder<'a>) -> TransferContext<'a> {
        TransferContext { rec }
    }

    pub fn native_context(&mut self) -> NativeContext {
        NativeContext {
            queue: self.rec.queue,
            commands: self.rec.commands,
        }
    }

    /// Concrete handle bound to a virtual output this frame.
    pub fn get_output(&self, id: GfxResourceId) -> Option<GfxResourceId> {
        if id.is_virtual() {
            self.rec.outputs.get(&id).copied()
        } else {
            Some(id)
        }
    }

    /// Overrides the binding of a virtual handle with an externally produced
    /// resource.
    pub fn set_output(&mut self, id: GfxResourceId, resource: GfxResourceId) {
        debug_assert!(id.is_virtual());
        self.rec.outputs.insert(id, resource);
    }

    pub fn clear_color_image(
        &mut self,
        image: GfxResourceId,
        color: ClearColor,
        ranges: &[ImageSubresourceRange],
    ) -> Result<()> {
        let native = self.rec.image(image)?;
        self.rec.commands.push(Command::ClearColorImage {
            image: native,
            color,
            ranges: SmallVec::from_slice(ranges),
        });
        Ok(())
    }

    pub fn clear_depth_stencil_image(
        &mut self,
        image: GfxResourceId,
        depth: f32,
        stencil: Option<u32>,
        ranges: &[ImageSubresourceRange],
    ) -> Result<()> {
        let native = self.rec.image(image)?;
        self.rec.commands.push(Command::ClearDepthStencilImage {
            image: native,
            depth,
            stencil,
            ranges: SmallVec::from_slice(ranges),
        });
        Ok(())
    }

    pub fn fill_buffer(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        size: u64,
        data: u32,
    ) -> Result<()> {
        let native = self.rec.buffer(buffer)?;
        self.rec.commands.push(Command::FillBuffer {
            buffer: native,
            offset,
            size,
            data,
        });
        Ok(())
    }

    /// Small inline update recorded into the command stream.
    pub fn update_buffer(&mut self, buffer: GfxResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let native = self.rec.buffer(buffer)?;
        self.rec.commands.push(Command::UpdateBuffer {
            buffer: native,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Immediate write through the persistent mapping of a host-visible
    /// buffer.
    pub fn update_host_buffer(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let native = self.rec.buffer(buffer)?;
        self.rec.manager.driver().write_mapped(native, offset, data)
    }

    /// Maps a window of a host-visible buffer for the duration of `f`.
    pub fn map_host_buffer(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        size: u64,
        f: impl FnOnce(&mut [u8]),
    ) -> Result<()> {
        let native = self.rec.buffer(buffer)?;
        let driver = self.rec.manager.driver();
        let mut window = vec![0u8; size as usize];
        driver.read_mapped(native, offset, &mut window)?;
        f(&mut window);
        driver.write_mapped(native, offset, &window)
    }

    /// Asynchronous read of a buffer range through a staging page; the
    /// callback runs when the batch completes.
    pub fn read_buffer(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        size: u64,
        callback: impl FnOnce(&[u8]) + Send + 'static,
    ) -> Result<()> {
        let src = self.rec.buffer(buffer)?;
        let (page, staging) = self
            .rec
            .manager
            .create_staging_buffer(BufferUsageFlags::TRANSFER_DST)?;
        let page_native = self.rec.manager.native_buffer_handle(page)?;
        self.rec.commands.push(Command::CopyBuffer {
            src,
            dst: page_native,
            ranges: SmallVec::from_slice(&[BufferCopy {
                src_offset: offset,
                dst_offset: 0,
                size,
            }]),
        });
        self.rec.batch.add_readback(ReadbackRequest {
            buffer: page_native,
            offset: 0,
            size,
            staging,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Asynchronous whole-image read through a staging page.
    pub fn read_image(
        &mut self,
        image: GfxResourceId,
        callback: impl FnOnce(&[u8]) + Send + 'static,
    ) -> Result<()> {
        let resolved = self.rec.resolve(image)?;
        let desc = self.rec.manager.image_description(resolved);
        let d = desc.dimensions;
        let size = d.width() as u64
            * d.height() as u64
            * d.depth() as u64
            * d.array_layers() as u64
            * desc.format.byte_size() as u64;
        let native = self.rec.image(image)?;
        let (page, staging) = self
            .rec
            .manager
            .create_staging_buffer(BufferUsageFlags::TRANSFER_DST)?;
        let page_native = self.rec.manager.native_buffer_handle(page)?;
        self.rec.commands.push(Command::CopyImageToBuffer {
            src: native,
            dst: page_native,
            ranges: SmallVec::from_slice(&[BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: Default::default(),
                image_offset: [0; 3],
                image_extent: [d.width(), d.height(), d.depth()],
            }]),
        });
        self.rec.batch.add_readback(ReadbackRequest {
            buffer: page_native,
            offset: 0,
            size,
            staging,
            callback: Box::new(callback),
        });
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        src: GfxResourceId,
        dst: GfxResourceId,
        ranges: &[BufferCopy],
    ) -> Result<()> {
        let src = self.rec.buffer(src)?;
        let dst = self.rec.buffer(dst)?;
        self.rec.commands.push(Command::CopyBuffer {
            src,
            dst,
            ranges: SmallVec::from_slice(ranges),
        });
        Ok(())
    }

    pub fn copy_image(
        &mut self,
        src: GfxResourceId,
        dst: GfxResourceId,
        ranges: &[ImageCopy],
    ) -> Result<()> {
        let src = self.rec.image(src)?;
        let dst = self.rec.image(dst)?;
        self.rec.commands.push(Command::CopyImage {
            src,
            dst,
            ranges: SmallVec::from_slice(ranges),
        });
        Ok(())
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: GfxResourceId,
        dst: GfxResourceId,
        ranges: &[BufferImageCopy],
    ) -> Result<()> {
        let src = self.rec.buffer(src)?;
        let dst = self.rec.image(dst)?;
        self.rec.commands.push(Command::CopyBufferToImage {
            src,
            dst,
            ranges: SmallVec::from_slice(ranges),
        });
        Ok(())
    }

    pub fn copy_image_to_buffer(
        &mut self,
        src: GfxResourceId,
        dst: GfxResourceId,
        ranges: &[BufferImageCopy],
    ) -> Result<()> {
        let src = self.rec.image(src)?;
        let dst = self.rec.buffer(dst)?;
        self.rec.commands.push(Command::CopyImageToBuffer {
            src,
            dst,
            ranges: SmallVec::from_slice(ranges),
        });
        Ok(())
    }

    /// Enqueues a swap of the given image. Only queues reported by
    /// [`RenderGraph::present_queues`](crate::RenderGraph::present_queues)
    /// accept this.
    pub fn present(&mut self, image: GfxResourceId, mip_level: u32, array_layer: u32) -> Result<()> {
        if !self
            .rec
            .manager
            .driver()
            .present_queues()
            .contains(self.rec.queue.into())
        {
            return Err(Error::QueueMismatch);
        }
        let native = self.rec.image(image)?;
        self.rec.commands.push(Command::Present {
            image: native,
            mip_level,
            array_layer,
        });
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------

/// Compute-class recorder; supersets transfer.
#[repr(transparent)]
pub struct ComputeContext<'a> {
    inner: TransferContext<'a>,
}

impl<'a> ComputeContext<'a> {
    pub(crate) fn new(rec: Recorder<'a>) -> ComputeContext<'a> {
        ComputeContext {
            inner: TransferContext::new(rec),
        }
    }

    pub fn bind_pipeline(&mut self, pipeline: ComputePipelineId) -> Result<()> {
        let native = self.rec().manager.native_compute_pipeline(pipeline)?;
        self.rec().commands.push(Command::BindComputePipeline { pipeline: native });
        Ok(())
    }

    pub fn bind_descriptor_set(
        &mut self,
        index: u32,
        set: DescriptorSetId,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        let native = self.rec().manager.native_descriptor_set(set)?;
        self.rec().commands.push(Command::BindDescriptorSet {
            index,
            set: native,
            dynamic_offsets: SmallVec::from_slice(dynamic_offsets),
        });
        Ok(())
    }

    pub fn push_constants(&mut self, offset: u32, data: &[u8], stages: ShaderStageFlags) {
        self.rec().commands.push(Command::PushConstants {
            offset,
            data: data.to_vec(),
            stages,
        });
    }

    pub fn dispatch(&mut self, group_count: [u32; 3]) {
        self.rec().commands.push(Command::Dispatch { group_count });
    }

    pub fn dispatch_indirect(&mut self, buffer: GfxResourceId, offset: u64) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        self.rec().commands.push(Command::DispatchIndirect {
            buffer: native,
            offset,
        });
        Ok(())
    }

    pub fn dispatch_base(&mut self, base_group: [u32; 3], group_count: [u32; 3]) {
        self.rec().commands.push(Command::DispatchBase {
            base_group,
            group_count,
        });
    }

    fn rec(&mut self) -> &mut Recorder<'a> {
        &mut self.inner.rec
    }
}

impl<'a> Deref for ComputeContext<'a> {
    type Target = TransferContext<'a>;

    fn deref(&self) -> &TransferContext<'a> {
        &self.inner
    }
}

impl<'a> DerefMut for ComputeContext<'a> {
    fn deref_mut(&mut self) -> &mut TransferContext<'a> {
        &mut self.inner
    }
}

//--------------------------------------------------------------------------------------------------

/// Graphics-class recorder; supersets compute.
#[repr(transparent)]
pub struct GraphicsContext<'a> {
    inner: ComputeContext<'a>,
}

impl<'a> GraphicsContext<'a> {
    pub(crate) fn new(rec: Recorder<'a>) -> GraphicsContext<'a> {
        GraphicsContext {
            inner: ComputeContext::new(rec),
        }
    }

    pub fn blit_image(
        &mut self,
        src: GfxResourceId,
        dst: GfxResourceId,
        filter: Filter,
        regions: &[ImageBlit],
    ) -> Result<()> {
        let rec = &mut self.inner.inner.rec;
        let src = rec.image(src)?;
        let dst = rec.image(dst)?;
        rec.commands.push(Command::BlitImage {
            src,
            dst,
            filter,
            regions: SmallVec::from_slice(regions),
        });
        Ok(())
    }

    /// Resolves a multisampled image into a single-sample one.
    pub fn resolve_image(
        &mut self,
        src: GfxResourceId,
        dst: GfxResourceId,
        regions: &[ImageResolve],
    ) -> Result<()> {
        let rec = &mut self.inner.inner.rec;
        let src = rec.image(src)?;
        let dst = rec.image(dst)?;
        rec.commands.push(Command::ResolveImage {
            src,
            dst,
            regions: SmallVec::from_slice(regions),
        });
        Ok(())
    }
}

impl<'a> Deref for GraphicsContext<'a> {
    type Target = ComputeContext<'a>;

    fn deref(&self) -> &ComputeContext<'a> {
        &self.inner
    }
}

impl<'a> DerefMut for GraphicsContext<'a> {
    fn deref_mut(&mut self) -> &mut ComputeContext<'a> {
        &mut self.inner
    }
}

//--------------------------------------------------------------------------------------------------

/// Recorder scoped to one subpass of an active render pass.
pub struct RenderContext<'a, 'g> {
    graphics: &'g mut GraphicsContext<'a>,
    info: RenderContextInfo,
    bound_pipeline: Option<crate::driver::NativePipeline>,
}

impl<'a, 'g> RenderContext<'a, 'g> {
    pub(crate) fn new(
        graphics: &'g mut GraphicsContext<'a>,
        info: RenderContextInfo,
    ) -> RenderContext<'a, 'g> {
        RenderContext {
            graphics,
            info,
            bound_pipeline: None,
        }
    }

    fn rec(&mut self) -> &mut Recorder<'a> {
        &mut self.graphics.inner.inner.rec
    }

    pub fn native_context(&mut self) -> NativeContext {
        let queue = self.rec().queue;
        NativeContext {
            queue,
            commands: self.rec().commands,
        }
    }

    pub fn context_info(&self) -> RenderContextInfo {
        self.info
    }

    /// Drops the bound pipeline, descriptor sets, push constants and dynamic
    /// state tracking. Required at subpass boundaries.
    pub fn reset_states(&mut self) {
        self.bound_pipeline = None;
    }

    pub fn bind_graphics_pipeline(&mut self, pipeline: GraphicsPipelineId) -> Result<()> {
        let native = self.rec().manager.native_graphics_pipeline(pipeline)?;
        if self.bound_pipeline == Some(native) {
            return Ok(());
        }
        self.bound_pipeline = Some(native);
        self.rec()
            .commands
            .push(Command::BindGraphicsPipeline { pipeline: native });
        Ok(())
    }

    pub fn bind_mesh_pipeline(&mut self, pipeline: MeshPipelineId) -> Result<()> {
        let native = self.rec().manager.native_mesh_pipeline(pipeline)?;
        if self.bound_pipeline == Some(native) {
            return Ok(());
        }
        self.bound_pipeline = Some(native);
        self.rec()
            .commands
            .push(Command::BindGraphicsPipeline { pipeline: native });
        Ok(())
    }

    pub fn bind_descriptor_set(
        &mut self,
        index: u32,
        set: DescriptorSetId,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        let native = self.rec().manager.native_descriptor_set(set)?;
        self.rec().commands.push(Command::BindDescriptorSet {
            index,
            set: native,
            dynamic_offsets: SmallVec::from_slice(dynamic_offsets),
        });
        Ok(())
    }

    pub fn push_constants(&mut self, offset: u32, data: &[u8], stages: ShaderStageFlags) {
        self.rec().commands.push(Command::PushConstants {
            offset,
            data: data.to_vec(),
            stages,
        });
    }

    //------------------------------------------------------------------
    // dynamic state

    pub fn set_scissor(&mut self, first: u32, scissors: &[ScissorRect]) {
        self.rec().commands.push(Command::SetScissors {
            first,
            scissors: SmallVec::from_slice(scissors),
        });
    }

    pub fn set_depth_bias(&mut self, constant_factor: f32, clamp: f32, slope_factor: f32) {
        self.rec().commands.push(Command::SetDepthBias {
            constant_factor,
            clamp,
            slope_factor,
        });
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.rec().commands.push(Command::SetLineWidth { width });
    }

    pub fn set_depth_bounds(&mut self, min: f32, max: f32) {
        self.rec().commands.push(Command::SetDepthBounds { min, max });
    }

    pub fn set_stencil_compare_mask(&mut self, faces: StencilFaces, mask: u32) {
        self.rec()
            .commands
            .push(Command::SetStencilCompareMask { faces, mask });
    }

    pub fn set_stencil_write_mask(&mut self, faces: StencilFaces, mask: u32) {
        self.rec()
            .commands
            .push(Command::SetStencilWriteMask { faces, mask });
    }

    pub fn set_stencil_reference(&mut self, faces: StencilFaces, reference: u32) {
        self.rec()
            .commands
            .push(Command::SetStencilReference { faces, reference });
    }

    pub fn set_blend_constants(&mut self, constants: [f32; 4]) {
        self.rec()
            .commands
            .push(Command::SetBlendConstants { constants });
    }

    //------------------------------------------------------------------
    // geometry

    pub fn bind_index_buffer(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        self.rec().commands.push(Command::BindIndexBuffer {
            buffer: native,
            offset,
            index_type,
        });
        Ok(())
    }

    pub fn bind_vertex_buffer(
        &mut self,
        binding: u32,
        buffer: GfxResourceId,
        offset: u64,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        self.rec().commands.push(Command::BindVertexBuffer {
            binding,
            buffer: native,
            offset,
        });
        Ok(())
    }

    //------------------------------------------------------------------
    // draws

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.rec().commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.rec().commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    pub fn draw_indirect(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        self.rec().commands.push(Command::DrawIndirect {
            buffer: native,
            offset,
            draw_count,
            stride,
        });
        Ok(())
    }

    pub fn draw_indexed_indirect(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        self.rec().commands.push(Command::DrawIndexedIndirect {
            buffer: native,
            offset,
            draw_count,
            stride,
        });
        Ok(())
    }

    pub fn draw_indirect_count(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        count_buffer: GfxResourceId,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        let count_native = self.rec().buffer(count_buffer)?;
        self.rec().commands.push(Command::DrawIndirectCount {
            buffer: native,
            offset,
            count_buffer: count_native,
            count_offset,
            max_draw_count,
            stride,
        });
        Ok(())
    }

    pub fn draw_indexed_indirect_count(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        count_buffer: GfxResourceId,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        let count_native = self.rec().buffer(count_buffer)?;
        self.rec().commands.push(Command::DrawIndexedIndirectCount {
            buffer: native,
            offset,
            count_buffer: count_native,
            count_offset,
            max_draw_count,
            stride,
        });
        Ok(())
    }

    pub fn draw_mesh_tasks(&mut self, task_count: u32, first_task: u32) {
        self.rec().commands.push(Command::DrawMeshTasks {
            task_count,
            first_task,
        });
    }

    pub fn draw_mesh_tasks_indirect(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        self.rec().commands.push(Command::DrawMeshTasksIndirect {
            buffer: native,
            offset,
            draw_count,
            stride,
        });
        Ok(())
    }

    pub fn draw_mesh_tasks_indirect_count(
        &mut self,
        buffer: GfxResourceId,
        offset: u64,
        count_buffer: GfxResourceId,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let native = self.rec().buffer(buffer)?;
        let count_native = self.rec().buffer(count_buffer)?;
        self.rec().commands.push(Command::DrawMeshTasksIndirectCount {
            buffer: native,
            offset,
            count_buffer: count_native,
            count_offset,
            max_draw_count,
            stride,
        });
        Ok(())
    }
}
