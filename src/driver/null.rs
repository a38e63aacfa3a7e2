//! Recording null driver.
//!
//! Stands in for a real device in tests and tooling: every object is a
//! counter handle, host-visible buffers are plain byte vectors, submissions
//! are recorded verbatim, and fences signal when the caller waits. Buffer
//! transfer commands are executed against the byte vectors so readback
//! paths observe real data.

use super::{
    ComputePipelineCreateInfo, Driver, DriverCaps, GraphicsPipelineCreateInfo, HostMemoryInfo,
    MemoryInfo, NativeBuffer, NativeDescriptorSet, NativeDescriptorSetLayout, NativeFence,
    NativeFramebuffer, NativeImage, NativePipeline, NativePipelineLayout, NativeRenderPass,
    NativeSampler, NativeSemaphore, NativeShaderModule, QueueSubmission,
};
use crate::buffer::BufferDesc;
use crate::command::{Command, QueueMask, QueueType};
use crate::descriptor::{DescriptorSetLayoutDesc, PipelineLayoutDesc};
use crate::error::{Error, Result};
use crate::image::ImageDesc;
use crate::pipeline::ShaderStageFlags;
use crate::renderpass::RenderPassInfo;
use crate::sampler::SamplerDesc;
use fxhash::{FxHashMap, FxHashSet};
use std::sync::Mutex;
use std::time::Duration;

struct NullBuffer {
    desc: BufferDesc,
    storage: Vec<u8>,
}

/// One recorded queue submission.
#[derive(Clone)]
pub struct SubmissionRecord {
    pub queue: QueueType,
    pub commands: Vec<Command>,
    pub wait_semaphores: usize,
    pub signal_semaphores: usize,
    pub fence: Option<NativeFence>,
}

#[derive(Default)]
struct NullState {
    next_handle: u64,
    buffers: FxHashMap<u64, NullBuffer>,
    images: FxHashMap<u64, ImageDesc>,
    samplers: FxHashSet<u64>,
    shader_modules: FxHashSet<u64>,
    ds_layouts: FxHashSet<u64>,
    descriptor_sets: FxHashSet<u64>,
    pipeline_layouts: FxHashSet<u64>,
    pipelines: FxHashSet<u64>,
    render_passes: FxHashSet<u64>,
    framebuffers: FxHashSet<u64>,
    /// fence handle -> signaled
    fences: FxHashMap<u64, bool>,
    semaphores: FxHashSet<u64>,
    submissions: Vec<SubmissionRecord>,
    presents: Vec<(NativeImage, u32, u32)>,
    graphics_pipelines_created: u32,
    compute_pipelines_created: u32,
}

impl NullState {
    fn alloc(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn execute(&mut self, commands: &[Command]) {
        for cmd in commands {
            match cmd {
                Command::UpdateBuffer {
                    buffer,
                    offset,
                    data,
                } => {
                    if let Some(buf) = self.buffers.get_mut(&buffer.0) {
                        let off = *offset as usize;
                        if off + data.len() <= buf.storage.len() {
                            buf.storage[off..off + data.len()].copy_from_slice(data);
                        }
                    }
                }
                Command::FillBuffer {
                    buffer,
                    offset,
                    size,
                    data,
                } => {
                    if let Some(buf) = self.buffers.get_mut(&buffer.0) {
                        let off = *offset as usize;
                        let end = (off + *size as usize).min(buf.storage.len());
                        for chunk in buf.storage[off..end].chunks_mut(4) {
                            let bytes = data.to_le_bytes();
                            chunk.copy_from_slice(&bytes[..chunk.len()]);
                        }
                    }
                }
                Command::CopyBuffer { src, dst, ranges } => {
                    for r in ranges.iter() {
                        let data = match self.buffers.get(&src.0) {
                            Some(buf) => {
                                let off = r.src_offset as usize;
                                let end = (off + r.size as usize).min(buf.storage.len());
                                buf.storage[off..end].to_vec()
                            }
                            None => continue,
                        };
                        if let Some(buf) = self.buffers.get_mut(&dst.0) {
                            let off = r.dst_offset as usize;
                            let end = (off + data.len()).min(buf.storage.len());
                            buf.storage[off..end].copy_from_slice(&data[..end - off]);
                        }
                    }
                }
                Command::Present {
                    image,
                    mip_level,
                    array_layer,
                } => {
                    self.presents.push((*image, *mip_level, *array_layer));
                }
                _ => {}
            }
        }
    }
}

pub struct NullDriver {
    state: Mutex<NullState>,
    caps: DriverCaps,
    host_memory: HostMemoryInfo,
}

impl NullDriver {
    pub fn new() -> NullDriver {
        NullDriver {
            state: Mutex::new(NullState::default()),
            caps: DriverCaps {
                dual_source_blend: true,
                mesh_shaders: true,
                uniform_buffer_offset_alignment: 256,
            },
            host_memory: HostMemoryInfo {
                uniform_heap_size: 512 << 20,
                transfer_heap_size: 1 << 30,
            },
        }
    }

    /// Every submission recorded so far, in submit order.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn presents(&self) -> Vec<(NativeImage, u32, u32)> {
        self.state.lock().unwrap().presents.clone()
    }

    pub fn graphics_pipelines_created(&self) -> u32 {
        self.state.lock().unwrap().graphics_pipelines_created
    }

    /// Number of live driver objects (excluding sync primitives).
    pub fn live_objects(&self) -> usize {
        let s = self.state.lock().unwrap();
        s.buffers.len()
            + s.images.len()
            + s.samplers.len()
            + s.shader_modules.len()
            + s.ds_layouts.len()
            + s.descriptor_sets.len()
            + s.pipeline_layouts.len()
            + s.pipelines.len()
            + s.render_passes.len()
            + s.framebuffers.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.state.lock().unwrap().images.len()
    }
}

impl Default for NullDriver {
    fn default() -> NullDriver {
        NullDriver::new()
    }
}

impl Driver for NullDriver {
    fn caps(&self) -> DriverCaps {
        self.caps
    }

    fn host_memory(&self) -> HostMemoryInfo {
        self.host_memory
    }

    fn present_queues(&self) -> QueueMask {
        QueueMask::GRAPHICS
    }

    fn is_buffer_supported(&self, desc: &BufferDesc) -> bool {
        desc.size > 0
    }

    fn is_image_supported(&self, desc: &ImageDesc) -> bool {
        desc.dimensions.width() > 0 && desc.samples.is_power_of_two()
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        _allocator: &dyn super::MemAllocator,
    ) -> Result<NativeBuffer> {
        if !self.is_buffer_supported(desc) {
            return Err(Error::UnsupportedDescription);
        }
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.buffers.insert(
            h,
            NullBuffer {
                desc: *desc,
                storage: vec![0; desc.size as usize],
            },
        );
        Ok(NativeBuffer(h))
    }

    fn destroy_buffer(&self, buffer: NativeBuffer) {
        self.state.lock().unwrap().buffers.remove(&buffer.0);
    }

    fn buffer_memory_info(&self, buffer: NativeBuffer) -> Result<MemoryInfo> {
        let s = self.state.lock().unwrap();
        let buf = s.buffers.get(&buffer.0).ok_or(Error::InvalidHandle)?;
        Ok(MemoryInfo {
            size: buf.desc.size,
            memory_type: buf.desc.memory,
        })
    }

    fn write_mapped(&self, buffer: NativeBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let buf = s.buffers.get_mut(&buffer.0).ok_or(Error::InvalidHandle)?;
        let off = offset as usize;
        if off + data.len() > buf.storage.len() {
            return Err(Error::UnsupportedDescription);
        }
        buf.storage[off..off + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_mapped(&self, buffer: NativeBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let s = self.state.lock().unwrap();
        let buf = s.buffers.get(&buffer.0).ok_or(Error::InvalidHandle)?;
        let off = offset as usize;
        if off + out.len() > buf.storage.len() {
            return Err(Error::UnsupportedDescription);
        }
        out.copy_from_slice(&buf.storage[off..off + out.len()]);
        Ok(())
    }

    fn create_image(
        &self,
        desc: &ImageDesc,
        _allocator: &dyn super::MemAllocator,
    ) -> Result<NativeImage> {
        if !self.is_image_supported(desc) {
            return Err(Error::UnsupportedDescription);
        }
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.images.insert(h, *desc);
        Ok(NativeImage(h))
    }

    fn destroy_image(&self, image: NativeImage) {
        self.state.lock().unwrap().images.remove(&image.0);
    }

    fn image_memory_info(&self, image: NativeImage) -> Result<MemoryInfo> {
        let s = self.state.lock().unwrap();
        let desc = s.images.get(&image.0).ok_or(Error::InvalidHandle)?;
        let d = desc.dimensions;
        let size = d.width() as u64
            * d.height() as u64
            * d.depth() as u64
            * d.array_layers() as u64
            * desc.format.byte_size() as u64
            * desc.samples as u64;
        Ok(MemoryInfo {
            size,
            memory_type: crate::buffer::MemoryType::DeviceLocal,
        })
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<NativeSampler> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.samplers.insert(h);
        Ok(NativeSampler(h))
    }

    fn destroy_sampler(&self, sampler: NativeSampler) {
        self.state.lock().unwrap().samplers.remove(&sampler.0);
    }

    fn create_shader_module(
        &self,
        code: &[u8],
        _stage: ShaderStageFlags,
    ) -> Result<NativeShaderModule> {
        if code.is_empty() {
            return Err(Error::UnsupportedDescription);
        }
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.shader_modules.insert(h);
        Ok(NativeShaderModule(h))
    }

    fn destroy_shader_module(&self, module: NativeShaderModule) {
        self.state.lock().unwrap().shader_modules.remove(&module.0);
    }

    fn create_descriptor_set_layout(
        &self,
        _desc: &DescriptorSetLayoutDesc,
    ) -> Result<NativeDescriptorSetLayout> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.ds_layouts.insert(h);
        Ok(NativeDescriptorSetLayout(h))
    }

    fn destroy_descriptor_set_layout(&self, layout: NativeDescriptorSetLayout) {
        self.state.lock().unwrap().ds_layouts.remove(&layout.0);
    }

    fn create_pipeline_layout(
        &self,
        _desc: &PipelineLayoutDesc,
        _set_layouts: &[NativeDescriptorSetLayout],
    ) -> Result<NativePipelineLayout> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.pipeline_layouts.insert(h);
        Ok(NativePipelineLayout(h))
    }

    fn destroy_pipeline_layout(&self, layout: NativePipelineLayout) {
        self.state.lock().unwrap().pipeline_layouts.remove(&layout.0);
    }

    fn create_descriptor_set(
        &self,
        _layout: NativeDescriptorSetLayout,
        _bindings: &[(u32, super::NativeDescriptor)],
    ) -> Result<NativeDescriptorSet> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.descriptor_sets.insert(h);
        Ok(NativeDescriptorSet(h))
    }

    fn destroy_descriptor_set(&self, set: NativeDescriptorSet) {
        self.state.lock().unwrap().descriptor_sets.remove(&set.0);
    }

    fn create_render_pass(&self, _info: &RenderPassInfo) -> Result<NativeRenderPass> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.render_passes.insert(h);
        Ok(NativeRenderPass(h))
    }

    fn destroy_render_pass(&self, render_pass: NativeRenderPass) {
        self.state.lock().unwrap().render_passes.remove(&render_pass.0);
    }

    fn create_framebuffer(
        &self,
        _render_pass: NativeRenderPass,
        _attachments: &[NativeImage],
        _width: u32,
        _height: u32,
        _layers: u32,
    ) -> Result<NativeFramebuffer> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.framebuffers.insert(h);
        Ok(NativeFramebuffer(h))
    }

    fn destroy_framebuffer(&self, framebuffer: NativeFramebuffer) {
        self.state.lock().unwrap().framebuffers.remove(&framebuffer.0);
    }

    fn create_graphics_pipeline(
        &self,
        _info: &GraphicsPipelineCreateInfo,
    ) -> Result<NativePipeline> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.pipelines.insert(h);
        s.graphics_pipelines_created += 1;
        Ok(NativePipeline(h))
    }

    fn create_compute_pipeline(&self, _info: &ComputePipelineCreateInfo) -> Result<NativePipeline> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.pipelines.insert(h);
        s.compute_pipelines_created += 1;
        Ok(NativePipeline(h))
    }

    fn destroy_pipeline(&self, pipeline: NativePipeline) {
        self.state.lock().unwrap().pipelines.remove(&pipeline.0);
    }

    fn create_fence(&self) -> Result<NativeFence> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.fences.insert(h, false);
        Ok(NativeFence(h))
    }

    fn reset_fence(&self, fence: NativeFence) {
        if let Some(signaled) = self.state.lock().unwrap().fences.get_mut(&fence.0) {
            *signaled = false;
        }
    }

    fn destroy_fence(&self, fence: NativeFence) {
        self.state.lock().unwrap().fences.remove(&fence.0);
    }

    fn fence_signaled(&self, fence: NativeFence) -> bool {
        *self
            .state
            .lock()
            .unwrap()
            .fences
            .get(&fence.0)
            .unwrap_or(&false)
    }

    fn wait_fences(&self, fences: &[NativeFence], _timeout: Duration) -> bool {
        // the null device "finishes" whatever the caller waits on
        let mut s = self.state.lock().unwrap();
        for fence in fences {
            if let Some(signaled) = s.fences.get_mut(&fence.0) {
                *signaled = true;
            }
        }
        true
    }

    fn create_semaphore(&self) -> Result<NativeSemaphore> {
        let mut s = self.state.lock().unwrap();
        let h = s.alloc();
        s.semaphores.insert(h);
        Ok(NativeSemaphore(h))
    }

    fn destroy_semaphore(&self, semaphore: NativeSemaphore) {
        self.state.lock().unwrap().semaphores.remove(&semaphore.0);
    }

    fn submit(&self, submission: QueueSubmission) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.execute(submission.commands);
        s.submissions.push(SubmissionRecord {
            queue: submission.queue,
            commands: submission.commands.to_vec(),
            wait_semaphores: submission.wait_semaphores.len(),
            signal_semaphores: submission.signal_semaphores.len(),
            fence: submission.fence,
        });
        Ok(())
    }

    fn wait_idle(&self) {
        let mut s = self.state.lock().unwrap();
        for signaled in s.fences.values_mut() {
            *signaled = true;
        }
    }
}
