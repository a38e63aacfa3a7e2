//! The resource manager.
//!
//! Owns every pool, issues and destroys resources, deduplicates immutable
//! derived objects (render passes, framebuffers, descriptor sets) through
//! cached pools, resolves named pipelines against pack-loaded templates,
//! recycles fences and semaphores, and sub-allocates staging pages.
//!
//! Destruction is deferred purely through reference counts: command batches
//! retain handles for the lifetime of a submission, so the last release of
//! a slot is the point where the driver object actually dies.

use crate::buffer::{BufferDesc, BufferUsageFlags, MemoryType, VirtualBufferDesc};
use crate::command::{Command, QueueType};
use crate::config::GraphicsConfig;
use crate::descriptor::{
    Descriptor, DescriptorSetDesc, DescriptorSetLayoutDesc, PipelineLayoutDesc,
};
use crate::driver::{
    ComputePipelineCreateInfo, Driver, DriverCaps, GraphicsPipelineCreateInfo, MemAllocator,
    MemoryInfo, NativeBuffer, NativeDescriptor, NativeDescriptorSet, NativeDescriptorSetLayout,
    NativeFence, NativeFramebuffer, NativeImage, NativePipeline, NativePipelineLayout,
    NativeRenderPass, NativeSampler, NativeSemaphore, NativeShaderModule, UniAllocator,
};
use crate::error::{Error, Result};
use crate::handle::{
    ComputePipelineId, ComputePipelineTemplateId, CommandBufferId, DescriptorSetId,
    DescriptorSetLayoutId, FramebufferId, GfxResourceId, GraphicsPipelineId,
    GraphicsPipelineTemplateId, MeshPipelineId, MeshPipelineTemplateId, PipelineLayoutId,
    RenderPassId, ResourceKind, SamplerId, UniqueId,
};
use crate::image::{ImageDesc, VirtualImageDesc};
use crate::pack::{PipelinePack, NO_SPEC_ID};
use crate::pipeline::{
    normalize_render_state, ComputePipelineDesc, DynamicStateFlags, GraphicsPipelineDesc,
    MeshPipelineDesc, PrimitiveTopology, ShaderStageFlags, VertexInputState,
};
use crate::pool::{CachedPool, ResourcePool};
use crate::renderpass::{FramebufferDesc, RenderPassInfo};
use crate::sampler::SamplerDesc;
use crate::staging::{pick_page_sizes, StagingIdx, StagingPool, StagingPoolKind};
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

struct BufferResource {
    native: NativeBuffer,
    desc: BufferDesc,
    /// Imported objects are not destroyed with the slot.
    owned: bool,
}

struct ImageResource {
    native: NativeImage,
    desc: ImageDesc,
    owned: bool,
}

struct VirtualBufferResource {
    desc: VirtualBufferDesc,
}

struct VirtualImageResource {
    desc: VirtualImageDesc,
}

struct DependencyResource {
    #[allow(dead_code)]
    dbg_name: String,
}

struct SamplerResource {
    native: NativeSampler,
    desc: SamplerDesc,
}

struct DsLayoutResource {
    native: NativeDescriptorSetLayout,
    #[allow(dead_code)]
    desc: DescriptorSetLayoutDesc,
}

struct PipelineLayoutResource {
    native: NativePipelineLayout,
    /// Set-slot layouts, with references held.
    set_layouts: Vec<DescriptorSetLayoutId>,
}

#[derive(Clone)]
struct TemplateShader {
    stage: ShaderStageFlags,
    native: NativeShaderModule,
    spec_constants: Vec<(String, u32)>,
}

struct GraphicsTemplateResource {
    shaders: Vec<TemplateShader>,
    supported_topology: u32,
    patch_control_points: u32,
    layout: PipelineLayoutId,
    /// desc hash -> concrete pipelines sharing that hash
    cache: FxHashMap<u64, SmallVec<[GraphicsPipelineId; 1]>>,
}

struct MeshTemplateResource {
    shaders: Vec<TemplateShader>,
    topology: PrimitiveTopology,
    layout: PipelineLayoutId,
    cache: FxHashMap<u64, SmallVec<[MeshPipelineId; 1]>>,
}

struct ComputeTemplateResource {
    shader: TemplateShader,
    local_group_size: [u32; 3],
    local_size_spec_ids: [u32; 3],
    layout: PipelineLayoutId,
    cache: FxHashMap<u64, SmallVec<[ComputePipelineId; 1]>>,
}

struct GraphicsPipelineResource {
    native: NativePipeline,
    desc: GraphicsPipelineDesc,
    desc_hash: u64,
    template: GraphicsPipelineTemplateId,
}

struct MeshPipelineResource {
    native: NativePipeline,
    desc: MeshPipelineDesc,
    desc_hash: u64,
    template: MeshPipelineTemplateId,
}

struct ComputePipelineResource {
    native: NativePipeline,
    desc: ComputePipelineDesc,
    desc_hash: u64,
    template: ComputePipelineTemplateId,
}

struct CommandBufferResource {
    queue: QueueType,
    commands: Vec<Command>,
}

pub struct ResourceManager {
    driver: Arc<dyn Driver>,
    caps: DriverCaps,

    dependencies: ResourcePool<DependencyResource>,
    buffers: ResourcePool<BufferResource>,
    images: ResourcePool<ImageResource>,
    virtual_buffers: ResourcePool<VirtualBufferResource>,
    virtual_images: ResourcePool<VirtualImageResource>,

    samplers: ResourcePool<SamplerResource>,
    ds_layouts: ResourcePool<DsLayoutResource>,
    pipeline_layouts: ResourcePool<PipelineLayoutResource>,
    graphics_templates: ResourcePool<GraphicsTemplateResource>,
    mesh_templates: ResourcePool<MeshTemplateResource>,
    compute_templates: ResourcePool<ComputeTemplateResource>,
    graphics_pipelines: ResourcePool<GraphicsPipelineResource>,
    mesh_pipelines: ResourcePool<MeshPipelineResource>,
    compute_pipelines: ResourcePool<ComputePipelineResource>,
    command_buffers: ResourcePool<CommandBufferResource>,

    render_passes: CachedPool<RenderPassInfo, NativeRenderPass>,
    framebuffers: CachedPool<FramebufferDesc, NativeFramebuffer>,
    descriptor_sets: CachedPool<DescriptorSetDesc, NativeDescriptorSet>,

    sampler_names: RwLock<FxHashMap<String, SamplerId>>,
    render_pass_names: RwLock<FxHashMap<String, RenderPassInfo>>,
    graphics_names: RwLock<FxHashMap<String, GraphicsPipelineTemplateId>>,
    mesh_names: RwLock<FxHashMap<String, MeshPipelineTemplateId>>,
    compute_names: RwLock<FxHashMap<String, ComputePipelineTemplateId>>,

    fence_pool: Mutex<Vec<NativeFence>>,
    semaphore_pool: Mutex<Vec<NativeSemaphore>>,

    staging_write: StagingPool,
    staging_read: StagingPool,
    staging_uniform: StagingPool,

    default_allocator: Arc<dyn MemAllocator>,
    empty_ds_layout: DescriptorSetLayoutId,
    default_sampler: SamplerId,

    destroyed: AtomicBool,
}

impl ResourceManager {
    pub fn new(driver: Arc<dyn Driver>, config: &GraphicsConfig) -> Result<ResourceManager> {
        let caps = driver.caps();
        let (transfer_page, uniform_page) =
            pick_page_sizes(&driver.host_memory(), config.staging_pool_capacity as u64);
        debug!(
            "staging pages: transfer {} MiB, uniform {} MiB",
            transfer_page >> 20,
            uniform_page >> 20
        );

        let ds_layouts = ResourcePool::with_capacity(config.resource_pool_capacity);
        let samplers = ResourcePool::with_capacity(config.resource_pool_capacity);

        // created at init so pipeline layouts never contain gaps
        let empty_native = driver.create_descriptor_set_layout(&DescriptorSetLayoutDesc::empty())?;
        let empty_ds_layout = DescriptorSetLayoutId(ds_layouts.assign(DsLayoutResource {
            native: empty_native,
            desc: DescriptorSetLayoutDesc::empty(),
        })?);

        // fallback for sampler-name misses
        let default_desc = SamplerDesc::default();
        let default_native = driver.create_sampler(&default_desc)?;
        let default_sampler = SamplerId(samplers.assign(SamplerResource {
            native: default_native,
            desc: default_desc,
        })?);

        Ok(ResourceManager {
            caps,
            dependencies: ResourcePool::with_capacity(config.resource_pool_capacity),
            buffers: ResourcePool::with_capacity(config.resource_pool_capacity),
            images: ResourcePool::with_capacity(config.resource_pool_capacity),
            virtual_buffers: ResourcePool::with_capacity(config.resource_pool_capacity),
            virtual_images: ResourcePool::with_capacity(config.resource_pool_capacity),
            samplers,
            ds_layouts,
            pipeline_layouts: ResourcePool::with_capacity(config.resource_pool_capacity),
            graphics_templates: ResourcePool::with_capacity(config.resource_pool_capacity),
            mesh_templates: ResourcePool::with_capacity(config.resource_pool_capacity),
            compute_templates: ResourcePool::with_capacity(config.resource_pool_capacity),
            graphics_pipelines: ResourcePool::with_capacity(config.resource_pool_capacity),
            mesh_pipelines: ResourcePool::with_capacity(config.resource_pool_capacity),
            compute_pipelines: ResourcePool::with_capacity(config.resource_pool_capacity),
            command_buffers: ResourcePool::with_capacity(config.resource_pool_capacity),
            render_passes: CachedPool::with_capacity(config.cached_pool_capacity),
            framebuffers: CachedPool::with_capacity(config.cached_pool_capacity),
            descriptor_sets: CachedPool::with_capacity(config.cached_pool_capacity),
            sampler_names: RwLock::new(FxHashMap::default()),
            render_pass_names: RwLock::new(FxHashMap::default()),
            graphics_names: RwLock::new(FxHashMap::default()),
            mesh_names: RwLock::new(FxHashMap::default()),
            compute_names: RwLock::new(FxHashMap::default()),
            fence_pool: Mutex::new(Vec::new()),
            semaphore_pool: Mutex::new(Vec::new()),
            staging_write: StagingPool::new(transfer_page, config.staging_pool_capacity),
            staging_read: StagingPool::new(transfer_page, config.staging_pool_capacity),
            staging_uniform: StagingPool::new(uniform_page, config.staging_pool_capacity),
            default_allocator: Arc::new(UniAllocator),
            empty_ds_layout,
            default_sampler,
            destroyed: AtomicBool::new(false),
            driver,
        })
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn caps(&self) -> DriverCaps {
        self.caps
    }

    pub fn empty_descriptor_set_layout(&self) -> DescriptorSetLayoutId {
        self.empty_ds_layout
    }

    pub fn default_sampler(&self) -> SamplerId {
        self.default_sampler
    }

    //----------------------------------------------------------------------
    // buffers / images / virtual resources

    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<UniqueId<GfxResourceId>> {
        self.create_buffer_with(desc, None)
    }

    pub fn create_buffer_with(
        &self,
        desc: &BufferDesc,
        allocator: Option<&dyn MemAllocator>,
    ) -> Result<UniqueId<GfxResourceId>> {
        let allocator = allocator.unwrap_or(&*self.default_allocator);
        let native = self.driver.create_buffer(desc, allocator)?;
        let raw = match self.buffers.assign(BufferResource {
            native,
            desc: *desc,
            owned: true,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_buffer(native);
                return Err(e);
            }
        };
        Ok(UniqueId::new(GfxResourceId::new(ResourceKind::Buffer, raw)))
    }

    pub fn create_image(&self, desc: &ImageDesc) -> Result<UniqueId<GfxResourceId>> {
        self.create_image_with(desc, None)
    }

    pub fn create_image_with(
        &self,
        desc: &ImageDesc,
        allocator: Option<&dyn MemAllocator>,
    ) -> Result<UniqueId<GfxResourceId>> {
        let allocator = allocator.unwrap_or(&*self.default_allocator);
        let native = self.driver.create_image(desc, allocator)?;
        let raw = match self.images.assign(ImageResource {
            native,
            desc: *desc,
            owned: true,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_image(native);
                return Err(e);
            }
        };
        Ok(UniqueId::new(GfxResourceId::new(ResourceKind::Image, raw)))
    }

    pub fn create_virtual_buffer(
        &self,
        desc: &VirtualBufferDesc,
    ) -> Result<UniqueId<GfxResourceId>> {
        let raw = self
            .virtual_buffers
            .assign(VirtualBufferResource { desc: *desc })?;
        Ok(UniqueId::new(GfxResourceId::new(
            ResourceKind::VirtualBuffer,
            raw,
        )))
    }

    pub fn create_virtual_image(
        &self,
        desc: &VirtualImageDesc,
    ) -> Result<UniqueId<GfxResourceId>> {
        let raw = self
            .virtual_images
            .assign(VirtualImageResource { desc: *desc })?;
        Ok(UniqueId::new(GfxResourceId::new(
            ResourceKind::VirtualImage,
            raw,
        )))
    }

    /// Pure ordering token for cross-node edges without data.
    pub fn create_dependency(&self, dbg_name: &str) -> Result<UniqueId<GfxResourceId>> {
        let raw = self.dependencies.assign(DependencyResource {
            dbg_name: dbg_name.to_owned(),
        })?;
        Ok(UniqueId::new(GfxResourceId::new(
            ResourceKind::Dependency,
            raw,
        )))
    }

    /// Ray-tracing kinds are reserved but not implemented.
    pub fn create_ray_tracing_geometry(&self) -> Result<UniqueId<GfxResourceId>> {
        Err(Error::UnsupportedDescription)
    }

    pub fn create_ray_tracing_scene(&self) -> Result<UniqueId<GfxResourceId>> {
        Err(Error::UnsupportedDescription)
    }

    /// Wraps an externally created buffer; releasing the handle frees the
    /// slot only, never the driver object.
    pub fn import_buffer(
        &self,
        native: NativeBuffer,
        desc: &BufferDesc,
    ) -> Result<UniqueId<GfxResourceId>> {
        let raw = self.buffers.assign(BufferResource {
            native,
            desc: *desc,
            owned: false,
        })?;
        Ok(UniqueId::new(GfxResourceId::new(ResourceKind::Buffer, raw)))
    }

    pub fn import_image(
        &self,
        native: NativeImage,
        desc: &ImageDesc,
    ) -> Result<UniqueId<GfxResourceId>> {
        let raw = self.images.assign(ImageResource {
            native,
            desc: *desc,
            owned: false,
        })?;
        Ok(UniqueId::new(GfxResourceId::new(ResourceKind::Image, raw)))
    }

    pub fn release_resource(&self, id: UniqueId<GfxResourceId>) -> Result<()> {
        self.release_id(id.release())
    }

    pub fn is_resource_alive(&self, id: GfxResourceId) -> bool {
        match id.kind() {
            ResourceKind::Dependency => self.dependencies.is_alive(id.raw()),
            ResourceKind::Buffer => self.buffers.is_alive(id.raw()),
            ResourceKind::Image => self.images.is_alive(id.raw()),
            ResourceKind::VirtualBuffer => self.virtual_buffers.is_alive(id.raw()),
            ResourceKind::VirtualImage => self.virtual_images.is_alive(id.raw()),
            ResourceKind::RayTracingGeometry | ResourceKind::RayTracingScene => false,
        }
    }

    /// Adds a reference on behalf of a batch that must keep `id` alive until
    /// the device is done with it.
    pub(crate) fn retain_id(&self, id: GfxResourceId) -> Result<()> {
        match id.kind() {
            ResourceKind::Dependency => self.dependencies.add_ref(id.raw()),
            ResourceKind::Buffer => self.buffers.add_ref(id.raw()),
            ResourceKind::Image => self.images.add_ref(id.raw()),
            ResourceKind::VirtualBuffer => self.virtual_buffers.add_ref(id.raw()),
            ResourceKind::VirtualImage => self.virtual_images.add_ref(id.raw()),
            ResourceKind::RayTracingGeometry | ResourceKind::RayTracingScene => {
                Err(Error::InvalidHandle)
            }
        }
    }

    pub(crate) fn release_id(&self, id: GfxResourceId) -> Result<()> {
        match id.kind() {
            ResourceKind::Dependency => {
                self.dependencies.release(id.raw())?;
            }
            ResourceKind::Buffer => {
                if let Some(res) = self.buffers.release(id.raw())? {
                    if res.owned {
                        self.driver.destroy_buffer(res.native);
                    }
                }
            }
            ResourceKind::Image => {
                if let Some(res) = self.images.release(id.raw())? {
                    if res.owned {
                        self.driver.destroy_image(res.native);
                    }
                }
            }
            ResourceKind::VirtualBuffer => {
                self.virtual_buffers.release(id.raw())?;
            }
            ResourceKind::VirtualImage => {
                self.virtual_images.release(id.raw())?;
            }
            ResourceKind::RayTracingGeometry | ResourceKind::RayTracingScene => {
                return Err(Error::InvalidHandle);
            }
        }
        Ok(())
    }

    //----------------------------------------------------------------------
    // describe / query

    /// Returns the zero description and flags an error when the handle is
    /// not a live buffer.
    pub fn buffer_description(&self, id: GfxResourceId) -> BufferDesc {
        if id.kind() != ResourceKind::Buffer {
            error!("buffer_description: wrong kind {:?}", id);
            return BufferDesc::default();
        }
        self.buffers.read(id.raw(), |b| b.desc).unwrap_or_else(|_| {
            error!("buffer_description: stale handle {:?}", id);
            BufferDesc::default()
        })
    }

    pub fn image_description(&self, id: GfxResourceId) -> ImageDesc {
        if id.kind() != ResourceKind::Image {
            error!("image_description: wrong kind {:?}", id);
            return ImageDesc::default();
        }
        self.images.read(id.raw(), |i| i.desc).unwrap_or_else(|_| {
            error!("image_description: stale handle {:?}", id);
            ImageDesc::default()
        })
    }

    pub fn virtual_buffer_description(&self, id: GfxResourceId) -> VirtualBufferDesc {
        if id.kind() != ResourceKind::VirtualBuffer {
            error!("virtual_buffer_description: wrong kind {:?}", id);
            return VirtualBufferDesc::default();
        }
        self.virtual_buffers
            .read(id.raw(), |b| b.desc)
            .unwrap_or_else(|_| {
                error!("virtual_buffer_description: stale handle {:?}", id);
                VirtualBufferDesc::default()
            })
    }

    pub fn virtual_image_description(&self, id: GfxResourceId) -> VirtualImageDesc {
        if id.kind() != ResourceKind::VirtualImage {
            error!("virtual_image_description: wrong kind {:?}", id);
            return VirtualImageDesc::default();
        }
        self.virtual_images
            .read(id.raw(), |i| i.desc)
            .unwrap_or_else(|_| {
                error!("virtual_image_description: stale handle {:?}", id);
                VirtualImageDesc::default()
            })
    }

    pub fn is_buffer_supported(&self, desc: &BufferDesc) -> bool {
        self.driver.is_buffer_supported(desc)
    }

    pub fn is_image_supported(&self, desc: &ImageDesc) -> bool {
        self.driver.is_image_supported(desc)
    }

    pub fn native_buffer_handle(&self, id: GfxResourceId) -> Result<NativeBuffer> {
        if id.kind() != ResourceKind::Buffer {
            return Err(Error::InvalidHandle);
        }
        self.buffers.read(id.raw(), |b| b.native)
    }

    pub fn native_image_handle(&self, id: GfxResourceId) -> Result<NativeImage> {
        if id.kind() != ResourceKind::Image {
            return Err(Error::InvalidHandle);
        }
        self.images.read(id.raw(), |i| i.native)
    }

    pub fn memory_info(&self, id: GfxResourceId) -> Result<MemoryInfo> {
        match id.kind() {
            ResourceKind::Buffer => {
                let native = self.native_buffer_handle(id)?;
                self.driver.buffer_memory_info(native)
            }
            ResourceKind::Image => {
                let native = self.native_image_handle(id)?;
                self.driver.image_memory_info(native)
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    //----------------------------------------------------------------------
    // samplers

    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<UniqueId<SamplerId>> {
        let native = self.driver.create_sampler(desc)?;
        let raw = match self.samplers.assign(SamplerResource {
            native,
            desc: *desc,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_sampler(native);
                return Err(e);
            }
        };
        Ok(UniqueId::new(SamplerId(raw)))
    }

    pub fn release_sampler(&self, id: UniqueId<SamplerId>) -> Result<()> {
        if let Some(res) = self.samplers.release(id.release().0)? {
            self.driver.destroy_sampler(res.native);
        }
        Ok(())
    }

    /// Looks a sampler up by pack name; misses fall back to the default
    /// sampler.
    pub fn sampler(&self, name: &str) -> SamplerId {
        match self.sampler_names.read().unwrap().get(name) {
            Some(&id) => id,
            None => {
                warn!("sampler '{}' not found, using default", name);
                self.default_sampler
            }
        }
    }

    pub fn sampler_description(&self, id: SamplerId) -> SamplerDesc {
        self.samplers.read(id.0, |s| s.desc).unwrap_or_else(|_| {
            error!("sampler_description: stale handle {:?}", id);
            SamplerDesc::default()
        })
    }

    pub(crate) fn native_sampler(&self, id: SamplerId) -> Result<NativeSampler> {
        self.samplers.read(id.0, |s| s.native)
    }

    //----------------------------------------------------------------------
    // layouts

    pub fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> Result<UniqueId<DescriptorSetLayoutId>> {
        let native = self.driver.create_descriptor_set_layout(desc)?;
        let raw = match self.ds_layouts.assign(DsLayoutResource {
            native,
            desc: desc.clone(),
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_descriptor_set_layout(native);
                return Err(e);
            }
        };
        Ok(UniqueId::new(DescriptorSetLayoutId(raw)))
    }

    pub fn release_descriptor_set_layout(&self, id: UniqueId<DescriptorSetLayoutId>) -> Result<()> {
        if let Some(res) = self.ds_layouts.release(id.release().0)? {
            self.driver.destroy_descriptor_set_layout(res.native);
        }
        Ok(())
    }

    /// Builds a pipeline layout; `None` slots receive the empty layout so
    /// the driver object never contains gaps.
    pub fn create_pipeline_layout(
        &self,
        set_layouts: &[Option<DescriptorSetLayoutId>],
        push_constant_size: u32,
        push_constant_stages: ShaderStageFlags,
    ) -> Result<UniqueId<PipelineLayoutId>> {
        let mut ids = Vec::with_capacity(set_layouts.len());
        let mut natives = Vec::with_capacity(set_layouts.len());
        for slot in set_layouts {
            let id = slot.unwrap_or(self.empty_ds_layout);
            natives.push(self.ds_layouts.read(id.0, |l| l.native)?);
            self.ds_layouts.add_ref(id.0)?;
            ids.push(id);
        }
        let desc = PipelineLayoutDesc {
            set_layouts: ids.clone(),
            push_constant_size,
            push_constant_stages,
        };
        let native = match self.driver.create_pipeline_layout(&desc, &natives) {
            Ok(native) => native,
            Err(e) => {
                for id in &ids {
                    if let Ok(Some(l)) = self.ds_layouts.release(id.0) {
                        self.driver.destroy_descriptor_set_layout(l.native);
                    }
                }
                return Err(e);
            }
        };
        let raw = match self.pipeline_layouts.assign(PipelineLayoutResource {
            native,
            set_layouts: ids.clone(),
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_pipeline_layout(native);
                for id in &ids {
                    if let Ok(Some(l)) = self.ds_layouts.release(id.0) {
                        self.driver.destroy_descriptor_set_layout(l.native);
                    }
                }
                return Err(e);
            }
        };
        Ok(UniqueId::new(PipelineLayoutId(raw)))
    }

    pub fn release_pipeline_layout(&self, id: UniqueId<PipelineLayoutId>) -> Result<()> {
        self.release_pipeline_layout_raw(id.release())
    }

    fn release_pipeline_layout_raw(&self, id: PipelineLayoutId) -> Result<()> {
        if let Some(res) = self.pipeline_layouts.release(id.0)? {
            self.driver.destroy_pipeline_layout(res.native);
            for set in res.set_layouts {
                if let Some(l) = self.ds_layouts.release(set.0)? {
                    self.driver.destroy_descriptor_set_layout(l.native);
                }
            }
        }
        Ok(())
    }

    //----------------------------------------------------------------------
    // cached pools: render passes, framebuffers, descriptor sets

    /// Two structurally equal infos always return the same id.
    pub fn create_render_pass(&self, info: &RenderPassInfo) -> Result<UniqueId<RenderPassId>> {
        let driver = &self.driver;
        let (raw, inserted) = self
            .render_passes
            .find_or_insert(info.clone(), |key| driver.create_render_pass(key))?;
        if inserted {
            debug!("created render pass {:?}", raw);
        }
        Ok(UniqueId::new(RenderPassId(raw)))
    }

    pub fn release_render_pass(&self, id: UniqueId<RenderPassId>) -> Result<()> {
        self.release_render_pass_raw(id.release())
    }

    pub(crate) fn release_render_pass_raw(&self, id: RenderPassId) -> Result<()> {
        if let Some(native) = self.render_passes.release(id.0)? {
            self.driver.destroy_render_pass(native);
        }
        Ok(())
    }

    pub fn render_pass_refcount(&self, id: RenderPassId) -> Result<u32> {
        self.render_passes.refcount(id.0)
    }

    pub(crate) fn native_render_pass(&self, id: RenderPassId) -> Result<NativeRenderPass> {
        self.render_passes.read(id.0, |_, native| *native)
    }

    pub fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<UniqueId<FramebufferId>> {
        // resolve attachments before taking the cache guard
        let mut natives = SmallVec::<[NativeImage; 8]>::new();
        for (image, _view) in desc.attachments.iter() {
            natives.push(self.native_image_handle(*image)?);
        }
        let render_pass = self.native_render_pass(desc.render_pass)?;
        let driver = &self.driver;
        let (raw, _) = self.framebuffers.find_or_insert(desc.clone(), |key| {
            driver.create_framebuffer(render_pass, &natives, key.width, key.height, key.layers)
        })?;
        Ok(UniqueId::new(FramebufferId(raw)))
    }

    pub fn release_framebuffer(&self, id: UniqueId<FramebufferId>) -> Result<()> {
        self.release_framebuffer_raw(id.release())
    }

    pub(crate) fn release_framebuffer_raw(&self, id: FramebufferId) -> Result<()> {
        if let Some(native) = self.framebuffers.release(id.0)? {
            self.driver.destroy_framebuffer(native);
        }
        Ok(())
    }

    pub(crate) fn native_framebuffer(&self, id: FramebufferId) -> Result<NativeFramebuffer> {
        self.framebuffers.read(id.0, |_, native| *native)
    }

    pub fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<UniqueId<DescriptorSetId>> {
        let layout_native = self.ds_layouts.read(desc.layout.0, |l| l.native)?;
        // resolve every bound handle before crossing the driver boundary
        let mut bindings = Vec::with_capacity(desc.descriptors.len());
        for &(binding, descriptor) in &desc.descriptors {
            let native = match descriptor {
                Descriptor::Sampler { sampler } => NativeDescriptor::Sampler {
                    sampler: self.native_sampler(sampler)?,
                },
                Descriptor::SampledImage { image, sampler } => NativeDescriptor::SampledImage {
                    image: self.native_image_handle(image)?,
                    sampler: self.native_sampler(sampler)?,
                },
                Descriptor::StorageImage { image } => NativeDescriptor::StorageImage {
                    image: self.native_image_handle(image)?,
                },
                Descriptor::UniformBuffer {
                    buffer,
                    offset,
                    size,
                } => NativeDescriptor::UniformBuffer {
                    buffer: self.native_buffer_handle(buffer)?,
                    offset,
                    size,
                },
                Descriptor::StorageBuffer {
                    buffer,
                    offset,
                    size,
                } => NativeDescriptor::StorageBuffer {
                    buffer: self.native_buffer_handle(buffer)?,
                    offset,
                    size,
                },
                Descriptor::InputAttachment { image } => NativeDescriptor::InputAttachment {
                    image: self.native_image_handle(image)?,
                },
            };
            bindings.push((binding, native));
        }

        let driver = &self.driver;
        let (raw, _) = self
            .descriptor_sets
            .find_or_insert(desc.clone(), |_key| {
                driver.create_descriptor_set(layout_native, &bindings)
            })?;
        Ok(UniqueId::new(DescriptorSetId(raw)))
    }

    pub fn release_descriptor_set(&self, id: UniqueId<DescriptorSetId>) -> Result<()> {
        if let Some(native) = self.descriptor_sets.release(id.release().0)? {
            self.driver.destroy_descriptor_set(native);
        }
        Ok(())
    }

    pub(crate) fn native_descriptor_set(&self, id: DescriptorSetId) -> Result<NativeDescriptorSet> {
        self.descriptor_sets.read(id.0, |_, native| *native)
    }

    //----------------------------------------------------------------------
    // command buffers

    pub fn create_command_buffer(
        &self,
        queue: QueueType,
        commands: Vec<Command>,
    ) -> Result<UniqueId<CommandBufferId>> {
        let raw = self
            .command_buffers
            .assign(CommandBufferResource { queue, commands })?;
        Ok(UniqueId::new(CommandBufferId(raw)))
    }

    pub fn release_command_buffer(&self, id: UniqueId<CommandBufferId>) -> Result<()> {
        self.command_buffers.release(id.release().0)?;
        Ok(())
    }

    pub fn command_buffer_queue(&self, id: CommandBufferId) -> Result<QueueType> {
        self.command_buffers.read(id.0, |cb| cb.queue)
    }

    pub fn command_buffer_commands(&self, id: CommandBufferId) -> Result<Vec<Command>> {
        self.command_buffers.read(id.0, |cb| cb.commands.clone())
    }

    //----------------------------------------------------------------------
    // pack loading

    /// Decodes and registers a pack stream.
    pub fn load_pipeline_pack(&self, stream: impl std::io::Read) -> Result<()> {
        let pack = PipelinePack::read(stream)?;
        self.register_pack(&pack)
    }

    pub fn register_pack(&self, pack: &PipelinePack) -> Result<()> {
        for (name, desc) in &pack.samplers {
            if self.sampler_names.read().unwrap().contains_key(name) {
                return Err(Error::DuplicateName(name.clone()));
            }
            let native = self.driver.create_sampler(desc)?;
            let raw = self.samplers.assign(SamplerResource {
                native,
                desc: *desc,
            })?;
            self.sampler_names
                .write()
                .unwrap()
                .insert(name.clone(), SamplerId(raw));
        }

        for (name, info) in &pack.render_passes {
            let mut names = self.render_pass_names.write().unwrap();
            if names.contains_key(name) {
                return Err(Error::DuplicateName(name.clone()));
            }
            names.insert(name.clone(), info.clone());
        }

        for (name, data) in &pack.graphics {
            self.register_graphics_template(name, data)?;
        }
        for (name, data) in &pack.mesh {
            self.register_mesh_template(name, data)?;
        }
        for (name, data) in &pack.compute {
            self.register_compute_template(name, data)?;
        }

        info!(
            "registered pack: {} samplers, {} render passes, {} gfx / {} mesh / {} compute templates",
            pack.samplers.len(),
            pack.render_passes.len(),
            pack.graphics.len(),
            pack.mesh.len(),
            pack.compute.len()
        );
        Ok(())
    }

    /// Render-pass info bound to `name` by a loaded pack.
    pub fn render_pass_info(&self, name: &str) -> Option<RenderPassInfo> {
        self.render_pass_names.read().unwrap().get(name).cloned()
    }

    /// Specialization-constant id reflected under `constant` in the named
    /// graphics template.
    pub fn graphics_spec_constant(&self, template: &str, constant: &str) -> Option<u32> {
        let id = *self.graphics_names.read().unwrap().get(template)?;
        self.graphics_templates
            .read(id.0, |t| {
                t.shaders.iter().find_map(|s| {
                    s.spec_constants
                        .iter()
                        .find(|(name, _)| name == constant)
                        .map(|&(_, id)| id)
                })
            })
            .ok()
            .flatten()
    }

    /// Same as [`graphics_spec_constant`](Self::graphics_spec_constant) for
    /// compute templates.
    pub fn compute_spec_constant(&self, template: &str, constant: &str) -> Option<u32> {
        let id = *self.compute_names.read().unwrap().get(template)?;
        self.compute_templates
            .read(id.0, |t| {
                t.shader
                    .spec_constants
                    .iter()
                    .find(|(name, _)| name == constant)
                    .map(|&(_, id)| id)
            })
            .ok()
            .flatten()
    }

    /// Creates a graphics pipeline template and binds it to `name`.
    pub fn register_graphics_template(
        &self,
        name: &str,
        data: &crate::pack::GraphicsTemplateData,
    ) -> Result<GraphicsPipelineTemplateId> {
        if self.graphics_names.read().unwrap().contains_key(name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        let layout = self.create_template_layout(&data.layout)?;
        let shaders = self.create_template_shaders(&data.shaders)?;
        let raw = self.graphics_templates.assign(GraphicsTemplateResource {
            shaders,
            supported_topology: data.supported_topology,
            patch_control_points: data.patch_control_points,
            layout,
            cache: FxHashMap::default(),
        })?;
        let id = GraphicsPipelineTemplateId(raw);
        self.graphics_names
            .write()
            .unwrap()
            .insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn register_mesh_template(
        &self,
        name: &str,
        data: &crate::pack::MeshTemplateData,
    ) -> Result<MeshPipelineTemplateId> {
        if !self.caps.mesh_shaders {
            return Err(Error::UnsupportedDescription);
        }
        if self.mesh_names.read().unwrap().contains_key(name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        let layout = self.create_template_layout(&data.layout)?;
        let shaders = self.create_template_shaders(&data.shaders)?;
        let raw = self.mesh_templates.assign(MeshTemplateResource {
            shaders,
            topology: data.topology,
            layout,
            cache: FxHashMap::default(),
        })?;
        let id = MeshPipelineTemplateId(raw);
        self.mesh_names.write().unwrap().insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn register_compute_template(
        &self,
        name: &str,
        data: &crate::pack::ComputeTemplateData,
    ) -> Result<ComputePipelineTemplateId> {
        if self.compute_names.read().unwrap().contains_key(name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        let layout = self.create_template_layout(&data.layout)?;
        let mut shaders = self.create_template_shaders(std::slice::from_ref(&data.shader))?;
        let raw = self.compute_templates.assign(ComputeTemplateResource {
            shader: shaders.remove(0),
            local_group_size: data.local_group_size,
            local_size_spec_ids: data.local_size_spec_ids,
            layout,
            cache: FxHashMap::default(),
        })?;
        let id = ComputePipelineTemplateId(raw);
        self.compute_names
            .write()
            .unwrap()
            .insert(name.to_owned(), id);
        Ok(id)
    }

    fn create_template_layout(&self, layout: &crate::pack::TemplateLayout) -> Result<PipelineLayoutId> {
        let mut slots = Vec::with_capacity(layout.set_layouts.len());
        let mut created = Vec::new();
        let release_created = |created: Vec<UniqueId<DescriptorSetLayoutId>>| {
            for id in created {
                let _ = self.release_descriptor_set_layout(id);
            }
        };
        for set in &layout.set_layouts {
            if set.bindings.is_empty() {
                slots.push(None);
            } else {
                match self.create_descriptor_set_layout(set) {
                    Ok(id) => {
                        slots.push(Some(id.get()));
                        created.push(id);
                    }
                    Err(e) => {
                        release_created(created);
                        return Err(e);
                    }
                }
            }
        }
        let layout_id = match self.create_pipeline_layout(
            &slots,
            layout.push_constant_size,
            layout.push_constant_stages,
        ) {
            Ok(id) => id,
            Err(e) => {
                release_created(created);
                return Err(e);
            }
        };
        // the pipeline layout now holds its own references
        release_created(created);
        Ok(layout_id.release())
    }

    fn create_template_shaders(
        &self,
        blobs: &[crate::pack::ShaderBlob],
    ) -> Result<Vec<TemplateShader>> {
        let mut shaders = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let native = self.driver.create_shader_module(&blob.code, blob.stage)?;
            shaders.push(TemplateShader {
                stage: blob.stage,
                native,
                spec_constants: blob.spec_constants.clone(),
            });
        }
        Ok(shaders)
    }

    //----------------------------------------------------------------------
    // named pipeline lookup

    /// Finds the template bound to `name`, validates and normalizes the
    /// description, and returns the cached concrete pipeline, building it on
    /// a miss. Every call adds one reference to the returned pipeline.
    pub fn graphics_pipeline(
        &self,
        name: &str,
        desc: &GraphicsPipelineDesc,
    ) -> Result<GraphicsPipelineId> {
        let tmpl_id = *self
            .graphics_names
            .read()
            .unwrap()
            .get(name)
            .ok_or(Error::InvalidHandle)?;

        let mut desc = desc.clone();
        let (patch_points, topology_mask) = self
            .graphics_templates
            .read(tmpl_id.0, |t| (t.patch_control_points, t.supported_topology))?;
        if patch_points > 0 {
            desc.render_state.input_assembly.topology = PrimitiveTopology::Patch;
        }
        normalize_render_state(&mut desc.render_state, &mut desc.dynamic_state, &self.caps)?;
        if topology_mask & desc.render_state.input_assembly.topology.bit() == 0 {
            return Err(Error::UnsupportedDescription);
        }

        // normalization already zeroed every shadowed static field, so the
        // mask itself stays out of the cache key: descriptions differing
        // only in dynamic bits share one pipeline
        let dynamic_state = desc.dynamic_state;
        desc.dynamic_state = DynamicStateFlags::empty();

        let desc_hash = fxhash::hash64(&desc);
        let candidates = self
            .graphics_templates
            .read(tmpl_id.0, |t| t.cache.get(&desc_hash).cloned().unwrap_or_default())?;
        for id in candidates {
            if self
                .graphics_pipelines
                .read(id.0, |p| p.desc == desc)
                .unwrap_or(false)
            {
                self.graphics_pipelines.add_ref(id.0)?;
                return Ok(id);
            }
        }

        // build a new pipeline
        let (shaders, layout_id) = self
            .graphics_templates
            .read(tmpl_id.0, |t| (t.shaders.clone(), t.layout))?;
        let layout_native = self.pipeline_layouts.read(layout_id.0, |l| l.native)?;
        let render_pass_native = self.native_render_pass(desc.render_pass)?;
        let stage_modules: Vec<(ShaderStageFlags, NativeShaderModule)> =
            shaders.iter().map(|s| (s.stage, s.native)).collect();
        let native = self.driver.create_graphics_pipeline(&GraphicsPipelineCreateInfo {
            shaders: &stage_modules,
            layout: layout_native,
            render_pass: render_pass_native,
            subpass: desc.subpass,
            render_state: &desc.render_state,
            dynamic_state,
            vertex_input: &desc.vertex_input,
            viewport_count: desc.viewport_count,
            patch_control_points: patch_points,
            specialization: &desc.specialization,
        })?;

        self.graphics_templates.add_ref(tmpl_id.0)?;
        let raw = match self.graphics_pipelines.assign(GraphicsPipelineResource {
            native,
            desc,
            desc_hash,
            template: tmpl_id,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_pipeline(native);
                self.release_graphics_template_ref(tmpl_id)?;
                return Err(e);
            }
        };
        let id = GraphicsPipelineId(raw);
        self.graphics_templates
            .write(tmpl_id.0, |t| t.cache.entry(desc_hash).or_default().push(id))?;
        debug!("built graphics pipeline '{}' {:?}", name, id);
        Ok(id)
    }

    pub fn release_graphics_pipeline(&self, id: GraphicsPipelineId) -> Result<()> {
        if let Some(res) = self.graphics_pipelines.release(id.0)? {
            self.driver.destroy_pipeline(res.native);
            let _ = self.graphics_templates.write(res.template.0, |t| {
                let emptied = match t.cache.get_mut(&res.desc_hash) {
                    Some(list) => {
                        list.retain(|&mut p| p != id);
                        list.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    t.cache.remove(&res.desc_hash);
                }
            });
            self.release_graphics_template_ref(res.template)?;
        }
        Ok(())
    }

    pub fn mesh_pipeline(&self, name: &str, desc: &MeshPipelineDesc) -> Result<MeshPipelineId> {
        if !self.caps.mesh_shaders {
            return Err(Error::UnsupportedDescription);
        }
        let tmpl_id = *self
            .mesh_names
            .read()
            .unwrap()
            .get(name)
            .ok_or(Error::InvalidHandle)?;

        let mut desc = desc.clone();
        let topology = self.mesh_templates.read(tmpl_id.0, |t| t.topology)?;
        normalize_render_state(&mut desc.render_state, &mut desc.dynamic_state, &self.caps)?;
        // the output topology comes from the mesh shader itself
        desc.render_state.input_assembly.topology = topology;

        let dynamic_state = desc.dynamic_state;
        desc.dynamic_state = DynamicStateFlags::empty();

        let desc_hash = fxhash::hash64(&desc);
        let candidates = self
            .mesh_templates
            .read(tmpl_id.0, |t| t.cache.get(&desc_hash).cloned().unwrap_or_default())?;
        for id in candidates {
            if self
                .mesh_pipelines
                .read(id.0, |p| p.desc == desc)
                .unwrap_or(false)
            {
                self.mesh_pipelines.add_ref(id.0)?;
                return Ok(id);
            }
        }

        let (shaders, layout_id) = self
            .mesh_templates
            .read(tmpl_id.0, |t| (t.shaders.clone(), t.layout))?;
        let layout_native = self.pipeline_layouts.read(layout_id.0, |l| l.native)?;
        let render_pass_native = self.native_render_pass(desc.render_pass)?;
        let stage_modules: Vec<(ShaderStageFlags, NativeShaderModule)> =
            shaders.iter().map(|s| (s.stage, s.native)).collect();
        let empty_vertex_input = VertexInputState::default();
        let native = self.driver.create_graphics_pipeline(&GraphicsPipelineCreateInfo {
            shaders: &stage_modules,
            layout: layout_native,
            render_pass: render_pass_native,
            subpass: desc.subpass,
            render_state: &desc.render_state,
            dynamic_state,
            vertex_input: &empty_vertex_input,
            viewport_count: desc.viewport_count,
            patch_control_points: 0,
            specialization: &desc.specialization,
        })?;

        self.mesh_templates.add_ref(tmpl_id.0)?;
        let raw = match self.mesh_pipelines.assign(MeshPipelineResource {
            native,
            desc,
            desc_hash,
            template: tmpl_id,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_pipeline(native);
                self.release_mesh_template_ref(tmpl_id)?;
                return Err(e);
            }
        };
        let id = MeshPipelineId(raw);
        self.mesh_templates
            .write(tmpl_id.0, |t| t.cache.entry(desc_hash).or_default().push(id))?;
        Ok(id)
    }

    pub fn release_mesh_pipeline(&self, id: MeshPipelineId) -> Result<()> {
        if let Some(res) = self.mesh_pipelines.release(id.0)? {
            self.driver.destroy_pipeline(res.native);
            let _ = self.mesh_templates.write(res.template.0, |t| {
                let emptied = match t.cache.get_mut(&res.desc_hash) {
                    Some(list) => {
                        list.retain(|&mut p| p != id);
                        list.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    t.cache.remove(&res.desc_hash);
                }
            });
            self.release_mesh_template_ref(res.template)?;
        }
        Ok(())
    }

    pub fn compute_pipeline(
        &self,
        name: &str,
        desc: &ComputePipelineDesc,
    ) -> Result<ComputePipelineId> {
        let tmpl_id = *self
            .compute_names
            .read()
            .unwrap()
            .get(name)
            .ok_or(Error::InvalidHandle)?;

        let mut desc = desc.clone();
        let (template_size, spec_ids) = self
            .compute_templates
            .read(tmpl_id.0, |t| (t.local_group_size, t.local_size_spec_ids))?;
        match desc.local_group_size {
            None => desc.local_group_size = Some(template_size),
            Some(size) => {
                // an override requires the dimension to be specializable
                for i in 0..3 {
                    if size[i] != template_size[i] && spec_ids[i] == NO_SPEC_ID {
                        return Err(Error::UnsupportedDescription);
                    }
                }
            }
        }

        let desc_hash = fxhash::hash64(&desc);
        let candidates = self
            .compute_templates
            .read(tmpl_id.0, |t| t.cache.get(&desc_hash).cloned().unwrap_or_default())?;
        for id in candidates {
            if self
                .compute_pipelines
                .read(id.0, |p| p.desc == desc)
                .unwrap_or(false)
            {
                self.compute_pipelines.add_ref(id.0)?;
                return Ok(id);
            }
        }

        let (shader, layout_id) = self
            .compute_templates
            .read(tmpl_id.0, |t| (t.shader.clone(), t.layout))?;
        let layout_native = self.pipeline_layouts.read(layout_id.0, |l| l.native)?;
        let native = self.driver.create_compute_pipeline(&ComputePipelineCreateInfo {
            shader: shader.native,
            layout: layout_native,
            local_group_size: desc.local_group_size.unwrap_or(template_size),
            specialization: &desc.specialization,
        })?;

        self.compute_templates.add_ref(tmpl_id.0)?;
        let raw = match self.compute_pipelines.assign(ComputePipelineResource {
            native,
            desc,
            desc_hash,
            template: tmpl_id,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                self.driver.destroy_pipeline(native);
                self.release_compute_template_ref(tmpl_id)?;
                return Err(e);
            }
        };
        let id = ComputePipelineId(raw);
        self.compute_templates
            .write(tmpl_id.0, |t| t.cache.entry(desc_hash).or_default().push(id))?;
        Ok(id)
    }

    pub fn release_compute_pipeline(&self, id: ComputePipelineId) -> Result<()> {
        if let Some(res) = self.compute_pipelines.release(id.0)? {
            self.driver.destroy_pipeline(res.native);
            let _ = self.compute_templates.write(res.template.0, |t| {
                let emptied = match t.cache.get_mut(&res.desc_hash) {
                    Some(list) => {
                        list.retain(|&mut p| p != id);
                        list.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    t.cache.remove(&res.desc_hash);
                }
            });
            self.release_compute_template_ref(res.template)?;
        }
        Ok(())
    }

    pub fn graphics_pipeline_refcount(&self, id: GraphicsPipelineId) -> Result<u32> {
        self.graphics_pipelines.refcount(id.0)
    }

    pub(crate) fn native_graphics_pipeline(&self, id: GraphicsPipelineId) -> Result<NativePipeline> {
        self.graphics_pipelines.read(id.0, |p| p.native)
    }

    pub(crate) fn native_mesh_pipeline(&self, id: MeshPipelineId) -> Result<NativePipeline> {
        self.mesh_pipelines.read(id.0, |p| p.native)
    }

    pub(crate) fn native_compute_pipeline(&self, id: ComputePipelineId) -> Result<NativePipeline> {
        self.compute_pipelines.read(id.0, |p| p.native)
    }

    fn release_graphics_template_ref(&self, id: GraphicsPipelineTemplateId) -> Result<()> {
        if let Some(t) = self.graphics_templates.release(id.0)? {
            self.destroy_template(t.shaders, t.layout)?;
        }
        Ok(())
    }

    fn release_mesh_template_ref(&self, id: MeshPipelineTemplateId) -> Result<()> {
        if let Some(t) = self.mesh_templates.release(id.0)? {
            self.destroy_template(t.shaders, t.layout)?;
        }
        Ok(())
    }

    fn release_compute_template_ref(&self, id: ComputePipelineTemplateId) -> Result<()> {
        if let Some(t) = self.compute_templates.release(id.0)? {
            self.destroy_template(vec![t.shader], t.layout)?;
        }
        Ok(())
    }

    fn destroy_template(
        &self,
        shaders: Vec<TemplateShader>,
        layout: PipelineLayoutId,
    ) -> Result<()> {
        for shader in shaders {
            self.driver.destroy_shader_module(shader.native);
        }
        self.release_pipeline_layout_raw(layout)
    }

    //----------------------------------------------------------------------
    // fences / semaphores

    pub(crate) fn create_fence(&self) -> Result<NativeFence> {
        if let Some(fence) = self.fence_pool.lock().unwrap().pop() {
            self.driver.reset_fence(fence);
            return Ok(fence);
        }
        self.driver.create_fence()
    }

    pub(crate) fn release_fences(&self, fences: &mut Vec<NativeFence>) {
        self.fence_pool.lock().unwrap().append(fences);
    }

    pub(crate) fn create_semaphore(&self) -> Result<NativeSemaphore> {
        if let Some(semaphore) = self.semaphore_pool.lock().unwrap().pop() {
            return Ok(semaphore);
        }
        self.driver.create_semaphore()
    }

    pub(crate) fn release_semaphores(&self, semaphores: &mut Vec<NativeSemaphore>) {
        self.semaphore_pool.lock().unwrap().append(semaphores);
    }

    //----------------------------------------------------------------------
    // staging

    /// Grabs a staging page for the given usage. The returned handle is the
    /// page buffer; the index releases the page back to its pool.
    pub fn create_staging_buffer(
        &self,
        usage: BufferUsageFlags,
    ) -> Result<(GfxResourceId, StagingIdx)> {
        let (pool, kind, memory) = if usage.contains(BufferUsageFlags::TRANSFER_SRC) {
            (&self.staging_write, StagingPoolKind::Write, MemoryType::HostCoherent)
        } else if usage.contains(BufferUsageFlags::TRANSFER_DST) {
            (&self.staging_read, StagingPoolKind::Read, MemoryType::HostCached)
        } else if usage.contains(BufferUsageFlags::UNIFORM) {
            (&self.staging_uniform, StagingPoolKind::Uniform, MemoryType::HostCoherent)
        } else {
            return Err(Error::UnsupportedDescription);
        };

        let desc = BufferDesc {
            size: pool.page_size(),
            usage,
            memory,
        };
        let (slot, page) = pool.assign(|| {
            let id = self.create_buffer(&desc)?;
            Ok(id.release())
        })?;
        Ok((page, StagingIdx::new(kind, slot)))
    }

    pub fn release_staging_buffer(&self, index: StagingIdx) {
        match index.pool() {
            Some(StagingPoolKind::Write) => self.staging_write.unassign(index.slot()),
            Some(StagingPoolKind::Read) => self.staging_read.unassign(index.slot()),
            Some(StagingPoolKind::Uniform) => self.staging_uniform.unassign(index.slot()),
            None => error!("release_staging_buffer: bad index {:?}", index),
        }
    }

    /// Page buffer currently behind a staging index.
    pub fn staging_page(&self, index: StagingIdx) -> Option<GfxResourceId> {
        match index.pool()? {
            StagingPoolKind::Write => self.staging_write.page(index.slot()),
            StagingPoolKind::Read => self.staging_read.page(index.slot()),
            StagingPoolKind::Uniform => self.staging_uniform.page(index.slot()),
        }
    }

    //----------------------------------------------------------------------
    // teardown

    /// Destroys everything still alive. Called on drop; callable earlier by
    /// an owner that wants deterministic teardown after `wait_idle`.
    pub fn destroy_all(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        for pool in &[&self.staging_write, &self.staging_read, &self.staging_uniform] {
            for page in pool.drain() {
                let _ = self.release_id(page);
            }
        }

        if let Ok(Some(s)) = self.samplers.release(self.default_sampler.0) {
            self.driver.destroy_sampler(s.native);
        }
        if let Ok(Some(l)) = self.ds_layouts.release(self.empty_ds_layout.0) {
            self.driver.destroy_descriptor_set_layout(l.native);
        }

        self.sampler_names.write().unwrap().clear();
        self.render_pass_names.write().unwrap().clear();
        self.graphics_names.write().unwrap().clear();
        self.mesh_names.write().unwrap().clear();
        self.compute_names.write().unwrap().clear();

        for p in self.graphics_pipelines.drain() {
            self.driver.destroy_pipeline(p.native);
        }
        for p in self.mesh_pipelines.drain() {
            self.driver.destroy_pipeline(p.native);
        }
        for p in self.compute_pipelines.drain() {
            self.driver.destroy_pipeline(p.native);
        }
        for t in self.graphics_templates.drain() {
            let _ = self.destroy_template(t.shaders, t.layout);
        }
        for t in self.mesh_templates.drain() {
            let _ = self.destroy_template(t.shaders, t.layout);
        }
        for t in self.compute_templates.drain() {
            let _ = self.destroy_template(vec![t.shader], t.layout);
        }
        for native in self.descriptor_sets.drain() {
            self.driver.destroy_descriptor_set(native);
        }
        for native in self.framebuffers.drain() {
            self.driver.destroy_framebuffer(native);
        }
        for native in self.render_passes.drain() {
            self.driver.destroy_render_pass(native);
        }
        for l in self.pipeline_layouts.drain() {
            self.driver.destroy_pipeline_layout(l.native);
        }
        for l in self.ds_layouts.drain() {
            self.driver.destroy_descriptor_set_layout(l.native);
        }
        for s in self.samplers.drain() {
            self.driver.destroy_sampler(s.native);
        }
        for b in self.buffers.drain() {
            if b.owned {
                self.driver.destroy_buffer(b.native);
            }
        }
        for i in self.images.drain() {
            if i.owned {
                self.driver.destroy_image(i.native);
            }
        }
        self.virtual_buffers.drain();
        self.virtual_images.drain();
        self.dependencies.drain();
        self.command_buffers.drain();

        for fence in self.fence_pool.lock().unwrap().drain(..) {
            self.driver.destroy_fence(fence);
        }
        for semaphore in self.semaphore_pool.lock().unwrap().drain(..) {
            self.driver.destroy_semaphore(semaphore);
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::null::NullDriver;
    use crate::image::Dimensions;

    fn manager() -> ResourceManager {
        let driver = Arc::new(NullDriver::new());
        ResourceManager::new(driver, &GraphicsConfig::default()).unwrap()
    }

    fn buffer_desc(size: u64) -> BufferDesc {
        BufferDesc {
            size,
            usage: BufferUsageFlags::TRANSFER_SRC,
            memory: MemoryType::DeviceLocal,
        }
    }

    #[test]
    fn create_release_buffer_roundtrip() {
        let m = manager();
        let before = m.buffers.occupancy();
        let id = m.create_buffer(&buffer_desc(64)).unwrap();
        let weak = id.get();
        assert!(m.is_resource_alive(weak));
        assert_eq!(m.buffer_description(weak).size, 64);
        m.release_resource(id).unwrap();
        assert!(!m.is_resource_alive(weak));
        assert_eq!(m.buffers.occupancy(), before);
    }

    #[test]
    fn describe_wrong_kind_returns_zero_value() {
        let m = manager();
        let id = m
            .create_image(&ImageDesc::new(
                Dimensions::Dim2d {
                    width: 4,
                    height: 4,
                },
                crate::format::Format::R8G8B8A8Unorm,
                crate::image::ImageUsageFlags::SAMPLED,
            ))
            .unwrap();
        let desc = m.buffer_description(id.get());
        assert_eq!(desc.size, 0);
        m.release_resource(id).unwrap();
    }

    #[test]
    fn import_does_not_destroy_native() {
        let driver = Arc::new(NullDriver::new());
        let m = ResourceManager::new(driver.clone(), &GraphicsConfig::default()).unwrap();
        let native = driver
            .create_buffer(&buffer_desc(16), &UniAllocator)
            .unwrap();
        let buffers_before = driver.live_buffers();
        let id = m.import_buffer(native, &buffer_desc(16)).unwrap();
        m.release_resource(id).unwrap();
        assert_eq!(driver.live_buffers(), buffers_before);
    }

    #[test]
    fn render_pass_cache_dedups() {
        let m = manager();
        let info = RenderPassInfo::default();
        let a = m.create_render_pass(&info).unwrap();
        let b = m.create_render_pass(&info).unwrap();
        assert_eq!(a.get(), b.get());
        assert_eq!(m.render_pass_refcount(a.get()).unwrap(), 2);
        m.release_render_pass(a).unwrap();
        m.release_render_pass(b).unwrap();
    }

    #[test]
    fn sampler_name_miss_returns_default() {
        let m = manager();
        assert_eq!(m.sampler("nope"), m.default_sampler());
    }

    #[test]
    fn staging_roundtrip() {
        let m = manager();
        let (page, idx) = m
            .create_staging_buffer(BufferUsageFlags::TRANSFER_SRC)
            .unwrap();
        assert_eq!(idx.pool(), Some(StagingPoolKind::Write));
        assert!(m.is_resource_alive(page));
        m.release_staging_buffer(idx);
        // page buffer stays alive for reuse
        assert!(m.is_resource_alive(page));
        let (page2, idx2) = m
            .create_staging_buffer(BufferUsageFlags::TRANSFER_SRC)
            .unwrap();
        assert_eq!(page, page2);
        assert_eq!(idx.slot(), idx2.slot());
    }
}
