//! The render graph.
//!
//! A per-frame declarative scheduler: nodes (render, compute, transfer) are
//! registered with explicit resource inputs and outputs, and [`submit`]
//! derives data dependencies from the writer map, orders nodes, merges
//! compatible render passes into multi-subpass driver passes, records the
//! contexts against a freshly acquired batch and tracks the submission
//! until completion.
//!
//! Multiple threads may add nodes, wait and poll concurrently; `submit`
//! itself is serialized and records from the calling thread.
//!
//! [`submit`]: RenderGraph::submit

use crate::batch::{BatchPool, CmdBatchId};
use crate::buffer::{BufferDesc, BufferUsageFlags, MemoryType};
use crate::command::{ClearColor, Command, QueueMask, QueueType};
use crate::context::{
    ComputeContext, GraphicsContext, Recorder, RenderContext, RenderContextInfo, TransferContext,
};
use crate::error::{Error, Result};
use crate::format::InitialState;
use crate::handle::{GfxResourceId, ResourceKind};
use crate::image::{ImageDesc, ImageSubresourceRange, ImageUsageFlags, ImageViewDesc};
use crate::renderpass::{
    AttachmentInfo, AttachmentLoadOp, AttachmentStoreOp, ClearValue, FramebufferDesc,
    RenderPassDesc, RenderPassInfo, SubpassInfo, MAX_COLOR_TARGETS,
};
use crate::resources::ResourceManager;
use bitflags::bitflags;
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use typed_arena::Arena;

bitflags! {
    /// Declared use of a resource by one node. A virtual handle accumulates
    /// the union of its usages over the frame; the union drives the
    /// concrete-resource allocation at submit.
    #[derive(Default)]
    pub struct ResourceUsage: u32 {
        const SAMPLED_IMAGE = 1 << 0;
        const STORAGE_IMAGE = 1 << 1;
        const COLOR_ATTACHMENT = 1 << 2;
        const DEPTH_ATTACHMENT = 1 << 3;
        const INPUT_ATTACHMENT = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
        const VERTEX_BUFFER = 1 << 7;
        const INDEX_BUFFER = 1 << 8;
        const INDIRECT_BUFFER = 1 << 9;
        const UNIFORM_BUFFER = 1 << 10;
        const STORAGE_BUFFER = 1 << 11;
        const HOST = 1 << 12;
    }
}

fn image_usage_flags(usage: ResourceUsage) -> ImageUsageFlags {
    let mut flags = ImageUsageFlags::empty();
    if usage.contains(ResourceUsage::SAMPLED_IMAGE) {
        flags |= ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ResourceUsage::STORAGE_IMAGE) {
        flags |= ImageUsageFlags::STORAGE;
    }
    if usage.contains(ResourceUsage::COLOR_ATTACHMENT) {
        flags |= ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ResourceUsage::DEPTH_ATTACHMENT) {
        flags |= ImageUsageFlags::DEPTH_ATTACHMENT;
    }
    if usage.contains(ResourceUsage::INPUT_ATTACHMENT) {
        flags |= ImageUsageFlags::INPUT_ATTACHMENT;
    }
    if usage.contains(ResourceUsage::TRANSFER_SRC) {
        flags |= ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ResourceUsage::TRANSFER_DST) {
        flags |= ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

fn buffer_usage_flags(usage: ResourceUsage) -> BufferUsageFlags {
    let mut flags = BufferUsageFlags::empty();
    if usage.contains(ResourceUsage::TRANSFER_SRC) {
        flags |= BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ResourceUsage::TRANSFER_DST) {
        flags |= BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ResourceUsage::UNIFORM_BUFFER) {
        flags |= BufferUsageFlags::UNIFORM;
    }
    if usage.contains(ResourceUsage::STORAGE_BUFFER) {
        flags |= BufferUsageFlags::STORAGE;
    }
    if usage.contains(ResourceUsage::INDEX_BUFFER) {
        flags |= BufferUsageFlags::INDEX;
    }
    if usage.contains(ResourceUsage::VERTEX_BUFFER) {
        flags |= BufferUsageFlags::VERTEX;
    }
    if usage.contains(ResourceUsage::INDIRECT_BUFFER) {
        flags |= BufferUsageFlags::INDIRECT;
    }
    flags
}

/// Fills a [`RenderPassDesc`] once input handles are resolved.
pub type RenderPassSetupFn = Box<
    dyn FnOnce(&mut GraphicsContext, &[GfxResourceId], &[GfxResourceId], &mut RenderPassDesc)
        + Send,
>;
/// Records draws inside the instantiated pass; `false` skips downstream
/// effects of this node but still counts its outputs as produced.
pub type RenderPassDrawFn =
    Box<dyn FnOnce(&mut RenderContext, &[GfxResourceId], &[GfxResourceId]) -> bool + Send>;
pub type GraphicsCommandFn =
    Box<dyn FnOnce(&mut GraphicsContext, &[GfxResourceId], &[GfxResourceId]) -> bool + Send>;
pub type ComputeCommandFn =
    Box<dyn FnOnce(&mut ComputeContext, &[GfxResourceId], &[GfxResourceId]) -> bool + Send>;
pub type TransferCommandFn =
    Box<dyn FnOnce(&mut TransferContext, &[GfxResourceId], &[GfxResourceId]) -> bool + Send>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum NodeState {
    Initial,
    /// Some virtual input has no producer; the node (and its dependents)
    /// are dropped this frame.
    Incomplete,
    Complete,
    /// Emitted into the ordered list.
    Pending,
}

enum NodeKind {
    Render {
        setup: Option<RenderPassSetupFn>,
        draw: Option<RenderPassDrawFn>,
    },
    Graphics(Option<GraphicsCommandFn>),
    Compute(Option<ComputeCommandFn>),
    Transfer(Option<TransferCommandFn>),
}

type IoList = SmallVec<[(GfxResourceId, ResourceUsage); 8]>;

#[derive(derivative::Derivative)]
#[derivative(Debug)]
struct BaseCmd {
    state: NodeState,
    queue: QueueType,
    inputs: IoList,
    outputs: IoList,
    /// Writer node per input, resolved at submit; `None` is an external
    /// (cross-frame) edge.
    input_writers: SmallVec<[Option<u32>; 8]>,
    #[derivative(Debug = "ignore")]
    kind: NodeKind,
    dbg_name: String,
}

#[derive(Default)]
struct FrameState {
    commands: Vec<BaseCmd>,
    /// Accumulated usages of virtual resources this frame.
    res_usage: FxHashMap<GfxResourceId, ResourceUsage>,
    /// resource -> writer node of this frame
    write_cmd: FxHashMap<GfxResourceId, u32>,
    duplicate_writer: Option<GfxResourceId>,
}

struct Segment {
    queue: QueueType,
    commands: Vec<Command>,
}

type AttachmentEntry = (
    GfxResourceId,
    ImageViewDesc,
    AttachmentLoadOp,
    AttachmentStoreOp,
    ClearValue,
);

/// Accumulated attachment set of a merged render-pass run. Later subpasses
/// may declare a subset of the slots seen so far (reading the rest as input
/// attachments) or extend the set with new slots.
struct GroupState {
    /// Indexed by `ColorTarget::index`; gaps stay `None` until a subpass
    /// declares them.
    attachments: SmallVec<[Option<AttachmentEntry>; MAX_COLOR_TARGETS]>,
    depth: Option<AttachmentEntry>,
    width: u32,
    height: u32,
    layers: u32,
    viewport_count: usize,
    initialized: bool,
}

impl GroupState {
    fn new() -> GroupState {
        GroupState {
            attachments: SmallVec::new(),
            depth: None,
            width: 0,
            height: 0,
            layers: 0,
            viewport_count: 0,
            initialized: false,
        }
    }

    fn has_dimensions(&self) -> bool {
        self.attachments.iter().any(|a| a.is_some()) || self.depth.is_some()
    }
}

pub struct RenderGraph {
    manager: Arc<ResourceManager>,
    /// Exclusive during init/deinit, shared for everything else.
    lifecycle: RwLock<()>,
    alive: AtomicBool,
    frame: Mutex<FrameState>,
    batches: BatchPool,
    submitted: Mutex<Vec<CmdBatchId>>,
}

impl RenderGraph {
    pub fn new(manager: Arc<ResourceManager>, config: &crate::GraphicsConfig) -> RenderGraph {
        RenderGraph {
            manager,
            lifecycle: RwLock::new(()),
            alive: AtomicBool::new(true),
            frame: Mutex::new(FrameState::default()),
            batches: BatchPool::new(config.max_batches),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// Queues on which `present` is legal, as reported by the driver.
    pub fn present_queues(&self) -> QueueMask {
        self.manager.driver().present_queues()
    }

    /// Waits for everything in flight and stops accepting work.
    pub fn deinitialize(&self) {
        let _exclusive = self.lifecycle.write().unwrap();
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.manager.driver().wait_idle();
        self.recycle_batches();
        self.frame.lock().unwrap().reset();
    }

    fn check_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::DriverLost)
        }
    }

    //----------------------------------------------------------------------
    // node registration

    /// Registers a render-pass node: `setup` fills the pass description
    /// (based on resolved inputs), then `draw` records against a render
    /// context scoped to the instantiated pass.
    pub fn add_render_pass(
        &self,
        queue: QueueType,
        inputs: &[(GfxResourceId, ResourceUsage)],
        outputs: &[(GfxResourceId, ResourceUsage)],
        setup: impl FnOnce(&mut GraphicsContext, &[GfxResourceId], &[GfxResourceId], &mut RenderPassDesc)
            + Send
            + 'static,
        draw: impl FnOnce(&mut RenderContext, &[GfxResourceId], &[GfxResourceId]) -> bool
            + Send
            + 'static,
        dbg_name: &str,
    ) -> Result<()> {
        if queue != QueueType::Graphics {
            return Err(Error::QueueMismatch);
        }
        self.add_node(
            queue,
            inputs,
            outputs,
            NodeKind::Render {
                setup: Some(Box::new(setup)),
                draw: Some(Box::new(draw)),
            },
            dbg_name,
        )
    }

    pub fn add_graphics(
        &self,
        queue: QueueType,
        inputs: &[(GfxResourceId, ResourceUsage)],
        outputs: &[(GfxResourceId, ResourceUsage)],
        pass: impl FnOnce(&mut GraphicsContext, &[GfxResourceId], &[GfxResourceId]) -> bool
            + Send
            + 'static,
        dbg_name: &str,
    ) -> Result<()> {
        if queue != QueueType::Graphics {
            return Err(Error::QueueMismatch);
        }
        self.add_node(
            queue,
            inputs,
            outputs,
            NodeKind::Graphics(Some(Box::new(pass))),
            dbg_name,
        )
    }

    pub fn add_compute(
        &self,
        queue: QueueType,
        inputs: &[(GfxResourceId, ResourceUsage)],
        outputs: &[(GfxResourceId, ResourceUsage)],
        pass: impl FnOnce(&mut ComputeContext, &[GfxResourceId], &[GfxResourceId]) -> bool
            + Send
            + 'static,
        dbg_name: &str,
    ) -> Result<()> {
        match queue {
            QueueType::Graphics | QueueType::AsyncCompute => {}
            QueueType::Transfer => return Err(Error::QueueMismatch),
        }
        self.add_node(
            queue,
            inputs,
            outputs,
            NodeKind::Compute(Some(Box::new(pass))),
            dbg_name,
        )
    }

    /// Transfer nodes are admissible on any queue.
    pub fn add_transfer(
        &self,
        queue: QueueType,
        inputs: &[(GfxResourceId, ResourceUsage)],
        outputs: &[(GfxResourceId, ResourceUsage)],
        pass: impl FnOnce(&mut TransferContext, &[GfxResourceId], &[GfxResourceId]) -> bool
            + Send
            + 'static,
        dbg_name: &str,
    ) -> Result<()> {
        self.add_node(
            queue,
            inputs,
            outputs,
            NodeKind::Transfer(Some(Box::new(pass))),
            dbg_name,
        )
    }

    fn add_node(
        &self,
        queue: QueueType,
        inputs: &[(GfxResourceId, ResourceUsage)],
        outputs: &[(GfxResourceId, ResourceUsage)],
        kind: NodeKind,
        dbg_name: &str,
    ) -> Result<()> {
        let _shared = self.lifecycle.read().unwrap();
        self.check_alive()?;

        let mut frame = self.frame.lock().unwrap();
        let index = frame.commands.len() as u32;

        for &(id, usage) in inputs.iter().chain(outputs) {
            if id.is_virtual() {
                *frame.res_usage.entry(id).or_default() |= usage;
            }
        }

        for &(id, _) in outputs {
            if frame.write_cmd.insert(id, index).is_some() {
                // surfaced by the next submit
                warn!("duplicate writer for {:?} (node '{}')", id, dbg_name);
                frame.duplicate_writer = Some(id);
            }
        }

        let mut input_writers = SmallVec::new();
        input_writers.resize(inputs.len(), None);
        frame.commands.push(BaseCmd {
            state: NodeState::Initial,
            queue,
            inputs: SmallVec::from_slice(inputs),
            outputs: SmallVec::from_slice(outputs),
            input_writers,
            kind,
            dbg_name: dbg_name.to_owned(),
        });
        Ok(())
    }

    //----------------------------------------------------------------------
    // submit

    /// Resolves dependencies, orders and records the frame's nodes, submits
    /// the per-queue streams and tracks the batch. Returns `None` when no
    /// node was registered. All frame state is reset on every path out.
    pub fn submit(&self) -> Result<Option<CmdBatchId>> {
        let _shared = self.lifecycle.read().unwrap();
        self.check_alive()?;

        let mut frame = self.frame.lock().unwrap();

        if let Some(id) = frame.duplicate_writer.take() {
            frame.reset();
            drop(frame);
            error!("submit failed: duplicate writer for {:?}", id);
            // recycling runs on every submit, failed ones included
            self.recycle_batches();
            return Err(Error::DuplicateWriter);
        }

        if frame.commands.is_empty() {
            drop(frame);
            self.recycle_batches();
            return Ok(None);
        }

        let mut nodes = mem::take(&mut frame.commands);
        let write_cmd = mem::take(&mut frame.write_cmd);
        let res_usage = mem::take(&mut frame.res_usage);
        // the frame guard stays held: submit is serialized against add

        let result = self.submit_nodes(&mut nodes, &write_cmd, &res_usage);

        // wholesale reset of the per-frame allocations
        drop(nodes);
        frame.reset();
        drop(frame);

        self.recycle_batches();
        result
    }

    fn submit_nodes(
        &self,
        nodes: &mut [BaseCmd],
        write_cmd: &FxHashMap<GfxResourceId, u32>,
        res_usage: &FxHashMap<GfxResourceId, ResourceUsage>,
    ) -> Result<Option<CmdBatchId>> {
        self.resolve_writers(nodes, write_cmd);
        let ordered = Self::sort_nodes(nodes);
        if ordered.is_empty() {
            return Ok(None);
        }

        let batch_id = self.batches.acquire()?;
        let record = self.record_nodes(nodes, &ordered, res_usage, batch_id);

        match record {
            Ok(()) => {
                self.submitted.lock().unwrap().push(batch_id);
                Ok(Some(batch_id))
            }
            Err(e) => {
                // roll the failed batch back
                if let Some(mut batch) = self.batches.batch(batch_id.index()) {
                    batch.abort(&self.manager);
                }
                self.batches.unassign(batch_id.index());
                Err(e)
            }
        }
    }

    /// For every node and input, finds the node that last wrote the
    /// resource this frame. A concrete input without a writer is an
    /// external (cross-frame) edge and stays satisfied; a virtual input
    /// without a writer can never be produced, so the node is incomplete.
    fn resolve_writers(&self, nodes: &mut [BaseCmd], write_cmd: &FxHashMap<GfxResourceId, u32>) {
        for (index, node) in nodes.iter_mut().enumerate() {
            let mut complete = true;
            for slot in 0..node.inputs.len() {
                let id = node.inputs[slot].0;
                let writer = write_cmd.get(&id).copied();
                // a self-edge (node reading its own output) is satisfied
                node.input_writers[slot] = writer.filter(|&w| w != index as u32);
                if writer.is_none() && id.is_virtual() {
                    complete = false;
                }
            }
            node.state = if complete {
                NodeState::Complete
            } else {
                debug!("node '{}' incomplete: unproduced virtual input", node.dbg_name);
                NodeState::Incomplete
            };
        }
    }

    /// Multi-pass topological emission. Incomplete nodes drop out and
    /// poison their dependents; complete nodes whose writers are all
    /// pending flip to pending and join the ordered list.
    fn sort_nodes(nodes: &mut [BaseCmd]) -> Vec<u32> {
        let mut remaining: Vec<u32> = (0..nodes.len() as u32).collect();
        let mut ordered = Vec::with_capacity(nodes.len());

        while !remaining.is_empty() {
            let before = remaining.len();
            let mut next = Vec::with_capacity(remaining.len());

            for &index in &remaining {
                match nodes[index as usize].state {
                    NodeState::Complete => {}
                    _ => continue,
                }

                let mut failed = false;
                let mut complete = true;
                for writer in nodes[index as usize].input_writers.iter().flatten() {
                    match nodes[*writer as usize].state {
                        NodeState::Incomplete => failed = true,
                        NodeState::Pending => {}
                        _ => complete = false,
                    }
                }

                if failed {
                    nodes[index as usize].state = NodeState::Incomplete;
                    debug!(
                        "node '{}' dropped: incomplete dependency",
                        nodes[index as usize].dbg_name
                    );
                } else if complete {
                    nodes[index as usize].state = NodeState::Pending;
                    ordered.push(index);
                } else {
                    next.push(index);
                }
            }

            if next.len() == before {
                // writer edges can point forward, so a genuine cycle is
                // possible; drop whatever is left
                error!("dependency cycle between {} nodes, dropping them", next.len());
                for &index in &next {
                    nodes[index as usize].state = NodeState::Incomplete;
                }
                break;
            }
            remaining = next;
        }
        ordered
    }

    /// Binds virtual resources, records every pending node into per-queue
    /// segments (render-pass runs merged), and submits the segments chained
    /// by semaphores.
    fn record_nodes(
        &self,
        nodes: &mut [BaseCmd],
        ordered: &[u32],
        res_usage: &FxHashMap<GfxResourceId, ResourceUsage>,
        batch_id: CmdBatchId,
    ) -> Result<()> {
        let manager = &*self.manager;
        let mut batch_guard = self
            .batches
            .batch(batch_id.index())
            .ok_or(Error::InvalidHandle)?;
        let batch = &mut *batch_guard;

        // bind every virtual resource referenced by a surviving node, with
        // the usage union accumulated over the frame
        let mut outputs: FxHashMap<GfxResourceId, GfxResourceId> = FxHashMap::default();
        let mut init_commands = Vec::new();
        for &index in ordered {
            let node = &nodes[index as usize];
            for &(id, _) in node.inputs.iter().chain(&node.outputs) {
                if !id.is_virtual() || outputs.contains_key(&id) {
                    continue;
                }
                let usage = res_usage.get(&id).copied().unwrap_or_default();
                let concrete = self.bind_virtual(id, usage, &mut init_commands, batch)?;
                outputs.insert(id, concrete);
            }
        }

        // hold the declared resources until the device is done
        for &index in ordered {
            let node = &nodes[index as usize];
            for &(id, _) in node.inputs.iter().chain(&node.outputs) {
                if id.is_virtual() {
                    continue;
                }
                if let Err(e) = batch.retain(manager, id) {
                    warn!("node '{}' references dead {:?}: {}", node.dbg_name, id, e);
                }
            }
        }

        // record in emission order; a queue change closes the segment
        let mut segments: Vec<Segment> = Vec::new();
        let mut cursor = 0;
        while cursor < ordered.len() {
            let queue = nodes[ordered[cursor] as usize].queue;
            if segments.last().map(|s| s.queue) != Some(queue) {
                segments.push(Segment {
                    queue,
                    commands: Vec::new(),
                });
            }

            let is_render = |n: &BaseCmd| match n.kind {
                NodeKind::Render { .. } => true,
                _ => false,
            };

            if is_render(&nodes[ordered[cursor] as usize]) {
                // consecutive render nodes on the same queue are merge
                // candidates
                let start = cursor;
                while cursor < ordered.len()
                    && nodes[ordered[cursor] as usize].queue == queue
                    && is_render(&nodes[ordered[cursor] as usize])
                {
                    cursor += 1;
                }
                let group: Vec<u32> = ordered[start..cursor].to_vec();
                let segment = segments.last_mut().unwrap();
                self.record_render_group(
                    nodes,
                    &group,
                    queue,
                    batch,
                    &mut outputs,
                    &mut segment.commands,
                )?;
            } else {
                let index = ordered[cursor] as usize;
                cursor += 1;
                let segment = segments.last_mut().unwrap();
                Self::record_single(
                    manager,
                    &mut nodes[index],
                    queue,
                    batch,
                    &mut outputs,
                    &mut segment.commands,
                );
            }
        }

        if !init_commands.is_empty() {
            // virtual resources declared `Cleared` start the frame cleared
            let first = &mut segments[0].commands;
            init_commands.append(first);
            *first = init_commands;
        }

        // one driver submission per segment, chained with semaphores;
        // cross-queue edges ride the chain
        let driver = manager.driver();
        let mut wait: Option<crate::driver::NativeSemaphore> = None;
        for (i, segment) in segments.iter().enumerate() {
            let signal = if i + 1 < segments.len() {
                Some(batch.acquire_semaphore(manager)?)
            } else {
                None
            };
            let fence = batch.acquire_fence(manager)?;
            let wait_slice: SmallVec<[_; 1]> = wait.into_iter().collect();
            let signal_slice: SmallVec<[_; 1]> = signal.into_iter().collect();
            driver.submit(crate::driver::QueueSubmission {
                queue: segment.queue,
                commands: &segment.commands,
                wait_semaphores: &wait_slice,
                signal_semaphores: &signal_slice,
                fence: Some(fence),
            })?;
            wait = signal;
        }
        Ok(())
    }

    /// Creates the concrete resource for a virtual handle from its
    /// accumulated usage union.
    fn bind_virtual(
        &self,
        id: GfxResourceId,
        usage: ResourceUsage,
        init_commands: &mut Vec<Command>,
        batch: &mut crate::batch::CmdBatch,
    ) -> Result<GfxResourceId> {
        let manager = &*self.manager;
        let usage = if usage.is_empty() {
            ResourceUsage::all()
        } else {
            usage
        };

        match id.kind() {
            ResourceKind::VirtualImage => {
                let vdesc = manager.virtual_image_description(id);
                let desc = ImageDesc {
                    dimensions: vdesc.dimensions,
                    format: vdesc.format,
                    usage: image_usage_flags(usage),
                    mip_levels: 1,
                    samples: vdesc.samples,
                };
                let unique = manager.create_image(&desc)?;
                let concrete = unique.get();
                batch.retain(manager, concrete)?;
                manager.release_resource(unique)?;
                if vdesc.initial_state == InitialState::Cleared {
                    init_commands.push(Command::ClearColorImage {
                        image: manager.native_image_handle(concrete)?,
                        color: ClearColor::Float([0.0; 4]),
                        ranges: SmallVec::from_slice(&[ImageSubresourceRange::default()]),
                    });
                }
                debug!("bound virtual {:?} -> {:?} (usage {:?})", id, concrete, usage);
                Ok(concrete)
            }
            ResourceKind::VirtualBuffer => {
                let vdesc = manager.virtual_buffer_description(id);
                let desc = BufferDesc {
                    size: vdesc.size,
                    usage: buffer_usage_flags(usage),
                    memory: if usage.contains(ResourceUsage::HOST) {
                        MemoryType::HostCoherent
                    } else {
                        MemoryType::DeviceLocal
                    },
                };
                let unique = manager.create_buffer(&desc)?;
                let concrete = unique.get();
                batch.retain(manager, concrete)?;
                manager.release_resource(unique)?;
                if vdesc.initial_state == InitialState::Cleared {
                    init_commands.push(Command::FillBuffer {
                        buffer: manager.native_buffer_handle(concrete)?,
                        offset: 0,
                        size: desc.size,
                        data: 0,
                    });
                }
                Ok(concrete)
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    fn record_single(
        manager: &ResourceManager,
        node: &mut BaseCmd,
        queue: QueueType,
        batch: &mut crate::batch::CmdBatch,
        outputs: &mut FxHashMap<GfxResourceId, GfxResourceId>,
        commands: &mut Vec<Command>,
    ) {
        let in_ids: SmallVec<[GfxResourceId; 8]> = node.inputs.iter().map(|p| p.0).collect();
        let out_ids: SmallVec<[GfxResourceId; 8]> = node.outputs.iter().map(|p| p.0).collect();

        let recorder = Recorder {
            manager,
            queue,
            commands,
            batch,
            outputs,
        };

        let ok = match &mut node.kind {
            NodeKind::Transfer(f) => match f.take() {
                Some(f) => {
                    let mut ctx = TransferContext::new(recorder);
                    f(&mut ctx, &in_ids, &out_ids)
                }
                None => true,
            },
            NodeKind::Compute(f) => match f.take() {
                Some(f) => {
                    let mut ctx = ComputeContext::new(recorder);
                    f(&mut ctx, &in_ids, &out_ids)
                }
                None => true,
            },
            NodeKind::Graphics(f) => match f.take() {
                Some(f) => {
                    let mut ctx = GraphicsContext::new(recorder);
                    f(&mut ctx, &in_ids, &out_ids)
                }
                None => true,
            },
            NodeKind::Render { .. } => unreachable!("render nodes go through the group path"),
        };
        if !ok {
            // outputs still count as produced so readers do not cascade
            warn!("node '{}' failed, skipped", node.dbg_name);
        }
    }

    /// Runs the group's setup callbacks, splits the candidates into runs
    /// with compatible attachment sets, and emits one driver render pass
    /// with one subpass per node for every run.
    fn record_render_group(
        &self,
        nodes: &mut [BaseCmd],
        group: &[u32],
        queue: QueueType,
        batch: &mut crate::batch::CmdBatch,
        outputs: &mut FxHashMap<GfxResourceId, GfxResourceId>,
        commands: &mut Vec<Command>,
    ) -> Result<()> {
        let manager = &*self.manager;
        let arena: Arena<RenderPassDesc> = Arena::new();

        // run setups first: descriptions drive the merge decision
        let mut passes: Vec<(&mut RenderPassDesc, u32)> = Vec::with_capacity(group.len());
        for &index in group {
            let node = &mut nodes[index as usize];
            let in_ids: SmallVec<[GfxResourceId; 8]> = node.inputs.iter().map(|p| p.0).collect();
            let out_ids: SmallVec<[GfxResourceId; 8]> = node.outputs.iter().map(|p| p.0).collect();
            let desc = arena.alloc(RenderPassDesc::default());

            if let NodeKind::Render { setup, .. } = &mut node.kind {
                if let Some(setup) = setup.take() {
                    let mut ctx = GraphicsContext::new(Recorder {
                        manager,
                        queue,
                        commands: &mut *commands,
                        batch: &mut *batch,
                        outputs: &mut *outputs,
                    });
                    setup(&mut ctx, &in_ids, &out_ids, &mut *desc);
                }
            }
            passes.push((desc, index));
        }

        // split into compatible runs, folding each pass into the run's
        // accumulated attachment set
        let mut runs: Vec<(Vec<usize>, GroupState)> = Vec::new();
        for (pos, (desc, _)) in passes.iter().enumerate() {
            let folded = match runs.last_mut() {
                Some((_, state)) => Self::fold_pass(manager, outputs, state, desc),
                None => false,
            };
            if folded {
                runs.last_mut().unwrap().0.push(pos);
            } else {
                let mut state = GroupState::new();
                if !Self::fold_pass(manager, outputs, &mut state, desc) {
                    // the pass is inconsistent with itself (mismatched
                    // attachment dimensions)
                    return Err(Error::UnsupportedDescription);
                }
                runs.push((vec![pos], state));
            }
        }

        for (run, state) in runs {
            self.emit_render_run(nodes, &passes, &run, &state, queue, batch, outputs, commands)?;
        }
        Ok(())
    }

    fn resolved_image(
        outputs: &FxHashMap<GfxResourceId, GfxResourceId>,
        id: GfxResourceId,
    ) -> GfxResourceId {
        if id.is_virtual() {
            outputs.get(&id).copied().unwrap_or(id)
        } else {
            id
        }
    }

    /// Tries to fold one pass into the group, extending the accumulated
    /// attachment set. A subpass may declare any subset of the known slots
    /// (reading the rest as input attachments) or add new slots; every slot
    /// it does declare must carry the same image and view, and dimensions,
    /// layer counts and viewport counts must agree across the run.
    ///
    /// Returns `false` without touching `state` when the pass is
    /// incompatible and the run must split.
    fn fold_pass(
        manager: &ResourceManager,
        outputs: &FxHashMap<GfxResourceId, GfxResourceId>,
        state: &mut GroupState,
        desc: &RenderPassDesc,
    ) -> bool {
        if state.initialized && desc.viewports.len() != state.viewport_count {
            return false;
        }

        // validate everything before mutating, so a rejected pass leaves
        // the group untouched
        let mut dims = if state.has_dimensions() {
            Some((state.width, state.height, state.layers))
        } else {
            None
        };
        let mut new_colors: SmallVec<[(usize, AttachmentEntry); MAX_COLOR_TARGETS]> =
            SmallVec::new();

        for target in &desc.color_targets {
            let image = Self::resolved_image(outputs, target.image);
            let idesc = manager.image_description(image);
            let (w, h) = idesc.dimensions.width_height();
            let layers = target.view.layer_count;
            match dims {
                None => dims = Some((w, h, layers)),
                Some((sw, sh, sl)) => {
                    if sw != w || sh != h || sl != layers {
                        return false;
                    }
                }
            }
            let slot = target.index as usize;
            match state.attachments.get(slot).and_then(|e| e.as_ref()) {
                Some(&(existing_image, existing_view, ..)) => {
                    if existing_image != image || existing_view != target.view {
                        return false;
                    }
                }
                None => new_colors.push((
                    slot,
                    (
                        image,
                        target.view,
                        target.load_op,
                        target.store_op,
                        target.clear_value,
                    ),
                )),
            }
        }

        let mut new_depth = None;
        if let Some(depth) = &desc.depth_stencil_target {
            let image = Self::resolved_image(outputs, depth.image);
            let idesc = manager.image_description(image);
            let (w, h) = idesc.dimensions.width_height();
            let layers = depth.view.layer_count;
            match dims {
                None => dims = Some((w, h, layers)),
                Some((sw, sh, sl)) => {
                    if sw != w || sh != h || sl != layers {
                        return false;
                    }
                }
            }
            match &state.depth {
                Some((existing_image, existing_view, ..)) => {
                    if *existing_image != image || *existing_view != depth.view {
                        return false;
                    }
                }
                None => {
                    new_depth =
                        Some((image, depth.view, depth.load_op, depth.store_op, depth.clear_value));
                }
            }
        }

        if !state.initialized {
            state.viewport_count = desc.viewports.len();
            state.initialized = true;
        }
        if let Some((w, h, l)) = dims {
            state.width = w;
            state.height = h;
            state.layers = l;
        }
        for (slot, entry) in new_colors {
            while state.attachments.len() <= slot {
                state.attachments.push(None);
            }
            state.attachments[slot] = Some(entry);
        }
        if let Some(depth) = new_depth {
            state.depth = Some(depth);
        }
        true
    }

    fn emit_render_run(
        &self,
        nodes: &mut [BaseCmd],
        passes: &[(&mut RenderPassDesc, u32)],
        run: &[usize],
        state: &GroupState,
        queue: QueueType,
        batch: &mut crate::batch::CmdBatch,
        outputs: &mut FxHashMap<GfxResourceId, GfxResourceId>,
        commands: &mut Vec<Command>,
    ) -> Result<()> {
        let manager = &*self.manager;

        // structural render-pass key; populated slots pack densely into the
        // attachment table, so sparse `ColorTarget::index` values translate
        // through the slot map
        let mut info = RenderPassInfo::default();
        let mut clear_values: SmallVec<[ClearValue; 8]> = SmallVec::new();
        let mut slot_map: SmallVec<[Option<u32>; MAX_COLOR_TARGETS]> = SmallVec::new();
        for entry in &state.attachments {
            match entry {
                Some((image, _view, load_op, store_op, clear)) => {
                    let idesc = manager.image_description(*image);
                    slot_map.push(Some(info.attachments.len() as u32));
                    info.attachments.push(AttachmentInfo {
                        format: idesc.format,
                        samples: idesc.samples,
                        load_op: *load_op,
                        store_op: *store_op,
                    });
                    clear_values.push(*clear);
                }
                None => slot_map.push(None),
            }
        }
        let depth_index = info.attachments.len() as u32;
        if let Some(&(image, _view, load_op, store_op, clear)) = state.depth.as_ref() {
            let idesc = manager.image_description(image);
            info.attachments.push(AttachmentInfo {
                format: idesc.format,
                samples: idesc.samples,
                load_op,
                store_op,
            });
            clear_values.push(clear);
        }

        let attachment_index =
            |slot: u32| -> Option<u32> { slot_map.get(slot as usize).copied().flatten() };
        for &pos in run {
            let desc = &*passes[pos].0;
            let mut subpass = SubpassInfo::default();
            for target in &desc.color_targets {
                match attachment_index(target.index) {
                    Some(index) => subpass.color_attachments.push(index),
                    None => warn!("color target slot {} missing from merged pass", target.index),
                }
            }
            for &slot in &desc.input_targets {
                match attachment_index(slot) {
                    Some(index) => subpass.input_attachments.push(index),
                    None => warn!("input attachment slot {} missing from merged pass", slot),
                }
            }
            subpass.depth_stencil_attachment =
                desc.depth_stencil_target.as_ref().map(|_| depth_index);
            info.subpasses.push(subpass);
        }

        let render_pass = manager.create_render_pass(&info)?;
        let render_pass_id = render_pass.get();

        let mut fb_attachments: SmallVec<[(GfxResourceId, ImageViewDesc); MAX_COLOR_TARGETS]> =
            state
                .attachments
                .iter()
                .flatten()
                .map(|&(image, view, ..)| (image, view))
                .collect();
        if let Some(&(image, view, ..)) = state.depth.as_ref() {
            fb_attachments.push((image, view));
        }
        let framebuffer = match manager.create_framebuffer(&FramebufferDesc {
            render_pass: render_pass_id,
            attachments: fb_attachments,
            width: state.width,
            height: state.height,
            layers: state.layers.max(1),
        }) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                let _ = manager.release_render_pass(render_pass);
                return Err(e);
            }
        };
        // both were just created, the lookups cannot miss
        let render_pass_native = manager.native_render_pass(render_pass_id)?;
        let framebuffer_native = manager.native_framebuffer(framebuffer.get())?;

        commands.push(Command::BeginRenderPass {
            render_pass: render_pass_native,
            framebuffer: framebuffer_native,
            extent: (state.width, state.height),
            clear_values,
        });
        let viewports = &passes[run[0]].0.viewports;
        if !viewports.is_empty() {
            commands.push(Command::SetViewports {
                first: 0,
                viewports: SmallVec::from_slice(viewports),
            });
        }

        for (subpass_index, &pos) in run.iter().enumerate() {
            if subpass_index > 0 {
                commands.push(Command::NextSubpass);
            }
            let node_index = passes[pos].1 as usize;
            let node = &mut nodes[node_index];
            let in_ids: SmallVec<[GfxResourceId; 8]> = node.inputs.iter().map(|p| p.0).collect();
            let out_ids: SmallVec<[GfxResourceId; 8]> = node.outputs.iter().map(|p| p.0).collect();

            let draw = match &mut node.kind {
                NodeKind::Render { draw, .. } => draw.take(),
                _ => None,
            };
            if let Some(draw) = draw {
                let mut gctx = GraphicsContext::new(Recorder {
                    manager,
                    queue,
                    commands: &mut *commands,
                    batch: &mut *batch,
                    outputs: &mut *outputs,
                });
                let info = RenderContextInfo {
                    render_pass: render_pass_id,
                    subpass_index: subpass_index as u32,
                    layer_count: state.layers.max(1),
                };
                let mut rctx = RenderContext::new(&mut gctx, info);
                if !draw(&mut rctx, &in_ids, &out_ids) {
                    warn!("render node '{}' failed, skipped", node.dbg_name);
                }
                // bound state does not leak across subpass boundaries
                rctx.reset_states();
            }
        }
        commands.push(Command::EndRenderPass);

        batch.retain_render_pass(render_pass);
        batch.retain_framebuffer(framebuffer);
        Ok(())
    }

    //----------------------------------------------------------------------
    // tracking

    /// Walks the in-flight list and recycles every batch whose fences have
    /// all signaled.
    fn recycle_batches(&self) {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.retain(|&id| {
            match self.batches.generation(id.index()) {
                Some(generation) if generation == id.generation() => {}
                _ => return false, // stale id, slot already recycled
            }
            let complete = match self.batches.batch(id.index()) {
                Some(mut batch) => batch.on_complete(&self.manager),
                None => true,
            };
            if complete {
                self.batches.unassign(id.index());
                false
            } else {
                true
            }
        });
    }

    /// Blocks until all listed batches complete or the timeout elapses.
    /// Partial completion remains observable through [`is_complete`].
    ///
    /// [`is_complete`]: RenderGraph::is_complete
    pub fn wait(&self, batches: &[CmdBatchId], timeout: Duration) -> bool {
        let _shared = self.lifecycle.read().unwrap();

        let mut fences = Vec::new();
        for &id in batches {
            if self.batches.generation(id.index()) != Some(id.generation()) {
                continue; // already recycled
            }
            if let Some(batch) = self.batches.batch(id.index()) {
                fences.extend_from_slice(batch.fences());
            }
        }

        let ok = fences.is_empty()
            || self.manager.driver().wait_fences(&fences, timeout);
        if ok {
            for &id in batches {
                if self.batches.generation(id.index()) != Some(id.generation()) {
                    continue;
                }
                if let Some(mut batch) = self.batches.batch(id.index()) {
                    batch.on_complete(&self.manager);
                }
            }
        }
        self.recycle_batches();
        ok
    }

    /// Blocks until the device is idle and recycles everything in flight.
    pub fn wait_idle(&self) -> bool {
        let _shared = self.lifecycle.read().unwrap();
        self.manager.driver().wait_idle();
        self.recycle_batches();
        true
    }

    /// True iff every listed batch has completed (recycled ids count as
    /// complete).
    pub fn is_complete(&self, batches: &[CmdBatchId]) -> bool {
        let _shared = self.lifecycle.read().unwrap();
        for &id in batches {
            if self.batches.generation(id.index()) != Some(id.generation()) {
                continue;
            }
            match self.batches.batch(id.index()) {
                Some(batch) => {
                    if !batch.is_complete(&self.manager) {
                        return false;
                    }
                }
                None => {}
            }
        }
        true
    }

    /// Batches still tracked as in flight.
    pub fn in_flight(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if self.alive.load(Ordering::SeqCst) {
            self.deinitialize();
        }
    }
}

impl FrameState {
    fn reset(&mut self) {
        self.commands.clear();
        self.res_usage.clear();
        self.write_cmd.clear();
        self.duplicate_writer = None;
    }
}
