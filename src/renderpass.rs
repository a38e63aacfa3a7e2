//! Render pass and framebuffer descriptions.
//!
//! [`RenderPassDesc`] is the per-frame structure a render node's setup
//! callback fills in; the graph folds one or more of them (merged subpasses)
//! into a [`RenderPassInfo`], the structural key of the cached render-pass
//! pool. [`FramebufferDesc`] keys the cached framebuffer pool.

use crate::format::Format;
use crate::handle::{GfxResourceId, RenderPassId};
use crate::image::ImageViewDesc;
use crate::pipeline::Viewport;
use ordered_float::NotNan;
use smallvec::SmallVec;

pub const MAX_COLOR_TARGETS: usize = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AttachmentLoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AttachmentStoreOp {
    Store,
    DontCare,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ClearValue {
    ColorF32([NotNan<f32>; 4]),
    ColorU32([u32; 4]),
    DepthStencil { depth: NotNan<f32>, stencil: u32 },
}

impl ClearValue {
    pub fn transparent_black() -> ClearValue {
        ClearValue::ColorF32([0.0.into(); 4])
    }
}

/// One color target of a logical render pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColorTarget {
    /// Attachment slot inside the (possibly merged) render pass.
    pub index: u32,
    pub image: GfxResourceId,
    pub view: ImageViewDesc,
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
    pub clear_value: ClearValue,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DepthStencilTarget {
    pub image: GfxResourceId,
    pub view: ImageViewDesc,
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
    pub clear_value: ClearValue,
}

/// Filled by a render node's setup callback, after input handles have been
/// resolved.
#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub color_targets: SmallVec<[ColorTarget; MAX_COLOR_TARGETS]>,
    pub depth_stencil_target: Option<DepthStencilTarget>,
    /// Attachment indices (into the color target table) read as input
    /// attachments by this subpass.
    pub input_targets: SmallVec<[u32; 4]>,
    pub viewports: SmallVec<[Viewport; 1]>,
}

impl RenderPassDesc {
    pub fn add_color_target(&mut self, target: ColorTarget) -> &mut Self {
        self.color_targets.push(target);
        self
    }

    pub fn set_depth_stencil_target(&mut self, target: DepthStencilTarget) -> &mut Self {
        self.depth_stencil_target = Some(target);
        self
    }

    pub fn add_viewport(&mut self, viewport: Viewport) -> &mut Self {
        self.viewports.push(viewport);
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AttachmentInfo {
    pub format: Format,
    pub samples: u32,
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct SubpassInfo {
    /// Indices into [`RenderPassInfo::attachments`].
    pub color_attachments: SmallVec<[u32; MAX_COLOR_TARGETS]>,
    pub input_attachments: SmallVec<[u32; 4]>,
    pub depth_stencil_attachment: Option<u32>,
}

/// Structural key of a driver render pass; two passes with equal infos share
/// one cached object.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct RenderPassInfo {
    pub attachments: SmallVec<[AttachmentInfo; MAX_COLOR_TARGETS]>,
    pub subpasses: SmallVec<[SubpassInfo; 4]>,
}

/// Structural key of a cached framebuffer.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FramebufferDesc {
    pub render_pass: RenderPassId,
    pub attachments: SmallVec<[(GfxResourceId, ImageViewDesc); MAX_COLOR_TARGETS]>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}
