//! Pipeline state descriptions.
//!
//! All state structs derive `Hash`/`Eq` (floats go through
//! `ordered_float::NotNan`) so a whole pipeline description can be hashed
//! for the per-template pipeline cache. [`normalize_render_state`] is the
//! sole source of determinism for that hash: logically equivalent
//! descriptions must collide after normalization, so every new dynamic bit
//! or blend mode has to be folded in here before it may enter the hash.

use crate::driver::DriverCaps;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::handle::RenderPassId;
use bitflags::bitflags;
use ordered_float::NotNan;

bitflags! {
    #[derive(Default)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const GEOMETRY = 1 << 1;
        const FRAGMENT = 1 << 2;
        const TESS_CONTROL = 1 << 3;
        const TESS_EVAL = 1 << 4;
        const COMPUTE = 1 << 5;
        const TASK = 1 << 6;
        const MESH = 1 << 7;
        const ALL_GRAPHICS = Self::VERTEX.bits
            | Self::GEOMETRY.bits
            | Self::FRAGMENT.bits
            | Self::TESS_CONTROL.bits
            | Self::TESS_EVAL.bits
            | Self::TASK.bits
            | Self::MESH.bits;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct DynamicStateFlags: u32 {
        const VIEWPORT = 1 << 0;
        const SCISSOR = 1 << 1;
        const LINE_WIDTH = 1 << 2;
        const DEPTH_BIAS = 1 << 3;
        const BLEND_CONSTANTS = 1 << 4;
        const DEPTH_BOUNDS = 1 << 5;
        const STENCIL_COMPARE_MASK = 1 << 6;
        const STENCIL_WRITE_MASK = 1 << 7;
        const STENCIL_REFERENCE = 1 << 8;
        /// Bits that only matter while the rasterizer runs.
        const RASTERIZER_MASK = Self::VIEWPORT.bits
            | Self::SCISSOR.bits
            | Self::LINE_WIDTH.bits
            | Self::DEPTH_BIAS.bits
            | Self::BLEND_CONSTANTS.bits
            | Self::DEPTH_BOUNDS.bits
            | Self::STENCIL_COMPARE_MASK.bits
            | Self::STENCIL_WRITE_MASK.bits
            | Self::STENCIL_REFERENCE.bits;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
    Patch,
}

impl PrimitiveTopology {
    /// Bit of this topology in a template's supported-topology mask.
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct InputAssemblyState {
    pub topology: PrimitiveTopology,
    pub primitive_restart_enable: bool,
}

impl Default for InputAssemblyState {
    fn default() -> InputAssemblyState {
        InputAssemblyState {
            topology: PrimitiveTopology::TriangleList,
            primitive_restart_enable: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PolygonMode {
    Point,
    Line,
    Fill,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

bitflags! {
    #[derive(Default)]
    pub struct CullModeFlags: u32 {
        const NONE = 0;
        const FRONT = 1;
        const BACK = 2;
        const FRONT_AND_BACK = Self::FRONT.bits | Self::BACK.bits;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DepthBias {
    Disabled,
    Enabled {
        constant_factor: NotNan<f32>,
        clamp: NotNan<f32>,
        slope_factor: NotNan<f32>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RasterizationState {
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullModeFlags,
    pub depth_bias: DepthBias,
    pub front_face: FrontFace,
    pub line_width: NotNan<f32>,
}

impl Default for RasterizationState {
    fn default() -> RasterizationState {
        RasterizationState {
            depth_clamp_enable: false,
            rasterizer_discard_enable: false,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullModeFlags::NONE,
            depth_bias: DepthBias::Disabled,
            front_face: FrontFace::Clockwise,
            line_width: 1.0.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MultisampleState {
    pub rasterization_samples: u32,
    pub min_sample_shading: Option<NotNan<f32>>,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

impl Default for MultisampleState {
    fn default() -> MultisampleState {
        MultisampleState {
            rasterization_samples: 1,
            min_sample_shading: None,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DepthBufferState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare_op: CompareOp,
    /// `None` when the bounds test is unused.
    pub bounds: Option<(NotNan<f32>, NotNan<f32>)>,
}

impl Default for DepthBufferState {
    fn default() -> DepthBufferState {
        DepthBufferState {
            test_enable: false,
            write_enable: false,
            compare_op: CompareOp::LessOrEqual,
            bounds: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StencilFaceState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl Default for StencilFaceState {
    fn default() -> StencilFaceState {
        StencilFaceState {
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
            compare_mask: !0,
            write_mask: !0,
            reference: 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct StencilBufferState {
    pub enabled: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

impl BlendFactor {
    pub fn is_dual_source(self) -> bool {
        match self {
            BlendFactor::Src1Color
            | BlendFactor::OneMinusSrc1Color
            | BlendFactor::Src1Alpha
            | BlendFactor::OneMinusSrc1Alpha => true,
            _ => false,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LogicOp {
    Clear,
    And,
    AndReverse,
    Copy,
    AndInverted,
    NoOp,
    Xor,
    Or,
    Nor,
    Equivalent,
    Invert,
    OrReverse,
    CopyInverted,
    OrInverted,
    Nand,
    Set,
}

bitflags! {
    pub struct ColorComponentFlags: u32 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
        const ALL = Self::R.bits | Self::G.bits | Self::B.bits | Self::A.bits;
    }
}

impl Default for ColorComponentFlags {
    fn default() -> ColorComponentFlags {
        ColorComponentFlags::ALL
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColorBufferState {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub color_write_mask: ColorComponentFlags,
}

impl Default for ColorBufferState {
    fn default() -> ColorBufferState {
        ColorBufferState {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: ColorComponentFlags::ALL,
        }
    }
}

impl ColorBufferState {
    pub const ALPHA_BLENDING: ColorBufferState = ColorBufferState {
        blend_enable: true,
        src_color_blend_factor: BlendFactor::SrcAlpha,
        dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
        color_blend_op: BlendOp::Add,
        src_alpha_blend_factor: BlendFactor::SrcAlpha,
        dst_alpha_blend_factor: BlendFactor::OneMinusSrcAlpha,
        alpha_blend_op: BlendOp::Add,
        color_write_mask: ColorComponentFlags::ALL,
    };
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColorBuffersState {
    pub logic_op: Option<LogicOp>,
    pub attachments: Vec<ColorBufferState>,
    pub blend_constants: [NotNan<f32>; 4],
}

impl Default for ColorBuffersState {
    fn default() -> ColorBuffersState {
        ColorBuffersState {
            logic_op: None,
            attachments: Vec::new(),
            blend_constants: [0.0.into(); 4],
        }
    }
}

/// All fixed-function state hashed into a pipeline description.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct RenderState {
    pub input_assembly: InputAssemblyState,
    pub rasterization: RasterizationState,
    pub multisample: MultisampleState,
    pub depth: DepthBufferState,
    pub stencil: StencilBufferState,
    pub color: ColorBuffersState,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexInputBindingDescription {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexInputAttributeDescription {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct VertexInputState {
    pub bindings: Vec<VertexInputBindingDescription>,
    pub attributes: Vec<VertexInputAttributeDescription>,
}

/// `(constant id, raw value)` pairs applied to a template's specializable
/// constants.
pub type SpecializationValues = Vec<(u32, u32)>;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct GraphicsPipelineDesc {
    pub render_state: RenderState,
    pub dynamic_state: DynamicStateFlags,
    pub vertex_input: VertexInputState,
    pub render_pass: RenderPassId,
    pub subpass: u32,
    pub viewport_count: u32,
    pub specialization: SpecializationValues,
}

impl GraphicsPipelineDesc {
    pub fn new(render_pass: RenderPassId) -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            render_state: RenderState::default(),
            dynamic_state: DynamicStateFlags::VIEWPORT | DynamicStateFlags::SCISSOR,
            vertex_input: VertexInputState::default(),
            render_pass,
            subpass: 0,
            viewport_count: 1,
            specialization: SpecializationValues::default(),
        }
    }
}

/// Mesh pipelines have no vertex input; the topology comes from the template.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MeshPipelineDesc {
    pub render_state: RenderState,
    pub dynamic_state: DynamicStateFlags,
    pub render_pass: RenderPassId,
    pub subpass: u32,
    pub viewport_count: u32,
    pub specialization: SpecializationValues,
}

impl MeshPipelineDesc {
    pub fn new(render_pass: RenderPassId) -> MeshPipelineDesc {
        MeshPipelineDesc {
            render_state: RenderState::default(),
            dynamic_state: DynamicStateFlags::VIEWPORT | DynamicStateFlags::SCISSOR,
            render_pass,
            subpass: 0,
            viewport_count: 1,
            specialization: SpecializationValues::default(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct ComputePipelineDesc {
    /// Overrides the template's default workgroup size when set.
    pub local_group_size: Option<[u32; 3]>,
    pub specialization: SpecializationValues,
}

/// Viewport rectangle with depth range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Viewport {
    pub x: NotNan<f32>,
    pub y: NotNan<f32>,
    pub width: NotNan<f32>,
    pub height: NotNan<f32>,
    pub min_depth: NotNan<f32>,
    pub max_depth: NotNan<f32>,
}

impl From<(u32, u32)> for Viewport {
    fn from((w, h): (u32, u32)) -> Viewport {
        Viewport {
            x: 0.0.into(),
            y: 0.0.into(),
            width: (w as f32).into(),
            height: (h as f32).into(),
            min_depth: 0.0.into(),
            max_depth: 1.0.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Canonicalizes a render state + dynamic mask pair before hashing.
///
/// Rules, in order:
/// 1. rasterizer discard clears color/depth/stencil state and strips every
///    rasterizer-only dynamic bit;
/// 2. each remaining dynamic bit resets the static state it shadows to its
///    canonical zero;
/// 3. disabled blending forces the blend factors/ops to the identity, and
///    dual-source factors fail without driver support;
/// 4. a disabled depth test forces the compare op.
pub fn normalize_render_state(
    state: &mut RenderState,
    dynamic: &mut DynamicStateFlags,
    caps: &DriverCaps,
) -> Result<()> {
    if state.rasterization.rasterizer_discard_enable {
        state.color = ColorBuffersState::default();
        state.depth = DepthBufferState::default();
        state.stencil = StencilBufferState::default();
        dynamic.remove(DynamicStateFlags::RASTERIZER_MASK);
    }

    if dynamic.contains(DynamicStateFlags::LINE_WIDTH) {
        state.rasterization.line_width = 1.0.into();
    }
    if dynamic.contains(DynamicStateFlags::DEPTH_BIAS) {
        if let DepthBias::Enabled { .. } = state.rasterization.depth_bias {
            state.rasterization.depth_bias = DepthBias::Enabled {
                constant_factor: 0.0.into(),
                clamp: 0.0.into(),
                slope_factor: 0.0.into(),
            };
        }
    }
    if dynamic.contains(DynamicStateFlags::BLEND_CONSTANTS) {
        state.color.blend_constants = [0.0.into(); 4];
    }
    if dynamic.contains(DynamicStateFlags::DEPTH_BOUNDS) && state.depth.bounds.is_some() {
        state.depth.bounds = Some((0.0.into(), 1.0.into()));
    }
    if dynamic.contains(DynamicStateFlags::STENCIL_COMPARE_MASK) {
        state.stencil.front.compare_mask = !0;
        state.stencil.back.compare_mask = !0;
    }
    if dynamic.contains(DynamicStateFlags::STENCIL_WRITE_MASK) {
        state.stencil.front.write_mask = !0;
        state.stencil.back.write_mask = !0;
    }
    if dynamic.contains(DynamicStateFlags::STENCIL_REFERENCE) {
        state.stencil.front.reference = 0;
        state.stencil.back.reference = 0;
    }
    if !state.stencil.enabled {
        state.stencil.front = StencilFaceState::default();
        state.stencil.back = StencilFaceState::default();
    }

    for att in state.color.attachments.iter_mut() {
        if !att.blend_enable {
            att.src_color_blend_factor = BlendFactor::One;
            att.src_alpha_blend_factor = BlendFactor::One;
            att.dst_color_blend_factor = BlendFactor::Zero;
            att.dst_alpha_blend_factor = BlendFactor::Zero;
            att.color_blend_op = BlendOp::Add;
            att.alpha_blend_op = BlendOp::Add;
        } else if !caps.dual_source_blend
            && (att.src_color_blend_factor.is_dual_source()
                || att.dst_color_blend_factor.is_dual_source()
                || att.src_alpha_blend_factor.is_dual_source()
                || att.dst_alpha_blend_factor.is_dual_source())
        {
            return Err(Error::UnsupportedDescription);
        }
    }

    if !state.depth.test_enable {
        state.depth.compare_op = CompareOp::LessOrEqual;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::RawId;

    fn caps() -> DriverCaps {
        DriverCaps::default()
    }

    fn hash_desc(desc: &GraphicsPipelineDesc) -> u64 {
        fxhash::hash64(desc)
    }

    fn base_desc() -> GraphicsPipelineDesc {
        let mut desc = GraphicsPipelineDesc::new(RenderPassId(RawId::new(0, 0)));
        desc.render_state.color.attachments.push(ColorBufferState::default());
        desc
    }

    #[test]
    fn dynamic_bits_do_not_split_the_cache() {
        // two descriptions differing only in state shadowed by dynamic bits
        let mut a = base_desc();
        a.dynamic_state |= DynamicStateFlags::STENCIL_REFERENCE;
        a.render_state.stencil.enabled = true;
        a.render_state.stencil.front.reference = 3;
        a.render_state.stencil.back.reference = 9;

        let mut b = base_desc();
        b.dynamic_state |= DynamicStateFlags::STENCIL_REFERENCE;
        b.render_state.stencil.enabled = true;
        b.render_state.stencil.front.reference = 4;
        b.render_state.stencil.back.reference = 1;

        normalize_render_state(&mut a.render_state, &mut a.dynamic_state, &caps()).unwrap();
        normalize_render_state(&mut b.render_state, &mut b.dynamic_state, &caps()).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_desc(&a), hash_desc(&b));
    }

    #[test]
    fn rasterizer_discard_strips_dynamic_bits() {
        let mut a = base_desc();
        a.render_state.rasterization.rasterizer_discard_enable = true;
        a.render_state.depth.test_enable = true;
        a.render_state.depth.compare_op = CompareOp::Greater;
        a.dynamic_state = DynamicStateFlags::VIEWPORT | DynamicStateFlags::LINE_WIDTH;

        let mut b = base_desc();
        b.render_state.rasterization.rasterizer_discard_enable = true;
        b.dynamic_state = DynamicStateFlags::SCISSOR;

        normalize_render_state(&mut a.render_state, &mut a.dynamic_state, &caps()).unwrap();
        normalize_render_state(&mut b.render_state, &mut b.dynamic_state, &caps()).unwrap();
        assert!(a.dynamic_state.is_empty());
        assert_eq!(a.render_state, b.render_state);
    }

    #[test]
    fn disabled_blend_forces_identity_factors() {
        let mut a = base_desc();
        {
            let att = &mut a.render_state.color.attachments[0];
            att.blend_enable = false;
            att.src_color_blend_factor = BlendFactor::SrcAlpha;
            att.dst_color_blend_factor = BlendFactor::OneMinusSrcAlpha;
            att.color_blend_op = BlendOp::Max;
        }
        let mut b = base_desc();

        normalize_render_state(&mut a.render_state, &mut a.dynamic_state, &caps()).unwrap();
        normalize_render_state(&mut b.render_state, &mut b.dynamic_state, &caps()).unwrap();
        assert_eq!(a.render_state.color, b.render_state.color);
    }

    #[test]
    fn dual_source_requires_cap() {
        let mut no_dual = caps();
        no_dual.dual_source_blend = false;

        let mut desc = base_desc();
        {
            let att = &mut desc.render_state.color.attachments[0];
            att.blend_enable = true;
            att.src_color_blend_factor = BlendFactor::Src1Color;
        }
        let r = normalize_render_state(&mut desc.render_state, &mut desc.dynamic_state, &no_dual);
        assert_eq!(r, Err(Error::UnsupportedDescription));

        let mut with_dual = caps();
        with_dual.dual_source_blend = true;
        let r = normalize_render_state(
            &mut desc.render_state,
            &mut desc.dynamic_state,
            &with_dual,
        );
        assert!(r.is_ok());
    }

    #[test]
    fn disabled_depth_test_forces_compare_op() {
        let mut a = base_desc();
        a.render_state.depth.test_enable = false;
        a.render_state.depth.compare_op = CompareOp::Never;
        let mut b = base_desc();
        b.render_state.depth.test_enable = false;
        b.render_state.depth.compare_op = CompareOp::Always;

        normalize_render_state(&mut a.render_state, &mut a.dynamic_state, &caps()).unwrap();
        normalize_render_state(&mut b.render_state, &mut b.dynamic_state, &caps()).unwrap();
        assert_eq!(a.render_state.depth, b.render_state.depth);
    }
}
