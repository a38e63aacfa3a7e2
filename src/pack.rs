//! Pipeline pack streams.
//!
//! A pack is a little-endian binary stream decoded once at startup into
//! name-keyed tables: samplers, render-pass infos and pipeline templates
//! per shader family. Reflection blobs carry per-shader specialization
//! constants and the compute local group size ids. Duplicate names are
//! rejected at decode time.

use crate::descriptor::{DescriptorSetLayoutBinding, DescriptorSetLayoutDesc, DescriptorType};
use crate::error::{Error, Result};
use crate::format::Format;
use crate::pipeline::{PrimitiveTopology, ShaderStageFlags};
use crate::renderpass::{AttachmentInfo, AttachmentLoadOp, AttachmentStoreOp, RenderPassInfo, SubpassInfo};
use crate::sampler::{BorderColor, Filter, SamplerAddressMode, SamplerDesc, SamplerMipmapMode};
use crate::pipeline::CompareOp;
use fxhash::FxHashSet;
use std::io::Read;

const PACK_MAGIC: u32 = 0x564b_5031; // "VKP1"
const PACK_VERSION: u16 = 2;

/// Sentinel for "not specializable" in [`ComputeTemplateData::local_size_spec_ids`].
pub const NO_SPEC_ID: u32 = !0;

/// One shader stage: bytecode plus its reflection data.
#[derive(Clone, Debug)]
pub struct ShaderBlob {
    pub stage: ShaderStageFlags,
    pub code: Vec<u8>,
    /// Specialization constants reflected from the shader: name -> constant id.
    pub spec_constants: Vec<(String, u32)>,
}

/// Layout information shared by all template families.
#[derive(Clone, Debug, Default)]
pub struct TemplateLayout {
    pub set_layouts: Vec<DescriptorSetLayoutDesc>,
    pub push_constant_size: u32,
    pub push_constant_stages: ShaderStageFlags,
}

#[derive(Clone, Debug)]
pub struct GraphicsTemplateData {
    pub shaders: Vec<ShaderBlob>,
    /// Bitmask over [`PrimitiveTopology`] values the template accepts.
    pub supported_topology: u32,
    /// Non-zero when the template uses tessellation; forces `Patch` topology.
    pub patch_control_points: u32,
    pub layout: TemplateLayout,
}

#[derive(Clone, Debug)]
pub struct MeshTemplateData {
    pub shaders: Vec<ShaderBlob>,
    /// Output topology fixed by the mesh shader.
    pub topology: PrimitiveTopology,
    pub layout: TemplateLayout,
}

#[derive(Clone, Debug)]
pub struct ComputeTemplateData {
    pub shader: ShaderBlob,
    pub local_group_size: [u32; 3],
    /// Specialization ids for the three local-size dimensions
    /// ([`NO_SPEC_ID`] when a dimension is fixed).
    pub local_size_spec_ids: [u32; 3],
    pub layout: TemplateLayout,
}

/// Decoded pack, ready for registration with the resource manager.
#[derive(Clone, Debug, Default)]
pub struct PipelinePack {
    pub samplers: Vec<(String, SamplerDesc)>,
    pub render_passes: Vec<(String, RenderPassInfo)>,
    pub graphics: Vec<(String, GraphicsTemplateData)>,
    pub mesh: Vec<(String, MeshTemplateData)>,
    pub compute: Vec<(String, ComputeTemplateData)>,
}

impl PipelinePack {
    /// Decodes a pack stream.
    pub fn read(mut stream: impl Read) -> Result<PipelinePack> {
        let mut bytes = Vec::new();
        stream
            .read_to_end(&mut bytes)
            .map_err(|_| Error::InvalidPack("read failed"))?;
        let mut r = Reader { buf: &bytes, pos: 0 };

        if r.u32()? != PACK_MAGIC {
            return Err(Error::InvalidPack("bad magic"));
        }
        if r.u16()? != PACK_VERSION {
            return Err(Error::InvalidPack("unsupported version"));
        }

        let n_samplers = r.u16()? as usize;
        let n_render_passes = r.u16()? as usize;
        let n_graphics = r.u16()? as usize;
        let n_mesh = r.u16()? as usize;
        let n_compute = r.u16()? as usize;

        let mut pack = PipelinePack::default();
        let mut names = FxHashSet::default();
        let mut unique = |name: &str| -> Result<()> {
            if !names.insert(name.to_owned()) {
                return Err(Error::DuplicateName(name.to_owned()));
            }
            Ok(())
        };

        for _ in 0..n_samplers {
            let name = r.string()?;
            unique(&name)?;
            pack.samplers.push((name, r.sampler_desc()?));
        }
        for _ in 0..n_render_passes {
            let name = r.string()?;
            unique(&name)?;
            pack.render_passes.push((name, r.render_pass_info()?));
        }
        for _ in 0..n_graphics {
            let name = r.string()?;
            unique(&name)?;
            let shaders = r.shader_blobs()?;
            let supported_topology = r.u32()?;
            let patch_control_points = r.u32()?;
            let layout = r.template_layout()?;
            pack.graphics.push((
                name,
                GraphicsTemplateData {
                    shaders,
                    supported_topology,
                    patch_control_points,
                    layout,
                },
            ));
        }
        for _ in 0..n_mesh {
            let name = r.string()?;
            unique(&name)?;
            let shaders = r.shader_blobs()?;
            let topology = topology_from_tag(r.u8()?)?;
            let layout = r.template_layout()?;
            pack.mesh.push((
                name,
                MeshTemplateData {
                    shaders,
                    topology,
                    layout,
                },
            ));
        }
        for _ in 0..n_compute {
            let name = r.string()?;
            unique(&name)?;
            let mut shaders = r.shader_blobs()?;
            if shaders.len() != 1 {
                return Err(Error::InvalidPack("compute template needs one shader"));
            }
            let local_group_size = [r.u32()?, r.u32()?, r.u32()?];
            let local_size_spec_ids = [r.u32()?, r.u32()?, r.u32()?];
            let layout = r.template_layout()?;
            pack.compute.push((
                name,
                ComputeTemplateData {
                    shader: shaders.remove(0),
                    local_group_size,
                    local_size_spec_ids,
                    layout,
                },
            ));
        }

        Ok(pack)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::InvalidPack("truncated stream"));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidPack("bad utf8"))
    }

    fn sampler_desc(&mut self) -> Result<SamplerDesc> {
        let min_filter = filter_from_tag(self.u8()?)?;
        let mag_filter = filter_from_tag(self.u8()?)?;
        let mipmap_mode = match self.u8()? {
            0 => SamplerMipmapMode::Nearest,
            1 => SamplerMipmapMode::Linear,
            _ => return Err(Error::InvalidPack("bad mipmap mode")),
        };
        let addr_u = address_mode_from_tag(self.u8()?)?;
        let addr_v = address_mode_from_tag(self.u8()?)?;
        let addr_w = address_mode_from_tag(self.u8()?)?;
        let mip_lod_bias = self.not_nan()?;
        let min_lod = self.not_nan()?;
        let max_lod = self.not_nan()?;
        let max_anisotropy = match self.u8()? {
            0 => None,
            _ => Some(self.not_nan()?),
        };
        let compare_op = match self.u8()? {
            0 => None,
            _ => Some(compare_op_from_tag(self.u8()?)?),
        };
        let border_color = match self.u8()? {
            0 => BorderColor::TransparentBlack,
            1 => BorderColor::OpaqueBlack,
            2 => BorderColor::OpaqueWhite,
            _ => return Err(Error::InvalidPack("bad border color")),
        };
        Ok(SamplerDesc {
            min_filter,
            mag_filter,
            mipmap_mode,
            addr_u,
            addr_v,
            addr_w,
            mip_lod_bias,
            min_lod,
            max_lod,
            max_anisotropy,
            compare_op,
            border_color,
        })
    }

    fn not_nan(&mut self) -> Result<ordered_float::NotNan<f32>> {
        ordered_float::NotNan::new(self.f32()?).map_err(|_| Error::InvalidPack("NaN float"))
    }

    fn render_pass_info(&mut self) -> Result<RenderPassInfo> {
        let mut info = RenderPassInfo::default();
        let n_attachments = self.u8()? as usize;
        for _ in 0..n_attachments {
            let format = format_from_tag(self.u8()?)?;
            let samples = self.u8()? as u32;
            let load_op = match self.u8()? {
                0 => AttachmentLoadOp::Load,
                1 => AttachmentLoadOp::Clear,
                2 => AttachmentLoadOp::DontCare,
                _ => return Err(Error::InvalidPack("bad load op")),
            };
            let store_op = match self.u8()? {
                0 => AttachmentStoreOp::Store,
                1 => AttachmentStoreOp::DontCare,
                _ => return Err(Error::InvalidPack("bad store op")),
            };
            info.attachments.push(AttachmentInfo {
                format,
                samples,
                load_op,
                store_op,
            });
        }
        let n_subpasses = self.u8()? as usize;
        for _ in 0..n_subpasses {
            let mut subpass = SubpassInfo::default();
            let n_color = self.u8()? as usize;
            for _ in 0..n_color {
                subpass.color_attachments.push(self.u8()? as u32);
            }
            let n_input = self.u8()? as usize;
            for _ in 0..n_input {
                subpass.input_attachments.push(self.u8()? as u32);
            }
            subpass.depth_stencil_attachment = match self.u8()? {
                0xff => None,
                i => Some(i as u32),
            };
            info.subpasses.push(subpass);
        }
        Ok(info)
    }

    fn shader_blobs(&mut self) -> Result<Vec<ShaderBlob>> {
        let n = self.u8()? as usize;
        let mut blobs = Vec::with_capacity(n);
        for _ in 0..n {
            let stage = ShaderStageFlags::from_bits(self.u32()?)
                .ok_or(Error::InvalidPack("bad shader stage"))?;
            let len = self.u32()? as usize;
            let code = self.take(len)?.to_vec();
            let n_spec = self.u16()? as usize;
            let mut spec_constants = Vec::with_capacity(n_spec);
            for _ in 0..n_spec {
                let name = self.string()?;
                let id = self.u32()?;
                spec_constants.push((name, id));
            }
            blobs.push(ShaderBlob {
                stage,
                code,
                spec_constants,
            });
        }
        Ok(blobs)
    }

    fn template_layout(&mut self) -> Result<TemplateLayout> {
        let n_sets = self.u8()? as usize;
        let mut set_layouts = Vec::with_capacity(n_sets);
        for _ in 0..n_sets {
            let n_bindings = self.u16()? as usize;
            let mut bindings = Vec::with_capacity(n_bindings);
            for _ in 0..n_bindings {
                let binding = self.u32()?;
                let descriptor_type = descriptor_type_from_tag(self.u8()?)?;
                let count = self.u32()?;
                let stages = ShaderStageFlags::from_bits(self.u32()?)
                    .ok_or(Error::InvalidPack("bad binding stages"))?;
                bindings.push(DescriptorSetLayoutBinding {
                    binding,
                    descriptor_type,
                    count,
                    stages,
                });
            }
            set_layouts.push(DescriptorSetLayoutDesc { bindings });
        }
        let push_constant_size = self.u32()?;
        let push_constant_stages = ShaderStageFlags::from_bits(self.u32()?)
            .ok_or(Error::InvalidPack("bad push constant stages"))?;
        Ok(TemplateLayout {
            set_layouts,
            push_constant_size,
            push_constant_stages,
        })
    }
}

fn filter_from_tag(tag: u8) -> Result<Filter> {
    match tag {
        0 => Ok(Filter::Nearest),
        1 => Ok(Filter::Linear),
        _ => Err(Error::InvalidPack("bad filter")),
    }
}

fn address_mode_from_tag(tag: u8) -> Result<SamplerAddressMode> {
    match tag {
        0 => Ok(SamplerAddressMode::Clamp),
        1 => Ok(SamplerAddressMode::Mirror),
        2 => Ok(SamplerAddressMode::Wrap),
        _ => Err(Error::InvalidPack("bad address mode")),
    }
}

fn compare_op_from_tag(tag: u8) -> Result<CompareOp> {
    Ok(match tag {
        0 => CompareOp::Never,
        1 => CompareOp::Less,
        2 => CompareOp::Equal,
        3 => CompareOp::LessOrEqual,
        4 => CompareOp::Greater,
        5 => CompareOp::NotEqual,
        6 => CompareOp::GreaterOrEqual,
        7 => CompareOp::Always,
        _ => return Err(Error::InvalidPack("bad compare op")),
    })
}

fn descriptor_type_from_tag(tag: u8) -> Result<DescriptorType> {
    Ok(match tag {
        0 => DescriptorType::Sampler,
        1 => DescriptorType::SampledImage,
        2 => DescriptorType::StorageImage,
        3 => DescriptorType::UniformBuffer,
        4 => DescriptorType::UniformBufferDynamic,
        5 => DescriptorType::StorageBuffer,
        6 => DescriptorType::StorageBufferDynamic,
        7 => DescriptorType::InputAttachment,
        _ => return Err(Error::InvalidPack("bad descriptor type")),
    })
}

fn topology_from_tag(tag: u8) -> Result<PrimitiveTopology> {
    Ok(match tag {
        0 => PrimitiveTopology::PointList,
        1 => PrimitiveTopology::LineList,
        2 => PrimitiveTopology::LineStrip,
        3 => PrimitiveTopology::TriangleList,
        4 => PrimitiveTopology::TriangleStrip,
        5 => PrimitiveTopology::TriangleFan,
        6 => PrimitiveTopology::Patch,
        _ => return Err(Error::InvalidPack("bad topology")),
    })
}

/// Authoring side of the pack stream; the offline pipeline compiler and the
/// test suite both go through it.
#[derive(Default)]
pub struct PackBuilder {
    samplers: Vec<(String, SamplerDesc)>,
    render_passes: Vec<(String, RenderPassInfo)>,
    graphics: Vec<(String, GraphicsTemplateData)>,
    mesh: Vec<(String, MeshTemplateData)>,
    compute: Vec<(String, ComputeTemplateData)>,
}

impl PackBuilder {
    pub fn new() -> PackBuilder {
        PackBuilder::default()
    }

    pub fn sampler(&mut self, name: &str, desc: SamplerDesc) -> &mut Self {
        self.samplers.push((name.to_owned(), desc));
        self
    }

    pub fn render_pass(&mut self, name: &str, info: RenderPassInfo) -> &mut Self {
        self.render_passes.push((name.to_owned(), info));
        self
    }

    pub fn graphics(&mut self, name: &str, data: GraphicsTemplateData) -> &mut Self {
        self.graphics.push((name.to_owned(), data));
        self
    }

    pub fn mesh(&mut self, name: &str, data: MeshTemplateData) -> &mut Self {
        self.mesh.push((name.to_owned(), data));
        self
    }

    pub fn compute(&mut self, name: &str, data: ComputeTemplateData) -> &mut Self {
        self.compute.push((name.to_owned(), data));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut w = Writer { buf: Vec::new() };
        w.u32(PACK_MAGIC);
        w.u16(PACK_VERSION);
        w.u16(self.samplers.len() as u16);
        w.u16(self.render_passes.len() as u16);
        w.u16(self.graphics.len() as u16);
        w.u16(self.mesh.len() as u16);
        w.u16(self.compute.len() as u16);

        for (name, desc) in &self.samplers {
            w.string(name);
            w.sampler_desc(desc);
        }
        for (name, info) in &self.render_passes {
            w.string(name);
            w.render_pass_info(info);
        }
        for (name, data) in &self.graphics {
            w.string(name);
            w.shader_blobs(&data.shaders);
            w.u32(data.supported_topology);
            w.u32(data.patch_control_points);
            w.template_layout(&data.layout);
        }
        for (name, data) in &self.mesh {
            w.string(name);
            w.shader_blobs(&data.shaders);
            w.u8(data.topology as u8);
            w.template_layout(&data.layout);
        }
        for (name, data) in &self.compute {
            w.string(name);
            w.shader_blobs(std::slice::from_ref(&data.shader));
            for &v in &data.local_group_size {
                w.u32(v);
            }
            for &v in &data.local_size_spec_ids {
                w.u32(v);
            }
            w.template_layout(&data.layout);
        }
        w.buf
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.u32(v.to_bits());
    }

    fn string(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn sampler_desc(&mut self, desc: &SamplerDesc) {
        self.u8(desc.min_filter as u8);
        self.u8(desc.mag_filter as u8);
        self.u8(desc.mipmap_mode as u8);
        self.u8(desc.addr_u as u8);
        self.u8(desc.addr_v as u8);
        self.u8(desc.addr_w as u8);
        self.f32(desc.mip_lod_bias.into_inner());
        self.f32(desc.min_lod.into_inner());
        self.f32(desc.max_lod.into_inner());
        match desc.max_anisotropy {
            Some(v) => {
                self.u8(1);
                self.f32(v.into_inner());
            }
            None => self.u8(0),
        }
        match desc.compare_op {
            Some(op) => {
                self.u8(1);
                self.u8(op as u8);
            }
            None => self.u8(0),
        }
        self.u8(match desc.border_color {
            BorderColor::TransparentBlack => 0,
            BorderColor::OpaqueBlack => 1,
            BorderColor::OpaqueWhite => 2,
        });
    }

    fn render_pass_info(&mut self, info: &RenderPassInfo) {
        self.u8(info.attachments.len() as u8);
        for att in &info.attachments {
            self.u8(format_tag(att.format));
            self.u8(att.samples as u8);
            self.u8(match att.load_op {
                AttachmentLoadOp::Load => 0,
                AttachmentLoadOp::Clear => 1,
                AttachmentLoadOp::DontCare => 2,
            });
            self.u8(match att.store_op {
                AttachmentStoreOp::Store => 0,
                AttachmentStoreOp::DontCare => 1,
            });
        }
        self.u8(info.subpasses.len() as u8);
        for subpass in &info.subpasses {
            self.u8(subpass.color_attachments.len() as u8);
            for &i in &subpass.color_attachments {
                self.u8(i as u8);
            }
            self.u8(subpass.input_attachments.len() as u8);
            for &i in &subpass.input_attachments {
                self.u8(i as u8);
            }
            self.u8(subpass.depth_stencil_attachment.map(|i| i as u8).unwrap_or(0xff));
        }
    }

    fn shader_blobs(&mut self, blobs: &[ShaderBlob]) {
        self.u8(blobs.len() as u8);
        for blob in blobs {
            self.u32(blob.stage.bits());
            self.u32(blob.code.len() as u32);
            self.buf.extend_from_slice(&blob.code);
            self.u16(blob.spec_constants.len() as u16);
            for (name, id) in &blob.spec_constants {
                self.string(name);
                self.u32(*id);
            }
        }
    }

    fn template_layout(&mut self, layout: &TemplateLayout) {
        self.u8(layout.set_layouts.len() as u8);
        for set in &layout.set_layouts {
            self.u16(set.bindings.len() as u16);
            for b in &set.bindings {
                self.u32(b.binding);
                self.u8(b.descriptor_type as u8);
                self.u32(b.count);
                self.u32(b.stages.bits());
            }
        }
        self.u32(layout.push_constant_size);
        self.u32(layout.push_constant_stages.bits());
    }
}

fn format_tag(format: Format) -> u8 {
    format as u8
}

fn format_from_tag(tag: u8) -> Result<Format> {
    Ok(match tag {
        0 => Format::R8Unorm,
        1 => Format::R8G8Unorm,
        2 => Format::R8G8B8A8Unorm,
        3 => Format::R8G8B8A8Srgb,
        4 => Format::B8G8R8A8Unorm,
        5 => Format::R16G16Sfloat,
        6 => Format::R16G16B16A16Sfloat,
        7 => Format::R32Uint,
        8 => Format::R32Sfloat,
        9 => Format::R32G32Sfloat,
        10 => Format::R32G32B32Sfloat,
        11 => Format::R32G32B32A32Sfloat,
        12 => Format::D16Unorm,
        13 => Format::D32Sfloat,
        14 => Format::D24UnormS8Uint,
        15 => Format::D32SfloatS8Uint,
        _ => return Err(Error::InvalidPack("bad format")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(stage: ShaderStageFlags) -> ShaderBlob {
        ShaderBlob {
            stage,
            code: vec![1, 2, 3, 4],
            spec_constants: vec![("tile_size".to_owned(), 7)],
        }
    }

    fn simple_render_pass() -> RenderPassInfo {
        let mut info = RenderPassInfo::default();
        info.attachments.push(AttachmentInfo {
            format: Format::R8G8B8A8Unorm,
            samples: 1,
            load_op: AttachmentLoadOp::Clear,
            store_op: AttachmentStoreOp::Store,
        });
        let mut subpass = SubpassInfo::default();
        subpass.color_attachments.push(0);
        info.subpasses.push(subpass);
        info
    }

    #[test]
    fn roundtrip() {
        let mut builder = PackBuilder::new();
        builder
            .sampler("linear", SamplerDesc::linear_clamp())
            .render_pass("main", simple_render_pass())
            .graphics(
                "mesh_draw",
                GraphicsTemplateData {
                    shaders: vec![
                        blob(ShaderStageFlags::VERTEX),
                        blob(ShaderStageFlags::FRAGMENT),
                    ],
                    supported_topology: PrimitiveTopology::TriangleList.bit()
                        | PrimitiveTopology::TriangleStrip.bit(),
                    patch_control_points: 0,
                    layout: TemplateLayout::default(),
                },
            )
            .compute(
                "blur",
                ComputeTemplateData {
                    shader: blob(ShaderStageFlags::COMPUTE),
                    local_group_size: [8, 8, 1],
                    local_size_spec_ids: [0, 1, NO_SPEC_ID],
                    layout: TemplateLayout::default(),
                },
            );

        let bytes = builder.build();
        let pack = PipelinePack::read(&bytes[..]).unwrap();
        assert_eq!(pack.samplers.len(), 1);
        assert_eq!(pack.samplers[0].0, "linear");
        assert_eq!(pack.render_passes[0].1.attachments.len(), 1);
        assert_eq!(pack.graphics.len(), 1);
        let (_, g) = &pack.graphics[0];
        assert_eq!(g.shaders.len(), 2);
        assert_eq!(g.shaders[0].spec_constants[0], ("tile_size".to_owned(), 7));
        let (_, c) = &pack.compute[0];
        assert_eq!(c.local_group_size, [8, 8, 1]);
        assert_eq!(c.local_size_spec_ids[2], NO_SPEC_ID);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut builder = PackBuilder::new();
        builder
            .sampler("dup", SamplerDesc::default())
            .render_pass("dup", simple_render_pass());
        let bytes = builder.build();
        match PipelinePack::read(&bytes[..]) {
            Err(Error::DuplicateName(name)) => assert_eq!(name, "dup"),
            other => panic!("expected duplicate name error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_stream_rejected() {
        let mut builder = PackBuilder::new();
        builder.sampler("s", SamplerDesc::default());
        let bytes = builder.build();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            PipelinePack::read(cut),
            Err(Error::InvalidPack(_))
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let bytes = [0u8; 16];
        assert!(matches!(
            PipelinePack::read(&bytes[..]),
            Err(Error::InvalidPack("bad magic"))
        ));
    }
}
