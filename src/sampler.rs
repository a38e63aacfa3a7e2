//! Sampler descriptions.

use crate::pipeline::CompareOp;
use ordered_float::NotNan;

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum SamplerMipmapMode {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum SamplerAddressMode {
    Clamp,
    Mirror,
    Wrap,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mipmap_mode: SamplerMipmapMode,
    pub addr_u: SamplerAddressMode,
    pub addr_v: SamplerAddressMode,
    pub addr_w: SamplerAddressMode,
    pub mip_lod_bias: NotNan<f32>,
    pub min_lod: NotNan<f32>,
    pub max_lod: NotNan<f32>,
    /// `None` disables anisotropic filtering.
    pub max_anisotropy: Option<NotNan<f32>>,
    /// `None` disables the compare (shadow sampler) mode.
    pub compare_op: Option<CompareOp>,
    pub border_color: BorderColor,
}

impl Default for SamplerDesc {
    /// The fallback sampler handed out on name misses.
    fn default() -> SamplerDesc {
        SamplerDesc {
            min_filter: Filter::Nearest,
            mag_filter: Filter::Nearest,
            mipmap_mode: SamplerMipmapMode::Nearest,
            addr_u: SamplerAddressMode::Wrap,
            addr_v: SamplerAddressMode::Wrap,
            addr_w: SamplerAddressMode::Wrap,
            mip_lod_bias: 0.0.into(),
            min_lod: 0.0.into(),
            max_lod: 1000.0.into(),
            max_anisotropy: None,
            compare_op: None,
            border_color: BorderColor::TransparentBlack,
        }
    }
}

impl SamplerDesc {
    pub fn linear_clamp() -> SamplerDesc {
        SamplerDesc {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            mipmap_mode: SamplerMipmapMode::Linear,
            addr_u: SamplerAddressMode::Clamp,
            addr_v: SamplerAddressMode::Clamp,
            addr_w: SamplerAddressMode::Clamp,
            ..SamplerDesc::default()
        }
    }
}
