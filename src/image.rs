//! Image descriptions.

use crate::format::{Format, InitialState};
use bitflags::bitflags;
use std::fmt;

/// Dimensions of an image.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub enum Dimensions {
    /// 1D image
    Dim1d { width: u32 },
    /// Array of 1D images
    Dim1dArray { width: u32, array_layers: u32 },
    /// 2D image
    Dim2d { width: u32, height: u32 },
    /// Array of 2D images
    Dim2dArray {
        width: u32,
        height: u32,
        array_layers: u32,
    },
    /// 3D image
    Dim3d { width: u32, height: u32, depth: u32 },
    /// Cubemap image (6 2D images)
    Cubemap { size: u32 },
}

impl Dimensions {
    #[inline]
    pub fn width(&self) -> u32 {
        match *self {
            Dimensions::Dim1d { width } => width,
            Dimensions::Dim1dArray { width, .. } => width,
            Dimensions::Dim2d { width, .. } => width,
            Dimensions::Dim2dArray { width, .. } => width,
            Dimensions::Dim3d { width, .. } => width,
            Dimensions::Cubemap { size } => size,
        }
    }

    /// Returns 1 for 1D images.
    #[inline]
    pub fn height(&self) -> u32 {
        match *self {
            Dimensions::Dim1d { .. } | Dimensions::Dim1dArray { .. } => 1,
            Dimensions::Dim2d { height, .. } => height,
            Dimensions::Dim2dArray { height, .. } => height,
            Dimensions::Dim3d { height, .. } => height,
            Dimensions::Cubemap { size } => size,
        }
    }

    #[inline]
    pub fn width_height(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Returns 1 for anything but 3D images.
    #[inline]
    pub fn depth(&self) -> u32 {
        match *self {
            Dimensions::Dim3d { depth, .. } => depth,
            _ => 1,
        }
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        match *self {
            Dimensions::Dim1dArray { array_layers, .. } => array_layers,
            Dimensions::Dim2dArray { array_layers, .. } => array_layers,
            Dimensions::Cubemap { .. } => 6,
            _ => 1,
        }
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Dimensions {
        Dimensions::Dim2d { width, height }
    }
}

impl fmt::Debug for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dimensions::Dim1d { width } => write!(f, "[1D {}x1]", width),
            Dimensions::Dim1dArray {
                width,
                array_layers,
            } => write!(f, "[1D Array {}x1(x{})]", width, array_layers),
            Dimensions::Dim2d { width, height } => write!(f, "[2D {}x{}]", width, height),
            Dimensions::Dim2dArray {
                width,
                height,
                array_layers,
            } => write!(f, "[2D Array {}x{}(x{})]", width, height, array_layers),
            Dimensions::Dim3d {
                width,
                height,
                depth,
            } => write!(f, "[3D {}x{}x{}]", width, height, depth),
            Dimensions::Cubemap { size } => write!(f, "[Cubemap {}x{}]", size, size),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MipmapsCount {
    /// Full mip chain down to 1x1.
    Log2,
    One,
    Specific(u32),
}

/// numLevels = 1 + floor(log2(max(w, h, d)))
pub fn mip_map_count(size: u32) -> u32 {
    32 - size.max(1).leading_zeros()
}

bitflags! {
    #[derive(Default)]
    pub struct ImageUsageFlags: u32 {
        const COLOR_ATTACHMENT = 1 << 0;
        const DEPTH_ATTACHMENT = 1 << 1;
        const INPUT_ATTACHMENT = 1 << 2;
        const STORAGE          = 1 << 3;
        const SAMPLED          = 1 << 4;
        const TRANSFER_SRC     = 1 << 5;
        const TRANSFER_DST     = 1 << 6;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageDesc {
    pub dimensions: Dimensions,
    pub format: Format,
    pub usage: ImageUsageFlags,
    pub mip_levels: u32,
    pub samples: u32,
}

impl ImageDesc {
    pub fn new(dimensions: Dimensions, format: Format, usage: ImageUsageFlags) -> ImageDesc {
        ImageDesc {
            dimensions,
            format,
            usage,
            mip_levels: 1,
            samples: 1,
        }
    }
}

impl Default for ImageDesc {
    fn default() -> ImageDesc {
        ImageDesc {
            dimensions: Dimensions::Dim2d {
                width: 0,
                height: 0,
            },
            format: Format::R8G8B8A8Unorm,
            usage: ImageUsageFlags::default(),
            mip_levels: 1,
            samples: 1,
        }
    }
}

/// Declaration of a logical image bound to a concrete one at submit time.
/// The usage is accumulated by the graph over the frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VirtualImageDesc {
    pub dimensions: Dimensions,
    pub format: Format,
    pub samples: u32,
    pub initial_state: InitialState,
}

impl Default for VirtualImageDesc {
    fn default() -> VirtualImageDesc {
        VirtualImageDesc {
            dimensions: Dimensions::Dim2d {
                width: 0,
                height: 0,
            },
            format: Format::R8G8B8A8Unorm,
            samples: 1,
            initial_state: InitialState::Undefined,
        }
    }
}

/// Mip/layer window used when an image is attached or viewed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageViewDesc {
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl Default for ImageViewDesc {
    fn default() -> ImageViewDesc {
        ImageViewDesc {
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Mip range + layer range addressed by clear operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageSubresourceRange {
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl Default for ImageSubresourceRange {
    fn default() -> ImageSubresourceRange {
        ImageSubresourceRange {
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Single mip level + layer range addressed by copy operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageSubresourceLayers {
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl Default for ImageSubresourceLayers {
    fn default() -> ImageSubresourceLayers {
        ImageSubresourceLayers {
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count() {
        assert_eq!(mip_map_count(1), 1);
        assert_eq!(mip_map_count(2), 2);
        assert_eq!(mip_map_count(256), 9);
        assert_eq!(mip_map_count(300), 9);
    }

    #[test]
    fn dimension_queries() {
        let d = Dimensions::Dim2dArray {
            width: 64,
            height: 32,
            array_layers: 4,
        };
        assert_eq!(d.width_height(), (64, 32));
        assert_eq!(d.depth(), 1);
        assert_eq!(d.array_layers(), 4);
        assert_eq!(Dimensions::Cubemap { size: 16 }.array_layers(), 6);
    }
}
