//! Image and vertex formats.

/// Subset of the driver format space that the core schedules around.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    R8Unorm,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    R16G16Sfloat,
    R16G16B16A16Sfloat,
    R32Uint,
    R32Sfloat,
    R32G32Sfloat,
    R32G32B32Sfloat,
    R32G32B32A32Sfloat,
    D16Unorm,
    D32Sfloat,
    D24UnormS8Uint,
    D32SfloatS8Uint,
}

impl Format {
    pub fn is_depth(self) -> bool {
        match self {
            Format::D16Unorm
            | Format::D32Sfloat
            | Format::D24UnormS8Uint
            | Format::D32SfloatS8Uint => true,
            _ => false,
        }
    }

    pub fn has_stencil(self) -> bool {
        match self {
            Format::D24UnormS8Uint | Format::D32SfloatS8Uint => true,
            _ => false,
        }
    }

    /// Size of one texel or element in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            Format::R8Unorm => 1,
            Format::R8G8Unorm => 2,
            Format::R8G8B8A8Unorm | Format::R8G8B8A8Srgb | Format::B8G8R8A8Unorm => 4,
            Format::R16G16Sfloat => 4,
            Format::R16G16B16A16Sfloat => 8,
            Format::R32Uint | Format::R32Sfloat => 4,
            Format::R32G32Sfloat => 8,
            Format::R32G32B32Sfloat => 12,
            Format::R32G32B32A32Sfloat => 16,
            Format::D16Unorm => 2,
            Format::D32Sfloat => 4,
            Format::D24UnormS8Uint => 4,
            Format::D32SfloatS8Uint => 8,
        }
    }
}

/// Content state a virtual resource starts the frame in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InitialState {
    /// Contents are undefined until the first writer runs.
    Undefined,
    /// Contents are cleared before the first access.
    Cleared,
}

impl Default for InitialState {
    fn default() -> InitialState {
        InitialState::Undefined
    }
}
