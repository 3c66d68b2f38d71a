//! Texel formats, as far as this crate needs to know about them.
//!
//! Unlike usages, formats are runtime values: the depth format is only known
//! once the physical device has been asked which ones it supports, see
//! [`select_depth_format`].
use super::vk;

/// The in-memory order of the channels of an 8-bit-per-channel color format.
///
/// Readback code asks the format for this rather than guessing from the
/// surface it came from, so a `B8G8R8A8` target is read back correctly even
/// though nothing in the image itself says so.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChannelOrder {
    /// Bytes are laid out R, G, B, A.
    Rgba8,
    /// Bytes are laid out B, G, R, A.
    Bgra8,
}
impl ChannelOrder {
    /// Reorder the bytes of one texel into R, G, B, A.
    pub const fn swizzle(self, texel: [u8; 4]) -> [u8; 4] {
        match self {
            Self::Rgba8 => texel,
            Self::Bgra8 => [texel[2], texel[1], texel[0], texel[3]],
        }
    }
}

/// A vulkan texel format and the properties of it this crate cares about.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Format {
    raw: vk::Format,
    texel_size: u32,
    aspect: vk::ImageAspectFlags,
    channels: Option<ChannelOrder>,
}
impl Format {
    /// The vulkan format enum value.
    pub const fn vk(self) -> vk::Format {
        self.raw
    }
    /// Size of one texel, in bytes. For combined depth/stencil formats this is
    /// the size of the depth aspect alone, which is what a copy of that aspect
    /// produces.
    pub const fn texel_size(self) -> u32 {
        self.texel_size
    }
    /// Every aspect of the format.
    pub const fn aspect(self) -> vk::ImageAspectFlags {
        self.aspect
    }
    /// The aspect to copy or sample when only one can be used: `COLOR`, or
    /// `DEPTH` for depth/stencil formats.
    pub const fn primary_aspect(self) -> vk::ImageAspectFlags {
        if self.aspect.contains(vk::ImageAspectFlags::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            self.aspect
        }
    }
    /// Whether the format has a depth or stencil aspect.
    pub const fn is_depth_stencil(self) -> bool {
        self.aspect.intersects(vk::ImageAspectFlags::from_raw(
            vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw(),
        ))
    }
    /// The byte order of a texel, for 8-bit RGBA-like color formats. `None`
    /// for everything else, which the pixel reader refuses to interpret.
    pub const fn channel_order(self) -> Option<ChannelOrder> {
        self.channels
    }
    /// Look up a vulkan format. `None` if this crate doesn't know about it.
    pub fn from_vk(raw: vk::Format) -> Option<Self> {
        ALL.iter().copied().find(|format| format.raw == raw)
    }
}

/// Defines format constants.
/// ```ignore
/// formats! {
///     NAME = {FORMAT = <vk format>, SIZE = <bytes>, ASPECT = <aspect>, CHANNELS = <order or None>},
/// }
/// ```
macro_rules! formats {
    [
        $(
            $(#[$meta:meta])*
            $name:ident {FORMAT = $format:expr, SIZE = $size:expr, ASPECT = $aspect:expr, CHANNELS = $channels:expr}
        ),*
        $(,)?
    ] => {
        $(
            $(#[$meta])*
            pub const $name: Format = Format {
                raw: $format,
                texel_size: $size,
                aspect: $aspect,
                channels: $channels,
            };
        )*
        /// Every format this module defines.
        pub const ALL: &[Format] = &[$($name),*];
    };
}

const COLOR: vk::ImageAspectFlags = vk::ImageAspectFlags::COLOR;
const DEPTH: vk::ImageAspectFlags = vk::ImageAspectFlags::DEPTH;
const DEPTH_STENCIL: vk::ImageAspectFlags = vk::ImageAspectFlags::from_raw(
    vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw(),
);

formats! {
    /// The usual offscreen color target.
    R8G8B8A8_UNORM {FORMAT = vk::Format::R8G8B8A8_UNORM, SIZE = 4, ASPECT = COLOR, CHANNELS = Some(ChannelOrder::Rgba8)},
    R8G8B8A8_SRGB {FORMAT = vk::Format::R8G8B8A8_SRGB, SIZE = 4, ASPECT = COLOR, CHANNELS = Some(ChannelOrder::Rgba8)},
    /// The usual swapchain format, hence the usual format of images that were
    /// meant to be presented.
    B8G8R8A8_UNORM {FORMAT = vk::Format::B8G8R8A8_UNORM, SIZE = 4, ASPECT = COLOR, CHANNELS = Some(ChannelOrder::Bgra8)},
    B8G8R8A8_SRGB {FORMAT = vk::Format::B8G8R8A8_SRGB, SIZE = 4, ASPECT = COLOR, CHANNELS = Some(ChannelOrder::Bgra8)},
    R8_UNORM {FORMAT = vk::Format::R8_UNORM, SIZE = 1, ASPECT = COLOR, CHANNELS = None},
    R16G16B16A16_SFLOAT {FORMAT = vk::Format::R16G16B16A16_SFLOAT, SIZE = 8, ASPECT = COLOR, CHANNELS = None},
    R32G32B32A32_SFLOAT {FORMAT = vk::Format::R32G32B32A32_SFLOAT, SIZE = 16, ASPECT = COLOR, CHANNELS = None},
    /// The only depth format every implementation supports as an attachment.
    D16_UNORM {FORMAT = vk::Format::D16_UNORM, SIZE = 2, ASPECT = DEPTH, CHANNELS = None},
    D16_UNORM_S8_UINT {FORMAT = vk::Format::D16_UNORM_S8_UINT, SIZE = 2, ASPECT = DEPTH_STENCIL, CHANNELS = None},
    D24_UNORM_S8_UINT {FORMAT = vk::Format::D24_UNORM_S8_UINT, SIZE = 4, ASPECT = DEPTH_STENCIL, CHANNELS = None},
    D32_SFLOAT {FORMAT = vk::Format::D32_SFLOAT, SIZE = 4, ASPECT = DEPTH, CHANNELS = None},
    D32_SFLOAT_S8_UINT {FORMAT = vk::Format::D32_SFLOAT_S8_UINT, SIZE = 4, ASPECT = DEPTH_STENCIL, CHANNELS = None},
}

/// Depth formats in order of preference, most precise first.
pub const DEPTH_CANDIDATES: &[Format] = &[
    D32_SFLOAT_S8_UINT,
    D32_SFLOAT,
    D24_UNORM_S8_UINT,
    D16_UNORM_S8_UINT,
    D16_UNORM,
];

/// Pick the first of `candidates` usable as an optimally-tiled depth/stencil
/// attachment. `properties` is usually a thin closure over
/// `vkGetPhysicalDeviceFormatProperties`.
pub fn select_depth_format(
    candidates: &[Format],
    mut properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Option<Format> {
    candidates.iter().copied().find(|format| {
        properties(format.raw)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_swizzles_to_rgba() {
        let texel = [10, 20, 30, 40];
        assert_eq!(ChannelOrder::Rgba8.swizzle(texel), texel);
        assert_eq!(ChannelOrder::Bgra8.swizzle(texel), [30, 20, 10, 40]);
        assert_eq!(
            B8G8R8A8_UNORM.channel_order(),
            Some(ChannelOrder::Bgra8)
        );
        assert_eq!(R16G16B16A16_SFLOAT.channel_order(), None);
    }

    #[test]
    fn depth_selection_is_first_supported() {
        let supported = [vk::Format::D24_UNORM_S8_UINT, vk::Format::D16_UNORM];
        let selected = select_depth_format(DEPTH_CANDIDATES, |format| vk::FormatProperties {
            optimal_tiling_features: if supported.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        });
        assert_eq!(selected, Some(D24_UNORM_S8_UINT));
        // Linear tiling support doesn't count.
        let none = select_depth_format(DEPTH_CANDIDATES, |_| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        });
        assert_eq!(none, None);
    }

    #[test]
    fn aspects() {
        assert_eq!(D24_UNORM_S8_UINT.primary_aspect(), vk::ImageAspectFlags::DEPTH);
        assert!(D24_UNORM_S8_UINT.is_depth_stencil());
        assert_eq!(R8G8B8A8_UNORM.primary_aspect(), vk::ImageAspectFlags::COLOR);
        assert!(!R8G8B8A8_UNORM.is_depth_stencil());
        assert_eq!(Format::from_vk(vk::Format::D32_SFLOAT), Some(D32_SFLOAT));
        assert_eq!(Format::from_vk(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }
}
