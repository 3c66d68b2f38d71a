//! Reading a render target back on the host.
//!
//! The target is copied into a linear, host-visible image, which stays mapped
//! until it is [released](CapturedImage::release). Rows of a linear image are
//! `row_pitch` bytes apart, which is often more than `width * texel_size`, so
//! everything reading the mapping goes through [`PixelReader`].
use crate::{
    Device, Error, Queue, ThinHandle,
    command_buffer::CommandPool,
    format::{ChannelOrder, Format},
    image::{Extent2D, ImageResource},
    memory::HOST_MAPPABLE,
    sync::barrier::{ImageState, NonZeroStageFlags},
    usage::{ImageUsage, TransferDst},
    vk,
};
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// A host-visible copy of an image, mapped for reading.
#[must_use = "dropping the capture leaks its image and memory, call `release`"]
pub struct CapturedImage {
    image: ImageResource<TransferDst>,
    /// Start of the single subresource, already offset.
    mapping: *const u8,
    layout: vk::SubresourceLayout,
}
impl CapturedImage {
    pub fn extent(&self) -> Extent2D {
        self.image.extent()
    }
    pub fn width(&self) -> u32 {
        self.image.extent().width()
    }
    pub fn height(&self) -> u32 {
        self.image.extent().height()
    }
    pub fn format(&self) -> Format {
        self.image.format()
    }
    /// Bytes from the start of one row to the start of the next.
    pub fn row_pitch(&self) -> u64 {
        self.layout.row_pitch
    }
    /// The raw mapped texels, padding included.
    pub fn bytes(&self) -> &[u8] {
        // Safety: mapped for as long as self lives, and the subresource is
        // `size` bytes long. The device finished writing before capture
        // returned.
        unsafe { core::slice::from_raw_parts(self.mapping, self.layout.size as usize) }
    }
    /// A reader over the texels. `None` if the format isn't one the reader
    /// knows the channel order of.
    pub fn pixels(&self) -> Option<PixelReader<'_>> {
        PixelReader::new(
            self.bytes(),
            self.width(),
            self.height(),
            usize::try_from(self.layout.row_pitch).ok()?,
            self.format().channel_order()?,
        )
    }
    /// Unmap and destroy the capture.
    pub unsafe fn release(self, device: &Device) {
        device.unmap_memory(self.image.resource().memory());
        device.destroy_image(self.image);
    }
}

/// Row-major access to 8-bit, four channel texels, honouring the row pitch.
#[derive(Clone, Copy, Debug)]
pub struct PixelReader<'a> {
    bytes: &'a [u8],
    width: u32,
    height: u32,
    row_pitch: usize,
    order: ChannelOrder,
}
impl<'a> PixelReader<'a> {
    const TEXEL_SIZE: usize = 4;
    /// `None` if the rows would overlap or `bytes` is too short to hold
    /// `height` rows.
    pub fn new(
        bytes: &'a [u8],
        width: u32,
        height: u32,
        row_pitch: usize,
        order: ChannelOrder,
    ) -> Option<Self> {
        let row_len = (width as usize).checked_mul(Self::TEXEL_SIZE)?;
        if row_pitch < row_len || width == 0 || height == 0 {
            return None;
        }
        let needed = row_pitch
            .checked_mul(height as usize - 1)?
            .checked_add(row_len)?;
        (bytes.len() >= needed).then_some(Self {
            bytes,
            width,
            height,
            row_pitch,
            order,
        })
    }
    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    /// The texels of row `y`, without padding, in memory order.
    /// # Panics
    /// If `y` is out of bounds.
    pub fn row(&self, y: u32) -> &'a [u8] {
        assert!(y < self.height, "row {y} out of bounds");
        let start = y as usize * self.row_pitch;
        &self.bytes[start..start + self.width as usize * Self::TEXEL_SIZE]
    }
    /// The texel at `(x, y)` in R, G, B, A order.
    /// # Panics
    /// If the coordinate is out of bounds.
    pub fn rgba(&self, x: u32, y: u32) -> [u8; 4] {
        assert!(x < self.width, "column {x} out of bounds");
        let start = x as usize * Self::TEXEL_SIZE;
        let texel = &self.row(y)[start..start + Self::TEXEL_SIZE];
        self.order
            .swizzle([texel[0], texel[1], texel[2], texel[3]])
    }
    /// The texel at `(x, y)` in R, G, B order, alpha dropped.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let [r, g, b, _] = self.rgba(x, y);
        [r, g, b]
    }
    /// Every row, top to bottom, as RGB texels left to right.
    pub fn rgb_rows(&self) -> impl Iterator<Item = impl Iterator<Item = [u8; 3]> + 'a> + 'a {
        let reader = *self;
        (0..self.height).map(move |y| {
            let order = reader.order;
            reader.row(y).chunks_exact(Self::TEXEL_SIZE).map(move |texel| {
                let [r, g, b, _] = order.swizzle([texel[0], texel[1], texel[2], texel[3]]);
                [r, g, b]
            })
        })
    }
    /// Tightly packed RGB, e.g. for the body of a PPM.
    #[cfg(feature = "alloc")]
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        self.rgb_rows().flatten().for_each(|rgb| out.extend_from_slice(&rgb));
        out
    }
    /// Tightly packed RGBA.
    #[cfg(feature = "alloc")]
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                out.extend_from_slice(&self.rgba(x, y));
            }
        }
        out
    }
}

impl Device<'_> {
    /// Copy `source` into a new host-visible image and map it.
    ///
    /// If `source` isn't already [`TransferSrc`](ImageState::TransferSrc) it
    /// is transitioned there first, from whatever state it is tracked in. The
    /// device is idle with respect to this work when this returns.
    ///
    /// ```no_run
    /// # use vkheadless::*;
    /// # let device: Device = todo!();
    /// # let mut pool: CommandPool = todo!();
    /// # let mut queue: Queue = todo!();
    /// # let mut target: ImageResource<(ColorAttachment, TransferSrc)> = todo!();
    /// let capture = unsafe { device.capture(&mut pool, &mut queue, &mut target) }.unwrap();
    /// let corner = capture.pixels().unwrap().rgb(0, 0);
    /// unsafe { capture.release(&device) };
    /// ```
    pub unsafe fn capture<Usage: ImageUsage>(
        &self,
        pool: &mut CommandPool,
        queue: &mut Queue,
        source: &mut ImageResource<Usage>,
    ) -> Result<CapturedImage, Error> {
        const {
            assert!(
                Usage::FLAGS.contains(vk::ImageUsageFlags::TRANSFER_SRC),
                "capture source lacks TransferSrc usage"
            )
        };
        let mut target = self.create_image(
            TransferDst,
            source.extent(),
            source.format(),
            vk::ImageTiling::LINEAR,
            HOST_MAPPABLE,
        )?;
        let source_stages = match source.state() {
            ImageState::ColorAttachment => NonZeroStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ImageState::Undefined => NonZeroStageFlags::TOP_OF_PIPE,
            _ => NonZeroStageFlags::ALL_COMMANDS,
        };
        let copied = source.rollback_on_error(|source| {
            self.one_shot(pool, queue, |device, recording| {
                if source.state() != ImageState::TransferSrc {
                    device.transition(
                        recording,
                        source,
                        ImageState::TransferSrc,
                        source_stages,
                        NonZeroStageFlags::TRANSFER,
                    )?;
                }
                device
                    .transition(
                        recording,
                        &mut target,
                        ImageState::TransferDst,
                        NonZeroStageFlags::TRANSFER,
                        NonZeroStageFlags::TRANSFER,
                    )?
                    .copy_image(recording, source, &target)
                    .transition(
                        recording,
                        &mut target,
                        ImageState::General,
                        NonZeroStageFlags::TRANSFER,
                        NonZeroStageFlags::HOST,
                    )?;
                Ok(())
            })
        });
        if let Err(err) = copied {
            log::warn!("capture failed: {err}");
            self.retire_image(target, &copied);
            return Err(err);
        }
        let layout = self.ash.get_image_subresource_layout(
            target.image().handle(),
            vk::ImageSubresource {
                aspect_mask: target.format().primary_aspect(),
                mip_level: 0,
                array_layer: 0,
            },
        );
        let mapping = match self.map_resource(target.resource()) {
            Ok(mapping) => mapping,
            Err(err) => {
                log::warn!("mapping capture failed: {err}");
                self.destroy_image(target);
                return Err(err.into());
            }
        };
        log::debug!(
            "captured {}x{} {:?} image, row pitch {}",
            target.extent().width(),
            target.extent().height(),
            target.format().vk(),
            layout.row_pitch,
        );
        Ok(CapturedImage {
            mapping: mapping.add(layout.offset as usize).cast_const(),
            image: target,
            layout,
        })
    }
}
