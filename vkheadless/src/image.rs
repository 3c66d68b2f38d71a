//! `vkImage[View]`
use crate::{
    AllocationError, Device, Error, ThinHandle,
    buffer::Buffer,
    command_buffer::{OutsideRender, RecordingBuffer},
    format::Format,
    memory::{Memory, NeedsMemory, Virtual},
    resource::Resource,
    sync::barrier::ImageState,
    usage::{BufferUsage, ImageUsage},
    vk,
};
use core::num::NonZero;

/// Specifies how an image view should source it's channels from the underlying
/// image.
///
/// For example, if the `r` field is set to the `B` swizzle, texel fetches from
/// the image view will pull the red color component from the blue channel of
/// the underlying image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentMapping {
    pub r: vk::ComponentSwizzle,
    pub g: vk::ComponentSwizzle,
    pub b: vk::ComponentSwizzle,
    pub a: vk::ComponentSwizzle,
}
impl ComponentMapping {
    /// Each component is mapped to itself.
    pub const IDENTITY: Self = Self {
        r: vk::ComponentSwizzle::IDENTITY,
        g: vk::ComponentSwizzle::IDENTITY,
        b: vk::ComponentSwizzle::IDENTITY,
        a: vk::ComponentSwizzle::IDENTITY,
    };
}
impl From<ComponentMapping> for vk::ComponentMapping {
    fn from(value: ComponentMapping) -> Self {
        let ComponentMapping { r, g, b, a } = value;
        vk::ComponentMapping { r, g, b, a }
    }
}

/// The width and height of a 2-dimensional image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent2D {
    pub width: NonZero<u32>,
    pub height: NonZero<u32>,
}
impl Extent2D {
    /// `None` if either axis is zero.
    pub const fn new(width: u32, height: u32) -> Option<Self> {
        match (NonZero::new(width), NonZero::new(height)) {
            (Some(width), Some(height)) => Some(Self { width, height }),
            _ => None,
        }
    }
    pub const fn width(self) -> u32 {
        self.width.get()
    }
    pub const fn height(self) -> u32 {
        self.height.get()
    }
    /// Number of texels.
    pub const fn area(self) -> u64 {
        self.width.get() as u64 * self.height.get() as u64
    }
    pub const fn vk(self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width.get(),
            height: self.height.get(),
        }
    }
    /// The extent with a depth of one.
    pub const fn extent3d(self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width.get(),
            height: self.height.get(),
            depth: 1,
        }
    }
}

crate::thin_handle! {
    /// An owned 2D, single-sampled, single-mip image handle.
    /// # Typestates
    /// * `Usage`: The `vkImageUsageFlags` this image is statically known to
    ///   possess (e.g. `(ColorAttachment, TransferSrc)`)
    ///
    /// Notably lacking in this state is the Image's current layout. This is
    /// because the layout of the image changes over the course of submitted
    /// work, which is tracked at runtime by [`ImageResource`] instead.
    #[must_use = "dropping the handle will not destroy the image and may leak resources"]
    pub struct Image<Usage: ImageUsage>(vk::Image);
}
crate::thin_handle! {
    /// An owned image view handle, covering a whole [`Image`].
    #[must_use = "dropping the handle will not destroy the view and may leak resources"]
    pub struct ImageView(vk::ImageView);
}

impl<Usage: ImageUsage> NeedsMemory for Image<Usage> {
    unsafe fn memory_requirements(&self, device: &Device) -> vk::MemoryRequirements {
        device.ash.get_image_memory_requirements(self.handle())
    }
    unsafe fn bind_memory(
        &self,
        device: &Device,
        memory: &Memory,
        offset: u64,
    ) -> Result<(), AllocationError> {
        device
            .ash
            .bind_image_memory(self.handle(), memory.handle(), offset)
            .map_err(AllocationError::from_vk)
    }
    unsafe fn destroy(self, device: &Device) {
        device.ash.destroy_image(self.into_handle(), None);
    }
}

/// An image, its memory, an optional view, and the state it will be in once
/// all recorded work has executed.
///
/// Created with [`Device::create_image`](crate::Device::create_image).
#[must_use = "dropping the image will not destroy it and may leak resources"]
pub struct ImageResource<Usage: ImageUsage> {
    pub(crate) backing: Resource<Image<Usage>>,
    pub(crate) view: Option<ImageView>,
    pub(crate) extent: Extent2D,
    pub(crate) format: Format,
    pub(crate) tiling: vk::ImageTiling,
    pub(crate) state: ImageState,
}
impl<Usage: ImageUsage> ImageResource<Usage> {
    pub fn image(&self) -> &Image<Usage> {
        self.backing.handle()
    }
    /// The image and its memory.
    pub fn resource(&self) -> &Resource<Image<Usage>> {
        &self.backing
    }
    /// The paired view, `None` if the usage admits no views.
    pub fn view(&self) -> Option<&ImageView> {
        self.view.as_ref()
    }
    pub fn extent(&self) -> Extent2D {
        self.extent
    }
    pub fn format(&self) -> Format {
        self.format
    }
    pub fn tiling(&self) -> vk::ImageTiling {
        self.tiling
    }
    /// The state the image is in after everything recorded so far.
    pub fn state(&self) -> ImageState {
        self.state
    }
    /// Override the tracked state, e.g. after a render pass performed a layout
    /// transition of its own.
    /// # Safety
    /// The image must be in `state` by the time the next recorded use of it
    /// executes.
    pub unsafe fn assume_state(&mut self, state: ImageState) {
        self.state = state;
    }
    pub(crate) fn set_state(&mut self, state: ImageState) {
        self.state = state;
    }
    /// Run `submit`, which records transitions of this image and submits
    /// them. If it fails the transitions can't be relied on, so the tracked
    /// state goes back to what it was before.
    pub(crate) fn rollback_on_error<T>(
        &mut self,
        submit: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let before = self.state;
        let result = submit(self);
        if result.is_err() && self.state != before {
            log::debug!("submission failed, image state back to {before:?}");
            self.state = before;
        }
        result
    }
    /// Every aspect of the single mip and layer.
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.format.aspect(),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
    /// The aspect transfers of this image copy.
    pub(crate) fn copy_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.format.primary_aspect(),
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

impl Device<'_> {
    /// Create an image with no memory bound. See [`Device::create_image`] for
    /// the version that comes with memory.
    pub unsafe fn create_image_handle<Usage: ImageUsage>(
        &self,
        _usage: Usage,
        extent: Extent2D,
        format: Format,
        tiling: vk::ImageTiling,
    ) -> Result<Virtual<Image<Usage>>, AllocationError> {
        self.ash
            .create_image(
                &vk::ImageCreateInfo::default()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(format.vk())
                    .extent(extent.extent3d())
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(tiling)
                    .usage(Usage::FLAGS)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED),
                None,
            )
            .map(|handle| Virtual::new(Image::from_handle_unchecked(handle)))
            .map_err(AllocationError::from_vk)
    }
    /// Create a 2D view of every aspect of `image`.
    pub unsafe fn create_image_view<Usage: ImageUsage>(
        &self,
        image: &Image<Usage>,
        format: Format,
    ) -> Result<ImageView, AllocationError> {
        self.ash
            .create_image_view(
                &vk::ImageViewCreateInfo::default()
                    .image(image.handle())
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.vk())
                    .components(ComponentMapping::IDENTITY.into())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: format.aspect(),
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    }),
                None,
            )
            .map(|handle| ImageView::from_handle_unchecked(handle))
            .map_err(AllocationError::from_vk)
    }
    pub unsafe fn destroy_image_view(&self, view: ImageView) -> &Self {
        self.ash.destroy_image_view(view.into_handle(), None);
        self
    }
    /// Copy the whole of `src` into `dst`, each in its tracked state. The
    /// extents must match, and the formats must be size-compatible.
    pub unsafe fn copy_image<Src: ImageUsage, Dst: ImageUsage>(
        &self,
        buffer: &mut RecordingBuffer<'_, OutsideRender>,
        src: &ImageResource<Src>,
        dst: &ImageResource<Dst>,
    ) -> &Self {
        const {
            assert!(
                Src::FLAGS.contains(vk::ImageUsageFlags::TRANSFER_SRC),
                "copy source lacks TransferSrc usage"
            );
            assert!(
                Dst::FLAGS.contains(vk::ImageUsageFlags::TRANSFER_DST),
                "copy destination lacks TransferDst usage"
            );
        };
        debug_assert_eq!(src.extent, dst.extent);
        self.ash.cmd_copy_image(
            buffer.handle(),
            src.image().handle(),
            src.state.layout(),
            dst.image().handle(),
            dst.state.layout(),
            &[vk::ImageCopy {
                src_subresource: src.copy_layers(),
                src_offset: vk::Offset3D::default(),
                dst_subresource: dst.copy_layers(),
                dst_offset: vk::Offset3D::default(),
                extent: src.extent.extent3d(),
            }],
        );
        self
    }
    /// Copy tightly packed texels from the start of `src` into the whole of
    /// `dst`, in its tracked state.
    pub unsafe fn copy_buffer_to_image<Src: BufferUsage, Dst: ImageUsage>(
        &self,
        buffer: &mut RecordingBuffer<'_, OutsideRender>,
        src: &Buffer<Src>,
        dst: &ImageResource<Dst>,
    ) -> &Self {
        const {
            assert!(
                Src::FLAGS.contains(vk::BufferUsageFlags::TRANSFER_SRC),
                "copy source lacks TransferSrc usage"
            );
            assert!(
                Dst::FLAGS.contains(vk::ImageUsageFlags::TRANSFER_DST),
                "copy destination lacks TransferDst usage"
            );
        };
        self.ash.cmd_copy_buffer_to_image(
            buffer.handle(),
            src.handle(),
            dst.image().handle(),
            dst.state.layout(),
            &[vk::BufferImageCopy {
                buffer_offset: 0,
                // Zero for tight packing, convenient!
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: dst.copy_layers(),
                image_offset: vk::Offset3D::default(),
                image_extent: dst.extent.extent3d(),
            }],
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{barrier::UnsupportedTransition, format, usage::TransferSrc};
    use ash::vk::Handle;

    /// An image with made-up handles. Nothing here reaches Vulkan, so they
    /// are never dereferenced.
    fn unbacked(state: ImageState) -> ImageResource<TransferSrc> {
        unsafe {
            ImageResource {
                backing: Resource {
                    handle: Image::from_handle_unchecked(vk::Image::from_raw(0x10)),
                    memory: Memory::from_handle_unchecked(vk::DeviceMemory::from_raw(0x20)),
                    size: 64,
                    allocation_size: 64,
                    memory_type: 0,
                    properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                },
                view: None,
                extent: Extent2D::new(4, 4).unwrap(),
                format: format::R8G8B8A8_UNORM,
                tiling: vk::ImageTiling::OPTIMAL,
                state,
            }
        }
    }

    #[test]
    fn failed_submissions_roll_the_state_back() {
        let mut image = unbacked(ImageState::ColorAttachment);
        let result = image.rollback_on_error(|image| {
            image.set_state(ImageState::TransferSrc);
            Err::<(), _>(Error::SubmissionFailed(crate::SubmitError::OutOfDeviceMemory))
        });
        assert!(result.is_err());
        // A retried capture has to transition out of the attachment layout again.
        assert_eq!(image.state(), ImageState::ColorAttachment);

        let result = image.rollback_on_error(|image| {
            image.set_state(ImageState::TransferDst);
            Err::<(), _>(Error::UnsupportedTransition(UnsupportedTransition {
                from: ImageState::TransferDst,
                to: ImageState::Undefined,
            }))
        });
        assert!(result.is_err());
        assert_eq!(image.state(), ImageState::ColorAttachment);
    }

    #[test]
    fn successful_submissions_keep_the_state() {
        let mut image = unbacked(ImageState::Undefined);
        let result = image.rollback_on_error(|image| {
            image.set_state(ImageState::TransferSrc);
            Ok(7)
        });
        assert_eq!(result, Ok(7));
        assert_eq!(image.state(), ImageState::TransferSrc);
    }

    #[test]
    fn extent() {
        assert_eq!(Extent2D::new(0, 5), None);
        assert_eq!(Extent2D::new(5, 0), None);
        let extent = Extent2D::new(2048, 1536).unwrap();
        assert_eq!(extent.area(), 2048 * 1536);
        assert_eq!(
            extent.extent3d(),
            vk::Extent3D {
                width: 2048,
                height: 1536,
                depth: 1
            }
        );
    }
}
