//! Handles paired with the memory backing them.
//!
//! Everything goes create, query requirements, resolve a memory type, allocate,
//! bind. That sequence lives in one place, [`Device::back`], and a failure at
//! any step undoes the ones before it.
use crate::{
    AllocationError, Device, Error, ThinHandle,
    buffer::Buffer,
    format::Format,
    image::{Extent2D, Image, ImageResource},
    memory::{Memory, NeedsMemory, NoCompatibleMemoryType, Virtual},
    sync::barrier::ImageState,
    usage::{BufferUsage, ImageUsage, VIEWABLE_IMAGE_USAGE},
    vk,
};
use core::num::NonZero;

/// Building a resource failed. Whatever was created before the failure has
/// been destroyed again.
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
pub enum AllocationFailed {
    #[error(transparent)]
    NoCompatibleMemoryType(#[from] NoCompatibleMemoryType),
    /// Creating the handle, allocating, or binding ran out of memory.
    #[error(transparent)]
    Device(#[from] AllocationError),
    /// Initial data was given, but the chosen memory type can't be mapped.
    #[error("memory type {memory_type} is not host visible")]
    NotHostVisible { memory_type: u32 },
    /// Mapping host-visible memory failed.
    #[error("failed to map memory: {0:?}")]
    Map(vk::Result),
}

/// A buffer or image together with the one allocation backing it.
///
/// Only [`Device::back`] makes these, and only [`Device::destroy_resource`]
/// (or [`Device::destroy_image`]) gets rid of them, handle first.
#[must_use = "dropping the resource will not destroy it and may leak resources"]
pub struct Resource<H: NeedsMemory> {
    pub(crate) handle: H,
    pub(crate) memory: Memory,
    pub(crate) size: u64,
    pub(crate) allocation_size: u64,
    pub(crate) memory_type: u32,
    pub(crate) properties: vk::MemoryPropertyFlags,
}
impl<H: NeedsMemory> Resource<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
    /// The size asked for. For buffers that's the buffer size, for images the
    /// size of the allocation.
    pub fn size(&self) -> u64 {
        self.size
    }
    /// The size of the allocation, at least [`Self::size`].
    pub fn allocation_size(&self) -> u64 {
        self.allocation_size
    }
    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }
    /// The properties of the memory type, which may be more than were asked
    /// for.
    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }
    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }
}

impl Device<'_> {
    /// Give `handle` memory of its own, with at least the `required`
    /// properties.
    ///
    /// On failure the handle is destroyed, and the memory freed if it got that
    /// far.
    pub unsafe fn back<H: NeedsMemory>(
        &self,
        handle: Virtual<H>,
        required: vk::MemoryPropertyFlags,
    ) -> Result<Resource<H>, AllocationFailed> {
        let requirements = handle.memory_requirements(self);
        let memory_type = match self
            .memory_types()
            .resolve(requirements.memory_type_bits, required)
        {
            Ok(memory_type) => memory_type,
            Err(err) => {
                log::warn!("{err}, destroying {}", core::any::type_name::<H>());
                handle.destroy(self);
                return Err(err.into());
            }
        };
        let memory = match self.allocate_memory(requirements.size, memory_type) {
            Ok(memory) => memory,
            Err(err) => {
                log::warn!(
                    "allocating {} bytes of memory type {memory_type} failed: {err}",
                    requirements.size
                );
                handle.destroy(self);
                return Err(err.into());
            }
        };
        if let Err(err) = handle.bind_memory(self, &memory, 0) {
            log::warn!("binding memory failed: {err}");
            handle.destroy(self);
            self.free_memory(memory);
            return Err(err.into());
        }
        log::debug!(
            "backed {} with {} bytes of memory type {memory_type}",
            core::any::type_name::<H>(),
            requirements.size,
        );
        Ok(Resource {
            handle: handle.assume_backed(),
            memory,
            size: requirements.size,
            allocation_size: requirements.size,
            memory_type,
            properties: self
                .memory_types()
                .properties(memory_type)
                .unwrap_or_default(),
        })
    }
    /// Create a buffer of `size` bytes in memory with the `properties`, and
    /// optionally fill it with `initial_data` right away.
    ///
    /// ```no_run
    /// # use vkheadless::*;
    /// # let device: Device = todo!();
    /// let vertices: &[u8] = &[0; 96];
    /// let buffer = unsafe {
    ///     device.create_buffer(
    ///         Vertex,
    ///         core::num::NonZero::new(96).unwrap(),
    ///         vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    ///         Some(vertices),
    ///     )
    /// }
    /// .unwrap();
    /// ```
    /// # Panics
    /// If `initial_data` is longer than `size`.
    pub unsafe fn create_buffer<Usage: BufferUsage>(
        &self,
        usage: Usage,
        size: NonZero<u64>,
        properties: vk::MemoryPropertyFlags,
        initial_data: Option<&[u8]>,
    ) -> Result<Resource<Buffer<Usage>>, AllocationFailed> {
        if let Some(data) = initial_data {
            assert!(
                data.len() as u64 <= size.get(),
                "{} bytes of initial data don't fit in a {size} byte buffer",
                data.len()
            );
        }
        let handle = self.create_buffer_handle(usage, size)?;
        let mut resource = self.back(handle, properties)?;
        resource.size = size.get();
        if let Some(data) = initial_data.filter(|data| !data.is_empty()) {
            if let Err(err) = self.write_mapped(&resource, 0, data) {
                log::warn!("writing initial data failed: {err}");
                self.destroy_resource(resource);
                return Err(err);
            }
        }
        Ok(resource)
    }
    /// Create a 2D image in memory with the `properties`. It gets a view if
    /// the usage allows for one. The image starts out
    /// [`Undefined`](ImageState::Undefined).
    pub unsafe fn create_image<Usage: ImageUsage>(
        &self,
        usage: Usage,
        extent: Extent2D,
        format: Format,
        tiling: vk::ImageTiling,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<ImageResource<Usage>, AllocationFailed> {
        let handle = self.create_image_handle(usage, extent, format, tiling)?;
        let backing: Resource<Image<Usage>> = self.back(handle, properties)?;
        let view = if Usage::FLAGS.intersects(VIEWABLE_IMAGE_USAGE) {
            match self.create_image_view(backing.handle(), format) {
                Ok(view) => Some(view),
                Err(err) => {
                    log::warn!("creating image view failed: {err}");
                    self.destroy_resource(backing);
                    return Err(err.into());
                }
            }
        } else {
            None
        };
        Ok(ImageResource {
            backing,
            view,
            extent,
            format,
            tiling,
            state: ImageState::Undefined,
        })
    }
    /// Destroy the handle, then free its memory.
    pub unsafe fn destroy_resource<H: NeedsMemory>(&self, resource: Resource<H>) -> &Self {
        let Resource { handle, memory, .. } = resource;
        handle.destroy(self);
        self.free_memory(memory)
    }
    /// Destroy the view, the image, then free its memory.
    pub unsafe fn destroy_image<Usage: ImageUsage>(&self, image: ImageResource<Usage>) -> &Self {
        if let Some(view) = image.view {
            self.destroy_image_view(view);
        }
        self.destroy_resource(image.backing)
    }
    /// Destroy a resource some submission used, once `outcome` of that
    /// submission is in. If the device may still be running it, the resource
    /// is leaked instead.
    pub(crate) unsafe fn retire_resource<H: NeedsMemory, T>(
        &self,
        resource: Resource<H>,
        outcome: &Result<T, Error>,
    ) {
        match outcome {
            Err(err) if err.may_leave_work_pending() => {
                log::warn!(
                    "leaking {} after {err}, the device may still use it",
                    core::any::type_name::<H>()
                );
                core::mem::forget(resource);
            }
            _ => {
                self.destroy_resource(resource);
            }
        }
    }
    /// [`Self::retire_resource`] for images and their views.
    pub(crate) unsafe fn retire_image<Usage: ImageUsage, T>(
        &self,
        image: ImageResource<Usage>,
        outcome: &Result<T, Error>,
    ) {
        match outcome {
            Err(err) if err.may_leave_work_pending() => {
                log::warn!(
                    "leaking a {}x{} image after {err}, the device may still use it",
                    image.extent.width(),
                    image.extent.height()
                );
                core::mem::forget(image);
            }
            _ => {
                self.destroy_image(image);
            }
        }
    }
    /// Copy `data` into the mapped memory of `resource` at `offset`.
    pub(crate) unsafe fn write_mapped<H: NeedsMemory>(
        &self,
        resource: &Resource<H>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), AllocationFailed> {
        debug_assert!(offset + data.len() as u64 <= resource.size);
        let ptr = self.map_resource(resource)?;
        core::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        let flushed = if resource
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            Ok(())
        } else {
            self.flush_memory(&resource.memory)
        };
        self.unmap_memory(&resource.memory);
        flushed.map_err(Into::into)
    }
    /// Copy from the mapped memory of `resource` at `offset` into `out`.
    pub(crate) unsafe fn read_mapped<H: NeedsMemory>(
        &self,
        resource: &Resource<H>,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), AllocationFailed> {
        debug_assert!(offset + out.len() as u64 <= resource.size);
        let ptr = self.map_resource(resource)?;
        let invalidated = if resource
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            Ok(())
        } else {
            self.invalidate_memory(&resource.memory)
        };
        if invalidated.is_ok() {
            core::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        self.unmap_memory(&resource.memory);
        invalidated.map_err(Into::into)
    }
    /// Map the whole allocation of a host-visible resource.
    pub(crate) unsafe fn map_resource<H: NeedsMemory>(
        &self,
        resource: &Resource<H>,
    ) -> Result<*mut u8, AllocationFailed> {
        if !resource.is_host_visible() {
            return Err(AllocationFailed::NotHostVisible {
                memory_type: resource.memory_type,
            });
        }
        self.map_memory(&resource.memory)
            .map(|ptr| ptr.cast::<u8>())
            .map_err(AllocationFailed::Map)
    }
}
