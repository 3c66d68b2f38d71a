//! `vkBuffer`
use crate::{
    AllocationError, Device, NonNull, ThinHandle,
    command_buffer::{CommandBufferState, OutsideRender, RecordingBuffer},
    memory::{Memory, NeedsMemory, Virtual},
    resource::Resource,
    sync::barrier::{ReadWrite, Write},
    usage::*,
    vk,
};
use core::{marker::PhantomData, num::NonZero};

crate::thin_handle! {
    /// An owned buffer handle.
    /// # Typestates
    /// * `Usage`: The `vkBufferUsageFlags` this buffer is statically known to
    ///   possess (e.g. `(Vertex, TransferDst)`)
    #[must_use = "dropping the handle will not destroy the buffer and may leak resources"]
    pub struct Buffer<Usage: BufferUsage>(vk::Buffer);
}

impl<Usage: BufferUsage> Buffer<Usage> {
    /// Borrow the buffer as one with only some of its usages.
    /// # Compiler Errors
    /// If you see an "evaluation of constant value failed" error pointing here,
    /// `SubUsage` asks for a usage this buffer wasn't created with.
    pub fn reference<SubUsage: BufferUsage>(&self) -> BufferReference<'_, SubUsage> {
        const {
            assert!(
                Usage::FLAGS.contains(SubUsage::FLAGS),
                "buffer lacks the requested usage"
            )
        };
        // Known non-null since self is non-null.
        unsafe { BufferReference::from_handle_unchecked(self.handle()) }
    }
}
impl<Usage: BufferUsage> Resource<Buffer<Usage>> {
    /// A dependency on the whole buffer, from the writes in `src` to the
    /// accesses in `dst`.
    pub fn barrier(&self, src: Write, dst: impl Into<ReadWrite>) -> BufferBarrier<'_> {
        BufferBarrier {
            // Safety: only read.
            buffer: unsafe { self.handle().handle() },
            offset: 0,
            len: vk::WHOLE_SIZE,
            src,
            dst: dst.into(),
            _phantom: PhantomData,
        }
    }
}
/// A memory dependency on a range of a buffer. Record it with
/// [`Device::record_barrier`].
#[derive(Clone, Copy, Debug)]
pub struct BufferBarrier<'a> {
    pub(crate) buffer: vk::Buffer,
    pub(crate) offset: u64,
    pub(crate) len: u64,
    pub(crate) src: Write,
    pub(crate) dst: ReadWrite,
    _phantom: PhantomData<&'a ()>,
}
impl BufferBarrier<'_> {
    /// Narrow the barrier to `len` bytes starting at `offset`.
    pub fn range(self, offset: u64, len: NonZero<u64>) -> Self {
        Self {
            offset,
            len: len.get(),
            ..self
        }
    }
}
/// A thin, shared reference to a [`Buffer`] with some subset of usages.
/// Acquired using [`Buffer::reference`].
///
/// This is used anywhere where vulkan expects a slice of buffers, where
/// `&[&Buffer]` is one layer of indirection too deep to be directly handed off
/// to the implementation.
#[repr(transparent)]
pub struct BufferReference<'a, Usage: BufferUsage>(
    NonNull<vk::Buffer>,
    PhantomData<(Usage, &'a Buffer<Usage>)>,
);

unsafe impl<Usage: BufferUsage> ThinHandle for BufferReference<'_, Usage> {
    type Handle = vk::Buffer;
}

/// Trait for integers which can be used as values in an index buffer.
pub trait IndexTy {
    /// The index enum for this type.
    const TYPE: vk::IndexType;
}
impl IndexTy for u16 {
    const TYPE: vk::IndexType = vk::IndexType::UINT16;
}
impl IndexTy for u32 {
    const TYPE: vk::IndexType = vk::IndexType::UINT32;
}

impl<Usage: BufferUsage> NeedsMemory for Buffer<Usage> {
    unsafe fn memory_requirements(&self, device: &Device) -> vk::MemoryRequirements {
        device.ash.get_buffer_memory_requirements(self.handle())
    }
    unsafe fn bind_memory(
        &self,
        device: &Device,
        memory: &Memory,
        offset: u64,
    ) -> Result<(), AllocationError> {
        device
            .ash
            .bind_buffer_memory(self.handle(), memory.handle(), offset)
            .map_err(AllocationError::from_vk)
    }
    unsafe fn destroy(self, device: &Device) {
        device.ash.destroy_buffer(self.into_handle(), None);
    }
}

impl Device<'_> {
    /// Create a buffer with no memory bound. The `BufferUsageFlags` are passed
    /// at compile time. See [`Device::create_buffer`] for the version that
    /// comes with memory.
    pub unsafe fn create_buffer_handle<Usage: BufferUsage>(
        &self,
        _usage: Usage,
        size: NonZero<u64>,
    ) -> Result<Virtual<Buffer<Usage>>, AllocationError> {
        self.ash
            .create_buffer(
                &vk::BufferCreateInfo::default()
                    .usage(Usage::FLAGS)
                    .size(size.get())
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )
            .map(|handle| Virtual::new(Buffer::from_handle_unchecked(handle)))
            .map_err(AllocationError::from_vk)
    }
    /// Copy regions of `src` into `dst`.
    pub unsafe fn copy_buffer<Src: BufferUsage, Dst: BufferUsage>(
        &self,
        buffer: &mut RecordingBuffer<'_, OutsideRender>,
        src: &Buffer<Src>,
        dst: &Buffer<Dst>,
        regions: &[vk::BufferCopy],
    ) -> &Self {
        const {
            assert!(
                Src::FLAGS.contains(vk::BufferUsageFlags::TRANSFER_SRC),
                "copy source lacks TransferSrc usage"
            );
            assert!(
                Dst::FLAGS.contains(vk::BufferUsageFlags::TRANSFER_DST),
                "copy destination lacks TransferDst usage"
            );
        };
        debug_assert!(!regions.is_empty());
        self.ash
            .cmd_copy_buffer(buffer.handle(), src.handle(), dst.handle(), regions);
        self
    }
    /// Fill `len` bytes of `dst` starting at `offset` with the repeated
    /// `value`. Both must be multiples of four.
    pub unsafe fn fill_buffer<Dst: BufferUsage>(
        &self,
        buffer: &mut RecordingBuffer<'_, OutsideRender>,
        dst: &Buffer<Dst>,
        offset: u64,
        len: NonZero<u64>,
        value: u32,
    ) -> &Self {
        const {
            assert!(
                Dst::FLAGS.contains(vk::BufferUsageFlags::TRANSFER_DST),
                "fill destination lacks TransferDst usage"
            )
        };
        self.ash
            .cmd_fill_buffer(buffer.handle(), dst.handle(), offset, len.get(), value);
        self
    }
    pub unsafe fn bind_vertex_buffers<State: CommandBufferState>(
        &self,
        buffer: &mut RecordingBuffer<'_, State>,
        first: u32,
        vertex_buffers: &[BufferReference<'_, Vertex>],
        offsets: &[u64],
    ) -> &Self {
        debug_assert_eq!(vertex_buffers.len(), offsets.len());
        self.ash.cmd_bind_vertex_buffers(
            buffer.handle(),
            first,
            ThinHandle::handles_of(vertex_buffers),
            offsets,
        );
        self
    }
    /// Bind an index buffer of `Ty` indices.
    pub unsafe fn bind_index_buffer<Ty: IndexTy, State: CommandBufferState>(
        &self,
        buffer: &mut RecordingBuffer<'_, State>,
        index_buffer: BufferReference<'_, Index>,
        offset: u64,
    ) -> &Self {
        self.ash.cmd_bind_index_buffer(
            buffer.handle(),
            index_buffer.handle(),
            offset,
            Ty::TYPE,
        );
        self
    }
}
