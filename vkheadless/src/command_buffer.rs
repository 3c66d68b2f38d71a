//! `vkCommandPool` and `vkCommandBuffer`, plus the commands the render path
//! records that aren't about buffers, images, or barriers.
use super::{AllocationError, Device, NonNull, ThinHandle, image::Extent2D, vk};
use core::{marker::PhantomData, ops::Range};

crate::thin_handle! {
    /// A pool from which many [`CommandBuffer`]s may be allocated. Any
    /// operation on any command buffer allocated from this pool requires
    /// synchronous access to the pool as well.
    #[must_use = "dropping the handle will not destroy the command pool and may leak resources"]
    pub struct CommandPool(vk::CommandPool);
}

crate::thin_handle! {
    /// A primary command buffer, allocated from a [`CommandPool`].
    ///
    /// All operations require synchronous access to this buffer, as well as the
    /// pool it was allocated from.
    #[must_use = "dropping the handle will not deallocate the buffer and may leak resources"]
    pub struct CommandBuffer(vk::CommandBuffer);
}

crate::typestate_enum! {
    /// The scope of a recording command buffer.
    pub enum trait CommandBufferState {
        /// Typestate for a recording command buffer that is not currently
        /// rendering. Transfers and barriers go here.
        pub struct OutsideRender,
        /// Typestate for a recording command buffer inside a render pass,
        /// which can thus issue draws.
        pub struct InsideRender,
    }
}

#[must_use = "dropping the handle will result in a command buffer orphaned in an incomplete state"]
/// A temporary handle to a command buffer in the `recording` state.
/// # Typestates
/// * `State`: The current scope of the command buffer. For example, whether the
///   command buffer is currently "inside" a render pass, and can thus issue
///   `draw` commands.
#[repr(transparent)]
pub struct RecordingBuffer<'a, State: CommandBufferState> {
    #[allow(unused)]
    // It's not actually unused. ThinHandle trait reads it!
    buffer: NonNull<vk::CommandBuffer>,
    _typed_buffer: PhantomData<&'a mut CommandBuffer>,
    _state: PhantomData<State>,
    _pool: PhantomData<&'a mut CommandPool>,
}
unsafe impl<State: CommandBufferState> ThinHandle for RecordingBuffer<'_, State> {
    type Handle = vk::CommandBuffer;
}

impl Device<'_> {
    /// Create a [`CommandPool`] from which [`CommandBuffer`]s may be allocated.
    pub unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo,
    ) -> Result<CommandPool, AllocationError> {
        self.ash
            .create_command_pool(info, None)
            .map(|handle| CommandPool::from_handle_unchecked(handle))
            .map_err(AllocationError::from_vk)
    }
    /// Destroy a [`CommandPool`].
    /// # Safety
    /// Any [`CommandBuffer`]s allocated from this pool do not need to be
    /// [freed](Self::free_command_buffers) prior to this call, however they
    /// become invalid to access and should be dropped.
    pub unsafe fn destroy_command_pool(&self, pool: CommandPool) -> &Self {
        self.ash.destroy_command_pool(pool.into_handle(), None);
        self
    }
    /// Allocate primary [`CommandBuffer`]s from the given pool.
    ///
    /// The constant `N` is the number of command buffers to allocate. Use
    /// this along with a destructuring to create several buffers at once:
    /// ```no_run
    /// # use vkheadless::*;
    /// # let device : Device = todo!();
    /// # let mut pool : CommandPool = todo!();
    /// let [buffer_a, buffer_b] = unsafe { device.allocate_command_buffers(&mut pool) }.unwrap();
    /// ```
    pub unsafe fn allocate_command_buffers<const N: usize>(
        &self,
        pool: &mut CommandPool,
    ) -> Result<[CommandBuffer; N], AllocationError> {
        // Straight to the function pointer, ash wants to hand back a Vec.
        let mut handles = [vk::CommandBuffer::null(); N];
        let info = vk::CommandBufferAllocateInfo::default()
            .command_buffer_count(N as u32)
            .command_pool(pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY);
        (self.ash.fp_v1_0().allocate_command_buffers)(
            self.ash.handle(),
            &info,
            handles.as_mut_ptr(),
        )
        .result()
        .map_err(AllocationError::from_vk)?;
        Ok(handles.map(|handle| CommandBuffer::from_handle_unchecked(handle)))
    }
    /// Free [`CommandBuffer`]s back to the given pool.
    pub unsafe fn free_command_buffers<const N: usize>(
        &self,
        pool: &mut CommandPool,
        buffers: [CommandBuffer; N],
    ) -> &Self {
        if N != 0 {
            self.ash
                .free_command_buffers(pool.handle(), ThinHandle::handles_of(&buffers));
        }
        self
    }
    /// Begin recording a command buffer that will be submitted once.
    pub unsafe fn begin_command_buffer<'a>(
        &'_ self,
        _pool: &'a mut CommandPool,
        buffer: &'a mut CommandBuffer,
    ) -> Result<RecordingBuffer<'a, OutsideRender>, AllocationError> {
        self.ash
            .begin_command_buffer(
                buffer.handle(),
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
            .map_err(AllocationError::from_vk)?;
        Ok(RecordingBuffer::from_handle_unchecked(buffer.handle()))
    }
    pub unsafe fn end_command_buffer(
        &self,
        buffer: RecordingBuffer<'_, OutsideRender>,
    ) -> Result<&Self, AllocationError> {
        self.ash
            .end_command_buffer(buffer.handle())
            .map_err(AllocationError::from_vk)?;
        Ok(self)
    }
    /// Begin a render pass with inline contents. The returned buffer borrows
    /// `buffer` until [`Self::end_render_pass`].
    pub unsafe fn begin_render_pass<'r>(
        &self,
        buffer: &'r mut RecordingBuffer<'_, OutsideRender>,
        info: &vk::RenderPassBeginInfo,
    ) -> RecordingBuffer<'r, InsideRender> {
        self.ash
            .cmd_begin_render_pass(buffer.handle(), info, vk::SubpassContents::INLINE);
        // Same buffer, narrower scope. The borrow keeps the outer one from
        // being used until the pass ends.
        RecordingBuffer::from_handle_unchecked(buffer.handle())
    }
    pub unsafe fn end_render_pass(&self, buffer: RecordingBuffer<'_, InsideRender>) -> &Self {
        self.ash.cmd_end_render_pass(buffer.handle());
        self
    }
    pub unsafe fn bind_graphics_pipeline<State: CommandBufferState>(
        &self,
        buffer: &mut RecordingBuffer<'_, State>,
        pipeline: vk::Pipeline,
    ) -> &Self {
        self.ash
            .cmd_bind_pipeline(buffer.handle(), vk::PipelineBindPoint::GRAPHICS, pipeline);
        self
    }
    /// Set the dynamic viewport and scissor to cover all of `extent`, with
    /// depth from zero to one.
    pub unsafe fn set_viewport_scissor<State: CommandBufferState>(
        &self,
        buffer: &mut RecordingBuffer<'_, State>,
        extent: Extent2D,
    ) -> &Self {
        self.ash.cmd_set_viewport(
            buffer.handle(),
            0,
            &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width() as f32,
                height: extent.height() as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        self.ash.cmd_set_scissor(
            buffer.handle(),
            0,
            &[vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: extent.vk(),
            }],
        );
        self
    }
    pub unsafe fn draw_indexed(
        &self,
        buffer: &mut RecordingBuffer<'_, InsideRender>,
        vertex_offset: i32,
        indices: Range<u32>,
        instances: Range<u32>,
    ) -> &Self {
        self.ash.cmd_draw_indexed(
            buffer.handle(),
            indices.end - indices.start,
            instances.end - instances.start,
            indices.start,
            vertex_offset,
            instances.start,
        );
        self
    }
}
