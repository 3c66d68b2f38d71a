//! Queue submission, and the only place the host waits on the device.
//!
//! Every submission gets a fence of its own, created right before and destroyed
//! right after waiting on it. Work is thus strictly serialized: nothing is
//! submitted while an earlier submission is in flight.
use crate::{
    Device, Error, FencePoll, Queue, SubmitError, ThinHandle, Timeout,
    command_buffer::{CommandBuffer, CommandPool, OutsideRender, RecordingBuffer},
    sync::{Fence, Pending, Signaled, Unsignaled},
    vk,
};
use core::marker::PhantomData;

/// Work that has been submitted and not yet waited on.
///
/// Waiting consumes this, so a submission can't be waited on twice, and the
/// command buffer stays borrowed until the device is done with it.
#[must_use = "dropping the submission leaks its fence"]
pub struct PendingSubmission<'b> {
    fence: Fence<Pending>,
    _buffer: PhantomData<&'b CommandBuffer>,
}
impl PendingSubmission<'_> {
    /// Block until the device has finished executing the submission, then
    /// destroy its fence.
    pub unsafe fn wait(self, device: &Device) -> Result<(), SubmitError> {
        let mut pending = self;
        loop {
            match pending.wait_timeout(device, Timeout::Infinite)? {
                FencePoll::Signaled(()) => return Ok(()),
                // An infinite wait may still return early on some platforms.
                FencePoll::Unsignaled(still) => pending = still,
            }
        }
    }
    /// Wait up to `timeout` for the submission to finish. If it did, the fence
    /// is destroyed, otherwise the submission is handed back.
    ///
    /// On `DeviceLost` the fence is destroyed as well. On other errors the
    /// fence may still be in use by the device and is leaked.
    pub unsafe fn wait_timeout(
        self,
        device: &Device,
        timeout: Timeout,
    ) -> Result<FencePoll<(), Self>, SubmitError> {
        let fence = self.fence.handle();
        match device.ash.wait_for_fences(&[fence], true, timeout.get()) {
            Ok(()) => {
                device.destroy_fence(self.fence.with_state::<Fence<Signaled>>());
                Ok(FencePoll::Signaled(()))
            }
            Err(vk::Result::TIMEOUT) => Ok(FencePoll::Unsignaled(self)),
            Err(err) => {
                let err = SubmitError::from_vk(err);
                if err == SubmitError::DeviceLost {
                    // Nothing is executing anymore, so the fence is as good as
                    // signaled.
                    device.destroy_fence(self.fence.with_state::<Fence<Signaled>>());
                } else {
                    log::warn!("waiting on fence failed ({err}), leaking it");
                    let _ = self.fence.into_handle();
                }
                Err(err)
            }
        }
    }
}

impl Device<'_> {
    /// Submit one command buffer with a fresh fence.
    ///
    /// If the submission fails, the fence is destroyed before returning.
    pub unsafe fn submit<'b>(
        &self,
        queue: &mut Queue,
        buffer: &'b CommandBuffer,
    ) -> Result<PendingSubmission<'b>, SubmitError> {
        let fence = self.create_fence::<Unsignaled>()?;
        let buffers = [buffer.handle()];
        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        if let Err(err) = self
            .ash
            .queue_submit(queue.handle(), &[submit], fence.handle())
        {
            let err = SubmitError::from_vk(err);
            log::warn!("queue submission failed: {err}");
            self.destroy_fence(fence);
            return Err(err);
        }
        log::debug!("submitted command buffer {:#x}", vk::Handle::as_raw(buffers[0]));
        Ok(PendingSubmission {
            fence: fence.with_state(),
            _buffer: PhantomData,
        })
    }
    /// Submit one command buffer and block until the device has executed it.
    /// The fence used to wait lives exactly as long as this call.
    pub unsafe fn submit_and_wait(
        &self,
        queue: &mut Queue,
        buffer: &CommandBuffer,
    ) -> Result<(), SubmitError> {
        self.submit(queue, buffer)?.wait(self)
    }
    /// Record a single-use command buffer with `record`, submit it, and wait
    /// for it to complete. The command buffer is freed afterwards, unless a
    /// failed wait leaves it possibly still pending.
    ///
    /// ```no_run
    /// # use vkheadless::*;
    /// # let device: Device = todo!();
    /// # let mut pool: CommandPool = todo!();
    /// # let mut queue: Queue = todo!();
    /// # let buffer: Resource<Buffer<(Storage, TransferDst)>> = todo!();
    /// unsafe {
    ///     device.one_shot(&mut pool, &mut queue, |device, recording| {
    ///         device.fill_buffer(
    ///             recording,
    ///             buffer.handle(),
    ///             0,
    ///             core::num::NonZero::new(64).unwrap(),
    ///             0xFFFF_FFFF,
    ///         );
    ///         Ok(())
    ///     })
    /// }
    /// .unwrap();
    /// ```
    pub unsafe fn one_shot<T>(
        &self,
        pool: &mut CommandPool,
        queue: &mut Queue,
        record: impl FnOnce(&Self, &mut RecordingBuffer<'_, OutsideRender>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let [mut buffer] = self.allocate_command_buffers::<1>(pool)?;
        let result = self.record_and_submit(pool, queue, &mut buffer, record);
        match &result {
            // Might still be pending, freeing it would be worse than leaking.
            Err(err) if err.may_leave_work_pending() => {
                log::warn!("leaking command buffer after {err}");
                let _ = buffer.into_handle();
            }
            _ => {
                self.free_command_buffers(pool, [buffer]);
            }
        }
        result
    }
    unsafe fn record_and_submit<T>(
        &self,
        pool: &mut CommandPool,
        queue: &mut Queue,
        buffer: &mut CommandBuffer,
        record: impl FnOnce(&Self, &mut RecordingBuffer<'_, OutsideRender>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut recording = self.begin_command_buffer(pool, buffer)?;
        let recorded = record(self, &mut recording);
        // Always leave the recording state, even if nothing will be submitted.
        self.end_command_buffer(recording)?;
        let value = recorded?;
        self.submit_and_wait(queue, buffer)?;
        Ok(value)
    }
}
