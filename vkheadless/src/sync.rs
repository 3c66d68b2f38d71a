//! Host-side synchronization. The host waits on [`Fence`]s; ordering between
//! commands on the device is the business of [`barrier`].
use super::{AllocationError, Device, ThinHandle, vk};

pub mod barrier;

crate::typestate_enum! {
    /// Where a [`Fence`] is in its signal cycle.
    pub enum trait FenceState {
        /// Signaled, and no submission will touch it again.
        pub struct Signaled,
        /// Unsignaled, and not attached to any submission.
        pub struct Unsignaled,
        /// Attached to a submission that has not been seen to finish.
        pub struct Pending,
    }
}
/// A state the host can be sure of without asking the device, so a fence can
/// be created or destroyed in it.
pub trait KnownFenceState: FenceState {
    const CREATE_FLAGS: vk::FenceCreateFlags;
}
impl KnownFenceState for Signaled {
    const CREATE_FLAGS: vk::FenceCreateFlags = vk::FenceCreateFlags::SIGNALED;
}
impl KnownFenceState for Unsignaled {
    const CREATE_FLAGS: vk::FenceCreateFlags = vk::FenceCreateFlags::empty();
}

crate::thin_handle! {
    /// Signaled by the device when a submission completes.
    #[must_use = "dropping the handle will not destroy the fence and may leak resources"]
    pub struct Fence<State: FenceState>(vk::Fence);
}

impl Device<'_> {
    /// ```no_run
    /// # use vkheadless::*;
    /// # let device : Device = todo!();
    /// let fence = unsafe { device.create_fence::<Unsignaled>() }.unwrap();
    /// ```
    pub unsafe fn create_fence<State: KnownFenceState>(
        &self,
    ) -> Result<Fence<State>, AllocationError> {
        let info = vk::FenceCreateInfo::default().flags(State::CREATE_FLAGS);
        self.ash
            .create_fence(&info, None)
            .map(|handle| Fence::from_handle_unchecked(handle))
            .map_err(AllocationError::from_vk)
    }
    /// A [`Pending`] fence can't be destroyed, since a submission may still
    /// signal it.
    pub unsafe fn destroy_fence<State: KnownFenceState>(&self, fence: Fence<State>) -> &Self {
        self.ash.destroy_fence(fence.into_handle(), None);
        self
    }
}
