//! # vkheadless
//! Resource lifetimes and synchronization for headless rendering on top of
//! [`ash`]. This crate is not associated with the ash project!
//!
//! To get started, fetch an [`ash::Device`] and the memory properties of its
//! physical device and pass them to [`Device::from_ash`], or let
//! [`context::HeadlessContext`] do the whole dance for you.
//!
//! The pieces, roughly leaves first:
//! * [`memory::MemoryTypes::resolve`] picks a memory type for a set of
//!   requirements.
//! * [`Device::create_buffer`] and [`Device::create_image`] create a handle and
//!   bind freshly allocated memory to it in one step, yielding a
//!   [`Resource`].
//! * [`Device::upload`] moves host data into device-local memory through a
//!   temporary staging buffer.
//! * [`barrier::plan_image_barrier`] computes the access scopes of an image
//!   state transition, [`Device::record_barrier`] records it.
//! * [`Device::submit_and_wait`] is the one and only place the host waits on
//!   the device.
//! * [`Device::capture`] copies a render target into host-visible memory and
//!   hands back a [`PixelReader`].
//!
//! ## Typestate
//! This crate uses the [typestate
//! pattern](https://en.wikipedia.org/wiki/Typestate_analysis) where the state
//! is statically known: buffer and image usages are part of the type
//! (`Buffer<(Vertex, TransferDst)>`), fences know whether they are
//! [`Pending`], and a [`RecordingBuffer`] knows whether it is inside a render
//! pass. Where the state is only known at runtime, such as the layout of an
//! image over the course of a frame, it is tracked as a plain value
//! ([`barrier::ImageState`]).
//!
//! Handles do not implement `Drop`. Everything goes back through the
//! [`Device`] it came from.
//!
//! ## Feature Flags
//! * `alloc` (default) - helpers that hand back owned data, e.g.
//!   [`Device::download`] and [`PixelReader::to_rgb8`].
//! * `loaded` (default) - the [`context`] module, which loads the Vulkan loader
//!   at runtime and sets up a device with one graphics queue.
//!
//! ## Errors
//! Every fallible operation reports one of the four kinds in [`enum@Error`].
//! None of them are recovered from locally, but no operation leaves a
//! half-built resource behind either: a failure midway through creating
//! something destroys what was created so far.
//!
//! ## Safety
//! Vulkan is still a deeply unsafe API and most functions here are `unsafe fn`
//! for the same reasons the underlying calls are. Objects passed together must
//! belong to the same device, and command buffers must come from the pool they
//! are passed alongside.
//!
//! ### External Synchronization
//! Queues and command pools are only ever touched through `&mut`, so the
//! borrow checker takes care of the external synchronization Vulkan demands of
//! them. Sharing them across threads requires wrapping them in a lock.

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)]
#![cfg_attr(not(test), no_std)]
#[cfg(feature = "alloc")]
extern crate alloc;

pub mod buffer;
pub use buffer::*;
pub mod capture;
pub use capture::*;
pub mod command_buffer;
pub use command_buffer::*;
#[cfg(feature = "loaded")]
pub mod context;
pub mod format;
pub mod handle;
pub use handle::*;
pub mod image;
pub use image::*;
pub mod memory;
pub mod resource;
pub use resource::*;
pub mod staging;
pub mod submit;
pub use submit::*;
pub mod sync;
pub use sync::*;
pub mod usage;
pub use usage::*;
pub use ash::{self, vk};
use core::num::NonZero;

/// Everything that can go wrong in this crate, by kind.
///
/// Nothing is retried or recovered internally. The orchestrating caller gets
/// to decide whether the whole batch is done for (it usually is).
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
pub enum Error {
    /// No memory type fits a resource's requirements.
    #[error(transparent)]
    NoCompatibleMemoryType(#[from] memory::NoCompatibleMemoryType),
    /// Building a resource failed and was rolled back.
    #[error("allocation failed: {0}")]
    AllocationFailed(AllocationFailed),
    /// A barrier was requested between image states with no policy. This is
    /// a programming error, and is always reported before anything is
    /// submitted.
    #[error(transparent)]
    UnsupportedTransition(#[from] barrier::UnsupportedTransition),
    /// Fence creation, queue submission, or the wait itself failed.
    #[error("submission failed: {0}")]
    SubmissionFailed(#[from] SubmitError),
}
/// A resolver failure keeps its own kind, even when it happened while
/// building a resource.
impl From<AllocationFailed> for Error {
    fn from(value: AllocationFailed) -> Self {
        match value {
            AllocationFailed::NoCompatibleMemoryType(err) => Self::NoCompatibleMemoryType(err),
            other => Self::AllocationFailed(other),
        }
    }
}
impl From<AllocationError> for Error {
    fn from(value: AllocationError) -> Self {
        Self::AllocationFailed(value.into())
    }
}
impl Error {
    /// Whether the device may still be executing the work whose submission
    /// failed. Anything that work touches must then be leaked, not freed.
    ///
    /// Only a lost device is known to have stopped. Any other submission
    /// failure might have come from the wait, after the work was queued.
    pub fn may_leave_work_pending(&self) -> bool {
        matches!(self, Self::SubmissionFailed(err) if *err != SubmitError::DeviceLost)
    }
}

/// An error that occurs when the vulkan implementation must allocate memory,
/// e.g. when creating a new handle (image, buffer, etc.) or begining a command
/// buffer.
#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
#[repr(i32)]
pub enum AllocationError {
    /// The implementation could not allocate enough host memory.
    #[error("out of host memory")]
    OutOfHostMemory = vk::Result::ERROR_OUT_OF_HOST_MEMORY.as_raw(),
    /// The implementation could not allocate enough device memory.
    #[error("out of device memory")]
    OutOfDeviceMemory = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.as_raw(),
}
impl AllocationError {
    /// Convert from a vulkan result code. Anything other than
    /// `ERROR_OUT_OF_HOST_MEMORY` is reported as out of device memory, which
    /// debug builds assert against.
    pub(crate) fn from_vk(value: vk::Result) -> Self {
        debug_assert!(
            matches!(
                value,
                vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            ),
            "unexpected allocation result {value:?}"
        );
        // Communicates intent better.
        #[allow(clippy::wildcard_in_or_patterns)]
        match value {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | _ => Self::OutOfDeviceMemory,
        }
    }
}

/// An error that occurs when submitting work or waiting on it.
#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
#[repr(i32)]
pub enum SubmitError {
    /// The implementation could not allocate enough host memory.
    #[error("out of host memory")]
    OutOfHostMemory = vk::Result::ERROR_OUT_OF_HOST_MEMORY.as_raw(),
    /// The implementation could not allocate enough device memory.
    #[error("out of device memory")]
    OutOfDeviceMemory = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.as_raw(),
    /// The device context is irreparably destroyed. Oops!
    #[error("device lost")]
    DeviceLost = vk::Result::ERROR_DEVICE_LOST.as_raw(),
}
impl SubmitError {
    /// Convert from a vulkan result code. Codes other than the two
    /// out-of-memory errors are reported as [`Self::DeviceLost`]. The device
    /// can't be trusted after any of them, and debug builds assert they never
    /// show up.
    pub(crate) fn from_vk(value: vk::Result) -> Self {
        debug_assert!(
            matches!(
                value,
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_DEVICE_LOST
            ),
            "unexpected submission result {value:?}"
        );
        // Communicates intent better.
        #[allow(clippy::wildcard_in_or_patterns)]
        match value {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_DEVICE_LOST | _ => Self::DeviceLost,
        }
    }
}
/// Creating the fence for a submission can run out of memory too.
impl From<AllocationError> for SubmitError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::OutOfHostMemory => Self::OutOfHostMemory,
            AllocationError::OutOfDeviceMemory => Self::OutOfDeviceMemory,
        }
    }
}

#[macro_use]
mod macro_use {
    /// Create a struct as a thin wrapper around another type, with potentially
    /// several type-state bounds placed in a
    /// [`PhantomData`](core::marker::PhantomData), and implements
    /// [`ThinHandle`](super::ThinHandle) on it.
    ///
    /// ```ignore
    /// thin_handle!(pub struct SoupHandle<Kind: Soup>(u8));
    /// ```
    #[macro_export]
    macro_rules! thin_handle {
        {$(#[$attr:meta])* pub struct $name:ident$(<$($param_name:ident: $bound:path),+$(,)?>)?($underlying:ty$(,)?);} => {
            $(#[$attr])*
            #[repr(transparent)]
            pub struct $name$(<$($param_name: $bound),+>)?($crate::handle::NonNull<$underlying>, $(::core::marker::PhantomData<($($param_name),+,)>)?);
            /// # Safety
            /// Definition generated by macro.
            unsafe impl $(<$($param_name : $bound),+>)? $crate::handle::ThinHandle for $name$(<$($param_name,)+>)? {
                type Handle = $underlying;
            }
        };
    }

    /// Create a trait, and create several unit structs implementing it.
    ///
    /// For enumerating a number of Type-State parameters.
    ///
    /// ```ignore
    /// typestate_enum!(pub enum trait Soup { pub struct Stew, pub struct Chili, pub struct Oatmeal });
    /// ```
    #[macro_export]
    macro_rules! typestate_enum {
        {$(#[$outer_attr:meta])* pub enum trait $trait:ident {$($(#[$attr:meta])*pub struct $state:ident),*$(,)?}} => {
            $(#[$outer_attr])*
            pub trait $trait: 'static {}
            $(
                $(#[$attr])*
                pub struct $state;
                impl $trait for $state {}
            )*
        };
    }
    /// Implement a flags trait for tuples of single flags, where the tuple
    /// implements the OR of the flags.
    /// ```ignore
    /// flag_combinations! {
    ///    impl BufferUsage for [
    ///        (A,B),
    ///        (A,B,C),
    ///    ] {
    ///        const FLAGS : vk::BufferUsageFlags;
    ///    }
    /// }
    /// ```
    #[macro_export]
    macro_rules! flag_combinations {
        {impl $trait_name:ident for [$(($($name:ident),*$(,)?)),+$(,)?] {
            const $const_name:ident: $const_ty:ty;
        }} => {
            // Trailing comma to force it to be a tuple type, even for single
            // fields.
            $(
                impl<$($name : $trait_name),+> $trait_name for ($($name),*,) {
                    const $const_name: $const_ty = <$const_ty>::from_raw($(<$name as $trait_name>::$const_name.as_raw())|*);
                }
            )+
        };
    }
}

/// A Vulkan "Logical Device," its function pointers, and the memory types of
/// the physical device behind it.
///
/// All device-scope operations go through this object.
///
/// To create one, acquire an [`ash::Device`] as documented by `ash` and pass it
/// to [`Device::from_ash`].
pub struct Device<'a> {
    pub(crate) ash: &'a ash::Device,
    memory_types: memory::MemoryTypes,
}
thin_handle! {
    /// A queue capable of graphics and transfer work. Submission requires
    /// unique access.
    pub struct Queue(vk::Queue);
}

#[repr(i32)]
/// The result of polling or waiting with a timeout.
pub enum FencePoll<Success, Pending> {
    Signaled(Success) = vk::Result::SUCCESS.as_raw(),
    Unsignaled(Pending) = vk::Result::NOT_READY.as_raw(),
}
/// The timeout for a host-side wait.
#[derive(Clone, Copy, Debug)]
pub enum Timeout {
    /// Don't wait, check the status and immediately return.
    Poll,
    /// Wait the specified number of nanoseconds. The resolution is unspecified,
    /// and the implementation may wait longer or shorter than the given time.
    Nanos(NonZero<u64>),
    /// Wait forever, until signaled or an error occurs.
    Infinite,
}
impl Timeout {
    fn get(self) -> u64 {
        match self {
            Self::Poll => 0,
            Self::Nanos(n) => n.get(),
            Self::Infinite => u64::MAX,
        }
    }
}

impl<'device> Device<'device> {
    /// Wrap an [`ash`] device.
    ///
    /// This is the main entry point for this crate. The memory properties must
    /// be those of the physical device `device` was created from, they are
    /// what every allocation is resolved against.
    pub fn from_ash(
        device: &'device ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
    ) -> Self {
        Self {
            ash: device,
            memory_types: memory::MemoryTypes::from_properties(memory_properties),
        }
    }
    /// The wrapped [`ash`] device, for mixing in raw calls.
    pub fn ash(&self) -> &'device ash::Device {
        self.ash
    }
    /// The memory types allocations are resolved against.
    pub fn memory_types(&self) -> &memory::MemoryTypes {
        &self.memory_types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_lost_device_is_known_to_be_idle() {
        assert!(Error::SubmissionFailed(SubmitError::OutOfDeviceMemory).may_leave_work_pending());
        assert!(Error::SubmissionFailed(SubmitError::OutOfHostMemory).may_leave_work_pending());
        assert!(!Error::SubmissionFailed(SubmitError::DeviceLost).may_leave_work_pending());
        // Failures before submission never leave anything running.
        assert!(!Error::from(AllocationError::OutOfHostMemory).may_leave_work_pending());
        assert!(
            !Error::UnsupportedTransition(barrier::UnsupportedTransition {
                from: barrier::ImageState::General,
                to: barrier::ImageState::Undefined,
            })
            .may_leave_work_pending()
        );
    }

    #[test]
    fn result_codes() {
        assert_eq!(
            SubmitError::from_vk(vk::Result::ERROR_DEVICE_LOST),
            SubmitError::DeviceLost
        );
        assert_eq!(
            SubmitError::from_vk(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            SubmitError::OutOfHostMemory
        );
        assert_eq!(
            AllocationError::from_vk(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            AllocationError::OutOfDeviceMemory
        );
        // Fence creation running dry is a submission failure of the same kind.
        assert_eq!(
            SubmitError::from(AllocationError::OutOfHostMemory),
            SubmitError::OutOfHostMemory
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic = "unexpected submission result"]
    fn unknown_submission_codes_are_caught_in_debug() {
        let _ = SubmitError::from_vk(vk::Result::ERROR_UNKNOWN);
    }
}
