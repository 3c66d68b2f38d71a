//! # Handles
//!
//! Every object this crate hands out is a thin, typed wrapper over one raw
//! Vulkan handle. The type carries what the host knows about the object (its
//! usage, whether a fence has been submitted) while the value is just the
//! 64-bit handle, so a `[Buffer<Vertex>]` can be passed straight to Vulkan.
//!
//! Handles are not `Eq` or `Hash`: two distinct objects may share a value on
//! some implementations. Owned wrappers are unique, which is what lets `&mut`
//! access to a wrapper stand in for Vulkan's external synchronization rules.
use ash::vk::Handle as RawHandle;
use core::{marker::PhantomData, num::NonZero};

/// A raw handle that is known not to be `VK_NULL_HANDLE`.
///
/// This owns nothing and is `Copy`. The owning wrappers generated by
/// [`thin_handle!`](crate::thin_handle) are built on it.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct NonNull<Inner: RawHandle>(NonZero<u64>, PhantomData<Inner>);
impl<Inner: RawHandle> NonNull<Inner> {
    /// `None` for a null handle.
    pub fn new(handle: Inner) -> Option<Self> {
        NonZero::new(handle.as_raw()).map(|raw| Self(raw, PhantomData))
    }
    pub fn get(self) -> Inner {
        Inner::from_raw(self.0.get())
    }
}

/// A typed wrapper over exactly one non-null raw handle.
/// # Safety
/// `Self` must be `repr(transparent)` over a [`NonNull`]`<Self::Handle>`.
pub unsafe trait ThinHandle: Sized {
    type Handle: Copy + RawHandle;

    /// Size check shared by every reinterpreting method below.
    #[doc(hidden)]
    const SAME_SIZE: () = assert!(size_of::<Self>() == size_of::<Self::Handle>());

    /// Copy out the raw handle.
    /// # Safety
    /// Nothing done through the raw handle may leave the object in a state
    /// other than the one `Self` describes.
    unsafe fn handle(&self) -> Self::Handle {
        let () = Self::SAME_SIZE;
        unsafe { core::mem::transmute_copy(self) }
    }
    /// Give up the wrapper, usually to destroy the object.
    /// # Safety
    /// As [`ThinHandle::handle`].
    #[must_use = "dropping the raw handle leaks the object"]
    unsafe fn into_handle(self) -> Self::Handle {
        unsafe { self.handle() }
    }
    /// View a slice of wrappers as the raw handles Vulkan takes.
    /// # Safety
    /// As [`ThinHandle::handle`].
    unsafe fn handles_of(values: &[Self]) -> &[Self::Handle] {
        let () = Self::SAME_SIZE;
        // Same length, same layout.
        unsafe { core::slice::from_raw_parts(values.as_ptr().cast(), values.len()) }
    }
    /// Wrap a raw handle without checking it.
    /// # Safety
    /// The handle must not be null, and the object must be in the state
    /// `Self` describes.
    unsafe fn from_handle_unchecked(handle: Self::Handle) -> Self {
        let () = Self::SAME_SIZE;
        debug_assert!(!handle.is_null());
        unsafe { (&raw const handle).cast::<Self>().read() }
    }
    /// Wrap a raw handle, or `None` if it's null.
    /// # Safety
    /// The object must be in the state `Self` describes.
    unsafe fn from_handle(handle: Self::Handle) -> Option<Self> {
        (!handle.is_null()).then(|| unsafe { Self::from_handle_unchecked(handle) })
    }
    /// Reinterpret as a wrapper with another typestate.
    ///
    /// Wrappers usually offer a narrower, safe version of this. Reach for it
    /// when the state changed in a way the types couldn't follow:
    ///
    /// ```no_run
    /// # use vkheadless::*;
    /// let fence: Fence<Pending> = todo!();
    /// // The queue went idle, so every submission is done.
    /// let fence = unsafe { fence.with_state::<Fence<Signaled>>() };
    /// ```
    /// # Safety
    /// The object must be in the state `Other` describes.
    #[must_use = "dropping the handle leaks the object"]
    unsafe fn with_state<Other: ThinHandle<Handle = Self::Handle>>(self) -> Other {
        unsafe { Other::from_handle_unchecked(self.into_handle()) }
    }
}
