//! Device memory: picking a memory type, allocating, binding, and mapping.
use super::{AllocationError, Device, ThinHandle, vk};
use core::ffi::c_void;
use tinyvec::ArrayVec;

/// No memory type of the device is both allowed for a resource and has every
/// required property.
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
#[error("no memory type in {type_bits:#034b} has properties {required:?}")]
pub struct NoCompatibleMemoryType {
    /// The `memoryTypeBits` of the resource's requirements.
    pub type_bits: u32,
    /// The properties that were asked for.
    pub required: vk::MemoryPropertyFlags,
}

/// The property flags of each memory type of a physical device, in index
/// order.
#[derive(Clone, Debug, Default)]
pub struct MemoryTypes(ArrayVec<[vk::MemoryPropertyFlags; vk::MAX_MEMORY_TYPES]>);
impl MemoryTypes {
    /// Read the memory types out of the properties reported by
    /// `vkGetPhysicalDeviceMemoryProperties`.
    pub fn from_properties(properties: &vk::PhysicalDeviceMemoryProperties) -> Self {
        Self::from_flags(
            properties
                .memory_types_as_slice()
                .iter()
                .map(|ty| ty.property_flags),
        )
    }
    /// Build the table directly. Anything past [`vk::MAX_MEMORY_TYPES`] is
    /// ignored, no device reports that many.
    pub fn from_flags(flags: impl IntoIterator<Item = vk::MemoryPropertyFlags>) -> Self {
        Self(flags.into_iter().take(vk::MAX_MEMORY_TYPES).collect())
    }
    /// Number of memory types.
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// The properties of the memory type at `index`, if it exists.
    pub fn properties(&self, index: u32) -> Option<vk::MemoryPropertyFlags> {
        self.0.get(index as usize).copied()
    }
    /// Find the memory type for a resource.
    ///
    /// `type_bits` is the `memoryTypeBits` of the resource's
    /// [`vk::MemoryRequirements`], bit `i` set meaning type `i` may back it.
    /// The lowest index which is allowed and has every flag of `required` wins.
    /// Implementations order their types from most to least preferable, so
    /// there's no point in being clever about it.
    pub fn resolve(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32, NoCompatibleMemoryType> {
        self.0
            .iter()
            .zip(0u32..)
            .find(|&(flags, index)| type_bits & (1 << index) != 0 && flags.contains(required))
            .map(|(_, index)| index)
            .ok_or(NoCompatibleMemoryType {
                type_bits,
                required,
            })
    }
}

/// Host-visible memory that needs no flushing, what staging and readback
/// resources live in.
pub const HOST_MAPPABLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

crate::thin_handle!(
    /// An allocation of continuous memory, accessible by the device.
    #[must_use = "dropping the handle will not free the memory and may leak resources"]
    pub struct Memory(vk::DeviceMemory);
);

/// Represents a resource with no backing memory assigned.
///
/// The uses of resources in this state are extremely limited, effectively
/// limited to memory management APIs, and memory must be bound before they can
/// be used for anything else. This is a temporary state, and is thus
/// represented as an external wrapper instead of an internal typestate on the
/// underlying handle.
#[repr(transparent)]
pub struct Virtual<V: NeedsMemory>(V);
impl<V: NeedsMemory> Virtual<V> {
    /// Wrap a freshly created handle.
    pub(crate) fn new(handle: V) -> Self {
        Self(handle)
    }
    /// Assume the virtual resource has had a complete, contiguous, and
    /// satisfactory range of memory bound to it through external APIs.
    pub unsafe fn assume_backed(self) -> V {
        self.0
    }
}
// Safety: repr(transparent) over repr(transparent) over Handle. X3
unsafe impl<V: NeedsMemory> ThinHandle for Virtual<V> {
    type Handle = V::Handle;
}
// Yes this technically allows for `Virtual<Virtual<Virtual<....>>>` but it
// works as intended so w/e. You can't construct that anyways.
impl<V: NeedsMemory> NeedsMemory for Virtual<V> {
    unsafe fn memory_requirements(&self, device: &Device) -> vk::MemoryRequirements {
        self.0.memory_requirements(device)
    }
    unsafe fn bind_memory(
        &self,
        device: &Device,
        memory: &Memory,
        offset: u64,
    ) -> Result<(), AllocationError> {
        self.0.bind_memory(device, memory, offset)
    }
    unsafe fn destroy(self, device: &Device) {
        self.0.destroy(device)
    }
}

/// Trait for handles that require vulkan memory to be bound to them, `Images`
/// and `Buffers`.
pub trait NeedsMemory: ThinHandle {
    unsafe fn memory_requirements(&self, device: &Device) -> vk::MemoryRequirements;
    /// Bind `memory` at `offset`. Only valid once per handle.
    unsafe fn bind_memory(
        &self,
        device: &Device,
        memory: &Memory,
        offset: u64,
    ) -> Result<(), AllocationError>;
    /// Destroy the handle. Any memory bound to it stays allocated.
    unsafe fn destroy(self, device: &Device);
}

impl Device<'_> {
    /// Allocate `size` bytes of the given memory type.
    pub unsafe fn allocate_memory(
        &self,
        size: u64,
        memory_type: u32,
    ) -> Result<Memory, AllocationError> {
        self.ash
            .allocate_memory(
                &vk::MemoryAllocateInfo::default()
                    .allocation_size(size)
                    .memory_type_index(memory_type),
                None,
            )
            .map(|handle| Memory::from_handle_unchecked(handle))
            .map_err(AllocationError::from_vk)
    }
    /// Free an allocation. Anything bound to it must be destroyed first, or at
    /// least never used again.
    pub unsafe fn free_memory(&self, memory: Memory) -> &Self {
        self.ash.free_memory(memory.into_handle(), None);
        self
    }
    /// Map the whole allocation into host address space. The memory must be
    /// host-visible and not already mapped.
    pub unsafe fn map_memory(&self, memory: &Memory) -> Result<*mut c_void, vk::Result> {
        self.ash
            .map_memory(memory.handle(), 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
    }
    pub unsafe fn unmap_memory(&self, memory: &Memory) -> &Self {
        self.ash.unmap_memory(memory.handle());
        self
    }
    /// Make host writes to a mapped, non-coherent allocation available to the
    /// device.
    pub unsafe fn flush_memory(&self, memory: &Memory) -> Result<(), AllocationError> {
        self.ash
            .flush_mapped_memory_ranges(&[vk::MappedMemoryRange::default()
                .memory(memory.handle())
                .offset(0)
                .size(vk::WHOLE_SIZE)])
            .map_err(AllocationError::from_vk)
    }
    /// Make device writes to a mapped, non-coherent allocation visible to the
    /// host.
    pub unsafe fn invalidate_memory(&self, memory: &Memory) -> Result<(), AllocationError> {
        self.ash
            .invalidate_mapped_memory_ranges(&[vk::MappedMemoryRange::default()
                .memory(memory.handle())
                .offset(0)
                .size(vk::WHOLE_SIZE)])
            .map_err(AllocationError::from_vk)
    }
}
