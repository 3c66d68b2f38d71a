//! `vk*UsageFlags`, at compile time.
//!
//! Usages are zero-sized markers that become part of a resource's type, e.g.
//! `Buffer<(Vertex, TransferDst)>`. Operations that need a usage check it with
//! an inline `const` assertion, so passing a buffer without `TransferDst` to
//! [`Device::upload`](crate::Device::upload) fails to compile rather than
//! tripping the validation layers at runtime.
use super::vk;

/// The buffer usages of a marker or tuple of markers, e.g.
/// `(Storage, Vertex, TransferDst)`.
pub trait BufferUsage: 'static {
    const FLAGS: vk::BufferUsageFlags;
}
/// The image usages of a marker or tuple of markers, e.g.
/// `(ColorAttachment, TransferSrc)`.
pub trait ImageUsage: 'static {
    const FLAGS: vk::ImageUsageFlags;
}

/// Declare usage markers along with the buffer and/or image flag each one
/// stands for.
macro_rules! usages {
    ($($(#[$attr:meta])* $name:ident { $(buffer: $buffer:ident,)? $(image: $image:ident,)? })*) => {
        $(
            $(#[$attr])*
            #[derive(Clone, Copy, Debug)]
            pub struct $name;
            $(impl BufferUsage for $name {
                const FLAGS: vk::BufferUsageFlags = vk::BufferUsageFlags::$buffer;
            })?
            $(impl ImageUsage for $name {
                const FLAGS: vk::ImageUsageFlags = vk::ImageUsageFlags::$image;
            })?
        )*
    };
}
usages! {
    /// Bindable with [`Device::bind_index_buffer`](crate::Device::bind_index_buffer).
    Index { buffer: INDEX_BUFFER, }
    /// Bindable with [`Device::bind_vertex_buffers`](crate::Device::bind_vertex_buffers).
    Vertex { buffer: VERTEX_BUFFER, }
    /// Read and written directly by shaders.
    Storage { buffer: STORAGE_BUFFER, image: STORAGE, }
    /// The source of copies, including captures.
    TransferSrc { buffer: TRANSFER_SRC, image: TRANSFER_SRC, }
    /// The destination of copies and fills, including uploads.
    TransferDst { buffer: TRANSFER_DST, image: TRANSFER_DST, }
    /// Read through a sampler.
    Sampled { image: SAMPLED, }
    ColorAttachment { image: COLOR_ATTACHMENT, }
    DepthStencilAttachment { image: DEPTH_STENCIL_ATTACHMENT, }
}

impl<A: BufferUsage> BufferUsage for (A,) {
    const FLAGS: vk::BufferUsageFlags = A::FLAGS;
}
impl<A: ImageUsage> ImageUsage for (A,) {
    const FLAGS: vk::ImageUsageFlags = A::FLAGS;
}
// Larger tuples are the union of their members.
crate::flag_combinations! {
    impl BufferUsage for [(A,B), (A,B,C), (A,B,C,D), (A,B,C,D,E)] {
        const FLAGS : vk::BufferUsageFlags;
    }
}
crate::flag_combinations! {
    impl ImageUsage for [(A,B), (A,B,C), (A,B,C,D), (A,B,C,D,E)] {
        const FLAGS : vk::ImageUsageFlags;
    }
}

/// Usages an image view can be created for. An image with none of these (say,
/// a pure `TransferDst` readback target) gets no view.
pub const VIEWABLE_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::INPUT_ATTACHMENT.as_raw(),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_union_their_members() {
        assert_eq!(
            <(Vertex, TransferDst)>::FLAGS,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
        assert_eq!(
            <(ColorAttachment, TransferSrc)>::FLAGS,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC
        );
        assert_eq!(<(Index,)>::FLAGS, Index::FLAGS);
    }

    #[test]
    fn readback_targets_are_not_viewable() {
        assert!(!<TransferDst as ImageUsage>::FLAGS.intersects(VIEWABLE_IMAGE_USAGE));
        assert!(<(ColorAttachment, TransferSrc)>::FLAGS.intersects(VIEWABLE_IMAGE_USAGE));
    }
}
