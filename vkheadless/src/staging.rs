//! Getting bytes into (and out of) memory the host can't map.
//!
//! Each transfer goes through a temporary host-visible buffer that lives for
//! exactly one submission, and returns only once the device is done with it.
use crate::{
    Device, Error, Queue,
    buffer::Buffer,
    command_buffer::CommandPool,
    image::ImageResource,
    memory::HOST_MAPPABLE,
    resource::Resource,
    sync::barrier::{ImageState, NonZeroStageFlags, ReadWrite, Transfer, access_scopes},
    usage::{BufferUsage, ImageUsage, TransferSrc},
    vk,
};
#[cfg(feature = "alloc")]
use crate::{
    sync::barrier::{Host, Write},
    usage::TransferDst,
};
#[cfg(feature = "alloc")]
use alloc::{vec, vec::Vec};
use core::num::NonZero;

impl Device<'_> {
    /// Copy `data` to the start of `destination` through a staging buffer, then
    /// make it visible to `consumer`. Returns once the copy has completed.
    ///
    /// ```no_run
    /// # use vkheadless::{*, barrier::VertexInput};
    /// # let device: Device = todo!();
    /// # let mut pool: CommandPool = todo!();
    /// # let mut queue: Queue = todo!();
    /// # let vertices: Resource<Buffer<(Vertex, TransferDst)>> = todo!();
    /// let bytes = [0u8; 72];
    /// unsafe {
    ///     device.upload(&mut pool, &mut queue, &vertices, &bytes, VertexInput::ATTRIBUTE_READ)
    /// }
    /// .unwrap();
    /// ```
    /// # Panics
    /// If `data` is longer than `destination`.
    pub unsafe fn upload<Usage: BufferUsage>(
        &self,
        pool: &mut CommandPool,
        queue: &mut Queue,
        destination: &Resource<Buffer<Usage>>,
        data: &[u8],
        consumer: impl Into<ReadWrite>,
    ) -> Result<(), Error> {
        const {
            assert!(
                Usage::FLAGS.contains(vk::BufferUsageFlags::TRANSFER_DST),
                "upload destination lacks TransferDst usage"
            )
        };
        assert!(
            data.len() as u64 <= destination.size(),
            "{} bytes don't fit in a {} byte buffer",
            data.len(),
            destination.size()
        );
        let Some(len) = NonZero::new(data.len() as u64) else {
            return Ok(());
        };
        let consumer = consumer.into();
        let staging = self.create_buffer(TransferSrc, len, HOST_MAPPABLE, Some(data))?;
        let result = self.one_shot(pool, queue, |device, recording| {
            device
                .copy_buffer(
                    recording,
                    staging.handle(),
                    destination.handle(),
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: len.get(),
                    }],
                )
                .record_barrier(
                    recording,
                    destination.barrier(Transfer::WRITE, consumer).range(0, len),
                );
            Ok(())
        });
        self.retire_resource(staging, &result);
        if result.is_ok() {
            log::debug!("uploaded {len} bytes");
        }
        result
    }
    /// Read the first `len` bytes of `source` back through a staging buffer.
    /// `producer` are the writes to wait on before copying.
    /// # Panics
    /// If `len` is larger than `source`.
    #[cfg(feature = "alloc")]
    pub unsafe fn download<Usage: BufferUsage>(
        &self,
        pool: &mut CommandPool,
        queue: &mut Queue,
        source: &Resource<Buffer<Usage>>,
        len: u64,
        producer: Write,
    ) -> Result<Vec<u8>, Error> {
        const {
            assert!(
                Usage::FLAGS.contains(vk::BufferUsageFlags::TRANSFER_SRC),
                "download source lacks TransferSrc usage"
            )
        };
        assert!(
            len <= source.size(),
            "can't read {len} bytes from a {} byte buffer",
            source.size()
        );
        let Some(len) = NonZero::new(len) else {
            return Ok(Vec::new());
        };
        let staging = self.create_buffer(TransferDst, len, HOST_MAPPABLE, None)?;
        let result = self
            .one_shot(pool, queue, |device, recording| {
                device
                    .record_barrier(recording, source.barrier(producer, Transfer::READ))
                    .copy_buffer(
                        recording,
                        source.handle(),
                        staging.handle(),
                        &[vk::BufferCopy {
                            src_offset: 0,
                            dst_offset: 0,
                            size: len.get(),
                        }],
                    )
                    .record_barrier(recording, staging.barrier(Transfer::WRITE, Host::READ));
                Ok(())
            })
            .and_then(|()| {
                let mut bytes = vec![0; len.get() as usize];
                self.read_mapped(&staging, 0, &mut bytes)?;
                Ok(bytes)
            });
        self.retire_resource(staging, &result);
        if result.is_ok() {
            log::debug!("downloaded {len} bytes");
        }
        result
    }
    /// Fill all of `destination` with tightly packed texels from `data`, and
    /// leave it in `final_state` for use by `consumer_stages`.
    ///
    /// An unsupported `final_state` is rejected before anything is created.
    /// # Panics
    /// If `data` isn't exactly the size of the image.
    pub unsafe fn upload_image<Usage: ImageUsage>(
        &self,
        pool: &mut CommandPool,
        queue: &mut Queue,
        destination: &mut ImageResource<Usage>,
        data: &[u8],
        final_state: ImageState,
        consumer_stages: NonZeroStageFlags,
    ) -> Result<(), Error> {
        const {
            assert!(
                Usage::FLAGS.contains(vk::ImageUsageFlags::TRANSFER_DST),
                "upload destination lacks TransferDst usage"
            )
        };
        let expected =
            destination.extent().area() * u64::from(destination.format().texel_size());
        assert_eq!(
            data.len() as u64,
            expected,
            "image data must be tightly packed texels"
        );
        access_scopes(ImageState::TransferDst, final_state)?;
        let Some(len) = NonZero::new(expected) else {
            return Ok(());
        };
        let staging = self.create_buffer(TransferSrc, len, HOST_MAPPABLE, Some(data))?;
        // Whatever touched the image last has to be done with it.
        let previous_stages = if destination.state() == ImageState::Undefined {
            NonZeroStageFlags::TOP_OF_PIPE
        } else {
            NonZeroStageFlags::ALL_COMMANDS
        };
        let result = destination.rollback_on_error(|destination| {
            self.one_shot(pool, queue, |device, recording| {
                device
                    .transition(
                        recording,
                        destination,
                        ImageState::TransferDst,
                        previous_stages,
                        NonZeroStageFlags::TRANSFER,
                    )?
                    .copy_buffer_to_image(recording, staging.handle(), destination)
                    .transition(
                        recording,
                        destination,
                        final_state,
                        NonZeroStageFlags::TRANSFER,
                        consumer_stages,
                    )?;
                Ok(())
            })
        });
        self.retire_resource(staging, &result);
        if result.is_ok() {
            log::debug!(
                "uploaded {len} bytes into a {}x{} image",
                destination.extent().width(),
                destination.extent().height()
            );
        }
        result
    }
}
