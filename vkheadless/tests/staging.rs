//! Staged uploads and downloads against a real device.
mod common;

use anyhow::Result;
use core::num::NonZero;
use vkheadless::{
    barrier::{Transfer, UnsupportedTransition},
    *,
};

type Scratch = Buffer<(Storage, TransferSrc, TransferDst)>;

unsafe fn scratch(device: &Device, size: u64) -> Result<Resource<Scratch>> {
    Ok(device.create_buffer(
        (Storage, TransferSrc, TransferDst),
        NonZero::new(size).unwrap(),
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        None,
    )?)
}

#[test]
fn round_trip_through_device_memory() -> Result<()> {
    let Some(mut context) = common::context() else {
        return Ok(());
    };
    let (device, queue, pool) = context.split();
    // Not a multiple of four, to catch anything assuming word-sized copies.
    let data: Vec<u8> = (0..1021u32).map(|i| (i * 7 % 251) as u8).collect();
    unsafe {
        let buffer = scratch(&device, 2048)?;
        assert!(buffer.properties().contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
        device.upload(pool, queue, &buffer, &data, Transfer::READ)?;
        let read = device.download(pool, queue, &buffer, data.len() as u64, Transfer::WRITE)?;
        assert_eq!(read, data);
        device.destroy_resource(buffer);
    }
    unsafe { context.destroy() };
    Ok(())
}

#[test]
fn later_submissions_win() -> Result<()> {
    let Some(mut context) = common::context() else {
        return Ok(());
    };
    let (device, queue, pool) = context.split();
    unsafe {
        let buffer = scratch(&device, 256)?;
        device.upload(pool, queue, &buffer, &[0xAA; 256], Transfer::WRITE)?;
        device.upload(pool, queue, &buffer, &[0x55; 128], Transfer::WRITE)?;
        device.one_shot(pool, queue, |device, recording| {
            device.fill_buffer(
                recording,
                buffer.handle(),
                192,
                NonZero::new(64).unwrap(),
                0x0101_0101,
            );
            Ok(())
        })?;
        let read = device.download(pool, queue, &buffer, 256, Transfer::WRITE)?;
        assert!(read[..128].iter().all(|&b| b == 0x55));
        assert!(read[128..192].iter().all(|&b| b == 0xAA));
        assert!(read[192..].iter().all(|&b| b == 0x01));
        device.destroy_resource(buffer);
    }
    unsafe { context.destroy() };
    Ok(())
}

#[test]
fn empty_upload_is_a_no_op() -> Result<()> {
    let Some(mut context) = common::context() else {
        return Ok(());
    };
    let (device, queue, pool) = context.split();
    unsafe {
        let buffer = scratch(&device, 16)?;
        device.upload(pool, queue, &buffer, &[], Transfer::READ)?;
        assert!(device.download(pool, queue, &buffer, 0, Transfer::WRITE)?.is_empty());
        device.destroy_resource(buffer);
    }
    unsafe { context.destroy() };
    Ok(())
}

#[test]
fn host_visible_buffers_take_initial_data() -> Result<()> {
    let Some(mut context) = common::context() else {
        return Ok(());
    };
    let (device, queue, pool) = context.split();
    unsafe {
        let buffer = device.create_buffer(
            TransferSrc,
            NonZero::new(8).unwrap(),
            memory::HOST_MAPPABLE,
            Some(&[1, 2, 3, 4, 5, 6, 7, 8]),
        )?;
        assert!(buffer.is_host_visible());
        assert!(buffer.allocation_size() >= 8);
        let read = device.download(pool, queue, &buffer, 8, Transfer::WRITE)?;
        assert_eq!(read, [1, 2, 3, 4, 5, 6, 7, 8]);
        device.destroy_resource(buffer);
    }
    unsafe { context.destroy() };
    Ok(())
}

#[test]
fn impossible_memory_is_rejected_before_allocating() {
    let Some(context) = common::context() else {
        return;
    };
    let device = context.device();
    let result = unsafe {
        device.create_buffer(
            TransferSrc,
            NonZero::new(64).unwrap(),
            // No implementation has protected memory that the host can see.
            vk::MemoryPropertyFlags::PROTECTED | vk::MemoryPropertyFlags::HOST_VISIBLE,
            None,
        )
    };
    assert!(matches!(
        result,
        Err(AllocationFailed::NoCompatibleMemoryType(_))
    ));
    unsafe { context.destroy() };
}

#[test]
fn initial_data_needs_host_visible_memory() -> Result<()> {
    let Some(context) = common::context() else {
        return Ok(());
    };
    const CHUNK: u64 = 256 << 20;
    let device = context.device();
    let memory_type = unsafe {
        let fits = device.create_buffer(
            TransferDst,
            NonZero::new(CHUNK).unwrap(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            None,
        )?;
        let visible = fits.is_host_visible();
        let memory_type = fits.memory_type();
        device.destroy_resource(fits);
        if visible {
            eprintln!("skipping, device-local memory is host visible here");
            context.destroy();
            return Ok(());
        }
        memory_type
    };
    // Fail more often than the heap could hold chunks, so a failure that
    // kept its memory would run the heap dry.
    let properties = unsafe {
        context
            .instance()
            .get_physical_device_memory_properties(context.physical_device())
    };
    let heap = properties.memory_types[memory_type as usize].heap_index;
    let attempts = (properties.memory_heaps[heap as usize].size / CHUNK + 2).min(512);
    for _ in 0..attempts {
        let result = unsafe {
            device.create_buffer(
                TransferDst,
                NonZero::new(CHUNK).unwrap(),
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                Some(&[0x5A; 16]),
            )
        };
        assert!(matches!(
            result,
            Err(AllocationFailed::NotHostVisible { memory_type: rejected }) if rejected == memory_type
        ));
    }
    // Everything from the failed attempts was given back.
    unsafe {
        let fits = device.create_buffer(
            TransferDst,
            NonZero::new(CHUNK).unwrap(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            None,
        )?;
        device.destroy_resource(fits);
        context.destroy();
    }
    Ok(())
}

#[test]
fn unsupported_final_state_is_rejected_before_submission() -> Result<()> {
    let Some(mut context) = common::context() else {
        return Ok(());
    };
    let (device, queue, pool) = context.split();
    unsafe {
        let mut image = device.create_image(
            (TransferDst, Sampled),
            Extent2D::new(4, 4).unwrap(),
            format::R8G8B8A8_UNORM,
            vk::ImageTiling::OPTIMAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let result = device.upload_image(
            pool,
            queue,
            &mut image,
            &[0; 64],
            barrier::ImageState::Preinitialized,
            barrier::NonZeroStageFlags::FRAGMENT_SHADER,
        );
        assert_eq!(
            result,
            Err(Error::UnsupportedTransition(UnsupportedTransition {
                from: barrier::ImageState::TransferDst,
                to: barrier::ImageState::Preinitialized,
            }))
        );
        // Nothing was recorded, the tracked state is untouched.
        assert_eq!(image.state(), barrier::ImageState::Undefined);
        device.destroy_image(image);
    }
    unsafe { context.destroy() };
    Ok(())
}

#[test]
fn polling_eventually_sees_completion() -> Result<()> {
    let Some(mut context) = common::context() else {
        return Ok(());
    };
    let (device, queue, pool) = context.split();
    unsafe {
        let buffer = scratch(&device, 4096)?;
        let [mut command_buffer] = device.allocate_command_buffers::<1>(pool)?;
        let mut recording = device.begin_command_buffer(pool, &mut command_buffer)?;
        device.fill_buffer(
            &mut recording,
            buffer.handle(),
            0,
            NonZero::new(4096).unwrap(),
            0xDEAD_BEEF,
        );
        device.end_command_buffer(recording)?;

        let mut pending = device.submit(queue, &command_buffer)?;
        let mut polls = 0u32;
        loop {
            let timeout = if polls == 0 {
                Timeout::Poll
            } else {
                Timeout::Nanos(NonZero::new(1_000_000).unwrap())
            };
            match pending.wait_timeout(&device, timeout)? {
                FencePoll::Signaled(()) => break,
                FencePoll::Unsignaled(still) => pending = still,
            }
            polls += 1;
            assert!(polls < 10_000, "fill never completed");
        }
        device
            .free_command_buffers(pool, [command_buffer])
            .destroy_resource(buffer);
    }
    unsafe { context.destroy() };
    Ok(())
}
