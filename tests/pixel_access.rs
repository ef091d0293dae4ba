// CPU access to the shared image: lock/unlock, blob access and descriptors.

use dmxp_bufferhub::Hub::Buffer::layout::usage;
use dmxp_bufferhub::Hub::Structs::PixelFormat;
use dmxp_bufferhub::{BufferBuilder, BufferHandle, Error};

const RW: u64 = usage::CPU_READ_OFTEN | usage::CPU_WRITE_OFTEN;

#[test]
fn lock_returns_address_of_requested_pixel() {
    let (_hub, handle) = BufferBuilder::new()
        .with_dimensions(4, 4)
        .with_format(PixelFormat::Rgba8888)
        .build_handle()
        .unwrap();

    let base = handle.lock(RW, 0, 0, 4, 4).unwrap();
    unsafe {
        // Pixel (1, 2): row 2, column 1, 4 bytes per pixel
        let pixel = base.as_ptr().add((2 * 4 + 1) * 4);
        pixel.copy_from_nonoverlapping([1u8, 2, 3, 4].as_ptr(), 4);
    }
    handle.unlock().unwrap();

    let pixel = handle.lock(usage::CPU_READ_OFTEN, 1, 2, 1, 1).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(pixel.as_ptr(), 4) };
    assert_eq!(bytes, &[1, 2, 3, 4]);
    handle.unlock().unwrap();
}

#[test]
fn overlapping_locks_are_refused() {
    let (_hub, handle) = BufferBuilder::new().build_handle().unwrap();

    handle.lock(RW, 0, 0, 1, 1).unwrap();
    let err = handle.lock(RW, 0, 0, 1, 1).unwrap_err();
    assert!(matches!(err, Error::LockFailed(_)));
    assert_eq!(err.errno(), -libc::EBUSY);

    handle.unlock().unwrap();
    assert!(matches!(handle.unlock(), Err(Error::LockFailed(_))));
}

#[test]
fn lock_rejects_bad_requests() {
    let (_hub, handle) = BufferBuilder::new().with_dimensions(8, 8).build_handle().unwrap();

    assert!(matches!(handle.lock(RW, 4, 4, 5, 1), Err(Error::LockFailed(_))));
    assert!(matches!(handle.lock(RW, 0, 8, 1, 1), Err(Error::LockFailed(_))));
    assert!(matches!(handle.lock(RW, 0, 0, 0, 1), Err(Error::LockFailed(_))));
    assert!(matches!(
        handle.lock(usage::GPU_TEXTURE, 0, 0, 1, 1),
        Err(Error::LockFailed(_))
    ));

    // None of the failures left a lock behind
    handle.lock(RW, 0, 0, 8, 8).unwrap();
    handle.unlock().unwrap();
}

#[test]
fn pixel_access_needs_import() {
    let hub = BufferBuilder::new().build_hub().unwrap();
    let handle = BufferHandle::new(Box::new(hub.connect().unwrap()));

    assert!(matches!(handle.lock(RW, 0, 0, 1, 1), Err(Error::NotImported)));
    assert!(matches!(handle.unlock(), Err(Error::NotImported)));
    assert!(matches!(
        handle.with_blob_read_write(4, |_| ()),
        Err(Error::NotImported)
    ));
}

#[test]
fn blob_writes_are_visible_to_consumers() {
    let (_hub, producer) = BufferBuilder::blob(4096).build_handle().unwrap();
    let mut consumer = BufferHandle::new(producer.create_consumer().unwrap());
    consumer.import().unwrap();

    producer
        .with_blob_read_write(5, |bytes| bytes.copy_from_slice(b"hello"))
        .unwrap();

    let seen = consumer
        .with_blob_read_write(5, |bytes| bytes.to_vec())
        .unwrap();
    assert_eq!(seen, b"hello");

    // The blob lock is gone once the call returns
    producer.lock(RW, 0, 0, 4096, 1).unwrap();
    producer.unlock().unwrap();
}

#[test]
fn blob_mapping_cannot_be_released_while_borrowed() {
    let (_hub, handle) = BufferBuilder::blob(16).build_handle().unwrap();

    let (unlock, relock, value) = handle
        .with_blob_read_write(16, |bytes| {
            let unlock = handle.unlock();
            let relock = handle.lock(RW, 0, 0, 16, 1);
            bytes[0] = 1;
            (unlock, relock, bytes[0])
        })
        .unwrap();

    assert!(matches!(unlock, Err(Error::LockFailed(ref e)) if e.raw_os_error() == Some(libc::EBUSY)));
    assert!(matches!(relock, Err(Error::LockFailed(ref e)) if e.raw_os_error() == Some(libc::EBUSY)));
    assert_eq!(value, 1);

    // Released on return
    assert!(handle.unlock().is_err());
    handle.lock(RW, 0, 0, 16, 1).unwrap();
    handle.unlock().unwrap();
}

#[test]
fn blob_mapping_is_released_after_panic() {
    let (_hub, handle) = BufferBuilder::blob(16).build_handle().unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: Result<(), Error> = handle.with_blob_read_write(16, |_| panic!("writer failed"));
    }));
    assert!(result.is_err());

    handle.lock(RW, 0, 0, 16, 1).unwrap();
    handle.unlock().unwrap();
}

#[cfg(target_pointer_width = "64")]
#[test]
fn oversized_blob_is_rejected_at_build() {
    let err = BufferBuilder::blob(u32::MAX as usize + 1).build_hub().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn blob_access_is_bounded_by_width() {
    let (_hub, handle) = BufferBuilder::blob(64).build_handle().unwrap();
    assert!(handle.with_blob_read_write(64, |b| b.len()).is_ok());
    assert!(matches!(
        handle.with_blob_read_write(65, |b| b.len()),
        Err(Error::LockFailed(_))
    ));
}

#[test]
fn blob_fds_are_capped() {
    let (_hub, handle) = BufferBuilder::blob(256).build_handle().unwrap();

    assert!(handle.blob_fds(0).is_empty());
    let fds = handle.blob_fds(8);
    assert_eq!(fds.len(), 1);
    assert!(fds[0] >= 0);
}
