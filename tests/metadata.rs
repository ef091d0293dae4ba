// User metadata capacity negotiation and the bounds-checked metadata view.

use dmxp_bufferhub::{BufferBuilder, BufferHandle, Error};

#[test]
fn capacity_law_holds_for_random_sizes() {
    let capacity = 64;
    let (_hub, handle) = BufferBuilder::new()
        .with_user_metadata_size(capacity)
        .build_handle()
        .unwrap();
    assert_eq!(handle.user_metadata_size(), capacity);

    let mut rng = fastrand::Rng::with_seed(0x5eed);
    for _ in 0..1000 {
        let requested = rng.usize(0..=capacity * 4);
        let result = handle.check_metadata(requested);
        if requested <= capacity {
            assert!(result.is_ok(), "{requested} bytes should fit in {capacity}");
        } else {
            assert!(
                matches!(result, Err(Error::MetadataTooLarge { requested: r, max }) if r == requested && max == capacity),
                "{requested} bytes should not fit in {capacity}"
            );
        }
    }

    assert!(handle.check_metadata(capacity).is_ok());
    assert!(handle.check_metadata(capacity + 1).is_err());
}

#[test]
fn buffer_without_user_metadata_rejects_any() {
    let (_hub, handle) = BufferBuilder::new().build_handle().unwrap();
    assert_eq!(handle.user_metadata_size(), 0);

    assert!(handle.check_metadata(0).is_ok());
    for requested in [1, 2, 31, 4096] {
        assert!(matches!(
            handle.check_metadata(requested),
            Err(Error::UnsupportedMetadata)
        ));
    }
    assert!(matches!(
        handle.write_user_metadata(b"x"),
        Err(Error::UnsupportedMetadata)
    ));
    assert!(handle.write_user_metadata(&[]).is_ok());
}

#[test]
fn check_metadata_zero_always_succeeds() {
    let hub = BufferBuilder::new().with_user_metadata_size(8).build_hub().unwrap();
    let mut handle = BufferHandle::new(Box::new(hub.connect().unwrap()));
    assert!(handle.check_metadata(0).is_ok());
    assert!(matches!(handle.check_metadata(1), Err(Error::UnsupportedMetadata)));

    handle.import().unwrap();
    assert!(handle.check_metadata(0).is_ok());
    assert!(handle.check_metadata(8).is_ok());
}

#[test]
fn user_metadata_is_shared_between_handles() {
    let (_hub, producer) = BufferBuilder::new()
        .with_user_metadata_size(16)
        .build_handle()
        .unwrap();
    let mut consumer = BufferHandle::new(producer.create_consumer().unwrap());
    consumer.import().unwrap();

    producer.write_user_metadata(b"frame-0042").unwrap();

    let mut seen = [0u8; 10];
    consumer.read_user_metadata(&mut seen).unwrap();
    assert_eq!(&seen, b"frame-0042");

    let mut too_big = [0u8; 17];
    assert!(matches!(
        consumer.read_user_metadata(&mut too_big),
        Err(Error::MetadataTooLarge { requested: 17, max: 16 })
    ));
}

#[test]
fn user_metadata_does_not_touch_the_header() {
    let (hub, handle) = BufferBuilder::new()
        .with_user_metadata_size(32)
        .build_handle()
        .unwrap();
    let before = (handle.buffer_state(), handle.fence_state(), handle.queue_index());

    handle.write_user_metadata(&[0xFF; 32]).unwrap();

    assert_eq!(
        (handle.buffer_state(), handle.fence_state(), handle.queue_index()),
        before
    );
    assert_eq!(handle.active_clients_bit_mask(), Some(hub.active_clients()));
}
