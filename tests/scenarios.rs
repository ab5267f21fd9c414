//! End-to-end scenarios exercising the replica cache, streams, and view
//! algebra together through the public surface.

use std::sync::Arc;

use parking_lot::Mutex;

use weft::{
    DeviceKey, DeviceStream, Padding, Platform, PlatformBuilder, Tensor, Values, ValuesMut,
};

fn iota(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32).collect()
}

/// Writing through one of two views re-points the writer at a fresh
/// storage and leaves the other view's data untouched.
#[test]
fn scenario_copy_on_write_within_device() {
    let platform = Platform::default();
    let stream = DeviceStream::new(platform.host());

    let mut m0 = Tensor::matrix(&platform, [3, 2], &iota(6)).unwrap();
    // a read-write pointer with no mutation still advances the version
    m0.write_buffer(&stream).unwrap();

    let mut m1 = m0.clone();
    assert!(!m0.is_unique());

    // writing through m0 re-points it at a fresh storage; m1 keeps the old
    m0.write_buffer(&stream).unwrap();
    assert!(m0.is_unique());
    assert!(m1.is_unique());
    assert!(m0.storage().last_access_mutated_view());
    stream.block_until_idle().unwrap();

    assert_eq!(m0.value(&[1, 1]).unwrap(), 3.0);
    m1.set(&[1, 1], 7.0).unwrap();
    assert_eq!(m0.value(&[1, 1]).unwrap(), 3.0);
    assert_eq!(m1.value(&[1, 1]).unwrap(), 7.0);
}

/// Replicas migrate between devices only when a consumer touches stale
/// bytes; every scheduled transfer is accounted for.
#[test]
fn scenario_cross_device_migration() {
    let platform = PlatformBuilder::new().service("sim", 2).build();
    let d1 = platform.device(DeviceKey::new(1, 0)).unwrap();
    let d2 = platform.device(DeviceKey::new(1, 1)).unwrap();
    let s1 = DeviceStream::new(d1.clone());
    let s2 = DeviceStream::new(d2.clone());

    let mut t = Tensor::volume(&platform, [2, 3, 4], &iota(24)).unwrap();
    let bytes = t.storage().byte_size();
    let copies = |expected: usize| expected * bytes;

    // host reads of the host master move nothing
    t.host_values().unwrap();
    t.host_values().unwrap();
    assert_eq!(platform.copied_bytes(), copies(0));

    // first touch on d1 allocates and copies host → d1
    t.read_buffer(&s1).unwrap();
    assert_eq!(platform.copied_bytes(), copies(1));

    t.host_values().unwrap();
    assert_eq!(platform.copied_bytes(), copies(1));

    // d1 is current: promotion to master copies nothing
    t.write_buffer(&s1).unwrap();
    assert_eq!(platform.copied_bytes(), copies(1));

    // d2 is stale: peer copy d1 → d2
    t.read_buffer(&s2).unwrap();
    assert_eq!(platform.copied_bytes(), copies(2));

    // d1 is already master
    t.write_buffer(&s1).unwrap();
    assert_eq!(platform.copied_bytes(), copies(2));

    // the second write invalidated d2 again
    t.read_buffer(&s2).unwrap();
    assert_eq!(platform.copied_bytes(), copies(3));

    // d2 is current at the master version
    t.write_buffer(&s2).unwrap();
    assert_eq!(platform.copied_bytes(), copies(3));

    // master moved to d2, so d1 must be repaired
    t.write_buffer(&s1).unwrap();
    assert_eq!(platform.copied_bytes(), copies(4));

    t.write_buffer(&s2).unwrap();
    assert_eq!(platform.copied_bytes(), copies(5));

    // the host replica is stale: stage d2 → host
    let values: Vec<f32> = t.host_values().unwrap().collect();
    assert_eq!(platform.copied_bytes(), copies(6));
    assert_eq!(values, iota(24));

    s1.block_until_idle().unwrap();
    s2.block_until_idle().unwrap();
}

/// A repeated view broadcasts one row across the matrix without
/// materializing it.
#[test]
fn scenario_broadcast_by_repetition() {
    let platform = Platform::default();
    let row = Tensor::matrix(&platform, [1, 10], &iota(10)).unwrap();
    let big = Tensor::repeating(&[10, 10], &row).unwrap();

    assert_eq!(big.storage().count(), 10);
    assert_eq!(big.count(), 100);
    for r in 0..10 {
        for c in 0..10 {
            assert_eq!(big.value(&[r, c]).unwrap(), c as f32, "at ({r}, {c})");
        }
    }
}

/// Padded iteration synthesizes the pad value and flags positions.
#[test]
fn scenario_padded_iteration() {
    let platform = Platform::default();
    let v = Tensor::vector(&platform, &[1.0f32, 2.0, 3.0]).unwrap();
    let padded = v.padded(&[Padding::new(1, 2)], 0.0).unwrap();

    let values: Vec<f32> = padded.host_values().unwrap().collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);

    let steps: Vec<_> = padded.index_iter().collect();
    let pads: Vec<bool> = steps.iter().map(|s| s.pad).collect();
    assert_eq!(pads, vec![true, false, false, false, true, true]);
    let data: Vec<usize> = steps
        .iter()
        .filter(|s| !s.pad)
        .map(|s| s.data_index)
        .collect();
    assert_eq!(data, vec![0, 1, 2]);
}

/// Kernels on one stream run in FIFO order; a reader on another stream
/// observes their results through an explicit sync edge.
#[test]
fn scenario_stream_fifo_and_event_sync() {
    let platform = Platform::default();
    let a = DeviceStream::new(platform.host());
    let b = DeviceStream::new(platform.host());

    let mut u = Tensor::vector(&platform, &vec![0.0f32; 8]).unwrap();

    // fill(u, 1) on A
    let buffer = u.write_buffer(&a).unwrap();
    let iter = u.index_iter();
    a.enqueue(move || {
        ValuesMut::over(&buffer, iter, 0.0f32).fill(1.0);
        Ok(())
    });

    // add(u, 2) on A, FIFO-ordered after the fill
    let buffer = u.write_buffer(&a).unwrap();
    let iter = u.index_iter();
    a.enqueue(move || {
        ValuesMut::over(&buffer, iter, 0.0f32).update(|_, v| v + 2.0);
        Ok(())
    });

    // the reader on B sees both kernels only through the sync edge
    let edge = b.create_event();
    b.sync_with(&a, &edge);

    let buffer = u.read_buffer(&b).unwrap();
    let iter = u.index_iter();
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let observed = observed.clone();
        b.enqueue(move || {
            let values: Vec<f32> = Values::over(&buffer, iter, 0.0f32).collect();
            observed.lock().extend(values);
            Ok(())
        });
    }
    b.block_until_idle().unwrap();
    a.block_until_idle().unwrap();

    let observed = observed.lock();
    assert_eq!(observed.len(), 8);
    assert!(observed.iter().all(|&v| v == 3.0), "{observed:?}");
}

/// Column-major imports iterate row-major.
#[test]
fn scenario_column_major_import() {
    let platform = Platform::default();
    let elements = [0.0f32, 2.0, 4.0, 1.0, 3.0, 5.0];
    let m = Tensor::matrix_column_major(&platform, [3, 2], &elements).unwrap();
    let values: Vec<f32> = m.host_values().unwrap().collect();
    assert_eq!(values, iota(6));
}

/// Cross-service discrete replicas stage through the host in a pinned
/// master-to-host, host-to-target order.
#[test]
fn scenario_cross_service_staging() {
    let platform = PlatformBuilder::new()
        .service("alpha", 1)
        .service("beta", 1)
        .build();
    let a = platform.device(DeviceKey::new(1, 0)).unwrap();
    let b = platform.device(DeviceKey::new(2, 0)).unwrap();
    let sa = DeviceStream::new(a.clone());
    let sb = DeviceStream::new(b.clone());

    let mut t = Tensor::vector(&platform, &iota(16)).unwrap();
    let bytes = t.storage().byte_size();

    // move the master onto the alpha device
    t.write_buffer(&sa).unwrap();
    sa.block_until_idle().unwrap();
    let before = platform.copied_bytes();

    // alpha → beta has no peer path: two scheduled copies through the host
    t.read_buffer(&sb).unwrap();
    sb.block_until_idle().unwrap();
    assert_eq!(platform.copied_bytes() - before, 2 * bytes);
    assert_eq!(
        t.storage().replica_version(platform.host().key()),
        Some(t.storage().master_version()),
        "staging leaves the host replica current",
    );

    let values: Vec<f32> = t.host_values().unwrap().collect();
    assert_eq!(values, iota(16));
}

/// A poisoned stream skips queued work and surfaces its first failure at
/// the next join; an intact stream is unaffected.
#[test]
fn scenario_stream_poisoning() {
    let platform = Platform::default();
    let poisoned = DeviceStream::new(platform.host());
    let healthy = DeviceStream::new(platform.host());

    poisoned.throw_test_error();
    let mut t = Tensor::vector(&platform, &iota(4)).unwrap();
    let buffer = t.write_buffer(&poisoned).unwrap();
    let iter = t.index_iter();
    poisoned.enqueue(move || {
        ValuesMut::over(&buffer, iter, 0.0f32).fill(9.0);
        Ok(())
    });
    assert!(poisoned.block_until_idle().is_err());

    // the poisoned write surfaces its failure at the blocking host fetch
    assert!(t.value(&[0]).is_err());

    // an intact stream is unaffected
    let mut u = Tensor::vector(&platform, &iota(4)).unwrap();
    u.write_buffer(&healthy).unwrap();
    healthy.block_until_idle().unwrap();
    assert_eq!(u.value(&[0]).unwrap(), 0.0);
}
