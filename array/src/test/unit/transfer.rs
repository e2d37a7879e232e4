use test_case::test_case;

use crate::test::helpers::{bytes_of, device, device_bytes, on, session, write_device};
use crate::{Error, Location, MirrorArray, TransferOptions, TransferOutcome};

#[test]
fn test_first_push_transfers_once() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i32, 2, 3, 4]);

    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Skipped);
    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Skipped);

    assert_eq!(runtime.stats().copies_in, 1);
    assert!(a.is_copied(on(0)));
    assert!(!a.is_dirty(on(0)));
}

#[test]
fn test_mutation_then_push_transfers_again() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i32, 2, 3, 4]);

    a.push_to_device(None, TransferOptions::default()).unwrap();
    a.set(0, 9).unwrap();
    assert!(a.is_dirty(on(0)));

    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(runtime.stats().copies_in, 2);
    assert_eq!(device_bytes(&a, None), bytes_of(&[9i32, 2, 3, 4]));
}

#[test]
fn test_push_reuses_buffer() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![0.5f64; 8]);

    a.push_to_device(None, TransferOptions::default()).unwrap();
    let first = a.device_buffer(None).unwrap();
    a.fill(1.5);
    a.push_to_device(None, TransferOptions::default()).unwrap();

    assert!(first.ptr_eq(&a.device_buffer(None).unwrap()));
    assert_eq!(runtime.stats().allocations, 1);
    assert_eq!(first.size(), 8 * std::mem::size_of::<f64>());
}

#[test]
fn test_force_bypasses_check() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1u8, 2, 3]);

    a.push_to_device(None, TransferOptions::default()).unwrap();
    assert_eq!(a.push_to_device(None, TransferOptions::forced()).unwrap(), TransferOutcome::Completed);
    assert_eq!(runtime.stats().copies_in, 2);

    a.pull_to_host(None, TransferOptions::default()).unwrap();
    assert_eq!(a.pull_to_host(None, TransferOptions::default()).unwrap(), TransferOutcome::Skipped);
    assert_eq!(a.pull_to_host(None, TransferOptions::forced()).unwrap(), TransferOutcome::Completed);
    assert_eq!(runtime.stats().copies_out, 2);
}

#[test]
fn test_round_trip_through_device_write() {
    let (_, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1.0f32, 2.0, 3.0]);

    a.push_to_device(None, TransferOptions::default()).unwrap();
    write_device(&a, None, &[7.0f32, 8.0, 9.0]);
    a.mark_device_mutated(None).unwrap();
    assert!(a.is_dirty(Location::Host));

    assert_eq!(a.pull_to_host(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(a.to_vec(), vec![7.0, 8.0, 9.0]);
    assert!(!a.is_dirty(Location::Host));
    assert!(!a.is_dirty(on(0)));
}

#[test]
fn test_pull_writes_host_in_place() {
    let (_, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i64, 2, 3, 4]);
    let tail = a.slice(2..).unwrap();

    a.push_to_device(None, TransferOptions::default()).unwrap();
    write_device(&a, None, &[5i64, 6, 7, 8]);
    a.pull_to_host(None, TransferOptions::forced()).unwrap();

    assert_eq!(tail.to_vec(), vec![7, 8]);
}

#[test]
fn test_pull_overwrites_unpushed_host_edits() {
    let (_, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1u16, 2]);

    a.push_to_device(None, TransferOptions::default()).unwrap();
    a.set(1, 42).unwrap();
    a.pull_to_host(None, TransferOptions::default()).unwrap();

    assert_eq!(a.to_vec(), vec![1, 2]);
    // Host and device agree again.
    assert!(!a.is_dirty(on(0)));
    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Skipped);
}

#[test]
fn test_pull_marks_other_devices_stale() {
    let (runtime, session) = session();
    let gpu0 = device(&session, 0);
    let gpu1 = device(&session, 1);
    let a = MirrorArray::from_vec(&session, vec![1i32, 2, 3, 4]);

    a.push_to_device(Some(&gpu0), TransferOptions::default()).unwrap();
    a.set(0, 9).unwrap();
    a.push_to_device(Some(&gpu1), TransferOptions::default()).unwrap();

    a.pull_to_host(Some(&gpu0), TransferOptions::default()).unwrap();
    assert_eq!(a.to_vec(), vec![1, 2, 3, 4]);
    assert!(!a.is_dirty(on(0)));
    assert!(a.is_dirty(on(1)));

    assert_eq!(a.push_to_device(Some(&gpu0), TransferOptions::default()).unwrap(), TransferOutcome::Skipped);
    assert_eq!(a.push_to_device(Some(&gpu1), TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(device_bytes(&a, Some(&gpu1)), bytes_of(&[1i32, 2, 3, 4]));
    assert_eq!(runtime.stats().copies_in, 3);
}

#[test]
fn test_pull_before_push_is_missing_buffer() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i32, 2]);

    let err = a.pull_to_host(None, TransferOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MissingBuffer { .. }));
    assert_eq!(runtime.stats().copies_out, 0);

    let err = a.mark_device_mutated(None).unwrap_err();
    assert!(matches!(err, Error::MissingBuffer { .. }));
}

#[test]
fn test_deferred_push() {
    let (_, session) = session();
    let a = MirrorArray::from_vec(&session, vec![3u32; 64]);

    assert_eq!(a.push_to_device(None, TransferOptions::deferred()).unwrap(), TransferOutcome::Deferred);
    assert_eq!(a.pending_transfers(), 1);
    // Bits are cleared at issue time.
    assert_eq!(a.push_to_device(None, TransferOptions::deferred()).unwrap(), TransferOutcome::Skipped);

    a.wait_all().unwrap();
    assert_eq!(a.pending_transfers(), 0);
    a.wait_all().unwrap();
    assert_eq!(device_bytes(&a, None), bytes_of(&[3u32; 64]));
}

#[test]
fn test_deferred_transfers_are_shared_by_views() {
    let (_, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i8, 2, 3, 4]);
    let b = a.slice(..2).unwrap();

    b.push_to_device(None, TransferOptions::deferred()).unwrap();
    assert_eq!(a.pending_transfers(), 1);
    a.wait_all().unwrap();
    assert_eq!(b.pending_transfers(), 0);
}

#[test]
fn test_failed_deferred_push_is_rolled_back() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i32, 2, 3, 4]);

    runtime.fail_next_transfers(1);
    assert_eq!(a.push_to_device(None, TransferOptions::deferred()).unwrap(), TransferOutcome::Deferred);
    assert!(!a.is_dirty(on(0)));

    let err = a.wait_all().unwrap_err();
    assert!(matches!(err, Error::Transfer { location, .. } if location == on(0)));
    assert!(a.is_dirty(on(0)));
    assert_eq!(a.pending_transfers(), 0);

    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(device_bytes(&a, None), bytes_of(&[1i32, 2, 3, 4]));
}

#[test]
fn test_wait_all_reports_first_failure_and_waits_the_rest() {
    let (runtime, session) = session();
    let gpu0 = device(&session, 0);
    let gpu1 = device(&session, 1);
    let a = MirrorArray::from_vec(&session, vec![5u8; 16]);

    runtime.fail_next_transfers(1);
    a.push_to_device(Some(&gpu0), TransferOptions::deferred()).unwrap();
    a.push_to_device(Some(&gpu1), TransferOptions::deferred()).unwrap();

    assert!(a.wait_all().is_err());
    assert!(a.is_dirty(on(0)));
    assert!(!a.is_dirty(on(1)));
    assert_eq!(device_bytes(&a, Some(&gpu1)), vec![5u8; 16]);
}

#[test_case(true ; "push")]
#[test_case(false ; "pull")]
fn test_failed_blocking_transfer_leaves_destination_dirty(push: bool) {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1u64, 2]);
    a.push_to_device(None, TransferOptions::default()).unwrap();
    a.set(0, 10).unwrap();

    runtime.fail_next_transfers(1);
    let (result, location) = if push {
        (a.push_to_device(None, TransferOptions::default()), on(0))
    } else {
        (a.pull_to_host(None, TransferOptions::default()), Location::Host)
    };

    assert!(matches!(result, Err(Error::Transfer { location: l, .. }) if l == location));
    assert!(a.is_dirty(location));
}

#[test]
fn test_pull_after_failed_first_push_is_missing_buffer() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i32, 2, 3, 4]);

    runtime.fail_next_transfers(1);
    assert!(a.push_to_device(None, TransferOptions::default()).is_err());
    assert!(!a.is_copied(on(0)));

    let err = a.pull_to_host(None, TransferOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MissingBuffer { .. }));
    assert_eq!(a.to_vec(), vec![1, 2, 3, 4]);
    assert_eq!(runtime.stats().copies_out, 0);
}

#[test]
fn test_pull_after_failed_repush_is_missing_buffer() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i32, 2, 3, 4]);
    a.push_to_device(None, TransferOptions::default()).unwrap();
    a.set(3, 40).unwrap();

    runtime.fail_next_transfers(1);
    assert!(a.push_to_device(None, TransferOptions::deferred()).is_ok());
    assert!(a.wait_all().is_err());

    // The device content is unknown after the failed copy.
    assert!(matches!(a.pull_to_host(None, TransferOptions::forced()), Err(Error::MissingBuffer { .. })));
    assert_eq!(a.to_vec(), vec![1, 2, 3, 40]);

    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(a.pull_to_host(None, TransferOptions::forced()).unwrap(), TransferOutcome::Completed);
    assert_eq!(a.to_vec(), vec![1, 2, 3, 40]);
}

#[test]
fn test_devices_are_tracked_independently() {
    let (runtime, session) = session();
    let gpu0 = device(&session, 0);
    let gpu1 = device(&session, 1);
    let a = MirrorArray::from_vec(&session, vec![1i16, 2, 3]);

    a.push_to_device(Some(&gpu0), TransferOptions::default()).unwrap();
    assert!(a.is_dirty(on(1)));
    assert_eq!(a.push_to_device(Some(&gpu1), TransferOptions::default()).unwrap(), TransferOutcome::Completed);

    a.set(2, 30).unwrap();
    assert!(a.is_dirty(on(0)));
    assert!(a.is_dirty(on(1)));

    a.push_to_device(Some(&gpu1), TransferOptions::default()).unwrap();
    assert!(a.is_dirty(on(0)));
    assert!(!a.is_dirty(on(1)));
    assert_eq!(runtime.stats().copies_in, 3);
    assert_eq!(session.registry().cached_queues(), 2);
}

#[test]
fn test_release_device_drops_buffer() {
    let (runtime, session) = session();
    let a = MirrorArray::from_vec(&session, vec![1i32; 4]);

    a.push_to_device(None, TransferOptions::default()).unwrap();
    assert!(a.release_device(None));
    assert!(a.device_buffer(None).is_none());
    assert!(!a.is_copied(on(0)));
    assert!(!a.release_device(None));

    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(runtime.stats().allocations, 2);
    // The released buffer was recycled by the allocator.
    assert_eq!(runtime.allocator().cache_count(16), 0);
}

#[test]
fn test_outcome_transferred() {
    assert!(TransferOutcome::Completed.transferred());
    assert!(TransferOutcome::Deferred.transferred());
    assert!(!TransferOutcome::Skipped.transferred());
    assert!(!TransferOutcome::NoDevice.transferred());
}

#[test]
fn test_options() {
    assert_eq!(TransferOptions::default(), TransferOptions { wait: true, force: false });
    assert_eq!(TransferOptions::deferred().with_force(true), TransferOptions { wait: false, force: true });
    assert_eq!(TransferOptions::forced().with_wait(false), TransferOptions { wait: false, force: true });
}
