use std::rc::Rc;
use std::sync::Arc;

use mirror_device::{CpuRuntime, DeviceConfig, DeviceId, DeviceKind, DeviceRegistry};

use crate::test::helpers::{device, session, session_with};
use crate::{MirrorArray, Session, TransferOptions, TransferOutcome};

#[test]
fn test_default_device_is_first_gpu() {
    let (_, session) = session();
    let device = session.default_device().unwrap();
    assert_eq!(device.id, DeviceId(0));
    assert_eq!(device.kind, DeviceKind::Gpu);
    assert!(session.has_device());
}

#[test]
fn test_configured_device() {
    let (_, session) = session_with(DeviceConfig::builder().kind(DeviceKind::Cpu).build());
    assert_eq!(session.default_device().unwrap().name, "Host CPU");

    let (_, session) = session_with(DeviceConfig::from_values(Some("1"), None));
    assert_eq!(session.default_device().unwrap().id, DeviceId(1));
}

#[test]
fn test_unknown_device_falls_back_to_no_device_mode() {
    let (runtime, session) = session_with(DeviceConfig::builder().name("tpu".to_string()).build());
    assert!(!session.has_device());

    let a = MirrorArray::from_vec(&session, vec![1i32, 2, 3, 4]);
    assert_eq!(a.push_to_device(None, TransferOptions::default()).unwrap(), TransferOutcome::NoDevice);
    assert_eq!(a.pull_to_host(None, TransferOptions::forced()).unwrap(), TransferOutcome::NoDevice);
    assert!(a.device_buffer(None).is_none());
    a.mark_device_mutated(None).unwrap();
    assert!(!a.release_device(None));
    a.wait_all().unwrap();

    // Host-only arrays still work.
    a.set(0, 5).unwrap();
    assert_eq!(a.to_vec(), vec![5, 2, 3, 4]);
    assert_eq!(runtime.stats().copies_in, 0);
}

#[test]
fn test_explicit_device_in_no_device_mode() {
    let runtime = CpuRuntime::with_devices([("Host CPU", DeviceKind::Cpu)]);
    let session = Rc::new(Session::new(Arc::new(runtime.clone()), DeviceConfig::default()).unwrap());
    assert!(!session.has_device());

    let cpu = device(&session, 0);
    let a = MirrorArray::from_vec(&session, vec![1u8, 2]);
    assert_eq!(a.push_to_device(Some(&cpu), TransferOptions::default()).unwrap(), TransferOutcome::Completed);
    assert_eq!(runtime.stats().copies_in, 1);
}

#[test]
fn test_sessions_share_registry_queues() {
    let runtime = CpuRuntime::new();
    let registry = Arc::new(DeviceRegistry::new(Arc::new(runtime.clone())));
    let first = Rc::new(Session::with_registry(Arc::clone(&registry), DeviceConfig::default()).unwrap());
    let second = Rc::new(Session::with_registry(Arc::clone(&registry), DeviceConfig::default()).unwrap());

    MirrorArray::from_vec(&first, vec![1u8]).push_to_device(None, TransferOptions::default()).unwrap();
    MirrorArray::from_vec(&second, vec![2u8]).push_to_device(None, TransferOptions::default()).unwrap();

    assert_eq!(registry.cached_queues(), 1);
    assert_eq!(runtime.stats().queues, 1);
    // Identity caches are per session.
    assert!(first.identity().is_empty());
    assert!(second.identity().is_empty());
}

#[test]
fn test_unknown_device_id() {
    let (_, session) = session();
    assert!(matches!(session.device(DeviceId(9)), Err(crate::Error::Device { .. })));
}
