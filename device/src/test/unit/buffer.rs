use std::sync::Arc;

use crate::{Allocator, DeviceBuffer, DeviceId, HostAllocator, LruAllocator};

fn allocator() -> Arc<LruAllocator> {
    Arc::new(LruAllocator::new(Box::new(HostAllocator)))
}

fn allocate(alloc: &Arc<LruAllocator>, size: usize) -> DeviceBuffer {
    DeviceBuffer::allocate(alloc.clone() as Arc<dyn Allocator>, DeviceId(0), size).unwrap()
}

#[test]
fn test_allocate_reports_size_and_device() {
    let buffer = DeviceBuffer::allocate(Arc::new(HostAllocator), DeviceId(3), 16).unwrap();
    assert_eq!(buffer.size(), 16);
    assert_eq!(buffer.device(), DeviceId(3));
    assert_eq!(buffer.raw().size(), 16);
    assert_eq!(&**buffer.raw().as_host().unwrap().lock(), &[0u8; 16]);
}

#[test]
fn test_clones_share_allocation() {
    let buffer = DeviceBuffer::allocate(Arc::new(HostAllocator), DeviceId(0), 8).unwrap();
    let clone = buffer.clone();
    assert!(buffer.ptr_eq(&clone));
    assert_eq!(buffer.handle_count(), 2);

    let other = DeviceBuffer::allocate(Arc::new(HostAllocator), DeviceId(0), 8).unwrap();
    assert!(!buffer.ptr_eq(&other));
}

#[test]
fn test_last_handle_returns_memory_to_cache() {
    let alloc = allocator();
    {
        let buffer = allocate(&alloc, 32);
        let _clone = buffer.clone();
        assert_eq!(alloc.cache_count(32), 0);
    }
    assert_eq!(alloc.cache_count(32), 1, "exactly one raw buffer is cached after all handles drop");

    let _reused = allocate(&alloc, 32);
    assert_eq!(alloc.cache_count(32), 0);
}

#[test]
fn test_cache_is_keyed_by_size() {
    let alloc = allocator();
    drop(allocate(&alloc, 4));

    let _other = allocate(&alloc, 8);
    assert_eq!(alloc.cache_count(4), 1);
    assert_eq!(alloc.cache_count(8), 0);
    assert_eq!(alloc.name(), "HOST");
}

#[test]
fn test_cache_respects_capacity() {
    let alloc = Arc::new(LruAllocator::with_capacity(Box::new(HostAllocator), 2));
    let buffers: Vec<_> = (0..4).map(|_| allocate(&alloc, 8)).collect();
    drop(buffers);
    assert_eq!(alloc.cache_count(8), 2);
}
