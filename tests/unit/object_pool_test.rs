//! Tests for the object pool

use prometheus_scheduler::ObjectPool;

#[test]
fn test_pool_recycles_buffers() {
    let pool = ObjectPool::new(4, || Vec::<u8>::with_capacity(64)).with_reset(Vec::clear);

    let ptr = {
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"payload");
        buf.as_ptr()
    };

    let buf = pool.acquire();
    assert!(buf.is_empty());
    assert_eq!(buf.as_ptr(), ptr);
    assert_eq!(pool.created(), 1);
}

#[test]
fn test_explicit_release() {
    let pool = ObjectPool::new(2, || 0_u32);
    let value = pool.acquire().into_inner();
    assert_eq!(pool.available(), 0);
    assert!(pool.release(value));
    assert_eq!(pool.available(), 1);
}
