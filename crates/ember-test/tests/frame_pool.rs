//! Frame pool creation and cleanup against the mock device.

use ember_render::{FramePool, FrameScheduler, RenderDevice, RenderError, RenderSettings};
use ember_test::{init_test_logging, MockDevice};

#[test]
fn slots_start_with_signaled_fences_and_fresh_handles() {
    let device = MockDevice::new();
    let mut pool = FramePool::new(&device, 3).expect("pool");

    assert_eq!(pool.len(), 3);
    assert_eq!(pool.slot(4), &pool.slots()[1]);
    // The first wait on every slot returns without a submission.
    for slot in pool.slots() {
        assert_ne!(slot.image_acquired, slot.render_complete);
        device
            .wait_for_fence(slot.in_flight, u64::MAX)
            .expect("signaled fence");
    }

    pool.destroy(&device);
    assert!(device.leaks().is_empty(), "{:?}", device.leaks());
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn failed_slot_creation_releases_everything() {
    init_test_logging();
    // Each slot takes two semaphores: fail on the first and second of slot
    // zero, then partway through the third slot.
    for budget in [0, 1, 4, 5] {
        let device = MockDevice::new();
        device.fail_semaphore_creation_after(budget);

        let result = FramePool::new(&device, 3);
        assert!(
            matches!(result, Err(RenderError::Gpu(_))),
            "budget {budget}: pool creation should fail"
        );
        assert!(device.leaks().is_empty(), "budget {budget}: {:?}", device.leaks());
        assert!(device.violations().is_empty(), "budget {budget}: {:?}", device.violations());
    }
}

#[test]
fn failed_scheduler_creation_releases_everything() {
    let device = MockDevice::new();
    device.fail_semaphore_creation_after(3);

    let result = FrameScheduler::new(device.clone(), RenderSettings::default(), (800, 600));
    assert!(result.is_err());
    assert!(device.leaks().is_empty(), "{:?}", device.leaks());
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}
