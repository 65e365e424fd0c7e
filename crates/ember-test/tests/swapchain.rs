//! Swapchain negotiation and render target construction against the mock device.

use ash::vk;
use ember_gpu::QueueFamilyIndices;
use ember_render::swapchain::choose_image_count;
use ember_render::{FrameScheduler, RenderError, RenderSettings, SwapchainPreferences};
use ember_test::{init_test_logging, DeviceCall, MockDevice, MockWindow};

fn build(
    device: &MockDevice,
    settings: RenderSettings,
    size: (u32, u32),
) -> FrameScheduler<MockDevice> {
    FrameScheduler::new(device.clone(), settings, size).expect("scheduler")
}

#[test]
fn image_count_within_surface_bounds() {
    init_test_logging();
    for (min, max) in [(1, 0), (2, 3), (2, 8), (3, 3), (4, 0), (4, 6), (1, 2)] {
        let device = MockDevice::new();
        device.set_image_count_range(min, max);
        let scheduler = build(&device, RenderSettings::default(), (640, 480));

        let count = u32::try_from(scheduler.swapchain().image_count()).expect("count");
        assert!(count >= min, "min={min} max={max} count={count}");
        if max > 0 {
            assert!(count <= max, "min={min} max={max} count={count}");
        }
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        };
        assert_eq!(count, choose_image_count(&caps, 3));
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }
}

#[test]
fn defined_current_extent_wins_over_drawable_size() {
    let device = MockDevice::new();
    let fixed = vk::Extent2D {
        width: 800,
        height: 600,
    };
    device.set_current_extent(fixed);

    let scheduler = build(&device, RenderSettings::default(), (1920, 1080));
    assert_eq!(scheduler.swapchain().extent(), fixed);
    assert_eq!(scheduler.targets().extent(), fixed);
}

#[test]
fn undefined_extent_follows_drawable_size_within_limits() {
    let device = MockDevice::new();
    let scheduler = build(&device, RenderSettings::default(), (1280, 720));
    assert_eq!(
        scheduler.swapchain().extent(),
        vk::Extent2D {
            width: 1280,
            height: 720
        }
    );
    drop(scheduler);

    let scheduler = build(&device, RenderSettings::default(), (5000, 100));
    assert_eq!(
        scheduler.swapchain().extent(),
        vk::Extent2D {
            width: 4096,
            height: 100
        }
    );
}

#[test]
fn present_mode_prefers_mailbox_unless_vsync() {
    let device = MockDevice::new();
    let scheduler = build(&device, RenderSettings::default(), (640, 480));
    assert_eq!(scheduler.swapchain().present_mode(), vk::PresentModeKHR::MAILBOX);
    drop(scheduler);

    let settings = RenderSettings {
        swapchain: SwapchainPreferences {
            vsync: true,
            ..SwapchainPreferences::default()
        },
        ..RenderSettings::default()
    };
    let scheduler = build(&device, settings, (640, 480));
    assert_eq!(scheduler.swapchain().present_mode(), vk::PresentModeKHR::FIFO);
}

#[test]
fn missing_surface_format_is_reported() {
    let device = MockDevice::new();
    let mut surface = device_surface(&device);
    surface.formats.clear();
    device.set_surface(surface);

    let result = FrameScheduler::new(device.clone(), RenderSettings::default(), (640, 480));
    assert!(matches!(result, Err(RenderError::NoCompatibleFormat)));
    assert!(device.leaks().is_empty(), "{:?}", device.leaks());
}

#[test]
fn missing_depth_format_is_reported() {
    let device = MockDevice::new();
    device.set_depth_format(None);

    let result = FrameScheduler::new(device.clone(), RenderSettings::default(), (640, 480));
    assert!(matches!(result, Err(RenderError::NoCompatibleDepthFormat)));

    let settings = RenderSettings {
        depth: false,
        ..RenderSettings::default()
    };
    let scheduler = build(&device, settings, (640, 480));
    assert!(!scheduler.targets().desc().has_depth());
}

#[test]
fn one_framebuffer_per_image_with_swapchain_extent() {
    let device = MockDevice::new();
    let scheduler = build(&device, RenderSettings::default(), (1024, 768));

    let targets = scheduler.targets();
    assert_eq!(targets.framebuffers().len(), scheduler.swapchain().image_count());
    for &framebuffer in targets.framebuffers() {
        assert_eq!(device.framebuffer_extent(framebuffer), Some(targets.extent()));
    }
}

#[test]
fn multisampling_adds_resolve_attachment() {
    let device = MockDevice::new();
    let scheduler = build(&device, RenderSettings::default(), (640, 480));
    let desc = *scheduler.targets().desc();
    assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_4);
    assert_eq!(desc.attachment_count(), 3);
    assert_eq!(scheduler.targets().clear_values().len(), 3);
    drop(scheduler);

    let settings = RenderSettings {
        msaa: false,
        ..RenderSettings::default()
    };
    let scheduler = build(&device, settings, (640, 480));
    let desc = *scheduler.targets().desc();
    assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
    assert_eq!(desc.attachment_count(), 2);
}

#[test]
fn frames_in_flight_is_capped_by_image_count() {
    let device = MockDevice::new();
    let settings = RenderSettings {
        frames_in_flight: Some(2),
        ..RenderSettings::default()
    };
    let scheduler = build(&device, settings, (640, 480));
    assert_eq!(scheduler.frames().len(), 2);
    drop(scheduler);

    let settings = RenderSettings {
        frames_in_flight: Some(16),
        ..RenderSettings::default()
    };
    let scheduler = build(&device, settings, (640, 480));
    assert_eq!(scheduler.frames().len(), scheduler.swapchain().image_count());
}

#[test]
fn first_swapchain_has_no_predecessor() {
    let device = MockDevice::new();
    let _scheduler = build(&device, RenderSettings::default(), (640, 480));
    let created: Vec<_> = device
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DeviceCall::CreateSwapchain { replaces_old, .. } => Some(replaces_old),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec![false]);
}

fn swapchain_sharing(device: &MockDevice) -> Vec<((u32, u32), bool)> {
    device
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DeviceCall::CreateSwapchain {
                queue_families,
                concurrent,
                ..
            } => Some((queue_families, concurrent)),
            _ => None,
        })
        .collect()
}

#[test]
fn shared_queue_family_uses_exclusive_images() {
    let device = MockDevice::new();
    let _scheduler = build(&device, RenderSettings::default(), (640, 480));
    assert_eq!(swapchain_sharing(&device), vec![((0, 0), false)]);
}

#[test]
fn distinct_present_family_shares_images_concurrently() {
    let device = MockDevice::new();
    device.set_queue_families(QueueFamilyIndices {
        graphics: 0,
        present: 2,
    });
    let mut window = MockWindow::new(640, 480);
    let mut scheduler = build(&device, RenderSettings::default(), (640, 480));

    window.resize(320, 240);
    scheduler.invalidate_swapchain();
    scheduler.draw_frame(&mut window).expect("frame");

    // The rebuilt swapchain keeps sharing between both families.
    assert_eq!(swapchain_sharing(&device), vec![((0, 2), true), ((0, 2), true)]);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

fn device_surface(device: &MockDevice) -> ember_gpu::SurfaceCapabilities {
    use ember_render::RenderDevice;
    device.surface_capabilities().expect("surface")
}
