//! The acquire/record/submit/present loop driven against the mock device.

use ash::vk;
use ember_core::Scene;
use ember_gpu::PresentOutcome;
use ember_platform::Window;
use ember_render::{
    FrameOutcome, FrameScheduler, FrameState, FrameStats, RenderSettings, SwapchainPreferences,
};
use ember_test::{fixtures, init_test_logging, DeviceCall, MockDevice, MockWindow};

fn scheduler(
    device: &MockDevice,
    settings: RenderSettings,
    window: &MockWindow,
) -> FrameScheduler<MockDevice> {
    FrameScheduler::new(device.clone(), settings, window.drawable_size()).expect("scheduler")
}

fn assert_clean(device: &MockDevice) {
    let violations = device.violations();
    assert!(violations.is_empty(), "device misuse: {violations:#?}");
}

fn count(calls: &[DeviceCall], pred: impl Fn(&DeviceCall) -> bool) -> usize {
    calls.iter().filter(|&c| pred(c)).count()
}

fn presents(calls: &[DeviceCall]) -> Vec<(vk::SwapchainKHR, u32)> {
    calls
        .iter()
        .filter_map(|call| match *call {
            DeviceCall::Present {
                swapchain,
                image_index,
                ..
            } => Some((swapchain, image_index)),
            _ => None,
        })
        .collect()
}

#[test]
fn single_triangle_single_frame() {
    init_test_logging();
    let device = MockDevice::new();
    let mut window = MockWindow::new(1280, 720);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    assert_eq!(scheduler.swapchain().image_count(), 3);
    assert_eq!(scheduler.frames().len(), 3);

    scheduler.load_scene(&fixtures::white_triangle()).expect("load");
    device.take_calls();

    let outcome = scheduler.draw_frame(&mut window).expect("frame");
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            image_index: 0,
            rebuild_scheduled: false
        }
    );

    let calls = device.take_calls();
    assert_eq!(count(&calls, |c| matches!(c, DeviceCall::Draw { vertex_count: 3 })), 1);
    assert_eq!(count(&calls, |c| matches!(c, DeviceCall::Submit { .. })), 1);
    assert_eq!(presents(&calls), vec![(scheduler.swapchain().handle(), 0)]);

    // Ordering within the frame.
    let position = |pred: &dyn Fn(&DeviceCall) -> bool| calls.iter().position(pred).expect("call");
    let wait = position(&|c| matches!(c, DeviceCall::WaitFence(_)));
    let acquire = position(&|c| matches!(c, DeviceCall::Acquire { .. }));
    let reset = position(&|c| matches!(c, DeviceCall::ResetFence(_)));
    let begin = position(&|c| matches!(c, DeviceCall::BeginRenderPass { .. }));
    let draw = position(&|c| matches!(c, DeviceCall::Draw { .. }));
    let submit = position(&|c| matches!(c, DeviceCall::Submit { .. }));
    let present = position(&|c| matches!(c, DeviceCall::Present { .. }));
    assert!(wait < acquire && acquire < reset && reset < begin);
    assert!(begin < draw && draw < submit && submit < present);

    assert_eq!(scheduler.frame_state(0), FrameState::Presented);
    assert_eq!(scheduler.current_frame(), 1);
    assert_clean(&device);
}

#[test]
fn reused_slot_returns_to_idle_once_its_fence_is_waited_on() {
    let device = MockDevice::new();
    let mut window = MockWindow::new(800, 600);
    let settings = RenderSettings {
        frames_in_flight: Some(2),
        ..RenderSettings::default()
    };
    let mut scheduler = scheduler(&device, settings, &window);
    assert_eq!(scheduler.frame_state(0), FrameState::Idle);

    scheduler.draw_frame(&mut window).expect("frame 0");
    scheduler.draw_frame(&mut window).expect("frame 1");
    assert_eq!(scheduler.frame_state(0), FrameState::Presented);
    assert_eq!(scheduler.frame_state(1), FrameState::Presented);

    // Slot 0 is waited on, then acquisition fails outright.
    device.script_acquire([99]);
    assert!(scheduler.draw_frame(&mut window).is_err());
    assert_eq!(scheduler.frame_state(0), FrameState::Idle);
    assert_eq!(scheduler.frame_state(1), FrameState::Presented);
    assert_eq!(scheduler.current_frame(), 0);
}

#[test]
fn empty_scene_only_clears() {
    let device = MockDevice::new();
    let mut window = MockWindow::new(640, 480);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    scheduler.load_scene(&Scene::new()).expect("empty scene");
    assert!(scheduler.scene().is_empty());
    device.take_calls();

    for _ in 0..2 {
        let outcome = scheduler.draw_frame(&mut window).expect("frame");
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    }

    let calls = device.take_calls();
    assert_eq!(count(&calls, |c| matches!(c, DeviceCall::BeginRenderPass { .. })), 2);
    assert_eq!(count(&calls, |c| matches!(c, DeviceCall::EndRenderPass)), 2);
    assert_eq!(count(&calls, |c| matches!(c, DeviceCall::Draw { .. })), 0);
    assert_eq!(count(&calls, |c| matches!(c, DeviceCall::BindVertexBuffer(_))), 0);
    assert_eq!(presents(&calls).len(), 2);
    assert_clean(&device);
}

#[test]
fn clear_values_cover_every_attachment() {
    let device = MockDevice::new();
    let mut window = MockWindow::new(640, 480);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    device.take_calls();

    scheduler.draw_frame(&mut window).expect("frame");
    let attachments = scheduler.targets().desc().attachment_count();
    assert!(device.take_calls().iter().any(|c| matches!(
        c,
        DeviceCall::BeginRenderPass { clear_count, .. } if *clear_count == attachments
    )));
}

#[test]
fn frames_never_share_an_image_with_more_images_than_slots() {
    init_test_logging();
    let device = MockDevice::new();
    // Adversarial order: images are handed back while other slots still use them.
    device.script_acquire([0, 1, 1, 0, 2, 3, 2, 2, 3, 0, 0, 1, 3, 3, 2, 1]);
    let settings = RenderSettings {
        swapchain: SwapchainPreferences {
            preferred_image_count: 4,
            ..SwapchainPreferences::default()
        },
        frames_in_flight: Some(2),
        ..RenderSettings::default()
    };
    let mut window = MockWindow::new(800, 600);
    let mut scheduler = scheduler(&device, settings, &window);
    assert_eq!(scheduler.swapchain().image_count(), 4);
    assert_eq!(scheduler.frames().len(), 2);
    scheduler.load_scene(&fixtures::triangles(4)).expect("load");

    let slot_fences: Vec<_> = scheduler.frames().slots().iter().map(|s| s.in_flight).collect();
    for frame in 0..16 {
        let outcome = scheduler.draw_frame(&mut window).expect("frame");
        let FrameOutcome::Presented { image_index, .. } = outcome else {
            panic!("frame {frame} was skipped");
        };
        assert_eq!(
            scheduler.images_in_flight()[image_index as usize],
            Some(slot_fences[frame % 2])
        );
        for fence in scheduler.images_in_flight().iter().flatten() {
            assert!(slot_fences.contains(fence));
        }
    }

    assert_eq!(device.present_calls(), 16);
    assert_clean(&device);
}

#[test]
fn mock_flags_overlapping_image_use() {
    use ember_render::RenderDevice;

    // Two slots rendering the same image without the per-image wait.
    let device = MockDevice::new();
    device.script_acquire([0, 0]);
    let window = MockWindow::new(64, 64);
    let scheduler = scheduler(&device, RenderSettings::default(), &window);
    let slots = scheduler.frames().slots().to_vec();
    let swapchain = scheduler.swapchain().handle();
    let render_pass = scheduler.targets().render_pass();
    let framebuffer = scheduler.targets().framebuffer(0);
    let extent = scheduler.targets().extent();
    let clears = scheduler.targets().clear_values();

    let mut results = Vec::new();
    for slot in &slots[..2] {
        device.wait_for_fence(slot.in_flight, u64::MAX).expect("wait");
        device
            .acquire_next_image(swapchain, u64::MAX, slot.image_acquired)
            .expect("acquire");
        device.reset_fence(slot.in_flight).expect("reset");
        device.reset_command_buffer(slot.command_buffer).expect("reset cmd");
        device.begin_command_buffer(slot.command_buffer).expect("begin");
        device.cmd_begin_render_pass(
            slot.command_buffer,
            render_pass,
            framebuffer,
            extent,
            &clears,
        );
        device.cmd_end_render_pass(slot.command_buffer);
        device.end_command_buffer(slot.command_buffer).expect("end");
        results.push(device.submit(
            slot.command_buffer,
            slot.image_acquired,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            slot.render_complete,
            slot.in_flight,
        ));
    }

    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert_eq!(device.violations().len(), 1);
}

#[test]
fn resize_rebuilds_targets_at_new_extent() {
    init_test_logging();
    let device = MockDevice::new();
    let mut window = MockWindow::new(1280, 720);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    scheduler.load_scene(&fixtures::white_triangle()).expect("load");
    let old_swapchain = scheduler.swapchain().handle();

    for _ in 0..3 {
        scheduler.draw_frame(&mut window).expect("frame");
    }

    window.resize(640, 480);
    scheduler.invalidate_swapchain();
    device.take_calls();

    for _ in 0..3 {
        let outcome = scheduler.draw_frame(&mut window).expect("frame");
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    }

    let new_extent = vk::Extent2D {
        width: 640,
        height: 480,
    };
    assert_eq!(scheduler.swapchain().extent(), new_extent);
    assert_eq!(scheduler.targets().extent(), new_extent);
    assert_ne!(scheduler.swapchain().handle(), old_swapchain);
    for &framebuffer in scheduler.targets().framebuffers() {
        assert_eq!(device.framebuffer_extent(framebuffer), Some(new_extent));
    }

    let calls = device.take_calls();
    assert!(calls.iter().any(|c| matches!(
        c,
        DeviceCall::CreateSwapchain { replaces_old: true, extent, .. } if *extent == new_extent
    )));
    assert!(calls.contains(&DeviceCall::DestroySwapchain(old_swapchain)));
    for call in &calls {
        if let DeviceCall::BeginRenderPass { extent, .. } = call {
            assert_eq!(*extent, new_extent);
        }
    }
    assert_eq!(device.live_swapchains(), 1);
    assert_eq!(scheduler.stats().rebuilds, 1);
    assert_clean(&device);
}

#[test]
fn out_of_date_acquire_skips_frame_and_rebuilds() {
    init_test_logging();
    let device = MockDevice::new();
    device.fail_acquire_on(5);
    let mut window = MockWindow::new(1280, 720);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    scheduler.load_scene(&fixtures::white_triangle()).expect("load");
    let first_swapchain = scheduler.swapchain().handle();

    for frame in 1..=4 {
        let outcome = scheduler.draw_frame(&mut window).expect("frame");
        assert!(matches!(outcome, FrameOutcome::Presented { .. }), "frame {frame}");
    }
    let frame_before = scheduler.current_frame();
    device.take_calls();

    // Frame 5: acquisition fails, nothing is submitted or presented.
    let outcome = scheduler.draw_frame(&mut window).expect("frame 5");
    assert_eq!(outcome, FrameOutcome::Skipped);
    let calls = device.take_calls();
    assert_eq!(count(&calls, |c| matches!(c, DeviceCall::Submit { .. })), 0);
    assert!(presents(&calls).is_empty());
    assert!(calls.iter().any(|c| matches!(
        c,
        DeviceCall::CreateSwapchain {
            replaces_old: true,
            ..
        }
    )));
    assert_eq!(scheduler.current_frame(), frame_before);
    assert_eq!(scheduler.frame_state(frame_before), FrameState::Idle);
    assert!(!scheduler.needs_rebuild());

    let second_swapchain = scheduler.swapchain().handle();
    assert_ne!(second_swapchain, first_swapchain);

    for frame in 6..=10 {
        let outcome = scheduler.draw_frame(&mut window).expect("frame");
        assert!(matches!(outcome, FrameOutcome::Presented { .. }), "frame {frame}");
    }
    let calls = device.take_calls();
    let presented = presents(&calls);
    assert_eq!(presented.len(), 5);
    assert!(presented.iter().all(|&(swapchain, _)| swapchain == second_swapchain));

    assert_eq!(
        scheduler.stats(),
        FrameStats {
            presented: 9,
            skipped: 1,
            rebuilds: 1,
        }
    );
    assert_clean(&device);
}

#[test]
fn suboptimal_acquire_schedules_rebuild() {
    let device = MockDevice::new();
    device.suboptimal_acquire_on(2);
    let mut window = MockWindow::new(640, 480);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);

    scheduler.draw_frame(&mut window).expect("frame 1");
    let outcome = scheduler.draw_frame(&mut window).expect("frame 2");
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            rebuild_scheduled: true,
            ..
        }
    ));
    assert!(scheduler.needs_rebuild());

    scheduler.draw_frame(&mut window).expect("frame 3");
    assert_eq!(scheduler.stats().rebuilds, 1);
    assert!(!scheduler.needs_rebuild());
    assert_clean(&device);
}

#[test]
fn out_of_date_present_rebuilds_before_next_frame() {
    let device = MockDevice::new();
    device.present_outcome_on(1, PresentOutcome::OutOfDate);
    let mut window = MockWindow::new(640, 480);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    let first_swapchain = scheduler.swapchain().handle();

    let outcome = scheduler.draw_frame(&mut window).expect("frame 1");
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            rebuild_scheduled: true,
            ..
        }
    ));
    assert_eq!(scheduler.stats().presented, 1);

    scheduler.draw_frame(&mut window).expect("frame 2");
    assert_ne!(scheduler.swapchain().handle(), first_swapchain);
    assert_eq!(scheduler.stats().rebuilds, 1);
    assert_clean(&device);
}

#[test]
fn minimized_window_waits_then_rebuilds_at_restored_size() {
    let device = MockDevice::new();
    let mut window = MockWindow::new(1280, 720);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    scheduler.draw_frame(&mut window).expect("frame");

    window.minimize(Some((800, 600)));
    scheduler.invalidate_swapchain();
    let outcome = scheduler.draw_frame(&mut window).expect("frame");
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert_eq!(window.minimized_waits(), 1);
    assert_eq!(
        scheduler.swapchain().extent(),
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
    assert_clean(&device);
}

#[test]
fn window_closed_while_minimized_skips_without_rebuilding() {
    let device = MockDevice::new();
    let mut window = MockWindow::new(1280, 720);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    let swapchain = scheduler.swapchain().handle();

    window.minimize(None);
    scheduler.invalidate_swapchain();
    let outcome = scheduler.draw_frame(&mut window).expect("frame");
    assert_eq!(outcome, FrameOutcome::Skipped);
    assert!(window.is_closing());
    assert_eq!(scheduler.swapchain().handle(), swapchain);
    assert_eq!(scheduler.stats().rebuilds, 0);
    assert_eq!(device.acquire_calls(), 0);
    assert_clean(&device);
}

#[test]
fn frame_pool_survives_rebuilds() {
    let device = MockDevice::new();
    let mut window = MockWindow::new(640, 480);
    let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
    let slots = scheduler.frames().slots().to_vec();

    for size in [(320, 240), (1024, 768), (640, 480)] {
        scheduler.draw_frame(&mut window).expect("frame");
        window.resize(size.0, size.1);
        scheduler.invalidate_swapchain();
    }
    scheduler.draw_frame(&mut window).expect("frame");

    assert_eq!(scheduler.frames().slots(), slots.as_slice());
    assert_eq!(scheduler.stats().rebuilds, 3);
    assert_clean(&device);
}

#[test]
fn teardown_releases_everything() {
    init_test_logging();
    let device = MockDevice::new();
    device.fail_acquire_on(3);
    let mut window = MockWindow::new(1280, 720);
    {
        let mut scheduler = scheduler(&device, RenderSettings::default(), &window);
        scheduler.load_scene(&fixtures::triangles(3)).expect("load");
        for _ in 0..6 {
            scheduler.draw_frame(&mut window).expect("frame");
        }
        window.resize(300, 200);
        scheduler.invalidate_swapchain();
        scheduler.draw_frame(&mut window).expect("frame");
        scheduler.load_scene(&fixtures::white_triangle()).expect("reload");
        scheduler.draw_frame(&mut window).expect("frame");
    }

    let leaks = device.leaks();
    assert!(leaks.is_empty(), "leaked: {leaks:?}");
    assert_eq!(device.live_swapchains(), 0);
    assert_clean(&device);
}
