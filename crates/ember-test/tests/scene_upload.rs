//! Scene upload through staging into device-local memory.

use approx::assert_relative_eq;
use ember_core::{Scene, Vertex};
use ember_gpu::GpuError;
use ember_render::{read_back, upload, FrameScheduler, RenderDevice, RenderError, RenderSettings};
use ember_test::{fixtures, init_test_logging, DeviceCall, MockDevice, MockWindow};
use gpu_allocator::MemoryLocation;

#[test]
fn uploaded_vertices_read_back_unchanged() {
    init_test_logging();
    let device = MockDevice::new();

    for triangles in [1, 2, 7, 64] {
        let scene = fixtures::triangles(triangles);
        let mut uploaded = upload(&device, &scene).expect("upload");
        assert_eq!(uploaded.vertex_count(), scene.vertex_count());

        let buffer = uploaded.vertex_buffer().expect("buffer");
        assert_eq!(buffer.location, MemoryLocation::GpuOnly);
        assert_eq!(buffer.size, scene.byte_size());

        let vertices = read_back(&device, &uploaded).expect("read back");
        assert_eq!(vertices.len(), scene.vertex_count() as usize);
        for (got, want) in vertices.iter().zip(scene.vertices()) {
            assert_relative_eq!(got.position.x, want.position.x);
            assert_relative_eq!(got.position.y, want.position.y);
            assert_relative_eq!(got.position.z, want.position.z);
            assert_eq!(got.color, want.color);
        }

        uploaded.destroy(&device);
    }

    assert!(device.leaks().is_empty(), "{:?}", device.leaks());
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn meshes_are_flattened_in_insertion_order() {
    let device = MockDevice::new();
    let first = fixtures::white_triangle();
    let second = fixtures::triangles(1);
    let mut scene = Scene::new();
    for mesh in first.meshes().iter().chain(second.meshes()) {
        scene.add_mesh(mesh.clone());
    }

    let mut uploaded = upload(&device, &scene).expect("upload");
    let vertices = read_back(&device, &uploaded).expect("read back");
    let expected: Vec<Vertex> = first.vertices().into_iter().chain(second.vertices()).collect();
    assert_eq!(vertices, expected);
    uploaded.destroy(&device);
}

#[test]
fn upload_goes_through_a_staging_copy() {
    let device = MockDevice::new();
    let scene = fixtures::white_triangle();
    let mut uploaded = upload(&device, &scene).expect("upload");

    let calls = device.take_calls();
    let copies: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            DeviceCall::CopyBuffer { dst, size, .. } => Some((*dst, *size)),
            _ => None,
        })
        .collect();
    let buffer = uploaded.vertex_buffer().expect("buffer");
    assert_eq!(copies, vec![(buffer.id, scene.byte_size())]);
    assert!(calls.contains(&DeviceCall::OneShot));

    // Only the device-local buffer outlives the upload.
    assert_eq!(device.leaks(), vec!["1 buffers".to_string()]);
    uploaded.destroy(&device);
    assert!(device.leaks().is_empty());
}

#[test]
fn empty_scene_is_rejected() {
    let device = MockDevice::new();
    let result = upload(&device, &Scene::new());
    assert!(matches!(result, Err(RenderError::EmptyScene)));
    assert!(device.calls().is_empty());
}

#[test]
fn allocation_failure_reports_size_and_usage() {
    let device = MockDevice::new();
    device.fail_buffer_allocations(true);
    let scene = fixtures::white_triangle();

    match upload(&device, &scene) {
        Err(RenderError::Gpu(GpuError::AllocationFailed { size, usage, .. })) => {
            assert_eq!(size, scene.byte_size());
            assert!(usage.contains("TRANSFER_SRC"), "{usage}");
        }
        other => panic!("expected allocation failure, got {:?}", other.map(|s| s.vertex_count())),
    }
    assert!(device.leaks().is_empty());
}

#[test]
fn host_cannot_touch_device_local_memory() {
    let device = MockDevice::new();
    let buffer = device
        .create_buffer(
            64,
            ash::vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::GpuOnly,
            "device local",
        )
        .expect("buffer");
    assert!(device.write_buffer(&buffer, &[0; 16]).is_err());
    assert!(device.read_buffer(&buffer, 16).is_err());
    assert_eq!(device.violations().len(), 2);
    device.destroy_buffer(buffer);
}

#[test]
fn reloading_a_scene_replaces_the_vertex_buffer() {
    let device = MockDevice::new();
    let mut window = MockWindow::new(640, 480);
    let mut scheduler = FrameScheduler::new(device.clone(), RenderSettings::default(), (640, 480))
        .expect("scheduler");

    scheduler.load_scene(&fixtures::triangles(2)).expect("first scene");
    scheduler.draw_frame(&mut window).expect("frame");
    let first_id = scheduler.scene().vertex_buffer().map(|b| b.id);

    scheduler.load_scene(&fixtures::white_triangle()).expect("second scene");
    assert_eq!(scheduler.scene().vertex_count(), 3);
    device.take_calls();
    scheduler.draw_frame(&mut window).expect("frame");

    let second_id = scheduler.scene().vertex_buffer().map(|b| b.id);
    assert_ne!(first_id, second_id);
    let calls = device.take_calls();
    assert!(calls.contains(&DeviceCall::BindVertexBuffer(second_id.expect("buffer"))));
    assert!(calls.contains(&DeviceCall::Draw { vertex_count: 3 }));

    scheduler.load_scene(&Scene::new()).expect("clear scene");
    assert!(scheduler.scene().is_empty());
    drop(scheduler);
    assert!(device.leaks().is_empty(), "{:?}", device.leaks());
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}
