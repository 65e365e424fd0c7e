//! Test harness for the Ember engine.
//!
//! Provides a scripted device and window so the frame loop can be driven
//! without a GPU or a display, plus small scene fixtures.

pub mod device;
pub mod window;

pub use device::{DeviceCall, MockBuffer, MockDevice, MockImage, MockPipeline};
pub use window::MockWindow;

use ember_core::{Mesh, Scene, Vertex};
use glam::Vec3;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test writer. Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Scene fixtures.
pub mod fixtures {
    use super::{Mesh, Scene, Vec3, Vertex};

    /// One white triangle, counter-clockwise in clip space.
    pub fn white_triangle() -> Scene {
        Scene::new().with_mesh(vec![
            Vertex::from_position(Vec3::new(0.0, -0.5, 0.0)),
            Vertex::from_position(Vec3::new(-0.5, 0.5, 0.0)),
            Vertex::from_position(Vec3::new(0.5, 0.5, 0.0)),
        ])
    }

    /// `triangles` triangles with distinct positions and colors, one mesh each.
    pub fn triangles(triangles: usize) -> Scene {
        let mut scene = Scene::new();
        for t in 0..triangles {
            let offset = t as f32 * 0.01;
            let color = Vec3::new(offset, 1.0 - offset, 0.5);
            scene.add_mesh(Mesh::new(vec![
                Vertex::new(Vec3::new(offset, -0.5, offset), color),
                Vertex::new(Vec3::new(offset - 0.5, 0.5, offset), color),
                Vertex::new(Vec3::new(offset + 0.5, 0.5, offset), color),
            ]));
        }
        scene
    }
}
