//! Demo scenes.

use ember_core::{Mesh, Scene, Vertex};
use glam::Vec3;

/// Which demo to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Demo {
    /// Clear color only.
    SimpleWindow,
    /// One white triangle.
    SimpleShape,
    /// Three overlapping triangles at two depths.
    DepthTest,
}

impl Demo {
    pub const ALL: [Self; 3] = [Self::SimpleWindow, Self::SimpleShape, Self::DepthTest];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|demo| demo.name() == name)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SimpleWindow => "simple-window",
            Self::SimpleShape => "simple-shape",
            Self::DepthTest => "depth-test",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::SimpleWindow => "Ember - Simple Window",
            Self::SimpleShape => "Ember - Simple Shape",
            Self::DepthTest => "Ember - Depth Test",
        }
    }

    pub fn scene(self) -> Scene {
        match self {
            Self::SimpleWindow => Scene::new(),
            Self::SimpleShape => simple_shape(),
            Self::DepthTest => depth_test(),
        }
    }
}

fn simple_shape() -> Scene {
    Scene::new().with_mesh(vec![
        Vertex::from_position(Vec3::new(0.0, -0.5, 0.0)),
        Vertex::from_position(Vec3::new(-0.5, 0.5, 0.0)),
        Vertex::from_position(Vec3::new(0.5, 0.5, 0.0)),
    ])
}

fn triangle(a: (f32, f32), b: (f32, f32), c: (f32, f32), depth: f32, color: Vec3) -> Mesh {
    Mesh::new(
        [a, b, c]
            .into_iter()
            .map(|(x, y)| Vertex::new(Vec3::new(x, y, depth), color))
            .collect(),
    )
}

// The green triangle sits behind the other two and is partly hidden by them.
fn depth_test() -> Scene {
    Scene::new()
        .with_mesh(triangle(
            (-0.5, -1.0),
            (-1.0, 0.0),
            (0.0, 0.0),
            0.0,
            Vec3::new(1.0, 0.0, 0.0),
        ))
        .with_mesh(triangle(
            (0.0, -0.5),
            (-0.5, 0.5),
            (0.5, 0.5),
            0.5,
            Vec3::new(0.0, 1.0, 0.0),
        ))
        .with_mesh(triangle(
            (0.5, 0.0),
            (0.0, 1.0),
            (1.0, 1.0),
            0.0,
            Vec3::new(0.0, 0.0, 1.0),
        ))
}
