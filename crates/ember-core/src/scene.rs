//! Scene data: vertices, meshes, and the scene that owns them.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A single vertex as laid out in the vertex buffer.
///
/// Matches the vertex shader inputs: position at location 0, color at
/// location 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Position in normalized device coordinates
    pub position: Vec3,
    /// Linear RGB color
    pub color: Vec3,
}

impl Vertex {
    /// Size of one vertex in bytes (the vertex buffer stride).
    pub const STRIDE: usize = std::mem::size_of::<Self>();

    /// Create a vertex with an explicit color.
    #[inline]
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Create a white vertex from a position only.
    #[inline]
    pub const fn from_position(position: Vec3) -> Self {
        Self {
            position,
            color: Vec3::ONE,
        }
    }
}

/// An ordered list of vertices forming triangles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<Vertex>,
}

impl Mesh {
    /// Create a mesh from a triangle list.
    pub fn new(vertices: Vec<Vertex>) -> Self {
        Self { vertices }
    }

    /// The mesh vertices.
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Returns true if the mesh has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

impl From<Vec<Vertex>> for Mesh {
    fn from(vertices: Vec<Vertex>) -> Self {
        Self::new(vertices)
    }
}

/// Ordered collection of meshes handed to the renderer.
///
/// The renderer treats a scene as immutable once loaded and flattens all
/// meshes into one vertex buffer in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    meshes: Vec<Mesh>,
    vertex_count: u32,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mesh.
    ///
    /// # Panics
    /// If the scene would hold more than `u32::MAX` vertices.
    pub fn add_mesh(&mut self, mesh: impl Into<Mesh>) {
        let mesh = mesh.into();
        let total = u32::try_from(mesh.len())
            .ok()
            .and_then(|len| self.vertex_count.checked_add(len));
        let Some(total) = total else {
            panic!("scene exceeds {} vertices", u32::MAX);
        };
        self.vertex_count = total;
        self.meshes.push(mesh);
    }

    /// Builder-style variant of [`Scene::add_mesh`].
    #[must_use]
    pub fn with_mesh(mut self, mesh: impl Into<Mesh>) -> Self {
        self.add_mesh(mesh);
        self
    }

    /// Total vertex count across all meshes.
    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Returns true if there is nothing to draw.
    pub const fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }

    /// The meshes in insertion order.
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// All vertices flattened in mesh insertion order.
    pub fn vertices(&self) -> Vec<Vertex> {
        let mut vertices = Vec::with_capacity(self.vertex_count as usize);
        for mesh in &self.meshes {
            vertices.extend_from_slice(mesh.vertices());
        }
        vertices
    }

    /// Size in bytes of the flattened vertex data.
    pub const fn byte_size(&self) -> u64 {
        self.vertex_count as u64 * Vertex::STRIDE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle(z: f32, color: Vec3) -> Mesh {
        Mesh::new(vec![
            Vertex::new(Vec3::new(-0.5, -0.5, z), color),
            Vertex::new(Vec3::new(0.5, -0.5, z), color),
            Vertex::new(Vec3::new(0.0, 0.5, z), color),
        ])
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(Vertex::STRIDE, 24);
        assert_eq!(std::mem::align_of::<Vertex>(), 4);
    }

    #[test]
    fn empty_scene() {
        let scene = Scene::new();
        assert!(scene.is_empty());
        assert_eq!(scene.vertex_count(), 0);
        assert_eq!(scene.byte_size(), 0);
        assert!(scene.vertices().is_empty());
    }

    #[test]
    fn scene_flattens_meshes_in_order() {
        let scene = Scene::new()
            .with_mesh(triangle(0.0, Vec3::X))
            .with_mesh(triangle(0.5, Vec3::Y));

        assert_eq!(scene.vertex_count(), 6);
        assert_eq!(scene.byte_size(), 6 * 24);

        let vertices = scene.vertices();
        assert_eq!(vertices.len(), 6);
        assert_eq!(vertices[0].color, Vec3::X);
        assert_eq!(vertices[5].color, Vec3::Y);
        assert_relative_eq!(vertices[3].position.z, 0.5);
    }

    #[test]
    fn empty_mesh_keeps_scene_empty() {
        let mut scene = Scene::new();
        scene.add_mesh(Mesh::default());
        assert!(scene.is_empty());
        assert_eq!(scene.meshes().len(), 1);
    }

    #[test]
    fn position_only_vertex_is_white() {
        let v = Vertex::from_position(Vec3::ZERO);
        assert_eq!(v.color, Vec3::ONE);
    }
}
