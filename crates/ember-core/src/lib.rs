//! Core types for the Ember engine.
//!
//! This crate provides the engine-level data handed to the renderer:
//! - Vertex layout shared with the shaders
//! - Meshes and the flattened scene

pub mod scene;

pub use scene::{Mesh, Scene, Vertex};

/// Engine-wide constants
pub mod constants {
    /// Engine name reported to the graphics driver
    pub const ENGINE_NAME: &str = "Ember";
    /// Engine version (major, minor, patch)
    pub const ENGINE_VERSION: (u32, u32, u32) = (0, 1, 0);
    /// Whether the engine was built with debug assertions
    pub const IS_DEBUG: bool = cfg!(debug_assertions);
}
