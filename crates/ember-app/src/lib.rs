//! Engine entry point for Ember.
//!
//! Wires a window, a Vulkan device and the frame scheduler together:
//!
//! ```no_run
//! use ember_app::{Engine, EngineConfig};
//! use ember_core::Scene;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut engine = Engine::new(EngineConfig::new("Clear").with_size(800, 600))?;
//!     engine.load_scene(&Scene::new())?;
//!     engine.run()?;
//!     Ok(())
//! }
//! ```

mod config;
mod engine;
mod logging;

pub use config::EngineConfig;
pub use engine::Engine;
pub use logging::init_logging;

// Re-export commonly used types for convenience
pub use ember_core::{Mesh, Scene, Vertex};
pub use ember_render::{FrameOutcome, FrameStats};
