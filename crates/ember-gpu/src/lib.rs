//! Vulkan abstraction layer for the Ember engine.
//!
//! This crate provides:
//! - Vulkan instance, surface and device management
//! - Physical device selection and capability queries
//! - Memory allocation via gpu-allocator
//! - Command buffer and synchronization helpers
//! - Raw swapchain and graphics pipeline creation

pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder, QueueFamilyIndices};
pub use error::{GpuError, Result};
pub use memory::{create_image_view, GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::RenderPassDesc;
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{AcquireOutcome, PresentOutcome, RawSwapchain, SwapchainCreateDesc};
pub use sync::{create_fence, create_semaphore, reset_fence, wait_for_fence};
