//! Frame synchronization and swapchain lifecycle for the Ember engine.
//!
//! This crate provides:
//! - The [`RenderDevice`] capability boundary and its Vulkan implementation
//! - Swapchain negotiation and rebuild ([`SwapchainManager`])
//! - Per-frame-in-flight resources ([`FramePool`])
//! - The render pass and per-image framebuffers ([`RenderTargets`])
//! - The acquire/record/submit/present loop ([`FrameScheduler`])
//! - Scene upload into device-local vertex buffers

pub mod device;
pub mod error;
pub mod frame_pool;
pub mod render_target;
pub mod scene_upload;
pub mod scheduler;
pub mod swapchain;
pub mod vulkan;

pub use device::{AttachmentImageDesc, RenderDevice};
pub use ember_gpu::{AcquireOutcome, PresentOutcome, RenderPassDesc};
pub use error::{RenderError, Result};
pub use frame_pool::{frames_in_flight, FramePool, FrameSlot};
pub use render_target::{RenderTargets, TargetOptions};
pub use scene_upload::{read_back, upload, DeviceScene};
pub use scheduler::{FrameOutcome, FrameScheduler, FrameState, FrameStats, RenderSettings};
pub use swapchain::{SwapchainManager, SwapchainPreferences, PREFERRED_IMAGE_COUNT};
pub use vulkan::VulkanDevice;
