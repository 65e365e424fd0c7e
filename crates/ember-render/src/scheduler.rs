//! Frame scheduler: acquire, throttle, record, submit and present.
//!
//! Each logical frame `f` in `0..F` owns one [`FrameSlot`]. A frame goes
//! through [`FrameState::Idle`], `Acquiring`, `Recording`, `Submitted` and
//! `Presented`, then returns to `Idle` once its fence has been waited on.
//!
//! Two CPU waits guard GPU resources:
//! - the slot fence, so at most `F` frames are outstanding and a command
//!   buffer is never reset while the GPU still executes it;
//! - the fence last associated with the acquired image, so an image is
//!   never rendered by two overlapping frames when `F != N`.

use ash::vk;
use ember_core::Scene;
use ember_gpu::{AcquireOutcome, GpuError};
use ember_platform::Window;
use tracing::{debug, info, trace};

use crate::device::RenderDevice;
use crate::error::{RenderError, Result};
use crate::frame_pool::{frames_in_flight, FramePool, FrameSlot};
use crate::render_target::{RenderTargets, TargetOptions};
use crate::scene_upload::{self, DeviceScene};
use crate::swapchain::{SwapchainManager, SwapchainPreferences};

/// Where a logical frame is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

/// Result of one [`FrameScheduler::draw_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was presented. `rebuild_scheduled` is set when presentation
    /// reported a stale or suboptimal swapchain.
    Presented {
        image_index: u32,
        rebuild_scheduled: bool,
    },
    /// Acquisition found the swapchain out of date; nothing was submitted.
    Skipped,
}

/// Counters reported at shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub rebuilds: u64,
}

/// Renderer configuration resolved against the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSettings {
    pub swapchain: SwapchainPreferences,
    /// `None` means one frame in flight per swapchain image.
    pub frames_in_flight: Option<usize>,
    pub depth: bool,
    pub msaa: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            swapchain: SwapchainPreferences::default(),
            frames_in_flight: None,
            depth: true,
            msaa: true,
        }
    }
}

impl RenderSettings {
    /// Depth format and sample count to build render targets with.
    pub fn target_options<D: RenderDevice>(&self, device: &D) -> Result<TargetOptions> {
        let depth_format = if self.depth {
            Some(
                device
                    .depth_format()
                    .ok_or(RenderError::NoCompatibleDepthFormat)?,
            )
        } else {
            None
        };
        let samples = if self.msaa {
            device.max_sample_count()
        } else {
            vk::SampleCountFlags::TYPE_1
        };
        Ok(TargetOptions {
            depth_format,
            samples,
        })
    }
}

const NO_TIMEOUT: u64 = u64::MAX;

/// Drives the per-frame synchronization protocol and owns every resource it
/// touches: swapchain, render targets, pipeline, frame slots and the
/// uploaded scene. The device is dropped last.
pub struct FrameScheduler<D: RenderDevice> {
    swapchain: SwapchainManager,
    targets: RenderTargets<D>,
    pipeline: Option<D::Pipeline>,
    frames: FramePool,
    frame_states: Vec<FrameState>,
    /// Fence of the slot that last rendered into each swapchain image.
    images_in_flight: Vec<Option<vk::Fence>>,
    current_frame: usize,
    needs_rebuild: bool,
    scene: DeviceScene<D::Buffer>,
    settings: RenderSettings,
    target_options: TargetOptions,
    stats: FrameStats,
    device: D,
}

impl<D: RenderDevice> FrameScheduler<D> {
    /// Build the swapchain, render targets, pipeline and frame pool.
    pub fn new(device: D, settings: RenderSettings, drawable_size: (u32, u32)) -> Result<Self> {
        let target_options = settings.target_options(&device)?;
        let mut swapchain = SwapchainManager::create(&device, &settings.swapchain, drawable_size)?;

        let mut targets = match RenderTargets::create(&device, &swapchain, target_options) {
            Ok(targets) => targets,
            Err(e) => {
                swapchain.destroy(&device);
                return Err(e);
            }
        };

        let frame_count = frames_in_flight(swapchain.image_count(), settings.frames_in_flight);
        let resources = device
            .create_pipeline(targets.render_pass(), targets.desc())
            .map_err(RenderError::from)
            .and_then(|pipeline| match FramePool::new(&device, frame_count) {
                Ok(frames) => Ok((pipeline, frames)),
                Err(e) => {
                    device.destroy_pipeline(pipeline);
                    Err(e)
                }
            });
        let (pipeline, frames) = match resources {
            Ok(resources) => resources,
            Err(e) => {
                targets.destroy(&device);
                swapchain.destroy(&device);
                return Err(e);
            }
        };

        info!(
            frames_in_flight = frame_count,
            image_count = swapchain.image_count(),
            samples = ?target_options.samples,
            depth = ?target_options.depth_format,
            "Frame scheduler ready"
        );

        Ok(Self {
            images_in_flight: vec![None; swapchain.image_count()],
            frame_states: vec![FrameState::Idle; frame_count],
            swapchain,
            targets,
            pipeline: Some(pipeline),
            frames,
            current_frame: 0,
            needs_rebuild: false,
            scene: DeviceScene::empty(),
            settings,
            target_options,
            stats: FrameStats::default(),
            device,
        })
    }

    /// Replace the drawn scene. Waits for the device to go idle first.
    ///
    /// An empty scene is accepted and results in clear-only frames.
    pub fn load_scene(&mut self, scene: &Scene) -> Result<()> {
        self.device.wait_idle()?;
        self.scene.destroy(&self.device);
        if scene.is_empty() {
            info!("Empty scene loaded, frames will only clear");
            return Ok(());
        }
        self.scene = scene_upload::upload(&self.device, scene)?;
        Ok(())
    }

    /// Mark the swapchain stale so the next frame rebuilds it first.
    pub fn invalidate_swapchain(&mut self) {
        self.needs_rebuild = true;
    }

    /// Render and present one frame.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn draw_frame<W: Window + ?Sized>(&mut self, window: &mut W) -> Result<FrameOutcome> {
        if self.needs_rebuild && !self.rebuild(window)? {
            self.stats.skipped += 1;
            return Ok(FrameOutcome::Skipped);
        }

        let frame = self.current_frame;
        let slot = *self.frames.slot(frame);

        // Throttle: the slot's previous submission must be finished.
        self.device.wait_for_fence(slot.in_flight, NO_TIMEOUT)?;
        self.frame_states[frame] = FrameState::Idle;
        trace!(frame, "Frame slot released");

        self.frame_states[frame] = FrameState::Acquiring;
        let acquired = self.device.acquire_next_image(
            self.swapchain.handle(),
            NO_TIMEOUT,
            slot.image_acquired,
        );
        let acquired = match acquired {
            Ok(acquired) => acquired,
            Err(e) => {
                self.frame_states[frame] = FrameState::Idle;
                return Err(e.into());
            }
        };
        let (image_index, suboptimal) = match acquired {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!(frame, "Swapchain out of date on acquire");
                self.frame_states[frame] = FrameState::Idle;
                self.stats.skipped += 1;
                self.needs_rebuild = true;
                self.rebuild(window)?;
                return Ok(FrameOutcome::Skipped);
            }
        };
        if suboptimal {
            debug!(frame, image_index, "Swapchain suboptimal on acquire");
        }

        // The image may still be rendered by a frame from another slot.
        let image = image_index as usize;
        if let Some(fence) = self.images_in_flight[image] {
            if fence != slot.in_flight {
                trace!(frame, image_index, "Waiting for image to be released");
                self.device.wait_for_fence(fence, NO_TIMEOUT)?;
            }
        }
        self.images_in_flight[image] = Some(slot.in_flight);
        self.device.reset_fence(slot.in_flight)?;

        self.frame_states[frame] = FrameState::Recording;
        self.record(&slot, image_index)?;

        self.device.submit(
            slot.command_buffer,
            slot.image_acquired,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            slot.render_complete,
            slot.in_flight,
        )?;
        self.frame_states[frame] = FrameState::Submitted;

        let presented =
            self.device
                .present(self.swapchain.handle(), image_index, slot.render_complete)?;
        self.frame_states[frame] = FrameState::Presented;

        let rebuild_scheduled = suboptimal || presented.needs_rebuild();
        if rebuild_scheduled {
            debug!(frame, image_index, ?presented, "Swapchain rebuild scheduled");
            self.needs_rebuild = true;
        }

        trace!(frame, image_index, "Frame presented");
        self.stats.presented += 1;
        self.current_frame = (frame + 1) % self.frames.len();

        Ok(FrameOutcome::Presented {
            image_index,
            rebuild_scheduled,
        })
    }

    fn record(&self, slot: &FrameSlot, image_index: u32) -> Result<()> {
        let device = &self.device;
        let cmd = slot.command_buffer;
        let extent = self.targets.extent();
        let Some(pipeline) = &self.pipeline else {
            return Err(GpuError::InvalidState("no graphics pipeline".to_string()).into());
        };

        device.reset_command_buffer(cmd)?;
        device.begin_command_buffer(cmd)?;
        device.cmd_begin_render_pass(
            cmd,
            self.targets.render_pass(),
            self.targets.framebuffer(image_index),
            extent,
            &self.targets.clear_values(),
        );

        if let Some((vertex_buffer, vertex_count)) = self.scene.drawable() {
            device.cmd_set_viewport_and_scissor(cmd, extent);
            device.cmd_bind_pipeline(cmd, pipeline);
            device.cmd_bind_vertex_buffer(cmd, vertex_buffer);
            device.cmd_draw(cmd, vertex_count);
        }

        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd)?;
        Ok(())
    }

    /// Recreate swapchain, render targets and pipeline at the current
    /// drawable size. Frame slots and the scene are kept.
    ///
    /// Returns `false` without rebuilding when the window closed while
    /// minimized.
    fn rebuild<W: Window + ?Sized>(&mut self, window: &mut W) -> Result<bool> {
        window.wait_while_minimized();
        if window.is_minimized() {
            return Ok(false);
        }

        self.device.wait_idle()?;

        if let Some(pipeline) = self.pipeline.take() {
            self.device.destroy_pipeline(pipeline);
        }
        self.targets.destroy(&self.device);

        let drawable_size = window.drawable_size();
        self.swapchain
            .recreate(&self.device, &self.settings.swapchain, drawable_size)?;
        self.targets = RenderTargets::create(&self.device, &self.swapchain, self.target_options)?;
        self.pipeline = Some(
            self.device
                .create_pipeline(self.targets.render_pass(), self.targets.desc())?,
        );

        self.images_in_flight = vec![None; self.swapchain.image_count()];
        self.needs_rebuild = false;
        self.stats.rebuilds += 1;

        info!(
            width = self.swapchain.extent().width,
            height = self.swapchain.extent().height,
            rebuilds = self.stats.rebuilds,
            "Render targets rebuilt"
        );
        Ok(true)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn targets(&self) -> &RenderTargets<D> {
        &self.targets
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn scene(&self) -> &DeviceScene<D::Buffer> {
        &self.scene
    }

    /// Logical frame index `f` the next [`draw_frame`](Self::draw_frame) uses.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frame_state(&self, frame: usize) -> FrameState {
        self.frame_states[frame]
    }

    pub fn images_in_flight(&self) -> &[Option<vk::Fence>] {
        &self.images_in_flight
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }
}

impl<D: RenderDevice> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle on shutdown: {e}");
        }
        self.scene.destroy(&self.device);
        self.frames.destroy(&self.device);
        if let Some(pipeline) = self.pipeline.take() {
            self.device.destroy_pipeline(pipeline);
        }
        self.targets.destroy(&self.device);
        self.swapchain.destroy(&self.device);
        debug!("Frame scheduler destroyed");
    }
}
