//! Scripted in-memory [`RenderDevice`].
//!
//! [`MockDevice`] hands out fabricated handles and simulates just enough of
//! the queue to check the frame loop's synchronization: fences move through
//! unsignaled, pending and signaled, semaphores track whether a signal is
//! outstanding, and every submission records which swapchain image it
//! renders into. Anything the real driver would reject is reported as a
//! violation and, where the call can fail, returned as
//! [`GpuError::InvalidState`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use ash::vk::{self, Handle};
use ember_gpu::{
    AcquireOutcome, GpuError, PresentOutcome, QueueFamilyIndices, RenderPassDesc, Result,
    SurfaceCapabilities, SwapchainCreateDesc,
};
use ember_render::{AttachmentImageDesc, RenderDevice};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Buffer handed out by [`MockDevice`]. Contents live in the device state.
#[derive(Debug, PartialEq, Eq)]
pub struct MockBuffer {
    pub id: u64,
    pub size: u64,
    pub location: MemoryLocation,
}

/// Attachment image handed out by [`MockDevice`].
#[derive(Debug, PartialEq, Eq)]
pub struct MockImage {
    pub image: vk::Image,
    pub desc: AttachmentImageDesc,
}

/// Graphics pipeline handed out by [`MockDevice`].
#[derive(Debug, PartialEq, Eq)]
pub struct MockPipeline {
    pub pipeline: vk::Pipeline,
    pub render_pass: vk::RenderPass,
    pub desc: RenderPassDesc,
}

/// One recorded device call, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCall {
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        extent: vk::Extent2D,
        image_count: u32,
        present_mode: vk::PresentModeKHR,
        /// Queue families the images are shared between when concurrent.
        queue_families: (u32, u32),
        concurrent: bool,
        replaces_old: bool,
    },
    DestroySwapchain(vk::SwapchainKHR),
    Acquire {
        swapchain: vk::SwapchainKHR,
        outcome: AcquireOutcome,
    },
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    CreateFramebuffer {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    CreatePipeline,
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_count: usize,
    },
    SetViewport(vk::Extent2D),
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(u64),
    Draw {
        vertex_count: u32,
    },
    EndRenderPass,
    CopyBuffer {
        src: u64,
        dst: u64,
        size: u64,
    },
    Submit {
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
        image: Option<vk::Image>,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        outcome: PresentOutcome,
    },
    WaitIdle,
    OneShot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

struct SwapchainRecord {
    images: Vec<vk::Image>,
    image_count: u32,
    extent: vk::Extent2D,
    next_image: u32,
}

struct FramebufferRecord {
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

#[derive(Default)]
struct CommandRecord {
    recording: bool,
    framebuffer: Option<vk::Framebuffer>,
    vertex_buffer_bound: bool,
    pipeline_bound: bool,
    last_fence: Option<vk::Fence>,
}

struct BufferRecord {
    data: Vec<u8>,
    location: MemoryLocation,
}

struct MockState {
    next_handle: u64,
    surface: SurfaceCapabilities,
    max_samples: vk::SampleCountFlags,
    depth_format: Option<vk::Format>,
    queue_families: QueueFamilyIndices,

    acquire_calls: u32,
    acquire_out_of_date: HashSet<u32>,
    acquire_suboptimal: HashSet<u32>,
    acquire_script: VecDeque<u32>,
    present_calls: u32,
    present_overrides: HashMap<u32, PresentOutcome>,
    fail_buffer_allocations: bool,
    /// Semaphores that may still be created before creation starts failing.
    semaphore_budget: Option<u32>,

    swapchains: HashMap<vk::SwapchainKHR, SwapchainRecord>,
    retired_swapchains: HashSet<vk::SwapchainKHR>,
    views: HashMap<vk::ImageView, vk::Image>,
    images: HashSet<vk::Image>,
    render_passes: HashSet<vk::RenderPass>,
    framebuffers: HashMap<vk::Framebuffer, FramebufferRecord>,
    pipelines: HashSet<vk::Pipeline>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, bool>,
    command_buffers: HashMap<vk::CommandBuffer, CommandRecord>,
    buffers: HashMap<u64, BufferRecord>,
    /// Swapchain image each submitted fence's work renders into.
    fence_targets: HashMap<vk::Fence, vk::Image>,

    calls: Vec<DeviceCall>,
    violations: Vec<String>,
}

impl MockState {
    fn new() -> Self {
        Self {
            next_handle: 0x1000,
            surface: default_surface(),
            max_samples: vk::SampleCountFlags::TYPE_4,
            depth_format: Some(vk::Format::D32_SFLOAT),
            queue_families: QueueFamilyIndices {
                graphics: 0,
                present: 0,
            },
            acquire_calls: 0,
            acquire_out_of_date: HashSet::new(),
            acquire_suboptimal: HashSet::new(),
            acquire_script: VecDeque::new(),
            present_calls: 0,
            present_overrides: HashMap::new(),
            fail_buffer_allocations: false,
            semaphore_budget: None,
            swapchains: HashMap::new(),
            retired_swapchains: HashSet::new(),
            views: HashMap::new(),
            images: HashSet::new(),
            render_passes: HashSet::new(),
            framebuffers: HashMap::new(),
            pipelines: HashSet::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            command_buffers: HashMap::new(),
            buffers: HashMap::new(),
            fence_targets: HashMap::new(),
            calls: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn handle<T: Handle>(&mut self) -> T {
        self.next_handle += 1;
        T::from_raw(self.next_handle)
    }

    /// Record a misuse. Returns the error for calls that can fail.
    fn violation(&mut self, message: String) -> GpuError {
        warn!(violation = %message, "Mock device misuse");
        self.violations.push(message.clone());
        GpuError::InvalidState(message)
    }

    fn check(&mut self, ok: bool, message: impl FnOnce() -> String) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(self.violation(message()))
        }
    }

    fn swapchain_image_of(&self, view: vk::ImageView) -> Option<vk::Image> {
        let image = *self.views.get(&view)?;
        self.swapchains
            .values()
            .any(|s| s.images.contains(&image))
            .then_some(image)
    }

    fn command(&mut self, cmd: vk::CommandBuffer) -> Option<&mut CommandRecord> {
        self.command_buffers.get_mut(&cmd)
    }
}

/// Byte count as a host length. Sizes past `usize::MAX` saturate so that
/// bounds checks against real buffers fail.
fn host_len(size: u64) -> usize {
    usize::try_from(size).unwrap_or(usize::MAX)
}

fn default_surface() -> SurfaceCapabilities {
    SurfaceCapabilities {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

/// Cloneable handle to a shared scripted device.
///
/// Clones observe the same state, so a test can keep one clone while the
/// frame scheduler owns another and inspect the device after teardown.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Device with a 2..=8 image surface, an undefined current extent,
    /// BGRA sRGB, FIFO and MAILBOX, 4x MSAA and a 32-bit depth format.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
        }
    }

    // Configuration.

    pub fn set_surface(&self, surface: SurfaceCapabilities) {
        self.state.lock().surface = surface;
    }

    /// Change only the image count bounds of the surface.
    pub fn set_image_count_range(&self, min: u32, max: u32) {
        let mut state = self.state.lock();
        state.surface.capabilities.min_image_count = min;
        state.surface.capabilities.max_image_count = max;
    }

    /// Report a defined current extent, as compositors that own the size do.
    pub fn set_current_extent(&self, extent: vk::Extent2D) {
        self.state.lock().surface.capabilities.current_extent = extent;
    }

    pub fn set_max_sample_count(&self, samples: vk::SampleCountFlags) {
        self.state.lock().max_samples = samples;
    }

    pub fn set_depth_format(&self, format: Option<vk::Format>) {
        self.state.lock().depth_format = format;
    }

    pub fn set_queue_families(&self, families: QueueFamilyIndices) {
        self.state.lock().queue_families = families;
    }

    /// Make the `call`-th acquisition (1-based, counted over the device
    /// lifetime) report an out-of-date swapchain.
    pub fn fail_acquire_on(&self, call: u32) {
        self.state.lock().acquire_out_of_date.insert(call);
    }

    /// Make the `call`-th acquisition succeed but report suboptimal.
    pub fn suboptimal_acquire_on(&self, call: u32) {
        self.state.lock().acquire_suboptimal.insert(call);
    }

    /// Image indices returned by the next acquisitions, in order. Once the
    /// script runs out, images are handed out round-robin.
    pub fn script_acquire(&self, indices: impl IntoIterator<Item = u32>) {
        self.state.lock().acquire_script.extend(indices);
    }

    /// Outcome reported by the `call`-th presentation (1-based).
    pub fn present_outcome_on(&self, call: u32, outcome: PresentOutcome) {
        self.state.lock().present_overrides.insert(call, outcome);
    }

    /// Make every following buffer allocation fail as out of memory.
    pub fn fail_buffer_allocations(&self, fail: bool) {
        self.state.lock().fail_buffer_allocations = fail;
    }

    /// Let `count` more semaphores be created, then fail every later
    /// creation as out of device memory.
    pub fn fail_semaphore_creation_after(&self, count: u32) {
        self.state.lock().semaphore_budget = Some(count);
    }

    // Inspection.

    /// Take the call log recorded so far.
    pub fn take_calls(&self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Every misuse detected so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn acquire_calls(&self) -> u32 {
        self.state.lock().acquire_calls
    }

    pub fn present_calls(&self) -> u32 {
        self.state.lock().present_calls
    }

    pub fn framebuffer_extent(&self, framebuffer: vk::Framebuffer) -> Option<vk::Extent2D> {
        self.state
            .lock()
            .framebuffers
            .get(&framebuffer)
            .map(|f| f.extent)
    }

    pub fn swapchain_extent(&self, swapchain: vk::SwapchainKHR) -> Option<vk::Extent2D> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|s| s.extent)
    }

    /// Live swapchains, for checking that rebuilds retire the old one.
    pub fn live_swapchains(&self) -> usize {
        self.state.lock().swapchains.len()
    }

    /// Contents of a buffer, regardless of its memory location.
    pub fn buffer_contents(&self, buffer: &MockBuffer) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer.id)
            .map(|b| b.data.clone())
    }

    /// Descriptions of every object that is still alive.
    pub fn leaks(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut leaks = Vec::new();
        let mut report = |kind: &str, count: usize| {
            if count > 0 {
                leaks.push(format!("{count} {kind}"));
            }
        };
        report("swapchains", state.swapchains.len());
        report("image views", state.views.len());
        report("images", state.images.len());
        report("render passes", state.render_passes.len());
        report("framebuffers", state.framebuffers.len());
        report("pipelines", state.pipelines.len());
        report("fences", state.fences.len());
        report("semaphores", state.semaphores.len());
        report("command buffers", state.command_buffers.len());
        report("buffers", state.buffers.len());
        leaks
    }
}

impl RenderDevice for MockDevice {
    type Buffer = MockBuffer;
    type Image = MockImage;
    type Pipeline = MockPipeline;

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        Ok(self.state.lock().surface.clone())
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.state.lock().queue_families
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(1)
    }

    fn max_sample_count(&self) -> vk::SampleCountFlags {
        self.state.lock().max_samples
    }

    fn depth_format(&self) -> Option<vk::Format> {
        self.state.lock().depth_format
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainCreateDesc,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let caps = state.surface.capabilities;
        state.check(desc.min_image_count >= caps.min_image_count, || {
            format!(
                "swapchain requests {} images, surface minimum is {}",
                desc.min_image_count, caps.min_image_count
            )
        })?;
        state.check(
            caps.max_image_count == 0 || desc.min_image_count <= caps.max_image_count,
            || {
                format!(
                    "swapchain requests {} images, surface maximum is {}",
                    desc.min_image_count, caps.max_image_count
                )
            },
        )?;
        state.check(desc.extent.width > 0 && desc.extent.height > 0, || {
            "swapchain extent has a zero dimension".to_string()
        })?;
        let old = desc.old_swapchain;
        state.check(
            old == vk::SwapchainKHR::null()
                || (state.swapchains.contains_key(&old)
                    && !state.retired_swapchains.contains(&old)),
            || format!("old swapchain {old:?} is not a live, unretired swapchain"),
        )?;
        if old != vk::SwapchainKHR::null() {
            state.retired_swapchains.insert(old);
        }

        let swapchain = state.handle();
        let images: Vec<vk::Image> = (0..desc.min_image_count).map(|_| state.handle()).collect();
        state.swapchains.insert(
            swapchain,
            SwapchainRecord {
                images: images.clone(),
                image_count: desc.min_image_count,
                extent: desc.extent,
                next_image: 0,
            },
        );
        state.calls.push(DeviceCall::CreateSwapchain {
            swapchain,
            extent: desc.extent,
            image_count: desc.min_image_count,
            present_mode: desc.present_mode,
            queue_families: (desc.graphics_family, desc.present_family),
            concurrent: desc.is_concurrent(),
            replaces_old: old != vk::SwapchainKHR::null(),
        });
        debug!(?swapchain, images = images.len(), "Mock swapchain created");
        Ok((swapchain, images))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(record) = state.swapchains.remove(&swapchain) else {
            state.violation(format!("destroying unknown swapchain {swapchain:?}"));
            return;
        };
        state.retired_swapchains.remove(&swapchain);
        let orphaned = state
            .views
            .values()
            .filter(|image| record.images.contains(image))
            .count();
        if orphaned > 0 {
            state.violation(format!(
                "swapchain {swapchain:?} destroyed with {orphaned} live image views"
            ));
        }
        state.calls.push(DeviceCall::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.acquire_calls += 1;
        let call = state.acquire_calls;

        state.check(!state.retired_swapchains.contains(&swapchain), || {
            format!("acquiring from retired swapchain {swapchain:?}")
        })?;
        let image_count = match state.swapchains.get(&swapchain) {
            Some(record) => record.image_count,
            None => {
                return Err(state.violation(format!(
                    "acquiring from unknown swapchain {swapchain:?}"
                )))
            }
        };

        let outcome = if state.acquire_out_of_date.contains(&call) {
            AcquireOutcome::OutOfDate
        } else {
            let index = match state.acquire_script.pop_front() {
                Some(index) => index,
                None => {
                    let record = state
                        .swapchains
                        .get_mut(&swapchain)
                        .ok_or(GpuError::InvalidState("swapchain vanished".to_string()))?;
                    let index = record.next_image;
                    record.next_image = (index + 1) % image_count;
                    index
                }
            };
            state.check(index < image_count, || {
                format!("scripted image index {index} out of range for {image_count} images")
            })?;

            match state.semaphores.get(&signal).copied() {
                Some(false) => {
                    state.semaphores.insert(signal, true);
                }
                Some(true) => {
                    return Err(state.violation(format!(
                        "acquire signals semaphore {signal:?} that is already signaled"
                    )))
                }
                None => {
                    return Err(state.violation(format!(
                        "acquire signals unknown semaphore {signal:?}"
                    )))
                }
            }
            AcquireOutcome::Acquired {
                index,
                suboptimal: state.acquire_suboptimal.contains(&call),
            }
        };

        state.calls.push(DeviceCall::Acquire { swapchain, outcome });
        Ok(outcome)
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.present_calls += 1;
        let call = state.present_calls;

        let image_count = state
            .swapchains
            .get(&swapchain)
            .map(|s| s.image_count);
        state.check(image_count.is_some_and(|n| image_index < n), || {
            format!("presenting image {image_index} of unknown swapchain {swapchain:?}")
        })?;
        state.check(state.semaphores.get(&wait) == Some(&true), || {
            format!("present waits on semaphore {wait:?} that nothing signaled")
        })?;
        state.semaphores.insert(wait, false);

        let outcome = state
            .present_overrides
            .get(&call)
            .copied()
            .unwrap_or(PresentOutcome::Optimal);
        state.calls.push(DeviceCall::Present {
            swapchain,
            image_index,
            outcome,
        });
        Ok(outcome)
    }

    fn create_image(&self, desc: &AttachmentImageDesc, _name: &str) -> Result<MockImage> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let image = state.handle();
        state.images.insert(image);
        Ok(MockImage { image, desc: *desc })
    }

    fn image_handle(image: &MockImage) -> vk::Image {
        image.image
    }

    fn destroy_image(&self, image: MockImage) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.images.remove(&image.image) {
            state.violation(format!("destroying unknown image {:?}", image.image));
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let known = state.images.contains(&image)
            || state.swapchains.values().any(|s| s.images.contains(&image));
        state.check(known, || format!("view of unknown image {image:?}"))?;
        let view = state.handle();
        state.views.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.views.remove(&view).is_none() {
            state.violation(format!("destroying unknown image view {view:?}"));
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let supported = state.max_samples;
        state.check(desc.samples.as_raw() <= supported.as_raw(), || {
            format!(
                "render pass uses {:?}, device supports {supported:?}",
                desc.samples
            )
        })?;
        let render_pass = state.handle();
        state.render_passes.insert(render_pass);
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.render_passes.remove(&render_pass) {
            state.violation(format!("destroying unknown render pass {render_pass:?}"));
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let known_pass = state.render_passes.contains(&render_pass);
        state.check(known_pass, || {
            format!("framebuffer for unknown render pass {render_pass:?}")
        })?;
        let known_views = views.iter().all(|v| state.views.contains_key(v));
        state.check(known_views, || {
            "framebuffer references an unknown image view".to_string()
        })?;
        let framebuffer = state.handle();
        state.framebuffers.insert(
            framebuffer,
            FramebufferRecord {
                views: views.to_vec(),
                extent,
            },
        );
        state.calls.push(DeviceCall::CreateFramebuffer {
            framebuffer,
            extent,
        });
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.framebuffers.remove(&framebuffer).is_none() {
            state.violation(format!("destroying unknown framebuffer {framebuffer:?}"));
        }
    }

    fn create_pipeline(
        &self,
        render_pass: vk::RenderPass,
        desc: &RenderPassDesc,
    ) -> Result<MockPipeline> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.check(state.render_passes.contains(&render_pass), || {
            format!("pipeline for unknown render pass {render_pass:?}")
        })?;
        let pipeline = state.handle();
        state.pipelines.insert(pipeline);
        state.calls.push(DeviceCall::CreatePipeline);
        Ok(MockPipeline {
            pipeline,
            render_pass,
            desc: *desc,
        })
    }

    fn destroy_pipeline(&self, pipeline: MockPipeline) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.pipelines.remove(&pipeline.pipeline) {
            state.violation(format!("destroying unknown pipeline {:?}", pipeline.pipeline));
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let fence = state.handle();
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(DeviceCall::WaitFence(fence));
        match state.fences.get(&fence).copied() {
            Some(FenceState::Pending | FenceState::Signaled) => {
                state.fences.insert(fence, FenceState::Signaled);
                Ok(())
            }
            // Nothing will ever signal it: the real wait would hang.
            Some(FenceState::Unsignaled) => Err(state.violation(format!(
                "waiting on fence {fence:?} that was never submitted"
            ))),
            None => Err(state.violation(format!("waiting on unknown fence {fence:?}"))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(DeviceCall::ResetFence(fence));
        match state.fences.get(&fence).copied() {
            Some(FenceState::Pending) => Err(state.violation(format!(
                "resetting fence {fence:?} while its submission is pending"
            ))),
            Some(_) => {
                state.fences.insert(fence, FenceState::Unsignaled);
                state.fence_targets.remove(&fence);
                Ok(())
            }
            None => Err(state.violation(format!("resetting unknown fence {fence:?}"))),
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.fences.remove(&fence) {
            Some(FenceState::Pending) => {
                state.violation(format!("destroying fence {fence:?} while pending"));
            }
            Some(_) => {}
            None => {
                state.violation(format!("destroying unknown fence {fence:?}"));
            }
        }
        state.fence_targets.remove(&fence);
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &mut state.semaphore_budget {
            Some(0) => return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        let semaphore = state.handle();
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.semaphores.remove(&semaphore).is_none() {
            state.violation(format!("destroying unknown semaphore {semaphore:?}"));
        }
    }

    fn wait_idle(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for fence_state in state.fences.values_mut() {
            if *fence_state == FenceState::Pending {
                *fence_state = FenceState::Signaled;
            }
        }
        state.calls.push(DeviceCall::WaitIdle);
        Ok(())
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        Ok((0..count)
            .map(|_| {
                let cmd = state.handle();
                state.command_buffers.insert(cmd, CommandRecord::default());
                cmd
            })
            .collect())
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for cmd in command_buffers {
            if state.command_buffers.remove(cmd).is_none() {
                state.violation(format!("freeing unknown command buffer {cmd:?}"));
            }
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let last_fence = match state.command(cmd) {
            Some(record) => record.last_fence,
            None => {
                return Err(state.violation(format!(
                    "resetting unknown command buffer {cmd:?}"
                )))
            }
        };
        if let Some(fence) = last_fence {
            state.check(state.fences.get(&fence) != Some(&FenceState::Pending), || {
                format!("resetting command buffer {cmd:?} while the GPU may still execute it")
            })?;
        }
        if let Some(record) = state.command(cmd) {
            *record = CommandRecord {
                last_fence,
                ..CommandRecord::default()
            };
        }
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.command(cmd) {
            Some(record) if !record.recording => {
                record.recording = true;
                Ok(())
            }
            Some(_) => Err(state.violation(format!("command buffer {cmd:?} is already recording"))),
            None => Err(state.violation(format!("beginning unknown command buffer {cmd:?}"))),
        }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.command(cmd) {
            Some(record) if record.recording => {
                record.recording = false;
                Ok(())
            }
            _ => Err(state.violation(format!(
                "ending command buffer {cmd:?} that is not recording"
            ))),
        }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.render_passes.contains(&render_pass) {
            state.violation(format!("beginning unknown render pass {render_pass:?}"));
        }
        match state.framebuffers.get(&framebuffer).map(|f| f.extent) {
            Some(fb_extent) if fb_extent != extent => {
                state.violation(format!(
                    "render area {extent:?} does not match framebuffer extent {fb_extent:?}"
                ));
            }
            Some(_) => {}
            None => {
                state.violation(format!(
                    "beginning render pass on unknown framebuffer {framebuffer:?}"
                ));
            }
        }
        if let Some(record) = state.command(cmd) {
            record.framebuffer = Some(framebuffer);
        }
        state.calls.push(DeviceCall::BeginRenderPass {
            framebuffer,
            extent,
            clear_count: clear_values.len(),
        });
    }

    fn cmd_set_viewport_and_scissor(&self, _cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.state.lock().calls.push(DeviceCall::SetViewport(extent));
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: &MockPipeline) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.pipelines.contains(&pipeline.pipeline) {
            state.violation(format!("binding destroyed pipeline {:?}", pipeline.pipeline));
        }
        if let Some(record) = state.command(cmd) {
            record.pipeline_bound = true;
        }
        state.calls.push(DeviceCall::BindPipeline(pipeline.pipeline));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: &MockBuffer) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.buffers.contains_key(&buffer.id) {
            state.violation(format!("binding destroyed buffer {}", buffer.id));
        }
        if let Some(record) = state.command(cmd) {
            record.vertex_buffer_bound = true;
        }
        state.calls.push(DeviceCall::BindVertexBuffer(buffer.id));
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let ready = state
            .command(cmd)
            .map(|r| r.framebuffer.is_some() && r.pipeline_bound && r.vertex_buffer_bound);
        if ready != Some(true) {
            state.violation(format!(
                "draw on {cmd:?} without a render pass, pipeline and vertex buffer"
            ));
        }
        state.calls.push(DeviceCall::Draw { vertex_count });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.state.lock().calls.push(DeviceCall::EndRenderPass);
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: &MockBuffer,
        dst: &MockBuffer,
        size: u64,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(DeviceCall::CopyBuffer {
            src: src.id,
            dst: dst.id,
            size,
        });
        let len = host_len(size);
        let Some(data) = state
            .buffers
            .get(&src.id)
            .filter(|b| b.data.len() >= len)
            .map(|b| b.data[..len].to_vec())
        else {
            state.violation(format!("copy of {size} bytes out of buffer {}", src.id));
            return;
        };
        match state.buffers.get_mut(&dst.id) {
            Some(target) if target.data.len() >= len => target.data[..len].copy_from_slice(&data),
            _ => {
                state.violation(format!("copy of {size} bytes into buffer {}", dst.id));
            }
        }
    }

    fn submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        _wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.check(state.fences.get(&fence) == Some(&FenceState::Unsignaled), || {
            format!("submitting with fence {fence:?} that is not reset")
        })?;
        state.check(state.semaphores.get(&wait) == Some(&true), || {
            format!("submission waits on semaphore {wait:?} that nothing signaled")
        })?;
        state.check(state.semaphores.get(&signal) == Some(&false), || {
            format!("submission signals semaphore {signal:?} that is already signaled")
        })?;
        let framebuffer = match state.command(cmd) {
            Some(record) if !record.recording => record.framebuffer,
            Some(_) => return Err(state.violation(format!("submitting {cmd:?} while recording"))),
            None => {
                return Err(state.violation(format!(
                    "submitting unknown command buffer {cmd:?}"
                )))
            }
        };

        let image = framebuffer
            .and_then(|fb| state.framebuffers.get(&fb))
            .and_then(|fb| fb.views.iter().find_map(|&v| state.swapchain_image_of(v)));

        if let Some(image) = image {
            let overlapping = state
                .fence_targets
                .iter()
                .find(|&(&other, &target)| {
                    other != fence
                        && target == image
                        && state.fences.get(&other) == Some(&FenceState::Pending)
                })
                .map(|(&other, _)| other);
            if let Some(other) = overlapping {
                return Err(state.violation(format!(
                    "image {image:?} rendered while fence {other:?} still renders into it"
                )));
            }
            state.fence_targets.insert(fence, image);
        }

        state.semaphores.insert(wait, false);
        state.semaphores.insert(signal, true);
        state.fences.insert(fence, FenceState::Pending);
        if let Some(record) = state.command(cmd) {
            record.last_fence = Some(fence);
        }
        state.calls.push(DeviceCall::Submit {
            command_buffer: cmd,
            fence,
            image,
        });
        Ok(())
    }

    fn execute_one_shot(&self, record: &mut dyn FnMut(vk::CommandBuffer)) -> Result<()> {
        let cmd = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.calls.push(DeviceCall::OneShot);
            state.handle::<vk::CommandBuffer>()
        };
        record(cmd);
        Ok(())
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        _name: &str,
    ) -> Result<MockBuffer> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.fail_buffer_allocations {
            return Err(GpuError::AllocationFailed {
                size,
                usage: format!("{usage:?}"),
                reason: "out of device memory".to_string(),
            });
        }
        let Ok(len) = usize::try_from(size) else {
            return Err(state.violation(format!(
                "buffer of {size} bytes does not fit in host memory"
            )));
        };
        let id = state.next_handle + 1;
        state.next_handle = id;
        state.buffers.insert(
            id,
            BufferRecord {
                data: vec![0; len],
                location,
            },
        );
        Ok(MockBuffer { id, size, location })
    }

    fn write_buffer(&self, buffer: &MockBuffer, data: &[u8]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(record) = state.buffers.get(&buffer.id) else {
            return Err(state.violation(format!("writing unknown buffer {}", buffer.id)));
        };
        let location = record.location;
        let capacity = record.data.len();
        state.check(location != MemoryLocation::GpuOnly, || {
            format!("host write to device-local buffer {}", buffer.id)
        })?;
        state.check(data.len() <= capacity, || {
            format!("writing {} bytes into {capacity}-byte buffer", data.len())
        })?;
        if let Some(record) = state.buffers.get_mut(&buffer.id) {
            record.data[..data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &MockBuffer, len: u64) -> Result<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(record) = state.buffers.get(&buffer.id) else {
            return Err(state.violation(format!("reading unknown buffer {}", buffer.id)));
        };
        let location = record.location;
        let len = host_len(len);
        let bytes = record.data.get(..len).map(<[u8]>::to_vec);
        state.check(location != MemoryLocation::GpuOnly, || {
            format!("host read of device-local buffer {}", buffer.id)
        })?;
        bytes.ok_or_else(|| {
            state.violation(format!(
                "reading {len} bytes past the end of buffer {}",
                buffer.id
            ))
        })
    }

    fn destroy_buffer(&self, buffer: MockBuffer) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.buffers.remove(&buffer.id).is_none() {
            state.violation(format!("destroying unknown buffer {}", buffer.id));
        }
    }
}
