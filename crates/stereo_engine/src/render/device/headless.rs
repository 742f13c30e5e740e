//! Headless graphics device
//!
//! An in-memory [`GraphicsDevice`] for tests and for running the frame loop
//! without a GPU. Buffers are byte vectors, recorded commands are kept for
//! inspection and GPU execution is simulated on a virtual clock: every
//! submission completes `latency` after the queue becomes free, and only
//! fence waits move the clock forward.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use super::{
    BufferDesc, BufferHandle, Command, CommandContextHandle, DescriptorBinding,
    DescriptorSetHandle, DescriptorSetLayoutHandle, Extent2D, FenceHandle, FramebufferHandle,
    GraphicsDevice, ImageHandle, ImageViewHandle, MemoryLocation, PipelineHandle,
    PipelineLayoutHandle, RenderPassHandle, SemaphoreHandle, Submission,
};
use crate::config::HeadlessConfig;
use crate::render::error::{RenderError, RenderResult};

/// Kinds of device objects the headless device tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Buffer
    Buffer,
    /// Image
    Image,
    /// Image view
    ImageView,
    /// Framebuffer
    Framebuffer,
    /// Render pass
    RenderPass,
    /// Pipeline
    Pipeline,
    /// Pipeline layout
    PipelineLayout,
    /// Descriptor set layout
    DescriptorSetLayout,
    /// Descriptor set
    DescriptorSet,
    /// Command context
    CommandContext,
    /// Fence
    Fence,
    /// Semaphore
    Semaphore,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observable device activity, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A buffer was mapped
    Map(BufferHandle),
    /// A buffer was unmapped
    Unmap(BufferHandle),
    /// The host waited on a fence
    FenceWait(FenceHandle),
    /// A fence was reset
    FenceReset(FenceHandle),
    /// Work was queued; `submission` counts from zero
    Submit {
        /// Submission sequence number
        submission: u64,
        /// Fence the submission signals
        fence: FenceHandle,
    },
    /// The simulated GPU finished a submission
    GpuComplete {
        /// Submission sequence number
        submission: u64,
        /// Fence that became signaled
        fence: FenceHandle,
    },
    /// A presentation image was acquired
    Acquire(u32),
    /// A presentation image was presented
    Present(u32),
    /// An object was destroyed
    Destroy {
        /// Object kind
        kind: ObjectKind,
        /// Raw handle
        handle: u64,
    },
}

/// Commands of one submission, captured at submit time
#[derive(Debug, Clone)]
pub struct SubmittedWork {
    /// Submission sequence number
    pub submission: u64,
    /// Context that was submitted
    pub context: CommandContextHandle,
    /// Commands recorded into it
    pub commands: Vec<Command>,
}

struct HeadlessBuffer {
    label: &'static str,
    location: MemoryLocation,
    data: Vec<u8>,
    mapped: bool,
}

#[derive(Default)]
struct ContextState {
    recording: bool,
    commands: Vec<Command>,
}

#[derive(Clone, Copy)]
struct FenceState {
    signaled: bool,
    pending: Option<u64>,
}

struct PendingSubmission {
    submission: u64,
    fence: FenceHandle,
    complete_at: Duration,
}

/// In-memory device with a simulated GPU timeline
pub struct HeadlessDevice {
    latency: Duration,
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    buffers: HashMap<BufferHandle, HeadlessBuffer>,
    contexts: HashMap<CommandContextHandle, ContextState>,
    fences: HashMap<FenceHandle, FenceState>,
    semaphores: HashMap<SemaphoreHandle, bool>,
    descriptor_sets: HashMap<DescriptorSetHandle, Vec<DescriptorBinding>>,
    clock: Duration,
    queue_free_at: Duration,
    in_flight: VecDeque<PendingSubmission>,
    submission_count: u64,
    submissions: Vec<SubmittedWork>,
    events: Vec<DeviceEvent>,
    presentation_images: Vec<ImageHandle>,
    presentation_extent: Extent2D,
    next_image: u32,
    stalled: bool,
    acquire_stalled: bool,
}

impl HeadlessDevice {
    /// Create a device with `config.swapchain_images` presentation images
    pub fn new(config: &HeadlessConfig, presentation_extent: Extent2D) -> Self {
        let mut device = Self {
            latency: config.gpu_latency(),
            next_handle: 1,
            live: HashMap::new(),
            buffers: HashMap::new(),
            contexts: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            descriptor_sets: HashMap::new(),
            clock: Duration::ZERO,
            queue_free_at: Duration::ZERO,
            in_flight: VecDeque::new(),
            submission_count: 0,
            submissions: Vec::new(),
            events: Vec::new(),
            presentation_images: Vec::new(),
            presentation_extent,
            next_image: 0,
            stalled: false,
            acquire_stalled: false,
        };

        // Swapchain images belong to the presentation engine, not the live set
        for _ in 0..config.swapchain_images.max(1) {
            let handle = ImageHandle(device.allocate_handle());
            device.presentation_images.push(handle);
        }

        log::info!(
            "Headless device ready: {} presentation images, {:?} simulated GPU latency",
            device.presentation_images.len(),
            device.latency
        );
        device
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn create_object(&mut self, kind: ObjectKind) -> u64 {
        let handle = self.allocate_handle();
        self.live.insert(handle, kind);
        log::trace!("HeadlessDevice: created {kind} {handle}");
        handle
    }

    fn destroy_object(&mut self, kind: ObjectKind, handle: u64) {
        match self.live.remove(&handle) {
            Some(found) if found == kind => {
                self.events.push(DeviceEvent::Destroy { kind, handle });
            }
            Some(found) => panic!("destroying {found} {handle} as a {kind}"),
            None => panic!("destroying unknown or already destroyed {kind} {handle}"),
        }
    }

    /// Create an image (external setup helper)
    pub fn create_image(&mut self) -> ImageHandle {
        ImageHandle(self.create_object(ObjectKind::Image))
    }

    /// Create an image view (external setup helper)
    pub fn create_image_view(&mut self, _image: ImageHandle) -> ImageViewHandle {
        ImageViewHandle(self.create_object(ObjectKind::ImageView))
    }

    /// Create a render pass (external setup helper)
    pub fn create_render_pass(&mut self) -> RenderPassHandle {
        RenderPassHandle(self.create_object(ObjectKind::RenderPass))
    }

    /// Create a framebuffer (external setup helper)
    pub fn create_framebuffer(
        &mut self,
        _render_pass: RenderPassHandle,
        _attachments: &[ImageViewHandle],
    ) -> FramebufferHandle {
        FramebufferHandle(self.create_object(ObjectKind::Framebuffer))
    }

    /// Create a pipeline layout (external setup helper)
    pub fn create_pipeline_layout(&mut self) -> PipelineLayoutHandle {
        PipelineLayoutHandle(self.create_object(ObjectKind::PipelineLayout))
    }

    /// Create a pipeline (external setup helper)
    pub fn create_pipeline(&mut self, _layout: PipelineLayoutHandle) -> PipelineHandle {
        PipelineHandle(self.create_object(ObjectKind::Pipeline))
    }

    /// Create a descriptor set layout (external setup helper)
    pub fn create_descriptor_set_layout(&mut self) -> DescriptorSetLayoutHandle {
        DescriptorSetLayoutHandle(self.create_object(ObjectKind::DescriptorSetLayout))
    }

    /// Allocate a set that samples images (external setup helper)
    pub fn create_image_descriptor_set(
        &mut self,
        _layout: DescriptorSetLayoutHandle,
        _views: &[ImageViewHandle],
    ) -> DescriptorSetHandle {
        let handle = DescriptorSetHandle(self.create_object(ObjectKind::DescriptorSet));
        self.descriptor_sets.insert(handle, Vec::new());
        handle
    }

    /// Device activity so far
    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    /// Drain the activity log
    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Every submission so far with its commands
    pub fn submissions(&self) -> &[SubmittedWork] {
        &self.submissions
    }

    /// Commands currently recorded in a context
    pub fn recorded_commands(&self, context: CommandContextHandle) -> &[Command] {
        self.contexts
            .get(&context)
            .map_or(&[], |state| state.commands.as_slice())
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    /// Buffers bound by a descriptor set
    pub fn descriptor_bindings(&self, set: DescriptorSetHandle) -> Option<&[DescriptorBinding]> {
        self.descriptor_sets.get(&set).map(Vec::as_slice)
    }

    /// Number of objects created and not yet destroyed
    pub fn live_object_count(&self) -> usize {
        self.live.len()
    }

    /// Whether a handle refers to a live object
    pub fn is_live(&self, handle: u64) -> bool {
        self.live.contains_key(&handle)
    }

    /// Current virtual GPU time
    pub fn clock(&self) -> Duration {
        self.clock
    }

    /// Let host-side time pass, completing any work that finishes meanwhile
    pub fn advance_clock(&mut self, elapsed: Duration) {
        self.clock += elapsed;
        self.retire_completed();
    }

    /// Submissions not yet completed
    pub fn pending_submissions(&self) -> usize {
        self.in_flight.len()
    }

    /// Make the simulated GPU stop completing work
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Make every image acquire time out
    pub fn set_acquire_stalled(&mut self, stalled: bool) {
        self.acquire_stalled = stalled;
    }

    fn retire_completed(&mut self) {
        if self.stalled {
            return;
        }
        while let Some(front) = self.in_flight.front() {
            if front.complete_at > self.clock {
                break;
            }
            let Some(done) = self.in_flight.pop_front() else {
                break;
            };
            if let Some(fence) = self.fences.get_mut(&done.fence) {
                fence.signaled = true;
                fence.pending = None;
            }
            self.events.push(DeviceEvent::GpuComplete {
                submission: done.submission,
                fence: done.fence,
            });
        }
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> RenderResult<&mut HeadlessBuffer> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::invalid(format!("unknown buffer {}", buffer.0)))
    }

    fn take_semaphore(&mut self, semaphore: SemaphoreHandle, user: &str) -> RenderResult<()> {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => {
                *signaled = false;
                Ok(())
            }
            Some(_) => Err(RenderError::invalid(format!(
                "{user} waits on semaphore {} that nothing signals",
                semaphore.0
            ))),
            None => Err(RenderError::invalid(format!(
                "unknown semaphore {}",
                semaphore.0
            ))),
        }
    }

    fn signal_semaphore(&mut self, semaphore: SemaphoreHandle) -> RenderResult<()> {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) => {
                *signaled = true;
                Ok(())
            }
            None => Err(RenderError::invalid(format!(
                "unknown semaphore {}",
                semaphore.0
            ))),
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        if desc.size == 0 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        let size = usize::try_from(desc.size).map_err(|_| {
            RenderError::ResourceCreationFailed(format!("buffer '{}' too large", desc.label))
        })?;

        let handle = BufferHandle(self.create_object(ObjectKind::Buffer));
        self.buffers.insert(
            handle,
            HeadlessBuffer {
                label: desc.label,
                location: desc.location,
                data: vec![0; size],
                mapped: false,
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.destroy_object(ObjectKind::Buffer, buffer.0);
        self.buffers.remove(&buffer);
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> RenderResult<&mut [u8]> {
        let entry = self.buffer_mut(buffer)?;
        if entry.location != MemoryLocation::CpuToGpu {
            return Err(RenderError::invalid(format!(
                "buffer '{}' is not host visible",
                entry.label
            )));
        }
        if entry.mapped {
            return Err(RenderError::invalid(format!(
                "buffer '{}' is already mapped",
                entry.label
            )));
        }
        entry.mapped = true;
        self.events.push(DeviceEvent::Map(buffer));

        // Re-borrow after the event push
        let entry = self.buffer_mut(buffer)?;
        Ok(entry.data.as_mut_slice())
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.get_mut(&buffer) {
            assert!(entry.mapped, "unmapping buffer '{}' that is not mapped", entry.label);
            entry.mapped = false;
            self.events.push(DeviceEvent::Unmap(buffer));
        }
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.destroy_object(ObjectKind::Image, image.0);
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        self.destroy_object(ObjectKind::ImageView, view.0);
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.destroy_object(ObjectKind::Framebuffer, framebuffer.0);
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        self.destroy_object(ObjectKind::RenderPass, render_pass.0);
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.destroy_object(ObjectKind::Pipeline, pipeline.0);
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        self.destroy_object(ObjectKind::PipelineLayout, layout.0);
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        self.destroy_object(ObjectKind::DescriptorSetLayout, layout.0);
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
        bindings: &[DescriptorBinding],
    ) -> RenderResult<DescriptorSetHandle> {
        if !self.is_live(layout.0) {
            return Err(RenderError::ResourceCreationFailed(format!(
                "descriptor set layout {} does not exist",
                layout.0
            )));
        }
        if let Some(missing) = bindings.iter().find(|b| !self.buffers.contains_key(&b.buffer)) {
            return Err(RenderError::ResourceCreationFailed(format!(
                "binding {} refers to unknown buffer {}",
                missing.binding, missing.buffer.0
            )));
        }
        let handle = DescriptorSetHandle(self.create_object(ObjectKind::DescriptorSet));
        self.descriptor_sets.insert(handle, bindings.to_vec());
        Ok(handle)
    }

    fn free_descriptor_set(&mut self, set: DescriptorSetHandle) {
        self.destroy_object(ObjectKind::DescriptorSet, set.0);
        self.descriptor_sets.remove(&set);
    }

    fn create_command_context(&mut self) -> RenderResult<CommandContextHandle> {
        let handle = CommandContextHandle(self.create_object(ObjectKind::CommandContext));
        self.contexts.insert(handle, ContextState::default());
        Ok(handle)
    }

    fn destroy_command_context(&mut self, context: CommandContextHandle) {
        self.destroy_object(ObjectKind::CommandContext, context.0);
        self.contexts.remove(&context);
    }

    fn reset_command_context(&mut self, context: CommandContextHandle) -> RenderResult<()> {
        let pending = self.in_flight.iter().any(|p| {
            self.submissions
                .get(p.submission as usize)
                .is_some_and(|work| work.context == context)
        });
        if pending {
            return Err(RenderError::invalid(format!(
                "command context {} reset while the GPU may still execute it",
                context.0
            )));
        }
        let state = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| RenderError::invalid(format!("unknown context {}", context.0)))?;
        state.recording = false;
        state.commands.clear();
        Ok(())
    }

    fn begin_commands(&mut self, context: CommandContextHandle) -> RenderResult<()> {
        let state = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| RenderError::invalid(format!("unknown context {}", context.0)))?;
        if state.recording {
            return Err(RenderError::invalid("command context already recording"));
        }
        state.recording = true;
        state.commands.clear();
        Ok(())
    }

    fn record(&mut self, context: CommandContextHandle, command: &Command) {
        let state = self
            .contexts
            .get_mut(&context)
            .unwrap_or_else(|| panic!("recording into unknown context {}", context.0));
        assert!(state.recording, "recording into context {} outside begin/end", context.0);
        state.commands.push(command.clone());
    }

    fn end_commands(&mut self, context: CommandContextHandle) -> RenderResult<()> {
        let state = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| RenderError::invalid(format!("unknown context {}", context.0)))?;
        if !state.recording {
            return Err(RenderError::invalid("command context is not recording"));
        }
        state.recording = false;
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle> {
        let handle = FenceHandle(self.create_object(ObjectKind::Fence));
        self.fences.insert(
            handle,
            FenceState {
                signaled,
                pending: None,
            },
        );
        Ok(handle)
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.destroy_object(ObjectKind::Fence, fence.0);
        self.fences.remove(&fence);
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> RenderResult<()> {
        self.events.push(DeviceEvent::FenceWait(fence));
        let state = *self
            .fences
            .get(&fence)
            .ok_or_else(|| RenderError::invalid(format!("unknown fence {}", fence.0)))?;

        if state.signaled {
            return Ok(());
        }

        let completes_at = state.pending.and_then(|submission| {
            self.in_flight
                .iter()
                .find(|p| p.submission == submission)
                .map(|p| p.complete_at)
        });

        match completes_at {
            Some(at) if !self.stalled && at.saturating_sub(self.clock) <= timeout => {
                self.clock = self.clock.max(at);
                self.retire_completed();
                Ok(())
            }
            _ => {
                // Unsubmitted fence or stalled queue: the whole timeout elapses
                self.clock += timeout;
                self.retire_completed();
                Err(RenderError::Timeout {
                    operation: "wait_fence",
                    timeout,
                })
            }
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        let state = self
            .fences
            .get_mut(&fence)
            .ok_or_else(|| RenderError::invalid(format!("unknown fence {}", fence.0)))?;
        if state.pending.is_some() {
            return Err(RenderError::invalid(format!(
                "fence {} reset while its submission is pending",
                fence.0
            )));
        }
        state.signaled = false;
        self.events.push(DeviceEvent::FenceReset(fence));
        Ok(())
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        let handle = SemaphoreHandle(self.create_object(ObjectKind::Semaphore));
        self.semaphores.insert(handle, false);
        Ok(handle)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.destroy_object(ObjectKind::Semaphore, semaphore.0);
        self.semaphores.remove(&semaphore);
    }

    fn submit(&mut self, submission: &Submission) -> RenderResult<()> {
        if let Some(mapped) = self.buffers.values().find(|b| b.mapped) {
            panic!("queue submit while buffer '{}' is still mapped", mapped.label);
        }

        let commands = match self.contexts.get(&submission.context) {
            Some(state) if !state.recording => state.commands.clone(),
            Some(_) => {
                return Err(RenderError::invalid(
                    "submitting a context that is still recording",
                ))
            }
            None => {
                return Err(RenderError::invalid(format!(
                    "unknown context {}",
                    submission.context.0
                )))
            }
        };

        match self.fences.get(&submission.fence) {
            Some(state) if !state.signaled && state.pending.is_none() => {}
            Some(_) => {
                return Err(RenderError::invalid(format!(
                    "fence {} must be unsignaled and idle at submit",
                    submission.fence.0
                )))
            }
            None => {
                return Err(RenderError::invalid(format!(
                    "unknown fence {}",
                    submission.fence.0
                )))
            }
        }

        self.take_semaphore(submission.wait_semaphore, "submit")?;
        self.signal_semaphore(submission.signal_semaphore)?;

        let index = self.submission_count;
        self.submission_count += 1;

        let start = self.clock.max(self.queue_free_at);
        let complete_at = start + self.latency;
        self.queue_free_at = complete_at;

        if let Some(state) = self.fences.get_mut(&submission.fence) {
            state.pending = Some(index);
        }
        self.in_flight.push_back(PendingSubmission {
            submission: index,
            fence: submission.fence,
            complete_at,
        });
        self.submissions.push(SubmittedWork {
            submission: index,
            context: submission.context,
            commands,
        });
        self.events.push(DeviceEvent::Submit {
            submission: index,
            fence: submission.fence,
        });
        log::trace!("HeadlessDevice: submission {index} completes at {complete_at:?}");
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        signal: SemaphoreHandle,
        timeout: Duration,
    ) -> RenderResult<u32> {
        if self.acquire_stalled {
            self.clock += timeout;
            return Err(RenderError::Timeout {
                operation: "acquire_next_image",
                timeout,
            });
        }
        self.signal_semaphore(signal)?;

        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.presentation_images.len() as u32;
        self.events.push(DeviceEvent::Acquire(image));
        Ok(image)
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<()> {
        if image_index as usize >= self.presentation_images.len() {
            return Err(RenderError::invalid(format!(
                "presentation image {image_index} out of range"
            )));
        }
        self.take_semaphore(wait, "present")?;
        self.events.push(DeviceEvent::Present(image_index));
        Ok(())
    }

    fn presentation_images(&self) -> &[ImageHandle] {
        &self.presentation_images
    }

    fn presentation_extent(&self) -> Extent2D {
        self.presentation_extent
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        if self.stalled && !self.in_flight.is_empty() {
            return Err(RenderError::DeviceLost);
        }
        if let Some(last) = self.in_flight.back() {
            self.clock = self.clock.max(last.complete_at);
        }
        self.retire_completed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::BufferUsage;

    fn device() -> HeadlessDevice {
        let config = HeadlessConfig {
            gpu_latency_us: 1000,
            swapchain_images: 2,
        };
        HeadlessDevice::new(&config, Extent2D::new(64, 64))
    }

    fn upload_desc(size: u64) -> BufferDesc {
        BufferDesc {
            label: "test",
            size,
            usage: BufferUsage::UNIFORM,
            location: MemoryLocation::CpuToGpu,
        }
    }

    fn submit_empty(device: &mut HeadlessDevice, fence: FenceHandle) {
        let context = device.create_command_context().unwrap();
        device.begin_commands(context).unwrap();
        device.end_commands(context).unwrap();
        let wait = device.create_semaphore().unwrap();
        let signal = device.create_semaphore().unwrap();
        device.acquire_next_image(wait, Duration::from_secs(1)).unwrap();
        device
            .submit(&Submission {
                context,
                wait_semaphore: wait,
                wait_stage: crate::render::device::PipelineStage::ColorAttachmentOutput,
                signal_semaphore: signal,
                fence,
            })
            .unwrap();
    }

    #[test]
    fn test_map_write_unmap() {
        let mut device = device();
        let buffer = device.create_buffer(&upload_desc(8)).unwrap();

        device.map_buffer(buffer).unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert!(device.map_buffer(buffer).is_err());
        device.unmap_buffer(buffer);

        assert_eq!(device.buffer_contents(buffer).unwrap(), &[1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(
            device.events(),
            &[DeviceEvent::Map(buffer), DeviceEvent::Unmap(buffer)]
        );
    }

    #[test]
    fn test_gpu_only_buffer_cannot_be_mapped() {
        let mut device = device();
        let buffer = device
            .create_buffer(&BufferDesc {
                location: MemoryLocation::GpuOnly,
                ..upload_desc(16)
            })
            .unwrap();
        assert!(device.map_buffer(buffer).is_err());
    }

    #[test]
    fn test_fence_wait_advances_clock_to_completion() {
        let mut device = device();
        let fence = device.create_fence(false).unwrap();
        submit_empty(&mut device, fence);

        assert_eq!(device.pending_submissions(), 1);
        device.wait_fence(fence, Duration::from_secs(1)).unwrap();
        assert_eq!(device.clock(), Duration::from_millis(1));
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_unsubmitted_fence_times_out() {
        let mut device = device();
        let fence = device.create_fence(false).unwrap();
        let result = device.wait_fence(fence, Duration::from_millis(5));
        assert!(matches!(result, Err(RenderError::Timeout { .. })));
    }

    #[test]
    fn test_stalled_gpu_times_out() {
        let mut device = device();
        let fence = device.create_fence(false).unwrap();
        submit_empty(&mut device, fence);
        device.set_stalled(true);

        let result = device.wait_fence(fence, Duration::from_millis(5));
        assert!(matches!(result, Err(RenderError::Timeout { .. })));
        assert!(matches!(device.wait_idle(), Err(RenderError::DeviceLost)));
    }

    #[test]
    #[should_panic(expected = "still mapped")]
    fn test_submit_with_mapped_buffer_panics() {
        let mut device = device();
        let buffer = device.create_buffer(&upload_desc(4)).unwrap();
        device.map_buffer(buffer).unwrap();
        let fence = device.create_fence(false).unwrap();
        submit_empty(&mut device, fence);
    }

    #[test]
    fn test_submit_without_acquire_is_rejected() {
        let mut device = device();
        let context = device.create_command_context().unwrap();
        device.begin_commands(context).unwrap();
        device.end_commands(context).unwrap();
        let fence = device.create_fence(false).unwrap();
        let wait = device.create_semaphore().unwrap();
        let signal = device.create_semaphore().unwrap();

        let result = device.submit(&Submission {
            context,
            wait_semaphore: wait,
            wait_stage: crate::render::device::PipelineStage::ColorAttachmentOutput,
            signal_semaphore: signal,
            fence,
        });
        assert!(matches!(result, Err(RenderError::InvalidOperation { .. })));
    }

    #[test]
    #[should_panic(expected = "already destroyed")]
    fn test_double_destroy_panics() {
        let mut device = device();
        let fence = device.create_fence(true).unwrap();
        device.destroy_fence(fence);
        device.destroy_fence(fence);
    }

    #[test]
    fn test_acquire_cycles_images() {
        let mut device = device();
        let semaphore = device.create_semaphore().unwrap();
        assert_eq!(device.acquire_next_image(semaphore, Duration::from_secs(1)).unwrap(), 0);
        device.present(0, semaphore).unwrap();
        assert_eq!(device.acquire_next_image(semaphore, Duration::from_secs(1)).unwrap(), 1);
        device.present(1, semaphore).unwrap();
        assert_eq!(device.acquire_next_image(semaphore, Duration::from_secs(1)).unwrap(), 0);
    }
}
