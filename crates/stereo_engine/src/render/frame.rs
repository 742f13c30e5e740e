//! Frame ring
//!
//! A fixed array of N frame contexts used round-robin. Slot `frame_number % N`
//! is reused only after its fence says the GPU finished the frame that last
//! used it, which bounds the CPU to at most N frames ahead of the GPU.

use std::mem::size_of;
use std::time::Duration;

use super::device::{
    BufferDesc, BufferHandle, BufferUsage, CommandContextHandle, DescriptorBinding,
    DescriptorKind, DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, GraphicsDevice,
    MemoryLocation, SemaphoreHandle,
};
use super::error::RenderResult;
use super::staging::{BoneMatrix, CameraUniformData, ObjectData, SceneUniformData};
use super::teardown::{GpuResource, TeardownLedger};
use crate::config::RendererConfig;

/// Descriptor set layouts the ring allocates per-frame sets from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayouts {
    /// Camera, scene and object buffers
    pub frame: DescriptorSetLayoutHandle,
    /// Bone buffer
    pub bones: DescriptorSetLayoutHandle,
}

/// Per-frame buffers, overwritten every frame and never reallocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBuffers {
    /// One [`CameraUniformData`]
    pub camera: BufferHandle,
    /// One [`SceneUniformData`]
    pub scene: BufferHandle,
    /// `max_objects` [`ObjectData`] records
    pub objects: BufferHandle,
    /// `max_bones` bone matrices
    pub bones: BufferHandle,
    /// Object record capacity
    pub max_objects: usize,
    /// Bone matrix capacity
    pub max_bones: usize,
}

/// One ring slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Command recording context
    pub command_context: CommandContextHandle,
    /// Signaled when the GPU finishes this slot's last submission
    pub render_fence: FenceHandle,
    /// Signaled when the presentation image is ready to be written
    pub image_available: SemaphoreHandle,
    /// Signaled when rendering finishes, waited on by present
    pub render_complete: SemaphoreHandle,
    /// Per-frame buffers
    pub buffers: FrameBuffers,
    /// Set 0: camera, scene and object buffers
    pub frame_set: DescriptorSetHandle,
    /// Bone buffer set
    pub bone_set: DescriptorSetHandle,
}

impl FrameContext {
    fn create<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        config: &RendererConfig,
        layouts: FrameLayouts,
        ledger: &mut TeardownLedger,
    ) -> RenderResult<Self> {
        let command_context = device.create_command_context()?;
        ledger.push(GpuResource::CommandContext(command_context));

        // Created signaled so the first wait on a fresh slot returns at once
        let render_fence = device.create_fence(true)?;
        ledger.push(GpuResource::Fence(render_fence));

        let image_available = device.create_semaphore()?;
        ledger.push(GpuResource::Semaphore(image_available));
        let render_complete = device.create_semaphore()?;
        ledger.push(GpuResource::Semaphore(render_complete));

        let mut create_buffer = |label: &'static str, size: usize, usage: BufferUsage| {
            let buffer = device.create_buffer(&BufferDesc {
                label,
                size: size as u64,
                usage,
                location: MemoryLocation::CpuToGpu,
            })?;
            ledger.push(GpuResource::Buffer(buffer));
            RenderResult::Ok(buffer)
        };

        let buffers = FrameBuffers {
            camera: create_buffer("camera", size_of::<CameraUniformData>(), BufferUsage::UNIFORM)?,
            scene: create_buffer("scene", size_of::<SceneUniformData>(), BufferUsage::UNIFORM)?,
            objects: create_buffer(
                "objects",
                size_of::<ObjectData>() * config.max_objects,
                BufferUsage::STORAGE,
            )?,
            bones: create_buffer(
                "bones",
                size_of::<BoneMatrix>() * config.max_bones,
                BufferUsage::STORAGE,
            )?,
            max_objects: config.max_objects,
            max_bones: config.max_bones,
        };

        let frame_set = device.allocate_descriptor_set(
            layouts.frame,
            &[
                DescriptorBinding {
                    binding: 0,
                    kind: DescriptorKind::UniformBuffer,
                    buffer: buffers.camera,
                },
                DescriptorBinding {
                    binding: 1,
                    kind: DescriptorKind::UniformBuffer,
                    buffer: buffers.scene,
                },
                DescriptorBinding {
                    binding: 2,
                    kind: DescriptorKind::StorageBuffer,
                    buffer: buffers.objects,
                },
            ],
        )?;
        ledger.push(GpuResource::DescriptorSet(frame_set));

        let bone_set = device.allocate_descriptor_set(
            layouts.bones,
            &[DescriptorBinding {
                binding: 0,
                kind: DescriptorKind::StorageBuffer,
                buffer: buffers.bones,
            }],
        )?;
        ledger.push(GpuResource::DescriptorSet(bone_set));

        Ok(Self {
            command_context,
            render_fence,
            image_available,
            render_complete,
            buffers,
            frame_set,
            bone_set,
        })
    }
}

/// Fixed-size ring of frame contexts
pub struct FrameRing {
    frames: Vec<FrameContext>,
    frame_number: u64,
}

impl FrameRing {
    /// Create `config.frames_in_flight` slots, registering every object in `ledger`
    pub fn new<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        config: &RendererConfig,
        layouts: FrameLayouts,
        ledger: &mut TeardownLedger,
    ) -> RenderResult<Self> {
        let count = config.frames_in_flight.max(1);
        let mut frames = Vec::with_capacity(count);
        for slot in 0..count {
            frames.push(FrameContext::create(device, config, layouts, ledger)?);
            log::debug!("Created frame slot {slot}/{count}");
        }

        Ok(Self {
            frames,
            frame_number: 0,
        })
    }

    /// Frames started and submitted so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the ring has no slots
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Slot used by the current frame
    pub fn current_index(&self) -> usize {
        (self.frame_number % self.frames.len() as u64) as usize
    }

    /// The current frame's slot
    pub fn current_frame(&self) -> &FrameContext {
        &self.frames[self.current_index()]
    }

    /// All slots in ring order
    pub fn frames(&self) -> &[FrameContext] {
        &self.frames
    }

    /// Make the current slot safe to reuse
    ///
    /// Waits for the slot's previous submission, then resets its fence and
    /// command context. A timeout leaves the fence untouched and is fatal
    /// for the caller.
    pub fn begin_frame<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        timeout: Duration,
    ) -> RenderResult<&FrameContext> {
        let index = self.current_index();
        let frame = self.frames[index];

        device.wait_fence(frame.render_fence, timeout)?;
        device.reset_fence(frame.render_fence)?;
        device.reset_command_context(frame.command_context)?;

        log::trace!("Frame {} begins in slot {index}", self.frame_number);
        Ok(&self.frames[index])
    }

    /// Move to the next frame; call exactly once per submitted frame
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadlessConfig;
    use crate::render::device::headless::{DeviceEvent, HeadlessDevice};
    use crate::render::device::Extent2D;
    use crate::render::teardown::wait_idle;

    fn setup(frames: usize) -> (HeadlessDevice, FrameRing, TeardownLedger) {
        let mut device = HeadlessDevice::new(&HeadlessConfig::default(), Extent2D::new(8, 8));
        let config = RendererConfig::default()
            .with_frames_in_flight(frames)
            .with_capacities(16, 4);
        let layouts = FrameLayouts {
            frame: device.create_descriptor_set_layout(),
            bones: device.create_descriptor_set_layout(),
        };
        let mut ledger = TeardownLedger::new(frames);
        ledger.push(GpuResource::DescriptorSetLayout(layouts.frame));
        ledger.push(GpuResource::DescriptorSetLayout(layouts.bones));
        let ring = FrameRing::new(&mut device, &config, layouts, &mut ledger).unwrap();
        (device, ring, ledger)
    }

    #[test]
    fn test_slots_cycle_with_frame_number() {
        let (mut device, mut ring, mut ledger) = setup(3);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(ring.current_index());
            ring.advance();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.frame_number(), 7);
        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_slots_own_distinct_buffers() {
        let (mut device, ring, mut ledger) = setup(2);
        let [a, b] = [ring.frames()[0], ring.frames()[1]];
        assert_ne!(a.buffers.objects, b.buffers.objects);
        assert_ne!(a.buffers.bones, b.buffers.bones);
        assert_ne!(a.render_fence, b.render_fence);
        assert_eq!(
            device.buffer_contents(a.buffers.objects).unwrap().len(),
            16 * size_of::<ObjectData>()
        );
        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_first_begin_does_not_block() {
        let (mut device, mut ring, mut ledger) = setup(2);
        let fence = ring.current_frame().render_fence;
        ring.begin_frame(&mut device, Duration::from_millis(1)).unwrap();
        assert_eq!(
            device.events(),
            &[DeviceEvent::FenceWait(fence), DeviceEvent::FenceReset(fence)]
        );
        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_reset_but_unsubmitted_slot_times_out() {
        let (mut device, mut ring, mut ledger) = setup(1);
        ring.begin_frame(&mut device, Duration::from_millis(1)).unwrap();
        ring.advance();
        // Slot 0 was reset but never submitted, so its fence never signals
        let result = ring.begin_frame(&mut device, Duration::from_millis(1));
        assert!(result.is_err());
        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_shutdown_destroys_every_slot_object() {
        let (mut device, ring, mut ledger) = setup(2);
        // Per slot: context, fence, 2 semaphores, 4 buffers, 2 sets; plus 2 layouts
        assert_eq!(ledger.len(), ring.len() * 10 + 2);
        ledger.flush(wait_idle(&mut device).unwrap());
        assert_eq!(device.live_object_count(), 0);
    }
}
