//! Resource teardown ledger
//!
//! Every device object the renderer creates is registered here right after
//! creation. At shutdown the ledger destroys them in reverse creation order,
//! so dependents always go before what they depend on. Flushing needs an
//! [`IdleDevice`], which only [`wait_idle`] hands out, so destroying objects
//! the GPU might still read cannot be written.
//!
//! Resources retired while the renderer runs take a second path: they wait
//! in a FIFO until every frame that could reference them has completed.
//!
//! ```text
//! push:     A1 A2 A3          retire(B, frame 7)
//! flush:    A3 A2 A1          collect_retired(frame >= 7 + N): B
//! ```

use std::collections::VecDeque;

use super::device::{
    BufferHandle, CommandContextHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FenceHandle, FramebufferHandle, GraphicsDevice, ImageHandle, ImageViewHandle, PipelineHandle,
    PipelineLayoutHandle, RenderPassHandle, SemaphoreHandle,
};
use super::error::RenderResult;

/// A device object awaiting destruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuResource {
    /// Buffer and its memory
    Buffer(BufferHandle),
    /// Image and its memory
    Image(ImageHandle),
    /// Image view
    ImageView(ImageViewHandle),
    /// Framebuffer
    Framebuffer(FramebufferHandle),
    /// Render pass
    RenderPass(RenderPassHandle),
    /// Pipeline
    Pipeline(PipelineHandle),
    /// Pipeline layout
    PipelineLayout(PipelineLayoutHandle),
    /// Descriptor set layout
    DescriptorSetLayout(DescriptorSetLayoutHandle),
    /// Descriptor set
    DescriptorSet(DescriptorSetHandle),
    /// Command context
    CommandContext(CommandContextHandle),
    /// Fence
    Fence(FenceHandle),
    /// Semaphore
    Semaphore(SemaphoreHandle),
}

impl GpuResource {
    /// Destroy the object through the matching device call
    pub fn destroy<D: GraphicsDevice + ?Sized>(self, device: &mut D) {
        log::trace!("Destroying {self:?}");
        match self {
            Self::Buffer(h) => device.destroy_buffer(h),
            Self::Image(h) => device.destroy_image(h),
            Self::ImageView(h) => device.destroy_image_view(h),
            Self::Framebuffer(h) => device.destroy_framebuffer(h),
            Self::RenderPass(h) => device.destroy_render_pass(h),
            Self::Pipeline(h) => device.destroy_pipeline(h),
            Self::PipelineLayout(h) => device.destroy_pipeline_layout(h),
            Self::DescriptorSetLayout(h) => device.destroy_descriptor_set_layout(h),
            Self::DescriptorSet(h) => device.free_descriptor_set(h),
            Self::CommandContext(h) => device.destroy_command_context(h),
            Self::Fence(h) => device.destroy_fence(h),
            Self::Semaphore(h) => device.destroy_semaphore(h),
        }
    }
}

/// Proof that the device has finished all submitted work
///
/// Borrowing the device mutably for the token's lifetime keeps anyone from
/// submitting more work before the flush.
pub struct IdleDevice<'a, D: GraphicsDevice + ?Sized> {
    device: &'a mut D,
}

impl<D: GraphicsDevice + ?Sized> IdleDevice<'_, D> {
    /// The idle device
    pub fn device(&mut self) -> &mut D {
        self.device
    }
}

/// Block until the device is idle and return the proof
pub fn wait_idle<D: GraphicsDevice + ?Sized>(device: &mut D) -> RenderResult<IdleDevice<'_, D>> {
    device.wait_idle()?;
    Ok(IdleDevice { device })
}

#[derive(Debug)]
struct RetiredResource {
    resource: GpuResource,
    retired_at: u64,
}

/// Ordered record of device objects to destroy
#[derive(Debug)]
pub struct TeardownLedger {
    entries: Vec<GpuResource>,
    retired: VecDeque<RetiredResource>,
    frames_in_flight: u64,
    flushed: bool,
}

impl TeardownLedger {
    /// Create an empty ledger for a ring of `frames_in_flight` slots
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            entries: Vec::new(),
            retired: VecDeque::new(),
            frames_in_flight: frames_in_flight.max(1) as u64,
            flushed: false,
        }
    }

    /// Register an object for destruction at shutdown
    ///
    /// # Panics
    ///
    /// Panics if the ledger has already been flushed.
    pub fn push(&mut self, resource: GpuResource) {
        assert!(!self.flushed, "pushing {resource:?} into a flushed teardown ledger");
        self.entries.push(resource);
    }

    /// Objects registered for shutdown
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered for shutdown
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Objects retired but not yet destroyed
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Whether [`TeardownLedger::flush`] has run
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Take a registered object out of the ledger so it can be retired early
    ///
    /// Returns `false` if the object was never registered.
    pub fn forget(&mut self, resource: GpuResource) -> bool {
        if let Some(index) = self.entries.iter().rposition(|&entry| entry == resource) {
            self.entries.remove(index);
            true
        } else {
            false
        }
    }

    /// Queue an object the renderer no longer uses, as of `frame_number`
    ///
    /// # Panics
    ///
    /// Panics if the ledger has already been flushed.
    pub fn retire(&mut self, resource: GpuResource, frame_number: u64) {
        assert!(!self.flushed, "retiring {resource:?} into a flushed teardown ledger");
        log::debug!("Retiring {resource:?} at frame {frame_number}");
        self.retired.push_back(RetiredResource {
            resource,
            retired_at: frame_number,
        });
    }

    /// Destroy retired objects no in-flight frame can still reference
    ///
    /// Call after the current slot's fence wait, with the frame number being
    /// started. Returns how many objects were destroyed.
    pub fn collect_retired<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        current_frame: u64,
    ) -> usize {
        let mut destroyed = 0;
        while let Some(front) = self.retired.front() {
            if front.retired_at + self.frames_in_flight > current_frame {
                break;
            }
            if let Some(entry) = self.retired.pop_front() {
                entry.resource.destroy(device);
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Destroy everything, retired objects first, then registered objects
    /// newest to oldest
    ///
    /// # Panics
    ///
    /// Panics when called a second time.
    pub fn flush<D: GraphicsDevice + ?Sized>(&mut self, mut idle: IdleDevice<'_, D>) {
        assert!(!self.flushed, "teardown ledger flushed twice");
        self.flushed = true;

        let device = idle.device();
        let total = self.retired.len() + self.entries.len();
        for entry in self.retired.drain(..) {
            entry.resource.destroy(device);
        }
        while let Some(resource) = self.entries.pop() {
            resource.destroy(device);
        }
        log::info!("Teardown ledger flushed {total} resources");
    }
}

impl Drop for TeardownLedger {
    fn drop(&mut self) {
        if !self.flushed && (!self.entries.is_empty() || !self.retired.is_empty()) {
            log::error!(
                "Teardown ledger dropped without flush, leaking {} resources",
                self.entries.len() + self.retired.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadlessConfig;
    use crate::render::device::headless::{DeviceEvent, HeadlessDevice, ObjectKind};
    use crate::render::device::Extent2D;

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(&HeadlessConfig::default(), Extent2D::new(32, 32))
    }

    fn destroyed(device: &HeadlessDevice) -> Vec<u64> {
        device
            .events()
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::Destroy { handle, .. } => Some(*handle),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_flush_runs_newest_first() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(2);

        let a1 = device.create_fence(true).unwrap();
        ledger.push(GpuResource::Fence(a1));
        let a2 = device.create_semaphore().unwrap();
        ledger.push(GpuResource::Semaphore(a2));
        let a3 = device.create_command_context().unwrap();
        ledger.push(GpuResource::CommandContext(a3));

        ledger.flush(wait_idle(&mut device).unwrap());

        assert_eq!(destroyed(&device), vec![a3.0, a2.0, a1.0]);
        assert!(ledger.is_flushed());
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    #[should_panic(expected = "flushed twice")]
    fn test_double_flush_panics() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(2);
        ledger.flush(wait_idle(&mut device).unwrap());
        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    #[should_panic(expected = "flushed teardown ledger")]
    fn test_push_after_flush_panics() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(2);
        ledger.flush(wait_idle(&mut device).unwrap());
        let fence = device.create_fence(false).unwrap();
        ledger.push(GpuResource::Fence(fence));
    }

    #[test]
    fn test_retired_waits_for_ring_depth() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(2);
        let fence = device.create_fence(false).unwrap();
        ledger.retire(GpuResource::Fence(fence), 5);

        assert_eq!(ledger.collect_retired(&mut device, 5), 0);
        assert_eq!(ledger.collect_retired(&mut device, 6), 0);
        assert!(device.is_live(fence.0));

        assert_eq!(ledger.collect_retired(&mut device, 7), 1);
        assert!(!device.is_live(fence.0));
        assert_eq!(ledger.retired_len(), 0);
    }

    #[test]
    fn test_retired_collect_is_fifo() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(1);
        let first = device.create_semaphore().unwrap();
        let second = device.create_semaphore().unwrap();
        ledger.retire(GpuResource::Semaphore(first), 1);
        ledger.retire(GpuResource::Semaphore(second), 2);

        assert_eq!(ledger.collect_retired(&mut device, 3), 2);
        assert_eq!(destroyed(&device), vec![first.0, second.0]);
    }

    #[test]
    fn test_flush_destroys_retired_before_registered() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(3);
        let kept = device.create_fence(true).unwrap();
        ledger.push(GpuResource::Fence(kept));
        let layout = device.create_pipeline_layout();
        ledger.push(GpuResource::PipelineLayout(layout));

        assert!(ledger.forget(GpuResource::PipelineLayout(layout)));
        ledger.retire(GpuResource::PipelineLayout(layout), 0);
        assert_eq!(ledger.len(), 1);

        ledger.flush(wait_idle(&mut device).unwrap());
        assert_eq!(
            device.events(),
            &[
                DeviceEvent::Destroy {
                    kind: ObjectKind::PipelineLayout,
                    handle: layout.0
                },
                DeviceEvent::Destroy {
                    kind: ObjectKind::Fence,
                    handle: kept.0
                },
            ]
        );
    }
}
