//! Swapchain/presentation bridge
//!
//! Acquire, submit and present for one frame slot. There is no recovery
//! path: a timeout or lost device is returned to the frame loop, which
//! stops.

use std::time::Duration;

use super::device::{GraphicsDevice, PipelineStage, Submission};
use super::error::RenderResult;
use super::frame::FrameContext;

/// Hands recorded frames to the queue and the presentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationBridge {
    acquire_timeout: Duration,
}

impl PresentationBridge {
    /// Create a bridge with a bounded acquire wait
    pub fn new(acquire_timeout: Duration) -> Self {
        Self { acquire_timeout }
    }

    /// Acquire timeout
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Wait for a free presentation image
    ///
    /// Signals the slot's image-available semaphore when the image is ready.
    pub fn acquire<D: GraphicsDevice + ?Sized>(
        &self,
        device: &mut D,
        frame: &FrameContext,
    ) -> RenderResult<u32> {
        let image_index = device
            .acquire_next_image(frame.image_available, self.acquire_timeout)
            .inspect_err(|err| log::error!("Failed to acquire presentation image: {err}"))?;
        log::trace!("Acquired presentation image {image_index}");
        Ok(image_index)
    }

    /// Queue the slot's commands
    ///
    /// Waits on image-available before the blit, signals render-complete and
    /// the slot's fence when done.
    pub fn submit<D: GraphicsDevice + ?Sized>(
        &self,
        device: &mut D,
        frame: &FrameContext,
    ) -> RenderResult<()> {
        device
            .submit(&Submission {
                context: frame.command_context,
                wait_semaphore: frame.image_available,
                wait_stage: PipelineStage::Transfer,
                signal_semaphore: frame.render_complete,
                fence: frame.render_fence,
            })
            .inspect_err(|err| log::error!("Queue submit failed: {err}"))
    }

    /// Present an image once rendering is complete
    pub fn present<D: GraphicsDevice + ?Sized>(
        &self,
        device: &mut D,
        frame: &FrameContext,
        image_index: u32,
    ) -> RenderResult<()> {
        device
            .present(image_index, frame.render_complete)
            .inspect_err(|err| log::error!("Present of image {image_index} failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeadlessConfig, RendererConfig};
    use crate::render::device::headless::{DeviceEvent, HeadlessDevice};
    use crate::render::device::Extent2D;
    use crate::render::error::RenderError;
    use crate::render::frame::{FrameLayouts, FrameRing};
    use crate::render::teardown::{wait_idle, GpuResource, TeardownLedger};

    fn setup() -> (HeadlessDevice, FrameRing, TeardownLedger) {
        let mut device = HeadlessDevice::new(&HeadlessConfig::default(), Extent2D::new(8, 8));
        let layouts = FrameLayouts {
            frame: device.create_descriptor_set_layout(),
            bones: device.create_descriptor_set_layout(),
        };
        let mut ledger = TeardownLedger::new(2);
        ledger.push(GpuResource::DescriptorSetLayout(layouts.frame));
        ledger.push(GpuResource::DescriptorSetLayout(layouts.bones));
        let config = RendererConfig::default().with_capacities(4, 4);
        let ring = FrameRing::new(&mut device, &config, layouts, &mut ledger).unwrap();
        (device, ring, ledger)
    }

    #[test]
    fn test_acquire_submit_present() {
        let (mut device, mut ring, mut ledger) = setup();
        let bridge = PresentationBridge::new(Duration::from_millis(100));

        let frame = *ring.begin_frame(&mut device, Duration::from_secs(1)).unwrap();
        device.begin_commands(frame.command_context).unwrap();
        device.end_commands(frame.command_context).unwrap();

        let image = bridge.acquire(&mut device, &frame).unwrap();
        bridge.submit(&mut device, &frame).unwrap();
        bridge.present(&mut device, &frame, image).unwrap();

        let events = device.take_events();
        let tail = &events[events.len() - 3..];
        assert_eq!(tail[0], DeviceEvent::Acquire(image));
        assert!(matches!(tail[1], DeviceEvent::Submit { fence, .. } if fence == frame.render_fence));
        assert_eq!(tail[2], DeviceEvent::Present(image));

        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_acquire_timeout_is_an_error() {
        let (mut device, ring, mut ledger) = setup();
        let bridge = PresentationBridge::new(Duration::from_millis(5));
        device.set_acquire_stalled(true);

        let result = bridge.acquire(&mut device, ring.current_frame());
        assert_eq!(
            result,
            Err(RenderError::Timeout {
                operation: "acquire_next_image",
                timeout: Duration::from_millis(5),
            })
        );
        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_present_without_submit_is_rejected() {
        let (mut device, ring, mut ledger) = setup();
        let bridge = PresentationBridge::new(Duration::from_millis(5));
        let frame = *ring.current_frame();

        let image = bridge.acquire(&mut device, &frame).unwrap();
        assert!(bridge.present(&mut device, &frame, image).is_err());
        ledger.flush(wait_idle(&mut device).unwrap());
    }
}
