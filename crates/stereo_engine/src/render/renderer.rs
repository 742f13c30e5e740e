//! Stereo renderer
//!
//! Owns the device, the teardown ledger, the frame ring and everything
//! needed to turn a scene into one presented stereo frame. There is no
//! global state: the frame loop holds the renderer and passes the scene and
//! asset store in by reference each frame.

use std::time::Instant;

use super::assets::{AssetStore, MeshHandle};
use super::device::headless::HeadlessDevice;
use super::device::GraphicsDevice;
use super::error::{RenderError, RenderResult};
use super::frame::{FrameLayouts, FrameRing};
use super::lighting::DirectionalLight;
use super::presentation::PresentationBridge;
use super::sequencer::{
    resolve_draws, DrawSequencer, EyeTarget, FrameInputs, FramePhase, RenderTargets,
    ShadowPipelines, ShadowTarget,
};
use super::staging::{plan_frame, stage_frame_data, AnimationSource};
use super::teardown::{wait_idle, GpuResource, TeardownLedger};
use super::xr::ViewProvider;
use crate::config::{EngineConfig, RendererConfig};
use crate::foundation::time::FpsCounter;
use crate::scene::Scene;

/// Setup-time objects the renderer records into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererSetup {
    /// Layouts for the per-frame descriptor sets
    pub layouts: FrameLayouts,
    /// Shadow and eye targets
    pub targets: RenderTargets,
    /// Shadow pass pipelines
    pub shadow_pipelines: ShadowPipelines,
}

/// Counts for one presented frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number the frame was rendered as
    pub frame_number: u64,
    /// Ring slot used
    pub slot: usize,
    /// Presentation image written
    pub image_index: u32,
    /// Draw calls across all passes
    pub draw_calls: usize,
    /// Renderables skipped for missing assets
    pub skipped_draws: usize,
    /// Commands recorded
    pub commands: usize,
}

/// What happened to one call of [`StereoRenderer::render_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented
    Presented(FrameStats),
    /// No view poses were available; nothing was touched
    Skipped {
        /// Frame number that was not rendered
        frame_number: u64,
    },
}

/// Renderer context over a graphics device
pub struct StereoRenderer<D: GraphicsDevice> {
    device: D,
    config: RendererConfig,
    ledger: TeardownLedger,
    ring: FrameRing,
    bridge: PresentationBridge,
    sequencer: DrawSequencer,
    fps: FpsCounter,
    last_present: Option<Instant>,
}

impl<D: GraphicsDevice> StereoRenderer<D> {
    /// Create a renderer over a device and its setup objects
    ///
    /// `ledger` already holds the setup objects; the frame ring's objects
    /// are added on top so they are destroyed first.
    pub fn new(
        mut device: D,
        config: RendererConfig,
        setup: RendererSetup,
        mut ledger: TeardownLedger,
    ) -> RenderResult<Self> {
        config
            .validate()
            .map_err(|err| RenderError::invalid(err.to_string()))?;

        let ring = match FrameRing::new(&mut device, &config, setup.layouts, &mut ledger) {
            Ok(ring) => ring,
            Err(err) => {
                log::error!("Frame ring creation failed: {err}");
                if let Ok(idle) = wait_idle(&mut device) {
                    ledger.flush(idle);
                }
                return Err(err);
            }
        };

        log::info!(
            "Stereo renderer ready: {} frames in flight, {} objects, {} bones per frame",
            ring.len(),
            config.max_objects,
            config.max_bones
        );

        Ok(Self {
            device,
            bridge: PresentationBridge::new(config.acquire_timeout()),
            sequencer: DrawSequencer::new(setup.targets, setup.shadow_pipelines),
            fps: FpsCounter::new(config.stats_interval),
            last_present: None,
            config,
            ledger,
            ring,
        })
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, for setup-time object creation
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Renderer configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The frame ring
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// The teardown ledger
    pub fn ledger(&self) -> &TeardownLedger {
        &self.ledger
    }

    /// Shadow and eye targets
    pub fn targets(&self) -> &RenderTargets {
        self.sequencer.targets()
    }

    /// Current frame phase
    pub fn phase(&self) -> FramePhase {
        self.sequencer.phase()
    }

    /// Number of the next frame to render
    pub fn frame_number(&self) -> u64 {
        self.ring.frame_number()
    }

    /// Destroy `resource` at shutdown
    pub fn register(&mut self, resource: GpuResource) {
        self.ledger.push(resource);
    }

    /// Destroy `resource` once no frame in flight can still use it
    pub fn retire(&mut self, resource: GpuResource) {
        self.ledger.forget(resource);
        self.ledger.retire(resource, self.ring.frame_number());
    }

    /// Upload a mesh into `assets`, owned by this renderer's ledger
    pub fn upload_mesh(
        &mut self,
        assets: &mut AssetStore,
        name: impl Into<String>,
        vertex_bytes: &[u8],
        vertex_count: u32,
        indices: Option<&[u32]>,
    ) -> RenderResult<MeshHandle> {
        assets.upload_mesh(
            &mut self.device,
            &mut self.ledger,
            name,
            vertex_bytes,
            vertex_count,
            indices,
        )
    }

    /// Unload a mesh, destroying its buffers once frames in flight finish
    pub fn retire_mesh(&mut self, assets: &mut AssetStore, name: &str) -> bool {
        assets.retire_mesh(name, &mut self.ledger, self.ring.frame_number())
    }

    /// Render and present one stereo frame
    ///
    /// Capacity is checked before the slot is touched, so an overflow
    /// leaves the ring reusable. Any error after that is fatal.
    pub fn render_frame<V, A>(
        &mut self,
        scene: &mut Scene,
        assets: &AssetStore,
        views: &mut V,
        light: &DirectionalLight,
        animation: &mut A,
    ) -> RenderResult<FrameOutcome>
    where
        V: ViewProvider + ?Sized,
        A: AnimationSource + ?Sized,
    {
        let frame_number = self.ring.frame_number();
        let Some(views) = views.locate_views(frame_number) else {
            log::warn!("Skipping frame {frame_number}: view poses not tracked");
            return Ok(FrameOutcome::Skipped { frame_number });
        };

        let bones = animation.bone_matrices(frame_number);
        let plan = plan_frame(scene, &self.config, bones.len())?;
        let (draws, skipped_draws) = resolve_draws(&plan, assets);

        let slot = self.ring.current_index();
        let frame = *self
            .ring
            .begin_frame(&mut self.device, self.config.fence_timeout())?;
        self.ledger.collect_retired(&mut self.device, frame_number);

        let (near, far) = (self.config.near_plane, self.config.far_plane);
        stage_frame_data(
            &mut self.device,
            &frame,
            scene,
            &plan,
            &views.camera_data(near, far),
            &light.scene_data(),
            &bones,
        )?;

        let image_index = self.bridge.acquire(&mut self.device, &frame)?;
        let presentation_image = self
            .device
            .presentation_images()
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                RenderError::Backend(format!("acquired image {image_index} does not exist"))
            })?;

        let [left, right] = views.eyes;
        let inputs = FrameInputs {
            frame: &frame,
            draws: &draws,
            light_view_projection: light.light_view_projection(),
            eye_view_projections: [
                left.view_projection(views.rig_offset, near, far),
                right.view_projection(views.rig_offset, near, far),
            ],
            presentation_image,
            presentation_extent: self.device.presentation_extent(),
            clear_color: self.config.clear_color,
        };
        let record = self.sequencer.record_frame(&mut self.device, &inputs)?;

        self.bridge.submit(&mut self.device, &frame)?;
        self.sequencer.mark_submitted();
        self.bridge.present(&mut self.device, &frame, image_index)?;
        self.sequencer.mark_presented();
        self.ring.advance();

        self.report_fps(frame_number);
        Ok(FrameOutcome::Presented(FrameStats {
            frame_number,
            slot,
            image_index,
            draw_calls: record.draw_calls,
            skipped_draws,
            commands: record.commands,
        }))
    }

    fn report_fps(&mut self, frame_number: u64) {
        let now = Instant::now();
        if let Some(last) = self.last_present.replace(now) {
            if let Some(fps) = self.fps.record(now - last) {
                log::info!("Frame {frame_number}: {fps:.1} FPS");
            }
        }
    }

    /// Wait for the device, destroy everything the ledger owns and hand
    /// the device back
    pub fn shutdown(mut self) -> RenderResult<D> {
        log::info!(
            "Shutting down renderer after {} frames",
            self.ring.frame_number()
        );
        let idle = wait_idle(&mut self.device)?;
        self.ledger.flush(idle);
        Ok(self.device)
    }
}

impl StereoRenderer<HeadlessDevice> {
    /// Renderer over a headless device with its own targets and pipelines
    pub fn headless(config: &EngineConfig) -> RenderResult<Self> {
        let renderer = &config.renderer;
        let mut device = HeadlessDevice::new(&config.headless, renderer.mirror_extent);
        let mut ledger = TeardownLedger::new(renderer.frames_in_flight);
        let setup = headless_setup(&mut device, renderer, &mut ledger);
        Self::new(device, renderer.clone(), setup, ledger)
    }
}

/// Create targets, layouts and shadow pipelines on a headless device
///
/// Objects are registered dependencies first, so the ledger destroys
/// framebuffers before their views and views before their images.
pub fn headless_setup(
    device: &mut HeadlessDevice,
    config: &RendererConfig,
    ledger: &mut TeardownLedger,
) -> RendererSetup {
    let layouts = FrameLayouts {
        frame: device.create_descriptor_set_layout(),
        bones: device.create_descriptor_set_layout(),
    };
    let shadow_layout = device.create_descriptor_set_layout();
    ledger.push(GpuResource::DescriptorSetLayout(layouts.frame));
    ledger.push(GpuResource::DescriptorSetLayout(layouts.bones));
    ledger.push(GpuResource::DescriptorSetLayout(shadow_layout));

    let depth_image = device.create_image();
    ledger.push(GpuResource::Image(depth_image));
    let depth_view = device.create_image_view(depth_image);
    ledger.push(GpuResource::ImageView(depth_view));
    let shadow_pass = device.create_render_pass();
    ledger.push(GpuResource::RenderPass(shadow_pass));
    let shadow_framebuffer = device.create_framebuffer(shadow_pass, &[depth_view]);
    ledger.push(GpuResource::Framebuffer(shadow_framebuffer));
    let shadow_set = device.create_image_descriptor_set(shadow_layout, &[depth_view]);
    ledger.push(GpuResource::DescriptorSet(shadow_set));

    let eye_pass = device.create_render_pass();
    ledger.push(GpuResource::RenderPass(eye_pass));
    let eyes = [(); 2].map(|()| {
        let color_image = device.create_image();
        ledger.push(GpuResource::Image(color_image));
        let color_view = device.create_image_view(color_image);
        ledger.push(GpuResource::ImageView(color_view));
        let depth_image = device.create_image();
        ledger.push(GpuResource::Image(depth_image));
        let depth_view = device.create_image_view(depth_image);
        ledger.push(GpuResource::ImageView(depth_view));
        let framebuffer = device.create_framebuffer(eye_pass, &[color_view, depth_view]);
        ledger.push(GpuResource::Framebuffer(framebuffer));

        EyeTarget {
            render_pass: eye_pass,
            framebuffer,
            color_image,
            extent: config.eye_extent,
        }
    });

    let shadow_pipeline_layout = device.create_pipeline_layout();
    ledger.push(GpuResource::PipelineLayout(shadow_pipeline_layout));
    let static_mesh = device.create_pipeline(shadow_pipeline_layout);
    ledger.push(GpuResource::Pipeline(static_mesh));
    let skinned = device.create_pipeline(shadow_pipeline_layout);
    ledger.push(GpuResource::Pipeline(skinned));

    log::debug!("Headless render targets created");
    RendererSetup {
        layouts,
        targets: RenderTargets {
            shadow: ShadowTarget {
                render_pass: shadow_pass,
                framebuffer: shadow_framebuffer,
                depth_image,
                extent: config.shadow_map_extent,
                shadow_set,
            },
            eyes,
        },
        shadow_pipelines: ShadowPipelines {
            static_mesh,
            skinned,
            layout: shadow_pipeline_layout,
        },
    }
}
