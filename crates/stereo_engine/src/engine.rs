//! Core engine implementation

use thiserror::Error;

use crate::application::{AppError, Application};
use crate::config::{ConfigError, EngineConfig};
use crate::foundation::time::Timer;
use crate::render::{
    AnimationSource, AssetStore, DirectionalLight, FrameOutcome, GraphicsDevice, HeadlessDevice,
    RenderError, RestPose, StaticViewProvider, StereoRenderer, ViewProvider,
};
use crate::scene::{Scene, SceneError};

/// Main engine struct
///
/// Owns the scene, the asset store and the renderer, and runs the frame
/// loop. Everything is reached through this value; there is no global
/// engine state.
pub struct Engine<D: GraphicsDevice> {
    /// Scene graph
    pub scene: Scene,

    /// Meshes and materials
    pub assets: AssetStore,

    /// Sun light
    pub light: DirectionalLight,

    renderer: StereoRenderer<D>,
    views: Box<dyn ViewProvider>,
    animation: Box<dyn AnimationSource>,
    timer: Timer,
    stats: RunStats,
    running: bool,
}

/// Frame counts for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Frames presented
    pub presented: u64,
    /// Frames skipped for lost tracking
    pub skipped: u64,
}

impl<D: GraphicsDevice> Engine<D> {
    /// Create an engine around a renderer
    pub fn new(renderer: StereoRenderer<D>) -> Self {
        Self {
            scene: Scene::new(),
            assets: AssetStore::new(),
            light: DirectionalLight::default(),
            renderer,
            views: Box::new(StaticViewProvider::default()),
            animation: Box::new(RestPose { bones: 0 }),
            timer: Timer::new(),
            stats: RunStats::default(),
            running: true,
        }
    }

    /// Replace the view provider
    pub fn with_view_provider(mut self, views: impl ViewProvider + 'static) -> Self {
        self.views = Box::new(views);
        self
    }

    /// Replace the animation source
    pub fn with_animation(mut self, animation: impl AnimationSource + 'static) -> Self {
        self.animation = Box::new(animation);
        self
    }

    /// The renderer
    pub fn renderer(&self) -> &StereoRenderer<D> {
        &self.renderer
    }

    /// Mutable access to the renderer, for uploads and setup objects
    pub fn renderer_mut(&mut self) -> &mut StereoRenderer<D> {
        &mut self.renderer
    }

    /// Scene, assets and renderer borrowed together
    pub fn parts_mut(&mut self) -> (&mut Scene, &mut AssetStore, &mut StereoRenderer<D>) {
        (&mut self.scene, &mut self.assets, &mut self.renderer)
    }

    /// Frame counts so far
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Request engine shutdown after the current frame
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    /// Run the frame loop until the application quits or a frame fails
    ///
    /// The renderer is always shut down, so every device object is destroyed
    /// even when the loop ends with an error. Returns the device.
    pub fn run<A: Application<D>>(mut self, app: &mut A) -> Result<(D, RunStats), EngineError> {
        let result = self.run_loop(app);
        if let Err(err) = &result {
            log::error!("Frame loop stopped: {err}");
        }

        app.cleanup(&mut self);
        let stats = self.stats;
        let shutdown = self.renderer.shutdown();

        log::info!(
            "Engine shutdown complete: {} frames presented, {} skipped in {:.2}s",
            stats.presented,
            stats.skipped,
            self.timer.elapsed().as_secs_f32()
        );
        result?;
        Ok((shutdown?, stats))
    }

    fn run_loop<A: Application<D>>(&mut self, app: &mut A) -> Result<(), EngineError> {
        app.initialize(self)?;
        log::info!("Starting main loop...");

        while self.running && !app.should_quit() {
            let delta_time = self.timer.tick();
            app.update(&mut self.scene, &mut self.assets, delta_time)?;
            self.render()?;
        }
        Ok(())
    }

    fn render(&mut self) -> Result<(), EngineError> {
        let outcome = self.renderer.render_frame(
            &mut self.scene,
            &self.assets,
            self.views.as_mut(),
            &self.light,
            self.animation.as_mut(),
        )?;

        match outcome {
            FrameOutcome::Presented(stats) => {
                self.stats.presented += 1;
                log::trace!(
                    "Frame {} presented: {} draw calls, {} skipped",
                    stats.frame_number,
                    stats.draw_calls,
                    stats.skipped_draws
                );
            }
            FrameOutcome::Skipped { .. } => self.stats.skipped += 1,
        }
        Ok(())
    }
}

impl Engine<HeadlessDevice> {
    /// Engine over a headless device
    pub fn headless(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::new(StereoRenderer::headless(config)?))
    }
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Rendering failed; device errors end the loop
    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),

    /// Scene manipulation failed
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// Application error
    #[error("Application error: {0}")]
    Application(#[from] AppError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Transform;
    use crate::render::{GpuResource, RenderKind, RenderPayload};

    #[derive(Default)]
    struct CountingApp {
        frames: u32,
        limit: u32,
        cleaned_up: bool,
        fail_at: Option<u32>,
    }

    impl Application<HeadlessDevice> for CountingApp {
        fn initialize(&mut self, engine: &mut Engine<HeadlessDevice>) -> Result<(), AppError> {
            let (scene, assets, renderer) = engine.parts_mut();
            let mesh = renderer.upload_mesh(assets, "triangle", &[0u8; 36], 3, None)?;

            let device = renderer.device_mut();
            let layout = device.create_pipeline_layout();
            let pipeline = device.create_pipeline(layout);
            renderer.register(GpuResource::PipelineLayout(layout));
            renderer.register(GpuResource::Pipeline(pipeline));
            let material = assets.create_material("lit", pipeline, layout)?;

            let entity = scene.add_entity("triangle");
            scene.set_local_transform(entity, Transform::identity())?;
            scene.add_component(entity, RenderPayload::new(mesh, material, RenderKind::Static))?;
            Ok(())
        }

        fn update(
            &mut self,
            _scene: &mut Scene,
            _assets: &mut AssetStore,
            _delta_time: f32,
        ) -> Result<(), AppError> {
            if self.fail_at == Some(self.frames) {
                return Err(AppError::Custom("scripted failure".to_string()));
            }
            self.frames += 1;
            Ok(())
        }

        fn should_quit(&self) -> bool {
            self.frames >= self.limit
        }

        fn cleanup(&mut self, _engine: &mut Engine<HeadlessDevice>) {
            self.cleaned_up = true;
        }
    }

    #[test]
    fn test_run_renders_until_quit_and_tears_down() {
        let engine = Engine::headless(&EngineConfig::default()).unwrap();
        let mut app = CountingApp {
            limit: 5,
            ..CountingApp::default()
        };

        let (device, stats) = engine.run(&mut app).unwrap();
        assert_eq!(stats.presented, 5);
        assert!(app.cleaned_up);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_errors_still_run_cleanup() {
        let engine = Engine::headless(&EngineConfig::default()).unwrap();
        let mut app = CountingApp {
            limit: 10,
            fail_at: Some(2),
            ..CountingApp::default()
        };

        let result = engine.run(&mut app);
        assert!(matches!(result, Err(EngineError::Application(_))));
        assert!(app.cleaned_up);
        assert_eq!(app.frames, 2);
    }

    #[test]
    fn test_lost_tracking_counts_skipped_frames() {
        let engine = Engine::headless(&EngineConfig::default())
            .unwrap()
            .with_view_provider(StaticViewProvider {
                tracking: false,
                ..StaticViewProvider::default()
            });
        let mut app = CountingApp {
            limit: 3,
            ..CountingApp::default()
        };

        let (_, stats) = engine.run(&mut app).unwrap();
        assert_eq!(stats, RunStats { presented: 0, skipped: 3 });
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.renderer.frames_in_flight = 0;
        assert!(matches!(Engine::headless(&config), Err(EngineError::Config(_))));
    }
}
