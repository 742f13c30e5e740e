//! Desktop mirror demo
//!
//! Runs the stereo frame loop against the headless device: a spinning
//! parent with an orbiting child, plus a skinned quad whose bones sway.
//! Frame statistics go to the log.
//!
//! Usage: `mirror_app [config.toml|config.ron]`

use std::f32::consts::TAU;

use stereo_engine::foundation::logging;
use stereo_engine::prelude::*;
use stereo_engine::render::GpuResource;

/// Frames to render before shutting down
const FRAME_LIMIT: u32 = 240;

/// Bones driven by [`SwayAnimation`]
const BONE_COUNT: usize = 4;

/// Bones rotating back and forth around Z
struct SwayAnimation {
    bones: usize,
}

impl AnimationSource for SwayAnimation {
    fn bone_matrices(&mut self, frame_number: u64) -> Vec<Mat4> {
        let phase = (frame_number % 120) as f32 / 120.0 * TAU;
        (0..self.bones)
            .map(|bone| {
                let angle = 0.3 * (phase + bone as f32 * 0.5).sin();
                Quat::from_axis_angle(&Vec3::z_axis(), angle).to_homogeneous()
            })
            .collect()
    }
}

struct MirrorApp {
    frames: u32,
    angle: f32,
    spinner: Option<Entity>,
}

impl MirrorApp {
    fn new() -> Self {
        Self {
            frames: 0,
            angle: 0.0,
            spinner: None,
        }
    }
}

impl Application<HeadlessDevice> for MirrorApp {
    fn initialize(&mut self, engine: &mut Engine<HeadlessDevice>) -> Result<(), AppError> {
        log::info!("Initializing mirror demo...");
        let (scene, assets, renderer) = engine.parts_mut();

        let triangle: [[f32; 3]; 3] = [[0.0, 0.5, 0.0], [-0.5, -0.5, 0.0], [0.5, -0.5, 0.0]];
        let triangle = renderer.upload_mesh(
            assets,
            "triangle",
            bytemuck::cast_slice(&triangle),
            3,
            None,
        )?;

        let quad: [[f32; 3]; 4] = [
            [-0.5, 0.0, 0.0],
            [0.5, 0.0, 0.0],
            [0.5, 1.0, 0.0],
            [-0.5, 1.0, 0.0],
        ];
        let rig = renderer.upload_mesh(
            assets,
            "rig",
            bytemuck::cast_slice(&quad),
            4,
            Some(&[0, 1, 2, 2, 3, 0]),
        )?;

        let device = renderer.device_mut();
        let layout = device.create_pipeline_layout();
        let lit = device.create_pipeline(layout);
        let skinned = device.create_pipeline(layout);
        renderer.register(GpuResource::PipelineLayout(layout));
        renderer.register(GpuResource::Pipeline(lit));
        renderer.register(GpuResource::Pipeline(skinned));
        let lit = assets.create_material("lit", lit, layout)?;
        let skinned = assets.create_material("skinned", skinned, layout)?;

        let spinner = scene.add_entity("spinner");
        scene.set_local_transform(spinner, Transform::from_position(Vec3::new(0.0, 1.5, -2.0)))?;
        scene.add_component(spinner, RenderPayload::new(triangle, lit, RenderKind::Static))?;

        let moon = scene.add_child_entity(spinner, "moon")?;
        scene.set_local_transform(moon, Transform::from_position(Vec3::new(1.0, 0.0, 0.0)))?;
        scene.add_component(moon, RenderPayload::new(triangle, lit, RenderKind::Static))?;

        let figure = scene.add_entity("figure");
        scene.set_local_transform(figure, Transform::from_position(Vec3::new(-1.0, 0.0, -3.0)))?;
        scene.add_component(figure, RenderPayload::new(rig, skinned, RenderKind::Skinned))?;

        self.spinner = Some(spinner);
        log::info!("Scene ready: {} renderables", scene.renderables().count());
        Ok(())
    }

    fn update(
        &mut self,
        scene: &mut Scene,
        _assets: &mut AssetStore,
        delta_time: f32,
    ) -> Result<(), AppError> {
        self.frames += 1;
        self.angle = (self.angle + delta_time * 1.5) % TAU;

        if let Some(spinner) = self.spinner {
            let transform = Transform {
                position: Vec3::new(0.0, 1.5, -2.0),
                rotation: Quat::from_axis_angle(&Vec3::y_axis(), self.angle),
                ..Transform::default()
            };
            scene.set_local_transform(spinner, transform)?;
        }
        Ok(())
    }

    fn should_quit(&self) -> bool {
        self.frames >= FRAME_LIMIT
    }

    fn cleanup(&mut self, engine: &mut Engine<HeadlessDevice>) {
        log::info!(
            "Cleaning up after {} frames ({} live device objects)",
            self.frames,
            engine.renderer().device().live_object_count()
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(&path)?,
        None => EngineConfig::default(),
    };
    logging::init_with_level(config.log_level_filter());
    log::info!("Starting mirror demo");

    let engine = Engine::headless(&config)?.with_animation(SwayAnimation { bones: BONE_COUNT });
    let mut app = MirrorApp::new();
    let (device, stats) = engine.run(&mut app)?;

    log::info!(
        "Mirror demo finished: {} frames presented, {} skipped, {} submissions, {} live objects",
        stats.presented,
        stats.skipped,
        device.submissions().len(),
        device.live_object_count()
    );
    Ok(())
}
