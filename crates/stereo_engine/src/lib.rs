//! # Stereo Engine
//!
//! Frame orchestration and scene hierarchy core for a stereoscopic
//! renderer.
//!
//! ## Features
//!
//! - **Scene graph**: entities with parent links and lazily cached world
//!   transforms
//! - **Frames in flight**: a fixed ring of command contexts and per-frame
//!   buffers, each reused only after its fence signals
//! - **Stereo passes**: one shadow pass, one pass per eye and a mirror blit
//! - **Ordered teardown**: every device object destroyed exactly once
//! - **Headless device**: the whole frame loop runs without a GPU
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stereo_engine::prelude::*;
//!
//! struct MyApp;
//!
//! impl Application<HeadlessDevice> for MyApp {
//!     fn initialize(&mut self, engine: &mut Engine<HeadlessDevice>) -> Result<(), AppError> {
//!         engine.scene.add_entity("root");
//!         Ok(())
//!     }
//!
//!     fn update(
//!         &mut self,
//!         _scene: &mut Scene,
//!         _assets: &mut AssetStore,
//!         _delta_time: f32,
//!     ) -> Result<(), AppError> {
//!         Ok(())
//!     }
//!
//!     fn should_quit(&self) -> bool {
//!         true
//!     }
//!
//!     fn cleanup(&mut self, _engine: &mut Engine<HeadlessDevice>) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::headless(&EngineConfig::default())?;
//!     engine.run(&mut MyApp)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

mod application;
mod engine;

pub use application::{AppError, Application};
pub use engine::{Engine, EngineError, RunStats};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, EngineConfig, HeadlessConfig, RendererConfig},
        foundation::{
            math::{Mat4, Quat, Transform, Vec3},
            time::Timer,
        },
        render::{
            AnimationSource, AssetStore, DirectionalLight, FrameOutcome, GraphicsDevice,
            HeadlessDevice, RenderKind, RenderPayload, RestPose, StaticViewProvider,
            StereoRenderer, ViewProvider,
        },
        scene::{Entity, Scene, SceneError},
        AppError, Application, Engine, EngineError, RunStats,
    };
}
