//! Application trait and lifecycle management

use thiserror::Error;

use crate::engine::Engine;
use crate::render::{AssetStore, GraphicsDevice, RenderError};
use crate::scene::{Scene, SceneError};

/// Application lifecycle trait
///
/// Implement this to drive a scene through the engine's frame loop.
pub trait Application<D: GraphicsDevice> {
    /// Initialize the application
    ///
    /// Called once before the first frame. Build the scene and upload
    /// assets here.
    fn initialize(&mut self, engine: &mut Engine<D>) -> Result<(), AppError>;

    /// Update the application
    ///
    /// Called once per frame, before the frame is rendered.
    ///
    /// # Arguments
    /// * `scene` - Scene to mutate
    /// * `assets` - Meshes and materials
    /// * `delta_time` - Time since last frame in seconds
    fn update(
        &mut self,
        scene: &mut Scene,
        assets: &mut AssetStore,
        delta_time: f32,
    ) -> Result<(), AppError>;

    /// Whether the loop should stop
    ///
    /// Checked between frames only; a frame that has started always runs
    /// to presentation.
    fn should_quit(&self) -> bool {
        false
    }

    /// Cleanup the application
    ///
    /// Called once after the last frame, before the renderer tears down,
    /// even when the loop ended with an error.
    fn cleanup(&mut self, engine: &mut Engine<D>);
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),

    /// Scene manipulation failed
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// Rendering setup failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}
