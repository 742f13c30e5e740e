//! # Rendering System
//!
//! Frame orchestration for a stereo renderer: a fixed ring of in-flight
//! frames, per-frame data staging, a multi-pass draw sequencer and the
//! presentation bridge, all over an abstract [`GraphicsDevice`].
//!
//! ## Architecture
//!
//! - **Device**: capability interface with opaque handles; a headless
//!   implementation for tests and a Vulkan one behind the `vulkan` feature
//! - **Frame ring**: N slots, each reused only after its fence signals
//! - **Staging**: camera, scene, object and bone records copied per frame
//! - **Sequencer**: shadow pass, two eye passes and the mirror blit
//! - **Teardown ledger**: every device object is destroyed exactly once,
//!   newest first, after the device is idle
//!
//! ## Frame Flow
//!
//! ```text
//! plan -> wait slot fence -> stage -> acquire -> record -> submit -> present
//! ```
//!
//! A frame that fails to fit its buffers is rejected before the slot is
//! touched. Device errors after that are fatal.

pub mod assets;
pub mod device;
pub mod error;
pub mod frame;
pub mod lighting;
pub mod presentation;
pub mod renderer;
pub mod sequencer;
pub mod staging;
pub mod teardown;
pub mod xr;


pub use assets::{
    AssetStore, Material, MaterialHandle, Mesh, MeshHandle, RenderKind, RenderPayload,
};
pub use device::headless::HeadlessDevice;
pub use device::{Extent2D, GraphicsDevice};
pub use error::{RenderError, RenderResult};
pub use frame::{FrameContext, FrameRing};
pub use lighting::DirectionalLight;
pub use renderer::{FrameOutcome, FrameStats, RendererSetup, StereoRenderer};
pub use sequencer::FramePhase;
pub use staging::{AnimationSource, RestPose};
pub use teardown::{GpuResource, TeardownLedger};
pub use xr::{EyeView, StaticViewProvider, StereoViews, ViewProvider};
