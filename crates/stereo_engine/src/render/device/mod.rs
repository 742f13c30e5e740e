//! Graphics device interface
//!
//! The renderer talks to the GPU only through [`GraphicsDevice`]. Handles are
//! opaque `u64` values; what they index is up to the implementation. Object
//! creation that happens once at setup (render passes, pipelines, layouts)
//! is left to the backend's own API. The trait covers what the frame loop
//! does every frame plus destruction of everything the teardown ledger owns.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::RenderResult;

pub mod headless;
#[cfg(feature = "vulkan")]
pub mod vulkan;

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl $name {
                /// Raw handle value
                pub fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handle! {
    /// GPU buffer
    BufferHandle;
    /// GPU image
    ImageHandle;
    /// View onto an image
    ImageViewHandle;
    /// Framebuffer binding attachments to a render pass
    FramebufferHandle;
    /// Render pass
    RenderPassHandle;
    /// Graphics pipeline
    PipelineHandle;
    /// Pipeline layout
    PipelineLayoutHandle;
    /// Descriptor set layout
    DescriptorSetLayoutHandle;
    /// Allocated descriptor set
    DescriptorSetHandle;
    /// Command recording context (pool plus primary command buffer)
    CommandContextHandle;
    /// CPU-waitable GPU completion signal
    FenceHandle;
    /// GPU-GPU ordering signal
    SemaphoreHandle;
}

/// Two-dimensional size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2D {
    /// Create an extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

bitflags::bitflags! {
    /// Ways a buffer may be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Uniform buffer binding
        const UNIFORM = 1 << 0;
        /// Storage buffer binding
        const STORAGE = 1 << 1;
        /// Vertex input
        const VERTEX = 1 << 2;
        /// Index input
        const INDEX = 1 << 3;
        /// Transfer source
        const TRANSFER_SRC = 1 << 4;
        /// Transfer destination
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Shader stages a push constant range is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
    }
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Host-visible memory the CPU writes through a mapping
    CpuToGpu,
    /// Device-local memory
    GpuOnly,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug label
    pub label: &'static str,
    /// Size in bytes
    pub size: u64,
    /// Allowed usage
    pub usage: BufferUsage,
    /// Memory placement
    pub location: MemoryLocation,
}

/// Image layouts the frame loop transitions between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents undefined
    Undefined,
    /// Color attachment writes
    ColorAttachment,
    /// Depth attachment writes
    DepthAttachment,
    /// Sampled in shaders
    ShaderReadOnly,
    /// Source of a transfer
    TransferSrc,
    /// Destination of a transfer
    TransferDst,
    /// Ready for presentation
    PresentSrc,
}

/// Pipeline stages used in barriers and submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Start of the pipeline
    TopOfPipe,
    /// Fragment shading
    FragmentShader,
    /// Early and late depth tests
    FragmentTests,
    /// Color attachment output
    ColorAttachmentOutput,
    /// Transfers
    Transfer,
    /// End of the pipeline
    BottomOfPipe,
}

/// Image aspect touched by a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    /// Color data
    Color,
    /// Depth data
    Depth,
}

/// Blit filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest neighbour
    Nearest,
    /// Bilinear
    Linear,
}

/// Attachment clear value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color
    Color([f32; 4]),
    /// Depth and stencil
    DepthStencil {
        /// Depth value
        depth: f32,
        /// Stencil value
        stencil: u32,
    },
}

/// Layout transition of a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image being transitioned
    pub image: ImageHandle,
    /// Aspect being transitioned
    pub aspect: ImageAspect,
    /// Layout before the barrier
    pub old_layout: ImageLayout,
    /// Layout after the barrier
    pub new_layout: ImageLayout,
    /// Stage that must finish first
    pub src_stage: PipelineStage,
    /// Stage that waits
    pub dst_stage: PipelineStage,
}

/// Kind of buffer bound to a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
}

/// One buffer binding inside a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding slot
    pub binding: u32,
    /// Buffer kind
    pub kind: DescriptorKind,
    /// Bound buffer, whole range
    pub buffer: BufferHandle,
}

/// Commands recorded into a command context
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Begin a render pass over the full framebuffer area
    BeginRenderPass {
        /// Render pass
        render_pass: RenderPassHandle,
        /// Target framebuffer
        framebuffer: FramebufferHandle,
        /// Render area, also used for viewport and scissor
        extent: Extent2D,
        /// One clear value per attachment
        clear_values: Vec<ClearValue>,
    },
    /// End the current render pass
    EndRenderPass,
    /// Bind a graphics pipeline
    BindPipeline(PipelineHandle),
    /// Bind descriptor sets starting at `first_set`
    BindDescriptorSets {
        /// Layout the sets are compatible with
        layout: PipelineLayoutHandle,
        /// First set index
        first_set: u32,
        /// Sets to bind
        sets: Vec<DescriptorSetHandle>,
    },
    /// Bind a vertex buffer at binding 0
    BindVertexBuffer(BufferHandle),
    /// Bind a `u32` index buffer
    BindIndexBuffer(BufferHandle),
    /// Update push constants
    PushConstants {
        /// Layout declaring the range
        layout: PipelineLayoutHandle,
        /// Visible stages
        stages: ShaderStages,
        /// Byte offset
        offset: u32,
        /// Raw bytes
        data: Vec<u8>,
    },
    /// Non-indexed draw
    Draw {
        /// Vertices per instance
        vertex_count: u32,
        /// Instances
        instance_count: u32,
        /// First vertex
        first_vertex: u32,
        /// First instance, visible to shaders as the instance index base
        first_instance: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
        /// First index
        first_index: u32,
        /// Added to each index
        vertex_offset: i32,
        /// First instance, visible to shaders as the instance index base
        first_instance: u32,
    },
    /// Image layout transition
    PipelineBarrier(ImageBarrier),
    /// Scaled copy between whole images
    BlitImage {
        /// Source image, in `TransferSrc`
        src: ImageHandle,
        /// Source size
        src_extent: Extent2D,
        /// Destination image, in `TransferDst`
        dst: ImageHandle,
        /// Destination size
        dst_extent: Extent2D,
        /// Sampling filter
        filter: Filter,
    },
}

/// One queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Recorded commands to execute
    pub context: CommandContextHandle,
    /// Semaphore to wait on before `wait_stage`
    pub wait_semaphore: SemaphoreHandle,
    /// Stage that waits on `wait_semaphore`
    pub wait_stage: PipelineStage,
    /// Semaphore signaled when the commands finish
    pub signal_semaphore: SemaphoreHandle,
    /// Fence signaled when the commands finish
    pub fence: FenceHandle,
}

/// Capability interface over a graphics device
///
/// All calls come from a single thread. Destroy calls on objects the GPU
/// may still use are the caller's responsibility to order after a fence or
/// idle wait.
pub trait GraphicsDevice {
    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Map a host-visible buffer for writing
    ///
    /// The mapping stays valid until [`GraphicsDevice::unmap_buffer`].
    fn map_buffer(&mut self, buffer: BufferHandle) -> RenderResult<&mut [u8]>;

    /// Unmap a mapped buffer, making the writes visible to the device
    fn unmap_buffer(&mut self, buffer: BufferHandle);

    /// Destroy an image
    fn destroy_image(&mut self, image: ImageHandle);

    /// Destroy an image view
    fn destroy_image_view(&mut self, view: ImageViewHandle);

    /// Destroy a framebuffer
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Destroy a render pass
    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle);

    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);

    /// Allocate a descriptor set and point it at the given buffers
    fn allocate_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
        bindings: &[DescriptorBinding],
    ) -> RenderResult<DescriptorSetHandle>;

    /// Return a descriptor set to its pool
    fn free_descriptor_set(&mut self, set: DescriptorSetHandle);

    /// Create a command context
    fn create_command_context(&mut self) -> RenderResult<CommandContextHandle>;

    /// Destroy a command context
    fn destroy_command_context(&mut self, context: CommandContextHandle);

    /// Discard everything recorded into a context
    fn reset_command_context(&mut self, context: CommandContextHandle) -> RenderResult<()>;

    /// Start recording
    fn begin_commands(&mut self, context: CommandContextHandle) -> RenderResult<()>;

    /// Record one command
    fn record(&mut self, context: CommandContextHandle, command: &Command);

    /// Finish recording
    fn end_commands(&mut self, context: CommandContextHandle) -> RenderResult<()>;

    /// Create a fence, optionally already signaled
    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle>;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Block until the fence signals or `timeout` passes
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> RenderResult<()>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()>;

    /// Create a semaphore
    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    /// Queue recorded commands for execution
    fn submit(&mut self, submission: &Submission) -> RenderResult<()>;

    /// Acquire the next presentation image, signaling `signal` when it is ready
    fn acquire_next_image(
        &mut self,
        signal: SemaphoreHandle,
        timeout: Duration,
    ) -> RenderResult<u32>;

    /// Present an image once `wait` signals
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<()>;

    /// Presentation images in swapchain order
    fn presentation_images(&self) -> &[ImageHandle];

    /// Size of the presentation images
    fn presentation_extent(&self) -> Extent2D;

    /// Block until the device has finished all submitted work
    fn wait_idle(&mut self) -> RenderResult<()>;
}
