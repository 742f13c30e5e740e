//! Multi-pass draw sequencer
//!
//! Records one frame as a fixed sequence of passes into the current slot's
//! command context:
//!
//! 1. Shadow pass: depth-only, from the light's point of view
//! 2. Eye pass 0 and eye pass 1: color and depth, sampling the shadow map
//! 3. Composite blit: eye 1 scaled into the presentation image
//!
//! The order is tracked by [`FramePhase`]; stepping out of order is a bug
//! in the caller and panics.
//!
//! ## Descriptor set slots
//!
//! | Pass   | Set 0     | Set 1      | Set 2    | Set 3 |
//! |--------|-----------|------------|----------|-------|
//! | Shadow | frame     | bones      |          |       |
//! | Eye    | frame     | shadow map | material | bones |

use bytemuck::Pod;

use super::assets::{AssetStore, Material, Mesh, RenderKind};
use super::device::{
    BufferHandle, ClearValue, Command, CommandContextHandle, DescriptorSetHandle, Extent2D,
    Filter, FramebufferHandle, GraphicsDevice, ImageAspect, ImageBarrier, ImageHandle,
    ImageLayout, PipelineHandle, PipelineLayoutHandle, PipelineStage, RenderPassHandle,
    ShaderStages,
};
use super::error::RenderResult;
use super::frame::FrameContext;
use super::staging::{PassConstants, StagedFrame};
use crate::foundation::math::{to_cols_array, Mat4};

const FRAME_SET: u32 = 0;
const SHADOW_BONE_SET: u32 = 1;
const MATERIAL_SET: u32 = 2;
const EYE_BONE_SET: u32 = 3;

/// Where the current frame is in its recording and submission sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    /// No frame recorded yet
    Idle,
    /// Command recording started
    RecordBegin,
    /// Shadow depth pass
    ShadowPass,
    /// Color pass for one eye
    EyePass(usize),
    /// Eye image copied to the presentation image
    CompositeBlit,
    /// Command recording finished
    RecordEnd,
    /// Commands queued
    Submitted,
    /// Image handed to the presentation engine
    Presented,
}

impl FramePhase {
    /// The only phase allowed to follow this one
    pub fn next(self) -> Self {
        match self {
            Self::Idle | Self::Presented => Self::RecordBegin,
            Self::RecordBegin => Self::ShadowPass,
            Self::ShadowPass => Self::EyePass(0),
            Self::EyePass(0) => Self::EyePass(1),
            Self::EyePass(_) => Self::CompositeBlit,
            Self::CompositeBlit => Self::RecordEnd,
            Self::RecordEnd => Self::Submitted,
            Self::Submitted => Self::Presented,
        }
    }
}

/// Offscreen depth target for the shadow pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowTarget {
    /// Depth-only render pass
    pub render_pass: RenderPassHandle,
    /// Framebuffer over the shadow map
    pub framebuffer: FramebufferHandle,
    /// Shadow map image
    pub depth_image: ImageHandle,
    /// Shadow map size
    pub extent: Extent2D,
    /// Set sampling the shadow map, bound at set 1 in eye passes
    pub shadow_set: DescriptorSetHandle,
}

/// Color and depth target for one eye
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EyeTarget {
    /// Color plus depth render pass
    pub render_pass: RenderPassHandle,
    /// Framebuffer over this eye's attachments
    pub framebuffer: FramebufferHandle,
    /// Color attachment image
    pub color_image: ImageHandle,
    /// Render size
    pub extent: Extent2D,
}

/// Render targets, created once at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargets {
    /// Shadow map
    pub shadow: ShadowTarget,
    /// Left eye, then right eye
    pub eyes: [EyeTarget; 2],
}

/// Depth-only pipelines for the shadow pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPipelines {
    /// Rigid geometry
    pub static_mesh: PipelineHandle,
    /// Bone-animated geometry
    pub skinned: PipelineHandle,
    /// Layout shared by both
    pub layout: PipelineLayoutHandle,
}

/// A draw whose mesh and material both resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDraw {
    /// Object record index, used as the first instance
    pub object_index: u32,
    /// Static or skinned
    pub kind: RenderKind,
    /// Geometry
    pub mesh: Mesh,
    /// Material
    pub material: Material,
}

/// Resolve a frame's draws against the asset store
///
/// Draws whose mesh or material no longer exists are skipped with a
/// warning, as are skinned draws on meshes without indices. Returns the
/// resolved draws and the number skipped. Object indices are kept as
/// planned, so skipping leaves a hole rather than shifting later records.
pub fn resolve_draws(plan: &StagedFrame, assets: &AssetStore) -> (Vec<ResolvedDraw>, usize) {
    let mut skipped = 0;
    let draws = plan
        .draws
        .iter()
        .filter_map(|draw| {
            let mesh = assets.mesh(draw.payload.mesh);
            let material = assets.material(draw.payload.material);
            let (Some(mesh), Some(material)) = (mesh, material) else {
                log::warn!(
                    "Skipping draw of {:?}: {} not found",
                    draw.entity,
                    if mesh.is_none() { "mesh" } else { "material" }
                );
                skipped += 1;
                return None;
            };

            if draw.payload.is_skinned() && mesh.index_buffer.is_none() {
                log::warn!("Skipping skinned draw of {:?}: mesh has no indices", draw.entity);
                skipped += 1;
                return None;
            }

            Some(ResolvedDraw {
                object_index: draw.object_index,
                kind: draw.payload.kind,
                mesh: *mesh,
                material: *material,
            })
        })
        .collect();
    (draws, skipped)
}

/// Typed command recording over one command context
pub struct CommandRecorder<'a, D: GraphicsDevice + ?Sized> {
    device: &'a mut D,
    context: CommandContextHandle,
    recorded: usize,
}

impl<'a, D: GraphicsDevice + ?Sized> CommandRecorder<'a, D> {
    /// Begin recording into `context`
    pub fn begin(device: &'a mut D, context: CommandContextHandle) -> RenderResult<Self> {
        device.begin_commands(context)?;
        Ok(Self {
            device,
            context,
            recorded: 0,
        })
    }

    fn record(&mut self, command: Command) {
        self.device.record(self.context, &command);
        self.recorded += 1;
    }

    /// Begin a render pass; it ends when the returned guard drops
    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2D,
        clear_values: Vec<ClearValue>,
    ) -> ActiveRenderPass<'_, 'a, D> {
        self.record(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_values,
        });
        ActiveRenderPass { recorder: self }
    }

    /// Transition an image between layouts
    pub fn cmd_image_barrier(&mut self, barrier: ImageBarrier) {
        self.record(Command::PipelineBarrier(barrier));
    }

    /// Scaled copy of a whole image
    pub fn cmd_blit_image(
        &mut self,
        src: ImageHandle,
        src_extent: Extent2D,
        dst: ImageHandle,
        dst_extent: Extent2D,
        filter: Filter,
    ) {
        self.record(Command::BlitImage {
            src,
            src_extent,
            dst,
            dst_extent,
            filter,
        });
    }

    /// Commands recorded so far
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Finish recording, returning the number of commands recorded
    pub fn end(self) -> RenderResult<usize> {
        self.device.end_commands(self.context)?;
        Ok(self.recorded)
    }
}

/// Render pass in progress
pub struct ActiveRenderPass<'r, 'a, D: GraphicsDevice + ?Sized> {
    recorder: &'r mut CommandRecorder<'a, D>,
}

impl<D: GraphicsDevice + ?Sized> ActiveRenderPass<'_, '_, D> {
    /// Bind a graphics pipeline
    pub fn cmd_bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.recorder.record(Command::BindPipeline(pipeline));
    }

    /// Bind consecutive descriptor sets
    pub fn cmd_bind_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.recorder.record(Command::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    /// Push a plain-data value to the vertex stage
    pub fn cmd_push_constants<T: Pod>(&mut self, layout: PipelineLayoutHandle, value: &T) {
        self.recorder.record(Command::PushConstants {
            layout,
            stages: ShaderStages::VERTEX,
            offset: 0,
            data: bytemuck::bytes_of(value).to_vec(),
        });
    }

    /// Bind a vertex buffer
    pub fn cmd_bind_vertex_buffer(&mut self, buffer: BufferHandle) {
        self.recorder.record(Command::BindVertexBuffer(buffer));
    }

    /// Bind an index buffer
    pub fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle) {
        self.recorder.record(Command::BindIndexBuffer(buffer));
    }

    /// Draw one instance, non-indexed
    pub fn cmd_draw(&mut self, vertex_count: u32, first_instance: u32) {
        self.recorder.record(Command::Draw {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
            first_instance,
        });
    }

    /// Draw one instance, indexed
    pub fn cmd_draw_indexed(&mut self, index_count: u32, first_instance: u32) {
        self.recorder.record(Command::DrawIndexed {
            index_count,
            instance_count: 1,
            first_index: 0,
            vertex_offset: 0,
            first_instance,
        });
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for ActiveRenderPass<'_, '_, D> {
    fn drop(&mut self) {
        self.recorder.record(Command::EndRenderPass);
    }
}

/// Last bound state inside one pass
///
/// Binds are skipped when the value already matches. A fresh state is used
/// for every pass since nothing carries across render pass boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindState {
    /// Bound pipeline
    pub pipeline: Option<PipelineHandle>,
    /// Layout the per-frame sets were bound with
    pub layout: Option<PipelineLayoutHandle>,
    /// Bound material set
    pub material_set: Option<DescriptorSetHandle>,
    /// Whether the bone set is bound
    pub bones_bound: bool,
    /// Bound vertex buffer
    pub vertex_buffer: Option<BufferHandle>,
    /// Bound index buffer
    pub index_buffer: Option<BufferHandle>,
}

impl BindState {
    fn bind_pipeline<D: GraphicsDevice + ?Sized>(
        &mut self,
        pass: &mut ActiveRenderPass<'_, '_, D>,
        pipeline: PipelineHandle,
        stats: &mut RecordStats,
    ) {
        if self.pipeline != Some(pipeline) {
            pass.cmd_bind_pipeline(pipeline);
            self.pipeline = Some(pipeline);
            stats.pipeline_binds += 1;
        }
    }

    fn draw_mesh<D: GraphicsDevice + ?Sized>(
        &mut self,
        pass: &mut ActiveRenderPass<'_, '_, D>,
        draw: &ResolvedDraw,
        stats: &mut RecordStats,
    ) {
        if self.vertex_buffer != Some(draw.mesh.vertex_buffer) {
            pass.cmd_bind_vertex_buffer(draw.mesh.vertex_buffer);
            self.vertex_buffer = Some(draw.mesh.vertex_buffer);
        }

        match (draw.kind, draw.mesh.index_buffer) {
            (RenderKind::Skinned, Some((index_buffer, index_count))) => {
                if self.index_buffer != Some(index_buffer) {
                    pass.cmd_bind_index_buffer(index_buffer);
                    self.index_buffer = Some(index_buffer);
                }
                pass.cmd_draw_indexed(index_count, draw.object_index);
            }
            _ => pass.cmd_draw(draw.mesh.vertex_count, draw.object_index),
        }
        stats.draw_calls += 1;
    }
}

/// Per-pass matrices and the presentation image for one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    /// Slot being recorded
    pub frame: &'a FrameContext,
    /// Draws in object index order
    pub draws: &'a [ResolvedDraw],
    /// World to shadow clip space
    pub light_view_projection: Mat4,
    /// World to clip for each eye
    pub eye_view_projections: [Mat4; 2],
    /// Acquired presentation image
    pub presentation_image: ImageHandle,
    /// Presentation image size
    pub presentation_extent: Extent2D,
    /// Eye pass clear color
    pub clear_color: [f32; 4],
}

/// Counts from one recorded frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Commands recorded
    pub commands: usize,
    /// Draw calls across all passes
    pub draw_calls: usize,
    /// Pipeline binds across all passes
    pub pipeline_binds: usize,
}

/// Records frames pass by pass and tracks the frame phase
pub struct DrawSequencer {
    targets: RenderTargets,
    shadow_pipelines: ShadowPipelines,
    phase: FramePhase,
}

impl DrawSequencer {
    /// Create a sequencer over setup-time targets and pipelines
    pub fn new(targets: RenderTargets, shadow_pipelines: ShadowPipelines) -> Self {
        Self {
            targets,
            shadow_pipelines,
            phase: FramePhase::Idle,
        }
    }

    /// Current phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Render targets
    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    fn enter(&mut self, phase: FramePhase) {
        assert!(
            self.phase.next() == phase,
            "frame phase {phase:?} cannot follow {:?}",
            self.phase
        );
        log::trace!("Frame phase {:?} -> {phase:?}", self.phase);
        self.phase = phase;
    }

    /// Record every pass of one frame into the slot's command context
    pub fn record_frame<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        inputs: &FrameInputs<'_>,
    ) -> RenderResult<RecordStats> {
        let mut stats = RecordStats::default();

        self.enter(FramePhase::RecordBegin);
        let mut recorder = CommandRecorder::begin(device, inputs.frame.command_context)?;

        self.enter(FramePhase::ShadowPass);
        self.record_shadow_pass(&mut recorder, inputs, &mut stats);

        for eye in 0..2 {
            self.enter(FramePhase::EyePass(eye));
            self.record_eye_pass(&mut recorder, inputs, eye, &mut stats);
        }

        self.enter(FramePhase::CompositeBlit);
        self.record_composite_blit(&mut recorder, inputs);

        self.enter(FramePhase::RecordEnd);
        stats.commands = recorder.end()?;
        Ok(stats)
    }

    /// Note that the recorded frame was queued
    pub fn mark_submitted(&mut self) {
        self.enter(FramePhase::Submitted);
    }

    /// Note that the frame's image was presented
    pub fn mark_presented(&mut self) {
        self.enter(FramePhase::Presented);
    }

    fn record_shadow_pass<D: GraphicsDevice + ?Sized>(
        &self,
        recorder: &mut CommandRecorder<'_, D>,
        inputs: &FrameInputs<'_>,
        stats: &mut RecordStats,
    ) {
        let target = &self.targets.shadow;
        let pipelines = &self.shadow_pipelines;
        let constants = PassConstants {
            view_projection: to_cols_array(&inputs.light_view_projection),
        };

        {
            let mut pass = recorder.begin_render_pass(
                target.render_pass,
                target.framebuffer,
                target.extent,
                vec![ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                }],
            );
            pass.cmd_bind_descriptor_sets(pipelines.layout, FRAME_SET, &[inputs.frame.frame_set]);
            pass.cmd_push_constants(pipelines.layout, &constants);

            let mut state = BindState::default();
            for draw in inputs.draws {
                let pipeline = match draw.kind {
                    RenderKind::Static => pipelines.static_mesh,
                    RenderKind::Skinned => pipelines.skinned,
                };
                state.bind_pipeline(&mut pass, pipeline, stats);

                if draw.kind == RenderKind::Skinned && !state.bones_bound {
                    pass.cmd_bind_descriptor_sets(
                        pipelines.layout,
                        SHADOW_BONE_SET,
                        &[inputs.frame.bone_set],
                    );
                    state.bones_bound = true;
                }
                state.draw_mesh(&mut pass, draw, stats);
            }
        }

        // Eye passes sample what the shadow pass wrote
        recorder.cmd_image_barrier(ImageBarrier {
            image: target.depth_image,
            aspect: ImageAspect::Depth,
            old_layout: ImageLayout::DepthAttachment,
            new_layout: ImageLayout::ShaderReadOnly,
            src_stage: PipelineStage::FragmentTests,
            dst_stage: PipelineStage::FragmentShader,
        });
    }

    fn record_eye_pass<D: GraphicsDevice + ?Sized>(
        &self,
        recorder: &mut CommandRecorder<'_, D>,
        inputs: &FrameInputs<'_>,
        eye: usize,
        stats: &mut RecordStats,
    ) {
        let target = &self.targets.eyes[eye];
        let constants = PassConstants {
            view_projection: to_cols_array(&inputs.eye_view_projections[eye]),
        };

        let mut pass = recorder.begin_render_pass(
            target.render_pass,
            target.framebuffer,
            target.extent,
            vec![
                ClearValue::Color(inputs.clear_color),
                ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                },
            ],
        );

        let mut state = BindState::default();
        for draw in inputs.draws {
            let material = &draw.material;
            state.bind_pipeline(&mut pass, material.pipeline, stats);

            // Per-frame sets and push constants follow the layout
            if state.layout != Some(material.layout) {
                pass.cmd_bind_descriptor_sets(
                    material.layout,
                    FRAME_SET,
                    &[inputs.frame.frame_set, self.targets.shadow.shadow_set],
                );
                pass.cmd_push_constants(material.layout, &constants);
                state.layout = Some(material.layout);
                state.material_set = None;
                state.bones_bound = false;
            }

            if let Some(set) = material.descriptor_set {
                if state.material_set != Some(set) {
                    pass.cmd_bind_descriptor_sets(material.layout, MATERIAL_SET, &[set]);
                    state.material_set = Some(set);
                }
            }

            if draw.kind == RenderKind::Skinned && !state.bones_bound {
                pass.cmd_bind_descriptor_sets(
                    material.layout,
                    EYE_BONE_SET,
                    &[inputs.frame.bone_set],
                );
                state.bones_bound = true;
            }

            state.draw_mesh(&mut pass, draw, stats);
        }
    }

    fn record_composite_blit<D: GraphicsDevice + ?Sized>(
        &self,
        recorder: &mut CommandRecorder<'_, D>,
        inputs: &FrameInputs<'_>,
    ) {
        let eye = &self.targets.eyes[1];

        recorder.cmd_image_barrier(ImageBarrier {
            image: eye.color_image,
            aspect: ImageAspect::Color,
            old_layout: ImageLayout::ColorAttachment,
            new_layout: ImageLayout::TransferSrc,
            src_stage: PipelineStage::ColorAttachmentOutput,
            dst_stage: PipelineStage::Transfer,
        });
        recorder.cmd_image_barrier(ImageBarrier {
            image: inputs.presentation_image,
            aspect: ImageAspect::Color,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::TransferDst,
            src_stage: PipelineStage::TopOfPipe,
            dst_stage: PipelineStage::Transfer,
        });
        recorder.cmd_blit_image(
            eye.color_image,
            eye.extent,
            inputs.presentation_image,
            inputs.presentation_extent,
            Filter::Nearest,
        );
        recorder.cmd_image_barrier(ImageBarrier {
            image: inputs.presentation_image,
            aspect: ImageAspect::Color,
            old_layout: ImageLayout::TransferDst,
            new_layout: ImageLayout::PresentSrc,
            src_stage: PipelineStage::Transfer,
            dst_stage: PipelineStage::BottomOfPipe,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let mut phase = FramePhase::Idle;
        let mut seen = Vec::new();
        for _ in 0..9 {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                FramePhase::RecordBegin,
                FramePhase::ShadowPass,
                FramePhase::EyePass(0),
                FramePhase::EyePass(1),
                FramePhase::CompositeBlit,
                FramePhase::RecordEnd,
                FramePhase::Submitted,
                FramePhase::Presented,
                FramePhase::RecordBegin,
            ]
        );
    }

    #[test]
    #[should_panic(expected = "cannot follow")]
    fn test_present_before_submit_panics() {
        let targets = RenderTargets {
            shadow: ShadowTarget {
                render_pass: RenderPassHandle(1),
                framebuffer: FramebufferHandle(2),
                depth_image: ImageHandle(3),
                extent: Extent2D::new(4, 4),
                shadow_set: DescriptorSetHandle(4),
            },
            eyes: [EyeTarget {
                render_pass: RenderPassHandle(5),
                framebuffer: FramebufferHandle(6),
                color_image: ImageHandle(7),
                extent: Extent2D::new(4, 4),
            }; 2],
        };
        let pipelines = ShadowPipelines {
            static_mesh: PipelineHandle(8),
            skinned: PipelineHandle(9),
            layout: PipelineLayoutHandle(10),
        };
        let mut sequencer = DrawSequencer::new(targets, pipelines);
        sequencer.mark_presented();
    }
}
