//! Per-frame data staging
//!
//! Copies camera, scene, object and bone data into the current slot's
//! buffers. Every write is a map, copy, unmap sequence on a buffer only this
//! slot owns, so the only synchronization needed is the ring's fence wait.
//!
//! Object records are written at the renderable's position in scene
//! insertion order. The sequencer reuses that position as the draw's first
//! instance, so shaders index the object buffer with `gl_InstanceIndex`.

use bytemuck::{Pod, Zeroable};

use super::assets::RenderPayload;
use super::device::{BufferHandle, GraphicsDevice};
use super::error::{RenderError, RenderResult};
use super::frame::FrameContext;
use crate::config::RendererConfig;
use crate::foundation::math::{to_cols_array, Mat4};
use crate::scene::{Entity, Scene};

/// Column-major 4x4 matrix as stored in GPU buffers
pub type BoneMatrix = [[f32; 4]; 4];

/// Camera uniform, set 0 binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniformData {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub projection: [[f32; 4]; 4],
    /// World to clip
    pub view_projection: [[f32; 4]; 4],
    /// Camera position, w = 1
    pub position: [f32; 4],
}

/// Scene uniform, set 0 binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniformData {
    /// Ambient color, w = intensity
    pub ambient: [f32; 4],
    /// Direction light travels, w unused
    pub sun_direction: [f32; 4],
    /// Sun color, w = intensity
    pub sun_color: [f32; 4],
    /// World to shadow clip space
    pub light_view_projection: [[f32; 4]; 4],
}

/// One object record, set 0 binding 2
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectData {
    /// Object to world
    pub model: [[f32; 4]; 4],
}

/// Push constants shared by every draw in a pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PassConstants {
    /// World to clip for the pass's viewpoint
    pub view_projection: [[f32; 4]; 4],
}

/// Produces skeletal bone matrices once per frame
pub trait AnimationSource {
    /// Bone matrices for `frame_number`, one per bone
    fn bone_matrices(&mut self, frame_number: u64) -> Vec<Mat4>;
}

/// Animation source that holds every bone at identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestPose {
    /// Number of bones
    pub bones: usize,
}

impl AnimationSource for RestPose {
    fn bone_matrices(&mut self, _frame_number: u64) -> Vec<Mat4> {
        vec![Mat4::identity(); self.bones]
    }
}

/// One draw in staging order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawItem {
    /// Entity being drawn
    pub entity: Entity,
    /// Index of its record in the object buffer
    pub object_index: u32,
    /// What to draw it with
    pub payload: RenderPayload,
}

/// Draw list and bone usage for one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedFrame {
    /// Draws in scene insertion order
    pub draws: Vec<DrawItem>,
    /// Whether any draw is skinned
    pub skinned: bool,
    /// Bone matrices written this frame
    pub bone_count: usize,
}

/// Build the draw list and check it fits the per-frame buffers
///
/// Runs before the frame touches any GPU state, so an overflow leaves the
/// ring exactly as it was.
pub fn plan_frame(
    scene: &Scene,
    config: &RendererConfig,
    bone_count: usize,
) -> RenderResult<StagedFrame> {
    let draws: Vec<DrawItem> = scene
        .renderables()
        .enumerate()
        .map(|(index, (entity, payload))| DrawItem {
            entity,
            object_index: index as u32,
            payload: *payload,
        })
        .collect();

    if draws.len() > config.max_objects {
        return Err(RenderError::CapacityExceeded {
            buffer: "objects",
            requested: draws.len(),
            capacity: config.max_objects,
        });
    }

    let skinned = draws.iter().any(|draw| draw.payload.is_skinned());
    let bone_count = if skinned { bone_count } else { 0 };
    if bone_count > config.max_bones {
        return Err(RenderError::CapacityExceeded {
            buffer: "bones",
            requested: bone_count,
            capacity: config.max_bones,
        });
    }

    Ok(StagedFrame {
        draws,
        skinned,
        bone_count,
    })
}

/// Write this frame's data into the slot's buffers
pub fn stage_frame_data<D: GraphicsDevice + ?Sized>(
    device: &mut D,
    frame: &FrameContext,
    scene: &mut Scene,
    plan: &StagedFrame,
    camera: &CameraUniformData,
    lighting: &SceneUniformData,
    bones: &[Mat4],
) -> RenderResult<()> {
    write_records(device, frame.buffers.camera, std::slice::from_ref(camera))?;
    write_records(device, frame.buffers.scene, std::slice::from_ref(lighting))?;

    let mut objects = Vec::with_capacity(plan.draws.len());
    for draw in &plan.draws {
        debug_assert_eq!(draw.object_index as usize, objects.len());
        let model = scene
            .world_transform(draw.entity)
            .map_err(|err| RenderError::invalid(err.to_string()))?;
        objects.push(ObjectData {
            model: to_cols_array(&model),
        });
    }
    if objects.len() > frame.buffers.max_objects {
        return Err(RenderError::CapacityExceeded {
            buffer: "objects",
            requested: objects.len(),
            capacity: frame.buffers.max_objects,
        });
    }
    write_records(device, frame.buffers.objects, &objects)?;

    if plan.skinned && plan.bone_count > 0 {
        let count = plan.bone_count.min(bones.len());
        if count > frame.buffers.max_bones {
            return Err(RenderError::CapacityExceeded {
                buffer: "bones",
                requested: count,
                capacity: frame.buffers.max_bones,
            });
        }
        let matrices: Vec<BoneMatrix> = bones[..count].iter().map(to_cols_array).collect();
        write_records(device, frame.buffers.bones, &matrices)?;
    }

    log::trace!(
        "Staged {} objects, {} bones",
        plan.draws.len(),
        plan.bone_count
    );
    Ok(())
}

/// Map a buffer, copy records to its start, unmap
pub fn write_records<D, T>(device: &mut D, buffer: BufferHandle, records: &[T]) -> RenderResult<()>
where
    D: GraphicsDevice + ?Sized,
    T: Pod,
{
    let bytes: &[u8] = bytemuck::cast_slice(records);
    if bytes.is_empty() {
        return Ok(());
    }

    let mapped = device.map_buffer(buffer)?;
    let result = if bytes.len() <= mapped.len() {
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    } else {
        Err(RenderError::CapacityExceeded {
            buffer: "mapped",
            requested: bytes.len(),
            capacity: mapped.len(),
        })
    };
    device.unmap_buffer(buffer);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadlessConfig;
    use crate::foundation::math::{Transform, Vec3};
    use crate::render::assets::{MaterialHandle, MeshHandle, RenderKind};
    use crate::render::device::headless::{DeviceEvent, HeadlessDevice};
    use crate::render::device::Extent2D;
    use crate::render::frame::{FrameLayouts, FrameRing};
    use crate::render::teardown::{wait_idle, TeardownLedger};
    use slotmap::KeyData;

    fn payload(kind: RenderKind) -> RenderPayload {
        RenderPayload::new(
            MeshHandle::from(KeyData::from_ffi(1)),
            MaterialHandle::from(KeyData::from_ffi(1)),
            kind,
        )
    }

    fn config() -> RendererConfig {
        RendererConfig::default().with_capacities(4, 2)
    }

    fn ring(device: &mut HeadlessDevice, ledger: &mut TeardownLedger) -> FrameRing {
        let layouts = FrameLayouts {
            frame: device.create_descriptor_set_layout(),
            bones: device.create_descriptor_set_layout(),
        };
        ledger.push(crate::render::teardown::GpuResource::DescriptorSetLayout(layouts.frame));
        ledger.push(crate::render::teardown::GpuResource::DescriptorSetLayout(layouts.bones));
        FrameRing::new(device, &config(), layouts, ledger).unwrap()
    }

    fn object_model(device: &HeadlessDevice, buffer: BufferHandle, index: usize) -> ObjectData {
        let bytes = device.buffer_contents(buffer).unwrap();
        let size = std::mem::size_of::<ObjectData>();
        bytemuck::pod_read_unaligned(&bytes[index * size..(index + 1) * size])
    }

    #[test]
    fn test_records_have_gpu_layout_sizes() {
        assert_eq!(std::mem::size_of::<CameraUniformData>(), 208);
        assert_eq!(std::mem::size_of::<SceneUniformData>(), 112);
        assert_eq!(std::mem::size_of::<ObjectData>(), 64);
        assert_eq!(std::mem::size_of::<PassConstants>(), 64);
    }

    #[test]
    fn test_plan_uses_insertion_order_indices() {
        let mut scene = Scene::new();
        let a = scene.add_entity("a");
        let skip = scene.add_entity("no payload");
        let b = scene.add_entity("b");
        for entity in [a, skip, b] {
            scene.set_local_transform(entity, Transform::identity()).unwrap();
        }
        scene.add_component(a, payload(RenderKind::Static)).unwrap();
        scene.add_component(b, payload(RenderKind::Static)).unwrap();

        let plan = plan_frame(&scene, &config(), 0).unwrap();
        let order: Vec<_> = plan.draws.iter().map(|d| (d.entity, d.object_index)).collect();
        assert_eq!(order, vec![(a, 0), (b, 1)]);
        assert!(!plan.skinned);
    }

    #[test]
    fn test_plan_rejects_object_overflow() {
        let mut scene = Scene::new();
        for i in 0..5 {
            let e = scene.add_entity(format!("e{i}"));
            scene.set_local_transform(e, Transform::identity()).unwrap();
            scene.add_component(e, payload(RenderKind::Static)).unwrap();
        }
        let result = plan_frame(&scene, &config(), 0);
        assert_eq!(
            result,
            Err(RenderError::CapacityExceeded {
                buffer: "objects",
                requested: 5,
                capacity: 4
            })
        );
    }

    #[test]
    fn test_plan_checks_bones_only_when_skinned() {
        let mut scene = Scene::new();
        let e = scene.add_entity("static");
        scene.set_local_transform(e, Transform::identity()).unwrap();
        scene.add_component(e, payload(RenderKind::Static)).unwrap();
        assert_eq!(plan_frame(&scene, &config(), 50).unwrap().bone_count, 0);

        scene.add_component(e, payload(RenderKind::Skinned)).unwrap();
        assert!(matches!(
            plan_frame(&scene, &config(), 50),
            Err(RenderError::CapacityExceeded { buffer: "bones", .. })
        ));
    }

    #[test]
    fn test_stage_writes_world_transforms_at_draw_indices() {
        let mut device = HeadlessDevice::new(&HeadlessConfig::default(), Extent2D::new(8, 8));
        let mut ledger = TeardownLedger::new(2);
        let ring = ring(&mut device, &mut ledger);

        let mut scene = Scene::new();
        let mut entities = Vec::new();
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            let e = scene.add_entity(name);
            scene
                .set_local_transform(e, Transform::from_position(Vec3::new(i as f32 + 1.0, 0.0, 0.0)))
                .unwrap();
            scene.add_component(e, payload(RenderKind::Static)).unwrap();
            entities.push(e);
        }

        let plan = plan_frame(&scene, &config(), 0).unwrap();
        let frame = *ring.current_frame();
        device.take_events();
        stage_frame_data(
            &mut device,
            &frame,
            &mut scene,
            &plan,
            &CameraUniformData::zeroed(),
            &SceneUniformData::zeroed(),
            &[],
        )
        .unwrap();

        for (index, _) in entities.iter().enumerate() {
            let record = object_model(&device, frame.buffers.objects, index);
            assert_eq!(record.model[3][0], index as f32 + 1.0);
        }

        // Camera, scene and objects, each mapped then unmapped; no bone write
        let events = device.take_events();
        assert_eq!(events.len(), 6);
        assert!(!events.contains(&DeviceEvent::Map(frame.buffers.bones)));

        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_stage_writes_bones_for_skinned_frames() {
        let mut device = HeadlessDevice::new(&HeadlessConfig::default(), Extent2D::new(8, 8));
        let mut ledger = TeardownLedger::new(2);
        let ring = ring(&mut device, &mut ledger);

        let mut scene = Scene::new();
        let e = scene.add_entity("skinned");
        scene.set_local_transform(e, Transform::identity()).unwrap();
        scene.add_component(e, payload(RenderKind::Skinned)).unwrap();

        let bones = vec![Mat4::new_translation(&Vec3::new(0.0, 2.0, 0.0)); 2];
        let plan = plan_frame(&scene, &config(), bones.len()).unwrap();
        let frame = *ring.current_frame();
        stage_frame_data(
            &mut device,
            &frame,
            &mut scene,
            &plan,
            &CameraUniformData::zeroed(),
            &SceneUniformData::zeroed(),
            &bones,
        )
        .unwrap();

        let bytes = device.buffer_contents(frame.buffers.bones).unwrap();
        let second: BoneMatrix = bytemuck::pod_read_unaligned(&bytes[64..128]);
        assert_eq!(second[3][1], 2.0);

        ledger.flush(wait_idle(&mut device).unwrap());
    }

    #[test]
    fn test_rest_pose_is_identity() {
        let mut pose = RestPose { bones: 3 };
        let bones = pose.bone_matrices(0);
        assert_eq!(bones.len(), 3);
        assert!(bones.iter().all(|m| *m == Mat4::identity()));
    }
}
