//! Asset store for meshes and materials
//!
//! The store exclusively owns mesh geometry and material bindings; render
//! payloads only hold generation-checked handles into it.

use std::collections::HashMap;

use slotmap::{new_key_type, SlotMap};

use super::device::{
    BufferDesc, BufferHandle, BufferUsage, DescriptorSetHandle, GraphicsDevice, MemoryLocation,
    PipelineHandle, PipelineLayoutHandle,
};
use super::error::{RenderError, RenderResult};
use super::teardown::{GpuResource, TeardownLedger};

new_key_type! {
    /// Handle to a mesh in an [`AssetStore`]
    pub struct MeshHandle;
    /// Handle to a material in an [`AssetStore`]
    pub struct MaterialHandle;
}

/// GPU geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mesh {
    /// Vertex buffer
    pub vertex_buffer: BufferHandle,
    /// Vertices drawn for non-indexed draws
    pub vertex_count: u32,
    /// Index buffer and index count, if the mesh is indexed
    pub index_buffer: Option<(BufferHandle, u32)>,
}

impl Mesh {
    /// Device objects backing this mesh
    pub fn resources(&self) -> impl Iterator<Item = GpuResource> {
        std::iter::once(GpuResource::Buffer(self.vertex_buffer))
            .chain(self.index_buffer.map(|(buffer, _)| GpuResource::Buffer(buffer)))
    }
}

/// Pipeline plus bound resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Material {
    /// Graphics pipeline
    pub pipeline: PipelineHandle,
    /// Layout the pipeline was built with
    pub layout: PipelineLayoutHandle,
    /// Material descriptor set, bound at set 2 in eye passes
    pub descriptor_set: Option<DescriptorSetHandle>,
}

impl Material {
    /// Material without its own descriptor set
    pub fn new(pipeline: PipelineHandle, layout: PipelineLayoutHandle) -> Self {
        Self {
            pipeline,
            layout,
            descriptor_set: None,
        }
    }

    /// Attach a material descriptor set
    pub fn with_descriptor_set(mut self, set: DescriptorSetHandle) -> Self {
        self.descriptor_set = Some(set);
        self
    }
}

/// Static geometry or skinned geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderKind {
    /// Rigid geometry, drawn non-indexed
    Static,
    /// Bone-animated geometry, drawn indexed with the bone buffer bound
    Skinned,
}

/// What an entity draws with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPayload {
    /// Geometry
    pub mesh: MeshHandle,
    /// Material
    pub material: MaterialHandle,
    /// Static or skinned
    pub kind: RenderKind,
}

impl RenderPayload {
    /// Create a payload from handles
    pub fn new(mesh: MeshHandle, material: MaterialHandle, kind: RenderKind) -> Self {
        Self {
            mesh,
            material,
            kind,
        }
    }

    /// Look up both assets by name
    pub fn from_assets(
        store: &AssetStore,
        mesh_name: &str,
        material_name: &str,
        kind: RenderKind,
    ) -> Option<Self> {
        Some(Self::new(
            store.get_mesh(mesh_name)?,
            store.get_material(material_name)?,
            kind,
        ))
    }

    /// Whether the payload uses the bone buffer
    pub fn is_skinned(&self) -> bool {
        self.kind == RenderKind::Skinned
    }
}

/// Named meshes and materials
#[derive(Default)]
pub struct AssetStore {
    meshes: SlotMap<MeshHandle, Mesh>,
    mesh_names: HashMap<String, MeshHandle>,
    materials: SlotMap<MaterialHandle, Material>,
    material_names: HashMap<String, MaterialHandle>,
}

impl AssetStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mesh under a unique name
    pub fn insert_mesh(&mut self, name: impl Into<String>, mesh: Mesh) -> RenderResult<MeshHandle> {
        let name = name.into();
        if self.mesh_names.contains_key(&name) {
            return Err(RenderError::invalid(format!("mesh '{name}' already exists")));
        }
        let handle = self.meshes.insert(mesh);
        log::debug!("Registered mesh '{name}'");
        self.mesh_names.insert(name, handle);
        Ok(handle)
    }

    /// Create host-visible vertex and index buffers, fill them and register the mesh
    ///
    /// The buffers are recorded in `ledger` for destruction at shutdown.
    pub fn upload_mesh<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        ledger: &mut TeardownLedger,
        name: impl Into<String>,
        vertex_bytes: &[u8],
        vertex_count: u32,
        indices: Option<&[u32]>,
    ) -> RenderResult<MeshHandle> {
        let name = name.into();
        if self.mesh_names.contains_key(&name) {
            return Err(RenderError::invalid(format!("mesh '{name}' already exists")));
        }

        let vertex_buffer = upload_buffer(device, "mesh vertices", BufferUsage::VERTEX, vertex_bytes)?;
        ledger.push(GpuResource::Buffer(vertex_buffer));

        let index_buffer = match indices {
            Some(indices) => {
                let buffer = upload_buffer(
                    device,
                    "mesh indices",
                    BufferUsage::INDEX,
                    bytemuck::cast_slice(indices),
                )?;
                ledger.push(GpuResource::Buffer(buffer));
                Some((buffer, indices.len() as u32))
            }
            None => None,
        };

        self.insert_mesh(
            name,
            Mesh {
                vertex_buffer,
                vertex_count,
                index_buffer,
            },
        )
    }

    /// Add a material under a unique name
    pub fn insert_material(
        &mut self,
        name: impl Into<String>,
        material: Material,
    ) -> RenderResult<MaterialHandle> {
        let name = name.into();
        if self.material_names.contains_key(&name) {
            return Err(RenderError::invalid(format!("material '{name}' already exists")));
        }
        let handle = self.materials.insert(material);
        log::debug!("Registered material '{name}'");
        self.material_names.insert(name, handle);
        Ok(handle)
    }

    /// Create a material from an externally built pipeline
    pub fn create_material(
        &mut self,
        name: impl Into<String>,
        pipeline: PipelineHandle,
        layout: PipelineLayoutHandle,
    ) -> RenderResult<MaterialHandle> {
        self.insert_material(name, Material::new(pipeline, layout))
    }

    /// Mesh handle by name
    pub fn get_mesh(&self, name: &str) -> Option<MeshHandle> {
        self.mesh_names.get(name).copied()
    }

    /// Material handle by name
    pub fn get_material(&self, name: &str) -> Option<MaterialHandle> {
        self.material_names.get(name).copied()
    }

    /// Resolve a mesh handle
    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    /// Resolve a material handle
    pub fn material(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle)
    }

    /// Number of meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Number of materials
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Unload a mesh, handing its buffers to the ledger's retirement queue
    ///
    /// Payloads still holding the handle stop resolving and their draws are
    /// skipped. Returns `false` if no mesh has that name.
    pub fn retire_mesh(
        &mut self,
        name: &str,
        ledger: &mut TeardownLedger,
        frame_number: u64,
    ) -> bool {
        let Some(handle) = self.mesh_names.remove(name) else {
            return false;
        };
        let Some(mesh) = self.meshes.remove(handle) else {
            return false;
        };
        for resource in mesh.resources() {
            ledger.forget(resource);
            ledger.retire(resource, frame_number);
        }
        log::info!("Retired mesh '{name}' at frame {frame_number}");
        true
    }
}

fn upload_buffer<D: GraphicsDevice + ?Sized>(
    device: &mut D,
    label: &'static str,
    usage: BufferUsage,
    bytes: &[u8],
) -> RenderResult<BufferHandle> {
    let buffer = device.create_buffer(&BufferDesc {
        label,
        size: bytes.len().max(1) as u64,
        usage,
        location: MemoryLocation::CpuToGpu,
    })?;
    let mapped = device.map_buffer(buffer)?;
    mapped[..bytes.len()].copy_from_slice(bytes);
    device.unmap_buffer(buffer);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadlessConfig;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::device::Extent2D;

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(&HeadlessConfig::default(), Extent2D::new(16, 16))
    }

    #[test]
    fn test_lookup_by_name() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(2);
        let mut store = AssetStore::new();

        let cube = store
            .upload_mesh(&mut device, &mut ledger, "cube", &[0u8; 36], 3, None)
            .unwrap();
        let layout = device.create_pipeline_layout();
        let pipeline = device.create_pipeline(layout);
        let lit = store.create_material("lit", pipeline, layout).unwrap();

        assert_eq!(store.get_mesh("cube"), Some(cube));
        assert_eq!(store.get_material("lit"), Some(lit));
        assert_eq!(store.get_mesh("sphere"), None);
        assert_eq!(store.mesh(cube).unwrap().vertex_count, 3);
        assert_eq!(ledger.len(), 1);

        let payload = RenderPayload::from_assets(&store, "cube", "lit", RenderKind::Static).unwrap();
        assert_eq!(payload.mesh, cube);
        assert!(RenderPayload::from_assets(&store, "cube", "unlit", RenderKind::Static).is_none());
    }

    #[test]
    fn test_upload_writes_indices() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(2);
        let mut store = AssetStore::new();

        let handle = store
            .upload_mesh(&mut device, &mut ledger, "tri", &[7u8; 12], 3, Some(&[0u32, 1, 2][..]))
            .unwrap();
        let (index_buffer, count) = store.mesh(handle).unwrap().index_buffer.unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            device.buffer_contents(index_buffer).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&[0, 1, 2])
        );
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut store = AssetStore::new();
        let mesh = Mesh {
            vertex_buffer: BufferHandle(1),
            vertex_count: 3,
            index_buffer: None,
        };
        store.insert_mesh("a", mesh).unwrap();
        assert!(store.insert_mesh("a", mesh).is_err());
    }

    #[test]
    fn test_retire_mesh_moves_buffers_to_retirement() {
        let mut device = device();
        let mut ledger = TeardownLedger::new(2);
        let mut store = AssetStore::new();
        let handle = store
            .upload_mesh(&mut device, &mut ledger, "tri", &[0u8; 12], 3, Some(&[0u32, 1, 2][..]))
            .unwrap();

        assert!(store.retire_mesh("tri", &mut ledger, 4));
        assert!(store.mesh(handle).is_none());
        assert!(store.get_mesh("tri").is_none());
        assert_eq!(ledger.len(), 0);
        assert_eq!(ledger.retired_len(), 2);

        assert_eq!(ledger.collect_retired(&mut device, 6), 2);
        assert!(!store.retire_mesh("tri", &mut ledger, 7));

        ledger.flush(crate::render::teardown::wait_idle(&mut device).unwrap());
    }
}
