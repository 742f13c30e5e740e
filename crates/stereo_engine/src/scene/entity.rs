//! Entity handles

use slotmap::new_key_type;

use super::components::Component;
use super::graph::Scene;
use super::SceneError;

new_key_type! {
    /// Generational index into a scene's entity table
    pub struct EntityKey;
}

/// Identifier of the scene that created an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId(pub(super) u32);

/// Entity identifier
///
/// Carries no data of its own. The key is generation-checked, so a handle
/// that outlives [`Scene::clear`] resolves to nothing instead of aliasing a
/// newer entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    key: EntityKey,
    scene: SceneId,
}

impl Entity {
    pub(super) fn new(key: EntityKey, scene: SceneId) -> Self {
        Self { key, scene }
    }

    /// Index into the owning scene's tables
    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// The scene this entity belongs to
    pub fn scene_id(&self) -> SceneId {
        self.scene
    }
}

/// Scoped mutable view of one entity inside its scene
pub struct EntityMut<'a> {
    scene: &'a mut Scene,
    entity: Entity,
}

impl<'a> EntityMut<'a> {
    pub(super) fn new(scene: &'a mut Scene, entity: Entity) -> Self {
        Self { scene, entity }
    }

    /// The wrapped entity
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Attach or replace a component
    pub fn add_component<T: Component>(&mut self, component: T) -> &mut Self {
        // Existence was checked when the view was created
        let _ = self.scene.add_component(self.entity, component);
        self
    }

    /// Read a component
    pub fn get_component<T: Component>(&self) -> Option<&T> {
        self.scene.get_component::<T>(self.entity)
    }

    /// Create a named child of this entity
    pub fn add_child_entity(&mut self, name: impl Into<String>) -> Result<Entity, SceneError> {
        self.scene.add_child_entity(self.entity, name)
    }

    /// World transform of this entity
    pub fn world_transform(&mut self) -> Result<crate::foundation::math::Mat4, SceneError> {
        self.scene.world_transform(self.entity)
    }
}
