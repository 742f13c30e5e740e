//! Scene graph with memoized world transforms
//!
//! Entities form a forest through parent links. World transforms are the
//! root-to-leaf product of local matrices and are cached per entity; a cache
//! entry exists only while every ancestor's entry does, and any local change
//! drops the entries of the whole subtree below the changed entity.

use std::sync::atomic::{AtomicU32, Ordering};

use slotmap::{SecondaryMap, SlotMap};

use super::components::{Component, ComponentTables, FreelyMutable, Name, TransformComponent};
use super::entity::{Entity, EntityKey, EntityMut, SceneId};
use super::SceneError;
use crate::foundation::math::Mat4;
use crate::render::assets::RenderPayload;

static NEXT_SCENE_ID: AtomicU32 = AtomicU32::new(0);

/// Owner of every entity, component and hierarchy link
pub struct Scene {
    id: SceneId,
    entities: SlotMap<EntityKey, ()>,
    order: Vec<EntityKey>,
    components: ComponentTables,
    parents: SecondaryMap<EntityKey, EntityKey>,
    children: SecondaryMap<EntityKey, Vec<EntityKey>>,
    world_cache: SecondaryMap<EntityKey, Mat4>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self {
            id: SceneId(NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed)),
            entities: SlotMap::with_key(),
            order: Vec::new(),
            components: ComponentTables::default(),
            parents: SecondaryMap::new(),
            children: SecondaryMap::new(),
            world_cache: SecondaryMap::new(),
        }
    }

    /// Identifier stamped into every entity this scene creates
    pub fn id(&self) -> SceneId {
        self.id
    }

    fn resolve(&self, entity: Entity) -> Result<EntityKey, SceneError> {
        if entity.scene_id() == self.id && self.entities.contains_key(entity.key()) {
            Ok(entity.key())
        } else {
            Err(SceneError::UnknownEntity(entity))
        }
    }

    fn entity(&self, key: EntityKey) -> Entity {
        Entity::new(key, self.id)
    }

    /// Whether the handle refers to a live entity of this scene
    pub fn contains(&self, entity: Entity) -> bool {
        self.resolve(entity).is_ok()
    }

    /// Create a root entity
    pub fn add_entity(&mut self, name: impl Into<String>) -> Entity {
        let key = self.entities.insert(());
        self.order.push(key);
        self.components.names.insert(key, Name(name.into()));
        self.children.insert(key, Vec::new());
        log::trace!("Added entity {key:?}");
        self.entity(key)
    }

    /// Create an entity parented to `parent`
    pub fn add_child_entity(
        &mut self,
        parent: Entity,
        name: impl Into<String>,
    ) -> Result<Entity, SceneError> {
        let parent_key = self.resolve(parent)?;
        let child = self.add_entity(name);
        self.link(child.key(), parent_key);
        Ok(child)
    }

    /// Scoped view of an entity
    pub fn entity_mut(&mut self, entity: Entity) -> Result<EntityMut<'_>, SceneError> {
        self.resolve(entity)?;
        Ok(EntityMut::new(self, entity))
    }

    /// Reparent `child` under `parent`, or detach it to a root with `None`
    ///
    /// Rejects self-parenting and any link that would make `child` its own
    /// ancestor; on rejection the hierarchy is left untouched.
    pub fn try_set_parent(
        &mut self,
        child: Entity,
        parent: Option<Entity>,
    ) -> Result<(), SceneError> {
        let child_key = self.resolve(child)?;
        let parent_key = parent.map(|p| self.resolve(p)).transpose()?;

        if let Some(parent_key) = parent_key {
            if parent_key == child_key {
                return Err(SceneError::SelfParent(child));
            }
            if self.is_ancestor_key(child_key, parent_key) {
                return Err(SceneError::CycleDetected {
                    child,
                    parent: self.entity(parent_key),
                });
            }
        }

        self.unlink(child_key);
        if let Some(parent_key) = parent_key {
            self.link(child_key, parent_key);
        }
        self.invalidate_subtree(child_key);
        Ok(())
    }

    /// Reparent `child`, treating a rejected link as a contract violation
    ///
    /// # Panics
    ///
    /// Panics on self-parenting, cycles or stale handles.
    pub fn set_parent(&mut self, child: Entity, parent: Option<Entity>) {
        if let Err(err) = self.try_set_parent(child, parent) {
            panic!("invalid scene hierarchy change: {err}");
        }
    }

    fn link(&mut self, child: EntityKey, parent: EntityKey) {
        self.parents.insert(child, parent);
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.push(child);
        }
    }

    fn unlink(&mut self, child: EntityKey) {
        if let Some(old_parent) = self.parents.remove(child) {
            if let Some(siblings) = self.children.get_mut(old_parent) {
                siblings.retain(|&sibling| sibling != child);
            }
        }
    }

    /// Parent of an entity, if any
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        let key = self.resolve(entity).ok()?;
        self.parents.get(key).map(|&parent| self.entity(parent))
    }

    /// Direct children of an entity in attachment order
    pub fn children(&self, entity: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.resolve(entity)
            .ok()
            .and_then(|key| self.children.get(key))
            .into_iter()
            .flatten()
            .map(|&child| self.entity(child))
    }

    /// Whether `ancestor` lies strictly above `descendant`
    pub fn is_ancestor(&self, ancestor: Entity, descendant: Entity) -> bool {
        match (self.resolve(ancestor), self.resolve(descendant)) {
            (Ok(a), Ok(d)) => a != d && self.is_ancestor_key(a, d),
            _ => false,
        }
    }

    fn is_ancestor_key(&self, ancestor: EntityKey, descendant: EntityKey) -> bool {
        let mut current = self.parents.get(descendant).copied();
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.parents.get(key).copied();
        }
        false
    }

    /// Attach or replace a component, returning the previous value
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<Option<T>, SceneError> {
        let key = self.resolve(entity)?;
        let previous = T::table_mut(&mut self.components).insert(key, component);
        if T::AFFECTS_WORLD_TRANSFORM {
            self.invalidate_subtree(key);
        }
        Ok(previous)
    }

    /// Detach a component
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<Option<T>, SceneError> {
        let key = self.resolve(entity)?;
        let removed = T::table_mut(&mut self.components).remove(key);
        if T::AFFECTS_WORLD_TRANSFORM && removed.is_some() {
            self.invalidate_subtree(key);
        }
        Ok(removed)
    }

    /// Read a component
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let key = self.resolve(entity).ok()?;
        T::table(&self.components).get(key)
    }

    /// Mutate a component that has no effect on world transforms
    pub fn get_component_mut<T: FreelyMutable>(&mut self, entity: Entity) -> Option<&mut T> {
        let key = self.resolve(entity).ok()?;
        T::table_mut(&mut self.components).get_mut(key)
    }

    /// Entity name
    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.get_component::<Name>(entity).map(Name::as_str)
    }

    /// Replace an entity's local transform
    pub fn set_local_transform(
        &mut self,
        entity: Entity,
        transform: TransformComponent,
    ) -> Result<(), SceneError> {
        self.add_component(entity, transform).map(|_| ())
    }

    /// Edit an entity's local transform in place, starting from identity if absent
    pub fn update_transform<F>(&mut self, entity: Entity, edit: F) -> Result<(), SceneError>
    where
        F: FnOnce(&mut TransformComponent),
    {
        let key = self.resolve(entity)?;
        let transforms = &mut self.components.transforms;
        if !transforms.contains_key(key) {
            transforms.insert(key, TransformComponent::default());
        }
        if let Some(transform) = transforms.get_mut(key) {
            edit(transform);
        }
        self.invalidate_subtree(key);
        Ok(())
    }

    fn invalidate_subtree(&mut self, root: EntityKey) {
        let mut pending = vec![root];
        while let Some(key) = pending.pop() {
            self.world_cache.remove(key);
            if let Some(children) = self.children.get(key) {
                pending.extend(children.iter().copied());
            }
        }
    }

    fn local_matrix(&self, key: EntityKey) -> Mat4 {
        self.components
            .transforms
            .get(key)
            .map_or_else(Mat4::identity, TransformComponent::to_matrix)
    }

    /// Whether an entity currently holds a cached world transform
    pub fn is_world_cached(&self, entity: Entity) -> bool {
        self.resolve(entity)
            .map(|key| self.world_cache.contains_key(key))
            .unwrap_or(false)
    }

    /// World transform of an entity
    ///
    /// Walks up to the nearest cached ancestor (or a root), then multiplies
    /// back down, caching every entity on the way. Entities without a
    /// transform component contribute identity.
    pub fn world_transform(&mut self, entity: Entity) -> Result<Mat4, SceneError> {
        let key = self.resolve(entity)?;
        if let Some(cached) = self.world_cache.get(key) {
            return Ok(*cached);
        }

        let mut chain = Vec::new();
        let mut accumulated = Mat4::identity();
        let mut current = Some(key);
        while let Some(node) = current {
            if let Some(cached) = self.world_cache.get(node) {
                accumulated = *cached;
                break;
            }
            chain.push(node);
            current = self.parents.get(node).copied();
        }

        for node in chain.into_iter().rev() {
            accumulated *= self.local_matrix(node);
            self.world_cache.insert(node, accumulated);
        }

        Ok(accumulated)
    }

    /// World transform recomputed from scratch, ignoring the cache
    pub fn world_transform_uncached(&self, entity: Entity) -> Result<Mat4, SceneError> {
        let key = self.resolve(entity)?;

        let mut chain = vec![key];
        let mut current = self.parents.get(key).copied();
        while let Some(node) = current {
            chain.push(node);
            current = self.parents.get(node).copied();
        }

        Ok(chain
            .into_iter()
            .rev()
            .fold(Mat4::identity(), |world, node| world * self.local_matrix(node)))
    }

    /// All entities in insertion order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.order.iter().map(|&key| self.entity(key))
    }

    /// Entities with both a transform and a render payload, in insertion order
    pub fn renderables(&self) -> impl Iterator<Item = (Entity, &RenderPayload)> + '_ {
        self.order.iter().filter_map(|&key| {
            if !self.components.transforms.contains_key(key) {
                return None;
            }
            self.components
                .payloads
                .get(key)
                .map(|payload| (self.entity(key), payload))
        })
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the scene has no entities
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop every entity; existing handles stop resolving
    pub fn clear(&mut self) {
        log::debug!("Clearing scene with {} entities", self.order.len());
        self.entities.clear();
        self.order.clear();
        self.components.clear();
        self.parents.clear();
        self.children.clear();
        self.world_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Quat, Transform, Vec3};
    use approx::assert_relative_eq;

    fn translation(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_position(Vec3::new(x, y, z))
    }

    fn uniform_scale(s: f32) -> Transform {
        Transform {
            scale: Vec3::new(s, s, s),
            ..Transform::default()
        }
    }

    #[test]
    fn test_child_world_is_parent_times_local() {
        let mut scene = Scene::new();
        let root = scene.add_entity("root");
        scene.set_local_transform(root, translation(1.0, 0.0, 0.0)).unwrap();
        let child = scene.add_child_entity(root, "child").unwrap();
        scene.set_local_transform(child, uniform_scale(2.0)).unwrap();

        let world = scene.world_transform(child).unwrap();
        let moved = world.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(moved, Point3::new(3.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_cached_matches_uncached_at_every_depth() {
        let mut scene = Scene::new();
        let mut parent = scene.add_entity("depth0");
        let mut chain = vec![parent];
        for depth in 1..6 {
            let child = scene.add_child_entity(parent, format!("depth{depth}")).unwrap();
            let angle = depth as f32 * 0.3;
            scene
                .set_local_transform(
                    child,
                    Transform {
                        position: Vec3::new(depth as f32, 0.5, -1.0),
                        rotation: Quat::from_euler_angles(angle, -angle, 0.1),
                        scale: Vec3::new(1.1, 0.9, 1.0),
                    },
                )
                .unwrap();
            chain.push(child);
            parent = child;
        }

        // Read leaf first so the whole chain is memoized in one walk
        for &entity in chain.iter().rev() {
            let cached = scene.world_transform(entity).unwrap();
            let naive = scene.world_transform_uncached(entity).unwrap();
            assert_relative_eq!(cached, naive, epsilon = 1e-5);
        }
        assert!(chain.iter().all(|&e| scene.is_world_cached(e)));
    }

    #[test]
    fn test_leaf_read_memoizes_ancestors() {
        let mut scene = Scene::new();
        let root = scene.add_entity("root");
        let mid = scene.add_child_entity(root, "mid").unwrap();
        let leaf = scene.add_child_entity(mid, "leaf").unwrap();

        scene.world_transform(leaf).unwrap();
        assert!(scene.is_world_cached(root));
        assert!(scene.is_world_cached(mid));
        assert!(scene.is_world_cached(leaf));
    }

    #[test]
    fn test_ancestor_change_invalidates_whole_subtree() {
        let mut scene = Scene::new();
        let root = scene.add_entity("root");
        let mid = scene.add_child_entity(root, "mid").unwrap();
        let leaf = scene.add_child_entity(mid, "leaf").unwrap();
        let sibling = scene.add_entity("sibling");
        scene.set_local_transform(leaf, translation(0.0, 1.0, 0.0)).unwrap();

        let before = scene.world_transform(leaf).unwrap();
        scene.world_transform(sibling).unwrap();

        scene.set_local_transform(root, translation(5.0, 0.0, 0.0)).unwrap();
        assert!(!scene.is_world_cached(mid));
        assert!(!scene.is_world_cached(leaf));
        assert!(scene.is_world_cached(sibling));

        let after = scene.world_transform(leaf).unwrap();
        assert_relative_eq!(after[(0, 3)], before[(0, 3)] + 5.0, epsilon = 1e-6);
        assert_relative_eq!(after, scene.world_transform_uncached(leaf).unwrap());
    }

    #[test]
    fn test_update_transform_invalidates_descendants() {
        let mut scene = Scene::new();
        let root = scene.add_entity("root");
        let child = scene.add_child_entity(root, "child").unwrap();
        scene.world_transform(child).unwrap();

        scene
            .update_transform(root, |t| t.scale = Vec3::new(3.0, 3.0, 3.0))
            .unwrap();
        scene.set_local_transform(child, translation(1.0, 0.0, 0.0)).unwrap();

        let world = scene.world_transform(child).unwrap();
        assert_relative_eq!(world[(0, 3)], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_repeated_reads_are_bit_identical() {
        let mut scene = Scene::new();
        let root = scene.add_entity("root");
        scene
            .set_local_transform(
                root,
                Transform {
                    position: Vec3::new(0.1, 0.2, 0.3),
                    rotation: Quat::from_euler_angles(0.4, 0.5, 0.6),
                    scale: Vec3::new(1.7, 1.7, 1.7),
                },
            )
            .unwrap();
        let child = scene.add_child_entity(root, "child").unwrap();

        let first = scene.world_transform(child).unwrap();
        let second = scene.world_transform(child).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reparent_to_descendant_is_rejected_and_graph_unchanged() {
        let mut scene = Scene::new();
        let a = scene.add_entity("a");
        let b = scene.add_child_entity(a, "b").unwrap();
        let c = scene.add_child_entity(b, "c").unwrap();

        let result = scene.try_set_parent(a, Some(c));
        assert!(matches!(result, Err(SceneError::CycleDetected { .. })));

        assert_eq!(scene.parent(a), None);
        assert_eq!(scene.parent(b), Some(a));
        assert_eq!(scene.parent(c), Some(b));
        assert_eq!(scene.children(a).collect::<Vec<_>>(), vec![b]);
        assert_eq!(scene.children(c).count(), 0);
    }

    #[test]
    fn test_self_parent_is_rejected() {
        let mut scene = Scene::new();
        let a = scene.add_entity("a");
        assert!(matches!(
            scene.try_set_parent(a, Some(a)),
            Err(SceneError::SelfParent(_))
        ));
    }

    #[test]
    #[should_panic(expected = "invalid scene hierarchy change")]
    fn test_set_parent_cycle_panics() {
        let mut scene = Scene::new();
        let a = scene.add_entity("a");
        let b = scene.add_child_entity(a, "b").unwrap();
        scene.set_parent(a, Some(b));
    }

    #[test]
    fn test_reparent_moves_child_and_invalidates() {
        let mut scene = Scene::new();
        let left = scene.add_entity("left");
        let right = scene.add_entity("right");
        scene.set_local_transform(right, translation(0.0, 0.0, 4.0)).unwrap();
        let child = scene.add_child_entity(left, "child").unwrap();
        scene.world_transform(child).unwrap();

        scene.set_parent(child, Some(right));
        assert_eq!(scene.children(left).count(), 0);
        assert_eq!(scene.children(right).collect::<Vec<_>>(), vec![child]);
        assert!(scene.is_ancestor(right, child));
        assert!(!scene.is_ancestor(left, child));

        let world = scene.world_transform(child).unwrap();
        assert_relative_eq!(world[(2, 3)], 4.0);

        scene.set_parent(child, None);
        assert_eq!(scene.parent(child), None);
        assert_relative_eq!(scene.world_transform(child).unwrap(), Mat4::identity());
    }

    #[test]
    fn test_foreign_entity_is_unknown() {
        let mut first = Scene::new();
        let mut second = Scene::new();
        let foreign = first.add_entity("foreign");
        second.add_entity("local");

        assert!(matches!(
            second.world_transform(foreign),
            Err(SceneError::UnknownEntity(_))
        ));
        assert!(second.add_child_entity(foreign, "orphan").is_err());
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut scene = Scene::new();
        let old = scene.add_entity("old");
        scene.clear();
        assert!(scene.is_empty());
        assert!(!scene.contains(old));

        let fresh = scene.add_entity("fresh");
        assert_ne!(old, fresh);
        assert!(scene.get_component::<Name>(old).is_none());
        assert_eq!(scene.name(fresh), Some("fresh"));
    }

    #[test]
    fn test_entities_keep_insertion_order() {
        let mut scene = Scene::new();
        let a = scene.add_entity("a");
        let b = scene.add_child_entity(a, "b").unwrap();
        let c = scene.add_entity("c");

        assert_eq!(scene.entities().collect::<Vec<_>>(), vec![a, b, c]);
        assert_eq!(scene.len(), 3);
    }

    #[test]
    fn test_entity_mut_wrapper() {
        let mut scene = Scene::new();
        let root = scene.add_entity("root");
        let child = {
            let mut view = scene.entity_mut(root).unwrap();
            view.add_component(translation(2.0, 0.0, 0.0));
            view.add_child_entity("child").unwrap()
        };

        assert_eq!(scene.parent(child), Some(root));
        let world = scene.entity_mut(child).unwrap().world_transform().unwrap();
        assert_relative_eq!(world[(0, 3)], 2.0);
    }

    #[test]
    fn test_name_is_freely_mutable() {
        let mut scene = Scene::new();
        let e = scene.add_entity("before");
        scene.world_transform(e).unwrap();

        if let Some(name) = scene.get_component_mut::<Name>(e) {
            name.0 = "after".to_string();
        }
        assert_eq!(scene.name(e), Some("after"));
        assert!(scene.is_world_cached(e));
    }

    #[test]
    fn test_remove_transform_invalidates() {
        let mut scene = Scene::new();
        let e = scene.add_entity("e");
        scene.set_local_transform(e, translation(1.0, 2.0, 3.0)).unwrap();
        scene.world_transform(e).unwrap();

        let removed = scene.remove_component::<TransformComponent>(e).unwrap();
        assert!(removed.is_some());
        assert!(!scene.is_world_cached(e));
        assert_relative_eq!(scene.world_transform(e).unwrap(), Mat4::identity());
    }
}
