//! Scene management
//!
//! A forest of entities with fixed component tables and cached world
//! transforms.

pub mod components;
pub mod entity;
pub mod graph;

pub use components::{Component, FreelyMutable, Name, TransformComponent};
pub use entity::{Entity, EntityKey, EntityMut, SceneId};
pub use graph::Scene;

/// Scene hierarchy errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The link would make an entity its own ancestor
    #[error("Parenting {child:?} under {parent:?} would create a cycle")]
    CycleDetected {
        /// Entity being reparented
        child: Entity,
        /// Requested parent
        parent: Entity,
    },

    /// Handle is stale or belongs to another scene
    #[error("Unknown entity: {0:?}")]
    UnknownEntity(Entity),

    /// An entity cannot parent itself
    #[error("Entity {0:?} cannot be its own parent")]
    SelfParent(Entity),
}
