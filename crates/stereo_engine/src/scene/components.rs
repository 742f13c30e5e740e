//! Component tables
//!
//! Components live in fixed struct-of-arrays storage: one `SecondaryMap`
//! per component type, keyed by [`EntityKey`]. The [`Component`] trait maps a
//! type to its table at compile time, so no runtime type lookup is involved.

use slotmap::SecondaryMap;

use super::entity::EntityKey;
use crate::foundation::math::Transform;
use crate::render::assets::RenderPayload;

/// Local transform of an entity relative to its parent
pub type TransformComponent = Transform;

/// Human readable entity name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name(pub String);

impl Name {
    /// Borrow the name text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Storage for every component type the scene knows about
#[derive(Default)]
pub struct ComponentTables {
    pub(super) names: SecondaryMap<EntityKey, Name>,
    pub(super) transforms: SecondaryMap<EntityKey, TransformComponent>,
    pub(super) payloads: SecondaryMap<EntityKey, RenderPayload>,
}

impl ComponentTables {
    pub(super) fn clear(&mut self) {
        self.names.clear();
        self.transforms.clear();
        self.payloads.clear();
    }
}

/// Marker trait for components
///
/// Implemented only for the fixed set of component types the scene stores.
pub trait Component: Sized + 'static {
    /// Whether changing this component changes world transforms
    const AFFECTS_WORLD_TRANSFORM: bool;

    /// The table holding this component type
    fn table(tables: &ComponentTables) -> &SecondaryMap<EntityKey, Self>;

    /// Mutable access to the table holding this component type
    fn table_mut(tables: &mut ComponentTables) -> &mut SecondaryMap<EntityKey, Self>;
}

/// Components that may be mutated in place without touching the transform cache
pub trait FreelyMutable: Component {}

impl Component for Name {
    const AFFECTS_WORLD_TRANSFORM: bool = false;

    fn table(tables: &ComponentTables) -> &SecondaryMap<EntityKey, Self> {
        &tables.names
    }

    fn table_mut(tables: &mut ComponentTables) -> &mut SecondaryMap<EntityKey, Self> {
        &mut tables.names
    }
}

impl FreelyMutable for Name {}

impl Component for TransformComponent {
    const AFFECTS_WORLD_TRANSFORM: bool = true;

    fn table(tables: &ComponentTables) -> &SecondaryMap<EntityKey, Self> {
        &tables.transforms
    }

    fn table_mut(tables: &mut ComponentTables) -> &mut SecondaryMap<EntityKey, Self> {
        &mut tables.transforms
    }
}

impl Component for RenderPayload {
    const AFFECTS_WORLD_TRANSFORM: bool = false;

    fn table(tables: &ComponentTables) -> &SecondaryMap<EntityKey, Self> {
        &tables.payloads
    }

    fn table_mut(tables: &mut ComponentTables) -> &mut SecondaryMap<EntityKey, Self> {
        &mut tables.payloads
    }
}

impl FreelyMutable for RenderPayload {}
