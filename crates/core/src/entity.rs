//! Entity trait: identity + continuity across state changes.

use crate::id::Id;
use crate::reference::Ref;

/// Anything addressable by an [`Id`].
pub trait Entity {
    /// Returns the entity identifier.
    fn id(&self) -> Id;

    /// A typed reference to this entity.
    fn reference(&self) -> Ref<Self>
    where
        Self: Sized,
    {
        Ref::new(self.id())
    }
}
