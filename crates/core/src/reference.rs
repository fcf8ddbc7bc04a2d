//! Typed references to entities by identifier.
//!
//! A [`Ref<T>`] carries nothing but an [`Id`] and a compile-time target type.
//! Equality and hashing look at the identifier only, so a `Ref<dyn Shape>`
//! and a `Ref<Circle>` naming the same entity compare equal.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::id::Id;

/// Compile-time "`Self` may be viewed as `T`" relation used by [`Ref::cast`].
///
/// Every type is viewable as itself. Implement it for concrete types that
/// stand behind an interface:
///
/// ```ignore
/// impl Upcast<dyn Shape> for Circle {}
/// let shape: Ref<dyn Shape> = circle_ref.cast();
/// ```
pub trait Upcast<T: ?Sized> {}

impl<T: ?Sized> Upcast<T> for T {}

/// Pointer-by-identifier to an entity of type `T`.
pub struct Ref<T: ?Sized> {
    id: Id,
    // `fn() -> T` keeps `Ref` Send + Sync + Copy regardless of `T`.
    _target: PhantomData<fn() -> T>,
}

impl<T: ?Sized> Ref<T> {
    pub const fn new(id: Id) -> Self {
        Self {
            id,
            _target: PhantomData,
        }
    }

    pub const fn id(&self) -> Id {
        self.id
    }

    /// Re-wrap as a reference to a type `T` can be viewed as.
    pub fn cast<U: ?Sized>(self) -> Ref<U>
    where
        T: Upcast<U>,
    {
        Ref::new(self.id)
    }

    /// Re-wrap as a reference to an arbitrary type.
    ///
    /// Nothing is checked: the caller asserts that the entity really is a `U`.
    pub fn cast_unchecked<U: ?Sized>(self) -> Ref<U> {
        Ref::new(self.id)
    }
}

impl<T: ?Sized> Clone for Ref<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Ref<T> {}

impl<T: ?Sized, U: ?Sized> PartialEq<Ref<U>> for Ref<T> {
    fn eq(&self, other: &Ref<U>) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for Ref<T> {}

impl<T: ?Sized> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ?Sized> PartialOrd for Ref<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for Ref<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T: ?Sized> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref<{}>({})", core::any::type_name::<T>(), self.id)
    }
}

impl<T: ?Sized> fmt::Display for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

impl<T: ?Sized> From<Id> for Ref<T> {
    fn from(id: Id) -> Self {
        Ref::new(id)
    }
}

impl<T: ?Sized> From<Ref<T>> for Id {
    fn from(value: Ref<T>) -> Self {
        value.id
    }
}

impl<T: ?Sized> Serialize for Ref<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, T: ?Sized> Deserialize<'de> for Ref<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Id::deserialize(deserializer).map(Ref::new)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    trait Shape {}

    struct Circle;

    impl Shape for Circle {}
    impl Upcast<dyn Shape> for Circle {}

    #[test]
    fn equality_ignores_target_type() {
        let id = Id::new();
        let circle: Ref<Circle> = Ref::new(id);
        let shape: Ref<dyn Shape> = circle.cast();

        assert_eq!(circle, shape);
        assert_eq!(shape, circle);
        assert_ne!(circle, Ref::<Circle>::new(Id::new()));
    }

    #[test]
    fn hash_matches_across_views() {
        let id = Id::new();
        let mut set: HashSet<Ref<dyn Shape>> = HashSet::new();
        set.insert(Ref::<Circle>::new(id).cast());
        assert!(set.contains(&Ref::<Circle>::new(id).cast::<dyn Shape>()));
    }

    #[test]
    fn optional_reference_models_absence() {
        let missing: Option<Ref<Circle>> = None;
        assert!(missing.is_none());
        let some = Some(Ref::<Circle>::new(Id::new()));
        assert!(some.map(|r| r.cast::<dyn Shape>()).is_some());
    }

    #[test]
    fn serializes_as_bare_identifier() {
        let id = Id::from_u128(7);
        let r: Ref<Circle> = Ref::new(id);
        assert_eq!(serde_json::to_value(r).unwrap(), serde_json::to_value(id).unwrap());
        let back: Ref<dyn Shape> = serde_json::from_value(serde_json::to_value(r).unwrap()).unwrap();
        assert_eq!(back, r);
    }
}
