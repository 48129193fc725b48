//! Typed attribute containers attached to operators, stages, ports and plans.
//!
//! Holds at most one value per Rust type. Values are absent until attached.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;

pub trait Attribute: Any + fmt::Debug {
    fn clone_box(&self) -> Box<dyn Attribute>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any + fmt::Debug + Clone> Attribute for T {
    fn clone_box(&self) -> Box<dyn Attribute> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Clone for Box<dyn Attribute> {
    fn clone(&self) -> Self {
        // deref twice: `Box<dyn Attribute>` itself satisfies the blanket impl
        (**self).clone_box()
    }
}

#[derive(Clone, Default)]
pub struct AttributeMap {
    entries: BTreeMap<TypeId, Box<dyn Attribute>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `value`, returning the previous value of the same type.
    pub fn insert<T: Attribute + Clone>(&mut self, value: T) -> Option<T> {
        self.entries
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.into_any().downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: Attribute>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|b| (**b).as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Attribute>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| (**b).as_any_mut().downcast_mut::<T>())
    }

    pub fn remove<T: Attribute>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.into_any().downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn contains<T: Attribute>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);

    #[derive(Debug, Clone, PartialEq)]
    struct Weight(u32);

    #[test]
    fn one_value_per_type() {
        let mut attrs = AttributeMap::new();
        assert!(attrs.get::<Label>().is_none());
        assert_eq!(attrs.insert(Label("a".into())), None);
        assert_eq!(attrs.insert(Label("b".into())), Some(Label("a".into())));
        attrs.insert(Weight(3));
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get::<Label>(), Some(&Label("b".into())));
        assert_eq!(attrs.remove::<Weight>(), Some(Weight(3)));
        assert!(!attrs.contains::<Weight>());
    }

    #[test]
    fn clones_are_deep() {
        let mut attrs = AttributeMap::new();
        attrs.insert(Weight(1));
        let mut copy = attrs.clone();
        if let Some(w) = copy.get_mut::<Weight>() {
            w.0 = 9;
        }
        assert_eq!(attrs.get::<Weight>(), Some(&Weight(1)));
        assert_eq!(copy.get::<Weight>(), Some(&Weight(9)));
    }
}
