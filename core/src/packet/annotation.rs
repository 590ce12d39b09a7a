//! Per-packet annotations.
//!
//! An annotation is a typed side-channel value carried with a packet but never serialized into
//! its bytes (a receive timestamp, an interface index, a routing decision). Any `Default + Clone
//! + Debug` type can serve as one. Each annotation type is assigned a process-wide slot index the
//! first time it is used; every packet keeps a slot array indexed by it and default-constructs a
//! value on first access.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Mutex, PoisonError};

use dyn_clone::DynClone;

/// Marker for types usable as packet annotations.
pub trait Annotation: Any + Default + Clone + fmt::Debug {}

impl<T: Any + Default + Clone + fmt::Debug> Annotation for T {}

#[derive(Default)]
struct AnnotationIndex {
    by_type: HashMap<TypeId, usize>,
    names: Vec<&'static str>,
}

lazy_static! {
    static ref ANNOTATION_INDEX: Mutex<AnnotationIndex> = Mutex::new(AnnotationIndex::default());
}

/// Returns the slot index assigned to annotation type `A`, assigning the next free one on first
/// use.
pub fn annotation_index<A: Annotation>() -> usize {
    let mut registry = ANNOTATION_INDEX
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let next = registry.names.len();
    let index = *registry.by_type.entry(TypeId::of::<A>()).or_insert(next);
    if index == next {
        registry.names.push(std::any::type_name::<A>());
        log::debug!(
            "Assigned annotation slot {} to {}",
            index,
            std::any::type_name::<A>()
        );
    }
    index
}

trait AnnotationValue: DynClone + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

dyn_clone::clone_trait_object!(AnnotationValue);

impl<A: Annotation> AnnotationValue for A {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<A>()
    }
}

/// Annotation slot array of one packet.
#[derive(Clone, Default)]
pub(crate) struct AnnotationSlots {
    slots: Vec<Option<Box<dyn AnnotationValue>>>,
}

impl AnnotationSlots {
    /// Returns the annotation of type `A`, default-constructing it on first access.
    pub(crate) fn get_mut<A: Annotation>(&mut self) -> &mut A {
        let index = annotation_index::<A>();
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        let value = self.slots[index].get_or_insert_with(|| Box::new(A::default()));
        match value.as_any_mut().downcast_mut::<A>() {
            Some(annotation) => annotation,
            None => unreachable!("annotation slot {} holds a foreign type", index),
        }
    }

    /// Returns the annotation of type `A` if it has been accessed before.
    #[cfg(test)]
    pub(crate) fn get<A: Annotation>(&self) -> Option<&A> {
        let index = annotation_index::<A>();
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .and_then(|value| value.as_any().downcast_ref::<A>())
    }

    /// Drops every annotation. The next access of any type yields its default.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of annotations that have been materialized.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Writes every materialized annotation, one per line, in slot order.
    pub(crate) fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        if self.len() == 0 {
            return Ok(());
        }
        writeln!(w, "Annotations:")?;
        for value in self.slots.iter().flatten() {
            writeln!(w, "  {}: {:?}", value.type_name(), value)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AnnotationSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter().flatten()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Timestamp(u64);

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Route {
        hops: Vec<String>,
    }

    #[test]
    fn test_annotation_index_stable() {
        let a = annotation_index::<Timestamp>();
        let b = annotation_index::<Route>();
        assert_ne!(a, b);
        assert_eq!(annotation_index::<Timestamp>(), a);
        assert_eq!(annotation_index::<Route>(), b);
    }

    #[test]
    fn test_slots_default_on_first_access() {
        let mut slots = AnnotationSlots::default();
        assert!(slots.get::<Timestamp>().is_none());
        assert_eq!(*slots.get_mut::<Timestamp>(), Timestamp(0));
        slots.get_mut::<Timestamp>().0 = 42;
        slots.get_mut::<Route>().hops.push("r1".to_owned());
        assert_eq!(slots.get::<Timestamp>(), Some(&Timestamp(42)));
        assert_eq!(slots.len(), 2);

        let copy = slots.clone();
        slots.get_mut::<Route>().hops.clear();
        assert_eq!(copy.get::<Route>().map(|r| r.hops.len()), Some(1));

        slots.clear();
        assert_eq!(slots.len(), 0);
        assert!(slots.get::<Timestamp>().is_none());
        assert_eq!(copy.get::<Timestamp>(), Some(&Timestamp(42)));
    }

    #[test]
    fn test_slots_dump() {
        let mut slots = AnnotationSlots::default();
        let mut out = Vec::new();
        slots.dump(&mut out).unwrap();
        assert!(out.is_empty());
        slots.get_mut::<Timestamp>().0 = 7;
        slots.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Annotations:\n"));
        assert!(text.contains("Timestamp(7)"));
    }
}
