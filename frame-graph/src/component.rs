use crate::{RenderGraphError, Result};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

struct ComponentEntry {
    value: Box<dyn Any>,
    type_name: &'static str,
}

/// Typed singletons shared between the passes of one build.
#[derive(Default)]
pub struct ComponentStore {
    components: HashMap<TypeId, ComponentEntry>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<T: 'static>(&mut self, value: T) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if self.components.contains_key(&type_id) {
            return Err(RenderGraphError::DuplicateComponent {
                component: type_name::<T>(),
            });
        }

        self.components.insert(
            type_id,
            ComponentEntry {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
        Ok(())
    }

    pub fn get<T: 'static>(&self) -> Result<&T> {
        self.components
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<T>())
            .ok_or(RenderGraphError::MissingComponent {
                component: type_name::<T>(),
            })
    }

    pub fn get_mut<T: 'static>(&mut self) -> Result<&mut T> {
        self.components
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_mut::<T>())
            .ok_or(RenderGraphError::MissingComponent {
                component: type_name::<T>(),
            })
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.components.values().map(|entry| entry.type_name)
    }

    pub fn clear(&mut self) {
        self.components.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Exposure(f32);

    struct FrameIndex(u64);

    #[test]
    fn create_and_read() {
        let mut store = ComponentStore::new();
        store.create(Exposure(1.5)).unwrap();
        store.create(FrameIndex(7)).unwrap();

        assert_eq!(store.get::<Exposure>().unwrap(), &Exposure(1.5));
        assert_eq!(store.get::<FrameIndex>().unwrap().0, 7);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn second_instance_is_rejected() {
        let mut store = ComponentStore::new();
        store.create(Exposure(1.0)).unwrap();

        let error = store.create(Exposure(2.0)).unwrap_err();
        assert!(matches!(error, RenderGraphError::DuplicateComponent { .. }));
        assert_eq!(store.get::<Exposure>().unwrap().0, 1.0);
    }

    #[test]
    fn missing_component_fails_fast() {
        let store = ComponentStore::new();
        match store.get::<Exposure>() {
            Err(RenderGraphError::MissingComponent { component }) => {
                assert!(component.ends_with("Exposure"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mutate_in_place() {
        let mut store = ComponentStore::new();
        store.create(FrameIndex(1)).unwrap();
        store.get_mut::<FrameIndex>().unwrap().0 += 1;
        assert_eq!(store.get::<FrameIndex>().unwrap().0, 2);

        store.clear();
        assert!(!store.contains::<FrameIndex>());
    }
}
