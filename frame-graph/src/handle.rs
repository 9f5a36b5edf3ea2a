use crate::desc::ResourceDesc;
use crate::state::ResourceState;
use crate::{RenderGraphError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

/// Build-scoped reference to a virtual resource. Lookups compare the
/// generation, so a handle kept from an earlier build is a `StaleHandle`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    index: u32,
    generation: u16,
    kind: ResourceKind,
}

impl ResourceHandle {
    pub(crate) fn new(index: u32, generation: u16, kind: ResourceKind) -> Self {
        Self {
            index,
            generation,
            kind,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::Texture => write!(f, "Texture({}.g{})", self.index, self.generation),
            ResourceKind::Buffer => write!(f, "Buffer({}.g{})", self.index, self.generation),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOrigin {
    Transient { creator: usize },
    Imported,
}

#[derive(Debug, Clone)]
pub struct VirtualResource {
    pub name: String,
    pub desc: ResourceDesc,
    pub initial_state: ResourceState,
    pub origin: ResourceOrigin,
}

impl VirtualResource {
    pub fn is_imported(&self) -> bool {
        self.origin == ResourceOrigin::Imported
    }

    pub fn has_defined_contents(&self) -> bool {
        self.is_imported() || self.desc.clear_value().is_some()
    }
}

pub struct HandleTable {
    generation: u16,
    slots: Vec<VirtualResource>,
}

impl HandleTable {
    pub fn new(generation: u16) -> Self {
        Self {
            generation,
            slots: Vec::new(),
        }
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }

    pub fn create(&mut self, resource: VirtualResource) -> ResourceHandle {
        let kind = resource.desc.kind();
        let index = self.slots.len() as u32;
        self.slots.push(resource);
        ResourceHandle::new(index, self.generation, kind)
    }

    pub fn get(&self, handle: ResourceHandle) -> Result<&VirtualResource> {
        self.check(handle)?;
        Ok(&self.slots[handle.index as usize])
    }

    pub fn get_mut(&mut self, handle: ResourceHandle) -> Result<&mut VirtualResource> {
        self.check(handle)?;
        Ok(&mut self.slots[handle.index as usize])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.slots.iter().enumerate().map(|(index, resource)| {
            ResourceHandle::new(index as u32, self.generation, resource.desc.kind())
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceHandle, &VirtualResource)> + '_ {
        self.handles().zip(self.slots.iter())
    }

    pub fn reset(&mut self, generation: u16) {
        self.slots.clear();
        self.generation = generation;
    }

    fn check(&self, handle: ResourceHandle) -> Result<()> {
        let live = handle.generation == self.generation
            && self
                .slots
                .get(handle.index as usize)
                .is_some_and(|slot| slot.desc.kind() == handle.kind);

        if live {
            Ok(())
        } else {
            Err(RenderGraphError::StaleHandle {
                handle,
                current_generation: self.generation,
            })
        }
    }
}
