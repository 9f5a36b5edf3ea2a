use crate::barrier::Transition;
use crate::desc::{MemoryRequirements, ResourceDesc};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Backend that owns the physical memory the graph aliases into.
pub trait PhysicalResourceProvider {
    type Region;
    type View;

    fn memory_requirements(&self, desc: &ResourceDesc) -> MemoryRequirements {
        desc.memory_requirements()
    }

    fn allocate(
        &mut self,
        requirements: &MemoryRequirements,
        desc: &ResourceDesc,
    ) -> Result<Self::Region, ProviderError>;

    fn free(&mut self, region: Self::Region);

    fn create_view(
        &mut self,
        region: &Self::Region,
        desc: &ResourceDesc,
    ) -> Result<Self::View, ProviderError>;
}

pub struct ResolvedTransition<'a, V> {
    pub transition: &'a Transition,
    pub view: &'a V,
}

pub trait CommandRecorder<P: PhysicalResourceProvider> {
    fn transition(&mut self, transitions: &[ResolvedTransition<'_, P::View>]);
}

impl<P: PhysicalResourceProvider> CommandRecorder<P> for () {
    fn transition(&mut self, _transitions: &[ResolvedTransition<'_, P::View>]) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualRegion {
    pub id: u64,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualView {
    pub region: u64,
    pub offset: u64,
    pub size: u64,
    pub label: Option<String>,
}

/// Bookkeeping-only heap: hands out offsets in a linear address space and
/// enforces an optional capacity. Used headless and in tests.
#[derive(Debug, Default)]
pub struct VirtualHeap {
    capacity: Option<u64>,
    next_id: u64,
    next_offset: u64,
    live: HashMap<u64, u64>,
    live_bytes: u64,
    peak_bytes: u64,
    allocations: usize,
    frees: usize,
    fail_views: bool,
}

impl VirtualHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn set_fail_view_creation(&mut self, fail: bool) {
        self.fail_views = fail;
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }

    pub fn live_regions(&self) -> usize {
        self.live.len()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn free_count(&self) -> usize {
        self.frees
    }
}

impl PhysicalResourceProvider for VirtualHeap {
    type Region = VirtualRegion;
    type View = VirtualView;

    fn allocate(
        &mut self,
        requirements: &MemoryRequirements,
        _desc: &ResourceDesc,
    ) -> Result<VirtualRegion, ProviderError> {
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(self.live_bytes);
            if requirements.size > available {
                return Err(ProviderError::OutOfMemory {
                    requested: requirements.size,
                    available,
                });
            }
        }

        let offset = self.next_offset.next_multiple_of(requirements.alignment.max(1));
        let region = VirtualRegion {
            id: self.next_id,
            offset,
            size: requirements.size,
        };

        self.next_id += 1;
        self.next_offset = offset + requirements.size;
        self.live.insert(region.id, region.size);
        self.live_bytes += region.size;
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);
        self.allocations += 1;
        Ok(region)
    }

    fn free(&mut self, region: VirtualRegion) {
        if let Some(size) = self.live.remove(&region.id) {
            self.live_bytes -= size;
            self.frees += 1;
        }
    }

    fn create_view(
        &mut self,
        region: &VirtualRegion,
        desc: &ResourceDesc,
    ) -> Result<VirtualView, ProviderError> {
        if self.fail_views {
            return Err(ProviderError::Backend("view creation disabled".to_string()));
        }

        Ok(VirtualView {
            region: region.id,
            offset: region.offset,
            size: desc.memory_requirements().size,
            label: desc.label().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::BufferDesc;

    fn buffer(size: u64) -> ResourceDesc {
        ResourceDesc::Buffer(BufferDesc::new(size))
    }

    #[test]
    fn tracks_live_and_peak_bytes() {
        let mut heap = VirtualHeap::new();
        let desc = buffer(1024);
        let requirements = desc.memory_requirements();

        let a = heap.allocate(&requirements, &desc).unwrap();
        let b = heap.allocate(&requirements, &desc).unwrap();
        assert_eq!(heap.live_bytes(), 2048);
        assert_ne!(a.offset, b.offset);

        heap.free(a);
        assert_eq!(heap.live_bytes(), 1024);
        assert_eq!(heap.peak_bytes(), 2048);
        assert_eq!(heap.live_regions(), 1);
        assert_eq!(heap.free_count(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut heap = VirtualHeap::with_capacity(1024);
        let desc = buffer(768);
        let requirements = desc.memory_requirements();

        heap.allocate(&requirements, &desc).unwrap();
        let error = heap.allocate(&requirements, &desc).unwrap_err();
        assert_eq!(
            error,
            ProviderError::OutOfMemory {
                requested: 768,
                available: 256,
            }
        );
    }

    #[test]
    fn views_carry_the_label() {
        let mut heap = VirtualHeap::new();
        let desc = ResourceDesc::Buffer(BufferDesc::new(64).label("histogram"));
        let region = heap.allocate(&desc.memory_requirements(), &desc).unwrap();
        let view = heap.create_view(&region, &desc).unwrap();
        assert_eq!(view.region, region.id);
        assert_eq!(view.label.as_deref(), Some("histogram"));

        heap.set_fail_view_creation(true);
        assert!(heap.create_view(&region, &desc).is_err());
    }
}
