use crate::analyzer::ResourceTimeline;
use crate::desc::{MemoryRequirements, OutputExtent, ResourceDesc};
use crate::handle::{HandleTable, ResourceHandle};
use crate::provider::PhysicalResourceProvider;
use crate::{RenderGraphError, Result};

pub struct MemoryBlock<R> {
    region: R,
    requirements: MemoryRequirements,
    desc: ResourceDesc,
    idle_builds: u32,
}

impl<R> MemoryBlock<R> {
    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn requirements(&self) -> &MemoryRequirements {
        &self.requirements
    }

    fn accepts(&self, requirements: &MemoryRequirements, desc: &ResourceDesc) -> bool {
        self.requirements.satisfies(requirements) && self.desc.usage_covers(desc)
    }
}

/// State retained between graph builds: the provider, the free list of
/// blocks from earlier frames and the primary output extent.
pub struct GraphMemory<P: PhysicalResourceProvider> {
    provider: P,
    free_list: Vec<MemoryBlock<P::Region>>,
    build_serial: u16,
    primary_output: OutputExtent,
    pending_resize: bool,
}

impl<P: PhysicalResourceProvider> GraphMemory<P> {
    pub fn new(provider: P, primary_output: OutputExtent) -> Self {
        Self {
            provider,
            free_list: Vec::new(),
            build_serial: 0,
            primary_output,
            pending_resize: false,
        }
    }

    /// Records a new primary output resolution; the next build picks it up.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        let extent = OutputExtent::new(width.max(1), height.max(1));
        if extent != self.primary_output {
            self.primary_output = extent;
            self.pending_resize = true;
        }
    }

    pub fn primary_output(&self) -> OutputExtent {
        self.primary_output
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn retained_blocks(&self) -> usize {
        self.free_list.len()
    }

    pub fn retained_bytes(&self) -> u64 {
        self.free_list
            .iter()
            .map(|block| block.requirements.size)
            .sum()
    }

    pub fn release_all(&mut self) {
        for block in self.free_list.drain(..) {
            self.provider.free(block.region);
        }
    }

    pub(crate) fn begin_build(&mut self) -> (u16, OutputExtent) {
        self.build_serial = self.build_serial.wrapping_add(1);
        if std::mem::take(&mut self.pending_resize) {
            log::info!(
                "Primary output resized to {}x{}",
                self.primary_output.width,
                self.primary_output.height
            );
        }
        (self.build_serial, self.primary_output)
    }

    pub(crate) fn take_free_list(&mut self) -> Vec<MemoryBlock<P::Region>> {
        std::mem::take(&mut self.free_list)
    }

    pub(crate) fn reclaim(
        &mut self,
        blocks: Vec<PoolBlock<P::Region>>,
        retain: bool,
        max_idle_builds: u32,
    ) {
        for pool_block in blocks {
            let mut block = pool_block.block;
            block.idle_builds = if pool_block.used {
                0
            } else {
                block.idle_builds + 1
            };

            if retain && block.idle_builds <= max_idle_builds {
                self.free_list.push(block);
            } else {
                log::trace!(
                    "Freeing {} byte block idle for {} builds",
                    block.requirements.size,
                    block.idle_builds
                );
                self.provider.free(block.region);
            }
        }
    }
}

pub(crate) struct PoolBlock<R> {
    block: MemoryBlock<R>,
    busy_until: Option<usize>,
    used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub handle: ResourceHandle,
    pub block: usize,
    pub first_use: usize,
    pub last_use: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Sum of the requirements of every transient resource.
    pub virtual_bytes: u64,
    /// Sum of the blocks actually used this build.
    pub physical_bytes: u64,
    pub blocks_used: usize,
    pub new_allocations: usize,
    pub reused_from_previous_builds: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasingPlan {
    pub assignments: Vec<Assignment>,
    pub stats: MemoryStats,
}

impl AliasingPlan {
    pub fn block_of(&self, handle: ResourceHandle) -> Option<usize> {
        self.assignments
            .iter()
            .find(|assignment| assignment.handle == handle)
            .map(|assignment| assignment.block)
    }
}

pub struct AliasingAllocator<R> {
    blocks: Vec<PoolBlock<R>>,
    retained_count: usize,
}

impl<R> AliasingAllocator<R> {
    pub fn new(retained: Vec<MemoryBlock<R>>) -> Self {
        let retained_count = retained.len();
        let blocks = retained
            .into_iter()
            .map(|block| PoolBlock {
                block,
                busy_until: None,
                used: false,
            })
            .collect();
        Self {
            blocks,
            retained_count,
        }
    }

    pub fn block(&self, index: usize) -> Option<&MemoryBlock<R>> {
        self.blocks.get(index).map(|pool_block| &pool_block.block)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn into_blocks(self) -> Vec<PoolBlock<R>> {
        self.blocks
    }

    pub fn allocate<P>(
        &mut self,
        provider: &mut P,
        resources: &HandleTable,
        timelines: &[ResourceTimeline],
    ) -> Result<AliasingPlan>
    where
        P: PhysicalResourceProvider<Region = R>,
    {
        let mut order = Vec::with_capacity(timelines.len());
        for timeline in timelines {
            if !resources.get(timeline.handle)?.is_imported() {
                order.push(timeline);
            }
        }
        order.sort_by_key(|timeline| (timeline.first_use, timeline.handle.index()));

        let mut plan = AliasingPlan::default();

        for timeline in order {
            let resource = resources.get(timeline.handle)?;
            let requirements = provider.memory_requirements(&resource.desc);
            plan.stats.virtual_bytes += requirements.size;

            let reusable = self
                .blocks
                .iter()
                .enumerate()
                .filter(|(_, pool_block)| {
                    pool_block
                        .busy_until
                        .is_none_or(|last_use| last_use < timeline.first_use)
                })
                .filter(|(_, pool_block)| pool_block.block.accepts(&requirements, &resource.desc))
                .min_by_key(|(index, pool_block)| (pool_block.block.requirements.size, *index))
                .map(|(index, _)| index);

            let block = match reusable {
                Some(index) => index,
                None => {
                    let region = provider
                        .allocate(&requirements, &resource.desc)
                        .map_err(|source| RenderGraphError::OutOfGraphMemory {
                            resource: resource.name.clone(),
                            requested: requirements.size,
                            source,
                        })?;
                    self.blocks.push(PoolBlock {
                        block: MemoryBlock {
                            region,
                            requirements: requirements.clone(),
                            desc: resource.desc.clone(),
                            idle_builds: 0,
                        },
                        busy_until: None,
                        used: false,
                    });
                    plan.stats.new_allocations += 1;
                    self.blocks.len() - 1
                }
            };

            let pool_block = &mut self.blocks[block];
            if !pool_block.used {
                pool_block.used = true;
                plan.stats.blocks_used += 1;
                plan.stats.physical_bytes += pool_block.block.requirements.size;
                if block < self.retained_count {
                    plan.stats.reused_from_previous_builds += 1;
                }
            }
            pool_block.busy_until = Some(timeline.last_use);

            log::trace!(
                "'{}' [{}..={}] -> block {}",
                resource.name,
                timeline.first_use,
                timeline.last_use,
                block
            );
            plan.assignments.push(Assignment {
                handle: timeline.handle,
                block,
                first_use: timeline.first_use,
                last_use: timeline.last_use,
            });
        }

        Ok(plan)
    }
}
