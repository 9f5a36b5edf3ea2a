use crate::handle::{HandleTable, ResourceHandle};
use crate::pass::UsageRecord;
use crate::state::Access;
use crate::{GraphWarning, RenderGraphError, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct PassInfo {
    pub name: String,
    pub has_side_effects: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTimeline {
    pub handle: ResourceHandle,
    pub usages: Vec<UsageRecord>,
    pub first_use: usize,
    pub last_use: usize,
}

impl ResourceTimeline {
    pub fn overlaps(&self, other: &ResourceTimeline) -> bool {
        self.first_use <= other.last_use && other.first_use <= self.last_use
    }
}

pub struct GraphAnalysis {
    pub timelines: Vec<ResourceTimeline>,
    pub pass_usages: Vec<Vec<UsageRecord>>,
    pub active_passes: Vec<usize>,
    pub culled_passes: Vec<usize>,
    pub dependencies: DiGraph<usize, ResourceHandle>,
    pub warnings: Vec<GraphWarning>,
}

impl GraphAnalysis {
    pub fn timeline(&self, handle: ResourceHandle) -> Option<&ResourceTimeline> {
        self.timelines
            .iter()
            .find(|timeline| timeline.handle == handle)
    }
}

pub fn analyze(
    passes: &[PassInfo],
    resources: &HandleTable,
    usages: &[UsageRecord],
    cull_unused_passes: bool,
) -> Result<GraphAnalysis> {
    let mut pass_usages = fold_pass_usages(passes, resources, usages)?;
    let dependencies = build_dependencies(passes.len(), &pass_usages);

    let culled_passes = if cull_unused_passes {
        find_culled_passes(passes, resources, &pass_usages, &dependencies)
    } else {
        Vec::new()
    };
    for &pass_index in &culled_passes {
        log::debug!("Culling pass '{}'", passes[pass_index].name);
        pass_usages[pass_index].clear();
    }

    let active_passes = (0..passes.len())
        .filter(|pass_index| !culled_passes.contains(pass_index))
        .collect();

    let (timelines, warnings) = build_timelines(passes, resources, &pass_usages)?;

    Ok(GraphAnalysis {
        timelines,
        pass_usages,
        active_passes,
        culled_passes,
        dependencies,
        warnings,
    })
}

/// Collapses repeated declarations of one resource inside one pass.
fn fold_pass_usages(
    passes: &[PassInfo],
    resources: &HandleTable,
    usages: &[UsageRecord],
) -> Result<Vec<Vec<UsageRecord>>> {
    let mut pass_usages: Vec<Vec<UsageRecord>> = vec![Vec::new(); passes.len()];

    for usage in usages {
        let declared = &mut pass_usages[usage.pass_index];
        let Some(position) = declared
            .iter()
            .position(|existing| existing.handle == usage.handle)
        else {
            declared.push(*usage);
            continue;
        };

        let existing = &mut declared[position];
        if existing.required_state == usage.required_state {
            continue;
        }
        if existing.required_state.is_read_only() && usage.required_state.is_read_only() {
            existing.required_state |= usage.required_state;
            continue;
        }

        return Err(RenderGraphError::CyclicOrContradictoryDependency {
            pass: passes[usage.pass_index].name.clone(),
            resource: resources.get(usage.handle)?.name.clone(),
            first: existing.required_state,
            second: usage.required_state,
        });
    }

    Ok(pass_usages)
}

#[derive(Default)]
struct AccessTracker {
    last_writer: Option<usize>,
    readers_since_write: Vec<usize>,
}

fn build_dependencies(
    pass_count: usize,
    pass_usages: &[Vec<UsageRecord>],
) -> DiGraph<usize, ResourceHandle> {
    let mut graph = DiGraph::with_capacity(pass_count, pass_count);
    let nodes: Vec<NodeIndex> = (0..pass_count).map(|index| graph.add_node(index)).collect();
    let mut trackers: HashMap<ResourceHandle, AccessTracker> = HashMap::new();

    for (pass_index, declared) in pass_usages.iter().enumerate() {
        for usage in declared {
            let tracker = trackers.entry(usage.handle).or_default();

            if let Some(writer) = tracker.last_writer {
                graph.update_edge(nodes[writer], nodes[pass_index], usage.handle);
            }

            match usage.access {
                Access::Read => tracker.readers_since_write.push(pass_index),
                Access::Write => {
                    for reader in tracker.readers_since_write.drain(..) {
                        graph.update_edge(nodes[reader], nodes[pass_index], usage.handle);
                    }
                    tracker.last_writer = Some(pass_index);
                }
            }
        }
    }

    graph
}

/// Passes that cannot reach a pass with observable effects.
///
/// Observable means: flagged as having side effects, declaring no writes at
/// all, or writing an imported resource.
fn find_culled_passes(
    passes: &[PassInfo],
    resources: &HandleTable,
    pass_usages: &[Vec<UsageRecord>],
    dependencies: &DiGraph<usize, ResourceHandle>,
) -> Vec<usize> {
    let is_root = |pass_index: usize| {
        let declared = &pass_usages[pass_index];
        let writes_imported = declared.iter().any(|usage| {
            usage.access == Access::Write
                && resources
                    .get(usage.handle)
                    .is_ok_and(|resource| resource.is_imported())
        });
        passes[pass_index].has_side_effects
            || writes_imported
            || declared.iter().all(|usage| usage.access == Access::Read)
    };

    let reversed = Reversed(dependencies);
    let mut dfs = Dfs::empty(reversed);
    let mut required = HashSet::new();

    for root in dependencies.node_indices() {
        if !is_root(dependencies[root]) {
            continue;
        }
        dfs.move_to(root);
        while let Some(node) = dfs.next(reversed) {
            required.insert(dependencies[node]);
        }
    }

    (0..passes.len())
        .filter(|pass_index| !required.contains(pass_index))
        .collect()
}

fn build_timelines(
    passes: &[PassInfo],
    resources: &HandleTable,
    pass_usages: &[Vec<UsageRecord>],
) -> Result<(Vec<ResourceTimeline>, Vec<GraphWarning>)> {
    let mut per_resource: Vec<Vec<UsageRecord>> = vec![Vec::new(); resources.len()];
    for usage in pass_usages.iter().flatten() {
        per_resource[usage.handle.index() as usize].push(*usage);
    }

    let mut timelines = Vec::new();
    let mut warnings = Vec::new();

    for ((handle, resource), usages) in resources.iter().zip(per_resource) {
        let (Some(first), Some(last)) = (usages.first(), usages.last()) else {
            if resource.is_imported() {
                warnings.push(GraphWarning::UnusedImportedResource {
                    resource: resource.name.clone(),
                });
            } else {
                log::trace!("Resource '{}' has no active usage", resource.name);
            }
            continue;
        };

        if first.access == Access::Read && !resource.has_defined_contents() {
            return Err(RenderGraphError::UnsatisfiedLifetime {
                resource: resource.name.clone(),
                pass: passes[first.pass_index].name.clone(),
                state: first.required_state,
            });
        }

        let (first_use, last_use) = (first.pass_index, last.pass_index);
        timelines.push(ResourceTimeline {
            handle,
            usages,
            first_use,
            last_use,
        });
    }

    Ok((timelines, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{BufferDesc, ClearValue, OutputExtent, ResourceDesc, TextureDesc};
    use crate::handle::{ResourceOrigin, VirtualResource};
    use crate::pass::RenderPassBuilder;
    use crate::state::ResourceState;
    use wgpu::TextureFormat;

    struct Scenario {
        passes: Vec<PassInfo>,
        resources: HandleTable,
        usages: Vec<UsageRecord>,
    }

    impl Scenario {
        fn new() -> Self {
            Self {
                passes: Vec::new(),
                resources: HandleTable::new(0),
                usages: Vec::new(),
            }
        }

        fn pass(&mut self, name: &str) -> RenderPassBuilder<'_> {
            self.passes.push(PassInfo {
                name: name.to_string(),
                has_side_effects: false,
            });
            let index = self.passes.len() - 1;
            RenderPassBuilder::new(
                index,
                &self.passes[index].name,
                OutputExtent::new(640, 480),
                &mut self.resources,
                &mut self.usages,
            )
        }

        fn import(&mut self, name: &str, state: ResourceState) -> ResourceHandle {
            self.resources.create(VirtualResource {
                name: name.to_string(),
                desc: ResourceDesc::Texture(TextureDesc::new(
                    TextureFormat::Bgra8Unorm,
                    640,
                    480,
                )),
                initial_state: state,
                origin: ResourceOrigin::Imported,
            })
        }

        fn analyze(&self, cull: bool) -> Result<GraphAnalysis> {
            analyze(&self.passes, &self.resources, &self.usages, cull)
        }
    }

    fn color() -> TextureDesc {
        TextureDesc::new(TextureFormat::Rgba8Unorm, 128, 128)
    }

    #[test]
    fn lifetimes_span_first_to_last_usage() {
        let mut scenario = Scenario::new();
        let target = scenario
            .pass("scene")
            .create_texture(color(), ResourceState::RENDER_TARGET)
            .unwrap();
        scenario
            .pass("unrelated")
            .create_buffer(BufferDesc::new(64), ResourceState::UNORDERED_ACCESS)
            .unwrap();
        scenario
            .pass("post")
            .mark_usage(target, ResourceState::SHADER_RESOURCE)
            .unwrap();

        let analysis = scenario.analyze(false).unwrap();
        let timeline = analysis.timeline(target).unwrap();
        assert_eq!((timeline.first_use, timeline.last_use), (0, 2));
        assert_eq!(timeline.usages.len(), 2);
        assert_eq!(analysis.active_passes, vec![0, 1, 2]);
    }

    #[test]
    fn read_before_write_is_unsatisfied() {
        let mut scenario = Scenario::new();
        scenario
            .pass("sample")
            .create_texture(color().label("garbage"), ResourceState::SHADER_RESOURCE)
            .unwrap();

        match scenario.analyze(false) {
            Err(RenderGraphError::UnsatisfiedLifetime { resource, pass, .. }) => {
                assert_eq!(resource, "garbage");
                assert_eq!(pass, "sample");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("analysis should fail"),
        }
    }

    #[test]
    fn cleared_resource_may_be_read_first() {
        let mut scenario = Scenario::new();
        scenario
            .pass("sample")
            .create_texture(
                color().clear(ClearValue::Color(wgpu::Color::BLACK)),
                ResourceState::SHADER_RESOURCE,
            )
            .unwrap();
        assert!(scenario.analyze(false).is_ok());
    }

    #[test]
    fn repeated_reads_in_one_pass_combine() {
        let mut scenario = Scenario::new();
        let target = scenario
            .pass("scene")
            .create_texture(color(), ResourceState::RENDER_TARGET)
            .unwrap();
        {
            let mut builder = scenario.pass("post");
            builder.mark_usage(target, ResourceState::SHADER_RESOURCE).unwrap();
            builder.mark_usage(target, ResourceState::COPY_SOURCE).unwrap();
            builder.mark_usage(target, ResourceState::SHADER_RESOURCE).unwrap();
        }

        let analysis = scenario.analyze(false).unwrap();
        assert_eq!(analysis.pass_usages[1].len(), 1);
        assert_eq!(
            analysis.pass_usages[1][0].required_state,
            ResourceState::SHADER_RESOURCE | ResourceState::COPY_SOURCE
        );
    }

    #[test]
    fn write_and_read_in_one_pass_is_contradictory() {
        let mut scenario = Scenario::new();
        let target = scenario
            .pass("scene")
            .create_texture(color(), ResourceState::RENDER_TARGET)
            .unwrap();
        {
            let mut builder = scenario.pass("feedback");
            builder.mark_usage(target, ResourceState::SHADER_RESOURCE).unwrap();
            builder.mark_usage(target, ResourceState::RENDER_TARGET).unwrap();
        }

        assert!(matches!(
            scenario.analyze(false),
            Err(RenderGraphError::CyclicOrContradictoryDependency { .. })
        ));
    }

    #[test]
    fn read_modify_write_keeps_every_point() {
        let mut scenario = Scenario::new();
        let history = scenario
            .pass("seed")
            .create_texture(color(), ResourceState::RENDER_TARGET)
            .unwrap();
        scenario
            .pass("sample")
            .mark_usage(history, ResourceState::SHADER_RESOURCE)
            .unwrap();
        scenario
            .pass("accumulate")
            .mark_usage(history, ResourceState::UNORDERED_ACCESS)
            .unwrap();
        scenario
            .pass("resolve")
            .mark_usage(history, ResourceState::SHADER_RESOURCE)
            .unwrap();

        let analysis = scenario.analyze(false).unwrap();
        let timeline = analysis.timeline(history).unwrap();
        let points: Vec<_> = timeline
            .usages
            .iter()
            .map(|usage| (usage.pass_index, usage.access))
            .collect();
        assert_eq!(
            points,
            vec![
                (0, Access::Write),
                (1, Access::Read),
                (2, Access::Write),
                (3, Access::Read),
            ]
        );
        assert_eq!((timeline.first_use, timeline.last_use), (0, 3));

        let graph = &analysis.dependencies;
        let edge = |from: usize, to: usize| {
            graph.contains_edge(NodeIndex::new(from), NodeIndex::new(to))
        };
        assert!(edge(0, 1));
        assert!(edge(1, 2), "write after read must wait for the reader");
        assert!(edge(0, 2));
        assert!(edge(2, 3));
        assert!(!edge(0, 3));
    }

    #[test]
    fn culling_drops_passes_nobody_consumes() {
        let mut scenario = Scenario::new();
        let back_buffer = scenario.import("back_buffer", ResourceState::PRESENT);
        let scene = scenario
            .pass("scene")
            .create_texture(color(), ResourceState::RENDER_TARGET)
            .unwrap();
        scenario
            .pass("debug_overlay")
            .create_texture(color(), ResourceState::RENDER_TARGET)
            .unwrap();
        {
            let mut builder = scenario.pass("composite");
            builder.mark_usage(scene, ResourceState::SHADER_RESOURCE).unwrap();
            builder
                .mark_usage(back_buffer, ResourceState::RENDER_TARGET)
                .unwrap();
        }

        let analysis = scenario.analyze(true).unwrap();
        assert_eq!(analysis.culled_passes, vec![1]);
        assert_eq!(analysis.active_passes, vec![0, 2]);
        assert!(analysis.pass_usages[1].is_empty());
        assert_eq!(analysis.timelines.len(), 2);

        let kept = scenario.analyze(false).unwrap();
        assert!(kept.culled_passes.is_empty());
        assert_eq!(kept.timelines.len(), 3);
    }

    #[test]
    fn side_effect_passes_survive_culling() {
        let mut scenario = Scenario::new();
        scenario
            .pass("readback")
            .create_buffer(BufferDesc::new(64), ResourceState::COPY_DEST)
            .unwrap();
        scenario.passes[0].has_side_effects = true;

        let analysis = scenario.analyze(true).unwrap();
        assert!(analysis.culled_passes.is_empty());
    }

    #[test]
    fn unused_import_is_reported() {
        let mut scenario = Scenario::new();
        scenario.import("history", ResourceState::SHADER_RESOURCE);
        scenario
            .pass("scene")
            .create_texture(color(), ResourceState::RENDER_TARGET)
            .unwrap();

        let analysis = scenario.analyze(false).unwrap();
        assert_eq!(
            analysis.warnings,
            vec![GraphWarning::UnusedImportedResource {
                resource: "history".to_string()
            }]
        );
    }

    #[test]
    fn analysis_is_deterministic() {
        let build = || {
            let mut scenario = Scenario::new();
            let a = scenario
                .pass("a")
                .create_texture(color(), ResourceState::RENDER_TARGET)
                .unwrap();
            scenario
                .pass("b")
                .mark_usage(a, ResourceState::SHADER_RESOURCE)
                .unwrap();
            let analysis = scenario.analyze(true).unwrap();
            (analysis.timelines, analysis.active_passes)
        };
        assert_eq!(build(), build());
    }
}
