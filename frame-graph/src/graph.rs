use crate::aliasing::{AliasingAllocator, AliasingPlan, GraphMemory, MemoryStats};
use crate::analyzer::{self, GraphAnalysis, PassInfo};
use crate::barrier::{self, BarrierPlan, Transition};
use crate::component::ComponentStore;
use crate::desc::{BufferDesc, OutputExtent, ResourceDesc, TextureDesc};
use crate::handle::{HandleTable, ResourceHandle, ResourceOrigin, VirtualResource};
use crate::pass::{RenderPass, RenderPassBuilder, Resolver, UsageRecord};
use crate::provider::{CommandRecorder, PhysicalResourceProvider, ResolvedTransition};
use crate::state::ResourceState;
use crate::{GraphWarning, RenderGraphError, Result};
use std::fmt;

#[derive(Debug, Clone)]
pub struct RenderGraphConfig {
    pub cull_unused_passes: bool,
    pub retain_memory: bool,
    /// Builds a retained block may go unused before it is freed.
    pub max_idle_builds: u32,
    pub log_plan: bool,
}

impl Default for RenderGraphConfig {
    fn default() -> Self {
        Self {
            cull_unused_passes: false,
            retain_memory: true,
            max_idle_builds: 3,
            log_plan: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphPhase {
    Building,
    Analyzing,
    /// Also the phase of a compiled graph waiting to be executed.
    Allocating,
    Recording,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedTransition {
    pub pass: Option<String>,
    pub resource: String,
    pub transition: Transition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedAssignment {
    pub resource: String,
    pub handle: ResourceHandle,
    pub block: usize,
    pub first_use: usize,
    pub last_use: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub generation: u16,
    pub output: OutputExtent,
    pub executed_passes: Vec<String>,
    pub culled_passes: Vec<String>,
    pub transitions: Vec<ReportedTransition>,
    pub assignments: Vec<ReportedAssignment>,
    pub memory: MemoryStats,
    pub warnings: Vec<GraphWarning>,
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "build {} at {}x{}: {} passes ({} culled), {} transitions",
            self.generation,
            self.output.width,
            self.output.height,
            self.executed_passes.len(),
            self.culled_passes.len(),
            self.transitions.len()
        )?;
        for reported in &self.transitions {
            let transition = &reported.transition;
            writeln!(
                f,
                "  {:?} '{}' {} -> {} before {}",
                transition.kind,
                reported.resource,
                transition.before,
                transition.after,
                reported.pass.as_deref().unwrap_or("<end of frame>")
            )?;
        }
        for assignment in &self.assignments {
            writeln!(
                f,
                "  '{}' [{}..={}] in block {}",
                assignment.resource, assignment.first_use, assignment.last_use, assignment.block
            )?;
        }
        write!(
            f,
            "  memory: {} virtual bytes in {} physical bytes ({} blocks, {} new, {} retained)",
            self.memory.virtual_bytes,
            self.memory.physical_bytes,
            self.memory.blocks_used,
            self.memory.new_allocations,
            self.memory.reused_from_previous_builds
        )
    }
}

struct CompiledFrame<R> {
    analysis: GraphAnalysis,
    allocator: AliasingAllocator<R>,
    barriers: BarrierPlan,
    declared: Vec<Vec<ResourceHandle>>,
    report: FrameReport,
}

pub struct RenderGraph<'p, P: PhysicalResourceProvider, C = ()> {
    config: RenderGraphConfig,
    memory: GraphMemory<P>,
    phase: GraphPhase,
    output: OutputExtent,
    passes: Vec<&'p mut dyn RenderPass<P, C>>,
    pass_infos: Vec<PassInfo>,
    resources: HandleTable,
    usages: Vec<UsageRecord>,
    components: ComponentStore,
    views: Vec<Option<P::View>>,
    exports: Vec<(ResourceHandle, ResourceState)>,
    compiled: Option<CompiledFrame<P::Region>>,
}

impl<'p, P: PhysicalResourceProvider, C> RenderGraph<'p, P, C> {
    pub fn new(config: RenderGraphConfig, mut memory: GraphMemory<P>) -> Self {
        let (generation, output) = memory.begin_build();
        Self {
            config,
            memory,
            phase: GraphPhase::Building,
            output,
            passes: Vec::new(),
            pass_infos: Vec::new(),
            resources: HandleTable::new(generation),
            usages: Vec::new(),
            components: ComponentStore::new(),
            views: Vec::new(),
            exports: Vec::new(),
            compiled: None,
        }
    }

    pub fn phase(&self) -> GraphPhase {
        self.phase
    }

    pub fn generation(&self) -> u16 {
        self.resources.generation()
    }

    pub fn primary_output(&self) -> OutputExtent {
        self.output
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn add_pass(&mut self, pass: &'p mut dyn RenderPass<P, C>) -> Result<()> {
        self.expect_building("add a pass")?;
        self.pass_infos.push(PassInfo {
            name: pass.name().to_string(),
            has_side_effects: pass.has_side_effects(),
        });
        self.passes.push(pass);
        Ok(())
    }

    pub fn create_component<T: 'static>(&mut self, value: T) -> Result<()> {
        self.expect_building("create a component")?;
        self.components.create(value)
    }

    pub fn get_component<T: 'static>(&self) -> Result<&T> {
        self.components.get::<T>()
    }

    pub fn get_component_mut<T: 'static>(&mut self) -> Result<&mut T> {
        self.components.get_mut::<T>()
    }

    pub fn resolver(&mut self) -> Resolver<'_, P> {
        Resolver::unbound(None, "graph owner", &mut self.components)
    }

    pub fn import_texture(
        &mut self,
        desc: TextureDesc,
        state: ResourceState,
        view: P::View,
    ) -> Result<ResourceHandle> {
        let desc = desc.resolve(self.output);
        self.import(ResourceDesc::Texture(desc), state, view)
    }

    pub fn import_buffer(
        &mut self,
        desc: BufferDesc,
        state: ResourceState,
        view: P::View,
    ) -> Result<ResourceHandle> {
        self.import(ResourceDesc::Buffer(desc), state, view)
    }

    pub fn export_resource(
        &mut self,
        handle: ResourceHandle,
        final_state: ResourceState,
    ) -> Result<()> {
        self.expect_building("export a resource")?;
        let resource = self.resources.get(handle)?;
        final_state.validate_for(handle.kind(), &resource.name)?;
        if !resource.is_imported() {
            return Err(RenderGraphError::InvalidResourceDesc {
                resource: resource.name.clone(),
                reason: "only imported resources can be exported",
            });
        }

        match self.exports.iter_mut().find(|(export, _)| *export == handle) {
            Some(export) => export.1 = final_state,
            None => self.exports.push((handle, final_state)),
        }
        Ok(())
    }

    /// Registers, analyses and places every pass without recording anything.
    ///
    /// Calling it again returns the same plan. Nothing is recorded until
    /// [`execute`](Self::execute); call [`into_memory`](Self::into_memory) to
    /// abandon the plan and keep its blocks. Dropping the graph drops its
    /// [`GraphMemory`] as well, provider and retained blocks included.
    pub fn compile(&mut self) -> Result<&FrameReport> {
        if self.compiled.is_none() {
            self.expect_building("compile")?;
            match self.build_plan() {
                Ok(compiled) => self.compiled = Some(compiled),
                Err(error) => {
                    self.phase = GraphPhase::Failed;
                    log::error!("Frame graph build failed: {error}");
                    return Err(error);
                }
            }
        }

        match &self.compiled {
            Some(compiled) => Ok(&compiled.report),
            None => Err(self.invalid_phase("compile")),
        }
    }

    /// On error nothing recorded into `context` may be submitted.
    pub fn execute(&mut self, context: &mut C) -> Result<FrameReport>
    where
        C: CommandRecorder<P>,
    {
        self.compile()?;
        let Some(compiled) = self.compiled.take() else {
            return Err(self.invalid_phase("execute"));
        };

        self.phase = GraphPhase::Recording;
        if let Err(error) = self.record_passes(&compiled, context) {
            self.phase = GraphPhase::Failed;
            log::error!("Frame graph recording failed: {error}");
            self.memory.reclaim(
                compiled.allocator.into_blocks(),
                self.config.retain_memory,
                self.config.max_idle_builds,
            );
            return Err(error);
        }

        let CompiledFrame { allocator, report, .. } = compiled;
        self.memory.reclaim(
            allocator.into_blocks(),
            self.config.retain_memory,
            self.config.max_idle_builds,
        );
        self.phase = GraphPhase::Done;
        Ok(report)
    }

    pub fn into_memory(mut self) -> GraphMemory<P> {
        if let Some(compiled) = self.compiled.take() {
            self.memory.reclaim(
                compiled.allocator.into_blocks(),
                self.config.retain_memory,
                self.config.max_idle_builds,
            );
        }
        self.memory
    }

    fn import(
        &mut self,
        desc: ResourceDesc,
        state: ResourceState,
        view: P::View,
    ) -> Result<ResourceHandle> {
        self.expect_building("import a resource")?;
        let name = match desc.label() {
            Some(label) => label.to_string(),
            None => format!("import#{}", self.resources.len()),
        };
        desc.validate(&name)?;
        state.validate_for(desc.kind(), &name)?;

        let handle = self.resources.create(VirtualResource {
            name,
            desc,
            initial_state: state,
            origin: ResourceOrigin::Imported,
        });
        let slot = handle.index() as usize;
        self.views.resize_with(slot, || None);
        self.views.push(Some(view));
        Ok(handle)
    }

    fn build_plan(&mut self) -> Result<CompiledFrame<P::Region>> {
        self.register_passes()?;

        self.phase = GraphPhase::Analyzing;
        let analysis = analyzer::analyze(
            &self.pass_infos,
            &self.resources,
            &self.usages,
            self.config.cull_unused_passes,
        )?;

        self.phase = GraphPhase::Allocating;
        let mut allocator = AliasingAllocator::new(self.memory.take_free_list());
        let (aliasing, barriers) = match self.place_resources(&mut allocator, &analysis) {
            Ok(plans) => plans,
            Err(error) => {
                self.memory.reclaim(
                    allocator.into_blocks(),
                    self.config.retain_memory,
                    self.config.max_idle_builds,
                );
                return Err(error);
            }
        };

        let mut warnings = analysis.warnings.clone();
        warnings.extend(barriers.warnings.iter().cloned());
        for warning in &warnings {
            log::warn!("{warning}");
        }

        let declared = analysis
            .pass_usages
            .iter()
            .map(|usages| usages.iter().map(|usage| usage.handle).collect())
            .collect();
        let report = self.report(&analysis, &aliasing, &barriers, warnings);
        if self.config.log_plan {
            log::debug!("{report}");
        } else {
            log::debug!(
                "Compiled {} passes with {} transitions into {} blocks",
                report.executed_passes.len(),
                report.transitions.len(),
                report.memory.blocks_used
            );
        }

        Ok(CompiledFrame {
            analysis,
            allocator,
            barriers,
            declared,
            report,
        })
    }

    fn register_passes(&mut self) -> Result<()> {
        for (pass_index, pass) in self.passes.iter_mut().enumerate() {
            let name = &self.pass_infos[pass_index].name;
            let output = pass.output().unwrap_or(self.output);
            let mut builder = RenderPassBuilder::new(
                pass_index,
                name,
                output,
                &mut self.resources,
                &mut self.usages,
            );
            let mut resolver = Resolver::unbound(Some(pass_index), name, &mut self.components);
            pass.register(&mut builder, &mut resolver)?;
        }
        Ok(())
    }

    fn place_resources(
        &mut self,
        allocator: &mut AliasingAllocator<P::Region>,
        analysis: &GraphAnalysis,
    ) -> Result<(AliasingPlan, BarrierPlan)> {
        let aliasing =
            allocator.allocate(self.memory.provider_mut(), &self.resources, &analysis.timelines)?;

        self.views.resize_with(self.resources.len(), || None);
        for assignment in &aliasing.assignments {
            let resource = self.resources.get(assignment.handle)?;
            let Some(block) = allocator.block(assignment.block) else {
                continue;
            };
            let view = self
                .memory
                .provider_mut()
                .create_view(block.region(), &resource.desc)
                .map_err(|source| RenderGraphError::ViewCreation {
                    resource: resource.name.clone(),
                    source,
                })?;
            self.views[assignment.handle.index() as usize] = Some(view);
        }

        let barriers = barrier::plan_barriers(
            &self.pass_infos,
            &self.resources,
            analysis,
            &aliasing,
            &self.exports,
        )?;
        Ok((aliasing, barriers))
    }

    fn record_passes(&mut self, compiled: &CompiledFrame<P::Region>, context: &mut C) -> Result<()>
    where
        C: CommandRecorder<P>,
    {
        for &pass_index in &compiled.analysis.active_passes {
            self.issue_transitions(&compiled.barriers.before_pass[pass_index], context)?;

            let name = &self.pass_infos[pass_index].name;
            let mut resolver = Resolver::bound(
                pass_index,
                name,
                &mut self.components,
                &self.resources,
                &compiled.declared[pass_index],
                &self.views,
            );
            self.passes[pass_index].record(context, &mut resolver)?;
        }
        self.issue_transitions(&compiled.barriers.trailing, context)
    }

    fn issue_transitions(&self, transitions: &[Transition], context: &mut C) -> Result<()>
    where
        C: CommandRecorder<P>,
    {
        if transitions.is_empty() {
            return Ok(());
        }

        let mut resolved = Vec::with_capacity(transitions.len());
        for transition in transitions {
            let view = self
                .views
                .get(transition.handle.index() as usize)
                .and_then(Option::as_ref)
                .ok_or_else(|| RenderGraphError::UndeclaredResourceAccess {
                    pass: "graph".to_string(),
                    handle: transition.handle,
                    reason: "no physical resource assigned",
                })?;
            log::trace!(
                "{:?} {:?} {} -> {}",
                transition.kind,
                transition.handle,
                transition.before,
                transition.after
            );
            resolved.push(ResolvedTransition { transition, view });
        }
        context.transition(&resolved);
        Ok(())
    }

    fn report(
        &self,
        analysis: &GraphAnalysis,
        aliasing: &AliasingPlan,
        barriers: &BarrierPlan,
        warnings: Vec<GraphWarning>,
    ) -> FrameReport {
        let pass_name = |pass_index: usize| self.pass_infos[pass_index].name.clone();
        let resource_name = |handle: ResourceHandle| {
            self.resources
                .get(handle)
                .map(|resource| resource.name.clone())
                .unwrap_or_default()
        };

        FrameReport {
            generation: self.resources.generation(),
            output: self.output,
            executed_passes: analysis.active_passes.iter().copied().map(pass_name).collect(),
            culled_passes: analysis.culled_passes.iter().copied().map(pass_name).collect(),
            transitions: barriers
                .transitions()
                .map(|(pass_index, transition)| ReportedTransition {
                    pass: pass_index.map(pass_name),
                    resource: resource_name(transition.handle),
                    transition: *transition,
                })
                .collect(),
            assignments: aliasing
                .assignments
                .iter()
                .map(|assignment| ReportedAssignment {
                    resource: resource_name(assignment.handle),
                    handle: assignment.handle,
                    block: assignment.block,
                    first_use: assignment.first_use,
                    last_use: assignment.last_use,
                })
                .collect(),
            memory: aliasing.stats,
            warnings,
        }
    }

    fn expect_building(&self, operation: &'static str) -> Result<()> {
        if self.phase == GraphPhase::Building && self.compiled.is_none() {
            Ok(())
        } else {
            Err(self.invalid_phase(operation))
        }
    }

    fn invalid_phase(&self, operation: &'static str) -> RenderGraphError {
        RenderGraphError::InvalidPhase {
            operation,
            phase: self.phase,
        }
    }
}
