use crate::component::ComponentStore;
use crate::desc::{BufferDesc, OutputExtent, ResourceDesc, TextureDesc};
use crate::handle::{HandleTable, ResourceHandle, ResourceOrigin, VirtualResource};
use crate::provider::PhysicalResourceProvider;
use crate::state::{Access, ResourceState};
use crate::{RenderGraphError, Result};
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRecord {
    pub pass_index: usize,
    pub handle: ResourceHandle,
    pub required_state: ResourceState,
    pub access: Access,
}

/// A unit of GPU work. `register` only declares resources; `record` runs once
/// every pass is registered and the resources are bound to memory.
pub trait RenderPass<P: PhysicalResourceProvider, C = ()> {
    fn name(&self) -> &str;

    /// The target this pass renders for. Output-relative textures created by
    /// the pass are sized against it instead of the graph's primary output.
    fn output(&self) -> Option<OutputExtent> {
        None
    }

    fn has_side_effects(&self) -> bool {
        false
    }

    fn register(
        &mut self,
        builder: &mut RenderPassBuilder<'_>,
        resolver: &mut Resolver<'_, P>,
    ) -> Result<()>;

    fn record(&mut self, context: &mut C, resolver: &mut Resolver<'_, P>) -> Result<()>;
}

pub struct ClosurePass<P, C, R, E> {
    name: String,
    output: Option<OutputExtent>,
    side_effects: bool,
    register: R,
    record: E,
    _marker: PhantomData<fn(&P, &mut C)>,
}

impl<P, C, R, E> ClosurePass<P, C, R, E>
where
    P: PhysicalResourceProvider,
    R: FnMut(&mut RenderPassBuilder<'_>, &mut Resolver<'_, P>) -> Result<()>,
    E: FnMut(&mut C, &mut Resolver<'_, P>) -> Result<()>,
{
    pub fn new(name: &str, register: R, record: E) -> Self {
        Self {
            name: name.to_string(),
            output: None,
            side_effects: false,
            register,
            record,
            _marker: PhantomData,
        }
    }

    pub fn with_output(mut self, output: OutputExtent) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }
}

impl<P, C, R, E> RenderPass<P, C> for ClosurePass<P, C, R, E>
where
    P: PhysicalResourceProvider,
    R: FnMut(&mut RenderPassBuilder<'_>, &mut Resolver<'_, P>) -> Result<()>,
    E: FnMut(&mut C, &mut Resolver<'_, P>) -> Result<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn output(&self) -> Option<OutputExtent> {
        self.output
    }

    fn has_side_effects(&self) -> bool {
        self.side_effects
    }

    fn register(
        &mut self,
        builder: &mut RenderPassBuilder<'_>,
        resolver: &mut Resolver<'_, P>,
    ) -> Result<()> {
        (self.register)(builder, resolver)
    }

    fn record(&mut self, context: &mut C, resolver: &mut Resolver<'_, P>) -> Result<()> {
        (self.record)(context, resolver)
    }
}

pub struct RenderPassBuilder<'a> {
    pass_index: usize,
    pass_name: &'a str,
    output: OutputExtent,
    resources: &'a mut HandleTable,
    usages: &'a mut Vec<UsageRecord>,
}

impl<'a> RenderPassBuilder<'a> {
    pub(crate) fn new(
        pass_index: usize,
        pass_name: &'a str,
        output: OutputExtent,
        resources: &'a mut HandleTable,
        usages: &'a mut Vec<UsageRecord>,
    ) -> Self {
        Self {
            pass_index,
            pass_name,
            output,
            resources,
            usages,
        }
    }

    pub fn pass_index(&self) -> usize {
        self.pass_index
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    pub fn output(&self) -> OutputExtent {
        self.output
    }

    pub fn create_texture(
        &mut self,
        desc: TextureDesc,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        let resolved = desc.resolve(self.output);
        self.create(ResourceDesc::Texture(resolved), initial_state)
    }

    /// Creates a texture whose size follows the primary output. A descriptor
    /// without an output scale is treated as scale 1.0.
    pub fn create_primary_output_relative_texture(
        &mut self,
        mut desc: TextureDesc,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        desc.output_scale.get_or_insert(1.0);
        self.create_texture(desc, initial_state)
    }

    pub fn create_buffer(
        &mut self,
        desc: BufferDesc,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        self.create(ResourceDesc::Buffer(desc), initial_state)
    }

    pub fn mark_usage(
        &mut self,
        handle: ResourceHandle,
        required_state: ResourceState,
    ) -> Result<()> {
        let resource = self.resources.get(handle)?;
        required_state.validate_for(handle.kind(), &resource.name)?;

        self.usages.push(UsageRecord {
            pass_index: self.pass_index,
            handle,
            required_state,
            access: required_state.access(),
        });
        Ok(())
    }

    fn create(
        &mut self,
        desc: ResourceDesc,
        initial_state: ResourceState,
    ) -> Result<ResourceHandle> {
        let name = match desc.label() {
            Some(label) => label.to_string(),
            None => format!("{}#{}", self.pass_name, self.resources.len()),
        };

        desc.validate(&name)?;
        initial_state.validate_for(desc.kind(), &name)?;

        let handle = self.resources.create(VirtualResource {
            name,
            desc,
            initial_state,
            origin: ResourceOrigin::Transient {
                creator: self.pass_index,
            },
        });

        self.usages.push(UsageRecord {
            pass_index: self.pass_index,
            handle,
            required_state: initial_state,
            access: initial_state.access(),
        });
        Ok(handle)
    }
}

struct BoundResources<'a, V> {
    resources: &'a HandleTable,
    declared: &'a [ResourceHandle],
    views: &'a [Option<V>],
}

pub struct Resolver<'a, P: PhysicalResourceProvider> {
    pass_index: Option<usize>,
    pass_name: &'a str,
    components: &'a mut ComponentStore,
    bound: Option<BoundResources<'a, P::View>>,
}

impl<'a, P: PhysicalResourceProvider> Resolver<'a, P> {
    pub(crate) fn unbound(
        pass_index: Option<usize>,
        pass_name: &'a str,
        components: &'a mut ComponentStore,
    ) -> Self {
        Self {
            pass_index,
            pass_name,
            components,
            bound: None,
        }
    }

    pub(crate) fn bound(
        pass_index: usize,
        pass_name: &'a str,
        components: &'a mut ComponentStore,
        resources: &'a HandleTable,
        declared: &'a [ResourceHandle],
        views: &'a [Option<P::View>],
    ) -> Self {
        Self {
            pass_index: Some(pass_index),
            pass_name,
            components,
            bound: Some(BoundResources {
                resources,
                declared,
                views,
            }),
        }
    }

    pub fn pass_index(&self) -> Option<usize> {
        self.pass_index
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// Only valid while recording, and only for handles the current pass
    /// declared; anything else is `UndeclaredResourceAccess`.
    pub fn resolve_resource(&self, handle: ResourceHandle) -> Result<&'a P::View> {
        let bound = self.bound_for(handle)?;
        let views: &'a [Option<P::View>] = bound.views;
        views
            .get(handle.index() as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.undeclared(handle, "no physical resource assigned"))
    }

    pub fn resolve_desc(&self, handle: ResourceHandle) -> Result<&'a ResourceDesc> {
        let bound = self.bound_for(handle)?;
        let resources: &'a HandleTable = bound.resources;
        Ok(&resources.get(handle)?.desc)
    }

    pub fn get_component<T: 'static>(&self) -> Result<&T> {
        self.components.get::<T>()
    }

    pub fn get_component_mut<T: 'static>(&mut self) -> Result<&mut T> {
        self.components.get_mut::<T>()
    }

    pub fn create_component<T: 'static>(&mut self, value: T) -> Result<()> {
        self.components.create(value)
    }

    pub fn has_component<T: 'static>(&self) -> bool {
        self.components.contains::<T>()
    }

    fn bound_for(&self, handle: ResourceHandle) -> Result<&BoundResources<'a, P::View>> {
        let bound = self
            .bound
            .as_ref()
            .ok_or_else(|| self.undeclared(handle, "resources are not bound while registering"))?;

        bound.resources.get(handle)?;
        if !bound.declared.contains(&handle) {
            return Err(self.undeclared(handle, "not declared by this pass"));
        }
        Ok(bound)
    }

    fn undeclared(&self, handle: ResourceHandle, reason: &'static str) -> RenderGraphError {
        RenderGraphError::UndeclaredResourceAccess {
            pass: self.pass_name.to_string(),
            handle,
            reason,
        }
    }
}
