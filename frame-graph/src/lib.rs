pub mod aliasing;
pub mod analyzer;
pub mod barrier;
pub mod component;
pub mod desc;
pub mod graph;
pub mod handle;
pub mod pass;
pub mod provider;
pub mod state;
pub mod wgpu_provider;

use std::fmt;

pub use aliasing::{GraphMemory, MemoryStats};
pub use barrier::{Transition, TransitionKind};
pub use component::ComponentStore;
pub use desc::{BufferDesc, ClearValue, OutputExtent, ResourceDesc, TextureDesc};
pub use graph::{FrameReport, GraphPhase, RenderGraph, RenderGraphConfig};
pub use handle::{ResourceHandle, ResourceKind};
pub use pass::{ClosurePass, RenderPass, RenderPassBuilder, Resolver};
pub use provider::{
    CommandRecorder, PhysicalResourceProvider, ProviderError, ResolvedTransition, VirtualHeap,
};
pub use state::{Access, ResourceState, StateViolation};
pub use wgpu_provider::{WgpuProvider, WgpuRegion, WgpuView};

#[derive(Debug, thiserror::Error)]
pub enum RenderGraphError {
    #[error("Resource '{resource}' declared with invalid state {state}: {violation}")]
    InvalidStateCombination {
        resource: String,
        state: ResourceState,
        violation: StateViolation,
    },

    #[error("Handle {handle:?} is stale; the current build is generation {current_generation}")]
    StaleHandle {
        handle: ResourceHandle,
        current_generation: u16,
    },

    #[error("Pass '{pass}' cannot resolve {handle:?}: {reason}")]
    UndeclaredResourceAccess {
        pass: String,
        handle: ResourceHandle,
        reason: &'static str,
    },

    #[error("Pass '{pass}' reads '{resource}' as {state} before anything wrote it")]
    UnsatisfiedLifetime {
        resource: String,
        pass: String,
        state: ResourceState,
    },

    #[error("Out of graph memory placing '{resource}' ({requested} bytes)")]
    OutOfGraphMemory {
        resource: String,
        requested: u64,
        #[source]
        source: ProviderError,
    },

    #[error("Pass '{pass}' declares '{resource}' as both {first} and {second}")]
    CyclicOrContradictoryDependency {
        pass: String,
        resource: String,
        first: ResourceState,
        second: ResourceState,
    },

    #[error("Resource '{resource}' has an invalid descriptor: {reason}")]
    InvalidResourceDesc {
        resource: String,
        reason: &'static str,
    },

    #[error("Component '{component}' not found")]
    MissingComponent { component: &'static str },

    #[error("Component '{component}' already exists")]
    DuplicateComponent { component: &'static str },

    #[error("Cannot {operation} while the graph is {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: GraphPhase,
    },

    #[error("Failed to create a view for '{resource}'")]
    ViewCreation {
        resource: String,
        #[source]
        source: ProviderError,
    },

    #[error("Pass '{pass}' failed: {message}")]
    Pass { pass: String, message: String },
}

pub type Result<T> = std::result::Result<T, RenderGraphError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphWarning {
    /// Two consecutive passes read a resource in different read-only states.
    /// Declaring `combined` in both would have avoided the transition.
    InefficientReadToReadTransition {
        resource: String,
        previous_pass: String,
        pass: String,
        before: ResourceState,
        after: ResourceState,
        combined: ResourceState,
    },
    UnusedImportedResource { resource: String },
}

impl fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphWarning::InefficientReadToReadTransition {
                resource,
                previous_pass,
                pass,
                before,
                after,
                combined,
            } => write!(
                f,
                "'{resource}' transitions {before} -> {after} between read-only passes \
                 '{previous_pass}' and '{pass}'; declare {combined} in both"
            ),
            GraphWarning::UnusedImportedResource { resource } => {
                write!(f, "imported resource '{resource}' is never used")
            }
        }
    }
}
