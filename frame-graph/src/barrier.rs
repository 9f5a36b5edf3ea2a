//! Blocks start and end every build in `COMMON`, whether they are fresh or
//! retained, so the plan never depends on what an earlier frame did.

use crate::aliasing::AliasingPlan;
use crate::analyzer::{GraphAnalysis, PassInfo};
use crate::handle::{HandleTable, ResourceHandle};
use crate::state::ResourceState;
use crate::{GraphWarning, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    State,
    /// A block changes owner and the new owner expects a different state.
    Aliasing,
    Export,
    /// Returns a block to `COMMON` after the last pass.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub handle: ResourceHandle,
    pub before: ResourceState,
    pub after: ResourceState,
    pub kind: TransitionKind,
}

#[derive(Debug, Clone, Default)]
pub struct BarrierPlan {
    pub before_pass: Vec<Vec<Transition>>,
    pub trailing: Vec<Transition>,
    pub warnings: Vec<GraphWarning>,
}

impl BarrierPlan {
    pub fn transitions(&self) -> impl Iterator<Item = (Option<usize>, &Transition)> + '_ {
        self.before_pass
            .iter()
            .enumerate()
            .flat_map(|(pass_index, transitions)| {
                transitions
                    .iter()
                    .map(move |transition| (Some(pass_index), transition))
            })
            .chain(self.trailing.iter().map(|transition| (None, transition)))
    }

    pub fn len(&self) -> usize {
        self.before_pass.iter().map(Vec::len).sum::<usize>() + self.trailing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn plan_barriers(
    passes: &[PassInfo],
    resources: &HandleTable,
    analysis: &GraphAnalysis,
    aliasing: &AliasingPlan,
    exports: &[(ResourceHandle, ResourceState)],
) -> Result<BarrierPlan> {
    let mut current: Vec<Option<ResourceState>> = vec![None; resources.len()];
    let mut previous_pass: Vec<Option<usize>> = vec![None; resources.len()];
    let mut block_of: Vec<Option<usize>> = vec![None; resources.len()];
    for assignment in &aliasing.assignments {
        block_of[assignment.handle.index() as usize] = Some(assignment.block);
    }
    let block_count = aliasing
        .assignments
        .iter()
        .map(|assignment| assignment.block + 1)
        .max()
        .unwrap_or(0);
    let mut block_states = vec![ResourceState::COMMON; block_count];
    let mut last_owner: Vec<Option<ResourceHandle>> = vec![None; block_count];

    let mut plan = BarrierPlan {
        before_pass: vec![Vec::new(); passes.len()],
        trailing: Vec::new(),
        warnings: Vec::new(),
    };

    for &pass_index in &analysis.active_passes {
        for usage in &analysis.pass_usages[pass_index] {
            let slot = usage.handle.index() as usize;
            let resource = resources.get(usage.handle)?;
            let block = block_of[slot];

            let state = match current[slot] {
                Some(state) => state,
                None => {
                    if let Some(block) = block {
                        let held = block_states[block];
                        if held != resource.initial_state {
                            plan.before_pass[pass_index].push(Transition {
                                handle: usage.handle,
                                before: held,
                                after: resource.initial_state,
                                kind: TransitionKind::Aliasing,
                            });
                        }
                    }
                    resource.initial_state
                }
            };

            let required = usage.required_state;
            if state != required {
                if state.is_read_only()
                    && required.is_read_only()
                    && let Some(previous) = previous_pass[slot]
                {
                    plan.warnings
                        .push(GraphWarning::InefficientReadToReadTransition {
                            resource: resource.name.clone(),
                            previous_pass: passes[previous].name.clone(),
                            pass: passes[pass_index].name.clone(),
                            before: state,
                            after: required,
                            combined: state | required,
                        });
                }
                plan.before_pass[pass_index].push(Transition {
                    handle: usage.handle,
                    before: state,
                    after: required,
                    kind: TransitionKind::State,
                });
            }

            current[slot] = Some(required);
            previous_pass[slot] = Some(pass_index);
            if let Some(block) = block {
                block_states[block] = required;
                last_owner[block] = Some(usage.handle);
            }
        }
    }

    for &(handle, final_state) in exports {
        let resource = resources.get(handle)?;
        let slot = handle.index() as usize;
        let state = current[slot].unwrap_or(resource.initial_state);
        if state != final_state {
            plan.trailing.push(Transition {
                handle,
                before: state,
                after: final_state,
                kind: TransitionKind::Export,
            });
        }
    }

    for (block, owner) in last_owner.into_iter().enumerate() {
        let state = block_states[block];
        if let Some(handle) = owner
            && state != ResourceState::COMMON
        {
            plan.trailing.push(Transition {
                handle,
                before: state,
                after: ResourceState::COMMON,
                kind: TransitionKind::Release,
            });
        }
    }

    Ok(plan)
}
