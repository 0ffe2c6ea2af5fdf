use super::insn_control_flow::get_insn_control_flow;
use super::{BlockKind, GraphError, GraphInput, GraphProducer, OpcodeGraph};
use crate::insn::Insn;
use std::collections::BTreeSet;

/// Splits blocks at `goto`, conditional jumps and method exits, and links them accordingly.
pub struct InternalJumpGraphProducer;

impl GraphProducer for InternalJumpGraphProducer {
    fn collect_breakpoints(
        &self,
        input: &GraphInput<'_>,
        breakpoints: &mut BTreeSet<usize>,
    ) -> Result<(), GraphError> {
        for (index, insn) in input.method.instructions.iter().enumerate() {
            let control_flow = get_insn_control_flow(insn);
            if control_flow.is_normal() || matches!(insn, Insn::Switch { .. }) {
                continue;
            }
            breakpoints.insert(index);
            for target in control_flow.can_jump_to {
                breakpoints.extend(input.label_breakpoint(target)?);
            }
        }
        Ok(())
    }

    fn form_edges(&self, input: &GraphInput<'_>, graph: &mut OpcodeGraph) -> Result<(), GraphError> {
        for id in 0..graph.n_code_blocks() {
            let last = graph[id].instructions.end - 1;
            let kind = match &input.method.instructions[last] {
                Insn::Return(_) | Insn::Throw => BlockKind::Exit,
                Insn::Goto(target) => BlockKind::Goto {
                    target: graph.label_block(input, *target)?,
                },
                Insn::Jump { condition, target } => BlockKind::Conditional {
                    condition: *condition,
                    target: graph.label_block(input, *target)?,
                    fallthrough: graph
                        .next_code_block(id)
                        .ok_or(GraphError::CodeFallthrough(last))?,
                },
                _ => continue,
            };
            graph.set_kind(id, kind);
        }
        Ok(())
    }
}

/// Splits blocks at `tableswitch`/`lookupswitch` and every case target.
pub struct SwitchGraphProducer;

impl GraphProducer for SwitchGraphProducer {
    fn collect_breakpoints(
        &self,
        input: &GraphInput<'_>,
        breakpoints: &mut BTreeSet<usize>,
    ) -> Result<(), GraphError> {
        for (index, insn) in input.method.instructions.iter().enumerate() {
            if !matches!(insn, Insn::Switch { .. }) {
                continue;
            }
            breakpoints.insert(index);
            for target in get_insn_control_flow(insn).can_jump_to {
                breakpoints.extend(input.label_breakpoint(target)?);
            }
        }
        Ok(())
    }

    fn form_edges(&self, input: &GraphInput<'_>, graph: &mut OpcodeGraph) -> Result<(), GraphError> {
        for id in 0..graph.n_code_blocks() {
            let last = graph[id].instructions.end - 1;
            let Insn::Switch { default, arms } = &input.method.instructions[last] else {
                continue;
            };
            let arms = arms
                .iter()
                .map(|(value, target)| Ok((*value, graph.label_block(input, *target)?)))
                .collect::<Result<Vec<_>, GraphError>>()?;
            let default = graph.label_block(input, *default)?;
            graph.set_kind(id, BlockKind::Switch { arms, default });
        }
        Ok(())
    }
}
