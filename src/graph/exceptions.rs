use super::{GraphError, GraphInput, GraphProducer, OpcodeGraph};
use crate::insn::{Insn, ValueKind};
use crate::locals::Locals;
use std::collections::BTreeSet;

/// Inserts a try-start, try-end and catch marker for each exception table entry.
pub struct TryCatchGraphProducer;

/// The instruction right after a handler label that stores the caught exception into a local or
/// discards it, if there is one.
pub fn handler_binding(instructions: &[Insn], handler: usize) -> Option<usize> {
    let index = (handler..instructions.len()).find(|index| !instructions[*index].is_marker())?;
    matches!(
        instructions[index],
        Insn::Store {
            kind: ValueKind::Reference,
            ..
        } | Insn::Pop
    )
    .then_some(index)
}

/// The first statement boundary after the last access to the variable a handler binds at
/// `binding`, i.e. the first point past it where the operand stack is empty again. `None` if the
/// variable isn't used after the binding, or if a branch follows the last use before the stack
/// drains.
pub fn handler_scope_end(instructions: &[Insn], locals: &Locals, binding: usize) -> Option<usize> {
    let Insn::Store { slot, .. } = instructions[binding] else {
        return None;
    };
    let local = locals.find(slot, binding)?;
    let last_use = locals[local].range.end.checked_sub(1)?;
    if last_use <= binding || last_use >= instructions.len() {
        return None;
    }

    let mut depth = 0usize;
    for (index, insn) in instructions.iter().enumerate().skip(binding + 1) {
        let (pops, pushes) = insn.stack_effect().ok()?;
        depth = depth.checked_sub(pops)? + pushes;
        if index >= last_use {
            if insn.is_jump() {
                return None;
            }
            if depth == 0 {
                return Some(index + 1);
            }
        }
    }
    None
}

impl GraphProducer for TryCatchGraphProducer {
    fn collect_breakpoints(
        &self,
        input: &GraphInput<'_>,
        breakpoints: &mut BTreeSet<usize>,
    ) -> Result<(), GraphError> {
        let instructions = &input.method.instructions;

        for entry in &input.method.exception_table {
            for label in [entry.start, entry.end, entry.handler] {
                breakpoints.extend(input.label_breakpoint(label)?);
            }

            let handler = input.label_index(entry.handler)?;
            let Some(binding) = handler_binding(instructions, handler) else {
                continue;
            };
            breakpoints.insert(binding);

            // The end of the statement that last uses the caught variable is the best guess we have
            // for the end of the handler when nothing jumps past it.
            if let Some(end) = handler_scope_end(instructions, input.locals, binding) {
                breakpoints.insert(end - 1);
            }
        }

        Ok(())
    }

    fn form_edges(
        &self,
        input: &GraphInput<'_>,
        graph: &mut OpcodeGraph,
    ) -> Result<(), GraphError> {
        let targets = input
            .method
            .exception_table
            .iter()
            .map(|entry| {
                Ok([
                    graph.label_block(input, entry.start)?,
                    graph.label_block(input, entry.end)?,
                    graph.label_block(input, entry.handler)?,
                ])
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        // javac lists inner handlers before outer ones. Going backwards leaves the markers of
        // earlier entries closest to the code they annotate, so an outer try-start is met first.
        for (entry, targets) in targets.into_iter().enumerate().rev() {
            graph.insert_marker_triple(entry, targets);
        }

        Ok(())
    }
}
