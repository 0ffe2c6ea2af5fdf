use super::{ConditionSection, Region};
use crate::graph::{BlockId, BlockKind, OpcodeGraph};

/// A run of conditional blocks guarding the code that follows them.
#[derive(Debug)]
pub struct ConditionChain {
    /// Holds when control reaches the guarded code.
    pub condition: ConditionSection,
    /// Region index of the last conditional block in the chain.
    pub last: usize,
    /// Where control goes when the condition doesn't hold.
    pub skip: BlockId,
}

fn conditional_target(graph: &OpcodeGraph, id: BlockId) -> Option<BlockId> {
    match graph[id].kind {
        BlockKind::Conditional { target, .. } => Some(target),
        _ => None,
    }
}

/// Whether `region.blocks[index]` can continue a chain: it must be a conditional block that is
/// only entered by falling through from its predecessor.
fn chain_link(graph: &OpcodeGraph, region: Region<'_>, index: usize) -> Option<BlockId> {
    let id = *region.blocks.get(index)?;
    if graph.is_jump_target(id) {
        return None;
    }
    conditional_target(graph, id)
}

fn jump_part(
    graph: &OpcodeGraph,
    region: Region<'_>,
    index: usize,
    negate: bool,
) -> ConditionSection {
    ConditionSection::Jump {
        instructions: graph[region.get(index)].instructions.clone(),
        negate,
    }
}

fn combine(parts: Vec<ConditionSection>, and: bool) -> ConditionSection {
    match <[_; 1]>::try_from(parts) {
        Ok([part]) => part,
        Err(parts) if and => ConditionSection::And(parts),
        Err(parts) => ConditionSection::Or(parts),
    }
}

/// Recognizes `if` conditions starting at `start`.
///
/// `a && b` compiles to jumps that all skip the guarded code, and `a || b` to jumps into the
/// guarded code followed by one final jump around it.
pub fn guard_chain(
    graph: &OpcodeGraph,
    region: Region<'_>,
    start: usize,
) -> Option<ConditionChain> {
    let target = conditional_target(graph, region.get(start))?;

    let mut last = start;
    while chain_link(graph, region, last + 1) == Some(target) {
        last += 1;
    }

    if let Some(skip) = chain_link(graph, region, last + 1)
        && region.next_entry(graph, last + 1) == Some(target)
    {
        let mut parts: Vec<_> = (start..=last)
            .map(|index| jump_part(graph, region, index, false))
            .collect();
        parts.push(jump_part(graph, region, last + 1, true));
        return Some(ConditionChain {
            condition: ConditionSection::Or(parts),
            last: last + 1,
            skip,
        });
    }

    let parts = (start..=last)
        .map(|index| jump_part(graph, region, index, true))
        .collect();
    Some(ConditionChain {
        condition: combine(parts, true),
        last,
        skip: target,
    })
}

/// Recognizes the condition of a loop tested at the bottom, spanning blocks `start..=last`. The
/// last block jumps back to `body_entry`. The result holds when the loop repeats.
pub fn loop_condition(
    graph: &OpcodeGraph,
    region: Region<'_>,
    start: usize,
    last: usize,
    body_entry: BlockId,
) -> Option<ConditionSection> {
    // The first block may be jumped to, the rest must be reached by falling through.
    let target_of = |index: usize| {
        if index == start {
            conditional_target(graph, region.get(index))
        } else {
            chain_link(graph, region, index)
        }
    };
    if target_of(last)? != body_entry {
        return None;
    }
    let targets = (start..last)
        .map(target_of)
        .collect::<Option<Vec<_>>>()?;

    if targets.iter().all(|target| *target == body_entry) {
        let parts = (start..=last)
            .map(|index| jump_part(graph, region, index, false))
            .collect();
        return Some(combine(parts, false));
    }

    let exit = region.next_entry(graph, last)?;
    if targets.iter().all(|target| *target == exit) {
        let mut parts: Vec<_> = (start..last)
            .map(|index| jump_part(graph, region, index, true))
            .collect();
        parts.push(jump_part(graph, region, last, false));
        return Some(ConditionSection::And(parts));
    }

    None
}
