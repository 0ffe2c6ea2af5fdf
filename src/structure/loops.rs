use super::{
    BlockSection, ConditionSection, GraphProcessor, LoopKind, Recognition, Region,
    StructureContext, Structurer, StructuringError, guard_chain, loop_condition,
};
use crate::graph::{BlockId, BlockKind, OpcodeGraph};

/// Loops detected by their back edge: a later block in the region jumping to the current one.
///
/// A conditional back edge makes a `do`/`while` loop, a `goto` back edge either a `while` loop
/// tested at the top or an infinite loop.
pub struct LoopProcessor;

impl GraphProcessor for LoopProcessor {
    fn process(
        &self,
        structurer: &Structurer,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
        index: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<Recognition, StructuringError> {
        let graph = ctx.graph;
        let head = graph.entry_block(region.get(index));
        if ctx.is_loop_head(head) {
            return Ok(Recognition::NotMatched);
        }
        let Some(tail) = (index..region.len())
            .rev()
            .find(|i| graph[region.get(*i)].kind.jump_target() == Some(head))
        else {
            return Ok(Recognition::NotMatched);
        };
        let break_to = region.block_or_follow(tail + 1);

        if let BlockKind::Conditional { .. } = graph[region.get(tail)].kind {
            // Prefer the longest condition: its first block is the `continue` target.
            let Some((cond_start, condition)) = (index..=tail)
                .find_map(|start| Some((start, loop_condition(graph, region, start, tail, head)?)))
            else {
                return Ok(Recognition::NotMatched);
            };
            let continue_to = region.get(cond_start);
            let body = structurer.flatten_loop_body(
                ctx,
                region.sub(index..cond_start, Some(continue_to)),
                head,
                break_to,
                continue_to,
            )?;
            out.push(BlockSection::Loop {
                kind: LoopKind::DoWhile,
                condition: Some(condition),
                body,
                update: Vec::new(),
            });
            return Ok(Recognition::Matched { resume: tail + 1 });
        }

        let follow = Some(region.get(index));
        let guard = guard_chain(graph, region, index).filter(|chain| {
            chain.last < tail && break_to.map(|block| graph.entry_block(block)) == Some(chain.skip)
        });
        let section = match guard {
            Some(chain) => {
                let body = structurer.flatten_loop_body(
                    ctx,
                    region.sub(chain.last + 1..tail + 1, follow),
                    head,
                    break_to,
                    head,
                )?;
                BlockSection::Loop {
                    kind: LoopKind::While,
                    condition: Some(chain.condition),
                    body,
                    update: Vec::new(),
                }
            }
            None => {
                let body = structurer.flatten_loop_body(
                    ctx,
                    region.sub(index..tail + 1, follow),
                    head,
                    break_to,
                    head,
                )?;
                BlockSection::Loop {
                    kind: LoopKind::Infinite,
                    condition: None,
                    body,
                    update: Vec::new(),
                }
            }
        };
        out.push(section);
        Ok(Recognition::Matched { resume: tail + 1 })
    }
}

/// The layout javac uses for `while` and `for`: jump to the condition at the bottom, which jumps
/// back to the top of the body.
///
/// A `for` loop's update sits right before the condition and is where `continue` jumps to. That
/// is indistinguishable from a `while` body ending in the same statements, so the update is only
/// split off when some jump to it can't be structured otherwise.
pub struct WhileLoopProcessor;

impl WhileLoopProcessor {
    /// Finds the longest condition starting at `cond_at`.
    fn condition(
        graph: &OpcodeGraph,
        region: Region<'_>,
        cond_at: usize,
        body_entry: BlockId,
    ) -> Option<(usize, ConditionSection)> {
        let mut run_end = cond_at;
        while run_end + 1 < region.len()
            && let BlockKind::Conditional { .. } = graph[region.get(run_end + 1)].kind
            && !graph.is_jump_target(region.get(run_end + 1))
        {
            run_end += 1;
        }
        (cond_at..=run_end).rev().find_map(|last| {
            let condition = loop_condition(graph, region, cond_at, last, body_entry)?;
            Some((last, condition))
        })
    }

    /// The first block of the trailing run of plain blocks that fall straight into the condition.
    /// The body keeps at least one block.
    fn update_run(
        graph: &OpcodeGraph,
        region: Region<'_>,
        body_start: usize,
        cond_at: usize,
    ) -> usize {
        let mut start = cond_at;
        while start > body_start + 1
            && let BlockKind::Body { .. } = graph[region.get(start - 1)].kind
        {
            start -= 1;
        }
        start
    }
}

impl GraphProcessor for WhileLoopProcessor {
    fn process(
        &self,
        structurer: &Structurer,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
        index: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<Recognition, StructuringError> {
        let graph = ctx.graph;
        let id = region.get(index);
        let BlockKind::Goto { target } = graph[id].kind else {
            return Ok(Recognition::NotMatched);
        };
        let Some(cond_at) = region
            .locate(graph, target)
            .filter(|cond_at| *cond_at > index && *cond_at < region.len())
        else {
            return Ok(Recognition::NotMatched);
        };
        let Some(body_entry) = region.next_entry(graph, index) else {
            return Ok(Recognition::NotMatched);
        };
        let Some((last, condition)) = Self::condition(graph, region, cond_at, body_entry) else {
            return Ok(Recognition::NotMatched);
        };

        let test = region.get(cond_at);
        let break_to = region.block_or_follow(last + 1);
        let while_body = |ctx: &mut StructureContext<'_>| {
            structurer.flatten_loop_body(
                ctx,
                region.sub(index + 1..cond_at, Some(test)),
                test,
                break_to,
                test,
            )
        };

        let update_run = Self::update_run(graph, region, index + 1, cond_at);
        let mut update_at = cond_at;
        let mut body = None;
        if update_run < cond_at {
            match ctx.strictly(while_body) {
                Ok(sections) => body = Some(sections),
                Err(StructuringError::UnresolvedJump { target, .. }) => {
                    if let Some(at) = (update_run..cond_at)
                        .find(|at| graph.entry_block(region.get(*at)) == target)
                    {
                        update_at = at;
                    }
                }
                Err(_) => {}
            }
        }

        let (kind, body, update) = match body {
            Some(body) => (LoopKind::While, body, Vec::new()),
            None if update_at < cond_at => {
                let update_entry = region.get(update_at);
                let body = structurer.flatten_loop_body(
                    ctx,
                    region.sub(index + 1..update_at, Some(update_entry)),
                    test,
                    break_to,
                    update_entry,
                )?;
                let update = structurer.flatten(ctx, region.sub(update_at..cond_at, Some(test)))?;
                (LoopKind::For, body, update)
            }
            None => (LoopKind::While, while_body(ctx)?, Vec::new()),
        };

        out.push(BlockSection::Body {
            instructions: graph[id].instructions.clone(),
        });
        out.push(BlockSection::Loop {
            kind,
            condition: Some(condition),
            body,
            update,
        });
        Ok(Recognition::Matched { resume: last + 1 })
    }
}
