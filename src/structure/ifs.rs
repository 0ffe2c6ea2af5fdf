use super::{
    BlockSection, GraphProcessor, Recognition, Region, StructureContext, Structurer,
    StructuringError, guard_chain,
};
use crate::graph::BlockKind;

/// `if` and `if`/`else`, including conditions that jump straight out of an enclosing loop or
/// switch.
pub struct IfBlockProcessor;

impl GraphProcessor for IfBlockProcessor {
    fn process(
        &self,
        structurer: &Structurer,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
        index: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<Recognition, StructuringError> {
        let graph = ctx.graph;
        let Some(chain) = guard_chain(graph, region, index) else {
            return Ok(Recognition::NotMatched);
        };
        let then_start = chain.last + 1;

        let skip_at = match region.locate(graph, chain.skip) {
            Some(skip_at) if skip_at >= then_start => skip_at,
            _ => {
                // `if (cond) break;` jumps directly to the loop exit.
                let Some(jump) = ctx.resolve_jump(chain.skip, None) else {
                    return Ok(Recognition::NotMatched);
                };
                out.push(BlockSection::If {
                    condition: chain.condition.negated(),
                    then: vec![jump],
                    else_: Vec::new(),
                });
                return Ok(Recognition::Matched { resume: then_start });
            }
        };

        // The then branch of an if/else ends by jumping over the else branch.
        let exit_at = if skip_at > then_start && skip_at < region.len() {
            match graph[region.get(skip_at - 1)].kind {
                BlockKind::Goto { target } => region
                    .locate(graph, target)
                    .filter(|exit_at| *exit_at > skip_at),
                _ => None,
            }
        } else {
            None
        };

        let follow = region.block_or_follow(exit_at.unwrap_or(skip_at));
        let then = structurer.flatten_or_comment(ctx, region.sub(then_start..skip_at, follow))?;
        let (else_, resume) = match exit_at {
            Some(exit_at) => (
                structurer.flatten_or_comment(ctx, region.sub(skip_at..exit_at, follow))?,
                exit_at,
            ),
            None => (Vec::new(), skip_at),
        };

        out.push(BlockSection::If {
            condition: chain.condition,
            then,
            else_,
        });
        Ok(Recognition::Matched { resume })
    }
}
