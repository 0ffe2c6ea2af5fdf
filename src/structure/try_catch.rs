use super::{
    BlockSection, CatchSection, GraphProcessor, Recognition, Region, StructureContext, Structurer,
    StructuringError,
};
use crate::graph::{
    BlockId, BlockKind, MarkerKind, TryCatchMarker, handler_binding, handler_scope_end,
};
use crate::insn::Insn;

/// Rebuilds `try`/`catch` statements from the marker triples of the exception table.
///
/// Entries whose try-end markers are adjacent cover the same protected range and become a single
/// statement with one `catch` clause per distinct handler.
pub struct TryCatchBlockProcessor;

fn malformed(entry: usize, reason: &'static str) -> StructuringError {
    StructuringError::MalformedExceptionTable { entry, reason }
}

impl GraphProcessor for TryCatchBlockProcessor {
    fn process(
        &self,
        structurer: &Structurer,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
        index: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<Recognition, StructuringError> {
        let graph = ctx.graph;
        let Some(&start) = graph[region.get(index)].marker() else {
            return Ok(Recognition::NotMatched);
        };
        if start.kind != MarkerKind::Start {
            return Ok(Recognition::NotMatched);
        }

        let mut first_end = region
            .index_of(graph, start.end)
            .filter(|first_end| *first_end > index)
            .ok_or(malformed(start.entry, "try-end marker missing from the region"))?;
        while first_end > index + 1
            && graph[region.get(first_end - 1)].is_marker_of_kind(MarkerKind::End)
        {
            first_end -= 1;
        }

        // A loop whose body starts with the try has to be recognized first.
        let head = graph.entry_block(region.get(index));
        if !ctx.is_loop_head(head)
            && region.blocks[first_end..]
                .iter()
                .any(|id| graph[*id].kind.jump_target() == Some(head))
        {
            return Ok(Recognition::NotMatched);
        }

        let mut pending: Vec<TryCatchMarker> = Vec::new();
        let mut cursor = first_end;
        while cursor < region.len()
            && let Some(&marker) = graph[region.get(cursor)].marker()
            && marker.kind == MarkerKind::End
        {
            pending.push(marker);
            cursor += 1;
        }

        // Every entry ending here must start at the same place, and nothing else may start there.
        let last_start = pending
            .iter()
            .map(|marker| region.index_of(graph, marker.start))
            .try_fold(index, |last, at| match at {
                Some(at) if at >= index && at < first_end => Some(last.max(at)),
                _ => None,
            })
            .ok_or(malformed(start.entry, "try ranges overlap without nesting"))?;
        for id in &region.blocks[index..=last_start] {
            let belongs = graph[*id]
                .marker()
                .is_some_and(|marker| {
                    marker.kind == MarkerKind::Start
                        && pending.iter().any(|other| other.start == *id)
                });
            if !belongs {
                return Err(malformed(start.entry, "try ranges overlap without nesting"));
            }
        }

        let mut body_blocks: Vec<BlockId> = region.blocks[last_start + 1..first_end].to_vec();
        let mut exit = None;
        if let Some(id) = region.blocks.get(cursor).copied() {
            match &graph[id].kind {
                BlockKind::Goto { target } => {
                    body_blocks.push(id);
                    exit = Some(*target);
                    cursor += 1;
                }
                BlockKind::Marker(marker) if marker.kind == MarkerKind::Catch => {}
                BlockKind::Marker(marker) => {
                    return Err(malformed(marker.entry, "unexpected marker after the try body"));
                }
                _ => {
                    body_blocks.push(id);
                    cursor += 1;
                }
            }
        }
        let body = structurer.flatten_or_comment(ctx, Region::new(&body_blocks, exit))?;

        let mut catches = Vec::new();
        while !pending.is_empty() {
            let mut entries = Vec::new();
            while cursor < region.len()
                && let Some(&marker) = graph[region.get(cursor)].marker()
                && marker.kind == MarkerKind::Catch
            {
                let id = region.get(cursor);
                let Some(position) = pending.iter().position(|other| other.catch == id) else {
                    return Err(malformed(marker.entry, "handler of a different try"));
                };
                pending.remove(position);
                entries.push(marker.entry);
                cursor += 1;
            }
            if entries.is_empty() {
                return Err(malformed(pending[0].entry, "handler does not follow the try body"));
            }
            entries.sort_unstable();
            let exceptions = entries
                .iter()
                .map(|entry| ctx.method.exception_table[*entry].class.clone())
                .collect();

            let Some(handler) = region.blocks.get(cursor).copied() else {
                return Err(malformed(entries[0], "handler has no code"));
            };
            let handler_range = graph[handler].instructions.clone();
            let mut header = handler_range.start..handler_range.start;
            let mut local = None;
            let mut binding = None;
            if let Some(index) = handler_binding(&ctx.method.instructions, handler_range.start)
                && index + 1 == handler_range.end
            {
                header = handler_range.clone();
                if let Insn::Store { slot, .. } = ctx.method.instructions[index] {
                    local = ctx.locals.find(slot, index);
                }
                binding = Some(index);
                cursor += 1;
            }

            let stop = if !pending.is_empty() {
                (cursor..region.len())
                    .find(|i| {
                        let id = region.get(*i);
                        graph[id].is_marker_of_kind(MarkerKind::Catch)
                            && pending.iter().any(|other| other.catch == id)
                    })
                    .ok_or(malformed(pending[0].entry, "handler outside of the region"))?
            } else if let Some(exit) = exit {
                region
                    .locate(graph, exit)
                    .filter(|stop| *stop >= cursor)
                    .unwrap_or(region.len())
            } else {
                // Nothing jumps past the handler, so the only hint of where it ends is the last
                // statement using the caught variable.
                binding
                    .and_then(|binding| {
                        handler_scope_end(&ctx.method.instructions, ctx.locals, binding)
                    })
                    .and_then(|end| {
                        (cursor..region.len())
                            .find(|i| graph[region.get(*i)].instructions.start >= end)
                    })
                    .unwrap_or(region.len())
            };

            let follow = exit.or_else(|| region.block_or_follow(stop));
            let body = structurer.flatten_or_comment(ctx, region.sub(cursor..stop, follow))?;
            catches.push(CatchSection {
                exceptions,
                local,
                header,
                body,
            });
            cursor = stop;
        }

        out.push(BlockSection::TryCatch { body, catches });
        Ok(Recognition::Matched { resume: cursor })
    }
}
