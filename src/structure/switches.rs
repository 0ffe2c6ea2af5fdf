use super::{
    BlockSection, CaseSection, GraphProcessor, Recognition, Region, StructureContext, Structurer,
    StructuringError,
};
use crate::graph::BlockKind;
use std::collections::BTreeMap;

/// `tableswitch`/`lookupswitch` with case bodies laid out in order after the switch.
pub struct SwitchBlockProcessor;

struct CaseLabels {
    values: Vec<i32>,
    is_default: bool,
}

impl GraphProcessor for SwitchBlockProcessor {
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
        let BlockKind::Switch { arms, default } = &graph[id].kind else {
            return Ok(Recognition::NotMatched);
        };

        let locate = |target| region.locate(graph, target).filter(|at| *at > index);
        let Some(default_at) = locate(*default) else {
            return Ok(Recognition::NotMatched);
        };
        let Some(arms) = arms
            .iter()
            .map(|(value, target)| Some((*value, locate(*target)?)))
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(Recognition::NotMatched);
        };

        let first_case = arms.iter().map(|(_, at)| *at).fold(default_at, usize::min);
        let last_case = arms.iter().map(|(_, at)| *at).fold(default_at, usize::max);
        if first_case != index + 1 {
            return Ok(Recognition::NotMatched);
        }

        // A `break` from any case but the last jumps past the switch. Without one, the default
        // label pointing right after the last case marks the end, if no case claims that spot.
        let end = (first_case..last_case)
            .filter_map(|i| match graph[region.get(i)].kind {
                BlockKind::Goto { target } => region.locate(graph, target),
                _ => None,
            })
            .filter(|at| *at >= last_case)
            .min()
            .or_else(|| {
                (default_at == last_case && arms.iter().all(|(_, at)| *at != last_case))
                    .then_some(last_case)
            })
            .unwrap_or(region.len());
        if last_case > end {
            return Ok(Recognition::NotMatched);
        }

        let mut labels: BTreeMap<usize, CaseLabels> = BTreeMap::new();
        let mut jumps_to_end = Vec::new();
        for (value, at) in &arms {
            if *at == end {
                jumps_to_end.push(*value);
                continue;
            }
            labels
                .entry(*at)
                .or_insert_with(|| CaseLabels {
                    values: Vec::new(),
                    is_default: false,
                })
                .values
                .push(*value);
        }
        let has_default = default_at < end;
        if has_default {
            labels
                .entry(default_at)
                .or_insert_with(|| CaseLabels {
                    values: Vec::new(),
                    is_default: false,
                })
                .is_default = true;
        }

        let break_to = region.block_or_follow(end);
        let starts: Vec<usize> = labels.keys().copied().collect();
        let mut cases = Vec::with_capacity(labels.len() + 1);
        for (i, (start, case)) in labels.into_iter().enumerate() {
            let stop = starts.get(i + 1).copied().unwrap_or(end);
            let body = structurer.flatten_breakable(
                ctx,
                region.sub(start..stop, region.block_or_follow(stop)),
                break_to,
            )?;
            cases.push(CaseSection {
                values: case.values,
                is_default: case.is_default,
                body,
            });
        }
        if has_default && !jumps_to_end.is_empty() {
            cases.push(CaseSection {
                values: jumps_to_end,
                is_default: false,
                body: vec![BlockSection::Break {
                    depth: 0,
                    jump: None,
                }],
            });
        }

        out.push(BlockSection::Switch {
            key: graph[id].instructions.clone(),
            cases,
        });
        Ok(Recognition::Matched { resume: end })
    }
}
