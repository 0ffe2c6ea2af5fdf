mod conditions;
mod ifs;
mod loops;
mod switches;
mod try_catch;

pub use self::conditions::{ConditionChain, guard_chain, loop_condition};
pub use self::ifs::IfBlockProcessor;
pub use self::loops::{LoopProcessor, WhileLoopProcessor};
pub use self::switches::SwitchBlockProcessor;
pub use self::try_catch::TryCatchBlockProcessor;
use crate::config::DecompilerConfig;
use crate::graph::{BlockId, BlockKind, OpcodeGraph};
use crate::locals::{LocalId, Locals};
use crate::method::{CatchType, MethodCode};
use crate::utils::ranges_tile;
use core::ops::Range;
use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructuringError {
    #[error("No strategy recognizes the region starting at block {0}")]
    UnrecognizedRegion(BlockId),

    #[error("Jump from block {block} to block {target} does not fit the structure around it")]
    UnresolvedJump { block: BlockId, target: BlockId },

    #[error("Malformed exception table entry {entry}: {reason}")]
    MalformedExceptionTable { entry: usize, reason: &'static str },

    #[error("Regions nest deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("Strategy made no progress at block {0}")]
    NoProgress(BlockId),
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LoopKind {
    /// while
    While,
    /// do-while
    DoWhile,
    /// while (true)
    Infinite,
    /// for
    For,
}

/// A boolean condition assembled from the conditional jumps ending one or more blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConditionSection {
    /// The jump ending a block. The condition holds when the jump is taken, or when it isn't if
    /// `negate` is set.
    Jump {
        instructions: Range<usize>,
        negate: bool,
    },
    And(Vec<ConditionSection>),
    Or(Vec<ConditionSection>),
    Not(Box<ConditionSection>),
}

impl ConditionSection {
    pub fn negated(self) -> Self {
        match self {
            Self::Jump {
                instructions,
                negate,
            } => Self::Jump {
                instructions,
                negate: !negate,
            },
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    fn collect_ranges(&self, out: &mut Vec<Range<usize>>) {
        match self {
            Self::Jump { instructions, .. } => out.push(instructions.clone()),
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_ranges(out);
                }
            }
            Self::Not(inner) => inner.collect_ranges(out),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseSection {
    pub values: Vec<i32>,
    pub is_default: bool,
    pub body: Vec<BlockSection>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatchSection {
    /// In exception table order.
    pub exceptions: Vec<CatchType>,
    /// The variable the exception is stored to. `None` if it's discarded or left on the stack.
    pub local: Option<LocalId>,
    /// The labels and the binding instruction at the start of the handler. Empty if there is no
    /// binding, in which case the body starts with the exception on the stack.
    pub header: Range<usize>,
    pub body: Vec<BlockSection>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockSection {
    /// Straight-line code. A trailing `goto` is implied by the surrounding structure.
    Body {
        instructions: Range<usize>,
    },
    If {
        condition: ConditionSection,
        then: Vec<BlockSection>,
        else_: Vec<BlockSection>,
    },
    Loop {
        kind: LoopKind,
        /// `None` for infinite loops.
        condition: Option<ConditionSection>,
        body: Vec<BlockSection>,
        /// Runs after the body and on `continue`. Only `for` loops have one.
        update: Vec<BlockSection>,
    },
    Switch {
        /// The block computing the key, ending with the switch instruction itself.
        key: Range<usize>,
        cases: Vec<CaseSection>,
    },
    TryCatch {
        body: Vec<BlockSection>,
        catches: Vec<CatchSection>,
    },
    /// Leaves `depth` enclosing breakables in addition to the innermost one.
    Break {
        depth: usize,
        jump: Option<usize>,
    },
    /// Continues the loop `depth` loops out from the innermost one.
    Continue {
        depth: usize,
        jump: Option<usize>,
    },
    /// Code that could not be structured, kept as text.
    Comment {
        lines: Vec<String>,
        instructions: Vec<Range<usize>>,
    },
}

impl BlockSection {
    fn collect_ranges(&self, out: &mut Vec<Range<usize>>) {
        match self {
            Self::Body { instructions } => out.push(instructions.clone()),
            Self::If {
                condition,
                then,
                else_,
            } => {
                condition.collect_ranges(out);
                collect_ranges(then, out);
                collect_ranges(else_, out);
            }
            Self::Loop {
                condition,
                body,
                update,
                ..
            } => {
                if let Some(condition) = condition {
                    condition.collect_ranges(out);
                }
                collect_ranges(body, out);
                collect_ranges(update, out);
            }
            Self::Switch { key, cases } => {
                out.push(key.clone());
                for case in cases {
                    collect_ranges(&case.body, out);
                }
            }
            Self::TryCatch { body, catches } => {
                collect_ranges(body, out);
                for catch in catches {
                    out.push(catch.header.clone());
                    collect_ranges(&catch.body, out);
                }
            }
            Self::Break { jump, .. } | Self::Continue { jump, .. } => {
                out.extend(jump.map(|index| index..index + 1));
            }
            Self::Comment { instructions, .. } => out.extend(instructions.iter().cloned()),
        }
    }
}

fn collect_ranges(sections: &[BlockSection], out: &mut Vec<Range<usize>>) {
    for section in sections {
        section.collect_ranges(out);
    }
}

/// Every instruction range the section tree accounts for, in tree order.
pub fn instruction_ranges(sections: &[BlockSection]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    collect_ranges(sections, &mut out);
    out
}

/// Whether the tree accounts for each of the first `n_instructions` instructions exactly once.
pub fn covers_exactly(sections: &[BlockSection], n_instructions: usize) -> bool {
    ranges_tile(&instruction_ranges(sections), n_instructions)
}

/// An ordered list of blocks to structure, plus the block control reaches once it's done.
#[derive(Clone, Copy, Debug)]
pub struct Region<'r> {
    pub blocks: &'r [BlockId],
    pub follow: Option<BlockId>,
}

impl<'r> Region<'r> {
    pub fn new(blocks: &'r [BlockId], follow: Option<BlockId>) -> Self {
        Self { blocks, follow }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> BlockId {
        self.blocks[index]
    }

    /// The block at `index`, or the follow if `index` is just past the end.
    pub fn block_or_follow(&self, index: usize) -> Option<BlockId> {
        self.blocks.get(index).copied().or(self.follow)
    }

    pub fn sub(&self, range: Range<usize>, follow: Option<BlockId>) -> Region<'r> {
        Region {
            blocks: &self.blocks[range],
            follow,
        }
    }

    /// Regions are always ordered by layout, so this is a binary search.
    pub fn index_of(&self, graph: &OpcodeGraph, id: BlockId) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&graph.position(id), |block| graph.position(*block))
            .ok()
    }

    /// The position control enters the region at when jumping to `id`, which includes any
    /// try-start markers laid out right before it.
    pub fn entry_index(&self, graph: &OpcodeGraph, id: BlockId) -> Option<usize> {
        let mut index = self.index_of(graph, id)?;
        while index > 0 && graph.entry_block(self.blocks[index - 1]) == id {
            index -= 1;
        }
        Some(index)
    }

    /// Like `entry_index`, but reports a jump to the follow as one past the end.
    pub fn locate(&self, graph: &OpcodeGraph, target: BlockId) -> Option<usize> {
        self.entry_index(graph, target).or_else(|| {
            self.follow
                .is_some_and(|follow| graph.entry_block(follow) == target)
                .then_some(self.blocks.len())
        })
    }

    /// The block control falls into after the block at `index`.
    pub fn next_entry(&self, graph: &OpcodeGraph, index: usize) -> Option<BlockId> {
        self.block_or_follow(index + 1)
            .map(|block| graph.entry_block(block))
    }
}

pub enum Recognition {
    Matched { resume: usize },
    NotMatched,
}

/// A recognizer for one kind of construct.
pub trait GraphProcessor: Send + Sync {
    /// Checks whether a construct starts at `region.blocks[index]`. On a match, appends its
    /// section to `out` and returns the index right past the blocks it consumed.
    fn process(
        &self,
        structurer: &Structurer,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
        index: usize,
        out: &mut Vec<BlockSection>,
    ) -> Result<Recognition, StructuringError>;
}

struct Breakable {
    break_to: Option<BlockId>,
    /// `None` for switches.
    continue_to: Option<BlockId>,
}

/// Per-method state of a structuring session.
pub struct StructureContext<'a> {
    pub method: &'a MethodCode,
    pub graph: &'a OpcodeGraph,
    pub locals: &'a Locals,
    pub config: &'a DecompilerConfig,
    breakables: Vec<Breakable>,
    loop_heads: Vec<BlockId>,
    depth: usize,
    /// Nonzero while failures must reach the caller instead of turning into comments.
    strict: usize,
}

impl<'a> StructureContext<'a> {
    pub fn new(
        method: &'a MethodCode,
        graph: &'a OpcodeGraph,
        locals: &'a Locals,
        config: &'a DecompilerConfig,
    ) -> Self {
        Self {
            method,
            graph,
            locals,
            config,
            breakables: Vec::new(),
            loop_heads: Vec::new(),
            depth: 0,
            strict: 0,
        }
    }

    /// Runs `f` with the comment fallback disabled.
    pub fn strictly<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.strict += 1;
        let result = f(self);
        self.strict -= 1;
        result
    }

    /// Whether a loop starting at this block is already being structured.
    pub fn is_loop_head(&self, block: BlockId) -> bool {
        self.loop_heads.contains(&block)
    }

    /// Expresses a jump to `target` as `break` or `continue` of an enclosing construct.
    pub fn resolve_jump(&self, target: BlockId, jump: Option<usize>) -> Option<BlockSection> {
        let leads_to = |block: Option<BlockId>| {
            block.is_some_and(|block| self.graph.entry_block(block) == target)
        };
        let mut loops = 0;
        for (depth, breakable) in self.breakables.iter().rev().enumerate() {
            if leads_to(breakable.break_to) {
                return Some(BlockSection::Break { depth, jump });
            }
            if leads_to(breakable.continue_to) {
                return Some(BlockSection::Continue { depth: loops, jump });
            }
            if breakable.continue_to.is_some() {
                loops += 1;
            }
        }
        None
    }
}

/// Reduces the block graph to a tree of sections by scanning regions left to right. At each
/// position the processors are asked in order whether their construct starts there, and the
/// first to match consumes as many blocks as it needs. Blocks nobody claims are emitted on their
/// own. There is no backtracking across processors.
pub struct Structurer {
    processors: Vec<Box<dyn GraphProcessor>>,
}

impl Default for Structurer {
    fn default() -> Self {
        Self::with_default_processors()
    }
}

impl Structurer {
    pub fn new(processors: Vec<Box<dyn GraphProcessor>>) -> Self {
        Self { processors }
    }

    /// Try/catch goes first because its markers mean nothing to anyone else. Back-edge loops come
    /// before everything that might claim a loop head as its own start.
    pub fn with_default_processors() -> Self {
        Self::new(vec![
            Box::new(TryCatchBlockProcessor),
            Box::new(LoopProcessor),
            Box::new(WhileLoopProcessor),
            Box::new(SwitchBlockProcessor),
            Box::new(IfBlockProcessor),
        ])
    }

    pub fn add_processor(&mut self, processor: Box<dyn GraphProcessor>) {
        self.processors.push(processor);
    }

    /// Structures the whole method.
    pub fn structure(
        &self,
        ctx: &mut StructureContext<'_>,
    ) -> Result<Vec<BlockSection>, StructuringError> {
        let graph = ctx.graph;
        self.flatten_or_comment(ctx, Region::new(graph.order(), None))
    }

    pub fn flatten(
        &self,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
    ) -> Result<Vec<BlockSection>, StructuringError> {
        if ctx.depth >= ctx.config.max_nesting_depth {
            return Err(StructuringError::NestingTooDeep(ctx.config.max_nesting_depth));
        }
        ctx.depth += 1;
        let result = self.scan(ctx, region);
        ctx.depth -= 1;
        result
    }

    fn scan(
        &self,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
    ) -> Result<Vec<BlockSection>, StructuringError> {
        let mut out = Vec::new();
        let mut index = 0;

        'scan: while index < region.len() {
            for processor in &self.processors {
                if let Recognition::Matched { resume } =
                    processor.process(self, ctx, region, index, &mut out)?
                {
                    if resume <= index {
                        return Err(StructuringError::NoProgress(region.get(index)));
                    }
                    index = resume;
                    continue 'scan;
                }
            }
            emit_block(ctx, region, index, &mut out)?;
            index += 1;
        }

        Ok(out)
    }

    /// Structures a nested region, degrading it to a comment on failure if the configuration
    /// allows that.
    pub fn flatten_or_comment(
        &self,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
    ) -> Result<Vec<BlockSection>, StructuringError> {
        match self.flatten(ctx, region) {
            Err(error) if ctx.config.print_opcodes_on_error && ctx.strict == 0 => {
                log::warn!(
                    "{}.{}: emitting {} blocks as a comment: {error}",
                    ctx.method.owner,
                    ctx.method.name,
                    region.len(),
                );
                Ok(vec![comment_section(ctx, region)])
            }
            result => result,
        }
    }

    /// Structures a loop body. `head` is the block back edges jump to.
    pub fn flatten_loop_body(
        &self,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
        head: BlockId,
        break_to: Option<BlockId>,
        continue_to: BlockId,
    ) -> Result<Vec<BlockSection>, StructuringError> {
        ctx.loop_heads.push(head);
        ctx.breakables.push(Breakable {
            break_to,
            continue_to: Some(continue_to),
        });
        let result = self.flatten_or_comment(ctx, region);
        ctx.breakables.pop();
        ctx.loop_heads.pop();
        result
    }

    /// Structures a region `break` can leave, like a switch case.
    pub fn flatten_breakable(
        &self,
        ctx: &mut StructureContext<'_>,
        region: Region<'_>,
        break_to: Option<BlockId>,
    ) -> Result<Vec<BlockSection>, StructuringError> {
        ctx.breakables.push(Breakable {
            break_to,
            continue_to: None,
        });
        let result = self.flatten_or_comment(ctx, region);
        ctx.breakables.pop();
        result
    }
}

/// The fallback for blocks no processor claims.
fn emit_block(
    ctx: &StructureContext<'_>,
    region: Region<'_>,
    index: usize,
    out: &mut Vec<BlockSection>,
) -> Result<(), StructuringError> {
    let graph = ctx.graph;
    let id = region.get(index);
    let block = &graph[id];

    match &block.kind {
        BlockKind::Marker(marker) => Err(StructuringError::MalformedExceptionTable {
            entry: marker.entry,
            reason: "marker outside of the try it belongs to",
        }),
        BlockKind::Body { .. } | BlockKind::Exit => {
            push_body(out, block.instructions.clone());
            Ok(())
        }
        BlockKind::Goto { target } => {
            if region.next_entry(graph, index) == Some(*target) {
                push_body(out, block.instructions.clone());
                return Ok(());
            }
            let jump = block.instructions.end - 1;
            let section = ctx
                .resolve_jump(*target, Some(jump))
                .ok_or(StructuringError::UnresolvedJump {
                    block: id,
                    target: *target,
                })?;
            push_body(out, block.instructions.start..jump);
            out.push(section);
            Ok(())
        }
        BlockKind::Conditional { .. } | BlockKind::Switch { .. } => {
            Err(StructuringError::UnrecognizedRegion(id))
        }
    }
}

fn push_body(out: &mut Vec<BlockSection>, instructions: Range<usize>) {
    if !instructions.is_empty() {
        out.push(BlockSection::Body { instructions });
    }
}

fn comment_section(ctx: &StructureContext<'_>, region: Region<'_>) -> BlockSection {
    let mut lines = Vec::new();
    let mut instructions = Vec::new();
    for id in region.blocks {
        let block = &ctx.graph[*id];
        lines.push(ctx.graph.debug_header(*id));
        lines.extend(
            ctx.method.instructions[block.instructions.clone()]
                .iter()
                .map(|insn| insn.to_string()),
        );
        if !block.instructions.is_empty() {
            instructions.push(block.instructions.clone());
        }
    }
    BlockSection::Comment {
        lines,
        instructions,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::graph::{GraphInput, build_graph, default_producers};
    use crate::insn::{JumpCondition, ValueKind};
    use crate::locals::bind_locals;
    use crate::test_utils::MethodBuilder;
    use proptest::prelude::*;

    pub(crate) struct Structured {
        pub method: MethodCode,
        pub locals: Locals,
        pub result: Result<Vec<BlockSection>, StructuringError>,
    }

    pub(crate) fn structure_with(method: MethodCode, config: &DecompilerConfig) -> Structured {
        let label_indices = method.label_indices().unwrap();
        let locals = bind_locals(&method, &label_indices).unwrap();
        let input = GraphInput {
            method: &method,
            label_indices: &label_indices,
            locals: &locals,
        };
        let graph = build_graph(&input, &default_producers()).unwrap();
        let mut ctx = StructureContext::new(&method, &graph, &locals, config);
        let result = Structurer::with_default_processors().structure(&mut ctx);
        Structured {
            method,
            locals,
            result,
        }
    }

    pub(crate) fn structure(method: MethodCode) -> Structured {
        structure_with(method, &DecompilerConfig::default())
    }

    /// A compact rendering of the section tree that ignores instruction ranges.
    fn shape(sections: &[BlockSection]) -> String {
        let parts: Vec<String> = sections
            .iter()
            .map(|section| match section {
                BlockSection::Body { .. } => "body".to_string(),
                BlockSection::If { then, else_, .. } if else_.is_empty() => {
                    format!("if{{{}}}", shape(then))
                }
                BlockSection::If { then, else_, .. } => {
                    format!("if{{{}}}else{{{}}}", shape(then), shape(else_))
                }
                BlockSection::Loop { kind, body, .. } => format!("{kind}{{{}}}", shape(body)),
                BlockSection::Switch { cases, .. } => {
                    let cases: Vec<_> = cases
                        .iter()
                        .map(|case| format!("case{{{}}}", shape(&case.body)))
                        .collect();
                    format!("switch{{{}}}", cases.join(" "))
                }
                BlockSection::TryCatch { body, catches } => {
                    let catches: Vec<_> = catches
                        .iter()
                        .map(|catch| format!("catch{{{}}}", shape(&catch.body)))
                        .collect();
                    format!("try{{{}}}{}", shape(body), catches.join(""))
                }
                BlockSection::Break { depth, .. } => format!("break{depth}"),
                BlockSection::Continue { depth, .. } => format!("continue{depth}"),
                BlockSection::Comment { .. } => "comment".to_string(),
            })
            .collect();
        parts.join(" ")
    }

    fn shape_of(structured: &Structured) -> String {
        shape(structured.result.as_ref().unwrap())
    }

    pub(crate) fn single_if() -> MethodCode {
        let mut builder = MethodBuilder::new_static("f", "(Z)V");
        let skip = builder.new_label();
        builder
            .load(ValueKind::Int, 0)
            .jump(JumpCondition::Eq, skip)
            .call_static("Test", "body", "()V")
            .place(skip)
            .ret(None);
        builder.finish()
    }

    pub(crate) fn simple_try_catch() -> MethodCode {
        let mut builder = MethodBuilder::new_static("f", "()V");
        let start = builder.label();
        builder.call_static("Test", "risky", "()V");
        let end = builder.label();
        let exit = builder.new_label();
        builder.goto(exit);
        let handler = builder.label();
        builder
            .store(ValueKind::Reference, 1)
            .load(ValueKind::Reference, 1)
            .call_static("Test", "log", "(Ljava/lang/Exception;)V");
        builder.place(exit).ret(None);
        builder.catch(start, end, handler, Some("java/lang/Exception"));
        builder.finish()
    }

    pub(crate) fn multi_catch() -> MethodCode {
        let mut builder = MethodBuilder::new_static("f", "()V");
        let start = builder.label();
        builder.call_static("Test", "risky", "()V");
        let end = builder.label();
        let exit = builder.new_label();
        builder.goto(exit);
        let handler = builder.label();
        builder
            .store(ValueKind::Reference, 0)
            .load(ValueKind::Reference, 0)
            .call_static("Test", "log", "(Ljava/lang/Exception;)V");
        builder.place(exit).ret(None);
        builder.catch(start, end, handler, Some("java/io/IOException"));
        builder.catch(start, end, handler, Some("java/lang/IllegalStateException"));
        builder.finish()
    }

    /// `try { return a(); } catch (Exception e) { log(e); } after(); return 0;`, where nothing
    /// jumps past the handler and there is no local variable table.
    pub(crate) fn catch_without_exit() -> MethodCode {
        let mut builder = MethodBuilder::new_static("f", "()I");
        let start = builder.label();
        builder.call_static("Test", "a", "()I");
        let end = builder.label();
        builder.ret(Some(ValueKind::Int));
        let handler = builder.label();
        builder
            .store(ValueKind::Reference, 0)
            .load(ValueKind::Reference, 0)
            .call_static("Test", "log", "(Ljava/lang/Exception;)V")
            .call_static("Test", "after", "()V")
            .const_int(0)
            .ret(Some(ValueKind::Int));
        builder.catch(start, end, handler, Some("java/lang/Exception"));
        builder.finish()
    }

    /// `for (i = 0; i < n; i++) { try { a(); } catch (Exception e) { continue; } b(); }`
    pub(crate) fn for_with_continue_in_catch() -> MethodCode {
        let mut builder = MethodBuilder::new_static("f", "(I)V");
        let (after, update, test) = (builder.new_label(), builder.new_label(), builder.new_label());
        builder.const_int(0).store(ValueKind::Int, 1).goto(test);
        let start = builder.label();
        builder.call_static("Test", "a", "()V");
        let end = builder.label();
        builder.goto(after);
        let handler = builder.label();
        builder.store(ValueKind::Reference, 2).goto(update);
        builder.place(after).call_static("Test", "b", "()V");
        builder.place(update).increment(1, 1);
        builder
            .place(test)
            .load(ValueKind::Int, 1)
            .load(ValueKind::Int, 0)
            .jump(JumpCondition::ICmpLt, start)
            .ret(None);
        builder.catch(start, end, handler, Some("java/lang/Exception"));
        builder.finish()
    }

    /// The entry's end label comes before its start, so the try-end marker is met first.
    pub(crate) fn unmatched_try_end() -> MethodCode {
        let mut builder = MethodBuilder::new_static("f", "()V");
        let end = builder.label();
        builder.call_static("Test", "a", "()V");
        let start = builder.label();
        builder.call_static("Test", "b", "()V");
        let handler = builder.label();
        builder.pop().ret(None);
        builder.catch(start, end, handler, None);
        builder.finish()
    }

    #[test]
    fn scenario_single_if() {
        let structured = structure(single_if());
        let sections = structured.result.unwrap();
        assert_eq!(
            sections,
            [
                BlockSection::If {
                    condition: ConditionSection::Jump {
                        instructions: 0..2,
                        negate: true,
                    },
                    then: vec![BlockSection::Body { instructions: 2..3 }],
                    else_: vec![],
                },
                BlockSection::Body { instructions: 3..5 },
            ],
        );
    }

    #[test]
    fn scenario_simple_try_catch() {
        let structured = structure(simple_try_catch());
        let sections = structured.result.unwrap();
        assert_eq!(sections.len(), 2);
        let BlockSection::TryCatch { body, catches } = &sections[0] else {
            panic!("expected try/catch, got {sections:?}");
        };
        assert_eq!(shape(body), "body body");
        assert_eq!(catches.len(), 1);

        let catch = &catches[0];
        assert_eq!(
            catch.exceptions,
            [CatchType::Class("java/lang/Exception".to_string())],
        );
        let local = &structured.locals[catch.local.unwrap()];
        assert_eq!(local.slot, 1);
        assert_eq!(local.descriptor, "Ljava/lang/Exception;");
        assert_eq!(catch.header, 4..6);
        assert_eq!(instruction_ranges(&catch.body), [6..8]);
    }

    #[test]
    fn scenario_multi_catch() {
        let structured = structure(multi_catch());
        let sections = structured.result.unwrap();
        let BlockSection::TryCatch { catches, .. } = &sections[0] else {
            panic!("expected try/catch, got {sections:?}");
        };
        assert_eq!(catches.len(), 1);
        assert_eq!(
            catches[0].exceptions,
            [
                CatchType::Class("java/io/IOException".to_string()),
                CatchType::Class("java/lang/IllegalStateException".to_string()),
            ],
        );
        assert!(catches[0].local.is_some());
    }

    #[test]
    fn distinct_handlers_of_one_range() {
        // try { risky(); } catch (IOException e) { a(e); } catch (RuntimeException e) { b(e); }
        let mut builder = MethodBuilder::new_static("f", "()V");
        let start = builder.label();
        builder.call_static("Test", "risky", "()V");
        let end = builder.label();
        let exit = builder.new_label();
        builder.goto(exit);
        let io = builder.label();
        builder
            .store(ValueKind::Reference, 0)
            .load(ValueKind::Reference, 0)
            .call_static("Test", "a", "(Ljava/io/IOException;)V")
            .goto(exit);
        let runtime = builder.label();
        builder
            .store(ValueKind::Reference, 0)
            .load(ValueKind::Reference, 0)
            .call_static("Test", "b", "(Ljava/lang/RuntimeException;)V");
        builder.place(exit).ret(None);
        builder.catch(start, end, io, Some("java/io/IOException"));
        builder.catch(start, end, runtime, Some("java/lang/RuntimeException"));

        let structured = structure(builder.finish());
        assert_eq!(shape_of(&structured), "try{body body}catch{body}catch{body} body");
        let sections = structured.result.unwrap();
        let BlockSection::TryCatch { catches, .. } = &sections[0] else {
            unreachable!();
        };
        let exceptions: Vec<_> = catches.iter().map(|catch| catch.exceptions.clone()).collect();
        assert_eq!(
            exceptions,
            [
                vec![CatchType::Class("java/io/IOException".to_string())],
                vec![CatchType::Class("java/lang/RuntimeException".to_string())],
            ],
        );
        assert!(catches.iter().all(|catch| catch.local.is_some()));
        assert!(covers_exactly(&sections, structured.method.instructions.len()));
    }

    #[test]
    fn catch_reading_variable_without_exit() {
        let structured = structure(catch_without_exit());
        assert_eq!(shape_of(&structured), "try{body body}catch{body} body");
        let sections = structured.result.unwrap();
        let BlockSection::TryCatch { catches, .. } = &sections[0] else {
            unreachable!();
        };
        // aload, invokestatic log: the statement using the variable, and nothing after it.
        assert_eq!(instruction_ranges(&catches[0].body), [6..8]);
        assert_eq!(instruction_ranges(&sections[1..]), [8..11]);
    }

    #[test]
    fn for_update_is_continue_target() {
        let structured = structure(for_with_continue_in_catch());
        assert_eq!(
            shape_of(&structured),
            "body for{try{body body}catch{continue0} body} body",
        );
        let sections = structured.result.unwrap();
        let BlockSection::Loop { update, .. } = &sections[1] else {
            unreachable!();
        };
        assert_eq!(instruction_ranges(update), [12..14]);
        assert!(covers_exactly(&sections, structured.method.instructions.len()));
    }

    #[test]
    fn while_keeps_trailing_merge_point() {
        // while (i < 10) { if (p) a(); i++; } has the same layout as a `for` loop whose update
        // nothing jumps to from an unstructurable place.
        let mut builder = MethodBuilder::new_static("f", "(ZI)V");
        let (body, join, test) = (builder.new_label(), builder.new_label(), builder.new_label());
        builder.goto(test).place(body);
        builder
            .load(ValueKind::Int, 0)
            .jump(JumpCondition::Eq, join)
            .call_static("Test", "a", "()V");
        builder.place(join).increment(1, 1);
        builder
            .place(test)
            .load(ValueKind::Int, 1)
            .const_int(10)
            .jump(JumpCondition::ICmpLt, body)
            .ret(None);
        assert_eq!(shape_of(&structure(builder.finish())), "body while{if{body} body} body");
    }

    #[test]
    fn scenario_malformed_table() {
        let structured = structure(unmatched_try_end());
        assert!(matches!(
            structured.result,
            Err(StructuringError::MalformedExceptionTable { entry: 0, .. }),
        ));
    }

    #[test]
    fn comment_fallback() {
        let config = DecompilerConfig::default().with_opcodes_on_error(true);
        let structured = structure_with(unmatched_try_end(), &config);
        let sections = structured.result.unwrap();
        let [BlockSection::Comment { lines, .. }] = sections.as_slice() else {
            panic!("expected a comment, got {sections:?}");
        };
        assert!(lines.iter().any(|line| line == "invokestatic Test.a()V"));
        assert!(lines.iter().any(|line| line.contains("try-end of exception entry 0")));
        assert!(covers_exactly(&sections, structured.method.instructions.len()));
    }

    #[test]
    fn if_else() {
        let mut builder = MethodBuilder::new_static("f", "(Z)V");
        let (other, exit) = (builder.new_label(), builder.new_label());
        builder
            .load(ValueKind::Int, 0)
            .jump(JumpCondition::Eq, other)
            .call_static("Test", "a", "()V")
            .goto(exit)
            .place(other)
            .call_static("Test", "b", "()V")
            .place(exit)
            .ret(None);
        assert_eq!(shape_of(&structure(builder.finish())), "if{body}else{body} body");
    }

    #[test]
    fn and_chain() {
        let mut builder = MethodBuilder::new_static("f", "(ZZ)V");
        let skip = builder.new_label();
        builder
            .load(ValueKind::Int, 0)
            .jump(JumpCondition::Eq, skip)
            .load(ValueKind::Int, 1)
            .jump(JumpCondition::Eq, skip)
            .call_static("Test", "a", "()V")
            .place(skip)
            .ret(None);
        let structured = structure(builder.finish());
        let sections = structured.result.unwrap();
        let BlockSection::If { condition, .. } = &sections[0] else {
            panic!("expected if, got {sections:?}");
        };
        assert!(matches!(condition, ConditionSection::And(parts) if parts.len() == 2));
    }

    #[test]
    fn or_chain() {
        let mut builder = MethodBuilder::new_static("f", "(ZZ)V");
        let (body, skip) = (builder.new_label(), builder.new_label());
        builder
            .load(ValueKind::Int, 0)
            .jump(JumpCondition::Ne, body)
            .load(ValueKind::Int, 1)
            .jump(JumpCondition::Eq, skip)
            .place(body)
            .call_static("Test", "a", "()V")
            .place(skip)
            .ret(None);
        let structured = structure(builder.finish());
        let sections = structured.result.unwrap();
        let BlockSection::If { condition, then, .. } = &sections[0] else {
            panic!("expected if, got {sections:?}");
        };
        let ConditionSection::Or(parts) = condition else {
            panic!("expected ||, got {condition:?}");
        };
        assert!(matches!(parts[0], ConditionSection::Jump { negate: false, .. }));
        assert!(matches!(parts[1], ConditionSection::Jump { negate: true, .. }));
        assert_eq!(shape(then), "body");
    }

    /// `while (i < 10) { i++; }` the way javac lays it out, with the test at the bottom.
    #[test]
    fn bottom_tested_while() {
        let mut builder = MethodBuilder::new_static("f", "(I)V");
        let (body, test) = (builder.new_label(), builder.new_label());
        builder.goto(test).place(body).increment(0, 1);
        builder
            .place(test)
            .load(ValueKind::Int, 0)
            .const_int(10)
            .jump(JumpCondition::ICmpLt, body)
            .ret(None);
        let structured = structure(builder.finish());
        assert_eq!(shape_of(&structured), "body while{body} body");
        assert!(covers_exactly(
            structured.result.as_ref().unwrap(),
            structured.method.instructions.len(),
        ));
    }

    #[test]
    fn do_while() {
        let mut builder = MethodBuilder::new_static("f", "(I)V");
        let head = builder.label();
        builder
            .call_static("Test", "a", "()V")
            .increment(0, 1)
            .load(ValueKind::Int, 0)
            .const_int(10)
            .jump(JumpCondition::ICmpLt, head)
            .ret(None);
        let structured = structure(builder.finish());
        let sections = structured.result.unwrap();
        assert_eq!(shape(&sections), "do-while{} body");
        let BlockSection::Loop { condition, .. } = &sections[0] else {
            unreachable!();
        };
        assert_eq!(
            condition,
            &Some(ConditionSection::Jump {
                instructions: 0..6,
                negate: false,
            }),
        );
    }

    #[test]
    fn infinite_loop_with_break_and_continue() {
        let mut builder = MethodBuilder::new_static("f", "(Z)V");
        let (head, skip, exit) = (builder.label(), builder.new_label(), builder.new_label());
        builder
            .call_static("Test", "a", "()Z")
            .jump(JumpCondition::Eq, skip)
            .goto(exit)
            .place(skip)
            .load(ValueKind::Int, 0)
            .jump(JumpCondition::Ne, head)
            .call_static("Test", "b", "()V")
            .goto(head)
            .place(exit)
            .ret(None);
        assert_eq!(
            shape_of(&structure(builder.finish())),
            "while (true){if{break0} if{continue0} body} body",
        );
    }

    #[test]
    fn switch_with_break() {
        let mut builder = MethodBuilder::new_static("f", "(I)V");
        let (one, two, other, end) = (
            builder.new_label(),
            builder.new_label(),
            builder.new_label(),
            builder.new_label(),
        );
        builder.load(ValueKind::Int, 0).switch(&[(1, one), (2, two)], other);
        builder.place(one).call_static("Test", "one", "()V").goto(end);
        builder.place(two).call_static("Test", "two", "()V");
        builder.place(other).call_static("Test", "other", "()V");
        builder.place(end).ret(None);
        let structured = structure(builder.finish());
        let sections = structured.result.unwrap();
        assert_eq!(shape(&sections), "switch{case{body break0} case{body} case{body}} body");

        let BlockSection::Switch { cases, .. } = &sections[0] else {
            unreachable!();
        };
        let labels: Vec<_> = cases
            .iter()
            .map(|case| (case.values.clone(), case.is_default))
            .collect();
        assert_eq!(labels, [(vec![1], false), (vec![2], false), (vec![], true)]);
    }

    #[test]
    fn nested_try_in_catch_and_loop() {
        // while (true) { try { a(); } catch (Exception e) { try { b(); } catch (Error e) {} } }
        let mut builder = MethodBuilder::new_static("f", "()V");
        let head = builder.label();
        builder.call_static("Test", "a", "()V");
        let end = builder.label();
        builder.goto(head);
        let handler = builder.label();
        builder.store(ValueKind::Reference, 0);
        let inner_start = builder.label();
        builder.call_static("Test", "b", "()V");
        let inner_end = builder.label();
        builder.goto(head);
        let inner_handler = builder.label();
        builder.pop().goto(head);
        builder.catch(inner_start, inner_end, inner_handler, Some("java/lang/Error"));
        builder.catch(head, end, handler, Some("java/lang/Exception"));
        let structured = structure(builder.finish());
        assert_eq!(
            shape_of(&structured),
            "while (true){try{body body}catch{try{body body}catch{body}}}",
        );
        assert!(covers_exactly(
            structured.result.as_ref().unwrap(),
            structured.method.instructions.len(),
        ));
    }

    #[test]
    fn return_inside_try() {
        // try { return a(); } catch (Exception e) { return 0; }
        let mut builder = MethodBuilder::new_static("f", "()I");
        let start = builder.label();
        builder.call_static("Test", "a", "()I");
        let end = builder.label();
        builder.ret(Some(ValueKind::Int));
        let handler = builder.label();
        builder.store(ValueKind::Reference, 0).const_int(0).ret(Some(ValueKind::Int));
        builder.catch(start, end, handler, Some("java/lang/Exception"));
        assert_eq!(shape_of(&structure(builder.finish())), "try{body body}catch{body}");
    }

    #[test]
    fn nesting_limit() {
        let config = DecompilerConfig::default().with_max_nesting_depth(1);
        let structured = structure_with(single_if(), &config);
        assert!(matches!(
            structured.result,
            Err(StructuringError::NestingTooDeep(1)),
        ));
    }

    #[test]
    fn idempotent_rescan() {
        let method = simple_try_catch();
        let label_indices = method.label_indices().unwrap();
        let locals = bind_locals(&method, &label_indices).unwrap();
        let input = GraphInput {
            method: &method,
            label_indices: &label_indices,
            locals: &locals,
        };
        let graph = build_graph(&input, &default_producers()).unwrap();
        let config = DecompilerConfig::default();
        let structurer = Structurer::with_default_processors();

        let mut ctx = StructureContext::new(&method, &graph, &locals, &config);
        let first = structurer.structure(&mut ctx).unwrap();
        let mut ctx = StructureContext::new(&method, &graph, &locals, &config);
        let second = structurer.structure(&mut ctx).unwrap();
        assert_eq!(first, second);
    }

    /// Builds `if (p0) { a(); } else { ... }` chains and sequences of try/catch statements,
    /// nested according to `ops`.
    fn emit_statements(builder: &mut MethodBuilder, ops: &[u8]) {
        for (i, op) in ops.iter().enumerate() {
            match op % 4 {
                0 => {
                    builder.call_static("Test", "a", "()V");
                }
                1 => {
                    let skip = builder.new_label();
                    builder.load(ValueKind::Int, 0).jump(JumpCondition::Eq, skip);
                    emit_statements(builder, &ops[i + 1..]);
                    builder.place(skip);
                    return;
                }
                2 => {
                    let start = builder.label();
                    builder.call_static("Test", "risky", "()V");
                    let end = builder.label();
                    let exit = builder.new_label();
                    builder.goto(exit);
                    let handler = builder.label();
                    builder.store(ValueKind::Reference, 1);
                    builder.load(ValueKind::Reference, 1).pop();
                    builder.place(exit);
                    builder.catch(start, end, handler, Some("java/lang/Exception"));
                }
                _ => {
                    let (other, exit) = (builder.new_label(), builder.new_label());
                    builder.load(ValueKind::Int, 0).jump(JumpCondition::Ne, other);
                    builder.call_static("Test", "b", "()V").goto(exit);
                    builder.place(other).call_static("Test", "c", "()V");
                    builder.place(exit);
                }
            }
        }
    }

    fn count_markers(sections: &[BlockSection]) -> usize {
        sections
            .iter()
            .map(|section| match section {
                BlockSection::TryCatch { body, catches } => {
                    1 + count_markers(body)
                        + catches
                            .iter()
                            .map(|catch| count_markers(&catch.body))
                            .sum::<usize>()
                }
                BlockSection::If { then, else_, .. } => count_markers(then) + count_markers(else_),
                _ => 0,
            })
            .sum()
    }

    proptest! {
        #[test]
        fn structured_trees_cover_code(ops in proptest::collection::vec(any::<u8>(), 0..12)) {
            let mut builder = MethodBuilder::new_static("f", "(Z)V");
            emit_statements(&mut builder, &ops);
            builder.ret(None);
            let method = builder.finish();
            let n_entries = method.exception_table.len();
            let structured = structure(method);
            let sections = structured.result.unwrap();

            prop_assert!(covers_exactly(&sections, structured.method.instructions.len()));
            // Each entry here is its own try, so each try/catch consumes exactly one triple.
            prop_assert_eq!(count_markers(&sections), n_entries);
        }
    }
}
