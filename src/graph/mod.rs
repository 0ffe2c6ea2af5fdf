mod exceptions;
mod insn_control_flow;
mod jumps;

pub use self::exceptions::{TryCatchGraphProducer, handler_binding, handler_scope_end};
pub use self::jumps::{InternalJumpGraphProducer, SwitchGraphProducer};
use crate::insn::{JumpCondition, Label};
use crate::locals::Locals;
use crate::method::{MethodCode, MethodCodeError, label_index};
use core::ops::{Index, Range};
use displaydoc::Display;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use thiserror::Error;

pub type BlockId = usize;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    MethodCode(#[from] MethodCodeError),

    #[error("Label {0} does not start a block")]
    MisalignedTarget(Label),

    #[error("Execution falls through past the end of the code at instruction {0}")]
    CodeFallthrough(usize),
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// try-start
    Start,
    /// try-end
    End,
    /// catch
    Catch,
}

/// One of the three zero-instruction blocks generated for each exception table entry. Every
/// marker of a triple knows the IDs of all three.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TryCatchMarker {
    pub kind: MarkerKind,
    /// Index into the exception table.
    pub entry: usize,
    pub start: BlockId,
    pub end: BlockId,
    pub catch: BlockId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Straight-line code. `next` is `None` only for the last block.
    Body { next: Option<BlockId> },
    Goto { target: BlockId },
    Conditional {
        condition: JumpCondition,
        target: BlockId,
        fallthrough: BlockId,
    },
    Switch {
        arms: Vec<(i32, BlockId)>,
        default: BlockId,
    },
    /// Ends with `return` or `athrow`.
    Exit,
    Marker(TryCatchMarker),
}

impl BlockKind {
    pub fn jump_target(&self) -> Option<BlockId> {
        match self {
            Self::Goto { target } | Self::Conditional { target, .. } => Some(*target),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpcodeBlock {
    /// Empty for markers, positioned at the start of the block the marker precedes.
    pub instructions: Range<usize>,
    pub kind: BlockKind,
}

impl OpcodeBlock {
    pub fn marker(&self) -> Option<&TryCatchMarker> {
        match &self.kind {
            BlockKind::Marker(marker) => Some(marker),
            _ => None,
        }
    }

    pub fn is_marker_of_kind(&self, kind: MarkerKind) -> bool {
        self.marker().is_some_and(|marker| marker.kind == kind)
    }
}

#[derive(Debug, Default)]
pub struct OpcodeGraph {
    blocks: Vec<OpcodeBlock>,
    /// Blocks `0..n_code_blocks` hold code and are sorted by position; markers come after.
    n_code_blocks: usize,
    order: Vec<BlockId>,
    /// Position of each block in `order`.
    positions: Vec<usize>,
    jump_targets: Vec<bool>,
}

impl OpcodeGraph {
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn position(&self, id: BlockId) -> usize {
        self.positions[id]
    }

    /// Whether any jump or switch lands on this block. Fallthrough doesn't count.
    pub fn is_jump_target(&self, id: BlockId) -> bool {
        self.jump_targets[id]
    }

    pub fn n_code_blocks(&self) -> usize {
        self.n_code_blocks
    }

    pub fn block_starting_at(&self, index: usize) -> Option<BlockId> {
        // We could use a hashmap here, but blocks are already sorted by position, so binary
        // search is just as good.
        self.blocks[..self.n_code_blocks]
            .binary_search_by_key(&index, |block| block.instructions.start)
            .ok()
    }

    pub fn label_block(&self, input: &GraphInput<'_>, label: Label) -> Result<BlockId, GraphError> {
        let index = input.label_index(label)?;
        self.block_starting_at(index)
            .ok_or(GraphError::MisalignedTarget(label))
    }

    pub fn next_code_block(&self, id: BlockId) -> Option<BlockId> {
        (id + 1 < self.n_code_blocks).then_some(id + 1)
    }

    pub fn set_kind(&mut self, id: BlockId, kind: BlockKind) {
        self.blocks[id].kind = kind;
    }

    /// Allocates the marker triple of exception table entry `entry` and splices each marker
    /// directly before the block it annotates. A marker inserted later at the same position ends
    /// up closer to the block.
    pub fn insert_marker_triple(&mut self, entry: usize, targets: [BlockId; 3]) -> [BlockId; 3] {
        let first = self.blocks.len();
        let ids = [first, first + 1, first + 2];
        let kinds = [MarkerKind::Start, MarkerKind::End, MarkerKind::Catch];

        for (kind, target) in kinds.into_iter().zip(targets) {
            let at = self.blocks[target].instructions.start;
            let id = self.blocks.len();
            self.blocks.push(OpcodeBlock {
                instructions: at..at,
                kind: BlockKind::Marker(TryCatchMarker {
                    kind,
                    entry,
                    start: ids[0],
                    end: ids[1],
                    catch: ids[2],
                }),
            });
            let position = self
                .order
                .iter()
                .position(|other| *other == target)
                .expect("marker target missing from block order");
            self.order.insert(position, id);
        }

        ids
    }

    /// The block control actually enters when reaching `id`: try-start markers are transparent.
    pub fn entry_block(&self, mut id: BlockId) -> BlockId {
        while self.blocks[id].is_marker_of_kind(MarkerKind::Start) {
            match self.order.get(self.positions[id] + 1) {
                Some(next) => id = *next,
                None => break,
            }
        }
        id
    }

    /// A one-line description of a block, used in comments for unstructured regions.
    pub fn debug_header(&self, id: BlockId) -> String {
        let block = &self.blocks[id];
        let range = &block.instructions;
        match &block.kind {
            BlockKind::Marker(marker) => {
                format!("block {id}: {} of exception entry {}", marker.kind, marker.entry)
            }
            BlockKind::Body { next: Some(next) } => {
                format!("block {id} [{}..{}): fallthrough -> {next}", range.start, range.end)
            }
            BlockKind::Body { next: None } => {
                format!("block {id} [{}..{}): end", range.start, range.end)
            }
            BlockKind::Goto { target } => {
                format!("block {id} [{}..{}): goto -> {target}", range.start, range.end)
            }
            BlockKind::Conditional {
                condition,
                target,
                fallthrough,
            } => format!(
                "block {id} [{}..{}): {condition} -> {target}, else -> {fallthrough}",
                range.start, range.end,
            ),
            BlockKind::Switch { arms, default } => format!(
                "block {id} [{}..{}): switch with {} arms, default -> {default}",
                range.start,
                range.end,
                arms.len(),
            ),
            BlockKind::Exit => format!("block {id} [{}..{}): exit", range.start, range.end),
        }
    }

    fn reindex(&mut self) {
        self.positions = vec![0; self.blocks.len()];
        for (position, id) in self.order.iter().enumerate() {
            self.positions[*id] = position;
        }

        self.jump_targets = vec![false; self.blocks.len()];
        for block in &self.blocks {
            match &block.kind {
                BlockKind::Goto { target } | BlockKind::Conditional { target, .. } => {
                    self.jump_targets[*target] = true;
                }
                BlockKind::Switch { arms, default } => {
                    self.jump_targets[*default] = true;
                    for (_, target) in arms {
                        self.jump_targets[*target] = true;
                    }
                }
                _ => {}
            }
        }
    }
}

impl Index<BlockId> for OpcodeGraph {
    type Output = OpcodeBlock;

    fn index(&self, id: BlockId) -> &Self::Output {
        &self.blocks[id]
    }
}

/// Everything producers may consult while building the graph.
pub struct GraphInput<'a> {
    pub method: &'a MethodCode,
    pub label_indices: &'a FxHashMap<Label, usize>,
    pub locals: &'a Locals,
}

impl GraphInput<'_> {
    pub fn label_index(&self, label: Label) -> Result<usize, GraphError> {
        Ok(label_index(self.label_indices, label)?)
    }

    /// The breakpoint that makes `label` start a block, if one is needed at all.
    pub fn label_breakpoint(&self, label: Label) -> Result<Option<usize>, GraphError> {
        Ok(self.label_index(label)?.checked_sub(1))
    }
}

pub trait GraphProducer: Send + Sync {
    /// Adds the positions this producer needs blocks to end at.
    fn collect_breakpoints(
        &self,
        input: &GraphInput<'_>,
        breakpoints: &mut BTreeSet<usize>,
    ) -> Result<(), GraphError>;

    /// Rewrites the kinds of blocks this producer understands, or inserts marker blocks.
    fn form_edges(&self, input: &GraphInput<'_>, graph: &mut OpcodeGraph) -> Result<(), GraphError>;
}

pub fn default_producers() -> Vec<Box<dyn GraphProducer>> {
    vec![
        Box::new(InternalJumpGraphProducer),
        Box::new(SwitchGraphProducer),
        Box::new(TryCatchGraphProducer),
    ]
}

/// Splits the code into basic blocks. A block ends at every breakpoint, which is the inclusive
/// position of its last instruction; producers put them after jumps and right before jump
/// targets, so every jump lands on the first instruction of a block.
pub fn build_graph(
    input: &GraphInput<'_>,
    producers: &[Box<dyn GraphProducer>],
) -> Result<OpcodeGraph, GraphError> {
    let instructions = &input.method.instructions;
    let n_instructions = instructions.len();

    let mut breakpoints = BTreeSet::new();
    if let Some(last) = n_instructions.checked_sub(1) {
        breakpoints.insert(last);
    }
    for producer in producers {
        producer.collect_breakpoints(input, &mut breakpoints)?;
    }

    let mut blocks = Vec::with_capacity(breakpoints.len());
    let mut start = 0;
    for breakpoint in breakpoints.range(..n_instructions) {
        blocks.push(OpcodeBlock {
            instructions: start..breakpoint + 1,
            kind: BlockKind::Body { next: None },
        });
        start = breakpoint + 1;
    }

    // Until producers say otherwise, every block falls through to the next one.
    let n_code_blocks = blocks.len();
    for (id, block) in blocks.iter_mut().enumerate() {
        block.kind = BlockKind::Body {
            next: (id + 1 < n_code_blocks).then_some(id + 1),
        };
    }

    let mut graph = OpcodeGraph {
        blocks,
        n_code_blocks,
        order: (0..n_code_blocks).collect(),
        positions: Vec::new(),
        jump_targets: Vec::new(),
    };
    for producer in producers {
        producer.form_edges(input, &mut graph)?;
    }
    graph.reindex();

    // A trailing block holding only labels is fine, actual code falling off the end is not.
    if let Some(last) = n_code_blocks.checked_sub(1)
        && let BlockKind::Body { next: None } = graph[last].kind
        && let Some(index) = graph[last]
            .instructions
            .clone()
            .rev()
            .find(|index| !instructions[*index].is_marker())
    {
        return Err(GraphError::CodeFallthrough(index));
    }

    if log::log_enabled!(log::Level::Debug) {
        for id in graph.order() {
            log::debug!("{}", graph.debug_header(*id));
        }
    }

    Ok(graph)
}
