pub mod ast;
pub mod config;
pub mod descriptor;
pub mod graph;
pub mod insn;
pub mod locals;
pub mod method;
pub mod postprocess;
pub mod structure;
#[cfg(test)]
mod test_utils;
mod utils;

use crate::ast::{MethodBody, StatementError, append_sections};
use crate::config::DecompilerConfig;
use crate::graph::{GraphError, GraphInput, GraphProducer, build_graph, default_producers};
use crate::locals::{Locals, LocalsError, bind_locals};
use crate::method::{MethodCode, MethodCodeError};
use crate::postprocess::{IncrementPostProcessor, StatementPostProcessor, run_post_processors};
use crate::structure::{
    BlockSection, GraphProcessor, StructureContext, Structurer, StructuringError, covers_exactly,
};
use core::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MethodDecompileError {
    #[error("Invalid method code: {0}")]
    MethodCode(#[from] MethodCodeError),

    #[error("While binding locals: {0}")]
    Locals(#[from] LocalsError),

    #[error("While building the block graph: {0}")]
    Graph(#[from] GraphError),

    #[error("While structuring: {0}")]
    Structuring(#[from] StructuringError),

    #[error("While generating statements: {0}")]
    Statements(#[from] StatementError),
}

/// A failure of one method in a batch.
#[derive(Debug, Error)]
#[error("In method `{name}{descriptor}`: {error}")]
pub struct BatchError {
    pub name: String,
    pub descriptor: String,
    #[source]
    pub error: MethodDecompileError,
}

#[derive(Debug)]
pub struct DecompiledMethod {
    pub locals: Locals,
    pub sections: Vec<BlockSection>,
    pub body: MethodBody,
}

impl DecompiledMethod {
    pub fn debug(&self) -> impl Display + '_ {
        self.body.debug(&self.locals)
    }
}

/// Runs the phases of decompilation on one method at a time: local binding, block graph,
/// structuring, statement building and then the post-processors. It holds no per-method state,
/// so one instance can serve many threads.
pub struct MethodDecompiler {
    config: DecompilerConfig,
    producers: Vec<Box<dyn GraphProducer>>,
    structurer: Structurer,
    post_processors: Vec<Box<dyn StatementPostProcessor>>,
}

impl Default for MethodDecompiler {
    fn default() -> Self {
        Self::with_default_passes(DecompilerConfig::default())
    }
}

impl MethodDecompiler {
    /// A decompiler with no strategies registered at all.
    pub fn new(config: DecompilerConfig) -> Self {
        Self {
            config,
            producers: Vec::new(),
            structurer: Structurer::new(Vec::new()),
            post_processors: Vec::new(),
        }
    }

    pub fn with_default_passes(config: DecompilerConfig) -> Self {
        Self {
            config,
            producers: default_producers(),
            structurer: Structurer::with_default_processors(),
            post_processors: vec![Box::new(IncrementPostProcessor)],
        }
    }

    pub fn config(&self) -> &DecompilerConfig {
        &self.config
    }

    pub fn add_producer(&mut self, producer: Box<dyn GraphProducer>) {
        self.producers.push(producer);
    }

    pub fn add_processor(&mut self, processor: Box<dyn GraphProcessor>) {
        self.structurer.add_processor(processor);
    }

    pub fn add_post_processor(&mut self, processor: Box<dyn StatementPostProcessor>) {
        self.post_processors.push(processor);
    }

    pub fn decompile(
        &self,
        method: &MethodCode,
    ) -> Result<DecompiledMethod, MethodDecompileError> {
        let label_indices = method.label_indices()?;
        let locals = bind_locals(method, &label_indices)?;
        let input = GraphInput {
            method,
            label_indices: &label_indices,
            locals: &locals,
        };
        let graph = build_graph(&input, &self.producers)?;
        log::debug!(
            "{}.{}: {} instructions, {} blocks",
            method.owner,
            method.name,
            method.instructions.len(),
            graph.len(),
        );

        let mut ctx = StructureContext::new(method, &graph, &locals, &self.config);
        let sections = self.structurer.structure(&mut ctx)?;
        debug_assert!(
            covers_exactly(&sections, method.instructions.len()),
            "sections of {}.{} do not cover each instruction once",
            method.owner,
            method.name,
        );

        let mut body = append_sections(method, &locals, &sections, &self.config)?;
        if self.config.run_post_processors {
            run_post_processors(&self.post_processors, method, &locals, &mut body);
        }

        Ok(DecompiledMethod {
            locals,
            sections,
            body,
        })
    }

    /// Decompiles each method on its own, so one broken method doesn't take its siblings down.
    pub fn decompile_all(
        &self,
        methods: &[MethodCode],
    ) -> Vec<Result<DecompiledMethod, BatchError>> {
        methods
            .iter()
            .map(|method| {
                self.decompile(method).map_err(|error| BatchError {
                    name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                    error,
                })
            })
            .collect()
    }
}
