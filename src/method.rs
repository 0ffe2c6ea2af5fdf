use crate::insn::{Insn, Label};
use displaydoc::Display;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MethodCodeError {
    #[error("Label {0} is defined more than once")]
    DuplicateLabel(Label),

    #[error("Label {0} is referenced but never defined")]
    UnknownLabel(Label),
}

/// A method body as handed over by the bytecode reader.
#[derive(Clone, Debug)]
pub struct MethodCode {
    /// Internal name of the declaring type, e.g. `java/lang/String`.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub instructions: Vec<Insn>,
    /// May be empty or partial, e.g. for code compiled without `-g`.
    pub local_variables: Vec<LocalVariableEntry>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

#[derive(Clone, Debug)]
pub struct LocalVariableEntry {
    pub slot: u16,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub start: Label,
    pub end: Label,
}

#[derive(Clone, Debug)]
pub struct ExceptionTableEntry {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub class: CatchType,
}

#[derive(Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum CatchType {
    /// {0}
    Class(String),
    /// any
    Any,
}

impl CatchType {
    /// The type a variable bound by this handler has.
    pub fn variable_descriptor(&self) -> String {
        match self {
            Self::Class(class) => format!("L{class};"),
            Self::Any => "Ljava/lang/Throwable;".to_string(),
        }
    }
}

impl MethodCode {
    /// Maps each label to its position in the instruction list.
    pub fn label_indices(&self) -> Result<FxHashMap<Label, usize>, MethodCodeError> {
        let mut indices = FxHashMap::default();
        for (index, insn) in self.instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                match indices.entry(*label) {
                    Entry::Occupied(_) => return Err(MethodCodeError::DuplicateLabel(*label)),
                    Entry::Vacant(entry) => {
                        entry.insert(index);
                    }
                }
            }
        }
        Ok(indices)
    }
}

/// Resolves a label to its instruction index.
pub fn label_index(
    label_indices: &FxHashMap<Label, usize>,
    label: Label,
) -> Result<usize, MethodCodeError> {
    label_indices
        .get(&label)
        .copied()
        .ok_or(MethodCodeError::UnknownLabel(label))
}
