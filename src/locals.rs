use crate::descriptor::{DescriptorError, MethodDescriptor, type_descriptor_width};
use crate::graph::handler_binding;
use crate::insn::{Insn, Label, ValueKind};
use crate::method::{CatchType, MethodCode, MethodCodeError, label_index};
use core::ops::{Index, Range};
use displaydoc::Display;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocalsError {
    #[error("No variable instance of slot {slot} covers instruction {index}")]
    Unresolvable { slot: u16, index: usize },

    #[error("Invalid method descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Invalid local variable table: {0}")]
    MethodCode(#[from] MethodCodeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub usize);

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LocalOrigin {
    /// parameter
    Parameter,
    /// declared
    Declared,
    /// copied
    Copied,
    /// synthesized
    Synthesized,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalInstance {
    pub slot: u16,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    /// Instruction indices the instance is live at.
    pub range: Range<usize>,
    pub origin: LocalOrigin,
}

impl LocalInstance {
    /// The most precise type known for the instance.
    pub fn type_name(&self) -> &str {
        self.signature.as_deref().unwrap_or(&self.descriptor)
    }
}

#[derive(Debug, Default)]
pub struct Locals {
    instances: Vec<LocalInstance>,
    /// Per-slot instance IDs, sorted by range start.
    by_slot: FxHashMap<u16, Vec<LocalId>>,
}

impl Locals {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocalId, &LocalInstance)> {
        self.instances
            .iter()
            .enumerate()
            .map(|(id, instance)| (LocalId(id), instance))
    }

    pub fn slot_instances(&self, slot: u16) -> &[LocalId] {
        self.by_slot.get(&slot).map_or(&[], Vec::as_slice)
    }

    /// Finds the instance of `slot` live at instruction `index`.
    pub fn find(&self, slot: u16, index: usize) -> Option<LocalId> {
        self.slot_instances(slot)
            .iter()
            .copied()
            .find(|id| self[*id].range.contains(&index))
    }

    /// Like `find`, but treats a missing instance as the broken invariant it is.
    pub fn resolve(&self, slot: u16, index: usize) -> Result<LocalId, LocalsError> {
        self.find(slot, index)
            .ok_or(LocalsError::Unresolvable { slot, index })
    }

    fn overlaps(&self, slot: u16, range: &Range<usize>) -> bool {
        self.slot_instances(slot).iter().any(|id| {
            let other = &self[*id].range;
            other.start < range.end && range.start < other.end
        })
    }

    /// The start of the first instance of `slot` beginning strictly after `index`.
    fn next_start_after(&self, slot: u16, index: usize) -> Option<usize> {
        self.slot_instances(slot)
            .iter()
            .map(|id| self[*id].range.start)
            .find(|start| *start > index)
    }

    /// Inserts an instance unless it is empty or collides with an existing one.
    fn try_insert(&mut self, instance: LocalInstance) -> Option<LocalId> {
        if instance.range.is_empty() || self.overlaps(instance.slot, &instance.range) {
            log::debug!(
                "dropping local `{}` in slot {} at {:?}",
                instance.name,
                instance.slot,
                instance.range,
            );
            return None;
        }

        let id = LocalId(self.instances.len());
        let slot = instance.slot;
        let start = instance.range.start;
        self.instances.push(instance);

        let ids = self.by_slot.entry(slot).or_default();
        let position = ids.partition_point(|other| self.instances[other.0].range.start < start);
        ids.insert(position, id);
        Some(id)
    }
}

impl Index<LocalId> for Locals {
    type Output = LocalInstance;

    fn index(&self, id: LocalId) -> &Self::Output {
        &self.instances[id.0]
    }
}

/// Splits each local slot into variable instances with disjoint live ranges, such that every
/// access in the method is covered by exactly one of them. Compilers reuse slots for unrelated
/// variables all the time.
///
/// Sources of instances, most trusted first: parameters, the declared local variable table,
/// adjacent `load A; store B` copies, and runs of accesses nothing else explains.
pub fn bind_locals(
    method: &MethodCode,
    label_indices: &FxHashMap<Label, usize>,
) -> Result<Locals, LocalsError> {
    let instructions = &method.instructions;
    let n_instructions = instructions.len();
    let descriptor = MethodDescriptor::parse(&method.descriptor)?;

    let mut declared = Vec::with_capacity(method.local_variables.len());
    for entry in &method.local_variables {
        let start = label_index(label_indices, entry.start)?;
        let end = label_index(label_indices, entry.end)?;
        declared.push(LocalInstance {
            slot: entry.slot,
            name: entry.name.clone(),
            descriptor: entry.descriptor.clone(),
            signature: entry.signature.clone(),
            range: start..end.max(start),
            origin: LocalOrigin::Declared,
        });
    }

    let mut locals = Locals::default();

    // Parameters are live from the very first instruction. The table entry for a parameter
    // starts at the first label, which may be preceded by line number annotations, so anything
    // starting before the first real instruction counts.
    let entry_point = instructions
        .iter()
        .position(|insn| !insn.is_marker())
        .unwrap_or(n_instructions);
    let receiver = format!("L{};", method.owner);
    let parameters = (!method.is_static)
        .then_some(receiver.as_str())
        .into_iter()
        .chain(descriptor.parameters().iter().copied());

    let mut slot: u16 = 0;
    for (i, parameter) in parameters.enumerate() {
        let declared_index = declared
            .iter()
            .position(|local| local.slot == slot && local.range.start <= entry_point);
        let mut instance = match declared_index {
            Some(index) => {
                let mut local = declared.remove(index);
                local.range.start = 0;
                local.origin = LocalOrigin::Parameter;
                local
            }
            None => {
                // Javac never reuses parameter slots, but other compilers might, so leave room
                // for declared variables that come later.
                let end = declared
                    .iter()
                    .filter(|local| local.slot == slot)
                    .map(|local| local.range.start)
                    .min()
                    .unwrap_or(n_instructions);
                LocalInstance {
                    slot,
                    name: if i == 0 && !method.is_static {
                        "this".to_string()
                    } else {
                        format!("param{slot}")
                    },
                    descriptor: parameter.to_string(),
                    signature: None,
                    range: 0..end,
                    origin: LocalOrigin::Parameter,
                }
            }
        };
        // An empty method body still has parameters.
        if instance.range.is_empty() {
            instance.range.end = instance.range.start + 1;
        }
        locals.try_insert(instance);
        slot += type_descriptor_width(parameter) as u16;
    }

    for instance in declared {
        locals.try_insert(instance);
    }
    extend_to_initializing_stores(&mut locals, instructions);
    bind_copies(&mut locals, instructions);
    synthesize_remaining(&mut locals, method, label_indices)?;

    Ok(locals)
}

/// Javac opens the scope of a variable right *after* the store that initializes it, so the store
/// itself would be left uncovered. Pull the start back over it when that doesn't cause overlaps.
fn extend_to_initializing_stores(locals: &mut Locals, instructions: &[Insn]) {
    for id in 0..locals.instances.len() {
        let instance = &locals.instances[id];
        if instance.origin != LocalOrigin::Declared {
            continue;
        }

        let mut position = instance.range.start;
        while position > 0 && instructions[position - 1].is_marker() {
            position -= 1;
        }
        let Some(store_index) = position.checked_sub(1) else {
            continue;
        };
        if !matches!(instructions[store_index], Insn::Store { slot, .. } if slot == instance.slot)
        {
            continue;
        }

        let extension = store_index..instance.range.start;
        if !locals.overlaps(instance.slot, &extension) {
            locals.instances[id].range.start = store_index;
        }
    }
}

/// The store/load-pair heuristic: in `load A; store B` where nothing describes `B` at the store,
/// `B` is a copy of `A` and should carry its identity instead of becoming an anonymous temporary.
/// Only directly adjacent instructions are considered.
fn bind_copies(locals: &mut Locals, instructions: &[Insn]) {
    for index in 1..instructions.len() {
        let (Insn::Load { slot: load_slot, .. }, Insn::Store { slot: store_slot, .. }) =
            (&instructions[index - 1], &instructions[index])
        else {
            continue;
        };
        if locals.find(*store_slot, index).is_some() {
            continue;
        }
        let Some(source) = locals.find(*load_slot, index - 1) else {
            continue;
        };

        let source = &locals[source];
        let mut end = source.range.end.max(index + 1);
        if let Some(next_start) = locals.next_start_after(*store_slot, index) {
            end = end.min(next_start);
        }
        let copy = LocalInstance {
            slot: *store_slot,
            name: source.name.clone(),
            descriptor: source.descriptor.clone(),
            signature: source.signature.clone(),
            range: index..end,
            origin: LocalOrigin::Copied,
        };
        locals.try_insert(copy);
    }
}

struct AccessRun {
    kind: ValueKind,
    first: usize,
    last: usize,
}

/// Covers every remaining access with synthesized instances, one per maximal run of accesses to
/// a slot that agree on the value kind and aren't interrupted by another instance of the slot.
fn synthesize_remaining(
    locals: &mut Locals,
    method: &MethodCode,
    label_indices: &FxHashMap<Label, usize>,
) -> Result<(), LocalsError> {
    let instructions = &method.instructions;
    let binding_types = handler_binding_types(method, label_indices)?;

    let mut open_runs: FxHashMap<u16, AccessRun> = FxHashMap::default();
    let mut runs: Vec<(u16, AccessRun)> = Vec::new();

    for (index, insn) in instructions.iter().enumerate() {
        let (slot, kind) = match insn {
            Insn::Load { kind, slot } | Insn::Store { kind, slot } => (*slot, *kind),
            Insn::Increment { slot, .. } => (*slot, ValueKind::Int),
            _ => continue,
        };
        if locals.find(slot, index).is_some() {
            continue;
        }

        if let Some(run) = open_runs.get_mut(&slot) {
            let interrupted = locals.slot_instances(slot).iter().any(|id| {
                let start = locals[*id].range.start;
                start > run.last && start < index
            });
            if run.kind == kind && !interrupted {
                run.last = index;
                continue;
            }
        }

        let run = AccessRun {
            kind,
            first: index,
            last: index,
        };
        if let Some(finished) = open_runs.insert(slot, run) {
            runs.push((slot, finished));
        }
    }
    runs.extend(open_runs);
    runs.sort_unstable_by_key(|(slot, run)| (*slot, run.first));

    let mut previous_slot = None;
    let mut n_in_slot = 0;
    for (slot, run) in runs {
        if previous_slot == Some(slot) {
            n_in_slot += 1;
        } else {
            previous_slot = Some(slot);
            n_in_slot = 0;
        }

        let descriptor = match (run.kind, binding_types.get(&run.first)) {
            (ValueKind::Reference, Some(descriptor)) => descriptor.clone(),
            _ => run.kind.descriptor().to_string(),
        };
        let name = if n_in_slot == 0 {
            format!("var{slot}")
        } else {
            format!("var{slot}_{n_in_slot}")
        };

        let id = locals.try_insert(LocalInstance {
            slot,
            name,
            descriptor,
            signature: None,
            range: run.first..run.last + 1,
            origin: LocalOrigin::Synthesized,
        });
        debug_assert!(id.is_some(), "synthesized local overlaps an existing one");
    }

    Ok(())
}

/// Maps the index of each store that binds a caught exception to the type of the binding. When
/// handlers for different classes share the store, the common type is `Throwable`.
fn handler_binding_types(
    method: &MethodCode,
    label_indices: &FxHashMap<Label, usize>,
) -> Result<FxHashMap<usize, String>, LocalsError> {
    let mut types: FxHashMap<usize, (CatchType, String)> = FxHashMap::default();
    for entry in &method.exception_table {
        let handler = label_index(label_indices, entry.handler)?;
        let Some(store_index) = handler_binding(&method.instructions, handler) else {
            continue;
        };
        if !matches!(method.instructions[store_index], Insn::Store { .. }) {
            continue;
        }

        types
            .entry(store_index)
            .and_modify(|(class, descriptor)| {
                if *class != entry.class {
                    *descriptor = CatchType::Any.variable_descriptor();
                }
            })
            .or_insert_with(|| (entry.class.clone(), entry.class.variable_descriptor()));
    }
    Ok(types
        .into_iter()
        .map(|(index, (_, descriptor))| (index, descriptor))
        .collect())
}
