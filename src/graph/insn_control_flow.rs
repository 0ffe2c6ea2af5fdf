use crate::insn::{Insn, Label};

pub struct InsnControlFlow {
    pub can_jump_to: Vec<Label>,
    pub can_fallthrough: bool,
}

impl InsnControlFlow {
    pub fn is_normal(&self) -> bool {
        self.can_jump_to.is_empty() && self.can_fallthrough
    }
}

pub fn get_insn_control_flow(insn: &Insn) -> InsnControlFlow {
    match insn {
        // Exits
        Insn::Return(_) | Insn::Throw => InsnControlFlow {
            can_jump_to: Vec::new(),
            can_fallthrough: false,
        },

        // Jumps
        Insn::Goto(target) => InsnControlFlow {
            can_jump_to: vec![*target],
            can_fallthrough: false,
        },
        Insn::Jump { target, .. } => InsnControlFlow {
            can_jump_to: vec![*target],
            can_fallthrough: true,
        },
        Insn::Switch { default, arms } => InsnControlFlow {
            can_jump_to: core::iter::once(*default)
                .chain(arms.iter().map(|(_, target)| *target))
                .collect(),
            can_fallthrough: false,
        },

        // Normal operations
        _ => InsnControlFlow {
            can_jump_to: Vec::new(),
            can_fallthrough: true,
        },
    }
}
