use crate::insn::{Insn, InvokeKind, JumpCondition, Label, ValueKind};
use crate::method::{CatchType, ExceptionTableEntry, LocalVariableEntry, MethodCode};

/// A tiny assembler for the instruction streams used in tests.
pub struct MethodBuilder {
    code: MethodCode,
    next_label: u32,
}

impl MethodBuilder {
    fn new(name: &str, descriptor: &str, is_static: bool) -> Self {
        Self {
            code: MethodCode {
                owner: "test/Owner".to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                is_static,
                instructions: Vec::new(),
                local_variables: Vec::new(),
                exception_table: Vec::new(),
            },
            next_label: 0,
        }
    }

    pub fn new_static(name: &str, descriptor: &str) -> Self {
        Self::new(name, descriptor, true)
    }

    pub fn new_instance(name: &str, descriptor: &str) -> Self {
        Self::new(name, descriptor, false)
    }

    /// Allocates a label without placing it.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Allocates a label and places it at the current position.
    pub fn label(&mut self) -> Label {
        let label = self.new_label();
        self.place(label);
        label
    }

    pub fn place(&mut self, label: Label) -> &mut Self {
        self.insn(Insn::Label(label))
    }

    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        self.code.instructions.push(insn);
        self
    }

    pub fn load(&mut self, kind: ValueKind, slot: u16) -> &mut Self {
        self.insn(Insn::Load { kind, slot })
    }

    pub fn store(&mut self, kind: ValueKind, slot: u16) -> &mut Self {
        self.insn(Insn::Store { kind, slot })
    }

    pub fn increment(&mut self, slot: u16, amount: i16) -> &mut Self {
        self.insn(Insn::Increment { slot, amount })
    }

    pub fn const_int(&mut self, value: i32) -> &mut Self {
        self.insn(Insn::ConstInt(value))
    }

    pub fn const_null(&mut self) -> &mut Self {
        self.insn(Insn::ConstNull)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.insn(Insn::Pop)
    }

    pub fn ret(&mut self, kind: Option<ValueKind>) -> &mut Self {
        self.insn(Insn::Return(kind))
    }

    pub fn throw(&mut self) -> &mut Self {
        self.insn(Insn::Throw)
    }

    pub fn goto(&mut self, target: Label) -> &mut Self {
        self.insn(Insn::Goto(target))
    }

    pub fn jump(&mut self, condition: JumpCondition, target: Label) -> &mut Self {
        self.insn(Insn::Jump { condition, target })
    }

    pub fn switch(&mut self, arms: &[(i32, Label)], default: Label) -> &mut Self {
        self.insn(Insn::Switch {
            default,
            arms: arms.to_vec(),
        })
    }

    pub fn call_static(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.insn(Insn::Invoke {
            kind: InvokeKind::Static,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    pub fn local(&mut self, name: &str, descriptor: &str, slot: u16, start: Label, end: Label) {
        self.code.local_variables.push(LocalVariableEntry {
            slot,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: None,
            start,
            end,
        });
    }

    pub fn catch(&mut self, start: Label, end: Label, handler: Label, class: Option<&str>) {
        self.code.exception_table.push(ExceptionTableEntry {
            start,
            end,
            handler,
            class: class.map_or(CatchType::Any, |class| CatchType::Class(class.to_string())),
        });
    }

    pub fn finish(self) -> MethodCode {
        self.code
    }
}
