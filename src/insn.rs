use crate::descriptor::{DescriptorError, MethodDescriptor};
use core::fmt::{self, Display};
use displaydoc::Display;

/// L{0}
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// i
    Int,
    /// l
    Long,
    /// f
    Float,
    /// d
    Double,
    /// a
    Reference,
}

impl ValueKind {
    /// The descriptor used for variables synthesized from an access of this kind.
    pub fn descriptor(self) -> &'static str {
        match self {
            Self::Int => "I",
            Self::Long => "J",
            Self::Float => "F",
            Self::Double => "D",
            Self::Reference => "Ljava/lang/Object;",
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum JumpCondition {
    /// ifeq
    Eq,
    /// ifne
    Ne,
    /// iflt
    Lt,
    /// ifge
    Ge,
    /// ifgt
    Gt,
    /// ifle
    Le,
    /// if_icmpeq
    ICmpEq,
    /// if_icmpne
    ICmpNe,
    /// if_icmplt
    ICmpLt,
    /// if_icmpge
    ICmpGe,
    /// if_icmpgt
    ICmpGt,
    /// if_icmple
    ICmpLe,
    /// if_acmpeq
    ACmpEq,
    /// if_acmpne
    ACmpNe,
    /// ifnull
    Null,
    /// ifnonnull
    NonNull,
}

impl JumpCondition {
    pub fn operand_count(self) -> usize {
        use JumpCondition::*;
        match self {
            Eq | Ne | Lt | Ge | Gt | Le | Null | NonNull => 1,
            ICmpEq | ICmpNe | ICmpLt | ICmpGe | ICmpGt | ICmpLe | ACmpEq | ACmpNe => 2,
        }
    }

    /// The condition under which the jump is *not* taken.
    pub fn negate(self) -> Self {
        use JumpCondition::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Lt => Ge,
            Ge => Lt,
            Gt => Le,
            Le => Gt,
            ICmpEq => ICmpNe,
            ICmpNe => ICmpEq,
            ICmpLt => ICmpGe,
            ICmpGe => ICmpLt,
            ICmpGt => ICmpLe,
            ICmpLe => ICmpGt,
            ACmpEq => ACmpNe,
            ACmpNe => ACmpEq,
            Null => NonNull,
            NonNull => Null,
        }
    }

    pub fn comparison(self) -> CompareOp {
        use JumpCondition::*;
        match self {
            Eq | ICmpEq | ACmpEq | Null => CompareOp::Eq,
            Ne | ICmpNe | ACmpNe | NonNull => CompareOp::Ne,
            Lt | ICmpLt => CompareOp::Lt,
            Ge | ICmpGe => CompareOp::Ge,
            Gt | ICmpGt => CompareOp::Gt,
            Le | ICmpLe => CompareOp::Le,
        }
    }

    pub fn compares_to_null(self) -> bool {
        matches!(self, Self::Null | Self::NonNull)
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// ==
    Eq,
    /// !=
    Ne,
    /// <
    Lt,
    /// >=
    Ge,
    /// >
    Gt,
    /// <=
    Le,
}

impl CompareOp {
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UShr,
}

impl ArithOp {
    fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::UShr => "ushr",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::UShr => ">>>",
        }
    }
}

impl Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// invokestatic
    Static,
    /// invokevirtual
    Virtual,
    /// invokespecial
    Special,
    /// invokeinterface
    Interface,
}

/// A decoded instruction. Branch offsets are already label identities, and labels appear inline
/// as pseudo-instructions. Only opcodes the passes inspect get their own variants.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Label(Label),
    LineNumber(u32),
    Nop,
    ConstNull,
    ConstInt(i32),
    ConstString(String),
    Load {
        kind: ValueKind,
        slot: u16,
    },
    Store {
        kind: ValueKind,
        slot: u16,
    },
    Increment {
        slot: u16,
        amount: i16,
    },
    Arithmetic {
        kind: ValueKind,
        op: ArithOp,
    },
    Pop,
    Dup,
    New(String),
    GetField {
        owner: String,
        name: String,
        descriptor: String,
        is_static: bool,
    },
    PutField {
        owner: String,
        name: String,
        descriptor: String,
        is_static: bool,
    },
    Invoke {
        kind: InvokeKind,
        owner: String,
        name: String,
        descriptor: String,
    },
    Jump {
        condition: JumpCondition,
        target: Label,
    },
    Goto(Label),
    Switch {
        default: Label,
        arms: Vec<(i32, Label)>,
    },
    /// `None` for `void` returns.
    Return(Option<ValueKind>),
    Throw,
}

impl Insn {
    /// Pseudo-instructions that only annotate positions and never affect control or data flow.
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Label(_) | Self::LineNumber(_))
    }

    /// The slot accessed by a load, store or increment.
    pub fn local_slot(&self) -> Option<u16> {
        match self {
            Self::Load { slot, .. } | Self::Store { slot, .. } | Self::Increment { slot, .. } => {
                Some(*slot)
            }
            _ => None,
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. } | Self::Goto(_) | Self::Switch { .. }
        )
    }

    /// How many operand stack values the instruction pops and pushes, in that order.
    pub fn stack_effect(&self) -> Result<(usize, usize), DescriptorError> {
        Ok(match self {
            Self::Label(_)
            | Self::LineNumber(_)
            | Self::Nop
            | Self::Increment { .. }
            | Self::Goto(_)
            | Self::Return(None) => (0, 0),
            Self::ConstNull
            | Self::ConstInt(_)
            | Self::ConstString(_)
            | Self::Load { .. }
            | Self::New(_) => (0, 1),
            Self::Store { .. }
            | Self::Pop
            | Self::Switch { .. }
            | Self::Return(Some(_))
            | Self::Throw => (1, 0),
            Self::Arithmetic { .. } => (2, 1),
            Self::Dup => (1, 2),
            Self::GetField { is_static, .. } => (usize::from(!*is_static), 1),
            Self::PutField { is_static, .. } => (1 + usize::from(!*is_static), 0),
            Self::Invoke {
                kind, descriptor, ..
            } => {
                let parsed = MethodDescriptor::parse(descriptor)?;
                let receiver = usize::from(*kind != InvokeKind::Static);
                (
                    parsed.parameters().len() + receiver,
                    usize::from(parsed.return_type().is_some()),
                )
            }
            Self::Jump { condition, .. } => (condition.operand_count(), 0),
        })
    }
}

impl Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{label}:"),
            Self::LineNumber(line) => write!(f, "// line {line}"),
            Self::Nop => write!(f, "nop"),
            Self::ConstNull => write!(f, "aconst_null"),
            Self::ConstInt(value) => write!(f, "ldc {value}"),
            Self::ConstString(value) => write!(f, "ldc {value:?}"),
            Self::Load { kind, slot } => write!(f, "{kind}load {slot}"),
            Self::Store { kind, slot } => write!(f, "{kind}store {slot}"),
            Self::Increment { slot, amount } => write!(f, "iinc {slot} {amount}"),
            Self::Arithmetic { kind, op } => write!(f, "{kind}{}", op.mnemonic()),
            Self::Pop => write!(f, "pop"),
            Self::Dup => write!(f, "dup"),
            Self::New(class) => write!(f, "new {class}"),
            Self::GetField {
                owner,
                name,
                descriptor,
                is_static,
            } => {
                let op = if *is_static { "getstatic" } else { "getfield" };
                write!(f, "{op} {owner}.{name} {descriptor}")
            }
            Self::PutField {
                owner,
                name,
                descriptor,
                is_static,
            } => {
                let op = if *is_static { "putstatic" } else { "putfield" };
                write!(f, "{op} {owner}.{name} {descriptor}")
            }
            Self::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } => write!(f, "{kind} {owner}.{name}{descriptor}"),
            Self::Jump { condition, target } => write!(f, "{condition} {target}"),
            Self::Goto(target) => write!(f, "goto {target}"),
            Self::Switch { default, arms } => {
                write!(f, "switch ")?;
                for (value, target) in arms {
                    write!(f, "{value} => {target}, ")?;
                }
                write!(f, "default => {default}")
            }
            Self::Return(None) => write!(f, "return"),
            Self::Return(Some(kind)) => write!(f, "{kind}return"),
            Self::Throw => write!(f, "athrow"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_text() {
        assert_eq!(ArithOp::Div.to_string(), "/");
        assert_eq!(ArithOp::UShr.to_string(), ">>>");
        let insn = Insn::Arithmetic {
            kind: ValueKind::Long,
            op: ArithOp::UShr,
        };
        assert_eq!(insn.to_string(), "lushr");
    }

    #[test]
    fn stack_effects() {
        let call = Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner: "Test".to_string(),
            name: "f".to_string(),
            descriptor: "(IJ)Z".to_string(),
        };
        assert_eq!(call.stack_effect().unwrap(), (3, 1));
        assert_eq!(Insn::Dup.stack_effect().unwrap(), (1, 2));
        let jump = Insn::Jump {
            condition: JumpCondition::ICmpLt,
            target: Label(0),
        };
        assert_eq!(jump.stack_effect().unwrap(), (2, 0));

        let broken = Insn::Invoke {
            kind: InvokeKind::Static,
            owner: "Test".to_string(),
            name: "f".to_string(),
            descriptor: "(X)V".to_string(),
        };
        assert!(broken.stack_effect().is_err());
    }
}
