use super::{DebugContext, DebugIr, ExprId};
use crate::descriptor::simple_name;
use crate::insn::{ArithOp, CompareOp, InvokeKind};
use crate::locals::LocalId;
use crate::method::CatchType;
use core::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Local(LocalId),
    Null,
    ConstInt(i32),
    ConstString(String),
    Field {
        // `None` for static fields
        object: Option<ExprId>,
        owner: String,
        name: String,
    },
    Call {
        kind: InvokeKind,
        owner: String,
        name: String,
        descriptor: String,
        // `None` for static calls
        object: Option<ExprId>,
        arguments: Vec<ExprId>,
    },
    /// The result of `new` before the constructor has run.
    NewUninitialized {
        class: String,
    },
    New {
        class: String,
        descriptor: String,
        arguments: Vec<ExprId>,
    },
    BinOp {
        op: ArithOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// The value a handler without a binding store finds on the stack.
    CaughtException(Vec<CatchType>),
}

impl Expression {
    /// Whether discarding the value would lose behavior, i.e. whether `pop` needs a statement.
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Self::Call { .. } | Self::New { .. })
    }
}

fn write_arguments(
    f: &mut fmt::Formatter<'_>,
    ctx: DebugContext<'_>,
    arguments: &[ExprId],
) -> fmt::Result {
    write!(f, "(")?;
    for (i, argument) in arguments.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ctx.debug(argument))?;
    }
    write!(f, ")")
}

impl DebugIr for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "{}", ctx.locals[*id].name),
            Self::Null => write!(f, "null"),
            Self::ConstInt(value) => write!(f, "{value}"),
            Self::ConstString(value) => write!(f, "{value:?}"),
            Self::Field {
                object,
                owner,
                name,
            } => match object {
                Some(object) => write!(f, "{}.{name}", ctx.debug(object)),
                None => write!(f, "{}.{name}", simple_name(owner)),
            },
            Self::Call {
                kind,
                owner,
                name,
                object,
                arguments,
                ..
            } => {
                match (kind, object) {
                    (InvokeKind::Special, Some(object)) => {
                        write!(f, "{}.{}::{name}", ctx.debug(object), simple_name(owner))?
                    }
                    (_, Some(object)) => write!(f, "{}.{name}", ctx.debug(object))?,
                    (_, None) => write!(f, "{}.{name}", simple_name(owner))?,
                }
                write_arguments(f, ctx, arguments)
            }
            Self::NewUninitialized { class } => {
                write!(f, "new uninitialized {}", simple_name(class))
            }
            Self::New {
                class, arguments, ..
            } => {
                write!(f, "new {}", simple_name(class))?;
                write_arguments(f, ctx, arguments)
            }
            Self::BinOp { op, lhs, rhs } => {
                write!(f, "({} {op} {})", ctx.debug(lhs), ctx.debug(rhs))
            }
            Self::CaughtException(_) => write!(f, "<caught>"),
        }
    }
}

/// A boolean condition. Jump instructions only ever compare, so there is no general boolean
/// expression type, and negation is always pushed down into the comparisons.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Compare {
        op: CompareOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn negate(self) -> Self {
        match self {
            Self::Compare { op, lhs, rhs } => Self::Compare {
                op: op.negate(),
                lhs,
                rhs,
            },
            Self::And(parts) => Self::Or(parts.into_iter().map(Self::negate).collect()),
            Self::Or(parts) => Self::And(parts.into_iter().map(Self::negate).collect()),
        }
    }
}

fn write_parts(
    f: &mut fmt::Formatter<'_>,
    ctx: DebugContext<'_>,
    parts: &[Condition],
    separator: &str,
) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, " {separator} ")?;
        }
        match part {
            Condition::Compare { .. } => write!(f, "{}", ctx.debug(part))?,
            _ => write!(f, "({})", ctx.debug(part))?,
        }
    }
    Ok(())
}

impl DebugIr for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result {
        match self {
            Self::Compare { op, lhs, rhs } => {
                write!(f, "{} {op} {}", ctx.debug(lhs), ctx.debug(rhs))
            }
            Self::And(parts) => write_parts(f, ctx, parts, "&&"),
            Self::Or(parts) => write_parts(f, ctx, parts, "||"),
        }
    }
}
