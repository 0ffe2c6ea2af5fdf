use super::debug::Block;
use super::{Condition, DebugContext, DebugIr, ExprId};
use crate::descriptor::simple_name;
use crate::locals::LocalId;
use crate::method::CatchType;
use core::fmt;

pub type StmtList = Vec<Statement>;

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Assign {
        local: LocalId,
        value: ExprId,
    },
    FieldAssign {
        // `None` for static fields
        object: Option<ExprId>,
        owner: String,
        name: String,
        value: ExprId,
    },
    Increment {
        local: LocalId,
        amount: i32,
    },
    /// An expression evaluated for its side effects.
    Expression(ExprId),
    Return(Option<ExprId>),
    Throw(ExprId),
    If {
        condition: Condition,
        then: StmtList,
        else_: StmtList,
    },
    /// `while (true)` if there's no condition.
    While {
        condition: Option<Condition>,
        body: StmtList,
    },
    DoWhile {
        condition: Condition,
        body: StmtList,
    },
    /// A loop without an initializer. `update` runs after the body and on `continue`.
    For {
        condition: Condition,
        update: StmtList,
        body: StmtList,
    },
    Switch {
        key: ExprId,
        cases: Vec<SwitchCase>,
    },
    TryCatch {
        body: StmtList,
        catches: Vec<Catch>,
    },
    /// Leaves `depth` enclosing loops or switches in addition to the innermost one.
    Break {
        depth: usize,
    },
    Continue {
        depth: usize,
    },
    Comment(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<i32>,
    pub is_default: bool,
    pub body: StmtList,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Catch {
    pub exceptions: Vec<CatchType>,
    /// `None` if the handler doesn't store the exception.
    pub local: Option<LocalId>,
    pub body: StmtList,
}

impl Statement {
    pub fn is_divergent(&self) -> bool {
        matches!(
            self,
            Self::Return(_) | Self::Throw(_) | Self::Break { .. } | Self::Continue { .. }
        )
    }
}

fn write_jump(f: &mut fmt::Formatter<'_>, keyword: &str, depth: usize) -> fmt::Result {
    if depth == 0 {
        write!(f, "{keyword};")
    } else {
        write!(f, "{keyword} {depth};")
    }
}

impl DebugIr for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result {
        match self {
            Self::Assign { local, value } => {
                write!(f, "{} = {};", ctx.locals[*local].name, ctx.debug(value))
            }
            Self::FieldAssign {
                object,
                owner,
                name,
                value,
            } => {
                match object {
                    Some(object) => write!(f, "{}.{name}", ctx.debug(object))?,
                    None => write!(f, "{}.{name}", simple_name(owner))?,
                }
                write!(f, " = {};", ctx.debug(value))
            }
            Self::Increment { local, amount } => {
                let name = &ctx.locals[*local].name;
                match amount {
                    1 => write!(f, "{name}++;"),
                    -1 => write!(f, "{name}--;"),
                    amount if *amount < 0 => write!(f, "{name} -= {};", -(*amount as i64)),
                    amount => write!(f, "{name} += {amount};"),
                }
            }
            Self::Expression(value) => write!(f, "{};", ctx.debug(value)),
            Self::Return(None) => write!(f, "return;"),
            Self::Return(Some(value)) => write!(f, "return {};", ctx.debug(value)),
            Self::Throw(value) => write!(f, "throw {};", ctx.debug(value)),
            Self::If {
                condition,
                then,
                else_,
            } => {
                write!(
                    f,
                    "if ({}) {}",
                    ctx.debug(condition),
                    ctx.debug(&Block(then)),
                )?;
                if !else_.is_empty() {
                    write!(f, " else {}", ctx.debug(&Block(else_)))?;
                }
                Ok(())
            }
            Self::While {
                condition: Some(condition),
                body,
            } => write!(
                f,
                "while ({}) {}",
                ctx.debug(condition),
                ctx.debug(&Block(body)),
            ),
            Self::While {
                condition: None,
                body,
            } => write!(f, "while (true) {}", ctx.debug(&Block(body))),
            Self::DoWhile { condition, body } => write!(
                f,
                "do {} while ({});",
                ctx.debug(&Block(body)),
                ctx.debug(condition),
            ),
            Self::For {
                condition,
                update,
                body,
            } => {
                write!(f, "for (; {};", ctx.debug(condition))?;
                for (i, statement) in update.iter().enumerate() {
                    let text = ctx.debug(statement).to_string();
                    let separator = if i == 0 { " " } else { ", " };
                    write!(f, "{separator}{}", text.strip_suffix(';').unwrap_or(text.as_str()))?;
                }
                write!(f, ") {}", ctx.debug(&Block(body)))
            }
            Self::Switch { key, cases } => {
                writeln!(f, "switch ({}) {{", ctx.debug(key))?;
                for case in cases {
                    for value in &case.values {
                        writeln!(f, "case {value}:")?;
                    }
                    if case.is_default {
                        writeln!(f, "default:")?;
                    }
                    let body = ctx.debug(&case.body[..]).to_string();
                    for line in body.lines() {
                        writeln!(f, "    {line}")?;
                    }
                }
                write!(f, "}}")
            }
            Self::TryCatch { body, catches } => {
                write!(f, "try {}", ctx.debug(&Block(body)))?;
                for catch in catches {
                    write!(f, " catch (")?;
                    for (i, exception) in catch.exceptions.iter().enumerate() {
                        if i > 0 {
                            write!(f, " | ")?;
                        }
                        match exception {
                            CatchType::Class(class) => write!(f, "{}", simple_name(class))?,
                            CatchType::Any => write!(f, "Throwable")?,
                        }
                    }
                    if let Some(local) = catch.local {
                        write!(f, " {}", ctx.locals[local].name)?;
                    }
                    write!(f, ") {}", ctx.debug(&Block(&catch.body)))?;
                }
                Ok(())
            }
            Self::Break { depth } => write_jump(f, "break", *depth),
            Self::Continue { depth } => write_jump(f, "continue", *depth),
            Self::Comment(lines) => {
                write!(f, "/*")?;
                for line in lines {
                    write!(f, "\n * {line}")?;
                }
                write!(f, "\n */")
            }
        }
    }
}
