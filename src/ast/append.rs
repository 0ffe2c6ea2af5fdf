use super::{Arena, Catch, Condition, ExprId, Expression, Statement, StmtList, SwitchCase};
use crate::config::DecompilerConfig;
use crate::descriptor::{DescriptorError, MethodDescriptor};
use crate::insn::{Insn, InvokeKind};
use crate::locals::{Locals, LocalsError};
use crate::method::MethodCode;
use crate::structure::{
    BlockSection, CatchSection, ConditionSection, LoopKind, instruction_ranges,
};
use core::fmt::Display;
use core::ops::Range;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatementError {
    #[error("Instruction {0} pops more values than there are on the stack")]
    StackUnderflow(usize),

    #[error("Jump at instruction {0} is not accounted for by the structure")]
    UnexpectedJump(usize),

    #[error("Condition block ending at instruction {0} does not end with a conditional jump")]
    NotAConditional(usize),

    #[error("Condition starting at instruction {0} has side effects that cannot be placed")]
    StatementInCondition(usize),

    #[error("{0} values are left on the stack at the end of a block")]
    StackNotEmpty(usize),

    #[error("Failed to resolve a local: {0}")]
    Locals(#[from] LocalsError),

    #[error("Invalid method descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// The statement tree of a method together with the expressions it refers to.
#[derive(Clone, Debug)]
pub struct MethodBody {
    pub arena: Arena,
    pub statements: StmtList,
}

impl MethodBody {
    pub fn debug<'a>(&'a self, locals: &'a Locals) -> impl Display + 'a {
        self.arena.debug(locals, self.statements.as_slice())
    }
}

/// Builds statements from a section tree by executing the instructions it covers on a symbolic
/// operand stack.
///
/// Every statement list gets a stack of its own. Structured code never carries values across the
/// boundaries of nested constructs, so a list that ends with values still on the stack means the
/// structure is wrong, e.g. a ternary operator got split into an `if`. With
/// `print_opcodes_on_error` set, such a list is replaced with a comment instead.
pub fn append_sections(
    method: &MethodCode,
    locals: &Locals,
    sections: &[BlockSection],
    config: &DecompilerConfig,
) -> Result<MethodBody, StatementError> {
    let mut appender = Appender {
        method,
        instructions: &method.instructions,
        locals,
        config,
        arena: Arena::new(),
    };
    let statements = appender.list(sections, Vec::new())?;
    Ok(MethodBody {
        arena: appender.arena,
        statements,
    })
}

struct Appender<'a> {
    method: &'a MethodCode,
    instructions: &'a [Insn],
    locals: &'a Locals,
    config: &'a DecompilerConfig,
    arena: Arena,
}

fn pop(stack: &mut Vec<ExprId>, index: usize) -> Result<ExprId, StatementError> {
    stack.pop().ok_or(StatementError::StackUnderflow(index))
}

fn check_empty(stack: &[ExprId]) -> Result<(), StatementError> {
    if stack.is_empty() {
        Ok(())
    } else {
        Err(StatementError::StackNotEmpty(stack.len()))
    }
}

/// Where statements produced while evaluating a condition may go.
enum Prelude<'o> {
    /// Emitted right before the statement that owns the condition.
    Before(&'o mut StmtList),
    Forbidden,
}

impl Appender<'_> {
    fn list(
        &mut self,
        sections: &[BlockSection],
        stack: Vec<ExprId>,
    ) -> Result<StmtList, StatementError> {
        match self.try_list(sections, stack) {
            Err(error) if self.config.print_opcodes_on_error => {
                log::warn!(
                    "{}.{}: emitting {} sections as a comment: {error}",
                    self.method.owner,
                    self.method.name,
                    sections.len(),
                );
                Ok(vec![Statement::Comment(self.comment_lines(sections))])
            }
            result => result,
        }
    }

    fn try_list(
        &mut self,
        sections: &[BlockSection],
        mut stack: Vec<ExprId>,
    ) -> Result<StmtList, StatementError> {
        let mut out = Vec::new();
        for section in sections {
            self.section(section, &mut stack, &mut out)?;
        }
        check_empty(&stack)?;
        Ok(out)
    }

    /// The instructions covered by `sections`, in code order.
    fn comment_lines(&self, sections: &[BlockSection]) -> Vec<String> {
        let mut ranges = instruction_ranges(sections);
        ranges.sort_unstable_by_key(|range| range.start);
        ranges
            .into_iter()
            .flat_map(|range| &self.instructions[range])
            .map(|insn| insn.to_string())
            .collect()
    }

    fn section(
        &mut self,
        section: &BlockSection,
        stack: &mut Vec<ExprId>,
        out: &mut StmtList,
    ) -> Result<(), StatementError> {
        match section {
            BlockSection::Body { instructions } => self.body(instructions.clone(), stack, out),
            BlockSection::If {
                condition,
                then,
                else_,
            } => {
                let condition =
                    self.condition(condition, stack, &mut Prelude::Before(&mut *out))?;
                let then = self.list(then, Vec::new())?;
                let else_ = self.list(else_, Vec::new())?;
                out.push(Statement::If {
                    condition,
                    then,
                    else_,
                });
                Ok(())
            }
            BlockSection::Loop {
                kind,
                condition,
                body,
                update,
            } => {
                let statement = self.loop_(*kind, condition.as_ref(), body, update)?;
                out.push(statement);
                Ok(())
            }
            BlockSection::Switch { key, cases } => {
                let switch = key.end - 1;
                if !matches!(self.instructions[switch], Insn::Switch { .. }) {
                    return Err(StatementError::UnexpectedJump(switch));
                }
                self.body(key.start..switch, stack, out)?;
                let key = pop(stack, switch)?;
                let mut switch_cases = Vec::with_capacity(cases.len());
                for case in cases {
                    switch_cases.push(SwitchCase {
                        values: case.values.clone(),
                        is_default: case.is_default,
                        body: self.list(&case.body, Vec::new())?,
                    });
                }
                out.push(Statement::Switch {
                    key,
                    cases: switch_cases,
                });
                Ok(())
            }
            BlockSection::TryCatch { body, catches } => {
                let body = self.list(body, Vec::new())?;
                let catches = catches
                    .iter()
                    .map(|catch| self.catch(catch))
                    .collect::<Result<_, _>>()?;
                out.push(Statement::TryCatch { body, catches });
                Ok(())
            }
            BlockSection::Break { depth, .. } => {
                out.push(Statement::Break { depth: *depth });
                Ok(())
            }
            BlockSection::Continue { depth, .. } => {
                out.push(Statement::Continue { depth: *depth });
                Ok(())
            }
            BlockSection::Comment { lines, .. } => {
                out.push(Statement::Comment(lines.clone()));
                Ok(())
            }
        }
    }

    fn loop_(
        &mut self,
        kind: LoopKind,
        condition: Option<&ConditionSection>,
        body: &[BlockSection],
        update: &[BlockSection],
    ) -> Result<Statement, StatementError> {
        match (kind, condition) {
            (LoopKind::DoWhile, Some(condition)) => {
                // Effects of the test go at the end of the body.
                let mut stack = Vec::new();
                let mut statements = Vec::new();
                for section in body {
                    self.section(section, &mut stack, &mut statements)?;
                }
                let condition =
                    self.condition(condition, &mut stack, &mut Prelude::Before(&mut statements))?;
                check_empty(&stack)?;
                Ok(Statement::DoWhile {
                    condition,
                    body: statements,
                })
            }
            (LoopKind::For, Some(condition)) => {
                let mut stack = Vec::new();
                let condition = self.condition(condition, &mut stack, &mut Prelude::Forbidden)?;
                check_empty(&stack)?;
                Ok(Statement::For {
                    condition,
                    update: self.list(update, Vec::new())?,
                    body: self.list(body, Vec::new())?,
                })
            }
            (_, Some(condition)) => {
                let mut stack = Vec::new();
                let condition = self.condition(condition, &mut stack, &mut Prelude::Forbidden)?;
                check_empty(&stack)?;
                Ok(Statement::While {
                    condition: Some(condition),
                    body: self.list(body, Vec::new())?,
                })
            }
            (_, None) => Ok(Statement::While {
                condition: None,
                body: self.list(body, Vec::new())?,
            }),
        }
    }

    fn catch(&mut self, catch: &CatchSection) -> Result<Catch, StatementError> {
        // Without a binding instruction the handler starts with the exception on the stack.
        let bound = self.instructions[catch.header.clone()]
            .iter()
            .any(|insn| !insn.is_marker());
        let mut stack = Vec::new();
        if !bound {
            stack.push(
                self.arena
                    .alloc(Expression::CaughtException(catch.exceptions.clone())),
            );
        }
        Ok(Catch {
            exceptions: catch.exceptions.clone(),
            local: catch.local,
            body: self.list(&catch.body, stack)?,
        })
    }

    /// Only the first jump of a chain may be preceded by statements; later ones would run
    /// conditionally, which a plain condition cannot express.
    fn condition(
        &mut self,
        section: &ConditionSection,
        stack: &mut Vec<ExprId>,
        prelude: &mut Prelude<'_>,
    ) -> Result<Condition, StatementError> {
        match section {
            ConditionSection::Jump {
                instructions,
                negate,
            } => {
                let jump = instructions.end - 1;
                let Insn::Jump { condition, .. } = self.instructions[jump] else {
                    return Err(StatementError::NotAConditional(jump));
                };

                let mut effects = Vec::new();
                self.body(instructions.start..jump, stack, &mut effects)?;
                match prelude {
                    Prelude::Before(out) => out.append(&mut effects),
                    Prelude::Forbidden if !effects.is_empty() => {
                        return Err(StatementError::StatementInCondition(instructions.start));
                    }
                    Prelude::Forbidden => {}
                }
                *prelude = Prelude::Forbidden;

                let (lhs, rhs) = if condition.operand_count() == 2 {
                    let rhs = pop(stack, jump)?;
                    (pop(stack, jump)?, rhs)
                } else if condition.compares_to_null() {
                    (pop(stack, jump)?, self.arena.null())
                } else {
                    (pop(stack, jump)?, self.arena.int(0))
                };
                let compare = Condition::Compare {
                    op: condition.comparison(),
                    lhs,
                    rhs,
                };
                Ok(if *negate { compare.negate() } else { compare })
            }
            ConditionSection::And(parts) => Ok(Condition::And(self.parts(parts, stack, prelude)?)),
            ConditionSection::Or(parts) => Ok(Condition::Or(self.parts(parts, stack, prelude)?)),
            ConditionSection::Not(inner) => Ok(self.condition(inner, stack, prelude)?.negate()),
        }
    }

    fn parts(
        &mut self,
        parts: &[ConditionSection],
        stack: &mut Vec<ExprId>,
        prelude: &mut Prelude<'_>,
    ) -> Result<Vec<Condition>, StatementError> {
        parts
            .iter()
            .map(|part| self.condition(part, stack, prelude))
            .collect()
    }

    fn body(
        &mut self,
        instructions: Range<usize>,
        stack: &mut Vec<ExprId>,
        out: &mut StmtList,
    ) -> Result<(), StatementError> {
        let code = self.instructions;
        let end = instructions.end;
        for index in instructions {
            match &code[index] {
                // A trailing goto is the fallthrough the structure already expresses.
                Insn::Goto(_) if index + 1 == end => {}
                insn if insn.is_jump() => return Err(StatementError::UnexpectedJump(index)),
                _ => self.insn(index, stack, out)?,
            }
        }
        Ok(())
    }

    fn insn(
        &mut self,
        index: usize,
        stack: &mut Vec<ExprId>,
        out: &mut StmtList,
    ) -> Result<(), StatementError> {
        let instructions = self.instructions;
        match &instructions[index] {
            Insn::Label(_) | Insn::LineNumber(_) | Insn::Nop => {}
            Insn::ConstNull => stack.push(self.arena.null()),
            Insn::ConstInt(value) => stack.push(self.arena.int(*value)),
            Insn::ConstString(value) => {
                stack.push(self.arena.alloc(Expression::ConstString(value.clone())));
            }
            Insn::Load { slot, .. } => {
                let local = self.locals.resolve(*slot, index)?;
                stack.push(self.arena.local(local));
            }
            Insn::Store { slot, .. } => {
                let value = pop(stack, index)?;
                let local = self.locals.resolve(*slot, index)?;
                out.push(Statement::Assign { local, value });
            }
            Insn::Increment { slot, amount } => {
                let local = self.locals.resolve(*slot, index)?;
                out.push(Statement::Increment {
                    local,
                    amount: i32::from(*amount),
                });
            }
            Insn::Arithmetic { op, .. } => {
                let rhs = pop(stack, index)?;
                let lhs = pop(stack, index)?;
                stack.push(self.arena.alloc(Expression::BinOp { op: *op, lhs, rhs }));
            }
            Insn::Pop => {
                let value = pop(stack, index)?;
                if self.arena[value].has_side_effects() {
                    out.push(Statement::Expression(value));
                }
            }
            Insn::Dup => {
                let value = *stack.last().ok_or(StatementError::StackUnderflow(index))?;
                stack.push(value);
            }
            Insn::New(class) => {
                stack.push(self.arena.alloc(Expression::NewUninitialized {
                    class: class.clone(),
                }));
            }
            Insn::GetField {
                owner,
                name,
                is_static,
                ..
            } => {
                let object = if *is_static {
                    None
                } else {
                    Some(pop(stack, index)?)
                };
                stack.push(self.arena.alloc(Expression::Field {
                    object,
                    owner: owner.clone(),
                    name: name.clone(),
                }));
            }
            Insn::PutField {
                owner,
                name,
                is_static,
                ..
            } => {
                let value = pop(stack, index)?;
                let object = if *is_static {
                    None
                } else {
                    Some(pop(stack, index)?)
                };
                out.push(Statement::FieldAssign {
                    object,
                    owner: owner.clone(),
                    name: name.clone(),
                    value,
                });
            }
            Insn::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } => self.invoke(index, *kind, owner, name, descriptor, stack, out)?,
            Insn::Jump { .. } | Insn::Goto(_) | Insn::Switch { .. } => {
                return Err(StatementError::UnexpectedJump(index));
            }
            Insn::Return(None) => out.push(Statement::Return(None)),
            Insn::Return(Some(_)) => {
                let value = pop(stack, index)?;
                out.push(Statement::Return(Some(value)));
            }
            Insn::Throw => {
                let value = pop(stack, index)?;
                out.push(Statement::Throw(value));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn invoke(
        &mut self,
        index: usize,
        kind: InvokeKind,
        owner: &str,
        name: &str,
        descriptor: &str,
        stack: &mut Vec<ExprId>,
        out: &mut StmtList,
    ) -> Result<(), StatementError> {
        let parsed = MethodDescriptor::parse(descriptor)?;
        let mut arguments = parsed
            .parameters()
            .iter()
            .map(|_| pop(stack, index))
            .collect::<Result<Vec<_>, _>>()?;
        arguments.reverse();

        let object = match kind {
            InvokeKind::Static => None,
            _ => Some(pop(stack, index)?),
        };

        // `new C; dup; invokespecial C.<init>` initializes the object in place.
        if kind == InvokeKind::Special
            && name == "<init>"
            && let Some(object) = object
            && let Expression::NewUninitialized { class } = &self.arena[object]
        {
            let class = class.clone();
            self.arena[object] = Expression::New {
                class,
                descriptor: descriptor.to_string(),
                arguments,
            };
            if !stack.contains(&object) {
                out.push(Statement::Expression(object));
            }
            return Ok(());
        }

        let call = self.arena.alloc(Expression::Call {
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            object,
            arguments,
        });
        if parsed.return_type().is_some() {
            stack.push(call);
        } else {
            out.push(Statement::Expression(call));
        }
        Ok(())
    }
}
