use crate::ast::{ExprId, Expression, MethodBody, Statement, StmtList};
use crate::insn::ArithOp;
use crate::locals::Locals;
use crate::method::MethodCode;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Post-processor `{processor}` failed: {reason}")]
pub struct PostProcessError {
    pub processor: &'static str,
    pub reason: String,
}

pub trait StatementPostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(
        &self,
        method: &MethodCode,
        locals: &Locals,
        body: &mut MethodBody,
    ) -> Result<(), PostProcessError>;
}

/// Runs each processor in turn. A processor that fails leaves the body as it found it, and the
/// rest still run.
pub fn run_post_processors(
    processors: &[Box<dyn StatementPostProcessor>],
    method: &MethodCode,
    locals: &Locals,
    body: &mut MethodBody,
) {
    for processor in processors {
        let mut candidate = body.clone();
        match processor.process(method, locals, &mut candidate) {
            Ok(()) => *body = candidate,
            Err(error) => log::error!("{}.{}: {error}", method.owner, method.name),
        }
    }
}

/// Calls `f` on every statement list of the tree, innermost lists first.
pub fn walk_lists_mut(statements: &mut StmtList, f: &mut dyn FnMut(&mut StmtList)) {
    for statement in statements.iter_mut() {
        match statement {
            Statement::If { then, else_, .. } => {
                walk_lists_mut(then, f);
                walk_lists_mut(else_, f);
            }
            Statement::While { body, .. } | Statement::DoWhile { body, .. } => {
                walk_lists_mut(body, f);
            }
            Statement::For { update, body, .. } => {
                walk_lists_mut(body, f);
                walk_lists_mut(update, f);
            }
            Statement::Switch { cases, .. } => {
                for case in cases {
                    walk_lists_mut(&mut case.body, f);
                }
            }
            Statement::TryCatch { body, catches } => {
                walk_lists_mut(body, f);
                for catch in catches {
                    walk_lists_mut(&mut catch.body, f);
                }
            }
            _ => {}
        }
    }
    f(statements);
}

/// `x = x + c` and `x = x - c` become `x += c`/`x -= c`, or `x++`/`x--` for `c == 1`.
pub struct IncrementPostProcessor;

impl StatementPostProcessor for IncrementPostProcessor {
    fn name(&self) -> &'static str {
        "increment"
    }

    fn process(
        &self,
        _method: &MethodCode,
        _locals: &Locals,
        body: &mut MethodBody,
    ) -> Result<(), PostProcessError> {
        let arena = &body.arena;
        walk_lists_mut(&mut body.statements, &mut |statements: &mut StmtList| {
            for statement in statements.iter_mut() {
                let Statement::Assign { local, value } = *statement else {
                    continue;
                };
                let Expression::BinOp { op, lhs, rhs } = arena[value] else {
                    continue;
                };
                let is_local =
                    |id: ExprId| matches!(arena[id], Expression::Local(other) if other == local);
                let constant = |id: ExprId| match arena[id] {
                    Expression::ConstInt(value) => Some(value),
                    _ => None,
                };

                let amount = match op {
                    ArithOp::Add if is_local(lhs) => constant(rhs),
                    ArithOp::Add if is_local(rhs) => constant(lhs),
                    ArithOp::Sub if is_local(lhs) => constant(rhs).and_then(i32::checked_neg),
                    _ => None,
                };
                if let Some(amount) = amount {
                    *statement = Statement::Increment { local, amount };
                }
            }
        });
        Ok(())
    }
}
