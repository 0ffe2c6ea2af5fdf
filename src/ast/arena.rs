use super::{DebugIr, Expression};
use crate::locals::{LocalId, Locals};
use core::fmt::{self, Display};
use core::ops::{Index, IndexMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Owns every expression of one method body. Statements and operand stacks refer to expressions
/// by ID, so a value duplicated with `dup` is a single node referenced twice.
#[derive(Clone, Debug, Default)]
pub struct Arena {
    expressions: Vec<Expression>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn alloc(&mut self, expr: Expression) -> ExprId {
        let id = ExprId(
            u32::try_from(self.expressions.len()).expect("cannot allocate this many expressions"),
        );
        self.expressions.push(expr);
        id
    }

    pub fn int(&mut self, value: i32) -> ExprId {
        self.alloc(Expression::ConstInt(value))
    }

    pub fn null(&mut self) -> ExprId {
        self.alloc(Expression::Null)
    }

    pub fn local(&mut self, id: LocalId) -> ExprId {
        self.alloc(Expression::Local(id))
    }

    /// Pairs the arena with the variable names needed to print its contents.
    pub fn debug<'a, T: DebugIr + ?Sized>(
        &'a self,
        locals: &'a Locals,
        value: &'a T,
    ) -> impl Display + 'a {
        DebugContext {
            arena: self,
            locals,
        }
        .debug(value)
    }
}

impl Index<ExprId> for Arena {
    type Output = Expression;

    fn index(&self, id: ExprId) -> &Self::Output {
        &self.expressions[id.0 as usize]
    }
}

impl IndexMut<ExprId> for Arena {
    fn index_mut(&mut self, id: ExprId) -> &mut Self::Output {
        &mut self.expressions[id.0 as usize]
    }
}

/// Everything the printer needs to resolve IDs.
#[derive(Clone, Copy)]
pub struct DebugContext<'a> {
    pub arena: &'a Arena,
    pub locals: &'a Locals,
}

impl<'a> DebugContext<'a> {
    pub fn debug<T: DebugIr + ?Sized>(self, value: &'a T) -> impl Display + 'a {
        struct IrDisplay<'a, T: ?Sized> {
            value: &'a T,
            ctx: DebugContext<'a>,
        }

        impl<T: DebugIr + ?Sized> Display for IrDisplay<'_, T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                T::fmt(self.value, f, self.ctx)
            }
        }

        IrDisplay { value, ctx: self }
    }
}
