mod append;
mod arena;
mod debug;
mod expression;
mod statement;

pub use self::append::{MethodBody, StatementError, append_sections};
pub use self::arena::{Arena, DebugContext, ExprId};
pub use self::debug::DebugIr;
pub use self::expression::{Condition, Expression};
pub use self::statement::{Catch, Statement, StmtList, SwitchCase};
