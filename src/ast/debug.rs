use super::{DebugContext, ExprId, Statement};
use core::fmt;

/// Java-like rendering of the statement tree, for logs and tests. This is not a source emitter:
/// types are left out and labels on `break`/`continue` are shown as nesting depths.
pub trait DebugIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result;
}

impl<T: DebugIr + ?Sized> DebugIr for &T {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result {
        T::fmt(self, f, ctx)
    }
}

impl DebugIr for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result {
        DebugIr::fmt(&ctx.arena[*self], f, ctx)
    }
}

/// One statement per line.
impl DebugIr for [Statement] {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result {
        for stmt in self {
            writeln!(f, "{}", ctx.debug(stmt))?;
        }
        Ok(())
    }
}

/// A `{ ... }` block with its contents indented.
pub(super) struct Block<'a>(pub &'a [Statement]);

impl DebugIr for Block<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, ctx: DebugContext<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        let inner = ctx.debug(self.0).to_string();
        for line in inner.lines() {
            writeln!(f, "    {line}")?;
        }
        write!(f, "}}")
    }
}
