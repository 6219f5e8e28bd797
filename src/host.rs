//! Seam between the profiler and the host interpreter.
//!
//! The interpreter is an external collaborator: it registers the profiler's
//! statement handler at its statement-dispatch slots (all variants route to
//! the same handler) and wraps its call-dispatch slot around
//! [`crate::profiler::Profiler::sub_call`]. These traits are the whole
//! surface the profiler needs back from the host.

/// Scope kinds a call frame can open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Sub,
    Format,
    Loop,
    Eval,
    Block,
}

impl FrameKind {
    /// Frames that fix the enclosing-sub line during a context walk.
    pub fn is_sub(self) -> bool {
        matches!(self, FrameKind::Sub | FrameKind::Format)
    }
}

/// Minimal execution-order view of the host's op tree.
///
/// A cursor is positioned on one op; `advance` moves to the next op within
/// the scope being inspected and reports whether one existed.
pub trait OpCursor {
    fn advance(&mut self) -> bool;
    /// Whether the current op is a "new statement" op.
    fn is_statement(&self) -> bool;
    /// Source unit of the current op, as the interpreter names it.
    fn file(&self) -> &str;
    /// Line of the current op; 0 when the op was optimized away.
    fn line(&self) -> u32;
}

/// One frame of the host's dynamic scope stack.
pub struct FrameInfo<'a> {
    pub kind: FrameKind,
    /// Package the frame's code belongs to.
    pub package: &'a str,
    /// Cursor at the scope's start op: the entry op for subs and formats,
    /// the redo target for loops, the saved statement op for evals and
    /// generic blocks. `None` when the host no longer has it.
    pub start: Option<Box<dyn OpCursor + 'a>>,
}

/// The callable a call op is about to invoke, as far as the host can tell.
pub enum Callee<'a> {
    /// A code object. `stash` and `name` identify the *defining* package and
    /// name; `glob` is the effective full name of the symbol-table entry the
    /// call went through.
    Code {
        stash: Option<&'a str>,
        name: Option<&'a str>,
        glob: Option<&'a str>,
    },
    /// A plain string naming the sub, used verbatim.
    Name(&'a str),
    /// An unnamed callable.
    Anonymous,
    /// Anything else; the payload is a debug representation.
    Other(&'a str),
}

/// The host's original "enter subroutine" handler, wrapped for one dispatch.
///
/// `next_op` is the token of the op that would follow if the callee ran to
/// completion inside the call op (a native extension routine); `run` invokes
/// the original handler and returns the token of the op actually scheduled
/// next. The two differing means the interpreter entered the callee's body.
pub struct CallDispatch<'a> {
    pub next_op: usize,
    pub run: Box<dyn FnMut() -> usize + 'a>,
}

/// Host interpreter surface the profiler drives.
pub trait Interpreter {
    /// Cursor at the statement op about to execute, or `None` when the host
    /// has no current op. Advancing the cursor scans the op's sibling
    /// subtree, which the statement hook uses to borrow a line number when
    /// the op itself carries none.
    fn statement_op(&self) -> Option<Box<dyn OpCursor + '_>>;

    /// Dynamic frame stack, innermost first.
    fn frames(&self) -> Vec<FrameInfo<'_>>;

    /// Visit the host's known-subroutines map. Values are of the form
    /// `<file>:<first>-<last>` for interpreted subs; native subs carry other
    /// strings and are skipped by the finalizer.
    fn each_known_sub(&self, visit: &mut dyn FnMut(&str, &str));

    /// Program name as the host reports it.
    fn program_name(&self) -> &str {
        "?"
    }
}
