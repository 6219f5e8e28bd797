//! Recovers the starting lines of the enclosing sub and block scopes.

use crate::host::{Interpreter, OpCursor};

pub struct ScopeLines {
    pub block_line: u32,
    pub sub_line: u32,
}

enum ScanResult {
    SameFile(u32),
    OtherFile,
}

/// Walk the host's frame stack, innermost first, and return the source line
/// that starts the nearest enclosing block-like scope and the nearest
/// enclosing sub. Only scopes that start in `file` count; a scope starting
/// in another source unit (including the compiling line of a string eval
/// that execution has since left) falls back to the executing line. When
/// nothing applies, both default to `line`.
pub fn scope_lines(
    interp: &dyn Interpreter,
    file: &str,
    line: u32,
    own_package: &str,
) -> ScopeLines {
    let mut block_line = 0u32;
    let mut sub_line = 0u32;

    for frame in interp.frames() {
        if !own_package.is_empty() && frame.package == own_package {
            continue;
        }
        let start = match frame.start {
            Some(start) => start,
            None => continue,
        };
        match first_statement(start, file) {
            None => continue,
            Some(ScanResult::OtherFile) => break,
            Some(ScanResult::SameFile(scope_line)) => {
                if frame.kind.is_sub() {
                    if sub_line == 0 {
                        sub_line = scope_line;
                    }
                    if block_line == 0 {
                        // A sub with no inner block is its own block.
                        block_line = scope_line;
                    }
                    // Outer frames belong to callers.
                    break;
                }
                if block_line == 0 {
                    block_line = scope_line;
                }
            }
        }
    }

    ScopeLines {
        block_line: if block_line == 0 { line } else { block_line },
        sub_line: if sub_line == 0 { line } else { sub_line },
    }
}

// Scan forward from the scope's start op to the first "new statement" op;
// its line is where the scope begins.
fn first_statement(mut cursor: Box<dyn OpCursor + '_>, file: &str) -> Option<ScanResult> {
    loop {
        if cursor.is_statement() {
            return if cursor.file() == file {
                Some(ScanResult::SameFile(cursor.line()))
            } else {
                log::trace!(
                    "scope starts in {}, not the executing file {}",
                    cursor.file(),
                    file
                );
                Some(ScanResult::OtherFile)
            };
        }
        if !cursor.advance() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::{plain_op, stmt_op, MockFrame, MockInterp};
    use crate::host::FrameKind;

    fn frame(kind: FrameKind, package: &str, ops: Vec<crate::host::mock::MockOp>) -> MockFrame {
        MockFrame {
            kind,
            package: package.to_owned(),
            start: Some(ops),
        }
    }

    #[test]
    fn test_block_and_sub_lines_found() {
        let mut interp = MockInterp::at("t.src", 15);
        interp.frames = vec![
            frame(FrameKind::Loop, "main", vec![plain_op("t.src", 0), stmt_op("t.src", 12)]),
            frame(FrameKind::Sub, "main", vec![stmt_op("t.src", 10)]),
        ];
        let scopes = scope_lines(&interp, "t.src", 15, "");
        assert_eq!(scopes.block_line, 12);
        assert_eq!(scopes.sub_line, 10);
    }

    #[test]
    fn test_sub_line_doubles_as_block_line() {
        let mut interp = MockInterp::at("t.src", 11);
        interp.frames = vec![frame(FrameKind::Sub, "main", vec![stmt_op("t.src", 10)])];
        let scopes = scope_lines(&interp, "t.src", 11, "");
        assert_eq!(scopes.block_line, 10);
        assert_eq!(scopes.sub_line, 10);
    }

    #[test]
    fn test_walk_stops_at_first_sub() {
        let mut interp = MockInterp::at("t.src", 21);
        interp.frames = vec![
            frame(FrameKind::Sub, "main", vec![stmt_op("t.src", 20)]),
            // Caller frames past the innermost sub must not be consulted.
            frame(FrameKind::Loop, "main", vec![stmt_op("t.src", 3)]),
        ];
        let scopes = scope_lines(&interp, "t.src", 21, "");
        assert_eq!(scopes.sub_line, 20);
        assert_eq!(scopes.block_line, 20);
    }

    #[test]
    fn test_other_file_falls_back_to_executing_line() {
        let mut interp = MockInterp::at("inner.src", 7);
        interp.frames = vec![frame(FrameKind::Sub, "main", vec![stmt_op("outer.src", 40)])];
        let scopes = scope_lines(&interp, "inner.src", 7, "");
        assert_eq!(scopes.block_line, 7);
        assert_eq!(scopes.sub_line, 7);
    }

    #[test]
    fn test_own_package_frames_are_skipped() {
        let mut interp = MockInterp::at("t.src", 9);
        interp.frames = vec![
            frame(FrameKind::Sub, "Profiler::Hook", vec![stmt_op("t.src", 1)]),
            frame(FrameKind::Sub, "main", vec![stmt_op("t.src", 5)]),
        ];
        let scopes = scope_lines(&interp, "t.src", 9, "Profiler::Hook");
        assert_eq!(scopes.sub_line, 5);
    }

    #[test]
    fn test_no_frames_defaults_to_current_line() {
        let interp = MockInterp::at("t.src", 33);
        let scopes = scope_lines(&interp, "t.src", 33, "");
        assert_eq!(scopes.block_line, 33);
        assert_eq!(scopes.sub_line, 33);
    }

    #[test]
    fn test_frame_without_statement_op_is_ignored() {
        let mut interp = MockInterp::at("t.src", 4);
        interp.frames = vec![
            frame(FrameKind::Block, "main", vec![plain_op("t.src", 0)]),
            frame(FrameKind::Sub, "main", vec![stmt_op("t.src", 2)]),
        ];
        let scopes = scope_lines(&interp, "t.src", 4, "");
        assert_eq!(scopes.sub_line, 2);
        assert_eq!(scopes.block_line, 2);
    }
}
