//! Byte offsets of statements and instructions.
//!
//! `// BYTE n;` markers in the source assert the offset of whatever follows
//! them and are checked here, as are `goto` targets.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{
    ast::{Item, Program, StatementKind},
    codegen::Lowering,
    error::CompileError,
    isa::MAX_PROGRAM_SIZE,
};

/// Offsets computed for a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Start offset of every statement, in statement order
    pub offsets: Vec<usize>,
    /// Start offset of every instruction
    pub starts: BTreeSet<usize>,
    /// Size of the encoded stream
    pub size: usize,
}

impl Layout {
    /// Whether an instruction starts at `offset`.
    pub fn is_instruction_start(&self, offset: usize) -> bool {
        self.starts.contains(&offset)
    }
}

/// Walk the program in source order and assign offsets.
pub fn assign(program: &Program) -> Result<Layout, CompileError> {
    let lowering = Lowering::new(program);
    let mut offset = 0;
    let mut offsets = Vec::new();
    let mut starts = BTreeSet::new();

    for item in &program.items {
        match item {
            Item::Marker { offset: declared, line } => {
                if *declared != offset {
                    return Err(CompileError::LayoutMismatch {
                        line: *line,
                        declared: *declared,
                        computed: offset,
                    });
                }
            }
            Item::Statement(statement) => {
                offsets.push(offset);
                for instruction in lowering.statement(statement)? {
                    starts.insert(offset);
                    offset += instruction.width();
                }
            }
        }
    }

    if offset > MAX_PROGRAM_SIZE {
        return Err(CompileError::ProgramTooLarge {
            size: offset,
            max: MAX_PROGRAM_SIZE,
        });
    }

    for statement in program.statements() {
        if let StatementKind::Goto { target } = statement.kind {
            if !starts.contains(&target) {
                return Err(CompileError::UnresolvedJump {
                    line: statement.line,
                    target,
                });
            }
        }
    }

    debug!(size = offset, statements = offsets.len(), "layout assigned");

    Ok(Layout {
        offsets,
        starts,
        size: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn layout(source: &str) -> Result<Layout, CompileError> {
        assign(&parse(source).unwrap())
    }

    #[test]
    fn offsets_accumulate_widths() {
        let layout = layout("uint8 x = 60;\nuint8 y = 60;\nwrite_port(0, x);\ngoto(4);").unwrap();
        assert_eq!(layout.offsets, vec![0, 4, 8, 11]);
        assert_eq!(layout.size, 13);
        assert!(layout.is_instruction_start(4));
        assert!(layout.is_instruction_start(10));
        assert!(!layout.is_instruction_start(5));
    }

    #[test]
    fn matching_markers() {
        let source = "// BYTE 0;\nuint8 x = 60;\n// BYTE 4;\nwrite_port(0, x);\n// BYTE 7;";
        assert_eq!(layout(source).unwrap().size, 7);
    }

    #[test]
    fn mismatched_marker() {
        let source = "uint8 x = 60;\n// BYTE 5;\nwrite_port(0, x);";
        assert_eq!(
            layout(source),
            Err(CompileError::LayoutMismatch {
                line: 2,
                declared: 5,
                computed: 4,
            })
        );
    }

    #[test]
    fn goto_into_the_middle_of_an_instruction() {
        let source = "uint8 x = 60;\ngoto(1);";
        assert_eq!(
            layout(source),
            Err(CompileError::UnresolvedJump { line: 2, target: 1 })
        );
    }

    #[test]
    fn goto_past_the_end() {
        let source = "uint8 x = 60;\ngoto(6);";
        assert_eq!(
            layout(source),
            Err(CompileError::UnresolvedJump { line: 2, target: 6 })
        );
    }

    #[test]
    fn oversized_program() {
        let source: String = (0..65).map(|i| format!("uint8 v{i} = 0;\n")).collect();
        assert_eq!(
            layout(&source),
            Err(CompileError::ProgramTooLarge { size: 260, max: 256 })
        );
    }
}
