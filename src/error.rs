use std::{fmt, io};

use thiserror::Error;

/// Errors that reject a program before anything is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("line {line}: syntax error: {message}")]
    Syntax { line: usize, message: String },
    /// A `// BYTE n;` marker disagrees with the computed offset.
    #[error("line {line}: BYTE marker asserts offset {declared}, statement starts at {computed}")]
    LayoutMismatch {
        line: usize,
        declared: usize,
        computed: usize,
    },
    /// A `goto` names an offset that is not the start of an instruction.
    #[error("line {line}: goto({target}) does not point at the start of an instruction")]
    UnresolvedJump { line: usize, target: usize },
    #[error("program is {size} bytes, jump targets can only address {max}")]
    ProgramTooLarge { size: usize, max: usize },
}

impl CompileError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode {byte:#010b} at offset {offset}")]
    InvalidOpcode { offset: usize, byte: u8 },
    #[error("instruction at offset {offset} is truncated")]
    Truncated { offset: usize },
}

/// Error in a hand written assembly listing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct AsmError {
    pub line: usize,
    pub message: String,
}

impl AsmError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        AsmError {
            line,
            message: message.into(),
        }
    }
}

/// Reason the machine stopped executing.
#[derive(Debug, Error)]
pub enum FaultKind {
    /// The port bus does not expose the requested port.
    #[error("port {port} is not bound on this bus")]
    Port { port: u8 },
    /// A jump landed on an offset with no instruction.
    #[error("jump target {target} is not the start of an instruction")]
    InvalidJump { target: usize },
    /// Execution ran past the last instruction.
    #[error("execution ran past the end of the program")]
    OutOfBounds,
    #[error("device error on port {port}: {source}")]
    Device {
        port: u8,
        #[source]
        source: io::Error,
    },
}

/// A run time fault together with the machine state at the moment it occurred.
#[derive(Debug, Error)]
#[error("fault at offset {offset}: {kind} [{}]", StateDump(.registers, .variables))]
pub struct Fault {
    pub offset: usize,
    pub kind: FaultKind,
    pub registers: [u8; 4],
    pub variables: Vec<(String, u8)>,
}

struct StateDump<'a>(&'a [u8; 4], &'a [(String, u8)]);

impl fmt::Display for StateDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.0.iter().enumerate() {
            write!(f, "R{index}={value} ")?;
        }
        let mut vars = self.1.iter().peekable();
        while let Some((name, value)) = vars.next() {
            write!(f, "{name}={value}")?;
            if vars.peek().is_some() {
                write!(f, " ")?;
            }
        }
        Ok(())
    }
}
