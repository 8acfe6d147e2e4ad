//! byteport compiles small device control programs to a compact byte stream
//! and runs them against an eight port bus.
//!
//! # Example
//!
//! ```text
//! // KEYBOARD;
//! // BYTE 0;
//! const MIN = 0;
//! const MAX = 119;
//! uint8 x = 60;
//! let key = read_port(7);
//! if (key == 0b01011110) { x = x - 1 };
//! if (x > MAX) { x = MAX };
//! write_port(0, x);
//! goto(4);
//! ```
//!
//! A program is compiled in three stages: [`parser::parse`] builds the
//! [`ast::Program`], [`layout::assign`] computes the byte offset of every
//! statement and checks the `// BYTE n;` markers, and [`codegen::generate`]
//! emits the [`Bytecode`]. [`compile`] runs all three.
//!
//! # Statements
//!
//! | Statement | Usage                         | Brief   |
//! |-----------|-------------------------------|---------|
//! | Const     | `const NAME = 0..255;`        | Named literal, substituted at compile time. Takes no storage. |
//! | Declare   | `uint8 v = expr;` / `let v = expr;` | Allocate the next storage slot and store `expr` in it. |
//! | Assign    | `v = expr;`                   | Store `expr` in `v`. |
//! | If        | `if (a op b) { v = expr, w = expr };` | Run the comma separated assignments when `a op b` holds. `op` is `==`, `>` or `<`. `read_port` is only allowed in the condition. |
//! | WritePort | `write_port(p, expr);`        | Write `expr` to port `p`. |
//! | Goto      | `goto(offset);`               | Continue at byte `offset`. Ends the current pass. |
//!
//! Expressions are a literal, a variable, a constant, `read_port(p)` or a
//! single `a + b` / `a - b`. All arithmetic wraps at 8 bits.
//!
//! # Instructions
//!
//! | Instruction | Usage          | Width | Brief   |
//! |-------------|----------------|-------|---------|
//! | Add         | `ADD Rd, Rs`   | 1 | `Rd = Rd + Rs`, wrapping |
//! | Sub         | `SUB Rd, Rs`   | 1 | `Rd = Rd - Rs`, wrapping |
//! | Ceq         | `CEQ Rd, Rs`   | 1 | Set the flag when `Rd == Rs` |
//! | Cgt         | `CGT Rd, Rs`   | 1 | Set the flag when `Rd > Rs` |
//! | Clt         | `CLT Rd, Rs`   | 1 | Set the flag when `Rd < Rs` |
//! | In          | `IN Rr, p`     | 1 | Read port `p` into `Rr` |
//! | Out         | `OUT Rr, p`    | 1 | Write `Rr` to port `p` |
//! | Mov         | `MOV Rr, imm`  | 2 | Load an immediate |
//! | Ldr         | `LDR Rr, @s`   | 2 | Load slot `s` |
//! | Str         | `STR Rr, @s`   | 2 | Store to slot `s` |
//! | Stc         | `STC Rr, @s`   | 2 | Store to slot `s` if the flag is set |
//! | Jmp         | `JMP addr`     | 2 | Continue at byte `addr` |
//!
//! # Important notes
//!
//! - Every marker must equal the computed offset, otherwise nothing is produced.
//! - A `goto` must land on the first byte of an instruction.
//! - Ports are only touched by `IN` and `OUT`. Whether a port resets after a
//!   read is up to the [`ports::PortBus`] implementation.

pub mod asm;
pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod error;
pub mod isa;
pub mod layout;
mod lexer;
pub mod parser;
pub mod ports;
pub mod token;
pub mod vm;

pub use bytecode::{Bytecode, Symbol};
pub use error::{AsmError, CompileError, DecodeError, Fault, FaultKind};
pub use ports::{FilePorts, PortBus, PortWrite, RegisterPorts};
pub use vm::{HaltReason, PortVm, Step, VmState};

/// Parse, lay out and generate code for `source`.
pub fn compile(source: &str) -> Result<Bytecode, CompileError> {
    let program = parser::parse(source)?;
    let layout = layout::assign(&program)?;
    codegen::generate(&program, &layout)
}
