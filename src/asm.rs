//! Assembly listing of a bytecode image, and the assembler that reads it back.
//!
//! # Format
//!
//! ```text
//! .device KEYBOARD
//! .var x @0 = 60
//!     0: MOV R0, 60
//!     2: STR R0, @0      ; x
//! loop:
//!     4: IN R0, 7
//!     5: JMP loop
//! ```
//!
//! - `;` starts a comment
//! - `.device` and `.var` rebuild the device name and the variable table
//! - `name:` defines a label usable as a `JMP` target
//! - `N:` asserts that the next instruction starts at offset `N`
//! - memory operands are `@slot` or the name of a `.var`

use std::{collections::HashMap, fmt::Write as _};

use tracing::debug;

use crate::{
    bytecode::{Bytecode, Symbol},
    error::{AsmError, DecodeError},
    isa::{encode_all, AluOp, Instruction, Register, MAX_PROGRAM_SIZE, PORT_COUNT},
};

/// Render `bytecode` as an assembly listing.
pub fn listing(bytecode: &Bytecode) -> Result<String, DecodeError> {
    let mut out = String::new();

    if let Some(device) = &bytecode.device {
        let _ = writeln!(out, ".device {device}");
    }
    for symbol in &bytecode.symbols {
        // Placeholder names of raw images are slots already
        if symbol.name.starts_with('@') {
            continue;
        }
        let _ = writeln!(out, ".var {} @{} = {}", symbol.name, symbol.slot, symbol.initial);
    }

    for (offset, instruction) in bytecode.instructions()? {
        let text = format!("{offset:>5}: {instruction}");
        let slot = match instruction {
            Instruction::Ldr { slot, .. }
            | Instruction::Str { slot, .. }
            | Instruction::Stc { slot, .. } => Some(slot),
            _ => None,
        };
        match slot.and_then(|slot| bytecode.symbol(slot)) {
            Some(symbol) if !symbol.name.starts_with('@') => {
                let _ = writeln!(out, "{text:<24}; {}", symbol.name);
            }
            _ => {
                let _ = writeln!(out, "{text}");
            }
        }
    }

    Ok(out)
}

/// A source line holding one instruction.
struct AsmLine<'a> {
    line: usize,
    mnemonic: &'a str,
    operands: Vec<&'a str>,
}

type AResult<T> = Result<T, AsmError>;

/// Assembler state while reading one listing.
struct Assembler<'a> {
    device: Option<String>,
    symbols: Vec<Symbol>,
    labels: HashMap<&'a str, usize>,
    lines: Vec<AsmLine<'a>>,
}

/// Assemble a listing into bytecode.
pub fn assemble(source: &str) -> AResult<Bytecode> {
    let mut assembler = Assembler {
        device: None,
        symbols: Vec::new(),
        labels: HashMap::new(),
        lines: Vec::new(),
    };
    assembler.scan(source)?;

    let instructions = assembler
        .lines
        .iter()
        .map(|line| assembler.parse_instruction(line))
        .collect::<AResult<Vec<_>>>()?;
    let code = encode_all(&instructions);

    debug!(bytes = code.len(), labels = assembler.labels.len(), "assembled listing");

    if assembler.symbols.is_empty() {
        let mut bytecode = Bytecode::from_raw(code).map_err(|err| AsmError::new(0, err.to_string()))?;
        bytecode.device = assembler.device;
        return Ok(bytecode);
    }

    Ok(Bytecode {
        code,
        symbols: assembler.symbols,
        device: assembler.device,
    })
}

impl<'a> Assembler<'a> {
    /// First pass: directives, labels and instruction offsets.
    fn scan(&mut self, source: &'a str) -> AResult<()> {
        let mut offset = 0;

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let text = raw.split(';').next().unwrap_or_default().trim();
            if text.is_empty() {
                continue;
            }

            if let Some(rest) = text.strip_prefix(".device") {
                self.device = Some(rest.trim().to_string());
                continue;
            }
            if let Some(rest) = text.strip_prefix(".var") {
                self.parse_var(rest, line)?;
                continue;
            }

            let mut words = text
                .split(|ch: char| ch == ',' || ch.is_whitespace())
                .filter(|word| !word.is_empty())
                .peekable();

            while let Some(word) = words.peek().copied() {
                let Some(label) = word.strip_suffix(':') else {
                    break;
                };
                words.next();
                if let Ok(asserted) = label.parse::<usize>() {
                    if asserted != offset {
                        return Err(AsmError::new(
                            line,
                            format!("offset {asserted} asserted, instruction starts at {offset}"),
                        ));
                    }
                } else if self.labels.insert(label, offset).is_some() {
                    return Err(AsmError::new(line, format!("label '{label}' is already defined")));
                }
            }

            let Some(mnemonic) = words.next() else {
                continue;
            };
            let width = width_of(mnemonic)
                .ok_or_else(|| AsmError::new(line, format!("unknown instruction '{mnemonic}'")))?;

            self.lines.push(AsmLine {
                line,
                mnemonic,
                operands: words.collect(),
            });
            offset += width;
        }

        if offset > MAX_PROGRAM_SIZE {
            return Err(AsmError::new(
                0,
                format!("listing is {offset} bytes, jump targets can only address {MAX_PROGRAM_SIZE}"),
            ));
        }

        Ok(())
    }

    /// `.var NAME @SLOT [= VALUE]`
    fn parse_var(&mut self, rest: &str, line: usize) -> AResult<()> {
        let words: Vec<&str> = rest.split_whitespace().collect();
        let (name, slot, initial) = match words.as_slice() {
            [name, slot] => (*name, *slot, "0"),
            [name, slot, "=", value] => (*name, *slot, *value),
            _ => return Err(AsmError::new(line, "expected '.var NAME @SLOT = VALUE'")),
        };

        let slot = slot
            .strip_prefix('@')
            .ok_or_else(|| AsmError::new(line, format!("expected @slot, got '{slot}'")))
            .and_then(|slot| parse_u8(slot, line))?;
        if self.symbols.iter().any(|symbol| symbol.name == name || symbol.slot == slot) {
            return Err(AsmError::new(line, format!("variable '{name}' or slot @{slot} is already defined")));
        }

        self.symbols.push(Symbol {
            name: name.to_string(),
            slot,
            initial: parse_u8(initial, line)?,
        });
        Ok(())
    }

    /// Second pass: operands of one instruction.
    fn parse_instruction(&self, asm: &AsmLine<'a>) -> AResult<Instruction> {
        let line = asm.line;
        let operands = &asm.operands;
        let expect = |count: usize| {
            if operands.len() == count {
                Ok(())
            } else {
                Err(AsmError::new(
                    line,
                    format!("{} takes {count} operands, got {}", asm.mnemonic, operands.len()),
                ))
            }
        };

        let mnemonic = asm.mnemonic.to_ascii_uppercase();
        let instruction = match mnemonic.as_str() {
            "ADD" | "SUB" | "CEQ" | "CGT" | "CLT" => {
                expect(2)?;
                let op = match mnemonic.as_str() {
                    "ADD" => AluOp::Add,
                    "SUB" => AluOp::Sub,
                    "CEQ" => AluOp::CmpEq,
                    "CGT" => AluOp::CmpGt,
                    _ => AluOp::CmpLt,
                };
                Instruction::Alu {
                    op,
                    dst: parse_register(operands[0], line)?,
                    src: parse_register(operands[1], line)?,
                }
            }
            "IN" | "OUT" => {
                expect(2)?;
                let reg = parse_register(operands[0], line)?;
                let port = parse_u8(operands[1], line)?;
                if port >= PORT_COUNT {
                    return Err(AsmError::new(line, format!("port {port} out of range")));
                }
                if mnemonic == "IN" {
                    Instruction::In { reg, port }
                } else {
                    Instruction::Out { reg, port }
                }
            }
            "MOV" => {
                expect(2)?;
                Instruction::Mov {
                    reg: parse_register(operands[0], line)?,
                    imm: parse_u8(operands[1], line)?,
                }
            }
            "LDR" | "STR" | "STC" => {
                expect(2)?;
                let reg = parse_register(operands[0], line)?;
                let slot = self.parse_slot(operands[1], line)?;
                match mnemonic.as_str() {
                    "LDR" => Instruction::Ldr { reg, slot },
                    "STR" => Instruction::Str { reg, slot },
                    _ => Instruction::Stc { reg, slot },
                }
            }
            _ => {
                expect(1)?;
                let target = match self.labels.get(operands[0]) {
                    Some(&offset) => u8::try_from(offset).map_err(|_| {
                        AsmError::new(line, format!("label '{}' at {offset} is out of range", operands[0]))
                    })?,
                    None => parse_u8(operands[0], line)?,
                };
                Instruction::Jmp { target }
            }
        };

        Ok(instruction)
    }

    fn parse_slot(&self, operand: &str, line: usize) -> AResult<u8> {
        if let Some(slot) = operand.strip_prefix('@') {
            return parse_u8(slot, line);
        }
        self.symbols
            .iter()
            .find(|symbol| symbol.name == operand)
            .map(|symbol| symbol.slot)
            .ok_or_else(|| AsmError::new(line, format!("unknown variable '{operand}'")))
    }
}

fn width_of(mnemonic: &str) -> Option<usize> {
    match mnemonic.to_ascii_uppercase().as_str() {
        "ADD" | "SUB" | "CEQ" | "CGT" | "CLT" | "IN" | "OUT" => Some(1),
        "MOV" | "LDR" | "STR" | "STC" | "JMP" => Some(2),
        _ => None,
    }
}

fn parse_register(operand: &str, line: usize) -> AResult<Register> {
    match operand.to_ascii_uppercase().as_str() {
        "R0" => Ok(Register::R0),
        "R1" => Ok(Register::R1),
        "R2" => Ok(Register::R2),
        "R3" => Ok(Register::R3),
        _ => Err(AsmError::new(line, format!("expected register, got '{operand}'"))),
    }
}

fn parse_u8(operand: &str, line: usize) -> AResult<u8> {
    let parsed = match operand.strip_prefix("0b") {
        Some(bits) => u8::from_str_radix(bits, 2),
        None => operand.parse::<u8>(),
    };
    parsed.map_err(|_| AsmError::new(line, format!("expected a byte value, got '{operand}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_with_labels_and_names() {
        let source = "
            .device KEYBOARD
            .var x @0 = 60
            MOV R0, 60      ; init
            STR R0, x
            loop:
            IN R0, 7
            CEQ R0, R1
            STC R0, @0
            JMP loop
        ";
        let bytecode = assemble(source).unwrap();
        assert_eq!(bytecode.device.as_deref(), Some("KEYBOARD"));
        assert_eq!(bytecode.symbols, vec![Symbol { name: "x".into(), slot: 0, initial: 60 }]);
        assert_eq!(bytecode.instructions().unwrap(), vec![
            (0, Instruction::Mov { reg: Register::R0, imm: 60 }),
            (2, Instruction::Str { reg: Register::R0, slot: 0 }),
            (4, Instruction::In { reg: Register::R0, port: 7 }),
            (5, Instruction::Alu { op: AluOp::CmpEq, dst: Register::R0, src: Register::R1 }),
            (6, Instruction::Stc { reg: Register::R0, slot: 0 }),
            (8, Instruction::Jmp { target: 4 }),
        ]);
    }

    #[test]
    fn listing_assembles_back() {
        let bytecode = crate::compile(
            "// MOUSE PAD;\nuint8 x = 60;\nlet dx = read_port(5);\nif (dx > 125) { x = x - 1 };\nwrite_port(0, x);\ngoto(4);",
        )
        .unwrap();
        let text = listing(&bytecode).unwrap();
        assert!(text.starts_with(".device MOUSE PAD\n.var x @0 = 60\n.var dx @1 = 0\n"));
        assert!(text.contains("    4: IN R0, 5"));
        assert_eq!(assemble(&text).unwrap(), bytecode);
    }

    #[test]
    fn raw_listing_keeps_slots() {
        let bytecode = Bytecode::from_raw(vec![0b1100_0100, 3, 0b1110_0000, 0]).unwrap();
        let text = listing(&bytecode).unwrap();
        assert_eq!(text, "    0: LDR R0, @3\n    2: JMP 0\n");
        assert_eq!(assemble(&text).unwrap(), bytecode);
    }

    #[test]
    fn offset_assertions_are_checked() {
        let err = assemble("0: MOV R0, 1\n1: OUT R0, 0").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn errors_name_the_line() {
        assert_eq!(assemble("MOV R0, 1\nFOO R1").unwrap_err().line, 2);
        assert_eq!(assemble("MOV R4, 1").unwrap_err().line, 1);
        assert_eq!(assemble("OUT R0, 8").unwrap_err().line, 1);
        assert_eq!(assemble("LDR R0, nope").unwrap_err().line, 1);
        assert_eq!(assemble("MOV R0").unwrap_err().line, 1);
        assert_eq!(assemble("JMP 256").unwrap_err().line, 1);
    }
}
