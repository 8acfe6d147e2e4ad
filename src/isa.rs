//! Instruction set of the port machine.
//!
//! The machine has four general registers (`R0`..`R3`), a single condition
//! flag set by the compare instructions, 256 one-byte variable slots and an
//! 8-bit address space for code.
//!
//! # Encoding
//!
//! | Width | Bits (MSB first)   | Instruction        |
//! |-------|--------------------|--------------------|
//! | 1     | `0 000 dd ss`      | `ADD Rd, Rs`       |
//! | 1     | `0 001 dd ss`      | `SUB Rd, Rs`       |
//! | 1     | `0 010 dd ss`      | `CEQ Rd, Rs`       |
//! | 1     | `0 011 dd ss`      | `CGT Rd, Rs`       |
//! | 1     | `0 100 dd ss`      | `CLT Rd, Rs`       |
//! | 1     | `10 0 rr ppp`      | `IN Rr, p`         |
//! | 1     | `10 1 rr ppp`      | `OUT Rr, p`        |
//! | 2     | `1100 00 rr` imm   | `MOV Rr, imm`      |
//! | 2     | `1100 01 rr` slot  | `LDR Rr, @slot`    |
//! | 2     | `1100 10 rr` slot  | `STR Rr, @slot`    |
//! | 2     | `1100 11 rr` slot  | `STC Rr, @slot`    |
//! | 2     | `1110 0000` addr   | `JMP addr`         |

use std::fmt;

use crate::error::DecodeError;

/// Number of addressable ports. Port ids occupy three bits of the opcode.
pub const PORT_COUNT: u8 = 8;

/// Largest code image addressable by an 8-bit jump target.
pub const MAX_PROGRAM_SIZE: usize = 256;

/// One of the four general purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
}

impl Register {
    pub const ALL: [Register; 4] = [Register::R0, Register::R1, Register::R2, Register::R3];

    pub fn index(self) -> usize {
        self as usize
    }

    fn bits(self) -> u8 {
        self as u8
    }

    fn from_bits(bits: u8) -> Self {
        Self::ALL[(bits & 0b11) as usize]
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.index())
    }
}

/// Two operand ALU operations. All of them are one byte wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    /// `Rd = Rd + Rs`, wrapping
    Add,
    /// `Rd = Rd - Rs`, wrapping
    Sub,
    /// `flag = Rd == Rs`
    CmpEq,
    /// `flag = Rd > Rs`
    CmpGt,
    /// `flag = Rd < Rs`
    CmpLt,
}

impl AluOp {
    fn code(self) -> u8 {
        match self {
            AluOp::Add => 0b000,
            AluOp::Sub => 0b001,
            AluOp::CmpEq => 0b010,
            AluOp::CmpGt => 0b011,
            AluOp::CmpLt => 0b100,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0b000 => Some(AluOp::Add),
            0b001 => Some(AluOp::Sub),
            0b010 => Some(AluOp::CmpEq),
            0b011 => Some(AluOp::CmpGt),
            0b100 => Some(AluOp::CmpLt),
            _ => None,
        }
    }

    /// Whether the operation only updates the condition flag.
    pub fn is_compare(self) -> bool {
        matches!(self, AluOp::CmpEq | AluOp::CmpGt | AluOp::CmpLt)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "ADD",
            AluOp::Sub => "SUB",
            AluOp::CmpEq => "CEQ",
            AluOp::CmpGt => "CGT",
            AluOp::CmpLt => "CLT",
        }
    }
}

/// Supported instructions of the port machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Arithmetic or compare on two registers
    Alu { op: AluOp, dst: Register, src: Register },
    /// Read a port into a register
    In { reg: Register, port: u8 },
    /// Write a register to a port
    Out { reg: Register, port: u8 },
    /// Load an immediate value
    Mov { reg: Register, imm: u8 },
    /// Load a variable slot
    Ldr { reg: Register, slot: u8 },
    /// Store into a variable slot
    Str { reg: Register, slot: u8 },
    /// Store into a variable slot only when the condition flag is set
    Stc { reg: Register, slot: u8 },
    /// Unconditionally jump to an absolute offset
    Jmp { target: u8 },
}

const PORT_READ: u8 = 0b1000_0000;
const PORT_WRITE: u8 = 0b1010_0000;
const MEMORY: u8 = 0b1100_0000;
const JUMP: u8 = 0b1110_0000;

impl Instruction {
    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        match self {
            Instruction::Alu { .. } | Instruction::In { .. } | Instruction::Out { .. } => 1,
            Instruction::Mov { .. }
            | Instruction::Ldr { .. }
            | Instruction::Str { .. }
            | Instruction::Stc { .. }
            | Instruction::Jmp { .. } => 2,
        }
    }

    /// Port referenced by the instruction, if any.
    pub fn port(&self) -> Option<u8> {
        match self {
            Instruction::In { port, .. } | Instruction::Out { port, .. } => Some(*port),
            _ => None,
        }
    }

    /// Append the encoded form to `out`.
    ///
    /// Port ids are masked to three bits; the parser never produces larger ids.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Instruction::Alu { op, dst, src } => {
                out.push(op.code() << 4 | dst.bits() << 2 | src.bits());
            }
            Instruction::In { reg, port } => out.push(PORT_READ | reg.bits() << 3 | port & 0b111),
            Instruction::Out { reg, port } => out.push(PORT_WRITE | reg.bits() << 3 | port & 0b111),
            Instruction::Mov { reg, imm } => out.extend([MEMORY | reg.bits(), imm]),
            Instruction::Ldr { reg, slot } => out.extend([MEMORY | 0b0100 | reg.bits(), slot]),
            Instruction::Str { reg, slot } => out.extend([MEMORY | 0b1000 | reg.bits(), slot]),
            Instruction::Stc { reg, slot } => out.extend([MEMORY | 0b1100 | reg.bits(), slot]),
            Instruction::Jmp { target } => out.extend([JUMP, target]),
        }
    }

    /// Decode the instruction starting at `offset`.
    pub fn decode(code: &[u8], offset: usize) -> Result<Self, DecodeError> {
        let Some(&byte) = code.get(offset) else {
            return Err(DecodeError::Truncated { offset });
        };
        let operand = || {
            code.get(offset + 1)
                .copied()
                .ok_or(DecodeError::Truncated { offset })
        };

        let reg = Register::from_bits(byte);
        let instruction = match byte >> 6 {
            0b00 | 0b01 => {
                let op = AluOp::from_code(byte >> 4)
                    .ok_or(DecodeError::InvalidOpcode { offset, byte })?;
                Instruction::Alu {
                    op,
                    dst: Register::from_bits(byte >> 2),
                    src: reg,
                }
            }
            0b10 => {
                let reg = Register::from_bits(byte >> 3);
                let port = byte & 0b111;
                if byte & 0b0010_0000 == 0 {
                    Instruction::In { reg, port }
                } else {
                    Instruction::Out { reg, port }
                }
            }
            _ => match byte & 0b1111_0000 {
                MEMORY => match byte & 0b1100 {
                    0b0000 => Instruction::Mov { reg, imm: operand()? },
                    0b0100 => Instruction::Ldr { reg, slot: operand()? },
                    0b1000 => Instruction::Str { reg, slot: operand()? },
                    _ => Instruction::Stc { reg, slot: operand()? },
                },
                JUMP if byte == JUMP => Instruction::Jmp { target: operand()? },
                _ => return Err(DecodeError::InvalidOpcode { offset, byte }),
            },
        };

        Ok(instruction)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Alu { op, dst, src } => write!(f, "{} {dst}, {src}", op.mnemonic()),
            Instruction::In { reg, port } => write!(f, "IN {reg}, {port}"),
            Instruction::Out { reg, port } => write!(f, "OUT {reg}, {port}"),
            Instruction::Mov { reg, imm } => write!(f, "MOV {reg}, {imm}"),
            Instruction::Ldr { reg, slot } => write!(f, "LDR {reg}, @{slot}"),
            Instruction::Str { reg, slot } => write!(f, "STR {reg}, @{slot}"),
            Instruction::Stc { reg, slot } => write!(f, "STC {reg}, @{slot}"),
            Instruction::Jmp { target } => write!(f, "JMP {target}"),
        }
    }
}

/// Encode a sequence of instructions into a flat byte stream.
pub fn encode_all(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instructions.iter().map(Instruction::width).sum());
    for instruction in instructions {
        instruction.encode(&mut out);
    }
    out
}

/// Decode a whole byte stream, pairing each instruction with its offset.
pub fn decode_all(code: &[u8]) -> Result<Vec<(usize, Instruction)>, DecodeError> {
    let mut offset = 0;
    let mut out = Vec::new();
    while offset < code.len() {
        let instruction = Instruction::decode(code, offset)?;
        out.push((offset, instruction));
        offset += instruction.width();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_register() -> impl Strategy<Value = Register> {
        (0u8..4).prop_map(Register::from_bits)
    }

    fn any_instruction() -> impl Strategy<Value = Instruction> {
        let alu = prop_oneof![
            Just(AluOp::Add),
            Just(AluOp::Sub),
            Just(AluOp::CmpEq),
            Just(AluOp::CmpGt),
            Just(AluOp::CmpLt),
        ];
        prop_oneof![
            (alu, any_register(), any_register())
                .prop_map(|(op, dst, src)| Instruction::Alu { op, dst, src }),
            (any_register(), 0..PORT_COUNT).prop_map(|(reg, port)| Instruction::In { reg, port }),
            (any_register(), 0..PORT_COUNT).prop_map(|(reg, port)| Instruction::Out { reg, port }),
            (any_register(), any::<u8>()).prop_map(|(reg, imm)| Instruction::Mov { reg, imm }),
            (any_register(), any::<u8>()).prop_map(|(reg, slot)| Instruction::Ldr { reg, slot }),
            (any_register(), any::<u8>()).prop_map(|(reg, slot)| Instruction::Str { reg, slot }),
            (any_register(), any::<u8>()).prop_map(|(reg, slot)| Instruction::Stc { reg, slot }),
            any::<u8>().prop_map(|target| Instruction::Jmp { target }),
        ]
    }

    proptest! {
        #[test]
        fn encoded_width_matches(instruction in any_instruction()) {
            let mut out = Vec::new();
            instruction.encode(&mut out);
            prop_assert_eq!(out.len(), instruction.width());
            prop_assert_eq!(Instruction::decode(&out, 0).unwrap(), instruction);
        }

        #[test]
        fn stream_decodes_at_instruction_starts(program in prop::collection::vec(any_instruction(), 0..64)) {
            let code = encode_all(&program);
            let decoded = decode_all(&code).unwrap();
            let mut expected_offset = 0;
            for ((offset, instruction), original) in decoded.iter().zip(&program) {
                prop_assert_eq!(*offset, expected_offset);
                prop_assert_eq!(instruction, original);
                expected_offset += original.width();
            }
            prop_assert_eq!(decoded.len(), program.len());
        }
    }

    #[test]
    fn port_instruction_layout() {
        let mut out = Vec::new();
        Instruction::Out { reg: Register::R0, port: 7 }.encode(&mut out);
        Instruction::In { reg: Register::R2, port: 5 }.encode(&mut out);
        assert_eq!(out, vec![0b1010_0111, 0b1001_0101]);
    }

    #[test]
    fn invalid_opcodes() {
        assert_eq!(
            Instruction::decode(&[0b0101_0000], 0),
            Err(DecodeError::InvalidOpcode { offset: 0, byte: 0b0101_0000 })
        );
        assert_eq!(
            Instruction::decode(&[0xFF, 0x00], 0),
            Err(DecodeError::InvalidOpcode { offset: 0, byte: 0xFF })
        );
        assert_eq!(
            Instruction::decode(&[0b1110_0001, 0x00], 0),
            Err(DecodeError::InvalidOpcode { offset: 0, byte: 0b1110_0001 })
        );
    }

    #[test]
    fn truncated_operand() {
        assert_eq!(
            Instruction::decode(&[JUMP], 0),
            Err(DecodeError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn display() {
        let ins = Instruction::Alu { op: AluOp::Sub, dst: Register::R0, src: Register::R1 };
        assert_eq!(ins.to_string(), "SUB R0, R1");
        assert_eq!(Instruction::Stc { reg: Register::R0, slot: 3 }.to_string(), "STC R0, @3");
    }
}
