//! Bytecode representation

use std::collections::BTreeSet;

use anyhow::anyhow;

use crate::{
    error::DecodeError,
    isa::{decode_all, Instruction},
};

/// A compiled program: the encoded instruction stream plus the variable table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytecode {
    /// Encoded instructions, addressed by byte offset
    pub code: Vec<u8>,
    /// Variable table, one entry per storage slot in use
    pub symbols: Vec<Symbol>,
    /// Device the program targets, if the source named one
    pub device: Option<String>,
}

/// Variable attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Name of the variable
    pub name: String,
    /// Storage slot of the variable
    pub slot: u8,
    /// Value the slot holds before the first instruction runs
    pub initial: u8,
}

impl Bytecode {
    /// Wrap a raw instruction stream without a variable table.
    ///
    /// The stream is decoded once to validate it, and every slot it touches
    /// gets a placeholder symbol named `@slot`.
    pub fn from_raw(code: Vec<u8>) -> Result<Self, DecodeError> {
        let slots: BTreeSet<u8> = decode_all(&code)?
            .into_iter()
            .filter_map(|(_, instruction)| match instruction {
                Instruction::Ldr { slot, .. }
                | Instruction::Str { slot, .. }
                | Instruction::Stc { slot, .. } => Some(slot),
                _ => None,
            })
            .collect();

        let symbols = slots
            .into_iter()
            .map(|slot| Symbol {
                name: format!("@{slot}"),
                slot,
                initial: 0,
            })
            .collect();

        Ok(Bytecode {
            code,
            symbols,
            device: None,
        })
    }

    /// Decoded instructions paired with their offsets.
    pub fn instructions(&self) -> Result<Vec<(usize, Instruction)>, DecodeError> {
        decode_all(&self.code)
    }

    pub fn symbol(&self, slot: u8) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.slot == slot)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Render the stream as text, one byte per line written as eight `0`/`1`
    /// characters.
    pub fn to_bit_string(&self) -> String {
        self.code.iter().map(|byte| format!("{byte:08b}\n")).collect()
    }

    /// Parse the text form produced by [`Bytecode::to_bit_string`]. Whitespace
    /// between digits is ignored.
    pub fn from_bit_string(text: &str) -> anyhow::Result<Self> {
        let bits: Vec<u8> = text
            .bytes()
            .filter(|ch| !ch.is_ascii_whitespace())
            .map(|ch| match ch {
                b'0' => Ok(0),
                b'1' => Ok(1),
                other => Err(anyhow!("unexpected character '{}' in bit string", other as char)),
            })
            .collect::<anyhow::Result<_>>()?;

        if bits.len() % 8 != 0 {
            return Err(anyhow!(
                "bit string holds {} bits, which is not a whole number of bytes",
                bits.len()
            ));
        }

        let code = bits
            .chunks(8)
            .map(|chunk| chunk.iter().fold(0u8, |byte, bit| byte << 1 | bit))
            .collect();

        Ok(Self::from_raw(code)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{encode_all, Register};

    #[test]
    fn raw_streams_get_placeholder_symbols() {
        let code = encode_all(&[
            Instruction::Mov { reg: Register::R0, imm: 60 },
            Instruction::Str { reg: Register::R0, slot: 3 },
            Instruction::Ldr { reg: Register::R1, slot: 1 },
            Instruction::Jmp { target: 0 },
        ]);
        let bytecode = Bytecode::from_raw(code).unwrap();
        let names: Vec<_> = bytecode.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["@1", "@3"]);
        assert_eq!(bytecode.symbol(3).map(|s| s.initial), Some(0));
        assert_eq!(bytecode.len(), 8);
    }

    #[test]
    fn raw_stream_must_decode() {
        assert_eq!(
            Bytecode::from_raw(vec![0xC0]),
            Err(DecodeError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn bit_string_text() {
        let bytecode = Bytecode::from_raw(vec![0b1010_0111, 0b1110_0000, 20]).unwrap();
        let text = bytecode.to_bit_string();
        assert_eq!(text, "10100111\n11100000\n00010100\n");
        assert_eq!(Bytecode::from_bit_string(&text).unwrap().code, bytecode.code);
        assert_eq!(
            Bytecode::from_bit_string("1010 0111").unwrap().code,
            vec![0b1010_0111]
        );
    }

    #[test]
    fn bit_string_rejects_partial_bytes() {
        assert!(Bytecode::from_bit_string("1010").is_err());
        assert!(Bytecode::from_bit_string("1010012x").is_err());
    }
}
