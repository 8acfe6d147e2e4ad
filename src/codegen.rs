//! Lowering of parsed statements into machine instructions.
//!
//! Every expression is evaluated into `R0`, using `R1` for the right hand
//! side of a binary operation. A conditional block compares into the flag and
//! stores each of its assignments with `STC`, so all of the block is guarded
//! by the one compare result and blocks run strictly in source order.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    ast::{BinaryOp, Expr, Operand, Program, Relation, Statement, StatementKind},
    bytecode::{Bytecode, Symbol},
    error::CompileError,
    isa::{AluOp, Instruction, Register},
    layout::Layout,
};

/// Maps variable names to storage slots.
pub(crate) struct Lowering<'p> {
    slots: HashMap<&'p str, u8>,
}

impl<'p> Lowering<'p> {
    pub(crate) fn new(program: &'p Program) -> Self {
        let slots = program
            .variables
            .iter()
            .enumerate()
            .map(|(slot, var)| (var.name.as_str(), slot as u8))
            .collect();
        Lowering { slots }
    }

    /// Instructions for one statement. Offsets play no part in lowering, so
    /// the layout pass and the generator see exactly the same widths.
    pub(crate) fn statement(&self, statement: &Statement) -> Result<Vec<Instruction>, CompileError> {
        let line = statement.line;
        let mut out = Vec::new();

        match &statement.kind {
            StatementKind::Declare { name, value } => {
                self.expr(value, line, &mut out)?;
                out.push(Instruction::Str {
                    reg: Register::R0,
                    slot: self.slot(name, line)?,
                });
            }
            StatementKind::Assign(assignment) => {
                self.expr(&assignment.value, line, &mut out)?;
                out.push(Instruction::Str {
                    reg: Register::R0,
                    slot: self.slot(&assignment.name, line)?,
                });
            }
            StatementKind::If { condition, body } => {
                self.operand(&condition.lhs, Register::R0, line, &mut out)?;
                self.operand(&condition.rhs, Register::R1, line, &mut out)?;
                let op = match condition.relation {
                    Relation::Eq => AluOp::CmpEq,
                    Relation::Greater => AluOp::CmpGt,
                    Relation::Less => AluOp::CmpLt,
                };
                out.push(Instruction::Alu {
                    op,
                    dst: Register::R0,
                    src: Register::R1,
                });

                for assignment in body {
                    if assignment.value.reads_port() {
                        return Err(CompileError::syntax(
                            line,
                            "read_port is not allowed inside if block",
                        ));
                    }
                    self.expr(&assignment.value, line, &mut out)?;
                    out.push(Instruction::Stc {
                        reg: Register::R0,
                        slot: self.slot(&assignment.name, line)?,
                    });
                }
            }
            StatementKind::WritePort { port, value } => {
                self.expr(value, line, &mut out)?;
                out.push(Instruction::Out {
                    reg: Register::R0,
                    port: *port,
                });
            }
            StatementKind::Goto { target } => {
                // Targets past the addressable range never survive the layout pass
                out.push(Instruction::Jmp {
                    target: u8::try_from(*target).unwrap_or(u8::MAX),
                });
            }
        }

        Ok(out)
    }

    fn expr(&self, expr: &Expr, line: usize, out: &mut Vec<Instruction>) -> Result<(), CompileError> {
        match expr {
            Expr::Operand(operand) => self.operand(operand, Register::R0, line, out),
            Expr::Binary { op, lhs, rhs } => {
                self.operand(lhs, Register::R0, line, out)?;
                self.operand(rhs, Register::R1, line, out)?;
                let op = match op {
                    BinaryOp::Add => AluOp::Add,
                    BinaryOp::Sub => AluOp::Sub,
                };
                out.push(Instruction::Alu {
                    op,
                    dst: Register::R0,
                    src: Register::R1,
                });
                Ok(())
            }
        }
    }

    fn operand(
        &self,
        operand: &Operand,
        reg: Register,
        line: usize,
        out: &mut Vec<Instruction>,
    ) -> Result<(), CompileError> {
        let instruction = match operand {
            Operand::Literal(imm) => Instruction::Mov { reg, imm: *imm },
            Operand::Var(name) => Instruction::Ldr {
                reg,
                slot: self.slot(name, line)?,
            },
            Operand::ReadPort(port) => Instruction::In { reg, port: *port },
        };
        out.push(instruction);
        Ok(())
    }

    fn slot(&self, name: &str, line: usize) -> Result<u8, CompileError> {
        self.slots
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::syntax(line, format!("use of undeclared name '{name}'")))
    }
}

/// Emit the final instruction stream for a program whose layout was assigned.
pub fn generate(program: &Program, layout: &Layout) -> Result<Bytecode, CompileError> {
    let lowering = Lowering::new(program);
    let mut code = Vec::with_capacity(layout.size);

    let mut line = 0;
    for (index, statement) in program.statements().enumerate() {
        line = statement.line;
        let expected = layout.offsets.get(index).copied().unwrap_or(layout.size);
        if expected != code.len() {
            return Err(CompileError::LayoutMismatch {
                line,
                declared: expected,
                computed: code.len(),
            });
        }
        for instruction in lowering.statement(statement)? {
            instruction.encode(&mut code);
        }
    }
    if code.len() != layout.size {
        return Err(CompileError::LayoutMismatch {
            line,
            declared: layout.size,
            computed: code.len(),
        });
    }

    let symbols = program
        .variables
        .iter()
        .enumerate()
        .map(|(slot, var)| Symbol {
            name: var.name.clone(),
            slot: slot as u8,
            initial: var.initial,
        })
        .collect();

    debug!(bytes = code.len(), "generated code");

    Ok(Bytecode {
        code,
        symbols,
        device: program.device.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        ast::{Assignment, Condition, Item, Variable},
        isa::decode_all,
        layout,
        parser::parse,
    };

    fn lower_last(source: &str) -> Vec<Instruction> {
        let program = parse(source).unwrap();
        let lowering = Lowering::new(&program);
        let statement = program.statements().last().unwrap();
        lowering.statement(statement).unwrap()
    }

    fn width(instructions: &[Instruction]) -> usize {
        instructions.iter().map(Instruction::width).sum()
    }

    #[test]
    fn declaration_loads_then_stores() {
        let code = lower_last("uint8 a = 1;\nuint8 b = 60;");
        assert_eq!(code, vec![
            Instruction::Mov { reg: Register::R0, imm: 60 },
            Instruction::Str { reg: Register::R0, slot: 1 },
        ]);
        assert_eq!(width(&code), 4);
    }

    #[test]
    fn port_read_into_variable() {
        let code = lower_last("let read = read_port(7);");
        assert_eq!(code, vec![
            Instruction::In { reg: Register::R0, port: 7 },
            Instruction::Str { reg: Register::R0, slot: 0 },
        ]);
        assert_eq!(width(&code), 3);
    }

    #[test]
    fn port_write_of_variable() {
        let code = lower_last("uint8 x = 60;\nwrite_port(0, x);");
        assert_eq!(code, vec![
            Instruction::Ldr { reg: Register::R0, slot: 0 },
            Instruction::Out { reg: Register::R0, port: 0 },
        ]);
        assert_eq!(width(&code), 3);
    }

    #[test]
    fn conditional_block_is_guarded_by_one_compare() {
        let code = lower_last(
            "const SPEED = 1;
            uint8 y = 60;
            uint8 r = 255;
            let read = 0;
            if (read == 94) { y = y - SPEED, r = 0 };",
        );
        assert_eq!(code, vec![
            Instruction::Ldr { reg: Register::R0, slot: 2 },
            Instruction::Mov { reg: Register::R1, imm: 94 },
            Instruction::Alu { op: AluOp::CmpEq, dst: Register::R0, src: Register::R1 },
            Instruction::Ldr { reg: Register::R0, slot: 0 },
            Instruction::Mov { reg: Register::R1, imm: 1 },
            Instruction::Alu { op: AluOp::Sub, dst: Register::R0, src: Register::R1 },
            Instruction::Stc { reg: Register::R0, slot: 0 },
            Instruction::Mov { reg: Register::R0, imm: 0 },
            Instruction::Stc { reg: Register::R0, slot: 1 },
        ]);
        let compares = code
            .iter()
            .filter(|i| matches!(i, Instruction::Alu { op, .. } if op.is_compare()))
            .count();
        assert_eq!(compares, 1);
        assert!(code.iter().all(|i| !matches!(i, Instruction::Str { .. })));
    }

    #[test]
    fn relations_map_to_compares() {
        let code = lower_last("uint8 x = 1;\nif (x < 3) { x = 3 };");
        assert_eq!(code[2], Instruction::Alu { op: AluOp::CmpLt, dst: Register::R0, src: Register::R1 });
        let code = lower_last("uint8 x = 1;\nif (x > 119) { x = 119 };");
        assert_eq!(code[2], Instruction::Alu { op: AluOp::CmpGt, dst: Register::R0, src: Register::R1 });
    }

    #[test]
    fn goto_is_an_absolute_jump() {
        assert_eq!(lower_last("goto(20);"), vec![Instruction::Jmp { target: 20 }]);
    }

    #[test]
    fn generation_is_deterministic() {
        let source = "uint8 x = 1;\nif (x > 0) { x = x - 1 };\nwrite_port(0, x);\ngoto(4);";
        let program = parse(source).unwrap();
        let layout = layout::assign(&program).unwrap();
        let first = generate(&program, &layout).unwrap();
        let second = generate(&program, &layout).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.code.len(), layout.size);
        assert_eq!(first.symbols, vec![Symbol { name: "x".into(), slot: 0, initial: 1 }]);
    }

    #[test]
    fn layout_of_another_program_is_rejected() {
        let program = parse("uint8 x = 1;\nwrite_port(0, x);\ngoto(0);").unwrap();
        let other = parse("let x = read_port(1);\nwrite_port(0, x);\ngoto(0);").unwrap();
        let layout = layout::assign(&other).unwrap();
        assert_eq!(
            generate(&program, &layout),
            Err(CompileError::LayoutMismatch { line: 2, declared: 3, computed: 4 })
        );
    }

    #[test]
    fn guarded_port_read_is_rejected() {
        let mut program = parse("uint8 x = 0;\nif (x > 1) { x = 1 };").unwrap();
        // Built by hand, the parser never produces this
        program.variables.push(Variable { name: "y".into(), initial: 0 });
        program.items.push(Item::Statement(Statement {
            kind: StatementKind::If {
                condition: Condition {
                    relation: Relation::Greater,
                    lhs: Operand::Var("x".into()),
                    rhs: Operand::Literal(1),
                },
                body: vec![Assignment {
                    name: "y".into(),
                    value: Expr::Operand(Operand::ReadPort(7)),
                }],
            },
            line: 3,
        }));
        let lowering = Lowering::new(&program);
        let statement = program.statements().last().unwrap();
        assert!(matches!(
            lowering.statement(statement),
            Err(CompileError::Syntax { line: 3, .. })
        ));
    }

    fn operand(reads: bool) -> BoxedStrategy<String> {
        let name = prop::sample::select(vec!["a", "b", "c"]).prop_map(String::from);
        let literal = any::<u8>().prop_map(|value| value.to_string());
        if reads {
            let read = (0u8..8).prop_map(|port| format!("read_port({port})"));
            prop_oneof![literal, name, read].boxed()
        } else {
            prop_oneof![literal, name].boxed()
        }
    }

    fn expr(reads: bool) -> BoxedStrategy<String> {
        let binary = (operand(reads), prop::sample::select(vec!["+", "-"]), operand(reads))
            .prop_map(|(lhs, op, rhs)| format!("{lhs} {op} {rhs}"));
        prop_oneof![operand(reads), binary].boxed()
    }

    fn target() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec!["a", "b", "c"])
    }

    fn statement() -> impl Strategy<Value = String> {
        let assign = (target(), expr(true)).prop_map(|(name, value)| format!("{name} = {value};"));
        let write = (0u8..8, expr(true)).prop_map(|(port, value)| format!("write_port({port}, {value});"));
        let body = prop::collection::vec((target(), expr(false)), 1..4).prop_map(|assignments| {
            assignments
                .iter()
                .map(|(name, value)| format!("{name} = {value}"))
                .collect::<Vec<_>>()
                .join(",\n    ")
        });
        let guarded = (operand(true), prop::sample::select(vec!["==", ">", "<"]), operand(true), body)
            .prop_map(|(lhs, relation, rhs, body)| format!("if ({lhs} {relation} {rhs}) {{\n    {body}\n}};"));
        prop_oneof![assign, write, guarded]
    }

    fn source() -> impl Strategy<Value = String> {
        (any::<u8>(), 0u8..8, any::<u8>(), prop::collection::vec(statement(), 0..8)).prop_map(
            |(a, port, c, statements)| {
                format!(
                    "uint8 a = {a};\nlet b = read_port({port});\nuint8 c = a + {c};\n{}\ngoto(0);\n",
                    statements.join("\n")
                )
            },
        )
    }

    proptest! {
        #[test]
        fn decoded_stream_matches_each_statement(source in source()) {
            let program = parse(&source).unwrap();
            let layout = layout::assign(&program).unwrap();
            let bytecode = generate(&program, &layout).unwrap();
            let decoded: BTreeMap<usize, Instruction> =
                decode_all(&bytecode.code).unwrap().into_iter().collect();
            let lowering = Lowering::new(&program);

            let mut count = 0;
            for (statement, &start) in program.statements().zip(&layout.offsets) {
                let expected = lowering.statement(statement).unwrap();
                let mut offset = start;
                for instruction in &expected {
                    prop_assert_eq!(decoded.get(&offset), Some(instruction));
                    offset += instruction.width();
                }
                count += expected.len();

                let last = expected.last().copied();
                match &statement.kind {
                    StatementKind::Declare { name, .. }
                    | StatementKind::Assign(Assignment { name, .. }) => {
                        let slot = program.slot_of(name).unwrap();
                        prop_assert_eq!(last, Some(Instruction::Str { reg: Register::R0, slot }));
                    }
                    StatementKind::WritePort { port, .. } => {
                        prop_assert_eq!(last, Some(Instruction::Out { reg: Register::R0, port: *port }));
                    }
                    StatementKind::If { body, .. } => {
                        let stores: Vec<u8> = expected
                            .iter()
                            .filter_map(|i| match i {
                                Instruction::Stc { slot, .. } => Some(*slot),
                                _ => None,
                            })
                            .collect();
                        let slots: Vec<u8> = body
                            .iter()
                            .map(|assignment| program.slot_of(&assignment.name).unwrap())
                            .collect();
                        prop_assert_eq!(stores, slots);
                        // Ports are only read by the compare header, never under the guard
                        let compare = expected
                            .iter()
                            .position(|i| matches!(i, Instruction::Alu { op, .. } if op.is_compare()))
                            .unwrap();
                        let no_port_reads = expected[compare..]
                            .iter()
                            .all(|i| !matches!(i, Instruction::In { .. }));
                        prop_assert!(no_port_reads);
                    }
                    StatementKind::Goto { target } => {
                        prop_assert_eq!(last, Some(Instruction::Jmp { target: *target as u8 }));
                    }
                }
            }
            prop_assert_eq!(decoded.len(), count);
        }
    }
}
