//! Abstract syntax tree of a port program.
//!
//! Constants never reach the tree: the parser substitutes their values, so
//! every operand is either a literal, a declared variable or a port read.

use std::collections::BTreeMap;

/// A parsed program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    /// Device named by the leading comment, e.g. `KEYBOARD`
    pub device: Option<String>,
    /// Named constants, kept for listings; operands already carry their values
    pub constants: BTreeMap<String, u8>,
    /// Variables in declaration order. The index is the storage slot.
    pub variables: Vec<Variable>,
    pub items: Vec<Item>,
}

impl Program {
    /// Storage slot of a declared variable.
    pub fn slot_of(&self, name: &str) -> Option<u8> {
        self.variables
            .iter()
            .position(|var| var.name == name)
            .map(|index| index as u8)
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.items.iter().filter_map(|item| match item {
            Item::Statement(statement) => Some(statement),
            Item::Marker { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Value known at compile time, used to seed the machine's storage
    pub initial: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Statement(Statement),
    /// `// BYTE n;`, asserts the offset of whatever follows
    Marker { offset: usize, line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// `uint8 name = expr;` or `let name = expr;`
    Declare { name: String, value: Expr },
    /// `name = expr;`
    Assign(Assignment),
    /// `if (cond) { a = .., b = .. };`
    If {
        condition: Condition,
        body: Vec<Assignment>,
    },
    /// `write_port(port, expr);`
    WritePort { port: u8, value: Expr },
    /// `goto(target);`
    Goto { target: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: Expr,
}

/// Single operand of an expression or a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Literal(u8),
    Var(String),
    ReadPort(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
}

/// Expressions have at most two operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Operand(Operand),
    Binary {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
}

impl Expr {
    /// Whether evaluating the expression touches a port.
    pub fn reads_port(&self) -> bool {
        match self {
            Expr::Operand(operand) => matches!(operand, Operand::ReadPort(_)),
            Expr::Binary { lhs, rhs, .. } => {
                matches!(lhs, Operand::ReadPort(_)) || matches!(rhs, Operand::ReadPort(_))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Greater,
    Less,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub relation: Relation,
    pub lhs: Operand,
    pub rhs: Operand,
}
