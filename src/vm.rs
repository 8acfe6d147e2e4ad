//! Virtual machine that runs the bytecode against a port bus

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use tracing::{debug, trace, warn};

use crate::{
    bytecode::Bytecode,
    error::{DecodeError, Fault, FaultKind},
    isa::{AluOp, Instruction},
    ports::PortBus,
};

/// Whether the machine is still executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Halted(HaltReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The host asked the machine to stop
    Stopped,
    /// An instruction faulted
    Faulted,
}

/// Outcome of a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Execution continues at the next sequential offset
    Next,
    /// A jump was taken, ending the pass
    Jumped,
    /// The machine is halted, nothing was executed
    Halted,
}

/// Virtual machine representation
pub struct PortVm<P: PortBus> {
    bytecode: Bytecode,
    program: BTreeMap<usize, Instruction>, // offset -> instruction
    pc: usize,                             // offset of the next instruction
    registers: [u8; 4],
    flag: bool, // result of the last compare
    memory: [u8; 256],
    ports: P,
    state: VmState,
    cycles: u64,
    passes: u64,
}

impl<P: PortBus> PortVm<P> {
    /// Compile `source` and load it.
    pub fn load(source: &str, ports: P) -> anyhow::Result<Self> {
        let bytecode = crate::compile(source)?;
        Ok(Self::new(bytecode, ports)?)
    }

    /// Load compiled bytecode. Variables start at their declared values.
    pub fn new(bytecode: Bytecode, ports: P) -> Result<Self, DecodeError> {
        let program = bytecode.instructions()?.into_iter().collect();

        let mut vm = PortVm {
            bytecode,
            program,
            pc: 0,
            registers: [0; 4],
            flag: false,
            memory: [0; 256],
            ports,
            state: VmState::Running,
            cycles: 0,
            passes: 0,
        };
        vm.reset();

        debug!(
            bytes = vm.bytecode.len(),
            instructions = vm.program.len(),
            device = vm.bytecode.device.as_deref().unwrap_or("-"),
            "program loaded"
        );
        Ok(vm)
    }

    /// Restart from offset 0 with the declared initial values. Port state
    /// belongs to the device and is left alone.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.registers = [0; 4];
        self.flag = false;
        self.memory = [0; 256];
        for symbol in &self.bytecode.symbols {
            self.memory[usize::from(symbol.slot)] = symbol.initial;
        }
        self.state = VmState::Running;
    }

    /// Host issued stop. Takes effect at the current instruction boundary.
    pub fn halt(&mut self) {
        if self.state == VmState::Running {
            debug!(offset = self.pc, "halted by host");
            self.state = VmState::Halted(HaltReason::Stopped);
        }
    }

    /// Run until `stop` is raised or an instruction faults.
    pub fn run_until(&mut self, stop: &AtomicBool) -> Result<(), Fault> {
        while self.state == VmState::Running {
            if stop.load(Ordering::Relaxed) {
                self.halt();
                break;
            }
            self.next_instruction()?;
        }
        Ok(())
    }

    /// Execute one pass: everything up to and including the next jump.
    pub fn run_pass(&mut self) -> Result<(), Fault> {
        loop {
            match self.next_instruction()? {
                Step::Next => {}
                Step::Jumped | Step::Halted => return Ok(()),
            }
        }
    }

    pub fn run_passes(&mut self, passes: u64) -> Result<(), Fault> {
        for _ in 0..passes {
            if self.state != VmState::Running {
                break;
            }
            self.run_pass()?;
        }
        Ok(())
    }

    /// Execute the instruction at the current offset.
    pub fn next_instruction(&mut self) -> Result<Step, Fault> {
        if self.state != VmState::Running {
            return Ok(Step::Halted);
        }

        let Some(&instruction) = self.program.get(&self.pc) else {
            return Err(self.fault(FaultKind::OutOfBounds));
        };
        trace!(offset = self.pc, %instruction, "execute");
        self.cycles += 1;

        let next = self.pc + instruction.width();
        match instruction {
            Instruction::Alu { op, dst, src } => {
                let lhs = self.registers[dst.index()];
                let rhs = self.registers[src.index()];
                match op {
                    AluOp::Add => self.registers[dst.index()] = lhs.wrapping_add(rhs),
                    AluOp::Sub => self.registers[dst.index()] = lhs.wrapping_sub(rhs),
                    AluOp::CmpEq => self.flag = lhs == rhs,
                    AluOp::CmpGt => self.flag = lhs > rhs,
                    AluOp::CmpLt => self.flag = lhs < rhs,
                }
            }
            Instruction::In { reg, port } => {
                self.check_port(port)?;
                let value = self
                    .ports
                    .read(port)
                    .map_err(|source| self.fault(FaultKind::Device { port, source }))?;
                trace!(port, value, "port read");
                self.registers[reg.index()] = value;
            }
            Instruction::Out { reg, port } => {
                self.check_port(port)?;
                let value = self.registers[reg.index()];
                self.ports
                    .write(port, value)
                    .map_err(|source| self.fault(FaultKind::Device { port, source }))?;
                trace!(port, value, "port write");
            }
            Instruction::Mov { reg, imm } => self.registers[reg.index()] = imm,
            Instruction::Ldr { reg, slot } => {
                self.registers[reg.index()] = self.memory[usize::from(slot)];
            }
            Instruction::Str { reg, slot } => {
                self.memory[usize::from(slot)] = self.registers[reg.index()];
            }
            Instruction::Stc { reg, slot } => {
                if self.flag {
                    self.memory[usize::from(slot)] = self.registers[reg.index()];
                }
            }
            Instruction::Jmp { target } => {
                let target = usize::from(target);
                if !self.program.contains_key(&target) {
                    return Err(self.fault(FaultKind::InvalidJump { target }));
                }
                self.passes += 1;
                self.pc = target;
                return Ok(Step::Jumped);
            }
        }

        self.pc = next;
        Ok(Step::Next)
    }

    fn check_port(&mut self, port: u8) -> Result<(), Fault> {
        if port >= self.ports.port_count() {
            return Err(self.fault(FaultKind::Port { port }));
        }
        Ok(())
    }

    /// Halt and capture the machine state.
    fn fault(&mut self, kind: FaultKind) -> Fault {
        self.state = VmState::Halted(HaltReason::Faulted);
        let fault = Fault {
            offset: self.pc,
            kind,
            registers: self.registers,
            variables: self.variables(),
        };
        warn!(offset = fault.offset, error = %fault.kind, "machine faulted");
        fault
    }

    /// Current value of a variable.
    pub fn var(&self, name: &str) -> Option<u8> {
        self.bytecode
            .symbols
            .iter()
            .find(|symbol| symbol.name == name)
            .map(|symbol| self.memory[usize::from(symbol.slot)])
    }

    /// Overwrite a variable, e.g. to seed a run with other initial values.
    /// Returns false for unknown names.
    pub fn set_var(&mut self, name: &str, value: u8) -> bool {
        match self.bytecode.symbols.iter().find(|symbol| symbol.name == name) {
            Some(symbol) => {
                self.memory[usize::from(symbol.slot)] = value;
                true
            }
            None => false,
        }
    }

    /// Every variable with its current value, in slot order.
    pub fn variables(&self) -> Vec<(String, u8)> {
        self.bytecode
            .symbols
            .iter()
            .map(|symbol| (symbol.name.clone(), self.memory[usize::from(symbol.slot)]))
            .collect()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn registers(&self) -> [u8; 4] {
        self.registers
    }

    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Instructions executed since the machine was created.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Jumps taken since the machine was created.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut P {
        &mut self.ports
    }

    pub fn into_ports(self) -> P {
        self.ports
    }
}
