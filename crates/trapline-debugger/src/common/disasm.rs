use capstone::Capstone;
use capstone::arch::x86::X86OperandType;
use capstone::arch::{ArchOperand, BuildsCapstone};

use crate::error::{Error, Result};

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Execution falls through to the next instruction.
    Sequential,

    /// Function call, with its target if encoded as an immediate.
    Call {
        /// Address of the called function.
        target: Option<u64>,
    },

    /// Function return.
    Return,

    /// Jump, with its target if encoded as an immediate.
    Jump {
        /// Address jumped to.
        target: Option<u64>,

        /// Whether the jump depends on the flags.
        conditional: bool,
    },
}

impl ControlFlow {
    /// Whether the destination of this transfer depends on runtime state
    /// (register or memory operand).
    pub fn is_indirect(&self) -> bool {
        matches!(
            self,
            Self::Call { target: None } | Self::Jump { target: None, .. }
        )
    }
}

/// Instruction decoded from the debuggee memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledInstruction {
    /// Address of the instruction.
    pub address: u64,

    /// Length of the instruction, in bytes.
    pub size: usize,

    /// Instruction name, with its prefixes.
    pub mnemonic: String,

    /// Operands, in Intel syntax.
    pub operands: String,

    /// Control transfer performed by the instruction.
    pub flow: ControlFlow,
}

impl DisassembledInstruction {
    /// Address of the instruction following this one.
    pub fn next_address(&self) -> u64 {
        self.address + self.size as u64
    }

    /// Intel syntax text of the instruction.
    pub fn text(&self) -> String {
        if self.operands.is_empty() {
            self.mnemonic.clone()
        } else {
            format!("{} {}", self.mnemonic, self.operands)
        }
    }
}

/// `x86_64` disassembler.
pub struct Disassembler {
    cs: Capstone,
}

impl Disassembler {
    /// Builds a disassembler with instruction details enabled.
    pub fn new() -> Result<Self> {
        let cs = Capstone::new()
            .x86()
            .mode(capstone::arch::x86::ArchMode::Mode64)
            .detail(true)
            .build()
            .inspect_err(|e| tracing::error!(error = %e, "failed to build disassembler"))?;

        Ok(Self { cs })
    }

    /// Decodes at most `count` instructions from the given bytes, located at
    /// `addr` in the debuggee.
    ///
    /// Decoding stops at the first invalid instruction.
    pub fn decode(
        &self,
        bytes: &[u8],
        addr: u64,
        count: usize,
    ) -> Result<Vec<DisassembledInstruction>> {
        let insns = self.cs.disasm_count(bytes, addr, count)?;

        insns.iter().map(|insn| self.convert(insn)).collect()
    }

    /// Decodes the given bytes, located at `addr` in the debuggee, up to the
    /// first invalid instruction.
    pub fn decode_all(&self, bytes: &[u8], addr: u64) -> Result<Vec<DisassembledInstruction>> {
        let insns = self.cs.disasm_all(bytes, addr)?;

        insns.iter().map(|insn| self.convert(insn)).collect()
    }

    /// Decodes every instruction of the given bytes, located at `addr` in the
    /// debuggee.
    ///
    /// Fails if the bytes are not entirely made of valid instructions.
    pub fn decode_range(&self, bytes: &[u8], addr: u64) -> Result<Vec<DisassembledInstruction>> {
        let insns = self.decode_all(bytes, addr)?;

        let decoded_len: usize = insns.iter().map(|insn| insn.size).sum();

        if decoded_len != bytes.len() {
            let bad_addr = addr + decoded_len as u64;
            tracing::error!(addr = format_args!("{bad_addr:#x}"), "undecodable bytes");
            return Err(Error::InvalidInstruction(bad_addr));
        }

        Ok(insns)
    }

    fn convert(&self, insn: &capstone::Insn) -> Result<DisassembledInstruction> {
        let mnemonic = insn.mnemonic().unwrap_or_default().to_owned();
        let operands = insn.op_str().unwrap_or_default().to_owned();

        let flow = match classify(&mnemonic) {
            Class::Sequential => ControlFlow::Sequential,
            Class::Return => ControlFlow::Return,
            Class::Call => ControlFlow::Call {
                target: self.immediate_target(insn)?,
            },
            Class::Jump { conditional } => ControlFlow::Jump {
                target: self.immediate_target(insn)?,
                conditional,
            },
        };

        Ok(DisassembledInstruction {
            address: insn.address(),
            size: insn.len(),
            mnemonic,
            operands,
            flow,
        })
    }

    fn immediate_target(&self, insn: &capstone::Insn) -> Result<Option<u64>> {
        let detail = self.cs.insn_detail(insn)?;

        let target = match detail.arch_detail().operands().as_slice() {
            [ArchOperand::X86Operand(op)] => match op.op_type {
                X86OperandType::Imm(imm) => Some(imm as u64),
                _ => None,
            },
            _ => None,
        };

        Ok(target)
    }
}

enum Class {
    Sequential,
    Call,
    Return,
    Jump { conditional: bool },
}

fn classify(mnemonic: &str) -> Class {
    // prefixed mnemonics (e.g. "notrack jmp", "bnd ret")
    let base = mnemonic.split_whitespace().last().unwrap_or_default();

    match base {
        "call" | "callq" => Class::Call,
        "ret" | "retq" | "retf" | "retfq" => Class::Return,
        "jmp" | "jmpq" | "ljmp" => Class::Jump { conditional: false },
        m if m.starts_with('j') || m.starts_with("loop") => Class::Jump { conditional: true },
        _ => Class::Sequential,
    }
}
