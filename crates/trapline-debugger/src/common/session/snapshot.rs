use std::path::PathBuf;

use trapline_symbol::{VariableKind, VariableLocation};

use super::Session;
use crate::common::DebuggeeMemory;
use crate::common::disasm::DisassembledInstruction;
use crate::error::Result;
use crate::sys::Registers;

/// State of the debuggee at a stop, as shown to the user.
#[derive(Debug, Clone)]
pub struct StopSnapshot {
    /// Registers at the stop.
    pub registers: Registers,

    /// Instructions around the instruction pointer.
    pub disassembly: Vec<DisassembledInstruction>,

    /// Source line covering the instruction pointer.
    pub location: Option<SourceLocation>,

    /// Name of the function containing the instruction pointer.
    pub function: Option<String>,

    /// Addresses of the enabled breakpoints.
    pub breakpoints: Vec<u64>,

    /// Lines of the current source file whose first instruction holds an
    /// enabled breakpoint.
    pub breakpoint_lines: Vec<u64>,

    /// Parameters and local variables of the current function.
    pub locals: Vec<LocalValue>,
}

/// Source line of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Path of the source file.
    pub path: PathBuf,

    /// 1-based line number.
    pub line: u64,

    /// Text of the line, if the source file is readable.
    pub text: Option<String>,
}

/// Parameter or local variable, evaluated in the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalValue {
    /// Name of the variable.
    pub name: String,

    /// Whether it is a parameter or a local variable.
    pub kind: VariableKind,

    /// Address of the variable, if its location could be resolved.
    pub address: Option<u64>,

    /// Machine word stored at the variable's address.
    pub value: Option<u64>,
}

impl Session {
    /// Captures the state of the stopped debuggee.
    ///
    /// The disassembly holds at most `window` instructions, centered on the
    /// instruction pointer when possible.
    pub fn snapshot(&self, window: usize) -> Result<StopSnapshot> {
        self.ensure_alive()?;

        let location = self.current_line().and_then(|entry| {
            let source = self.debug_info.source_of(entry)?;

            Some(SourceLocation {
                path: source.path().to_path_buf(),
                line: entry.line,
                text: source.line(entry.line).map(str::to_owned),
            })
        });

        Ok(StopSnapshot {
            registers: self.registers,
            disassembly: self.disassembly_window(window)?,
            location,
            function: self.current_function().map(|f| f.name.clone()),
            breakpoints: self.breakpoints.enabled().map(|bk| bk.addr()).collect(),
            breakpoint_lines: self.breakpoint_lines(),
            locals: self.locals()?,
        })
    }

    /// Evaluates the parameters and local variables of the current function.
    ///
    /// Addresses are computed from the canonical frame address of the
    /// current frame.
    pub fn locals(&self) -> Result<Vec<LocalValue>> {
        self.ensure_alive()?;

        let Some(function) = self.current_function() else {
            return Ok(Vec::new());
        };

        let instr_addr = self.registers.instr_addr();

        let cfa = function
            .frame_base_is_cfa
            .then(|| self.debug_info.compute_cfa(instr_addr, &self.registers))
            .transpose()
            .inspect_err(|e| tracing::warn!(error = %e, function = %function.name, "no CFA"))
            .ok()
            .flatten();

        let locals = function
            .variables
            .iter()
            .map(|var| {
                let address = match (var.location, cfa) {
                    (VariableLocation::FrameOffset(offset), Some(cfa)) => {
                        Some(cfa.wrapping_add_signed(offset))
                    }
                    _ => None,
                };

                LocalValue {
                    name: var.name.clone(),
                    kind: var.kind,
                    address,
                    value: address.and_then(|addr| self.process.peek(addr).ok()),
                }
            })
            .collect();

        Ok(locals)
    }

    fn breakpoint_lines(&self) -> Vec<u64> {
        let Some(file) = self.current_line().map(|entry| entry.file) else {
            return Vec::new();
        };

        let lines = self.debug_info.line_table();

        let mut bk_lines = self
            .breakpoints
            .enabled()
            .filter_map(|bk| {
                lines
                    .find_by_address(bk.addr())
                    .filter(|entry| entry.address == bk.addr())
            })
            .filter(|entry| {
                entry.file == file
                    && lines
                        .find_by_location(file, entry.line)
                        .is_some_and(|first| first.address == entry.address)
            })
            .map(|entry| entry.line)
            .collect::<Vec<_>>();

        bk_lines.sort_unstable();
        bk_lines.dedup();
        bk_lines
    }

    fn disassembly_window(&self, window: usize) -> Result<Vec<DisassembledInstruction>> {
        if window == 0 {
            return Ok(Vec::new());
        }

        let instr_addr = self.registers.instr_addr();

        let Some(function) = self.current_function() else {
            return self.disassemble(instr_addr, window);
        };

        let len = (function.high_pc - function.low_pc) as usize;
        let mut code = self.process.read_available(function.low_pc, len);
        self.breakpoints.mask_traps(function.low_pc, &mut code);

        let insns = self.disassembler.decode_all(&code, function.low_pc)?;

        let Some(current) = insns.iter().position(|insn| insn.address == instr_addr) else {
            // not on an instruction boundary of the function
            return self.disassemble(instr_addr, window);
        };

        let start = current
            .saturating_sub(window / 2)
            .min(insns.len().saturating_sub(window));

        Ok(insns.into_iter().skip(start).take(window).collect())
    }
}
