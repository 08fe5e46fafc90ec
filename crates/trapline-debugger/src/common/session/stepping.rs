use std::collections::BTreeSet;
use std::ops::Range;

use super::{Session, SessionState, StopReason};
use crate::common::DebuggeeMemory;
use crate::common::disasm::{ControlFlow, DisassembledInstruction};
use crate::error::{Error, Result};

impl Session {
    /// Executes the current source line, entering called functions that have
    /// debug information.
    pub fn step_into(&mut self) -> Result<StopReason> {
        self.step_line(true)
    }

    /// Executes the current source line, running called functions to
    /// completion.
    pub fn step_over(&mut self) -> Result<StopReason> {
        self.step_line(false)
    }

    /// Executes the current source line.
    ///
    /// Temporary breakpoints are planted on every way out of the line: its
    /// fall-through end, jumps leaving it, returns to the caller, and either
    /// the targets of its calls (`into_functions`) or their return addresses.
    /// They are all removed once the debuggee stops, whichever got hit.
    ///
    /// A temporary breakpoint hit by a deeper frame (a recursive call of the
    /// current function) does not end the step.
    #[tracing::instrument(name = "StepLine", skip(self))]
    pub fn step_line(&mut self, into_functions: bool) -> Result<StopReason> {
        self.ensure_alive()?;

        let instr_addr = self.registers.instr_addr();

        let range = self
            .debug_info
            .line_range(instr_addr)
            .ok_or(Error::NoLineInformation(instr_addr))?;

        let exits = self.line_exits(&range, into_functions)?;

        self.state = SessionState::SteppingLine;

        let stop = self.run_to_any(&exits);
        let stop = self.settle(stop)?;

        // temporary breakpoints are not reported as such
        let stop = match stop {
            StopReason::Breakpoint(addr) if !self.user_breakpoints.contains(&addr) => {
                StopReason::Step
            }
            stop => stop,
        };

        self.last_stop = stop;

        Ok(stop)
    }

    /// Computes where the debuggee may go once it leaves the given line.
    fn line_exits(&self, range: &Range<u64>, into_functions: bool) -> Result<LineExits> {
        let mut exits = LineExits {
            targets: BTreeSet::from([range.end]),
            callee_entries: BTreeSet::new(),
            frame: self.frame_address(),
        };

        let len = (range.end - range.start) as usize;
        let mut code = self.process.read_bytes(range.start, len)?;
        self.breakpoints.mask_traps(range.start, &mut code);

        let insns = self.disassembler.decode_range(&code, range.start)?;

        for insn in insns.iter() {
            match insn.flow {
                ControlFlow::Sequential => (),

                ControlFlow::Call { target } if into_functions => {
                    let target = target.ok_or_else(|| indirect(insn))?;

                    if self.debug_info.unit_containing(target).is_some() {
                        exits.targets.insert(target);
                        exits.callee_entries.insert(target);
                    } else {
                        // no debug information to step into
                        exits.targets.insert(insn.next_address());
                    }
                }

                ControlFlow::Call { .. } => {
                    exits.targets.insert(insn.next_address());
                }

                ControlFlow::Return => {
                    let return_addr = self.return_address()?;

                    if self.debug_info.unit_containing(return_addr).is_some() {
                        exits.targets.insert(return_addr);
                    }
                }

                ControlFlow::Jump { target, .. } => {
                    let target = target.ok_or_else(|| indirect(insn))?;

                    if !range.contains(&target) {
                        exits.targets.insert(target);
                    }
                }
            }
        }

        tracing::debug!(
            start = format_args!("{:#x}", range.start),
            end = format_args!("{:#x}", range.end),
            targets = ?exits.targets.iter().map(|t| format!("{t:#x}")).collect::<Vec<_>>(),
            "line exits"
        );

        Ok(exits)
    }

    /// Reads the return address of the current frame.
    fn return_address(&self) -> Result<u64> {
        let instr_addr = self.registers.instr_addr();
        let cfa = self.debug_info.compute_cfa(instr_addr, &self.registers)?;

        // the return address is pushed right below the CFA
        let slot = cfa.wrapping_sub(size_of::<u64>() as u64);

        Ok(self.process.peek(slot)?)
    }

    /// Canonical frame address of the current frame, if known.
    fn frame_address(&self) -> Option<u64> {
        self.debug_info
            .compute_cfa(self.registers.instr_addr(), &self.registers)
            .inspect_err(|e| tracing::debug!(error = %e, "no CFA for the current frame"))
            .ok()
    }

    /// Plants temporary breakpoints on the exits of a line and resumes the
    /// debuggee until it leaves the line.
    fn run_to_any(&mut self, exits: &LineExits) -> Result<StopReason> {
        let stop = exits
            .targets
            .iter()
            .try_for_each(|&addr| {
                self.breakpoints
                    .plant_temporary(addr, &mut self.process)
                    .map(|_| ())
            })
            .and_then(|()| {
                // a temporary may stand right at the instruction pointer
                self.breakpoints
                    .mark_stopped_at(self.registers.instr_addr());

                self.resume_in_frame(exits)
            });

        if !self.process.terminated() {
            self.breakpoints.retire_temporaries(&mut self.process)?;
            self.breakpoints
                .mark_stopped_at(self.registers.instr_addr());
        }

        stop
    }

    /// Resumes the debuggee until it stops anywhere but on a temporary
    /// breakpoint reached by a frame deeper than the stepped one.
    fn resume_in_frame(&mut self, exits: &LineExits) -> Result<StopReason> {
        loop {
            let stop = self.resume()?;

            let StopReason::Breakpoint(addr) = stop else {
                return Ok(stop);
            };

            if !self.breakpoints.is_temporary(addr) || exits.callee_entries.contains(&addr) {
                return Ok(stop);
            }

            // the stack grows downwards
            match (exits.frame, self.frame_address()) {
                (Some(frame), Some(cfa)) if cfa < frame => {
                    tracing::trace!(
                        addr = format_args!("{addr:#x}"),
                        frame = format_args!("{frame:#x}"),
                        cfa = format_args!("{cfa:#x}"),
                        "line exit reached by a deeper frame"
                    );
                }
                _ => return Ok(stop),
            }
        }
    }
}

/// Ways out of a source line.
struct LineExits {
    /// Addresses where temporary breakpoints are planted.
    targets: BTreeSet<u64>,

    /// Entries of the functions called by the line.
    callee_entries: BTreeSet<u64>,

    /// Canonical frame address of the frame executing the line.
    frame: Option<u64>,
}

fn indirect(insn: &DisassembledInstruction) -> Error {
    tracing::error!(
        addr = format_args!("{:#x}", insn.address),
        insn = %insn.text(),
        "cannot step through an indirect control transfer"
    );

    Error::IndirectControlTransfer {
        addr: insn.address,
        text: insn.text(),
    }
}
