mod snapshot;
mod stepping;

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::sys::signal::Signal;
use trapline_symbol::{DebugInfo, Function, LineTableEntry};

pub use self::snapshot::{LocalValue, SourceLocation, StopSnapshot};
use super::DebuggeeMemory;
use super::breakpoint::{BreakpointManager, TRAP_OPCODE};
use super::disasm::{DisassembledInstruction, Disassembler};
use crate::error::{Error, Result};
use crate::sys::{self, Registers, Stop, TracedProcess, TrapKind};

/// Longest `x86_64` instruction, in bytes.
const MAX_INSTRUCTION_LEN: usize = 15;

/// How the debuggee gets started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Function on which a breakpoint is set right after the launch.
    ///
    /// The launch fails if the debugged program has no such function.
    pub entry_symbol: Option<String>,

    /// Whether address space layout randomization is disabled for the
    /// debuggee.
    pub no_aslr: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            entry_symbol: Some("main".to_owned()),
            no_aslr: true,
        }
    }
}

/// Execution state of a [Session].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The debuggee is stopped and can be inspected.
    Stopped,

    /// The debuggee executes a single instruction.
    SteppingInstruction,

    /// The debuggee executes the remainder of a source line.
    SteppingLine,

    /// The debuggee terminated.
    Exited,
}

/// Reason of the last stop of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Initial stop, right after the program got loaded.
    Launched,

    /// An enabled breakpoint was hit at the given address.
    Breakpoint(u64),

    /// A single-step or line step completed.
    Step,

    /// A trap that no breakpoint of this session accounts for.
    Trap,

    /// The debuggee received a signal, which is delivered on resumption.
    Signal(Signal),

    /// The debuggee exited with the given code.
    Exited(i32),

    /// The debuggee was terminated by the given signal.
    Killed(Signal),
}

/// Debugging session of a single-threaded program.
///
/// The session owns the debuggee process, its debug information, and its
/// breakpoints. Every operation blocks until the debuggee stops again.
pub struct Session {
    /// Path of the debugged program.
    program: PathBuf,

    /// Command-line arguments of the debugged program.
    args: Vec<OsString>,

    options: LaunchOptions,

    /// Debuggee handle.
    process: TracedProcess,

    /// Debug information, relocated to the debuggee's load address.
    debug_info: DebugInfo,

    /// Breakpoint manager.
    breakpoints: BreakpointManager,

    /// Addresses of the breakpoints requested by the user.
    user_breakpoints: BTreeSet<u64>,

    /// Registers of the debuggee at its last stop.
    registers: Registers,

    state: SessionState,

    last_stop: StopReason,

    /// Signal to deliver on the next resumption.
    pending_signal: Option<Signal>,

    disassembler: Disassembler,
}

impl Session {
    /// Spawns the given program and stops it before its first instruction.
    ///
    /// Debug information is loaded before spawning anything, so that a
    /// program that cannot be debugged is never executed.
    #[tracing::instrument(name = "DebugSessionLaunch", skip_all, fields(program = %program.display()))]
    pub fn launch<I, S>(program: &Path, args: I, options: LaunchOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut debug_info = DebugInfo::load(program)?;

        if let Some(entry_symbol) = options.entry_symbol.as_deref() {
            debug_info.entry_point(entry_symbol)?;
        }

        let disassembler = Disassembler::new()?;

        let args = args.into_iter().map(Into::into).collect::<Vec<_>>();
        let process = spawn(program, &args, options.no_aslr)?;

        if debug_info.is_pie() {
            let load_bias = sys::load_bias(process.id(), debug_info.link_entry())?;
            debug_info.relocate(load_bias);
        }

        let registers = Registers::read(process.id())?;

        let mut session = Self {
            program: program.to_path_buf(),
            args,
            options,
            breakpoints: BreakpointManager::new(process.raw_id()),
            process,
            debug_info,
            user_breakpoints: BTreeSet::new(),
            registers,
            state: SessionState::Stopped,
            last_stop: StopReason::Launched,
            pending_signal: None,
            disassembler,
        };

        session.arm_entry_breakpoint()?;

        tracing::info!(pid = session.process.raw_id(), "debuggee launched");

        Ok(session)
    }

    /// Kills the debuggee (if still running) and launches the program again.
    ///
    /// User breakpoints are re-armed in the new process.
    #[tracing::instrument(name = "DebugSessionRestart", skip_all)]
    pub fn restart(&mut self) -> Result<()> {
        self.process.kill()?;
        self.handle_exit();

        let process = spawn(&self.program, &self.args, self.options.no_aslr)?;

        let old_bias = self.debug_info.load_bias();

        if self.debug_info.is_pie() {
            let load_bias = sys::load_bias(process.id(), self.debug_info.link_entry())?;
            self.debug_info.relocate(load_bias);
        }

        let delta = self.debug_info.load_bias().wrapping_sub(old_bias);

        let user_breakpoints = std::mem::take(&mut self.user_breakpoints)
            .into_iter()
            .map(|addr| addr.wrapping_add(delta))
            .collect::<Vec<_>>();

        self.registers = Registers::read(process.id())?;
        self.breakpoints = BreakpointManager::new(process.raw_id());
        self.process = process;
        self.state = SessionState::Stopped;
        self.last_stop = StopReason::Launched;
        self.pending_signal = None;

        self.arm_entry_breakpoint()?;

        for addr in user_breakpoints {
            self.break_at_address(addr)?;
        }

        tracing::info!(pid = self.process.raw_id(), "debuggee relaunched");

        Ok(())
    }

    fn arm_entry_breakpoint(&mut self) -> Result<()> {
        let Some(entry_symbol) = self.options.entry_symbol.as_deref() else {
            return Ok(());
        };

        let addr = self.debug_info.entry_point(entry_symbol)?.low_pc;
        self.break_at_address(addr)?;

        Ok(())
    }
}

impl Session {
    /// Sets a breakpoint at the given address.
    ///
    /// Returns `false` if an enabled breakpoint already stands there.
    pub fn break_at_address(&mut self, addr: u64) -> Result<bool> {
        self.ensure_alive()?;

        let inserted = self.user_breakpoints.insert(addr);

        if self.breakpoints.find_enabled_at(addr).is_some() {
            return Ok(false);
        }

        let armed = self.arm_breakpoint(addr);

        if armed.is_err() && inserted {
            self.user_breakpoints.remove(&addr);
        }

        armed?;

        self.breakpoints.mark_stopped_at(self.registers.instr_addr());

        tracing::info!(addr = format_args!("{addr:#x}"), "breakpoint set");

        Ok(true)
    }

    fn arm_breakpoint(&mut self, addr: u64) -> Result<()> {
        self.breakpoints.create(addr)?;
        self.breakpoints.enable(addr, &mut self.process)
    }

    /// Sets a breakpoint at the entry of every function with the given name.
    ///
    /// Returns the address of each function found (none if the name is
    /// unknown).
    pub fn break_at_function(&mut self, name: &str) -> Result<Vec<u64>> {
        self.ensure_alive()?;

        let addrs = self
            .debug_info
            .functions_named(name)
            .map(|f| f.low_pc)
            .collect::<BTreeSet<_>>();

        if addrs.is_empty() {
            tracing::warn!(name, "no function with this name");
        }

        for &addr in addrs.iter() {
            self.break_at_address(addr)?;
        }

        Ok(addrs.into_iter().collect())
    }

    /// Sets a breakpoint at the first instruction of a source line.
    ///
    /// Without a file, the first line with this number in any source file is
    /// used. Returns the breakpoint address, if the line has code.
    pub fn break_at_line(&mut self, file: Option<&Path>, line: u64) -> Result<Option<u64>> {
        self.ensure_alive()?;

        let entry = match file {
            Some(file) => self.debug_info.find_line_by_location(file, line),
            None => self.debug_info.find_line_by_number(line),
        };

        let Some(addr) = entry.map(|e| e.address) else {
            tracing::warn!(line, "no code for this line");
            return Ok(None);
        };

        self.break_at_address(addr)?;

        Ok(Some(addr))
    }

    /// Removes the user breakpoint at the given address.
    pub fn delete_breakpoint(&mut self, addr: u64) -> Result<()> {
        self.ensure_alive()?;

        if !self.user_breakpoints.remove(&addr) {
            return Err(Error::UnknownBreakpoint(addr));
        }

        self.breakpoints.remove(addr, &mut self.process)?;

        tracing::info!(addr = format_args!("{addr:#x}"), "breakpoint deleted");

        Ok(())
    }
}

impl Session {
    /// Resumes the debuggee until the next stop.
    pub fn continue_execution(&mut self) -> Result<StopReason> {
        self.ensure_alive()?;

        let stop = self.resume();
        self.settle(stop)
    }

    /// Executes a single instruction.
    pub fn single_step(&mut self) -> Result<StopReason> {
        self.ensure_alive()?;

        self.state = SessionState::SteppingInstruction;

        let stop = self.step_instruction();
        self.settle(stop)
    }

    fn step_instruction(&mut self) -> Result<StopReason> {
        if let Some(stop) = self.step_over_breakpoint()? {
            return Ok(stop);
        }

        sys::resume(self.process.id(), true, self.pending_signal.take())?;

        self.wait()
    }

    /// Records the outcome of an operation resuming the debuggee.
    fn settle(&mut self, stop: Result<StopReason>) -> Result<StopReason> {
        self.state = if self.process.terminated() {
            SessionState::Exited
        } else {
            SessionState::Stopped
        };

        let stop = stop?;
        self.last_stop = stop;

        tracing::debug!(?stop, pc = format_args!("{:#x}", self.registers.instr_addr()), "stopped");

        Ok(stop)
    }

    /// Resumes the debuggee until the next stop, stepping over the breakpoint
    /// it is stopped on first (if any).
    fn resume(&mut self) -> Result<StopReason> {
        match self.step_over_breakpoint()? {
            None | Some(StopReason::Step) => (),
            Some(stop) => return Ok(stop),
        }

        // the original instruction may have led to another breakpoint
        if let Some(bk) = self.breakpoints.pending_step_over() {
            return Ok(StopReason::Breakpoint(bk.addr()));
        }

        sys::resume(self.process.id(), false, self.pending_signal.take())?;

        self.wait()
    }

    /// Executes the original instruction of the enabled breakpoint at the
    /// instruction pointer, without triggering it.
    ///
    /// Returns `None` if the debuggee is not stopped on an enabled breakpoint
    /// (nothing is executed then).
    fn step_over_breakpoint(&mut self) -> Result<Option<StopReason>> {
        let Some(addr) = self.breakpoints.pending_step_over().map(|bk| bk.addr()) else {
            return Ok(None);
        };

        self.breakpoints.disable(addr, &mut self.process)?;

        sys::resume(self.process.id(), true, self.pending_signal.take())?;
        let stop = self.wait()?;

        if !self.process.terminated() {
            self.breakpoints.enable(addr, &mut self.process)?;
            self.breakpoints.mark_stopped_at(self.registers.instr_addr());
        }

        tracing::trace!(addr = format_args!("{addr:#x}"), "stepped over breakpoint");

        Ok(Some(stop))
    }

    /// Blocks until the debuggee stops, and refreshes the register snapshot.
    fn wait(&mut self) -> Result<StopReason> {
        let pid = self.process.id();

        let stop = match sys::wait_for_stop(pid)? {
            Stop::Exited(code) => {
                tracing::info!(code, "debuggee exited");
                self.handle_exit();
                return Ok(StopReason::Exited(code));
            }
            Stop::Killed(signal) => {
                tracing::info!(%signal, "debuggee killed");
                self.handle_exit();
                return Ok(StopReason::Killed(signal));
            }
            Stop::Trap(kind) => {
                self.registers = Registers::read(pid)?;

                match kind {
                    TrapKind::Breakpoint => {
                        let trap_addr = self
                            .registers
                            .instr_addr()
                            .wrapping_sub(size_of_val(&TRAP_OPCODE) as u64);

                        if self.breakpoints.find_enabled_at(trap_addr).is_some() {
                            // rewind the instruction pointer
                            self.registers.set_instr_addr(trap_addr);
                            self.registers.write(pid)?;

                            StopReason::Breakpoint(trap_addr)
                        } else {
                            StopReason::Trap
                        }
                    }
                    TrapKind::SingleStep => StopReason::Step,
                    TrapKind::Other => StopReason::Trap,
                }
            }
            Stop::Signal(signal) => {
                tracing::info!(%signal, "debuggee received a signal");

                self.registers = Registers::read(pid)?;
                self.pending_signal = Some(signal);

                StopReason::Signal(signal)
            }
        };

        self.breakpoints.mark_stopped_at(self.registers.instr_addr());

        Ok(stop)
    }

    fn handle_exit(&mut self) {
        self.process.mark_terminated();
        self.breakpoints.invalidate();
        self.pending_signal = None;
        self.state = SessionState::Exited;
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.process.terminated() {
            return Err(Error::DebuggeeExited);
        }

        Ok(())
    }
}

impl Session {
    /// Process ID of the debuggee.
    pub fn pid(&self) -> u64 {
        self.process.raw_id()
    }

    /// Current execution state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reason of the last stop.
    pub fn last_stop(&self) -> StopReason {
        self.last_stop
    }

    /// Whether the debuggee terminated.
    pub fn has_exited(&self) -> bool {
        self.state == SessionState::Exited
    }

    /// Registers of the debuggee at its last stop.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Overwrites the registers of the debuggee.
    pub fn set_registers(&mut self, registers: Registers) -> Result<()> {
        self.ensure_alive()?;

        registers.write(self.process.id())?;
        self.registers = registers;
        self.breakpoints.mark_stopped_at(registers.instr_addr());

        Ok(())
    }

    /// Debug information of the debugged program.
    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }

    /// Breakpoints of the debuggee, temporary ones included while a line
    /// step runs.
    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    /// Addresses of the breakpoints requested by the user.
    pub fn user_breakpoints(&self) -> impl Iterator<Item = u64> + '_ {
        self.user_breakpoints.iter().copied()
    }

    /// Line table entry covering the instruction pointer.
    pub fn current_line(&self) -> Option<&LineTableEntry> {
        self.debug_info
            .find_line_by_address(self.registers.instr_addr())
    }

    /// Function containing the instruction pointer.
    pub fn current_function(&self) -> Option<&Function> {
        self.debug_info
            .find_function_containing(self.registers.instr_addr())
    }

    /// Reads debuggee memory, with breakpoint traps replaced by the original
    /// bytes.
    pub fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        self.ensure_alive()?;

        let mut bytes = self.process.read_bytes(addr, len)?;
        self.breakpoints.mask_traps(addr, &mut bytes);

        Ok(bytes)
    }

    /// Reads the machine word at the given address.
    pub fn peek(&self, addr: u64) -> Result<u64> {
        self.ensure_alive()?;

        Ok(self.process.peek(addr)?)
    }

    /// Disassembles at most `count` instructions starting at the given
    /// address.
    pub fn disassemble(&self, addr: u64, count: usize) -> Result<Vec<DisassembledInstruction>> {
        self.ensure_alive()?;

        let len = count.saturating_mul(MAX_INSTRUCTION_LEN);
        let mut bytes = self.process.read_available(addr, len);
        self.breakpoints.mask_traps(addr, &mut bytes);

        self.disassembler.decode(&bytes, addr, count)
    }
}

fn spawn(program: &Path, args: &[OsString], no_aslr: bool) -> Result<TracedProcess> {
    let mut command = Command::new(program);
    command.args(args);

    Ok(sys::spawn_debuggee(&mut command, no_aslr)?)
}
