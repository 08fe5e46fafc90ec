use std::io::{BufRead, Write};
use std::path::PathBuf;

use miette::IntoDiagnostic;
use trapline_debugger::{Session, StopReason};

use crate::command::{BreakLocation, Command, HELP};
use crate::config::DebugConfig;

/// Number of source lines shown around the current line.
const LIST_CONTEXT: u64 = 5;

#[derive(thiserror::Error, Debug)]
enum ReplError {
    #[error(transparent)]
    Debugger(#[from] trapline_debugger::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runs the subcommand for debugging a process interactively.
///
/// Returns the exit code of the last debuggee run.
pub fn evaluate_run(
    config: Option<String>,
    program: PathBuf,
    args: Vec<String>,
    input: impl BufRead,
    output: impl Write,
) -> miette::Result<i32> {
    let config = DebugConfig::load(config.as_deref())?;
    let break_locations = config.break_locations()?;

    let session = Session::launch(&program, args, config.launch_options()).into_diagnostic()?;

    let mut repl = Repl {
        session,
        disasm_window: config.disasm_window,
        output,
        exit_code: 0,
    };

    for location in break_locations {
        repl.execute(Command::Break(location))?;
    }

    repl.run(input)
}

struct Repl<W> {
    session: Session,
    disasm_window: usize,
    output: W,
    exit_code: i32,
}

impl<W: Write> Repl<W> {
    fn run(mut self, input: impl BufRead) -> miette::Result<i32> {
        self.print_stop().into_diagnostic()?;
        self.prompt().into_diagnostic()?;

        for line in input.lines() {
            let line = line.into_diagnostic()?;

            if line.trim().is_empty() {
                self.prompt().into_diagnostic()?;
                continue;
            }

            match Command::parse(&line) {
                Ok(Command::Quit) => break,
                Ok(cmd) => self.execute(cmd)?,
                Err(e) => writeln!(self.output, "{e}").into_diagnostic()?,
            }

            self.prompt().into_diagnostic()?;
        }

        Ok(self.exit_code)
    }

    fn prompt(&mut self) -> std::io::Result<()> {
        write!(self.output, "(trapline) ")?;
        self.output.flush()
    }

    /// Executes a command, reporting non-fatal errors to the operator.
    fn execute(&mut self, command: Command) -> miette::Result<()> {
        match self.dispatch(command) {
            Ok(()) => Ok(()),
            Err(ReplError::Debugger(e)) if !e.is_fatal() => {
                writeln!(self.output, "error: {e}").into_diagnostic()
            }
            Err(ReplError::Debugger(e)) => {
                tracing::error!(error = %e, "fatal debugger error");
                Err(e).into_diagnostic()
            }
            Err(ReplError::Io(e)) => Err(e).into_diagnostic(),
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<(), ReplError> {
        match command {
            Command::Break(location) => self.set_breakpoint(location)?,
            Command::Delete(addr) => {
                self.session.delete_breakpoint(addr)?;
                writeln!(self.output, "deleted breakpoint at {addr:#x}")?;
            }
            Command::Breakpoints => self.print_breakpoints()?,
            Command::Continue => {
                let stop = self.session.continue_execution()?;
                self.report(stop)?;
            }
            Command::StepInstruction => {
                let stop = self.session.single_step()?;
                self.report(stop)?;
            }
            Command::StepInto => {
                let stop = self.session.step_into()?;
                self.report(stop)?;
            }
            Command::StepOver => {
                let stop = self.session.step_over()?;
                self.report(stop)?;
            }
            Command::Registers => self.print_registers()?,
            Command::SetRegister(name, value) => {
                let mut regs = *self.session.registers();

                if regs.set(&name, value) {
                    self.session.set_registers(regs)?;
                } else {
                    writeln!(self.output, "unknown register `{name}`")?;
                }
            }
            Command::Locals => self.print_locals()?,
            Command::Disassemble(addr) => {
                let addr = addr.unwrap_or_else(|| self.session.registers().instr_addr());
                let insns = self.session.disassemble(addr, self.disasm_window)?;
                self.print_disassembly(&insns)?;
            }
            Command::List => self.print_source()?,
            Command::Memory(addr, len) => self.print_memory(addr, len)?,
            Command::Restart => {
                self.session.restart()?;
                writeln!(self.output, "restarted (pid {})", self.session.pid())?;
                self.print_stop()?;
            }
            Command::Help => writeln!(self.output, "{HELP}")?,
            Command::Quit => (),
        }

        Ok(())
    }

    fn set_breakpoint(&mut self, location: BreakLocation) -> Result<(), ReplError> {
        match location {
            BreakLocation::Address(addr) => {
                if self.session.break_at_address(addr)? {
                    writeln!(self.output, "breakpoint at {addr:#x}")?;
                } else {
                    writeln!(self.output, "breakpoint already set at {addr:#x}")?;
                }
            }
            BreakLocation::Function(name) => {
                let addrs = self.session.break_at_function(&name)?;

                if addrs.is_empty() {
                    writeln!(self.output, "no function named `{name}`")?;
                }

                for addr in addrs {
                    writeln!(self.output, "breakpoint at {addr:#x} ({name})")?;
                }
            }
            BreakLocation::Line(file, line) => {
                match self.session.break_at_line(file.as_deref(), line)? {
                    Some(addr) => writeln!(self.output, "breakpoint at {addr:#x} (line {line})")?,
                    None => writeln!(self.output, "no code at line {line}")?,
                }
            }
        }

        Ok(())
    }

    fn report(&mut self, stop: StopReason) -> Result<(), ReplError> {
        match stop {
            StopReason::Exited(code) => {
                self.exit_code = code;
                writeln!(self.output, "process exited with code {code}")?;
                return Ok(());
            }
            StopReason::Killed(signal) => {
                self.exit_code = 128 + signal as i32;
                writeln!(self.output, "process terminated by {signal}")?;
                return Ok(());
            }
            StopReason::Signal(signal) => writeln!(self.output, "process received {signal}")?,
            StopReason::Breakpoint(addr) => writeln!(self.output, "breakpoint hit at {addr:#x}")?,
            StopReason::Trap => writeln!(self.output, "process trapped")?,
            StopReason::Launched | StopReason::Step => (),
        }

        self.print_stop()?;

        Ok(())
    }

    fn print_stop(&mut self) -> Result<(), ReplError> {
        let snapshot = self.session.snapshot(self.disasm_window)?;

        let function = snapshot.function.as_deref().unwrap_or("??");
        let ip = snapshot.registers.instr_addr();

        match snapshot.location {
            Some(location) => {
                writeln!(
                    self.output,
                    "{ip:#x} in {function} at {}:{}",
                    location.path.display(),
                    location.line
                )?;

                let marker = if snapshot.breakpoint_lines.contains(&location.line) {
                    "*"
                } else {
                    " "
                };

                if let Some(text) = location.text {
                    writeln!(self.output, "{marker}{:>5}  {text}", location.line)?;
                }
            }
            None => writeln!(self.output, "{ip:#x} in {function}")?,
        }

        self.print_disassembly(&snapshot.disassembly)?;

        Ok(())
    }

    fn print_disassembly(
        &mut self,
        insns: &[trapline_debugger::DisassembledInstruction],
    ) -> Result<(), ReplError> {
        let ip = self.session.registers().instr_addr();

        for insn in insns {
            let cursor = if insn.address == ip { "=>" } else { "  " };
            let marker = if self.session.breakpoints().find_enabled_at(insn.address).is_some() {
                "*"
            } else {
                " "
            };

            writeln!(self.output, "{cursor}{marker}{:#x}  {}", insn.address, insn.text())?;
        }

        Ok(())
    }

    fn print_source(&mut self) -> Result<(), ReplError> {
        let snapshot = self.session.snapshot(0)?;

        let Some(location) = snapshot.location else {
            writeln!(self.output, "no source line for the current instruction")?;
            return Ok(());
        };

        let debug_info = self.session.debug_info();

        let Some(source) = debug_info
            .sources()
            .iter()
            .find(|s| s.path() == location.path)
        else {
            return Ok(());
        };

        let Some(line_count) = source.line_count() else {
            writeln!(self.output, "cannot read {}", location.path.display())?;
            return Ok(());
        };

        let first = location.line.saturating_sub(LIST_CONTEXT).max(1);
        let last = (location.line + LIST_CONTEXT).min(line_count as u64);

        for n in first..=last {
            let cursor = if n == location.line { "=>" } else { "  " };
            let marker = if snapshot.breakpoint_lines.contains(&n) {
                "*"
            } else {
                " "
            };

            writeln!(
                self.output,
                "{cursor}{marker}{n:>5}  {}",
                source.line(n).unwrap_or_default()
            )?;
        }

        Ok(())
    }

    fn print_breakpoints(&mut self) -> Result<(), ReplError> {
        let debug_info = self.session.debug_info();

        for addr in self.session.user_breakpoints() {
            let function = debug_info
                .find_function_containing(addr)
                .map_or("??", |f| f.name.as_str());

            match debug_info.find_line_by_address(addr) {
                Some(entry) => {
                    writeln!(self.output, "{addr:#x} in {function} (line {})", entry.line)?
                }
                None => writeln!(self.output, "{addr:#x} in {function}")?,
            }
        }

        Ok(())
    }

    fn print_registers(&mut self) -> Result<(), ReplError> {
        for (name, value) in self.session.registers().named() {
            writeln!(self.output, "{name:<8} {value:#018x}")?;
        }

        Ok(())
    }

    fn print_locals(&mut self) -> Result<(), ReplError> {
        let locals = self.session.locals()?;

        if locals.is_empty() {
            writeln!(self.output, "no locals")?;
        }

        for local in locals {
            let kind = match local.kind {
                trapline_symbol::VariableKind::Parameter => "param",
                trapline_symbol::VariableKind::Local => "local",
            };

            match (local.address, local.value) {
                (Some(addr), Some(value)) => writeln!(
                    self.output,
                    "{kind} {} @ {addr:#x} = {value:#x}",
                    local.name
                )?,
                (Some(addr), None) => {
                    writeln!(self.output, "{kind} {} @ {addr:#x} = <unreadable>", local.name)?
                }
                (None, _) => writeln!(self.output, "{kind} {} = <unresolved location>", local.name)?,
            }
        }

        Ok(())
    }

    fn print_memory(&mut self, addr: u64, len: usize) -> Result<(), ReplError> {
        let bytes = self.session.read_memory(addr, len)?;

        for (i, chunk) in bytes.chunks(16).enumerate() {
            let hex = chunk
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ");

            writeln!(self.output, "{:#x}  {hex}", addr + 16 * i as u64)?;
        }

        Ok(())
    }
}
