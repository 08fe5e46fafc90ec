mod auxv;
mod error;
mod mem;
mod process;
mod regs;

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

pub use self::auxv::load_bias;
pub use self::error::{Error, Result};
pub use self::process::TracedProcess;
pub use self::regs::Registers;

#[cfg(not(target_arch = "x86_64"))]
compile_error!("Only x86_64 debuggees are supported.");

// si_code values of SIGTRAP (see `asm-generic/siginfo.h`)
const TRAP_BRKPT: i32 = 1;
const TRAP_TRACE: i32 = 2;
const SI_KERNEL: i32 = 0x80;

/// Cause of a `SIGTRAP` stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// A trap instruction was executed.
    Breakpoint,

    /// A single-step completed.
    SingleStep,

    /// Any other trap (e.g. the one following `execve`).
    Other,
}

/// Stop notification of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Stopped by `SIGTRAP`.
    Trap(TrapKind),

    /// Stopped by another signal, which has not been delivered yet.
    Signal(Signal),

    /// Exited with the given code.
    Exited(i32),

    /// Terminated by the given signal.
    Killed(Signal),
}

/// Spawns a new child process.
///
/// # Note
///
/// The process is spawned in debug-mode, and is stopped right after its
/// `execve`.
pub fn spawn_debuggee(command: &mut Command, no_aslr: bool) -> crate::sys::Result<TracedProcess> {
    // On Linux, if a `pre_exec` closure is specified, `rust-std` will
    // spawn the process with `fork`+`exec`, otherwise `posix_spawn` is used.
    unsafe {
        command.pre_exec(move || {
            if no_aslr {
                personality::get()
                    .and_then(|persona| personality::set(persona | Persona::ADDR_NO_RANDOMIZE))
                    .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            }

            ptrace::traceme().map_err(|e| io::Error::from_raw_os_error(e as i32))
        })
    };

    let child = command.spawn().map_err(crate::sys::Error::ChildExec)?;
    let pid = Pid::from_raw(child.id() as i32);

    // the handle reaps the process from now on
    let process = TracedProcess::new(pid);

    wait_for_exec_stop(pid)?;

    tracing::debug!(pid = pid.as_raw(), "debuggee spawned");

    Ok(process)
}

fn wait_for_exec_stop(pid: Pid) -> crate::sys::Result<()> {
    let status = waitpid(pid, None)?;

    if !matches!(status, WaitStatus::Stopped(_, Signal::SIGTRAP)) {
        return Err(crate::sys::Error::BadChildWait(status));
    }

    Ok(())
}

/// Resumes the debuggee, for a single instruction or until the next stop.
///
/// The given signal (if any) is delivered on resumption.
pub fn resume(pid: Pid, single_step: bool, signal: Option<Signal>) -> crate::sys::Result<()> {
    if single_step {
        ptrace::step(pid, signal)
            .inspect_err(|e| tracing::error!(error = %e, "ptrace(PTRACE_SINGLESTEP)"))?;
    } else {
        ptrace::cont(pid, signal)
            .inspect_err(|e| tracing::error!(error = %e, "ptrace(PTRACE_CONT)"))?;
    }

    Ok(())
}

/// Blocks until the debuggee stops or terminates.
pub fn wait_for_stop(pid: Pid) -> crate::sys::Result<Stop> {
    let status = waitpid(pid, None).inspect_err(|e| tracing::error!(error = %e, "waitpid"))?;

    let stop = match status {
        WaitStatus::Exited(_, code) => Stop::Exited(code),
        WaitStatus::Signaled(_, signal, _) => Stop::Killed(signal),
        WaitStatus::Stopped(_, Signal::SIGTRAP) => {
            let info = ptrace::getsiginfo(pid)
                .inspect_err(|e| tracing::error!(error = %e, "ptrace(PTRACE_GETSIGINFO)"))?;

            let kind = match info.si_code {
                SI_KERNEL | TRAP_BRKPT => TrapKind::Breakpoint,
                TRAP_TRACE => TrapKind::SingleStep,
                _ => TrapKind::Other,
            };

            Stop::Trap(kind)
        }
        WaitStatus::Stopped(_, signal) => Stop::Signal(signal),
        status => return Err(crate::sys::Error::BadChildWait(status)),
    };

    Ok(stop)
}
