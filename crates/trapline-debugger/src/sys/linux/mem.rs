use nix::libc::c_long;
use nix::sys::ptrace;

use super::TracedProcess;
use crate::common::DebuggeeMemory;

impl DebuggeeMemory for TracedProcess {
    fn peek(&self, addr: u64) -> crate::sys::Result<u64> {
        let word = ptrace::read(self.id(), addr as *mut _).inspect_err(|e| {
            tracing::debug!(error = %e, addr = format_args!("{addr:#x}"), "ptrace(PTRACE_PEEKDATA)")
        })?;

        Ok(word as u64)
    }

    fn poke(&mut self, addr: u64, word: u64) -> crate::sys::Result<()> {
        ptrace::write(self.id(), addr as *mut _, word as c_long).inspect_err(|e| {
            tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "ptrace(PTRACE_POKEDATA)")
        })?;

        Ok(())
    }
}
