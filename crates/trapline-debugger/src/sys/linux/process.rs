use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

/// OS-specific handle of the traced process.
///
/// The process is killed when the handle is dropped, unless it already
/// terminated.
pub struct TracedProcess {
    pid: Pid,
    terminated: bool,
}

impl TracedProcess {
    pub(super) const fn new(pid: Pid) -> Self {
        Self {
            pid,
            terminated: false,
        }
    }

    /// Returns the process ID of the process associated with this handle.
    pub const fn id(&self) -> Pid {
        self.pid
    }

    /// Returns the process ID of the process associated with this handle.
    pub const fn raw_id(&self) -> u64 {
        self.pid.as_raw() as u64
    }

    /// Whether the process terminated (and was reaped).
    pub const fn terminated(&self) -> bool {
        self.terminated
    }

    /// Records that the process terminated.
    pub fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    /// Kills the process and reaps it.
    pub fn kill(&mut self) -> crate::sys::Result<()> {
        if self.terminated {
            return Ok(());
        }

        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) => (),
            Err(nix::Error::ESRCH) => {
                self.terminated = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        loop {
            match waitpid(self.pid, None)? {
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => break,
                _ => continue,
            }
        }

        self.terminated = true;

        tracing::debug!(pid = self.pid.as_raw(), "process killed");

        Ok(())
    }
}

impl Drop for TracedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::error!(error = %e, pid = self.pid.as_raw(), "kill");
        }
    }
}
