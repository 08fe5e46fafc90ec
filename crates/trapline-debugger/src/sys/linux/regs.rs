use std::fmt;

use nix::libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;

use trapline_symbol::RegisterValues;

/// Snapshot of the general-purpose, flags and segment registers of the
/// debuggee.
#[derive(Clone, Copy)]
pub struct Registers(user_regs_struct);

impl Registers {
    /// Reads the registers of the given (stopped) process.
    pub fn read(pid: Pid) -> crate::sys::Result<Self> {
        let regs = ptrace::getregs(pid)
            .inspect_err(|e| tracing::error!(error = %e, "ptrace(PTRACE_GETREGS)"))?;

        Ok(Self(regs))
    }

    /// Writes the registers into the given (stopped) process.
    pub fn write(&self, pid: Pid) -> crate::sys::Result<()> {
        ptrace::setregs(pid, self.0)
            .inspect_err(|e| tracing::error!(error = %e, "ptrace(PTRACE_SETREGS)"))?;

        Ok(())
    }

    /// Instruction pointer.
    pub const fn instr_addr(&self) -> u64 {
        self.0.rip
    }

    /// Sets the instruction pointer.
    pub fn set_instr_addr(&mut self, addr: u64) {
        self.0.rip = addr;
    }

    /// Stack pointer.
    pub const fn stack_addr(&self) -> u64 {
        self.0.rsp
    }

    /// Frame pointer.
    pub const fn frame_addr(&self) -> u64 {
        self.0.rbp
    }

    /// Returns the value of the register with the given name.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.named()
            .into_iter()
            .find_map(|(n, value)| (n == name).then_some(value))
    }

    /// Sets the value of the register with the given name.
    ///
    /// Returns `false` if there is no such register.
    pub fn set(&mut self, name: &str, value: u64) -> bool {
        let r = &mut self.0;

        let slot = match name {
            "rax" => &mut r.rax,
            "rbx" => &mut r.rbx,
            "rcx" => &mut r.rcx,
            "rdx" => &mut r.rdx,
            "rsi" => &mut r.rsi,
            "rdi" => &mut r.rdi,
            "rbp" => &mut r.rbp,
            "rsp" => &mut r.rsp,
            "r8" => &mut r.r8,
            "r9" => &mut r.r9,
            "r10" => &mut r.r10,
            "r11" => &mut r.r11,
            "r12" => &mut r.r12,
            "r13" => &mut r.r13,
            "r14" => &mut r.r14,
            "r15" => &mut r.r15,
            "rip" => &mut r.rip,
            "eflags" => &mut r.eflags,
            _ => return false,
        };

        *slot = value;
        true
    }

    /// All registers with their names, in display order.
    pub const fn named(&self) -> [(&'static str, u64); 26] {
        let r = &self.0;

        [
            ("rax", r.rax),
            ("rbx", r.rbx),
            ("rcx", r.rcx),
            ("rdx", r.rdx),
            ("rsi", r.rsi),
            ("rdi", r.rdi),
            ("rbp", r.rbp),
            ("rsp", r.rsp),
            ("r8", r.r8),
            ("r9", r.r9),
            ("r10", r.r10),
            ("r11", r.r11),
            ("r12", r.r12),
            ("r13", r.r13),
            ("r14", r.r14),
            ("r15", r.r15),
            ("rip", r.rip),
            ("eflags", r.eflags),
            ("cs", r.cs),
            ("ss", r.ss),
            ("ds", r.ds),
            ("es", r.es),
            ("fs", r.fs),
            ("gs", r.gs),
            ("fs_base", r.fs_base),
            ("gs_base", r.gs_base),
        ]
    }
}

impl RegisterValues for Registers {
    fn dwarf_register(&self, number: u16) -> Option<u64> {
        let r = &self.0;

        // System V x86_64 DWARF register numbering
        let value = match number {
            0 => r.rax,
            1 => r.rdx,
            2 => r.rcx,
            3 => r.rbx,
            4 => r.rsi,
            5 => r.rdi,
            6 => r.rbp,
            7 => r.rsp,
            8 => r.r8,
            9 => r.r9,
            10 => r.r10,
            11 => r.r11,
            12 => r.r12,
            13 => r.r13,
            14 => r.r14,
            15 => r.r15,
            16 => r.rip,
            _ => return None,
        };

        Some(value)
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.named()
                    .into_iter()
                    .map(|(name, value)| (name, format!("{value:#x}"))),
            )
            .finish()
    }
}
