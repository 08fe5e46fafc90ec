use std::collections::BTreeMap;

use super::DebuggeeMemory;
use crate::error::{Error, Result};

/// One-byte trap instruction (`int3`).
pub const TRAP_OPCODE: u8 = 0xcc;

/// Software breakpoint planted in the debuggee.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    addr: u64,
    debuggee_process_id: u64,
    enabled: bool,
    saved_opcode: u8,
    pending_step_over: bool,
}

impl Breakpoint {
    /// Address of the breakpoint.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Process ID of the debuggee owning this breakpoint.
    pub fn debuggee_process_id(&self) -> u64 {
        self.debuggee_process_id
    }

    /// Whether the trap opcode is currently planted.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Original byte replaced by the trap opcode.
    pub fn saved_opcode(&self) -> u8 {
        self.saved_opcode
    }

    /// Whether the debuggee is stopped on this breakpoint, and its original
    /// instruction must be executed before the trap gets re-armed.
    pub fn pending_step_over(&self) -> bool {
        self.pending_step_over
    }
}

/// Bookkeeping of the breakpoints planted in a single debuggee.
///
/// Besides the breakpoints requested by the user, the manager holds the
/// temporary ones planted by line stepping, until they get retired.
pub struct BreakpointManager {
    /// Breakpoints placed within the debuggee.
    bks: BTreeMap<u64, Breakpoint>,

    /// Breakpoints planted for a single resumption, and whether their record
    /// was created for that purpose.
    temporaries: Vec<(u64, bool)>,

    /// Process ID of the debuggee.
    debuggee_process_id: u64,
}

impl BreakpointManager {
    /// Creates an empty manager for the given debuggee.
    pub fn new(debuggee_process_id: u64) -> Self {
        Self {
            bks: BTreeMap::new(),
            temporaries: Vec::new(),
            debuggee_process_id,
        }
    }
}

impl BreakpointManager {
    /// Allocates a disabled breakpoint at the given address.
    ///
    /// Debuggee memory is left untouched. If a disabled breakpoint already
    /// exists at this address, it is reused.
    pub fn create(&mut self, addr: u64) -> Result<&Breakpoint> {
        if self.bks.get(&addr).is_some_and(|bk| bk.enabled) {
            return Err(Error::DuplicateBreakpoint(addr));
        }

        let bk = self.bks.entry(addr).or_insert_with(|| Breakpoint {
            addr,
            debuggee_process_id: self.debuggee_process_id,
            enabled: false,
            saved_opcode: 0,
            pending_step_over: false,
        });

        Ok(bk)
    }

    /// Plants the trap opcode at the address of the given breakpoint.
    pub fn enable(&mut self, addr: u64, mem: &mut impl DebuggeeMemory) -> Result<()> {
        let bk = self.bks.get_mut(&addr).ok_or(Error::UnknownBreakpoint(addr))?;

        if bk.enabled {
            return Err(Error::BreakpointAlreadyEnabled(addr));
        }

        let word = mem.peek(addr)?;
        mem.poke(addr, (word & !0xff) | u64::from(TRAP_OPCODE))?;

        bk.saved_opcode = (word & 0xff) as u8;
        bk.enabled = true;

        tracing::trace!(addr = format_args!("{addr:#x}"), "breakpoint enabled");

        Ok(())
    }

    /// Restores the original byte at the address of the given breakpoint.
    ///
    /// Disabling a breakpoint that is not enabled does nothing.
    pub fn disable(&mut self, addr: u64, mem: &mut impl DebuggeeMemory) -> Result<()> {
        let bk = self.bks.get_mut(&addr).ok_or(Error::UnknownBreakpoint(addr))?;

        if !bk.enabled {
            return Ok(());
        }

        let word = mem.peek(addr)?;
        mem.poke(addr, (word & !0xff) | u64::from(bk.saved_opcode))?;

        bk.enabled = false;
        bk.pending_step_over = false;

        tracing::trace!(addr = format_args!("{addr:#x}"), "breakpoint disabled");

        Ok(())
    }

    /// Disables and forgets the breakpoint at the given address.
    pub fn remove(&mut self, addr: u64, mem: &mut impl DebuggeeMemory) -> Result<()> {
        self.disable(addr, mem)?;
        self.bks.remove(&addr);
        self.temporaries.retain(|(a, _)| *a != addr);

        Ok(())
    }

    /// Returns the breakpoint at the given address, enabled or not.
    pub fn get(&self, addr: u64) -> Option<&Breakpoint> {
        self.bks.get(&addr)
    }

    /// Returns the breakpoint at the given address, if its trap is planted.
    pub fn find_enabled_at(&self, addr: u64) -> Option<&Breakpoint> {
        self.bks.get(&addr).filter(|bk| bk.enabled)
    }

    /// Iterates over the enabled breakpoints, by ascending address.
    pub fn enabled(&self) -> impl Iterator<Item = &Breakpoint> {
        self.bks.values().filter(|bk| bk.enabled)
    }

    /// Substitutes the original bytes of enabled breakpoints within a buffer
    /// read from the debuggee at the given address.
    pub fn mask_traps(&self, addr: u64, bytes: &mut [u8]) {
        let end = addr.saturating_add(bytes.len() as u64);

        for bk in self.bks.range(addr..end).map(|(_, bk)| bk) {
            if bk.enabled {
                bytes[(bk.addr - addr) as usize] = bk.saved_opcode;
            }
        }
    }

    /// Records that the debuggee stopped with the given instruction pointer.
    pub fn mark_stopped_at(&mut self, instr_addr: u64) {
        for bk in self.bks.values_mut() {
            bk.pending_step_over = bk.enabled && bk.addr == instr_addr;
        }
    }

    /// Returns the breakpoint whose original instruction must be executed
    /// before the debuggee resumes.
    pub fn pending_step_over(&self) -> Option<&Breakpoint> {
        self.bks.values().find(|bk| bk.pending_step_over)
    }

    /// Plants a breakpoint meant to be hit once.
    ///
    /// Returns `false` if an enabled breakpoint already stands at this
    /// address (nothing is planted then).
    pub fn plant_temporary(&mut self, addr: u64, mem: &mut impl DebuggeeMemory) -> Result<bool> {
        if self.find_enabled_at(addr).is_some() {
            return Ok(false);
        }

        let created = !self.bks.contains_key(&addr);

        self.create(addr)?;
        self.enable(addr, mem)?;
        self.temporaries.push((addr, created));

        Ok(true)
    }

    /// Whether a temporary breakpoint stands at the given address.
    pub fn is_temporary(&self, addr: u64) -> bool {
        self.temporaries.iter().any(|(a, _)| *a == addr)
    }

    /// Disables every temporary breakpoint, forgetting the ones that were
    /// created for that purpose.
    pub fn retire_temporaries(&mut self, mem: &mut impl DebuggeeMemory) -> Result<()> {
        for (addr, created) in std::mem::take(&mut self.temporaries) {
            self.disable(addr, mem)?;

            if created {
                self.bks.remove(&addr);
            }
        }

        Ok(())
    }

    /// Forgets every breakpoint, without touching the debuggee memory.
    pub fn invalidate(&mut self) {
        self.bks.clear();
        self.temporaries.clear();
    }
}
