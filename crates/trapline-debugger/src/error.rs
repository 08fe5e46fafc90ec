/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error from the debug information layer.
    #[error(transparent)]
    Symbol(#[from] trapline_symbol::Error),

    /// Internal debugger error.
    #[error(transparent)]
    DebuggerInternal(#[from] crate::sys::Error),

    /// Error from the [capstone] crate.
    #[error("disassembler: {0}")]
    Disassembler(#[from] capstone::Error),

    /// An enabled breakpoint already exists at this address.
    #[error("breakpoint already exists at {0:#x}")]
    DuplicateBreakpoint(u64),

    /// No breakpoint exists at this address.
    #[error("no breakpoint at {0:#x}")]
    UnknownBreakpoint(u64),

    /// The breakpoint at this address is already enabled.
    #[error("breakpoint at {0:#x} is already enabled")]
    BreakpointAlreadyEnabled(u64),

    /// A call or jump whose target cannot be determined statically.
    #[error("indirect control transfer at {addr:#x} ({text}) cannot be followed")]
    IndirectControlTransfer {
        /// Address of the instruction.
        addr: u64,

        /// Disassembly of the instruction.
        text: String,
    },

    /// The debuggee is not running anymore.
    #[error("the debuggee has exited")]
    DebuggeeExited,

    /// No line table entry covers this address.
    #[error("no line information for address {0:#x}")]
    NoLineInformation(u64),

    /// The bytes at this address do not decode.
    #[error("invalid instruction at {0:#x}")]
    InvalidInstruction(u64),
}

impl Error {
    /// Whether the debugging session cannot go on after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Symbol(_)
            | Self::DebuggerInternal(_)
            | Self::Disassembler(_)
            | Self::BreakpointAlreadyEnabled(_)
            | Self::IndirectControlTransfer { .. }
            | Self::InvalidInstruction(_) => true,
            Self::DuplicateBreakpoint(_)
            | Self::UnknownBreakpoint(_)
            | Self::DebuggeeExited
            | Self::NoLineInformation(_) => false,
        }
    }
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
