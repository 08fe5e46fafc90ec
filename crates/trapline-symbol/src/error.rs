use std::path::PathBuf;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// File open/read error.
    #[error("{0}: {1}")]
    File(PathBuf, std::io::Error),

    /// Error from the [goblin] crate.
    #[error(transparent)]
    Goblin(#[from] goblin::error::Error),

    /// Error from the [gimli] crate.
    #[error(transparent)]
    Dwarf(#[from] gimli::Error),

    /// The binary carries no `.debug_info` section.
    #[error("missing .debug_info (binary was not compiled with debug information)")]
    MissingDebugInfo,

    /// A debug-info entry has only one of its `DW_AT_low_pc`/`DW_AT_high_pc` bounds.
    #[error("{tag} at {offset:#x} has incomplete address bounds")]
    IncompleteBounds {
        /// DWARF tag of the entry.
        tag: gimli::DwTag,
        /// Offset of the entry in `.debug_info`.
        offset: usize,
    },

    /// A function's frame base is not `DW_OP_call_frame_cfa`.
    #[error("function `{0}` uses an unsupported frame base")]
    UnsupportedFrameBase(String),

    /// The function where debugging starts is missing.
    #[error("missing entry point function `{0}`")]
    MissingEntryPoint(String),

    /// No call-frame record covers the given address.
    #[error("no unwind information for address {0:#x}")]
    MissingUnwindInfo(u64),

    /// The call-frame rule covering the given address is not register-based.
    #[error("unsupported CFA rule at address {0:#x}")]
    UnsupportedCfaRule(u64),

    /// The CFA rule names a register the caller could not provide.
    #[error("unknown DWARF register {0}")]
    UnknownRegister(u16),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
