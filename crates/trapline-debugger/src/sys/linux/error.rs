use nix::sys::wait::WaitStatus;

/// Error of the OS layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// File open/read error.
    #[error("{0}: {1}")]
    File(std::path::PathBuf, std::io::Error),

    /// The debuggee reported an unexpected status.
    #[error("bad child wait status: {0:?}")]
    BadChildWait(WaitStatus),

    /// Error from a system call.
    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    /// Malformed auxiliary vector.
    #[error(transparent)]
    Scroll(#[from] scroll::Error),

    /// The auxiliary vector lacks the program entry.
    #[error("missing auxv value")]
    MissingAuxv,

    /// The debuggee could not be spawned.
    #[error("Child process execution failed: {0}")]
    ChildExec(std::io::Error),
}

/// Result type of the OS layer.
pub type Result<T> = core::result::Result<T, Error>;
