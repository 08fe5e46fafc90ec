//! This crate implements the execution control of a source-level debugger
//! for native programs.
//!
//! A [Session] spawns the program to debug as a traced child process (on the
//! **same host machine**), and lets the caller:
//!
//! - set and delete breakpoints (by address, function name or source line),
//! - continue, single-step, or step over/into source lines,
//! - inspect registers, memory, disassembly and local variables.
//!
//! Addresses and source lines are resolved with the debug information loaded
//! by `trapline-symbol`.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use trapline_debugger::{LaunchOptions, Session, StopReason};
//!
//! # fn main() -> trapline_debugger::Result<()> {
//! let mut session = Session::launch(Path::new("./hello"), ["--verbose"], LaunchOptions::default())?;
//!
//! // runs until `main`
//! assert!(matches!(session.continue_execution()?, StopReason::Breakpoint(_)));
//!
//! session.step_over()?;
//! println!("{:?}", session.current_line());
//! # Ok(())
//! # }
//! ```
//!
//! # Supported Platforms
//!
//! <table>
//!     <thead>
//!         <tr>
//!             <th>Host Machine</th>
//!             <th>Debuggee Platform</th>
//!         </tr>
//!     </thead>
//!     <tbody>
//!         <tr>
//!             <td>Linux <code>x86_64</code></td>
//!             <td><code>x86_64</code></td>
//!         </tr>
//!     </tbody>
//! </table>

mod common;
mod error;
mod sys;

pub use nix::sys::signal::Signal;

pub use self::common::breakpoint::{Breakpoint, BreakpointManager, TRAP_OPCODE};
pub use self::common::disasm::{ControlFlow, DisassembledInstruction, Disassembler};
pub use self::common::session::{
    LaunchOptions, LocalValue, Session, SessionState, SourceLocation, StopReason, StopSnapshot,
};
pub use self::error::{Error, Result};
pub use self::sys::Registers;
