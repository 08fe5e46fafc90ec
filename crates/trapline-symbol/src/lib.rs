//! This crate loads the debug information of an ELF executable (DWARF
//! compile units, functions, variables, line table and call-frame rules)
//! into an in-memory model, and resolves addresses against it.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use trapline_symbol::DebugInfo;
//!
//! let debug_info = DebugInfo::load(Path::new("./a.out")).unwrap();
//!
//! let main = debug_info.entry_point("main").unwrap();
//! let line = debug_info.find_line_by_address(main.low_pc).unwrap();
//!
//! println!("main starts at line {}", line.line);
//! ```

mod elf;
mod error;
mod line;
mod loader;
mod model;
mod source;
mod unwind;

use std::ops::Range;
use std::path::{Path, PathBuf};

pub use self::elf::ElfImage;
pub use self::error::{Error, Result};
pub use self::line::{LineTable, LineTableEntry};
pub use self::model::{CompileUnit, Function, Variable, VariableKind, VariableLocation};
pub use self::source::{SourceFile, SourceFiles};
pub use self::unwind::{CfaComputation, FrameUnwindInfo, FrameUnwindTable, RegisterValues, UnwindRow};

/// Debug information of an executable.
///
/// Addresses are link-time addresses shifted by the current load bias (see
/// [relocate](Self::relocate)).
pub struct DebugInfo {
    /// Path of the executable.
    path: PathBuf,

    /// Compile units.
    units: Vec<CompileUnit>,

    /// Functions with code, in debug-info order.
    functions: Vec<Function>,

    /// Line table of all compile units.
    lines: LineTable,

    /// Call-frame rules.
    unwind: FrameUnwindTable,

    /// Source files referenced by the line table.
    sources: SourceFiles,

    /// Whether the executable is position-independent.
    is_pie: bool,

    /// Link-time entry point of the executable.
    link_entry: u64,

    /// Offset added to every link-time address.
    load_bias: u64,
}

impl DebugInfo {
    /// Loads the debug information of the executable at the given path.
    #[tracing::instrument(name = "DebugInfoLoad", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> crate::Result<Self> {
        let image = ElfImage::open(path)?;

        let dwarf = self::loader::load_dwarf(&image)?;
        let unwind = FrameUnwindTable::parse(&image)?;

        Ok(Self {
            path: path.to_path_buf(),
            units: dwarf.units,
            functions: dwarf.functions,
            lines: dwarf.lines,
            unwind,
            sources: dwarf.sources,
            is_pie: image.is_pie(),
            link_entry: image.entry(),
            load_bias: 0,
        })
    }

    /// Shifts every address of the model so that it matches the given load
    /// bias.
    pub fn relocate(&mut self, load_bias: u64) {
        let delta = load_bias.wrapping_sub(self.load_bias);

        if delta == 0 {
            return;
        }

        for unit in self.units.iter_mut() {
            unit.relocate(delta);
        }

        for function in self.functions.iter_mut() {
            function.relocate(delta);
        }

        self.lines.relocate(delta);
        self.unwind.relocate(delta);
        self.load_bias = load_bias;

        tracing::debug!(load_bias = format_args!("{load_bias:#x}"), "relocated debug info");
    }

    /// Path of the executable.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the executable is position-independent.
    pub const fn is_pie(&self) -> bool {
        self.is_pie
    }

    /// Link-time entry point of the executable.
    pub const fn link_entry(&self) -> u64 {
        self.link_entry
    }

    /// Current load bias.
    pub const fn load_bias(&self) -> u64 {
        self.load_bias
    }

    /// Compile units.
    pub fn units(&self) -> &[CompileUnit] {
        &self.units
    }

    /// Functions with code.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Line table.
    pub fn line_table(&self) -> &LineTable {
        &self.lines
    }

    /// Call-frame rules.
    pub fn unwind_table(&self) -> &FrameUnwindTable {
        &self.unwind
    }

    /// Source files referenced by the line table.
    pub fn sources(&self) -> &SourceFiles {
        &self.sources
    }

    /// Returns the source file referenced by the given line table entry.
    pub fn source_of(&self, entry: &LineTableEntry) -> Option<&SourceFile> {
        self.sources.get(entry.file)
    }

    /// Returns the compile unit whose code contains the given address.
    pub fn unit_containing(&self, addr: u64) -> Option<&CompileUnit> {
        self.units.iter().find(|u| u.contains(addr))
    }

    /// Returns the first function whose code contains the given address.
    pub fn find_function_containing(&self, addr: u64) -> Option<&Function> {
        self.functions.iter().find(|f| f.contains(addr))
    }

    /// Returns every function with the given name.
    pub fn functions_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Function> {
        self.functions.iter().filter(move |f| f.name == name)
    }

    /// Returns the function where debugging starts.
    pub fn entry_point(&self, name: &str) -> crate::Result<&Function> {
        self.functions_named(name)
            .next()
            .ok_or_else(|| crate::Error::MissingEntryPoint(name.to_owned()))
    }

    /// Returns the line table entry covering the given address.
    ///
    /// The entry must belong to the function containing `addr`, if any.
    pub fn find_line_by_address(&self, addr: u64) -> Option<&LineTableEntry> {
        let entry = self.lines.find_by_address(addr)?;

        match self.find_function_containing(addr) {
            Some(f) if entry.address < f.low_pc => None,
            _ => Some(entry),
        }
    }

    /// Returns the first line table entry of the given line.
    pub fn find_line_by_number(&self, line: u64) -> Option<&LineTableEntry> {
        self.lines.find_by_number(line)
    }

    /// Returns the first line table entry of the given line in the source
    /// file whose path ends with `file`.
    pub fn find_line_by_location(&self, file: &Path, line: u64) -> Option<&LineTableEntry> {
        let file = self.sources.find(file)?;
        self.lines.find_by_location(file, line)
    }

    /// Returns the half-open address range of the source line covering
    /// `addr`, bounded by the enclosing function.
    pub fn line_range(&self, addr: u64) -> Option<Range<u64>> {
        let function = self.find_function_containing(addr);

        if function.is_some() && self.find_line_by_address(addr).is_none() {
            return None;
        }

        self.lines.line_range(addr, function.map(|f| f.high_pc))
    }

    /// Computes the canonical frame address at `pc`.
    pub fn compute_cfa(&self, pc: u64, regs: &impl RegisterValues) -> crate::Result<u64> {
        self.unwind.compute_cfa(pc, regs)
    }
}
