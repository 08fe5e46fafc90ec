use std::ops::Range;

/// Compilation unit of the debugged program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    /// Name of the unit (usually the path of its main source file).
    pub name: String,

    /// Lowest address of the unit's code.
    pub low_pc: u64,

    /// One past the highest address of the unit's code.
    pub high_pc: u64,

    /// Whether the bounds come from `DW_AT_ranges` instead of a contiguous
    /// `DW_AT_low_pc`/`DW_AT_high_pc` pair.
    pub has_ranges: bool,

    /// Concrete address ranges, when `has_ranges` is set.
    pub ranges: Vec<Range<u64>>,
}

impl CompileUnit {
    /// Whether the given address belongs to the unit's code.
    pub fn contains(&self, addr: u64) -> bool {
        if self.has_ranges {
            self.ranges.iter().any(|r| r.contains(&addr))
        } else {
            (self.low_pc..self.high_pc).contains(&addr)
        }
    }

    pub(crate) fn relocate(&mut self, delta: u64) {
        self.low_pc = self.low_pc.wrapping_add(delta);
        self.high_pc = self.high_pc.wrapping_add(delta);

        for r in self.ranges.iter_mut() {
            *r = r.start.wrapping_add(delta)..r.end.wrapping_add(delta);
        }
    }
}

/// Function (`DW_TAG_subprogram`) with code in the debugged program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Name of the function.
    pub name: String,

    /// Address of the first instruction of the function.
    pub low_pc: u64,

    /// One past the address of the last instruction of the function.
    pub high_pc: u64,

    /// Whether the frame base is the canonical frame address.
    pub frame_base_is_cfa: bool,

    /// Parameters and local variables, in declaration order.
    pub variables: Vec<Variable>,

    /// Index of the owning compile unit.
    pub unit: usize,
}

impl Function {
    /// Whether the given address belongs to the function's code.
    pub fn contains(&self, addr: u64) -> bool {
        (self.low_pc..self.high_pc).contains(&addr)
    }

    pub(crate) fn relocate(&mut self, delta: u64) {
        self.low_pc = self.low_pc.wrapping_add(delta);
        self.high_pc = self.high_pc.wrapping_add(delta);
    }
}

/// Parameter or local variable of a [Function].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Name of the variable.
    pub name: String,

    /// Offset of the variable's type entry in `.debug_info`.
    pub type_offset: Option<usize>,

    /// Where the variable lives at runtime.
    pub location: VariableLocation,

    /// Whether this is a parameter or a local variable.
    pub kind: VariableKind,
}

/// Runtime location of a [Variable].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation {
    /// Signed byte offset from the function's frame base (`DW_OP_fbreg`).
    FrameOffset(i64),

    /// Any location form that is not a plain frame-base offset.
    Unresolved,
}

/// Kind of [Variable].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// `DW_TAG_formal_parameter`.
    Parameter,

    /// `DW_TAG_variable`.
    Local,
}
