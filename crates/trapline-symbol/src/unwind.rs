use std::ops::Range;

use gimli::{
    BaseAddresses, CfaRule, CieOrFde, DebugFrame, EhFrame, EndianSlice, RunTimeEndian,
    UnwindContext, UnwindSection,
};

use crate::elf::ElfImage;

/// Provider of live register values, indexed by DWARF register number.
pub trait RegisterValues {
    /// Returns the value of the register with the given DWARF number.
    fn dwarf_register(&self, number: u16) -> Option<u64>;
}

/// How the canonical frame address is computed over some address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaComputation {
    /// `CFA = register + offset`.
    RegisterOffset {
        /// DWARF register number.
        register: u16,
        /// Signed offset added to the register value.
        offset: i64,
    },

    /// The CFA is given by a DWARF expression.
    Expression,
}

/// Row of a [FrameUnwindInfo].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindRow {
    /// First address covered by the row.
    pub start: u64,

    /// One past the last address covered by the row.
    pub end: u64,

    /// CFA rule of the row.
    pub cfa: CfaComputation,
}

/// Call-frame rules of one frame description entry (usually one function).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUnwindInfo {
    /// Address range described by the entry.
    pub range: Range<u64>,

    /// CFA rules, sorted by address.
    pub rows: Vec<UnwindRow>,
}

/// Call-frame rules of the whole executable.
#[derive(Debug, Default)]
pub struct FrameUnwindTable {
    entries: Vec<FrameUnwindInfo>,
}

impl FrameUnwindTable {
    /// Parses `.eh_frame` and `.debug_frame` from the given executable.
    pub(crate) fn parse(image: &ElfImage) -> crate::Result<Self> {
        let endian = image.endian();
        let text_addr = image.section_addr(".text").unwrap_or_default();

        let mut entries = Vec::new();

        if let Some(data) = image.section_data(".eh_frame") {
            let section = EhFrame::new(data, endian);
            let bases = BaseAddresses::default()
                .set_eh_frame(image.section_addr(".eh_frame").unwrap_or_default())
                .set_text(text_addr);

            collect_entries(&section, &bases, &mut entries)?;
        }

        if let Some(data) = image.section_data(".debug_frame") {
            let section = DebugFrame::new(data, endian);
            let bases = BaseAddresses::default().set_text(text_addr);

            collect_entries(&section, &bases, &mut entries)?;
        }

        entries.sort_by_key(|e| e.range.start);

        tracing::debug!(entries = entries.len(), "parsed call frame information");

        Ok(Self { entries })
    }

    pub(crate) fn relocate(&mut self, delta: u64) {
        for entry in self.entries.iter_mut() {
            entry.range = entry.range.start.wrapping_add(delta)..entry.range.end.wrapping_add(delta);

            for row in entry.rows.iter_mut() {
                row.start = row.start.wrapping_add(delta);
                row.end = row.end.wrapping_add(delta);
            }
        }
    }

    /// All frame description entries, sorted by start address.
    pub fn entries(&self) -> &[FrameUnwindInfo] {
        &self.entries
    }

    /// Returns the row covering the given address.
    pub fn row_for_address(&self, pc: u64) -> Option<&UnwindRow> {
        self.entries
            .iter()
            .filter(|e| e.range.contains(&pc))
            .find_map(|e| e.rows.iter().find(|r| (r.start..r.end).contains(&pc)))
    }

    /// Computes the canonical frame address at `pc`.
    pub fn compute_cfa(&self, pc: u64, regs: &impl RegisterValues) -> crate::Result<u64> {
        let row = self
            .row_for_address(pc)
            .ok_or(crate::Error::MissingUnwindInfo(pc))?;

        let CfaComputation::RegisterOffset { register, offset } = row.cfa else {
            return Err(crate::Error::UnsupportedCfaRule(pc));
        };

        let value = regs
            .dwarf_register(register)
            .ok_or(crate::Error::UnknownRegister(register))?;

        Ok(value.wrapping_add_signed(offset))
    }
}

fn collect_entries<'a, Section>(
    section: &Section,
    bases: &BaseAddresses,
    out: &mut Vec<FrameUnwindInfo>,
) -> crate::Result<()>
where
    Section: UnwindSection<EndianSlice<'a, RunTimeEndian>>,
{
    let mut ctx = UnwindContext::<usize>::new();
    let mut entries = section.entries(bases);

    while let Some(entry) = entries.next()? {
        let CieOrFde::Fde(partial) = entry else {
            continue;
        };

        let fde = partial.parse(|section, bases, offset| section.cie_from_offset(bases, offset))?;

        let range = fde.initial_address()..fde.end_address();

        // discarded by the linker
        if range.start == 0 || range.is_empty() {
            continue;
        }

        let mut rows = Vec::new();
        let mut table = fde.rows(section, bases, &mut ctx)?;

        while let Some(row) = table.next_row()? {
            let cfa = match row.cfa() {
                CfaRule::RegisterAndOffset { register, offset } => CfaComputation::RegisterOffset {
                    register: register.0,
                    offset: *offset,
                },
                CfaRule::Expression(_) => CfaComputation::Expression,
            };

            rows.push(UnwindRow {
                start: row.start_address(),
                end: row.end_address(),
                cfa,
            });
        }

        out.push(FrameUnwindInfo { range, rows });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{CfaComputation, FrameUnwindInfo, FrameUnwindTable, RegisterValues, UnwindRow};

    struct Regs(HashMap<u16, u64>);

    impl RegisterValues for Regs {
        fn dwarf_register(&self, number: u16) -> Option<u64> {
            self.0.get(&number).copied()
        }
    }

    const RSP: u16 = 7;
    const RBP: u16 = 6;

    /// Typical `push rbp; mov rbp, rsp; ...; pop rbp; ret` frame.
    fn table() -> FrameUnwindTable {
        let rows = vec![
            UnwindRow {
                start: 0x1000,
                end: 0x1001,
                cfa: CfaComputation::RegisterOffset {
                    register: RSP,
                    offset: 8,
                },
            },
            UnwindRow {
                start: 0x1001,
                end: 0x1004,
                cfa: CfaComputation::RegisterOffset {
                    register: RSP,
                    offset: 16,
                },
            },
            UnwindRow {
                start: 0x1004,
                end: 0x1020,
                cfa: CfaComputation::RegisterOffset {
                    register: RBP,
                    offset: 16,
                },
            },
            UnwindRow {
                start: 0x1020,
                end: 0x1021,
                cfa: CfaComputation::RegisterOffset {
                    register: RSP,
                    offset: 8,
                },
            },
        ];

        FrameUnwindTable {
            entries: vec![
                FrameUnwindInfo {
                    range: 0x1000..0x1021,
                    rows,
                },
                FrameUnwindInfo {
                    range: 0x2000..0x2010,
                    rows: vec![UnwindRow {
                        start: 0x2000,
                        end: 0x2010,
                        cfa: CfaComputation::Expression,
                    }],
                },
            ],
        }
    }

    #[test]
    fn cfa_is_stable_across_the_frame() {
        let table = table();

        // frame of a function called with rsp=0x7fff_0108 before the call
        let cfa = 0x7fff_0108;

        let at_entry = Regs(HashMap::from([(RSP, cfa - 8), (RBP, 0xdead)]));
        let after_push = Regs(HashMap::from([(RSP, cfa - 16), (RBP, 0xdead)]));
        let in_body = Regs(HashMap::from([(RSP, cfa - 48), (RBP, cfa - 16)]));
        let before_ret = Regs(HashMap::from([(RSP, cfa - 8), (RBP, 0xdead)]));

        assert_eq!(table.compute_cfa(0x1000, &at_entry).ok(), Some(cfa));
        assert_eq!(table.compute_cfa(0x1002, &after_push).ok(), Some(cfa));
        assert_eq!(table.compute_cfa(0x1010, &in_body).ok(), Some(cfa));
        assert_eq!(table.compute_cfa(0x1020, &before_ret).ok(), Some(cfa));
    }

    #[test]
    fn cfa_failures() {
        let table = table();
        let regs = Regs(HashMap::from([(RSP, 0x100)]));

        assert!(matches!(
            table.compute_cfa(0x3000, &regs),
            Err(crate::Error::MissingUnwindInfo(0x3000))
        ));
        assert!(matches!(
            table.compute_cfa(0x2004, &regs),
            Err(crate::Error::UnsupportedCfaRule(0x2004))
        ));
        assert!(matches!(
            table.compute_cfa(0x1010, &regs),
            Err(crate::Error::UnknownRegister(RBP))
        ));
    }

    #[test]
    fn relocation() {
        let mut table = table();
        table.relocate(0x1000);

        assert_eq!(table.row_for_address(0x1000), None);
        assert_eq!(
            table.row_for_address(0x2000).map(|r| r.start),
            Some(0x2000)
        );
        assert_eq!(table.entries()[0].range, 0x2000..0x2021);
    }
}
