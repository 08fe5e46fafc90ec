use std::ops::Range;

/// Row of the [LineTable].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTableEntry {
    /// Address of the first instruction of the row.
    pub address: u64,

    /// 1-based source line.
    pub line: u64,

    /// Index of the source file in [SourceFiles](crate::SourceFiles).
    pub file: usize,

    /// Index of the line-program sequence the row belongs to.
    pub sequence: usize,
}

/// Mapping from instruction addresses to source lines, sorted by address.
///
/// Each line-program sequence covers a contiguous address range. Within a
/// sequence, a row spans from its address to the address of the next row.
#[derive(Debug, Default)]
pub struct LineTable {
    entries: Vec<LineTableEntry>,
    sequences: Vec<Range<u64>>,
}

impl LineTable {
    /// Appends a line-program sequence made of `(address, line, file)` rows
    /// ending at `end`.
    ///
    /// A row at the same address as the previous one replaces it, and
    /// consecutive rows of the same line are merged.
    pub(crate) fn push_sequence(&mut self, rows: &[(u64, u64, usize)], end: u64) {
        let Some(&(start, _, _)) = rows.first() else {
            return;
        };

        if start >= end {
            tracing::debug!(start = format_args!("{start:#x}"), "empty line sequence");
            return;
        }

        let sequence = self.sequences.len();
        let mut entries = Vec::<LineTableEntry>::with_capacity(rows.len());

        for &(address, line, file) in rows {
            match entries.last_mut() {
                Some(prev) if prev.address == address => {
                    prev.line = line;
                    prev.file = file;

                    let n = entries.len();
                    if n >= 2 && entries[n - 2].line == line && entries[n - 2].file == file {
                        entries.pop();
                    }
                }
                Some(prev) if prev.line == line && prev.file == file => (),
                _ => entries.push(LineTableEntry {
                    address,
                    line,
                    file,
                    sequence,
                }),
            }
        }

        self.sequences.push(start..end);
        self.entries.extend(entries);
    }

    /// Restores the address ordering after all sequences were pushed.
    pub(crate) fn finish(&mut self) {
        self.entries.sort_by_key(|e| e.address);
    }

    pub(crate) fn relocate(&mut self, delta: u64) {
        for e in self.entries.iter_mut() {
            e.address = e.address.wrapping_add(delta);
        }

        for s in self.sequences.iter_mut() {
            *s = s.start.wrapping_add(delta)..s.end.wrapping_add(delta);
        }
    }

    /// All rows, sorted by address.
    pub fn entries(&self) -> &[LineTableEntry] {
        &self.entries
    }

    /// Address ranges of the line-program sequences.
    pub fn sequences(&self) -> &[Range<u64>] {
        &self.sequences
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn covering_index(&self, addr: u64) -> Option<usize> {
        let idx = self.entries.partition_point(|e| e.address < addr);

        // exact match wins over range containment
        if self.entries.get(idx).is_some_and(|e| e.address == addr) {
            return Some(idx);
        }

        let prev = idx.checked_sub(1)?;
        let entry = &self.entries[prev];

        self.sequences[entry.sequence]
            .contains(&addr)
            .then_some(prev)
    }

    /// Returns the row covering the given address.
    pub fn find_by_address(&self, addr: u64) -> Option<&LineTableEntry> {
        self.covering_index(addr).map(|i| &self.entries[i])
    }

    /// Returns the lowest-addressed row of the given line, in any file.
    pub fn find_by_number(&self, line: u64) -> Option<&LineTableEntry> {
        self.entries.iter().find(|e| e.line == line)
    }

    /// Returns the lowest-addressed row of the given line in the given file.
    pub fn find_by_location(&self, file: usize, line: u64) -> Option<&LineTableEntry> {
        self.entries
            .iter()
            .find(|e| e.file == file && e.line == line)
    }

    /// Returns the half-open address range of the source line covering
    /// `addr`.
    ///
    /// The range ends at the next row of a different line in the same
    /// sequence. Without one, it ends at `function_end` (or at the end of
    /// the sequence). It never extends past `function_end`.
    pub fn line_range(&self, addr: u64, function_end: Option<u64>) -> Option<Range<u64>> {
        let idx = self.covering_index(addr)?;
        let current = self.entries[idx];
        let sequence = &self.sequences[current.sequence];

        let next = self.entries[idx + 1..]
            .iter()
            .take_while(|e| e.address < sequence.end)
            .filter(|e| e.sequence == current.sequence)
            .find(|e| e.line != current.line || e.file != current.file)
            .map(|e| e.address);

        let end = match (next, function_end) {
            (Some(next), Some(fend)) => next.min(fend),
            (Some(next), None) => next,
            (None, Some(fend)) => fend,
            (None, None) => sequence.end,
        };

        (end > current.address).then_some(current.address..end)
    }
}

#[cfg(test)]
mod tests {
    use super::{LineTable, LineTableEntry};

    fn sample() -> LineTable {
        let mut table = LineTable::default();

        // f: lines 4..6, main: lines 9..13
        table.push_sequence(
            &[
                (0x1000, 4, 0),
                (0x1008, 5, 0),
                (0x1008, 5, 0),
                (0x1012, 6, 0),
                (0x1016, 9, 0),
                (0x101e, 10, 0),
                (0x1023, 10, 0),
                (0x1028, 11, 0),
                (0x1037, 12, 0),
                (0x103c, 13, 0),
            ],
            0x103e,
        );
        table.push_sequence(&[(0x2000, 3, 1), (0x2004, 4, 1)], 0x2010);
        table.finish();
        table
    }

    fn entry(address: u64, line: u64, file: usize, sequence: usize) -> LineTableEntry {
        LineTableEntry {
            address,
            line,
            file,
            sequence,
        }
    }

    #[test]
    fn rows_are_merged() {
        let table = sample();

        assert_eq!(table.entries().len(), 10);
        assert!(table.entries().windows(2).all(|w| w[0].address <= w[1].address));
        assert_eq!(table.entries()[4], entry(0x101e, 10, 0, 0));
        assert_eq!(table.entries()[5], entry(0x1028, 11, 0, 0));
        assert_eq!(table.entries()[8], entry(0x2000, 3, 1, 1));
    }

    #[test]
    fn same_address_replaces_row() {
        let mut table = LineTable::default();
        table.push_sequence(&[(0x10, 1, 0), (0x14, 2, 0), (0x14, 1, 0), (0x18, 3, 0)], 0x20);
        table.finish();

        assert_eq!(
            table.entries(),
            &[entry(0x10, 1, 0, 0), entry(0x18, 3, 0, 0)]
        );
    }

    #[test]
    fn find_by_address() {
        let table = sample();

        // boundary: the start of a line maps to that line
        assert_eq!(table.find_by_address(0x1028).map(|e| e.line), Some(11));

        // every address inside a line maps to the same row
        let first = table.find_by_address(0x1029);
        for addr in 0x1029..0x1037 {
            assert_eq!(table.find_by_address(addr), first);
        }
        assert_eq!(first.map(|e| e.address), Some(0x1028));

        // outside of every sequence
        assert_eq!(table.find_by_address(0xfff), None);
        assert_eq!(table.find_by_address(0x103e), None);
        assert_eq!(table.find_by_address(0x1500), None);
        assert_eq!(table.find_by_address(0x200f).map(|e| e.line), Some(4));
    }

    #[test]
    fn find_by_number() {
        let table = sample();

        assert_eq!(table.find_by_number(10).map(|e| e.address), Some(0x101e));
        assert_eq!(table.find_by_number(3).map(|e| e.address), Some(0x2000));
        assert_eq!(table.find_by_number(42), None);
        assert_eq!(table.find_by_location(1, 4).map(|e| e.address), Some(0x2004));
        assert_eq!(table.find_by_location(0, 3), None);
    }

    #[test]
    fn line_range() {
        let table = sample();

        assert_eq!(table.line_range(0x1016, Some(0x103e)), Some(0x1016..0x101e));
        assert_eq!(table.line_range(0x1020, Some(0x103e)), Some(0x101e..0x1028));

        // last line of a function stops at the function end
        assert_eq!(table.line_range(0x1012, Some(0x1016)), Some(0x1012..0x1016));
        assert_eq!(table.line_range(0x103c, Some(0x103e)), Some(0x103c..0x103e));

        // without function bounds, the sequence end is used
        assert_eq!(table.line_range(0x2004, None), Some(0x2004..0x2010));

        assert_eq!(table.line_range(0x3000, None), None);
    }

    #[test]
    fn relocation() {
        let mut table = sample();
        table.relocate(0x5555_5555_0000);

        assert_eq!(
            table.find_by_address(0x5555_5555_1029).map(|e| e.line),
            Some(11)
        );
        assert_eq!(table.sequences()[1], 0x5555_5555_2000..0x5555_5555_2010);
    }
}
