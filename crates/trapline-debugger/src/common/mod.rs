//! Platform-independent debugger logic.

pub mod breakpoint;
pub mod disasm;
pub mod session;

const WORD_SIZE: usize = size_of::<u64>();

/// Word-granular access to the memory of the debuggee.
pub trait DebuggeeMemory {
    /// Reads the machine word at the given address.
    fn peek(&self, addr: u64) -> crate::sys::Result<u64>;

    /// Writes the machine word at the given address.
    fn poke(&mut self, addr: u64, word: u64) -> crate::sys::Result<()>;

    /// Reads `len` bytes starting at the given address.
    fn read_bytes(&self, addr: u64, len: usize) -> crate::sys::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len.next_multiple_of(WORD_SIZE));

        let mut word_addr = addr;
        while bytes.len() < len {
            bytes.extend_from_slice(&self.peek(word_addr)?.to_le_bytes());
            word_addr = word_addr.wrapping_add(WORD_SIZE as u64);
        }

        bytes.truncate(len);
        Ok(bytes)
    }

    /// Reads up to `len` bytes starting at the given address, stopping at
    /// the first unreadable word.
    fn read_available(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len.next_multiple_of(WORD_SIZE));

        let mut word_addr = addr;
        while bytes.len() < len {
            let Ok(word) = self.peek(word_addr) else {
                break;
            };

            bytes.extend_from_slice(&word.to_le_bytes());
            word_addr = word_addr.wrapping_add(WORD_SIZE as u64);
        }

        bytes.truncate(len);
        bytes
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use super::DebuggeeMemory;

    /// In-memory debuggee, for testing memory patching logic.
    pub struct FakeMemory {
        pub bytes: BTreeMap<u64, u8>,
    }

    impl FakeMemory {
        pub fn new(base: u64, content: &[u8]) -> Self {
            let bytes = content
                .iter()
                .enumerate()
                .map(|(i, b)| (base + i as u64, *b))
                .collect();

            Self { bytes }
        }

        pub fn slice(&self, addr: u64, len: usize) -> Vec<u8> {
            (addr..addr + len as u64)
                .map(|a| self.bytes.get(&a).copied().unwrap_or_default())
                .collect()
        }
    }

    impl DebuggeeMemory for FakeMemory {
        fn peek(&self, addr: u64) -> crate::sys::Result<u64> {
            let mut bytes = [0u8; 8];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = *self
                    .bytes
                    .get(&(addr + i as u64))
                    .ok_or(nix::Error::EIO)?;
            }

            Ok(u64::from_le_bytes(bytes))
        }

        fn poke(&mut self, addr: u64, word: u64) -> crate::sys::Result<()> {
            self.peek(addr)?;

            for (i, b) in word.to_le_bytes().into_iter().enumerate() {
                if let Some(slot) = self.bytes.get_mut(&(addr + i as u64)) {
                    *slot = b;
                }
            }

            Ok(())
        }
    }

    #[test]
    fn read_bytes() {
        let content = (0u8..20).collect::<Vec<_>>();
        let mem = FakeMemory::new(0x1000, &content);

        assert_eq!(
            mem.read_bytes(0x1003, 10).expect("read"),
            (3u8..13).collect::<Vec<_>>()
        );
        assert!(mem.read_bytes(0x2000, 1).is_err());

        // stops at the first unreadable word
        assert_eq!(mem.read_available(0x1008, 32), (8u8..16).collect::<Vec<_>>());
        assert!(mem.read_available(0x2000, 4).is_empty());
    }
}
