use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use goblin::elf::header::ET_DYN;
use goblin::elf::section_header::{SHF_COMPRESSED, SHT_NOBITS};

/// ELF executable read from disk.
pub struct ElfImage {
    /// Path of the executable.
    path: PathBuf,

    /// Raw content of the file.
    bytes: Vec<u8>,

    /// Named sections of the executable.
    sections: Vec<SectionInfo>,

    /// Whether the executable is position-independent (`ET_DYN`).
    is_pie: bool,

    /// Link-time entry point (`e_entry`).
    entry: u64,

    /// Whether the executable is little endian.
    little_endian: bool,
}

struct SectionInfo {
    name: String,
    addr: u64,
    offset: usize,
    size: usize,
    nobits: bool,
}

impl ElfImage {
    /// Reads and parses the ELF file at the given path.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| crate::Error::File(path.to_path_buf(), e))?;

        let (sections, is_pie, entry, little_endian) = {
            let elf = Elf::parse(&bytes)?;

            let sections = elf
                .section_headers
                .iter()
                .filter_map(|shdr| {
                    let name = elf.shdr_strtab.get_at(shdr.sh_name)?;

                    if shdr.sh_flags & u64::from(SHF_COMPRESSED) != 0 {
                        tracing::warn!(section = name, "compressed section is ignored");
                        return None;
                    }

                    Some(SectionInfo {
                        name: name.to_owned(),
                        addr: shdr.sh_addr,
                        offset: shdr.sh_offset as usize,
                        size: shdr.sh_size as usize,
                        nobits: shdr.sh_type == SHT_NOBITS,
                    })
                })
                .collect::<Vec<_>>();

            (
                sections,
                elf.header.e_type == ET_DYN,
                elf.entry,
                elf.little_endian,
            )
        };

        tracing::debug!(
            path = %path.display(),
            sections = sections.len(),
            is_pie,
            entry = format_args!("{entry:#x}"),
            "parsed elf"
        );

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            sections,
            is_pie,
            entry,
            little_endian,
        })
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
    pub const fn entry(&self) -> u64 {
        self.entry
    }

    /// Endianness of the executable, as understood by [gimli].
    pub const fn endian(&self) -> gimli::RunTimeEndian {
        if self.little_endian {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        }
    }

    /// Content of the section with the given name.
    ///
    /// Sections occupying no file space yield an empty slice.
    pub fn section_data(&self, name: &str) -> Option<&[u8]> {
        let section = self.sections.iter().find(|s| s.name == name)?;

        if section.nobits {
            return Some(&[]);
        }

        self.bytes
            .get(section.offset..section.offset.checked_add(section.size)?)
    }

    /// Link-time address of the section with the given name.
    pub fn section_addr(&self, name: &str) -> Option<u64> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.addr)
    }
}
