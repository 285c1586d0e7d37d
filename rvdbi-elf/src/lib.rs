//! Minimal ELF64/RISC-V loader.
//!
//! Supplies exactly what the engine's allocator and dispatcher need per
//! spec §6 ("ELF reader (consumed)"): `.text` bytes and base address, the
//! concatenated initialized data sections at their linked addresses, the
//! entry point, and name/address symbol lookup. Everything here is a
//! mechanical read through the `object` crate; no guest semantics live in
//! this crate.

use object::{Architecture, BinaryFormat, Object, ObjectSection, ObjectSymbol, SectionKind};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ElfError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse ELF: {0}")]
    Parse(#[from] object::read::Error),
    #[error("not a RISC-V 64-bit ELF executable (format={format:?}, arch={arch:?})")]
    WrongKind {
        format: BinaryFormat,
        arch: Architecture,
    },
    #[error("binary has no .text section")]
    MissingText,
}

/// One loaded, page-resident data section, copied out of the ELF image at
/// the address it is linked to run at.
pub struct DataSegment {
    pub address: u64,
    pub bytes: Vec<u8>,
}

/// The fully-loaded guest image: code, data, entry point, and symbols.
/// Fully owned (no lifetime tied to the original file bytes) so the
/// engine can hold it for the process lifetime without borrow-checker
/// contortions.
pub struct GuestImage {
    pub text_base: u64,
    pub text: Vec<u8>,
    pub data_segments: Vec<DataSegment>,
    pub entry: u64,
    pub symbols_by_name: HashMap<String, u64>,
    pub symbols_by_addr: HashMap<u64, String>,
}

impl GuestImage {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ElfError> {
        let path_ref = path.as_ref();
        let data = fs::read(path_ref).map_err(|source| ElfError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        let file = object::File::parse(data)?;

        if file.format() != BinaryFormat::Elf || file.architecture() != Architecture::Riscv64 {
            return Err(ElfError::WrongKind {
                format: file.format(),
                arch: file.architecture(),
            });
        }

        let text_section = file
            .sections()
            .find(|s| s.name().ok() == Some(".text"))
            .ok_or(ElfError::MissingText)?;
        let text_base = text_section.address();
        let text = text_section.data()?.to_vec();

        let mut data_segments = Vec::new();
        for section in file.sections() {
            if section.address() == text_base {
                continue;
            }
            let allocated = matches!(
                section.kind(),
                SectionKind::Data | SectionKind::ReadOnlyData | SectionKind::UninitializedData
            );
            if !allocated || section.size() == 0 {
                continue;
            }
            let bytes = if section.kind() == SectionKind::UninitializedData {
                vec![0u8; section.size() as usize]
            } else {
                section.data()?.to_vec()
            };
            data_segments.push(DataSegment {
                address: section.address(),
                bytes,
            });
        }

        let mut symbols_by_name = HashMap::new();
        let mut symbols_by_addr = HashMap::new();
        for symbol in file.symbols() {
            if let Ok(name) = symbol.name() {
                if name.is_empty() {
                    continue;
                }
                symbols_by_name.insert(name.to_string(), symbol.address());
                symbols_by_addr.insert(symbol.address(), name.to_string());
            }
        }

        log::debug!(
            "loaded rv64gc image: .text @ {text_base:#x} ({text_len} bytes), {data_count} data segment(s), entry {entry:#x}",
            text_len = text.len(),
            data_count = data_segments.len(),
            entry = file.entry(),
        );

        Ok(GuestImage {
            text_base,
            text,
            data_segments,
            entry: file.entry(),
            symbols_by_name,
            symbols_by_addr,
        })
    }

    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.symbols_by_name.get(name).copied()
    }

    pub fn symbol_name(&self, address: u64) -> Option<&str> {
        self.symbols_by_addr.get(&address).map(String::as_str)
    }

    /// Fetch `len` bytes of `.text` at guest address `addr`, or `None` if
    /// the range falls outside the loaded text section.
    pub fn text_at(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let offset = addr.checked_sub(self.text_base)? as usize;
        self.text.get(offset..offset.checked_add(len)?)
    }

    pub fn contains_text(&self, addr: u64) -> bool {
        addr >= self.text_base && addr < self.text_base + self.text.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_bytes() {
        let err = GuestImage::parse(b"not an elf file at all, just some junk bytes here");
        assert!(err.is_err());
    }
}
