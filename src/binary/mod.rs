//! Executable loaders.
//!
//! Every supported format is lowered into the same [`Image`] shape: a list
//! of segments mapping virtual addresses onto one backing byte buffer, plus
//! the machine word size and endianness. Downstream code never touches the
//! raw container formats again; it reads through VA translation only.

pub mod elf;
pub mod macho;
pub mod nso;
pub mod pe;
pub mod search;
pub mod wasm;

use crate::error::{Error, Result};
use crate::stream::{Endian, Stream};
use log::debug;
use std::borrow::Cow;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Elf,
    Pe,
    MachO,
    Nso,
    Wasm,
}

/// One mapped range of the executable.
#[derive(Debug, Clone)]
pub struct Segment {
    pub file_offset: u64,
    pub vaddr: u64,
    pub size: u64,
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Segment {
    pub fn contains(&self, va: u64) -> bool {
        va >= self.vaddr && va - self.vaddr < self.size
    }
}

/// An executable mapped into virtual address space.
pub struct Image<'data> {
    pub(crate) data: Cow<'data, [u8]>,
    pub format: BinaryFormat,
    /// Machine word size in bytes, 4 or 8.
    pub pointer_size: u8,
    pub endian: Endian,
    pub image_base: u64,
    pub segments: Vec<Segment>,
    /// Opportunistic symbol map; empty for most stripped game binaries.
    pub symbols: HashMap<String, u64>,
}

impl<'data> Image<'data> {
    /// Detects the container format by magic and parses it.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::MalformedBinary(
                "file is too short to carry a magic number".into(),
            ));
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let image = match magic {
            0x464C_457F => elf::parse(data)?,
            0xFEED_FACE | 0xFEED_FACF => macho::parse(data)?,
            // FAT archives store the magic big-endian, so both byte orders
            // show up here depending on who wrote the file.
            0xCAFE_BABE | 0xBEBA_FECA => macho::parse_fat(data)?,
            0x304F_534E => nso::parse(data)?,
            0x6D73_6100 => wasm::parse(data)?,
            m if m & 0xFFFF == 0x5A4D => pe::parse(data)?,
            m => return Err(Error::UnsupportedBinaryFormat(m)),
        };
        debug!(
            "loaded {:?} image: {} segments, {}-bit, base {:#x}",
            image.format,
            image.segments.len(),
            image.pointer_size as u32 * 8,
            image.image_base
        );
        Ok(image)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn segment_of(&self, va: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(va))
    }

    /// Translates a virtual address to an offset into the backing buffer.
    pub fn offset_of(&self, va: u64) -> Result<u64> {
        let seg = self.segment_of(va).ok_or(Error::UnmappedAddress(va))?;
        Ok(seg.file_offset + (va - seg.vaddr))
    }

    pub fn is_readable(&self, va: u64) -> bool {
        self.segment_of(va).map(|s| s.read).unwrap_or(false)
    }

    pub fn is_executable(&self, va: u64) -> bool {
        self.segment_of(va).map(|s| s.execute).unwrap_or(false)
    }

    /// Returns a cursor positioned at `va`, bounded to the end of the
    /// containing segment.
    pub fn stream_at(&self, va: u64) -> Result<Stream<'_>> {
        let seg = self.segment_of(va).ok_or(Error::UnmappedAddress(va))?;
        let start = seg.file_offset as usize;
        let end = start + seg.size as usize;
        if end > self.data.len() {
            return Err(Error::MalformedBinary(format!(
                "segment at {:#x} extends past the file end",
                seg.vaddr
            )));
        }
        let mut s = Stream::with_endian(&self.data[start..end], self.endian);
        s.seek((va - seg.vaddr) as usize)?;
        Ok(s)
    }

    /// Reads one pointer-sized word at `va`.
    pub fn read_word(&self, va: u64) -> Result<u64> {
        self.stream_at(va)?.read_ptr(self.pointer_size)
    }

    /// Reads the NUL-terminated string at `va`.
    pub fn cstr_at(&self, va: u64) -> Result<String> {
        let seg = self.segment_of(va).ok_or(Error::UnmappedAddress(va))?;
        let s = self.stream_at(seg.vaddr)?;
        Ok(s.cstr_at((va - seg.vaddr) as usize)?.to_owned())
    }
}
