//! Mach-O loader: thin 32/64-bit images and FAT archives.

use super::{BinaryFormat, Image, Segment};
use crate::error::{Error, Result};
use crate::stream::{Endian, Stream};
use log::debug;
use std::borrow::Cow;
use std::collections::HashMap;

const MH_MAGIC: u32 = 0xFEED_FACE;
const MH_MAGIC_64: u32 = 0xFEED_FACF;

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_SEGMENT_64: u32 = 0x19;

const VM_PROT_READ: u32 = 1;
const VM_PROT_WRITE: u32 = 2;
const VM_PROT_EXECUTE: u32 = 4;

const CPU_TYPE_X86_64: u32 = 0x0100_0007;
const CPU_TYPE_ARM64: u32 = 0x0100_000C;

pub fn parse(data: &[u8]) -> Result<Image<'_>> {
    if data.len() < 28 {
        return Err(Error::MalformedBinary("truncated Mach-O header".into()));
    }
    let mut s = Stream::new(data);
    let magic = s.read_u32()?;
    let pointer_size: u8 = match magic {
        MH_MAGIC => 4,
        MH_MAGIC_64 => 8,
        m => {
            return Err(Error::MalformedBinary(format!(
                "unsupported Mach-O magic {m:#010x}"
            )))
        }
    };
    let _cputype = s.read_u32()?;
    let _cpusubtype = s.read_u32()?;
    let _filetype = s.read_u32()?;
    let ncmds = s.read_u32()?;
    let _sizeofcmds = s.read_u32()?;
    let _flags = s.read_u32()?;
    if pointer_size == 8 {
        let _reserved = s.read_u32()?;
    }

    let mut segments = Vec::new();
    let mut symbols = HashMap::new();
    let mut cmd_offset = s.tell();
    for _ in 0..ncmds {
        s.seek(cmd_offset)?;
        let cmd = s.read_u32()?;
        let cmdsize = s.read_u32()? as usize;
        if cmdsize < 8 {
            return Err(Error::MalformedBinary("load command size underflow".into()));
        }
        match cmd {
            LC_SEGMENT | LC_SEGMENT_64 => {
                let _segname = s.take(16)?;
                let (vmaddr, fileoff, filesize) = if cmd == LC_SEGMENT_64 {
                    let vmaddr = s.read_u64()?;
                    let _vmsize = s.read_u64()?;
                    (vmaddr, s.read_u64()?, s.read_u64()?)
                } else {
                    let vmaddr = s.read_u32()? as u64;
                    let _vmsize = s.read_u32()?;
                    (vmaddr, s.read_u32()? as u64, s.read_u32()? as u64)
                };
                let _maxprot = s.read_u32()?;
                let initprot = s.read_u32()?;
                if filesize > 0 {
                    if fileoff + filesize > data.len() as u64 {
                        return Err(Error::MalformedBinary(format!(
                            "segment at {vmaddr:#x} extends past the file end"
                        )));
                    }
                    segments.push(Segment {
                        file_offset: fileoff,
                        vaddr: vmaddr,
                        size: filesize,
                        read: initprot & VM_PROT_READ != 0,
                        write: initprot & VM_PROT_WRITE != 0,
                        execute: initprot & VM_PROT_EXECUTE != 0,
                    });
                }
            }
            LC_SYMTAB => {
                let symoff = s.read_u32()? as u64;
                let nsyms = s.read_u32()? as u64;
                let stroff = s.read_u32()? as usize;
                let strsize = s.read_u32()? as usize;
                if let Err(err) = read_symbols(
                    data,
                    pointer_size,
                    symoff,
                    nsyms,
                    stroff,
                    strsize,
                    &mut symbols,
                ) {
                    debug!("skipping Mach-O symbols: {err}");
                }
            }
            _ => {}
        }
        cmd_offset += cmdsize;
    }
    if segments.is_empty() {
        return Err(Error::MalformedBinary("Mach-O has no mapped segments".into()));
    }
    let image_base = segments.iter().map(|s| s.vaddr).min().unwrap_or(0);

    Ok(Image {
        data: Cow::Borrowed(data),
        format: BinaryFormat::MachO,
        pointer_size,
        endian: Endian::Little,
        image_base,
        segments,
        symbols,
    })
}

fn read_symbols(
    data: &[u8],
    pointer_size: u8,
    symoff: u64,
    nsyms: u64,
    stroff: usize,
    strsize: usize,
    symbols: &mut HashMap<String, u64>,
) -> Result<()> {
    if stroff + strsize > data.len() {
        return Err(Error::MalformedBinary("string table past file end".into()));
    }
    let strings = Stream::new(&data[stroff..stroff + strsize]);
    let entsize = if pointer_size == 8 { 16u64 } else { 12 };
    let mut s = Stream::new(data);
    for i in 0..nsyms {
        s.seek((symoff + i * entsize) as usize)?;
        let n_strx = s.read_u32()?;
        let _n_type = s.read_u8()?;
        let _n_sect = s.read_u8()?;
        let _n_desc = s.read_u16()?;
        let n_value = s.read_ptr(pointer_size)?;
        if n_value == 0 {
            continue;
        }
        if let Ok(name) = strings.cstr_at(n_strx as usize) {
            let name = name.strip_prefix('_').unwrap_or(name);
            if !name.is_empty() {
                symbols.insert(name.to_owned(), n_value);
            }
        }
    }
    Ok(())
}

/// FAT archives: pick the best slice and parse it as a thin image.
/// Preference order is arm64, then x86_64, then the first slice.
pub fn parse_fat(data: &[u8]) -> Result<Image<'_>> {
    let mut s = Stream::with_endian(data, Endian::Big);
    let _magic = s.read_u32()?;
    let nfat_arch = s.read_u32()?;
    let mut slices = Vec::new();
    for _ in 0..nfat_arch {
        let cputype = s.read_u32()?;
        let _cpusubtype = s.read_u32()?;
        let offset = s.read_u32()? as usize;
        let size = s.read_u32()? as usize;
        let _align = s.read_u32()?;
        if offset + size > data.len() {
            return Err(Error::MalformedBinary(
                "FAT slice extends past the file end".into(),
            ));
        }
        slices.push((cputype, offset, size));
    }

    let chosen = slices
        .iter()
        .find(|(cpu, _, _)| *cpu == CPU_TYPE_ARM64)
        .or_else(|| slices.iter().find(|(cpu, _, _)| *cpu == CPU_TYPE_X86_64))
        .or_else(|| slices.first())
        .ok_or_else(|| Error::MalformedBinary("FAT archive has no slices".into()))?;
    debug!("FAT archive: selected cputype {:#x}", chosen.0);
    parse(&data[chosen.1..chosen.1 + chosen.2])
}
