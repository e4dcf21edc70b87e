//! ELF loader, both 32- and 64-bit.
//!
//! Program headers drive the segment map; section headers are only
//! consulted for the opportunistic symbol pass, since `libil2cpp.so`
//! usually keeps at least its dynamic symbols.

use super::{BinaryFormat, Image, Segment};
use crate::error::{Error, Result};
use crate::stream::{Endian, Stream};
use log::debug;
use std::borrow::Cow;
use std::collections::HashMap;

const PT_LOAD: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_DYNSYM: u32 = 11;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

struct SectionHeader {
    sh_type: u32,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
    sh_entsize: u64,
}

pub fn parse(data: &[u8]) -> Result<Image<'_>> {
    if data.len() < 0x34 {
        return Err(Error::MalformedBinary("truncated ELF header".into()));
    }
    let pointer_size: u8 = match data[4] {
        1 => 4,
        2 => 8,
        c => return Err(Error::MalformedBinary(format!("unknown ELF class {c}"))),
    };
    let endian = match data[5] {
        1 => Endian::Little,
        2 => return Err(Error::MalformedBinary("big-endian ELF is not supported".into())),
        e => return Err(Error::MalformedBinary(format!("unknown ELF data encoding {e}"))),
    };

    let mut s = Stream::with_endian(data, endian);
    s.seek(0x10)?;
    let _e_type = s.read_u16()?;
    let _e_machine = s.read_u16()?;
    let _e_version = s.read_u32()?;
    let _e_entry = s.read_ptr(pointer_size)?;
    let e_phoff = s.read_ptr(pointer_size)?;
    let e_shoff = s.read_ptr(pointer_size)?;
    let _e_flags = s.read_u32()?;
    let _e_ehsize = s.read_u16()?;
    let e_phentsize = s.read_u16()? as u64;
    let e_phnum = s.read_u16()? as u64;
    let e_shentsize = s.read_u16()? as u64;
    let e_shnum = s.read_u16()? as u64;
    let _e_shstrndx = s.read_u16()?;

    let mut segments = Vec::new();
    for i in 0..e_phnum {
        s.seek((e_phoff + i * e_phentsize) as usize)?;
        let p_type = s.read_u32()?;
        let (p_offset, p_vaddr, p_filesz, p_flags);
        if pointer_size == 8 {
            p_flags = s.read_u32()?;
            p_offset = s.read_u64()?;
            p_vaddr = s.read_u64()?;
            let _p_paddr = s.read_u64()?;
            p_filesz = s.read_u64()?;
        } else {
            p_offset = s.read_u32()? as u64;
            p_vaddr = s.read_u32()? as u64;
            let _p_paddr = s.read_u32()?;
            p_filesz = s.read_u32()? as u64;
            let _p_memsz = s.read_u32()?;
            p_flags = s.read_u32()?;
        }
        if p_type != PT_LOAD || p_filesz == 0 {
            continue;
        }
        if p_offset + p_filesz > data.len() as u64 {
            return Err(Error::MalformedBinary(format!(
                "PT_LOAD at {p_vaddr:#x} extends past the file end"
            )));
        }
        segments.push(Segment {
            file_offset: p_offset,
            vaddr: p_vaddr,
            size: p_filesz,
            read: p_flags & PF_R != 0,
            write: p_flags & PF_W != 0,
            execute: p_flags & PF_X != 0,
        });
    }
    if segments.is_empty() {
        return Err(Error::MalformedBinary("ELF has no PT_LOAD segments".into()));
    }
    let image_base = segments.iter().map(|s| s.vaddr).min().unwrap_or(0);

    let mut symbols = HashMap::new();
    if e_shoff != 0 {
        if let Err(err) = read_symbols(
            data,
            endian,
            pointer_size,
            e_shoff,
            e_shentsize,
            e_shnum,
            &mut symbols,
        ) {
            debug!("skipping ELF symbols: {err}");
        }
    }

    Ok(Image {
        data: Cow::Borrowed(data),
        format: BinaryFormat::Elf,
        pointer_size,
        endian,
        image_base,
        segments,
        symbols,
    })
}

fn read_section_header(
    s: &mut Stream<'_>,
    pointer_size: u8,
    offset: usize,
) -> Result<SectionHeader> {
    s.seek(offset)?;
    let _sh_name = s.read_u32()?;
    let sh_type = s.read_u32()?;
    let _sh_flags = s.read_ptr(pointer_size)?;
    let _sh_addr = s.read_ptr(pointer_size)?;
    let sh_offset = s.read_ptr(pointer_size)?;
    let sh_size = s.read_ptr(pointer_size)?;
    let sh_link = s.read_u32()?;
    let _sh_info = s.read_u32()?;
    let _sh_addralign = s.read_ptr(pointer_size)?;
    let sh_entsize = s.read_ptr(pointer_size)?;
    Ok(SectionHeader {
        sh_type,
        sh_offset,
        sh_size,
        sh_link,
        sh_entsize,
    })
}

fn read_symbols(
    data: &[u8],
    endian: Endian,
    pointer_size: u8,
    e_shoff: u64,
    e_shentsize: u64,
    e_shnum: u64,
    symbols: &mut HashMap<String, u64>,
) -> Result<()> {
    let mut s = Stream::with_endian(data, endian);
    for i in 0..e_shnum {
        let shdr = read_section_header(&mut s, pointer_size, (e_shoff + i * e_shentsize) as usize)?;
        if shdr.sh_type != SHT_DYNSYM && shdr.sh_type != SHT_SYMTAB {
            continue;
        }
        let strtab = read_section_header(
            &mut s,
            pointer_size,
            (e_shoff + shdr.sh_link as u64 * e_shentsize) as usize,
        )?;
        let strtab_end = (strtab.sh_offset + strtab.sh_size) as usize;
        if strtab_end > data.len() {
            return Err(Error::MalformedBinary("string table past file end".into()));
        }
        let strings = Stream::with_endian(
            &data[strtab.sh_offset as usize..strtab_end],
            endian,
        );

        let entsize = if shdr.sh_entsize != 0 {
            shdr.sh_entsize
        } else if pointer_size == 8 {
            24
        } else {
            16
        };
        let count = shdr.sh_size / entsize;
        for j in 0..count {
            s.seek((shdr.sh_offset + j * entsize) as usize)?;
            let st_name = s.read_u32()?;
            let st_value = if pointer_size == 8 {
                let _info_other_shndx = s.read_u32()?;
                s.read_u64()?
            } else {
                s.read_u32()? as u64
            };
            if st_value == 0 {
                continue;
            }
            if let Ok(name) = strings.cstr_at(st_name as usize) {
                if !name.is_empty() {
                    symbols.insert(name.to_owned(), st_value);
                }
            }
        }
    }
    Ok(())
}
