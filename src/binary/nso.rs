//! NSO loader (Nintendo Switch).
//!
//! The three segments are stored LZ4-compressed (block format, no frame)
//! and carry their own target memory offsets, so the loader rebuilds the
//! virtual layout into one owned buffer and maps segments 1:1 onto it.

use super::{BinaryFormat, Image, Segment};
use crate::error::{Error, Result};
use crate::stream::{Endian, Stream};
use log::debug;
use std::borrow::Cow;
use std::collections::HashMap;

const FLAG_TEXT_COMPRESSED: u32 = 1 << 0;
const FLAG_RODATA_COMPRESSED: u32 = 1 << 1;
const FLAG_DATA_COMPRESSED: u32 = 1 << 2;

struct NsoSegment {
    file_offset: u32,
    memory_offset: u32,
    size: u32,
}

fn read_segment_header(s: &mut Stream<'_>) -> Result<NsoSegment> {
    Ok(NsoSegment {
        file_offset: s.read_u32()?,
        memory_offset: s.read_u32()?,
        size: s.read_u32()?,
    })
}

fn load_segment(
    data: &[u8],
    header: &NsoSegment,
    compressed: bool,
    compressed_size: u32,
    name: &str,
) -> Result<Vec<u8>> {
    let stored = if compressed {
        compressed_size
    } else {
        header.size
    } as usize;
    let start = header.file_offset as usize;
    let end = start + stored;
    if end > data.len() {
        return Err(Error::MalformedBinary(format!(
            "{name} segment [{start:#x}..{end:#x}] extends past the file end"
        )));
    }
    let raw = &data[start..end];
    let bytes = if compressed {
        lz4_flex::block::decompress(raw, header.size as usize)
            .map_err(|e| Error::MalformedBinary(format!("{name} segment LZ4: {e}")))?
    } else {
        raw.to_vec()
    };
    if bytes.len() != header.size as usize {
        return Err(Error::MalformedBinary(format!(
            "{name} segment decompressed to {} bytes, header says {}",
            bytes.len(),
            header.size
        )));
    }
    Ok(bytes)
}

pub fn parse(data: &[u8]) -> Result<Image<'static>> {
    if data.len() < 0x100 {
        return Err(Error::MalformedBinary("truncated NSO header".into()));
    }
    let mut s = Stream::new(data);
    let _magic = s.read_u32()?;
    let _version = s.read_u32()?;
    let _reserved = s.read_u32()?;
    let flags = s.read_u32()?;
    let text = read_segment_header(&mut s)?;
    let _module_name_offset = s.read_u32()?;
    let rodata = read_segment_header(&mut s)?;
    let _module_name_size = s.read_u32()?;
    let data_seg = read_segment_header(&mut s)?;
    let _bss_size = s.read_u32()?;
    let _module_id = s.take(0x20)?;
    let text_compressed_size = s.read_u32()?;
    let rodata_compressed_size = s.read_u32()?;
    let data_compressed_size = s.read_u32()?;

    let parts = [
        (
            &text,
            flags & FLAG_TEXT_COMPRESSED != 0,
            text_compressed_size,
            ".text",
            (true, false, true),
        ),
        (
            &rodata,
            flags & FLAG_RODATA_COMPRESSED != 0,
            rodata_compressed_size,
            ".rodata",
            (true, false, false),
        ),
        (
            &data_seg,
            flags & FLAG_DATA_COMPRESSED != 0,
            data_compressed_size,
            ".data",
            (true, true, false),
        ),
    ];

    let layout_end = parts
        .iter()
        .map(|(h, ..)| h.memory_offset as usize + h.size as usize)
        .max()
        .unwrap_or(0);
    let mut memory = vec![0u8; layout_end];
    let mut segments = Vec::new();
    for (header, compressed, compressed_size, name, (read, write, execute)) in parts {
        let bytes = load_segment(data, header, compressed, compressed_size, name)?;
        let start = header.memory_offset as usize;
        memory[start..start + bytes.len()].copy_from_slice(&bytes);
        debug!(
            "NSO {name}: {} bytes at {:#x} (compressed: {compressed})",
            header.size, header.memory_offset
        );
        segments.push(Segment {
            file_offset: header.memory_offset as u64,
            vaddr: header.memory_offset as u64,
            size: header.size as u64,
            read,
            write,
            execute,
        });
    }

    Ok(Image {
        data: Cow::Owned(memory),
        format: BinaryFormat::Nso,
        pointer_size: 8,
        endian: Endian::Little,
        image_base: 0,
        segments,
        symbols: HashMap::new(),
    })
}
