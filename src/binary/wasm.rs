//! WebAssembly loader.
//!
//! il2cpp's runtime tables live in the module's active data segments, which
//! define exactly where their bytes land in linear memory. The loader
//! rebuilds that linear layout into an owned buffer, so every address
//! reported downstream is a WASM-linear address. The code section is mapped
//! as a synthetic executable segment above the data end.

use super::{BinaryFormat, Image, Segment};
use crate::error::{Error, Result};
use crate::stream::Endian;
use log::debug;
use std::borrow::Cow;
use std::collections::HashMap;
use wasmparser::{DataKind, Operator, Parser, Payload};

fn wasm_err(e: wasmparser::BinaryReaderError) -> Error {
    Error::MalformedBinary(format!("wasm: {e}"))
}

/// Evaluates an active segment's offset expression; only constant offsets
/// appear in linked modules.
fn const_offset(expr: &wasmparser::ConstExpr<'_>) -> Result<u64> {
    let mut ops = expr.get_operators_reader();
    match ops.read().map_err(wasm_err)? {
        Operator::I32Const { value } => Ok(value as u32 as u64),
        Operator::I64Const { value } => Ok(value as u64),
        op => Err(Error::MalformedBinary(format!(
            "wasm: unsupported data offset expression {op:?}"
        ))),
    }
}

pub fn parse(data: &[u8]) -> Result<Image<'static>> {
    let mut data_segments: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut code_bytes: Option<Vec<u8>> = None;

    for payload in Parser::new(0).parse_all(data) {
        match payload.map_err(wasm_err)? {
            Payload::DataSection(reader) => {
                for entry in reader {
                    let entry = entry.map_err(wasm_err)?;
                    if let DataKind::Active { offset_expr, .. } = entry.kind {
                        let offset = const_offset(&offset_expr)?;
                        data_segments.push((offset, entry.data.to_vec()));
                    }
                }
            }
            Payload::CodeSectionStart { range, .. } => {
                code_bytes = Some(data[range.start..range.end].to_vec());
            }
            _ => {}
        }
    }

    if data_segments.is_empty() && code_bytes.is_none() {
        return Err(Error::MalformedBinary(
            "wasm module has no data or code sections".into(),
        ));
    }

    let data_end = data_segments
        .iter()
        .map(|(offset, bytes)| offset + bytes.len() as u64)
        .max()
        .unwrap_or(0);
    // code lives above the data layout, on a page boundary
    let code_base = (data_end + 0xFFFF) & !0xFFFF;
    let code_len = code_bytes.as_ref().map(|b| b.len() as u64).unwrap_or(0);

    let mut memory = vec![0u8; (code_base + code_len) as usize];
    let mut segments = Vec::new();
    for (offset, bytes) in &data_segments {
        memory[*offset as usize..*offset as usize + bytes.len()].copy_from_slice(bytes);
        segments.push(Segment {
            file_offset: *offset,
            vaddr: *offset,
            size: bytes.len() as u64,
            read: true,
            write: true,
            execute: false,
        });
    }
    if let Some(bytes) = &code_bytes {
        memory[code_base as usize..code_base as usize + bytes.len()].copy_from_slice(bytes);
        segments.push(Segment {
            file_offset: code_base,
            vaddr: code_base,
            size: bytes.len() as u64,
            read: true,
            write: false,
            execute: true,
        });
    }
    debug!(
        "wasm: {} data segments, code section {} bytes at {code_base:#x}",
        data_segments.len(),
        code_len
    );

    Ok(Image {
        data: Cow::Owned(memory),
        format: BinaryFormat::Wasm,
        pointer_size: 4,
        endian: Endian::Little,
        image_base: 0,
        segments,
        symbols: HashMap::new(),
    })
}
