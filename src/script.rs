//! JSON artifacts: `script.json` (method addresses for a disassembler) and
//! `stringliteral.json` (the interned literal table).

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::global_metadata::{decode_usage, DecodedUsage, GlobalMetadata};
use serde::Serialize;

#[derive(Serialize)]
struct ScriptMethod {
    address: u64,
    name: String,
    signature: String,
}

#[derive(Serialize)]
struct ScriptStringLiteral {
    address: u64,
    value: String,
}

#[derive(Serialize)]
struct ScriptFile {
    methods: Vec<ScriptMethod>,
    string_literals: Vec<ScriptStringLiteral>,
}

#[derive(Serialize)]
struct LiteralRecord {
    index: usize,
    offset: u32,
    length: u32,
    value: String,
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| Error::MalformedMetadata(format!("serializing {what}: {e}")))
}

/// Every method with a resolvable address, ascending, plus the
/// runtime-populated string literal slots.
pub fn generate_script(executor: &mut Executor<'_, '_>) -> Result<Vec<u8>> {
    let md = executor.metadata;
    let mr = &executor.runtime.metadata_registration;

    let mut methods = Vec::new();
    for image in md.images.iter() {
        if image.type_start < 0 {
            continue;
        }
        let start = image.type_start as usize;
        let end = (start + image.type_count as usize).min(md.type_definitions.len());
        for def_idx in start..end {
            let def = &md.type_definitions[def_idx as usize];
            for method in md.methods_of(def)? {
                let Some(va) = executor.method_va(image, method) else {
                    continue;
                };
                let name = format!(
                    "{}$${}",
                    executor.type_def_full_name(def_idx as i32, false)?,
                    md.string(method.name_index)?
                );
                methods.push(ScriptMethod {
                    address: va,
                    name,
                    signature: executor.method_signature(method)?,
                });
            }
        }
    }
    for (spec_idx, spec) in mr.method_specs.iter().enumerate() {
        let Some(va) = executor.generic_method_va(spec_idx) else {
            continue;
        };
        let name = executor.generic_method_name(spec)?;
        methods.push(ScriptMethod {
            address: va,
            signature: name.clone(),
            name,
        });
    }
    methods.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));

    let mut string_literals = Vec::new();
    if mr.metadata_usages_va != 0 {
        let ptr = executor.image.pointer_size as u64;
        for pair in md.metadata_usage_pairs.iter() {
            if let DecodedUsage::StringLiteral(index) =
                decode_usage(pair.encoded_source_index, md.version)
            {
                let Ok(value) = md.string_literal(index as usize) else {
                    continue;
                };
                string_literals.push(ScriptStringLiteral {
                    address: mr.metadata_usages_va + pair.destination_index as u64 * ptr,
                    value,
                });
            }
        }
        string_literals.sort_by(|a, b| a.address.cmp(&b.address));
    }

    to_json(
        &ScriptFile {
            methods,
            string_literals,
        },
        "script.json",
    )
}

/// Every interned literal, ascending by index.
pub fn generate_string_literals(metadata: &GlobalMetadata<'_>) -> Result<Vec<u8>> {
    let mut records = Vec::with_capacity(metadata.string_literals.len());
    for (index, literal) in metadata.string_literals.iter().enumerate() {
        records.push(LiteralRecord {
            index,
            offset: literal.data_index,
            length: literal.length,
            value: metadata.string_literal(index)?,
        });
    }
    to_json(&records, "stringliteral.json")
}
