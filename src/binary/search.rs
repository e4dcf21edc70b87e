//! Registration locator.
//!
//! Game binaries almost never keep the `g_CodeRegistration` and
//! `g_MetadataRegistration` symbols, so the locator scans readable segments
//! for counts that are already known from the metadata: the number of
//! methods with native bodies seeds the `CodeRegistration` scan and the
//! number of type definitions seeds the `MetadataRegistration` scan. Every
//! hit is treated as the known count field of the candidate struct, backed
//! up to the struct base and scored by how many of its pointer fields land
//! in readable memory.

use super::Image;
use crate::error::{Error, Result};
use crate::stream::{Endian, Version, V29, V29_1};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;

/// Seed constants derived from the metadata image.
#[derive(Debug, Clone, Copy)]
pub struct SearchCounts {
    pub methods: u64,
    pub type_definitions: u64,
    pub images: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RegistrationAddrs {
    /// Absent when the metadata has no methods with bodies; address
    /// resolution is then a no-op.
    pub code_registration: Option<u64>,
    pub metadata_registration: u64,
}

/// `CodeRegistration` word count per binary version. The method pointer
/// count sits two words before the end, so this is also the backoff from a
/// scan hit to the struct base.
pub fn code_registration_field_count(version: Version) -> u64 {
    if version >= V29_1 {
        16
    } else if version >= V29 {
        14
    } else {
        13
    }
}

/// Word index of `type_definition_sizes_count` inside `MetadataRegistration`.
const METADATA_REGISTRATION_SEED_INDEX: u64 = 12;
/// `MetadataRegistration` is 16 words at every version.
const METADATA_REGISTRATION_FIELDS: u64 = 16;

fn word_at(bytes: &[u8], endian: Endian) -> u64 {
    match (bytes.len(), endian) {
        (4, Endian::Little) => LittleEndian::read_u32(bytes) as u64,
        (4, Endian::Big) => BigEndian::read_u32(bytes) as u64,
        (8, Endian::Little) => LittleEndian::read_u64(bytes),
        (8, Endian::Big) => BigEndian::read_u64(bytes),
        _ => 0,
    }
}

/// All word-aligned occurrences of `value` in readable segments.
fn scan_words(image: &Image<'_>, value: u64) -> Vec<u64> {
    let ptr = image.pointer_size as usize;
    let mut hits = Vec::new();
    for seg in image.segments.iter().filter(|s| s.read) {
        let start = seg.file_offset as usize;
        let end = (start + seg.size as usize).min(image.data().len());
        if start >= end {
            continue;
        }
        for (i, chunk) in image.data()[start..end].chunks_exact(ptr).enumerate() {
            if word_at(chunk, image.endian) == value {
                hits.push(seg.vaddr + (i * ptr) as u64);
            }
        }
    }
    hits
}

fn read_words(image: &Image<'_>, base: u64, count: u64) -> Option<Vec<u64>> {
    let ptr = image.pointer_size as u64;
    let mut words = Vec::with_capacity(count as usize);
    for i in 0..count {
        words.push(image.read_word(base + i * ptr).ok()?);
    }
    Some(words)
}

/// Null pointers are fine while the paired count is zero; anything else
/// must dereference into readable memory.
fn pointer_ok(image: &Image<'_>, ptr: u64, needed: bool) -> bool {
    if ptr == 0 {
        !needed
    } else {
        image.is_readable(ptr)
    }
}

fn validate_code_registration(
    image: &Image<'_>,
    base: u64,
    field_count: u64,
    counts: &SearchCounts,
    version: Version,
) -> Option<u32> {
    let words = read_words(image, base, field_count)?;
    let fc = field_count as usize;
    let method_pointers_count = words[fc - 2];
    let method_pointers = words[fc - 1];
    // the module pair sits at a fixed offset from the base; only the tail
    // moves between versions, which is what makes a wrong field-count
    // backoff detectable
    let code_gen_modules_count = words[9];
    let code_gen_modules = words[10];

    if method_pointers_count != counts.methods || code_gen_modules_count != counts.images {
        return None;
    }
    if !pointer_ok(image, method_pointers, counts.methods > 0)
        || !pointer_ok(image, code_gen_modules, counts.images > 0)
    {
        return None;
    }

    let mut score = 2;
    // leading count/pointer pairs, identical at every version
    for (count_idx, ptr_idx) in [(0, 1), (2, 3), (5, 6), (7, 8)] {
        if pointer_ok(image, words[ptr_idx], words[count_idx] > 0) {
            score += 1;
        }
    }
    // bare pointers: generic adjustor thunks, plus the unresolved call
    // tables newer versions grew
    let mut singles = vec![4];
    if version >= V29 {
        singles.push(11);
    }
    if version >= V29_1 {
        singles.push(12);
        singles.push(13);
    }
    for idx in singles {
        if pointer_ok(image, words[idx], false) {
            score += 1;
        }
    }
    // peek at the first few module pointers
    if code_gen_modules != 0 {
        let ptr = image.pointer_size as u64;
        for i in 0..counts.images.min(4) {
            if let Ok(module) = image.read_word(code_gen_modules + i * ptr) {
                if image.is_readable(module) {
                    score += 1;
                }
            }
        }
    }
    Some(score)
}

fn validate_metadata_registration(
    image: &Image<'_>,
    base: u64,
    counts: &SearchCounts,
) -> Option<u32> {
    let words = read_words(image, base, METADATA_REGISTRATION_FIELDS)?;
    let types_count = words[6];
    let types = words[7];
    let field_offsets_count = words[10];
    let type_definition_sizes_count = words[12];

    if type_definition_sizes_count != counts.type_definitions
        || field_offsets_count != counts.type_definitions
    {
        return None;
    }
    // a registration with an empty type table cannot belong to a real
    // binary; this also kills lookalikes hanging off adjacent structs
    if types_count == 0 || !pointer_ok(image, types, true) {
        return None;
    }

    let mut score = 1;
    for (count_idx, ptr_idx) in [(0, 1), (2, 3), (4, 5), (8, 9), (10, 11), (12, 13), (14, 15)] {
        if pointer_ok(image, words[ptr_idx], words[count_idx] > 0) {
            score += 1;
        }
    }
    Some(score)
}

fn pick_best(candidates: Vec<(u32, u64)>, min_score: Option<u32>) -> Option<u64> {
    let mut best: Option<(u32, u64)> = None;
    for (score, base) in candidates {
        let better = match best {
            None => true,
            Some((s, b)) => score > s || (score == s && base < b),
        };
        if better {
            best = Some((score, base));
        }
    }
    match best {
        Some((score, base)) if min_score.map_or(true, |m| score >= m) => Some(base),
        _ => None,
    }
}

/// Finds both registration structs, preferring exported symbols and
/// falling back to the counted scan.
pub fn find_registration(
    image: &Image<'_>,
    version: Version,
    counts: &SearchCounts,
    min_score: Option<u32>,
) -> Result<RegistrationAddrs> {
    if let (Some(&cr), Some(&mr)) = (
        image.symbols.get("g_CodeRegistration"),
        image.symbols.get("g_MetadataRegistration"),
    ) {
        debug!("registration via symbols: code {cr:#x}, metadata {mr:#x}");
        return Ok(RegistrationAddrs {
            code_registration: Some(cr),
            metadata_registration: mr,
        });
    }

    let ptr = image.pointer_size as u64;

    let mut candidates = Vec::new();
    for hit in scan_words(image, counts.type_definitions) {
        let Some(base) = hit.checked_sub(METADATA_REGISTRATION_SEED_INDEX * ptr) else {
            continue;
        };
        if let Some(score) = validate_metadata_registration(image, base, counts) {
            debug!("MetadataRegistration candidate {base:#x}: score {score}");
            candidates.push((score, base));
        }
    }
    let metadata_registration =
        pick_best(candidates, min_score).ok_or(Error::RegistrationNotFound)?;

    let code_registration = if counts.methods == 0 {
        debug!("metadata has no methods with bodies; skipping the CodeRegistration scan");
        None
    } else {
        let field_count = code_registration_field_count(version);
        let mut candidates = Vec::new();
        for hit in scan_words(image, counts.methods) {
            let Some(base) = hit.checked_sub((field_count - 2) * ptr) else {
                continue;
            };
            if let Some(score) = validate_code_registration(image, base, field_count, counts, version)
            {
                debug!("CodeRegistration candidate {base:#x}: score {score}");
                candidates.push((score, base));
            }
        }
        Some(pick_best(candidates, min_score).ok_or(Error::RegistrationNotFound)?)
    };

    debug!(
        "registration located: code {code_registration:?}, metadata {metadata_registration:#x}"
    );
    Ok(RegistrationAddrs {
        code_registration,
        metadata_registration,
    })
}
