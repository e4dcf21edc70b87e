//! Core of an IL2CPP dumper: reconstructs C#-like type and method
//! information from a Unity game built with the IL2CPP toolchain.
//!
//! The pipeline is strictly linear. [`global_metadata`] decodes the
//! `global-metadata.dat` blob, [`binary`] maps the executable into a
//! virtual-memory view and locates the two registration structs,
//! [`runtime_metadata`] reads the tables they point at, and the
//! [`executor::Executor`] walks the combined graph so the output writers
//! can emit `dump.cs`, `il2cpp.h`, `script.json` and `stringliteral.json`.
//!
//! The whole run is synchronous and deterministic: the artifacts are a
//! pure function of `(binary bytes, metadata bytes, config)`.

pub mod binary;
pub mod decompiler;
pub mod error;
pub mod executor;
pub mod global_metadata;
pub mod header_gen;
pub mod runtime_metadata;
pub mod script;
pub mod stream;
pub mod tabledef;

#[cfg(test)]
pub(crate) mod test_util;

use binary::search::{self, SearchCounts};
use binary::Image;
use executor::Executor;
use log::info;
use std::collections::BTreeMap;

pub use error::{Error, Result};
pub use stream::Version;

/// What to include in the artifacts. Defaults enable everything.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub dump_method: bool,
    pub dump_field: bool,
    pub dump_property: bool,
    pub dump_attribute: bool,
    pub dump_field_offset: bool,
    pub dump_method_offset: bool,
    pub dump_type_def_index: bool,
    pub generate_script: bool,
    /// Overrides the binary-side version derived from the metadata.
    pub force_il2cpp_version: Option<Version>,
    /// Overrides metadata version detection entirely.
    pub force_version: Option<Version>,
    /// Minimum locator candidate score; `None` keeps only the built-in
    /// primary pointer checks.
    pub min_locator_score: Option<u32>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            dump_method: true,
            dump_field: true,
            dump_property: true,
            dump_attribute: true,
            dump_field_offset: true,
            dump_method_offset: true,
            dump_type_def_index: true,
            generate_script: true,
            force_il2cpp_version: None,
            force_version: None,
            min_locator_score: None,
        }
    }
}

/// Finished artifacts, keyed by filename.
#[derive(Debug, Default)]
pub struct Artifacts {
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Artifacts {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }
}

/// Runs the whole pipeline over one `(binary, metadata)` pair.
pub fn dump(binary_bytes: &[u8], metadata_bytes: &[u8], config: &DumpConfig) -> Result<Artifacts> {
    let metadata = global_metadata::deserialize(metadata_bytes, config.force_version)?;
    info!("metadata version {}", metadata.version);

    let image = Image::parse(binary_bytes)?;
    let binary_version = config.force_il2cpp_version.unwrap_or(metadata.version);

    let counts = SearchCounts {
        methods: metadata.methods_with_body() as u64,
        type_definitions: metadata.type_definitions.len() as u64,
        images: metadata.images.len() as u64,
    };
    let addrs =
        search::find_registration(&image, binary_version, &counts, config.min_locator_score)?;
    let runtime = runtime_metadata::RuntimeMetadata::read(&image, &addrs, binary_version, &metadata)?;

    let mut executor = Executor::new(&metadata, &runtime, &image, binary_version);
    let mut files = BTreeMap::new();
    files.insert(
        "dump.cs".to_owned(),
        decompiler::decompile(&mut executor, config)?.into_bytes(),
    );
    files.insert(
        "il2cpp.h".to_owned(),
        header_gen::generate_header(&mut executor)?.into_bytes(),
    );
    if config.generate_script {
        files.insert(
            "script.json".to_owned(),
            script::generate_script(&mut executor)?,
        );
    }
    files.insert(
        "stringliteral.json".to_owned(),
        script::generate_string_literals(&metadata)?,
    );

    info!("dump finished: {} artifacts", files.len());
    Ok(Artifacts { files })
}
