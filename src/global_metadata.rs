//! Decoder for `global-metadata.dat`.
//!
//! The blob starts with a sanity magic and a major version, followed by an
//! `(offset, size)` pair per table. Which tables exist, and the shape of
//! their records, both depend on the metadata version, so everything here is
//! declared through the versioned-record machinery in [`crate::stream`].
//!
//! The header only stores the major version. For majors that shipped with
//! several on-disk layouts (24, 27, 29) the minor is recovered by parsing
//! the header once per candidate and scoring how well the declared table
//! sizes divide by that candidate's record sizes.

use crate::error::{Error, Result};
use crate::stream::{
    record_size, records, LayoutCache, Record, Stream, Version, V16, V19, V20, V21, V23, V24,
    V24_1, V24_2, V24_3, V24_4, V24_5, V27, V27_1, V27_2, V29, V29_1, VMAX,
};
use log::{debug, warn};

pub const SANITY: u32 = 0xFAB1_1BAF;

/// Low 24 bits of a metadata token.
pub fn token_rid(token: u32) -> u32 {
    token & 0x00FF_FFFF
}

records! {
    pub struct Il2CppStringLiteral {
        pub length: u32 => V16, VMAX;
        pub data_index: u32 => V16, VMAX;
    }

    pub struct Il2CppEventDefinition {
        pub name_index: i32 => V16, VMAX;
        pub type_index: i32 => V16, VMAX;
        pub add: i32 => V16, VMAX;
        pub remove: i32 => V16, VMAX;
        pub raise: i32 => V16, VMAX;
        pub custom_attribute_index: i32 => V16, V24;
        pub token: u32 => V19, VMAX;
    }

    pub struct Il2CppMethodDefinition {
        pub name_index: i32 => V16, VMAX;
        pub declaring_type: i32 => V16, VMAX;
        pub return_type: i32 => V16, VMAX;
        pub parameter_start: i32 => V16, VMAX;
        pub custom_attribute_index: i32 => V16, V24;
        pub generic_container_index: i32 => V16, VMAX;
        /// Module-local index into the owning image's method pointer table.
        /// Later formats stopped storing it; the decoder then synthesizes
        /// `rid(token) - 1` so the field is meaningful at every version.
        pub method_index: i32 => V16, V24_1;
        pub invoker_index: i32 => V16, V24_1;
        pub delegate_wrapper_index: i32 => V16, V24_1;
        pub rgctx_start_index: i32 => V16, V24_1;
        pub rgctx_count: i32 => V16, V24_1;
        pub token: u32 => V19, VMAX;
        pub flags: u16 => V16, VMAX;
        pub iflags: u16 => V16, VMAX;
        pub slot: u16 => V16, VMAX;
        pub parameter_count: u16 => V16, VMAX;
    }

    pub struct Il2CppParameterDefinition {
        pub name_index: i32 => V16, VMAX;
        pub token: u32 => V19, VMAX;
        pub custom_attribute_index: i32 => V16, V24;
        pub type_index: i32 => V16, VMAX;
    }

    pub struct Il2CppParameterDefaultValue {
        pub parameter_index: i32 => V16, VMAX;
        pub type_index: i32 => V16, VMAX;
        pub data_index: i32 => V16, VMAX;
    }

    pub struct Il2CppFieldDefaultValue {
        pub field_index: i32 => V16, VMAX;
        pub type_index: i32 => V16, VMAX;
        pub data_index: i32 => V16, VMAX;
    }

    pub struct Il2CppFieldDefinition {
        pub name_index: i32 => V16, VMAX;
        pub type_index: i32 => V16, VMAX;
        pub custom_attribute_index: i32 => V16, V24;
        pub token: u32 => V19, VMAX;
    }

    pub struct Il2CppFieldMarshaledSize {
        pub field_index: i32 => V16, VMAX;
        pub type_index: i32 => V16, VMAX;
        pub size: i32 => V16, VMAX;
    }

    pub struct Il2CppPropertyDefinition {
        pub name_index: i32 => V16, VMAX;
        pub get: i32 => V16, VMAX;
        pub set: i32 => V16, VMAX;
        pub attrs: u32 => V16, VMAX;
        pub custom_attribute_index: i32 => V16, V24;
        pub token: u32 => V19, VMAX;
    }

    pub struct Il2CppGenericParameter {
        /// Generic container this parameter was declared in.
        pub owner_index: i32 => V16, VMAX;
        pub name_index: i32 => V16, VMAX;
        pub constraints_start: i16 => V16, VMAX;
        pub constraints_count: i16 => V16, VMAX;
        pub num: u16 => V16, VMAX;
        pub flags: u16 => V16, VMAX;
    }

    pub struct Il2CppGenericContainer {
        /// Index of the generic type definition or method definition this
        /// container belongs to, selected by `is_method`.
        pub owner_index: i32 => V16, VMAX;
        pub type_argc: i32 => V16, VMAX;
        pub is_method: i32 => V16, VMAX;
        pub generic_parameter_start: i32 => V16, VMAX;
    }

    pub struct Il2CppInterfaceOffsetPair {
        pub interface_type_index: i32 => V16, VMAX;
        pub offset: i32 => V16, VMAX;
    }

    pub struct Il2CppTypeDefinition {
        pub name_index: i32 => V16, VMAX;
        pub namespace_index: i32 => V16, VMAX;
        pub custom_attribute_index: i32 => V16, V24;
        pub byval_type_index: i32 => V16, VMAX;
        pub byref_type_index: i32 => V16, V24_4;
        pub declaring_type_index: i32 => V16, VMAX;
        pub parent_index: i32 => V16, VMAX;
        pub element_type_index: i32 => V16, VMAX;
        pub rgctx_start_index: i32 => V16, V24_1;
        pub rgctx_count: i32 => V16, V24_1;
        pub generic_container_index: i32 => V16, VMAX;
        pub flags: u32 => V16, VMAX;
        pub field_start: i32 => V16, VMAX;
        pub method_start: i32 => V16, VMAX;
        pub event_start: i32 => V16, VMAX;
        pub property_start: i32 => V16, VMAX;
        pub nested_types_start: i32 => V16, VMAX;
        pub interfaces_start: i32 => V16, VMAX;
        pub vtable_start: i32 => V16, VMAX;
        pub interface_offsets_start: i32 => V16, VMAX;
        pub method_count: u16 => V16, VMAX;
        pub property_count: u16 => V16, VMAX;
        pub field_count: u16 => V16, VMAX;
        pub event_count: u16 => V16, VMAX;
        pub nested_type_count: u16 => V16, VMAX;
        pub vtable_count: u16 => V16, VMAX;
        pub interfaces_count: u16 => V16, VMAX;
        pub interface_offsets_count: u16 => V16, VMAX;
        pub bitfield: u32 => V16, VMAX;
        pub token: u32 => V16, VMAX;
    }

    pub struct Il2CppImageDefinition {
        pub name_index: i32 => V16, VMAX;
        pub assembly_index: i32 => V16, VMAX;
        pub type_start: i32 => V16, VMAX;
        pub type_count: u32 => V16, VMAX;
        pub exported_type_start: i32 => V24, VMAX;
        pub exported_type_count: u32 => V24, VMAX;
        pub entry_point_index: i32 => V16, VMAX;
        pub token: u32 => V19, VMAX;
        pub custom_attribute_start: i32 => V24, VMAX;
        pub custom_attribute_count: u32 => V24, VMAX;
    }

    pub struct Il2CppAssemblyDefinition {
        pub image_index: i32 => V16, VMAX;
        pub token: u32 => V19, VMAX;
        pub referenced_assembly_start: i32 => V20, VMAX;
        pub referenced_assembly_count: i32 => V20, VMAX;
        pub name_index: i32 => V16, VMAX;
        pub culture_index: i32 => V16, VMAX;
        pub hash_value_index: i32 => V16, V27;
        pub public_key_index: i32 => V16, VMAX;
        pub hash_alg: u32 => V16, VMAX;
        pub hash_len: i32 => V16, VMAX;
        pub flags: u32 => V16, VMAX;
        pub major: i32 => V16, VMAX;
        pub minor: i32 => V16, VMAX;
        pub build: i32 => V16, VMAX;
        pub revision: i32 => V16, VMAX;
        pub public_key_token: u64 => V16, VMAX;
    }

    pub struct Il2CppMetadataUsageList {
        pub start: u32 => V16, VMAX;
        pub count: u32 => V16, VMAX;
    }

    pub struct Il2CppMetadataUsagePair {
        pub destination_index: u32 => V16, VMAX;
        pub encoded_source_index: u32 => V16, VMAX;
    }

    pub struct Il2CppFieldRef {
        pub type_index: i32 => V16, VMAX;
        /// Local offset into the type's fields.
        pub field_index: i32 => V16, VMAX;
    }

    pub struct Il2CppCustomAttributeTypeRange {
        pub token: u32 => V24, VMAX;
        pub start: i32 => V16, VMAX;
        pub count: i32 => V16, VMAX;
    }

    pub struct Il2CppCustomAttributeDataRange {
        pub token: u32 => V16, VMAX;
        pub start_offset: u32 => V16, VMAX;
    }

    pub struct Il2CppRange {
        pub start: i32 => V16, VMAX;
        pub length: i32 => V16, VMAX;
    }

    pub struct Il2CppWindowsRuntimeTypeNamePair {
        pub name_index: i32 => V16, VMAX;
        pub type_index: i32 => V16, VMAX;
    }

    pub struct Il2CppRgctxDefinition {
        pub data_type: i32 => V16, VMAX;
        pub data: i32 => V16, VMAX;
    }

    pub struct Il2CppGlobalMetadataHeader {
        pub sanity: u32 => V16, VMAX;
        pub version: u32 => V16, VMAX;
        pub string_literal_offset: i32 => V16, VMAX;
        pub string_literal_size: i32 => V16, VMAX;
        pub string_literal_data_offset: i32 => V16, VMAX;
        pub string_literal_data_size: i32 => V16, VMAX;
        pub string_offset: i32 => V16, VMAX;
        pub string_size: i32 => V16, VMAX;
        pub events_offset: i32 => V16, VMAX;
        pub events_size: i32 => V16, VMAX;
        pub properties_offset: i32 => V16, VMAX;
        pub properties_size: i32 => V16, VMAX;
        pub methods_offset: i32 => V16, VMAX;
        pub methods_size: i32 => V16, VMAX;
        pub parameter_default_values_offset: i32 => V16, VMAX;
        pub parameter_default_values_size: i32 => V16, VMAX;
        pub field_default_values_offset: i32 => V16, VMAX;
        pub field_default_values_size: i32 => V16, VMAX;
        pub field_and_parameter_default_value_data_offset: i32 => V16, VMAX;
        pub field_and_parameter_default_value_data_size: i32 => V16, VMAX;
        pub field_marshaled_sizes_offset: i32 => V16, VMAX;
        pub field_marshaled_sizes_size: i32 => V16, VMAX;
        pub parameters_offset: i32 => V16, VMAX;
        pub parameters_size: i32 => V16, VMAX;
        pub fields_offset: i32 => V16, VMAX;
        pub fields_size: i32 => V16, VMAX;
        pub generic_parameters_offset: i32 => V16, VMAX;
        pub generic_parameters_size: i32 => V16, VMAX;
        pub generic_parameter_constraints_offset: i32 => V16, VMAX;
        pub generic_parameter_constraints_size: i32 => V16, VMAX;
        pub generic_containers_offset: i32 => V16, VMAX;
        pub generic_containers_size: i32 => V16, VMAX;
        pub nested_types_offset: i32 => V16, VMAX;
        pub nested_types_size: i32 => V16, VMAX;
        pub interfaces_offset: i32 => V16, VMAX;
        pub interfaces_size: i32 => V16, VMAX;
        pub vtable_methods_offset: i32 => V16, VMAX;
        pub vtable_methods_size: i32 => V16, VMAX;
        pub interface_offsets_offset: i32 => V16, VMAX;
        pub interface_offsets_size: i32 => V16, VMAX;
        pub type_definitions_offset: i32 => V16, VMAX;
        pub type_definitions_size: i32 => V16, VMAX;
        pub rgctx_entries_offset: i32 => V16, V24_1;
        pub rgctx_entries_size: i32 => V16, V24_1;
        pub images_offset: i32 => V16, VMAX;
        pub images_size: i32 => V16, VMAX;
        pub assemblies_offset: i32 => V16, VMAX;
        pub assemblies_size: i32 => V16, VMAX;
        pub metadata_usage_lists_offset: i32 => V19, V24_5;
        pub metadata_usage_lists_size: i32 => V19, V24_5;
        pub metadata_usage_pairs_offset: i32 => V19, V24_5;
        pub metadata_usage_pairs_size: i32 => V19, V24_5;
        pub field_refs_offset: i32 => V19, VMAX;
        pub field_refs_size: i32 => V19, VMAX;
        pub referenced_assemblies_offset: i32 => V20, VMAX;
        pub referenced_assemblies_size: i32 => V20, VMAX;
        pub attribute_type_ranges_offset: i32 => V21, V27_2;
        pub attribute_type_ranges_size: i32 => V21, V27_2;
        pub attribute_types_offset: i32 => V21, V27_2;
        pub attribute_types_size: i32 => V21, V27_2;
        pub unresolved_virtual_call_parameter_types_offset: i32 => V23, VMAX;
        pub unresolved_virtual_call_parameter_types_size: i32 => V23, VMAX;
        pub unresolved_virtual_call_parameter_ranges_offset: i32 => V23, VMAX;
        pub unresolved_virtual_call_parameter_ranges_size: i32 => V23, VMAX;
        pub windows_runtime_type_names_offset: i32 => V24, VMAX;
        pub windows_runtime_type_names_size: i32 => V24, VMAX;
        pub exported_type_definitions_offset: i32 => V24, VMAX;
        pub exported_type_definitions_size: i32 => V24, VMAX;
        pub windows_runtime_strings_offset: i32 => V27, VMAX;
        pub windows_runtime_strings_size: i32 => V27, VMAX;
        pub attribute_data_offset: i32 => V29, VMAX;
        pub attribute_data_size: i32 => V29, VMAX;
        pub attribute_data_range_offset: i32 => V29, VMAX;
        pub attribute_data_range_size: i32 => V29, VMAX;
    }
}

impl Il2CppTypeDefinition {
    pub fn is_valuetype(&self) -> bool {
        self.bitfield & 1 != 0
    }

    pub fn is_enum(&self) -> bool {
        self.bitfield & 2 != 0
    }
}

impl Il2CppGlobalMetadataHeader {
    /// All `(offset, size)` pairs, in declaration order. Inactive tables
    /// read back as `(0, 0)`, which bounds-checks trivially.
    fn table_bounds(&self) -> Vec<(i32, i32)> {
        vec![
            (self.string_literal_offset, self.string_literal_size),
            (self.string_literal_data_offset, self.string_literal_data_size),
            (self.string_offset, self.string_size),
            (self.events_offset, self.events_size),
            (self.properties_offset, self.properties_size),
            (self.methods_offset, self.methods_size),
            (
                self.parameter_default_values_offset,
                self.parameter_default_values_size,
            ),
            (self.field_default_values_offset, self.field_default_values_size),
            (
                self.field_and_parameter_default_value_data_offset,
                self.field_and_parameter_default_value_data_size,
            ),
            (self.field_marshaled_sizes_offset, self.field_marshaled_sizes_size),
            (self.parameters_offset, self.parameters_size),
            (self.fields_offset, self.fields_size),
            (self.generic_parameters_offset, self.generic_parameters_size),
            (
                self.generic_parameter_constraints_offset,
                self.generic_parameter_constraints_size,
            ),
            (self.generic_containers_offset, self.generic_containers_size),
            (self.nested_types_offset, self.nested_types_size),
            (self.interfaces_offset, self.interfaces_size),
            (self.vtable_methods_offset, self.vtable_methods_size),
            (self.interface_offsets_offset, self.interface_offsets_size),
            (self.type_definitions_offset, self.type_definitions_size),
            (self.rgctx_entries_offset, self.rgctx_entries_size),
            (self.images_offset, self.images_size),
            (self.assemblies_offset, self.assemblies_size),
            (self.metadata_usage_lists_offset, self.metadata_usage_lists_size),
            (self.metadata_usage_pairs_offset, self.metadata_usage_pairs_size),
            (self.field_refs_offset, self.field_refs_size),
            (self.referenced_assemblies_offset, self.referenced_assemblies_size),
            (self.attribute_type_ranges_offset, self.attribute_type_ranges_size),
            (self.attribute_types_offset, self.attribute_types_size),
            (
                self.unresolved_virtual_call_parameter_types_offset,
                self.unresolved_virtual_call_parameter_types_size,
            ),
            (
                self.unresolved_virtual_call_parameter_ranges_offset,
                self.unresolved_virtual_call_parameter_ranges_size,
            ),
            (
                self.windows_runtime_type_names_offset,
                self.windows_runtime_type_names_size,
            ),
            (
                self.exported_type_definitions_offset,
                self.exported_type_definitions_size,
            ),
            (self.windows_runtime_strings_offset, self.windows_runtime_strings_size),
            (self.attribute_data_offset, self.attribute_data_size),
            (self.attribute_data_range_offset, self.attribute_data_range_size),
        ]
    }
}

/// The fully decoded `global-metadata.dat`. Tables are dense arrays indexed
/// by the ids other tables store; strings stay borrowed from the input blob.
#[derive(Debug)]
pub struct GlobalMetadata<'data> {
    pub version: Version,
    pub string_literals: Vec<Il2CppStringLiteral>,
    pub string_literal_data: &'data [u8],
    pub string_data: &'data [u8],
    pub events: Vec<Il2CppEventDefinition>,
    pub properties: Vec<Il2CppPropertyDefinition>,
    pub methods: Vec<Il2CppMethodDefinition>,
    pub parameter_default_values: Vec<Il2CppParameterDefaultValue>,
    pub field_default_values: Vec<Il2CppFieldDefaultValue>,
    pub default_value_data: &'data [u8],
    pub field_marshaled_sizes: Vec<Il2CppFieldMarshaledSize>,
    pub parameters: Vec<Il2CppParameterDefinition>,
    pub fields: Vec<Il2CppFieldDefinition>,
    pub generic_parameters: Vec<Il2CppGenericParameter>,
    pub generic_parameter_constraints: Vec<i32>,
    pub generic_containers: Vec<Il2CppGenericContainer>,
    pub nested_types: Vec<i32>,
    pub interfaces: Vec<i32>,
    pub vtable_methods: Vec<u32>,
    pub interface_offsets: Vec<Il2CppInterfaceOffsetPair>,
    pub type_definitions: Vec<Il2CppTypeDefinition>,
    pub rgctx_entries: Vec<Il2CppRgctxDefinition>,
    pub images: Vec<Il2CppImageDefinition>,
    pub assemblies: Vec<Il2CppAssemblyDefinition>,
    pub metadata_usage_lists: Vec<Il2CppMetadataUsageList>,
    pub metadata_usage_pairs: Vec<Il2CppMetadataUsagePair>,
    pub field_refs: Vec<Il2CppFieldRef>,
    pub referenced_assemblies: Vec<i32>,
    pub attribute_type_ranges: Vec<Il2CppCustomAttributeTypeRange>,
    pub attribute_types: Vec<i32>,
    pub unresolved_virtual_call_parameter_types: Vec<i32>,
    pub unresolved_virtual_call_parameter_ranges: Vec<Il2CppRange>,
    pub windows_runtime_type_names: Vec<Il2CppWindowsRuntimeTypeNamePair>,
    pub exported_type_definitions: Vec<i32>,
    pub attribute_data: &'data [u8],
    pub attribute_data_ranges: Vec<Il2CppCustomAttributeDataRange>,
}

fn slice_table<'d>(data: &'d [u8], offset: i32, size: i32, name: &str) -> Result<&'d [u8]> {
    if size <= 0 {
        return Ok(&[]);
    }
    if offset < 0 {
        return Err(Error::MalformedMetadata(format!(
            "{name} table has negative offset {offset}"
        )));
    }
    let start = offset as usize;
    let end = start + size as usize;
    if end > data.len() {
        return Err(Error::MalformedMetadata(format!(
            "{name} table [{start:#x}..{end:#x}] overruns the blob ({:#x} bytes)",
            data.len()
        )));
    }
    Ok(&data[start..end])
}

fn read_table<T: Record>(
    data: &[u8],
    offset: i32,
    size: i32,
    version: Version,
    cache: &mut LayoutCache,
) -> Result<Vec<T>> {
    let bytes = slice_table(data, offset, size, T::NAME)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let rec = cache.size_of::<T>(version);
    let count = bytes.len() / rec;
    if bytes.len() % rec != 0 {
        warn!(
            "{} table is {} bytes, not a multiple of the {}-byte record; decoding {} records",
            T::NAME,
            bytes.len(),
            rec,
            count
        );
    }
    let mut s = Stream::new(bytes);
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(T::read(&mut s, version)?);
    }
    Ok(out)
}

fn read_i32_table(data: &[u8], offset: i32, size: i32, name: &str) -> Result<Vec<i32>> {
    let bytes = slice_table(data, offset, size, name)?;
    Stream::new(bytes).read_i32_vec(bytes.len() / 4)
}

fn read_u32_table(data: &[u8], offset: i32, size: i32, name: &str) -> Result<Vec<u32>> {
    let bytes = slice_table(data, offset, size, name)?;
    Stream::new(bytes).read_u32_vec(bytes.len() / 4)
}

/// Total probe-table residual for one candidate minor, or `None` if the
/// header does not even parse cleanly as that candidate.
fn candidate_residual(data: &[u8], candidate: Version) -> Option<usize> {
    let header_len = record_size::<Il2CppGlobalMetadataHeader>(candidate);
    if header_len > data.len() {
        return None;
    }
    let header = Il2CppGlobalMetadataHeader::read(&mut Stream::new(data), candidate).ok()?;
    for (offset, size) in header.table_bounds() {
        if size <= 0 {
            continue;
        }
        if offset < 0 || offset as usize + size as usize > data.len() {
            return None;
        }
    }

    let probes = [
        (
            header.type_definitions_size,
            record_size::<Il2CppTypeDefinition>(candidate),
        ),
        (
            header.methods_size,
            record_size::<Il2CppMethodDefinition>(candidate),
        ),
        (
            header.images_size,
            record_size::<Il2CppImageDefinition>(candidate),
        ),
        (
            header.fields_size,
            record_size::<Il2CppFieldDefinition>(candidate),
        ),
        (
            header.assemblies_size,
            record_size::<Il2CppAssemblyDefinition>(candidate),
        ),
        (
            header.events_size,
            record_size::<Il2CppEventDefinition>(candidate),
        ),
        (
            header.properties_size,
            record_size::<Il2CppPropertyDefinition>(candidate),
        ),
        (
            header.parameters_size,
            record_size::<Il2CppParameterDefinition>(candidate),
        ),
    ];
    let mut residual = 0;
    for (size, rec) in probes {
        if size > 0 {
            residual += size as usize % rec;
        }
    }
    Some(residual)
}

/// Recovers the minor version for headers that only say 24, 27 or 29.
/// Smallest residual wins; exact ties resolve to the lowest minor, whose
/// metadata layout is identical anyway.
fn refine_version(data: &[u8], raw: u32) -> Result<Version> {
    let candidates: &[Version] = match raw {
        24 => &[V24, V24_1, V24_2, V24_3, V24_4, V24_5],
        27 => &[V27, V27_1, V27_2],
        29 => &[V29, V29_1],
        n => return Ok(Version::new(n as u16, 0)),
    };

    let mut best: Option<(usize, Version)> = None;
    for &candidate in candidates {
        let Some(residual) = candidate_residual(data, candidate) else {
            continue;
        };
        debug!("metadata version candidate {candidate}: residual {residual}");
        if best.map_or(true, |(r, _)| residual < r) {
            best = Some((residual, candidate));
        }
    }

    match best {
        Some((residual, version)) if residual < record_size::<Il2CppTypeDefinition>(version) => {
            if residual != 0 {
                warn!("metadata version {version} chosen with nonzero residual {residual}");
            }
            Ok(version)
        }
        _ => Err(Error::AmbiguousVersion(raw)),
    }
}

/// Parses a `global-metadata.dat` blob. `force_version` bypasses version
/// refinement (the major range check still applies).
pub fn deserialize<'data>(
    data: &'data [u8],
    force_version: Option<Version>,
) -> Result<GlobalMetadata<'data>> {
    let mut s = Stream::new(data);
    let sanity = s
        .read_u32()
        .map_err(|_| Error::MalformedMetadata("blob is too short for the metadata header".into()))?;
    if sanity != SANITY {
        return Err(Error::MalformedMetadata(format!(
            "magic {sanity:#010x} does not match {SANITY:#010x}"
        )));
    }
    let raw_version = s
        .read_u32()
        .map_err(|_| Error::MalformedMetadata("blob ends before the version field".into()))?;
    if !(16..=31).contains(&raw_version) {
        return Err(Error::UnsupportedVersion(raw_version));
    }

    let version = match force_version {
        Some(v) => {
            if !(16..=31).contains(&(v.major as u32)) {
                return Err(Error::UnsupportedVersion(v.major as u32));
            }
            v
        }
        None => refine_version(data, raw_version)?,
    };
    debug!("decoding metadata as version {version}");

    let header_len = record_size::<Il2CppGlobalMetadataHeader>(version);
    if header_len > data.len() {
        return Err(Error::MalformedMetadata(format!(
            "header needs {header_len} bytes at version {version}, blob has {}",
            data.len()
        )));
    }
    let header = Il2CppGlobalMetadataHeader::read(&mut Stream::new(data), version)?;
    for (offset, size) in header.table_bounds() {
        slice_table(data, offset, size, "metadata")?;
    }

    let mut cache = LayoutCache::default();
    let mut methods: Vec<Il2CppMethodDefinition> = read_table(
        data,
        header.methods_offset,
        header.methods_size,
        version,
        &mut cache,
    )?;
    // Formats that no longer store the module-local code pointer index
    // recover it from the token (rid 0 stays unresolvable).
    if version >= V24_2 {
        for m in &mut methods {
            m.method_index = token_rid(m.token) as i32 - 1;
        }
    }

    let metadata = GlobalMetadata {
        version,
        string_literals: read_table(
            data,
            header.string_literal_offset,
            header.string_literal_size,
            version,
            &mut cache,
        )?,
        string_literal_data: slice_table(
            data,
            header.string_literal_data_offset,
            header.string_literal_data_size,
            "string_literal_data",
        )?,
        string_data: slice_table(data, header.string_offset, header.string_size, "string")?,
        events: read_table(data, header.events_offset, header.events_size, version, &mut cache)?,
        properties: read_table(
            data,
            header.properties_offset,
            header.properties_size,
            version,
            &mut cache,
        )?,
        methods,
        parameter_default_values: read_table(
            data,
            header.parameter_default_values_offset,
            header.parameter_default_values_size,
            version,
            &mut cache,
        )?,
        field_default_values: read_table(
            data,
            header.field_default_values_offset,
            header.field_default_values_size,
            version,
            &mut cache,
        )?,
        default_value_data: slice_table(
            data,
            header.field_and_parameter_default_value_data_offset,
            header.field_and_parameter_default_value_data_size,
            "field_and_parameter_default_value_data",
        )?,
        field_marshaled_sizes: read_table(
            data,
            header.field_marshaled_sizes_offset,
            header.field_marshaled_sizes_size,
            version,
            &mut cache,
        )?,
        parameters: read_table(
            data,
            header.parameters_offset,
            header.parameters_size,
            version,
            &mut cache,
        )?,
        fields: read_table(data, header.fields_offset, header.fields_size, version, &mut cache)?,
        generic_parameters: read_table(
            data,
            header.generic_parameters_offset,
            header.generic_parameters_size,
            version,
            &mut cache,
        )?,
        generic_parameter_constraints: read_i32_table(
            data,
            header.generic_parameter_constraints_offset,
            header.generic_parameter_constraints_size,
            "generic_parameter_constraints",
        )?,
        generic_containers: read_table(
            data,
            header.generic_containers_offset,
            header.generic_containers_size,
            version,
            &mut cache,
        )?,
        nested_types: read_i32_table(
            data,
            header.nested_types_offset,
            header.nested_types_size,
            "nested_types",
        )?,
        interfaces: read_i32_table(
            data,
            header.interfaces_offset,
            header.interfaces_size,
            "interfaces",
        )?,
        vtable_methods: read_u32_table(
            data,
            header.vtable_methods_offset,
            header.vtable_methods_size,
            "vtable_methods",
        )?,
        interface_offsets: read_table(
            data,
            header.interface_offsets_offset,
            header.interface_offsets_size,
            version,
            &mut cache,
        )?,
        type_definitions: read_table(
            data,
            header.type_definitions_offset,
            header.type_definitions_size,
            version,
            &mut cache,
        )?,
        rgctx_entries: read_table(
            data,
            header.rgctx_entries_offset,
            header.rgctx_entries_size,
            version,
            &mut cache,
        )?,
        images: read_table(data, header.images_offset, header.images_size, version, &mut cache)?,
        assemblies: read_table(
            data,
            header.assemblies_offset,
            header.assemblies_size,
            version,
            &mut cache,
        )?,
        metadata_usage_lists: read_table(
            data,
            header.metadata_usage_lists_offset,
            header.metadata_usage_lists_size,
            version,
            &mut cache,
        )?,
        metadata_usage_pairs: read_table(
            data,
            header.metadata_usage_pairs_offset,
            header.metadata_usage_pairs_size,
            version,
            &mut cache,
        )?,
        field_refs: read_table(
            data,
            header.field_refs_offset,
            header.field_refs_size,
            version,
            &mut cache,
        )?,
        referenced_assemblies: read_i32_table(
            data,
            header.referenced_assemblies_offset,
            header.referenced_assemblies_size,
            "referenced_assemblies",
        )?,
        attribute_type_ranges: read_table(
            data,
            header.attribute_type_ranges_offset,
            header.attribute_type_ranges_size,
            version,
            &mut cache,
        )?,
        attribute_types: read_i32_table(
            data,
            header.attribute_types_offset,
            header.attribute_types_size,
            "attribute_types",
        )?,
        unresolved_virtual_call_parameter_types: read_i32_table(
            data,
            header.unresolved_virtual_call_parameter_types_offset,
            header.unresolved_virtual_call_parameter_types_size,
            "unresolved_virtual_call_parameter_types",
        )?,
        unresolved_virtual_call_parameter_ranges: read_table(
            data,
            header.unresolved_virtual_call_parameter_ranges_offset,
            header.unresolved_virtual_call_parameter_ranges_size,
            version,
            &mut cache,
        )?,
        windows_runtime_type_names: read_table(
            data,
            header.windows_runtime_type_names_offset,
            header.windows_runtime_type_names_size,
            version,
            &mut cache,
        )?,
        exported_type_definitions: read_i32_table(
            data,
            header.exported_type_definitions_offset,
            header.exported_type_definitions_size,
            "exported_type_definitions",
        )?,
        attribute_data: slice_table(
            data,
            header.attribute_data_offset,
            header.attribute_data_size,
            "attribute_data",
        )?,
        attribute_data_ranges: read_table(
            data,
            header.attribute_data_range_offset,
            header.attribute_data_range_size,
            version,
            &mut cache,
        )?,
    };

    debug!(
        "metadata: {} images, {} type definitions, {} methods, {} string literals",
        metadata.images.len(),
        metadata.type_definitions.len(),
        metadata.methods.len(),
        metadata.string_literals.len()
    );
    Ok(metadata)
}

/// What a metadata usage slot points at once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedUsage {
    Invalid,
    TypeInfo(u32),
    Type(u32),
    MethodDef(u32),
    FieldInfo(u32),
    StringLiteral(u32),
    MethodRef(u32),
    FieldRva(u32),
}

/// Decodes an encoded usage source index: a 3-bit tag plus an index, with
/// the low bit reserved from version 27 on.
pub fn decode_usage(encoded: u32, version: Version) -> DecodedUsage {
    let tag = (encoded & 0xE000_0000) >> 29;
    let index = if version >= V27 {
        (encoded & 0x1FFF_FFFE) >> 1
    } else {
        encoded & 0x1FFF_FFFF
    };
    match tag {
        1 => DecodedUsage::TypeInfo(index),
        2 => DecodedUsage::Type(index),
        3 => DecodedUsage::MethodDef(index),
        4 => DecodedUsage::FieldInfo(index),
        5 => DecodedUsage::StringLiteral(index),
        6 => DecodedUsage::MethodRef(index),
        7 => DecodedUsage::FieldRva(index),
        _ => DecodedUsage::Invalid,
    }
}

fn slice_range<'a, T>(
    table: &'a [T],
    name: &'static str,
    start: i32,
    count: usize,
) -> Result<&'a [T]> {
    if count == 0 {
        return Ok(&[]);
    }
    if start < 0 {
        return Err(Error::CorruptIndex {
            table: name,
            index: start as i64,
            len: table.len(),
        });
    }
    let start = start as usize;
    let end = start + count;
    if end > table.len() {
        return Err(Error::CorruptIndex {
            table: name,
            index: end as i64,
            len: table.len(),
        });
    }
    Ok(&table[start..end])
}

impl<'data> GlobalMetadata<'data> {
    /// Resolves a byte-offset id into the interned string blob.
    pub fn string(&self, index: i32) -> Result<&'data str> {
        if index < 0 || index as usize >= self.string_data.len() {
            return Err(Error::CorruptIndex {
                table: "string",
                index: index as i64,
                len: self.string_data.len(),
            });
        }
        Stream::new(self.string_data).cstr_at(index as usize)
    }

    /// Fetches a string literal by table index. Literal data is UTF-8.
    pub fn string_literal(&self, index: usize) -> Result<String> {
        let lit = self.string_literals.get(index).ok_or(Error::CorruptIndex {
            table: "string_literals",
            index: index as i64,
            len: self.string_literals.len(),
        })?;
        let start = lit.data_index as usize;
        let end = start + lit.length as usize;
        if end > self.string_literal_data.len() {
            return Err(Error::MalformedMetadata(format!(
                "string literal {index} [{start:#x}..{end:#x}] overruns the literal data blob"
            )));
        }
        Ok(String::from_utf8_lossy(&self.string_literal_data[start..end]).into_owned())
    }

    /// Remaining default-value blob starting at `data_index`.
    pub fn default_value_blob(&self, data_index: i32) -> Option<&'data [u8]> {
        if data_index < 0 {
            return None;
        }
        self.default_value_data.get(data_index as usize..)
    }

    /// Methods that own native code, i.e. the seed constant the
    /// registration locator scans for.
    pub fn methods_with_body(&self) -> usize {
        self.methods.iter().filter(|m| m.method_index >= 0).count()
    }

    pub fn fields_of(&self, ty: &Il2CppTypeDefinition) -> Result<&[Il2CppFieldDefinition]> {
        slice_range(&self.fields, "fields", ty.field_start, ty.field_count as usize)
    }

    pub fn methods_of(&self, ty: &Il2CppTypeDefinition) -> Result<&[Il2CppMethodDefinition]> {
        slice_range(&self.methods, "methods", ty.method_start, ty.method_count as usize)
    }

    pub fn properties_of(&self, ty: &Il2CppTypeDefinition) -> Result<&[Il2CppPropertyDefinition]> {
        slice_range(
            &self.properties,
            "properties",
            ty.property_start,
            ty.property_count as usize,
        )
    }

    pub fn events_of(&self, ty: &Il2CppTypeDefinition) -> Result<&[Il2CppEventDefinition]> {
        slice_range(&self.events, "events", ty.event_start, ty.event_count as usize)
    }

    pub fn nested_types_of(&self, ty: &Il2CppTypeDefinition) -> Result<&[i32]> {
        slice_range(
            &self.nested_types,
            "nested_types",
            ty.nested_types_start,
            ty.nested_type_count as usize,
        )
    }

    pub fn interfaces_of(&self, ty: &Il2CppTypeDefinition) -> Result<&[i32]> {
        slice_range(
            &self.interfaces,
            "interfaces",
            ty.interfaces_start,
            ty.interfaces_count as usize,
        )
    }

    pub fn parameters_of(
        &self,
        method: &Il2CppMethodDefinition,
    ) -> Result<&[Il2CppParameterDefinition]> {
        slice_range(
            &self.parameters,
            "parameters",
            method.parameter_start,
            method.parameter_count as usize,
        )
    }

    pub fn generic_parameters_of(
        &self,
        container: &Il2CppGenericContainer,
    ) -> Result<&[Il2CppGenericParameter]> {
        slice_range(
            &self.generic_parameters,
            "generic_parameters",
            container.generic_parameter_start,
            container.type_argc as usize,
        )
    }

    /// Attribute type ids attached to a member, resolved through the
    /// version-appropriate lookup. Empty when the version keeps attribute
    /// data in a form this decoder does not interpret.
    pub fn attributes_of(
        &self,
        image: &Il2CppImageDefinition,
        token: u32,
        custom_attribute_index: i32,
    ) -> Result<&[i32]> {
        let range = if self.version >= V24 {
            let ranges = slice_range(
                &self.attribute_type_ranges,
                "attribute_type_ranges",
                image.custom_attribute_start,
                image.custom_attribute_count as usize,
            )?;
            match ranges.binary_search_by_key(&token, |r| r.token) {
                Ok(i) => &ranges[i],
                Err(_) => return Ok(&[]),
            }
        } else {
            if custom_attribute_index < 0
                || custom_attribute_index as usize >= self.attribute_type_ranges.len()
            {
                return Ok(&[]);
            }
            &self.attribute_type_ranges[custom_attribute_index as usize]
        };
        slice_range(
            &self.attribute_types,
            "attribute_types",
            range.start,
            range.count as usize,
        )
    }
}
