//! Shared fixtures for in-crate tests.

use crate::binary::{BinaryFormat, Image, Segment};
use crate::global_metadata::GlobalMetadata;
use crate::stream::{Endian, Version};
use std::borrow::Cow;
use std::collections::HashMap;

/// An empty metadata image at the given version.
pub(crate) fn blank_metadata(version: Version) -> GlobalMetadata<'static> {
    GlobalMetadata {
        version,
        string_literals: Vec::new(),
        string_literal_data: &[],
        string_data: &[],
        events: Vec::new(),
        properties: Vec::new(),
        methods: Vec::new(),
        parameter_default_values: Vec::new(),
        field_default_values: Vec::new(),
        default_value_data: &[],
        field_marshaled_sizes: Vec::new(),
        parameters: Vec::new(),
        fields: Vec::new(),
        generic_parameters: Vec::new(),
        generic_parameter_constraints: Vec::new(),
        generic_containers: Vec::new(),
        nested_types: Vec::new(),
        interfaces: Vec::new(),
        vtable_methods: Vec::new(),
        interface_offsets: Vec::new(),
        type_definitions: Vec::new(),
        rgctx_entries: Vec::new(),
        images: Vec::new(),
        assemblies: Vec::new(),
        metadata_usage_lists: Vec::new(),
        metadata_usage_pairs: Vec::new(),
        field_refs: Vec::new(),
        referenced_assemblies: Vec::new(),
        attribute_type_ranges: Vec::new(),
        attribute_types: Vec::new(),
        unresolved_virtual_call_parameter_types: Vec::new(),
        unresolved_virtual_call_parameter_ranges: Vec::new(),
        windows_runtime_type_names: Vec::new(),
        exported_type_definitions: Vec::new(),
        attribute_data: &[],
        attribute_data_ranges: Vec::new(),
    }
}

/// Hand-assembled memory for planting runtime structures.
pub(crate) struct MemImage {
    pub base: u64,
    pub buf: Vec<u8>,
}

impl MemImage {
    pub fn new(base: u64, size: usize) -> Self {
        MemImage {
            base,
            buf: vec![0u8; size],
        }
    }

    pub fn word(&mut self, va: u64, value: u64) -> &mut Self {
        let off = (va - self.base) as usize;
        self.buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, va: u64, bytes: &[u8]) -> &mut Self {
        let off = (va - self.base) as usize;
        self.buf[off..off + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn into_image(self, extra_segments: Vec<Segment>) -> Image<'static> {
        let mut segments = vec![Segment {
            file_offset: 0,
            vaddr: self.base,
            size: self.buf.len() as u64,
            read: true,
            write: true,
            execute: false,
        }];
        segments.extend(extra_segments);
        Image {
            data: Cow::Owned(self.buf),
            format: BinaryFormat::Elf,
            pointer_size: 8,
            endian: Endian::Little,
            image_base: 0,
            segments,
            symbols: HashMap::new(),
        }
    }
}
