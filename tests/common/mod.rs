//! Fixture builders for the end-to-end scenarios: synthetic metadata
//! blobs, planted registration structures, and minimal executable
//! containers around them.
//!
//! The metadata builder serializes records by walking the crate's own
//! field descriptors, so fixtures track the schema by construction.

#![allow(dead_code)]

use il2cpp_dumper::global_metadata::{
    Il2CppFieldDefinition, Il2CppGenericContainer, Il2CppGenericParameter,
    Il2CppGlobalMetadataHeader, Il2CppImageDefinition, Il2CppMethodDefinition,
    Il2CppMetadataUsagePair, Il2CppStringLiteral, Il2CppTypeDefinition, SANITY,
};
use il2cpp_dumper::stream::{record_size, Record, Version, Width, V27};

type Values = Vec<(&'static str, i64)>;

pub fn write_record<T: Record>(out: &mut Vec<u8>, version: Version, values: &[(&'static str, i64)]) {
    for f in T::FIELDS.iter().filter(|f| f.active(version)) {
        let v = values
            .iter()
            .find(|(n, _)| *n == f.name)
            .map(|(_, x)| *x)
            .unwrap_or(0);
        match f.width {
            Width::U8 | Width::I8 => out.push(v as u8),
            Width::U16 | Width::I16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
            Width::U32 | Width::I32 => out.extend_from_slice(&(v as u32).to_le_bytes()),
            Width::U64 | Width::I64 => out.extend_from_slice(&(v as u64).to_le_bytes()),
        }
    }
}

fn emit_table<T: Record>(version: Version, records: &[Values]) -> Vec<u8> {
    let mut out = Vec::new();
    for rec in records {
        write_record::<T>(&mut out, version, rec);
    }
    out
}

fn header_field_active(name: &str, version: Version) -> bool {
    Il2CppGlobalMetadataHeader::FIELDS
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.active(version))
        .unwrap_or(false)
}

pub struct MetadataFixture {
    pub version: Version,
    strings: Vec<u8>,
    type_definitions: Vec<Values>,
    methods: Vec<Values>,
    fields: Vec<Values>,
    images: Vec<Values>,
    generic_containers: Vec<Values>,
    generic_parameters: Vec<Values>,
    literals: Vec<String>,
    usage_pairs: Vec<(u32, u32)>,
}

impl MetadataFixture {
    pub fn new(version: Version) -> Self {
        MetadataFixture {
            version,
            // id 0 is the empty string
            strings: vec![0],
            type_definitions: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            images: Vec::new(),
            generic_containers: Vec::new(),
            generic_parameters: Vec::new(),
            literals: Vec::new(),
            usage_pairs: Vec::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> i64 {
        if s.is_empty() {
            return 0;
        }
        let off = self.strings.len() as i64;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        off
    }

    pub fn add_image(&mut self, name: &str, type_start: i64, type_count: i64) {
        let name = self.intern(name);
        self.images.push(vec![
            ("name_index", name),
            ("assembly_index", 0),
            ("type_start", type_start),
            ("type_count", type_count),
            ("exported_type_start", -1),
            ("entry_point_index", -1),
            ("token", 1),
        ]);
    }

    /// Adds a type definition; `extra` overrides the defaults.
    pub fn add_type(&mut self, name: &str, namespace: &str, extra: &[(&'static str, i64)]) -> i64 {
        let idx = self.type_definitions.len() as i64;
        let name = self.intern(name);
        let namespace = self.intern(namespace);
        let mut rec: Values = extra.to_vec();
        rec.extend([
            ("name_index", name),
            ("namespace_index", namespace),
            ("custom_attribute_index", -1),
            ("byval_type_index", -1),
            ("byref_type_index", -1),
            ("declaring_type_index", -1),
            ("parent_index", -1),
            ("element_type_index", -1),
            ("generic_container_index", -1),
            ("flags", 1),
            ("field_start", -1),
            ("method_start", -1),
            ("event_start", -1),
            ("property_start", -1),
            ("nested_types_start", -1),
            ("interfaces_start", -1),
            ("vtable_start", -1),
            ("interface_offsets_start", -1),
            ("token", 0x0200_0000 + idx + 1),
        ]);
        self.type_definitions.push(rec);
        idx
    }

    /// Adds a method; `rid` drives the module-local pointer index
    /// (`rid - 1`) on formats that synthesize it from the token.
    pub fn add_method(
        &mut self,
        name: &str,
        declaring_type: i64,
        return_type: i64,
        rid: u32,
        extra: &[(&'static str, i64)],
    ) -> i64 {
        let idx = self.methods.len() as i64;
        let name = self.intern(name);
        let mut rec: Values = extra.to_vec();
        rec.extend([
            ("name_index", name),
            ("declaring_type", declaring_type),
            ("return_type", return_type),
            ("parameter_start", -1),
            ("custom_attribute_index", -1),
            ("generic_container_index", -1),
            ("method_index", rid as i64 - 1),
            ("invoker_index", -1),
            ("delegate_wrapper_index", -1),
            ("token", (0x0600_0000u32 | rid) as i64),
            ("flags", 0x0006),
        ]);
        self.methods.push(rec);
        idx
    }

    pub fn add_field(&mut self, name: &str, type_index: i64) -> i64 {
        let idx = self.fields.len() as i64;
        let name = self.intern(name);
        self.fields.push(vec![
            ("name_index", name),
            ("type_index", type_index),
            ("custom_attribute_index", -1),
            ("token", 0x0400_0000 + idx + 1),
        ]);
        idx
    }

    pub fn add_generic_container(&mut self, owner_def: i64, params: &[&str]) -> i64 {
        let container_idx = self.generic_containers.len() as i64;
        let start = self.generic_parameters.len() as i64;
        for (num, param) in params.iter().enumerate() {
            let name = self.intern(param);
            self.generic_parameters.push(vec![
                ("owner_index", container_idx),
                ("name_index", name),
                ("num", num as i64),
            ]);
        }
        self.generic_containers.push(vec![
            ("owner_index", owner_def),
            ("type_argc", params.len() as i64),
            ("is_method", 0),
            ("generic_parameter_start", start),
        ]);
        container_idx
    }

    pub fn add_literal(&mut self, value: &str) -> usize {
        self.literals.push(value.to_owned());
        self.literals.len() - 1
    }

    pub fn add_usage_pair(&mut self, destination: u32, encoded: u32) {
        self.usage_pairs.push((destination, encoded));
    }

    pub fn build(&self) -> Vec<u8> {
        let version = self.version;
        let header_len = record_size::<Il2CppGlobalMetadataHeader>(version);

        let mut literal_records = Vec::new();
        let mut literal_blob = Vec::new();
        for value in &self.literals {
            literal_records.push(vec![
                ("length", value.len() as i64),
                ("data_index", literal_blob.len() as i64),
            ]);
            literal_blob.extend_from_slice(value.as_bytes());
        }
        let usage_records: Vec<Values> = self
            .usage_pairs
            .iter()
            .map(|&(destination, encoded)| {
                vec![
                    ("destination_index", destination as i64),
                    ("encoded_source_index", encoded as i64),
                ]
            })
            .collect();

        let mut tables: Vec<(&'static str, Vec<u8>)> = vec![
            ("string", self.strings.clone()),
            (
                "string_literal",
                emit_table::<Il2CppStringLiteral>(version, &literal_records),
            ),
            ("string_literal_data", literal_blob),
            (
                "type_definitions",
                emit_table::<Il2CppTypeDefinition>(version, &self.type_definitions),
            ),
            (
                "methods",
                emit_table::<Il2CppMethodDefinition>(version, &self.methods),
            ),
            (
                "fields",
                emit_table::<Il2CppFieldDefinition>(version, &self.fields),
            ),
            (
                "images",
                emit_table::<Il2CppImageDefinition>(version, &self.images),
            ),
            (
                "generic_containers",
                emit_table::<Il2CppGenericContainer>(version, &self.generic_containers),
            ),
            (
                "generic_parameters",
                emit_table::<Il2CppGenericParameter>(version, &self.generic_parameters),
            ),
        ];
        if header_field_active("metadata_usage_pairs_offset", version) {
            tables.push((
                "metadata_usage_pairs",
                emit_table::<Il2CppMetadataUsagePair>(version, &usage_records),
            ));
        }

        let mut header_values: Vec<(String, i64)> = Vec::new();
        let mut offset = header_len as i64;
        for (name, bytes) in &tables {
            header_values.push((format!("{name}_offset"), offset));
            header_values.push((format!("{name}_size"), bytes.len() as i64));
            offset += bytes.len() as i64;
        }

        let mut out = Vec::with_capacity(offset as usize);
        for f in Il2CppGlobalMetadataHeader::FIELDS
            .iter()
            .filter(|f| f.active(version))
        {
            let value = match f.name {
                "sanity" => SANITY as i64,
                "version" => version.major as i64,
                name => header_values
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| *v)
                    .unwrap_or(0),
            };
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        for (_, bytes) in tables {
            out.extend_from_slice(&bytes);
        }
        out
    }
}

/// One entry of the planted runtime type table.
pub struct PlantType {
    pub tag: u8,
    pub data: PlantData,
    pub attrs: u16,
}

pub enum PlantData {
    /// Raw datapoint (type definition ids, generic parameter ids)
    Raw(i64),
    /// Pointer at another planted type, by index
    TypeRef(usize),
    /// A generic instantiation over another planted type
    Generic {
        base_type: usize,
        base_def: i64,
        args: Vec<usize>,
    },
}

impl PlantType {
    pub fn raw(tag: u8, datapoint: i64) -> Self {
        PlantType {
            tag,
            data: PlantData::Raw(datapoint),
            attrs: 0,
        }
    }

    pub fn with_attrs(mut self, attrs: u16) -> Self {
        self.attrs = attrs;
        self
    }
}

struct Bump {
    va: u64,
    ptr: u8,
    buf: Vec<u8>,
}

impl Bump {
    fn align(&mut self, align: usize) {
        while self.buf.len() % align != 0 {
            self.buf.push(0);
        }
    }

    fn here(&self) -> u64 {
        self.va + self.buf.len() as u64
    }

    fn push_word(&mut self, value: u64) {
        if self.ptr == 4 {
            self.buf.extend_from_slice(&(value as u32).to_le_bytes());
        } else {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn push_words(&mut self, values: &[u64]) -> u64 {
        self.align(self.ptr as usize);
        let va = self.here();
        for &v in values {
            self.push_word(v);
        }
        va
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> u64 {
        let va = self.here();
        self.buf.extend_from_slice(bytes);
        va
    }

    fn patch_word(&mut self, va: u64, value: u64) {
        let off = (va - self.va) as usize;
        if self.ptr == 4 {
            self.buf[off..off + 4].copy_from_slice(&(value as u32).to_le_bytes());
        } else {
            self.buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
        }
    }
}

pub struct Planted {
    pub data: Vec<u8>,
    pub method_pointers: Vec<u64>,
}

/// Lays a consistent CodeRegistration + MetadataRegistration (and the
/// tables they point at) into one data segment starting at `data_va`.
pub fn plant_registration(
    ptr: u8,
    data_va: u64,
    text_va: u64,
    version: Version,
    module_name: &str,
    method_count: usize,
    type_def_count: u64,
    types: &[PlantType],
    usage_slots: usize,
) -> Planted {
    let mut b = Bump {
        va: data_va,
        ptr,
        buf: Vec::new(),
    };
    let word = ptr as u64;

    // type records first; datapoints patched once referenced structures
    // have addresses
    let mut type_vas = Vec::with_capacity(types.len());
    for ty in types {
        b.align(ptr as usize);
        let va = b.here();
        b.push_word(0); // datapoint
        b.buf.extend_from_slice(&ty.attrs.to_le_bytes());
        b.buf.push(ty.tag);
        b.buf.push(0); // bitfield
        type_vas.push(va);
    }
    let type_arr_va = b.push_words(&type_vas);

    let mut generic_inst_vas = Vec::new();
    let mut generic_class_vas = Vec::new();
    let mut gc_for_type = vec![0u64; types.len()];
    for (i, ty) in types.iter().enumerate() {
        if let PlantData::Generic {
            base_type,
            base_def,
            args,
        } = &ty.data
        {
            let arg_ptrs: Vec<u64> = args.iter().map(|&a| type_vas[a]).collect();
            let args_va = b.push_words(&arg_ptrs);
            let inst_va = b.push_words(&[arg_ptrs.len() as u64, args_va]);
            generic_inst_vas.push(inst_va);
            let head = if version >= V27 {
                type_vas[*base_type]
            } else {
                *base_def as u64
            };
            let gc_va = b.push_words(&[head, inst_va, 0]);
            generic_class_vas.push(gc_va);
            gc_for_type[i] = gc_va;
        }
    }
    for (i, ty) in types.iter().enumerate() {
        let datapoint = match &ty.data {
            PlantData::Raw(v) => *v as u64,
            PlantData::TypeRef(inner) => type_vas[*inner],
            PlantData::Generic { .. } => gc_for_type[i],
        };
        b.patch_word(type_vas[i], datapoint);
    }
    let generic_class_arr_va = b.push_words(&generic_class_vas);
    let generic_inst_arr_va = b.push_words(&generic_inst_vas);

    let method_pointers: Vec<u64> = (0..method_count as u64)
        .map(|i| text_va + i * 0x10)
        .collect();
    let method_ptrs_va = b.push_words(&method_pointers);

    let mut name = module_name.as_bytes().to_vec();
    name.push(0);
    let name_va = b.push_bytes(&name);
    let module_va = b.push_words(&[name_va, method_count as u64, method_ptrs_va]);
    let modules_arr_va = b.push_words(&[module_va]);

    let usages_va = if usage_slots > 0 {
        b.push_words(&vec![0u64; usage_slots])
    } else {
        0
    };

    // CodeRegistration: module pair at words 9/10, version extras before
    // the trailing method pointer pair
    let field_count = if version >= il2cpp_dumper::stream::V29_1 {
        16
    } else if version >= il2cpp_dumper::stream::V29 {
        14
    } else {
        13
    };
    let mut cr = vec![0u64; field_count];
    cr[9] = 1; // one code gen module
    cr[10] = modules_arr_va;
    cr[field_count - 2] = method_count as u64;
    cr[field_count - 1] = method_ptrs_va;
    let _cr_va = b.push_words(&cr);

    let mr = [
        generic_class_vas.len() as u64,
        generic_class_arr_va,
        generic_inst_vas.len() as u64,
        generic_inst_arr_va,
        0,
        0,
        types.len() as u64,
        type_arr_va,
        0,
        0,
        type_def_count,
        0,
        type_def_count,
        0,
        usage_slots as u64,
        usages_va,
    ];
    let _mr_va = b.push_words(&mr);

    Planted {
        data: b.buf,
        method_pointers,
    }
}

// --- container wrappers ---------------------------------------------------

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

pub fn wrap_elf64(text: &[u8], text_va: u64, data: &[u8], data_va: u64) -> Vec<u8> {
    let phoff = 0x40u64;
    let phentsize = 0x38u64;
    let payload_off = phoff + 2 * phentsize;
    let mut out = Vec::new();
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.resize(0x10, 0);
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0xB7u16.to_le_bytes()); // aarch64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&text_va.to_le_bytes());
    out.extend_from_slice(&phoff.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0x40u16.to_le_bytes());
    out.extend_from_slice(&(phentsize as u16).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    let phdr = |flags: u32, offset: u64, vaddr: u64, size: u64| {
        let mut h = Vec::new();
        h.extend_from_slice(&PT_LOAD.to_le_bytes());
        h.extend_from_slice(&flags.to_le_bytes());
        h.extend_from_slice(&offset.to_le_bytes());
        h.extend_from_slice(&vaddr.to_le_bytes());
        h.extend_from_slice(&vaddr.to_le_bytes());
        h.extend_from_slice(&size.to_le_bytes());
        h.extend_from_slice(&size.to_le_bytes());
        h.extend_from_slice(&0x1000u64.to_le_bytes());
        h
    };
    out.extend(phdr(PF_R | PF_X, payload_off, text_va, text.len() as u64));
    out.extend(phdr(
        PF_R | PF_W,
        payload_off + text.len() as u64,
        data_va,
        data.len() as u64,
    ));
    out.extend_from_slice(text);
    out.extend_from_slice(data);
    out
}

pub fn wrap_pe64(image_base: u64, text_rva: u32, text: &[u8], data_rva: u32, data: &[u8]) -> Vec<u8> {
    const SCN_MEM_EXECUTE: u32 = 0x2000_0000;
    const SCN_MEM_READ: u32 = 0x4000_0000;
    const SCN_MEM_WRITE: u32 = 0x8000_0000;

    let e_lfanew = 0x80u32;
    let optional_size = 0xF0u16;
    let mut out = vec![0u8; e_lfanew as usize];
    out[0] = b'M';
    out[1] = b'Z';
    out[0x3C..0x40].copy_from_slice(&e_lfanew.to_le_bytes());

    out.extend_from_slice(&0x0000_4550u32.to_le_bytes());
    out.extend_from_slice(&0x8664u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&optional_size.to_le_bytes());
    out.extend_from_slice(&0x22u16.to_le_bytes());

    let optional_start = out.len();
    out.extend_from_slice(&0x20Bu16.to_le_bytes());
    out.resize(optional_start + 24, 0);
    out.extend_from_slice(&image_base.to_le_bytes());
    out.resize(optional_start + optional_size as usize, 0);

    let section_table = out.len();
    let headers_end = section_table + 2 * 40;
    let text_raw = (headers_end + 0x1FF) & !0x1FF;
    let data_raw = text_raw + text.len();

    let mut section = |name: &[u8; 8], rva: u32, size: usize, raw: usize, chars: u32| {
        let mut h = Vec::new();
        h.extend_from_slice(name);
        h.extend_from_slice(&(size as u32).to_le_bytes());
        h.extend_from_slice(&rva.to_le_bytes());
        h.extend_from_slice(&(size as u32).to_le_bytes());
        h.extend_from_slice(&(raw as u32).to_le_bytes());
        h.extend_from_slice(&[0u8; 12]);
        h.extend_from_slice(&chars.to_le_bytes());
        h
    };
    let text_hdr = section(
        b".text\0\0\0",
        text_rva,
        text.len(),
        text_raw,
        SCN_MEM_READ | SCN_MEM_EXECUTE,
    );
    let data_hdr = section(
        b".data\0\0\0",
        data_rva,
        data.len(),
        data_raw,
        SCN_MEM_READ | SCN_MEM_WRITE,
    );
    out.extend(text_hdr);
    out.extend(data_hdr);
    out.resize(text_raw, 0);
    out.extend_from_slice(text);
    out.extend_from_slice(data);
    out
}

pub fn wrap_macho64(text_va: u64, text: &[u8], data_va: u64, data: &[u8]) -> Vec<u8> {
    const MH_MAGIC_64: u32 = 0xFEED_FACF;
    const LC_SEGMENT_64: u32 = 0x19;
    const CPU_TYPE_ARM64: u32 = 0x0100_000C;

    let cmd_size = 72;
    let cmds_size = 2 * cmd_size;
    let mut file_offset = 32 + cmds_size;

    let mut out = Vec::new();
    out.extend_from_slice(&MH_MAGIC_64.to_le_bytes());
    out.extend_from_slice(&CPU_TYPE_ARM64.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(cmds_size as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let mut raw = Vec::new();
    let mut segment = |name: &[u8; 16], vmaddr: u64, bytes: &[u8], prot: u32| {
        let mut h = Vec::new();
        h.extend_from_slice(&LC_SEGMENT_64.to_le_bytes());
        h.extend_from_slice(&(cmd_size as u32).to_le_bytes());
        h.extend_from_slice(name);
        h.extend_from_slice(&vmaddr.to_le_bytes());
        h.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        h.extend_from_slice(&(file_offset as u64).to_le_bytes());
        h.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        h.extend_from_slice(&prot.to_le_bytes());
        h.extend_from_slice(&prot.to_le_bytes());
        h.extend_from_slice(&0u32.to_le_bytes());
        h.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(bytes);
        file_offset += bytes.len();
        h
    };
    let text_cmd = segment(b"__TEXT\0\0\0\0\0\0\0\0\0\0", text_va, text, 1 | 4);
    let data_cmd = segment(b"__DATA\0\0\0\0\0\0\0\0\0\0", data_va, data, 1 | 2);
    out.extend(text_cmd);
    out.extend(data_cmd);
    out.extend(raw);
    out
}

pub fn wrap_nso(text: &[u8], rodata_va: u32, rodata: &[u8]) -> Vec<u8> {
    let data_seg = [0u8; 0x10];
    let data_va = rodata_va + ((rodata.len() as u32 + 0xFFF) & !0xFFF);

    let text_c = lz4_flex::block::compress(text);
    let rodata_c = lz4_flex::block::compress(rodata);
    let data_c = lz4_flex::block::compress(&data_seg);

    let mut out = Vec::new();
    out.extend_from_slice(&0x304F_534Eu32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0b111u32.to_le_bytes());
    let mut file_offset = 0x100u32;
    let mut seg = |h: &mut Vec<u8>, va: u32, size: u32, stored: u32| {
        h.extend_from_slice(&file_offset.to_le_bytes());
        h.extend_from_slice(&va.to_le_bytes());
        h.extend_from_slice(&size.to_le_bytes());
        file_offset += stored;
    };
    seg(&mut out, 0, text.len() as u32, text_c.len() as u32);
    out.extend_from_slice(&0u32.to_le_bytes());
    seg(&mut out, rodata_va, rodata.len() as u32, rodata_c.len() as u32);
    out.extend_from_slice(&0u32.to_le_bytes());
    seg(&mut out, data_va, data_seg.len() as u32, data_c.len() as u32);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 0x20]);
    out.extend_from_slice(&(text_c.len() as u32).to_le_bytes());
    out.extend_from_slice(&(rodata_c.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data_c.len() as u32).to_le_bytes());
    out.resize(0x100, 0);
    out.extend_from_slice(&text_c);
    out.extend_from_slice(&rodata_c);
    out.extend_from_slice(&data_c);
    out
}

fn leb(mut value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            return out;
        }
    }
}

fn leb_i32(value: i32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut value = value as i64;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        out.push(if done { byte } else { byte | 0x80 });
        if done {
            return out;
        }
    }
}

fn wasm_section(id: u8, contents: &[u8]) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(leb(contents.len() as u32));
    out.extend_from_slice(contents);
    out
}

pub fn wrap_wasm(data_offset: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x6D73_6100u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend(wasm_section(1, &[0x01, 0x60, 0x00, 0x00]));
    out.extend(wasm_section(3, &[0x01, 0x00]));
    out.extend(wasm_section(10, &[0x01, 0x02, 0x00, 0x0B]));

    let mut contents = leb(1);
    contents.push(0x00);
    contents.push(0x41); // i32.const
    contents.extend(leb_i32(data_offset as i32));
    contents.push(0x0B);
    contents.extend(leb(data.len() as u32));
    contents.extend_from_slice(data);
    out.extend(wasm_section(11, &contents));
    out
}
