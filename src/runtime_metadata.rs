//! Runtime metadata stored inside the game binary: the two registration
//! structs and everything they point at. All reads go through the loaded
//! [`Image`]'s virtual address translation and honor its pointer width.

use crate::binary::search::RegistrationAddrs;
use crate::binary::Image;
use crate::error::{Error, Result};
use crate::global_metadata::GlobalMetadata;
use crate::stream::{Stream, Version, V27, V29, V29_1};
use log::debug;
use std::collections::HashMap;

/// Element type tags, ECMA-335 II.23.1.16.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Il2CppTypeEnum {
    End,
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Ptr,
    Byref,
    Valuetype,
    Class,
    /// Class generic parameter
    Var,
    Array,
    Genericinst,
    Typedbyref,
    I,
    U,
    Fnptr,
    Object,
    /// Single-dimensional zero-based array
    Szarray,
    /// Method generic parameter
    Mvar,
    /// Anything this decoder does not recognize. Kept, not fatal: names
    /// render as `UnknownType(<tag>)`.
    Unknown(u8),
}

impl Il2CppTypeEnum {
    pub fn from_ty(ty: u8) -> Self {
        match ty {
            0x00 => Il2CppTypeEnum::End,
            0x01 => Il2CppTypeEnum::Void,
            0x02 => Il2CppTypeEnum::Boolean,
            0x03 => Il2CppTypeEnum::Char,
            0x04 => Il2CppTypeEnum::I1,
            0x05 => Il2CppTypeEnum::U1,
            0x06 => Il2CppTypeEnum::I2,
            0x07 => Il2CppTypeEnum::U2,
            0x08 => Il2CppTypeEnum::I4,
            0x09 => Il2CppTypeEnum::U4,
            0x0A => Il2CppTypeEnum::I8,
            0x0B => Il2CppTypeEnum::U8,
            0x0C => Il2CppTypeEnum::R4,
            0x0D => Il2CppTypeEnum::R8,
            0x0E => Il2CppTypeEnum::String,
            0x0F => Il2CppTypeEnum::Ptr,
            0x10 => Il2CppTypeEnum::Byref,
            0x11 => Il2CppTypeEnum::Valuetype,
            0x12 => Il2CppTypeEnum::Class,
            0x13 => Il2CppTypeEnum::Var,
            0x14 => Il2CppTypeEnum::Array,
            0x15 => Il2CppTypeEnum::Genericinst,
            0x16 => Il2CppTypeEnum::Typedbyref,
            0x18 => Il2CppTypeEnum::I,
            0x19 => Il2CppTypeEnum::U,
            0x1B => Il2CppTypeEnum::Fnptr,
            0x1C => Il2CppTypeEnum::Object,
            0x1D => Il2CppTypeEnum::Szarray,
            0x1E => Il2CppTypeEnum::Mvar,
            other => Il2CppTypeEnum::Unknown(other),
        }
    }
}

/// The decoded `datapoint` union, discriminated by the type tag.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeData {
    TypeDefinitionIndex(i32),
    /// For [`Il2CppTypeEnum::Ptr`] and [`Il2CppTypeEnum::Szarray`]
    TypeIndex(usize),
    /// For [`Il2CppTypeEnum::Var`] and [`Il2CppTypeEnum::Mvar`]
    GenericParameterIndex(i32),
    /// For [`Il2CppTypeEnum::Genericinst`]
    GenericClassIndex(usize),
    /// For [`Il2CppTypeEnum::Array`]
    ArrayTypeIndex(usize),
    /// Unrecognized tag: the raw pointer-sized word
    Raw(u64),
}

#[derive(Clone, Copy, Debug)]
pub struct Il2CppType {
    pub data: TypeData,
    pub attrs: u16,
    pub ty: Il2CppTypeEnum,
    pub byref: bool,
    pub pinned: bool,
    pub valuetype: bool,
}

#[derive(Debug)]
pub struct Il2CppArrayType {
    pub elem_type_idx: usize,
    pub rank: u8,
}

#[derive(Debug)]
pub struct Il2CppCodeGenModule {
    /// Module names carry their `.dll` suffix.
    pub name: String,
    pub method_pointers: Vec<u64>,
}

#[derive(Debug)]
pub struct Il2CppCodeRegistration {
    pub reverse_pinvoke_wrappers: Vec<u64>,
    pub generic_method_pointers: Vec<u64>,
    pub generic_adjustor_thunks: u64,
    pub invoker_pointers: Vec<u64>,
    pub custom_attribute_generators: Vec<u64>,
    pub code_gen_modules: Vec<Il2CppCodeGenModule>,
    pub method_pointers: Vec<u64>,
}

/// What a generic class's leading word resolves to: a type definition id
/// in older formats, a type table entry once the field became a pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenericClassType {
    TypeDefinition(i32),
    Type(usize),
}

#[derive(Debug)]
pub struct Il2CppGenericClass {
    pub type_ref: GenericClassType,
    /// Index into [`Il2CppMetadataRegistration::generic_insts`]
    pub class_inst_idx: Option<usize>,
    /// Index into [`Il2CppMetadataRegistration::generic_insts`]
    pub method_inst_idx: Option<usize>,
}

/// A list of type arguments for one generic instantiation.
#[derive(Debug)]
pub struct Il2CppGenericInst {
    /// Indices into [`Il2CppMetadataRegistration::types`]
    pub types: Vec<usize>,
}

/// One concrete instantiation of a generic method.
#[derive(Debug)]
pub struct Il2CppMethodSpec {
    pub method_definition_index: i32,
    pub class_inst_index: i32,
    pub method_inst_index: i32,
}

#[derive(Debug)]
pub struct Il2CppGenericMethodFunctionsDefinitions {
    /// Index into [`Il2CppMetadataRegistration::method_specs`]
    pub generic_method_index: u32,
    /// Index into [`Il2CppCodeRegistration::generic_method_pointers`]
    pub method_index: u32,
    pub invoker_index: u32,
    pub adjustor_thunk_index: u32,
}

/// Compiler calculated values.
#[derive(Debug, Default)]
pub struct Il2CppTypeDefinitionSizes {
    pub instance_size: u32,
    pub native_size: i32,
    pub static_fields_size: u32,
    pub thread_static_fields_size: u32,
}

#[derive(Debug)]
pub struct Il2CppMetadataRegistration {
    pub generic_classes: Vec<Il2CppGenericClass>,
    pub generic_insts: Vec<Il2CppGenericInst>,
    pub generic_method_table: Vec<Il2CppGenericMethodFunctionsDefinitions>,
    pub types: Vec<Il2CppType>,
    /// Not a real runtime table; array descriptors deduplicated by address
    /// so types can refer to them by index.
    pub array_types: Vec<Il2CppArrayType>,
    pub method_specs: Vec<Il2CppMethodSpec>,
    /// Per type definition, the compiler calculated field offsets.
    pub field_offsets: Vec<Vec<u32>>,
    pub type_definition_sizes: Vec<Il2CppTypeDefinitionSizes>,
    /// Base address and length of the runtime usage slot array.
    pub metadata_usages_va: u64,
    pub metadata_usages_count: u64,
}

#[derive(Debug)]
pub struct RuntimeMetadata {
    /// Absent when the binary was loaded with zero method bodies.
    pub code_registration: Option<Il2CppCodeRegistration>,
    pub metadata_registration: Il2CppMetadataRegistration,
}

struct VmReader<'img, 'data> {
    image: &'img Image<'data>,
}

impl<'img, 'data> VmReader<'img, 'data> {
    fn word(&self, cur: &mut Stream<'_>) -> Result<u64> {
        cur.read_ptr(self.image.pointer_size)
    }

    fn read_word_arr(&self, va: u64, len: usize) -> Result<Vec<u64>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut cur = self.image.stream_at(va)?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.word(&mut cur)?);
        }
        Ok(out)
    }

    /// Arrays whose storage lands in `.bss` have no file bytes; they read
    /// back as zeroes, like the runtime would see before initialization.
    fn read_word_arr_nullable(&self, va: u64, len: usize) -> Result<Vec<u64>> {
        if va == 0 || !self.image.is_readable(va) {
            return Ok(vec![0; len]);
        }
        self.read_word_arr(va, len)
    }

    /// A `count` word followed by a pointer word, then the pointed-at
    /// word array.
    fn read_len_arr(&self, cur: &mut Stream<'_>) -> Result<Vec<u64>> {
        let count = self.word(cur)? as usize;
        let addr = self.word(cur)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        self.read_word_arr(addr, count)
    }
}

impl Il2CppCodeGenModule {
    fn read(reader: &VmReader<'_, '_>, va: u64) -> Result<Self> {
        let mut cur = reader.image.stream_at(va)?;
        let name_ptr = reader.word(&mut cur)?;
        let name = reader.image.cstr_at(name_ptr)?;
        let count = reader.word(&mut cur)? as usize;
        let addr = reader.word(&mut cur)?;
        let method_pointers = reader.read_word_arr_nullable(addr, count)?;
        Ok(Il2CppCodeGenModule {
            name,
            method_pointers,
        })
    }
}

impl Il2CppCodeRegistration {
    pub fn read(image: &Image<'_>, va: u64, version: Version) -> Result<Self> {
        let reader = VmReader { image };
        let mut cur = image.stream_at(va)?;

        let reverse_pinvoke_wrappers = reader.read_len_arr(&mut cur)?;
        let generic_method_pointers = reader.read_len_arr(&mut cur)?;
        let generic_adjustor_thunks = reader.word(&mut cur)?;
        let invoker_pointers = reader.read_len_arr(&mut cur)?;
        let custom_attribute_generators = reader.read_len_arr(&mut cur)?;
        let module_addrs = reader.read_len_arr(&mut cur)?;
        let mut code_gen_modules = Vec::with_capacity(module_addrs.len());
        for addr in module_addrs {
            code_gen_modules.push(Il2CppCodeGenModule::read(&reader, addr)?);
        }
        // the unresolved call tables sit between the module table and the
        // trailing method pointer table
        if version >= V29 {
            let _unresolved_indirect_call_pointers = reader.word(&mut cur)?;
        }
        if version >= V29_1 {
            let _unresolved_instance_call_pointers = reader.word(&mut cur)?;
            let _unresolved_static_call_pointers = reader.word(&mut cur)?;
        }
        let count = reader.word(&mut cur)? as usize;
        let addr = reader.word(&mut cur)?;
        let method_pointers = reader.read_word_arr_nullable(addr, count)?;

        debug!(
            "CodeRegistration: {} modules, {} method pointers, {} generic method pointers",
            code_gen_modules.len(),
            method_pointers.len(),
            generic_method_pointers.len()
        );
        Ok(Il2CppCodeRegistration {
            reverse_pinvoke_wrappers,
            generic_method_pointers,
            generic_adjustor_thunks,
            invoker_pointers,
            custom_attribute_generators,
            code_gen_modules,
            method_pointers,
        })
    }
}

impl Il2CppType {
    #[allow(clippy::too_many_arguments)]
    fn read(
        reader: &VmReader<'_, '_>,
        va: u64,
        version: Version,
        type_map: &HashMap<u64, usize>,
        generic_class_map: &HashMap<u64, usize>,
        array_types: &mut Vec<Il2CppArrayType>,
        array_type_map: &mut HashMap<u64, usize>,
    ) -> Result<Il2CppType> {
        let mut cur = reader.image.stream_at(va)?;
        let datapoint = reader.word(&mut cur)?;
        let attrs = cur.read_u16()?;
        let tag = cur.read_u8()?;
        let bitfield = cur.read_u8()?;
        let ty = Il2CppTypeEnum::from_ty(tag);

        let (byref, pinned, valuetype) = if version >= V27 {
            (bitfield & 0x20 != 0, bitfield & 0x40 != 0, bitfield & 0x80 != 0)
        } else {
            (bitfield & 0x40 != 0, bitfield & 0x80 != 0, false)
        };

        let lookup = |map: &HashMap<u64, usize>, what: &str| {
            map.get(&datapoint).copied().ok_or_else(|| {
                Error::MalformedBinary(format!(
                    "Il2CppType at {va:#x}: {what} pointer {datapoint:#x} is not in its table"
                ))
            })
        };
        let data = match ty {
            Il2CppTypeEnum::Var | Il2CppTypeEnum::Mvar => {
                TypeData::GenericParameterIndex(datapoint as i32)
            }
            Il2CppTypeEnum::Ptr | Il2CppTypeEnum::Szarray => {
                TypeData::TypeIndex(lookup(type_map, "type")?)
            }
            Il2CppTypeEnum::Genericinst => {
                TypeData::GenericClassIndex(lookup(generic_class_map, "generic class")?)
            }
            Il2CppTypeEnum::Array => {
                let idx = match array_type_map.get(&datapoint) {
                    Some(idx) => *idx,
                    None => {
                        let idx = array_types.len();
                        array_types.push(Il2CppArrayType::read(reader, datapoint, type_map)?);
                        array_type_map.insert(datapoint, idx);
                        idx
                    }
                };
                TypeData::ArrayTypeIndex(idx)
            }
            Il2CppTypeEnum::Unknown(_) => TypeData::Raw(datapoint),
            _ => TypeData::TypeDefinitionIndex(datapoint as i32),
        };

        Ok(Il2CppType {
            data,
            attrs,
            ty,
            byref,
            pinned,
            valuetype,
        })
    }
}

impl Il2CppArrayType {
    fn read(reader: &VmReader<'_, '_>, va: u64, type_map: &HashMap<u64, usize>) -> Result<Self> {
        let mut cur = reader.image.stream_at(va)?;
        let elem_ptr = reader.word(&mut cur)?;
        let elem_type_idx = type_map.get(&elem_ptr).copied().ok_or_else(|| {
            Error::MalformedBinary(format!(
                "array descriptor at {va:#x}: element type {elem_ptr:#x} is not in the type table"
            ))
        })?;
        let rank = cur.read_u8()?;
        Ok(Il2CppArrayType { elem_type_idx, rank })
    }
}

impl Il2CppGenericClass {
    fn read(
        reader: &VmReader<'_, '_>,
        va: u64,
        version: Version,
        type_map: &HashMap<u64, usize>,
        generic_inst_map: &HashMap<u64, usize>,
    ) -> Result<Self> {
        let mut cur = reader.image.stream_at(va)?;
        let head = reader.word(&mut cur)?;
        let type_ref = if version >= V27 {
            GenericClassType::Type(type_map.get(&head).copied().ok_or_else(|| {
                Error::MalformedBinary(format!(
                    "generic class at {va:#x}: type pointer {head:#x} is not in the type table"
                ))
            })?)
        } else {
            GenericClassType::TypeDefinition(head as i32)
        };
        let class_inst = reader.word(&mut cur)?;
        let method_inst = reader.word(&mut cur)?;
        Ok(Il2CppGenericClass {
            type_ref,
            class_inst_idx: generic_inst_map.get(&class_inst).copied(),
            method_inst_idx: generic_inst_map.get(&method_inst).copied(),
        })
    }
}

impl Il2CppGenericInst {
    fn read(reader: &VmReader<'_, '_>, va: u64, type_map: &HashMap<u64, usize>) -> Result<Self> {
        let mut cur = reader.image.stream_at(va)?;
        let type_ptrs = reader.read_len_arr(&mut cur)?;
        let mut types = Vec::with_capacity(type_ptrs.len());
        for ptr in type_ptrs {
            types.push(type_map.get(&ptr).copied().ok_or_else(|| {
                Error::MalformedBinary(format!(
                    "generic inst at {va:#x}: argument type {ptr:#x} is not in the type table"
                ))
            })?);
        }
        Ok(Il2CppGenericInst { types })
    }
}

impl Il2CppMetadataRegistration {
    pub fn read(
        image: &Image<'_>,
        va: u64,
        version: Version,
        metadata: &GlobalMetadata<'_>,
    ) -> Result<Self> {
        let reader = VmReader { image };
        let mut cur = image.stream_at(va)?;

        let generic_class_addrs = reader.read_len_arr(&mut cur)?;
        let generic_inst_addrs = reader.read_len_arr(&mut cur)?;
        let generic_method_table_count = reader.word(&mut cur)? as usize;
        let generic_method_table_addr = reader.word(&mut cur)?;
        let type_addrs = reader.read_len_arr(&mut cur)?;
        let method_specs_count = reader.word(&mut cur)? as usize;
        let method_specs_addr = reader.word(&mut cur)?;
        let field_offsets_count = reader.word(&mut cur)? as usize;
        let field_offsets_addr = reader.word(&mut cur)?;
        let type_definition_sizes_count = reader.word(&mut cur)? as usize;
        let type_definition_sizes_addr = reader.word(&mut cur)?;
        let metadata_usages_count = reader.word(&mut cur)?;
        let metadata_usages_va = reader.word(&mut cur)?;

        let mut generic_inst_map = HashMap::new();
        for (i, &addr) in generic_inst_addrs.iter().enumerate() {
            generic_inst_map.insert(addr, i);
        }
        let mut type_map = HashMap::new();
        for (i, &addr) in type_addrs.iter().enumerate() {
            type_map.insert(addr, i);
        }

        let mut generic_classes = Vec::with_capacity(generic_class_addrs.len());
        let mut generic_class_map = HashMap::new();
        for (i, addr) in generic_class_addrs.into_iter().enumerate() {
            generic_classes.push(Il2CppGenericClass::read(
                &reader,
                addr,
                version,
                &type_map,
                &generic_inst_map,
            )?);
            generic_class_map.insert(addr, i);
        }

        let mut types = Vec::with_capacity(type_addrs.len());
        let mut array_types = Vec::new();
        let mut array_type_map = HashMap::new();
        for &addr in &type_addrs {
            types.push(Il2CppType::read(
                &reader,
                addr,
                version,
                &type_map,
                &generic_class_map,
                &mut array_types,
                &mut array_type_map,
            )?);
        }

        let mut generic_insts = Vec::with_capacity(generic_inst_addrs.len());
        for addr in generic_inst_addrs {
            generic_insts.push(Il2CppGenericInst::read(&reader, addr, &type_map)?);
        }

        let mut generic_method_table = Vec::with_capacity(generic_method_table_count);
        if generic_method_table_count > 0 {
            let mut table = image.stream_at(generic_method_table_addr)?;
            for _ in 0..generic_method_table_count {
                generic_method_table.push(Il2CppGenericMethodFunctionsDefinitions {
                    generic_method_index: table.read_u32()?,
                    method_index: table.read_u32()?,
                    invoker_index: table.read_u32()?,
                    adjustor_thunk_index: table.read_u32()?,
                });
            }
        }

        let mut method_specs = Vec::with_capacity(method_specs_count);
        if method_specs_count > 0 {
            let mut table = image.stream_at(method_specs_addr)?;
            for _ in 0..method_specs_count {
                method_specs.push(Il2CppMethodSpec {
                    method_definition_index: table.read_i32()?,
                    class_inst_index: table.read_i32()?,
                    method_inst_index: table.read_i32()?,
                });
            }
        }

        let size_ptrs =
            reader.read_word_arr_nullable(type_definition_sizes_addr, type_definition_sizes_count)?;
        let mut type_definition_sizes = Vec::with_capacity(size_ptrs.len());
        for addr in size_ptrs {
            if addr == 0 {
                type_definition_sizes.push(Il2CppTypeDefinitionSizes::default());
                continue;
            }
            let mut cur = image.stream_at(addr)?;
            type_definition_sizes.push(Il2CppTypeDefinitionSizes {
                instance_size: cur.read_u32()?,
                native_size: cur.read_i32()?,
                static_fields_size: cur.read_u32()?,
                thread_static_fields_size: cur.read_u32()?,
            });
        }

        let offset_ptrs = reader.read_word_arr_nullable(field_offsets_addr, field_offsets_count)?;
        let mut field_offsets = Vec::with_capacity(offset_ptrs.len());
        for (i, addr) in offset_ptrs.into_iter().enumerate() {
            if addr == 0 {
                field_offsets.push(Vec::new());
                continue;
            }
            let count = metadata
                .type_definitions
                .get(i)
                .map(|td| td.field_count as usize)
                .unwrap_or(0);
            let mut cur = image.stream_at(addr)?;
            field_offsets.push(cur.read_u32_vec(count)?);
        }

        debug!(
            "MetadataRegistration: {} types, {} generic insts, {} method specs",
            types.len(),
            generic_insts.len(),
            method_specs.len()
        );
        Ok(Il2CppMetadataRegistration {
            generic_classes,
            generic_insts,
            generic_method_table,
            types,
            array_types,
            method_specs,
            field_offsets,
            type_definition_sizes,
            metadata_usages_va,
            metadata_usages_count,
        })
    }
}

impl RuntimeMetadata {
    /// Reads both registration structs from a located binary.
    pub fn read(
        image: &Image<'_>,
        addrs: &RegistrationAddrs,
        version: Version,
        metadata: &GlobalMetadata<'_>,
    ) -> Result<Self> {
        let code_registration = match addrs.code_registration {
            Some(va) => Some(Il2CppCodeRegistration::read(image, va, version)?),
            None => None,
        };
        let metadata_registration =
            Il2CppMetadataRegistration::read(image, addrs.metadata_registration, version, metadata)?;
        Ok(RuntimeMetadata {
            code_registration,
            metadata_registration,
        })
    }
}
