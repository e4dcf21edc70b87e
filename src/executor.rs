//! The type-graph executor: walks the cross-references between the global
//! metadata and the runtime registration tables to produce fully qualified
//! names, method signatures and virtual addresses.
//!
//! All lookups are read-only over the two parsed inputs; the only state the
//! executor owns is its name memo.

use crate::binary::Image;
use crate::error::{Error, Result};
use crate::global_metadata::{
    GlobalMetadata, Il2CppImageDefinition, Il2CppMethodDefinition, Il2CppTypeDefinition,
};
use crate::runtime_metadata::{
    GenericClassType, Il2CppMethodSpec, Il2CppType, Il2CppTypeEnum, RuntimeMetadata, TypeData,
};
use crate::stream::{Stream, Version};
use crate::tabledef;
use std::collections::HashMap;

pub struct Executor<'md, 'data> {
    pub metadata: &'md GlobalMetadata<'data>,
    pub runtime: &'md RuntimeMetadata,
    pub image: &'md Image<'data>,
    pub version: Version,
    name_cache: HashMap<usize, String>,
}

fn type_def<'a>(
    metadata: &'a GlobalMetadata<'_>,
    def_idx: i32,
) -> Result<&'a Il2CppTypeDefinition> {
    if def_idx < 0 {
        return Err(Error::CorruptIndex {
            table: "type_definitions",
            index: def_idx as i64,
            len: metadata.type_definitions.len(),
        });
    }
    metadata
        .type_definitions
        .get(def_idx as usize)
        .ok_or(Error::CorruptIndex {
            table: "type_definitions",
            index: def_idx as i64,
            len: metadata.type_definitions.len(),
        })
}

fn usize_idx(idx: i32, table: &'static str, len: usize) -> Result<usize> {
    if idx < 0 || idx as usize >= len {
        return Err(Error::CorruptIndex {
            table,
            index: idx as i64,
            len,
        });
    }
    Ok(idx as usize)
}

/// Strips the CLR arity suffix: `List`1` renders as `List`.
fn strip_arity(name: &str) -> &str {
    match name.find('`') {
        Some(pos) => &name[..pos],
        None => name,
    }
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

impl<'md, 'data> Executor<'md, 'data> {
    pub fn new(
        metadata: &'md GlobalMetadata<'data>,
        runtime: &'md RuntimeMetadata,
        image: &'md Image<'data>,
        version: Version,
    ) -> Self {
        Executor {
            metadata,
            runtime,
            image,
            version,
            name_cache: HashMap::new(),
        }
    }

    pub fn types(&self) -> &'md [Il2CppType] {
        &self.runtime.metadata_registration.types
    }

    fn type_at(&self, type_idx: usize) -> Result<&'md Il2CppType> {
        self.types().get(type_idx).ok_or(Error::CorruptIndex {
            table: "types",
            index: type_idx as i64,
            len: self.types().len(),
        })
    }

    /// The bare name of a type table entry. Memoized; generic
    /// instantiations substitute their argument names recursively.
    pub fn type_name(&mut self, type_idx: usize) -> Result<String> {
        if let Some(name) = self.name_cache.get(&type_idx) {
            return Ok(name.clone());
        }
        let name = self.compose_type_name(type_idx)?;
        self.name_cache.insert(type_idx, name.clone());
        Ok(name)
    }

    /// Like [`Executor::type_name`] but with the `ref` modifier rendered,
    /// for use inside signatures.
    pub fn type_name_for_signature(&mut self, type_idx: usize) -> Result<String> {
        let byref = self.type_at(type_idx)?.byref;
        let name = self.type_name(type_idx)?;
        Ok(if byref { format!("ref {name}") } else { name })
    }

    fn compose_type_name(&mut self, type_idx: usize) -> Result<String> {
        let ty = *self.type_at(type_idx)?;
        Ok(match ty.ty {
            Il2CppTypeEnum::Void => "void".to_owned(),
            Il2CppTypeEnum::Boolean => "bool".to_owned(),
            Il2CppTypeEnum::Char => "char".to_owned(),
            Il2CppTypeEnum::I1 => "sbyte".to_owned(),
            Il2CppTypeEnum::U1 => "byte".to_owned(),
            Il2CppTypeEnum::I2 => "short".to_owned(),
            Il2CppTypeEnum::U2 => "ushort".to_owned(),
            Il2CppTypeEnum::I4 => "int".to_owned(),
            Il2CppTypeEnum::U4 => "uint".to_owned(),
            Il2CppTypeEnum::I8 => "long".to_owned(),
            Il2CppTypeEnum::U8 => "ulong".to_owned(),
            Il2CppTypeEnum::R4 => "float".to_owned(),
            Il2CppTypeEnum::R8 => "double".to_owned(),
            Il2CppTypeEnum::String => "string".to_owned(),
            Il2CppTypeEnum::Object => "object".to_owned(),
            Il2CppTypeEnum::I => "IntPtr".to_owned(),
            Il2CppTypeEnum::U => "UIntPtr".to_owned(),
            Il2CppTypeEnum::Fnptr => "IntPtr".to_owned(),
            Il2CppTypeEnum::Typedbyref => "TypedReference".to_owned(),
            Il2CppTypeEnum::Ptr => match ty.data {
                TypeData::TypeIndex(inner) => format!("{}*", self.type_name(inner)?),
                _ => "void*".to_owned(),
            },
            Il2CppTypeEnum::Szarray => match ty.data {
                TypeData::TypeIndex(inner) => format!("{}[]", self.type_name(inner)?),
                _ => "object[]".to_owned(),
            },
            Il2CppTypeEnum::Array => match ty.data {
                TypeData::ArrayTypeIndex(idx) => {
                    let arr = &self.runtime.metadata_registration.array_types[idx];
                    let elem = self.type_name(arr.elem_type_idx)?;
                    let commas = ",".repeat(arr.rank.saturating_sub(1) as usize);
                    format!("{elem}[{commas}]")
                }
                _ => "object[]".to_owned(),
            },
            Il2CppTypeEnum::Var | Il2CppTypeEnum::Mvar => match ty.data {
                TypeData::GenericParameterIndex(idx) => self.generic_parameter_name(idx)?,
                _ => "T".to_owned(),
            },
            Il2CppTypeEnum::Genericinst => match ty.data {
                TypeData::GenericClassIndex(gc_idx) => self.generic_class_name(gc_idx)?,
                _ => "object".to_owned(),
            },
            Il2CppTypeEnum::Unknown(tag) => format!("UnknownType(0x{tag:02X})"),
            // everything else carries a type definition id
            _ => match ty.data {
                TypeData::TypeDefinitionIndex(def) => self.type_def_full_name(def, true)?,
                _ => format!("UnknownType(0x{:02X})", 0xFF),
            },
        })
    }

    fn generic_parameter_name(&self, idx: i32) -> Result<String> {
        let md = self.metadata;
        let idx = usize_idx(idx, "generic_parameters", md.generic_parameters.len())?;
        Ok(md.string(md.generic_parameters[idx].name_index)?.to_owned())
    }

    fn generic_class_name(&mut self, gc_idx: usize) -> Result<String> {
        let rt = self.runtime;
        let gc = rt
            .metadata_registration
            .generic_classes
            .get(gc_idx)
            .ok_or(Error::CorruptIndex {
                table: "generic_classes",
                index: gc_idx as i64,
                len: rt.metadata_registration.generic_classes.len(),
            })?;
        let base = match gc.type_ref {
            GenericClassType::TypeDefinition(def) => self.type_def_full_name(def, false)?,
            GenericClassType::Type(type_idx) => match self.type_at(type_idx)?.data {
                TypeData::TypeDefinitionIndex(def) => self.type_def_full_name(def, false)?,
                _ => self.type_name(type_idx)?,
            },
        };
        let args = match gc.class_inst_idx {
            Some(inst_idx) => self.generic_inst_args(inst_idx)?,
            None => String::new(),
        };
        Ok(format!("{base}<{args}>"))
    }

    pub fn generic_inst_args(&mut self, inst_idx: usize) -> Result<String> {
        let rt = self.runtime;
        let inst = rt
            .metadata_registration
            .generic_insts
            .get(inst_idx)
            .ok_or(Error::CorruptIndex {
                table: "generic_insts",
                index: inst_idx as i64,
                len: rt.metadata_registration.generic_insts.len(),
            })?;
        let mut args = Vec::with_capacity(inst.types.len());
        for &type_idx in &inst.types {
            args.push(self.type_name(type_idx)?);
        }
        Ok(args.join(", "))
    }

    /// Generic parameter names of a container, `T, U, ...`.
    pub fn container_params(&self, container_idx: i32) -> Result<String> {
        let md = self.metadata;
        if container_idx < 0 {
            return Ok(String::new());
        }
        let container = md
            .generic_containers
            .get(container_idx as usize)
            .ok_or(Error::CorruptIndex {
                table: "generic_containers",
                index: container_idx as i64,
                len: md.generic_containers.len(),
            })?;
        let params = md.generic_parameters_of(container)?;
        let names: Result<Vec<_>> = params
            .iter()
            .map(|p| md.string(p.name_index).map(str::to_owned))
            .collect();
        Ok(names?.join(", "))
    }

    /// Fully qualified name of a type definition: namespace, enclosing
    /// types, arity-stripped name, and optionally its own `<T, ...>` list.
    pub fn type_def_full_name(&mut self, def_idx: i32, generics: bool) -> Result<String> {
        let md = self.metadata;
        let def = type_def(md, def_idx)?;
        let name = strip_arity(md.string(def.name_index)?).to_owned();

        let mut full = if def.declaring_type_index >= 0 {
            let declaring = self.type_at(def.declaring_type_index as usize)?;
            let outer = match declaring.data {
                TypeData::TypeDefinitionIndex(outer_def) => {
                    self.type_def_full_name(outer_def, false)?
                }
                _ => self.type_name(def.declaring_type_index as usize)?,
            };
            format!("{outer}.{name}")
        } else {
            let namespace = md.string(def.namespace_index)?;
            if namespace.is_empty() {
                name
            } else {
                format!("{namespace}.{name}")
            }
        };
        if generics && def.generic_container_index >= 0 {
            full.push('<');
            full.push_str(&self.container_params(def.generic_container_index)?);
            full.push('>');
        }
        Ok(full)
    }

    /// Declaration-site name: arity-stripped short name plus generic
    /// parameters, no namespace.
    pub fn type_def_decl_name(&mut self, def_idx: i32) -> Result<String> {
        let md = self.metadata;
        let def = type_def(md, def_idx)?;
        let mut name = strip_arity(md.string(def.name_index)?).to_owned();
        if def.generic_container_index >= 0 {
            name.push('<');
            name.push_str(&self.container_params(def.generic_container_index)?);
            name.push('>');
        }
        Ok(name)
    }

    /// RVA of a virtual address, relative to the image base.
    pub fn rva(&self, va: u64) -> u64 {
        va.wrapping_sub(self.image.image_base)
    }

    /// Native address of a regular method through the owning image's code
    /// gen module. `None` when the method has no body, the module is
    /// missing, or the slot is null.
    pub fn method_va(
        &self,
        image: &Il2CppImageDefinition,
        method: &Il2CppMethodDefinition,
    ) -> Option<u64> {
        if method.method_index < 0 {
            return None;
        }
        let cr = self.runtime.code_registration.as_ref()?;
        let image_name = self.metadata.string(image.name_index).ok()?;
        let module = cr.code_gen_modules.iter().find(|m| m.name == image_name)?;
        let va = module
            .method_pointers
            .get(method.method_index as usize)
            .copied()?;
        if va == 0 {
            None
        } else {
            Some(va)
        }
    }

    /// Native address of a generic method instantiation through the
    /// generic method table.
    pub fn generic_method_va(&self, spec_idx: usize) -> Option<u64> {
        let cr = self.runtime.code_registration.as_ref()?;
        let entry = self
            .runtime
            .metadata_registration
            .generic_method_table
            .iter()
            .find(|e| e.generic_method_index as usize == spec_idx)?;
        let va = cr
            .generic_method_pointers
            .get(entry.method_index as usize)
            .copied()?;
        if va == 0 {
            None
        } else {
            Some(va)
        }
    }

    /// `Namespace.Type<args>.Method<args>` for one method spec.
    pub fn generic_method_name(&mut self, spec: &Il2CppMethodSpec) -> Result<String> {
        let md = self.metadata;
        let method_idx = usize_idx(spec.method_definition_index, "methods", md.methods.len())?;
        let method = &md.methods[method_idx];
        let mut name = self.type_def_full_name(method.declaring_type, false)?;
        if spec.class_inst_index >= 0 {
            name.push('<');
            name.push_str(&self.generic_inst_args(spec.class_inst_index as usize)?);
            name.push('>');
        }
        name.push('.');
        name.push_str(md.string(method.name_index)?);
        if spec.method_inst_index >= 0 {
            name.push('<');
            name.push_str(&self.generic_inst_args(spec.method_inst_index as usize)?);
            name.push('>');
        }
        Ok(name)
    }

    /// C#-style signature: modifiers, return type, name, generic
    /// parameters and the parameter list.
    pub fn method_signature(&mut self, method: &Il2CppMethodDefinition) -> Result<String> {
        let md = self.metadata;
        let mut sig = tabledef::method_modifiers(method.flags as u32);
        let return_idx = usize_idx(method.return_type, "types", self.types().len())?;
        sig.push_str(&self.type_name_for_signature(return_idx)?);
        sig.push(' ');
        sig.push_str(md.string(method.name_index)?);
        if method.generic_container_index >= 0 {
            sig.push('<');
            sig.push_str(&self.container_params(method.generic_container_index)?);
            sig.push('>');
        }
        sig.push('(');
        let params = md.parameters_of(method)?;
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                sig.push_str(", ");
            }
            let param_idx = usize_idx(param.type_index, "types", self.types().len())?;
            let ty = self.type_at(param_idx)?;
            sig.push_str(tabledef::param_modifiers(ty.attrs as u32, ty.byref));
            sig.push_str(&self.type_name(param_idx)?);
            sig.push(' ');
            sig.push_str(md.string(param.name_index)?);
        }
        sig.push(')');
        Ok(sig)
    }

    /// Renders a field or parameter default value as a C# literal.
    pub fn field_default_literal(&mut self, field_index: i32) -> Option<String> {
        let fdv = self
            .metadata
            .field_default_values
            .iter()
            .find(|d| d.field_index == field_index)?;
        let blob = self.metadata.default_value_blob(fdv.data_index)?;
        if fdv.type_index < 0 {
            return None;
        }
        let ty = self.types().get(fdv.type_index as usize)?;
        render_default(ty.ty, blob)
    }
}

fn render_default(tag: Il2CppTypeEnum, blob: &[u8]) -> Option<String> {
    let mut s = Stream::new(blob);
    Some(match tag {
        Il2CppTypeEnum::Boolean => {
            let keyword = if s.read_u8().ok()? != 0 { "true" } else { "false" };
            keyword.to_owned()
        }
        Il2CppTypeEnum::Char => {
            let c = s.read_u16().ok()?;
            match char::from_u32(c as u32) {
                Some(c) if !c.is_control() => format!("'{c}'"),
                _ => format!("'\\u{c:04x}'"),
            }
        }
        Il2CppTypeEnum::I1 => s.read_i8().ok()?.to_string(),
        Il2CppTypeEnum::U1 => s.read_u8().ok()?.to_string(),
        Il2CppTypeEnum::I2 => s.read_i16().ok()?.to_string(),
        Il2CppTypeEnum::U2 => s.read_u16().ok()?.to_string(),
        Il2CppTypeEnum::I4 => s.read_i32().ok()?.to_string(),
        Il2CppTypeEnum::U4 => s.read_u32().ok()?.to_string(),
        Il2CppTypeEnum::I8 => s.read_i64().ok()?.to_string(),
        Il2CppTypeEnum::U8 => s.read_u64().ok()?.to_string(),
        Il2CppTypeEnum::R4 => f32::from_bits(s.read_u32().ok()?).to_string() + "f",
        Il2CppTypeEnum::R8 => f64::from_bits(s.read_u64().ok()?).to_string(),
        Il2CppTypeEnum::String => {
            let len = s.read_i32().ok()?;
            if len < 0 {
                return Some("null".to_owned());
            }
            let bytes = s.take(len as usize).ok()?;
            escape_string(&String::from_utf8_lossy(bytes))
        }
        _ => return None,
    })
}
