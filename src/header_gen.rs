//! `il2cpp.h` writer: one C struct per managed type, fields in declaration
//! order, forward declarations first and full definitions in value-field
//! dependency order. Value-type cycles fall back to the forward
//! declaration with a comment.

use crate::error::Result;
use crate::executor::Executor;
use crate::runtime_metadata::{Il2CppTypeEnum, TypeData};
use crate::tabledef::{FIELD_ATTRIBUTE_LITERAL, FIELD_ATTRIBUTE_STATIC};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// A C-safe identifier derived from a managed type name.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn c_primitive(tag: Il2CppTypeEnum) -> Option<&'static str> {
    Some(match tag {
        Il2CppTypeEnum::Boolean => "uint8_t",
        Il2CppTypeEnum::Char => "uint16_t",
        Il2CppTypeEnum::I1 => "int8_t",
        Il2CppTypeEnum::U1 => "uint8_t",
        Il2CppTypeEnum::I2 => "int16_t",
        Il2CppTypeEnum::U2 => "uint16_t",
        Il2CppTypeEnum::I4 => "int32_t",
        Il2CppTypeEnum::U4 => "uint32_t",
        Il2CppTypeEnum::I8 => "int64_t",
        Il2CppTypeEnum::U8 => "uint64_t",
        Il2CppTypeEnum::R4 => "float",
        Il2CppTypeEnum::R8 => "double",
        Il2CppTypeEnum::I => "intptr_t",
        Il2CppTypeEnum::U => "uintptr_t",
        Il2CppTypeEnum::Fnptr => "intptr_t",
        _ => return None,
    })
}

struct StructField {
    c_type: String,
    name: String,
    /// Type definition this field embeds by value, if any.
    value_dep: Option<usize>,
}

struct StructDef {
    c_name: String,
    fields: Vec<StructField>,
}

pub fn generate_header(executor: &mut Executor<'_, '_>) -> Result<String> {
    let md = executor.metadata;
    let def_count = md.type_definitions.len();

    // unique C names for every type definition
    let mut used = HashSet::new();
    let mut c_names = Vec::with_capacity(def_count);
    for def_idx in 0..def_count {
        let mut name = sanitize(&executor.type_def_full_name(def_idx as i32, false)?);
        if !used.insert(name.clone()) {
            name = format!("{name}_{def_idx}");
            used.insert(name.clone());
        }
        c_names.push(name);
    }

    let mut out = String::new();
    out.push_str("// generated from il2cpp metadata\n");
    out.push_str("#include <stdint.h>\n\n");

    // enums become typedefs of their underlying type and never take part
    // in the dependency order
    let mut is_enum = vec![false; def_count];
    for (def_idx, def) in md.type_definitions.iter().enumerate() {
        if !def.is_enum() {
            continue;
        }
        is_enum[def_idx] = true;
        let underlying = def
            .element_type_index
            .try_into()
            .ok()
            .and_then(|idx: usize| executor.types().get(idx))
            .and_then(|ty| c_primitive(ty.ty))
            .unwrap_or("int32_t");
        let _ = writeln!(out, "typedef {underlying} {};", c_names[def_idx]);
    }
    out.push('\n');

    for (def_idx, c_name) in c_names.iter().enumerate() {
        if !is_enum[def_idx] {
            let _ = writeln!(out, "struct {c_name};");
        }
    }
    out.push('\n');

    // collect field layouts
    let mut structs = Vec::with_capacity(def_count);
    for (def_idx, def) in md.type_definitions.iter().enumerate() {
        let mut fields = Vec::new();
        if !is_enum[def_idx] {
            for field in md.fields_of(def)? {
                if field.type_index < 0 {
                    continue;
                }
                let type_idx = field.type_index as usize;
                let Some(ty) = executor.types().get(type_idx).copied() else {
                    continue;
                };
                let attrs = ty.attrs as u32;
                if attrs & (FIELD_ATTRIBUTE_STATIC | FIELD_ATTRIBUTE_LITERAL) != 0 {
                    continue;
                }
                let (c_type, value_dep) = field_c_type(&c_names, &is_enum, &ty);
                fields.push(StructField {
                    c_type,
                    name: sanitize(md.string(field.name_index)?),
                    value_dep,
                });
            }
        }
        structs.push(StructDef {
            c_name: c_names[def_idx].clone(),
            fields,
        });
    }

    // topological emission over value-field dependencies
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unvisited,
        Visiting,
        Done,
    }
    let mut state = vec![State::Unvisited; def_count];
    let mut order = Vec::with_capacity(def_count);
    let mut cycles = HashMap::new();

    fn visit(
        idx: usize,
        structs: &[StructDef],
        state: &mut [State],
        order: &mut Vec<usize>,
        cycles: &mut HashMap<usize, usize>,
    ) {
        match state[idx] {
            State::Done => return,
            State::Visiting => return, // cycle, recorded by the caller
            State::Unvisited => {}
        }
        state[idx] = State::Visiting;
        for field in &structs[idx].fields {
            if let Some(dep) = field.value_dep {
                if state[dep] == State::Visiting {
                    cycles.insert(idx, dep);
                } else {
                    visit(dep, structs, state, order, cycles);
                }
            }
        }
        state[idx] = State::Done;
        order.push(idx);
    }

    for idx in 0..def_count {
        visit(idx, &structs, &mut state, &mut order, &mut cycles);
    }

    for idx in order {
        if is_enum[idx] {
            continue;
        }
        let def = &structs[idx];
        if let Some(dep) = cycles.get(&idx) {
            let _ = writeln!(
                out,
                "// value-type cycle with {}; left incomplete above",
                structs[*dep].c_name
            );
        }
        let _ = writeln!(out, "struct {} {{", def.c_name);
        if def.fields.is_empty() {
            out.push_str("  // no instance fields\n");
        }
        for field in &def.fields {
            let _ = writeln!(out, "  {} {};", field.c_type, field.name);
        }
        out.push_str("};\n\n");
    }

    Ok(out)
}

/// C rendering of one field type: value types embed, reference types are
/// pointers, everything opaque decays to `void*`.
fn field_c_type(
    c_names: &[String],
    is_enum: &[bool],
    ty: &crate::runtime_metadata::Il2CppType,
) -> (String, Option<usize>) {
    if let Some(prim) = c_primitive(ty.ty) {
        return (prim.to_owned(), None);
    }
    match (ty.ty, ty.data) {
        (Il2CppTypeEnum::Valuetype, TypeData::TypeDefinitionIndex(def)) if def >= 0 => {
            let def = def as usize;
            match c_names.get(def) {
                Some(name) if is_enum[def] => (name.clone(), None),
                Some(name) => (format!("struct {name}"), Some(def)),
                None => ("void*".to_owned(), None),
            }
        }
        (Il2CppTypeEnum::Class, TypeData::TypeDefinitionIndex(def)) if def >= 0 => {
            match c_names.get(def as usize) {
                Some(name) => (format!("struct {name}*"), None),
                None => ("void*".to_owned(), None),
            }
        }
        (Il2CppTypeEnum::String | Il2CppTypeEnum::Object, _) => ("void*".to_owned(), None),
        (Il2CppTypeEnum::Szarray | Il2CppTypeEnum::Array, _) => ("void*".to_owned(), None),
        (Il2CppTypeEnum::Ptr, _) => ("void*".to_owned(), None),
        _ => ("void*".to_owned(), None),
    }
}
