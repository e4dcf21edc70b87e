//! `dump.cs` writer: a C#-like listing of every image, type and member,
//! annotated with the runtime addresses the executor resolved.

use crate::error::Result;
use crate::executor::Executor;
use crate::global_metadata::Il2CppImageDefinition;
use crate::tabledef;
use crate::DumpConfig;
use std::fmt::Write as _;

pub fn decompile(executor: &mut Executor<'_, '_>, config: &DumpConfig) -> Result<String> {
    let md = executor.metadata;
    let mut out = String::new();

    for (image_idx, image) in md.images.iter().enumerate() {
        let _ = writeln!(
            out,
            "// Image {image_idx}: {} - {}",
            md.string(image.name_index)?,
            image.type_start
        );
    }

    for image in md.images.iter() {
        if image.type_start < 0 {
            continue;
        }
        let start = image.type_start as usize;
        let end = (start + image.type_count as usize).min(md.type_definitions.len());
        for def_idx in start..end {
            write_type(&mut out, executor, config, image, def_idx as i32)?;
        }
    }
    Ok(out)
}

fn write_type(
    out: &mut String,
    executor: &mut Executor<'_, '_>,
    config: &DumpConfig,
    image: &Il2CppImageDefinition,
    def_idx: i32,
) -> Result<()> {
    let md = executor.metadata;
    let def = &md.type_definitions[def_idx as usize];
    out.push('\n');

    if config.dump_attribute {
        let attrs = md.attributes_of(image, def.token, def.custom_attribute_index)?;
        for &attr in attrs {
            if attr >= 0 && (attr as usize) < executor.types().len() {
                let name = executor.type_name(attr as usize)?;
                let _ = writeln!(out, "// [{name}]");
            }
        }
    }

    let _ = writeln!(out, "// Namespace: {}", md.string(def.namespace_index)?);

    let mut decl = tabledef::type_modifiers(def.flags, def.is_valuetype(), def.is_enum());
    decl.push_str(&executor.type_def_decl_name(def_idx)?);
    let mut bases = Vec::new();
    if def.parent_index >= 0 {
        bases.push(executor.type_name(def.parent_index as usize)?);
    }
    for &iface in md.interfaces_of(def)? {
        if iface >= 0 {
            bases.push(executor.type_name(iface as usize)?);
        }
    }
    if !bases.is_empty() {
        decl.push_str(" : ");
        decl.push_str(&bases.join(", "));
    }
    if config.dump_type_def_index {
        let _ = writeln!(out, "{decl} // TypeDefIndex: {def_idx}");
    } else {
        let _ = writeln!(out, "{decl}");
    }
    out.push_str("{\n");
    let mut first_section = true;

    if config.dump_field && def.field_count > 0 {
        section(out, &mut first_section, "// Fields");
        let field_offsets = executor
            .runtime
            .metadata_registration
            .field_offsets
            .get(def_idx as usize)
            .cloned()
            .unwrap_or_default();
        for (i, field) in md.fields_of(def)?.iter().enumerate() {
            let type_idx = field.type_index.max(0) as usize;
            let ty = executor.types().get(type_idx).copied();
            let attrs = ty.map(|t| t.attrs as u32).unwrap_or(0);
            let mut line = String::from("  ");
            line.push_str(&tabledef::field_modifiers(attrs));
            line.push_str(&executor.type_name(type_idx)?);
            line.push(' ');
            line.push_str(md.string(field.name_index)?);
            if let Some(value) = executor.field_default_literal(def.field_start + i as i32) {
                let _ = write!(line, " = {value}");
            }
            line.push(';');
            if config.dump_field_offset {
                let offset = field_offsets.get(i).copied().unwrap_or(0);
                let _ = write!(line, " // 0x{offset:X}");
            }
            let _ = writeln!(out, "{line}");
        }
    }

    if config.dump_property && def.property_count > 0 {
        section(out, &mut first_section, "// Properties");
        for prop in md.properties_of(def)? {
            // accessor indices are local to the declaring type
            let getter = accessor(executor, def.method_start, prop.get);
            let setter = accessor(executor, def.method_start, prop.set);
            let (flags, type_idx) = match (getter, setter) {
                (Some((flags, ret, _)), _) => (flags, ret),
                (None, Some((flags, _, params_start))) => (flags, params_start),
                (None, None) => continue,
            };
            let mut line = String::from("  ");
            line.push_str(&tabledef::method_modifiers(flags));
            line.push_str(&executor.type_name(type_idx.max(0) as usize)?);
            line.push(' ');
            line.push_str(md.string(prop.name_index)?);
            line.push_str(" {");
            if getter.is_some() {
                line.push_str(" get;");
            }
            if setter.is_some() {
                line.push_str(" set;");
            }
            line.push_str(" }");
            let _ = writeln!(out, "{line}");
        }
    }

    if def.event_count > 0 {
        section(out, &mut first_section, "// Events");
        for event in md.events_of(def)? {
            // add/remove accessor indices are local to the declaring type,
            // like property accessors
            let add = accessor(executor, def.method_start, event.add);
            let remove = accessor(executor, def.method_start, event.remove);
            let flags = match (add, remove) {
                (Some((flags, ..)), _) | (None, Some((flags, ..))) => flags,
                (None, None) => continue,
            };
            let type_idx = event.type_index.max(0) as usize;
            let mut line = String::from("  ");
            line.push_str(&tabledef::method_modifiers(flags));
            line.push_str("event ");
            line.push_str(&executor.type_name(type_idx)?);
            line.push(' ');
            line.push_str(md.string(event.name_index)?);
            line.push(';');
            let _ = writeln!(out, "{line}");
        }
    }

    if config.dump_method && def.method_count > 0 {
        section(out, &mut first_section, "// Methods");
        for method in md.methods_of(def)? {
            if config.dump_method_offset {
                match executor.method_va(image, method) {
                    Some(va) => {
                        let rva = executor.rva(va);
                        if (method.flags as u32 & tabledef::METHOD_ATTRIBUTE_VIRTUAL) != 0 {
                            let _ = writeln!(
                                out,
                                "  // RVA: 0x{rva:X} VA: 0x{va:X} Slot: {}",
                                method.slot
                            );
                        } else {
                            let _ = writeln!(out, "  // RVA: 0x{rva:X} VA: 0x{va:X}");
                        }
                    }
                    None => {
                        let _ = writeln!(out, "  // RVA: -1 VA: -1");
                    }
                }
            }
            let _ = writeln!(out, "  {} {{ }}", executor.method_signature(method)?);
        }
    }

    if def.nested_type_count > 0 {
        section(out, &mut first_section, "// Nested types");
        for &nested in md.nested_types_of(def)? {
            let _ = writeln!(out, "  // {}", executor.type_def_decl_name(nested)?);
        }
    }

    out.push_str("}\n");
    Ok(())
}

/// Looks a property accessor up by its type-local method index. Returns
/// `(flags, return type index, first parameter type index)`.
fn accessor(
    executor: &Executor<'_, '_>,
    method_start: i32,
    local_index: i32,
) -> Option<(u32, i32, i32)> {
    if local_index < 0 {
        return None;
    }
    let method = executor
        .metadata
        .methods
        .get((method_start + local_index) as usize)?;
    let first_param = executor
        .metadata
        .parameters_of(method)
        .ok()
        .and_then(|p| p.first().map(|p| p.type_index))
        .unwrap_or(method.return_type);
    Some((method.flags as u32, method.return_type, first_param))
}

fn section(out: &mut String, first: &mut bool, title: &str) {
    if !*first {
        out.push('\n');
    }
    *first = false;
    out.push_str("  ");
    out.push_str(title);
    out.push('\n');
}
