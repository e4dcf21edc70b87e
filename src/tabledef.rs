//! ECMA-335 attribute masks and the keyword tables derived from them.
//! Mirrors the constants il2cpp carries in `il2cpp-tabledef.h`.

pub const TYPE_ATTRIBUTE_VISIBILITY_MASK: u32 = 0x0000_0007;
pub const TYPE_ATTRIBUTE_NOT_PUBLIC: u32 = 0x0000_0000;
pub const TYPE_ATTRIBUTE_PUBLIC: u32 = 0x0000_0001;
pub const TYPE_ATTRIBUTE_NESTED_PUBLIC: u32 = 0x0000_0002;
pub const TYPE_ATTRIBUTE_NESTED_PRIVATE: u32 = 0x0000_0003;
pub const TYPE_ATTRIBUTE_NESTED_FAMILY: u32 = 0x0000_0004;
pub const TYPE_ATTRIBUTE_NESTED_ASSEMBLY: u32 = 0x0000_0005;
pub const TYPE_ATTRIBUTE_NESTED_FAM_AND_ASSEM: u32 = 0x0000_0006;
pub const TYPE_ATTRIBUTE_NESTED_FAM_OR_ASSEM: u32 = 0x0000_0007;
pub const TYPE_ATTRIBUTE_INTERFACE: u32 = 0x0000_0020;
pub const TYPE_ATTRIBUTE_ABSTRACT: u32 = 0x0000_0080;
pub const TYPE_ATTRIBUTE_SEALED: u32 = 0x0000_0100;

pub const FIELD_ATTRIBUTE_FIELD_ACCESS_MASK: u32 = 0x0007;
pub const FIELD_ATTRIBUTE_PRIVATE: u32 = 0x0001;
pub const FIELD_ATTRIBUTE_FAM_AND_ASSEM: u32 = 0x0002;
pub const FIELD_ATTRIBUTE_ASSEMBLY: u32 = 0x0003;
pub const FIELD_ATTRIBUTE_FAMILY: u32 = 0x0004;
pub const FIELD_ATTRIBUTE_FAM_OR_ASSEM: u32 = 0x0005;
pub const FIELD_ATTRIBUTE_PUBLIC: u32 = 0x0006;
pub const FIELD_ATTRIBUTE_STATIC: u32 = 0x0010;
pub const FIELD_ATTRIBUTE_INIT_ONLY: u32 = 0x0020;
pub const FIELD_ATTRIBUTE_LITERAL: u32 = 0x0040;

pub const METHOD_ATTRIBUTE_MEMBER_ACCESS_MASK: u32 = 0x0007;
pub const METHOD_ATTRIBUTE_PRIVATE: u32 = 0x0001;
pub const METHOD_ATTRIBUTE_FAM_AND_ASSEM: u32 = 0x0002;
pub const METHOD_ATTRIBUTE_ASSEMBLY: u32 = 0x0003;
pub const METHOD_ATTRIBUTE_FAMILY: u32 = 0x0004;
pub const METHOD_ATTRIBUTE_FAM_OR_ASSEM: u32 = 0x0005;
pub const METHOD_ATTRIBUTE_PUBLIC: u32 = 0x0006;
pub const METHOD_ATTRIBUTE_STATIC: u32 = 0x0010;
pub const METHOD_ATTRIBUTE_FINAL: u32 = 0x0020;
pub const METHOD_ATTRIBUTE_VIRTUAL: u32 = 0x0040;
pub const METHOD_ATTRIBUTE_NEW_SLOT: u32 = 0x0100;
pub const METHOD_ATTRIBUTE_ABSTRACT: u32 = 0x0400;
pub const METHOD_ATTRIBUTE_PINVOKE_IMPL: u32 = 0x2000;

pub const PARAM_ATTRIBUTE_IN: u32 = 0x0001;
pub const PARAM_ATTRIBUTE_OUT: u32 = 0x0002;
pub const PARAM_ATTRIBUTE_OPTIONAL: u32 = 0x0010;

/// Access keywords indexed by the three-bit visibility/access value.
const TYPE_ACCESS_KEYWORDS: [&str; 8] = [
    "internal ", // NotPublic
    "public ",
    "public ",    // NestedPublic
    "private ",   // NestedPrivate
    "protected ", // NestedFamily
    "internal ",  // NestedAssembly
    "private protected ",
    "protected internal ",
];

const MEMBER_ACCESS_KEYWORDS: [&str; 8] = [
    "",
    "private ",
    "private protected ",
    "internal ",
    "protected ",
    "protected internal ",
    "public ",
    "",
];

/// Modifier keywords for a type, plus its kind keyword.
pub fn type_modifiers(flags: u32, is_valuetype: bool, is_enum: bool) -> String {
    let mut out = String::new();
    out.push_str(TYPE_ACCESS_KEYWORDS[(flags & TYPE_ATTRIBUTE_VISIBILITY_MASK) as usize]);
    let interface = flags & TYPE_ATTRIBUTE_INTERFACE != 0;
    if !interface && !is_valuetype && !is_enum {
        match (
            flags & TYPE_ATTRIBUTE_ABSTRACT != 0,
            flags & TYPE_ATTRIBUTE_SEALED != 0,
        ) {
            (true, true) => out.push_str("static "),
            (true, false) => out.push_str("abstract "),
            (false, true) => out.push_str("sealed "),
            (false, false) => {}
        }
    }
    out.push_str(if is_enum {
        "enum "
    } else if is_valuetype {
        "struct "
    } else if interface {
        "interface "
    } else {
        "class "
    });
    out
}

pub fn field_modifiers(attrs: u32) -> String {
    let mut out = String::new();
    out.push_str(MEMBER_ACCESS_KEYWORDS[(attrs & FIELD_ATTRIBUTE_FIELD_ACCESS_MASK) as usize]);
    if attrs & FIELD_ATTRIBUTE_LITERAL != 0 {
        out.push_str("const ");
    } else {
        if attrs & FIELD_ATTRIBUTE_STATIC != 0 {
            out.push_str("static ");
        }
        if attrs & FIELD_ATTRIBUTE_INIT_ONLY != 0 {
            out.push_str("readonly ");
        }
    }
    out
}

pub fn method_modifiers(flags: u32) -> String {
    let mut out = String::new();
    out.push_str(MEMBER_ACCESS_KEYWORDS[(flags & METHOD_ATTRIBUTE_MEMBER_ACCESS_MASK) as usize]);
    if flags & METHOD_ATTRIBUTE_STATIC != 0 {
        out.push_str("static ");
    }
    if flags & METHOD_ATTRIBUTE_ABSTRACT != 0 {
        out.push_str("abstract ");
        if flags & METHOD_ATTRIBUTE_NEW_SLOT == 0 {
            out.push_str("override ");
        }
    } else if flags & METHOD_ATTRIBUTE_VIRTUAL != 0 {
        if flags & METHOD_ATTRIBUTE_FINAL != 0 {
            out.push_str("sealed ");
        }
        if flags & METHOD_ATTRIBUTE_NEW_SLOT != 0 {
            out.push_str("virtual ");
        } else {
            out.push_str("override ");
        }
    }
    if flags & METHOD_ATTRIBUTE_PINVOKE_IMPL != 0 {
        out.push_str("extern ");
    }
    out
}

pub fn param_modifiers(attrs: u32, byref: bool) -> &'static str {
    if byref {
        if attrs & PARAM_ATTRIBUTE_OUT != 0 && attrs & PARAM_ATTRIBUTE_IN == 0 {
            "out "
        } else {
            "ref "
        }
    } else if attrs & PARAM_ATTRIBUTE_OPTIONAL != 0 {
        "optional "
    } else {
        ""
    }
}
