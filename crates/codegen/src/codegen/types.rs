//! Source-language -> LLVM type mapping.
//!
//! Scalar widths come straight from the type name; architecture-dependent
//! widths (pointer-sized integers, `wchar_t`, C `long`) are resolved
//! through the target platform descriptor. Generic names are parsed with
//! a nesting-aware splitter and dispatched to the generic registry, which
//! hands back a pointer to the mangled struct.
//!
//! Signedness does not exist in LLVM integer types, so it travels
//! out-of-band in [`TypeInfo`](super::state::TypeInfo).

use super::error::CodeGenError;
use super::state::{CodeGen, TypeInfo};
use std::collections::HashMap;

/// Split the argument list of a generic type, honoring nesting.
///
/// A depth counter tracks `<`/`>`; commas at depth zero separate
/// arguments; surrounding whitespace is stripped.
pub(crate) fn split_generic_args(args: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in args.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                result.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        result.push(current.trim().to_string());
    }
    result
}

/// Split `Base<A, B<C>>` into `("Base", "A, B<C>")`. Returns `None` for
/// non-generic names.
pub(crate) fn parse_generic(name: &str) -> Option<(&str, &str)> {
    let open = name.find('<')?;
    let close = name.rfind('>')?;
    if close <= open {
        return None;
    }
    Some((&name[..open], &name[open + 1..close]))
}

/// Replace word-boundary occurrences of `from` with `to`.
///
/// Boundaries are non-identifier characters, so substituting `T` inside
/// `List<T>` does not touch `Text`.
pub(crate) fn replace_word(s: &str, from: &str, to: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    while i < s.len() {
        if s[i..].starts_with(from) {
            let before_ok = i == 0 || !is_word(bytes[i - 1]);
            let end = i + from.len();
            let after_ok = end == s.len() || !is_word(bytes[end]);
            if before_ok && after_ok {
                result.push_str(to);
                i = end;
                continue;
            }
        }
        // Safe: we advance by the char's UTF-8 length
        let c = s[i..].chars().next().unwrap_or('\0');
        result.push(c);
        i += c.len_utf8();
    }
    result
}

impl CodeGen {
    /// Map a source-language type name to its LLVM type name.
    pub(crate) fn map_type(&mut self, source: &str) -> Result<String, CodeGenError> {
        self.map_type_with_substitution(source, &HashMap::new())
    }

    /// Map a type name after applying a generic substitution map.
    ///
    /// A whole-name hit in `subs` wins outright. Otherwise, when the name
    /// carries a generic argument list, each parameter occurrence inside
    /// `<...>` is rewritten (word-boundary match) before mapping.
    pub(crate) fn map_type_with_substitution(
        &mut self,
        source: &str,
        subs: &HashMap<String, String>,
    ) -> Result<String, CodeGenError> {
        let name = source.trim();
        if let Some(concrete) = subs.get(name) {
            return self.map_type_with_substitution(concrete, &HashMap::new());
        }

        let name = if name.contains('<') && !subs.is_empty() {
            let mut rewritten = name.to_string();
            for (param, concrete) in subs {
                rewritten = replace_word(&rewritten, param, concrete);
            }
            rewritten
        } else {
            name.to_string()
        };
        let name = name.as_str();

        // Fixed-width integers and floats
        if let Some(mapped) = scalar_type(name) {
            return Ok(mapped.to_string());
        }

        // Architecture-dependent widths
        match name {
            "saddr" | "iptr" | "uaddr" | "uptr" => {
                return Ok(self.platform.pointer_int_type().to_string());
            }
            "c_long" | "c_ulong" => return Ok(self.platform.long_type().to_string()),
            "c_wchar" => return Ok(self.platform.wide_char_type().to_string()),
            "c_size_t" | "c_ssize_t" | "c_ptrdiff_t" => {
                return Ok(self.platform.pointer_int_type().to_string());
            }
            _ => {}
        }

        // Remaining C FFI aliases with fixed widths
        if let Some(mapped) = c_ffi_type(name) {
            return Ok(mapped.to_string());
        }

        // Generic syntax Base<...>
        if let Some((base, args_str)) = parse_generic(name) {
            let args = split_generic_args(args_str);
            return self.map_generic(base, &args);
        }

        // Menus lower to their discriminant
        if self.generics.is_menu(name) {
            return Ok("i32".to_string());
        }

        // Known records: single-field wrappers pass by value, everything
        // else by pointer
        if let Some(fields) = self.generics.record_fields(name) {
            if fields.len() == 1 {
                return Ok(fields[0].1.clone());
            }
            return Ok("ptr".to_string());
        }

        // Entities and unknown aggregates are reference-typed
        Ok("ptr".to_string())
    }

    fn map_generic(&mut self, base: &str, args: &[String]) -> Result<String, CodeGenError> {
        match base {
            // RawPointer<T> is a pointer to the mapped T; the element is
            // still mapped so nested generics instantiate
            "RawPointer" => {
                if let Some(inner) = args.first() {
                    self.map_type(inner)?;
                }
                Ok("ptr".to_string())
            }
            // Shared<T, Policy> wraps its payload behind a runtime lock
            "Shared" => {
                if let Some(inner) = args.first() {
                    self.map_type(inner)?;
                }
                Ok("ptr".to_string())
            }
            _ => {
                if self.generics.has_record_template(base) {
                    self.instantiate_generic_record(base, args)?;
                    Ok("ptr".to_string())
                } else if self.generics.has_entity_template(base) {
                    self.instantiate_generic_entity(base, args)?;
                    Ok("ptr".to_string())
                } else {
                    Err(CodeGenError::UnsupportedOperation(format!(
                        "unknown generic type '{}<{}>'",
                        base,
                        args.join(", ")
                    )))
                }
            }
        }
    }

    /// Build the [`TypeInfo`] for a source type, resolving its LLVM type
    /// and deriving the out-of-band signedness and float flags.
    pub(crate) fn type_info_for(&mut self, source: &str) -> Result<TypeInfo, CodeGenError> {
        let llvm_type = self.map_type(source)?;
        Ok(TypeInfo {
            is_unsigned: is_unsigned_type(source),
            is_float: is_float_llvm_type(&llvm_type),
            llvm_type,
            source_type: source.trim().to_string(),
        })
    }
}

/// Fixed-width scalars whose mapping does not depend on the platform.
fn scalar_type(name: &str) -> Option<&'static str> {
    let mapped = match name {
        "s8" | "u8" => "i8",
        "s16" | "u16" => "i16",
        "s32" | "u32" => "i32",
        "s64" | "u64" => "i64",
        "s128" | "u128" => "i128",
        "f16" => "half",
        "f32" => "float",
        "f64" => "double",
        "f128" => "fp128",
        "bool" => "i1",
        "letter" | "letter32" => "i32",
        "letter16" => "i16",
        "letter8" => "i8",
        "text" => "ptr",
        _ => return None,
    };
    Some(mapped)
}

/// C FFI aliases with platform-independent widths.
fn c_ffi_type(name: &str) -> Option<&'static str> {
    let mapped = match name {
        "c_char" | "c_uchar" | "c_schar" | "c_bool" => "i8",
        "c_short" | "c_ushort" => "i16",
        "c_int" | "c_uint" => "i32",
        "c_longlong" | "c_ulonglong" => "i64",
        "c_float" => "float",
        "c_double" => "double",
        "c_ptr" | "c_str" => "ptr",
        "c_void" => "void",
        _ => return None,
    };
    Some(mapped)
}

/// Whether a source type name denotes an unsigned integer family member.
pub(crate) fn is_unsigned_type(source: &str) -> bool {
    let name = source.trim();
    matches!(
        name,
        "u8" | "u16"
            | "u32"
            | "u64"
            | "u128"
            | "uaddr"
            | "uptr"
            | "c_uchar"
            | "c_ushort"
            | "c_uint"
            | "c_ulong"
            | "c_ulonglong"
            | "c_size_t"
            | "letter8"
            | "letter16"
            | "letter32"
            | "letter"
    )
}

/// Whether an LLVM type name is a floating-point type.
pub(crate) fn is_float_llvm_type(llvm: &str) -> bool {
    matches!(llvm, "half" | "float" | "double" | "fp128")
}

/// The integer bit width of an LLVM `iN` type name, if it is one.
pub(crate) fn int_width(llvm: &str) -> Option<u32> {
    llvm.strip_prefix('i')?.parse().ok()
}

/// Rank floating-point types by width for trunc/ext selection.
pub(crate) fn float_rank(llvm: &str) -> Option<u32> {
    match llvm {
        "half" => Some(16),
        "float" => Some(32),
        "double" => Some(64),
        "fp128" => Some(128),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CodeGen;

    #[test]
    fn test_split_generic_args_flat() {
        assert_eq!(split_generic_args("s32, text"), vec!["s32", "text"]);
    }

    #[test]
    fn test_split_generic_args_nested() {
        assert_eq!(
            split_generic_args("Pair<s32, u8>, text"),
            vec!["Pair<s32, u8>", "text"]
        );
    }

    #[test]
    fn test_parse_generic() {
        assert_eq!(parse_generic("List<s32>"), Some(("List", "s32")));
        assert_eq!(
            parse_generic("Map<text, List<s32>>"),
            Some(("Map", "text, List<s32>"))
        );
        assert_eq!(parse_generic("s32"), None);
    }

    #[test]
    fn test_replace_word_boundaries() {
        assert_eq!(replace_word("List<T>", "T", "s32"), "List<s32>");
        // Does not touch 'Text' when substituting 'T'
        assert_eq!(replace_word("Map<T, Text>", "T", "u8"), "Map<u8, Text>");
    }

    #[test]
    fn test_scalar_mapping() {
        let mut codegen = CodeGen::for_tests();
        assert_eq!(codegen.map_type("s32").unwrap(), "i32");
        assert_eq!(codegen.map_type("u64").unwrap(), "i64");
        assert_eq!(codegen.map_type("f64").unwrap(), "double");
        assert_eq!(codegen.map_type("bool").unwrap(), "i1");
        assert_eq!(codegen.map_type("text").unwrap(), "ptr");
        assert_eq!(codegen.map_type("letter8").unwrap(), "i8");
    }

    #[test]
    fn test_platform_dependent_mapping() {
        // Test platform is x86_64-linux: 64-bit pointers, 64-bit long
        let mut codegen = CodeGen::for_tests();
        assert_eq!(codegen.map_type("saddr").unwrap(), "i64");
        assert_eq!(codegen.map_type("uaddr").unwrap(), "i64");
        assert_eq!(codegen.map_type("c_long").unwrap(), "i64");
        assert_eq!(codegen.map_type("c_wchar").unwrap(), "i32");
    }

    #[test]
    fn test_raw_pointer_mapping() {
        let mut codegen = CodeGen::for_tests();
        assert_eq!(codegen.map_type("RawPointer<u8>").unwrap(), "ptr");
        assert_eq!(codegen.map_type("RawPointer<text>").unwrap(), "ptr");
    }

    #[test]
    fn test_substitution_whole_name() {
        let mut codegen = CodeGen::for_tests();
        let subs = HashMap::from([("T".to_string(), "s64".to_string())]);
        assert_eq!(
            codegen.map_type_with_substitution("T", &subs).unwrap(),
            "i64"
        );
    }

    #[test]
    fn test_substitution_inside_generic() {
        let mut codegen = CodeGen::for_tests();
        let subs = HashMap::from([("T".to_string(), "u8".to_string())]);
        assert_eq!(
            codegen
                .map_type_with_substitution("RawPointer<T>", &subs)
                .unwrap(),
            "ptr"
        );
    }

    #[test]
    fn test_substitution_equals_pre_applied_map() {
        let mut codegen = CodeGen::for_tests();
        let subs = HashMap::from([("T".to_string(), "s32".to_string())]);
        let with_subs = codegen
            .map_type_with_substitution("RawPointer<T>", &subs)
            .unwrap();
        let pre_applied = codegen.map_type("RawPointer<s32>").unwrap();
        assert_eq!(with_subs, pre_applied);
    }

    #[test]
    fn test_signedness_flags() {
        assert!(is_unsigned_type("u32"));
        assert!(is_unsigned_type("uaddr"));
        assert!(!is_unsigned_type("s32"));
        assert!(!is_unsigned_type("f64"));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mut codegen = CodeGen::for_tests();
        let a = codegen.map_type("RawPointer<s32>").unwrap();
        let b = codegen.map_type("RawPointer<s32>").unwrap();
        assert_eq!(a, b);
    }
}
