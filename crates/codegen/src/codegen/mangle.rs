//! Name mangling for LLVM IR symbols.
//!
//! RazorForge routine names can carry a trailing `!` (throwable) or `?`
//! (try), dotted receivers (`Point.scale`), and generic argument lists
//! (`List<s32>`). None of those characters are valid in an LLVM IR
//! identifier, so every name passes through here before emission.

/// Built-in type names whose `!`/`?` forms denote checked constructors
/// rather than user routines.
const BUILTIN_TYPE_NAMES: &[&str] = &[
    "s8", "s16", "s32", "s64", "s128", "u8", "u16", "u32", "u64", "u128", "saddr", "uaddr",
    "iptr", "uptr", "f16", "f32", "f64", "f128", "bool", "text", "letter", "letter8", "letter16",
    "letter32",
];

/// Whether a name is one of the built-in scalar/text type names.
pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPE_NAMES.contains(&name)
}

/// Sanitize a routine or member name into a valid LLVM IR identifier.
///
/// - `Type!` (built-in `Type`) becomes `Type___create___throwable`
/// - `Type?` (built-in `Type`) becomes `try_Type___create__`
/// - any other trailing `!` becomes `_throwable`, `?` becomes `_try`
/// - dots (member access) become underscores
/// - `<`, `>`, `,` and spaces (generic argument lists) become underscores
pub fn sanitize_name(name: &str) -> String {
    let (base, suffix) = if let Some(stripped) = name.strip_suffix('!') {
        if is_builtin_type(stripped) {
            return format!("{}___create___throwable", stripped);
        }
        (stripped, "_throwable")
    } else if let Some(stripped) = name.strip_suffix('?') {
        if is_builtin_type(stripped) {
            return format!("try_{}___create__", stripped);
        }
        (stripped, "_try")
    } else {
        (name, "")
    };

    let mut result = String::with_capacity(base.len() + suffix.len());
    for c in base.chars() {
        match c {
            '.' | '<' | '>' | ',' | ' ' => result.push('_'),
            '_' | '$' => result.push(c),
            c if c.is_alphanumeric() => result.push(c),
            // Any other character gets hex-encoded
            _ => result.push_str(&format!("_x{:02X}_", c as u32)),
        }
    }
    result.push_str(suffix);
    result
}

/// Normalize a single generic type argument for use in a mangled name.
///
/// Nested angle brackets and commas collapse to underscores so that
/// `Pair<s32, text>` contributes `Pair_s32__text_`.
pub fn normalize_type_arg(arg: &str) -> String {
    arg.trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ',' | ' ' | '.' => '_',
            c => c,
        })
        .collect()
}

/// Compute the monomorphic name for a generic instantiation:
/// `name_arg1_arg2...` with each argument normalized.
pub fn monomorphic_name(base: &str, args: &[String]) -> String {
    let mut result = sanitize_name(base);
    for arg in args {
        result.push('_');
        result.push_str(&normalize_type_arg(arg));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(sanitize_name("add"), "add");
        assert_eq!(sanitize_name("compute_sum"), "compute_sum");
    }

    #[test]
    fn test_member_call_dots() {
        assert_eq!(sanitize_name("Point.scale"), "Point_scale");
        assert_eq!(sanitize_name("Console.show_line"), "Console_show_line");
    }

    #[test]
    fn test_throwable_suffix() {
        assert_eq!(sanitize_name("parse!"), "parse_throwable");
        assert_eq!(sanitize_name("s32!"), "s32___create___throwable");
    }

    #[test]
    fn test_try_suffix() {
        assert_eq!(sanitize_name("parse?"), "parse_try");
        assert_eq!(sanitize_name("u64?"), "try_u64___create__");
    }

    #[test]
    fn test_generic_receiver_name() {
        assert_eq!(sanitize_name("Text<letter8>.to_cstr"), "Text_letter8__to_cstr");
    }

    #[test]
    fn test_monomorphic_name() {
        assert_eq!(
            monomorphic_name("id", &["s32".to_string()]),
            "id_s32"
        );
        assert_eq!(
            monomorphic_name("pair", &["s32".to_string(), "text".to_string()]),
            "pair_s32_text"
        );
    }

    #[test]
    fn test_monomorphic_name_nested_generics() {
        assert_eq!(
            monomorphic_name("wrap", &["List<s32>".to_string()]),
            "wrap_List_s32_"
        );
    }

    #[test]
    fn test_monomorphic_name_is_pure() {
        let a = monomorphic_name("id", &["s32".to_string()]);
        let b = monomorphic_name("id", &["s32".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_mangle_parse_roundtrip() {
        // Arguments without bare underscores survive splitting the tail
        let args = vec!["s32".to_string(), "f64".to_string()];
        let mangled = monomorphic_name("id", &args);
        let tail = mangled.strip_prefix("id_").unwrap();
        let parsed: Vec<String> = tail.split('_').map(str::to_string).collect();
        assert_eq!(parsed, args);
    }
}
