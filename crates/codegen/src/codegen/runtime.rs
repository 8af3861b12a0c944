//! Runtime function declarations for LLVM IR.
//!
//! Every runtime routine the emitted code may reference is declared here
//! in a single data-driven table, so the declaration block stays
//! consistent across code paths. Declarations whose signatures depend on
//! the target (size_t width, Windows stdio shims) are emitted separately.

use super::platform::{Os, TargetPlatform};
use std::fmt::Write as _;
use std::sync::LazyLock;

/// A runtime function declaration for LLVM IR.
pub struct RuntimeDecl {
    /// LLVM declaration string (e.g. `declare void @rf_crash(ptr)`).
    pub decl: &'static str,
    /// Optional category comment emitted before this entry.
    pub category: Option<&'static str>,
}

/// All fixed-signature runtime declarations, organized by category.
pub static RUNTIME_DECLARATIONS: LazyLock<Vec<RuntimeDecl>> = LazyLock::new(|| {
    vec![
        // C stdio
        RuntimeDecl {
            decl: "declare i32 @printf(ptr, ...)",
            category: Some("; C runtime"),
        },
        RuntimeDecl {
            decl: "declare i32 @puts(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare i32 @putchar(i32)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare i32 @scanf(ptr, ...)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare ptr @fgets(ptr, i32, ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare i32 @fflush(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare void @free(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare void @exit(i32)",
            category: None,
        },
        // Language runtime
        RuntimeDecl {
            decl: "declare void @rf_runtime_init()",
            category: Some("; RazorForge runtime"),
        },
        RuntimeDecl {
            decl: "declare void @rf_crash(ptr)",
            category: None,
        },
        // Slice runtime
        RuntimeDecl {
            decl: "declare void @heap_free(ptr)",
            category: Some("; Slice runtime"),
        },
        RuntimeDecl {
            decl: "declare ptr @slice_address(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare i1 @slice_is_valid(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare ptr @slice_unsafe_ptr(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare ptr @slice_hijack(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare ptr @slice_refer(ptr)",
            category: None,
        },
        // Lock runtime
        RuntimeDecl {
            decl: "declare ptr @rwlock_read_lock(ptr)",
            category: Some("; Lock runtime"),
        },
        RuntimeDecl {
            decl: "declare void @rwlock_read_unlock(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare ptr @mutex_lock(ptr)",
            category: None,
        },
        RuntimeDecl {
            decl: "declare void @mutex_unlock(ptr)",
            category: None,
        },
    ]
});

/// Emit every runtime declaration, including the platform-dependent
/// signatures (allocation sizes are pointer-width, Windows routes stdio
/// handles through `__acrt_iob_func`).
pub fn emit_runtime_decls(ir: &mut String, platform: &TargetPlatform) -> std::fmt::Result {
    for entry in RUNTIME_DECLARATIONS.iter() {
        if let Some(category) = entry.category {
            writeln!(ir, "{}", category)?;
        }
        writeln!(ir, "{}", entry.decl)?;
    }

    let size_t = platform.pointer_int_type();
    writeln!(ir, "declare ptr @malloc({})", size_t)?;
    writeln!(ir, "declare {} @strtol(ptr, ptr, i32)", platform.long_type())?;
    writeln!(ir, "declare ptr @heap_alloc({})", size_t)?;
    writeln!(ir, "declare ptr @stack_alloc({})", size_t)?;
    writeln!(ir, "declare {} @slice_size(ptr)", size_t)?;
    writeln!(
        ir,
        "declare ptr @slice_subslice(ptr, {}, {})",
        size_t, size_t
    )?;

    if platform.os == Os::Windows {
        writeln!(ir, "declare ptr @__acrt_iob_func(i32)")?;
    }
    writeln!(ir)
}
