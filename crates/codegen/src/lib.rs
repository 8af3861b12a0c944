//! RazorForge LLVM IR code generator.
//!
//! Consumes a fully type-checked AST together with the semantic symbol
//! table and loaded-module registry, and emits a single textual LLVM IR
//! module for a configurable platform triple. The output is meant for
//! the LLVM toolchain (`llc`/`clang`); this crate does not optimize,
//! link, or interpret.
//!
//! # Example
//!
//! ```rust,ignore
//! use rfgen::{CodeGen, CodegenConfig, TargetPlatform};
//!
//! let config = CodegenConfig::new("razorforge", "standard")
//!     .with_target(TargetPlatform::from_triple("x86_64-unknown-linux-gnu")?);
//! let mut codegen = CodeGen::new(config)?;
//! codegen.set_source_file("main.rf");
//! codegen.set_symbol_table(symbols);
//! codegen.set_modules(modules);
//! let ir = codegen.generate(&program)?;
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod crash_messages;
pub mod semantics;

pub use ast::{Node, SourceLocation};
pub use codegen::{Arch, CodeGen, CodeGenError, Os, TargetPlatform};
pub use config::CodegenConfig;
pub use crash_messages::CrashMessages;
pub use semantics::{ModuleRegistry, ProgramBundle, SemanticSymbols};

/// Generate IR for a bare program with defaults: host platform, no
/// imports, empty symbol table.
pub fn generate_ir(program: &Node, config: CodegenConfig) -> Result<String, CodeGenError> {
    let mut codegen = CodeGen::new(config)?;
    codegen.generate(program)
}

/// Generate IR for a full front-end bundle (program plus symbol table
/// and loaded modules).
pub fn generate_ir_for_bundle(
    bundle: ProgramBundle,
    config: CodegenConfig,
) -> Result<String, CodeGenError> {
    let mut codegen = CodeGen::new(config)?;
    if let Some(source_file) = bundle.source_file {
        codegen.set_source_file(source_file);
    }
    codegen.set_symbol_table(bundle.symbols);
    codegen.set_modules(bundle.modules);
    codegen.generate(&bundle.program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ir_minimal_program() {
        let config = CodegenConfig::new("razorforge", "standard")
            .with_target(TargetPlatform::new(Arch::X86_64, Os::Linux).unwrap())
            .with_stdlib_path("/nonexistent");
        let program = Node::Program {
            declarations: vec![],
        };
        let ir = generate_ir(&program, config).unwrap();
        assert!(ir.contains("target triple"));
        assert!(ir.contains("declare void @rf_runtime_init()"));
    }

    #[test]
    fn test_bundle_roundtrip_from_json() {
        let json = r#"{
            "source_file": "demo.rf",
            "program": { "Program": { "declarations": [] } }
        }"#;
        let bundle: ProgramBundle = serde_json::from_str(json).unwrap();
        let config = CodegenConfig::new("razorforge", "standard")
            .with_target(TargetPlatform::new(Arch::X86_64, Os::Linux).unwrap())
            .with_stdlib_path("/nonexistent");
        let ir = generate_ir_for_bundle(bundle, config).unwrap();
        assert!(ir.contains("; ModuleID = 'demo'"));
    }
}
