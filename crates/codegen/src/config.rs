//! Code generator configuration.
//!
//! Front-end drivers construct a [`CodegenConfig`] once and hand it to
//! [`CodeGen::new`](crate::CodeGen::new). Everything not set here is
//! supplied post-construction through setters (source file name, symbol
//! table, loaded modules), matching the order in which a compiler driver
//! learns those facts.

use crate::codegen::TargetPlatform;
use serde::Deserialize;
use std::path::PathBuf;

/// Configuration for one code generator instance.
#[derive(Debug, Clone, Default)]
pub struct CodegenConfig {
    /// Source-language identity, as it should appear in the module header.
    pub language: String,

    /// Compilation mode label (e.g. "standard", "debug"). Recorded in the
    /// module header; does not change lowering.
    pub mode: String,

    /// Target platform. `None` means the host platform.
    pub target: Option<TargetPlatform>,

    /// Path to the standard library root, used to resolve crash messages.
    /// `None` triggers a parent-directory search for a `stdlib` folder.
    pub stdlib_path: Option<PathBuf>,

    /// Whether to emit stack-trace instrumentation. When off, push/pop
    /// and symbol tables degrade to no-ops; `throw` still calls the
    /// runtime.
    pub stack_traces: bool,
}

impl CodegenConfig {
    pub fn new(language: impl Into<String>, mode: impl Into<String>) -> Self {
        CodegenConfig {
            language: language.into(),
            mode: mode.into(),
            target: None,
            stdlib_path: None,
            stack_traces: true,
        }
    }

    /// Set an explicit target platform (builder pattern).
    pub fn with_target(mut self, target: TargetPlatform) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the standard library path.
    pub fn with_stdlib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdlib_path = Some(path.into());
        self
    }

    /// Enable or disable stack-trace instrumentation.
    pub fn with_stack_traces(mut self, enabled: bool) -> Self {
        self.stack_traces = enabled;
        self
    }
}

/// On-disk CLI configuration (`rfgen.toml`), deserialized with serde.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Target triple, parsed with `TargetPlatform::from_triple`.
    pub target: Option<String>,
    pub stdlib: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub stack_traces: bool,
}

fn default_true() -> bool {
    true
}

impl FileConfig {
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("invalid config file: {}", e))
    }
}
