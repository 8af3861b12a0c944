//! CodeGen state and core types.
//!
//! One `CodeGen` owns every piece of mutable emission state for one
//! module: the output buffer, the counters behind temporary and label
//! names, the per-routine type maps, the generic registry, and the
//! stack-trace tables. State is created per module and consumed by the
//! final splice/flush steps; nothing crosses modules.

use super::generics::GenericRegistry;
use super::platform::TargetPlatform;
use super::stack_trace::StackTrace;
use crate::codegen::error::CodeGenError;
use crate::config::CodegenConfig;
use crate::crash_messages::CrashMessages;
use crate::semantics::{ModuleRegistry, SemanticSymbols};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Type facts attached to every value the lowerer produces.
///
/// LLVM integer types carry no sign, so `is_unsigned` travels here and
/// selects signed vs. unsigned opcodes downstream. `source_type` keeps
/// the language-level spelling (including generic arguments) for
/// method-dispatch lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub llvm_type: String,
    pub is_unsigned: bool,
    pub is_float: bool,
    pub source_type: String,
}

impl TypeInfo {
    /// The fallback when no type fact is recorded: a signed 32-bit int.
    pub fn default_int() -> Self {
        TypeInfo {
            llvm_type: "i32".to_string(),
            is_unsigned: false,
            is_float: false,
            source_type: "s32".to_string(),
        }
    }

    /// A byte pointer (text literals, `None`, raw addresses).
    pub fn byte_pointer() -> Self {
        TypeInfo {
            llvm_type: "ptr".to_string(),
            is_unsigned: false,
            is_float: false,
            source_type: "text".to_string(),
        }
    }

    /// A boolean (`i1`) fact, used by comparisons.
    pub fn boolean() -> Self {
        TypeInfo {
            llvm_type: "i1".to_string(),
            is_unsigned: false,
            is_float: false,
            source_type: "bool".to_string(),
        }
    }
}

/// Branch targets for `break`/`continue` inside the innermost loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopLabels {
    pub continue_label: String,
    pub break_label: String,
}

pub struct CodeGen {
    pub(crate) config: CodegenConfig,
    pub(crate) platform: TargetPlatform,
    pub(crate) semantics: SemanticSymbols,
    pub(crate) modules: ModuleRegistry,
    pub(crate) crash_messages: CrashMessages,
    pub(crate) source_file: String,

    /// Main emission buffer.
    pub(crate) output: String,
    /// Struct skeletons emitted by generic type instantiation.
    pub(crate) type_definitions: String,
    /// Deferred string-constant global lines, spliced at the sentinel.
    pub(crate) string_constants: Vec<String>,
    /// content -> (global name, array length) for dedupe.
    pub(crate) string_names: HashMap<String, (String, usize)>,
    pub(crate) string_counter: usize,
    /// Lambda definitions queued for end-of-module emission.
    pub(crate) lambda_definitions: Vec<String>,

    pub(crate) temp_counter: usize,
    pub(crate) label_counter: usize,
    pub(crate) lambda_counter: usize,

    /// value text -> type facts, for every temporary produced.
    pub(crate) temp_types: HashMap<String, TypeInfo>,
    /// identifier -> LLVM type of its slot or parameter.
    pub(crate) symbol_types: HashMap<String, String>,
    /// identifier -> source-language type, for method dispatch.
    pub(crate) rf_types: HashMap<String, String>,
    /// Identifiers that are by-value parameters (no load needed).
    pub(crate) function_params: HashSet<String>,
    /// Identifiers bound to module-level globals (`@name` slots).
    pub(crate) global_symbols: HashSet<String>,

    /// Whether the current basic block already has a terminator.
    pub(crate) block_terminated: bool,
    /// Whether the current routine body emitted an explicit return.
    pub(crate) has_return: bool,
    pub(crate) current_return_type: String,
    pub(crate) current_return_source: String,
    pub(crate) current_routine: String,
    /// Whether the current routine pushed a stack frame on entry.
    pub(crate) frame_pushed: bool,
    pub(crate) loop_stack: Vec<LoopLabels>,

    pub(crate) generics: GenericRegistry,
    pub(crate) trace: StackTrace,
    /// `llvm.*` intrinsic declarations referenced by emitted calls,
    /// deduplicated by exact line, emitted in the declarations section.
    pub(crate) used_intrinsics: BTreeSet<String>,
}

impl CodeGen {
    /// Create a generator for one module. The platform defaults to the
    /// host when the configuration names none.
    pub fn new(config: CodegenConfig) -> Result<Self, CodeGenError> {
        let platform = match &config.target {
            Some(platform) => platform.clone(),
            None => TargetPlatform::host()?,
        };
        let crash_messages = CrashMessages::load(config.stdlib_path.as_deref());
        let trace = StackTrace::new(config.stack_traces);

        Ok(CodeGen {
            config,
            platform,
            semantics: SemanticSymbols::new(),
            modules: ModuleRegistry::new(),
            crash_messages,
            source_file: String::new(),
            output: String::new(),
            type_definitions: String::new(),
            string_constants: Vec::new(),
            string_names: HashMap::new(),
            string_counter: 0,
            lambda_definitions: Vec::new(),
            temp_counter: 0,
            label_counter: 0,
            lambda_counter: 0,
            temp_types: HashMap::new(),
            symbol_types: HashMap::new(),
            rf_types: HashMap::new(),
            function_params: HashSet::new(),
            global_symbols: HashSet::new(),
            block_terminated: false,
            has_return: false,
            current_return_type: "void".to_string(),
            current_return_source: String::new(),
            current_routine: String::new(),
            frame_pushed: false,
            loop_stack: Vec::new(),
            generics: GenericRegistry::new(),
            trace,
            used_intrinsics: BTreeSet::new(),
        })
    }

    /// Record the source file name, used in the module header and the
    /// stack-trace file table.
    pub fn set_source_file(&mut self, name: impl Into<String>) {
        self.source_file = name.into();
    }

    /// Attach the semantic symbol table produced by the analyzer.
    pub fn set_symbol_table(&mut self, symbols: SemanticSymbols) {
        self.semantics = symbols;
    }

    /// Attach the loaded-module registry produced by the import loader.
    pub fn set_modules(&mut self, modules: ModuleRegistry) {
        self.modules = modules;
    }

    /// Generate a fresh temporary name (without the `%` sigil).
    pub(crate) fn fresh_temp(&mut self) -> String {
        let name = format!("tmp{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    /// Generate a fresh block label with the given prefix.
    pub(crate) fn fresh_label(&mut self, prefix: &str) -> String {
        let name = format!("{}{}", prefix, self.label_counter);
        self.label_counter += 1;
        name
    }

    /// Register type facts for a produced value. Must run before the
    /// value is read back by any downstream emitter.
    pub(crate) fn register_temp(&mut self, value: impl Into<String>, info: TypeInfo) {
        self.temp_types.insert(value.into(), info);
    }

    /// Look up type facts for a value, defaulting to a signed 32-bit int
    /// when nothing was recorded.
    pub(crate) fn value_type_info(&self, value: &str) -> TypeInfo {
        self.temp_types
            .get(value)
            .cloned()
            .unwrap_or_else(TypeInfo::default_int)
    }

    /// Record an `llvm.*` intrinsic declaration for the declarations
    /// section. Duplicate lines collapse.
    pub(crate) fn declare_intrinsic(&mut self, line: impl Into<String>) {
        self.used_intrinsics.insert(line.into());
    }

    /// Reset per-routine lowering state at a routine boundary.
    /// Module-level globals keep their bindings.
    pub(crate) fn reset_routine_state(&mut self) {
        let globals = &self.global_symbols;
        self.symbol_types.retain(|name, _| globals.contains(name));
        self.rf_types.retain(|name, _| globals.contains(name));
        self.function_params.clear();
        self.block_terminated = false;
        self.has_return = false;
        self.frame_pushed = false;
        self.loop_stack.clear();
    }

    /// A generator pinned to x86_64-linux with stack traces on, so test
    /// assertions on emitted IR are host-independent.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use super::platform::{Arch, Os};
        let config = CodegenConfig::new("razorforge", "standard")
            .with_target(TargetPlatform::new(Arch::X86_64, Os::Linux).unwrap())
            .with_stdlib_path("/nonexistent");
        CodeGen::new(config).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_temp_monotonic() {
        let mut codegen = CodeGen::for_tests();
        assert_eq!(codegen.fresh_temp(), "tmp0");
        assert_eq!(codegen.fresh_temp(), "tmp1");
        assert_eq!(codegen.fresh_label("then"), "then2");
    }

    #[test]
    fn test_value_type_info_defaults_to_s32() {
        let codegen = CodeGen::for_tests();
        let info = codegen.value_type_info("%tmp9");
        assert_eq!(info.llvm_type, "i32");
        assert!(!info.is_unsigned);
    }

    #[test]
    fn test_register_then_lookup() {
        let mut codegen = CodeGen::for_tests();
        codegen.register_temp(
            "%tmp0",
            TypeInfo {
                llvm_type: "i64".to_string(),
                is_unsigned: true,
                is_float: false,
                source_type: "u64".to_string(),
            },
        );
        let info = codegen.value_type_info("%tmp0");
        assert_eq!(info.llvm_type, "i64");
        assert!(info.is_unsigned);
    }
}
