//! Scoped-access lowering.
//!
//! `viewing` and `hijacking` are compile-time aliases: the handle is
//! another name for the source's storage, and exclusivity is the
//! semantic analyzer's invariant, not ours. `observing` and `seizing`
//! wrap the body in runtime lock acquire/release pairs on the shared
//! handle. Locks release on the straight-line exit; early exits out of
//! the body are a caller error.

use super::error::CodeGenError;
use super::state::CodeGen;
use super::types::{parse_generic, split_generic_args};
use crate::ast::Node;
use std::fmt::Write as _;

impl CodeGen {
    /// `viewing src as h { ... }` / `hijacking src as h { ... }`.
    ///
    /// A named local aliases its slot directly; any other source is
    /// materialized into a fresh slot the handle points at.
    pub(crate) fn lower_compile_time_alias(
        &mut self,
        source: &Node,
        handle: &str,
        body: &[Node],
    ) -> Result<(), CodeGenError> {
        if let Node::Identifier { name, .. } = source {
            if self.symbol_types.contains_key(name)
                && !self.function_params.contains(name)
                && !self.global_symbols.contains(name)
            {
                writeln!(
                    &mut self.output,
                    "  %{} = getelementptr i8, ptr %{}, i64 0",
                    handle, name
                )?;
                let llvm = self.symbol_types.get(name).cloned().unwrap_or_default();
                let source_type = self.rf_types.get(name).cloned().unwrap_or_default();
                self.symbol_types.insert(handle.to_string(), llvm);
                self.rf_types.insert(handle.to_string(), source_type);
                return self.lower_body(body);
            }
        }

        let value = self.lower_node(source)?;
        let info = self.value_type_info(&value);
        writeln!(
            &mut self.output,
            "  %{} = alloca {}",
            handle, info.llvm_type
        )?;
        writeln!(
            &mut self.output,
            "  store {} {}, ptr %{}",
            info.llvm_type, value, handle
        )?;
        self.symbol_types
            .insert(handle.to_string(), info.llvm_type.clone());
        self.rf_types
            .insert(handle.to_string(), info.source_type.clone());
        self.lower_body(body)
    }

    /// `observing shared as h { ... }` (read lock) and
    /// `seizing shared as h { ... }` (exclusive lock).
    pub(crate) fn lower_runtime_lock(
        &mut self,
        source: &Node,
        handle: &str,
        body: &[Node],
        exclusive: bool,
    ) -> Result<(), CodeGenError> {
        let shared = self.lower_node(source)?;
        let shared_info = self.value_type_info(&shared);

        let acquire = if exclusive {
            "mutex_lock"
        } else {
            "rwlock_read_lock"
        };
        writeln!(
            &mut self.output,
            "  %{} = call ptr @{}(ptr {})",
            handle, acquire, shared
        )?;

        // The handle is the payload pointer the lock hands back: a
        // direct value, referenced like a parameter
        self.function_params.insert(handle.to_string());
        self.symbol_types.insert(handle.to_string(), "ptr".to_string());
        self.rf_types
            .insert(handle.to_string(), shared_payload_type(&shared_info.source_type));

        self.lower_body(body)?;

        let release = if exclusive {
            "mutex_unlock"
        } else {
            "rwlock_read_unlock"
        };
        if !self.block_terminated {
            writeln!(
                &mut self.output,
                "  call void @{}(ptr {})",
                release, shared
            )?;
        }
        self.function_params.remove(handle);
        Ok(())
    }
}

/// The payload type of a `Shared<T, Policy>` spelling, or the spelling
/// itself when it is not a `Shared` wrapper.
fn shared_payload_type(source: &str) -> String {
    if let Some(("Shared", args)) = parse_generic(source) {
        if let Some(first) = split_generic_args(args).into_iter().next() {
            return first;
        }
    }
    source.to_string()
}
