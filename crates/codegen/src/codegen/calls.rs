//! Call lowering: builtins, methods, generic call sites.
//!
//! Built-ins are dispatched before any name mangling: the danger
//! routines and source-location intrinsics are resolved at emission
//! time, `Console.*` maps onto C stdio, and `Error.from_text` types its
//! argument. Everything else becomes a direct call through the
//! sanitized (and, for generics, monomorphized) symbol.

use super::error::CodeGenError;
use super::mangle::{monomorphic_name, sanitize_name};
use super::state::{CodeGen, TypeInfo};
use super::types::{parse_generic, split_generic_args};
use crate::ast::{Node, SourceLocation};
use std::collections::HashMap;
use std::fmt::Write as _;

impl CodeGen {
    pub(crate) fn lower_call(
        &mut self,
        callee: &str,
        args: &[Node],
        location: &SourceLocation,
    ) -> Result<String, CodeGenError> {
        // Danger routines
        match callee {
            "address_of!" => return self.lower_address_of(args, callee),
            "invalidate!" => {
                let value = self.expect_one_arg(callee, args)?;
                let ptr = self.lower_node(&value)?;
                writeln!(&mut self.output, "  call void @heap_free(ptr {})", ptr)?;
                return Ok(String::new());
            }
            _ => {}
        }

        // Source-location intrinsics evaluate against the call site
        if let Some(result) = self.lower_location_builtin(callee, location)? {
            return Ok(result);
        }

        if let Some(rest) = callee.strip_prefix("Console.") {
            return self.lower_console_call(rest, args, callee);
        }

        if callee == "Error.from_text" {
            let arg = self.expect_one_arg(callee, args)?;
            let value = self.lower_node(&arg)?;
            self.register_temp(
                value.clone(),
                TypeInfo {
                    llvm_type: "ptr".to_string(),
                    is_unsigned: false,
                    is_float: false,
                    source_type: "Error".to_string(),
                },
            );
            return Ok(value);
        }

        // Method dispatch on a local receiver
        if let Some((head, rest)) = callee.split_once('.') {
            if !self.semantics.is_namespace(head) && self.symbol_types.contains_key(head) {
                return self.lower_method_call(head, rest, args);
            }
        }

        // Plain (possibly throwable/try) routine call
        let mangled = sanitize_name(callee);
        let arg_values = self.lower_call_args(args)?;
        let return_source = self.routine_return_source(callee);
        self.emit_direct_call(&mangled, &arg_values, return_source.as_deref())
    }

    /// `Receiver<Args>.method(...)` or `routine<Args>(...)` with explicit
    /// type arguments: request the instantiation, call the mangled name.
    pub(crate) fn lower_generic_method_call(
        &mut self,
        receiver: &str,
        type_args: &[String],
        method: &str,
        args: &[Node],
    ) -> Result<String, CodeGenError> {
        let name = if method.is_empty() {
            receiver.to_string()
        } else {
            format!("{}.{}", receiver, method)
        };

        let mangled = if self.generics.has_routine_template(&name) {
            self.instantiate_generic_routine(&name, type_args)?
        } else {
            monomorphic_name(&name, type_args)
        };

        let return_source = self.generic_return_source(&name, type_args);
        let arg_values = self.lower_call_args(args)?;
        self.emit_direct_call(&mangled, &arg_values, return_source.as_deref())
    }

    /// Static member of an instantiated generic type: a load from the
    /// instance's preset global.
    pub(crate) fn lower_generic_member(
        &mut self,
        base: &str,
        type_args: &[String],
        member: &str,
    ) -> Result<String, CodeGenError> {
        let full = format!("{}<{}>", base, type_args.join(", "));
        self.map_type(&full)?;
        let mangled = monomorphic_name(base, type_args);
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = load i32, ptr @{}_{}",
            tmp, mangled, member
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), TypeInfo::default_int());
        Ok(result)
    }

    fn lower_address_of(
        &mut self,
        args: &[Node],
        callee: &str,
    ) -> Result<String, CodeGenError> {
        let arg = self.expect_one_arg(callee, args)?;
        if let Node::Identifier { name, .. } = &arg {
            if self.symbol_types.contains_key(name) && !self.function_params.contains(name) {
                let value = format!("%{}", name);
                self.register_temp(value.clone(), TypeInfo::byte_pointer());
                return Ok(value);
            }
        }
        // No addressable slot: spill the value into one
        let value = self.lower_node(&arg)?;
        let info = self.value_type_info(&value);
        let slot = self.fresh_temp();
        writeln!(&mut self.output, "  %{} = alloca {}", slot, info.llvm_type)?;
        writeln!(
            &mut self.output,
            "  store {} {}, ptr %{}",
            info.llvm_type, value, slot
        )?;
        let result = format!("%{}", slot);
        self.register_temp(result.clone(), TypeInfo::byte_pointer());
        Ok(result)
    }

    fn lower_console_call(
        &mut self,
        method: &str,
        args: &[Node],
        callee: &str,
    ) -> Result<String, CodeGenError> {
        match method {
            "show" => {
                let arg = self.expect_one_arg(callee, args)?;
                let value = self.lower_node(&arg)?;
                let info = self.value_type_info(&value);
                if info.llvm_type == "ptr" {
                    let fmt = self.format_ptr("@.str_fmt_s", 3)?;
                    writeln!(
                        &mut self.output,
                        "  call i32 (ptr, ...) @printf(ptr {}, ptr {})",
                        fmt, value
                    )?;
                } else if info.is_float {
                    let fmt = self.format_ptr("@.str_fmt_f", 4)?;
                    writeln!(
                        &mut self.output,
                        "  call i32 (ptr, ...) @printf(ptr {}, {} {})",
                        fmt, info.llvm_type, value
                    )?;
                } else {
                    let fmt = self.format_ptr("@.str_fmt", 4)?;
                    writeln!(
                        &mut self.output,
                        "  call i32 (ptr, ...) @printf(ptr {}, {} {})",
                        fmt, info.llvm_type, value
                    )?;
                }
                Ok(String::new())
            }
            "show_line" => {
                let arg = self.expect_one_arg(callee, args)?;
                let value = self.lower_node(&arg)?;
                let info = self.value_type_info(&value);
                if info.llvm_type == "ptr" {
                    writeln!(&mut self.output, "  call i32 @puts(ptr {})", value)?;
                } else {
                    let fmt = self.format_ptr("@.str_fmt", 4)?;
                    writeln!(
                        &mut self.output,
                        "  call i32 (ptr, ...) @printf(ptr {}, {} {})",
                        fmt, info.llvm_type, value
                    )?;
                }
                Ok(String::new())
            }
            "flush" => {
                writeln!(&mut self.output, "  call i32 @fflush(ptr null)")?;
                Ok(String::new())
            }
            "input_word" | "input_line" => {
                let buf = self.fresh_temp();
                writeln!(&mut self.output, "  %{} = alloca [256 x i8]", buf)?;
                let buf_ptr = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = getelementptr inbounds [256 x i8], ptr %{}, i64 0, i64 0",
                    buf_ptr, buf
                )?;
                let fmt = if method == "input_word" {
                    self.format_ptr("@.str_scan_word", 6)?
                } else {
                    self.format_ptr("@.str_scan_line", 10)?
                };
                writeln!(
                    &mut self.output,
                    "  call i32 (ptr, ...) @scanf(ptr {}, ptr %{})",
                    fmt, buf_ptr
                )?;
                let result = format!("%{}", buf_ptr);
                self.register_temp(result.clone(), TypeInfo::byte_pointer());
                Ok(result)
            }
            other => Err(CodeGenError::NotImplemented(format!(
                "Console.{}",
                other
            ))),
        }
    }

    fn lower_method_call(
        &mut self,
        receiver: &str,
        method: &str,
        args: &[Node],
    ) -> Result<String, CodeGenError> {
        let recv_source = self
            .rf_types
            .get(receiver)
            .cloned()
            .unwrap_or_else(|| "s32".to_string());

        let (mangled, lookup_name) = if let Some((base, args_str)) = parse_generic(&recv_source)
        {
            // Method on an instantiated generic type: find its template
            // and request the monomorphic routine
            let type_args = split_generic_args(args_str);
            match self.find_generic_method_template(base, method) {
                Some(template_name) => {
                    let mangled = self.instantiate_generic_routine(&template_name, &type_args)?;
                    (mangled, template_name)
                }
                None => {
                    let full = format!("{}.{}", recv_source, method);
                    (sanitize_name(&full), full)
                }
            }
        } else {
            let full = format!("{}.{}", recv_source, method);
            (sanitize_name(&full), full)
        };

        let recv_value = self.lower_identifier(receiver)?;
        let mut arg_values = vec![recv_value];
        arg_values.extend(self.lower_call_args(args)?);

        let return_source = self.routine_return_source(&lookup_name);
        self.emit_direct_call(&mangled, &arg_values, return_source.as_deref())
    }

    /// Find the registered template for a method of a generic type, by
    /// base name and method name (`Stack` + `push` -> `Stack<T>.push`).
    pub(crate) fn find_generic_method_template(
        &self,
        base: &str,
        method: &str,
    ) -> Option<String> {
        self.generics.routine_template_names().find(|name| {
            match name.rsplit_once('.') {
                Some((recv, m)) if m == method => {
                    matches!(parse_generic(recv), Some((b, _)) if b == base)
                }
                _ => false,
            }
        })
    }

    /// Lower call arguments in order, unwrapping named arguments.
    pub(crate) fn lower_call_args(
        &mut self,
        args: &[Node],
    ) -> Result<Vec<String>, CodeGenError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let node = match arg {
                Node::NamedArgument { value, .. } => value.as_ref(),
                other => other,
            };
            values.push(self.lower_node(node)?);
        }
        Ok(values)
    }

    /// Emit a direct call. `return_source` of `None` defaults the result
    /// to a 32-bit integer; `Some("void")`-mapped types produce a bare
    /// call and no value.
    pub(crate) fn emit_direct_call(
        &mut self,
        mangled: &str,
        arg_values: &[String],
        return_source: Option<&str>,
    ) -> Result<String, CodeGenError> {
        let args_text = arg_values
            .iter()
            .map(|v| {
                let info = self.value_type_info(v);
                format!("{} {}", info.llvm_type, v)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let return_info = match return_source {
            None => None,
            Some(source) => {
                let llvm = self.map_type(source)?;
                if llvm == "void" {
                    Some(None)
                } else {
                    Some(Some(self.type_info_for(source)?))
                }
            }
        };

        match return_info {
            Some(None) => {
                writeln!(
                    &mut self.output,
                    "  call void @{}({})",
                    mangled, args_text
                )?;
                Ok(String::new())
            }
            Some(Some(info)) => {
                let tmp = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = call {} @{}({})",
                    tmp, info.llvm_type, mangled, args_text
                )?;
                let result = format!("%{}", tmp);
                self.register_temp(result.clone(), info);
                Ok(result)
            }
            None => {
                let tmp = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = call i32 @{}({})",
                    tmp, mangled, args_text
                )?;
                let result = format!("%{}", tmp);
                self.register_temp(result.clone(), TypeInfo::default_int());
                Ok(result)
            }
        }
    }

    /// The declared return type of a routine, from the semantic symbol
    /// table. `Some("void")` for routines declared without one; `None`
    /// when the routine is unknown.
    fn routine_return_source(&self, name: &str) -> Option<String> {
        self.semantics
            .get_all_symbols()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.return_type.clone().unwrap_or_else(|| "void".to_string()))
    }

    /// Return type of a generic routine instantiation, with the template
    /// parameters substituted.
    fn generic_return_source(&mut self, name: &str, type_args: &[String]) -> Option<String> {
        let template = self.generics.routine_template(name)?;
        let (type_params, return_type) = match template {
            Node::Routine {
                type_params,
                return_type,
                ..
            } => (type_params.clone(), return_type.clone()),
            _ => return None,
        };
        let return_type = return_type?;
        let filtered = super::generics::filter_receiver_params(name, &type_params);
        let mut receiver = super::generics::receiver_type_params(name);
        receiver.extend(filtered);
        let subs: HashMap<String, String> = receiver
            .into_iter()
            .zip(type_args.iter().cloned())
            .collect();
        let mut rewritten = return_type;
        for (param, concrete) in &subs {
            rewritten = super::types::replace_word(&rewritten, param, concrete);
        }
        Some(rewritten)
    }

    /// GEP to the first byte of one of the pre-emitted format strings.
    fn format_ptr(&mut self, global: &str, len: usize) -> Result<String, CodeGenError> {
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = getelementptr inbounds [{} x i8], ptr {}, i64 0, i64 0",
            tmp, len, global
        )?;
        Ok(format!("%{}", tmp))
    }

    fn expect_one_arg(&self, name: &str, args: &[Node]) -> Result<Node, CodeGenError> {
        if args.len() != 1 {
            return Err(CodeGenError::InvalidArgumentCount {
                name: name.to_string(),
                expected: 1,
                got: args.len(),
            });
        }
        let node = match &args[0] {
            Node::NamedArgument { value, .. } => value.as_ref().clone(),
            other => other.clone(),
        };
        Ok(node)
    }
}
