//! Statement and declaration lowering, plus the central dispatch.
//!
//! `lower_node` is the single entry the driver and every emitter use:
//! one case per AST variant, each returning a temporary name for
//! expressions or the empty string for statements. Block-structured
//! statements manage the block-terminated flag; everything that emits a
//! terminator sets it.

use super::error::CodeGenError;
use super::mangle::sanitize_name;
use super::state::{CodeGen, LoopLabels, TypeInfo};
use super::types::replace_word;
use crate::ast::{Field, Node, SourceLocation, WhenArm};
use std::collections::HashMap;
use std::fmt::Write as _;

impl CodeGen {
    /// Lower one AST node. Expressions return their value text;
    /// statements and declarations return the empty string.
    pub(crate) fn lower_node(&mut self, node: &Node) -> Result<String, CodeGenError> {
        match node {
            Node::Program { .. } => Err(CodeGenError::NotImplemented(
                "nested program node".to_string(),
            )),

            // --- Declarations ---
            Node::Routine {
                name, type_params, ..
            } => {
                if self.routine_is_template(name, type_params) {
                    self.generics.register_routine_template(name, node.clone());
                    writeln!(
                        &mut self.output,
                        "; generic routine template: {}",
                        name
                    )?;
                    return Ok(String::new());
                }
                self.lower_routine_with_substitutions(node, &HashMap::new(), None)?;
                Ok(String::new())
            }
            Node::Record {
                name,
                type_params,
                fields,
                ..
            } => {
                if !type_params.is_empty() {
                    self.generics.register_record_template(name, node.clone());
                    writeln!(&mut self.output, "; generic record template: {}", name)?;
                } else {
                    self.emit_record_type(name, fields)?;
                }
                Ok(String::new())
            }
            Node::Entity {
                name,
                type_params,
                fields,
                ..
            } => {
                if !type_params.is_empty() {
                    self.generics.register_entity_template(name, node.clone());
                    writeln!(&mut self.output, "; generic entity template: {}", name)?;
                } else {
                    self.emit_record_type(name, fields)?;
                }
                Ok(String::new())
            }
            Node::Menu { name, cases, .. } => {
                self.emit_menu(name, cases)?;
                Ok(String::new())
            }
            Node::Variant { name, cases, .. } => {
                // Tag plus an opaque payload pointer; case payloads are
                // unpacked by generated accessors, not here
                let mangled = sanitize_name(name);
                writeln!(
                    &mut self.type_definitions,
                    "%struct.{} = type {{ i32, ptr }}",
                    mangled
                )?;
                self.generics.register_fields(
                    &mangled,
                    vec![
                        ("tag".to_string(), "i32".to_string()),
                        ("payload".to_string(), "ptr".to_string()),
                    ],
                );
                for (index, case) in cases.iter().enumerate() {
                    writeln!(
                        &mut self.type_definitions,
                        "@{}_{} = constant i32 {}",
                        mangled, case.name, index
                    )?;
                }
                Ok(String::new())
            }
            Node::Preset {
                name,
                type_name,
                value,
                ..
            } => {
                self.emit_preset(name, type_name.as_deref(), value)?;
                Ok(String::new())
            }

            // --- Statements ---
            Node::Variable {
                name,
                type_name,
                initializer,
                ..
            } => {
                self.lower_variable(name, type_name.as_deref(), initializer.as_deref())?;
                Ok(String::new())
            }
            Node::Assignment { target, value, .. } => {
                self.lower_assignment(target, value)?;
                Ok(String::new())
            }
            Node::Return { value, .. } => {
                self.lower_return(value.as_deref())?;
                Ok(String::new())
            }
            Node::Throw { value, .. } => {
                self.lower_throw(value.as_deref())?;
                Ok(String::new())
            }
            Node::Absent { .. } => {
                self.trace_throw_absent()?;
                Ok(String::new())
            }
            Node::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                self.lower_if(condition, then_body, else_body.as_deref())?;
                Ok(String::new())
            }
            Node::While {
                condition, body, ..
            } => {
                self.lower_while(condition, body)?;
                Ok(String::new())
            }
            Node::For {
                variable,
                start,
                end,
                body,
                ..
            } => {
                self.lower_for(variable, start, end, body)?;
                Ok(String::new())
            }
            Node::When { subject, arms, .. } => {
                self.lower_when(subject, arms)?;
                Ok(String::new())
            }
            Node::Block { body, .. }
            | Node::Danger { body, .. }
            | Node::Mayhem { body, .. } => {
                self.lower_body(body)?;
                Ok(String::new())
            }
            Node::Break { .. } => {
                let labels = self.loop_stack.last().cloned().ok_or_else(|| {
                    CodeGenError::UnsupportedOperation("break outside a loop".to_string())
                })?;
                writeln!(&mut self.output, "  br label %{}", labels.break_label)?;
                self.block_terminated = true;
                Ok(String::new())
            }
            Node::Continue { .. } => {
                let labels = self.loop_stack.last().cloned().ok_or_else(|| {
                    CodeGenError::UnsupportedOperation("continue outside a loop".to_string())
                })?;
                writeln!(&mut self.output, "  br label %{}", labels.continue_label)?;
                self.block_terminated = true;
                Ok(String::new())
            }

            // --- Scoped access ---
            Node::Viewing {
                source,
                handle,
                body,
                ..
            }
            | Node::Hijacking {
                source,
                handle,
                body,
                ..
            } => {
                self.lower_compile_time_alias(source, handle, body)?;
                Ok(String::new())
            }
            Node::Observing {
                source,
                handle,
                body,
                ..
            } => {
                self.lower_runtime_lock(source, handle, body, false)?;
                Ok(String::new())
            }
            Node::Seizing {
                source,
                handle,
                body,
                ..
            } => {
                self.lower_runtime_lock(source, handle, body, true)?;
                Ok(String::new())
            }

            // --- Expressions ---
            Node::Literal {
                value, type_suffix, ..
            } => self.lower_literal(value, type_suffix.as_deref()),
            Node::Identifier { name, .. } => self.lower_identifier(name),
            Node::Binary {
                op, left, right, ..
            } => self.lower_binary(op, left, right),
            Node::Unary { op, operand, .. } => self.lower_unary(op, operand),
            Node::Call {
                callee,
                args,
                location,
            } => self.lower_call(callee, args, location),
            Node::Member { object, member, .. } => self.lower_member_or_case(object, member),
            Node::Index { object, index, .. } => self.lower_index(object, index),
            Node::Conditional {
                condition,
                then_value,
                else_value,
                ..
            } => self.lower_conditional(condition, then_value, else_value),
            Node::Range { start, end, .. } => self.lower_range(start, end),
            Node::ChainedComparison {
                operands,
                operators,
                ..
            } => self.lower_chained_comparison(operands, operators),
            Node::Lambda { params, body, .. } => self.lower_lambda(params, body),
            Node::TypeRef { name, .. } => Err(CodeGenError::NotImplemented(format!(
                "bare type expression '{}'",
                name
            ))),
            Node::TypeConversion {
                target_type, value, ..
            } => self.lower_type_conversion(target_type, value),
            Node::SliceConstructor {
                element_type,
                length,
                heap,
                ..
            } => self.lower_slice_constructor(element_type, length, *heap),
            Node::GenericMethodCall {
                receiver,
                type_args,
                method,
                args,
                ..
            } => self.lower_generic_method_call(receiver, type_args, method, args),
            Node::GenericMember {
                base,
                type_args,
                member,
                ..
            } => self.lower_generic_member(base, type_args, member),
            Node::MemoryOperation { op, args, location } => {
                self.lower_intrinsic(op, &[], args, location)
            }
            Node::IntrinsicCall {
                name,
                type_args,
                args,
                location,
            } => self.lower_intrinsic(name, type_args, args, location),
            Node::NamedArgument { value, .. } => self.lower_node(value),
        }
    }

    /// Lower a statement list, stopping after the block terminates.
    pub(crate) fn lower_body(&mut self, body: &[Node]) -> Result<(), CodeGenError> {
        for node in body {
            if self.block_terminated {
                break;
            }
            self.lower_node(node)?;
        }
        Ok(())
    }

    /// Lower a routine definition, optionally under a generic
    /// substitution map with an overridden (monomorphic) symbol name.
    pub(crate) fn lower_routine_with_substitutions(
        &mut self,
        node: &Node,
        subs: &HashMap<String, String>,
        override_name: Option<&str>,
    ) -> Result<(), CodeGenError> {
        let Node::Routine {
            name,
            params,
            return_type,
            body,
            location,
            ..
        } = node
        else {
            return Err(CodeGenError::NotImplemented(
                "routine lowering on non-routine node".to_string(),
            ));
        };

        self.reset_routine_state();
        self.current_routine = name.clone();

        // The entry point is renamed and forced to return a 32-bit int
        let is_start = name == "start";
        let symbol = if is_start {
            "main".to_string()
        } else {
            match override_name {
                Some(mangled) => mangled.to_string(),
                None => sanitize_name(name),
            }
        };

        let return_source = if is_start {
            "s32".to_string()
        } else {
            match return_type {
                Some(source) => apply_substitutions(source, subs),
                None => String::new(),
            }
        };
        let return_llvm = if return_source.is_empty() {
            "void".to_string()
        } else {
            self.map_type_with_substitution(&return_source, subs)?
        };
        self.current_return_type = return_llvm.clone();
        self.current_return_source = return_source.clone();

        // Methods get an implicit `me` receiver
        let receiver = method_receiver(name, &self.semantics);
        let mut param_list = Vec::new();
        if let Some(receiver_name) = &receiver {
            let receiver_source = apply_substitutions(receiver_name, subs);
            let llvm = self.map_type_with_substitution(&receiver_source, subs)?;
            param_list.push(format!("{} %me", llvm));
            self.function_params.insert("me".to_string());
            self.symbol_types.insert("me".to_string(), llvm);
            self.rf_types.insert("me".to_string(), receiver_source);
        }

        for param in params {
            let source = param.type_name.as_deref().ok_or_else(|| {
                CodeGenError::type_resolution(
                    &param.name,
                    format!("parameter list of '{}'", name),
                    &param.location,
                )
            })?;
            let substituted = apply_substitutions(source, subs);
            let llvm = self.map_type_with_substitution(&substituted, subs)?;
            param_list.push(format!("{} %{}", llvm, param.name));
            self.function_params.insert(param.name.clone());
            self.symbol_types.insert(param.name.clone(), llvm);
            self.rf_types.insert(param.name.clone(), substituted);
        }

        writeln!(
            &mut self.output,
            "define {} @{}({}) {{",
            return_llvm,
            symbol,
            param_list.join(", ")
        )?;
        writeln!(&mut self.output, "entry:")?;

        self.emit_frame_push(name, receiver.as_deref(), location)?;
        self.lower_body(body)?;

        // Fall-through exit: pop the frame and synthesize the default
        // return
        if !self.block_terminated {
            self.emit_frame_pop()?;
            if return_llvm == "void" {
                writeln!(&mut self.output, "  ret void")?;
            } else {
                writeln!(
                    &mut self.output,
                    "  ret {} {}",
                    return_llvm,
                    zero_value(&return_llvm)
                )?;
            }
        }
        writeln!(&mut self.output, "}}")?;
        writeln!(&mut self.output)?;

        self.current_routine = String::new();
        Ok(())
    }

    fn emit_frame_push(
        &mut self,
        routine: &str,
        receiver: Option<&str>,
        location: &SourceLocation,
    ) -> Result<(), CodeGenError> {
        if !self.trace.is_enabled() {
            return Ok(());
        }
        let file = location
            .file
            .clone()
            .unwrap_or_else(|| self.source_file.clone());
        let file_id = self.trace.files.register(&file);
        let routine_id = self.trace.routines.register(routine);
        let type_id = self.trace.types.register(receiver.unwrap_or(""));
        let mut out = std::mem::take(&mut self.output);
        self.trace.emit_push(
            &mut out,
            file_id,
            routine_id,
            type_id,
            location.line,
            location.column,
        )?;
        self.output = out;
        self.frame_pushed = true;
        Ok(())
    }

    pub(crate) fn emit_frame_pop(&mut self) -> Result<(), CodeGenError> {
        if !self.frame_pushed {
            return Ok(());
        }
        let mut out = std::mem::take(&mut self.output);
        self.trace.emit_pop(&mut out)?;
        self.output = out;
        Ok(())
    }

    fn lower_variable(
        &mut self,
        name: &str,
        type_name: Option<&str>,
        initializer: Option<&Node>,
    ) -> Result<(), CodeGenError> {
        let init_value = match initializer {
            Some(node) => Some(self.lower_node(node)?),
            None => None,
        };

        let (llvm, source) = match type_name {
            Some(source) => (self.map_type(source)?, source.to_string()),
            None => {
                let info = init_value
                    .as_deref()
                    .map(|v| self.value_type_info(v))
                    .unwrap_or_else(TypeInfo::default_int);
                (info.llvm_type, info.source_type)
            }
        };

        writeln!(&mut self.output, "  %{} = alloca {}", name, llvm)?;
        if let Some(value) = init_value {
            let info = self.value_type_info(&value);
            let stored = if info.llvm_type != llvm {
                let target = TypeInfo {
                    llvm_type: llvm.clone(),
                    is_unsigned: super::types::is_unsigned_type(&source),
                    is_float: super::types::is_float_llvm_type(&llvm),
                    source_type: source.clone(),
                };
                self.emit_cast(&value, &info, &target)?
            } else {
                value
            };
            writeln!(
                &mut self.output,
                "  store {} {}, ptr %{}",
                llvm, stored, name
            )?;
        }

        self.symbol_types.insert(name.to_string(), llvm);
        self.rf_types.insert(name.to_string(), source);
        Ok(())
    }

    fn lower_assignment(&mut self, target: &Node, value: &Node) -> Result<(), CodeGenError> {
        let new_value = self.lower_node(value)?;
        let value_info = self.value_type_info(&new_value);

        match target {
            Node::Identifier { name, .. } => {
                if self.function_params.contains(name) {
                    return Err(CodeGenError::UnsupportedOperation(format!(
                        "assignment to by-value parameter '{}'",
                        name
                    )));
                }
                let slot_type = self
                    .symbol_types
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| value_info.llvm_type.clone());
                let stored = if value_info.llvm_type != slot_type {
                    let target_info = TypeInfo {
                        llvm_type: slot_type.clone(),
                        is_unsigned: value_info.is_unsigned,
                        is_float: super::types::is_float_llvm_type(&slot_type),
                        source_type: self.rf_types.get(name).cloned().unwrap_or_default(),
                    };
                    self.emit_cast(&new_value, &value_info, &target_info)?
                } else {
                    new_value
                };
                let slot = if self.global_symbols.contains(name) {
                    format!("@{}", name)
                } else {
                    format!("%{}", name)
                };
                writeln!(
                    &mut self.output,
                    "  store {} {}, ptr {}",
                    slot_type, stored, slot
                )?;
                Ok(())
            }
            Node::Member { object, member, .. } => {
                let (base_ptr, record_name) = self.member_base(object)?;
                let (index, field_type) = self.record_field(&record_name, member)?;
                let field_ptr = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = getelementptr inbounds %struct.{}, ptr {}, i32 0, i32 {}",
                    field_ptr, record_name, base_ptr, index
                )?;
                writeln!(
                    &mut self.output,
                    "  store {} {}, ptr %{}",
                    field_type, new_value, field_ptr
                )?;
                Ok(())
            }
            Node::Index { object, index, .. } => {
                let base = self.lower_node(object)?;
                let idx = self.lower_node(index)?;
                let idx_info = self.value_type_info(&idx);
                let element = value_info.llvm_type.clone();
                let slot = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = getelementptr {}, ptr {}, {} {}",
                    slot, element, base, idx_info.llvm_type, idx
                )?;
                writeln!(
                    &mut self.output,
                    "  store {} {}, ptr %{}",
                    element, new_value, slot
                )?;
                Ok(())
            }
            other => Err(CodeGenError::NotImplemented(format!(
                "assignment target {:?}",
                std::mem::discriminant(other)
            ))),
        }
    }

    fn lower_return(&mut self, value: Option<&Node>) -> Result<(), CodeGenError> {
        match value {
            None => {
                self.emit_frame_pop()?;
                if self.current_return_type == "void" {
                    writeln!(&mut self.output, "  ret void")?;
                } else {
                    let ty = self.current_return_type.clone();
                    writeln!(&mut self.output, "  ret {} {}", ty, zero_value(&ty))?;
                }
            }
            Some(node) => {
                let result = self.lower_node(node)?;
                let info = self.value_type_info(&result);
                let return_type = self.current_return_type.clone();
                let final_value = if info.llvm_type != return_type {
                    let source = self.current_return_source.clone();
                    let target = TypeInfo {
                        llvm_type: return_type.clone(),
                        is_unsigned: super::types::is_unsigned_type(&source),
                        is_float: super::types::is_float_llvm_type(&return_type),
                        source_type: source,
                    };
                    self.emit_cast(&result, &info, &target)?
                } else {
                    result
                };
                self.emit_frame_pop()?;
                writeln!(
                    &mut self.output,
                    "  ret {} {}",
                    return_type, final_value
                )?;
            }
        }
        self.has_return = true;
        self.block_terminated = true;
        Ok(())
    }

    fn lower_throw(&mut self, value: Option<&Node>) -> Result<(), CodeGenError> {
        let (type_ptr, message_ptr) = match value {
            Some(node) => {
                let message = self.lower_node(node)?;
                let info = self.value_type_info(&message);
                let type_name = if info.source_type.is_empty() {
                    "Error".to_string()
                } else {
                    info.source_type.clone()
                };
                let type_ptr = self.string_ptr(&type_name)?;
                (type_ptr, message)
            }
            None => ("null".to_string(), "null".to_string()),
        };
        let mut out = std::mem::take(&mut self.output);
        self.trace.emit_throw(&mut out, &type_ptr, &message_ptr)?;
        self.output = out;
        writeln!(&mut self.output, "  unreachable")?;
        self.block_terminated = true;
        Ok(())
    }

    fn trace_throw_absent(&mut self) -> Result<(), CodeGenError> {
        let mut out = std::mem::take(&mut self.output);
        self.trace.emit_throw_absent(&mut out)?;
        self.output = out;
        writeln!(&mut self.output, "  unreachable")?;
        self.block_terminated = true;
        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: &Node,
        then_body: &[Node],
        else_body: Option<&[Node]>,
    ) -> Result<(), CodeGenError> {
        let cond = self.lower_node(condition)?;
        let then_label = self.fresh_label("then");
        let end_label = self.fresh_label("end");
        let else_label = if else_body.is_some() {
            self.fresh_label("else")
        } else {
            end_label.clone()
        };

        writeln!(
            &mut self.output,
            "  br i1 {}, label %{}, label %{}",
            cond, then_label, else_label
        )?;

        writeln!(&mut self.output, "{}:", then_label)?;
        self.block_terminated = false;
        self.lower_body(then_body)?;
        let then_terminated = self.block_terminated;
        if !then_terminated {
            writeln!(&mut self.output, "  br label %{}", end_label)?;
        }

        let else_terminated = match else_body {
            Some(body) => {
                writeln!(&mut self.output, "{}:", else_label)?;
                self.block_terminated = false;
                self.lower_body(body)?;
                let terminated = self.block_terminated;
                if !terminated {
                    writeln!(&mut self.output, "  br label %{}", end_label)?;
                }
                terminated
            }
            // The false edge reaches the end label directly
            None => false,
        };

        if then_terminated && else_terminated {
            self.block_terminated = true;
        } else {
            writeln!(&mut self.output, "{}:", end_label)?;
            self.block_terminated = false;
        }
        Ok(())
    }

    fn lower_while(&mut self, condition: &Node, body: &[Node]) -> Result<(), CodeGenError> {
        let cond_label = self.fresh_label("while_cond");
        let body_label = self.fresh_label("while_body");
        let end_label = self.fresh_label("while_end");

        writeln!(&mut self.output, "  br label %{}", cond_label)?;
        writeln!(&mut self.output, "{}:", cond_label)?;
        self.block_terminated = false;
        let cond = self.lower_node(condition)?;
        writeln!(
            &mut self.output,
            "  br i1 {}, label %{}, label %{}",
            cond, body_label, end_label
        )?;

        writeln!(&mut self.output, "{}:", body_label)?;
        self.block_terminated = false;
        self.loop_stack.push(LoopLabels {
            continue_label: cond_label.clone(),
            break_label: end_label.clone(),
        });
        self.lower_body(body)?;
        self.loop_stack.pop();
        if !self.block_terminated {
            writeln!(&mut self.output, "  br label %{}", cond_label)?;
        }

        writeln!(&mut self.output, "{}:", end_label)?;
        self.block_terminated = false;
        Ok(())
    }

    fn lower_for(
        &mut self,
        variable: &str,
        start: &Node,
        end: &Node,
        body: &[Node],
    ) -> Result<(), CodeGenError> {
        let start_value = self.lower_node(start)?;
        let info = self.value_type_info(&start_value);
        let end_value = self.lower_node(end)?;

        writeln!(
            &mut self.output,
            "  %{} = alloca {}",
            variable, info.llvm_type
        )?;
        writeln!(
            &mut self.output,
            "  store {} {}, ptr %{}",
            info.llvm_type, start_value, variable
        )?;
        self.symbol_types
            .insert(variable.to_string(), info.llvm_type.clone());
        self.rf_types
            .insert(variable.to_string(), info.source_type.clone());

        let cond_label = self.fresh_label("for_cond");
        let body_label = self.fresh_label("for_body");
        let step_label = self.fresh_label("for_step");
        let end_label = self.fresh_label("for_end");

        writeln!(&mut self.output, "  br label %{}", cond_label)?;
        writeln!(&mut self.output, "{}:", cond_label)?;
        self.block_terminated = false;
        let current = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = load {}, ptr %{}",
            current, info.llvm_type, variable
        )?;
        let compare = self.fresh_temp();
        let pred = if info.is_unsigned { "ult" } else { "slt" };
        writeln!(
            &mut self.output,
            "  %{} = icmp {} {} %{}, {}",
            compare, pred, info.llvm_type, current, end_value
        )?;
        writeln!(
            &mut self.output,
            "  br i1 %{}, label %{}, label %{}",
            compare, body_label, end_label
        )?;

        writeln!(&mut self.output, "{}:", body_label)?;
        self.block_terminated = false;
        self.loop_stack.push(LoopLabels {
            continue_label: step_label.clone(),
            break_label: end_label.clone(),
        });
        self.lower_body(body)?;
        self.loop_stack.pop();
        if !self.block_terminated {
            writeln!(&mut self.output, "  br label %{}", step_label)?;
        }

        writeln!(&mut self.output, "{}:", step_label)?;
        self.block_terminated = false;
        let loaded = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = load {}, ptr %{}",
            loaded, info.llvm_type, variable
        )?;
        let stepped = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = add {} %{}, 1",
            stepped, info.llvm_type, loaded
        )?;
        writeln!(
            &mut self.output,
            "  store {} %{}, ptr %{}",
            info.llvm_type, stepped, variable
        )?;
        writeln!(&mut self.output, "  br label %{}", cond_label)?;

        writeln!(&mut self.output, "{}:", end_label)?;
        self.block_terminated = false;
        Ok(())
    }

    fn lower_when(&mut self, subject: &Node, arms: &[WhenArm]) -> Result<(), CodeGenError> {
        let subject_value = self.lower_node(subject)?;
        let info = self.value_type_info(&subject_value);
        let end_label = self.fresh_label("when_end");

        let value_arms: Vec<&WhenArm> = arms.iter().filter(|a| a.value.is_some()).collect();
        let else_arm = arms.iter().find(|a| a.value.is_none());

        let mut any_open_exit = false;
        for (i, arm) in value_arms.iter().enumerate() {
            let arm_label = self.fresh_label("when_arm");
            let next_label = if i + 1 < value_arms.len() || else_arm.is_some() {
                self.fresh_label("when_check")
            } else {
                end_label.clone()
            };

            let arm_value = self.lower_node(arm.value.as_ref().unwrap())?;
            let compare = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = icmp eq {} {}, {}",
                compare, info.llvm_type, subject_value, arm_value
            )?;
            writeln!(
                &mut self.output,
                "  br i1 %{}, label %{}, label %{}",
                compare, arm_label, next_label
            )?;

            writeln!(&mut self.output, "{}:", arm_label)?;
            self.block_terminated = false;
            self.lower_body(&arm.body)?;
            if !self.block_terminated {
                writeln!(&mut self.output, "  br label %{}", end_label)?;
                any_open_exit = true;
            }

            if next_label != end_label {
                writeln!(&mut self.output, "{}:", next_label)?;
                self.block_terminated = false;
            } else {
                any_open_exit = true;
            }
        }

        if let Some(arm) = else_arm {
            self.block_terminated = false;
            self.lower_body(&arm.body)?;
            if !self.block_terminated {
                writeln!(&mut self.output, "  br label %{}", end_label)?;
                any_open_exit = true;
            }
        }

        if any_open_exit || else_arm.is_none() {
            writeln!(&mut self.output, "{}:", end_label)?;
            self.block_terminated = false;
        } else {
            self.block_terminated = true;
        }
        Ok(())
    }

    /// Member access with menu-case resolution: `Color.Red` reads the
    /// case constant, anything else is a record field load.
    fn lower_member_or_case(
        &mut self,
        object: &Node,
        member: &str,
    ) -> Result<String, CodeGenError> {
        if let Node::Identifier { name, .. } = object {
            if self.generics.is_menu(name) {
                let tmp = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = load i32, ptr @{}_{}",
                    tmp,
                    sanitize_name(name),
                    member
                )?;
                let result = format!("%{}", tmp);
                self.register_temp(result.clone(), TypeInfo::default_int());
                return Ok(result);
            }
        }
        self.lower_member(object, member)
    }

    fn emit_record_type(&mut self, name: &str, fields: &[Field]) -> Result<(), CodeGenError> {
        let mangled = sanitize_name(name);
        if !self.generics.mark_type_emitted(&mangled) {
            return Ok(());
        }
        let mut mapped = Vec::with_capacity(fields.len());
        for field in fields {
            let llvm = self.map_type(&field.type_name)?;
            mapped.push((field.name.clone(), llvm));
        }
        let list = mapped
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            &mut self.type_definitions,
            "%struct.{} = type {{ {} }}",
            mangled, list
        )?;
        self.generics.register_fields(&mangled, mapped);
        Ok(())
    }

    fn emit_menu(&mut self, name: &str, cases: &[String]) -> Result<(), CodeGenError> {
        self.generics.register_menu(name);
        let mangled = sanitize_name(name);
        for (index, case) in cases.iter().enumerate() {
            writeln!(
                &mut self.type_definitions,
                "@{}_{} = constant i32 {}",
                mangled, case, index
            )?;
        }
        Ok(())
    }

    fn emit_preset(
        &mut self,
        name: &str,
        type_name: Option<&str>,
        value: &Node,
    ) -> Result<(), CodeGenError> {
        let Node::Literal {
            value: literal,
            type_suffix,
            ..
        } = value
        else {
            writeln!(
                &mut self.type_definitions,
                "; preset {} requires a literal initializer",
                name
            )?;
            return Ok(());
        };

        use crate::ast::LiteralValue;
        let (llvm, rendered, source) = match literal {
            LiteralValue::Integer(text) => {
                let source = type_name
                    .map(str::to_string)
                    .or_else(|| type_suffix.clone())
                    .unwrap_or_else(|| "s32".to_string());
                (self.map_type(&source)?, text.clone(), source)
            }
            LiteralValue::Float(text) => {
                let source = type_name
                    .map(str::to_string)
                    .unwrap_or_else(|| "f64".to_string());
                let rendered = if text.contains('.') {
                    text.clone()
                } else {
                    format!("{}.0", text)
                };
                (self.map_type(&source)?, rendered, source)
            }
            LiteralValue::Boolean(b) => (
                "i1".to_string(),
                if *b { "1" } else { "0" }.to_string(),
                "bool".to_string(),
            ),
            _ => {
                writeln!(
                    &mut self.type_definitions,
                    "; preset {} requires a scalar literal",
                    name
                )?;
                return Ok(());
            }
        };

        writeln!(
            &mut self.type_definitions,
            "@{} = constant {} {}",
            name, llvm, rendered
        )?;
        self.global_symbols.insert(name.to_string());
        self.symbol_types.insert(name.to_string(), llvm);
        self.rf_types.insert(name.to_string(), source);
        Ok(())
    }
}

/// Apply a substitution map textually to a source type name.
fn apply_substitutions(source: &str, subs: &HashMap<String, String>) -> String {
    let mut result = source.trim().to_string();
    for (param, concrete) in subs {
        result = replace_word(&result, param, concrete);
    }
    result
}

/// Detect a method receiver: `Receiver.method` where `Receiver` is not a
/// namespace. Returns the receiver type name.
fn method_receiver(name: &str, semantics: &crate::semantics::SemanticSymbols) -> Option<String> {
    let dot = name.rfind('.')?;
    let receiver = &name[..dot];
    if semantics.is_namespace(receiver) {
        return None;
    }
    Some(receiver.to_string())
}

/// The zero constant for an LLVM type, used by synthesized returns.
fn zero_value(llvm_type: &str) -> &'static str {
    match llvm_type {
        "ptr" => "null",
        "float" | "double" => "0.0",
        "half" => "0xH0000",
        "fp128" => "0xL00000000000000000000000000000000",
        t if t.starts_with('i') => "0",
        _ => "zeroinitializer",
    }
}
