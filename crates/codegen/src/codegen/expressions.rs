//! Expression lowering.
//!
//! Every expression emitter returns the value text to embed in later
//! instructions: a temporary (`%tmp3`), a parameter (`%x`), a literal
//! (`42`), or `null`. Each produced value is registered in the
//! temporary-type map before it is returned, so downstream emitters can
//! select signed/unsigned/float opcodes without re-walking the tree.

use super::error::CodeGenError;
use super::mangle::{monomorphic_name, sanitize_name};
use super::state::{CodeGen, TypeInfo};
use super::types::{float_rank, int_width, is_unsigned_type, parse_generic, split_generic_args};
use crate::ast::{LiteralValue, Node, Parameter, SourceLocation};
use std::fmt::Write as _;

/// Overflow behavior selected by the operator spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverflowVariant {
    /// Plain opcode, two's-complement wrap.
    Wrap,
    /// Clamp to the type bounds.
    Saturate,
    /// Trap through the crash runtime on overflow.
    Checked,
    /// Plain opcode, overflow is the caller's problem.
    Unchecked,
}

impl CodeGen {
    /// Emit a `getelementptr` to the first byte of a text constant.
    pub(crate) fn string_ptr(&mut self, content: &str) -> Result<String, CodeGenError> {
        let (global, len) = self.get_string_global(content)?;
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = getelementptr inbounds [{} x i8], ptr {}, i64 0, i64 0",
            tmp, len, global
        )?;
        let value = format!("%{}", tmp);
        self.register_temp(value.clone(), TypeInfo::byte_pointer());
        Ok(value)
    }

    pub(crate) fn lower_literal(
        &mut self,
        value: &LiteralValue,
        type_suffix: Option<&str>,
    ) -> Result<String, CodeGenError> {
        match value {
            LiteralValue::Integer(text) => {
                let source = type_suffix.unwrap_or("s32").to_string();
                let info = self.type_info_for(&source)?;
                self.register_temp(text.clone(), info);
                Ok(text.clone())
            }
            LiteralValue::Float(text) => {
                let source = type_suffix.unwrap_or("f64").to_string();
                let info = self.type_info_for(&source)?;
                // LLVM float constants need a decimal point or exponent
                let rendered = if text.contains('.') || text.contains('e') || text.contains('E') {
                    text.clone()
                } else {
                    format!("{}.0", text)
                };
                self.register_temp(rendered.clone(), info);
                Ok(rendered)
            }
            LiteralValue::Boolean(b) => {
                let rendered = if *b { "1" } else { "0" }.to_string();
                self.register_temp(rendered.clone(), TypeInfo::boolean());
                Ok(rendered)
            }
            LiteralValue::Text(text) => self.string_ptr(text),
            LiteralValue::Letter(c) => {
                let rendered = format!("{}", *c as u32);
                let info = self.type_info_for("letter")?;
                self.register_temp(rendered.clone(), info);
                Ok(rendered)
            }
            LiteralValue::None => {
                self.register_temp("null", TypeInfo::byte_pointer());
                Ok("null".to_string())
            }
        }
    }

    pub(crate) fn lower_identifier(&mut self, name: &str) -> Result<String, CodeGenError> {
        if name == "None" {
            self.register_temp("null", TypeInfo::byte_pointer());
            return Ok("null".to_string());
        }

        // By-value parameters are referenced directly; locals live in
        // stack slots and must be loaded
        if self.function_params.contains(name) {
            let value = format!("%{}", name);
            let info = self.identifier_type_info(name);
            self.register_temp(value.clone(), info);
            return Ok(value);
        }

        // Module-level presets live behind @-globals
        if self.global_symbols.contains(name) {
            let llvm_type = self
                .symbol_types
                .get(name)
                .cloned()
                .unwrap_or_else(|| "i32".to_string());
            let tmp = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = load {}, ptr @{}",
                tmp, llvm_type, name
            )?;
            let value = format!("%{}", tmp);
            let info = self.identifier_type_info(name);
            self.register_temp(value.clone(), info);
            return Ok(value);
        }

        let llvm_type = self
            .symbol_types
            .get(name)
            .cloned()
            .unwrap_or_else(|| "i32".to_string());
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = load {}, ptr %{}",
            tmp, llvm_type, name
        )?;
        let value = format!("%{}", tmp);
        let info = self.identifier_type_info(name);
        self.register_temp(value.clone(), info);
        Ok(value)
    }

    /// Type facts for an in-scope identifier, from the symbol maps.
    pub(crate) fn identifier_type_info(&self, name: &str) -> TypeInfo {
        let llvm_type = self
            .symbol_types
            .get(name)
            .cloned()
            .unwrap_or_else(|| "i32".to_string());
        let source_type = self
            .rf_types
            .get(name)
            .cloned()
            .unwrap_or_else(|| "s32".to_string());
        TypeInfo {
            is_unsigned: is_unsigned_type(&source_type),
            is_float: super::types::is_float_llvm_type(&llvm_type),
            llvm_type,
            source_type,
        }
    }

    pub(crate) fn lower_unary(
        &mut self,
        op: &str,
        operand: &Node,
    ) -> Result<String, CodeGenError> {
        let value = self.lower_node(operand)?;
        let info = self.value_type_info(&value);
        let tmp = self.fresh_temp();
        match op {
            "-" => {
                if info.is_float {
                    writeln!(
                        &mut self.output,
                        "  %{} = fneg {} {}",
                        tmp, info.llvm_type, value
                    )?;
                } else {
                    writeln!(
                        &mut self.output,
                        "  %{} = sub {} 0, {}",
                        tmp, info.llvm_type, value
                    )?;
                }
            }
            "not" => {
                writeln!(&mut self.output, "  %{} = xor i1 {}, true", tmp, value)?;
                let result = format!("%{}", tmp);
                self.register_temp(result.clone(), TypeInfo::boolean());
                return Ok(result);
            }
            "~" => {
                writeln!(
                    &mut self.output,
                    "  %{} = xor {} {}, -1",
                    tmp, info.llvm_type, value
                )?;
            }
            other => {
                return Err(CodeGenError::UnsupportedOperation(format!(
                    "unary operator '{}'",
                    other
                )));
            }
        }
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), info);
        Ok(result)
    }

    pub(crate) fn lower_binary(
        &mut self,
        op: &str,
        left: &Node,
        right: &Node,
    ) -> Result<String, CodeGenError> {
        let lhs = self.lower_node(left)?;
        let rhs = self.lower_node(right)?;
        self.lower_binary_values(op, &lhs, &rhs)
    }

    /// Binary lowering over already-evaluated operands. Chained
    /// comparisons reuse this to keep single evaluation of the middles.
    pub(crate) fn lower_binary_values(
        &mut self,
        op: &str,
        lhs: &str,
        rhs: &str,
    ) -> Result<String, CodeGenError> {
        // Operand type facts: prefer whichever side was registered
        let info = if self.temp_types.contains_key(lhs) {
            self.value_type_info(lhs)
        } else {
            self.value_type_info(rhs)
        };

        let (base, variant) = split_operator(op);
        match base {
            "+" | "-" | "*" => self.lower_arithmetic(base, variant, lhs, rhs, &info),
            "/" => self.lower_division(lhs, rhs, &info),
            "//" => self.lower_true_division(lhs, rhs, &info),
            "%" => self.lower_modulo(lhs, rhs, &info),
            "<" | "<=" | ">" | ">=" | "==" | "!=" => {
                self.lower_comparison(base, lhs, rhs, &info)
            }
            "and" | "or" => {
                let tmp = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = {} i1 {}, {}",
                    tmp, base, lhs, rhs
                )?;
                let result = format!("%{}", tmp);
                self.register_temp(result.clone(), TypeInfo::boolean());
                Ok(result)
            }
            other => Err(CodeGenError::UnsupportedOperation(format!(
                "binary operator '{}'",
                other
            ))),
        }
    }

    fn lower_arithmetic(
        &mut self,
        base: &str,
        variant: OverflowVariant,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        if info.is_float {
            let opcode = match base {
                "+" => "fadd",
                "-" => "fsub",
                _ => "fmul",
            };
            let tmp = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = {} {} {}, {}",
                tmp, opcode, info.llvm_type, lhs, rhs
            )?;
            let result = format!("%{}", tmp);
            self.register_temp(result.clone(), info.clone());
            return Ok(result);
        }

        match variant {
            OverflowVariant::Wrap | OverflowVariant::Unchecked => {
                let opcode = match base {
                    "+" => "add",
                    "-" => "sub",
                    _ => "mul",
                };
                let tmp = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "  %{} = {} {} {}, {}",
                    tmp, opcode, info.llvm_type, lhs, rhs
                )?;
                let result = format!("%{}", tmp);
                self.register_temp(result.clone(), info.clone());
                Ok(result)
            }
            OverflowVariant::Saturate => match base {
                "+" | "-" => self.lower_saturating_addsub(base, lhs, rhs, info),
                _ => self.lower_saturating_mul(lhs, rhs, info),
            },
            OverflowVariant::Checked => self.lower_checked_arithmetic(base, lhs, rhs, info),
        }
    }

    fn lower_saturating_addsub(
        &mut self,
        base: &str,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        let sign = if info.is_unsigned { 'u' } else { 's' };
        let op = if base == "+" { "add" } else { "sub" };
        let intrinsic = format!("llvm.{}{}.sat.{}", sign, op, info.llvm_type);
        self.declare_intrinsic(format!(
            "declare {} @{}({}, {})",
            info.llvm_type, intrinsic, info.llvm_type, info.llvm_type
        ));
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = call {} @{}({} {}, {} {})",
            tmp, info.llvm_type, intrinsic, info.llvm_type, lhs, info.llvm_type, rhs
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), info.clone());
        Ok(result)
    }

    /// Saturating multiply has no LLVM intrinsic; detect overflow and
    /// select the bound. For signed operands the bound follows the sign
    /// parity: same signs clamp to max, different signs to min.
    fn lower_saturating_mul(
        &mut self,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        let width = int_width(&info.llvm_type).ok_or_else(|| {
            CodeGenError::UnsupportedOperation(format!(
                "saturating multiply on '{}'",
                info.llvm_type
            ))
        })?;
        let (min, max) = int_bounds(width, info.is_unsigned);

        let (value, overflow) = self.emit_overflow_intrinsic("mul", lhs, rhs, info)?;

        let bound = if info.is_unsigned {
            max.to_string()
        } else {
            // xor of the operands is negative exactly when the signs differ
            let parity = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = xor {} {}, {}",
                parity, info.llvm_type, lhs, rhs
            )?;
            let differ = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = icmp slt {} %{}, 0",
                differ, info.llvm_type, parity
            )?;
            let select = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = select i1 %{}, {} {}, {} {}",
                select, differ, info.llvm_type, min, info.llvm_type, max
            )?;
            format!("%{}", select)
        };

        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = select i1 {}, {} {}, {} {}",
            tmp, overflow, info.llvm_type, bound, info.llvm_type, value
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), info.clone());
        Ok(result)
    }

    fn lower_checked_arithmetic(
        &mut self,
        base: &str,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        let op = match base {
            "+" => "add",
            "-" => "sub",
            _ => "mul",
        };
        let (value, overflow) = self.emit_overflow_intrinsic(op, lhs, rhs, info)?;
        self.emit_overflow_trap(&overflow)?;
        self.register_temp(value.clone(), info.clone());
        Ok(value)
    }

    /// Call the `*.with.overflow` intrinsic, returning (value text,
    /// overflow-flag text).
    pub(crate) fn emit_overflow_intrinsic(
        &mut self,
        op: &str,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<(String, String), CodeGenError> {
        let sign = if info.is_unsigned { 'u' } else { 's' };
        let intrinsic = format!("llvm.{}{}.with.overflow.{}", sign, op, info.llvm_type);
        self.declare_intrinsic(format!(
            "declare {{ {}, i1 }} @{}({}, {})",
            info.llvm_type, intrinsic, info.llvm_type, info.llvm_type
        ));
        let pair = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = call {{ {}, i1 }} @{}({} {}, {} {})",
            pair, info.llvm_type, intrinsic, info.llvm_type, lhs, info.llvm_type, rhs
        )?;
        let value = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = extractvalue {{ {}, i1 }} %{}, 0",
            value, info.llvm_type, pair
        )?;
        let flag = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = extractvalue {{ {}, i1 }} %{}, 1",
            flag, info.llvm_type, pair
        )?;
        Ok((format!("%{}", value), format!("%{}", flag)))
    }

    /// Branch to a crash block when the overflow flag is set; execution
    /// continues in a fresh block otherwise.
    pub(crate) fn emit_overflow_trap(&mut self, flag: &str) -> Result<(), CodeGenError> {
        let trap = self.fresh_label("overflow_trap");
        let cont = self.fresh_label("overflow_ok");
        writeln!(
            &mut self.output,
            "  br i1 {}, label %{}, label %{}",
            flag, trap, cont
        )?;
        writeln!(&mut self.output, "{}:", trap)?;
        let message = self.crash_messages.overflow().to_string();
        let len = message.len() + 1;
        let msg_ptr = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = getelementptr inbounds [{} x i8], ptr @.str_overflow, i64 0, i64 0",
            msg_ptr, len
        )?;
        writeln!(
            &mut self.output,
            "  call void @rf_crash(ptr %{})",
            msg_ptr
        )?;
        writeln!(&mut self.output, "  unreachable")?;
        writeln!(&mut self.output, "{}:", cont)?;
        Ok(())
    }

    fn lower_division(
        &mut self,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        let opcode = if info.is_float {
            "fdiv"
        } else if info.is_unsigned {
            "udiv"
        } else {
            "sdiv"
        };
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = {} {} {}, {}",
            tmp, opcode, info.llvm_type, lhs, rhs
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), info.clone());
        Ok(result)
    }

    /// `//` is true division: integer operands are promoted to double.
    fn lower_true_division(
        &mut self,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        if info.is_float {
            let tmp = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = fdiv {} {}, {}",
                tmp, info.llvm_type, lhs, rhs
            )?;
            let result = format!("%{}", tmp);
            self.register_temp(result.clone(), info.clone());
            return Ok(result);
        }

        let convert = if info.is_unsigned { "uitofp" } else { "sitofp" };
        let lf = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = {} {} {} to double",
            lf, convert, info.llvm_type, lhs
        )?;
        let rf = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = {} {} {} to double",
            rf, convert, info.llvm_type, rhs
        )?;
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = fdiv double %{}, %{}",
            tmp, lf, rf
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(
            result.clone(),
            TypeInfo {
                llvm_type: "double".to_string(),
                is_unsigned: false,
                is_float: true,
                source_type: "f64".to_string(),
            },
        );
        Ok(result)
    }

    fn lower_modulo(
        &mut self,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        let opcode = if info.is_float {
            "frem"
        } else if info.is_unsigned {
            "urem"
        } else {
            "srem"
        };
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = {} {} {}, {}",
            tmp, opcode, info.llvm_type, lhs, rhs
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), info.clone());
        Ok(result)
    }

    fn lower_comparison(
        &mut self,
        base: &str,
        lhs: &str,
        rhs: &str,
        info: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        let tmp = self.fresh_temp();
        if info.is_float {
            let pred = match base {
                "<" => "olt",
                "<=" => "ole",
                ">" => "ogt",
                ">=" => "oge",
                "==" => "oeq",
                _ => "one",
            };
            writeln!(
                &mut self.output,
                "  %{} = fcmp {} {} {}, {}",
                tmp, pred, info.llvm_type, lhs, rhs
            )?;
        } else {
            let pred = match (base, info.is_unsigned) {
                ("<", false) => "slt",
                ("<", true) => "ult",
                ("<=", false) => "sle",
                ("<=", true) => "ule",
                (">", false) => "sgt",
                (">", true) => "ugt",
                (">=", false) => "sge",
                (">=", true) => "uge",
                ("==", _) => "eq",
                _ => "ne",
            };
            writeln!(
                &mut self.output,
                "  %{} = icmp {} {} {}, {}",
                tmp, pred, info.llvm_type, lhs, rhs
            )?;
        }
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), TypeInfo::boolean());
        Ok(result)
    }

    /// `a < b < c` desugars to `(a<b) and (b<c)`; every operand is
    /// evaluated exactly once, then the pairwise results AND-reduce.
    pub(crate) fn lower_chained_comparison(
        &mut self,
        operands: &[Node],
        operators: &[String],
    ) -> Result<String, CodeGenError> {
        if operands.len() < 2 || operators.len() != operands.len() - 1 {
            return Err(CodeGenError::UnsupportedOperation(
                "malformed chained comparison".to_string(),
            ));
        }

        let mut values = Vec::with_capacity(operands.len());
        for operand in operands {
            values.push(self.lower_node(operand)?);
        }

        let mut comparisons = Vec::with_capacity(operators.len());
        for (i, op) in operators.iter().enumerate() {
            comparisons.push(self.lower_binary_values(op, &values[i], &values[i + 1])?);
        }

        let mut acc = comparisons[0].clone();
        for next in &comparisons[1..] {
            let tmp = self.fresh_temp();
            writeln!(&mut self.output, "  %{} = and i1 {}, {}", tmp, acc, next)?;
            acc = format!("%{}", tmp);
        }
        self.register_temp(acc.clone(), TypeInfo::boolean());
        Ok(acc)
    }

    /// Ternary lowering via a result slot; both arms run in their own
    /// blocks and store into the slot. The slot type comes from shallow
    /// inference so the alloca can precede the branch.
    pub(crate) fn lower_conditional(
        &mut self,
        condition: &Node,
        then_value: &Node,
        else_value: &Node,
    ) -> Result<String, CodeGenError> {
        let cond = self.lower_node(condition)?;
        let then_label = self.fresh_label("cond_then");
        let else_label = self.fresh_label("cond_else");
        let end_label = self.fresh_label("cond_end");

        let result_source = self.infer_lambda_return_type(then_value);
        let info = self.type_info_for(&result_source)?;

        let slot = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = alloca {}",
            slot, info.llvm_type
        )?;
        writeln!(
            &mut self.output,
            "  br i1 {}, label %{}, label %{}",
            cond, then_label, else_label
        )?;

        writeln!(&mut self.output, "{}:", then_label)?;
        self.block_terminated = false;
        let then_result = self.lower_node(then_value)?;
        writeln!(
            &mut self.output,
            "  store {} {}, ptr %{}",
            info.llvm_type, then_result, slot
        )?;
        writeln!(&mut self.output, "  br label %{}", end_label)?;

        writeln!(&mut self.output, "{}:", else_label)?;
        self.block_terminated = false;
        let else_result = self.lower_node(else_value)?;
        writeln!(
            &mut self.output,
            "  store {} {}, ptr %{}",
            info.llvm_type, else_result, slot
        )?;
        writeln!(&mut self.output, "  br label %{}", end_label)?;

        writeln!(&mut self.output, "{}:", end_label)?;
        self.block_terminated = false;
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = load {}, ptr %{}",
            tmp, info.llvm_type, slot
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), info);
        Ok(result)
    }

    pub(crate) fn lower_type_conversion(
        &mut self,
        target_type: &str,
        value: &Node,
    ) -> Result<String, CodeGenError> {
        let source = self.lower_node(value)?;
        let from = self.value_type_info(&source);
        let to = self.type_info_for(target_type)?;
        let result = self.emit_cast(&source, &from, &to)?;
        Ok(result)
    }

    /// Select the cast instruction for a `(from, to)` type pair.
    pub(crate) fn emit_cast(
        &mut self,
        value: &str,
        from: &TypeInfo,
        to: &TypeInfo,
    ) -> Result<String, CodeGenError> {
        if from.llvm_type == to.llvm_type {
            // Same representation; re-register under the target's facts
            self.register_temp(value.to_string(), to.clone());
            return Ok(value.to_string());
        }

        let from_ptr = from.llvm_type == "ptr";
        let to_ptr = to.llvm_type == "ptr";
        let from_float = from.is_float;
        let to_float = to.is_float;

        let instruction = if from_float && !to_float {
            if to.is_unsigned { "fptoui" } else { "fptosi" }
        } else if !from_float && to_float && !from_ptr {
            if from.is_unsigned { "uitofp" } else { "sitofp" }
        } else if from_float && to_float {
            let from_rank = float_rank(&from.llvm_type).unwrap_or(64);
            let to_rank = float_rank(&to.llvm_type).unwrap_or(64);
            if to_rank < from_rank { "fptrunc" } else { "fpext" }
        } else if from_ptr && !to_ptr {
            "ptrtoint"
        } else if !from_ptr && to_ptr {
            "inttoptr"
        } else {
            let from_width = int_width(&from.llvm_type).unwrap_or(32);
            let to_width = int_width(&to.llvm_type).unwrap_or(32);
            if to_width < from_width {
                "trunc"
            } else if to_width > from_width {
                if from.is_unsigned { "zext" } else { "sext" }
            } else {
                "bitcast"
            }
        };

        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = {} {} {} to {}",
            tmp, instruction, from.llvm_type, value, to.llvm_type
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(result.clone(), to.clone());
        Ok(result)
    }

    /// Lambdas lower into queued standalone definitions; the expression
    /// value is the function symbol. Captured free variables are a
    /// caller error (no closure support).
    pub(crate) fn lower_lambda(
        &mut self,
        params: &[Parameter],
        body: &Node,
    ) -> Result<String, CodeGenError> {
        let lambda_name = format!("__lambda_{}", self.lambda_counter);
        self.lambda_counter += 1;

        let return_source = self.infer_lambda_return_type(body);
        let return_type = self.map_type(&return_source)?;

        // Save the lowering state, build the definition in a scratch
        // buffer, restore
        let saved_output = std::mem::take(&mut self.output);
        let saved_params = std::mem::take(&mut self.function_params);
        let saved_symbols = std::mem::take(&mut self.symbol_types);
        let saved_rf = std::mem::take(&mut self.rf_types);
        let saved_terminated = self.block_terminated;
        let saved_return = std::mem::replace(&mut self.current_return_type, return_type.clone());
        let saved_return_source =
            std::mem::replace(&mut self.current_return_source, return_source.clone());

        let mut param_list = Vec::with_capacity(params.len());
        for param in params {
            let source = param.type_name.clone().unwrap_or_else(|| "s32".to_string());
            let llvm = self.map_type(&source)?;
            param_list.push(format!("{} %{}", llvm, param.name));
            self.function_params.insert(param.name.clone());
            self.symbol_types.insert(param.name.clone(), llvm);
            self.rf_types.insert(param.name.clone(), source);
        }

        writeln!(
            &mut self.output,
            "define internal {} @{}({}) {{",
            return_type,
            lambda_name,
            param_list.join(", ")
        )?;
        writeln!(&mut self.output, "entry:")?;
        self.block_terminated = false;

        let body_value = self.lower_node(body)?;
        let body_info = self.value_type_info(&body_value);
        let return_info = self.type_info_for(&return_source)?;
        let final_value = if body_info.llvm_type != return_type {
            self.emit_cast(&body_value, &body_info, &return_info)?
        } else {
            body_value
        };
        if return_type == "void" {
            writeln!(&mut self.output, "  ret void")?;
        } else {
            writeln!(&mut self.output, "  ret {} {}", return_type, final_value)?;
        }
        writeln!(&mut self.output, "}}")?;

        let definition = std::mem::replace(&mut self.output, saved_output);
        self.lambda_definitions.push(definition);
        self.function_params = saved_params;
        self.symbol_types = saved_symbols;
        self.rf_types = saved_rf;
        self.block_terminated = saved_terminated;
        self.current_return_type = saved_return;
        self.current_return_source = saved_return_source;

        let symbol = format!("@{}", lambda_name);
        self.register_temp(symbol.clone(), TypeInfo::byte_pointer());
        Ok(symbol)
    }

    /// Shallow return-type inference for lambda bodies.
    fn infer_lambda_return_type(&self, body: &Node) -> String {
        match body {
            Node::Literal {
                value, type_suffix, ..
            } => match value {
                LiteralValue::Integer(_) => {
                    type_suffix.clone().unwrap_or_else(|| "s32".to_string())
                }
                LiteralValue::Float(_) => {
                    type_suffix.clone().unwrap_or_else(|| "f64".to_string())
                }
                LiteralValue::Boolean(_) => "bool".to_string(),
                LiteralValue::Text(_) => "text".to_string(),
                LiteralValue::Letter(_) => "letter".to_string(),
                LiteralValue::None => "text".to_string(),
            },
            Node::Binary { op, left, .. } => {
                if matches!(op.as_str(), "<" | "<=" | ">" | ">=" | "==" | "!=" | "and" | "or")
                {
                    "bool".to_string()
                } else {
                    self.infer_lambda_return_type(left)
                }
            }
            Node::Identifier { name, .. } => self
                .rf_types
                .get(name)
                .cloned()
                .unwrap_or_else(|| "s32".to_string()),
            Node::Conditional { then_value, .. } => self.infer_lambda_return_type(then_value),
            Node::Call { callee, .. } => self
                .semantics
                .get_all_symbols()
                .iter()
                .find(|s| &s.name == callee)
                .and_then(|s| s.return_type.clone())
                .unwrap_or_else(|| "s32".to_string()),
            _ => "s32".to_string(),
        }
    }

    pub(crate) fn lower_member(
        &mut self,
        object: &Node,
        member: &str,
    ) -> Result<String, CodeGenError> {
        let (base_ptr, record_name) = self.member_base(object)?;
        let (index, field_type) = self.record_field(&record_name, member)?;

        let field_ptr = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = getelementptr inbounds %struct.{}, ptr {}, i32 0, i32 {}",
            field_ptr, record_name, base_ptr, index
        )?;
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = load {}, ptr %{}",
            tmp, field_type, field_ptr
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(
            result.clone(),
            TypeInfo {
                is_float: super::types::is_float_llvm_type(&field_type),
                llvm_type: field_type,
                is_unsigned: false,
                source_type: String::new(),
            },
        );
        Ok(result)
    }

    /// Resolve the base pointer and mangled record name for a member
    /// access. Generic sources resolve to their monomorphic struct name.
    pub(crate) fn member_base(
        &mut self,
        object: &Node,
    ) -> Result<(String, String), CodeGenError> {
        let value = self.lower_node(object)?;
        let info = self.value_type_info(&value);
        let source = info.source_type.trim();
        let record_name = match parse_generic(source) {
            Some((base, args_str)) => monomorphic_name(base, &split_generic_args(args_str)),
            None => sanitize_name(source),
        };
        Ok((value, record_name))
    }

    /// Look up a field's index and LLVM type in a record layout.
    pub(crate) fn record_field(
        &mut self,
        record_name: &str,
        member: &str,
    ) -> Result<(usize, String), CodeGenError> {
        let fields = self.generics.record_fields(record_name).ok_or_else(|| {
            CodeGenError::UnsupportedOperation(format!(
                "member access on unknown record '{}'",
                record_name
            ))
        })?;
        fields
            .iter()
            .position(|(name, _)| name == member)
            .map(|i| (i, fields[i].1.clone()))
            .ok_or_else(|| {
                CodeGenError::UnsupportedOperation(format!(
                    "record '{}' has no field '{}'",
                    record_name, member
                ))
            })
    }

    pub(crate) fn lower_index(
        &mut self,
        object: &Node,
        index: &Node,
    ) -> Result<String, CodeGenError> {
        let base = self.lower_node(object)?;
        let base_info = self.value_type_info(&base);
        let idx = self.lower_node(index)?;
        let idx_info = self.value_type_info(&idx);

        let element_source = element_type_of(&base_info.source_type);
        let element = self.map_type(&element_source)?;

        let slot = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = getelementptr {}, ptr {}, {} {}",
            slot, element, base, idx_info.llvm_type, idx
        )?;
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = load {}, ptr %{}",
            tmp, element, slot
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(
            result.clone(),
            TypeInfo {
                is_unsigned: is_unsigned_type(&element_source),
                is_float: super::types::is_float_llvm_type(&element),
                llvm_type: element,
                source_type: element_source,
            },
        );
        Ok(result)
    }

    pub(crate) fn lower_range(
        &mut self,
        start: &Node,
        end: &Node,
    ) -> Result<String, CodeGenError> {
        let start_value = self.lower_node(start)?;
        let info = self.value_type_info(&start_value);
        let end_value = self.lower_node(end)?;

        let slot = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = alloca [2 x {}]",
            slot, info.llvm_type
        )?;
        let lo = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = getelementptr [2 x {}], ptr %{}, i64 0, i64 0",
            lo, info.llvm_type, slot
        )?;
        writeln!(
            &mut self.output,
            "  store {} {}, ptr %{}",
            info.llvm_type, start_value, lo
        )?;
        let hi = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = getelementptr [2 x {}], ptr %{}, i64 0, i64 1",
            hi, info.llvm_type, slot
        )?;
        writeln!(
            &mut self.output,
            "  store {} {}, ptr %{}",
            info.llvm_type, end_value, hi
        )?;
        let result = format!("%{}", slot);
        self.register_temp(result.clone(), TypeInfo::byte_pointer());
        Ok(result)
    }

    pub(crate) fn lower_slice_constructor(
        &mut self,
        element_type: &str,
        length: &Node,
        heap: bool,
    ) -> Result<String, CodeGenError> {
        let element = self.map_type(element_type)?;
        let element_size = self.size_of(&element);
        let len = self.lower_node(length)?;
        let len_info = self.value_type_info(&len);
        let size_type = self.platform.pointer_int_type().to_string();

        // Widen the length to size_t when needed
        let len_wide = if len_info.llvm_type != size_type {
            let widened = self.fresh_temp();
            writeln!(
                &mut self.output,
                "  %{} = sext {} {} to {}",
                widened, len_info.llvm_type, len, size_type
            )?;
            format!("%{}", widened)
        } else {
            len
        };

        let bytes = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = mul {} {}, {}",
            bytes, size_type, len_wide, element_size
        )?;
        let alloc = if heap { "heap_alloc" } else { "stack_alloc" };
        let tmp = self.fresh_temp();
        writeln!(
            &mut self.output,
            "  %{} = call ptr @{}({} %{})",
            tmp, alloc, size_type, bytes
        )?;
        let result = format!("%{}", tmp);
        self.register_temp(
            result.clone(),
            TypeInfo {
                llvm_type: "ptr".to_string(),
                is_unsigned: false,
                is_float: false,
                source_type: format!("Slice<{}>", element_type.trim()),
            },
        );
        Ok(result)
    }

    /// Byte size of a primitive LLVM type on the current target.
    pub(crate) fn size_of(&self, llvm_type: &str) -> u32 {
        match llvm_type {
            "i1" | "i8" => 1,
            "i16" | "half" => 2,
            "i32" | "float" => 4,
            "i64" | "double" => 8,
            "i128" | "fp128" => 16,
            "ptr" => self.platform.pointer_width() / 8,
            _ => self.platform.pointer_width() / 8,
        }
    }

    /// Source-location and current-context builtins are evaluated at
    /// emission time from the call node and routine context.
    pub(crate) fn lower_location_builtin(
        &mut self,
        name: &str,
        location: &SourceLocation,
    ) -> Result<Option<String>, CodeGenError> {
        let result = match name {
            "get_line_number" => {
                let text = location.line.to_string();
                self.register_temp(text.clone(), TypeInfo::default_int());
                Some(text)
            }
            "get_column_number" => {
                let text = location.column.to_string();
                self.register_temp(text.clone(), TypeInfo::default_int());
                Some(text)
            }
            "get_file_name" => {
                let file = location
                    .file
                    .clone()
                    .unwrap_or_else(|| self.source_file.clone());
                Some(self.string_ptr(&file)?)
            }
            "get_caller_name" => {
                let routine = self.current_routine.clone();
                Some(self.string_ptr(&routine)?)
            }
            "get_current_module" => {
                let module = module_name_of(&self.source_file);
                Some(self.string_ptr(&module)?)
            }
            _ => None,
        };
        Ok(result)
    }
}

/// Split an operator spelling into its base and overflow variant.
fn split_operator(op: &str) -> (&str, OverflowVariant) {
    if op.len() > 1 {
        let (base, last) = op.split_at(op.len() - 1);
        if matches!(base, "+" | "-" | "*") {
            match last {
                "%" => return (base, OverflowVariant::Wrap),
                "^" => return (base, OverflowVariant::Saturate),
                "?" => return (base, OverflowVariant::Checked),
                "!" => return (base, OverflowVariant::Unchecked),
                _ => {}
            }
        }
    }
    (op, OverflowVariant::Wrap)
}

/// Min/max literal strings for an integer width and signedness.
pub(crate) fn int_bounds(width: u32, unsigned: bool) -> (&'static str, &'static str) {
    if unsigned {
        let max = match width {
            8 => "255",
            16 => "65535",
            32 => "4294967295",
            64 => "18446744073709551615",
            _ => "340282366920938463463374607431768211455",
        };
        ("0", max)
    } else {
        match width {
            8 => ("-128", "127"),
            16 => ("-32768", "32767"),
            32 => ("-2147483648", "2147483647"),
            64 => ("-9223372036854775808", "9223372036854775807"),
            _ => (
                "-170141183460469231731687303715884105728",
                "170141183460469231731687303715884105727",
            ),
        }
    }
}

/// The element type of an indexable source type.
fn element_type_of(source: &str) -> String {
    if let Some((base, args)) = parse_generic(source) {
        if matches!(base, "RawPointer" | "Slice" | "Text") {
            if let Some(first) = split_generic_args(args).into_iter().next() {
                return first;
            }
        }
    }
    if source == "text" {
        return "letter8".to_string();
    }
    "u8".to_string()
}

/// The module name a source file implies (its stem).
fn module_name_of(source_file: &str) -> String {
    std::path::Path::new(source_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_operator_variants() {
        assert_eq!(split_operator("+"), ("+", OverflowVariant::Wrap));
        assert_eq!(split_operator("+%"), ("+", OverflowVariant::Wrap));
        assert_eq!(split_operator("+^"), ("+", OverflowVariant::Saturate));
        assert_eq!(split_operator("+?"), ("+", OverflowVariant::Checked));
        assert_eq!(split_operator("*!"), ("*", OverflowVariant::Unchecked));
        assert_eq!(split_operator("<="), ("<=", OverflowVariant::Wrap));
    }

    #[test]
    fn test_int_bounds() {
        assert_eq!(int_bounds(8, false), ("-128", "127"));
        assert_eq!(int_bounds(8, true), ("0", "255"));
        assert_eq!(
            int_bounds(64, false),
            ("-9223372036854775808", "9223372036854775807")
        );
        assert_eq!(int_bounds(32, true).1, "4294967295");
    }

    #[test]
    fn test_element_type_of() {
        assert_eq!(element_type_of("RawPointer<s16>"), "s16");
        assert_eq!(element_type_of("Slice<f64>"), "f64");
        assert_eq!(element_type_of("text"), "letter8");
    }
}
