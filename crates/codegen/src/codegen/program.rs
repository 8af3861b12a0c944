//! Module driver: orchestrates a complete IR module.
//!
//! Traversal happens first (imports, program declarations, deferred
//! generic instantiations, lambdas), writing into the owned buffers;
//! the final module is then assembled in one pass in the fixed section
//! order, and the collected string constants are spliced in at the
//! sentinel as the last rewrite.

use super::error::CodeGenError;
use super::generics::{filter_receiver_params, receiver_type_params};
use super::globals::{escape_llvm_string, STRING_SPLICE_SENTINEL};
use super::mangle::{monomorphic_name, sanitize_name};
use super::runtime::emit_runtime_decls;
use super::state::CodeGen;
use crate::ast::Node;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

impl CodeGen {
    /// Generate the complete LLVM IR module for a program.
    ///
    /// On error the buffer state is undefined; callers must discard.
    pub fn generate(&mut self, program: &Node) -> Result<String, CodeGenError> {
        let Node::Program { declarations } = program else {
            return Err(CodeGenError::NotImplemented(
                "generate() expects a program node".to_string(),
            ));
        };

        self.lower_imported_types()?;
        self.lower_imported_routines()?;

        for declaration in declarations {
            self.lower_node(declaration)?;
        }

        self.flush_pending_instantiations()?;

        let extern_decls = self.harvest_extern_decls()?;
        self.assemble(&extern_decls)
    }

    /// First imported-module pass: records, entities, menus, variants,
    /// and presets. Generic routines are registered as templates so call
    /// sites in the program resolve; their bodies wait for the flush.
    fn lower_imported_types(&mut self) -> Result<(), CodeGenError> {
        let modules: Vec<(String, Node)> = self
            .modules
            .iter()
            .map(|(name, module)| (name.clone(), module.ast.clone()))
            .collect();

        for (module_name, ast) in modules {
            let Node::Program { declarations } = ast else {
                continue;
            };
            writeln!(&mut self.output, "; module {}", module_name)?;
            for declaration in &declarations {
                match declaration {
                    Node::Record { .. }
                    | Node::Entity { .. }
                    | Node::Menu { .. }
                    | Node::Variant { .. }
                    | Node::Preset { .. } => {
                        self.lower_node(declaration)?;
                    }
                    Node::Routine {
                        name, type_params, ..
                    } => {
                        if self.routine_is_template(name, type_params) {
                            self.generics
                                .register_routine_template(name, declaration.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Second imported-module pass: non-generic routine bodies. Each
    /// routine lowers into a scratch region; recoverable errors drop the
    /// scratch, log a warning, and move on. Everything else is fatal.
    fn lower_imported_routines(&mut self) -> Result<(), CodeGenError> {
        let modules: Vec<(String, Node)> = self
            .modules
            .iter()
            .map(|(name, module)| (name.clone(), module.ast.clone()))
            .collect();

        for (module_name, ast) in modules {
            let Node::Program { declarations } = ast else {
                continue;
            };
            for declaration in &declarations {
                let Node::Routine {
                    name, type_params, ..
                } = declaration
                else {
                    continue;
                };
                if self.routine_is_template(name, type_params) {
                    continue;
                }

                let saved = std::mem::take(&mut self.output);
                match self.lower_routine_with_substitutions(
                    declaration,
                    &HashMap::new(),
                    None,
                ) {
                    Ok(()) => {
                        let scratch = std::mem::replace(&mut self.output, saved);
                        self.output.push_str(&scratch);
                    }
                    Err(error) if error.is_recoverable() => {
                        self.output = saved;
                        eprintln!(
                            "Warning: skipping routine '{}' from module '{}': {}",
                            name, module_name, error
                        );
                    }
                    Err(error) => return Err(error),
                }
            }
        }
        Ok(())
    }

    /// Drain the pending queues until everything requested during
    /// traversal (and during the flush itself) is emitted. FIFO order.
    pub(crate) fn flush_pending_instantiations(&mut self) -> Result<(), CodeGenError> {
        loop {
            // Record and entity skeletons were emitted when the
            // instantiation was requested; draining only retires the
            // work items
            if self.generics.pop_pending_record().is_some() {
                continue;
            }
            if self.generics.pop_pending_entity().is_some() {
                continue;
            }
            if let Some((name, args)) = self.generics.pop_pending_routine() {
                let Some(template) = self.generics.routine_template(&name).cloned() else {
                    eprintln!(
                        "Warning: no template registered for generic routine '{}'",
                        name
                    );
                    continue;
                };
                let subs = build_instantiation_subs(&name, &template, &args);
                let mangled = monomorphic_name(&name, &args);
                self.lower_routine_with_substitutions(&template, &subs, Some(&mangled))?;
                continue;
            }
            break;
        }
        debug_assert!(self.generics.pending_is_empty());
        Ok(())
    }

    /// Extern declarations from the semantic symbol table. Generic and
    /// `auto`-typed externals are skipped; duplicate signature lines
    /// collapse.
    fn harvest_extern_decls(&mut self) -> Result<String, CodeGenError> {
        let symbols: Vec<_> = self
            .semantics
            .get_all_symbols()
            .iter()
            .filter(|s| s.is_external && !s.is_generic)
            .cloned()
            .collect();

        let mut section = String::new();
        let mut seen: HashSet<String> = HashSet::new();
        for symbol in symbols {
            if symbol
                .parameters
                .iter()
                .any(|p| p.type_name.as_deref().map(|t| t == "auto").unwrap_or(true))
            {
                continue;
            }

            let mut param_types = Vec::with_capacity(symbol.parameters.len());
            for param in &symbol.parameters {
                let source = param.type_name.as_deref().unwrap_or("auto");
                param_types.push(self.map_type(source)?);
            }
            let return_type = match &symbol.return_type {
                Some(source) => self.map_type(source)?,
                None => "void".to_string(),
            };
            let line = format!(
                "declare {} @{}({})",
                return_type,
                sanitize_name(&symbol.name),
                param_types.join(", ")
            );
            if seen.insert(line.clone()) {
                section.push_str(&line);
                section.push('\n');
            }
        }
        Ok(section)
    }

    /// Assemble the final module in the fixed section order.
    fn assemble(&mut self, extern_decls: &str) -> Result<String, CodeGenError> {
        let mut ir = String::new();

        // Header
        let module_name = module_name(&self.source_file);
        writeln!(&mut ir, "; ModuleID = '{}'", module_name)?;
        writeln!(&mut ir, "source_filename = \"{}\"", self.source_file)?;
        writeln!(
            &mut ir,
            "target datalayout = \"{}\"",
            self.platform.data_layout()
        )?;
        writeln!(&mut ir, "target triple = \"{}\"", self.platform.triple())?;
        writeln!(&mut ir)?;

        // External C and language runtime
        emit_runtime_decls(&mut ir, &self.platform)?;

        // Externs harvested from the symbol table
        if !extern_decls.is_empty() {
            writeln!(&mut ir, "; external routines")?;
            ir.push_str(extern_decls);
            writeln!(&mut ir)?;
        }

        // Math and other llvm.* intrinsics referenced by emitted calls
        if !self.used_intrinsics.is_empty() {
            writeln!(&mut ir, "; LLVM intrinsics")?;
            for line in &self.used_intrinsics {
                writeln!(&mut ir, "{}", line)?;
            }
            writeln!(&mut ir)?;
        }

        // Stack-trace runtime declarations
        self.trace.emit_declarations(&mut ir)?;

        // Standard string templates; user constants splice in directly
        // after the canonical .str_fmt declaration
        writeln!(
            &mut ir,
            "@.str_fmt = private unnamed_addr constant [4 x i8] c\"%d\\0A\\00\""
        )?;
        writeln!(&mut ir, "{}", STRING_SPLICE_SENTINEL)?;
        writeln!(
            &mut ir,
            "@.str_fmt_s = private unnamed_addr constant [3 x i8] c\"%s\\00\""
        )?;
        writeln!(
            &mut ir,
            "@.str_fmt_f = private unnamed_addr constant [4 x i8] c\"%f\\0A\\00\""
        )?;
        writeln!(
            &mut ir,
            "@.str_scan_word = private unnamed_addr constant [6 x i8] c\"%255s\\00\""
        )?;
        writeln!(
            &mut ir,
            "@.str_scan_line = private unnamed_addr constant [10 x i8] c\" %255[^\\0A]\\00\""
        )?;
        let overflow = self.crash_messages.overflow().to_string();
        writeln!(
            &mut ir,
            "@.str_overflow = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
            overflow.len() + 1,
            escape_llvm_string(&overflow)?
        )?;
        writeln!(&mut ir)?;

        // Type definitions: records, entities, menus, presets, and every
        // generic skeleton instantiated during traversal
        if !self.type_definitions.is_empty() {
            ir.push_str(&self.type_definitions);
            writeln!(&mut ir)?;
        }

        // Imported and program routine bodies, then deferred generic
        // instantiations (already flushed into the same buffer)
        ir.push_str(&self.output);

        // Lambdas queued during expression lowering
        if !self.lambda_definitions.is_empty() {
            writeln!(&mut ir, "; lambda definitions")?;
            for definition in &self.lambda_definitions {
                ir.push_str(definition);
                writeln!(&mut ir)?;
            }
        }

        // Stack-trace tables and the module initializer
        self.trace.emit_symbol_tables(&mut ir)?;
        self.trace.emit_module_init(&mut ir)?;

        self.splice_string_constants(&mut ir);
        Ok(ir)
    }
}

/// Substitution map for one pending instantiation: receiver type
/// parameters bind first, method-level parameters follow and never
/// overwrite a receiver binding.
fn build_instantiation_subs(
    name: &str,
    template: &Node,
    args: &[String],
) -> HashMap<String, String> {
    let mut params = receiver_type_params(name);
    if let Node::Routine { type_params, .. } = template {
        for param in filter_receiver_params(name, type_params) {
            if !params.contains(&param) {
                params.push(param);
            }
        }
    }
    params.into_iter().zip(args.iter().cloned()).collect()
}

fn module_name(source_file: &str) -> String {
    std::path::Path::new(source_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("main")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{LiteralValue, Node, Parameter, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    fn param(name: &str, type_name: &str) -> Parameter {
        Parameter {
            name: name.to_string(),
            type_name: Some(type_name.to_string()),
            location: loc(),
        }
    }

    fn routine(name: &str, params: Vec<Parameter>, ret: Option<&str>, body: Vec<Node>) -> Node {
        Node::Routine {
            name: name.to_string(),
            type_params: vec![],
            params,
            return_type: ret.map(str::to_string),
            body,
            location: loc(),
        }
    }

    fn ident(name: &str) -> Node {
        Node::Identifier {
            name: name.to_string(),
            location: loc(),
        }
    }

    fn ret(value: Node) -> Node {
        Node::Return {
            value: Some(Box::new(value)),
            location: loc(),
        }
    }

    fn binary(op: &str, left: Node, right: Node) -> Node {
        Node::Binary {
            op: op.to_string(),
            left: Box::new(left),
            right: Box::new(right),
            location: loc(),
        }
    }

    #[test]
    fn test_non_generic_routine_end_to_end() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("add.rf");
        let program = Node::Program {
            declarations: vec![routine(
                "add",
                vec![param("a", "s32"), param("b", "s32")],
                Some("s32"),
                vec![ret(binary("+", ident("a"), ident("b")))],
            )],
        };
        let ir = codegen.generate(&program).unwrap();
        assert!(ir.contains("define i32 @add(i32 %a, i32 %b)"));
        assert!(ir.contains("add i32 %a, %b"));
        assert!(ir.contains("ret i32 %"));
    }

    #[test]
    fn test_module_header() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("demo.rf");
        let ir = codegen
            .generate(&Node::Program {
                declarations: vec![],
            })
            .unwrap();
        assert!(ir.contains("; ModuleID = 'demo'"));
        assert!(ir.contains("source_filename = \"demo.rf\""));
        assert!(ir.contains("target triple = \"x86_64-unknown-linux-gnu\""));
        assert!(ir.contains("target datalayout = "));
    }

    #[test]
    fn test_start_renamed_to_main() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("main.rf");
        let program = Node::Program {
            declarations: vec![routine("start", vec![], None, vec![])],
        };
        let ir = codegen.generate(&program).unwrap();
        assert!(ir.contains("define i32 @main()"));
        assert!(ir.contains("ret i32 0"));
        assert!(!ir.contains("@start"));
    }

    #[test]
    fn test_generic_instantiation_dedupe() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("gen.rf");
        let template = Node::Routine {
            name: "id".to_string(),
            type_params: vec!["T".to_string()],
            params: vec![param("x", "T")],
            return_type: Some("T".to_string()),
            body: vec![ret(ident("x"))],
            location: loc(),
        };
        let call = |value: &str| Node::GenericMethodCall {
            receiver: "id".to_string(),
            type_args: vec!["s32".to_string()],
            method: String::new(),
            args: vec![Node::Literal {
                value: LiteralValue::Integer(value.to_string()),
                type_suffix: None,
                location: loc(),
            }],
            location: loc(),
        };
        let program = Node::Program {
            declarations: vec![
                template,
                routine(
                    "start",
                    vec![],
                    None,
                    vec![
                        Node::Variable {
                            name: "a".to_string(),
                            type_name: Some("s32".to_string()),
                            initializer: Some(Box::new(call("1"))),
                            mutable: false,
                            location: loc(),
                        },
                        Node::Variable {
                            name: "b".to_string(),
                            type_name: Some("s32".to_string()),
                            initializer: Some(Box::new(call("2"))),
                            mutable: false,
                            location: loc(),
                        },
                    ],
                ),
            ],
        };
        let ir = codegen.generate(&program).unwrap();
        // Exactly one definition, two call sites
        assert_eq!(ir.matches("define i32 @id_s32(i32 %x)").count(), 1);
        assert_eq!(ir.matches("call i32 @id_s32").count(), 2);
    }

    #[test]
    fn test_string_constant_spliced_after_str_fmt() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("hello.rf");
        let program = Node::Program {
            declarations: vec![routine(
                "greet",
                vec![],
                Some("text"),
                vec![ret(Node::Literal {
                    value: LiteralValue::Text("hello".to_string()),
                    type_suffix: None,
                    location: loc(),
                })],
            )],
        };
        let ir = codegen.generate(&program).unwrap();
        assert!(!ir.contains(STRING_SPLICE_SENTINEL));
        let fmt_pos = ir.find("@.str_fmt = ").unwrap();
        let hello_pos = ir.find("c\"hello\\00\"").unwrap();
        assert!(hello_pos > fmt_pos);
        assert!(ir.contains("[6 x i8] c\"hello\\00\""));
        assert!(ir.contains("getelementptr inbounds [6 x i8]"));
        assert!(ir.contains("ret ptr %"));
    }

    #[test]
    fn test_checked_add_scenario() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("chk.rf");
        let program = Node::Program {
            declarations: vec![routine(
                "checked",
                vec![param("a", "s32"), param("b", "s32")],
                Some("s32"),
                vec![ret(binary("+?", ident("a"), ident("b")))],
            )],
        };
        let ir = codegen.generate(&program).unwrap();
        assert!(ir.contains("@llvm.sadd.with.overflow.i32(i32 %a, i32 %b)"));
        assert!(ir.contains(", 1"));
        assert!(ir.contains("br i1 %"));
        assert!(ir.contains("call void @rf_crash"));
        assert!(ir.contains("unreachable"));
    }

    #[test]
    fn test_every_define_is_closed() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("multi.rf");
        let program = Node::Program {
            declarations: vec![
                routine("f", vec![], None, vec![]),
                routine("g", vec![param("x", "s64")], Some("s64"), vec![ret(ident("x"))]),
                routine("start", vec![], None, vec![]),
            ],
        };
        let ir = codegen.generate(&program).unwrap();
        let defines = ir.matches("define ").count();
        let closes = ir.lines().filter(|l| *l == "}").count();
        assert_eq!(defines, closes);
    }

    #[test]
    fn test_push_frame_paired_with_pop() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("trace.rf");
        let program = Node::Program {
            declarations: vec![routine(
                "f",
                vec![param("x", "s32")],
                Some("s32"),
                vec![
                    Node::If {
                        condition: Box::new(binary(
                            ">",
                            ident("x"),
                            Node::Literal {
                                value: LiteralValue::Integer("0".to_string()),
                                type_suffix: None,
                                location: loc(),
                            },
                        )),
                        then_body: vec![ret(ident("x"))],
                        else_body: None,
                        location: loc(),
                    },
                    ret(ident("x")),
                ],
            )],
        };
        let ir = codegen.generate(&program).unwrap();
        let pushes = ir.matches("call void @rf_stacktrace_push").count();
        let pops = ir.matches("call void @rf_stacktrace_pop").count();
        assert_eq!(pushes, 1);
        // Two explicit returns, each preceded by a pop
        assert_eq!(pops, 2);
    }

    #[test]
    fn test_imported_module_routine_warning_recovers() {
        use crate::semantics::{LoadedModule, ModuleRegistry};

        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("main.rf");

        // A routine whose parameter type is missing: recoverable
        let broken = Node::Routine {
            name: "broken".to_string(),
            type_params: vec![],
            params: vec![Parameter {
                name: "x".to_string(),
                type_name: None,
                location: loc(),
            }],
            return_type: None,
            body: vec![],
            location: loc(),
        };
        let fine = routine("fine", vec![], None, vec![]);

        let mut registry = ModuleRegistry::new();
        registry.insert(
            "helpers",
            LoadedModule {
                path: "helpers.rf".into(),
                ast: Node::Program {
                    declarations: vec![broken, fine],
                },
            },
        );
        codegen.set_modules(registry);

        let ir = codegen
            .generate(&Node::Program {
                declarations: vec![],
            })
            .unwrap();
        assert!(!ir.contains("@broken"));
        assert!(ir.contains("define void @fine()"));
    }

    #[test]
    fn test_module_ctor_list_present() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("main.rf");
        let ir = codegen
            .generate(&Node::Program {
                declarations: vec![],
            })
            .unwrap();
        assert!(ir.contains("@llvm.global_ctors"));
        assert!(ir.contains("@rf_file_table"));
        assert!(ir.contains("@rf_routine_table"));
        assert!(ir.contains("@rf_type_table"));
    }
}
