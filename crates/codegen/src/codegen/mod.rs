//! LLVM IR code generation.
//!
//! This module generates LLVM IR as text (.ll modules) from a
//! type-checked RazorForge AST. The generation is split into focused
//! submodules:
//!
//! - `state.rs`: the `CodeGen` owner (buffers, counters, type maps)
//! - `platform.rs`: target triples, data layouts, and type widths
//! - `types.rs`: source type -> LLVM type mapping and substitution
//! - `mangle.rs`: LLVM-safe symbol names, `!`/`?` suffixes, generics
//! - `generics.rs`: templates, instantiation dedupe, pending queues
//! - `expressions.rs`: expression lowering (the visitor core)
//! - `statements.rs`: statements, declarations, control flow
//! - `calls.rs`: builtins, Console stdio mapping, method dispatch
//! - `intrinsics.rs`: the eight intrinsic families
//! - `scoped.rs`: viewing/hijacking/observing/seizing
//! - `stack_trace.rs`: shadow-stack instrumentation and name tables
//! - `globals.rs`: string constants and the splice sentinel
//! - `runtime.rs`: runtime function declarations
//! - `program.rs`: the module driver and section assembly
//! - `error.rs`: error types
//!
//! # Key concepts
//!
//! ## Value texts
//!
//! Every expression emitter returns the text that names its value in
//! subsequent instructions (`%tmp3`, `%x`, `42`, `null`) and registers
//! type facts for it first. LLVM integers are signless, so signedness
//! rides along out-of-band and picks `sdiv` vs `udiv`, `icmp slt` vs
//! `ult`, and the overflow intrinsic family.
//!
//! ## Block termination
//!
//! A single flag tracks whether the current basic block already has a
//! terminator. Emitters that produce `ret`/`br`/`unreachable` set it;
//! block-structured statements reset it at each label they open. The
//! fall-through path of a routine synthesizes a frame pop and a default
//! return only when the flag is still clear.
//!
//! ## Monomorphization
//!
//! Generic routines, records, and entities register templates on first
//! sight. Call sites and type references request instantiations; type
//! skeletons are emitted immediately, routine bodies queue until the
//! end-of-program flush. Instantiation is idempotent per argument list.

mod calls;
mod error;
mod expressions;
mod generics;
mod globals;
mod intrinsics;
mod mangle;
mod platform;
mod program;
mod runtime;
mod scoped;
mod stack_trace;
mod state;
mod statements;
mod types;

// Public re-exports
pub use error::CodeGenError;
pub use mangle::{monomorphic_name, sanitize_name};
pub use platform::{Arch, Os, TargetPlatform};
pub use runtime::{emit_runtime_decls, RuntimeDecl, RUNTIME_DECLARATIONS};
pub use state::{CodeGen, TypeInfo};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{LiteralValue, Node, Parameter, SourceLocation, WhenArm};

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    fn int(text: &str) -> Node {
        Node::Literal {
            value: LiteralValue::Integer(text.to_string()),
            type_suffix: None,
            location: loc(),
        }
    }

    fn ident(name: &str) -> Node {
        Node::Identifier {
            name: name.to_string(),
            location: loc(),
        }
    }

    fn var(name: &str, type_name: &str, init: Node) -> Node {
        Node::Variable {
            name: name.to_string(),
            type_name: Some(type_name.to_string()),
            initializer: Some(Box::new(init)),
            mutable: true,
            location: loc(),
        }
    }

    fn routine(name: &str, params: Vec<(&str, &str)>, ret: Option<&str>, body: Vec<Node>) -> Node {
        Node::Routine {
            name: name.to_string(),
            type_params: vec![],
            params: params
                .into_iter()
                .map(|(n, t)| Parameter {
                    name: n.to_string(),
                    type_name: Some(t.to_string()),
                    location: loc(),
                })
                .collect(),
            return_type: ret.map(str::to_string),
            body,
            location: loc(),
        }
    }

    fn generate(declarations: Vec<Node>) -> String {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("test.rf");
        codegen
            .generate(&Node::Program { declarations })
            .unwrap()
    }

    #[test]
    fn test_viewing_is_a_compile_time_alias() {
        let ir = generate(vec![routine(
            "peek",
            vec![],
            Some("s32"),
            vec![
                var("x", "s32", int("41")),
                Node::Viewing {
                    source: Box::new(ident("x")),
                    handle: "h".to_string(),
                    body: vec![Node::Return {
                        value: Some(Box::new(ident("h"))),
                        location: loc(),
                    }],
                    location: loc(),
                },
            ],
        )]);
        // Alias of the same slot, no lock runtime calls anywhere
        assert!(ir.contains("%h = getelementptr i8, ptr %x, i64 0"));
        assert!(ir.contains("load i32, ptr %h"));
        assert!(!ir.contains("call ptr @mutex_lock"));
        assert!(!ir.contains("call ptr @rwlock_read_lock"));
    }

    #[test]
    fn test_seizing_wraps_body_in_mutex_pair() {
        let ir = generate(vec![routine(
            "bump",
            vec![("s", "Shared<s64, Mutex>")],
            None,
            vec![Node::Seizing {
                source: Box::new(ident("s")),
                handle: "h".to_string(),
                body: vec![Node::IntrinsicCall {
                    name: "store".to_string(),
                    type_args: vec!["s64".to_string()],
                    args: vec![ident("h"), int("7")],
                    location: loc(),
                }],
                location: loc(),
            }],
        )]);
        let lock_pos = ir.find("call ptr @mutex_lock(ptr %s)").unwrap();
        let store_pos = ir.find("store i64 7, ptr %h").unwrap();
        let unlock_pos = ir.find("call void @mutex_unlock(ptr %s)").unwrap();
        assert!(lock_pos < store_pos && store_pos < unlock_pos);
    }

    #[test]
    fn test_observing_uses_read_lock_pair() {
        let ir = generate(vec![routine(
            "read",
            vec![("s", "Shared<s64, ReadWrite>")],
            None,
            vec![Node::Observing {
                source: Box::new(ident("s")),
                handle: "h".to_string(),
                body: vec![],
                location: loc(),
            }],
        )]);
        assert!(ir.contains("%h = call ptr @rwlock_read_lock(ptr %s)"));
        assert!(ir.contains("call void @rwlock_read_unlock(ptr %s)"));
        assert!(!ir.contains("call ptr @mutex_lock"));
    }

    #[test]
    fn test_console_show_picks_format_by_type() {
        let ir = generate(vec![routine(
            "speak",
            vec![],
            None,
            vec![
                Node::Call {
                    callee: "Console.show".to_string(),
                    args: vec![int("7")],
                    location: loc(),
                },
                Node::Call {
                    callee: "Console.show_line".to_string(),
                    args: vec![Node::Literal {
                        value: LiteralValue::Text("hi".to_string()),
                        type_suffix: None,
                        location: loc(),
                    }],
                    location: loc(),
                },
                Node::Call {
                    callee: "Console.flush".to_string(),
                    args: vec![],
                    location: loc(),
                },
            ],
        )]);
        assert!(ir.contains("call i32 (ptr, ...) @printf(ptr %"));
        assert!(ir.contains("call i32 @puts(ptr %"));
        assert!(ir.contains("call i32 @fflush(ptr null)"));
    }

    #[test]
    fn test_while_loop_shape() {
        let ir = generate(vec![routine(
            "spin",
            vec![("n", "s32")],
            None,
            vec![
                var("i", "s32", int("0")),
                Node::While {
                    condition: Box::new(Node::Binary {
                        op: "<".to_string(),
                        left: Box::new(ident("i")),
                        right: Box::new(ident("n")),
                        location: loc(),
                    }),
                    body: vec![Node::Assignment {
                        target: Box::new(ident("i")),
                        value: Box::new(Node::Binary {
                            op: "+".to_string(),
                            left: Box::new(ident("i")),
                            right: Box::new(int("1")),
                            location: loc(),
                        }),
                        location: loc(),
                    }],
                    location: loc(),
                },
            ],
        )]);
        assert!(ir.contains("br label %while_cond"));
        assert!(ir.contains("while_body"));
        assert!(ir.contains("while_end"));
        assert!(ir.contains("icmp slt i32"));
    }

    #[test]
    fn test_for_loop_steps_and_bounds() {
        let ir = generate(vec![routine(
            "count",
            vec![("n", "s32")],
            None,
            vec![Node::For {
                variable: "i".to_string(),
                start: Box::new(int("0")),
                end: Box::new(ident("n")),
                body: vec![Node::Call {
                    callee: "Console.show".to_string(),
                    args: vec![ident("i")],
                    location: loc(),
                }],
                location: loc(),
            }],
        )]);
        assert!(ir.contains("%i = alloca i32"));
        assert!(ir.contains("icmp slt i32 %"));
        assert!(ir.contains("for_body"));
        assert!(ir.contains("for_step"));
        assert!(ir.contains("= add i32 %"));
        assert!(ir.contains("br label %for_cond"));
    }

    #[test]
    fn test_wrap_variant_uses_plain_opcode() {
        let ir = generate(vec![routine(
            "wrap",
            vec![("a", "u8"), ("b", "u8")],
            Some("u8"),
            vec![Node::Return {
                value: Some(Box::new(Node::Binary {
                    op: "+%".to_string(),
                    left: Box::new(ident("a")),
                    right: Box::new(ident("b")),
                    location: loc(),
                })),
                location: loc(),
            }],
        )]);
        assert!(ir.contains("add i8 %a, %b"));
        assert!(!ir.contains("with.overflow"));
        assert!(!ir.contains(".sat."));
    }

    #[test]
    fn test_saturating_add_uses_sat_intrinsic() {
        let ir = generate(vec![routine(
            "clamp",
            vec![("a", "u8"), ("b", "u8")],
            Some("u8"),
            vec![Node::Return {
                value: Some(Box::new(Node::Binary {
                    op: "+^".to_string(),
                    left: Box::new(ident("a")),
                    right: Box::new(ident("b")),
                    location: loc(),
                })),
                location: loc(),
            }],
        )]);
        assert!(ir.contains("call i8 @llvm.uadd.sat.i8(i8 %a, i8 %b)"));
        assert!(ir.contains("declare i8 @llvm.uadd.sat.i8(i8, i8)"));
    }

    #[test]
    fn test_saturating_signed_mul_selects_bound_by_sign_parity() {
        let ir = generate(vec![routine(
            "mulsat",
            vec![("a", "s32"), ("b", "s32")],
            Some("s32"),
            vec![Node::Return {
                value: Some(Box::new(Node::Binary {
                    op: "*^".to_string(),
                    left: Box::new(ident("a")),
                    right: Box::new(ident("b")),
                    location: loc(),
                })),
                location: loc(),
            }],
        )]);
        assert!(ir.contains("@llvm.smul.with.overflow.i32"));
        assert!(ir.contains("xor i32 %a, %b"));
        assert!(ir.contains("select i1"));
        assert!(ir.contains("-2147483648"));
        assert!(ir.contains("2147483647"));
    }

    #[test]
    fn test_chained_comparison_single_evaluation() {
        let ir = generate(vec![routine(
            "between",
            vec![("a", "s32"), ("b", "s32"), ("c", "s32")],
            Some("bool"),
            vec![Node::Return {
                value: Some(Box::new(Node::ChainedComparison {
                    operands: vec![ident("a"), ident("b"), ident("c")],
                    operators: vec!["<".to_string(), "<".to_string()],
                    location: loc(),
                })),
                location: loc(),
            }],
        )]);
        assert!(ir.contains("icmp slt i32 %a, %b"));
        assert!(ir.contains("icmp slt i32 %b, %c"));
        assert!(ir.contains("and i1"));
        assert!(ir.contains("ret i1"));
    }

    #[test]
    fn test_lambda_queued_and_referenced() {
        let ir = generate(vec![routine(
            "uses_lambda",
            vec![],
            Some("text"),
            vec![Node::Return {
                value: Some(Box::new(Node::Lambda {
                    params: vec![Parameter {
                        name: "x".to_string(),
                        type_name: Some("s32".to_string()),
                        location: loc(),
                    }],
                    body: Box::new(Node::Binary {
                        op: "+".to_string(),
                        left: Box::new(ident("x")),
                        right: Box::new(int("1")),
                        location: loc(),
                    }),
                    location: loc(),
                })),
                location: loc(),
            }],
        )]);
        assert!(ir.contains("define internal i32 @__lambda_0(i32 %x)"));
        assert!(ir.contains("ret ptr @__lambda_0"));
        // The lambda body sits in the deferred section
        let lambda_pos = ir.find("define internal i32 @__lambda_0").unwrap();
        let routine_pos = ir.find("define ptr @uses_lambda").unwrap();
        assert!(lambda_pos > routine_pos);
    }

    #[test]
    fn test_none_returns_null_pointer() {
        let ir = generate(vec![routine(
            "nothing",
            vec![],
            Some("text"),
            vec![Node::Return {
                value: Some(Box::new(Node::Literal {
                    value: LiteralValue::None,
                    type_suffix: None,
                    location: loc(),
                })),
                location: loc(),
            }],
        )]);
        assert!(ir.contains("ret ptr null"));
    }

    #[test]
    fn test_when_statement_cascades() {
        let ir = generate(vec![routine(
            "pick",
            vec![("x", "s32")],
            Some("s32"),
            vec![Node::When {
                subject: Box::new(ident("x")),
                arms: vec![
                    WhenArm {
                        value: Some(int("1")),
                        body: vec![Node::Return {
                            value: Some(Box::new(int("10"))),
                            location: loc(),
                        }],
                    },
                    WhenArm {
                        value: None,
                        body: vec![Node::Return {
                            value: Some(Box::new(int("0"))),
                            location: loc(),
                        }],
                    },
                ],
                location: loc(),
            }],
        )]);
        assert!(ir.contains("icmp eq i32 %x, 1"));
        assert!(ir.contains("when_arm"));
        assert!(ir.contains("ret i32 10"));
        assert!(ir.contains("ret i32 0"));
    }

    #[test]
    fn test_throw_captures_and_is_unreachable() {
        let ir = generate(vec![routine(
            "fail",
            vec![],
            None,
            vec![Node::Throw {
                value: Some(Box::new(Node::Call {
                    callee: "Error.from_text".to_string(),
                    args: vec![Node::Literal {
                        value: LiteralValue::Text("boom".to_string()),
                        type_suffix: None,
                        location: loc(),
                    }],
                    location: loc(),
                })),
                location: loc(),
            }],
        )]);
        assert!(ir.contains("call ptr @rf_stacktrace_capture()"));
        assert!(ir.contains("call void @rf_throw(ptr %"));
        assert!(ir.contains("unreachable"));
    }

    #[test]
    fn test_type_conversion_selects_instruction() {
        let ir = generate(vec![routine(
            "convert",
            vec![("x", "s32"), ("f", "f64")],
            Some("s64"),
            vec![
                var("widened", "s64", Node::TypeConversion {
                    target_type: "s64".to_string(),
                    value: Box::new(ident("x")),
                    location: loc(),
                }),
                var("trunced", "s32", Node::TypeConversion {
                    target_type: "s32".to_string(),
                    value: Box::new(ident("f")),
                    location: loc(),
                }),
                Node::Return {
                    value: Some(Box::new(ident("widened"))),
                    location: loc(),
                },
            ],
        )]);
        assert!(ir.contains("sext i32 %x to i64"));
        assert!(ir.contains("fptosi double %f to i32"));
    }

    #[test]
    fn test_method_receives_implicit_me() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("point.rf");
        let program = Node::Program {
            declarations: vec![
                Node::Record {
                    name: "Point".to_string(),
                    type_params: vec![],
                    fields: vec![
                        crate::ast::Field {
                            name: "x".to_string(),
                            type_name: "s32".to_string(),
                            location: loc(),
                        },
                        crate::ast::Field {
                            name: "y".to_string(),
                            type_name: "s32".to_string(),
                            location: loc(),
                        },
                    ],
                    location: loc(),
                },
                routine(
                    "Point.get_x",
                    vec![],
                    Some("s32"),
                    vec![Node::Return {
                        value: Some(Box::new(Node::Member {
                            object: Box::new(ident("me")),
                            member: "x".to_string(),
                            location: loc(),
                        })),
                        location: loc(),
                    }],
                ),
            ],
        };
        let ir = codegen.generate(&program).unwrap();
        assert!(ir.contains("%struct.Point = type { i32, i32 }"));
        // Multi-field record receiver arrives by pointer
        assert!(ir.contains("define i32 @Point_get_x(ptr %me)"));
        assert!(ir.contains("getelementptr inbounds %struct.Point, ptr %me, i32 0, i32 0"));
    }

    #[test]
    fn test_method_on_generic_receiver_monomorphizes() {
        let mut codegen = CodeGen::for_tests();
        codegen.set_source_file("stack.rf");
        let program = Node::Program {
            declarations: vec![
                Node::Record {
                    name: "Stack".to_string(),
                    type_params: vec!["T".to_string()],
                    fields: vec![crate::ast::Field {
                        name: "head".to_string(),
                        type_name: "T".to_string(),
                        location: loc(),
                    }],
                    location: loc(),
                },
                // Parser caveat: the receiver's T arrives in the
                // routine's type-parameter list
                Node::Routine {
                    name: "Stack<T>.top".to_string(),
                    type_params: vec!["T".to_string()],
                    params: vec![],
                    return_type: Some("T".to_string()),
                    body: vec![Node::Return {
                        value: Some(Box::new(Node::Member {
                            object: Box::new(ident("me")),
                            member: "head".to_string(),
                            location: loc(),
                        })),
                        location: loc(),
                    }],
                    location: loc(),
                },
                routine(
                    "start",
                    vec![],
                    None,
                    vec![
                        Node::Variable {
                            name: "s".to_string(),
                            type_name: Some("Stack<s32>".to_string()),
                            initializer: None,
                            mutable: true,
                            location: loc(),
                        },
                        Node::Call {
                            callee: "s.top".to_string(),
                            args: vec![],
                            location: loc(),
                        },
                    ],
                ),
            ],
        };
        let ir = codegen.generate(&program).unwrap();
        assert!(ir.contains("%struct.Stack_s32 = type { i32 }"));
        assert!(ir.contains("define i32 @Stack_T__top_s32(ptr %me)"));
        assert!(ir.contains("call i32 @Stack_T__top_s32(ptr %"));
        assert!(ir.contains("getelementptr inbounds %struct.Stack_s32, ptr %me, i32 0, i32 0"));
    }

    #[test]
    fn test_break_and_continue_target_loop_labels() {
        let ir = generate(vec![routine(
            "loopy",
            vec![],
            None,
            vec![Node::While {
                condition: Box::new(Node::Literal {
                    value: LiteralValue::Boolean(true),
                    type_suffix: None,
                    location: loc(),
                }),
                body: vec![
                    Node::If {
                        condition: Box::new(Node::Literal {
                            value: LiteralValue::Boolean(false),
                            type_suffix: None,
                            location: loc(),
                        }),
                        then_body: vec![Node::Break { location: loc() }],
                        else_body: Some(vec![Node::Continue { location: loc() }]),
                        location: loc(),
                    },
                ],
                location: loc(),
            }],
        )]);
        assert!(ir.contains("br label %while_end"));
        assert!(ir.contains("br label %while_cond"));
    }

    #[test]
    fn test_stack_traces_disabled_degrade_to_noops() {
        use crate::config::CodegenConfig;
        let config = CodegenConfig::new("razorforge", "standard")
            .with_target(TargetPlatform::new(Arch::X86_64, Os::Linux).unwrap())
            .with_stdlib_path("/nonexistent")
            .with_stack_traces(false);
        let mut codegen = CodeGen::new(config).unwrap();
        codegen.set_source_file("quiet.rf");
        let ir = codegen
            .generate(&Node::Program {
                declarations: vec![routine(
                    "f",
                    vec![],
                    None,
                    vec![Node::Throw {
                        value: None,
                        location: loc(),
                    }],
                )],
            })
            .unwrap();
        assert!(!ir.contains("rf_stacktrace_push"));
        assert!(!ir.contains("rf_stacktrace_capture"));
        assert!(!ir.contains("@rf_file_table"));
        // throw still reaches the runtime
        assert!(ir.contains("call void @rf_throw(ptr null, ptr null)"));
        // the constructor still initializes the runtime
        assert!(ir.contains("call void @rf_runtime_init()"));
    }
}
