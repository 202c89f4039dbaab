//! Integration tests for end-to-end compilation.
//!
//! These tests verify that the complete pipeline works correctly from a
//! parsed program through type checking, lowering, and text-format
//! module generation, plus the crate-level algebraic properties of
//! unification, lowering and memory layout.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use lmnc::ast::nodes::{
    Argument, ElseIf, Expr, ExprKind, ForKind, Parameter, Program, Stmt, StmtKind,
};
use lmnc::ast::types::{LiteralValue, Ty};
use lmnc::compiler::compiler::{compile, CompileOptions};
use lmnc::compiler::memory::MemoryLayout;
use lmnc::lowering::{lower_program, lower_ty};
use lmnc::type_checker::type_checker::type_check;
use lmnc::type_checker::unify::{unify, widens_to, UnifyMode};
use lmnc::{Position, Span};

fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, Span::null())
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Span::null())
}

fn int(value: i32) -> Expr {
    expr(ExprKind::Literal(LiteralValue::Int(value)))
}

fn double(value: f64) -> Expr {
    expr(ExprKind::Literal(LiteralValue::Double(value)))
}

fn string(value: &str) -> Expr {
    expr(ExprKind::Literal(LiteralValue::Str(String::from(value))))
}

fn variable(name: &str) -> Expr {
    expr(ExprKind::Variable(String::from(name)))
}

fn binary(op: &str, left: Expr, right: Expr) -> Expr {
    expr(ExprKind::Binary {
        op: String::from(op),
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn let_stmt(name: &str, value: Expr) -> Stmt {
    stmt(StmtKind::Let {
        name: String::from(name),
        annotation: None,
        value,
    })
}

fn call(name: &str, args: Vec<Argument>) -> Expr {
    expr(ExprKind::FunctionCall {
        name: String::from(name),
        args,
    })
}

fn param(name: &str) -> Parameter {
    Parameter {
        name: String::from(name),
        annotation: None,
        default: None,
    }
}

fn fn_def(name: &str, params: Vec<Parameter>, body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::FunctionDefinition {
        name: String::from(name),
        params,
        return_annotation: None,
        body,
    })
}

/// Run the whole pipeline and return the module text.
fn build(mut program: Program) -> String {
    lmnc::compile_program(&mut program, CompileOptions::default())
        .expect("compilation should succeed")
}

fn position_of(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("`{}` not found in module:\n{}", needle, haystack))
}

// ---------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------

#[test]
fn test_let_and_print_generate_store_then_load() {
    let wat = build(Program::new(vec![
        let_stmt("x", int(42)),
        stmt(StmtKind::Print(variable("x"))),
    ]));

    // Constant push, store to the slot, load from the slot, print call -
    // in that order.
    let push = position_of(&wat, "i32.const 42");
    let store = position_of(&wat, "local.set $x");
    let load = position_of(&wat, "local.get $x");
    let print = position_of(&wat, "call $print_i32");
    assert!(push < store && store < load && load < print);

    assert!(wat.contains("(export \"main\")"));
    assert!(wat.contains("(memory (export \"memory\") 1)"));
}

#[test]
fn test_cross_pass_inference_produces_float_function() {
    let mut program = Program::new(vec![
        fn_def(
            "add",
            vec![param("a"), param("b")],
            vec![stmt(StmtKind::Return(Some(binary(
                "+",
                variable("a"),
                variable("b"),
            ))))],
        ),
        stmt(StmtKind::Call(call(
            "add",
            vec![
                Argument::positional(int(3)),
                Argument::positional(double(4.5)),
            ],
        ))),
    ]);

    let mut checker = type_check(&mut program).unwrap();
    assert_eq!(checker.functions["add"].params[0].ty, Some(Ty::Int));
    assert_eq!(checker.functions["add"].params[1].ty, Some(Ty::Double));
    assert_eq!(checker.functions["add"].return_ty, Some(Ty::Double));

    lower_program(&mut program, &mut checker);
    let wat = compile(&program, &checker, CompileOptions::default()).unwrap();

    assert!(wat.contains("(func $add (export \"add\") (param $a i32) (param $b f64) (result f64)"));
    // The i32 parameter is widened inside the body before the addition.
    let convert = position_of(&wat, "f64.convert_i32_s");
    let add = position_of(&wat, "f64.add");
    assert!(convert < add);
}

#[test]
fn test_branch_unification_wraps_then_branch_literal() {
    let wat = build(Program::new(vec![fn_def(
        "pick",
        vec![param("x")],
        vec![stmt(StmtKind::If {
            condition: binary("<", variable("x"), int(10)),
            then_body: vec![stmt(StmtKind::Return(Some(int(1))))],
            elseifs: vec![],
            else_body: Some(vec![stmt(StmtKind::Return(Some(double(2.5))))]),
        })],
    )]));

    assert!(wat.contains("(result f64)"));
    // The then-branch's integer literal is converted before returning.
    let constant = position_of(&wat, "i32.const 1");
    let convert = position_of(&wat, "f64.convert_i32_s");
    assert!(constant < convert);
}

#[test]
fn test_range_loop_shape() {
    let wat = build(Program::new(vec![stmt(StmtKind::For {
        kind: ForKind::Range {
            var: String::from("i"),
            start: int(1),
            end: int(5),
            step: None,
        },
        body: vec![stmt(StmtKind::Print(variable("i")))],
    })]));

    // One loop-head check, one body block, one increment-and-branch-back.
    assert_eq!(wat.matches("br_if $exit_0").count(), 1);
    assert_eq!(wat.matches("block $body_0").count(), 1);
    assert_eq!(wat.matches("br $loop_0").count(), 1);
    // Single slot for the loop variable.
    assert_eq!(wat.matches("(local $i i32)").count(), 1);
    assert!(wat.contains("i32.le_s"));
}

#[test]
fn test_undeclared_callee_fails_before_any_output() {
    let mut program = Program::new(vec![stmt(StmtKind::Call(call("missing", vec![])))]);

    let error = type_check(&mut program).unwrap_err();
    assert_eq!(error.get_error_name(), "UndeclaredVariable");
}

#[test]
fn test_finalized_calls_are_positional_closed() {
    let mut program = Program::new(vec![
        fn_def(
            "clamp",
            vec![
                param("value"),
                Parameter {
                    name: String::from("low"),
                    annotation: None,
                    default: Some(int(0)),
                },
                Parameter {
                    name: String::from("high"),
                    annotation: None,
                    default: Some(int(100)),
                },
            ],
            vec![stmt(StmtKind::Return(Some(variable("value"))))],
        ),
        stmt(StmtKind::Call(call(
            "clamp",
            vec![
                Argument::positional(int(5)),
                Argument::named("high", int(10)),
            ],
        ))),
    ]);

    let checker = type_check(&mut program).unwrap();

    match &program.statements[1].kind {
        StmtKind::Call(value) => match &value.kind {
            ExprKind::FunctionCall { args, .. } => {
                assert_eq!(args.len(), checker.functions["clamp"].params.len());
                assert!(args.iter().all(|arg| arg.name.is_none()));
            }
            other => panic!("unexpected expression: {:?}", other),
        },
        other => panic!("unexpected statement: {:?}", other),
    }
}

#[test]
fn test_local_declaration_header_matches_referenced_locals() {
    let wat = build(Program::new(vec![
        let_stmt("a", int(1)),
        let_stmt("b", double(2.0)),
        let_stmt("c", binary("+", variable("a"), variable("a"))),
    ]));

    // Three distinct non-parameter names, three declaration lines.
    assert_eq!(wat.matches("(local $").count(), 3);
    assert!(wat.contains("(local $a i32)"));
    assert!(wat.contains("(local $b f64)"));
    assert!(wat.contains("(local $c i32)"));
}

#[test]
fn test_postfix_emits_old_value_then_adjusts() {
    let wat = build(Program::new(vec![
        let_stmt("n", int(7)),
        stmt(StmtKind::Call(expr(ExprKind::Postfix {
            op: String::from("++"),
            target: String::from("n"),
        }))),
    ]));

    // Old value load, reload, unit constant, add, store; the statement
    // context drops the old value.
    assert_eq!(wat.matches("local.get $n").count(), 2);
    let unit = position_of(&wat, "i32.const 1");
    let add = position_of(&wat, "i32.add");
    let store_back = add + wat[add..]
        .find("local.set $n")
        .expect("store after the adjustment");
    let dropped = position_of(&wat, "drop");
    assert!(unit < add && add < store_back && store_back < dropped);
}

#[test]
fn test_elseif_chain_nests_in_else_arm() {
    let wat = build(Program::new(vec![
        let_stmt("x", int(3)),
        stmt(StmtKind::If {
            condition: binary("<", variable("x"), int(0)),
            then_body: vec![stmt(StmtKind::Print(string("negative")))],
            elseifs: vec![ElseIf {
                condition: binary("<", variable("x"), int(10)),
                body: vec![stmt(StmtKind::Print(string("small")))],
            }],
            else_body: Some(vec![stmt(StmtKind::Print(string("large")))]),
        }),
    ]));

    // Two structured conditionals: the elseif nests inside the outer
    // else arm.
    assert_eq!(wat.matches("\n    if\n").count(), 2);
    assert_eq!(wat.matches("\n    else\n").count(), 2);
    assert_eq!(wat.matches("call $print_str").count(), 3);
}

#[test]
fn test_closure_emitted_as_internal_function() {
    let wat = build(Program::new(vec![
        let_stmt(
            "double_it",
            expr(ExprKind::AnonymousFunction {
                params: vec![param("n")],
                body: vec![stmt(StmtKind::Return(Some(binary(
                    "*",
                    variable("n"),
                    int(2),
                ))))],
            }),
        ),
        stmt(StmtKind::Print(call(
            "double_it",
            vec![Argument::positional(int(21))],
        ))),
    ]));

    // Lifted, not exported, called directly.
    assert!(wat.contains("(func $__closure_0 (param $n i32) (result i32)"));
    assert!(!wat.contains("(export \"__closure_0\")"));
    assert!(wat.contains("call $__closure_0"));
}

#[test]
fn test_host_tools_are_imported_and_called() {
    let wat = build(Program::new(vec![
        let_stmt(
            "forecast",
            call(
                "get_weather",
                vec![Argument::positional(string("Berlin"))],
            ),
        ),
        stmt(StmtKind::Print(variable("forecast"))),
    ]));

    assert!(wat.contains("(import \"env\" \"get_weather\" (func $get_weather (param i32) (result i32)))"));
    assert!(wat.contains("call $get_weather"));
    assert!(wat.contains("call $print_json"));
}

#[test]
fn test_import_section_is_always_complete() {
    let wat = build(Program::new(vec![let_stmt("x", int(0))]));

    for import in [
        "print_i32",
        "print_i64",
        "print_f32",
        "print_f64",
        "print_str",
        "print_json",
        "print_i32_array",
        "print_str_array",
        "get_time",
        "get_weather",
        "get_joke",
        "llm_call",
    ] {
        assert!(
            wat.contains(&format!("(import \"env\" \"{}\"", import)),
            "missing import {}",
            import
        );
    }
}

#[test]
fn test_imported_memory_option() {
    let mut program = Program::new(vec![let_stmt("x", int(0))]);
    let mut checker = type_check(&mut program).unwrap();
    lower_program(&mut program, &mut checker);
    let wat = compile(
        &program,
        &checker,
        CompileOptions {
            import_memory: true,
        },
    )
    .unwrap();

    assert!(wat.contains("(import \"env\" \"memory\" (memory 1))"));
    assert!(!wat.contains("(memory (export"));
}

#[test]
fn test_array_literal_lands_in_one_data_segment() {
    let wat = build(Program::new(vec![
        let_stmt(
            "xs",
            expr(ExprKind::ArrayLiteral(vec![int(1), int(2), int(3)])),
        ),
        stmt(StmtKind::Print(variable("xs"))),
    ]));

    // Length prefix 3 followed by 1, 2, 3 as little-endian i32.
    assert!(wat.contains(
        "(data (i32.const 8) \"\\03\\00\\00\\00\\01\\00\\00\\00\\02\\00\\00\\00\\03\\00\\00\\00\")"
    ));
    assert!(wat.contains("call $print_i32_array"));
}

#[test]
fn test_each_loop_walks_length_prefix() {
    let wat = build(Program::new(vec![stmt(StmtKind::For {
        kind: ForKind::Each {
            var: String::from("x"),
            sequence: expr(ExprKind::ArrayLiteral(vec![double(1.5), double(2.5)])),
        },
        body: vec![stmt(StmtKind::Print(variable("x")))],
    })]));

    assert!(wat.contains("i32.load"));
    assert!(wat.contains("f64.load"));
    assert!(wat.contains("(local $x f64)"));
    assert!(wat.contains("call $print_f64"));
}

#[test]
fn test_break_and_continue_target_their_blocks() {
    let wat = build(Program::new(vec![stmt(StmtKind::For {
        kind: ForKind::Range {
            var: String::from("i"),
            start: int(0),
            end: int(10),
            step: None,
        },
        body: vec![
            stmt(StmtKind::If {
                condition: binary("==", variable("i"), int(3)),
                then_body: vec![stmt(StmtKind::Continue)],
                elseifs: vec![],
                else_body: None,
            }),
            stmt(StmtKind::If {
                condition: binary("==", variable("i"), int(7)),
                then_body: vec![stmt(StmtKind::Break)],
                elseifs: vec![],
                else_body: None,
            }),
        ],
    })]));

    assert!(wat.contains("br $body_0"));
    assert_eq!(wat.matches("br $exit_0").count(), 1);
}

#[test]
fn test_no_entry_function_without_top_level_statements() {
    let wat = build(Program::new(vec![fn_def(
        "noop",
        vec![],
        vec![stmt(StmtKind::Return(None))],
    )]));

    assert!(!wat.contains("(export \"main\")"));
    assert!(wat.contains("(export \"noop\")"));
}

#[test]
fn test_whole_surface_compiles_together() {
    let wat = build(Program::new(vec![
        fn_def(
            "scale",
            vec![
                param("value"),
                Parameter {
                    name: String::from("factor"),
                    annotation: None,
                    default: Some(int(2)),
                },
            ],
            vec![stmt(StmtKind::Return(Some(binary(
                "*",
                variable("value"),
                variable("factor"),
            ))))],
        ),
        // Closure, alias, and calls through both.
        let_stmt(
            "double_it",
            expr(ExprKind::AnonymousFunction {
                params: vec![param("n")],
                body: vec![stmt(StmtKind::Return(Some(binary(
                    "*",
                    variable("n"),
                    int(2),
                ))))],
            }),
        ),
        let_stmt("a", call("double_it", vec![Argument::positional(int(5))])),
        let_stmt("alias", variable("scale")),
        let_stmt(
            "b",
            call(
                "alias",
                vec![Argument::positional(int(3)), Argument::positional(int(4))],
            ),
        ),
        stmt(StmtKind::Print(binary("+", variable("a"), variable("b")))),
        // Annotated widening.
        stmt(StmtKind::Let {
            name: String::from("big"),
            annotation: Some(Ty::Long),
            value: int(1),
        }),
        stmt(StmtKind::Print(variable("big"))),
        // Stepped range loop with continue.
        stmt(StmtKind::For {
            kind: ForKind::Range {
                var: String::from("i"),
                start: int(0),
                end: int(10),
                step: Some(int(2)),
            },
            body: vec![
                stmt(StmtKind::If {
                    condition: binary("==", variable("i"), int(4)),
                    then_body: vec![stmt(StmtKind::Continue)],
                    elseifs: vec![],
                    else_body: None,
                }),
                stmt(StmtKind::Print(variable("i"))),
            ],
        }),
        // Collection loop over a float array.
        stmt(StmtKind::For {
            kind: ForKind::Each {
                var: String::from("x"),
                sequence: expr(ExprKind::ArrayLiteral(vec![double(1.5), double(2.5)])),
            },
            body: vec![stmt(StmtKind::Print(variable("x")))],
        }),
        // Postfix in statement position.
        let_stmt("n", int(3)),
        stmt(StmtKind::Call(expr(ExprKind::Postfix {
            op: String::from("++"),
            target: String::from("n"),
        }))),
        stmt(StmtKind::Print(expr(ExprKind::Unary {
            op: String::from("-"),
            operand: Box::new(variable("n")),
        }))),
        // Host tools and JSON.
        let_stmt("joke", call("get_joke", vec![])),
        stmt(StmtKind::Print(variable("joke"))),
        let_stmt(
            "story",
            call(
                "llm_call",
                vec![
                    Argument::positional(string("tell a story")),
                    Argument::named("model", string("small")),
                ],
            ),
        ),
        stmt(StmtKind::Print(variable("story"))),
        stmt(StmtKind::Print(expr(ExprKind::JsonLiteral(
            serde_json::json!({"ready": true}),
        )))),
    ]));

    // Alias and closure calls dispatch to their lifted targets.
    assert!(wat.contains("call $scale"));
    assert!(wat.contains("call $__closure_0"));
    // Widening produced the matching machine conversion.
    assert!(wat.contains("i64.extend_i32_s"));
    assert!(wat.contains("call $print_i64"));
    // Both loop forms lowered.
    assert!(wat.contains("f64.load"));
    assert!(wat.contains("br $body_"));
    // Host tools called through the fixed imports.
    assert!(wat.contains("call $get_joke"));
    assert!(wat.contains("call $llm_call"));
    assert!(wat.contains("call $print_json"));
}

// ---------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------

fn any_ty() -> impl Strategy<Value = Ty> {
    let leaf = prop_oneof![
        Just(Ty::Int),
        Just(Ty::Long),
        Just(Ty::Float),
        Just(Ty::Double),
        Just(Ty::Str),
        Just(Ty::Json),
        Just(Ty::Func),
        Just(Ty::Nothing),
    ];
    leaf.prop_recursive(3, 8, 1, |inner| {
        inner.prop_map(|elem| Ty::Array(Box::new(elem)))
    })
}

fn numeric_ty() -> impl Strategy<Value = Ty> {
    prop_oneof![
        Just(Ty::Int),
        Just(Ty::Long),
        Just(Ty::Float),
        Just(Ty::Double),
    ]
}

proptest! {
    #[test]
    fn prop_operation_unification_commutes(a in any_ty(), b in any_ty()) {
        let ab = unify(Some(&a), Some(&b), UnifyMode::Operation, &Position::null());
        let ba = unify(Some(&b), Some(&a), UnifyMode::Operation, &Position::null());
        match (ab, ba) {
            (Ok(left), Ok(right)) => prop_assert_eq!(left, right),
            (Err(_), Err(_)) => {}
            (left, right) => prop_assert!(
                false,
                "asymmetric unification: {:?} vs {:?}",
                left.is_ok(),
                right.is_ok()
            ),
        }
    }

    #[test]
    fn prop_widening_is_transitive(a in numeric_ty(), b in numeric_ty(), c in numeric_ty()) {
        if widens_to(&a, &b) && widens_to(&b, &c) {
            prop_assert!(widens_to(&a, &c));
            prop_assert!(unify(
                Some(&c),
                Some(&a),
                UnifyMode::Assignment,
                &Position::null()
            )
            .is_ok());
        }
    }

    #[test]
    fn prop_lowering_is_idempotent(ty in any_ty()) {
        let once = lower_ty(&ty);
        let twice = lower_ty(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_memory_segments_stay_disjoint(
        strings in proptest::collection::vec(".{0,12}", 0..6),
        ints in proptest::collection::vec(proptest::collection::vec(any::<i32>(), 0..5), 0..4),
    ) {
        let mut layout = MemoryLayout::new();
        for value in &strings {
            layout.store_string(value);
        }
        for array in &ints {
            let literals: Vec<LiteralValue> =
                array.iter().map(|value| LiteralValue::Int(*value)).collect();
            layout.store_numeric_array(&Ty::I32, &literals);
        }

        let segments = layout.segments();
        for a in 0..segments.len() {
            for b in (a + 1)..segments.len() {
                let first_end = segments[a].offset + segments[a].bytes.len() as u32;
                let second_end = segments[b].offset + segments[b].bytes.len() as u32;
                prop_assert!(
                    first_end <= segments[b].offset || second_end <= segments[a].offset
                );
            }
        }
        prop_assert!(layout.page_count() * 65536 >= layout.high_water_mark());
    }
}
