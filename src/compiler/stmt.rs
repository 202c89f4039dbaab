use crate::ast::nodes::{ElseIf, Expr, ForKind, Stmt, StmtKind};
use crate::ast::types::Ty;
use crate::errors::errors::{Error, ErrorImpl};

use super::compiler::{Compiler, LoopLabels};
use super::expr::gen_expression;
use super::instructions::{binary_instruction, load_instruction, print_import, unit_constant};

/// Emit one statement of the current function body.
pub fn gen_statement(compiler: &mut Compiler, stmt: &Stmt) -> Result<(), Error> {
    match &stmt.kind {
        StmtKind::Let { name, value, .. } | StmtKind::Assign { name, value } => {
            // Callable bindings were erased by the checker: the closure
            // body is already a module-level function and every call
            // site dispatches to it directly.
            if matches!(value.resolved, Some(Ty::Func)) {
                return Ok(());
            }
            gen_expression(compiler, value)?;
            compiler.locals.get_or_alloc(name, value.ty());
            compiler.emit(format!("local.set ${}", name));
            Ok(())
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                gen_expression(compiler, value)?;
            }
            compiler.emit("return");
            Ok(())
        }
        StmtKind::Print(value) => {
            gen_expression(compiler, value)?;
            let import = print_import(value.ty()).ok_or_else(|| {
                Error::new(
                    ErrorImpl::UnsupportedOperator {
                        operator: String::from("print"),
                        type_: value.ty().to_string(),
                    },
                    stmt.span.start.clone(),
                )
            })?;
            compiler.emit(format!("call ${}", import));
            Ok(())
        }
        StmtKind::If {
            condition,
            then_body,
            elseifs,
            else_body,
        } => gen_if(compiler, condition, then_body, elseifs, else_body.as_deref()),
        StmtKind::For { kind, body } => match kind {
            ForKind::Range {
                var,
                start,
                end,
                step,
            } => gen_range_loop(compiler, var, start, end, step.as_ref(), body),
            ForKind::Each { var, sequence } => gen_each_loop(compiler, var, sequence, body),
        },
        StmtKind::Block(body) => {
            // No machine-level lexical scoping: block-declared variables
            // are ordinary function-local slots.
            for inner in body {
                gen_statement(compiler, inner)?;
            }
            Ok(())
        }
        StmtKind::Break => {
            let labels = current_loop(compiler);
            compiler.emit(format!("br {}", labels.exit));
            Ok(())
        }
        StmtKind::Continue => {
            let labels = current_loop(compiler);
            compiler.emit(format!("br {}", labels.body));
            Ok(())
        }
        StmtKind::Call(value) => {
            gen_expression(compiler, value)?;
            // Expression statements discard any produced value.
            if !matches!(value.ty(), Ty::Nothing) {
                compiler.emit("drop");
            }
            Ok(())
        }
        StmtKind::FunctionDefinition { .. } => {
            // Top-level definitions are emitted by the module driver;
            // nested ones were lifted during checking.
            Ok(())
        }
    }
}

fn current_loop(compiler: &Compiler) -> LoopLabels {
    compiler
        .loop_stack
        .last()
        .cloned()
        .unwrap_or_else(|| panic!("break/continue outside a loop survived checking"))
}

/// Structured conditional: condition, a then arm and - when any elseif
/// or else exists - an else arm. Elseif chains lower recursively: each
/// clause becomes a nested conditional inside the outer else arm,
/// terminating in the final else body.
fn gen_if(
    compiler: &mut Compiler,
    condition: &Expr,
    then_body: &[Stmt],
    elseifs: &[ElseIf],
    else_body: Option<&[Stmt]>,
) -> Result<(), Error> {
    gen_expression(compiler, condition)?;
    compiler.emit("if");

    for stmt in then_body {
        gen_statement(compiler, stmt)?;
    }

    if !elseifs.is_empty() || else_body.is_some() {
        compiler.emit("else");
        if let Some((clause, rest)) = elseifs.split_first() {
            gen_if(compiler, &clause.condition, &clause.body, rest, else_body)?;
        } else if let Some(body) = else_body {
            for stmt in body {
                gen_statement(compiler, stmt)?;
            }
        }
    }

    compiler.emit("end");
    Ok(())
}

/// Range loop lowering:
///
/// ```text
/// block $exit_N
///   loop $loop_N
///     <var <= end>  i32.eqz  br_if $exit_N
///     block $body_N
///       <body>                  ;; continue -> br $body_N
///     end                       ;; break    -> br $exit_N
///     <var += step or unit>
///     br $loop_N
///   end
/// end
/// ```
///
/// The head re-checks the condition each iteration; the increment runs
/// after the body block closes so `continue` falls through into it.
fn gen_range_loop(
    compiler: &mut Compiler,
    var: &str,
    start: &Expr,
    end: &Expr,
    step: Option<&Expr>,
    body: &[Stmt],
) -> Result<(), Error> {
    let var_ty = start.ty().clone();
    let label = compiler.next_label();
    let exit = format!("$exit_{}", label);
    let head = format!("$loop_{}", label);
    let body_label = format!("$body_{}", label);

    gen_expression(compiler, start)?;
    compiler.locals.get_or_alloc(var, &var_ty);
    compiler.emit(format!("local.set ${}", var));

    compiler.emit(format!("block {}", exit));
    compiler.emit(format!("loop {}", head));

    // Inclusive upper bound; the end expression is re-evaluated at each
    // check.
    compiler.emit(format!("local.get ${}", var));
    gen_expression(compiler, end)?;
    let compare = binary_instruction("<=", &var_ty)
        .unwrap_or_else(|| panic!("no comparison for loop variable type {:?}", var_ty));
    compiler.emit(compare);
    compiler.emit("i32.eqz");
    compiler.emit(format!("br_if {}", exit));

    compiler.emit(format!("block {}", body_label));
    compiler.loop_stack.push(LoopLabels {
        exit: exit.clone(),
        body: body_label,
    });
    for stmt in body {
        gen_statement(compiler, stmt)?;
    }
    compiler.loop_stack.pop();
    compiler.emit("end");

    compiler.emit(format!("local.get ${}", var));
    match step {
        Some(step) => gen_expression(compiler, step)?,
        None => {
            let unit = unit_constant(&var_ty)
                .unwrap_or_else(|| panic!("no unit constant for loop variable type {:?}", var_ty));
            compiler.emit(unit);
        }
    }
    let add = binary_instruction("+", &var_ty)
        .unwrap_or_else(|| panic!("no addition for loop variable type {:?}", var_ty));
    compiler.emit(add);
    compiler.emit(format!("local.set ${}", var));

    compiler.emit(format!("br {}", head));
    compiler.emit("end");
    compiler.emit("end");
    Ok(())
}

/// Collection loop lowering: an index walks the array's 4-byte length
/// prefix, loading each element at its machine width into the loop
/// variable before the body runs. Same exit/head/body block shape as the
/// range form.
fn gen_each_loop(
    compiler: &mut Compiler,
    var: &str,
    sequence: &Expr,
    body: &[Stmt],
) -> Result<(), Error> {
    let elem_ty = match sequence.ty() {
        Ty::ArrPtr(elem) => elem.as_ref().clone(),
        other => panic!("collection loop over non-array type {:?}", other),
    };

    let label = compiler.next_label();
    let exit = format!("$exit_{}", label);
    let head = format!("$loop_{}", label);
    let body_label = format!("$body_{}", label);
    let seq = format!("__seq_{}", label);
    let index = format!("__idx_{}", label);
    let length = format!("__len_{}", label);

    gen_expression(compiler, sequence)?;
    compiler.locals.get_or_alloc(&seq, &Ty::I32);
    compiler.emit(format!("local.set ${}", seq));

    compiler.locals.get_or_alloc(&index, &Ty::I32);
    compiler.emit("i32.const 0");
    compiler.emit(format!("local.set ${}", index));

    compiler.locals.get_or_alloc(&length, &Ty::I32);
    compiler.emit(format!("local.get ${}", seq));
    compiler.emit("i32.load");
    compiler.emit(format!("local.set ${}", length));

    compiler.emit(format!("block {}", exit));
    compiler.emit(format!("loop {}", head));

    compiler.emit(format!("local.get ${}", index));
    compiler.emit(format!("local.get ${}", length));
    compiler.emit("i32.lt_s");
    compiler.emit("i32.eqz");
    compiler.emit(format!("br_if {}", exit));

    // element address: seq + 4 + index * width
    compiler.emit(format!("local.get ${}", seq));
    compiler.emit("i32.const 4");
    compiler.emit("i32.add");
    compiler.emit(format!("local.get ${}", index));
    compiler.emit(format!("i32.const {}", elem_ty.elem_width()));
    compiler.emit("i32.mul");
    compiler.emit("i32.add");
    compiler.emit(load_instruction(&elem_ty));
    compiler.locals.get_or_alloc(var, &elem_ty);
    compiler.emit(format!("local.set ${}", var));

    compiler.emit(format!("block {}", body_label));
    compiler.loop_stack.push(LoopLabels {
        exit: exit.clone(),
        body: body_label,
    });
    for stmt in body {
        gen_statement(compiler, stmt)?;
    }
    compiler.loop_stack.pop();
    compiler.emit("end");

    compiler.emit(format!("local.get ${}", index));
    compiler.emit("i32.const 1");
    compiler.emit("i32.add");
    compiler.emit(format!("local.set ${}", index));

    compiler.emit(format!("br {}", head));
    compiler.emit("end");
    compiler.emit("end");
    Ok(())
}
