use crate::ast::nodes::{Expr, ExprKind};
use crate::ast::types::{LiteralValue, Ty};
use crate::errors::errors::{Error, ErrorImpl};

use super::compiler::Compiler;
use super::instructions::{binary_instruction, conversion_instruction, unit_constant};

/// Emit the instructions that leave `expr`'s value on the evaluation
/// stack. Children are always emitted before the operator that consumes
/// them; for binary operations the left child is fully emitted, then the
/// right child, then the operator.
pub fn gen_expression(compiler: &mut Compiler, expr: &Expr) -> Result<(), Error> {
    match &expr.kind {
        ExprKind::Literal(literal) => gen_literal(compiler, expr, literal),
        ExprKind::Variable(name) => {
            let ty = expr.ty();
            if matches!(ty, Ty::Func) {
                // Callable names are erased during checking; one
                // surviving to expression position is a pipeline bug.
                panic!("callable {} reached the generator as a value", name);
            }
            compiler.locals.get_or_alloc(name, ty);
            compiler.emit(format!("local.get ${}", name));
            Ok(())
        }
        ExprKind::Binary { op, left, right } => {
            gen_expression(compiler, left)?;
            gen_expression(compiler, right)?;

            // Both operands were coerced to one representation during
            // checking; the left child names it.
            let operand_ty = left.ty();
            let mnemonic = binary_instruction(op, operand_ty).ok_or_else(|| {
                Error::new(
                    ErrorImpl::UnsupportedOperator {
                        operator: op.clone(),
                        type_: operand_ty.to_string(),
                    },
                    expr.span.start.clone(),
                )
            })?;
            compiler.emit(mnemonic);
            Ok(())
        }
        ExprKind::Unary { op, operand } => gen_unary(compiler, expr, op, operand),
        ExprKind::Postfix { op, target } => gen_postfix(compiler, expr, op, target),
        ExprKind::Assignment { target, value } => {
            gen_expression(compiler, value)?;
            compiler.locals.get_or_alloc(target, value.ty());
            compiler.emit(format!("local.tee ${}", target));
            Ok(())
        }
        ExprKind::FunctionCall { name, args } => {
            for arg in args {
                gen_expression(compiler, &arg.value)?;
            }
            compiler.emit(format!("call ${}", name));
            Ok(())
        }
        ExprKind::AnonymousFunction { .. } => {
            panic!("anonymous function reached the generator; lifting failed");
        }
        ExprKind::ArrayLiteral(elems) => gen_array_literal(compiler, expr, elems),
        ExprKind::JsonLiteral(value) => {
            let offset = compiler.layout.store_json(value);
            compiler.emit(format!("i32.const {}", offset));
            Ok(())
        }
        ExprKind::Conversion { from, to, inner } => {
            gen_expression(compiler, inner)?;
            if let Some(mnemonic) = conversion_instruction(from, to) {
                compiler.emit(mnemonic);
            }
            Ok(())
        }
    }
}

fn gen_literal(compiler: &mut Compiler, expr: &Expr, literal: &LiteralValue) -> Result<(), Error> {
    match (expr.ty(), literal) {
        (Ty::I32, LiteralValue::Int(value)) => {
            compiler.emit(format!("i32.const {}", value));
        }
        (Ty::I32, LiteralValue::Bool(value)) => {
            compiler.emit(format!("i32.const {}", u8::from(*value)));
        }
        (Ty::I64, LiteralValue::Long(value)) => {
            compiler.emit(format!("i64.const {}", value));
        }
        (Ty::F32, LiteralValue::Float(value)) => {
            compiler.emit(format!("f32.const {}", value));
        }
        (Ty::F64, LiteralValue::Double(value)) => {
            compiler.emit(format!("f64.const {}", value));
        }
        (Ty::StrPtr, LiteralValue::Str(value)) => {
            let offset = compiler.layout.store_string(value);
            compiler.emit(format!("i32.const {}", offset));
        }
        (ty, literal) => {
            // Checking wraps representation changes in conversion nodes,
            // so a literal whose slot disagrees with its value is a bug.
            panic!("literal {:?} lowered to mismatched type {:?}", literal, ty);
        }
    }
    Ok(())
}

fn gen_unary(compiler: &mut Compiler, expr: &Expr, op: &str, operand: &Expr) -> Result<(), Error> {
    let ty = expr.ty().clone();
    match (op, &ty) {
        // Integers have no negate instruction; subtract from zero.
        ("-", Ty::I32) => {
            compiler.emit("i32.const 0");
            gen_expression(compiler, operand)?;
            compiler.emit("i32.sub");
        }
        ("-", Ty::I64) => {
            compiler.emit("i64.const 0");
            gen_expression(compiler, operand)?;
            compiler.emit("i64.sub");
        }
        ("-", Ty::F32) => {
            gen_expression(compiler, operand)?;
            compiler.emit("f32.neg");
        }
        ("-", Ty::F64) => {
            gen_expression(compiler, operand)?;
            compiler.emit("f64.neg");
        }
        ("not", Ty::I32) => {
            gen_expression(compiler, operand)?;
            compiler.emit("i32.eqz");
        }
        (op, ty) => {
            return Err(Error::new(
                ErrorImpl::UnsupportedOperator {
                    operator: String::from(op),
                    type_: ty.to_string(),
                },
                expr.span.start.clone(),
            ));
        }
    }
    Ok(())
}

/// `x++` / `x--`: the old value is emitted first for any expression
/// consumer, then the operand is loaded a second time, adjusted by the
/// type-correct unit constant and stored back. Two separate emissions
/// are required: the generator has no temporaries beyond named slots.
fn gen_postfix(compiler: &mut Compiler, expr: &Expr, op: &str, target: &str) -> Result<(), Error> {
    let ty = expr.ty().clone();
    let unit = unit_constant(&ty).ok_or_else(|| {
        Error::new(
            ErrorImpl::UnsupportedOperator {
                operator: String::from(op),
                type_: ty.to_string(),
            },
            expr.span.start.clone(),
        )
    })?;
    let adjust = match op {
        "++" => binary_instruction("+", &ty),
        "--" => binary_instruction("-", &ty),
        _ => None,
    }
    .ok_or_else(|| {
        Error::new(
            ErrorImpl::UnsupportedOperator {
                operator: String::from(op),
                type_: ty.to_string(),
            },
            expr.span.start.clone(),
        )
    })?;

    compiler.locals.get_or_alloc(target, &ty);
    compiler.emit(format!("local.get ${}", target));
    compiler.emit(format!("local.get ${}", target));
    compiler.emit(unit);
    compiler.emit(adjust);
    compiler.emit(format!("local.set ${}", target));
    Ok(())
}

/// Array literals serialize once into the data layout; the instruction
/// stream only pushes the offset. Elements must therefore be constants.
fn gen_array_literal(compiler: &mut Compiler, expr: &Expr, elems: &[Expr]) -> Result<(), Error> {
    let elem_ty = match expr.ty() {
        Ty::ArrPtr(elem) => elem.as_ref().clone(),
        other => panic!("array literal lowered to non-array type {:?}", other),
    };

    if matches!(elem_ty, Ty::StrPtr) {
        let mut strings = Vec::with_capacity(elems.len());
        for elem in elems {
            match constant_literal(elem) {
                Some((LiteralValue::Str(value), _)) => strings.push(value.clone()),
                _ => return Err(not_constant(expr)),
            }
        }
        let offset = compiler.layout.store_string_array(&strings);
        compiler.emit(format!("i32.const {}", offset));
        return Ok(());
    }

    let mut values = Vec::with_capacity(elems.len());
    for elem in elems {
        match constant_literal(elem) {
            Some((literal, _)) if !matches!(literal, LiteralValue::Str(_)) => {
                values.push(literal.clone());
            }
            _ => return Err(not_constant(expr)),
        }
    }
    let offset = compiler.layout.store_numeric_array(&elem_ty, &values);
    compiler.emit(format!("i32.const {}", offset));
    Ok(())
}

/// A literal, possibly behind the conversion wrapper checking inserted,
/// together with its target type.
fn constant_literal(expr: &Expr) -> Option<(&LiteralValue, &Ty)> {
    match &expr.kind {
        ExprKind::Literal(literal) => Some((literal, expr.ty())),
        ExprKind::Conversion { inner, to, .. } => match &inner.kind {
            ExprKind::Literal(literal) => Some((literal, to)),
            _ => None,
        },
        _ => None,
    }
}

fn not_constant(expr: &Expr) -> Error {
    Error::new(
        ErrorImpl::NotConstant {
            context: String::from("array literals"),
        },
        expr.span.start.clone(),
    )
}
