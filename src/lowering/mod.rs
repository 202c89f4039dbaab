//! Lowering: language-level type names to machine-level categories.
//!
//! A pure, total rewrite applied only after type checking succeeds.
//! Every resolved slot, annotation, signature and conversion endpoint is
//! mapped through one fixed table; tree structure is never touched. The
//! rewrite is idempotent: machine-level categories map to themselves, so
//! running the pass twice is a no-op.

use crate::ast::nodes::{Expr, ExprKind, ForKind, Parameter, Program, Stmt, StmtKind};
use crate::ast::types::{Signature, Ty};
use crate::type_checker::type_checker::TypeChecker;

/// Rewrite one type name through the lowering table.
///
/// The four numeric widths map to their wasm scalar categories; string,
/// array and JSON values become pointers into linear memory; unknown
/// slots default to the narrowest integer category.
pub fn lower_ty(ty: &Ty) -> Ty {
    match ty {
        Ty::Int => Ty::I32,
        Ty::Long => Ty::I64,
        Ty::Float => Ty::F32,
        Ty::Double => Ty::F64,
        Ty::Str => Ty::StrPtr,
        Ty::Array(elem) => Ty::ArrPtr(Box::new(lower_ty(elem))),
        Ty::Json => Ty::JsonPtr,
        // Callables never materialize as machine values; the binding is
        // erased and calls dispatch directly, so the category survives
        // for the generator to skip.
        Ty::Func => Ty::Func,
        Ty::Nothing => Ty::Nothing,

        // Already machine-level: lowering twice is a no-op.
        Ty::I32 => Ty::I32,
        Ty::I64 => Ty::I64,
        Ty::F32 => Ty::F32,
        Ty::F64 => Ty::F64,
        Ty::StrPtr => Ty::StrPtr,
        Ty::ArrPtr(elem) => Ty::ArrPtr(Box::new(lower_ty(elem))),
        Ty::JsonPtr => Ty::JsonPtr,
    }
}

/// Lower every type annotation in the program and in the checker's
/// signature registry. This must run between type checking and code
/// generation; the generator refuses language-level names.
pub fn lower_program(program: &mut Program, checker: &mut TypeChecker) {
    for stmt in &mut program.statements {
        lower_stmt(stmt);
    }

    for signature in checker.functions.values_mut() {
        lower_signature(signature);
    }
    for function in &mut checker.lifted {
        lower_signature(&mut function.signature);
        for stmt in &mut function.body {
            lower_stmt(stmt);
        }
    }
    checker.entry_return = lower_ty(&checker.entry_return);
}

fn lower_signature(signature: &mut Signature) {
    for slot in &mut signature.params {
        // Unknown slots default to the narrowest integer category.
        let ty = slot.ty.take().unwrap_or(Ty::Int);
        slot.ty = Some(lower_ty(&ty));
        if let Some(default) = &mut slot.default {
            lower_expr(default);
        }
    }
    let ret = signature.return_ty.take().unwrap_or(Ty::Nothing);
    signature.return_ty = Some(lower_ty(&ret));
}

fn lower_slot(slot: &mut Option<Ty>) {
    let ty = slot.take().unwrap_or(Ty::Int);
    *slot = Some(lower_ty(&ty));
}

fn lower_params(params: &mut [Parameter]) {
    for param in params.iter_mut() {
        if let Some(annotation) = &param.annotation {
            param.annotation = Some(lower_ty(annotation));
        }
        if let Some(default) = &mut param.default {
            lower_expr(default);
        }
    }
}

fn lower_stmt(stmt: &mut Stmt) {
    lower_slot(&mut stmt.resolved);

    match &mut stmt.kind {
        StmtKind::Let {
            annotation, value, ..
        } => {
            if let Some(annotation_ty) = annotation {
                *annotation = Some(lower_ty(annotation_ty));
            }
            lower_expr(value);
        }
        StmtKind::Assign { value, .. } => lower_expr(value),
        StmtKind::Return(Some(value)) => lower_expr(value),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::Print(value) | StmtKind::Call(value) => lower_expr(value),
        StmtKind::If {
            condition,
            then_body,
            elseifs,
            else_body,
        } => {
            lower_expr(condition);
            for inner in then_body.iter_mut() {
                lower_stmt(inner);
            }
            for clause in elseifs.iter_mut() {
                lower_expr(&mut clause.condition);
                for inner in clause.body.iter_mut() {
                    lower_stmt(inner);
                }
            }
            if let Some(body) = else_body {
                for inner in body.iter_mut() {
                    lower_stmt(inner);
                }
            }
        }
        StmtKind::For { kind, body } => {
            match kind {
                ForKind::Range {
                    start, end, step, ..
                } => {
                    lower_expr(start);
                    lower_expr(end);
                    if let Some(step) = step {
                        lower_expr(step);
                    }
                }
                ForKind::Each { sequence, .. } => lower_expr(sequence),
            }
            for inner in body.iter_mut() {
                lower_stmt(inner);
            }
        }
        StmtKind::Block(body) => {
            for inner in body.iter_mut() {
                lower_stmt(inner);
            }
        }
        StmtKind::FunctionDefinition {
            params,
            return_annotation,
            body,
            ..
        } => {
            lower_params(params);
            if let Some(annotation) = return_annotation {
                *return_annotation = Some(lower_ty(annotation));
            }
            for inner in body.iter_mut() {
                lower_stmt(inner);
            }
        }
    }
}

fn lower_expr(expr: &mut Expr) {
    lower_slot(&mut expr.resolved);

    match &mut expr.kind {
        ExprKind::Literal(_) | ExprKind::Variable(_) | ExprKind::JsonLiteral(_) => {}
        ExprKind::Postfix { .. } => {}
        ExprKind::Binary { left, right, .. } => {
            lower_expr(left);
            lower_expr(right);
        }
        ExprKind::Unary { operand, .. } => lower_expr(operand),
        ExprKind::Assignment { value, .. } => lower_expr(value),
        ExprKind::FunctionCall { args, .. } => {
            for arg in args.iter_mut() {
                lower_expr(&mut arg.value);
            }
        }
        ExprKind::AnonymousFunction { params, body } => {
            lower_params(params);
            for inner in body.iter_mut() {
                lower_stmt(inner);
            }
        }
        ExprKind::ArrayLiteral(elems) => {
            for elem in elems.iter_mut() {
                lower_expr(elem);
            }
        }
        ExprKind::Conversion { from, to, inner } => {
            *from = lower_ty(from);
            *to = lower_ty(to);
            lower_expr(inner);
        }
    }
}
