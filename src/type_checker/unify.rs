//! The unification engine.
//!
//! This is the single source of truth for "can type A become type B" and
//! "what type results from combining A and B". Both questions reduce to
//! [`unify`] with a mode flag:
//!
//! - `Assignment` answers whether a source value may be stored into a
//!   target slot, widening (or, for an already-committed narrower
//!   target, demoting) along the numeric lattice.
//! - `Operation` computes the result type of a binary expression: the
//!   wider operand wins, and any floating operand forces a 64-bit
//!   floating result. This mirrors hosted-language float promotion and
//!   must be preserved exactly for numeric parity.
//!
//! Unification never emits code. When an operand's representation has to
//! change, [`coerce_expr`] wraps the narrower child in a `Conversion`
//! node and the generator emits the matching instruction later.

use crate::ast::nodes::{Expr, ExprKind};
use crate::ast::types::Ty;
use crate::errors::errors::{Error, ErrorImpl};
use crate::Position;

/// Which rule set applies to a unification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnifyMode {
    /// Source value stored into a target slot (`let`, `=`, argument
    /// binding, `return` against an annotation).
    Assignment,
    /// Operands of a binary expression combined into a result.
    Operation,
}

/// Unify two optional type descriptors into a single result type.
///
/// Absent descriptors are how unknown parameter and return types get
/// filled in for the first time:
///
/// - both absent: the default numeric type (`int`)
/// - one absent: the known side is adopted
///
/// In `Assignment` mode the first descriptor is the target and the
/// second the source; in `Operation` mode the arguments are symmetric.
pub fn unify(
    a: Option<&Ty>,
    b: Option<&Ty>,
    mode: UnifyMode,
    position: &Position,
) -> Result<Ty, Error> {
    let (a, b) = match (a, b) {
        (None, None) => return Ok(Ty::Int),
        (Some(t), None) | (None, Some(t)) => return Ok(t.clone()),
        (Some(a), Some(b)) => (a, b),
    };

    match mode {
        UnifyMode::Assignment => unify_assignment(a, b, position),
        UnifyMode::Operation => unify_operation(a, b, position),
    }
}

fn unify_assignment(target: &Ty, source: &Ty, position: &Position) -> Result<Ty, Error> {
    if target == source {
        return Ok(target.clone());
    }

    if target.is_numeric() && source.is_numeric() {
        // Widening always succeeds. A source wider than the target is
        // also accepted: the target is already committed to the narrower
        // type, so this models a user-requested demotion.
        return Ok(target.clone());
    }

    if let (Ty::Array(target_elem), Ty::Array(source_elem)) = (target, source) {
        let elem = unify_assignment(target_elem, source_elem, position)?;
        return Ok(Ty::Array(Box::new(elem)));
    }

    Err(incompatible(target, source, position))
}

fn unify_operation(a: &Ty, b: &Ty, position: &Position) -> Result<Ty, Error> {
    if a.is_numeric() && b.is_numeric() {
        // Any floating operand promotes the whole operation to a 64-bit
        // float, regardless of the other operand's width - including
        // float-float. This mirrors the hosted language, where every
        // float computation is double-precision.
        if a.is_float() || b.is_float() {
            return Ok(Ty::Double);
        }
        let rank_a = a.numeric_rank().unwrap_or(0);
        let rank_b = b.numeric_rank().unwrap_or(0);
        return Ok(if rank_a >= rank_b { a.clone() } else { b.clone() });
    }

    // Equal non-numeric operands combine to themselves; everything else
    // has no combined type.
    if a == b {
        return Ok(a.clone());
    }
    Err(incompatible(a, b, position))
}

fn incompatible(expected: &Ty, received: &Ty, position: &Position) -> Error {
    Error::new(
        ErrorImpl::IncompatibleTypes {
            expected: expected.to_string(),
            received: received.to_string(),
        },
        position.clone(),
    )
}

/// Whether `from` can widen to `to` without a demotion.
pub fn widens_to(from: &Ty, to: &Ty) -> bool {
    match (from.numeric_rank(), to.numeric_rank()) {
        (Some(f), Some(t)) => f <= t,
        _ => from == to,
    }
}

/// Wrap `expr` in a `Conversion` node when its resolved type differs in
/// representation from `to`.
///
/// The wrapped child keeps its own resolved type as the conversion's
/// `from` side; the new node resolves to `to`. Non-numeric types never
/// convert, and a no-op conversion is never inserted.
pub fn coerce_expr(expr: &mut Expr, to: &Ty) {
    let from = match &expr.resolved {
        Some(ty) => ty.clone(),
        None => return,
    };

    if from == *to || !from.is_numeric() || !to.is_numeric() {
        return;
    }

    let span = expr.span.clone();
    let placeholder = Expr::new(ExprKind::Variable(String::new()), span.clone());
    let inner = std::mem::replace(expr, placeholder);

    *expr = Expr {
        kind: ExprKind::Conversion {
            from,
            to: to.clone(),
            inner: Box::new(inner),
        },
        resolved: Some(to.clone()),
        span,
    };
}
