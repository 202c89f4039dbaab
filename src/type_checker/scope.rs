//! Symbol scope for the type checker.
//!
//! A [`Scope`] is created fresh for every function body (including the
//! synthesized entry function) and destroyed when checking of that body
//! completes. Inside a body, frames are pushed and popped at block and
//! loop boundaries: lookups fall through to outer frames, writes stay in
//! the innermost one.
//!
//! Two accumulators are deliberately *not* frame-local, because they
//! describe the whole function body rather than one block: the set of
//! names that have been assigned on the walked path (use-before-
//! assignment detection) and the return-type accumulator that every
//! `return` statement unifies into, however deeply nested.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::types::{Signature, Ty};

/// What a name is bound to.
#[derive(Debug, Clone)]
pub enum Binding {
    /// An ordinary variable with its inferred or annotated type.
    Var(Ty),
    /// A callable value: a closure or an alias of another callable.
    Callable(Signature),
}

/// A chained symbol table scoped to one function body.
#[derive(Debug)]
pub struct Scope {
    frames: Vec<FxHashMap<String, Binding>>,
    /// Names assigned so far on the walked path. Parameters start here.
    pub assigned: FxHashSet<String>,
    /// Running unification of every `return` expression's type.
    pub return_ty: Option<Ty>,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            frames: vec![FxHashMap::default()],
            assigned: FxHashSet::default(),
            return_ty: None,
        }
    }

    /// Enter a block or loop body.
    pub fn push_frame(&mut self) {
        self.frames.push(FxHashMap::default());
    }

    /// Leave a block or loop body. Bindings declared inside it die here;
    /// the accumulators survive.
    pub fn pop_frame(&mut self) {
        if self.frames.len() == 1 {
            panic!("attempted to pop the root scope frame");
        }
        self.frames.pop();
    }

    /// Bind a name in the innermost frame and mark it assigned.
    pub fn declare(&mut self, name: &str, binding: Binding) {
        self.assigned.insert(String::from(name));
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(String::from(name), binding);
        }
    }

    /// Innermost-out lookup.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Whether a name is visible and has been assigned on this path.
    pub fn is_assigned(&self, name: &str) -> bool {
        self.assigned.contains(name)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}
