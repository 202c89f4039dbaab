//! Main compiler module.
//!
//! This module contains the core Compiler structure and implements code
//! generation from the typed, lowered AST to the WebAssembly text
//! format. It manages per-function local-slot allocation, the linear
//! memory layout, structured-control-flow label bookkeeping, and final
//! module assembly.

use log::debug;
use rustc_hash::FxHashMap;

use crate::ast::nodes::{Program, Stmt, StmtKind};
use crate::ast::types::{Signature, Ty};
use crate::errors::errors::Error;
use crate::lowering::lower_program;
use crate::type_checker::type_checker::{type_check, TypeChecker};

use super::instructions::HOST_IMPORTS;
use super::memory::MemoryLayout;
use super::stmt::gen_statement;

/// The reserved export name of the synthesized entry function that
/// collects top-level statements.
pub const ENTRY_NAME: &str = "main";

/// Output knobs for module assembly.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Import a shared memory from the host instead of defining and
    /// exporting one sized to the data layout.
    pub import_memory: bool,
}

/// Per-function local-slot allocation.
///
/// Parameters occupy the first N slots in declaration order; every
/// newly-referenced variable after that is assigned the next free slot
/// and recorded so the declaration header can be synthesized once the
/// body has been walked.
#[derive(Debug)]
pub struct LocalTable {
    slots: FxHashMap<String, u32>,
    new_locals: Vec<(String, Ty)>,
    next_slot: u32,
    param_count: u32,
}

impl LocalTable {
    fn new() -> Self {
        LocalTable {
            slots: FxHashMap::default(),
            new_locals: Vec::new(),
            next_slot: 0,
            param_count: 0,
        }
    }

    fn declare_param(&mut self, name: &str) -> u32 {
        let slot = self.next_slot;
        self.slots.insert(String::from(name), slot);
        self.next_slot += 1;
        self.param_count = self.next_slot;
        slot
    }

    /// Slot of `name`, allocating (and recording a pending declaration
    /// line) on first reference.
    pub fn get_or_alloc(&mut self, name: &str, ty: &Ty) -> u32 {
        if let Some(slot) = self.slots.get(name) {
            return *slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(String::from(name), slot);
        self.new_locals.push((String::from(name), ty.clone()));
        slot
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.slots.get(name).copied()
    }

    /// Non-parameter locals in allocation order.
    pub fn new_locals(&self) -> &[(String, Ty)] {
        &self.new_locals
    }

    /// Locals beyond the parameters.
    pub fn extra_local_count(&self) -> u32 {
        self.next_slot - self.param_count
    }
}

/// Labels of the loop currently being lowered: `break` branches to the
/// exit block, `continue` to the end of the body block.
#[derive(Debug, Clone)]
pub struct LoopLabels {
    pub exit: String,
    pub body: String,
}

/// The code generator. One instance compiles one program.
pub struct Compiler<'a> {
    /// Final signatures and lifted closures from the check pipeline.
    pub checker: &'a TypeChecker,
    /// The linear-memory layout being filled as literals are emitted.
    pub layout: MemoryLayout,
    /// Loop context stack for break/continue lowering.
    pub loop_stack: Vec<LoopLabels>,
    /// Slot table of the function currently being emitted.
    pub locals: LocalTable,

    options: CompileOptions,
    /// Finished function texts, in emission order.
    functions: Vec<String>,
    /// Scratch instruction buffer of the current function.
    body: Vec<String>,
    label_counter: u32,
}

impl<'a> Compiler<'a> {
    pub fn new(checker: &'a TypeChecker, options: CompileOptions) -> Self {
        Compiler {
            checker,
            layout: MemoryLayout::new(),
            loop_stack: Vec::new(),
            locals: LocalTable::new(),
            options,
            functions: Vec::new(),
            body: Vec::new(),
            label_counter: 0,
        }
    }

    /// Push one instruction line into the current function's scratch
    /// buffer.
    pub fn emit(&mut self, instruction: impl Into<String>) {
        self.body.push(instruction.into());
    }

    /// A fresh label number for control-flow lowering.
    pub fn next_label(&mut self) -> u32 {
        let label = self.label_counter;
        self.label_counter += 1;
        label
    }

    fn begin_function(&mut self) {
        self.locals = LocalTable::new();
        self.body = Vec::new();
        self.loop_stack = Vec::new();
        self.label_counter = 0;
    }

    /// Concatenate the signature line, the local-declaration header
    /// computed from what the body actually referenced, and the buffered
    /// instructions. The header must precede the instructions that use
    /// it but can only be known after the walk, hence the two phases.
    fn finish_function(&mut self, name: &str, signature: &Signature, export: bool) -> String {
        let mut header = format!("(func ${}", name);
        if export {
            header.push_str(&format!(" (export \"{}\")", name));
        }
        for slot in &signature.params {
            let ty = slot.ty.as_ref().unwrap_or(&Ty::I32);
            header.push_str(&format!(" (param ${} {})", slot.name, ty.val_type()));
        }
        match signature.return_ty.as_ref() {
            Some(Ty::Nothing) | None => {}
            Some(ty) => header.push_str(&format!(" (result {})", ty.val_type())),
        }

        let mut text = String::new();
        text.push_str(&header);
        text.push('\n');
        for (local, ty) in self.locals.new_locals() {
            text.push_str(&format!("  (local ${} {})\n", local, ty.val_type()));
        }
        for instruction in &self.body {
            text.push_str("  ");
            text.push_str(instruction);
            text.push('\n');
        }
        text.push_str(")\n");
        text
    }

    fn gen_function(
        &mut self,
        name: &str,
        signature: &Signature,
        body: &[Stmt],
        export: bool,
    ) -> Result<(), Error> {
        debug!("generating function: {}", name);
        self.begin_function();

        for slot in &signature.params {
            self.locals.declare_param(&slot.name);
        }
        for stmt in body {
            gen_statement(self, stmt)?;
        }

        // A result-typed body that falls off the end still has to leave
        // a value on the stack.
        match signature.return_ty.as_ref() {
            Some(Ty::Nothing) | None => {}
            Some(ty) => self.emit(zero_constant(ty)),
        }

        let text = self.finish_function(name, signature, export);
        self.functions.push(text);
        Ok(())
    }

    fn assemble(&self) -> String {
        let mut module = String::from("(module\n");

        for import in HOST_IMPORTS.iter() {
            let mut decl = format!("(import \"env\" \"{}\" (func ${}", import.name, import.name);
            for param in import.params {
                decl.push_str(&format!(" (param {})", param));
            }
            if let Some(result) = import.result {
                decl.push_str(&format!(" (result {})", result));
            }
            decl.push_str("))");
            module.push_str("  ");
            module.push_str(&decl);
            module.push('\n');
        }

        if self.options.import_memory {
            module.push_str("  (import \"env\" \"memory\" (memory 1))\n");
        } else {
            module.push_str(&format!(
                "  (memory (export \"memory\") {})\n",
                self.layout.page_count()
            ));
        }

        for function in &self.functions {
            for line in function.lines() {
                module.push_str("  ");
                module.push_str(line);
                module.push('\n');
            }
        }

        for segment in self.layout.segments() {
            module.push_str(&format!(
                "  (data (i32.const {}) \"{}\")\n",
                segment.offset,
                escape_bytes(&segment.bytes)
            ));
        }

        module.push_str(")\n");
        module
    }
}

/// Run the whole pipeline on a parsed program: type checking, lowering,
/// then module generation.
///
/// Every call builds a fresh checker and a fresh generator; nothing is
/// shared or reusable across compilations, so embedders can call this
/// from wherever they like as long as each program gets its own call.
pub fn compile_program(
    program: &mut Program,
    options: CompileOptions,
) -> Result<String, Error> {
    let mut checker = type_check(program)?;
    lower_program(program, &mut checker);
    compile(program, &checker, options)
}

/// Generate the complete module text for a checked, lowered program.
///
/// One exported function per user-defined function, the lifted closure
/// bodies, and - when any top-level statement exists outside a function -
/// a synthesized entry function exported under the reserved name.
pub fn compile(
    program: &Program,
    checker: &TypeChecker,
    options: CompileOptions,
) -> Result<String, Error> {
    let mut compiler = Compiler::new(checker, options);

    for stmt in &program.statements {
        if let StmtKind::FunctionDefinition { name, body, .. } = &stmt.kind {
            let signature = checker
                .functions
                .get(name)
                .unwrap_or_else(|| panic!("function {} missing from registry", name));
            compiler.gen_function(name, signature, body, true)?;
        }
    }

    for lifted in &checker.lifted {
        compiler.gen_function(&lifted.name, &lifted.signature, &lifted.body, false)?;
    }

    let top_level: Vec<&Stmt> = program
        .statements
        .iter()
        .filter(|stmt| !matches!(stmt.kind, StmtKind::FunctionDefinition { .. }))
        .collect();
    if !top_level.is_empty() {
        let entry_signature = Signature::new(vec![], Some(checker.entry_return.clone()));
        debug!("generating entry function: {}", ENTRY_NAME);
        compiler.begin_function();
        for stmt in &top_level {
            gen_statement(&mut compiler, stmt)?;
        }
        match checker.entry_return {
            Ty::Nothing => {}
            ref ty => compiler.emit(zero_constant(ty)),
        }
        let text = compiler.finish_function(ENTRY_NAME, &entry_signature, true);
        compiler.functions.push(text);
    }

    Ok(compiler.assemble())
}

/// The all-zero constant of a machine type, used when a result-typed
/// body can fall off its end.
fn zero_constant(ty: &Ty) -> String {
    match ty.scalar_index() {
        Some(1) => String::from("i64.const 0"),
        Some(2) => String::from("f32.const 0"),
        Some(3) => String::from("f64.const 0"),
        _ => String::from("i32.const 0"),
    }
}

/// Escape a byte block for a text-format data segment.
fn escape_bytes(bytes: &[u8]) -> String {
    let mut escaped = String::with_capacity(bytes.len());
    for byte in bytes {
        match byte {
            b'"' => escaped.push_str("\\\""),
            b'\\' => escaped.push_str("\\\\"),
            0x20..=0x7e => escaped.push(*byte as char),
            other => escaped.push_str(&format!("\\{:02x}", other)),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{escape_bytes, LocalTable};
    use crate::ast::types::Ty;

    #[test]
    fn test_local_slots_are_unique() {
        let mut locals = LocalTable::new();
        locals.declare_param("a");
        locals.declare_param("b");
        let x = locals.get_or_alloc("x", &Ty::I32);
        let y = locals.get_or_alloc("y", &Ty::F64);
        let x_again = locals.get_or_alloc("x", &Ty::I32);

        assert_eq!(locals.get("a"), Some(0));
        assert_eq!(locals.get("b"), Some(1));
        assert_eq!(x, 2);
        assert_eq!(y, 3);
        assert_eq!(x, x_again);
        assert_eq!(locals.extra_local_count(), 2);
        assert_eq!(locals.new_locals().len(), 2);
    }

    #[test]
    fn test_params_never_join_the_declaration_header() {
        let mut locals = LocalTable::new();
        locals.declare_param("a");
        locals.get_or_alloc("a", &Ty::I32);
        assert!(locals.new_locals().is_empty());
    }

    #[test]
    fn test_escape_bytes_handles_quotes_and_nul() {
        assert_eq!(escape_bytes(b"hi\"\\\x00"), "hi\\\"\\\\\\00");
        assert_eq!(escape_bytes(&5i32.to_le_bytes()), "\\05\\00\\00\\00");
    }
}
