//! Instruction selection tables.
//!
//! Every arithmetic and comparison operator is looked up in a fixed
//! (operator x machine-type) table to pick the exact mnemonic - signed
//! variants for integers, plain variants for floats. A missing entry is
//! a generator bug surfacing as `UnsupportedOperator`, never a silent
//! guess. A parallel table maps machine-scalar pairs to conversion
//! mnemonics for the `Conversion` nodes the unifier inserted.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::ast::types::Ty;

lazy_static! {
    /// Mnemonics per operator, one column per scalar: i32, i64, f32, f64.
    /// `None` marks combinations the target has no instruction for.
    pub static ref BINARY_MNEMONICS: HashMap<&'static str, [Option<&'static str>; 4]> = {
        let mut map = HashMap::new();
        map.insert(
            "+",
            [Some("i32.add"), Some("i64.add"), Some("f32.add"), Some("f64.add")],
        );
        map.insert(
            "-",
            [Some("i32.sub"), Some("i64.sub"), Some("f32.sub"), Some("f64.sub")],
        );
        map.insert(
            "*",
            [Some("i32.mul"), Some("i64.mul"), Some("f32.mul"), Some("f64.mul")],
        );
        map.insert(
            "/",
            [Some("i32.div_s"), Some("i64.div_s"), Some("f32.div"), Some("f64.div")],
        );
        // No float remainder instruction exists.
        map.insert("%", [Some("i32.rem_s"), Some("i64.rem_s"), None, None]);
        map.insert(
            "==",
            [Some("i32.eq"), Some("i64.eq"), Some("f32.eq"), Some("f64.eq")],
        );
        map.insert(
            "!=",
            [Some("i32.ne"), Some("i64.ne"), Some("f32.ne"), Some("f64.ne")],
        );
        map.insert(
            "<",
            [Some("i32.lt_s"), Some("i64.lt_s"), Some("f32.lt"), Some("f64.lt")],
        );
        map.insert(
            "<=",
            [Some("i32.le_s"), Some("i64.le_s"), Some("f32.le"), Some("f64.le")],
        );
        map.insert(
            ">",
            [Some("i32.gt_s"), Some("i64.gt_s"), Some("f32.gt"), Some("f64.gt")],
        );
        map.insert(
            ">=",
            [Some("i32.ge_s"), Some("i64.ge_s"), Some("f32.ge"), Some("f64.ge")],
        );
        map
    };

    /// Conversion mnemonics keyed by (from, to) scalar indices.
    pub static ref CONVERSION_MNEMONICS: HashMap<(usize, usize), &'static str> = {
        let mut map = HashMap::new();
        map.insert((0, 1), "i64.extend_i32_s");
        map.insert((0, 2), "f32.convert_i32_s");
        map.insert((0, 3), "f64.convert_i32_s");
        map.insert((1, 0), "i32.wrap_i64");
        map.insert((1, 2), "f32.convert_i64_s");
        map.insert((1, 3), "f64.convert_i64_s");
        map.insert((2, 0), "i32.trunc_f32_s");
        map.insert((2, 1), "i64.trunc_f32_s");
        map.insert((2, 3), "f64.promote_f32");
        map.insert((3, 0), "i32.trunc_f64_s");
        map.insert((3, 1), "i64.trunc_f64_s");
        map.insert((3, 2), "f32.demote_f64");
        map
    };
}

/// One fixed host import: name, parameter value types, optional result.
pub struct HostImport {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub result: Option<&'static str>,
}

/// The complete import section, always declared in this order whether
/// referenced or not, so the runtime sees a deterministic contract:
/// scalar printing at the four widths, the pointer-decoding print
/// variants, and the tool calls.
pub static HOST_IMPORTS: [HostImport; 15] = [
    HostImport { name: "print_i32", params: &["i32"], result: None },
    HostImport { name: "print_i64", params: &["i64"], result: None },
    HostImport { name: "print_f32", params: &["f32"], result: None },
    HostImport { name: "print_f64", params: &["f64"], result: None },
    HostImport { name: "print_str", params: &["i32"], result: None },
    HostImport { name: "print_json", params: &["i32"], result: None },
    HostImport { name: "print_i32_array", params: &["i32"], result: None },
    HostImport { name: "print_i64_array", params: &["i32"], result: None },
    HostImport { name: "print_f32_array", params: &["i32"], result: None },
    HostImport { name: "print_f64_array", params: &["i32"], result: None },
    HostImport { name: "print_str_array", params: &["i32"], result: None },
    HostImport { name: "get_time", params: &[], result: Some("i64") },
    HostImport { name: "get_weather", params: &["i32"], result: Some("i32") },
    HostImport { name: "get_joke", params: &[], result: Some("i32") },
    HostImport { name: "llm_call", params: &["i32", "i32"], result: Some("i32") },
];

/// Select the mnemonic for a binary operator over a machine scalar.
pub fn binary_instruction(op: &str, ty: &Ty) -> Option<&'static str> {
    let row = BINARY_MNEMONICS.get(op)?;
    row[ty.scalar_index()?]
}

/// Select the conversion mnemonic between two machine scalars. `None`
/// means the representations already agree and nothing is emitted.
pub fn conversion_instruction(from: &Ty, to: &Ty) -> Option<&'static str> {
    let from = from.scalar_index()?;
    let to = to.scalar_index()?;
    if from == to {
        return None;
    }
    CONVERSION_MNEMONICS.get(&(from, to)).copied()
}

/// The print import handling a value of the given machine type.
pub fn print_import(ty: &Ty) -> Option<&'static str> {
    match ty {
        Ty::I32 => Some("print_i32"),
        Ty::I64 => Some("print_i64"),
        Ty::F32 => Some("print_f32"),
        Ty::F64 => Some("print_f64"),
        Ty::StrPtr => Some("print_str"),
        Ty::JsonPtr => Some("print_json"),
        Ty::ArrPtr(elem) => match elem.as_ref() {
            Ty::I32 => Some("print_i32_array"),
            Ty::I64 => Some("print_i64_array"),
            Ty::F32 => Some("print_f32_array"),
            Ty::F64 => Some("print_f64_array"),
            Ty::StrPtr => Some("print_str_array"),
            _ => None,
        },
        _ => None,
    }
}

/// The type-correct unit constant used by `++`/`--` and loop steps.
pub fn unit_constant(ty: &Ty) -> Option<&'static str> {
    match ty.scalar_index()? {
        0 => Some("i32.const 1"),
        1 => Some("i64.const 1"),
        2 => Some("f32.const 1"),
        3 => Some("f64.const 1"),
        _ => None,
    }
}

/// The typed load instruction for one array element. Pointer elements
/// load as plain offsets.
pub fn load_instruction(ty: &Ty) -> &'static str {
    match ty {
        Ty::I64 => "i64.load",
        Ty::F32 => "f32.load",
        Ty::F64 => "f64.load",
        _ => "i32.load",
    }
}
