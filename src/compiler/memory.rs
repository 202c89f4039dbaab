//! Linear-memory layout for strings, arrays and JSON payloads.
//!
//! Every value that must live in memory is serialized exactly once into
//! a byte block and appended at the current cursor; offsets are assigned
//! once and never reused or overwritten. Pushing such a value onto the
//! evaluation stack means pushing its offset: at the machine level every
//! "object" is purely an `i32` offset into this layout.

use serde_json::Value as JsonValue;

use crate::ast::types::{LiteralValue, Ty};

/// Size of one wasm linear-memory page.
pub const PAGE_SIZE: u32 = 65536;

/// One data segment: a byte block at a fixed offset.
#[derive(Debug, Clone)]
pub struct Segment {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// The append-only segment list plus its monotonic cursor.
#[derive(Debug)]
pub struct MemoryLayout {
    segments: Vec<Segment>,
    cursor: u32,
}

impl MemoryLayout {
    pub fn new() -> Self {
        MemoryLayout {
            segments: Vec::new(),
            // Offset 0 stays unused so a zero pointer never aliases
            // real data.
            cursor: 8,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Append a block at the cursor and return its offset. The cursor
    /// advances past the block, rounded up to 4-byte alignment.
    fn append(&mut self, bytes: Vec<u8>) -> u32 {
        let offset = self.cursor;
        self.cursor += bytes.len() as u32;
        self.cursor = (self.cursor + 3) & !3;
        self.segments.push(Segment { offset, bytes });
        offset
    }

    /// A NUL-terminated UTF-8 string.
    pub fn store_string(&mut self, value: &str) -> u32 {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.append(bytes)
    }

    /// A numeric array: 4-byte little-endian length prefix, then the
    /// elements tightly packed at their machine width.
    pub fn store_numeric_array(&mut self, elem_ty: &Ty, values: &[LiteralValue]) -> u32 {
        let mut bytes = (values.len() as u32).to_le_bytes().to_vec();
        for value in values {
            bytes.extend_from_slice(&literal_bytes(value, elem_ty));
        }
        self.append(bytes)
    }

    /// A string array: each element is stored first as its own string
    /// segment, then a length-prefixed block of 4-byte pointers.
    pub fn store_string_array(&mut self, values: &[String]) -> u32 {
        let pointers: Vec<u32> = values.iter().map(|value| self.store_string(value)).collect();

        let mut bytes = (pointers.len() as u32).to_le_bytes().to_vec();
        for pointer in pointers {
            bytes.extend_from_slice(&pointer.to_le_bytes());
        }
        self.append(bytes)
    }

    /// A JSON payload, serialized once, NUL-terminated like a string.
    pub fn store_json(&mut self, value: &JsonValue) -> u32 {
        let mut bytes = value.to_string().into_bytes();
        bytes.push(0);
        self.append(bytes)
    }

    /// End offset of the furthest segment.
    pub fn high_water_mark(&self) -> u32 {
        self.segments
            .iter()
            .map(|segment| segment.offset + segment.bytes.len() as u32)
            .max()
            .unwrap_or(0)
    }

    /// Smallest whole page count covering every segment, at least one.
    pub fn page_count(&self) -> u32 {
        let end = self.high_water_mark();
        let pages = end.div_ceil(PAGE_SIZE);
        pages.max(1)
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        MemoryLayout::new()
    }
}

/// Serialize one literal at the given machine width. Conversion-wrapped
/// array elements land here with the target element type.
pub fn literal_bytes(value: &LiteralValue, ty: &Ty) -> Vec<u8> {
    match ty {
        Ty::I32 => (literal_as_i64(value) as i32).to_le_bytes().to_vec(),
        Ty::I64 => literal_as_i64(value).to_le_bytes().to_vec(),
        Ty::F32 => (literal_as_f64(value) as f32).to_le_bytes().to_vec(),
        Ty::F64 => literal_as_f64(value).to_le_bytes().to_vec(),
        other => panic!("no byte serialization for element type {:?}", other),
    }
}

fn literal_as_i64(value: &LiteralValue) -> i64 {
    match value {
        LiteralValue::Int(v) => i64::from(*v),
        LiteralValue::Long(v) => *v,
        LiteralValue::Float(v) => *v as i64,
        LiteralValue::Double(v) => *v as i64,
        LiteralValue::Bool(v) => i64::from(*v),
        LiteralValue::Str(_) => panic!("string literal in numeric array layout"),
    }
}

fn literal_as_f64(value: &LiteralValue) -> f64 {
    match value {
        LiteralValue::Int(v) => f64::from(*v),
        LiteralValue::Long(v) => *v as f64,
        LiteralValue::Float(v) => f64::from(*v),
        LiteralValue::Double(v) => *v,
        LiteralValue::Bool(v) => f64::from(u8::from(*v)),
        LiteralValue::Str(_) => panic!("string literal in numeric array layout"),
    }
}
