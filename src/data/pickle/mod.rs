//! Minimal Python pickle support for numpy-bearing object dumps.
//!
//! The decoder is a small stack machine covering protocols 0 through 5
//! (out-of-band buffers excepted). It does not execute arbitrary callables:
//! `numpy.dtype`, numpy's `_reconstruct` and `_codecs.encode` are interpreted,
//! everything else decodes to an opaque [`PyValue::Object`].
//!
//! Memo entries are snapshots. A container that is mutated after being
//! memoized (APPENDS / SETITEMS / BUILD following a PUT) is not aliased back
//! into the memo. Dumps of plain dicts of arrays never rely on that.

pub mod reader;
pub mod writer;

use std::borrow::Cow;
use std::rc::Rc;

use thiserror::Error;

pub use reader::{from_reader, from_slice};
pub use writer::to_vec;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("I/O error while reading pickle stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("pickle stream ended before STOP")]
    Truncated,

    #[error("unsupported opcode 0x{opcode:02x} at byte {pos}")]
    UnsupportedOpcode { opcode: u8, pos: u64 },

    #[error("stack underflow at byte {0}")]
    StackUnderflow(u64),

    #[error("no MARK on the stack at byte {0}")]
    MissingMark(u64),

    #[error("memo key {0} not found")]
    MissingMemo(u32),

    #[error("invalid {what} at byte {pos}")]
    Invalid { what: &'static str, pos: u64 },

    #[error("integer does not fit in 64 bits")]
    IntOverflow,

    #[error("bad ndarray: {0}")]
    Array(String),
}

// ---------------------------------------------------------------------------
// PyValue – a decoded Python object
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Python 2 `str` and Python 3 `bytes`.
    Bytes(Rc<[u8]>),
    Text(Rc<str>),
    List(Vec<PyValue>),
    Tuple(Vec<PyValue>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(PyValue, PyValue)>),
    Global { module: String, name: String },
    Dtype(Dtype),
    Array(Rc<NdArray>),
    /// Result of a constructor call that is not interpreted.
    Object {
        class: Box<PyValue>,
        args: Box<PyValue>,
    },
}

impl PyValue {
    pub fn text(s: &str) -> Self {
        PyValue::Text(Rc::from(s))
    }

    pub fn bytes(b: &[u8]) -> Self {
        PyValue::Bytes(Rc::from(b))
    }

    /// Short Python-ish type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PyValue::None => "None",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Bytes(_) => "bytes",
            PyValue::Text(_) => "str",
            PyValue::List(_) => "list",
            PyValue::Tuple(_) => "tuple",
            PyValue::Dict(_) => "dict",
            PyValue::Global { .. } => "global",
            PyValue::Dtype(_) => "numpy.dtype",
            PyValue::Array(_) => "numpy.ndarray",
            PyValue::Object { .. } => "object",
        }
    }

    /// Text view of a `str`, or of a Python 2 byte string decoded as latin-1.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            PyValue::Text(s) => Some(Cow::Borrowed(s)),
            PyValue::Bytes(b) => Some(Cow::Owned(b.iter().map(|&c| c as char).collect())),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PyValue::Int(i) => Some(*i),
            PyValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PyValue::Bool(b) => Some(*b),
            PyValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            PyValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Look up a dict entry by its string key. Later duplicates win.
    pub fn get(&self, key: &str) -> Option<&PyValue> {
        match self {
            PyValue::Dict(items) => items
                .iter()
                .rev()
                .find(|(k, _)| k.as_text().is_some_and(|k| k == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dtype
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Int,
    UInt,
    Bool,
}

/// A numpy scalar type: kind, item size in bytes and byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    pub kind: ScalarKind,
    pub size: usize,
    pub big_endian: bool,
}

impl Dtype {
    pub const F8: Dtype = Dtype { kind: ScalarKind::Float, size: 8, big_endian: false };
    pub const I4: Dtype = Dtype { kind: ScalarKind::Int, size: 4, big_endian: false };

    /// Parse a numpy type string such as `f8`, `<i4`, `u1` or `?`.
    pub fn parse(descr: &str) -> Option<Self> {
        let (big_endian, rest) = match descr.as_bytes().first().copied()? {
            b'>' => (true, &descr[1..]),
            b'<' | b'|' | b'=' => (false, &descr[1..]),
            _ => (false, descr),
        };
        if rest == "?" {
            return Some(Dtype { kind: ScalarKind::Bool, size: 1, big_endian });
        }
        let mut chars = rest.chars();
        let kind = match chars.next()? {
            'f' => ScalarKind::Float,
            'i' => ScalarKind::Int,
            'u' => ScalarKind::UInt,
            'b' => ScalarKind::Bool,
            _ => return None,
        };
        let size: usize = chars.as_str().parse().ok()?;
        let valid = match kind {
            ScalarKind::Float => matches!(size, 4 | 8),
            ScalarKind::Int | ScalarKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ScalarKind::Bool => size == 1,
        };
        valid.then_some(Dtype { kind, size, big_endian })
    }

    /// The type string without a byte-order prefix, as numpy pickles it.
    pub fn descr(&self) -> String {
        let kind = match self.kind {
            ScalarKind::Float => 'f',
            ScalarKind::Int => 'i',
            ScalarKind::UInt => 'u',
            ScalarKind::Bool => 'b',
        };
        format!("{kind}{}", self.size)
    }

    /// Apply the byte-order character from a pickled dtype state.
    pub fn apply_byte_order(&mut self, order: &str) {
        match order {
            ">" => self.big_endian = true,
            "<" => self.big_endian = false,
            _ => {}
        }
    }

    pub fn byte_order(&self) -> &'static str {
        if self.size == 1 {
            "|"
        } else if self.big_endian {
            ">"
        } else {
            "<"
        }
    }
}

// ---------------------------------------------------------------------------
// NdArray
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

/// A decoded numpy array, stored in C (row-major) order.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
    pub data: ArrayData,
}

impl NdArray {
    /// An `(N, 1)` float64 column, the layout of a single sensor channel.
    pub fn column_f64(values: Vec<f64>) -> Self {
        NdArray {
            shape: vec![values.len(), 1],
            dtype: Dtype::F8,
            data: ArrayData::Float(values),
        }
    }

    /// A flat int32 vector, the layout of a label sequence.
    pub fn vector_i32(values: Vec<i64>) -> Self {
        NdArray {
            shape: vec![values.len()],
            dtype: Dtype::I4,
            data: ArrayData::Int(values),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match &self.data {
            ArrayData::Float(v) => v.len(),
            ArrayData::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when at most one axis is longer than one, so flattening keeps
    /// the samples in sequence.
    pub fn is_vector_like(&self) -> bool {
        self.shape.iter().filter(|&&d| d != 1).count() <= 1
    }

    /// Decode a raw numpy buffer.
    pub fn from_raw(
        shape: Vec<usize>,
        dtype: Dtype,
        fortran_order: bool,
        raw: &[u8],
    ) -> Result<Self, PickleError> {
        let needed = shape
            .iter()
            .try_fold(dtype.size, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| PickleError::Array(format!("shape {shape:?} overflows")))?;
        if raw.len() != needed {
            return Err(PickleError::Array(format!(
                "shape {shape:?} of {} needs {needed} bytes, got {}",
                dtype.descr(),
                raw.len()
            )));
        }

        let chunks = raw.chunks_exact(dtype.size);
        let data = match dtype.kind {
            ScalarKind::Float => ArrayData::Float(chunks.map(|c| read_float(c, dtype)).collect()),
            ScalarKind::Int | ScalarKind::Bool => {
                ArrayData::Int(chunks.map(|c| read_int(c, dtype)).collect())
            }
            ScalarKind::UInt => ArrayData::Int(chunks.map(|c| read_uint(c, dtype)).collect()),
        };

        let data = if fortran_order && shape.len() > 1 {
            match data {
                ArrayData::Float(v) => ArrayData::Float(fortran_to_c(&v, &shape)),
                ArrayData::Int(v) => ArrayData::Int(fortran_to_c(&v, &shape)),
            }
        } else {
            data
        };

        Ok(NdArray { shape, dtype, data })
    }

    /// Encode the elements in C order using `self.dtype`.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.dtype.size);
        match &self.data {
            ArrayData::Float(v) => v.iter().for_each(|&x| write_float(&mut out, x, self.dtype)),
            ArrayData::Int(v) => v.iter().for_each(|&x| write_int(&mut out, x, self.dtype)),
        }
        out
    }

    /// Flattened float view.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            ArrayData::Float(v) => v.clone(),
            ArrayData::Int(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    /// Flattened integer view. Float arrays qualify only if every element is
    /// integral.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.data {
            ArrayData::Int(v) => Some(v.clone()),
            ArrayData::Float(v) => v
                .iter()
                .map(|&x| (x.is_finite() && x.fract() == 0.0).then_some(x as i64))
                .collect(),
        }
    }
}

fn fixed<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(chunk);
    buf
}

fn read_float(c: &[u8], dtype: Dtype) -> f64 {
    match (dtype.size, dtype.big_endian) {
        (4, false) => f32::from_le_bytes(fixed(c)) as f64,
        (4, true) => f32::from_be_bytes(fixed(c)) as f64,
        (_, false) => f64::from_le_bytes(fixed(c)),
        (_, true) => f64::from_be_bytes(fixed(c)),
    }
}

fn read_int(c: &[u8], dtype: Dtype) -> i64 {
    match (dtype.size, dtype.big_endian) {
        (1, _) => c[0] as i8 as i64,
        (2, false) => i16::from_le_bytes(fixed(c)) as i64,
        (2, true) => i16::from_be_bytes(fixed(c)) as i64,
        (4, false) => i32::from_le_bytes(fixed(c)) as i64,
        (4, true) => i32::from_be_bytes(fixed(c)) as i64,
        (_, false) => i64::from_le_bytes(fixed(c)),
        (_, true) => i64::from_be_bytes(fixed(c)),
    }
}

fn read_uint(c: &[u8], dtype: Dtype) -> i64 {
    match (dtype.size, dtype.big_endian) {
        (1, _) => c[0] as i64,
        (2, false) => u16::from_le_bytes(fixed(c)) as i64,
        (2, true) => u16::from_be_bytes(fixed(c)) as i64,
        (4, false) => u32::from_le_bytes(fixed(c)) as i64,
        (4, true) => u32::from_be_bytes(fixed(c)) as i64,
        (_, false) => u64::from_le_bytes(fixed(c)) as i64,
        (_, true) => u64::from_be_bytes(fixed(c)) as i64,
    }
}

fn write_float(out: &mut Vec<u8>, x: f64, dtype: Dtype) {
    match (dtype.size, dtype.big_endian) {
        (4, false) => out.extend_from_slice(&(x as f32).to_le_bytes()),
        (4, true) => out.extend_from_slice(&(x as f32).to_be_bytes()),
        (_, false) => out.extend_from_slice(&x.to_le_bytes()),
        (_, true) => out.extend_from_slice(&x.to_be_bytes()),
    }
}

fn write_int(out: &mut Vec<u8>, x: i64, dtype: Dtype) {
    let bytes = if dtype.big_endian { x.to_be_bytes() } else { x.to_le_bytes() };
    // Truncate the 8-byte two's complement form to the item size.
    if dtype.big_endian {
        out.extend_from_slice(&bytes[8 - dtype.size..]);
    } else {
        out.extend_from_slice(&bytes[..dtype.size]);
    }
}

/// Reorder a column-major buffer into row-major order.
fn fortran_to_c<T: Copy>(values: &[T], shape: &[usize]) -> Vec<T> {
    let mut f_strides = vec![1usize; shape.len()];
    for axis in 1..shape.len() {
        f_strides[axis] = f_strides[axis - 1] * shape[axis - 1];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..values.len() {
        let offset: usize = index.iter().zip(&f_strides).map(|(i, s)| i * s).sum();
        out.push(values[offset]);
        // Advance the C-order multi-index (last axis fastest).
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}
