use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::rc::Rc;

use super::{Dtype, NdArray, PickleError, PyValue};

// Opcodes, named as in CPython's pickletools.
const MARK: u8 = b'(';
const STOP: u8 = b'.';
const POP: u8 = b'0';
const POP_MARK: u8 = b'1';
const DUP: u8 = b'2';
const FLOAT: u8 = b'F';
const INT: u8 = b'I';
const BININT: u8 = b'J';
const BININT1: u8 = b'K';
const LONG: u8 = b'L';
const BININT2: u8 = b'M';
const NONE: u8 = b'N';
const REDUCE: u8 = b'R';
const STRING: u8 = b'S';
const BINSTRING: u8 = b'T';
const SHORT_BINSTRING: u8 = b'U';
const UNICODE: u8 = b'V';
const BINUNICODE: u8 = b'X';
const APPEND: u8 = b'a';
const BUILD: u8 = b'b';
const GLOBAL: u8 = b'c';
const DICT: u8 = b'd';
const EMPTY_DICT: u8 = b'}';
const APPENDS: u8 = b'e';
const GET: u8 = b'g';
const BINGET: u8 = b'h';
const LONG_BINGET: u8 = b'j';
const LIST: u8 = b'l';
const EMPTY_LIST: u8 = b']';
const PUT: u8 = b'p';
const BINPUT: u8 = b'q';
const LONG_BINPUT: u8 = b'r';
const SETITEM: u8 = b's';
const TUPLE: u8 = b't';
const EMPTY_TUPLE: u8 = b')';
const SETITEMS: u8 = b'u';
const BINFLOAT: u8 = b'G';
const PROTO: u8 = 0x80;
const NEWOBJ: u8 = 0x81;
const TUPLE1: u8 = 0x85;
const TUPLE2: u8 = 0x86;
const TUPLE3: u8 = 0x87;
const NEWTRUE: u8 = 0x88;
const NEWFALSE: u8 = 0x89;
const LONG1: u8 = 0x8a;
const LONG4: u8 = 0x8b;
const BINBYTES: u8 = b'B';
const SHORT_BINBYTES: u8 = b'C';
const SHORT_BINUNICODE: u8 = 0x8c;
const BINUNICODE8: u8 = 0x8d;
const BINBYTES8: u8 = 0x8e;
const EMPTY_SET: u8 = 0x8f;
const ADDITEMS: u8 = 0x90;
const FROZENSET: u8 = 0x91;
const NEWOBJ_EX: u8 = 0x92;
const STACK_GLOBAL: u8 = 0x93;
const MEMOIZE: u8 = 0x94;
const FRAME: u8 = 0x95;
const BYTEARRAY8: u8 = 0x96;

/// Decode one pickle from a reader. The reader is buffered internally.
pub fn from_reader<R: Read>(reader: R) -> Result<PyValue, PickleError> {
    Unpickler::new(BufReader::new(reader)).load()
}

/// Decode one pickle from memory.
pub fn from_slice(bytes: &[u8]) -> Result<PyValue, PickleError> {
    Unpickler::new(bytes).load()
}

// ---------------------------------------------------------------------------
// Unpickler
// ---------------------------------------------------------------------------

struct Unpickler<R> {
    reader: R,
    pos: u64,
    stack: Vec<PyValue>,
    marks: Vec<usize>,
    memo: HashMap<u32, PyValue>,
}

impl<R: BufRead> Unpickler<R> {
    fn new(reader: R) -> Self {
        Unpickler {
            reader,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn load(mut self) -> Result<PyValue, PickleError> {
        loop {
            let at = self.pos;
            let opcode = self.read_u8()?;
            match opcode {
                PROTO => {
                    self.read_u8()?;
                }
                FRAME => {
                    self.read_u64()?;
                }
                STOP => return self.pop(),
                MARK => self.marks.push(self.stack.len()),
                POP => {
                    self.pop()?;
                }
                POP_MARK => {
                    self.pop_mark()?;
                }
                DUP => {
                    let top = self.stack.last().cloned().ok_or(PickleError::StackUnderflow(at))?;
                    self.stack.push(top);
                }

                // -- scalars --
                NONE => self.stack.push(PyValue::None),
                NEWTRUE => self.stack.push(PyValue::Bool(true)),
                NEWFALSE => self.stack.push(PyValue::Bool(false)),
                INT => {
                    let line = self.read_line()?;
                    let value = match line.as_str() {
                        "00" => PyValue::Bool(false),
                        "01" => PyValue::Bool(true),
                        s => PyValue::Int(parse_text(s, "INT", at)?),
                    };
                    self.stack.push(value);
                }
                BININT => {
                    let v = i32::from_le_bytes(self.read_array()?);
                    self.stack.push(PyValue::Int(v as i64));
                }
                BININT1 => {
                    let v = self.read_u8()?;
                    self.stack.push(PyValue::Int(v as i64));
                }
                BININT2 => {
                    let v = u16::from_le_bytes(self.read_array()?);
                    self.stack.push(PyValue::Int(v as i64));
                }
                LONG => {
                    let line = self.read_line()?;
                    let v = parse_text(line.trim_end_matches('L'), "LONG", at)?;
                    self.stack.push(PyValue::Int(v));
                }
                LONG1 => {
                    let n = self.read_u8()? as u64;
                    let raw = self.read_bytes(n)?;
                    self.stack.push(PyValue::Int(decode_long(&raw)?));
                }
                LONG4 => {
                    let n = self.read_len4(at)?;
                    let raw = self.read_bytes(n)?;
                    self.stack.push(PyValue::Int(decode_long(&raw)?));
                }
                FLOAT => {
                    let line = self.read_line()?;
                    self.stack.push(PyValue::Float(parse_text(&line, "FLOAT", at)?));
                }
                BINFLOAT => {
                    let v = f64::from_be_bytes(self.read_array()?);
                    self.stack.push(PyValue::Float(v));
                }

                // -- strings and bytes --
                STRING => {
                    let line = self.read_line()?;
                    let inner = unquote(&line)
                        .ok_or(PickleError::Invalid { what: "STRING", pos: at })?;
                    let raw: Vec<u8> = inner.chars().map(|c| c as u32 as u8).collect();
                    self.stack.push(PyValue::Bytes(Rc::from(raw)));
                }
                BINSTRING => {
                    let n = self.read_len4(at)?;
                    let raw = self.read_bytes(n)?;
                    self.stack.push(PyValue::Bytes(Rc::from(raw)));
                }
                SHORT_BINSTRING | SHORT_BINBYTES => {
                    let n = self.read_u8()? as u64;
                    let raw = self.read_bytes(n)?;
                    self.stack.push(PyValue::Bytes(Rc::from(raw)));
                }
                BINBYTES => {
                    let n = u32::from_le_bytes(self.read_array()?) as u64;
                    let raw = self.read_bytes(n)?;
                    self.stack.push(PyValue::Bytes(Rc::from(raw)));
                }
                BINBYTES8 | BYTEARRAY8 => {
                    let n = self.read_u64()?;
                    let raw = self.read_bytes(n)?;
                    self.stack.push(PyValue::Bytes(Rc::from(raw)));
                }
                UNICODE => {
                    let line = self.read_line()?;
                    self.stack.push(PyValue::text(&line));
                }
                BINUNICODE => {
                    let n = u32::from_le_bytes(self.read_array()?) as u64;
                    let text = self.read_utf8(n, at)?;
                    self.stack.push(text);
                }
                SHORT_BINUNICODE => {
                    let n = self.read_u8()? as u64;
                    let text = self.read_utf8(n, at)?;
                    self.stack.push(text);
                }
                BINUNICODE8 => {
                    let n = self.read_u64()?;
                    let text = self.read_utf8(n, at)?;
                    self.stack.push(text);
                }

                // -- containers --
                EMPTY_TUPLE => self.stack.push(PyValue::Tuple(Vec::new())),
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(PyValue::Tuple(items));
                }
                TUPLE1 | TUPLE2 | TUPLE3 => {
                    let n = (opcode - TUPLE1 + 1) as usize;
                    if self.stack.len() < n {
                        return Err(PickleError::StackUnderflow(at));
                    }
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.stack.push(PyValue::Tuple(items));
                }
                EMPTY_LIST | EMPTY_SET => self.stack.push(PyValue::List(Vec::new())),
                LIST | FROZENSET => {
                    let items = self.pop_mark()?;
                    self.stack.push(PyValue::List(items));
                }
                APPEND => {
                    let item = self.pop()?;
                    self.top_list(at)?.push(item);
                }
                APPENDS | ADDITEMS => {
                    let items = self.pop_mark()?;
                    self.top_list(at)?.extend(items);
                }
                EMPTY_DICT => self.stack.push(PyValue::Dict(Vec::new())),
                DICT => {
                    let items = self.pop_mark()?;
                    let pairs = pairs(items, at)?;
                    self.stack.push(PyValue::Dict(pairs));
                }
                SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.top_dict(at)?.push((key, value));
                }
                SETITEMS => {
                    let items = self.pop_mark()?;
                    let new_pairs = pairs(items, at)?;
                    self.top_dict(at)?.extend(new_pairs);
                }

                // -- memo --
                PUT => {
                    let line = self.read_line()?;
                    let key = parse_text(&line, "PUT", at)?;
                    self.memoize(key)?;
                }
                BINPUT => {
                    let key = self.read_u8()? as u32;
                    self.memoize(key)?;
                }
                LONG_BINPUT => {
                    let key = u32::from_le_bytes(self.read_array()?);
                    self.memoize(key)?;
                }
                MEMOIZE => {
                    let key = self.memo.len() as u32;
                    self.memoize(key)?;
                }
                GET => {
                    let line = self.read_line()?;
                    let key = parse_text(&line, "GET", at)?;
                    self.recall(key)?;
                }
                BINGET => {
                    let key = self.read_u8()? as u32;
                    self.recall(key)?;
                }
                LONG_BINGET => {
                    let key = u32::from_le_bytes(self.read_array()?);
                    self.recall(key)?;
                }

                // -- objects --
                GLOBAL => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.stack.push(PyValue::Global { module, name });
                }
                STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (Some(module), Some(name)) = (module.as_text(), name.as_text()) else {
                        return Err(PickleError::Invalid { what: "STACK_GLOBAL operands", pos: at });
                    };
                    self.stack.push(PyValue::Global {
                        module: module.into_owned(),
                        name: name.into_owned(),
                    });
                }
                REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let value = reduce(callable, args, at)?;
                    self.stack.push(value);
                }
                NEWOBJ => {
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.stack
                        .push(PyValue::Object { class: Box::new(class), args: Box::new(args) });
                }
                NEWOBJ_EX => {
                    let _kwargs = self.pop()?;
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.stack
                        .push(PyValue::Object { class: Box::new(class), args: Box::new(args) });
                }
                BUILD => {
                    let state = self.pop()?;
                    let target = self.pop()?;
                    let value = build(target, state)?;
                    self.stack.push(value);
                }

                other => return Err(PickleError::UnsupportedOpcode { opcode: other, pos: at }),
            }
        }
    }

    // -- stack helpers --

    fn pop(&mut self) -> Result<PyValue, PickleError> {
        if self.marks.last().is_some_and(|&m| m >= self.stack.len()) {
            return Err(PickleError::StackUnderflow(self.pos));
        }
        self.stack.pop().ok_or(PickleError::StackUnderflow(self.pos))
    }

    fn pop_mark(&mut self) -> Result<Vec<PyValue>, PickleError> {
        let mark = self.marks.pop().ok_or(PickleError::MissingMark(self.pos))?;
        if mark > self.stack.len() {
            return Err(PickleError::StackUnderflow(self.pos));
        }
        Ok(self.stack.split_off(mark))
    }

    fn top_list(&mut self, at: u64) -> Result<&mut Vec<PyValue>, PickleError> {
        match self.stack.last_mut() {
            Some(PyValue::List(items)) => Ok(items),
            _ => Err(PickleError::Invalid { what: "append target", pos: at }),
        }
    }

    fn top_dict(&mut self, at: u64) -> Result<&mut Vec<(PyValue, PyValue)>, PickleError> {
        match self.stack.last_mut() {
            Some(PyValue::Dict(items)) => Ok(items),
            _ => Err(PickleError::Invalid { what: "setitem target", pos: at }),
        }
    }

    fn memoize(&mut self, key: u32) -> Result<(), PickleError> {
        let top = self.stack.last().cloned().ok_or(PickleError::StackUnderflow(self.pos))?;
        self.memo.insert(key, top);
        Ok(())
    }

    fn recall(&mut self, key: u32) -> Result<(), PickleError> {
        let value = self.memo.get(&key).cloned().ok_or(PickleError::MissingMemo(key))?;
        self.stack.push(value);
        Ok(())
    }

    // -- byte-level readers --

    fn read_u8(&mut self) -> Result<u8, PickleError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u64(&mut self) -> Result<u64, PickleError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_len4(&mut self, at: u64) -> Result<u64, PickleError> {
        let n = i32::from_le_bytes(self.read_array()?);
        u64::try_from(n).map_err(|_| PickleError::Invalid { what: "negative length", pos: at })
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf).map_err(eof_as_truncated)?;
        self.pos += N as u64;
        Ok(buf)
    }

    fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>, PickleError> {
        // Grow as data arrives so a corrupt length cannot force a huge allocation.
        let mut buf = Vec::new();
        (&mut self.reader).take(n).read_to_end(&mut buf)?;
        if buf.len() as u64 != n {
            return Err(PickleError::Truncated);
        }
        self.pos += n;
        Ok(buf)
    }

    fn read_utf8(&mut self, n: u64, at: u64) -> Result<PyValue, PickleError> {
        let raw = self.read_bytes(n)?;
        let text = String::from_utf8(raw)
            .map_err(|_| PickleError::Invalid { what: "UTF-8 string", pos: at })?;
        Ok(PyValue::Text(Rc::from(text)))
    }

    fn read_line(&mut self) -> Result<String, PickleError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if buf.last() != Some(&b'\n') {
            return Err(PickleError::Truncated);
        }
        self.pos += n as u64;
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(buf.iter().map(|&c| c as char).collect())
    }
}

fn eof_as_truncated(e: std::io::Error) -> PickleError {
    if e.kind() == ErrorKind::UnexpectedEof {
        PickleError::Truncated
    } else {
        PickleError::Io(e)
    }
}

fn parse_text<T: std::str::FromStr>(
    s: &str,
    what: &'static str,
    pos: u64,
) -> Result<T, PickleError> {
    s.trim().parse().map_err(|_| PickleError::Invalid { what, pos })
}

/// Strip the quotes of a protocol-0 STRING argument. Escaped strings are
/// rejected rather than half-decoded.
fn unquote(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    if bytes.len() < 2 || bytes[0] != bytes[bytes.len() - 1] || !matches!(bytes[0], b'\'' | b'"') {
        return None;
    }
    let inner = &line[1..line.len() - 1];
    (!inner.contains('\\')).then_some(inner)
}

/// Little-endian two's complement, at most 8 bytes of magnitude.
fn decode_long(raw: &[u8]) -> Result<i64, PickleError> {
    if raw.is_empty() {
        return Ok(0);
    }
    let negative = raw[raw.len() - 1] & 0x80 != 0;
    let significant = if raw.len() > 8 {
        let pad = if negative { 0xff } else { 0x00 };
        if raw[8..].iter().any(|&b| b != pad) {
            return Err(PickleError::IntOverflow);
        }
        &raw[..8]
    } else {
        raw
    };
    let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buf[..significant.len()].copy_from_slice(significant);
    Ok(i64::from_le_bytes(buf))
}

fn pairs(items: Vec<PyValue>, at: u64) -> Result<Vec<(PyValue, PyValue)>, PickleError> {
    if items.len() % 2 != 0 {
        return Err(PickleError::Invalid { what: "odd number of dict items", pos: at });
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        out.push((k, v));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Interpreted callables
// ---------------------------------------------------------------------------

fn reduce(callable: PyValue, args: PyValue, at: u64) -> Result<PyValue, PickleError> {
    if let PyValue::Global { module, name } = &callable {
        match (module.as_str(), name.as_str()) {
            ("numpy", "dtype") => {
                let descr = match &args {
                    PyValue::Tuple(items) => items.first().and_then(|d| d.as_text()),
                    _ => None,
                };
                let descr = descr.ok_or(PickleError::Invalid { what: "dtype arguments", pos: at })?;
                let dtype = Dtype::parse(&descr)
                    .ok_or_else(|| PickleError::Array(format!("unsupported dtype '{descr}'")))?;
                return Ok(PyValue::Dtype(dtype));
            }
            ("_codecs", "encode") => {
                // Python 3 writes bytes as _codecs.encode(text, 'latin1') under protocol 2.
                if let PyValue::Tuple(items) = &args {
                    if let Some(PyValue::Text(s)) = items.first() {
                        let raw: Vec<u8> = s.chars().map(|c| c as u32 as u8).collect();
                        return Ok(PyValue::Bytes(Rc::from(raw)));
                    }
                }
                return Err(PickleError::Invalid { what: "_codecs.encode arguments", pos: at });
            }
            (module, "_frombuffer") if module.ends_with("numeric") => {
                return Ok(PyValue::Array(Rc::new(array_from_buffer(&args)?)));
            }
            _ => {}
        }
    }
    Ok(PyValue::Object { class: Box::new(callable), args: Box::new(args) })
}

fn build(target: PyValue, state: PyValue) -> Result<PyValue, PickleError> {
    match target {
        PyValue::Dtype(mut dtype) => {
            if let PyValue::Tuple(items) = &state {
                if let Some(order) = items.get(1).and_then(|o| o.as_text()) {
                    dtype.apply_byte_order(&order);
                }
            }
            Ok(PyValue::Dtype(dtype))
        }
        PyValue::Object { ref class, .. } if is_array_constructor(class) => {
            Ok(PyValue::Array(Rc::new(array_from_state(&state)?)))
        }
        other => Ok(other),
    }
}

fn is_array_constructor(class: &PyValue) -> bool {
    match class {
        PyValue::Global { module, name } => {
            (name == "_reconstruct" && module.ends_with("multiarray"))
                || (name == "ndarray" && module == "numpy")
        }
        _ => false,
    }
}

/// numpy's `ndarray.__setstate__` tuple: `([version,] shape, dtype, fortran, data)`.
fn array_from_state(state: &PyValue) -> Result<NdArray, PickleError> {
    let items = match state {
        PyValue::Tuple(items) => items.as_slice(),
        other => return Err(PickleError::Array(format!("state is a {}", other.type_name()))),
    };
    let items = match items.len() {
        5 => &items[1..],
        4 => items,
        n => return Err(PickleError::Array(format!("state has {n} fields"))),
    };

    let shape = shape_of(&items[0])?;
    let dtype = dtype_of(&items[1])?;
    let fortran = items[2].as_bool().unwrap_or(false);
    let raw = buffer_of(&items[3])?;

    NdArray::from_raw(shape, dtype, fortran, &raw)
}

/// Protocol 5 layout: `_frombuffer(buffer, dtype, shape, order)`, the buffer
/// written in-band as bytes or bytearray.
fn array_from_buffer(args: &PyValue) -> Result<NdArray, PickleError> {
    let items = match args {
        PyValue::Tuple(items) if items.len() == 4 => items,
        other => {
            let found = other.type_name();
            return Err(PickleError::Array(format!("_frombuffer arguments: {found}")));
        }
    };
    let raw = buffer_of(&items[0])?;
    let dtype = dtype_of(&items[1])?;
    let shape = shape_of(&items[2])?;
    let fortran = match items[3].as_text().as_deref() {
        Some("C") => false,
        Some("F") => true,
        _ => return Err(PickleError::Array("_frombuffer order must be 'C' or 'F'".into())),
    };

    NdArray::from_raw(shape, dtype, fortran, &raw)
}

fn shape_of(value: &PyValue) -> Result<Vec<usize>, PickleError> {
    match value {
        PyValue::Tuple(dims) => dims
            .iter()
            .map(|d| d.as_int().and_then(|d| usize::try_from(d).ok()))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| PickleError::Array("non-integer shape".into())),
        other => Err(PickleError::Array(format!("shape is a {}", other.type_name()))),
    }
}

fn dtype_of(value: &PyValue) -> Result<Dtype, PickleError> {
    match value {
        PyValue::Dtype(d) => Ok(*d),
        other => Err(PickleError::Array(format!("dtype is a {}", other.type_name()))),
    }
}

fn buffer_of(value: &PyValue) -> Result<Rc<[u8]>, PickleError> {
    match value {
        PyValue::Bytes(b) => Ok(b.clone()),
        PyValue::Text(s) => Ok(Rc::from(s.chars().map(|c| c as u32 as u8).collect::<Vec<u8>>())),
        other => Err(PickleError::Array(format!(
            "data is a {} (object arrays are not supported)",
            other.type_name()
        ))),
    }
}
