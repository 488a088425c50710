use std::collections::HashMap;

use super::{Dtype, NdArray, PyValue};

/// Encode a value as a protocol-3 pickle, writing arrays the way numpy's
/// `ndarray.__reduce__` does. Used to produce sample inputs and fixtures.
pub fn to_vec(value: &PyValue) -> Vec<u8> {
    let mut writer = PickleWriter::default();
    writer.out.extend_from_slice(&[0x80, 3]);
    writer.write(value);
    writer.out.push(b'.');
    writer.out
}

#[derive(Default)]
struct PickleWriter {
    out: Vec<u8>,
    /// dtype descr -> memo slot, so repeated dtypes are written once.
    dtypes: HashMap<String, u32>,
    next_memo: u32,
}

impl PickleWriter {
    fn write(&mut self, value: &PyValue) {
        match value {
            PyValue::None => self.out.push(b'N'),
            PyValue::Bool(true) => self.out.push(0x88),
            PyValue::Bool(false) => self.out.push(0x89),
            PyValue::Int(i) => self.write_int(*i),
            PyValue::Float(f) => {
                self.out.push(b'G');
                self.out.extend_from_slice(&f.to_be_bytes());
            }
            PyValue::Bytes(b) => self.write_bytes(b),
            PyValue::Text(s) => {
                self.out.push(b'X');
                self.out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                self.out.extend_from_slice(s.as_bytes());
            }
            PyValue::List(items) => {
                self.out.push(b']');
                if !items.is_empty() {
                    self.out.push(b'(');
                    items.iter().for_each(|v| self.write(v));
                    self.out.push(b'e');
                }
            }
            PyValue::Tuple(items) => self.write_tuple(items),
            PyValue::Dict(items) => {
                self.out.push(b'}');
                if !items.is_empty() {
                    self.out.push(b'(');
                    for (k, v) in items {
                        self.write(k);
                        self.write(v);
                    }
                    self.out.push(b'u');
                }
            }
            PyValue::Global { module, name } => self.write_global(module, name),
            PyValue::Dtype(dtype) => self.write_dtype(*dtype),
            PyValue::Array(array) => self.write_array(array),
            PyValue::Object { class, args } => {
                self.write(class);
                self.write(args);
                self.out.push(b'R');
            }
        }
    }

    fn write_int(&mut self, i: i64) {
        if (0..=0xff).contains(&i) {
            self.out.push(b'K');
            self.out.push(i as u8);
        } else if let Ok(small) = i32::try_from(i) {
            self.out.push(b'J');
            self.out.extend_from_slice(&small.to_le_bytes());
        } else {
            self.out.extend_from_slice(&[0x8a, 8]);
            self.out.extend_from_slice(&i.to_le_bytes());
        }
    }

    fn write_bytes(&mut self, b: &[u8]) {
        if b.len() < 256 {
            self.out.push(b'C');
            self.out.push(b.len() as u8);
        } else {
            self.out.push(b'B');
            self.out.extend_from_slice(&(b.len() as u32).to_le_bytes());
        }
        self.out.extend_from_slice(b);
    }

    fn write_tuple(&mut self, items: &[PyValue]) {
        match items.len() {
            0 => self.out.push(b')'),
            n @ 1..=3 => {
                items.iter().for_each(|v| self.write(v));
                self.out.push(0x85 + (n as u8 - 1));
            }
            _ => {
                self.out.push(b'(');
                items.iter().for_each(|v| self.write(v));
                self.out.push(b't');
            }
        }
    }

    fn write_global(&mut self, module: &str, name: &str) {
        self.out.push(b'c');
        self.out.extend_from_slice(module.as_bytes());
        self.out.push(b'\n');
        self.out.extend_from_slice(name.as_bytes());
        self.out.push(b'\n');
    }

    fn put(&mut self) -> u32 {
        let slot = self.next_memo;
        self.next_memo += 1;
        if slot < 256 {
            self.out.extend_from_slice(&[b'q', slot as u8]);
        } else {
            self.out.push(b'r');
            self.out.extend_from_slice(&slot.to_le_bytes());
        }
        slot
    }

    fn get(&mut self, slot: u32) {
        if slot < 256 {
            self.out.extend_from_slice(&[b'h', slot as u8]);
        } else {
            self.out.push(b'j');
            self.out.extend_from_slice(&slot.to_le_bytes());
        }
    }

    fn write_dtype(&mut self, dtype: Dtype) {
        let key = format!("{}{}", dtype.byte_order(), dtype.descr());
        if let Some(&slot) = self.dtypes.get(&key) {
            self.get(slot);
            return;
        }

        self.write_global("numpy", "dtype");
        self.write_tuple(&[
            PyValue::text(&dtype.descr()),
            PyValue::Bool(false),
            PyValue::Bool(true),
        ]);
        self.out.push(b'R');
        let slot = self.put();
        self.dtypes.insert(key, slot);

        self.write_tuple(&[
            PyValue::Int(3),
            PyValue::text(dtype.byte_order()),
            PyValue::None,
            PyValue::None,
            PyValue::None,
            PyValue::Int(-1),
            PyValue::Int(-1),
            PyValue::Int(0),
        ]);
        self.out.push(b'b');
    }

    fn write_array(&mut self, array: &NdArray) {
        self.write_global("numpy.core.multiarray", "_reconstruct");
        self.write_global("numpy", "ndarray");
        self.write_tuple(&[PyValue::Int(0)]);
        self.write_bytes(b"b");
        self.out.push(0x87);
        self.out.push(b'R');

        // State: (1, shape, dtype, is_fortran, raw)
        self.out.push(b'(');
        self.write_int(1);
        let shape: Vec<PyValue> = array.shape.iter().map(|&d| PyValue::Int(d as i64)).collect();
        self.write_tuple(&shape);
        self.write_dtype(array.dtype);
        self.out.push(0x89);
        self.write_bytes(&array.to_raw());
        self.out.push(b't');
        self.out.push(b'b');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::pickle::{from_slice, ArrayData};

    #[test]
    fn nested_dict_of_arrays_decodes_back() {
        let eda = NdArray::column_f64(vec![0.5, 0.25, 0.125]);
        let temp = NdArray::column_f64(vec![33.0, 33.5, 34.0]);
        let label = NdArray::vector_i32(vec![0, 1, 2]);
        let value = PyValue::Dict(vec![
            (
                PyValue::text("signal"),
                PyValue::Dict(vec![(
                    PyValue::text("chest"),
                    PyValue::Dict(vec![
                        (PyValue::text("EDA"), PyValue::Array(eda.into())),
                        (PyValue::text("Temp"), PyValue::Array(temp.into())),
                    ]),
                )]),
            ),
            (PyValue::text("label"), PyValue::Array(label.into())),
            (PyValue::text("subject"), PyValue::text("S2")),
        ]);

        let decoded = from_slice(&to_vec(&value)).unwrap();
        let chest = decoded.get("signal").and_then(|s| s.get("chest")).unwrap();

        // The second array reuses the memoized dtype.
        let temp = chest.get("Temp").and_then(PyValue::as_array).unwrap();
        assert_eq!(temp.shape, vec![3, 1]);
        assert_eq!(temp.data, ArrayData::Float(vec![33.0, 33.5, 34.0]));

        let label = decoded.get("label").and_then(PyValue::as_array).unwrap();
        assert_eq!(label.dtype, Dtype::I4);
        assert_eq!(label.data, ArrayData::Int(vec![0, 1, 2]));
        assert_eq!(decoded.get("subject"), Some(&PyValue::text("S2")));
    }

    #[test]
    fn large_ints_and_long_bytes() {
        let blob = vec![7u8; 300];
        let value = PyValue::List(vec![
            PyValue::Int(-5),
            PyValue::Int(1 << 40),
            PyValue::Bytes(blob.clone().into()),
        ]);
        let decoded = from_slice(&to_vec(&value)).unwrap();
        assert_eq!(decoded, value);
    }
}
