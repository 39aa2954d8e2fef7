//! Tuple representation and serialization.

use crate::codec::{put_value, Decoder};
use bytes::{BufMut, BytesMut};
use ordo_common::{Result, Value};

/// A row stored in a heap page.
///
/// Position `i` always holds the value of the `i`-th column of the table's
/// ordered schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    /// Creates a tuple from values in schema order.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Returns all values in schema order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value at a column position.
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }

    /// Replaces the value at a column position, returning the old value.
    pub fn set(&mut self, column: usize, value: Value) -> Option<Value> {
        self.values
            .get_mut(column)
            .map(|slot| std::mem::replace(slot, value))
    }

    /// Returns the clustering key value.
    ///
    /// # Panics
    /// Panics if `clustering_column` is outside the tuple. Tuples built from
    /// a schema or read through [`Page::load`](crate::page::Page::load) have
    /// the schema's arity.
    pub fn key(&self, clustering_column: usize) -> &Value {
        &self.values[clustering_column]
    }

    /// Number of values.
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// Consumes the tuple and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Appends the encoded tuple to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.values.len() as u32);
        for value in &self.values {
            put_value(buf, value);
        }
    }

    /// Reads one tuple.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let arity = dec.u32()? as usize;
        let mut values = Vec::with_capacity(arity.min(1024));
        for _ in 0..arity {
            values.push(dec.value()?);
        }
        Ok(Self { values })
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: i64, name: &str, gpa: f64) -> Tuple {
        Tuple::new(vec![Value::Int(id), Value::from(name), Value::Double(gpa)])
    }

    #[test]
    fn test_tuple_accessors() {
        let tuple = student(7, "Zaky Noor", 0.88);
        assert_eq!(tuple.arity(), 3);
        assert_eq!(tuple.key(0), &Value::Int(7));
        assert_eq!(tuple.get(1), Some(&Value::from("Zaky Noor")));
        assert_eq!(tuple.get(3), None);
    }

    #[test]
    fn test_tuple_set() {
        let mut tuple = student(7, "a", 0.5);
        let old = tuple.set(2, Value::Double(1.0));
        assert_eq!(old, Some(Value::Double(0.5)));
        assert_eq!(tuple.get(2), Some(&Value::Double(1.0)));
        assert_eq!(tuple.set(9, Value::Int(0)), None);
    }

    #[test]
    fn test_tuple_display() {
        assert_eq!(student(1, "John Noor", 1.5).to_string(), "1,John Noor,1.5");
    }

    #[test]
    fn test_tuple_encode_decode() {
        let tuple = student(2343432, "Ahmed Noor", 0.95);
        let mut buf = BytesMut::new();
        tuple.encode(&mut buf);

        let mut dec = Decoder::new("tuple", &buf);
        let recovered = Tuple::decode(&mut dec).unwrap();
        dec.finish().unwrap();
        assert_eq!(recovered, tuple);
    }

    #[test]
    fn test_tuple_decode_truncated() {
        let mut buf = BytesMut::new();
        student(1, "x", 0.1).encode(&mut buf);
        let mut dec = Decoder::new("tuple", &buf[..buf.len() - 3]);
        assert!(Tuple::decode(&mut dec).is_err());
    }
}
