//! Lossy JSON rendering of tags for the inspection CLI.
//!
//! Integers/floats become JSON numbers (NaN/inf → null), byte arrays are
//! base64 strings, compounds keep insertion order via serde_json's Map when
//! the `preserve_order` feature is on and sorted keys otherwise.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{Map, Number, Value};

use super::Tag;

pub fn to_json(tag: &Tag) -> Value {
    match tag {
        Tag::Null => Value::Null,
        Tag::Bool(b) => Value::Bool(*b),
        Tag::Byte(v) => Value::from(*v),
        Tag::Short(v) => Value::from(*v),
        Tag::Int(v) => Value::from(*v),
        Tag::Long(v) => Value::from(*v),
        Tag::Float(v) => float(*v as f64),
        Tag::Double(v) => float(*v),
        Tag::Text(s) => Value::String(s.clone()),
        Tag::ByteArray(v) => {
            let raw: Vec<u8> = v.iter().map(|&b| b as u8).collect();
            Value::String(B64.encode(raw))
        }
        Tag::IntArray(v) => Value::Array(v.iter().map(|&x| Value::from(x)).collect()),
        Tag::LongArray(v) => Value::Array(v.iter().map(|&x| Value::from(x)).collect()),
        Tag::List(items) => Value::Array(items.iter().map(to_json).collect()),
        Tag::Compound(c) => {
            let mut m = Map::new();
            for (k, v) in c.iter() {
                m.insert(k.to_string(), to_json(v));
            }
            Value::Object(m)
        }
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Compound;

    #[test]
    fn byte_arrays_render_as_base64() {
        let t = Tag::Compound(
            Compound::new()
                .with("raw", Tag::ByteArray(vec![1, 2, 3]))
                .with("nan", Tag::Double(f64::NAN)),
        );
        let v = to_json(&t);
        assert_eq!(v["raw"], Value::String("AQID".into()));
        assert_eq!(v["nan"], Value::Null);
    }
}
