//! Typed Avro values and their binary encode/decode against an
//! [`AvroType`], used by the container writer/reader to turn records into
//! bytes and back.

use crate::avro::primitive::{
    decode_bytes, decode_double, decode_float, decode_long_prim, decode_string, encode_bytes,
    encode_double, encode_float, encode_long_prim, encode_null, encode_string,
};
use crate::avro::schema::AvroType;
use crate::error::ConverterError;
use serde_json::{json, Value as Json};

#[derive(Debug, Clone, PartialEq)]
pub enum AvroValue {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Enum(String),
}

impl AvroValue {
    pub fn encode(&self, ty: &AvroType, out: &mut Vec<u8>) -> Result<(), ConverterError> {
        match (ty, self) {
            (AvroType::NullableUnion(inner), AvroValue::Null) => {
                encode_long_prim(0, out); // union branch 0 = null
                let _ = inner;
                Ok(())
            }
            (AvroType::NullableUnion(inner), value) => {
                encode_long_prim(1, out); // union branch 1 = the wrapped type
                value.encode(inner, out)
            }
            (AvroType::Null, AvroValue::Null) => {
                encode_null(out);
                Ok(())
            }
            (AvroType::Int, AvroValue::Int(v)) => {
                encode_long_prim(*v as i64, out);
                Ok(())
            }
            (AvroType::Long, AvroValue::Long(v)) => {
                encode_long_prim(*v, out);
                Ok(())
            }
            (AvroType::Long, AvroValue::Int(v)) => {
                encode_long_prim(*v as i64, out);
                Ok(())
            }
            (AvroType::Float, AvroValue::Float(v)) => {
                encode_float(*v, out);
                Ok(())
            }
            (AvroType::Double, AvroValue::Double(v)) => {
                encode_double(*v, out);
                Ok(())
            }
            (AvroType::String, AvroValue::String(s)) => {
                encode_string(s, out);
                Ok(())
            }
            (AvroType::Bytes, AvroValue::Bytes(b)) => {
                encode_bytes(b, out);
                Ok(())
            }
            (AvroType::Enum { symbols, .. }, AvroValue::Enum(sym)) => {
                let ordinal = symbols
                    .iter()
                    .position(|s| s == sym)
                    .ok_or_else(|| ConverterError::Schema(format!("unknown enum symbol {sym}")))?;
                encode_long_prim(ordinal as i64, out);
                Ok(())
            }
            (ty, value) => Err(ConverterError::Schema(format!(
                "value {value:?} does not match schema type {ty:?}"
            ))),
        }
    }

    pub fn decode(ty: &AvroType, src: &[u8]) -> Result<(AvroValue, usize), ConverterError> {
        match ty {
            AvroType::NullableUnion(inner) => {
                let (branch, consumed) = decode_long_prim(src)?;
                if branch == 0 {
                    Ok((AvroValue::Null, consumed))
                } else {
                    let (v, inner_consumed) = AvroValue::decode(inner, &src[consumed..])?;
                    Ok((v, consumed + inner_consumed))
                }
            }
            AvroType::Null => Ok((AvroValue::Null, 0)),
            AvroType::Int => {
                let (v, consumed) = decode_long_prim(src)?;
                Ok((AvroValue::Int(v as i32), consumed))
            }
            AvroType::Long => {
                let (v, consumed) = decode_long_prim(src)?;
                Ok((AvroValue::Long(v), consumed))
            }
            AvroType::Float => {
                let (v, consumed) = decode_float(src)?;
                Ok((AvroValue::Float(v), consumed))
            }
            AvroType::Double => {
                let (v, consumed) = decode_double(src)?;
                Ok((AvroValue::Double(v), consumed))
            }
            AvroType::String => {
                let (v, consumed) = decode_string(src)?;
                Ok((AvroValue::String(v), consumed))
            }
            AvroType::Bytes => {
                let (v, consumed) = decode_bytes(src)?;
                Ok((AvroValue::Bytes(v), consumed))
            }
            AvroType::Enum { symbols, .. } => {
                let (ordinal, consumed) = decode_long_prim(src)?;
                let sym = symbols.get(ordinal as usize).ok_or_else(|| {
                    ConverterError::Schema(format!("enum ordinal {ordinal} out of range"))
                })?;
                Ok((AvroValue::Enum(sym.clone()), consumed))
            }
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            AvroValue::Null => Json::Null,
            AvroValue::Int(v) => json!(v),
            AvroValue::Long(v) => json!(v),
            AvroValue::Float(v) => json!(v),
            AvroValue::Double(v) => json!(v),
            AvroValue::String(s) => json!(s),
            AvroValue::Bytes(b) => json!(b),
            AvroValue::Enum(s) => json!(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avro::schema::AvroType;

    #[test]
    fn nullable_long_roundtrip_null() {
        let ty = AvroType::NullableUnion(Box::new(AvroType::Long));
        let mut buf = Vec::new();
        AvroValue::Null.encode(&ty, &mut buf).unwrap();
        let (v, consumed) = AvroValue::decode(&ty, &buf).unwrap();
        assert_eq!(v, AvroValue::Null);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn nullable_long_roundtrip_value() {
        let ty = AvroType::NullableUnion(Box::new(AvroType::Long));
        let mut buf = Vec::new();
        AvroValue::Long(42).encode(&ty, &mut buf).unwrap();
        let (v, consumed) = AvroValue::decode(&ty, &buf).unwrap();
        assert_eq!(v, AvroValue::Long(42));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn enum_roundtrip() {
        let ty = AvroType::Enum {
            name: "event_type".into(),
            symbols: vec!["insert".into(), "update_before".into()],
        };
        let mut buf = Vec::new();
        AvroValue::Enum("update_before".into())
            .encode(&ty, &mut buf)
            .unwrap();
        let (v, _) = AvroValue::decode(&ty, &buf).unwrap();
        assert_eq!(v, AvroValue::Enum("update_before".into()));
    }

    #[test]
    fn string_value_mismatch_errors() {
        let mut buf = Vec::new();
        let err = AvroValue::String("x".into()).encode(&AvroType::Long, &mut buf);
        assert!(err.is_err());
    }
}
