//! Avro 1.x primitive binary encoding, built on the varint codec in
//! [`crate::varint`]. Every `encode_*` appends to a caller-owned buffer;
//! every `decode_*` takes a byte slice and returns `(value, consumed)`.

use std::io::Read;

use crate::error::ConverterError;
use crate::varint::{decode_long, encode_long};

/// Reads a single ZigZag varint directly off a reader, one byte at a time —
/// used when parsing a header/block prefix where the surrounding bytes
/// haven't been buffered up front.
pub fn read_varint_from<R: Read>(r: &mut R) -> Result<i64, ConverterError> {
    let mut buf = Vec::with_capacity(4);
    loop {
        let mut byte = [0u8; 1];
        let n = r
            .read(&mut byte)
            .map_err(|e| ConverterError::io(None, e))?;
        if n == 0 {
            return Err(ConverterError::Truncated(
                "eof while reading varint".into(),
            ));
        }
        let continues = byte[0] & 0x80 != 0;
        buf.push(byte[0]);
        if !continues {
            break;
        }
    }
    let (v, _) = decode_long(&buf)?;
    Ok(v)
}

/// Reads a length-prefixed Avro `string`/`bytes` value directly off a
/// reader (the length itself is a varint read via [`read_varint_from`]).
pub fn read_avro_string_from<R: Read>(r: &mut R) -> Result<String, ConverterError> {
    let len = read_varint_from(r)?;
    if len < 0 {
        return Err(ConverterError::Format("negative string length".into()));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)
        .map_err(|e| ConverterError::io(None, e))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn encode_long_prim(v: i64, out: &mut Vec<u8>) {
    encode_long(v, out);
}

pub fn decode_long_prim(src: &[u8]) -> Result<(i64, usize), ConverterError> {
    decode_long(src)
}

pub fn encode_string(s: &str, out: &mut Vec<u8>) {
    encode_long(s.len() as i64, out);
    out.extend_from_slice(s.as_bytes());
}

pub fn decode_string(src: &[u8]) -> Result<(String, usize), ConverterError> {
    let (len, consumed) = decode_long(src)?;
    let len = len as usize;
    let end = consumed + len;
    if end > src.len() {
        return Err(ConverterError::Truncated(format!(
            "string of length {len} exceeds remaining {} bytes",
            src.len() - consumed
        )));
    }
    let s = String::from_utf8_lossy(&src[consumed..end]).into_owned();
    Ok((s, end))
}

pub fn encode_bytes(b: &[u8], out: &mut Vec<u8>) {
    encode_long(b.len() as i64, out);
    out.extend_from_slice(b);
}

pub fn decode_bytes(src: &[u8]) -> Result<(Vec<u8>, usize), ConverterError> {
    let (len, consumed) = decode_long(src)?;
    let len = len as usize;
    let end = consumed + len;
    if end > src.len() {
        return Err(ConverterError::Truncated(format!(
            "bytes value of length {len} exceeds remaining {} bytes",
            src.len() - consumed
        )));
    }
    Ok((src[consumed..end].to_vec(), end))
}

pub fn encode_float(v: f32, out: &mut Vec<u8>) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn decode_float(src: &[u8]) -> Result<(f32, usize), ConverterError> {
    if src.len() < 4 {
        return Err(ConverterError::Truncated("float needs 4 bytes".into()));
    }
    let bytes: [u8; 4] = src[..4].try_into().unwrap();
    Ok((f32::from_le_bytes(bytes), 4))
}

pub fn encode_double(v: f64, out: &mut Vec<u8>) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn decode_double(src: &[u8]) -> Result<(f64, usize), ConverterError> {
    if src.len() < 8 {
        return Err(ConverterError::Truncated("double needs 8 bytes".into()));
    }
    let bytes: [u8; 8] = src[..8].try_into().unwrap();
    Ok((f64::from_le_bytes(bytes), 8))
}

/// Avro `enum` values are encoded as the zero-based ordinal, itself a `long`.
pub fn encode_enum(ordinal: i64, out: &mut Vec<u8>) {
    encode_long(ordinal, out);
}

pub fn decode_enum(src: &[u8]) -> Result<(i64, usize), ConverterError> {
    decode_long(src)
}

/// Avro `null` occupies zero bytes on the wire.
pub fn encode_null(_out: &mut Vec<u8>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        encode_string("hello", &mut buf);
        let (s, consumed) = decode_string(&buf).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn empty_string_roundtrip() {
        let mut buf = Vec::new();
        encode_string("", &mut buf);
        assert_eq!(buf, vec![0u8]);
        let (s, _) = decode_string(&buf).unwrap();
        assert_eq!(s, "");
    }

    #[test]
    fn bytes_roundtrip_arbitrary() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut buf = Vec::new();
        encode_bytes(&data, &mut buf);
        let (decoded, consumed) = decode_bytes(&buf).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn float_double_roundtrip() {
        let mut buf = Vec::new();
        encode_float(3.14_f32, &mut buf);
        let (f, consumed) = decode_float(&buf).unwrap();
        assert_eq!(f, 3.14_f32);
        assert_eq!(consumed, 4);

        let mut buf = Vec::new();
        encode_double(2.71828_f64, &mut buf);
        let (d, consumed) = decode_double(&buf).unwrap();
        assert_eq!(d, 2.71828_f64);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn truncated_string_errors() {
        let mut buf = Vec::new();
        encode_long(10, &mut buf);
        buf.extend_from_slice(b"abc");
        assert!(decode_string(&buf).is_err());
    }
}
