//! Avro object-container file reader (§6.1/§4.3). Parses the magic/header/
//! sync preamble, then exposes a resumable block cursor: either hand back
//! a block's raw payload bytes (native Avro streaming) or decode records
//! one at a time into `serde_json::Value` against the embedded schema.
//!
//! Grounded on `maxavro_file_open`/`maxavro_verify_block`/
//! `maxavro_read_datablock_start` in `avro/maxavro_file.c` and
//! `avro/maxavro_datablock.c`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};

use crate::avro::primitive::{read_avro_string_from, read_varint_from};
use crate::avro::schema::RecordSchema;
use crate::avro::value::AvroValue;
use crate::avro::writer::{MAGIC, SYNC_MARKER_SIZE};
use crate::error::ConverterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvroErrorKind {
    None,
    Io,
    Memory,
    ValueOverflow,
}

impl AvroErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvroErrorKind::None => "MAXAVRO_ERR_NONE",
            AvroErrorKind::Io => "MAXAVRO_ERR_IO",
            AvroErrorKind::Memory => "MAXAVRO_ERR_MEMORY",
            AvroErrorKind::ValueOverflow => "MAXAVRO_ERR_VALUE_OVERFLOW",
        }
    }
}

pub struct AvroReader {
    file: File,
    path: PathBuf,
    pub schema: RecordSchema,
    pub codec: String,
    pub sync: [u8; SYNC_MARKER_SIZE],
    block_payload: Vec<u8>,
    block_cursor: usize,
    records_in_block: u64,
    records_read_from_block: u64,
    blocks_read: u64,
    bytes_read: u64,
    last_error: AvroErrorKind,
}

impl AvroReader {
    pub fn open(path: &Path) -> Result<Self, ConverterError> {
        let mut file = File::open(path).map_err(|e| ConverterError::io(path.to_path_buf(), e))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|e| ConverterError::io(path.to_path_buf(), e))?;
        if magic != MAGIC {
            return Err(ConverterError::Format(format!(
                "{path:?}: avro magic marker bytes are not correct"
            )));
        }

        let (schema_text, codec) = read_header_map(&mut file, path)?;
        let schema = RecordSchema::from_json_str(&schema_text)?;

        let mut sync = [0u8; SYNC_MARKER_SIZE];
        file.read_exact(&mut sync)
            .map_err(|e| ConverterError::io(path.to_path_buf(), e))?;

        let mut reader = AvroReader {
            file,
            path: path.to_path_buf(),
            schema,
            codec,
            sync,
            block_payload: Vec::new(),
            block_cursor: 0,
            records_in_block: 0,
            records_read_from_block: 0,
            blocks_read: 0,
            bytes_read: 0,
            last_error: AvroErrorKind::None,
        };
        reader.read_datablock_start()?;
        Ok(reader)
    }

    pub fn last_error(&self) -> AvroErrorKind {
        self.last_error
    }

    /// Reads the `(records, bytes)` prefix of the next block and loads its
    /// payload, validating the trailing sync marker. Returns `Ok(false)`
    /// at a clean end of file (no more blocks).
    fn read_datablock_start(&mut self) -> Result<bool, ConverterError> {
        let mut first_byte = [0u8; 1];
        let n = self
            .file
            .read(&mut first_byte)
            .map_err(|e| ConverterError::io(self.path.clone(), e))?;
        if n == 0 {
            return Ok(false);
        }
        let records = read_remaining_varint(&mut self.file, first_byte[0])?;
        let bytes = read_varint_from(&mut self.file).map_err(|e| {
            self.last_error = AvroErrorKind::ValueOverflow;
            e
        })?;

        let byte_count = bytes as usize;
        let mut payload = vec![0u8; byte_count];
        self.file
            .read_exact(&mut payload)
            .map_err(|e| ConverterError::io(self.path.clone(), e))?;

        let mut sync = [0u8; SYNC_MARKER_SIZE];
        self.file
            .read_exact(&mut sync)
            .map_err(|e| ConverterError::io(self.path.clone(), e))?;
        if sync != self.sync {
            self.last_error = AvroErrorKind::Io;
            return Err(ConverterError::Format(format!(
                "{:?}: sync marker mismatch",
                self.path
            )));
        }

        self.block_payload = payload;
        self.block_cursor = 0;
        self.records_in_block = records as u64;
        self.records_read_from_block = 0;
        self.blocks_read += 1;
        self.bytes_read += byte_count as u64;
        Ok(true)
    }

    /// Returns the current block's unparsed payload bytes, for native Avro
    /// streaming straight to a client.
    pub fn current_block_raw(&self) -> &[u8] {
        &self.block_payload
    }

    /// Parses and returns the next record as a JSON object, advancing past
    /// block boundaries transparently. Returns `Ok(None)` at end of file.
    pub fn next_record_json(&mut self) -> Result<Option<Json>, ConverterError> {
        loop {
            if self.records_read_from_block < self.records_in_block {
                let mut map = Map::new();
                for field in &self.schema.fields {
                    let (value, consumed) =
                        AvroValue::decode(&field.field_type, &self.block_payload[self.block_cursor..])?;
                    self.block_cursor += consumed;
                    map.insert(field.name.clone(), value.to_json());
                }
                self.records_read_from_block += 1;
                return Ok(Some(Json::Object(map)));
            }
            if !self.read_datablock_start()? {
                return Ok(None);
            }
        }
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

/// Finishes decoding a ZigZag varint whose first byte has already been
/// consumed from `file` (used at block boundaries, where a single byte
/// must be peeked to distinguish "new block" from "clean EOF").
fn read_remaining_varint(file: &mut File, first_byte: u8) -> Result<i64, ConverterError> {
    let mut buf = vec![first_byte];
    while buf.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte)
            .map_err(|e| ConverterError::io(None, e))?;
        buf.push(byte[0]);
    }
    let (v, _) = crate::varint::decode_long(&buf)?;
    Ok(v)
}

fn read_header_map(file: &mut File, path: &Path) -> Result<(String, String), ConverterError> {
    let mut schema = None;
    let mut codec = NULL_CODEC_DEFAULT.to_string();
    loop {
        let count = read_varint_from(file)?;
        if count == 0 {
            break;
        }
        for _ in 0..count.unsigned_abs() {
            let key = read_avro_string_from(file)?;
            let value = read_avro_string_from(file)?;
            match key.as_str() {
                "avro.schema" => schema = Some(value),
                "avro.codec" => codec = value,
                _ => {}
            }
        }
    }

    let schema = schema.ok_or_else(|| {
        ConverterError::Format(format!("{path:?}: no schema found from Avro header"))
    })?;
    Ok((schema, codec))
}

const NULL_CODEC_DEFAULT: &str = "null";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avro::schema::{AvroType, FieldSchema};
    use crate::avro::value::AvroValue;
    use crate::avro::writer::AvroWriter;
    use tempdir::TempDir;

    fn sample_schema() -> RecordSchema {
        RecordSchema {
            name: "t".into(),
            fields: vec![
                FieldSchema {
                    name: "a".into(),
                    field_type: AvroType::Long,
                },
                FieldSchema {
                    name: "b".into(),
                    field_type: AvroType::NullableUnion(Box::new(AvroType::String)),
                },
            ],
        }
    }

    #[test]
    fn reads_back_written_block() {
        let dir = TempDir::new("avro-reader").unwrap();
        let path = dir.path().join("t.000001.avro");
        let schema = sample_schema();
        let mut writer = AvroWriter::open(&path, &schema).unwrap();

        let mut payload = Vec::new();
        AvroValue::Long(42)
            .encode(&schema.fields[0].field_type, &mut payload)
            .unwrap();
        AvroValue::String("hello".into())
            .encode(&schema.fields[1].field_type, &mut payload)
            .unwrap();
        writer.append_block_buffer(1, &payload).unwrap();
        writer.close().unwrap();

        let mut reader = AvroReader::open(&path).unwrap();
        let record = reader.next_record_json().unwrap().unwrap();
        assert_eq!(record["a"], 42);
        assert_eq!(record["b"], "hello");
        assert!(reader.next_record_json().unwrap().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = TempDir::new("avro-reader").unwrap();
        let path = dir.path().join("bad.avro");
        std::fs::write(&path, b"not-an-avro-file").unwrap();
        assert!(AvroReader::open(&path).is_err());
    }
}
