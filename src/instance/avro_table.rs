//! `AvroTable` (§3): the open writer for one `(database, table, version)`,
//! owning its file handle and in-memory block buffer. Records accumulate
//! into the buffer via [`AvroTable::push_record`] and are finalized into a
//! single Avro block at each checkpoint.

use std::path::{Path, PathBuf};

use crate::avro::schema::RecordSchema;
use crate::avro::value::AvroValue;
use crate::avro::writer::AvroWriter;
use crate::error::ConverterError;

pub struct AvroTable {
    writer: AvroWriter,
    pub path: PathBuf,
    pub schema: RecordSchema,
    block_buf: Vec<u8>,
    rows_in_block: u64,
}

impl AvroTable {
    pub fn open(
        output_dir: &Path,
        database: &str,
        table: &str,
        version: u32,
        schema: RecordSchema,
    ) -> Result<Self, ConverterError> {
        let path = output_dir.join(format!("{database}.{table}.{version:06}.avro"));
        let writer = AvroWriter::open(&path, &schema)?;
        write_schema_sidecar(output_dir, database, table, &schema)?;
        Ok(AvroTable {
            writer,
            path,
            schema,
            block_buf: Vec::new(),
            rows_in_block: 0,
        })
    }

    /// Encodes `values` (one per schema field, in order) and appends them
    /// to the pending block buffer.
    pub fn push_record(&mut self, values: &[AvroValue]) -> Result<(), ConverterError> {
        if values.len() != self.schema.fields.len() {
            return Err(ConverterError::Schema(format!(
                "record has {} values, schema has {} fields",
                values.len(),
                self.schema.fields.len()
            )));
        }
        for (value, field) in values.iter().zip(&self.schema.fields) {
            value.encode(&field.field_type, &mut self.block_buf)?;
        }
        self.rows_in_block += 1;
        Ok(())
    }

    pub fn rows_pending(&self) -> u64 {
        self.rows_in_block
    }

    /// Finalizes the pending block (a no-op if empty) and flushes to disk.
    pub fn checkpoint(&mut self) -> Result<(), ConverterError> {
        if self.rows_in_block > 0 {
            self.writer
                .append_block_buffer(self.rows_in_block, &self.block_buf)?;
            self.block_buf.clear();
            self.rows_in_block = 0;
        }
        self.writer.flush()
    }
}

fn write_schema_sidecar(
    output_dir: &Path,
    database: &str,
    table: &str,
    schema: &RecordSchema,
) -> Result<(), ConverterError> {
    let path = output_dir.join(format!("{database}.{table}.avsc"));
    std::fs::write(&path, schema.to_json_string()).map_err(|e| ConverterError::io(path, e))
}
