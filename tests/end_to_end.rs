//! End-to-end seed scenarios: update, schema evolution via ALTER, and
//! binlog rotation. Each test builds a synthetic binlog file byte-by-byte
//! and drives the converter through its public API.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use binlog_avro_conv::avro::reader::AvroReader;
use binlog_avro_conv::binlog::event::{
    EVENT_HEADER_LEN, FORMAT_DESCRIPTION_EVENT, QUERY_EVENT, TABLE_MAP_EVENT,
    UPDATE_ROWS_EVENT_V2, WRITE_ROWS_EVENT_V2, XID_EVENT,
};
use binlog_avro_conv::config::ConverterConfig;
use binlog_avro_conv::instance::binlog_source::BINLOG_MAGIC;
use binlog_avro_conv::instance::converter::{BinlogEnd, Converter};
use tempdir::TempDir;

fn push_header(buf: &mut Vec<u8>, event_type: u8, body_len: usize, pos_after: u32) {
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(event_type);
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&((EVENT_HEADER_LEN + body_len) as u32).to_le_bytes());
    buf.extend_from_slice(&pos_after.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
}

fn fde_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&4u16.to_le_bytes());
    body.extend_from_slice(&[0u8; 50]);
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(19);
    body.extend_from_slice(&[0u8; 40]);
    body.push(0);
    body
}

fn query_body(sql: &str, db: &str) -> Vec<u8> {
    let mut body = vec![0u8; 13];
    body[8] = db.len() as u8;
    body[11..13].copy_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(db.as_bytes());
    body.push(0);
    body.extend_from_slice(sql.as_bytes());
    body
}

fn table_map_body(ncols: u8, type_codes: &[u8], meta_bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[1, 0, 0, 0, 0, 0]); // table_id=1
    body.extend_from_slice(&[0, 0]);
    body.push(4);
    body.extend_from_slice(b"shop");
    body.push(0);
    body.push(1);
    body.extend_from_slice(b"t");
    body.push(0);
    body.push(ncols);
    body.extend_from_slice(type_codes);
    body.push(meta_bytes.len() as u8);
    body.extend_from_slice(meta_bytes);
    let null_bitmap_bytes = (ncols as usize + 7) / 8;
    body.extend(vec![0u8; null_bitmap_bytes.max(1)]);
    body
}

fn row_image_int_varchar(a: i32, b: &str) -> Vec<u8> {
    let mut img = Vec::new();
    img.push(0b00);
    img.extend_from_slice(&a.to_le_bytes());
    img.push(b.len() as u8);
    img.extend_from_slice(b.as_bytes());
    img
}

fn write_rows_v2_body(ncols: u8, columns_present: u8, values_payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[1, 0, 0, 0, 0, 0]);
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(&2u16.to_le_bytes());
    body.push(ncols);
    body.push(columns_present);
    body.extend_from_slice(values_payload);
    body
}

fn update_rows_v2_body(ncols: u8, columns_present: u8, before: &[u8], after: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[1, 0, 0, 0, 0, 0]);
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(&2u16.to_le_bytes());
    body.push(ncols);
    body.push(columns_present);
    body.push(columns_present);
    body.extend_from_slice(before);
    body.extend_from_slice(after);
    body
}

fn build_binlog(events: Vec<(u8, Vec<u8>)>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&BINLOG_MAGIC);
    let mut pos = 4u32;
    for (event_type, body) in events {
        let next = pos + (EVENT_HEADER_LEN + body.len()) as u32;
        push_header(&mut out, event_type, body.len(), next);
        out.extend_from_slice(&body);
        pos = next;
    }
    out
}

fn write_binlog_file(dir: &Path, name: &str, bytes: &[u8]) {
    let mut f = File::create(dir.join(name)).unwrap();
    f.write_all(bytes).unwrap();
}

fn config(binlog_dir: &Path, output_dir: &Path, state_path: &Path) -> ConverterConfig {
    ConverterConfig {
        binlog_dir: binlog_dir.to_path_buf(),
        binlog_prefix: "bin-log".into(),
        output_dir: output_dir.to_path_buf(),
        state_path: state_path.to_path_buf(),
        row_checkpoint_threshold: 1000,
        trx_checkpoint_threshold: 10,
        log_level: "info".into(),
    }
}

#[test]
fn update_emits_before_and_after_records() {
    let dir = TempDir::new("converter-update").unwrap();
    let binlog_dir = dir.path().join("binlogs");
    let output_dir = dir.path().join("out");
    std::fs::create_dir_all(&binlog_dir).unwrap();

    let before = row_image_int_varchar(42, "hello");
    let after = row_image_int_varchar(43, "world");
    let events = vec![
        (FORMAT_DESCRIPTION_EVENT, fde_body()),
        (
            QUERY_EVENT,
            query_body("CREATE TABLE t (a INT, b VARCHAR(8))", "shop"),
        ),
        (TABLE_MAP_EVENT, table_map_body(2, &[3, 15], &[255u8, 0])),
        (
            UPDATE_ROWS_EVENT_V2,
            update_rows_v2_body(2, 0b11, &before, &after),
        ),
        (XID_EVENT, Vec::new()),
    ];
    write_binlog_file(&binlog_dir, "bin-log.000001", &build_binlog(events));

    let cfg = config(&binlog_dir, &output_dir, &dir.path().join("state.ini"));
    let mut converter = Converter::open(&cfg, "bin-log.000001").unwrap();
    assert_eq!(converter.run().unwrap(), BinlogEnd::LastFile);
    converter.checkpoint().unwrap();

    let mut reader = AvroReader::open(output_dir.join("shop.t.000001.avro")).unwrap();
    let before_record = reader.next_record_json().unwrap().unwrap();
    assert_eq!(before_record["event_type"], "update_before");
    assert_eq!(before_record["a"], 42);
    let after_record = reader.next_record_json().unwrap().unwrap();
    assert_eq!(after_record["event_type"], "update_after");
    assert_eq!(after_record["a"], 43);
    assert_eq!(after_record["b"], "world");
}

#[test]
fn alter_add_column_opens_a_new_versioned_file() {
    let dir = TempDir::new("converter-alter").unwrap();
    let binlog_dir = dir.path().join("binlogs");
    let output_dir = dir.path().join("out");
    std::fs::create_dir_all(&binlog_dir).unwrap();

    let row_v1 = row_image_int_varchar(1, "a");
    let mut row_v2 = Vec::new();
    row_v2.push(0b000); // null bitmap for 3 columns
    row_v2.extend_from_slice(&2i32.to_le_bytes());
    row_v2.push(1);
    row_v2.push(b'b');
    row_v2.extend_from_slice(&7i32.to_le_bytes());

    let events = vec![
        (FORMAT_DESCRIPTION_EVENT, fde_body()),
        (
            QUERY_EVENT,
            query_body("CREATE TABLE t (a INT, b VARCHAR(8))", "shop"),
        ),
        (TABLE_MAP_EVENT, table_map_body(2, &[3, 15], &[255u8, 0])),
        (
            WRITE_ROWS_EVENT_V2,
            write_rows_v2_body(2, 0b11, &row_v1),
        ),
        (XID_EVENT, Vec::new()),
        (
            QUERY_EVENT,
            query_body("ALTER TABLE t ADD COLUMN c INT", "shop"),
        ),
        (
            TABLE_MAP_EVENT,
            table_map_body(3, &[3, 15, 3], &[255u8, 0]),
        ),
        (
            WRITE_ROWS_EVENT_V2,
            write_rows_v2_body(3, 0b111, &row_v2),
        ),
        (XID_EVENT, Vec::new()),
    ];
    write_binlog_file(&binlog_dir, "bin-log.000001", &build_binlog(events));

    let cfg = config(&binlog_dir, &output_dir, &dir.path().join("state.ini"));
    let mut converter = Converter::open(&cfg, "bin-log.000001").unwrap();
    assert_eq!(converter.run().unwrap(), BinlogEnd::LastFile);
    converter.checkpoint().unwrap();

    assert!(output_dir.join("shop.t.000001.avro").exists());
    assert!(output_dir.join("shop.t.000002.avro").exists());

    let mut reader = AvroReader::open(output_dir.join("shop.t.000002.avro")).unwrap();
    let record = reader.next_record_json().unwrap().unwrap();
    assert_eq!(record["a"], 2);
    assert_eq!(record["b"], "b");
    assert_eq!(record["c"], 7);

    let sidecar = std::fs::read_to_string(output_dir.join("shop.t.avsc")).unwrap();
    assert!(sidecar.contains("\"c\""));
}

#[test]
fn rotate_to_existing_next_file_continues_at_offset_four() {
    let dir = TempDir::new("converter-rotate").unwrap();
    let binlog_dir = dir.path().join("binlogs");
    let output_dir = dir.path().join("out");
    std::fs::create_dir_all(&binlog_dir).unwrap();

    let rotate_body = {
        let mut b = 4u64.to_le_bytes().to_vec();
        b.extend_from_slice(b"bin-log.000002");
        b
    };
    let first_file_events = vec![
        (FORMAT_DESCRIPTION_EVENT, fde_body()),
        (binlog_avro_conv::binlog::event::ROTATE_EVENT, rotate_body),
    ];
    write_binlog_file(
        &binlog_dir,
        "bin-log.000001",
        &build_binlog(first_file_events),
    );

    let second_file_events = vec![(FORMAT_DESCRIPTION_EVENT, fde_body())];
    write_binlog_file(
        &binlog_dir,
        "bin-log.000002",
        &build_binlog(second_file_events),
    );

    let cfg = config(&binlog_dir, &output_dir, &dir.path().join("state.ini"));
    let mut converter = Converter::open(&cfg, "bin-log.000001").unwrap();
    assert_eq!(converter.run().unwrap(), BinlogEnd::Ok);
    assert_eq!(converter.run().unwrap(), BinlogEnd::LastFile);
}
