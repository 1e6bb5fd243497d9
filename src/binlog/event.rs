//! Binlog event type constants and the fixed 19-byte event header (§4.4,
//! §6.2). Grounded on the event type enumeration in `command/event.rs` of
//! the teacher repo and on MariaDB's `FORMAT_DESCRIPTION_EVENT` checksum
//! convention as described in the original avrorouter's `mysql_binlog.h`.

use crate::error::ConverterError;

pub const EVENT_HEADER_LEN: usize = 19;

pub const UNKNOWN_EVENT: u8 = 0;
pub const START_EVENT_V3: u8 = 1;
pub const QUERY_EVENT: u8 = 2;
pub const STOP_EVENT: u8 = 3;
pub const ROTATE_EVENT: u8 = 4;
pub const INTVAR_EVENT: u8 = 5;
pub const XID_EVENT: u8 = 16;
pub const FORMAT_DESCRIPTION_EVENT: u8 = 15;
pub const TABLE_MAP_EVENT: u8 = 19;
pub const WRITE_ROWS_EVENT_V0: u8 = 20;
pub const UPDATE_ROWS_EVENT_V0: u8 = 21;
pub const DELETE_ROWS_EVENT_V0: u8 = 22;
pub const WRITE_ROWS_EVENT_V1: u8 = 23;
pub const UPDATE_ROWS_EVENT_V1: u8 = 24;
pub const DELETE_ROWS_EVENT_V1: u8 = 25;
pub const WRITE_ROWS_EVENT_V2: u8 = 30;
pub const UPDATE_ROWS_EVENT_V2: u8 = 31;
pub const DELETE_ROWS_EVENT_V2: u8 = 32;
pub const MARIADB_ANNOTATE_ROWS_EVENT: u8 = 160;
pub const MARIADB_GTID_EVENT: u8 = 162;
pub const MARIADB_GTID_LIST_EVENT: u8 = 163;

pub fn event_type_name(code: u8) -> &'static str {
    match code {
        UNKNOWN_EVENT => "UNKNOWN_EVENT",
        START_EVENT_V3 => "START_EVENT_V3",
        QUERY_EVENT => "QUERY_EVENT",
        STOP_EVENT => "STOP_EVENT",
        ROTATE_EVENT => "ROTATE_EVENT",
        INTVAR_EVENT => "INTVAR_EVENT",
        XID_EVENT => "XID_EVENT",
        FORMAT_DESCRIPTION_EVENT => "FORMAT_DESCRIPTION_EVENT",
        TABLE_MAP_EVENT => "TABLE_MAP_EVENT",
        WRITE_ROWS_EVENT_V0 => "WRITE_ROWS_EVENT_V0",
        UPDATE_ROWS_EVENT_V0 => "UPDATE_ROWS_EVENT_V0",
        DELETE_ROWS_EVENT_V0 => "DELETE_ROWS_EVENT_V0",
        WRITE_ROWS_EVENT_V1 => "WRITE_ROWS_EVENT_V1",
        UPDATE_ROWS_EVENT_V1 => "UPDATE_ROWS_EVENT_V1",
        DELETE_ROWS_EVENT_V1 => "DELETE_ROWS_EVENT_V1",
        WRITE_ROWS_EVENT_V2 => "WRITE_ROWS_EVENT_V2",
        UPDATE_ROWS_EVENT_V2 => "UPDATE_ROWS_EVENT_V2",
        DELETE_ROWS_EVENT_V2 => "DELETE_ROWS_EVENT_V2",
        MARIADB_ANNOTATE_ROWS_EVENT => "MARIADB_ANNOTATE_ROWS_EVENT",
        MARIADB_GTID_EVENT => "MARIADB_GTID_EVENT",
        MARIADB_GTID_LIST_EVENT => "MARIADB_GTID_LIST_EVENT",
        _ => "OTHER",
    }
}

pub fn is_write_rows(code: u8) -> bool {
    matches!(code, WRITE_ROWS_EVENT_V0 | WRITE_ROWS_EVENT_V1 | WRITE_ROWS_EVENT_V2)
}

pub fn is_update_rows(code: u8) -> bool {
    matches!(code, UPDATE_ROWS_EVENT_V0 | UPDATE_ROWS_EVENT_V1 | UPDATE_ROWS_EVENT_V2)
}

pub fn is_delete_rows(code: u8) -> bool {
    matches!(code, DELETE_ROWS_EVENT_V0 | DELETE_ROWS_EVENT_V1 | DELETE_ROWS_EVENT_V2)
}

/// `0` for v0/v1 row events (no extra-data / columns-present-before-image
/// wrinkle), `1`/`2` selecting the richer v2 layout.
pub fn rows_event_version(code: u8) -> u8 {
    match code {
        WRITE_ROWS_EVENT_V0 | UPDATE_ROWS_EVENT_V0 | DELETE_ROWS_EVENT_V0 => 0,
        WRITE_ROWS_EVENT_V1 | UPDATE_ROWS_EVENT_V1 | DELETE_ROWS_EVENT_V1 => 1,
        WRITE_ROWS_EVENT_V2 | UPDATE_ROWS_EVENT_V2 | DELETE_ROWS_EVENT_V2 => 2,
        _ => 0,
    }
}

/// The fixed 19-byte prefix present on every binlog event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    pub event_length: u32,
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(src: &[u8]) -> Result<Self, ConverterError> {
        if src.len() < EVENT_HEADER_LEN {
            return Err(ConverterError::Truncated(format!(
                "event header needs {EVENT_HEADER_LEN} bytes, got {}",
                src.len()
            )));
        }
        Ok(EventHeader {
            timestamp: u32::from_le_bytes(src[0..4].try_into().unwrap()),
            event_type: src[4],
            server_id: u32::from_le_bytes(src[5..9].try_into().unwrap()),
            event_length: u32::from_le_bytes(src[9..13].try_into().unwrap()),
            next_position: u32::from_le_bytes(src[13..17].try_into().unwrap()),
            flags: u16::from_le_bytes(src[17..19].try_into().unwrap()),
        })
    }

    /// Length of the event body that follows the header, excluding any
    /// trailing checksum (the caller strips that separately once the
    /// format description event's checksum algorithm is known).
    pub fn body_len(&self) -> usize {
        self.event_length as usize - EVENT_HEADER_LEN
    }
}

/// Checksum algorithm declared by `FORMAT_DESCRIPTION_EVENT`'s trailing
/// byte. `Crc32` means every subsequent event (including this one) carries
/// a 4-byte CRC32 after its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlg {
    None,
    Crc32,
}

impl ChecksumAlg {
    pub fn trailer_len(&self) -> usize {
        match self {
            ChecksumAlg::None => 0,
            ChecksumAlg::Crc32 => 4,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => ChecksumAlg::Crc32,
            _ => ChecksumAlg::None,
        }
    }
}

/// Parsed `FORMAT_DESCRIPTION_EVENT` body: binlog version, server version
/// string, header length table and the checksum algorithm used for every
/// later event in the file.
#[derive(Debug, Clone)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub common_header_len: u8,
    pub post_header_lens: Vec<u8>,
    pub checksum_alg: ChecksumAlg,
}

impl FormatDescriptionEvent {
    pub fn parse(body: &[u8]) -> Result<Self, ConverterError> {
        if body.len() < 2 + 50 + 4 + 1 {
            return Err(ConverterError::Truncated(
                "format description event body too short".into(),
            ));
        }
        let binlog_version = u16::from_le_bytes(body[0..2].try_into().unwrap());
        let server_version = String::from_utf8_lossy(&body[2..52])
            .trim_end_matches('\0')
            .to_string();
        let create_timestamp = u32::from_le_bytes(body[52..56].try_into().unwrap());
        let common_header_len = body[56];

        // The post-header length table runs to the end of the body, except
        // for a trailing checksum-algorithm byte present in MySQL 5.6.1+/
        // MariaDB 10.0+ streams. We detect it the way the original
        // avrorouter does: events written with a checksum always have a
        // non-zero alg byte there, and the table length is otherwise
        // exactly (event count for this server version).
        let post_header_end = body.len() - 1;
        let post_header_lens = body[57..post_header_end].to_vec();
        let checksum_alg = ChecksumAlg::from_byte(body[post_header_end]);

        Ok(FormatDescriptionEvent {
            binlog_version,
            server_version,
            create_timestamp,
            common_header_len,
            post_header_lens,
            checksum_alg,
        })
    }
}
