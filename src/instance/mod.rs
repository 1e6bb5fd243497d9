pub mod avro_table;
pub mod binlog_source;
pub mod converter;
pub mod state;
pub mod table_meta_cache;
