//! Persistence of converter state (§4.7, §6.3): a small ini-style key=value
//! file plus a sibling `table-ddl.list` of durable CREATE TABLE statements.
//! Grounded on the atomic-rewrite discipline the teacher's writer paths
//! apply to on-disk state (tmp file + rename), generalized here to the
//! converter's resume point instead of an Avro data file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::binlog::gtid::Gtid;
use crate::error::ConverterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterState {
    pub file: String,
    pub position: u64,
    pub gtid: Gtid,
}

const SECTION_HEADER: &str = "[avro-conversion]";

impl ConverterState {
    /// A fresh-start state: no binlog file known yet, position at the
    /// 4-byte magic, and a zeroed GTID.
    pub fn fresh(initial_file: impl Into<String>) -> Self {
        ConverterState {
            file: initial_file.into(),
            position: 4,
            gtid: Gtid::default(),
        }
    }

    /// Loads state from `path`. A missing file means "fresh start" and is
    /// not an error — the caller is expected to supply a sensible default
    /// via [`ConverterState::fresh`] in that case. An existing file with
    /// any unrecognized key terminates parsing with an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ConverterError> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConverterError::io(path.to_path_buf(), e)),
        };

        let mut file = None;
        let mut position = None;
        let mut gtid = None;
        let mut lines = text.lines();

        match lines.next() {
            Some(line) if line.trim() == SECTION_HEADER => {}
            Some(other) => {
                return Err(ConverterError::Format(format!(
                    "{path:?}: expected section header {SECTION_HEADER}, got {other:?}"
                )))
            }
            None => return Err(ConverterError::Format(format!("{path:?}: empty state file"))),
        }

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConverterError::Format(format!("{path:?}: malformed state line {line:?}"))
            })?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "position" => {
                    position = Some(value.parse::<u64>().map_err(|_| {
                        ConverterError::Format(format!("{path:?}: bad position value {value:?}"))
                    })?)
                }
                "gtid" => {
                    gtid = Some(value.parse::<Gtid>().map_err(|_| {
                        ConverterError::Format(format!("{path:?}: bad gtid value {value:?}"))
                    })?)
                }
                "file" => file = Some(value.to_string()),
                other => {
                    return Err(ConverterError::Format(format!(
                        "{path:?}: unknown state key {other:?}"
                    )))
                }
            }
        }

        let file = file.ok_or_else(|| ConverterError::Format(format!("{path:?}: missing file key")))?;
        let position =
            position.ok_or_else(|| ConverterError::Format(format!("{path:?}: missing position key")))?;
        let gtid = gtid.ok_or_else(|| ConverterError::Format(format!("{path:?}: missing gtid key")))?;

        Ok(Some(ConverterState { file, position, gtid }))
    }

    /// Atomically rewrites `path`: the new contents are written to a
    /// sibling `.tmp` file, flushed, then renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConverterError> {
        let tmp_path = tmp_path_for(path);
        let contents = format!(
            "{SECTION_HEADER}\nposition = {}\ngtid = {}\nfile = {}\n",
            self.position, self.gtid, self.file
        );

        let mut tmp = fs::File::create(&tmp_path).map_err(|e| ConverterError::io(tmp_path.clone(), e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| ConverterError::io(tmp_path.clone(), e))?;
        tmp.flush().map_err(|e| ConverterError::io(tmp_path.clone(), e))?;
        tmp.sync_data().map_err(|e| ConverterError::io(tmp_path.clone(), e))?;

        fs::rename(&tmp_path, path).map_err(|e| ConverterError::io(path.to_path_buf(), e))
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Appends one DDL line to the sibling `table-ddl.list`, creating it if
/// absent. Called once a `CREATE TABLE`/`ALTER TABLE` has been made
/// durable by a checkpoint.
pub fn append_ddl_history(state_path: &Path, sql: &str) -> Result<(), ConverterError> {
    let ddl_path = ddl_list_path(state_path);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&ddl_path)
        .map_err(|e| ConverterError::io(ddl_path.clone(), e))?;
    writeln!(file, "{sql}").map_err(|e| ConverterError::io(ddl_path.clone(), e))
}

pub fn read_ddl_history(state_path: &Path) -> Result<Vec<String>, ConverterError> {
    let ddl_path = ddl_list_path(state_path);
    match fs::read_to_string(&ddl_path) {
        Ok(text) => Ok(text.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(ConverterError::io(ddl_path, e)),
    }
}

fn ddl_list_path(state_path: &Path) -> PathBuf {
    state_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("table-ddl.list")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn missing_file_is_fresh_start() {
        let dir = TempDir::new("state").unwrap();
        let path = dir.path().join("state.ini");
        assert_eq!(ConverterState::load(&path).unwrap(), None);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new("state").unwrap();
        let path = dir.path().join("state.ini");
        let state = ConverterState {
            file: "bin-log.000001".into(),
            position: 1234,
            gtid: Gtid::new(1, 2, 3),
        };
        state.save(&path).unwrap();
        let loaded = ConverterState::load(&path).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!path.with_extension("ini.tmp").exists());
    }

    #[test]
    fn unknown_key_errors() {
        let dir = TempDir::new("state").unwrap();
        let path = dir.path().join("state.ini");
        fs::write(&path, "[avro-conversion]\nposition = 1\ngtid = 1-1-1:0\nfile = a\nbogus = x\n").unwrap();
        assert!(ConverterState::load(&path).unwrap_err().to_string().len() > 0);
    }

    #[test]
    fn ddl_history_appends_and_reads_back() {
        let dir = TempDir::new("state").unwrap();
        let state_path = dir.path().join("state.ini");
        append_ddl_history(&state_path, "CREATE TABLE t (a INT)").unwrap();
        append_ddl_history(&state_path, "ALTER TABLE t ADD COLUMN b INT").unwrap();
        let history = read_ddl_history(&state_path).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], "CREATE TABLE t (a INT)");
    }
}
