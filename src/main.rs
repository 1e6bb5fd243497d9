//! Binary entry point: parses `ConverterConfig`, resumes (or starts) a
//! `Converter` against the configured binlog directory, and loops until the
//! binlog source is exhausted or a transaction is left open at end of file.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use binlog_avro_conv::config::{init_logging, ConverterConfig};
use binlog_avro_conv::instance::converter::{BinlogEnd, Converter};

const DEFAULT_INITIAL_ORDINAL: u32 = 1;

fn main() -> ExitCode {
    let config = ConverterConfig::parse();
    init_logging(&config);

    let initial_file = format!("{}.{:06}", config.binlog_prefix, DEFAULT_INITIAL_ORDINAL);

    let mut converter = match Converter::open(&config, &initial_file) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to open converter");
            return ExitCode::FAILURE;
        }
    };

    // `Converter::run` returns as soon as it rotates into a new binlog
    // file, so the file-rotation loop lives here: checkpoint what the
    // finished file produced, then resume on the next one.
    loop {
        match converter.run() {
            Ok(BinlogEnd::Ok) => {
                if let Err(e) = converter.checkpoint() {
                    error!(error = %e, "checkpoint after file rotation failed");
                    return ExitCode::FAILURE;
                }
                continue;
            }
            Ok(BinlogEnd::LastFile) => {
                info!("reached end of the last available binlog file");
                if let Err(e) = converter.checkpoint() {
                    error!(error = %e, "final checkpoint failed");
                    return ExitCode::FAILURE;
                }
                return ExitCode::SUCCESS;
            }
            Ok(BinlogEnd::OpenTransaction) => {
                warn!(
                    "binlog ended mid-transaction; resuming from the last committed checkpoint on restart"
                );
                return ExitCode::SUCCESS;
            }
            Ok(BinlogEnd::BinlogError) => {
                error!("converter stopped after a dispatch error; position rolled back to last commit");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!(error = %e, "converter loop failed");
                return ExitCode::FAILURE;
            }
        }
    }
}
