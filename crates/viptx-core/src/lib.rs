//! Host side tooling for the COSMAC VIP emulator: the serial upload protocol
//! used to load programs into the board, and generation of the ROM headers
//! compiled into the firmware.

use std::{io, path::PathBuf};

use thiserror::Error;

pub mod header;
pub mod protocol;
pub mod roms;
pub mod session;
pub mod transport;
pub mod writer;

pub use session::{
    load_payload, load_payloads, run_session, upload_files, FileReport, Payload, SessionOutcome,
    SessionReport, TruncationPolicy, UploadConfig,
};
pub use transport::{TraceTransport, Transport, TransportConfig};
pub use writer::{FramedWriter, WriterState};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to open serial port {port}")]
    Connection {
        port: String,
        #[source]
        source: io::Error,
    },
    #[error("Lost connection to the device")]
    ConnectionLost(#[source] io::Error),
    #[error("Data value {0} is outside the 0-255 range")]
    Range(i64),
    #[error("Only one character can be sent at a time, got {0}")]
    ProtocolUsage(usize),
    #[error("Cannot {operation} while the writer is {state}")]
    ProtocolState {
        operation: &'static str,
        state: WriterState,
    },
    #[error("Failed to read {}", .path.display())]
    ReadInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is {len} bytes, more than the {limit} byte limit", .path.display())]
    FileTooLarge {
        path: PathBuf,
        len: u64,
        limit: usize,
    },
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Failed to read {}", .path.display())]
    ReadInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write to output")]
    Write(#[source] io::Error),
    #[error("Patch at {offset:#06x} is past the end of a {len} byte image")]
    PatchOutOfRange { offset: usize, len: usize },
    #[error("Invalid image '{0}', expected PATH or PATH@ADDRESS")]
    InvalidImageSpec(String),
}
