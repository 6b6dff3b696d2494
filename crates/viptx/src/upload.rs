use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use assert_into::AssertInto;
use log::{info, LevelFilter};
use viptx_core::{
    load_payloads, protocol::wire_length, run_session, FramedWriter, Payload, SessionOutcome,
    TraceTransport, Transport, TransportConfig, UploadConfig, UploadError,
};

use crate::reporter::ProgressBarReporter;

pub fn upload<P: AsRef<Path>>(
    files: &[P],
    transport_config: &TransportConfig,
    upload_config: &UploadConfig,
    trace: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Read everything before the port is opened, opening it resets the board.
    let payloads = load_payloads(files, upload_config)?;

    let abort = Arc::new(AtomicBool::new(false));
    {
        let abort = abort.clone();
        ctrlc::set_handler(move || abort.store(true, Ordering::Relaxed))?;
    }

    let outcome = match trace {
        Some(trace_path) => {
            info!("Writing wire trace to {}", trace_path.display());
            let output = BufWriter::new(File::create(&trace_path)?);
            send(TraceTransport::new(output), &payloads, &abort)?
        }
        None => open_and_send(transport_config, &payloads, &abort)?,
    };

    match outcome {
        SessionOutcome::Completed(report) => {
            // Shown regardless of the log level, the device did not get the whole file.
            for file in report.truncated() {
                eprintln!(
                    "warning: {} was truncated to {} of {} bytes",
                    file.path.display(),
                    file.bytes_sent,
                    file.original_len
                );
            }
            Ok(())
        }
        SessionOutcome::Aborted(report) => Err(format!(
            "Upload aborted after {} bytes, reset the device before uploading again",
            report.bytes_sent
        )
        .into()),
    }
}

#[cfg(feature = "serial")]
fn open_and_send(
    config: &TransportConfig,
    payloads: &[Payload],
    abort: &AtomicBool,
) -> Result<SessionOutcome, UploadError> {
    let transport = viptx_core::SerialTransport::open(config)?;
    info!("Uploading to the device on {}", transport.name());
    send(transport, payloads, abort)
}

#[cfg(not(feature = "serial"))]
fn open_and_send(
    config: &TransportConfig,
    _payloads: &[Payload],
    _abort: &AtomicBool,
) -> Result<SessionOutcome, UploadError> {
    Err(UploadError::Connection {
        port: config.port.clone(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "built without serial support, use --trace",
        ),
    })
}

fn send<T: Transport>(
    transport: T,
    payloads: &[Payload],
    abort: &AtomicBool,
) -> Result<SessionOutcome, UploadError> {
    let should_print_progress = log::max_level() >= LevelFilter::Info;

    if should_print_progress {
        let data_len = payloads.iter().map(|payload| payload.data.len()).sum();
        let mut reporter = ProgressBarReporter::new(wire_length(data_len).assert_into(), transport);
        log::info!("Transferring program to the device");
        let result = run_session(&mut FramedWriter::new(&mut reporter), payloads, abort);
        reporter.finish();
        println!();
        result
    } else {
        run_session(&mut FramedWriter::new(transport), payloads, abort)
    }
}
