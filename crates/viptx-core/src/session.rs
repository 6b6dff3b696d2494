use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use assert_into::AssertInto;
use log::{debug, info, warn};
use static_assertions::const_assert;

use crate::{
    transport::Transport,
    writer::{FramedWriter, WriterState},
    UploadError,
};

/// Largest file the loader accepts by default.
pub const DEFAULT_MAX_FILE_SIZE: usize = 8192;

/// The VIP address space is 64K, the loader cannot store more than that.
pub const ADDRESS_SPACE_SIZE: usize = 0x10000;

const_assert!(DEFAULT_MAX_FILE_SIZE <= ADDRESS_SPACE_SIZE);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// Send the first `max_file_size` bytes and flag the file in the report
    #[default]
    Truncate,
    /// Refuse to start the session
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub max_file_size: usize,
    pub truncation: TruncationPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            truncation: TruncationPolicy::default(),
        }
    }
}

/// The bytes of one input file, read and ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub path: PathBuf,
    pub data: Vec<u8>,
    /// Size of the file on disk
    pub original_len: u64,
}

impl Payload {
    pub fn truncated(&self) -> bool {
        self.original_len > self.data.len() as u64
    }

    pub fn name(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub bytes_sent: usize,
    pub original_len: u64,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub files: Vec<FileReport>,
    pub bytes_sent: usize,
    pub checksum: u8,
}

impl SessionReport {
    pub fn truncated(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|file| file.truncated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Checksum sent and the device told to run
    Completed(SessionReport),
    /// Stopped between bytes, the device needs a reset before the next session
    Aborted(SessionReport),
}

impl SessionOutcome {
    pub fn report(&self) -> &SessionReport {
        match self {
            SessionOutcome::Completed(report) | SessionOutcome::Aborted(report) => report,
        }
    }
}

/// Reads up to `config.max_file_size` bytes of `path`.
pub fn load_payload<P: AsRef<Path>>(
    path: P,
    config: &UploadConfig,
) -> Result<Payload, UploadError> {
    let path = path.as_ref();
    let read_error = |source: io::Error| UploadError::ReadInput {
        path: path.to_owned(),
        source,
    };

    let file = File::open(path).map_err(read_error)?;
    let on_disk = file.metadata().map_err(read_error)?.len();

    let limit: u64 = config.max_file_size.assert_into();
    let mut data = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(read_error)?;

    let original_len = on_disk.max(data.len() as u64);

    if data.len() > config.max_file_size {
        match config.truncation {
            TruncationPolicy::Truncate => {
                debug!(
                    "{} is {} bytes, only the first {} will be sent",
                    path.display(),
                    original_len,
                    config.max_file_size
                );
                data.truncate(config.max_file_size);
            }
            TruncationPolicy::Reject => {
                return Err(UploadError::FileTooLarge {
                    path: path.to_owned(),
                    len: original_len,
                    limit: config.max_file_size,
                })
            }
        }
    }

    Ok(Payload {
        path: path.to_owned(),
        data,
        original_len,
    })
}

/// Reads every file before anything is sent, so a missing file never leaves
/// the device half loaded.
pub fn load_payloads<P: AsRef<Path>>(
    paths: &[P],
    config: &UploadConfig,
) -> Result<Vec<Payload>, UploadError> {
    paths
        .iter()
        .map(|path| load_payload(path, config))
        .collect()
}

/// Sends all payloads in one session, back to back, then closes and
/// terminates it.
///
/// `abort` is checked between bytes. On abort or on any error the writer is
/// aborted so the transport is released.
pub fn run_session<T: Transport>(
    writer: &mut FramedWriter<T>,
    payloads: &[Payload],
    abort: &AtomicBool,
) -> Result<SessionOutcome, UploadError> {
    let mut report = SessionReport::default();

    match send_payloads(writer, payloads, abort, &mut report) {
        Ok(true) => Ok(SessionOutcome::Completed(report)),
        Ok(false) => {
            writer.abort()?;
            Ok(SessionOutcome::Aborted(report))
        }
        Err(err) => {
            if !matches!(
                writer.state(),
                WriterState::Terminated | WriterState::Aborted
            ) {
                if let Err(close_err) = writer.abort() {
                    warn!("Failed to release the transport: {}", close_err);
                }
            }
            Err(err)
        }
    }
}

fn send_payloads<T: Transport>(
    writer: &mut FramedWriter<T>,
    payloads: &[Payload],
    abort: &AtomicBool,
    report: &mut SessionReport,
) -> Result<bool, UploadError> {
    writer.open()?;

    for payload in payloads {
        let sent = writer.write_all_until(&payload.name(), &payload.data, abort)?;

        report.files.push(FileReport {
            path: payload.path.clone(),
            bytes_sent: sent,
            original_len: payload.original_len,
            truncated: payload.truncated(),
        });
        report.bytes_sent += sent;
        report.checksum = writer.checksum();

        if sent < payload.data.len() {
            return Ok(false);
        }
    }

    if abort.load(Ordering::Relaxed) {
        return Ok(false);
    }

    writer.close()?;
    writer.terminate()?;
    report.checksum = writer.checksum();

    info!(
        "Uploaded {} bytes from {} files, checksum {:02X}",
        report.bytes_sent,
        report.files.len(),
        report.checksum
    );

    Ok(true)
}

/// Loads `paths` and uploads them over `transport` in a single session.
pub fn upload_files<T: Transport, P: AsRef<Path>>(
    mut transport: T,
    paths: &[P],
    config: &UploadConfig,
    abort: &AtomicBool,
) -> Result<SessionOutcome, UploadError> {
    let payloads = match load_payloads(paths, config) {
        Ok(payloads) => payloads,
        Err(err) => {
            if let Err(close_err) = transport.close() {
                warn!("Failed to release the transport: {}", close_err);
            }
            return Err(err);
        }
    };

    let mut writer = FramedWriter::new(transport);
    run_session(&mut writer, &payloads, abort)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::transport::TraceTransport;

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn upload(
        paths: &[PathBuf],
        config: &UploadConfig,
        abort: &AtomicBool,
    ) -> (Result<SessionOutcome, UploadError>, String, bool) {
        let mut transport = TraceTransport::new(Vec::new());
        let result = upload_files(&mut transport, paths, config, abort);
        let closed = transport.is_closed();
        let wire = String::from_utf8(transport.into_inner()).unwrap();
        (result, wire, closed)
    }

    #[test]
    fn uploads_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let rom = write_file(&dir, "prog.bin", &[0x00, 0xff, 0x10]);

        let (result, wire, closed) = upload(
            &[rom],
            &UploadConfig::default(),
            &AtomicBool::new(false),
        );

        assert_eq!(wire, "@00+FF+10+0F=$");
        assert!(closed);
        let outcome = result.unwrap();
        assert!(matches!(outcome, SessionOutcome::Completed(_)));
        assert_eq!(outcome.report().checksum, 0x0f);
        assert_eq!(outcome.report().bytes_sent, 3);
    }

    #[test]
    fn uploads_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(&dir, "chip8.rom", &[0x01]);
        let second = write_file(&dir, "ufo.ch8", &[0x02]);

        let (result, wire, _) = upload(
            &[first.clone(), second.clone()],
            &UploadConfig::default(),
            &AtomicBool::new(false),
        );

        assert_eq!(wire, "@01+02+03=$");
        let report = result.unwrap().report().clone();
        assert_eq!(
            report.files.iter().map(|f| &f.path).collect::<Vec<_>>(),
            vec![&first, &second]
        );
    }

    #[test]
    fn uploads_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write_file(&dir, "empty.bin", &[]);

        let (result, wire, _) = upload(
            &[empty],
            &UploadConfig::default(),
            &AtomicBool::new(false),
        );

        assert_eq!(wire, "@00=$");
        assert_eq!(result.unwrap().report().bytes_sent, 0);
    }

    #[test]
    fn oversized_file_is_truncated_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let big = write_file(&dir, "big.bin", &[0x01; 10]);
        let config = UploadConfig {
            max_file_size: 4,
            ..UploadConfig::default()
        };

        let (result, wire, _) = upload(&[big.clone()], &config, &AtomicBool::new(false));

        assert_eq!(wire, "@01+01+01+01+04=$");
        let outcome = result.unwrap();
        let truncated: Vec<_> = outcome.report().truncated().collect();
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].path, big);
        assert_eq!(truncated[0].original_len, 10);
        assert_eq!(truncated[0].bytes_sent, 4);
    }

    #[test]
    fn file_at_the_limit_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let exact = write_file(&dir, "exact.bin", &[0xaa; DEFAULT_MAX_FILE_SIZE]);

        let payload = load_payload(&exact, &UploadConfig::default()).unwrap();

        assert_eq!(payload.data.len(), DEFAULT_MAX_FILE_SIZE);
        assert!(!payload.truncated());
    }

    #[test]
    fn unbounded_limit_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let rom = write_file(&dir, "prog.bin", &[1, 2, 3]);
        let config = UploadConfig {
            max_file_size: usize::MAX,
            ..UploadConfig::default()
        };

        let payload = load_payload(&rom, &config).unwrap();

        assert_eq!(payload.data, vec![1, 2, 3]);
        assert!(!payload.truncated());
    }

    #[test]
    fn reject_policy_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let small = write_file(&dir, "small.bin", &[0x01]);
        let big = write_file(&dir, "big.bin", &[0x01; 10]);
        let config = UploadConfig {
            max_file_size: 4,
            truncation: TruncationPolicy::Reject,
        };

        let (result, wire, closed) = upload(&[small, big], &config, &AtomicBool::new(false));

        assert!(matches!(
            result,
            Err(UploadError::FileTooLarge {
                len: 10,
                limit: 4,
                ..
            })
        ));
        assert!(wire.is_empty());
        assert!(closed);
    }

    #[test]
    fn missing_file_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let present = write_file(&dir, "present.bin", &[0x01]);
        let missing = dir.path().join("missing.bin");

        let (result, wire, closed) = upload(
            &[present, missing.clone()],
            &UploadConfig::default(),
            &AtomicBool::new(false),
        );

        match result {
            Err(UploadError::ReadInput { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(wire.is_empty());
        assert!(closed);
    }

    #[test]
    fn abort_before_start_only_opens() {
        let dir = tempfile::tempdir().unwrap();
        let rom = write_file(&dir, "prog.bin", &[0x01, 0x02]);

        let (result, wire, closed) = upload(
            &[rom],
            &UploadConfig::default(),
            &AtomicBool::new(true),
        );

        assert_eq!(wire, "@");
        assert!(closed);
        let outcome = result.unwrap();
        assert!(matches!(outcome, SessionOutcome::Aborted(_)));
        assert_eq!(outcome.report().bytes_sent, 0);
    }

    /// Raises the abort flag once a given number of bytes went out.
    struct AbortAfter<'a> {
        inner: TraceTransport<Vec<u8>>,
        remaining: usize,
        abort: &'a AtomicBool,
    }

    impl Transport for AbortAfter<'_> {
        fn send_byte(&mut self, byte: u8) -> Result<(), UploadError> {
            self.inner.send_byte(byte)?;
            if byte == b'+' {
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.abort.store(true, Ordering::Relaxed);
                }
            }
            Ok(())
        }

        fn close(&mut self) -> Result<(), UploadError> {
            self.inner.close()
        }
    }

    #[test]
    fn abort_mid_session_stops_between_frames() {
        let abort = AtomicBool::new(false);
        let payloads = vec![Payload {
            path: PathBuf::from("prog.bin"),
            data: vec![0x10, 0x20, 0x30, 0x40],
            original_len: 4,
        }];
        let mut writer = FramedWriter::new(AbortAfter {
            inner: TraceTransport::new(Vec::new()),
            remaining: 2,
            abort: &abort,
        });

        let outcome = run_session(&mut writer, &payloads, &abort).unwrap();

        assert_eq!(writer.state(), WriterState::Aborted);
        let transport = writer.into_transport();
        assert!(transport.inner.is_closed());
        assert_eq!(transport.inner.get_ref(), b"@10+20+");
        match outcome {
            SessionOutcome::Aborted(report) => {
                assert_eq!(report.bytes_sent, 2);
                assert_eq!(report.checksum, 0x30);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    /// Fails every write after the first few bytes.
    struct Flaky {
        sent: usize,
        closed: bool,
    }

    impl Transport for Flaky {
        fn send_byte(&mut self, _byte: u8) -> Result<(), UploadError> {
            self.sent += 1;
            if self.sent > 4 {
                return Err(UploadError::ConnectionLost(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "unplugged",
                )));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<(), UploadError> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn transport_failure_releases_transport() {
        let payloads = vec![Payload {
            path: PathBuf::from("prog.bin"),
            data: vec![0; 8],
            original_len: 8,
        }];
        let mut writer = FramedWriter::new(Flaky {
            sent: 0,
            closed: false,
        });

        let result = run_session(&mut writer, &payloads, &AtomicBool::new(false));

        assert!(matches!(result, Err(UploadError::ConnectionLost(_))));
        assert_eq!(writer.state(), WriterState::Aborted);
        assert!(writer.transport().closed);
    }
}
