use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use log::{debug, info, trace};

use crate::{
    protocol::{encode_hex, Checksum, Marker},
    transport::Transport,
    UploadError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    SessionOpen,
    Closed,
    Terminated,
    Aborted,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterState::Idle => "idle",
            WriterState::SessionOpen => "session open",
            WriterState::Closed => "closed",
            WriterState::Terminated => "terminated",
            WriterState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Frames bytes for the loader on the device and keeps the session checksum.
///
/// The writer owns its transport for the whole session, `terminate` and
/// `abort` release it.
pub struct FramedWriter<T: Transport> {
    transport: T,
    checksum: Checksum,
    state: WriterState,
    bytes_written: usize,
}

impl<T: Transport> FramedWriter<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            checksum: Checksum::default(),
            state: WriterState::Idle,
            bytes_written: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn checksum(&self) -> u8 {
        self.checksum.value()
    }

    /// Data bytes written since the last `open`.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn expect_state(
        &self,
        operation: &'static str,
        valid: &[WriterState],
    ) -> Result<(), UploadError> {
        if valid.contains(&self.state) {
            Ok(())
        } else {
            Err(UploadError::ProtocolState {
                operation,
                state: self.state,
            })
        }
    }

    fn send_marker(&mut self, marker: Marker) -> Result<(), UploadError> {
        self.transport.send_byte(marker.as_byte())
    }

    fn send_hex(&mut self, byte: u8) -> Result<(), UploadError> {
        let [high, low] = encode_hex(byte);
        self.transport.send_byte(high)?;
        self.transport.send_byte(low)
    }

    /// Starts a session. The device zeroes its checksum when it sees the
    /// open marker.
    pub fn open(&mut self) -> Result<(), UploadError> {
        self.expect_state("open", &[WriterState::Idle, WriterState::Closed])?;

        self.checksum.reset();
        self.bytes_written = 0;
        self.send_marker(Marker::Open)?;
        self.state = WriterState::SessionOpen;

        debug!("Session opened");
        Ok(())
    }

    /// Sends one data byte. Values outside `0..=255` are rejected before
    /// anything reaches the wire.
    pub fn write(&mut self, value: impl Into<i64>) -> Result<(), UploadError> {
        let value = value.into();
        self.expect_state("write", &[WriterState::SessionOpen])?;
        let byte = u8::try_from(value).map_err(|_| UploadError::Range(value))?;

        self.checksum.add(byte);
        self.send_hex(byte)?;
        self.send_marker(Marker::Store)?;
        self.bytes_written += 1;

        trace!(
            "{:#06x}: {:02X} (checksum {:02X})",
            self.bytes_written - 1,
            byte,
            self.checksum.value()
        );
        Ok(())
    }

    /// Sends every byte of one file.
    pub fn write_all(&mut self, name: &str, bytes: &[u8]) -> Result<(), UploadError> {
        self.write_all_until(name, bytes, &AtomicBool::new(false)).map(|_| ())
    }

    /// Like `write_all`, but checks `stop` before every byte and returns
    /// early once it is set. Returns how many bytes of `bytes` were sent.
    pub fn write_all_until(
        &mut self,
        name: &str,
        bytes: &[u8],
        stop: &AtomicBool,
    ) -> Result<usize, UploadError> {
        self.expect_state("write", &[WriterState::SessionOpen])?;

        info!("Read file {} length {} bytes", name, bytes.len());
        info!("Beginning transmission");

        for (sent, byte) in bytes.iter().enumerate() {
            if stop.load(Ordering::Relaxed) {
                info!("Stopped after {} of {} bytes", sent, bytes.len());
                return Ok(sent);
            }
            self.write(*byte)?;
        }

        info!("Completed.");
        Ok(bytes.len())
    }

    /// Sends the checksum for the device to verify. The accumulator is left
    /// as is until the next `open`.
    pub fn close(&mut self) -> Result<(), UploadError> {
        self.expect_state("close", &[WriterState::SessionOpen])?;

        let checksum = self.checksum.value();
        self.send_hex(checksum)?;
        self.send_marker(Marker::Verify)?;
        self.state = WriterState::Closed;

        info!("Checksum {:02X} sent.", checksum);
        Ok(())
    }

    /// Tells the device to run what was loaded and releases the transport.
    pub fn terminate(&mut self) -> Result<(), UploadError> {
        self.expect_state("terminate", &[WriterState::Closed])?;

        self.send_marker(Marker::Run)?;
        self.state = WriterState::Terminated;
        self.transport.close()?;

        info!("Terminating connection and starting emulation.");
        Ok(())
    }

    /// Releases the transport without finishing the session. Only call this
    /// between whole frames, the device is left waiting for a reset.
    pub fn abort(&mut self) -> Result<(), UploadError> {
        if matches!(self.state, WriterState::Terminated | WriterState::Aborted) {
            return Err(UploadError::ProtocolState {
                operation: "abort",
                state: self.state,
            });
        }

        self.state = WriterState::Aborted;
        self.transport.close()?;

        info!(
            "Session aborted after {} bytes, the device needs a reset",
            self.bytes_written
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{protocol::decode_trace, transport::TraceTransport};

    fn writer() -> FramedWriter<TraceTransport<Vec<u8>>> {
        FramedWriter::new(TraceTransport::new(Vec::new()))
    }

    fn wire(writer: &FramedWriter<TraceTransport<Vec<u8>>>) -> &str {
        std::str::from_utf8(writer.transport().get_ref()).unwrap()
    }

    fn session(files: &[&[u8]]) -> String {
        let mut writer = writer();
        writer.open().unwrap();
        for file in files {
            writer.write_all("test", file).unwrap();
        }
        writer.close().unwrap();
        writer.terminate().unwrap();
        assert!(writer.transport().is_closed());
        String::from_utf8(writer.into_transport().into_inner()).unwrap()
    }

    #[test]
    fn single_file_session() {
        assert_eq!(session(&[&[0x00, 0xff, 0x10]]), "@00+FF+10+0F=$");
    }

    #[test]
    fn files_share_one_checksum() {
        assert_eq!(session(&[&[0x01], &[0x02]]), "@01+02+03=$");
    }

    #[test]
    fn empty_session() {
        assert_eq!(session(&[&[]]), "@00=$");
        assert_eq!(session(&[]), "@00=$");
    }

    #[test]
    fn split_writes_checksum_like_concatenation() {
        let first: Vec<u8> = (0..=255).collect();
        let second: Vec<u8> = (0..100).map(|i| (i * 7) as u8).collect();
        let joined = [first.clone(), second.clone()].concat();

        let mut split = writer();
        split.open().unwrap();
        split.write_all("first", &first).unwrap();
        split.write_all("second", &second).unwrap();

        let mut whole = writer();
        whole.open().unwrap();
        whole.write_all("joined", &joined).unwrap();

        assert_eq!(split.checksum(), whole.checksum());
        assert_eq!(split.checksum(), Checksum::of(&joined).value());
        assert_eq!(split.bytes_written(), joined.len());
    }

    #[test]
    fn range_is_checked() {
        let mut writer = writer();
        writer.open().unwrap();

        for value in [0i64, 1, 127, 255] {
            writer.write(value).unwrap();
        }
        for value in [-1i64, 256, -300, i64::MAX, i64::MIN] {
            assert!(matches!(writer.write(value), Err(UploadError::Range(v)) if v == value));
        }

        assert_eq!(wire(&writer), "@00+01+7F+FF+");
        assert_eq!(writer.checksum(), 0x7f);
    }

    #[test]
    fn write_outside_session_is_a_state_error() {
        let mut writer = writer();
        assert!(matches!(
            writer.write(1u8),
            Err(UploadError::ProtocolState {
                operation: "write",
                state: WriterState::Idle
            })
        ));

        writer.open().unwrap();
        writer.close().unwrap();
        assert!(matches!(
            writer.write(1u8),
            Err(UploadError::ProtocolState {
                operation: "write",
                state: WriterState::Closed
            })
        ));
        assert!(matches!(
            writer.write_all("late", &[1]),
            Err(UploadError::ProtocolState { .. })
        ));

        assert_eq!(wire(&writer), "@00=");
    }

    #[test]
    fn out_of_order_calls_send_nothing() {
        let mut writer = writer();
        assert!(writer.close().is_err());
        assert!(writer.terminate().is_err());

        writer.open().unwrap();
        assert!(writer.open().is_err());
        assert!(writer.terminate().is_err());

        writer.close().unwrap();
        assert!(writer.close().is_err());
        writer.terminate().unwrap();
        assert!(writer.open().is_err());
        assert!(writer.abort().is_err());

        assert_eq!(wire(&writer), "@00=$");
        assert_eq!(writer.state(), WriterState::Terminated);
    }

    #[test]
    fn reopen_resets_checksum() {
        let mut writer = writer();
        writer.open().unwrap();
        writer.write(0x10u8).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.checksum(), 0x10);

        writer.open().unwrap();
        assert_eq!(writer.checksum(), 0);
        writer.write(0x01u8).unwrap();
        writer.close().unwrap();

        assert_eq!(wire(&writer), "@10+10=@01+01=");
    }

    #[test]
    fn abort_closes_without_finishing() {
        let mut writer = writer();
        writer.open().unwrap();
        writer.write(0x42u8).unwrap();
        writer.abort().unwrap();

        assert_eq!(writer.state(), WriterState::Aborted);
        assert!(writer.transport().is_closed());
        assert!(writer.write(0x43u8).is_err());
        assert_eq!(wire(&writer), "@42+");
    }

    #[test]
    fn write_all_until_stops_between_bytes() {
        let mut writer = writer();
        writer.open().unwrap();

        let stop = AtomicBool::new(true);
        assert_eq!(writer.write_all_until("stopped", &[1, 2, 3], &stop).unwrap(), 0);

        stop.store(false, Ordering::Relaxed);
        assert_eq!(writer.write_all_until("running", &[1, 2, 3], &stop).unwrap(), 3);
        assert_eq!(wire(&writer), "@01+02+03+");
    }

    #[test]
    fn traces_round_trip() {
        for len in [0usize, 1, 8192] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
            let trace = session(&[&data]);
            let decoded = decode_trace(trace.as_bytes()).unwrap();

            assert_eq!(decoded.data, data);
            assert!(decoded.checksum_matches());
            assert!(decoded.run);
            assert_eq!(trace.len(), crate::protocol::wire_length(len));
        }
    }
}
