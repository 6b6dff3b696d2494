use std::io::Stdout;

use pbr::{ProgressBar, Units};
use viptx_core::{Transport, UploadError};

/// Counts the bytes going out on the wire.
pub struct ProgressBarReporter<T> {
    pb: ProgressBar<Stdout>,
    inner: T,
}

impl<T> ProgressBarReporter<T>
where
    T: Transport,
{
    pub fn new(total_bytes: u64, inner: T) -> Self {
        let mut pb = ProgressBar::new(total_bytes);
        pb.set_units(Units::Bytes);

        Self { pb, inner }
    }

    pub fn finish(&mut self) {
        self.pb.finish();
    }
}

impl<T> Transport for ProgressBarReporter<T>
where
    T: Transport,
{
    fn send_byte(&mut self, byte: u8) -> Result<(), UploadError> {
        self.inner.send_byte(byte)?;
        self.pb.inc();
        Ok(())
    }

    fn close(&mut self) -> Result<(), UploadError> {
        self.inner.close()
    }
}
