use std::fmt;

use thiserror::Error;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Single character control markers understood by the loader on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Begin a session, the device zeroes its checksum
    Open,
    /// Store the byte just sent at the current address and advance
    Store,
    /// The byte just sent is the checksum, compare it
    Verify,
    /// End the session and start running the loaded program
    Run,
}

impl Marker {
    pub const fn as_byte(self) -> u8 {
        match self {
            Marker::Open => b'@',
            Marker::Store => b'+',
            Marker::Verify => b'=',
            Marker::Run => b'$',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'@' => Some(Marker::Open),
            b'+' => Some(Marker::Store),
            b'=' => Some(Marker::Verify),
            b'$' => Some(Marker::Run),
            _ => None,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// Encodes a byte as two uppercase hex digits, high nibble first.
pub fn encode_hex(byte: u8) -> [u8; 2] {
    [
        HEX_DIGITS[(byte >> 4) as usize],
        HEX_DIGITS[(byte & 0x0f) as usize],
    ]
}

fn decode_nibble(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Running mod 256 sum of every data byte sent since the session was opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Checksum(u8);

impl Checksum {
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn add(&mut self, byte: u8) {
        self.0 = self.0.wrapping_add(byte);
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn of(bytes: &[u8]) -> Self {
        let mut checksum = Self::default();
        bytes.iter().for_each(|b| checksum.add(*b));
        checksum
    }
}

/// Number of bytes on the wire for a complete session carrying `data_len` bytes.
pub const fn wire_length(data_len: usize) -> usize {
    // '@', "HH+" per byte, "HH=", '$'
    1 + 3 * data_len + 3 + 1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrace {
    pub data: Vec<u8>,
    /// Checksum transmitted with the verify marker, if the session was closed
    pub checksum: Option<u8>,
    pub run: bool,
}

impl DecodedTrace {
    /// True when the transmitted checksum matches the data it covers.
    pub fn checksum_matches(&self) -> bool {
        self.checksum == Some(Checksum::of(&self.data).value())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TraceError {
    #[error("Trace does not start with the open marker")]
    MissingOpen,
    #[error("Unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { offset: usize, byte: u8 },
    #[error("Trace ends in the middle of a frame")]
    TruncatedFrame,
}

/// Parses a wire trace produced by a single session back into its parts.
pub fn decode_trace(trace: &[u8]) -> Result<DecodedTrace, TraceError> {
    let (first, rest) = trace.split_first().ok_or(TraceError::MissingOpen)?;
    if *first != Marker::Open.as_byte() {
        return Err(TraceError::MissingOpen);
    }

    let mut decoded = DecodedTrace {
        data: Vec::with_capacity(rest.len() / 3),
        checksum: None,
        run: false,
    };

    let mut offset = 1;
    let mut pending: Option<u8> = None;
    let mut digits = 0;

    for &byte in rest {
        if decoded.run {
            return Err(TraceError::UnexpectedByte { offset, byte });
        }

        if let Some(nibble) = decode_nibble(byte) {
            if digits == 2 || decoded.checksum.is_some() {
                return Err(TraceError::UnexpectedByte { offset, byte });
            }
            pending = Some((pending.unwrap_or(0) << 4) | nibble);
            digits += 1;
        } else {
            match (Marker::from_byte(byte), pending.take()) {
                (Some(Marker::Store), Some(value)) if digits == 2 => decoded.data.push(value),
                (Some(Marker::Verify), Some(value)) if digits == 2 => {
                    decoded.checksum = Some(value)
                }
                (Some(Marker::Run), None) if decoded.checksum.is_some() => decoded.run = true,
                _ => return Err(TraceError::UnexpectedByte { offset, byte }),
            }
            digits = 0;
        }

        offset += 1;
    }

    if pending.is_some() {
        return Err(TraceError::TruncatedFrame);
    }

    Ok(decoded)
}
