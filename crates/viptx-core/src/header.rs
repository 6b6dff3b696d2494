//! Generation of the C headers the firmware embeds ROM and RAM images from.

use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{info, warn};

use crate::{
    roms::{apply_patches, RomProfile},
    ConvertError,
};

/// Reads an image, keeping at most `limit` bytes when one is given.
pub fn read_image<P: AsRef<Path>>(
    path: P,
    limit: Option<usize>,
) -> Result<Vec<u8>, ConvertError> {
    let path = path.as_ref();
    let read_error = |source: io::Error| ConvertError::ReadInput {
        path: path.to_owned(),
        source,
    };

    let mut file = File::open(path).map_err(read_error)?;
    let mut data = Vec::new();
    match limit {
        Some(limit) => file
            .take(limit.try_into().unwrap_or(u64::MAX))
            .read_to_end(&mut data),
        None => file.read_to_end(&mut data),
    }
    .map_err(read_error)?;

    Ok(data)
}

/// Turns a file name into a C identifier, `brix.ch8` becomes `brix`.
pub fn symbol_from_path<P: AsRef<Path>>(path: P) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut symbol: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if symbol.is_empty() || symbol.starts_with(|c: char| c.is_ascii_digit()) {
        symbol.insert(0, '_');
    }

    symbol
}

fn write_bytes(out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    out.write_all(b"{")?;
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write!(out, "{}", byte)?;
    }
    out.write_all(b"}")
}

/// Writes a ROM image as a `PROGMEM` array. The declared length always
/// matches `bytes.len()`.
pub fn write_rom_header(
    symbol: &str,
    bytes: &[u8],
    mut out: impl Write,
) -> Result<(), ConvertError> {
    emit_rom_header(symbol, bytes, &mut out).map_err(ConvertError::Write)
}

fn emit_rom_header(symbol: &str, bytes: &[u8], out: &mut impl Write) -> io::Result<()> {
    write!(
        out,
        "/* GENERATED */\n\nstatic PROGMEM prog_uchar {}[{}] = ",
        symbol,
        bytes.len()
    )?;
    write_bytes(out, bytes)?;
    out.write_all(b";")?;
    out.flush()
}

/// Reads `input`, patches it for `profile` and writes the header to `output`.
pub fn convert_rom<P: AsRef<Path>>(
    input: P,
    profile: &dyn RomProfile,
    symbol: Option<&str>,
    output: impl Write,
) -> Result<usize, ConvertError> {
    let input = input.as_ref();
    let mut image = read_image(input, None)?;
    apply_patches(&mut image, profile)?;

    let symbol = match symbol.or(profile.symbol()) {
        Some(symbol) => symbol.to_string(),
        None => symbol_from_path(input),
    };

    info!(
        "Converting {} ({} bytes) to {} using profile {}",
        input.display(),
        image.len(),
        symbol,
        profile.name()
    );

    write_rom_header(&symbol, &image, output)?;
    Ok(image.len())
}

/// A program copied into RAM at startup by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamImage {
    pub path: PathBuf,
    pub symbol: String,
    pub address: u16,
}

impl FromStr for RamImage {
    type Err = ConvertError;

    /// Parses `PATH` or `PATH@ADDRESS`, the address in decimal or `0x` hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConvertError::InvalidImageSpec(s.to_string());

        let (path, address) = match s.rsplit_once('@') {
            Some((path, address)) => {
                let address = match address.strip_prefix("0x").or(address.strip_prefix("0X")) {
                    Some(hex) => u16::from_str_radix(hex, 16),
                    None => address.parse(),
                }
                .map_err(|_| invalid())?;
                (path, address)
            }
            None => (s, 0),
        };

        if path.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            path: PathBuf::from(path),
            symbol: symbol_from_path(path),
            address,
        })
    }
}

/// Appends one image to the data header and its upload call to the exec
/// header. Returns the number of bytes embedded.
pub fn write_ram_image(
    image: &RamImage,
    limit: usize,
    mut data_out: impl Write,
    mut exec_out: impl Write,
) -> Result<usize, ConvertError> {
    let mut bytes = read_image(&image.path, Some(limit.saturating_add(1)))?;
    if bytes.len() > limit {
        warn!(
            "{} is longer than {} bytes, the rest is not embedded",
            image.path.display(),
            limit
        );
        bytes.truncate(limit);
    }

    info!(
        "Embedding {} ({} bytes) as {} at {:#06x}",
        image.path.display(),
        bytes.len(),
        image.symbol,
        image.address
    );

    emit_ram_image(image, &bytes, &mut data_out, &mut exec_out).map_err(ConvertError::Write)?;

    Ok(bytes.len())
}

fn emit_ram_image(
    image: &RamImage,
    bytes: &[u8],
    data_out: &mut impl Write,
    exec_out: &mut impl Write,
) -> io::Result<()> {
    write!(data_out, "prog_uchar {}[] PROGMEM = ", image.symbol)?;
    write_bytes(data_out, bytes)?;
    data_out.write_all(b";\n")?;

    writeln!(
        exec_out,
        "RAMUpload({},{},{});",
        image.symbol,
        bytes.len(),
        image.address
    )
}
