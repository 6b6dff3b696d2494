use std::{io::Write, path::PathBuf, time::Duration};

use clap::{builder::RangedU64ValueParser, Parser, ValueEnum};
use env_logger::Env;
use log::*;
use viptx_core::{
    header::RamImage,
    roms::RomIter,
    session::{ADDRESS_SPACE_SIZE, DEFAULT_MAX_FILE_SIZE},
    transport::{DEFAULT_BAUD_RATE, DEFAULT_PORT, DEFAULT_RESET_DELAY},
    TransportConfig, TruncationPolicy, UploadConfig,
};

use crate::{
    convert::{convert, embed},
    upload::upload,
};

mod convert;
mod reporter;
mod upload;

#[derive(Parser, Debug)]
enum Command {
    /// Upload programs to the device and start running them
    #[command(arg_required_else_help = true)]
    Upload {
        /// Files to upload, sent back to back from address 0
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Serial port the device is connected to
        #[clap(short, long, env = "VIPTX_PORT", default_value = DEFAULT_PORT)]
        port: String,

        /// Baud rate of the serial link
        #[clap(short, long, default_value_t = DEFAULT_BAUD_RATE)]
        baud: u32,

        /// Milliseconds to wait for the device to reset after the port is opened
        #[clap(long, default_value_t = DEFAULT_RESET_DELAY.as_millis() as u64)]
        reset_delay_ms: u64,

        /// Largest number of bytes sent from one file
        #[clap(
            short,
            long,
            default_value_t = DEFAULT_MAX_FILE_SIZE,
            value_parser = max_size_parser()
        )]
        max_size: usize,

        /// Fail instead of truncating files larger than --max-size
        #[clap(long)]
        strict: bool,

        /// Write the wire stream to this file instead of the serial port
        #[clap(long)]
        trace: Option<PathBuf>,
    },
    /// Convert a ROM image to a C header
    #[command(arg_required_else_help = true)]
    Convert {
        /// Input ROM image
        input: PathBuf,

        /// Output header
        output: PathBuf,

        /// ROM profile (plain, vip-monitor, studio2)
        #[clap(short, long, value_parser = profile_parser, default_value = "plain")]
        profile: String,

        /// Name of the generated array, defaults to the profile's or the file name
        #[clap(short, long)]
        symbol: Option<String>,
    },
    /// Embed programs loaded into RAM at startup as C headers
    #[command(arg_required_else_help = true)]
    Embed {
        /// Images as PATH or PATH@ADDRESS
        #[clap(required = true)]
        images: Vec<RamImage>,

        /// Header receiving the byte arrays
        #[clap(long, default_value = "binary_data.h")]
        data: PathBuf,

        /// Header receiving the RAMUpload calls
        #[clap(long, default_value = "binary_code.h")]
        exec: PathBuf,

        /// Largest number of bytes embedded from one image
        #[clap(
            short,
            long,
            default_value_t = DEFAULT_MAX_FILE_SIZE,
            value_parser = max_size_parser()
        )]
        max_size: usize,
    },
}

fn max_size_parser() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..=ADDRESS_SPACE_SIZE as u64)
}

fn profile_parser(s: &str) -> Result<String, String> {
    if let Some(profile) = RomIter::find_by_name(s) {
        Ok(profile.name().to_string())
    } else {
        Err(format!(
            "Unknown profile '{}', expected one of {}",
            s,
            RomIter::names().join(", ")
        ))
    }
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None, author = "Paul Robson")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Set the logging verbosity
    #[clap(short, long, value_enum, global = true, default_value_t = LogLevel::Info)]
    verbose: LogLevel,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default())
        .filter_level(cli.verbose.into())
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let level = record.level();
            if level == Level::Info {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "{}: {}", record.level(), record.args())
            }
        })
        .init();

    let command = match cli.command {
        Some(command) => command,
        None => return Ok(()),
    };

    match command {
        Command::Upload {
            files,
            port,
            baud,
            reset_delay_ms,
            max_size,
            strict,
            trace,
        } => {
            let transport_config = TransportConfig {
                baud_rate: baud,
                reset_delay: Duration::from_millis(reset_delay_ms),
                ..TransportConfig::new(port)
            };
            let upload_config = UploadConfig {
                max_file_size: max_size,
                truncation: if strict {
                    TruncationPolicy::Reject
                } else {
                    TruncationPolicy::Truncate
                },
            };

            upload(&files, &transport_config, &upload_config, trace)
        }
        Command::Convert {
            input,
            output,
            profile,
            symbol,
        } => {
            let profile = RomIter::find_by_name(&profile)
                .expect("This already has been verified by profile_parser");

            convert(&input, &output, profile.as_ref(), symbol.as_deref())
        }
        Command::Embed {
            images,
            data,
            exec,
            max_size,
        } => embed(&images, &data, &exec, max_size),
    }
}
