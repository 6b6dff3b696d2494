use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use log::info;
use viptx_core::{
    header::{convert_rom, write_ram_image, RamImage},
    roms::RomProfile,
    ConvertError,
};

pub fn convert<P1: AsRef<Path>, P2: AsRef<Path>>(
    input_path: &P1,
    output_path: &P2,
    profile: &dyn RomProfile,
    symbol: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = output_path.as_ref();
    let output = BufWriter::new(File::create(output_path)?);

    if let Err(err) = convert_rom(input_path, profile, symbol, output) {
        fs::remove_file(output_path)?;
        return Err(Box::new(err));
    }

    info!("Wrote {}", output_path.display());

    Ok(())
}

pub fn embed<P1: AsRef<Path>, P2: AsRef<Path>>(
    images: &[RamImage],
    data_path: &P1,
    exec_path: &P2,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let data_path = data_path.as_ref();
    let exec_path = exec_path.as_ref();

    let mut data = BufWriter::new(File::create(data_path)?);
    let mut exec = BufWriter::new(File::create(exec_path)?);

    let result = images
        .iter()
        .try_for_each(|image| write_ram_image(image, limit, &mut data, &mut exec).map(|_| ()))
        .and_then(|_| {
            data.flush()
                .and_then(|_| exec.flush())
                .map_err(ConvertError::Write)
        });

    if let Err(err) = result {
        drop((data, exec));
        fs::remove_file(data_path)?;
        fs::remove_file(exec_path)?;
        return Err(Box::new(err));
    }

    info!(
        "Wrote {} images to {} and {}",
        images.len(),
        data_path.display(),
        exec_path.display()
    );

    Ok(())
}
