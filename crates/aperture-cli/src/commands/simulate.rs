use std::path::PathBuf;

use anyhow::{Context, Result};
use aperture_core::compute::convolve;
use aperture_core::io::{read_raw, write_raw};
use aperture_core::psf::{PsfModel, PsfOps};
use clap::Args;

use super::load_config;

#[derive(Args)]
pub struct SimulateArgs {
    /// Raw object volume with the configured shape and precision
    pub object: PathBuf,

    /// TOML configuration (defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output raw volume
    #[arg(short, long, default_value = "blurred.raw")]
    pub output: PathBuf,
}

pub fn run(args: &SimulateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.optics.validate()?;
    let precision = config.optics.precision;

    let object = read_raw(&args.object, config.optics.shape, precision)
        .with_context(|| format!("Failed to load {}", args.object.display()))?;
    let mut model = PsfModel::build(&config.optics, &config.model)
        .context("Failed to build the PSF model")?;
    let blurred = convolve(&object, model.psf())?;

    write_raw(&args.output, &blurred, precision)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "Blurred {} volume saved to {}",
        config.optics.shape,
        args.output.display()
    );
    Ok(())
}
