use std::path::PathBuf;

use anyhow::{Context, Result};
use aperture_core::io::write_raw;
use aperture_core::psf::{PsfModel, PsfOps};
use aperture_core::volume::VolumeShape;
use clap::Args;

use super::load_config;
use crate::summary::print_optics_summary;

#[derive(Args)]
pub struct PsfArgs {
    /// TOML configuration (defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Move the PSF origin to the volume centre instead of voxel [0, 0, 0]
    #[arg(long)]
    pub centered: bool,

    /// Output raw volume
    #[arg(short, long, default_value = "psf.raw")]
    pub output: PathBuf,
}

pub fn run(args: &PsfArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.optics.validate()?;
    print_optics_summary(&config.optics, &config.model);

    let mut model = PsfModel::build(&config.optics, &config.model)
        .context("Failed to build the PSF model")?;
    let psf = model.psf();
    let psf = if args.centered {
        let VolumeShape { nx, ny, nz } = config.optics.shape;
        aperture_core::volume::roll(psf, [(nz / 2) as isize, (ny / 2) as isize, (nx / 2) as isize])
    } else {
        psf.clone()
    };

    write_raw(&args.output, &psf, config.optics.precision)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "PSF ({}, {} precision) saved to {}",
        config.optics.shape,
        config.optics.precision,
        args.output.display()
    );
    Ok(())
}
