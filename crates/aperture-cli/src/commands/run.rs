use std::path::PathBuf;

use anyhow::{Context, Result};
use aperture_core::blind::{BlindDeconvolution, Budgets};
use aperture_core::deconv::EdgePreservingDeconvolver;
use aperture_core::estimator::ParameterEstimator;
use aperture_core::io::{read_raw, write_raw};
use aperture_core::psf::{PsfModel, PsfOps};
use clap::Args;
use tracing::info;

use super::load_config;
use crate::progress::BarProgress;
use crate::summary::{print_outcome, print_run_summary};

#[derive(Args)]
pub struct RunArgs {
    /// Raw data volume with the configured shape and precision
    pub data: PathBuf,

    /// TOML configuration (defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Initial object estimate (the data itself when omitted)
    #[arg(long)]
    pub object: Option<PathBuf>,

    /// Number of alternating passes
    #[arg(long)]
    pub passes: Option<usize>,

    /// Comma-separated iteration budgets for defocus,phase,modulus (e.g. 10,5,0)
    #[arg(long)]
    pub budgets: Option<String>,

    /// Also save the estimated PSF to this path
    #[arg(long)]
    pub psf_output: Option<PathBuf>,

    /// Output raw volume
    #[arg(short, long, default_value = "deconvolved.raw")]
    pub output: PathBuf,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(passes) = args.passes {
        config.passes = passes;
    }
    if let Some(ref budget_str) = args.budgets {
        let budgets = budget_str
            .split(',')
            .map(|s| s.trim().parse::<usize>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Invalid budget format")?;
        config.budgets = Budgets::from_slice(&budgets)?;
    }
    config.validate().context("Invalid configuration")?;

    let shape = config.optics.shape;
    let precision = config.optics.precision;
    let data = read_raw(&args.data, shape, precision)
        .with_context(|| format!("Failed to load {}", args.data.display()))?;
    let initial = match args.object {
        Some(ref path) => read_raw(path, shape, precision)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => data.clone(),
    };
    info!(%shape, %precision, path = %args.data.display(), "Data loaded");

    print_run_summary(&config, &args.data);

    let mut model = PsfModel::build(&config.optics, &config.model)
        .context("Failed to build the PSF model")?;
    let deconvolver = EdgePreservingDeconvolver::new(&data, config.deconvolution.clone())?;
    let mut estimator = ParameterEstimator::new(config.estimator.clone());
    estimator.set_data(&data)?;

    let mut blind = BlindDeconvolution::new(deconvolver, estimator, config.passes, config.budgets);
    let progress = BarProgress::new(config.passes, &config.budgets)?;
    let outcome = blind.blind_deconv(&mut model, initial, &progress)?;

    print_outcome(&outcome, &model);

    write_raw(&args.output, &outcome.object, precision)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("\nObject saved to {}", args.output.display());

    if let Some(ref path) = args.psf_output {
        write_raw(path, model.psf(), precision)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("PSF saved to {}", path.display());
    }

    Ok(())
}
