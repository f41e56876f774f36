mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aperture", about = "Blind deconvolution of widefield microscopy volumes")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or save the default configuration
    Config(commands::config::ConfigArgs),
    /// Synthesize the configured PSF
    Psf(commands::psf::PsfArgs),
    /// Blur an object volume with the configured PSF
    Simulate(commands::simulate::SimulateArgs),
    /// Run blind deconvolution on a raw volume
    Run(commands::run::RunArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Config(args) => commands::config::run(args),
        Commands::Psf(args) => commands::psf::run(args),
        Commands::Simulate(args) => commands::simulate::run(args),
        Commands::Run(args) => commands::run::run(args),
    }
}
