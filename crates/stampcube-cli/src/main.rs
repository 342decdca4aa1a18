mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stampcube", about = "Postage-stamp cubes and differential photometry")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace) or a tracing filter
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for parallel stages (default: all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the contents of a stamp store
    Info(commands::info::InfoArgs),
    /// Subtract the sky background from every frame
    Subtract(commands::subtract::SubtractArgs),
    /// Cut stamps for catalog sources into a stamp store
    Stamps(commands::stamps::StampsArgs),
    /// Compute differential-photometry variance
    Variance(commands::variance::VarianceArgs),
    /// Rank similar sources for each target
    Similar(commands::similar::SimilarArgs),
    /// Run the full pipeline
    Run(commands::run::RunArgs),
    /// Generate a default pipeline config file
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Subtract(args) => commands::subtract::run(args),
        Commands::Stamps(args) => commands::stamps::run(args),
        Commands::Variance(args) => commands::variance::run(args),
        Commands::Similar(args) => commands::similar::run(args),
        Commands::Run(args) => commands::run::run(args, cli.verbose),
        Commands::Config(args) => commands::config::run(args),
    }
}
