use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use iaga2mseed::{
    convert_direct, convert_incremental, default_output_path, ConvertConfig, DEFAULT_NETWORK,
};

#[derive(Parser)]
#[command(name = "iaga2mseed", about = "Convert IAGA2002 files to miniSEED", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write all channels of one IAGA2002 file into a single miniSEED file
    #[command(name = "convert-direct")]
    Direct {
        /// IAGA2002 file to convert
        filename: PathBuf,
        /// Output file (default: <filename>.mseed)
        #[arg(long)]
        output: Option<PathBuf>,
        /// SEED network code
        #[arg(long, default_value = DEFAULT_NETWORK)]
        network: String,
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Append only the new samples of each channel to an archive directory
    #[command(name = "convert-incremental")]
    Incremental {
        /// IAGA2002 file to convert
        filename: PathBuf,
        /// Archive directory (default: current directory)
        #[arg(long, default_value = ".")]
        directory: PathBuf,
        /// SEED network code
        #[arg(long, default_value = DEFAULT_NETWORK)]
        network: String,
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Direct {
            filename,
            output,
            network,
            verbose,
        } => {
            init_logging(verbose);
            let output = output.unwrap_or_else(|| default_output_path(&filename));
            let config = ConvertConfig {
                network,
                ..ConvertConfig::default()
            };
            let summary = convert_direct(&filename, &output, &config)
                .with_context(|| format!("converting {}", filename.display()))?;
            println!(
                "wrote {} records for {} channels to {}",
                summary.records_written,
                summary.channels.len(),
                summary.output.display()
            );
        }
        Command::Incremental {
            filename,
            directory,
            network,
            verbose,
        } => {
            init_logging(verbose);
            let config = ConvertConfig {
                network,
                ..ConvertConfig::default()
            };
            let report = convert_incremental(&filename, &directory, &config)
                .with_context(|| format!("converting {}", filename.display()))?;
            println!("appended {} new samples", report.samples_appended());
            if !report.is_complete() {
                for outcome in report.failures() {
                    if let Err(e) = &outcome.result {
                        eprintln!("{}: {}", outcome.identity, e);
                    }
                }
                bail!("some channels failed to update");
            }
        }
    }
    Ok(())
}
