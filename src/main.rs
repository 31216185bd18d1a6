// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use holo_build::{build, package, OutputFormat};
use std::io::Read;
use std::path::Path;
use tracing::debug;

#[derive(Parser)]
#[command(name = "holo-build")]
#[command(author, version, about = "Build Holo-style system packages from declarative descriptions", long_about = None)]
struct Cli {
    /// Package declaration file ("-" reads from standard input)
    #[arg(default_value = "-")]
    input: String,

    /// Target package format
    #[arg(short, long, value_enum)]
    format: OutputFormat,

    /// Write the package to standard output instead of a file in the
    /// working directory
    #[arg(long)]
    stdout: bool,

    /// Produce byte-for-byte reproducible output (no timestamps, no tool
    /// version banners)
    #[arg(long)]
    reproducible: bool,

    /// Print the file name the package would be written to, without
    /// building it
    #[arg(long)]
    suggest_filename: bool,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut pkg = if cli.input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("cannot read package declaration from standard input")?;
        package::parse_package(&text)?
    } else {
        package::load_package(Path::new(&cli.input))?
    };
    debug!("loaded declaration for package {}", pkg.name);

    let generator = cli.format.generator();
    if cli.suggest_filename {
        println!("{}", generator.recommended_file_name(&pkg));
        return Ok(());
    }
    build::build_package(&mut pkg, generator.as_ref(), cli.stdout, cli.reproducible)?;
    Ok(())
}
