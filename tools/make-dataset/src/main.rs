//! 将 BraTS 格式的多模态 MRI 数据集转换为训练数据.
//!
//! ```text
//! make-dataset --out ~/dataset/brats-prepped --config prep.json -v
//! ```

mod result;
mod runner;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use mri_berry::prelude::*;

/// 源文件格式.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// `.nii` / `.nii.gz`
    Nifti,
    /// `.npy`
    Npy,
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Turn BraTS-style MRI cases into a training dataset"
)]
struct Cli {
    /// Dataset root (defaults to $BRATS_DIR, then ~/dataset/brats)
    #[arg(long, value_name = "DIR")]
    data: Option<PathBuf>,

    /// Output directory
    #[arg(long, value_name = "DIR")]
    out: PathBuf,

    /// JSON configuration file; every field is optional
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source volume format
    #[arg(long, value_enum, default_value_t = Format::Nifti)]
    format: Format,

    /// Do not move HGG/LGG cases into training/validation/testing
    #[arg(long)]
    no_organize: bool,

    /// Log and skip cases that fail instead of stopping at the first error
    #[arg(long)]
    skip_errors: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
        .context("failed to install logger")?;

    let data = match cli.data {
        Some(d) => d,
        None => data_dir_from_env_or_home().context("cannot determine dataset directory")?,
    };
    let config = match &cli.config {
        Some(path) => PrepConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => PrepConfig::default(),
    };
    let opts = runner::Options {
        data,
        out: cli.out,
        config,
        organize: !cli.no_organize,
        skip_errors: cli.skip_errors,
    };
    let report = match cli.format {
        Format::Nifti => runner::run(opts, NiftiReader, &[".nii", ".nii.gz"]),
        Format::Npy => runner::run(opts, NpyReader, &[".npy"]),
    }?;
    report.analyze();
    Ok(())
}
