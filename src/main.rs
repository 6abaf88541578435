use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use hcs_ngff::convert::{ConvertOptions, convert};
use hcs_ngff::format::OutputFormat;

/// Convert a high-content-screening plate export to OME-Zarr.
#[derive(Parser, Debug)]
#[command(name = "hcs2ngff")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Experiment index file (`experiment.db`).
    input: PathBuf,

    /// Output directory.
    output: PathBuf,

    /// Directory that receives a copy of the output.
    #[arg(long)]
    altoutput: Option<PathBuf>,

    /// Output format: omezarr2, omezarr3 or ometiff.
    #[arg(short, long, default_value = "omezarr2", value_parser = parse_format)]
    format: OutputFormat,

    /// JSON file with conversion options (chunking, compression, pyramid, overlap policy).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log experiment details and the well matrix.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn parse_format(token: &str) -> Result<OutputFormat, String> {
    token.parse().map_err(|e: hcs_ngff::Error| e.to_string())
}

fn run(args: Args) -> hcs_ngff::Result<String> {
    let mut options = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => ConvertOptions::default(),
    };
    options.format = args.format;
    options.verbose |= args.verbose;
    if args.altoutput.is_some() {
        options.alt_output = args.altoutput;
    }
    let result = convert(&args.input, &args.output, &options)?;
    Ok(serde_json::to_string(&result)?)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(result) => {
            println!("{result}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("conversion failed: {e}");
            ExitCode::FAILURE
        }
    }
}
