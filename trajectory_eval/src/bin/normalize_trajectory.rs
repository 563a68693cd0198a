use std::path::PathBuf;
use std::process;

use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, info};
use trajectory_eval::io::{load_normalized, write_canonical};
use trajectory_eval::parse::SourceLayout;
use trajectory_eval::{CsvSchema, TimestampUnit};

fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format(|buf, record| {
            use std::io::Write;
            let level = match record.level() {
                log::Level::Error => "\x1b[31mERROR\x1b[0m",
                log::Level::Warn => "\x1b[33mWARN\x1b[0m",
                log::Level::Info => "\x1b[32mINFO\x1b[0m",
                log::Level::Debug => "\x1b[34mDEBUG\x1b[0m",
                log::Level::Trace => "\x1b[36mTRACE\x1b[0m",
            };
            writeln!(buf, "[{}] [{}] {}", buf.timestamp_millis(), level, record.args())
        })
        .init();

    let args = Args::parse();

    let layout = if args.euroc_csv {
        SourceLayout::Csv(CsvSchema::euroc_ground_truth())
    } else {
        SourceLayout::Tum
    };

    let report = match load_normalized(&args.input, &layout, args.unit) {
        Ok(report) => report,
        Err(e) => {
            error!("[Normalizer] {:#}", e);
            process::exit(1);
        }
    };

    if report.trajectory.is_empty() {
        error!("[Normalizer] no valid poses in {}", args.input.display());
        process::exit(1);
    }

    if let Err(e) = write_canonical(&args.output, &report.trajectory) {
        error!("[Normalizer] {:#}", e);
        process::exit(1);
    }

    info!(
        "[Normalizer] wrote {} poses to {} ({} rows dropped, unit hint: {})",
        report.trajectory.len(),
        args.output.display(),
        report.dropped,
        args.unit
    );
}

#[derive(Parser, Debug)]
#[command(name = "normalize_trajectory")]
#[command(about = "Rewrite a trajectory or ground-truth log as `timestamp tx ty tz qx qy qz qw` in seconds")]
struct Args {
    /// Raw trajectory or ground-truth file
    input: PathBuf,

    /// Destination of the canonical trajectory
    output: PathBuf,

    /// Timestamp unit of the input (auto, s, ms, us, ns)
    #[arg(long, default_value = "auto")]
    unit: TimestampUnit,

    /// Read the input as an EuRoC-style CSV log instead of TUM columns
    #[arg(long)]
    euroc_csv: bool,
}
