use std::path::PathBuf;
use std::process;

use clap::Parser;
use env_logger::{Builder, Env};
use hdr_vo_bench::config::BackendKind;
use hdr_vo_bench::{BatchRunner, Collaborators, Config, Overrides, VariantKind};
use log::{error, info};

fn main() {
    // Initialize logger for immediate colored output
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

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("[Main] {:#}", e);
                process::exit(2);
            }
        },
        None => Config::default(),
    };
    config.apply(args.overrides());

    let collaborators = Collaborators::from_config(&config);
    let runner = BatchRunner::new(config, collaborators);

    match runner.run() {
        Ok(report) => {
            info!(
                "[Main] batch finished: {} result rows, tables in {:?}",
                report.table.len(),
                report.tables
            );
            process::exit(0);
        }
        Err(e) => {
            error!("[Main] batch aborted: {}", e);
            process::exit(if e.is_fatal() { 2 } else { 1 });
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "run_benchmark")]
#[command(about = "Run every pre-processing variant through the VO engine and tabulate trajectory errors")]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(long, env = "VOBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Root of the TUM RGB-D sequences
    #[arg(long, env = "VOBENCH_TUM_ROOT")]
    tum_root: Option<PathBuf>,

    /// TUM sequences to run, comma separated (default: all)
    #[arg(long, env = "VOBENCH_TUM_SEQUENCES", value_delimiter = ',')]
    tum_sequences: Vec<String>,

    /// Root of the EuRoC MAV sequences
    #[arg(long, env = "VOBENCH_EUROC_ROOT")]
    euroc_root: Option<PathBuf>,

    /// EuRoC sequences to run, comma separated (default: all)
    #[arg(long, env = "VOBENCH_EUROC_SEQUENCES", value_delimiter = ',')]
    euroc_sequences: Vec<String>,

    /// VO engine install root
    #[arg(long, env = "VOBENCH_ENGINE_ROOT")]
    engine_root: Option<PathBuf>,

    /// Output directory for trajectories, metrics and tables
    #[arg(long, env = "VOBENCH_RESULTS_ROOT")]
    results_root: Option<PathBuf>,

    /// Variants to run, comma separated (baseline, clahe, reinhard, mertens, proposed)
    #[arg(long, env = "VOBENCH_VARIANTS", value_delimiter = ',')]
    variants: Vec<VariantKind>,

    /// Re-run transforms over already populated shadow sequences
    #[arg(long, env = "VOBENCH_OVERWRITE")]
    overwrite: bool,

    /// Maximum timestamp difference for time association (s)
    #[arg(long, env = "VOBENCH_T_MAX_DIFF")]
    t_max_diff: Option<f64>,

    /// Pose-count step of the local-consistency metric
    #[arg(long, env = "VOBENCH_RPE_DELTA")]
    rpe_delta: Option<usize>,

    /// Wall-clock limit per engine run (s)
    #[arg(long, env = "VOBENCH_ENGINE_TIMEOUT")]
    engine_timeout: Option<u64>,

    /// Evaluator backend (native or command)
    #[arg(long, env = "VOBENCH_EVALUATOR")]
    evaluator: Option<BackendKind>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            tum_root: self.tum_root.clone(),
            tum_sequences: self.tum_sequences.clone(),
            euroc_root: self.euroc_root.clone(),
            euroc_sequences: self.euroc_sequences.clone(),
            engine_root: self.engine_root.clone(),
            results_root: self.results_root.clone(),
            variants: self.variants.clone(),
            overwrite: self.overwrite,
            t_max_diff: self.t_max_diff,
            rpe_delta: self.rpe_delta,
            engine_timeout_secs: self.engine_timeout,
            backend: self.evaluator,
        }
    }
}
