//! Production line simulation application.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;

use linesim::{BreakdownPolicy, Line, LineBuilder, LineConfig, RepairModel, RunReport};

/// Runs production line simulation.
#[derive(Parser)]
#[command(version)]
struct Opt {
    /// Path to the line configuration in YAML format.
    #[arg(long)]
    config: PathBuf,

    /// Simulated time in hours.
    #[arg(long)]
    horizon: f64,

    /// Number of machines of each stage, comma-separated.
    /// Overrides the counts in the configuration.
    #[arg(long, value_delimiter = ',')]
    machines: Vec<usize>,

    /// Seed of the random number generator. Overrides the seed in the configuration.
    #[arg(long)]
    seed: Option<u64>,

    /// Breakdown trigger: `timer` or `operating_hours`.
    #[arg(long)]
    breakdown_policy: Option<BreakdownPolicy>,

    /// Repair duration model: `log_normal`, `log_of_log_normal`, or `raw_log_normal`.
    #[arg(long)]
    repair_model: Option<RepairModel>,

    /// Verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Store the logs this file.
    #[arg(long)]
    log_output: Option<PathBuf>,

    /// Do not log to the stderr.
    #[arg(long)]
    no_stderr: bool,

    /// Print the full report in JSON format instead of the summary.
    #[arg(long)]
    json: bool,
}

impl Opt {
    /// Loads the configuration file and applies the overrides passed in the command line.
    fn line_config(&self) -> eyre::Result<LineConfig> {
        let file = File::open(&self.config).wrap_err_with(|| {
            format!("unable to open line config: {}", self.config.display())
        })?;
        let mut config = LineConfig::from_yaml(BufReader::new(file))
            .wrap_err_with(|| format!("invalid line config: {}", self.config.display()))?;
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(policy) = self.breakdown_policy {
            config.breakdown_policy = policy;
        }
        if let Some(model) = self.repair_model {
            config.repair_model = model;
        }
        Ok(config)
    }

    fn build(&self) -> eyre::Result<Line> {
        let mut builder = LineBuilder::new(self.line_config()?);
        if !self.machines.is_empty() {
            builder = builder.machine_counts(&self.machines);
        }
        builder.build().wrap_err("unable to build the line")
    }
}

fn check_horizon(horizon: f64) -> eyre::Result<()> {
    eyre::ensure!(
        horizon.is_finite() && horizon >= 0.0,
        "horizon must be a finite non-negative number of hours, got {}",
        horizon
    );
    Ok(())
}

/// Runs the line hour by hour up to `horizon`, showing the progress.
fn run_with_progress(line: &mut Line, horizon: f64) -> eyre::Result<()> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let hours = horizon.ceil().max(0.0) as u64;
    let pb = ProgressBar::new(hours)
        .with_style(ProgressStyle::default_bar().template("{msg} {wide_bar} {percent}%"));
    let last = line.buffers().len() - 1;
    for hour in 1..=hours {
        #[allow(clippy::cast_precision_loss)]
        let until = (hour as f64).min(horizon);
        line.run(until)?;
        let arrivals = line.arrivals();
        pb.set_position(hour);
        pb.set_message(&format!(
            "[{time}h] [A={arrived}] [F={finished}] [S={stored}]",
            time = until,
            arrived = arrivals.arrived.round(),
            finished = line.finished(last - 1).round(),
            stored = line.buffer(line.buffers()[last])?.level().round(),
        ));
    }
    if line.time() < horizon {
        line.run(horizon)?;
    }
    pb.finish();
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("Simulated {} hours", report.horizon);
    println!(
        "Arrivals: {} deliveries, {:.1} units",
        report.arrivals.deliveries, report.arrivals.arrived
    );
    println!(
        "{:<20} {:>8} {:>14} {:>10}",
        "stage", "machines", "finished", "breakdowns"
    );
    println!(
        "{}",
        report
            .stages
            .iter()
            .map(|s| format!(
                "{:<20} {:>8} {:>14.1} {:>10}",
                s.name, s.machines, s.finished, s.breakdowns
            ))
            .join("\n")
    );
    println!(
        "Buffer levels: {}",
        report
            .buffers
            .iter()
            .map(|b| format!("{}={:.1}", b.name, b.level))
            .join(", ")
    );
}

/// Set up a logger based on the given user options.
fn set_up_logger(opt: &Opt) -> Result<(), fern::InitError> {
    let log_level = match opt.verbose {
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        3 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    };
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log_level);
    let dispatch = if let Some(path) = &opt.log_output {
        dispatch.chain(
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
        )
    } else {
        dispatch
    };
    let dispatch = if opt.no_stderr {
        dispatch
    } else {
        dispatch.chain(std::io::stderr())
    };
    dispatch.apply()?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    set_up_logger(&opt)?;
    check_horizon(opt.horizon)?;
    let mut line = opt.build()?;
    run_with_progress(&mut line, opt.horizon)?;
    let report = line.report();
    if opt.json {
        serde_json::to_writer_pretty(std::io::stdout(), &report)
            .wrap_err("unable to write the report")?;
        println!();
    } else {
        print_summary(&report);
    }
    Ok(())
}
