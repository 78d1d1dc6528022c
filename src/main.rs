//! `lab_scheduler` command line.
//!
//! ```bash
//! lab_scheduler demo-plan --rounds 3 > plan.json
//! lab_scheduler check plan.json --config lab.toml
//! lab_scheduler run plan.json --config lab.toml
//! ```

use anyhow::{bail, Context};
use chrono::{NaiveDateTime, TimeDelta};
use clap::{Args, Parser, Subcommand};
use lab_scheduler::experiment::{check, ensure_feasible, imaging_rounds, Executor, Overlap, Plan};
use lab_scheduler::{Clock, Settings, SystemClock};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "lab_scheduler", about = "Resource-aware lab instrument scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a plan, then execute it against the configured instruments
    Run(RunArgs),
    /// Report resource conflicts in a plan without executing it
    Check(CheckArgs),
    /// Print the imaging rounds reference plan as JSON
    DemoPlan(DemoArgs),
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// Plan file (JSON array of commands)
    plan: PathBuf,
    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON-lines timing log to learn arm program durations from
    #[arg(long)]
    timing_log: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    plan: PlanArgs,
    /// Execute even if the plan has resource conflicts
    #[arg(long)]
    no_check: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[command(flatten)]
    plan: PlanArgs,
}

#[derive(Debug, Args)]
struct DemoArgs {
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=1000))]
    rounds: u32,
    /// Minutes between rounds
    #[arg(long, default_value_t = 30)]
    spacing_min: i64,
    #[arg(long, default_value = "protocols/cell_paint.hts")]
    hts: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Check(args) => {
            let (settings, plan) = prepare(&args.plan)?;
            let overlaps = check(&plan, &settings.estimates, now());
            report_overlaps(&overlaps);
            if overlaps.is_empty() {
                println!("plan is feasible ({} commands)", plan.len());
                Ok(())
            } else {
                bail!("plan is infeasible: {} overlap(s)", overlaps.len())
            }
        }
        Command::DemoPlan(args) => {
            let spacing = TimeDelta::try_minutes(args.spacing_min)
                .with_context(|| format!("--spacing-min {} is out of range", args.spacing_min))?;
            let plan = imaging_rounds(now(), args.rounds, spacing, &args.hts)?;
            println!("{}", plan.to_json_pretty()?);
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let (settings, plan) = prepare(&args.plan)?;

    let overlaps = check(&plan, &settings.estimates, now());
    if args.no_check {
        if !overlaps.is_empty() {
            warn!(overlaps = overlaps.len(), "running infeasible plan (--no-check)");
        }
    } else {
        report_overlaps(&overlaps);
        ensure_feasible(&overlaps)?;
    }

    let executor = Executor::from_settings(&settings)?;
    let cancel = executor.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling plan");
            cancel.cancel();
        }
    });

    match executor.run(&plan).await {
        Ok(report) => {
            info!(run_uid = %report.run_uid, elapsed = ?report.elapsed, "run finished");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!(index = e.index, kind = ?e.kind(), "{e}");
            Err(e.into())
        }
    }
}

/// Load settings, start logging and read the plan.
fn prepare(args: &PlanArgs) -> anyhow::Result<(Settings, Plan)> {
    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    init_tracing(&settings.log_level);

    if let Some(path) = &args.timing_log {
        let file = File::open(path)
            .with_context(|| format!("opening timing log {}", path.display()))?;
        let learned = settings.estimates.learn_programs(BufReader::new(file))?;
        info!(learned, path = %path.display(), "learned arm program durations");
    }

    let plan = read_plan(&args.plan)?;
    for (index, command) in plan.iter().enumerate() {
        command
            .validate()
            .with_context(|| format!("command {index} in {}", args.plan.display()))?;
    }
    info!(commands = plan.len(), path = %args.plan.display(), "loaded plan");
    Ok((settings, plan))
}

fn read_plan(path: &Path) -> anyhow::Result<Plan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan {}", path.display()))?;
    Ok(Plan::from_json(&text)?)
}

fn report_overlaps(overlaps: &[Overlap]) {
    for o in overlaps {
        println!(
            "{}: #{} {} [{:.0}s, {:.0}s] overlaps #{} {} [{:.0}s, {:.0}s]",
            o.resource,
            o.first.index,
            o.first.command,
            o.first.begin,
            o.first.end,
            o.second.index,
            o.second.command,
            o.second.begin,
            o.second.end,
        );
    }
}

fn init_tracing(level: &str) {
    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn now() -> NaiveDateTime {
    SystemClock::new().now_wall()
}
