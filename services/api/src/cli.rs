use crate::demo::{run_demo, DemoArgs};
use crate::infra::{open_service, parse_date};
use crate::server;
use campus_booking::config::AppConfig;
use campus_booking::error::AppError;
use campus_booking::ids::UnitId;
use campus_booking::telemetry;
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Campus Booking",
    about = "Run and administer the university visit booking service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run the scheduled jobs outside the server
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Work with stored visits
    Visits {
        #[command(subcommand)]
        command: VisitsCommand,
    },
    /// Seed a sample faculty, book a visit and print the overview
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum JobsCommand {
    /// Run every due job, or one job by code, then deliver queued mail
    Run(JobRunArgs),
    /// List the known jobs and their last runs
    List(StateArgs),
}

#[derive(Subcommand, Debug)]
enum VisitsCommand {
    /// Write the visit list as CSV
    Export(ExportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the configured snapshot file
    #[arg(long)]
    pub(crate) state: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct StateArgs {
    /// Snapshot file to load and update
    #[arg(long)]
    pub(crate) state: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct JobRunArgs {
    /// Job code to force, regardless of its schedule
    #[arg(long)]
    pub(crate) job: Option<String>,
    /// Snapshot file to load and update
    #[arg(long)]
    pub(crate) state: Option<PathBuf>,
    /// Pretend the jobs run at 06:00 UTC on this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct ExportArgs {
    /// Snapshot file to read
    #[arg(long)]
    pub(crate) state: Option<PathBuf>,
    /// Only export visits of this unit and the units below it
    #[arg(long)]
    pub(crate) unit: Option<u64>,
    /// Output file; stdout when omitted
    #[arg(long)]
    pub(crate) out: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Jobs {
            command: JobsCommand::Run(args),
        } => run_jobs(args).await,
        Command::Jobs {
            command: JobsCommand::List(args),
        } => list_jobs(args),
        Command::Visits {
            command: VisitsCommand::Export(args),
        } => export_visits(args),
        Command::Demo(args) => run_demo(args).await,
    }
}

async fn run_jobs(args: JobRunArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let (service, state_path) = open_service(&config, args.state)?;

    let now = match args.today {
        Some(date) => date.and_time(NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN)).and_utc(),
        None => Utc::now(),
    };
    let runs = match args.job.as_deref() {
        Some(code) => vec![service.run_job(code, now)?],
        None => service.run_due_jobs(now),
    };
    let report = service.dispatch_pending().await;
    if let Some(path) = &state_path {
        service.save_snapshot(path)?;
    }

    for run in &runs {
        let outcome = if run.success { "ok" } else { "FAILED" };
        println!("{:<26} {:<6} {:>4}  {}", run.code, outcome, run.affected, run.message);
    }
    println!("mail: {} sent, {} failed", report.sent, report.failed);
    Ok(())
}

fn list_jobs(args: StateArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let (service, _) = open_service(&config, args.state)?;
    for (code, description) in service.job_codes() {
        let last = service.read(|store| {
            store
                .last_run(code)
                .map(|run| run.started_at.format("%Y-%m-%d %H:%M").to_string())
        });
        println!(
            "{:<26} {:<18} {}",
            code,
            last.unwrap_or_else(|| "never".to_string()),
            description
        );
    }
    Ok(())
}

fn export_visits(args: ExportArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let (service, _) = open_service(&config, args.state)?;
    let unit = args.unit.map(UnitId);
    let rows = match args.out {
        Some(path) => {
            let file = std::fs::File::create(&path)?;
            service.read(|store| store.export_visits_csv(file, unit))?
        }
        None => service.read(|store| store.export_visits_csv(std::io::stdout().lock(), unit))?,
    };
    eprintln!("exported {rows} visits");
    Ok(())
}
