use clap::Parser;
use colored::*;
use itertools::Itertools;
use tracing_subscriber::EnvFilter;

use rsched_rpc::{Command, Config, Job, JobStatus, RpcError, RpcScheduler};

fn print_job(job: &Job) {
    let status = match job.status {
        JobStatus::Running => "running".green(),
        JobStatus::Paused => "paused".yellow(),
        JobStatus::Unknown => "unknown".dimmed(),
    };
    let details = [
        job.pipeline.as_deref().map(|p| format!("pipeline={}", p)),
        job.interval.as_deref().map(|i| format!("interval={}", i)),
        job.next_run_time.as_deref().map(|t| format!("next_run={}", t)),
    ]
    .into_iter()
    .flatten()
    .join(" ");
    println!("{} [{}] {}", job.id.bold(), status, details);
}

async fn run(cli: &Config) -> Result<(), RpcError> {
    let config = cli.client_config()?;
    let mut scheduler = RpcScheduler::new(config)?;
    scheduler.connect().await?;

    match &cli.command {
        Command::State => {
            let state = scheduler.state().await?;
            for (key, value) in &state {
                println!("{}: {}", key.bold(), value);
            }
        }
        Command::List => {
            let jobs = scheduler.list_jobs().await?;
            if jobs.is_empty() {
                eprintln!("[rsched] No jobs scheduled.");
            }
            jobs.iter().for_each(print_job);
        }
        Command::Get { job } => print_job(&scheduler.get_job(job.as_str()).await?),
        Command::Add { pipeline, interval } => {
            let job_id = scheduler.add_job(pipeline, interval).await?;
            println!("{}", job_id);
        }
        Command::Reschedule { job, interval } => {
            print_job(&scheduler.reschedule_job(job.as_str(), interval).await?)
        }
        Command::Start { job } => print_job(&scheduler.start_job(job.as_str()).await?),
        Command::Stop { job } => print_job(&scheduler.stop_job(job.as_str()).await?),
        Command::Remove { job } => {
            let job_id = scheduler.remove_job(job.as_str()).await?;
            println!("{}", job_id);
        }
    }

    scheduler.close().await
}

#[tokio::main]
async fn main() {
    let cli = Config::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("{} {}", "[rsched]".red(), e);
        std::process::exit(1);
    }
}
