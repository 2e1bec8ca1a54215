//! Operator CLI for the lead pipeline
//!
//! Inspects dead-lettered jobs and leads, replays jobs and restarts stuck
//! leads. Outputs JSON so results can be piped into jq.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use outreach_core::common::LeadId;
use outreach_core::config::Config;
use outreach_core::domains::leads::actions::{requeue_lead, RequeueOutcome};
use outreach_core::domains::leads::{LeadStore, PostgresLeadStore, ALL_QUEUES};
use outreach_core::kernel::jobs::{Job, JobQueue, PostgresJobQueue};
use serde::Serialize;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pipeline_cli")]
#[command(about = "Operator tooling for the lead outreach pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List dead-lettered jobs, newest first
    FailedJobs {
        /// Only this queue (default: every pipeline queue)
        #[arg(long)]
        queue: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show a lead with its outputs and jobs
    Lead {
        /// Lead id or domain
        lead: String,
    },

    /// Put a dead-lettered job back on its queue
    Replay { job_id: Uuid },

    /// Enqueue the stage that would move a lead forward
    RequeueLead { lead_id: LeadId },

    /// Apply retention to every pipeline queue now
    Prune,

    /// Delete a lead and everything it owns
    DeleteLead {
        domain: String,
        /// Required; deletion cannot be undone
        #[arg(long)]
        yes: bool,
    },
}

fn output(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let queue = PostgresJobQueue::new(pool.clone());
    let store = PostgresLeadStore::new(pool.clone());

    let result = run(cli.command, &queue, &store).await;
    pool.close().await;
    result
}

async fn run(command: Commands, queue: &PostgresJobQueue, store: &PostgresLeadStore) -> Result<()> {
    match command {
        Commands::FailedJobs {
            queue: only,
            limit,
        } => {
            let queues: Vec<&str> = match only.as_deref() {
                Some(name) => vec![name],
                None => ALL_QUEUES.to_vec(),
            };
            let mut jobs: Vec<Job> = Vec::new();
            for name in queues {
                jobs.extend(queue.dead_letters(name, limit).await?);
            }
            jobs.sort_by(|a, b| b.dead_lettered_at.cmp(&a.dead_lettered_at));
            jobs.truncate(limit.max(0) as usize);
            output(&jobs)
        }

        Commands::Lead { lead } => {
            let found = match LeadId::parse(&lead) {
                Ok(id) => store.find_lead(id).await?,
                Err(_) => store.find_lead_by_domain(&lead).await?,
            };
            let Some(found) = found else {
                bail!("lead {} not found", lead);
            };

            let detail = store.lead_detail(found.id).await?;
            let jobs = Job::find_by_reference(found.id.into_uuid(), queue.pool()).await?;
            output(&json!({ "lead": detail, "jobs": jobs }))
        }

        Commands::Replay { job_id } => {
            if !queue.replay(job_id).await? {
                bail!("job {} is not dead-lettered", job_id);
            }
            output(&json!({ "replayed": job_id }))
        }

        Commands::RequeueLead { lead_id } => match requeue_lead(lead_id, store, queue).await? {
            RequeueOutcome::NotFound => bail!("lead {} not found", lead_id),
            RequeueOutcome::Finished { status } => {
                bail!("lead {} is {} and has no stage left to run", lead_id, status)
            }
            RequeueOutcome::Enqueued { stage, result } => output(&json!({
                "lead_id": lead_id,
                "stage": stage,
                "job_id": result.job_id(),
                "created": result.is_created(),
            })),
        },

        Commands::Prune => {
            let mut reports = serde_json::Map::new();
            for name in ALL_QUEUES {
                let retention = queue.policy(name).retention;
                let report = queue.prune(name, &retention).await?;
                reports.insert(name.to_string(), serde_json::to_value(report)?);
            }
            output(&reports)
        }

        Commands::DeleteLead { domain, yes } => {
            if !yes {
                bail!("refusing to delete {} without --yes", domain);
            }
            if !store.delete_lead(&domain).await? {
                bail!("lead {} not found", domain);
            }
            output(&json!({ "deleted": domain }))
        }
    }
}
