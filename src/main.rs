//! # Outreach — cadence-based outbound message dispatcher
//!
//! One binary, three jobs:
//!   outreach serve                 # run the HTTP gateway
//!   outreach dispatch [--limit N]  # process one batch of due jobs and exit
//!   outreach schedule ...          # create a campaign from the command line
//!
//! `dispatch` is designed to be called from cron; overlapping invocations
//! coordinate through the store and never double-send.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use outreach_core::config::OutreachConfig;
use outreach_core::types::{CustomInterval, IntervalUnit};
use outreach_dispatch::{CampaignRequest, Dispatcher};
use outreach_store::JobStore;

#[derive(Parser)]
#[command(
    name = "outreach",
    version,
    about = "📧 Outreach — cadence-based message scheduling and delivery"
)]
struct Cli {
    /// Config file path (default: ~/.outreach/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway server
    Serve,

    /// Process one batch of due jobs and print the summary as JSON
    Dispatch {
        /// Override the configured batch size
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Create a campaign
    Schedule {
        /// Campaign id (generated when omitted)
        #[arg(long)]
        campaign_id: Option<String>,

        /// Recipient address
        #[arg(long)]
        recipient: String,

        #[arg(long)]
        subject: String,

        /// Message body (HTML); use @path to read from a file
        #[arg(long)]
        body: String,

        /// Cadence: single, weekly, biweekly, monthly, every_other_month,
        /// quarterly, or custom
        #[arg(long, default_value = "single")]
        cadence: String,

        /// Interval count for a custom cadence ("every N units")
        #[arg(long)]
        every: Option<u32>,

        /// Interval unit for a custom cadence: days, weeks, or months
        #[arg(long)]
        unit: Option<String>,

        /// First send time, RFC 3339 (default: now)
        #[arg(long)]
        at: Option<String>,

        /// Materialize this many occurrences up front instead of one
        #[arg(long)]
        occurrences: Option<u32>,
    },

    /// Cancel a campaign's remaining pending jobs
    Cancel {
        campaign_id: String,
    },

    /// List a campaign's jobs as JSON
    Jobs {
        campaign_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "outreach=debug,tower_http=debug"
    } else {
        "outreach=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let mut c = OutreachConfig::load_from(std::path::Path::new(path))?;
            c.apply_env();
            c
        }
        None => OutreachConfig::load()?,
    };

    match cli.command {
        Command::Serve => outreach_gateway::start(&config).await,

        Command::Dispatch { limit } => {
            let store = Arc::new(JobStore::open(&config.store.resolved_path())?);
            let provider = outreach_providers::select_provider(&config)?;
            let dispatcher = Dispatcher::new(store, provider, config.dispatcher.clone());
            let summary = dispatcher.run_once(limit).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }

        Command::Schedule {
            campaign_id,
            recipient,
            subject,
            body,
            cadence,
            every,
            unit,
            at,
            occurrences,
        } => {
            let content = match body.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)?,
                None => body,
            };
            let scheduled_at: DateTime<Utc> = match at {
                Some(s) => s.parse()?,
                None => Utc::now(),
            };
            let cadence_data = match (every, unit.as_deref()) {
                (Some(n), Some(unit)) => {
                    let unit = match unit {
                        "days" => IntervalUnit::Days,
                        "weeks" => IntervalUnit::Weeks,
                        "months" => IntervalUnit::Months,
                        other => anyhow::bail!("unknown interval unit '{other}'"),
                    };
                    Some(CustomInterval { n, unit })
                }
                (None, None) => None,
                _ => anyhow::bail!("--every and --unit must be given together"),
            };

            let store = JobStore::open(&config.store.resolved_path())?;
            let scheduled = outreach_dispatch::schedule_campaign(
                &store,
                config.dispatcher.max_attempts,
                CampaignRequest {
                    campaign_id,
                    client_id: None,
                    recipient,
                    subject,
                    content,
                    cadence_type: cadence,
                    cadence_data,
                    scheduled_at,
                    occurrences,
                    max_attempts: None,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&scheduled)?);
            Ok(())
        }

        Command::Cancel { campaign_id } => {
            let store = JobStore::open(&config.store.resolved_path())?;
            let cancelled = store.cancel_campaign(&campaign_id)?;
            println!("Cancelled {cancelled} pending job(s) in campaign {campaign_id}");
            Ok(())
        }

        Command::Jobs { campaign_id } => {
            let store = JobStore::open(&config.store.resolved_path())?;
            let jobs = store.jobs_for_campaign(&campaign_id)?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
    }
}
