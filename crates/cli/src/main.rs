//! HPC Resource Portal CLI
//!
//! A command-line tool for submitting and reviewing resource requests,
//! checking capacity, and inspecting the compute fleet.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::Requirements;
use commands::{capacity, fleet, requests};
use output::OutputFormat;

/// HPC Resource Portal CLI
#[derive(Parser)]
#[command(name = "portalctl")]
#[command(author, version, about = "CLI for the HPC Resource Portal", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via PORTAL_API_URL env var)
    #[arg(long, env = "PORTAL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit and review resource requests
    #[command(subcommand)]
    Requests(RequestCommands),

    /// Show total, granted and available capacity
    Capacity {
        /// Include a live fleet summary
        #[arg(long)]
        live: bool,
    },

    /// List granted allocations
    Allocations,

    /// Inspect the compute fleet
    #[command(subcommand)]
    Fleet(FleetCommands),

    /// List registered nodes
    Nodes,
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// List requests
    List {
        /// Filter by owner
        #[arg(long, short)]
        owner: Option<String>,

        /// Filter by state (pending, approved, rejected, cancelled)
        #[arg(long)]
        state: Option<String>,
    },

    /// Show one request
    Get {
        /// Request ID
        id: String,
    },

    /// Submit a new request
    Submit {
        /// Read the request body from a JSON file
        #[arg(long, conflicts_with_all = ["project", "owner"])]
        file: Option<String>,

        /// Project name
        #[arg(long, required_unless_present = "file")]
        project: Option<String>,

        /// Requesting user
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        organisation: Option<String>,

        /// Free-text description
        #[arg(long)]
        summary: Option<String>,

        /// Preferred runtime (defaults to kubernetes)
        #[arg(long)]
        runtime: Option<String>,

        /// Preferred container image
        #[arg(long)]
        image: Option<String>,

        /// Tag, may be repeated
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Deadline as YYYY-MM-DD
        #[arg(long)]
        deadline: Option<String>,

        #[arg(long, default_value_t = 0.0)]
        gpus: f64,

        #[arg(long, default_value_t = 0.0)]
        cpus: f64,

        #[arg(long, default_value_t = 0.0)]
        memory_gb: f64,

        #[arg(long, default_value_t = 0.0)]
        storage_tb: f64,
    },

    /// Approve a pending request
    Approve {
        /// Request ID
        id: String,
    },

    /// Cancel a pending request
    Cancel {
        /// Request ID
        id: String,
    },

    /// Reject a pending request
    Reject {
        /// Request ID
        id: String,

        /// Reason given to the requester
        #[arg(long)]
        reason: Option<String>,
    },

    /// Delete a request and its allocation
    Delete {
        /// Request ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum FleetCommands {
    /// Live resource snapshot of every node
    Snapshot,

    /// Container images across the fleet
    Images,
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let format = config.resolve_format(cli.format);
    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;

    match cli.command {
        Commands::Requests(cmd) => match cmd {
            RequestCommands::List { owner, state } => {
                let owner = owner.or_else(|| config.default_owner.clone());
                requests::list_requests(&client, owner, state, format).await?;
            }
            RequestCommands::Get { id } => {
                requests::get_request(&client, &id, format).await?;
            }
            RequestCommands::Submit {
                file,
                project,
                owner,
                organisation,
                summary,
                runtime,
                image,
                tags,
                deadline,
                gpus,
                cpus,
                memory_gb,
                storage_tb,
            } => {
                let owner = owner.or_else(|| config.default_owner.clone());
                let args = match (project, owner) {
                    (Some(project), Some(owner)) => Some(requests::SubmitArgs {
                        project,
                        owner,
                        organisation,
                        summary,
                        runtime,
                        image,
                        tags,
                        deadline,
                        requirements: Requirements {
                            gpu_count: gpus,
                            cpu_cores: cpus,
                            memory_gb,
                            storage_tb,
                        },
                    }),
                    _ => None,
                };
                requests::submit_request(&client, args, file, format).await?;
            }
            RequestCommands::Approve { id } => {
                requests::approve_request(&client, &id, format).await?;
            }
            RequestCommands::Cancel { id } => {
                requests::cancel_request(&client, &id, format).await?;
            }
            RequestCommands::Reject { id, reason } => {
                requests::reject_request(&client, &id, reason, format).await?;
            }
            RequestCommands::Delete { id } => {
                requests::delete_request(&client, &id).await?;
            }
        },
        Commands::Capacity { live } => {
            capacity::show_capacity(&client, live, format).await?;
        }
        Commands::Allocations => {
            capacity::list_allocations(&client, format).await?;
        }
        Commands::Fleet(cmd) => match cmd {
            FleetCommands::Snapshot => fleet::show_snapshot(&client, format).await?,
            FleetCommands::Images => fleet::show_images(&client, format).await?,
        },
        Commands::Nodes => {
            fleet::list_nodes(&client, format).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
