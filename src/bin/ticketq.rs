//! ticketq CLI: operator and agent interface to the ticket store.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ticketq::config::Config;
use ticketq::db::Db;
use ticketq::engine::LeaseSweeper;
use ticketq::model::{
    Complexity, Filter, NewTicket, ReleaseOutcome, Resolution, Status, Ticket, TicketKey,
    WorkOrder, lease_minutes,
};
use ticketq::telemetry::{TelemetryConfig, init_telemetry};
use ticketq::{Error, ErrorKind};

#[derive(Parser)]
#[command(name = "ticketq", about = "Dependency-gated tickets with lease-based claims")]
struct Cli {
    /// Database file (overrides TICKETQ_DATABASE)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Project operations
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Ticket operations
    Ticket {
        #[command(subcommand)]
        action: TicketAction,
    },
    /// Dependency edges
    Dep {
        #[command(subcommand)]
        action: DepAction,
    },
    /// List tickets that can be claimed right now
    Workable {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        /// complexity | oldest | newest
        #[arg(long, default_value = "complexity")]
        order: WorkOrder,
        #[arg(long)]
        json: bool,
    },
    /// Claim a ticket
    Claim {
        key: TicketKey,
        #[arg(long, env = "TICKETQ_WORKER")]
        worker: String,
        /// Lease length; defaults to TICKETQ_LEASE_MINUTES
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Extend your claim on a ticket
    Renew {
        key: TicketKey,
        #[arg(long, env = "TICKETQ_WORKER")]
        worker: String,
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Give a claim back
    Release {
        key: TicketKey,
        /// complete | block | needs-human | return-to-ready | abandon
        outcome: String,
        /// Resolution for `complete` (default: completed)
        #[arg(long)]
        resolution: Option<Resolution>,
        #[arg(long, env = "TICKETQ_WORKER", required_unless_present = "force")]
        worker: Option<String>,
        /// Release whoever holds the claim
        #[arg(long)]
        force: bool,
    },
    /// Run one expiry sweep now
    Expire,
    /// List active claims
    Active {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show the activity log
    Log {
        #[arg(long)]
        ticket: Option<TicketKey>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Run the lease sweeper until interrupted
    Serve,
}

#[derive(Subcommand)]
enum ProjectAction {
    Create { key: String, name: String },
    List,
    Delete { key: String },
}

#[derive(Subcommand)]
enum TicketAction {
    Create {
        project: String,
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "medium")]
        complexity: Complexity,
        #[arg(long)]
        brain: Option<String>,
        /// Prerequisite ticket (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<TicketKey>,
    },
    Show {
        key: TicketKey,
        #[arg(long)]
        json: bool,
    },
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Administrative status change, still bound by the transition table
    Transition {
        key: TicketKey,
        status: Status,
        #[arg(long)]
        resolution: Option<Resolution>,
    },
}

#[derive(Subcommand)]
enum DepAction {
    /// TICKET cannot start before PREREQUISITE completes
    Add {
        ticket: TicketKey,
        prerequisite: TicketKey,
    },
    Remove {
        ticket: TicketKey,
        prerequisite: TicketKey,
    },
    /// Show prerequisites and dependents
    List { ticket: TicketKey },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code(&e)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    let kind = err.downcast_ref::<Error>().map(Error::kind);
    let code = match kind {
        Some(ErrorKind::InvalidArgument) => 2,
        Some(ErrorKind::NotFound) => 3,
        Some(ErrorKind::State) => 4,
        Some(ErrorKind::ConcurrentConflict) => {
            eprintln!("hint: another worker got there first; pick another ticket from `ticketq workable`");
            5
        }
        Some(ErrorKind::Cycle) => 6,
        _ => 1,
    };
    ExitCode::from(code)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(path) = cli.db {
        config.database = path;
    }

    // One-shot commands stay quiet on stderr unless asked otherwise.
    let log_level = match (&cli.command, std::env::var("LOG_LEVEL")) {
        (Command::Serve, _) | (_, Ok(_)) => config.log_level.clone(),
        _ => "warn".to_string(),
    };
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "ticketq".to_string(),
        log_level,
    })?;

    let db = Arc::new(Db::open_with(&config.store()).await?);
    db.migrate().await?;

    let result = dispatch(&db, &config, cli.command).await;
    db.close().await;
    result
}

async fn dispatch(db: &Arc<Db>, config: &Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Project { action } => cmd_project(db, action).await,
        Command::Ticket { action } => cmd_ticket(db, action).await,
        Command::Dep { action } => cmd_dep(db, action).await,
        Command::Workable {
            project,
            limit,
            order,
            json,
        } => {
            let filter = filter(project, None, limit);
            let tickets = db.list_workable(&filter, order).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tickets)?);
            } else {
                print_tickets(&tickets);
            }
            Ok(())
        }
        Command::Claim {
            key,
            worker,
            minutes,
        } => {
            let lease = lease(db, minutes)?;
            let claim = db.acquire(&key, &worker, lease).await?;
            println!(
                "Claimed {key} as {} until {} (claim {})",
                claim.worker_id,
                claim.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
                claim.id
            );
            Ok(())
        }
        Command::Renew {
            key,
            worker,
            minutes,
        } => {
            let extension = lease(db, minutes)?;
            let claim = db.renew(&key, &worker, extension).await?;
            println!(
                "Renewed {key} until {}",
                claim.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            Ok(())
        }
        Command::Release {
            key,
            outcome,
            resolution,
            worker,
            force,
        } => {
            let outcome = ReleaseOutcome::parse(&outcome, resolution)?;
            let ticket = match (force, worker) {
                (true, _) => db.force_release(&key, outcome).await?,
                (false, Some(worker)) => db.release(&key, &worker, outcome).await?,
                (false, None) => {
                    return Err(Error::InvalidArgument(
                        "--worker is required unless --force is given".to_string(),
                    )
                    .into());
                }
            };
            println!("Released {key}: {outcome}, now {}", status_line(&ticket));
            Ok(())
        }
        Command::Expire => {
            let report = db.expire(chrono::Utc::now()).await?;
            println!("Expired {} claim(s)", report.expired);
            for (key, err) in &report.errors {
                eprintln!("  {key}: {err}");
            }
            Ok(())
        }
        Command::Active { project, limit } => {
            let claims = db.list_active(&filter(project, None, limit)).await?;
            if claims.is_empty() {
                println!("No active claims.");
                return Ok(());
            }
            println!(
                "{:<12}  {:<10}  {:<20}  {:<20}  REMAINING",
                "TICKET", "STATUS", "WORKER", "EXPIRES"
            );
            println!("{}", "-".repeat(80));
            for active in &claims {
                let remaining = if active.is_overdue() {
                    "overdue".to_string()
                } else {
                    format!("{}m", active.remaining.num_minutes())
                };
                println!(
                    "{:<12}  {:<10}  {:<20}  {:<20}  {}",
                    active.ticket_key.to_string(),
                    active.ticket_status.as_str(),
                    active.claim.worker_id,
                    active.claim.expires_at.format("%Y-%m-%d %H:%M"),
                    remaining
                );
            }
            Ok(())
        }
        Command::Log { ticket, limit } => {
            let entries = db.activity(ticket.as_ref(), limit).await?;
            for entry in &entries {
                println!(
                    "{}  {:<10}  {:<24}  {:<12}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.ticket_key.to_string(),
                    entry.action.to_string(),
                    entry.worker_id.as_deref().unwrap_or("-"),
                    entry.summary
                );
            }
            Ok(())
        }
        Command::Serve => cmd_serve(Arc::clone(db), config).await,
    }
}

async fn cmd_serve(db: Arc<Db>, config: &Config) -> anyhow::Result<()> {
    db.health_check().await?;
    let sweeper = LeaseSweeper::new(db, config.sweep_interval);

    let s = sweeper.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        s.shutdown();
    });

    sweeper.run().await?;
    Ok(())
}

async fn cmd_project(db: &Db, action: ProjectAction) -> anyhow::Result<()> {
    match action {
        ProjectAction::Create { key, name } => {
            let project = db.create_project(&key, &name).await?;
            println!("Created project {} ({})", project.key, project.name);
        }
        ProjectAction::List => {
            let projects = db.list_projects().await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for project in &projects {
                println!(
                    "{:<10}  {:<40}  {}",
                    project.key,
                    project.name,
                    project.created_at.format("%Y-%m-%d")
                );
            }
        }
        ProjectAction::Delete { key } => {
            db.delete_project(&key).await?;
            println!("Deleted project {key}");
        }
    }
    Ok(())
}

async fn cmd_ticket(db: &Db, action: TicketAction) -> anyhow::Result<()> {
    match action {
        TicketAction::Create {
            project,
            title,
            description,
            complexity,
            brain,
            depends_on,
        } => {
            let mut new = NewTicket::new(project, title)
                .description(description)
                .complexity(complexity);
            if let Some(brain) = brain {
                new = new.brain(brain);
            }
            for prerequisite in depends_on {
                new = new.depends_on(prerequisite);
            }
            let ticket = db.create_ticket(new).await?;
            println!("Created {} ({})", ticket.key, ticket.status);
        }
        TicketAction::Show { key, json } => {
            let ticket = db.get_ticket(&key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ticket)?);
                return Ok(());
            }
            let claim = db.active_claim(&key).await?;
            let prerequisites = db.prerequisites(&key).await?;

            println!("Key:         {}", ticket.key);
            println!("Title:       {}", ticket.title);
            println!("Status:      {}", status_line(&ticket));
            println!("Complexity:  {}", ticket.complexity);
            if !ticket.description.is_empty() {
                println!("Description: {}", ticket.description);
            }
            if let Some(ref brain) = ticket.brain {
                println!("Brain:       {brain}");
            }
            if !prerequisites.is_empty() {
                let keys: Vec<String> = prerequisites
                    .iter()
                    .map(|t| format!("{} ({})", t.key, status_line(t)))
                    .collect();
                println!("Depends on:  {}", keys.join(", "));
            }
            if let Some(claim) = claim {
                println!(
                    "Claimed by:  {} until {}",
                    claim.worker_id,
                    claim.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            println!("Created:     {}", ticket.created_at);
            println!("Updated:     {}", ticket.updated_at);
            if let Some(completed) = ticket.completed_at {
                println!("Completed:   {completed}");
            }
        }
        TicketAction::List {
            project,
            status,
            limit,
        } => {
            let tickets = db.list_tickets(&filter(project, status, limit)).await?;
            print_tickets(&tickets);
        }
        TicketAction::Transition {
            key,
            status,
            resolution,
        } => {
            let ticket = db.transition(&key, status, resolution).await?;
            println!("{key} is now {}", status_line(&ticket));
        }
    }
    Ok(())
}

async fn cmd_dep(db: &Db, action: DepAction) -> anyhow::Result<()> {
    match action {
        DepAction::Add {
            ticket,
            prerequisite,
        } => {
            db.add_dependency(&ticket, &prerequisite).await?;
            println!("{ticket} now depends on {prerequisite}");
        }
        DepAction::Remove {
            ticket,
            prerequisite,
        } => {
            db.remove_dependency(&ticket, &prerequisite).await?;
            println!("{ticket} no longer depends on {prerequisite}");
        }
        DepAction::List { ticket } => {
            let satisfied = db.is_satisfied(&ticket).await?;
            println!(
                "{ticket}: prerequisites {}",
                if satisfied { "satisfied" } else { "pending" }
            );
            for t in db.prerequisites(&ticket).await? {
                println!("  needs    {:<10}  {}", t.key.to_string(), status_line(&t));
            }
            for t in db.dependents(&ticket).await? {
                println!("  blocks   {:<10}  {}", t.key.to_string(), status_line(&t));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn filter(project: Option<String>, status: Option<Status>, limit: Option<u32>) -> Filter {
    Filter {
        project_key: project.map(|p| p.to_ascii_uppercase()),
        status,
        limit,
    }
}

fn lease(db: &Db, minutes: Option<i64>) -> ticketq::Result<chrono::Duration> {
    match minutes {
        None => Ok(db.default_lease()),
        Some(m) => lease_minutes(m),
    }
}

fn status_line(ticket: &Ticket) -> String {
    match ticket.resolution {
        Some(resolution) => format!("{} ({resolution})", ticket.status),
        None => ticket.status.to_string(),
    }
}

fn print_tickets(tickets: &[Ticket]) {
    if tickets.is_empty() {
        println!("No tickets found.");
        return;
    }

    println!(
        "{:<10}  {:<20}  {:<8}  {:<40}  CREATED",
        "KEY", "STATUS", "SIZE", "TITLE"
    );
    println!("{}", "-".repeat(100));

    for ticket in tickets {
        let title: String = ticket.title.chars().take(40).collect();
        println!(
            "{:<10}  {:<20}  {:<8}  {:<40}  {}",
            ticket.key.to_string(),
            status_line(ticket),
            ticket.complexity.as_str(),
            title,
            ticket.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} ticket(s)", tickets.len());
}
