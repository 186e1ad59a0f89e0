use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;

use petition_flow::documents::{ArtifactPipeline, FileTemplateRenderer};
use petition_flow::{
    config, init_config, init_telemetry, shutdown_telemetry, ApprovalEngine, DatabaseManager,
    DocumentQueue, PetitionDetail, PetitionId, ShutdownCoordinator, UserId,
};

#[derive(Parser)]
#[command(name = "petition-flow")]
#[command(about = "Operator tool for the petition approval workflow")]
#[command(long_about = "petition-flow routes student petitions through their approval chain. \
                       These commands inspect and maintain the workflow database configured in \
                       petition-flow.toml or PETITION_FLOW_* environment variables.")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and apply migrations
    Migrate,
    /// List petition types and their approval chains
    Types,
    /// Show the approval queue of a user
    Queue {
        #[arg(long, help = "Acting user id")]
        user: i64,
    },
    /// Show a petition with its step ledger, history and artifacts
    Show {
        petition: i64,
        #[arg(long, help = "Acting user id")]
        user: i64,
    },
    /// Generate a fresh document version now
    Regenerate {
        petition: i64,
        #[arg(long, help = "Acting user id")]
        user: i64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config()?;
    init_telemetry(&settings.observability)?;
    init_config()?;

    let result = tokio::runtime::Runtime::new()?.block_on(async { run(cli).await });
    shutdown_telemetry();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config()?;
    let database = DatabaseManager::new(&settings.database).await?;

    let renderer = Arc::new(FileTemplateRenderer::new(&settings.documents.output_dir));
    let pipeline = Arc::new(ArtifactPipeline::new(database.pool().clone(), renderer));
    // One-shot commands never transition, so nothing is queued.
    let engine = ApprovalEngine::with_sql_collaborators(database.pool().clone(), DocumentQueue::disabled())
        .with_generator(pipeline);

    let outcome = execute(&engine, &cli).await;
    ShutdownCoordinator::default()
        .shutdown(engine, None, &database)
        .await?;
    outcome
}

async fn execute(engine: &ApprovalEngine, cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Migrate => {
            // DatabaseManager::new already migrated when auto_migrate is on.
            if !config()?.database.auto_migrate {
                sqlx::migrate!("./migrations").run(engine.pool()).await?;
            }
            println!("Database is up to date");
        }
        Commands::Types => {
            let types = engine.list_types().await?;
            if cli.json {
                return print_json(&types);
            }
            for petition_type in types {
                let chain: Vec<&str> = petition_type.approval_chain.iter().map(|r| r.as_str()).collect();
                println!(
                    "{:>3}  {:<28} {}",
                    petition_type.type_number,
                    petition_type.name,
                    chain.join(" -> ")
                );
            }
        }
        Commands::Queue { user } => {
            let queue = engine.get_queue(UserId(*user)).await?;
            if cli.json {
                return print_json(&queue);
            }
            if queue.is_empty() {
                println!("Nothing awaiting user {user}");
            }
            for row in queue {
                println!(
                    "{}  {:<28} step {} ({}, {})",
                    row.request_number,
                    row.type_name,
                    row.current_approval_step,
                    row.step_role.map(|r| r.as_str()).unwrap_or("-"),
                    row.step_status.map(|s| s.as_str()).unwrap_or("-"),
                );
            }
        }
        Commands::Show { petition, user } => {
            let detail = engine.get_detail(PetitionId(*petition), UserId(*user)).await?;
            if cli.json {
                return print_json(&detail);
            }
            print_detail(&detail);
        }
        Commands::Regenerate { petition, user } => {
            let artifact = engine.regenerate(PetitionId(*petition), UserId(*user)).await?;
            if cli.json {
                return print_json(&artifact);
            }
            println!(
                "Generated version {} ({} bytes) at {}",
                artifact.version, artifact.size_bytes, artifact.artifact_ref
            );
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_detail(detail: &PetitionDetail) {
    let petition = &detail.petition;
    println!("{} {}", petition.request_number, detail.petition_type.name);
    println!("status: {} (step {})", petition.status, petition.current_approval_step);

    println!("\nsteps:");
    for step in &detail.steps {
        let approver = step
            .approver_user_id
            .map(|u| format!(" by {u}"))
            .unwrap_or_default();
        println!("  {}. {:<12} {}{}", step.step_order, step.approver_role, step.status, approver);
    }

    println!("\nhistory:");
    for action in &detail.actions {
        let comments = action.comments.as_deref().unwrap_or("");
        println!(
            "  {}  {:<14} user {}  {}",
            action.created_at.format("%Y-%m-%d %H:%M"),
            action.action_type,
            action.actor_id,
            comments
        );
    }

    match detail.artifacts.first() {
        Some(latest) => println!(
            "\nlatest document: v{}{} {}",
            latest.version,
            if latest.is_final { " (final)" } else { "" },
            latest.artifact_ref
        ),
        None => println!("\nno documents generated yet"),
    }
}
