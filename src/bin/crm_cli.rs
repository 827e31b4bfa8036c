use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use tirecrm_api::{
    auth::AuthService,
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::user,
    events::{Event, EventSender},
    retry::RetryConfig,
    services::{plans::PlanService, progress::AssignmentProgress},
};
use sea_orm::EntityTrait;

#[derive(Parser)]
#[command(name = "tirecrm-cli", about = "Operator tasks for the tire CRM backend")]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Recompute progress for every assignment of one plan
    RecalcPlan {
        #[arg(long)]
        plan_id: i32,
    },
    /// Recompute progress for every plan
    RecalcAll,
    /// Mint an access token for a user
    IssueToken {
        #[arg(long)]
        user_id: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::RecalcPlan { plan_id } => {
            let progress = context
                .plan_service()
                .recalc_plan_by_id(plan_id)
                .await
                .with_context(|| format!("failed to recalculate plan {}", plan_id))?;
            if cli.json {
                print_json(&progress)?;
            } else {
                println!("Plan {}: {} assignment(s) recalculated", plan_id, progress.len());
                progress.iter().for_each(render_progress);
            }
        }
        Commands::RecalcAll => {
            let summary = context
                .plan_service()
                .recalc_all()
                .await
                .context("failed to recalculate plans")?;
            if cli.json {
                print_json(&summary)?;
            } else {
                for (plan_id, count) in &summary {
                    println!("- plan {} | {} assignment(s)", plan_id, count);
                }
                println!("{} plan(s) recalculated", summary.len());
            }
        }
        Commands::IssueToken { user_id } => {
            let user = user::Entity::find_by_id(user_id)
                .one(context.db.as_ref())
                .await?
                .with_context(|| format!("user {} not found", user_id))?;
            let token = AuthService::from_config(&context.config).issue_token(user.id)?;
            if cli.json {
                print_json(&serde_json::json!({
                    "user_id": user.id,
                    "username": user.username,
                    "access_token": token,
                    "token_type": "Bearer",
                }))?;
            } else {
                println!("{}", token);
            }
        }
    }

    Ok(())
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(32);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(target: "tirecrm_cli", event = ?event, "received event");
            }
        });

        Ok(Self {
            config,
            db: Arc::new(db_pool),
            event_sender: Arc::new(EventSender::new(event_tx)),
        })
    }

    fn plan_service(&self) -> PlanService {
        PlanService::new(
            self.db.clone(),
            Some(self.event_sender.clone()),
            RetryConfig::with_max_attempts(self.config.recalc_max_retries.saturating_add(1)),
        )
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_progress(p: &AssignmentProgress) {
    println!(
        "- assignment {} | manager {} | {}/{} orders | {}/{} | {}% | {}",
        p.assignment_id,
        p.manager_id,
        p.achieved_count,
        p.target_count,
        p.achieved_sum,
        p.target_sum,
        p.progress_percent,
        if p.is_achieved { "achieved" } else { "in progress" }
    );
}
