use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use lead_alerts::config;
use lead_alerts::db;
use lead_alerts::leads::LeadIntake;
use lead_alerts::mailer::{LogMailer, MailSender, ResendMailer};
use lead_alerts::model::{NewLead, NewUser, Role};
use lead_alerts::notify::{self, NotifyReport};

#[derive(Debug, Parser)]
#[command(author, version, about = "Lead intake and new-lead email alerts")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log emails instead of sending them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create leads from a JSON array and notify matching users
    Import { file: PathBuf },
    /// Register a company account
    AddUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        company: String,
        #[arg(long)]
        service_state: Option<String>,
        /// Additional service states (repeatable)
        #[arg(long = "service-states")]
        service_states: Vec<String>,
        #[arg(long = "city")]
        cities: Vec<String>,
    },
    /// Grant ADMIN to an account without an acting admin
    BootstrapAdmin { email: String },
    /// Change another account's roles as an admin
    SetRoles {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        admin: bool,
    },
    /// Run the notification pipeline for states that were just inserted
    Notify {
        #[arg(long = "state", required = true)]
        states: Vec<String>,
        #[arg(long)]
        count: usize,
    },
    /// Print the newest leads
    ListLeads {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Print a reference config file
    ExampleConfig,
}

fn log_report(report: &NotifyReport) {
    info!(
        attempted = report.attempted,
        sent = report.sent,
        failed = report.failed.len(),
        "notification run finished"
    );
    for f in &report.failed {
        warn!(user = %f.email, state = %f.state, error = %f.error, "notification not delivered");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let mailer: Arc<dyn MailSender> = if args.dry_run {
        Arc::new(LogMailer)
    } else {
        Arc::new(ResendMailer::from_config(&cfg)?)
    };
    let settings = cfg.notify_settings();

    match args.command {
        Command::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let new_leads: Vec<NewLead> =
                serde_json::from_str(&raw).context("lead file must be a JSON array of leads")?;

            let intake = LeadIntake::new(pool.clone(), mailer, settings)
                .with_notifications(cfg.notifications.enabled);
            let created = intake.create_leads(new_leads).await?;
            println!("created {} leads", created.leads.len());

            // The process would exit under a detached task; wait for it here.
            if let Some(handle) = created.notification {
                match handle.await {
                    Ok(Some(report)) => log_report(&report),
                    Ok(None) => warn!("notification pipeline aborted; see log"),
                    Err(err) => warn!(?err, "notification task panicked"),
                }
            }
        }
        Command::AddUser {
            email,
            company,
            service_state,
            service_states,
            cities,
        } => {
            let user = db::create_user(
                &pool,
                &NewUser {
                    email,
                    company_name: company,
                    service_state,
                    service_states,
                    cities,
                    ..Default::default()
                },
            )
            .await?;
            println!("{} {}", user.id, user.email);
        }
        Command::BootstrapAdmin { email } => {
            db::bootstrap_admin(&pool, &email).await?;
            println!("{} is now an admin", email.trim());
        }
        Command::SetRoles {
            actor,
            target,
            admin,
        } => {
            let actor = db::find_user_by_email(&pool, &actor)
                .await?
                .ok_or_else(|| anyhow!("no user with email {}", actor))?;
            let target = db::find_user_by_email(&pool, &target)
                .await?
                .ok_or_else(|| anyhow!("no user with email {}", target))?;
            let roles: &[Role] = if admin { &[Role::Admin] } else { &[] };
            let updated = db::set_user_roles(&pool, &actor.id, &target.id, roles).await?;
            let names: Vec<&str> = updated.roles.iter().map(Role::as_str).collect();
            println!("{}: {}", updated.email, names.join(","));
        }
        Command::Notify { states, count } => {
            let report =
                notify::notify_new_leads(&pool, mailer.as_ref(), &settings, &states, count).await?;
            log_report(&report);
        }
        Command::ListLeads { limit } => {
            for lead in db::list_leads(&pool, limit).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    lead.id,
                    lead.created_at.to_rfc3339(),
                    lead.quality.as_str(),
                    lead.state.as_deref().unwrap_or("-"),
                    lead.title
                );
            }
        }
        Command::ExampleConfig => unreachable!("handled before config load"),
    }

    Ok(())
}
