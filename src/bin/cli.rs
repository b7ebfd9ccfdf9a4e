//! Levelkeeper CLI
//!
//! Inspect and administer the progression document, and run the timed-grant
//! scheduler as a standalone process.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use levelkeeper_lib::config::{load_config, load_config_from};
use levelkeeper_lib::{
    parse_duration, threshold, Config, CurrencyKind, DiscordClient, Engine, EngineSettings,
    GrantScheduler, LogRoleManager, RoleManager, Store, TimedGrant,
};

#[derive(Parser)]
#[command(name = "levelkeeper")]
#[command(about = "Levelkeeper progression and timed role grants")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "LEVELKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Data file, overriding the config
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a member's progression and card settings
    Show {
        /// Member ID
        member: String,
    },

    /// Grant experience to a member
    GrantXp {
        member: String,
        amount: u64,
    },

    /// Add or remove currency (negative amounts subtract, floored at zero)
    Adjust {
        member: String,
        /// coins, diamonds or deluxe_coins
        #[arg(value_parser = parse_currency)]
        currency: CurrencyKind,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },

    /// Set a member's level (xp resets to zero)
    SetLevel {
        member: String,
        level: u32,
    },

    /// Top members by level
    Leaderboard {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List pending timed grants
    Grants,

    /// Register a timed grant (e.g. 10m, 2h, 7d, 1mth)
    AddGrant {
        member: String,
        group: String,
        role: String,
        duration: String,
    },

    /// Cancel a pending timed grant
    CancelGrant {
        member: String,
        group: String,
        role: String,
        expires_at: u64,
    },

    /// Experience needed to advance from a level
    Threshold {
        level: u32,
    },

    /// Recover pending grants and expire them on time until Ctrl-C
    Run,
}

fn parse_currency(s: &str) -> Result<CurrencyKind, String> {
    s.parse()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "levelkeeper_lib=debug,levelkeeper=debug"
    } else {
        "levelkeeper_lib=info,levelkeeper=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run_command(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(data) = &cli.data {
        config.storage.data_file = data.clone();
    }

    let engine = Engine::open(
        Store::new(&config.storage.data_file),
        EngineSettings::from(&config),
    )
    .await;
    let format = cli.format;

    match cli.command {
        Commands::Show { member } => {
            let record = engine.record_or_default(&member).await;
            let card = engine.card_preference(&member).await;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "member": member,
                    "progression": record,
                    "card": card,
                }))?,
                OutputFormat::Text => {
                    println!("Member {}", member);
                    println!("  level:        {}", record.level);
                    println!("  xp:           {}/{}", record.xp, threshold(record.level));
                    println!("  total xp:     {}", record.total_xp);
                    println!("  coins:        {}", record.coins);
                    println!("  diamonds:     {}", record.diamonds);
                    println!("  deluxe coins: {}", record.deluxe_coins);
                    println!(
                        "  card:         rgb({},{},{}) {}",
                        card.color[0], card.color[1], card.color[2], card.background_reference
                    );
                }
            }
        }

        Commands::GrantXp { member, amount } => {
            let change = engine.grant_experience(&member, amount).await;
            match format {
                OutputFormat::Json => print_json(&change)?,
                OutputFormat::Text if change.leveled_up() => {
                    println!("{} leveled from {} to {}", member, change.previous, change.current)
                }
                OutputFormat::Text => println!("{} is level {}", member, change.current),
            }
        }

        Commands::Adjust {
            member,
            currency,
            amount,
        } => {
            let balance = engine.adjust_currency(&member, currency, amount).await;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "member": member,
                    "currency": currency,
                    "balance": balance,
                }))?,
                OutputFormat::Text => println!("{} now has {} {}", member, balance, currency),
            }
        }

        Commands::SetLevel { member, level } => {
            let change = engine.set_level(&member, level).await;
            match format {
                OutputFormat::Json => print_json(&change)?,
                OutputFormat::Text => {
                    println!("{} moved from level {} to {}", member, change.previous, change.current)
                }
            }
        }

        Commands::Leaderboard { limit } => {
            let board = engine.leaderboard(limit).await;
            match format {
                OutputFormat::Json => print_json(&board)?,
                OutputFormat::Text => {
                    for (rank, (member, record)) in board.iter().enumerate() {
                        println!(
                            "{:>3}. {:<20} level {:<5} xp {:<8} total {}",
                            rank + 1,
                            member,
                            record.level,
                            record.xp,
                            record.total_xp
                        );
                    }
                }
            }
        }

        Commands::Grants => {
            let grants = engine.grants().await;
            match format {
                OutputFormat::Json => print_json(&grants)?,
                OutputFormat::Text if grants.is_empty() => println!("No pending timed grants"),
                OutputFormat::Text => {
                    for grant in &grants {
                        print_grant(grant);
                    }
                }
            }
        }

        Commands::AddGrant {
            member,
            group,
            role,
            duration,
        } => {
            let duration = parse_duration(&duration)?;
            let scheduler = GrantScheduler::start(engine.clone(), Arc::new(LogRoleManager));
            let grant = scheduler.register_for(&member, &group, &role, duration).await;
            scheduler.shutdown();
            match format {
                OutputFormat::Json => print_json(&grant)?,
                OutputFormat::Text => print_grant(&grant),
            }
        }

        Commands::CancelGrant {
            member,
            group,
            role,
            expires_at,
        } => {
            let scheduler = GrantScheduler::start(engine.clone(), Arc::new(LogRoleManager));
            let grant = TimedGrant::new(&member, &group, &role, expires_at);
            let cancelled = scheduler.cancel(&grant).await;
            scheduler.shutdown();
            if !cancelled {
                anyhow::bail!("No pending grant matches");
            }
            println!("Cancelled");
        }

        Commands::Threshold { level } => println!("{}", threshold(level)),

        Commands::Run => run_scheduler(engine.clone(), &config).await?,
    }

    engine.flush().await.context("Final save failed")?;
    Ok(())
}

async fn run_scheduler(engine: Engine, config: &Config) -> Result<()> {
    let roles: Arc<dyn RoleManager> = match config.discord.bot_token.as_deref() {
        Some(token) => {
            let client = DiscordClient::new(token)?;
            client.verify().await?;
            Arc::new(client)
        }
        None => {
            info!("No bot token configured; expiries will only be logged");
            Arc::new(LogRoleManager)
        }
    };

    let scheduler = GrantScheduler::start(engine, roles);
    scheduler.recover().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    scheduler.shutdown();
    Ok(())
}

fn print_grant(grant: &TimedGrant) {
    let expires = chrono::DateTime::from_timestamp(grant.expires_at as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| grant.expires_at.to_string());
    println!(
        "member {} role {} in group {} until {} ({})",
        grant.member_id, grant.role_id, grant.group_id, expires, grant.expires_at
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
