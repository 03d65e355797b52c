// CLI module - command-line argument parsing and handlers
//
// With no subcommand the gateway serves traffic. The other subcommands are
// one-shot operations against the config, the backends, or the database:
// - aggregate: run the daily rollup now
// - validate: probe every configured backend
// - user / key: account and key lifecycle
// - config: show or write the config file

use crate::auth::generate_api_key;
use crate::balancer::{HealthPolicy, LoadBalancer};
use crate::config::{Config, VERSION};
use crate::storage::{SqliteStore, Status, UsageStore};
use crate::usage::DailyAggregator;
use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// LLM Gateway - authenticated, load-balanced proxy for LLM APIs
#[derive(Parser)]
#[command(name = "llm-gateway")]
#[command(version = VERSION)]
#[command(about = "Authenticated, load-balanced proxy for LLM APIs", long_about = None)]
pub struct Cli {
    /// Config file (default: $GATEWAY_CONFIG, ./config/gateway.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway (default)
    Serve,

    /// Roll usage logs up into daily stats
    Aggregate {
        /// Day to aggregate, YYYY-MM-DD (default: yesterday, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Probe every configured backend with GET /v1/models
    Validate,

    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Manage API keys
    #[command(subcommand)]
    Key(KeyCommand),

    /// Inspect or create the config file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Create a user
    Add(UserAdd),
    /// Disable a user; their keys stop working
    Disable { account: String },
    /// Re-enable a user
    Enable { account: String },
}

#[derive(Args)]
pub struct UserAdd {
    pub account: String,
    /// Display name (default: the account)
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, default_value = "user")]
    pub role: String,
    /// Token quota, recorded for reporting
    #[arg(long, default_value_t = 0)]
    pub quota: i64,
}

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Issue a key for an account. The key is printed once.
    Add(KeyAdd),
    /// Revoke a key by id
    Revoke { id: i64 },
}

#[derive(Args)]
pub struct KeyAdd {
    pub account: String,
    #[arg(long, default_value = "default")]
    pub name: String,
    /// Expire the key after this many days
    #[arg(long)]
    pub expires_days: Option<i64>,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display effective configuration (env > file > defaults)
    Show,
    /// Write a config file with defaults
    Init {
        /// Where to write (default: ./config/gateway.toml)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show which config file is in use
    Path,
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage commands
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_user(store: &SqliteStore, command: UserCommand) -> Result<String> {
    match command {
        UserCommand::Add(args) => {
            let name = args.name.unwrap_or_else(|| args.account.clone());
            let id = store.create_user(&args.account, &name, &args.role, args.quota)?;
            Ok(format!("Created user {} (id {})", args.account, id))
        }
        UserCommand::Disable { account } => set_user(store, &account, Status::Disabled),
        UserCommand::Enable { account } => set_user(store, &account, Status::Active),
    }
}

fn set_user(store: &SqliteStore, account: &str, status: Status) -> Result<String> {
    if !store.set_user_status(account, status)? {
        bail!("user {} not found", account);
    }
    Ok(format!("User {} is now {}", account, status.as_str()))
}

pub fn handle_key(store: &SqliteStore, command: KeyCommand) -> Result<String> {
    match command {
        KeyCommand::Add(args) => {
            let Some(user) = store.find_user_by_account(&args.account)? else {
                bail!("user {} not found", args.account);
            };
            let expires_at = match args.expires_days {
                Some(days) => {
                    let Some(at) = ChronoDuration::try_days(days)
                        .and_then(|d| Utc::now().checked_add_signed(d))
                    else {
                        bail!("--expires-days {} is out of range", days);
                    };
                    Some(at)
                }
                None => None,
            };
            let key = generate_api_key();
            let id = store.create_api_key(user.id, &args.name, &key, expires_at)?;
            Ok(format!(
                "Created key {} for {} ({}) (store it now, it is not shown again):\n{}",
                id, user.name, args.account, key
            ))
        }
        KeyCommand::Revoke { id } => {
            if !store.set_key_status(id, Status::Disabled)? {
                bail!("key {} not found", id);
            }
            Ok(format!("Revoked key {}", id))
        }
    }
}

pub fn handle_aggregate(
    store: Arc<SqliteStore>,
    config: &Config,
    date: Option<NaiveDate>,
) -> Result<String> {
    let aggregator = DailyAggregator::new(store.clone(), config.usage.aggregate_interval);
    let date = date.unwrap_or_else(|| Utc::now().date_naive() - ChronoDuration::days(1));
    let rows = aggregator.run_for(date)?;

    let mut out = format!("Aggregated {} row(s) for {}", rows, date);
    for stat in store.daily_stats(date)? {
        out.push_str(&format!(
            "\n  user {:<6} {:<28} requests={} input={} output={} total={} cost=${:.6}",
            stat.user_id,
            stat.model,
            stat.request_count,
            stat.input_tokens,
            stat.output_tokens,
            stat.total_tokens,
            stat.cost_usd
        ));
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend and config commands
// ─────────────────────────────────────────────────────────────────────────────

pub async fn handle_validate(config: &Config) -> Result<()> {
    config.validate_backends()?;
    let balancer = LoadBalancer::new(&config.backends, HealthPolicy::from(&config.balancer));

    let reports =
        crate::balancer::validate_backends(&balancer, config.balancer.validation_timeout).await?;

    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(models) => println!("ok    {} ({} models)", report.name, models),
            Err(e) => {
                failed += 1;
                println!("FAIL  {} - {}", report.name, e);
            }
        }
    }
    for snap in balancer.snapshot() {
        println!(
            "      {} {} weight={} state={} errors={}",
            snap.name,
            snap.base_url,
            snap.weight,
            snap.state.as_str(),
            snap.consecutive_errors
        );
    }

    if failed > 0 {
        bail!("{} of {} backend(s) failed validation", failed, reports.len());
    }
    Ok(())
}

pub fn handle_config(config: &Config, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("# Effective configuration (env > file > defaults)");
            match &config.source {
                Some(path) => println!("# Source: {}", path.display()),
                None => println!("# Source: defaults (no config file)"),
            }
            println!();
            print!("{}", config.to_toml());
        }
        ConfigCommand::Init { path, force } => {
            let path = path.unwrap_or_else(|| PathBuf::from("./config/gateway.toml"));
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&path, Config::default().to_toml())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote default config: {}", path.display());
        }
        ConfigCommand::Path => match &config.source {
            Some(path) => println!("{}", path.display()),
            None => println!("(none, using defaults)"),
        },
    }
    Ok(())
}
