//! Deriv copy-trading manager.
//!
//! Designates one trading account as "master" and mirrors its trades onto
//! linked accounts via the Deriv WebSocket v3 API, multiplexing every
//! account over a single shared connection.

mod api;
mod config;
mod copier;
mod models;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{parse_accounts, AppConfig, DEFAULT_APP_ID, DEFAULT_ENDPOINT};
use crate::copier::{authorize_master, CopySession};

/// Deriv copy-trading CLI.
#[derive(Parser)]
#[command(name = "derivcopier")]
#[command(about = "Mirror a master account's trades onto linked Deriv accounts", long_about = None)]
struct Cli {
    /// Deriv application id
    #[arg(long, default_value_t = DEFAULT_APP_ID)]
    app_id: u32,

    /// WebSocket endpoint (app_id is appended as a query parameter)
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and list the linked accounts
    Accounts {
        /// Account list as query-string parameters (acct1=..&token1=..&cur1=..)
        #[arg(short, long, env = "DERIV_ACCOUNTS")]
        accounts: String,
    },

    /// Authorize a master token and show the account it belongs to
    Master {
        /// Master account API token
        #[arg(short, long, env = "DERIV_MASTER_TOKEN")]
        token: String,
    },

    /// Run a live copy session until ctrl-c
    Run {
        /// Account list as query-string parameters (acct1=..&token1=..&cur1=..)
        #[arg(short, long, env = "DERIV_ACCOUNTS")]
        accounts: String,

        /// Master account API token
        #[arg(short, long, env = "DERIV_MASTER_TOKEN")]
        master_token: String,

        /// Keepalive ping interval in seconds
        #[arg(long, default_value = "30")]
        ping_interval: u64,

        /// Restrict copying to these loginids (default: every
        /// currency-matching account)
        #[arg(long)]
        only: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut app_config = AppConfig {
        app_id: cli.app_id,
        endpoint: cli.endpoint.clone(),
        ..AppConfig::default()
    };

    match cli.command {
        Commands::Accounts { accounts } => {
            let accounts = parse_accounts(&accounts)?;

            if accounts.is_empty() {
                println!("No valid accounts found.");
                return Ok(());
            }

            println!("\n{:<16} {:<8} {:>12}", "LOGINID", "CUR", "BALANCE");
            println!("{}", "-".repeat(38));
            for account in &accounts {
                println!(
                    "{:<16} {:<8} {:>12}",
                    account.loginid,
                    account.currency,
                    account.balance_display()
                );
            }
        }

        Commands::Master { token } => {
            info!("Authorizing master token");

            let master = authorize_master(&app_config, &token).await?;

            println!("\n=== Master Account ===");
            println!("ID:       {}", master.loginid);
            println!("Currency: {}", master.currency);
            println!("Balance:  {:.2}", master.balance);
        }

        Commands::Run {
            accounts,
            master_token,
            ping_interval,
            only,
        } => {
            app_config.ping_interval_secs = ping_interval;

            let accounts = parse_accounts(&accounts)?;
            if accounts.is_empty() {
                println!("No valid accounts found.");
                return Ok(());
            }

            info!(
                accounts = accounts.len(),
                ping_interval = ping_interval,
                "Starting copy session"
            );

            let master = authorize_master(&app_config, &master_token).await?;
            let targets: Vec<String> = accounts
                .iter()
                .filter(|a| only.is_empty() || only.contains(&a.loginid))
                .map(|a| a.loginid.clone())
                .collect();

            let mut session = CopySession::connect(app_config, accounts).await?;
            session.set_master(master);

            for loginid in &targets {
                session.start_copy(loginid).await;
            }

            println!("\n=== Deriv Copy Session ===");
            println!("Master:   {}", session.state().master().map(|m| m.loginid.as_str()).unwrap_or("-"));
            println!("Accounts: {}", session.state().accounts().len());
            println!("\nCommands: start <loginid> | stop <loginid> | master off | status");
            println!("Press Ctrl+C to stop and clear all copies.\n");

            let result = session.run().await;

            println!("\n=== Session Log ===");
            print!("{}", session.state().events());

            result?;
        }
    }

    Ok(())
}
