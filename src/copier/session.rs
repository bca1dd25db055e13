//! Copy session: drives the shared connection against the session state.
//!
//! One tokio task owns the session, so identity switches and copy actions
//! are strictly sequential; there is no way for two actions to interleave
//! their authorize round-trips.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::{AuthorizeInfo, ConnectionManager};
use crate::config::AppConfig;
use crate::models::{Account, MasterAccount};

use super::state::SessionState;

/// Poll granularity of the run loop; keeps ctrl-c responsive between
/// socket reads.
const LOOP_TICK: Duration = Duration::from_millis(250);

/// A live copy-trading session over one shared WebSocket.
pub struct CopySession {
    config: AppConfig,
    conn: ConnectionManager,
    state: SessionState,
}

/// Authorize a master token out of band on a dedicated short-lived
/// connection, leaving the shared socket's identity untouched. The
/// connection is dropped as soon as the acknowledgment arrives.
pub async fn authorize_master(config: &AppConfig, token: &str) -> Result<MasterAccount> {
    let mut conn = ConnectionManager::connect(config).await?;
    let info = conn
        .authorize(token)
        .await
        .context("Master authorization failed")?;

    Ok(MasterAccount {
        loginid: info.loginid,
        currency: info.currency.to_uppercase(),
        balance: info.balance,
        token: token.to_string(),
    })
}

impl CopySession {
    /// Connect the shared socket and authorize with the first linked
    /// account's token.
    pub async fn connect(config: AppConfig, accounts: Vec<Account>) -> Result<Self> {
        let first_token = accounts
            .first()
            .map(|a| a.token.clone())
            .context("No linked accounts")?;

        let mut conn = ConnectionManager::connect(&config).await?;
        let info = conn.authorize(&first_token).await?;

        let mut state = SessionState::new(accounts);
        state.cache_balance(&info);
        state
            .events_mut()
            .success(format!("Connected, authorized as {}", info.loginid));

        Ok(Self {
            config,
            conn,
            state,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn set_master(&mut self, master: MasterAccount) {
        self.state.set_master(master);
    }

    pub fn clear_master(&mut self) {
        self.state.clear_master();
    }

    /// Start copying the master's trades onto `loginid`. Gate rejections
    /// and authorization failures are reported through the event log; the
    /// active-copy mapping only changes when the acknowledgment arrives.
    pub async fn start_copy(&mut self, loginid: &str) {
        let (account, master_token) = match self.state.check_copy_start(loginid) {
            Ok((account, token)) => (account.clone(), token.to_string()),
            Err(rejection) => {
                self.state.events_mut().error(rejection.to_string());
                return;
            }
        };

        if let Err(e) = self.switch_identity(&account).await {
            self.state
                .events_mut()
                .error(format!("Cannot authorize {}: {}", loginid, e));
            return;
        }

        self.conn.send_copy_start(&master_token, loginid).await;
    }

    /// Stop the active copy on `loginid` using the token it was started
    /// with.
    pub async fn stop_copy(&mut self, loginid: &str) {
        let session_token = match self.state.check_copy_stop(loginid) {
            Ok(token) => token,
            Err(rejection) => {
                self.state.events_mut().error(rejection.to_string());
                return;
            }
        };

        if let Some(account) = self.state.account(loginid).cloned() {
            if let Err(e) = self.switch_identity(&account).await {
                self.state
                    .events_mut()
                    .error(format!("Cannot authorize {}: {}", loginid, e));
                return;
            }
        }

        let req_id = self.conn.send_copy_stop(&session_token).await;
        self.state.note_stop_request(req_id, loginid);
    }

    /// Re-authorize the shared socket as `account` if needed, caching the
    /// balance from a fresh acknowledgment.
    async fn switch_identity(&mut self, account: &Account) -> Result<Option<AuthorizeInfo>> {
        let info = self
            .conn
            .ensure_authorized(&account.loginid, &account.token)
            .await?;
        if let Some(info) = &info {
            self.state.cache_balance(info);
        }
        Ok(info)
    }

    /// Issue one stop request per active copy, then clear all local state.
    /// The sweep does not wait for acknowledgments.
    pub async fn logout(&mut self) {
        let stops = self.state.logout_sweep();

        for (loginid, session_token) in stops {
            if let Some(account) = self.state.account(&loginid).cloned() {
                if let Err(e) = self.switch_identity(&account).await {
                    self.state
                        .events_mut()
                        .error(format!("Logout stop for {} failed: {}", loginid, e));
                    continue;
                }
            }
            self.conn.send_copy_stop(&session_token).await;
        }

        self.state.events_mut().info("Logged out");
    }

    /// Main loop: dispatch inbound messages, keep the connection alive
    /// with periodic pings, apply console commands, reconnect on loss,
    /// and perform the logout sweep on ctrl-c.
    pub async fn run(&mut self) -> Result<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            flag.store(true, Ordering::SeqCst);
        });

        // Console commands for toggling copies while the session runs.
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if cmd_tx.send(line).is_err() {
                    break;
                }
            }
        });

        let ping_every = Duration::from_secs(self.config.ping_interval_secs);
        let mut next_ping = Instant::now() + ping_every;

        while !shutdown.load(Ordering::SeqCst) {
            if Instant::now() >= next_ping {
                self.conn.ping().await;
                next_ping = Instant::now() + ping_every;
            }

            while let Ok(line) = cmd_rx.try_recv() {
                self.handle_command(line.trim()).await;
            }

            let wait = next_ping
                .saturating_duration_since(Instant::now())
                .min(LOOP_TICK);

            match tokio::time::timeout(wait, self.conn.next_message()).await {
                Ok(Some(resp)) => self.state.apply(&resp),
                Ok(None) => {
                    self.state.events_mut().error("Connection lost");
                    self.reconnect().await?;
                }
                Err(_) => {
                    // Timed out waiting; loop around to ping / commands /
                    // shutdown check.
                }
            }
        }

        self.logout().await;
        Ok(())
    }

    /// Apply one console command: `start <loginid>`, `stop <loginid>`,
    /// `master off`, `status`.
    async fn handle_command(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("start"), Some(loginid)) => {
                let loginid = loginid.to_string();
                self.start_copy(&loginid).await;
            }
            (Some("stop"), Some(loginid)) => {
                let loginid = loginid.to_string();
                self.stop_copy(&loginid).await;
            }
            (Some("master"), Some("off")) => self.clear_master(),
            (Some("status"), None) => {
                for account in self.state.accounts() {
                    println!(
                        "{:<16} {:<8} {:>12}  {}",
                        account.loginid,
                        account.currency,
                        account.balance_display(),
                        if self.state.is_copying(&account.loginid) {
                            "copying"
                        } else {
                            "idle"
                        }
                    );
                }
            }
            (None, _) => {}
            _ => {
                self.state
                    .events_mut()
                    .error(format!("Unknown command: {}", line));
            }
        }
    }

    /// Bounded reconnect: fixed delay between attempts, re-authorize with
    /// the first account's token once the socket is back.
    async fn reconnect(&mut self) -> Result<()> {
        let token = self
            .state
            .accounts()
            .first()
            .map(|a| a.token.clone())
            .context("No linked accounts")?;

        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            warn!(attempt = attempt, "Reconnecting");
            tokio::time::sleep(delay).await;

            match ConnectionManager::connect(&self.config).await {
                Ok(conn) => {
                    self.conn = conn;
                    self.state.clear_pending_stops();
                    let info = self.conn.authorize(&token).await?;
                    self.state.cache_balance(&info);
                    self.state
                        .events_mut()
                        .success(format!("Reconnected, authorized as {}", info.loginid));
                    return Ok(());
                }
                Err(e) if attempt < self.config.max_reconnect_attempts => {
                    warn!(error = %e, attempt = attempt, "Reconnect attempt failed");
                }
                Err(e) => {
                    self.state
                        .events_mut()
                        .error(format!("Reconnect gave up after {} attempts", attempt));
                    return Err(e);
                }
            }
        }
    }
}
