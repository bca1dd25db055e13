//! Session state: master designation, active-copy mapping, event log.
//!
//! All state transitions live here, free of socket IO, so the invariants
//! (currency gate, one entry per acknowledged copy, logout sweep) are
//! directly testable. [`CopySession`](super::CopySession) drives the IO.

use std::collections::HashMap;
use std::fmt;

use crate::api::{ApiResponse, AuthorizeInfo, MessageKind};
use crate::models::{Account, MasterAccount};

use super::event_log::EventLog;

/// Why a copy action was refused before reaching the wire. These are
/// reported through the event log, never escalated as program errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    NoMaster,
    UnknownAccount(String),
    CurrencyMismatch { account: String, master: String },
    AlreadyCopying(String),
    NotCopying(String),
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::NoMaster => write!(f, "No master account authorized"),
            GateRejection::UnknownAccount(id) => write!(f, "Unknown account: {}", id),
            GateRejection::CurrencyMismatch { account, master } => {
                write!(f, "Currency mismatch: {} vs {}", account, master)
            }
            GateRejection::AlreadyCopying(id) => write!(f, "Already copying on {}", id),
            GateRejection::NotCopying(id) => write!(f, "No active copy on {}", id),
        }
    }
}

/// In-memory state of one copy-trading session.
pub struct SessionState {
    accounts: Vec<Account>,
    master: Option<MasterAccount>,

    // loginid -> token the copy session was started with
    active_copies: HashMap<String, String>,

    // req_id of an in-flight copy_stop -> the loginid it was issued for.
    // The stop request itself carries no loginid (the server scopes it to
    // the authorized account), so the acknowledgment is matched back here.
    pending_stops: HashMap<u64, String>,

    events: EventLog,
}

impl SessionState {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts,
            master: None,
            active_copies: HashMap::new(),
            pending_stops: HashMap::new(),
            events: EventLog::new(),
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, loginid: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.loginid == loginid)
    }

    pub fn master(&self) -> Option<&MasterAccount> {
        self.master.as_ref()
    }

    pub fn set_master(&mut self, master: MasterAccount) {
        self.events
            .success(format!("Master authenticated: {}", master.loginid));
        self.master = Some(master);
    }

    /// Clear the master designation. Active copies are untouched; stopping
    /// them remains an explicit action.
    pub fn clear_master(&mut self) {
        if self.master.take().is_some() {
            self.events.info("Master account removed");
        }
    }

    pub fn active_copies(&self) -> &HashMap<String, String> {
        &self.active_copies
    }

    pub fn is_copying(&self, loginid: &str) -> bool {
        self.active_copies.contains_key(loginid)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    /// Gate for copy-start: the account must exist, a master must be set,
    /// currencies must match, and no copy may already be active. On
    /// success returns the follower account and the master token to start
    /// with.
    pub fn check_copy_start(&self, loginid: &str) -> Result<(&Account, &str), GateRejection> {
        let master = self.master.as_ref().ok_or(GateRejection::NoMaster)?;
        let account = self
            .account(loginid)
            .ok_or_else(|| GateRejection::UnknownAccount(loginid.to_string()))?;

        if account.currency != master.currency {
            return Err(GateRejection::CurrencyMismatch {
                account: account.currency.clone(),
                master: master.currency.clone(),
            });
        }
        if self.active_copies.contains_key(loginid) {
            return Err(GateRejection::AlreadyCopying(loginid.to_string()));
        }

        Ok((account, &master.token))
    }

    /// Gate for copy-stop: returns the token the copy session was started
    /// with.
    pub fn check_copy_stop(&self, loginid: &str) -> Result<String, GateRejection> {
        self.active_copies
            .get(loginid)
            .cloned()
            .ok_or_else(|| GateRejection::NotCopying(loginid.to_string()))
    }

    /// Record an in-flight copy-stop so its acknowledgment can be matched
    /// back to the account it was issued for.
    pub fn note_stop_request(&mut self, req_id: u64, loginid: &str) {
        self.pending_stops.insert(req_id, loginid.to_string());
    }

    /// Forget in-flight stops after the connection was replaced. Their
    /// acknowledgments can never arrive, and a fresh connection restarts
    /// the request-id space, so stale entries would collide with new ids.
    pub fn clear_pending_stops(&mut self) {
        if self.pending_stops.is_empty() {
            return;
        }
        self.events.error(format!(
            "{} in-flight stop requests orphaned by reconnect",
            self.pending_stops.len()
        ));
        self.pending_stops.clear();
    }

    /// Cache the balance reported by an authorize acknowledgment. This is
    /// the only way a balance ever updates.
    pub fn cache_balance(&mut self, info: &AuthorizeInfo) {
        if let Some(account) = self
            .accounts
            .iter_mut()
            .find(|a| a.loginid == info.loginid)
        {
            account.balance = Some(info.balance);
        }
    }

    /// Dispatch one inbound message by its `msg_type`.
    pub fn apply(&mut self, resp: &ApiResponse) {
        match resp.kind() {
            MessageKind::Error => {
                if let Some(err) = &resp.error {
                    self.events
                        .error(format!("API error: {} ({})", err.message, err.code));
                }
            }
            MessageKind::Authorize => {
                if let Some(auth) = &resp.authorize {
                    self.cache_balance(auth);
                    self.events.success(format!("Authorized as {}", auth.loginid));
                }
            }
            MessageKind::CopyStart => self.handle_copy_start(resp),
            MessageKind::CopyStop => self.handle_copy_stop(resp),
            MessageKind::Pong => {
                tracing::trace!("Keepalive pong");
            }
            MessageKind::Other => {
                tracing::debug!(msg_type = ?resp.msg_type, "Ignoring message");
            }
        }
    }

    fn handle_copy_start(&mut self, resp: &ApiResponse) {
        let echo = resp.echo_req.as_ref();
        let loginid = echo.and_then(|e| e.loginid.clone());
        let token = echo.and_then(|e| e.copy_start.clone());

        match (loginid, token) {
            (Some(loginid), Some(token)) => {
                self.active_copies.insert(loginid.clone(), token);
                self.events
                    .success(format!("Copy trading started for {}", loginid));
            }
            _ => {
                self.events
                    .error("copy_start acknowledgment missing echo_req fields");
            }
        }
    }

    fn handle_copy_stop(&mut self, resp: &ApiResponse) {
        let loginid = resp
            .req_id
            .and_then(|id| self.pending_stops.remove(&id));

        match loginid {
            Some(loginid) => {
                self.active_copies.remove(&loginid);
                self.events
                    .info(format!("Copy trading stopped for {}", loginid));
            }
            None => {
                self.events
                    .error("copy_stop acknowledgment matches no in-flight request");
            }
        }
    }

    /// Logout sweep: hand back one (loginid, session token) pair per
    /// currently-active copy and clear all local state. The caller issues
    /// the stop requests; the local clear does not wait for their
    /// acknowledgments.
    pub fn logout_sweep(&mut self) -> Vec<(String, String)> {
        let stops: Vec<(String, String)> = self
            .active_copies
            .drain()
            .collect();

        self.master = None;
        self.pending_stops.clear();
        self.events
            .info(format!("Logout: stopping {} active copies", stops.len()));

        stops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiResponse;
    use rust_decimal_macros::dec;

    fn account(loginid: &str, currency: &str) -> Account {
        Account::new(loginid.into(), format!("a1-{}", loginid), currency.into())
    }

    fn master(currency: &str) -> MasterAccount {
        MasterAccount {
            loginid: "CR999".into(),
            currency: currency.into(),
            balance: dec!(5000),
            token: "a1-master".into(),
        }
    }

    fn state_with_master() -> SessionState {
        let mut state = SessionState::new(vec![account("CR100", "USD"), account("CR200", "EUR")]);
        state.set_master(master("USD"));
        state
    }

    fn copy_start_ack(loginid: &str, token: &str) -> ApiResponse {
        serde_json::from_value(serde_json::json!({
            "msg_type": "copy_start",
            "copy_start": 1,
            "req_id": 2,
            "echo_req": { "copy_start": token, "loginid": loginid, "req_id": 2 },
        }))
        .unwrap()
    }

    fn copy_stop_ack(req_id: u64) -> ApiResponse {
        serde_json::from_value(serde_json::json!({
            "msg_type": "copy_stop",
            "copy_stop": 1,
            "req_id": req_id,
            "echo_req": { "copy_stop": "a1-master", "req_id": req_id },
        }))
        .unwrap()
    }

    #[test]
    fn test_currency_mismatch_rejected_without_mutation() {
        let state = state_with_master();

        let err = state.check_copy_start("CR200").unwrap_err();
        assert_eq!(
            err,
            GateRejection::CurrencyMismatch {
                account: "EUR".into(),
                master: "USD".into(),
            }
        );
        assert!(state.active_copies().is_empty());
    }

    #[test]
    fn test_no_master_rejected() {
        let state = SessionState::new(vec![account("CR100", "USD")]);
        assert_eq!(state.check_copy_start("CR100").unwrap_err(), GateRejection::NoMaster);
    }

    #[test]
    fn test_copy_start_ack_adds_exactly_one_entry() {
        let mut state = state_with_master();
        assert!(state.check_copy_start("CR100").is_ok());

        state.apply(&copy_start_ack("CR100", "a1-master"));

        assert_eq!(state.active_copies().len(), 1);
        assert_eq!(state.active_copies().get("CR100").unwrap(), "a1-master");
    }

    #[test]
    fn test_double_start_gated_after_ack() {
        let mut state = state_with_master();
        state.apply(&copy_start_ack("CR100", "a1-master"));

        assert_eq!(
            state.check_copy_start("CR100").unwrap_err(),
            GateRejection::AlreadyCopying("CR100".into())
        );
    }

    #[test]
    fn test_copy_stop_ack_removes_entry() {
        let mut state = state_with_master();
        state.apply(&copy_start_ack("CR100", "a1-master"));

        let token = state.check_copy_stop("CR100").unwrap();
        assert_eq!(token, "a1-master");

        state.note_stop_request(5, "CR100");
        state.apply(&copy_stop_ack(5));

        assert!(state.active_copies().is_empty());
        assert!(!state.is_copying("CR100"));
    }

    #[test]
    fn test_unmatched_copy_stop_ack_is_logged_only() {
        let mut state = state_with_master();
        state.apply(&copy_start_ack("CR100", "a1-master"));

        state.apply(&copy_stop_ack(99));

        // Nothing removed, error recorded.
        assert_eq!(state.active_copies().len(), 1);
        assert!(state
            .events()
            .entries()
            .any(|e| e.message.contains("no in-flight request")));
    }

    #[test]
    fn test_logout_sweep_one_stop_per_copy_then_clears() {
        let mut state = SessionState::new(vec![
            account("CR100", "USD"),
            account("CR300", "USD"),
        ]);
        state.set_master(master("USD"));
        state.apply(&copy_start_ack("CR100", "a1-master"));
        state.apply(&copy_start_ack("CR300", "a1-master"));

        let stops = state.logout_sweep();

        assert_eq!(stops.len(), 2);
        assert!(stops.iter().all(|(_, token)| token == "a1-master"));
        assert!(state.active_copies().is_empty());
        assert!(state.master().is_none());
    }

    #[test]
    fn test_error_response_goes_to_event_log() {
        let mut state = state_with_master();
        let resp: ApiResponse = serde_json::from_value(serde_json::json!({
            "msg_type": "copy_start",
            "error": { "code": "CopyTradingNotAllowed", "message": "not allowed" },
        }))
        .unwrap();

        state.apply(&resp);

        assert!(state.active_copies().is_empty());
        assert!(state
            .events()
            .entries()
            .any(|e| e.message.contains("CopyTradingNotAllowed")));
    }

    #[test]
    fn test_balance_cached_from_authorize_ack() {
        let mut state = state_with_master();
        let resp: ApiResponse = serde_json::from_value(serde_json::json!({
            "msg_type": "authorize",
            "req_id": 1,
            "authorize": { "loginid": "CR100", "currency": "USD", "balance": "250.75" },
        }))
        .unwrap();

        state.apply(&resp);

        assert_eq!(state.account("CR100").unwrap().balance, Some(dec!(250.75)));
        // Unrelated accounts untouched.
        assert_eq!(state.account("CR200").unwrap().balance, None);
    }

    #[test]
    fn test_clear_master() {
        let mut state = state_with_master();
        state.clear_master();
        assert!(state.master().is_none());
    }

    #[test]
    fn test_cleared_pending_stops_do_not_match_new_connection_ids() {
        let mut state = state_with_master();
        state.apply(&copy_start_ack("CR100", "a1-master"));
        state.note_stop_request(5, "CR100");

        // Connection replaced: the in-flight stop is orphaned and a new
        // connection will reuse id 5 for something else.
        state.clear_pending_stops();

        state.apply(&copy_stop_ack(5));

        assert_eq!(state.active_copies().len(), 1);
        assert!(state
            .events()
            .entries()
            .any(|e| e.message.contains("orphaned by reconnect")));
    }

    #[test]
    fn test_clear_pending_stops_noop_when_empty() {
        let mut state = state_with_master();
        state.clear_pending_stops();
        assert!(!state
            .events()
            .entries()
            .any(|e| e.message.contains("orphaned")));
    }
}
