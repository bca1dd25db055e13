//! Application configuration and account-list parsing.

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::models::Account;

/// Default Deriv application id registered for this tool.
pub const DEFAULT_APP_ID: u32 = 66842;

/// Default WebSocket v3 endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3";

/// Connection settings shared by every socket this tool opens.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Deriv application id appended to the endpoint URL
    pub app_id: u32,

    /// WebSocket endpoint (without the `app_id` query parameter)
    pub endpoint: String,

    /// Keepalive ping interval in seconds
    pub ping_interval_secs: u64,

    /// Timeout for an authorize round-trip in seconds
    pub request_timeout_secs: u64,

    /// Reconnect attempts before giving up on a dropped session
    pub max_reconnect_attempts: u32,

    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            ping_interval_secs: 30,
            request_timeout_secs: 10,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
        }
    }
}

impl AppConfig {
    /// Full connection URL including the application id.
    pub fn url(&self) -> String {
        format!("{}?app_id={}", self.endpoint, self.app_id)
    }
}

/// Parse the linked-account list from query-string parameters.
///
/// The account list travels as `acct{n}` / `token{n}` / `cur{n}` triples
/// with `n` starting at 1; parsing stops at the first missing `acct{n}`,
/// so the run must be contiguous. An `acct{n}` without a matching token or
/// currency is rejected rather than half-constructed.
pub fn parse_accounts(query: &str) -> Result<Vec<Account>> {
    let query = query.trim_start_matches('?');
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut accounts = Vec::new();
    let mut i = 1usize;

    while let Some(loginid) = params.get(&format!("acct{}", i)) {
        let Some(token) = params.get(&format!("token{}", i)) else {
            bail!("account {} ({}) is missing token{}", i, loginid, i);
        };
        let Some(currency) = params.get(&format!("cur{}", i)) else {
            bail!("account {} ({}) is missing cur{}", i, loginid, i);
        };

        accounts.push(Account::new(
            loginid.clone(),
            token.clone(),
            currency.to_uppercase(),
        ));
        i += 1;
    }

    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accounts_contiguous() {
        let accounts =
            parse_accounts("acct1=CR100&token1=a1-x&cur1=usd&acct2=CR200&token2=a1-y&cur2=eur")
                .unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].loginid, "CR100");
        assert_eq!(accounts[0].currency, "USD");
        assert_eq!(accounts[1].loginid, "CR200");
        assert_eq!(accounts[1].currency, "EUR");
        assert!(accounts[0].balance.is_none());
    }

    #[test]
    fn test_parse_accounts_stops_at_gap() {
        // acct3 exists but acct2 does not: the run ends after acct1.
        let accounts =
            parse_accounts("acct1=CR100&token1=a1-x&cur1=USD&acct3=CR300&token3=a1-z&cur3=USD")
                .unwrap();

        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].loginid, "CR100");
    }

    #[test]
    fn test_parse_accounts_missing_token_is_error() {
        let err = parse_accounts("acct1=CR100&cur1=USD").unwrap_err();
        assert!(err.to_string().contains("token1"));
    }

    #[test]
    fn test_parse_accounts_empty() {
        assert!(parse_accounts("").unwrap().is_empty());
        assert!(parse_accounts("foo=bar").unwrap().is_empty());
    }

    #[test]
    fn test_url_includes_app_id() {
        let config = AppConfig::default();
        assert!(config.url().ends_with(&format!("?app_id={}", DEFAULT_APP_ID)));
    }
}
