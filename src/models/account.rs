//! Account models for linked (follower) accounts and the master designation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A linked account parsed from the `acct{n}` / `token{n}` / `cur{n}`
/// query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Deriv login id (e.g. "CR90000000")
    pub loginid: String,

    /// API token used to authorize as this account
    pub token: String,

    /// ISO currency code, upper-cased at parse time
    pub currency: String,

    /// Balance cached from the last `authorize` acknowledgment.
    /// `None` until this account has authorized at least once.
    pub balance: Option<Decimal>,
}

impl Account {
    /// Create a new account with no cached balance.
    pub fn new(loginid: String, token: String, currency: String) -> Self {
        Self {
            loginid,
            token,
            currency,
            balance: None,
        }
    }

    /// Display string for the cached balance.
    pub fn balance_display(&self) -> String {
        match self.balance {
            Some(b) => format!("{:.2}", b),
            None => "-".to_string(),
        }
    }
}

/// The account whose trades are mirrored. At most one exists at a time;
/// it is set by an out-of-band authorization and cleared explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterAccount {
    pub loginid: String,
    pub currency: String,
    pub balance: Decimal,

    /// The token the master authorized with; reused as the `copy_start`
    /// value when a follower begins copying.
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_display() {
        let mut account = Account::new("CR1".into(), "a1-x".into(), "USD".into());
        assert_eq!(account.balance_display(), "-");

        account.balance = Some(dec!(1234.5));
        assert_eq!(account.balance_display(), "1234.50");
    }
}
