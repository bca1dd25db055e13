//! Data models for linked accounts and the master designation.

mod account;

pub use account::{Account, MasterAccount};
