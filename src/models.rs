// src/models.rs - Account and session records
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Session storage keys
pub const CURRENT_USER_KEY: &str = "currentUser";
pub const JUST_LOGGED_IN_KEY: &str = "justLoggedIn";

pub const DASHBOARD_PATH: &str = "/app/dashboard";
pub const LOGIN_PATH: &str = "/";

/// A bank customer account as returned by the accounts collaborator.
///
/// The password is stored and compared in the clear by the demo backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub password: String,
    pub name: String,
    pub username: String,
}

impl Account {
    pub fn new(name: &str, username: &str, email: &str, password: &str) -> Self {
        Account {
            email: email.trim().to_string(),
            password: password.to_string(),
            name: name.trim().to_string(),
            username: username.trim().to_string(),
        }
    }

    /// Emails are unique keys and compare case-insensitively.
    pub fn has_email(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }
}

/// Session record written to session storage under `currentUser` once
/// login completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub email: String,
    pub name: String,
    pub username: String,
    pub logged_in_at: DateTime<Utc>,
}

impl From<&Account> for CurrentUser {
    fn from(account: &Account) -> Self {
        CurrentUser {
            email: account.email.clone(),
            name: account.name.clone(),
            username: account.username.clone(),
            logged_in_at: Utc::now(),
        }
    }
}

/// Find an account by email among a loaded account list.
pub fn find_account<'a>(accounts: &'a [Account], email: &str) -> Option<&'a Account> {
    accounts.iter().find(|account| account.has_email(email))
}
