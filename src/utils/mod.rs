// src/utils/mod.rs - Small shared helpers
pub mod logging;
pub mod task;

use uuid::Uuid;

/// Generates a unique ID for entities
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

/// Masks an email for log lines: `asha@bank.com` -> `a***@bank.com`
pub fn mask_email(email: &str) -> String {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}
