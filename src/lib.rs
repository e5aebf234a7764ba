// Adaptive authentication and session-risk core for the online banking front end
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod models;
pub mod security;
pub mod services;
pub mod statements;
pub mod storage;
pub mod utils;

pub use context::{Collaborators, DemoBackend, SecurityContext};
pub use error::{AuthError, Result};
