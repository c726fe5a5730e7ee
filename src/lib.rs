pub mod config;
pub mod error;
pub mod governance;
pub mod middleware;
pub mod security;
pub mod server;

pub use config::GovernanceConfig;
pub use error::{GovernanceError, GovernanceResult};
pub use governance::{Denial, Governance, LoginAttempt, LoginOutcome};
