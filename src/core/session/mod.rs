pub mod book;
pub mod manager;
pub mod model;
pub mod service;

pub use book::{AccountBook, ActiveChange};
pub use manager::{
    AccountSessionManager, LogoutOutcome, SweepReport, SwitchOutcome, ACCOUNT_SWEEP_INTERVAL,
};
pub use model::{
    Account, AuthErrorCode, EnvelopeStatus, Session, SessionCheck, SessionEnvelope, SyncStatus,
};
pub use service::{AccessDecision, AccessService, OpenAccess, SessionService};
