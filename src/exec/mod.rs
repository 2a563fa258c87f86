pub mod environment;
pub mod manager;
pub mod runner;

pub use manager::{ExecSessionManager, ExecSettings, RunOutcome, RunSpec, SessionStatus};
