//! # System Constants
//!
//! Reserved state tokens, engine diagnostic codes and operational defaults.
//! Diagnostic codes are written verbatim into `last_error` so callers watching
//! an instance can match on them.

/// Universal terminal state tokens shared by every process.
pub mod states {
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";

    pub const TERMINAL: [&str; 2] = [COMPLETED, FAILED];

    pub fn is_terminal(token: &str) -> bool {
        TERMINAL.contains(&token)
    }
}

/// Codes recorded in `last_error` by the engine itself (never by handlers).
pub mod diagnostics {
    pub const NO_HANDLER_FOR_STATE: &str = "NO_HANDLER_FOR_STATE";
    pub const UNKNOWN_PROCESS: &str = "UNKNOWN_PROCESS";
    pub const INVALID_STATE_RETURNED: &str = "INVALID_STATE_RETURNED";
    pub const MAX_ATTEMPTS_EXCEEDED: &str = "MAX_ATTEMPTS_EXCEEDED";
    pub const STUCK_TIMEOUT: &str = "STUCK_TIMEOUT";
    pub const HANDLER_PANICKED: &str = "HANDLER_PANICKED";
    pub const UNPARSEABLE_STATE: &str = "UNPARSEABLE_STATE";
}

/// Engine defaults used when configuration omits a value.
pub mod defaults {
    pub const BATCH_SIZE: u32 = 10;
    pub const WORKER_POOL_SIZE: usize = 4;
    pub const POLL_INTERVAL_MS: u64 = 5_000;
    pub const ERROR_BACKOFF_MS: u64 = 5_000;
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const SWEEP_INTERVAL_SECONDS: u64 = 60;
    pub const STUCK_THRESHOLD_MINUTES: u64 = 30;
    pub const BACKOFF_BASE_DELAY_MS: u64 = 1_000;
    pub const BACKOFF_MAX_DELAY_MS: u64 = 60_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const ATTEMPTS_INCREMENT: u32 = 1;
}
