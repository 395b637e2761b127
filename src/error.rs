//! Error types for sessions, parsing and reconciliation.
//!
//! Every failure the engine can surface to a caller is a variant of
//! [`EngineError`]. Transport-level faults ([`EngineError::TransportClosedError`]
//! and [`EngineError::TimeoutError`]) are retried once by the coordinator before
//! they are turned into [`EngineError::SessionError`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a device or reconciling its configuration.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The remote shell could not be established.
    ///
    /// Covers TCP failures, SSH negotiation failures and shell/PTY request
    /// failures. Surfaced immediately, never retried.
    #[error("connect error: {0}")]
    ConnectError(String),

    /// The device rejected the login credentials.
    #[error("authentication failed for {user}@{host}")]
    AuthenticationError { user: String, host: String },

    /// A single command did not complete within its deadline.
    ///
    /// Carries the output captured before the timer fired.
    #[error("command '{command}' timed out after {elapsed:?}")]
    TimeoutError {
        command: String,
        elapsed: Duration,
        partial: String,
    },

    /// The shell channel closed underneath an operation.
    #[error("transport closed")]
    TransportClosedError,

    /// Administrator mode could not be entered.
    #[error("privilege elevation rejected: {0}")]
    PrivilegeError(String),

    /// Device output contradicts the resource being present.
    #[error("malformed output for '{grammar}': {reason}")]
    MalformedOutputError { grammar: String, reason: String },

    /// A mutation was rejected part-way through a plan.
    #[error("{0}")]
    ApplyError(Box<ApplyFailure>),

    /// Reconnect-and-retry did not recover the session.
    ///
    /// The session is left closed; the next call opens a fresh one.
    #[error("session lost for {device}: {reason}")]
    SessionError { device: String, reason: String },

    /// Import found nothing matching the requested identity.
    #[error("{0} not found")]
    NotFoundError(String),

    /// A read-only query was rejected by the device.
    #[error("device rejected '{command}': {message}")]
    DeviceError { command: String, message: String },

    /// The caller deadline expired; the session was torn down.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The grammar document is inconsistent (bad regex, unknown field, ...).
    #[error("invalid grammar: {0}")]
    InvalidGrammar(String),

    /// A desired record does not fit its grammar.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A dialect definition failed to compile.
    #[error("invalid dialect: {0}")]
    InvalidDialect(String),

    /// No built-in dialect has the requested name.
    #[error("dialect not found: {0}")]
    DialectNotFound(String),

    /// A replayed session diverged from its recording.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Faults the coordinator answers with a reconnect and a single retry.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            EngineError::TransportClosedError | EngineError::TimeoutError { .. }
        )
    }
}

/// Partial-execution detail carried by [`EngineError::ApplyError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFailure {
    /// Resource (grammar) name the plan belonged to.
    pub resource: String,
    /// Commands the device accepted, in order.
    pub executed: Vec<String>,
    /// The command that failed.
    pub failed: String,
    /// Commands after the failure that were never sent.
    pub pending: Vec<String>,
    /// Device message or session failure reason.
    pub reason: String,
}

impl ApplyFailure {
    /// Commands whose effect is not confirmed: the failed one and everything after it.
    pub fn not_confirmed(&self) -> Vec<String> {
        let mut commands = Vec::with_capacity(self.pending.len() + 1);
        commands.push(self.failed.clone());
        commands.extend(self.pending.iter().cloned());
        commands
    }
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "apply of '{}' failed at '{}' after {} executed command(s): {}",
            self.resource,
            self.failed,
            self.executed.len(),
            self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_closed_and_timeout_are_transport_faults() {
        assert!(EngineError::TransportClosedError.is_transport_fault());
        assert!(
            EngineError::TimeoutError {
                command: "show config".to_string(),
                elapsed: Duration::from_secs(1),
                partial: String::new(),
            }
            .is_transport_fault()
        );
        assert!(!EngineError::PrivilegeError("denied".to_string()).is_transport_fault());
        assert!(!EngineError::DeadlineExceeded.is_transport_fault());
    }

    #[test]
    fn apply_failure_lists_unconfirmed_commands() {
        let failure = ApplyFailure {
            resource: "syslog".to_string(),
            executed: vec!["syslog host 10.0.0.1".to_string()],
            failed: "syslog host 10.0.0.2".to_string(),
            pending: vec!["syslog host 10.0.0.3".to_string()],
            reason: "Error: Invalid parameter".to_string(),
        };

        assert_eq!(
            failure.not_confirmed(),
            vec!["syslog host 10.0.0.2", "syslog host 10.0.0.3"]
        );
        let rendered = EngineError::ApplyError(Box::new(failure)).to_string();
        assert!(rendered.contains("after 1 executed command(s)"));
    }
}
