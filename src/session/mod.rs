//! Device sessions, command framing and session lifecycle.
//!
//! This module owns everything between a caller and the device shell: the
//! transport ([`Connector`], [`ShellChannel`], [`SshConnector`]), the framer
//! ([`Session::execute`]) that turns one [`Command`] into one [`CommandResult`],
//! and the coordinator ([`Engine`]) that serializes work per device, reconnects
//! after transport loss and closes idle sessions.
//!
//! # Main Components
//!
//! - [`Engine`] - Per-device session coordinator
//! - [`Session`] - One authenticated CLI session with privilege tracking
//! - [`Command`] - A single line of CLI input
//! - [`CommandResult`] - The framed device response

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::device::DeviceDialect;
use crate::error::EngineError;

pub use client::SshConnector;
pub use manager::{DeviceHandle, Engine};
pub use recording::{
    NormalizeOptions, ReplayContext, SessionEvent, SessionRecordEntry, SessionRecordLevel,
    SessionRecorder, SessionReplayer,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use transport::{Connector, Line, Link, ShellChannel};

/// Privilege level of a CLI session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    #[default]
    Normal,
    Administrator,
}

/// Whether a command reads or changes configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Query,
    Mutation,
}

/// An interactive confirmation a command is expected to raise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Confirmation {
    /// Regex matched against the unterminated tail of the output.
    pub prompt: String,
    /// Keystrokes sent when the prompt appears.
    pub answer: String,
}

/// One line of CLI input plus its completion expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Command {
    /// Literal command text, without terminator
    pub text: String,

    /// Privilege level the session must hold before the command is sent
    pub privilege: Privilege,

    pub kind: CommandKind,

    /// Optional confirmation prompt answered while the command runs
    #[serde(default)]
    pub confirm: Option<Confirmation>,

    /// Single command timeout (seconds)
    /// If None, the engine's configured command timeout applies
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Command {
    /// A read-only command runnable without elevation.
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            privilege: Privilege::Normal,
            kind: CommandKind::Query,
            confirm: None,
            timeout_secs: None,
        }
    }

    /// A configuration change; requires administrator mode.
    pub fn mutation(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            privilege: Privilege::Administrator,
            kind: CommandKind::Mutation,
            confirm: None,
            timeout_secs: None,
        }
    }

    pub fn with_privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn with_confirmation(mut self, prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        self.confirm = Some(Confirmation {
            prompt: prompt.into(),
            answer: answer.into(),
        });
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub(crate) fn timeout_or(&self, fallback: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(fallback)
    }
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExitSignal {
    Success,
    /// The device printed an error line; `message` is the first one.
    DeviceError { message: String },
    /// Only appears in recordings; a live timeout is raised as an error.
    Timeout,
}

/// The framed response to one [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandResult {
    pub command: String,
    /// Output lines, wrap-reassembled, with echo and prompt removed.
    pub lines: Vec<String>,
    pub signal: ExitSignal,
    /// The device error names an object that does not exist.
    #[serde(default)]
    pub absent: bool,
    pub elapsed_ms: u64,
    /// Prompt captured after the command completed.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        matches!(self.signal, ExitSignal::Success)
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.signal {
            ExitSignal::DeviceError { message } => Some(message),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Output joined with newlines.
    pub fn content(&self) -> String {
        self.lines.join("\n")
    }
}

/// Everything needed to reach and log into one device.
#[derive(Clone)]
pub struct DeviceTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Password for administrator mode; required for any mutation.
    pub admin_password: Option<SecretString>,
}

impl DeviceTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: SecretString::from(password.into()),
            admin_password: None,
        }
    }

    pub fn with_admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = Some(SecretString::from(password.into()));
        self
    }

    /// Identity key: `user@host:port`.
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// SHA-256 over both secrets, used to notice credential changes.
    fn credentials_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.password.expose_secret().as_bytes());
        hasher.update([0u8]);
        if let Some(admin) = self.admin_password.as_ref() {
            hasher.update(admin.expose_secret().as_bytes());
        }
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for DeviceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One live, authenticated CLI session.
pub struct Session {
    channel: ShellChannel,
    dialect: Arc<DeviceDialect>,
    device: String,
    privilege: Privilege,
    line_width: usize,
    last_activity: Instant,
    prompt: String,
    admin_password: Option<SecretString>,
    recorder: Option<SessionRecorder>,
    closed: bool,
}

mod client;
mod framer;
mod manager;
mod recording;
mod security;
mod transport;
