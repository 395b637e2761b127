use super::*;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::device::REDACTED;
use crate::reconcile::CommandRunner;

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordLevel {
    /// Disable recording.
    #[default]
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw shell chunk events.
    pub keep_raw_chunks: bool,
    /// Keep privilege-raised events.
    pub keep_privilege_events: bool,
    /// Keep reconnect events.
    pub keep_reconnects: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_privilege_events: true,
            keep_reconnects: false,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
        prompt: String,
        privilege: Privilege,
    },
    ConnectionClosed {
        reason: String,
    },
    PrivilegeRaised {
        privilege: Privilege,
    },
    CommandOutput(CommandResult),
    Reconnected {
        reason: String,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
///
/// Clones share the same buffer, so a recorder handed to the [`Engine`] can be
/// read back by the caller.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

fn lock_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::InternalError(format!("record lock error: {e}"))
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), EngineError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self.entries.lock().map_err(lock_error)?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), EngineError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, EngineError> {
        let guard = self.entries.lock().map_err(lock_error)?;
        Ok(guard.clone())
    }

    pub fn clear(&self) -> Result<(), EngineError> {
        let mut guard = self.entries.lock().map_err(lock_error)?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, EngineError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| EngineError::InternalError(format!("record encode error: {e}")))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, EngineError> {
        let parsed = jsonl
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<SessionRecordEntry>(line)
                    .map_err(|e| EngineError::InternalError(format!("record decode error: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are ordered by timestamp (ties keep their recorded order) and
    /// noisy events are filtered according to `options`.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, EngineError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut entries = recorder.entries()?;
        entries.sort_by_key(|entry| entry.ts_ms);

        let filtered = entries
            .into_iter()
            .filter(|entry| match &entry.event {
                SessionEvent::RawChunk { .. } => options.keep_raw_chunks,
                SessionEvent::PrivilegeRaised { .. } => options.keep_privilege_events,
                SessionEvent::Reconnected { .. } => options.keep_reconnects,
                _ => true,
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Connection context captured at the start of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    pub device_addr: String,
    pub prompt: String,
    pub privilege: Privilege,
}

/// Offline command runner backed by session recording data.
///
/// Each call consumes the next recorded output for the same command text, so
/// a recorded `read`/`apply` can be run again without a device.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl SessionReplayer {
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries().unwrap_or_default();
        Self { entries, cursor: 0 }
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, EngineError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Returns initial connection context if present in recording.
    pub fn initial_context(&self) -> Option<ReplayContext> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::ConnectionEstablished {
                device_addr,
                prompt,
                privilege,
            } => Some(ReplayContext {
                device_addr: device_addr.clone(),
                prompt: prompt.clone(),
                privilege: *privilege,
            }),
            _ => None,
        })
    }

    /// Number of recorded command outputs not yet consumed.
    pub fn remaining(&self) -> usize {
        self.entries[self.cursor.min(self.entries.len())..]
            .iter()
            .filter(|entry| matches!(entry.event, SessionEvent::CommandOutput(_)))
            .count()
    }

    /// Replay the next recorded output for the given command.
    ///
    /// A command recorded as [`REDACTED`] stands for whatever command is asked
    /// for at that point. A recorded timeout is raised as [`EngineError::TimeoutError`], the same
    /// way the live framer reports it.
    pub fn replay_next(&mut self, command: &str) -> Result<CommandResult, EngineError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;

            if let SessionEvent::CommandOutput(result) = &entry.event {
                if result.command != command && result.command != REDACTED {
                    continue;
                }
                if result.signal == ExitSignal::Timeout {
                    return Err(EngineError::TimeoutError {
                        command: command.to_string(),
                        elapsed: result.elapsed(),
                        partial: result.content(),
                    });
                }
                let mut result = result.clone();
                result.command = command.to_string();
                return Ok(result);
            }
        }

        Err(EngineError::ReplayMismatchError(format!(
            "no replayable output found for command '{command}'"
        )))
    }
}

impl CommandRunner for SessionReplayer {
    async fn run(&mut self, command: &Command) -> Result<CommandResult, EngineError> {
        self.replay_next(&command.text)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
