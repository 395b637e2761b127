use super::*;

use std::borrow::Cow;
use std::future::Future;

use moka::future::Cache;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::EngineConfig;
use crate::grammar::{Grammar, Record};
use crate::reconcile::{self, ApplyOptions, CommandPlan, CommandRunner};

/// Per-device session state guarded by the slot mutex.
pub(super) struct DeviceSlot {
    key: String,
    credentials: [u8; 32],
    session: Option<Session>,
}

impl DeviceSlot {
    fn new(key: String) -> Self {
        Self {
            key,
            credentials: [0u8; 32],
            session: None,
        }
    }

    async fn close(&mut self, reason: &str) {
        if let Some(mut session) = self.session.take() {
            session.close(reason).await;
        }
    }

    fn discard(&mut self, reason: &str) {
        if let Some(mut session) = self.session.take() {
            session.abandon(reason);
        }
    }

    fn is_idle(&self, window: Duration) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.idle_for() >= window)
    }
}

struct EngineInner<C: Connector> {
    connector: C,
    dialect: Arc<DeviceDialect>,
    config: EngineConfig,
    slots: Cache<String, Arc<Mutex<DeviceSlot>>>,
    recorder: Option<SessionRecorder>,
}

/// Session lifecycle coordinator.
///
/// Holds at most one session per device identity (`user@host:port`). Calls for
/// the same device queue on that device's mutex in arrival order; calls for
/// different devices run independently. Cloning is cheap and shares all state.
pub struct Engine<C: Connector> {
    inner: Arc<EngineInner<C>>,
}

impl<C: Connector> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> Engine<C> {
    /// Creates an engine. Sessions are opened lazily on first use.
    pub fn new(connector: C, dialect: DeviceDialect, config: EngineConfig) -> Self {
        let slots = Cache::builder()
            .max_capacity(config.max_devices)
            .time_to_idle(config.idle_timeout())
            .eviction_listener(|key, slot: Arc<Mutex<DeviceSlot>>, cause| {
                debug!("Evicting {} ({:?})", key, cause);
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        slot.lock().await.close("evicted").await;
                    });
                }
            })
            .build();

        let recorder = match config.record_level {
            SessionRecordLevel::Off => None,
            level => Some(SessionRecorder::new(level)),
        };

        Self {
            inner: Arc::new(EngineInner {
                connector,
                dialect: Arc::new(dialect),
                config,
                slots,
                recorder,
            }),
        }
    }

    /// Scopes operations to one device.
    pub fn device(&self, target: &DeviceTarget) -> DeviceHandle<C> {
        DeviceHandle {
            engine: self.clone(),
            target: target.clone(),
            deadline: None,
        }
    }

    pub fn dialect(&self) -> &DeviceDialect {
        &self.inner.dialect
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Recorder shared by every session, present unless recording is off.
    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.inner.recorder.as_ref()
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<DeviceSlot>> {
        let entry = self
            .inner
            .slots
            .entry(key.to_string())
            .or_insert_with(async { Arc::new(Mutex::new(DeviceSlot::new(key.to_string()))) })
            .await;
        if entry.is_fresh() {
            debug!("Cache miss, new slot for {}", key);
        } else {
            debug!("Cache hit: {}", key);
        }
        entry.into_value()
    }

    /// Closes sessions idle past the configured window. Busy devices are skipped.
    ///
    /// Returns the number of sessions closed.
    pub async fn sweep_idle(&self) -> usize {
        self.inner.slots.run_pending_tasks().await;
        let window = self.inner.config.idle_timeout();
        let mut closed = 0;
        let slots = self.inner.slots.iter().collect::<Vec<_>>();
        for (key, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.is_idle(window) {
                debug!("{} idle for more than {:?}, closing", key, window);
                guard.close("idle timeout").await;
                closed += 1;
            }
        }
        closed
    }

    /// Closes every session and forgets all devices.
    pub async fn shutdown(&self) {
        let slots = self.inner.slots.iter().collect::<Vec<_>>();
        for (_, slot) in slots {
            slot.lock().await.close("shutdown").await;
        }
        self.inner.slots.invalidate_all();
        self.inner.slots.run_pending_tasks().await;
        info!("Engine shut down");
    }
}

/// Operations bound to one device, optionally under a deadline.
pub struct DeviceHandle<C: Connector> {
    engine: Engine<C>,
    target: DeviceTarget,
    deadline: Option<Instant>,
}

impl<C: Connector> DeviceHandle<C> {
    /// Bounds every later operation on this handle by `deadline`.
    ///
    /// When it expires mid-operation the session is torn down and
    /// [`EngineError::DeadlineExceeded`] is returned.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub async fn read(&self, grammar: &Grammar) -> Result<Option<Record>, EngineError> {
        let slot = self.engine.slot(&self.target.key()).await;
        let mut guard = self.lock(&slot).await?;
        let outcome = {
            let mut runner = self.runner(&mut guard);
            self.bounded(reconcile::read(&mut runner, grammar)).await
        };
        self.settle(&mut guard, outcome)
    }

    /// Computes the commands `apply` would send, without sending them.
    pub async fn plan(&self, grammar: &Grammar, desired: &Record) -> Result<CommandPlan, EngineError> {
        let slot = self.engine.slot(&self.target.key()).await;
        let mut guard = self.lock(&slot).await?;
        let outcome = {
            let mut runner = self.runner(&mut guard);
            self.bounded(reconcile::plan(&mut runner, grammar, desired)).await
        };
        self.settle(&mut guard, outcome)
    }

    pub async fn apply(&self, grammar: &Grammar, desired: &Record) -> Result<Record, EngineError> {
        let options = ApplyOptions {
            save: self.save_command(),
        };
        let slot = self.engine.slot(&self.target.key()).await;
        let mut guard = self.lock(&slot).await?;
        let outcome = {
            let mut runner = self.runner(&mut guard);
            self.bounded(reconcile::apply(&mut runner, grammar, desired, &options))
                .await
        };
        self.settle(&mut guard, outcome)
    }

    pub async fn delete(&self, grammar: &Grammar) -> Result<(), EngineError> {
        let options = ApplyOptions {
            save: self.save_command(),
        };
        let slot = self.engine.slot(&self.target.key()).await;
        let mut guard = self.lock(&slot).await?;
        let outcome = {
            let mut runner = self.runner(&mut guard);
            self.bounded(reconcile::delete(&mut runner, grammar, &options))
                .await
        };
        self.settle(&mut guard, outcome)
    }

    pub async fn import(&self, grammar: &Grammar, identity: &Record) -> Result<Record, EngineError> {
        let slot = self.engine.slot(&self.target.key()).await;
        let mut guard = self.lock(&slot).await?;
        let outcome = {
            let mut runner = self.runner(&mut guard);
            self.bounded(reconcile::import(&mut runner, grammar, identity))
                .await
        };
        self.settle(&mut guard, outcome)
    }

    /// Runs one ad-hoc command through the device's session.
    ///
    /// `show` commands run unprivileged; anything else enters administrator
    /// mode first. Device errors come back in the result's signal.
    pub async fn run(&self, text: &str) -> Result<CommandResult, EngineError> {
        let command = match self.engine.dialect().command_kind(text) {
            CommandKind::Query => Command::query(text),
            CommandKind::Mutation => Command::mutation(text),
        };
        self.run_command(&command).await
    }

    pub async fn run_command(&self, command: &Command) -> Result<CommandResult, EngineError> {
        let slot = self.engine.slot(&self.target.key()).await;
        let mut guard = self.lock(&slot).await?;
        let outcome = {
            let mut runner = self.runner(&mut guard);
            self.bounded(runner.run(command)).await
        };
        self.settle(&mut guard, outcome)
    }

    /// Logs out and forgets the device. A later call opens a fresh session.
    pub async fn close(&self) {
        let key = self.target.key();
        let slot = self.engine.slot(&key).await;
        slot.lock().await.close("closed by caller").await;
        self.engine.inner.slots.invalidate(&key).await;
    }

    fn save_command(&self) -> Option<Command> {
        if self.engine.config().save_after_apply {
            Some(Command::mutation(
                self.engine.dialect().spec().save_command.clone(),
            ))
        } else {
            None
        }
    }

    async fn lock<'s>(
        &self,
        slot: &'s Arc<Mutex<DeviceSlot>>,
    ) -> Result<MutexGuard<'s, DeviceSlot>, EngineError> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, slot.lock())
                .await
                .map_err(|_| EngineError::DeadlineExceeded),
            None => Ok(slot.lock().await),
        }
    }

    fn runner<'a>(&'a self, slot: &'a mut DeviceSlot) -> SlotRunner<'a, C> {
        SlotRunner {
            engine: &self.engine.inner,
            target: &self.target,
            slot,
        }
    }

    /// `None` means the deadline fired first.
    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, EngineError>>,
    ) -> Option<Result<T, EngineError>> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, operation).await.ok(),
            None => Some(operation.await),
        }
    }

    fn settle<T>(
        &self,
        slot: &mut DeviceSlot,
        outcome: Option<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match outcome {
            Some(result) => result,
            None => {
                warn!("{} deadline exceeded, tearing down session", slot.key);
                slot.discard("deadline exceeded");
                Err(EngineError::DeadlineExceeded)
            }
        }
    }
}

/// Runs commands on a locked device slot, opening and reopening the session.
struct SlotRunner<'a, C: Connector> {
    engine: &'a EngineInner<C>,
    target: &'a DeviceTarget,
    slot: &'a mut DeviceSlot,
}

impl<C: Connector> SlotRunner<'_, C> {
    async fn open(&self) -> Result<Session, EngineError> {
        Session::open(
            &self.engine.connector,
            self.target,
            self.engine.dialect.clone(),
            &self.engine.config,
            self.engine.recorder.clone(),
        )
        .await
    }

    fn record(&self, event: SessionEvent) {
        if let Some(recorder) = self.engine.recorder.as_ref() {
            let _ = recorder.record_event(event);
        }
    }

    /// Makes sure a fresh, usable session for the current credentials exists.
    async fn ensure_session(&mut self) -> Result<(), EngineError> {
        let credentials = self.target.credentials_hash();
        let stale = match self.slot.session.as_ref() {
            None => None,
            Some(session) if !session.is_usable() => Some("link closed"),
            Some(session) if session.idle_for() >= self.engine.config.idle_timeout() => {
                Some("idle timeout")
            }
            Some(_) if self.slot.credentials != credentials => Some("credentials changed"),
            Some(_) => return Ok(()),
        };
        if let Some(reason) = stale {
            debug!("{} reopening session: {}", self.slot.key, reason);
            self.slot.close(reason).await;
            self.record(SessionEvent::Reconnected {
                reason: reason.to_string(),
            });
        }

        let session = self.open().await?;
        self.slot.session = Some(session);
        self.slot.credentials = credentials;
        Ok(())
    }

    async fn execute(&mut self, command: &Command) -> Result<CommandResult, EngineError> {
        let timeout = command.timeout_or(self.engine.config.command_timeout());
        match self.slot.session.as_mut() {
            Some(session) => session.execute(command, timeout).await,
            None => Err(EngineError::TransportClosedError),
        }
    }
}

impl<C: Connector> CommandRunner for SlotRunner<'_, C> {
    fn redact<'a>(&self, command: &'a str) -> Cow<'a, str> {
        self.engine.dialect.redact(command)
    }

    async fn run(&mut self, command: &Command) -> Result<CommandResult, EngineError> {
        self.ensure_session().await?;

        let err = match self.execute(command).await {
            Err(err) if err.is_transport_fault() => err,
            other => return other,
        };

        let reason = self.engine.dialect.redact_lines(&err.to_string()).into_owned();
        warn!(
            "{} '{}' failed ({}), reconnecting once",
            self.slot.key,
            self.redact(&command.text),
            reason
        );
        self.slot.discard(&reason);
        self.record(SessionEvent::Reconnected { reason });

        match self.open().await {
            Ok(session) => self.slot.session = Some(session),
            Err(reopen) => {
                return Err(EngineError::SessionError {
                    device: self.slot.key.clone(),
                    reason: format!("{err}; reconnect failed: {reopen}"),
                });
            }
        }

        match self.execute(command).await {
            Err(again) if again.is_transport_fault() => {
                self.slot
                    .discard(&self.engine.dialect.redact_lines(&again.to_string()));
                Err(EngineError::SessionError {
                    device: self.slot.key.clone(),
                    reason: format!("{err}; retry failed: {again}"),
                })
            }
            other => other,
        }
    }
}
