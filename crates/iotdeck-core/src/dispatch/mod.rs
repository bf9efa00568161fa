// ── Command dispatcher ──
//
// Submissions are validated and stored as `pending`, then queued through an
// mpsc channel to a processor task that spawns one driver task per command.
// The driver owns the only in-flight attempt and walks the record through
// `pending → sent → {acknowledged, failed, timeout}` with backoff between
// retries. Every transition is a compare-and-set on the stored record, so a
// concurrent cancel simply makes the driver's next transition fail.

mod transport;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::CommandConfig;
use crate::error::CoreError;
use crate::event::HubEvent;
use crate::model::{
    AttemptError, AttemptErrorKind, AttemptVerdict, Command, CommandStatus, DeviceStatus,
    EntityId, InvalidTransition, NewCommand,
};
use crate::store::DataStore;

pub use transport::{Delivery, DeviceTransport, HttpTransport};

/// `(organization, command id)`
type CommandKey = (EntityId, EntityId);

fn key_of(command: &Command) -> CommandKey {
    (command.organization_id.clone(), command.id.clone())
}

/// Submits commands and drives them to a terminal state.
///
/// Cheaply cloneable via `Arc<DispatcherInner>`.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<DataStore>,
    transport: Arc<dyn DeviceTransport>,
    config: CommandConfig,
    events: broadcast::Sender<HubEvent>,
    queue_tx: mpsc::Sender<CommandKey>,
    queue_rx: Mutex<Option<mpsc::Receiver<CommandKey>>>,
    /// Cancellation handle of every non-terminal command.
    inflight: DashMap<CommandKey, CancellationToken>,
    cancel: CancellationToken,
    drivers: TaskTracker,
}

impl CommandDispatcher {
    pub(crate) fn new(
        store: Arc<DataStore>,
        transport: Arc<dyn DeviceTransport>,
        config: CommandConfig,
        events: broadcast::Sender<HubEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth.max(1));
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                transport,
                config,
                events,
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                inflight: DashMap::new(),
                cancel,
                drivers: TaskTracker::new(),
            }),
        }
    }

    /// Spawn the queue processor. Returns `None` if already started.
    pub(crate) async fn start(&self) -> Option<JoinHandle<()>> {
        let rx = self.inner.queue_rx.lock().await.take()?;
        Some(tokio::spawn(queue_processor_task(self.clone(), rx)))
    }

    pub(crate) fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.inner.transport
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Validate and enqueue a command for a device of `org`.
    ///
    /// Nothing is stored when validation fails.
    pub async fn submit(&self, org: &EntityId, request: NewCommand) -> Result<Arc<Command>, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        let max_retries = request
            .validate(self.inner.config.default_max_retries)
            .map_err(CoreError::validation)?;
        if self.inner.store.organization(org).is_none() {
            return Err(CoreError::not_found("organization", org));
        }
        if self.inner.store.live_device(org, &request.device_id).is_none() {
            return Err(CoreError::validation(format!(
                "unknown device {}",
                request.device_id
            )));
        }

        let command = Command::from_request(
            EntityId::generate(),
            org.clone(),
            request,
            max_retries,
            Utc::now(),
        );
        let key = (org.clone(), command.id.clone());
        let id = command.id.clone();
        info!(
            command_id = %id,
            device_id = %command.device_id,
            method = %command.method,
            endpoint = %command.endpoint,
            origin = %command.origin,
            max_retries,
            "command submitted"
        );
        self.inner.store.commands.insert(command);
        self.inner
            .inflight
            .insert(key.clone(), self.inner.cancel.child_token());

        if self.inner.queue_tx.send(key.clone()).await.is_err() {
            self.cancel_record(&key);
            return Err(CoreError::ShuttingDown);
        }

        self.inner
            .store
            .commands
            .get(org, &id)
            .ok_or_else(|| CoreError::Internal(format!("command {id} vanished after insert")))
    }

    /// Re-issue a `failed` or `timeout` command as a new record.
    ///
    /// The original is left untouched; the new one points back to it
    /// through `retry_of`.
    pub async fn retry(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Command>, CoreError> {
        let original = self
            .inner
            .store
            .command(org, id)
            .ok_or_else(|| CoreError::not_found("command", id))?;
        if !matches!(original.status, CommandStatus::Failed | CommandStatus::Timeout) {
            return Err(CoreError::validation(format!(
                "command {id} is {}; only failed or timed-out commands can be retried",
                original.status
            )));
        }
        self.submit(org, original.reissue()).await
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// Cancel a `pending` or `sent` command into `failed` / `cancelled`.
    pub fn cancel(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Command>, CoreError> {
        if self.inner.store.command(org, id).is_none() {
            return Err(CoreError::not_found("command", id));
        }
        let updated = self
            .inner
            .store
            .commands
            .update(org, id, |c| {
                let mut next = c.clone();
                next.cancel(Utc::now())?;
                Ok::<_, InvalidTransition>(next)
            })
            .ok_or_else(|| CoreError::not_found("command", id))??;
        self.after_cancel(&updated);
        Ok(updated)
    }

    /// Cancel every non-terminal command matching `pred`. Returns how many
    /// were cancelled.
    pub(crate) fn cancel_where(&self, pred: impl Fn(&Command) -> bool) -> usize {
        let mut cancelled = 0;
        for command in self.inner.store.all_commands() {
            if !command.is_terminal()
                && pred(command.as_ref())
                && self.cancel_record(&key_of(&command)).is_some()
            {
                cancelled += 1;
            }
        }
        cancelled
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Wait until the command reaches a terminal state.
    pub async fn wait_terminal(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Command>, CoreError> {
        if self.inner.store.command(org, id).is_none() {
            return Err(CoreError::not_found("command", id));
        }
        self.inner
            .store
            .subscribe_commands(org)
            .wait_for(|c| c.id == *id && c.is_terminal())
            .await
            .ok_or(CoreError::ShuttingDown)
    }

    /// Number of commands with a live driver or still queued.
    pub(crate) fn inflight(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Wait for every driver to finish, then cancel anything left behind
    /// (commands queued before the processor ever started).
    ///
    /// The caller cancels the root token first.
    pub(crate) async fn shutdown(&self) {
        self.inner.drivers.close();
        self.inner.drivers.wait().await;
        let orphaned = self.cancel_where(|_| true);
        if orphaned > 0 {
            debug!(orphaned, "cancelled commands left at shutdown");
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn spawn_driver(&self, key: CommandKey) {
        let Some(token) = self.inner.inflight.get(&key).map(|t| t.clone()) else {
            debug!(command_id = %key.1, "command cancelled before dispatch");
            return;
        };
        self.inner
            .drivers
            .spawn(drive_command(self.clone(), key, token));
    }

    /// Cancel the stored record if it is still cancellable.
    fn cancel_record(&self, (org, id): &CommandKey) -> Option<Arc<Command>> {
        let updated = self.inner.store.commands.update(org, id, |c| {
            let mut next = c.clone();
            next.cancel(Utc::now())?;
            Ok::<_, InvalidTransition>(next)
        });
        match updated {
            Some(Ok(cmd)) => {
                self.after_cancel(&cmd);
                Some(cmd)
            }
            _ => None,
        }
    }

    fn after_cancel(&self, command: &Command) {
        if let Some((_, token)) = self.inner.inflight.remove(&key_of(command)) {
            token.cancel();
        }
        info!(command_id = %command.id, attempts = command.attempts, "command cancelled");
        self.emit_finished(command);
    }

    /// One delivery attempt for a command already marked `sent`.
    async fn attempt(&self, command: &Command) -> Result<Delivery, AttemptError> {
        let device = self
            .inner
            .store
            .device(&command.organization_id, &command.device_id)
            .filter(|d| !d.is_deleted())
            .ok_or_else(|| {
                AttemptError::new(
                    AttemptErrorKind::DeviceUnreachable,
                    format!("device {} no longer exists", command.device_id),
                )
            })?;
        if device.status == DeviceStatus::Offline {
            return Err(AttemptError::new(
                AttemptErrorKind::DeviceUnreachable,
                format!("device {} is offline", device.id),
            ));
        }

        let timeout = self.inner.config.timeout;
        tokio::time::timeout(timeout, self.inner.transport.deliver(&device, command, timeout))
            .await
            .unwrap_or_else(|_| {
                Err(AttemptError::new(
                    AttemptErrorKind::Timeout,
                    format!("no response within {}ms", timeout.as_millis()),
                ))
            })
    }

    fn record_ack(&self, (org, id): &CommandKey, delivery: &Delivery) {
        let updated = self.inner.store.commands.update(org, id, |c| {
            let mut next = c.clone();
            next.mark_acknowledged(Utc::now(), delivery.status, delivery.latency)?;
            Ok::<_, InvalidTransition>(next)
        });
        match updated {
            Some(Ok(cmd)) => {
                info!(
                    command_id = %id,
                    attempts = cmd.attempts,
                    latency_ms = cmd.latency_ms,
                    "command acknowledged"
                );
                self.emit_finished(&cmd);
            }
            Some(Err(e)) => debug!(command_id = %id, error = %e, "late acknowledgment ignored"),
            None => {}
        }
    }

    /// Returns `true` if another attempt should follow.
    fn record_failure(&self, (org, id): &CommandKey, error: AttemptError) -> bool {
        let mut verdict = None;
        let updated = self.inner.store.commands.update(org, id, |c| {
            let mut next = c.clone();
            verdict = Some(next.mark_attempt_failed(error, Utc::now())?);
            Ok::<_, InvalidTransition>(next)
        });
        let Some(Ok(cmd)) = updated else {
            return false;
        };

        let last_error = cmd
            .last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        match verdict {
            Some(AttemptVerdict::Retry) => {
                debug!(
                    command_id = %id,
                    attempt = cmd.attempts,
                    max_retries = cmd.max_retries,
                    error = %last_error,
                    "attempt failed, will retry"
                );
                true
            }
            Some(AttemptVerdict::Exhausted(status)) => {
                warn!(
                    command_id = %id,
                    attempts = cmd.attempts,
                    %status,
                    error = %last_error,
                    "command retries exhausted"
                );
                self.emit_finished(&cmd);
                false
            }
            None => false,
        }
    }

    fn emit_finished(&self, command: &Command) {
        self.inner.inflight.remove(&key_of(command));
        let _ = self.inner.events.send(HubEvent::CommandFinished {
            organization_id: command.organization_id.clone(),
            command_id: command.id.clone(),
            status: command.status,
        });
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Hand each queued command to its own driver task.
async fn queue_processor_task(dispatcher: CommandDispatcher, mut rx: mpsc::Receiver<CommandKey>) {
    let cancel = dispatcher.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            key = rx.recv() => {
                let Some(key) = key else { break };
                dispatcher.spawn_driver(key);
            }
        }
    }

    rx.close();
    while let Ok(key) = rx.try_recv() {
        dispatcher.cancel_record(&key);
    }
}

/// Drive one command to a terminal state.
async fn drive_command(dispatcher: CommandDispatcher, key: CommandKey, token: CancellationToken) {
    let store = Arc::clone(&dispatcher.inner.store);
    let backoff = dispatcher.inner.config.backoff.clone();
    let (org, id) = &key;

    loop {
        let sent = match store.commands.update(org, id, |c| {
            let mut next = c.clone();
            next.mark_sent(Utc::now())?;
            Ok::<_, InvalidTransition>(next)
        }) {
            Some(Ok(cmd)) => cmd,
            Some(Err(e)) => {
                debug!(command_id = %id, error = %e, "command no longer dispatchable");
                break;
            }
            None => break,
        };
        debug!(
            command_id = %id,
            attempt = sent.attempts,
            max_retries = sent.max_retries,
            "attempt started"
        );

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = dispatcher.attempt(&sent) => Some(result),
        };
        let Some(outcome) = outcome else {
            dispatcher.cancel_record(&key);
            break;
        };

        match outcome {
            Ok(delivery) => {
                dispatcher.record_ack(&key, &delivery);
                break;
            }
            Err(error) => {
                if !dispatcher.record_failure(&key, error) {
                    break;
                }
                let delay = backoff.delay_after(sent.attempts);
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        dispatcher.cancel_record(&key);
                        break;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    dispatcher.inner.inflight.remove(&key);
}
