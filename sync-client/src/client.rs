//! SyncClient - the main interface for piheat-sync.
//!
//! This module provides [`SyncClient`], the handle applications use to watch
//! a heating device and send it commands over an untrusted relay.
//!
//! # Architecture
//!
//! SyncClient spawns one driver task per session. The driver interprets the
//! pure poll scheduler from sync-core and performs I/O through the
//! [`Transport`] trait. Commands are sealed and published on the caller's
//! task and reported to the driver over a control channel.
//!
//! ```text
//! Application → SyncClient ─control─▶ driver task → Transport → Relay
//!       ▲                                  │
//!       └────────── watch<SessionView> ◀───┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sync_client::{MockTransport, Passphrase, SessionConfig, SyncClient};
//!
//! let config = SessionConfig::new(channel, Passphrase::new("hunter2"), 30, 10);
//! let client = SyncClient::new(config, MockTransport::new())?;
//!
//! client.start()?;
//! client.turn_on(Some(21.0), None).await?;
//! let view = client.view();
//! ```

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use sync_core::{Changes, Codec, CodecError, Snapshot};
use sync_types::{CommandId, Interval, LegacyCommand, SyncError, WireMode};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ConfigError, SessionConfig};
use crate::driver::{Control, Driver};
use crate::publisher::{CommandRequest, Publisher, DEFAULT_TURN_ON_HOURS};
use crate::transport::{Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid session configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Sealing a command failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Type-level error (ids, randomness).
    #[error("{0}")]
    Types(#[from] SyncError),

    /// The session driver is gone.
    #[error("session closed")]
    SessionClosed,
}

/// A command published by this client but not yet seen on the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    /// Id assigned at submission.
    pub id: CommandId,
    /// When it was published.
    pub sent_at: DateTime<Utc>,
    /// Heating status the command forces, if any.
    pub expected_status: Option<bool>,
}

/// Outcome of the most recent poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum UpdateState {
    /// No poll has completed yet.
    #[default]
    Never,
    /// A fetch is in flight.
    Updating,
    /// Last poll succeeded.
    Updated {
        /// Completion time.
        at: DateTime<Utc>,
    },
    /// Last poll failed; the snapshot is unchanged.
    Failed {
        /// Transport error text.
        error: String,
    },
}

/// What the UI observes about a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// Latest reconciled relay state.
    pub snapshot: Snapshot,
    /// Command published here but not yet visible on the relay.
    pub optimistic: Option<PendingCommand>,
    /// Poll progress.
    pub update: UpdateState,
    /// Items failed to decrypt in the last batch.
    pub password_error: bool,
    /// The last publish failed. Cleared by the next successful publish.
    pub request_failed: bool,
    /// Polling is active.
    pub running: bool,
    /// What the last reconciliation changed.
    pub changes: Changes,
}

impl SessionView {
    /// An idle view over `snapshot`.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            optimistic: None,
            update: UpdateState::Never,
            password_error: false,
            request_failed: false,
            running: false,
            changes: Changes::default(),
        }
    }

    /// A command is outstanding, so new commands should wait.
    pub fn controls_locked(&self) -> bool {
        self.snapshot.expect_pending_result || self.optimistic.is_some()
    }

    /// Heating status to show: what an outstanding command forces, else what
    /// the device reports. `None` while offline with nothing outstanding.
    pub fn display_status(&self) -> Option<bool> {
        self.optimistic
            .as_ref()
            .and_then(|p| p.expected_status)
            .or_else(|| self.snapshot.status())
    }
}

/// Handle to one synchronization session.
///
/// Dropping the handle stops the driver task.
pub struct SyncClient<T: Transport + 'static> {
    config: SessionConfig,
    publisher: Publisher<T>,
    control: mpsc::UnboundedSender<Control>,
    view_rx: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl<T: Transport + 'static> SyncClient<T> {
    /// Validate `config` and spawn the session driver.
    ///
    /// Must be called within a tokio runtime. Polling does not begin until
    /// [`start`](Self::start).
    pub fn new(config: SessionConfig, transport: T) -> Result<Self, ClientError> {
        config.validate()?;

        let transport = Arc::new(transport);
        let codec = Codec::for_mode(config.wire_mode, config.passphrase.expose());
        let snapshot = Snapshot::new(config.default_msg_expiry_s, config.default_msg_update_s);
        let (view_tx, view_rx) = watch::channel(SessionView::new(snapshot));
        let (control, control_rx) = mpsc::unbounded_channel();

        let driver = Driver::new(
            config.channel_id.clone(),
            codec.clone(),
            Arc::clone(&transport),
            config.poll_timing(),
            config.tolerance_ms,
            view_tx,
        );
        let task = tokio::spawn(driver.run(control_rx));

        let publisher = Publisher::new(config.channel_id.clone(), codec, transport, control.clone());

        tracing::debug!(channel = %config.channel_id, mode = %config.wire_mode, "Session created");

        Ok(Self {
            config,
            publisher,
            control,
            view_rx,
            task,
        })
    }

    fn send(&self, msg: Control) -> Result<(), ClientError> {
        self.control.send(msg).map_err(|_| ClientError::SessionClosed)
    }

    /// Begin polling (poll immediately). Restarts a stopped session.
    pub fn start(&self) -> Result<(), ClientError> {
        self.send(Control::Start)
    }

    /// Poll now instead of waiting for the timer.
    pub fn poll_now(&self) -> Result<(), ClientError> {
        self.send(Control::PollNow)
    }

    /// Stop polling; an in-flight fetch is abandoned.
    pub fn stop(&self) -> Result<(), ClientError> {
        self.send(Control::Stop)
    }

    /// Subscribe to view updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Current view.
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn snapshot(&self) -> Snapshot {
        self.view_rx.borrow().snapshot.clone()
    }

    fn is_legacy(&self) -> bool {
        self.config.wire_mode == WireMode::LegacyCleartext
    }

    /// Publish a prepared command.
    pub async fn submit(&self, request: CommandRequest) -> Result<CommandId, ClientError> {
        self.publisher.submit(request).await
    }

    /// Heat for `duration` (default two hours), optionally at `temperature`.
    ///
    /// `duration` must be positive and shorter than a day; nothing is
    /// published otherwise.
    pub async fn turn_on(
        &self,
        temperature: Option<f64>,
        duration: Option<Duration>,
    ) -> Result<CommandId, ClientError> {
        let request = if self.is_legacy() {
            CommandRequest::legacy(LegacyCommand::TurnOn)
        } else {
            let duration = duration.unwrap_or_else(|| Duration::hours(DEFAULT_TURN_ON_HOURS));
            CommandRequest::turn_on(&self.snapshot(), temperature, duration, Utc::now())?
        };
        self.submit(request).await
    }

    /// Stop heating until the override is cancelled.
    pub async fn turn_off(&self) -> Result<CommandId, ClientError> {
        let request = if self.is_legacy() {
            CommandRequest::legacy(LegacyCommand::TurnOff)
        } else {
            CommandRequest::turn_off(&self.snapshot())
        };
        self.submit(request).await
    }

    /// Return control to the schedule.
    pub async fn cancel_override(&self) -> Result<CommandId, ClientError> {
        self.submit(CommandRequest::cancel_override(&self.snapshot()))
            .await
    }

    /// Replace the device's schedule.
    pub async fn set_schedule(&self, schedule: Vec<Interval>) -> Result<CommandId, ClientError> {
        self.submit(CommandRequest::set_schedule(&self.snapshot(), schedule))
            .await
    }

    /// Ask a legacy device to report its status.
    pub async fn request_status(&self) -> Result<CommandId, ClientError> {
        self.submit(CommandRequest::legacy(LegacyCommand::Status))
            .await
    }
}

impl<T: Transport + 'static> Drop for SyncClient<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
