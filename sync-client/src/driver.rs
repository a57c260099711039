//! The session driver task.
//!
//! One task per session owns all mutable state: scheduler state, snapshot,
//! optimistic command and UI flags. It interprets [`PollAction`]s from the
//! pure scheduler and publishes a [`SessionView`] after every change.
//!
//! ```text
//! control rx ─┐
//! timer ──────┼─▶ select! ─▶ PollState::on_event ─▶ actions ─▶ view tx
//! fetch ──────┘
//! ```
//!
//! At most one timer is armed and at most one fetch is in flight. Dropping a
//! timer or fetch future cancels it.

use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use sync_core::{
    reconcile, validate_batch, Codec, PollAction, PollEvent, PollNotice, PollState, PollTiming,
    Reconciliation, ValidationParams, Verdict,
};
use sync_types::{ChannelId, RelayItem};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Sleep};

use crate::client::{PendingCommand, SessionView, UpdateState};
use crate::transport::{Transport, TransportError};

type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<RelayItem>, TransportError>> + Send>>;

/// Requests from the client handle and the publisher.
#[derive(Debug)]
pub(crate) enum Control {
    Start,
    PollNow,
    Stop,
    CommandPublished(PendingCommand),
    RequestFailed(String),
}

pub(crate) struct Driver<T> {
    channel: ChannelId,
    codec: Codec,
    transport: Arc<T>,
    timing: PollTiming,
    tolerance_ms: u64,
    state: PollState,
    view: SessionView,
    optimistic_since: Option<Instant>,
    view_tx: watch::Sender<SessionView>,
    timer: Option<Pin<Box<Sleep>>>,
    fetch: Option<FetchFuture>,
}

impl<T: Transport + 'static> Driver<T> {
    pub(crate) fn new(
        channel: ChannelId,
        codec: Codec,
        transport: Arc<T>,
        timing: PollTiming,
        tolerance_ms: u64,
        view_tx: watch::Sender<SessionView>,
    ) -> Self {
        let view = view_tx.borrow().clone();
        Self {
            channel,
            codec,
            transport,
            timing,
            tolerance_ms,
            state: PollState::new(),
            view,
            optimistic_since: None,
            view_tx,
            timer: None,
            fetch: None,
        }
    }

    /// Run until every control sender is gone.
    pub(crate) async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        loop {
            tokio::select! {
                msg = control.recv() => match msg {
                    Some(msg) => self.on_control(msg),
                    None => break,
                },
                () = wait(&mut self.timer) => {
                    self.timer = None;
                    self.step(PollEvent::TimerFired);
                }
                result = wait(&mut self.fetch) => {
                    self.fetch = None;
                    self.on_fetch(result);
                }
            }
        }
        tracing::debug!(channel = %self.channel, "Session driver finished");
    }

    fn on_control(&mut self, msg: Control) {
        match msg {
            Control::Start => self.step(PollEvent::Start),
            Control::PollNow => self.step(PollEvent::PollNow),
            Control::Stop => self.step(PollEvent::StopRequested),
            Control::CommandPublished(pending) => {
                self.view.optimistic = Some(pending);
                self.optimistic_since = Some(Instant::now());
                self.view.request_failed = false;
                self.step(PollEvent::CommandPublished);
            }
            Control::RequestFailed(error) => {
                tracing::warn!(channel = %self.channel, "Command request failed: {}", error);
                self.view.request_failed = true;
                self.publish_view();
            }
        }
    }

    fn on_fetch(&mut self, result: Result<Vec<RelayItem>, TransportError>) {
        if !self.state.is_polling() {
            return;
        }
        match result {
            Ok(items) => {
                let params = ValidationParams {
                    now: Utc::now(),
                    msg_expiry_s: self.view.snapshot.msg_expiry_s,
                    tolerance_ms: self.tolerance_ms,
                };
                let outcome = validate_batch(&self.codec, &items, &params);
                for (index, verdict) in outcome.verdicts.iter().enumerate() {
                    if let Verdict::Rejected(reason) = verdict {
                        tracing::debug!(channel = %self.channel, index, "Dropped relay item: {}", reason);
                    }
                }
                if outcome.password_error() {
                    tracing::warn!(channel = %self.channel, "Relay items failed to decrypt, check passphrase");
                }

                let Reconciliation { snapshot, changes } =
                    reconcile(&self.view.snapshot, outcome.accepted());
                if changes.went_offline {
                    tracing::info!(channel = %self.channel, "No status from device, offline?");
                }
                if changes.came_online {
                    tracing::info!(channel = %self.channel, "Device is online");
                }
                if changes.command_confirmed {
                    tracing::info!(
                        channel = %self.channel,
                        command_id = ?snapshot.confirmed_command_id(),
                        "Device confirmed command"
                    );
                }

                self.view.snapshot = snapshot;
                self.view.changes = changes;
                self.view.password_error = outcome.password_error();
                self.settle_optimistic();

                let event = PollEvent::FetchSucceeded {
                    expect_pending_result: self.view.snapshot.expect_pending_result,
                    poll_interval: std::time::Duration::from_secs(
                        self.view.snapshot.poll_interval_s,
                    ),
                };
                self.step(event);
            }
            Err(e) => {
                tracing::warn!(channel = %self.channel, "Fetching relay feed failed: {}", e);
                self.step(PollEvent::FetchFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Drop the optimistic command once the relay or the device shows it, or
    /// once it would have expired anyway.
    fn settle_optimistic(&mut self) {
        let Some(pending) = &self.view.optimistic else {
            return;
        };
        let snapshot = &self.view.snapshot;
        let seen = snapshot.pending_command_id.as_ref() == Some(&pending.id)
            || snapshot.confirmed_command_id() == Some(&pending.id);
        let expired = self.optimistic_since.is_some_and(|since| {
            since.elapsed() >= std::time::Duration::from_secs(snapshot.msg_expiry_s)
        });
        if seen || expired {
            self.view.optimistic = None;
            self.optimistic_since = None;
        }
    }

    fn step(&mut self, event: PollEvent) {
        let state = std::mem::take(&mut self.state);
        let (state, actions) = state.on_event(event, &self.timing);
        self.state = state;
        for action in actions {
            self.execute(action);
        }
        self.publish_view();
    }

    fn execute(&mut self, action: PollAction) {
        match action {
            PollAction::StartFetch => {
                let transport = Arc::clone(&self.transport);
                let channel = self.channel.clone();
                self.fetch = Some(Box::pin(async move { transport.fetch(&channel).await }));
                self.view.update = UpdateState::Updating;
            }
            PollAction::ArmTimer { delay, reason } => {
                tracing::debug!(channel = %self.channel, ?reason, "Next poll in {:?}", delay);
                self.timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            PollAction::CancelTimer => self.timer = None,
            PollAction::AbandonFetch => self.fetch = None,
            PollAction::Notify(PollNotice::Updated) => {
                self.view.update = UpdateState::Updated { at: Utc::now() };
            }
            PollAction::Notify(PollNotice::UpdateFailed { error }) => {
                self.view.update = UpdateState::Failed { error };
            }
            PollAction::Notify(PollNotice::Stopped) => {
                tracing::info!(channel = %self.channel, "Polling stopped");
            }
        }
    }

    fn publish_view(&mut self) {
        self.view.running = self.state.is_running();
        self.view_tx.send_replace(self.view.clone());
    }
}

/// Await the future in `slot`, or never complete if there is none.
async fn wait<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
