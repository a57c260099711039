//! Building and publishing commands.
//!
//! A command replaces the device's schedule and override wholesale, so the
//! builders carry the current schedule/override forward from the latest
//! snapshot and change only what the user asked for.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use sync_core::{Codec, Snapshot};
use sync_types::{
    ChannelId, CommandId, CommandMessage, Interval, LegacyCommand, Message, Override, SyncError,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::client::{ClientError, PendingCommand};
use crate::driver::Control;
use crate::transport::Transport;

/// How long `turn_on` holds when no duration is given, in hours.
pub const DEFAULT_TURN_ON_HOURS: i64 = 2;

/// A command before it gets an id and a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Replacement schedule.
    pub schedule: Option<Vec<Interval>>,
    /// Replacement override.
    pub override_program: Option<Override>,
    /// Legacy one-word command.
    pub legacy_command: Option<LegacyCommand>,
}

impl CommandRequest {
    /// Heat from `now` for `duration`, keeping the schedule.
    ///
    /// Fails unless `duration` is positive and shorter than a day.
    pub fn turn_on(
        snapshot: &Snapshot,
        temperature: Option<f64>,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            schedule: Some(snapshot.schedule().to_vec()),
            override_program: Some(Override::timed(true, now, duration, temperature)?),
            legacy_command: None,
        })
    }

    /// Stop heating until the override is cancelled, keeping the schedule.
    pub fn turn_off(snapshot: &Snapshot) -> Self {
        Self {
            schedule: Some(snapshot.schedule().to_vec()),
            override_program: Some(Override::permanent(false)),
            legacy_command: None,
        }
    }

    /// Drop the override; the schedule takes over again.
    pub fn cancel_override(snapshot: &Snapshot) -> Self {
        Self {
            schedule: Some(snapshot.schedule().to_vec()),
            override_program: None,
            legacy_command: None,
        }
    }

    /// Replace the schedule, keeping the override.
    pub fn set_schedule(snapshot: &Snapshot, schedule: Vec<Interval>) -> Self {
        Self {
            schedule: Some(schedule),
            override_program: snapshot.override_program().copied(),
            legacy_command: None,
        }
    }

    /// A one-word command for cleartext-era devices.
    pub fn legacy(command: LegacyCommand) -> Self {
        Self {
            schedule: None,
            override_program: None,
            legacy_command: Some(command),
        }
    }

    /// Heating status the device should report once it applies this command,
    /// if the command forces one.
    pub fn expected_status(&self) -> Option<bool> {
        match self.legacy_command {
            Some(LegacyCommand::TurnOn) => Some(true),
            Some(LegacyCommand::TurnOff) => Some(false),
            Some(LegacyCommand::Status) => None,
            None => self.override_program.map(|o| o.status),
        }
    }

    /// The message to send.
    pub fn into_message(self, id: CommandId, timestamp: DateTime<Utc>) -> Message {
        Message::Command(CommandMessage {
            timestamp,
            id,
            schedule: self.schedule,
            override_program: self.override_program,
            legacy_command: self.legacy_command,
        })
    }
}

/// Seals and publishes commands, then tells the session driver.
pub(crate) struct Publisher<T> {
    channel: ChannelId,
    codec: Codec,
    transport: Arc<T>,
    control: UnboundedSender<Control>,
}

impl<T: Transport> Publisher<T> {
    pub(crate) fn new(
        channel: ChannelId,
        codec: Codec,
        transport: Arc<T>,
        control: UnboundedSender<Control>,
    ) -> Self {
        Self {
            channel,
            codec,
            transport,
            control,
        }
    }

    /// Assign a fresh id and the current time, seal, publish.
    ///
    /// No retry: a failed publish sets the session's request-failed flag and
    /// is returned to the caller.
    pub(crate) async fn submit(&self, request: CommandRequest) -> Result<CommandId, ClientError> {
        let id = CommandId::random()?;
        let sent_at = Utc::now();
        let expected_status = request.expected_status();
        let message = request.into_message(id.clone(), sent_at);
        let content: Value = self.codec.seal(&message)?;

        match self.transport.publish(&self.channel, &content).await {
            Ok(()) => {
                tracing::info!(channel = %self.channel, command_id = %id, "Command published");
                // A closed driver has nobody left to tell
                let _ = self.control.send(Control::CommandPublished(PendingCommand {
                    id: id.clone(),
                    sent_at,
                    expected_status,
                }));
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(channel = %self.channel, "Publishing command failed: {}", e);
                let _ = self.control.send(Control::RequestFailed(e.to_string()));
                Err(e.into())
            }
        }
    }
}
