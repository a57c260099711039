//! Send commands to the device.

use anyhow::{Context, Result};
use chrono::Duration;
use std::time::Duration as StdDuration;
use sync_client::{SessionView, SyncClient, Transport};
use sync_types::{CommandId, Interval, WireMode, MINUTES_PER_DAY};

use super::first_poll;

/// What to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Timed heating override.
    On {
        /// Target temperature.
        temperature: Option<f64>,
        /// How long to heat.
        hours: i64,
    },
    /// Permanent off override.
    Off,
    /// Back to the schedule.
    Cancel,
    /// Replace the schedule.
    Schedule(Vec<Interval>),
    /// Ask a legacy device for a status report.
    Ping,
}

/// Run a send command; with `wait`, block until the device confirms.
pub async fn run<T: Transport + 'static>(
    client: &SyncClient<T>,
    action: Action,
    wait: bool,
) -> Result<()> {
    if wait && client.config().wire_mode == WireMode::LegacyCleartext {
        anyhow::bail!(
            "--wait is not supported in legacy mode: legacy devices do not report which command they applied"
        );
    }

    let view = first_poll(client).await?;
    if view.controls_locked() {
        anyhow::bail!("The device has not confirmed the previous command yet. Try again later.");
    }
    if !view.snapshot.is_online() && client.config().wire_mode == WireMode::Encrypted {
        tracing::warn!("Device is offline; its current schedule is unknown and will be replaced");
    }

    let id = match action {
        Action::On { temperature, hours } => {
            let duration = Duration::try_hours(hours)
                .with_context(|| format!("Invalid number of hours: {hours}"))?;
            client.turn_on(temperature, Some(duration)).await
        }
        Action::Off => client.turn_off().await,
        Action::Cancel => client.cancel_override().await,
        Action::Schedule(intervals) => client.set_schedule(intervals).await,
        Action::Ping => client.request_status().await,
    }
    .context("Failed to send command")?;

    println!("Sent command {id}");

    if wait {
        wait_for_confirmation(client, &id).await?;
        println!("Device confirmed command {id}");
    }
    Ok(())
}

async fn wait_for_confirmation<T: Transport + 'static>(
    client: &SyncClient<T>,
    id: &CommandId,
) -> Result<()> {
    let mut views = client.subscribe();
    let expiry = StdDuration::from_secs(views.borrow().snapshot.msg_expiry_s);
    let mut confirmation = Confirmation::new(id);

    let view = tokio::time::timeout(expiry, views.wait_for(|v| confirmation.settled(v)))
        .await
        .context("Timed out waiting for confirmation")?
        .context("Session closed")?
        .clone();

    if view.snapshot.confirmed_command_id() != Some(id) {
        anyhow::bail!("The device did not confirm the command before it expired");
    }
    Ok(())
}

/// Tracks one published command through the session views.
///
/// The driver hears about a publish asynchronously, so views from before it
/// did are unlocked for the wrong reason and must not end the wait.
struct Confirmation<'a> {
    id: &'a CommandId,
    tracked: bool,
}

impl<'a> Confirmation<'a> {
    fn new(id: &'a CommandId) -> Self {
        Self { id, tracked: false }
    }

    /// True once the device confirmed the command, or the session stopped
    /// waiting for it.
    fn settled(&mut self, view: &SessionView) -> bool {
        if view.snapshot.confirmed_command_id() == Some(self.id) {
            return true;
        }
        let optimistic = view.optimistic.as_ref().map(|p| &p.id);
        if optimistic == Some(self.id) || view.snapshot.pending_command_id.as_ref() == Some(self.id) {
            self.tracked = true;
        }
        self.tracked && !view.controls_locked()
    }
}

/// Parse `HH:MM-HH:MM[@TEMP]` in local time into a UTC interval.
pub fn parse_interval(text: &str, offset_minutes: i32) -> Result<Interval> {
    let (span, temperature) = match text.split_once('@') {
        Some((span, temp)) => {
            let temp: f64 = temp
                .trim()
                .parse()
                .with_context(|| format!("Invalid temperature in {text:?}"))?;
            (span, Some(temp))
        }
        None => (text, None),
    };
    let (begin, end) = span
        .split_once('-')
        .with_context(|| format!("Expected HH:MM-HH:MM, got {text:?}"))?;

    let to_utc = |minute: i32| (minute - offset_minutes).rem_euclid(MINUTES_PER_DAY);
    Ok(Interval {
        begin: to_utc(parse_clock(begin.trim())?),
        end: to_utc(parse_clock(end.trim())?),
        temperature,
    })
}

fn parse_clock(text: &str) -> Result<i32> {
    let (h, m) = text
        .split_once(':')
        .with_context(|| format!("Expected HH:MM, got {text:?}"))?;
    let h: i32 = h.parse().with_context(|| format!("Invalid hour in {text:?}"))?;
    let m: i32 = m.parse().with_context(|| format!("Invalid minute in {text:?}"))?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        anyhow::bail!("Time out of range: {text:?}");
    }
    Ok(h * 60 + m)
}
