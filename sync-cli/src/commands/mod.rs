//! CLI command implementations.

pub mod send;
pub mod status;
pub mod token;
pub mod watch;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::time::Duration;
use sync_client::{SessionView, SyncClient, Transport, UpdateState};
use sync_types::MINUTES_PER_DAY;

/// How long to wait for the first poll before giving up.
const FIRST_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Start polling and wait for the first poll to finish.
pub async fn first_poll<T: Transport + 'static>(client: &SyncClient<T>) -> Result<SessionView> {
    let mut views = client.subscribe();
    client.start()?;

    let view = tokio::time::timeout(
        FIRST_POLL_TIMEOUT,
        views.wait_for(|v| matches!(v.update, UpdateState::Updated { .. } | UpdateState::Failed { .. })),
    )
    .await
    .context("Timed out waiting for the relay")?
    .context("Session closed")?
    .clone();

    if let UpdateState::Failed { error } = &view.update {
        anyhow::bail!("Could not reach the relay: {error}");
    }
    Ok(view)
}

/// Local UTC offset in minutes.
pub fn local_offset_minutes() -> i32 {
    Local::now().offset().local_minus_utc() / 60
}

/// `HH:MM` local time of a UTC minute of the day.
///
/// `utc_minute` comes from the device unchecked; out-of-range values wrap.
pub fn format_minute(utc_minute: i32, offset_minutes: i32) -> String {
    let local = (i64::from(utc_minute) + i64::from(offset_minutes))
        .rem_euclid(i64::from(MINUTES_PER_DAY));
    format!("{:02}:{:02}", local / 60, local % 60)
}

/// "12 s ago" style age.
pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    if secs < 60 {
        format!("{secs} s ago")
    } else if secs < 3600 {
        format!("{} min ago", secs / 60)
    } else {
        format!("{} h ago", secs / 3600)
    }
}

/// "on"/"off"/"unknown".
pub fn on_off(status: Option<bool>) -> &'static str {
    match status {
        Some(true) => "on",
        Some(false) => "off",
        None => "unknown",
    }
}
