//! Show device status.

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use sync_client::{SessionView, SyncClient, Transport};
use sync_types::{Interval, Override};

use super::{first_poll, format_age, format_minute, local_offset_minutes, on_off};

/// Run the status command.
pub async fn run<T: Transport + 'static>(client: &SyncClient<T>, as_json: bool) -> Result<()> {
    let view = first_poll(client).await?;
    client.stop()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&to_json(client.config().channel_id.as_str(), &view))?);
    } else {
        print!("{}", render(client.config().channel_id.as_str(), &view, local_offset_minutes()));
    }
    Ok(())
}

fn format_temp(temp: Option<f64>) -> String {
    temp.map_or_else(|| "-".to_string(), |t| format!("{t:.1} °C"))
}

fn format_interval(interval: &Interval, offset: i32) -> String {
    if interval.is_forever() {
        return "always".to_string();
    }
    format!(
        "{}-{}",
        format_minute(interval.begin, offset),
        format_minute(interval.end, offset)
    )
}

fn format_override(ovr: &Override, offset: i32) -> String {
    let state = on_off(Some(ovr.status));
    let mut text = if ovr.is_permanent() {
        format!("{state} (until cancelled)")
    } else {
        format!("{state} {}", format_interval(&ovr.interval(), offset))
    };
    if let Some(t) = ovr.temperature {
        text.push_str(&format!(" at {}", format_temp(Some(t))));
    }
    text
}

/// Human-readable status report.
pub fn render(channel: &str, view: &SessionView, offset: i32) -> String {
    let mut out = String::new();
    let snapshot = &view.snapshot;

    let Some(status) = &snapshot.last_status else {
        out.push_str(&format!("Device {channel}: OFFLINE\n"));
        out.push_str(&format!(
            "  No status within the last {} s.\n",
            snapshot.msg_expiry_s
        ));
        if view.password_error {
            out.push_str("\nWarning: relay messages failed to decrypt. Check the passphrase.\n");
        }
        return out;
    };

    let name = if status.name.is_empty() { channel } else { &status.name };
    out.push_str(&format!("Device {name}: online\n"));
    out.push_str(&format!("  Heating:     {}", on_off(Some(status.status))));
    if let Some(actual) = status.actual_status {
        out.push_str(&format!(" (relay {})", on_off(Some(actual))));
    }
    out.push('\n');
    out.push_str(&format!(
        "  Temperature: {} (target {})\n",
        format_temp(status.temperature),
        format_temp(status.target_temperature)
    ));
    match &status.override_program {
        Some(ovr) => out.push_str(&format!("  Override:    {}\n", format_override(ovr, offset))),
        None => out.push_str("  Override:    none\n"),
    }
    if status.schedule.is_empty() {
        out.push_str("  Schedule:    empty\n");
    } else {
        out.push_str("  Schedule:\n");
        for interval in &status.schedule {
            out.push_str(&format!(
                "    {}  {}\n",
                format_interval(interval, offset),
                format_temp(interval.temperature)
            ));
        }
    }
    if let Some(at) = snapshot.last_status_time {
        out.push_str(&format!("  Reported:    {}\n", format_age(at, Utc::now())));
    }

    if view.controls_locked() {
        let id = snapshot
            .pending_command_id
            .as_ref()
            .map_or("-", |id| id.as_str());
        out.push_str(&format!("\nCommand {id} is awaiting confirmation.\n"));
    }
    if view.password_error {
        out.push_str("\nWarning: relay messages failed to decrypt. Check the passphrase.\n");
    }
    out
}

/// Machine-readable status report.
pub fn to_json(channel: &str, view: &SessionView) -> Value {
    let snapshot = &view.snapshot;
    json!({
        "channel": channel,
        "online": snapshot.is_online(),
        "status": snapshot.last_status,
        "last_status_time": snapshot.last_status_time,
        "pending_command_id": snapshot.pending_command_id.as_ref().map(|id| id.as_str()),
        "expect_pending_result": snapshot.expect_pending_result,
        "msg_expiry_s": snapshot.msg_expiry_s,
        "poll_interval_s": snapshot.poll_interval_s,
        "password_error": view.password_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_client::{Snapshot, UpdateState};
    use sync_types::{CommandId, StatusMessage};

    fn view_with(status: Option<StatusMessage>) -> SessionView {
        let mut view = SessionView::new(Snapshot::new(30, 10));
        view.snapshot.last_status_time = status.as_ref().map(|s| s.timestamp);
        view.snapshot.last_status = status;
        view.update = UpdateState::Updated { at: Utc::now() };
        view
    }

    fn status() -> StatusMessage {
        StatusMessage {
            timestamp: Utc::now(),
            status: true,
            actual_status: Some(true),
            temperature: Some(19.5),
            target_temperature: Some(21.0),
            name: "Living room".into(),
            schedule: vec![Interval {
                begin: 360,
                end: 480,
                temperature: Some(20.0),
            }],
            override_program: Some(Override::permanent(false)),
            expiry_s: None,
            update_interval_s: None,
            last_command_id: None,
        }
    }

    #[test]
    fn renders_offline() {
        let text = render("device-42", &view_with(None), 0);
        assert!(text.contains("device-42: OFFLINE"));
        assert!(text.contains("30 s"));
    }

    #[test]
    fn renders_online_device() {
        let text = render("device-42", &view_with(Some(status())), 60);
        assert!(text.contains("Living room: online"));
        assert!(text.contains("Heating:     on (relay on)"));
        assert!(text.contains("19.5 °C (target 21.0 °C)"));
        assert!(text.contains("off (until cancelled)"));
        assert!(text.contains("07:00-09:00  20.0 °C"));
    }

    #[test]
    fn renders_pending_command() {
        let mut view = view_with(Some(status()));
        view.snapshot.pending_command_id = Some(CommandId::from("abc"));
        view.snapshot.expect_pending_result = true;
        let text = render("device-42", &view, 0);
        assert!(text.contains("Command abc is awaiting confirmation"));
    }

    #[test]
    fn json_report() {
        let value = to_json("device-42", &view_with(Some(status())));
        assert_eq!(value["online"], true);
        assert_eq!(value["status"]["temp"], 19.5);
        assert_eq!(value["pending_command_id"], Value::Null);
    }
}
