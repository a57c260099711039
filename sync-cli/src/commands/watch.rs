//! Follow a device until interrupted.

use anyhow::Result;
use chrono::Local;
use sync_client::{SessionView, SyncClient, Transport, UpdateState};

use super::on_off;

/// Run the watch command.
pub async fn run<T: Transport + 'static>(client: &SyncClient<T>) -> Result<()> {
    let mut views = client.subscribe();
    client.start()?;
    eprintln!("Watching {} (Ctrl-C to stop)", client.config().channel_id);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_printed: Option<UpdateState> = None;
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if matches!(view.update, UpdateState::Updating | UpdateState::Never) {
                    continue;
                }
                if last_printed.as_ref() != Some(&view.update) {
                    println!("{}", summary_line(&view));
                    last_printed = Some(view.update.clone());
                }
            }
            _ = &mut ctrl_c => {
                client.stop()?;
                break;
            }
        }
    }
    Ok(())
}

/// One line per completed poll.
pub fn summary_line(view: &SessionView) -> String {
    let time = Local::now().format("%H:%M:%S");
    if let UpdateState::Failed { error } = &view.update {
        return format!("[{time}] update failed: {error}");
    }

    let mut line = match &view.snapshot.last_status {
        None => format!("[{time}] offline"),
        Some(status) => {
            let temp = status
                .temperature
                .map_or_else(|| "-".to_string(), |t| format!("{t:.1} °C"));
            format!("[{time}] heating {} {temp}", on_off(view.display_status()))
        }
    };
    if view.controls_locked() {
        line.push_str(" (command pending)");
    }
    if view.changes.command_confirmed {
        line.push_str(" (command confirmed)");
    }
    if view.password_error {
        line.push_str(" (decrypt errors)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sync_client::Snapshot;

    #[test]
    fn offline_line() {
        let mut view = SessionView::new(Snapshot::new(30, 10));
        view.update = UpdateState::Updated { at: Utc::now() };
        assert!(summary_line(&view).ends_with("offline"));
    }

    #[test]
    fn failed_line() {
        let mut view = SessionView::new(Snapshot::new(30, 10));
        view.update = UpdateState::Failed {
            error: "relay returned HTTP 503".into(),
        };
        assert!(summary_line(&view).contains("update failed: relay returned HTTP 503"));
    }

    #[test]
    fn flags_are_appended() {
        let mut view = SessionView::new(Snapshot::new(30, 10));
        view.update = UpdateState::Updated { at: Utc::now() };
        view.snapshot.expect_pending_result = true;
        view.password_error = true;
        let line = summary_line(&view);
        assert!(line.contains("(command pending)"));
        assert!(line.contains("(decrypt errors)"));
    }
}
