//! Folding accepted messages into the synchronization snapshot.
//!
//! Status and command messages interleave on the relay in either order, so
//! the newest status and the newest command are picked independently.

use chrono::{DateTime, Utc};
use sync_types::{CommandId, Interval, Message, Override, StatusMessage};

/// Floor for device-supplied expiry and update periods.
pub const MIN_INTERVAL_S: u64 = 5;

/// What the client currently believes about the device.
///
/// Replaced whole after every successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Newest accepted status; `None` means the device is offline.
    pub last_status: Option<StatusMessage>,
    /// Declared timestamp of `last_status`.
    pub last_status_time: Option<DateTime<Utc>>,
    /// Id of the newest accepted command.
    pub pending_command_id: Option<CommandId>,
    /// A command was seen that the device has not confirmed yet.
    pub expect_pending_result: bool,
    /// Current message expiry.
    pub msg_expiry_s: u64,
    /// Current poll period.
    pub poll_interval_s: u64,
}

impl Snapshot {
    /// An offline snapshot with the configured defaults.
    pub fn new(msg_expiry_s: u64, poll_interval_s: u64) -> Self {
        Self {
            last_status: None,
            last_status_time: None,
            pending_command_id: None,
            expect_pending_result: false,
            msg_expiry_s,
            poll_interval_s,
        }
    }

    /// True if a status was accepted on the last poll.
    pub fn is_online(&self) -> bool {
        self.last_status.is_some()
    }

    /// Heating status reported by the device.
    pub fn status(&self) -> Option<bool> {
        self.last_status.as_ref().map(|s| s.status)
    }

    /// The device's schedule; empty while offline.
    pub fn schedule(&self) -> &[Interval] {
        self.last_status
            .as_ref()
            .map(|s| s.schedule.as_slice())
            .unwrap_or(&[])
    }

    /// The device's active override.
    pub fn override_program(&self) -> Option<&Override> {
        self.last_status.as_ref().and_then(|s| s.override_program.as_ref())
    }

    /// Id of the last command the device applied.
    pub fn confirmed_command_id(&self) -> Option<&CommandId> {
        self.last_status
            .as_ref()
            .and_then(|s| s.last_command_id.as_ref())
    }
}

/// What changed between two snapshots, for the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    /// The device was online and no status was found.
    pub went_offline: bool,
    /// A status was found and the device was offline.
    pub came_online: bool,
    /// The displayed schedule must be redrawn.
    pub redraw_schedule: bool,
    /// The device confirmed a command it had not confirmed before.
    pub command_confirmed: bool,
}

/// Result of folding one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The new snapshot.
    pub snapshot: Snapshot,
    /// Differences from the previous snapshot.
    pub changes: Changes,
}

/// Fold newest-first accepted messages into a new snapshot.
pub fn reconcile<'a, I>(previous: &Snapshot, accepted: I) -> Reconciliation
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut status: Option<&StatusMessage> = None;
    let mut command_id: Option<&CommandId> = None;

    for msg in accepted {
        match msg {
            Message::Status(s) if status.is_none() => status = Some(s),
            Message::Command(c) if command_id.is_none() => command_id = Some(&c.id),
            _ => {}
        }
        if status.is_some() && command_id.is_some() {
            break;
        }
    }

    let mut snapshot = Snapshot {
        last_status: status.cloned(),
        last_status_time: status.map(|s| s.timestamp),
        pending_command_id: command_id.cloned(),
        expect_pending_result: false,
        msg_expiry_s: previous.msg_expiry_s,
        poll_interval_s: previous.poll_interval_s,
    };

    let confirmed = status.and_then(|s| s.last_command_id.as_ref());
    snapshot.expect_pending_result = match command_id {
        Some(id) => Some(id) != confirmed,
        None => false,
    };

    if let Some(s) = status {
        if let Some(expiry) = s.expiry_s.filter(|v| *v >= MIN_INTERVAL_S) {
            snapshot.msg_expiry_s = expiry;
        }
        if let Some(update) = s.update_interval_s.filter(|v| *v >= MIN_INTERVAL_S) {
            snapshot.poll_interval_s = update;
        }
    }

    let mut changes = Changes {
        went_offline: previous.is_online() && !snapshot.is_online(),
        came_online: !previous.is_online() && snapshot.is_online(),
        ..Changes::default()
    };
    if snapshot.is_online() {
        let before = previous.confirmed_command_id();
        changes.redraw_schedule = before != confirmed;
        changes.command_confirmed = confirmed.is_some() && before != confirmed;
    } else {
        changes.redraw_schedule = !previous.schedule().is_empty();
    }

    Reconciliation { snapshot, changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sync_types::CommandMessage;

    fn t0() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn status(on: bool, last_cmd: Option<&str>) -> Message {
        Message::Status(StatusMessage {
            timestamp: t0(),
            status: on,
            actual_status: None,
            temperature: Some(20.0),
            target_temperature: None,
            name: "device-42".into(),
            schedule: vec![Interval {
                begin: 360,
                end: 480,
                temperature: Some(20.0),
            }],
            override_program: None,
            expiry_s: None,
            update_interval_s: None,
            last_command_id: last_cmd.map(CommandId::from),
        })
    }

    fn command(id: &str) -> Message {
        Message::Command(CommandMessage {
            timestamp: t0(),
            id: CommandId::from(id),
            schedule: None,
            override_program: None,
            legacy_command: None,
        })
    }

    fn with_tuning(msg: Message, expiry: Option<u64>, update: Option<u64>) -> Message {
        match msg {
            Message::Status(mut s) => {
                s.expiry_s = expiry;
                s.update_interval_s = update;
                s.timestamp = t0() + Duration::seconds(1);
                Message::Status(s)
            }
            other => other,
        }
    }

    // ===========================================
    // Newest wins
    // ===========================================

    #[test]
    fn newest_status_wins() {
        let msgs = vec![status(true, None), status(false, None)];
        let r = reconcile(&Snapshot::new(30, 10), &msgs);
        assert_eq!(r.snapshot.status(), Some(true));
        assert_eq!(r.snapshot.last_status_time, Some(t0()));
    }

    #[test]
    fn status_and_command_tracked_independently() {
        let msgs = vec![command("B"), status(true, Some("A")), command("A")];
        let r = reconcile(&Snapshot::new(30, 10), &msgs);
        assert_eq!(r.snapshot.pending_command_id, Some(CommandId::from("B")));
        assert!(r.snapshot.expect_pending_result);
    }

    // ===========================================
    // Pending command detection
    // ===========================================

    #[test]
    fn confirmed_command_is_not_pending() {
        let msgs = vec![status(true, Some("A")), command("A")];
        let r = reconcile(&Snapshot::new(30, 10), &msgs);
        assert!(!r.snapshot.expect_pending_result);
        assert!(r.changes.command_confirmed);
    }

    #[test]
    fn command_without_status_is_pending() {
        let msgs = vec![command("A")];
        let r = reconcile(&Snapshot::new(30, 10), &msgs);
        assert!(r.snapshot.expect_pending_result);
        assert!(!r.snapshot.is_online());
    }

    #[test]
    fn no_command_means_nothing_pending() {
        let msgs = vec![status(true, Some("A"))];
        let r = reconcile(&Snapshot::new(30, 10), &msgs);
        assert!(!r.snapshot.expect_pending_result);
        assert_eq!(r.snapshot.pending_command_id, None);
    }

    // ===========================================
    // Offline detection
    // ===========================================

    #[test]
    fn no_status_goes_offline_and_clears_schedule() {
        let online = reconcile(&Snapshot::new(30, 10), &vec![status(true, Some("A"))]).snapshot;
        assert_eq!(online.schedule().len(), 1);

        let r = reconcile(&online, &Vec::<Message>::new());
        assert!(!r.snapshot.is_online());
        assert_eq!(r.snapshot.status(), None);
        assert_eq!(r.snapshot.last_status_time, None);
        assert!(r.snapshot.schedule().is_empty());
        assert!(r.changes.went_offline);
        assert!(r.changes.redraw_schedule);
    }

    #[test]
    fn staying_offline_does_not_redraw() {
        let r = reconcile(&Snapshot::new(30, 10), &Vec::<Message>::new());
        assert!(!r.changes.went_offline);
        assert!(!r.changes.redraw_schedule);
    }

    #[test]
    fn offline_keeps_tuning() {
        let mut prev = Snapshot::new(30, 10);
        prev.msg_expiry_s = 120;
        let r = reconcile(&prev, &Vec::<Message>::new());
        assert_eq!(r.snapshot.msg_expiry_s, 120);
        assert_eq!(r.snapshot.poll_interval_s, 10);
    }

    // ===========================================
    // Device tuning
    // ===========================================

    #[test]
    fn adopts_sane_tuning() {
        let msgs = vec![with_tuning(status(true, None), Some(120), Some(30))];
        let r = reconcile(&Snapshot::new(30, 10), &msgs);
        assert_eq!(r.snapshot.msg_expiry_s, 120);
        assert_eq!(r.snapshot.poll_interval_s, 30);
    }

    #[test]
    fn ignores_tuning_below_floor() {
        let msgs = vec![with_tuning(status(true, None), Some(4), Some(0))];
        let r = reconcile(&Snapshot::new(30, 10), &msgs);
        assert_eq!(r.snapshot.msg_expiry_s, 30);
        assert_eq!(r.snapshot.poll_interval_s, 10);
    }

    // ===========================================
    // Change reporting
    // ===========================================

    #[test]
    fn redraws_when_confirmed_id_changes() {
        let first = reconcile(&Snapshot::new(30, 10), &vec![status(true, Some("A"))]);
        assert!(first.changes.came_online);
        assert!(first.changes.redraw_schedule);

        let same = reconcile(&first.snapshot, &vec![status(true, Some("A"))]);
        assert!(!same.changes.redraw_schedule);
        assert!(!same.changes.command_confirmed);

        let next = reconcile(&first.snapshot, &vec![status(false, Some("B"))]);
        assert!(next.changes.redraw_schedule);
        assert!(next.changes.command_confirmed);
    }
}
