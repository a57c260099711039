//! Poll scheduler state machine for piheat-sync.
//!
//! Decides when the next fetch starts. Pure: it takes events and returns a
//! new state plus actions. The driver in sync-client owns the single timer
//! and the single in-flight fetch and executes the actions.
//!
//! Arming a timer always replaces the previous one.

use std::time::Duration;

/// Fast poll period while a command result is expected.
pub const DEFAULT_FAST_POLL_INTERVAL: Duration = Duration::from_secs(7);

/// Delay before retrying a failed fetch.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Poll scheduler state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Never started.
    Idle,
    /// A fetch is in flight.
    Polling {
        /// A command was published during this fetch; the next poll waits
        /// the fast interval.
        delayed_follow_up: bool,
    },
    /// Waiting for the timer.
    Scheduled {
        /// Why we are waiting.
        reason: WaitReason,
        /// How long the armed timer runs.
        delay: Duration,
    },
    /// Stopped; only `Start` leaves this state.
    Stopped,
}

/// Why the scheduler is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Regular cadence after a successful poll.
    Next,
    /// Giving the relay time to propagate after a publish.
    Delayed,
    /// Retrying after a failed fetch.
    Retry,
}

/// Scheduler timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Poll period while a command result is expected, and after a publish.
    pub fast_poll_interval: Duration,
    /// Delay after a failed fetch.
    pub retry_delay: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            fast_poll_interval: DEFAULT_FAST_POLL_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Events fed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Begin polling.
    Start,
    /// Poll right away, cancelling the timer.
    PollNow,
    /// The in-flight fetch returned and was reconciled.
    FetchSucceeded {
        /// The new snapshot expects a command result.
        expect_pending_result: bool,
        /// The new snapshot's poll period.
        poll_interval: Duration,
    },
    /// The in-flight fetch failed.
    FetchFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The armed timer fired.
    TimerFired,
    /// A command was published successfully.
    CommandPublished,
    /// Stop polling.
    StopRequested,
}

/// Actions to be executed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollAction {
    /// Start a fetch.
    StartFetch,
    /// Arm the timer, replacing any armed one.
    ArmTimer {
        /// Timer duration.
        delay: Duration,
        /// Why the timer is armed.
        reason: WaitReason,
    },
    /// Disarm the timer.
    CancelTimer,
    /// Drop the in-flight fetch; its result must not be applied.
    AbandonFetch,
    /// Tell the UI something.
    Notify(PollNotice),
}

/// Notices for the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollNotice {
    /// A poll completed and the snapshot was replaced.
    Updated,
    /// A poll failed; the snapshot is unchanged.
    UpdateFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Polling stopped.
    Stopped,
}

impl PollState {
    /// Create a scheduler in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: PollEvent, timing: &PollTiming) -> (Self, Vec<PollAction>) {
        match (self, event) {
            // Stopped ignores everything but Start
            (Self::Stopped, PollEvent::Start) | (Self::Idle, PollEvent::Start) => (
                Self::Polling {
                    delayed_follow_up: false,
                },
                vec![PollAction::StartFetch],
            ),
            (Self::Stopped, _) => (Self::Stopped, vec![]),

            // Stop from anywhere else
            (_, PollEvent::StopRequested) => (
                Self::Stopped,
                vec![
                    PollAction::CancelTimer,
                    PollAction::AbandonFetch,
                    PollAction::Notify(PollNotice::Stopped),
                ],
            ),

            // Waiting
            (Self::Scheduled { .. }, PollEvent::TimerFired)
            | (Self::Scheduled { .. }, PollEvent::PollNow)
            | (Self::Scheduled { .. }, PollEvent::Start) => (
                Self::Polling {
                    delayed_follow_up: false,
                },
                vec![PollAction::CancelTimer, PollAction::StartFetch],
            ),
            (Self::Idle, PollEvent::PollNow) => (
                Self::Polling {
                    delayed_follow_up: false,
                },
                vec![PollAction::StartFetch],
            ),
            (Self::Scheduled { .. }, PollEvent::CommandPublished)
            | (Self::Idle, PollEvent::CommandPublished) => {
                let delay = timing.fast_poll_interval;
                (
                    Self::Scheduled {
                        reason: WaitReason::Delayed,
                        delay,
                    },
                    vec![PollAction::ArmTimer {
                        delay,
                        reason: WaitReason::Delayed,
                    }],
                )
            }

            // Fetch in flight
            (Self::Polling { .. }, PollEvent::CommandPublished) => (
                Self::Polling {
                    delayed_follow_up: true,
                },
                vec![],
            ),
            (
                Self::Polling { delayed_follow_up },
                PollEvent::FetchSucceeded {
                    expect_pending_result,
                    poll_interval,
                },
            ) => {
                let (reason, delay) = if delayed_follow_up {
                    (WaitReason::Delayed, timing.fast_poll_interval)
                } else if expect_pending_result {
                    (WaitReason::Next, timing.fast_poll_interval)
                } else {
                    (WaitReason::Next, poll_interval)
                };
                (
                    Self::Scheduled { reason, delay },
                    vec![
                        PollAction::Notify(PollNotice::Updated),
                        PollAction::ArmTimer { delay, reason },
                    ],
                )
            }
            (Self::Polling { .. }, PollEvent::FetchFailed { error }) => {
                let delay = timing.retry_delay;
                (
                    Self::Scheduled {
                        reason: WaitReason::Retry,
                        delay,
                    },
                    vec![
                        PollAction::Notify(PollNotice::UpdateFailed { error }),
                        PollAction::ArmTimer {
                            delay,
                            reason: WaitReason::Retry,
                        },
                    ],
                )
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if polling is active.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Polling { .. } | Self::Scheduled { .. })
    }

    /// Check if a fetch is in flight.
    pub fn is_polling(&self) -> bool {
        matches!(self, Self::Polling { .. })
    }
}

impl Default for PollState {
    fn default() -> Self {
        Self::new()
    }
}
