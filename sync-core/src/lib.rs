//! # sync-core
//!
//! Pure protocol logic for piheat-sync (no I/O, instant tests).
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Every function that needs the time takes `now`
//! explicitly. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (relay fetch/publish, timers) is performed by `sync-client`,
//! which interprets the actions produced by the [`PollState`] machine.
//!
//! ## Pipeline
//!
//! ```text
//! RelayItem ─▶ Codec::frame ─▶ Codec::open ─▶ validate_batch ─▶ reconcile ─▶ Snapshot
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
pub mod codec;
pub mod reconcile;
pub mod scheduler;
pub mod validator;

pub use cipher::{Cipher, CipherError, Key, KEY_SIZE, NONCE_SIZE};
pub use codec::{Codec, CodecError, Frame};
pub use reconcile::{reconcile, Changes, Reconciliation, Snapshot, MIN_INTERVAL_S};
pub use scheduler::{
    PollAction, PollEvent, PollNotice, PollState, PollTiming, WaitReason,
    DEFAULT_FAST_POLL_INTERVAL, DEFAULT_RETRY_DELAY,
};
pub use validator::{
    validate_batch, BatchOutcome, Rejection, ValidationParams, Verdict, DEFAULT_TOLERANCE_MS,
};
