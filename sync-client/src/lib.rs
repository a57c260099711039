//! # sync-client
//!
//! Client library for the piheat-sync protocol.
//!
//! This is the library applications use to watch and command a heating
//! device through an untrusted relay.
//!
//! ## Features
//!
//! - **E2E Encryption**: AES-256-CBC envelopes under a SHA-256 passphrase key
//! - **Replay and Skew Rejection**: every relay item is validated before use
//! - **Adaptive Polling**: fast follow-up while a command awaits confirmation
//! - **Transport Abstraction**: Pluggable transport layer (dweet HTTP, mock)
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{ConfigFile, DweetTransport, SyncClient};
//!
//! let config = ConfigFile::load("piheat.toml".as_ref())?.into_session_config()?;
//! let transport = DweetTransport::new(&config.relay_url);
//! let client = SyncClient::new(config, transport)?;
//!
//! client.start()?;
//! let mut views = client.subscribe();
//! while views.changed().await.is_ok() {
//!     println!("{:?}", views.borrow().display_status());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
mod driver;
pub mod publisher;
pub mod transport;

pub use client::{ClientError, PendingCommand, SessionView, SyncClient, UpdateState};
pub use config::{ConfigError, ConfigFile, Passphrase, SessionConfig};
pub use publisher::{CommandRequest, DEFAULT_TURN_ON_HOURS};
pub use sync_core::{Changes, Snapshot};
pub use transport::{DweetTransport, MockTransport, Transport, TransportError, DEFAULT_RELAY_URL};
