//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate connects to an Asterisk server's Manager port, logs in, sends
//! actions, matches responses back to their callers and routes unsolicited
//! events to registered handlers.
//!
//! # Architecture
//!
//! The protocol core is sans-IO: [`AmiParser`] frames bytes into
//! [`AmiMessage`] blocks, [`Correlator`] matches responses to actions by
//! `ActionID`, and [`SharedDispatcher`] routes events by name. Two front ends
//! drive it:
//! - [`AmiClient`] (Clone + Send + Sync): tokio client with a background reader task
//! - [`ManagerSession`]: std socket session with a blocking `send_action` and
//!   a non-blocking `pump()` for external poll loops
//!
//! # Examples
//!
//! ## Async client
//!
//! ```rust,no_run
//! use asterisk_manager_tokio::{AmiClient, AmiError, CoreActions, EventSubscriber};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let client = AmiClient::connect("localhost", 5038, "admin", "amp111").await?;
//!
//!     client.register_handler("Hangup", |event| {
//!         println!("{:?} hung up: {:?}", event.channel(), event.hangup_cause_text());
//!         Ok(())
//!     });
//!
//!     for line in client.command("core show channels").await? {
//!         println!("{}", line);
//!     }
//!
//!     client.disconnect().await
//! }
//! ```
//!
//! ## Originate
//!
//! ```rust
//! use asterisk_manager_tokio::{AmiAction, Originate};
//! use std::time::Duration;
//!
//! let action: AmiAction = Originate::extension("SIP/100", "default", "200", 1)
//!     .caller_id("Front Desk <100>")
//!     .timeout(Duration::from_secs(30))
//!     .variable("ACCOUNT", "42")
//!     .into();
//! assert_eq!(action.get("Exten"), Some("200"));
//! ```
//!
//! ## Blocking session
//!
//! ```rust,no_run
//! use asterisk_manager_tokio::{AmiAction, ManagerSession};
//!
//! # fn main() -> Result<(), asterisk_manager_tokio::AmiError> {
//! let mut session = ManagerSession::connect("localhost", 5038, "admin", "amp111")?;
//! let response = session.send_action(AmiAction::ping())?;
//! println!("{:?}", response.status());
//! session.disconnect()
//! # }
//! ```

#[macro_use]
mod macros;

pub mod actions;
pub mod blocking;
pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod headers;
pub mod message;

pub(crate) mod buffer;
pub mod constants;
pub mod protocol;

pub use actions::{
    ActionSender, CoreActions, MailboxCount, Originate, OriginateTarget, QueueStatus,
};
pub use blocking::ManagerSession;
pub use channel::{ChannelState, ExtensionStatus, ParseChannelStateError};
pub use command::{AmiAction, AmiResponse, ResponseStatus};
pub use config::{AmiConnectOptions, ConnectionProfile, ManagerConfig};
pub use connection::{AmiClient, ConnectionState, DisconnectReason};
pub use constants::DEFAULT_AMI_PORT;
pub use correlator::{Completion, Correlator, EventRoute};
pub use dispatcher::{
    DispatchOutcome, EventDispatcher, EventHandler, EventSubscriber, HandlerError,
    HandlerErrorPolicy, HandlerResult, SharedDispatcher,
};
pub use error::{AmiError, AmiResult};
pub use event::{AmiEvent, AmiEventType, ParseEventTypeError};
pub use headers::{ManagerHeader, ParseManagerHeaderError};
pub use message::{AmiMessage, MessageKind};
pub use protocol::{AmiParser, MalformedLinePolicy};
