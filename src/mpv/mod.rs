//! MPV module - spawns and controls an external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, spawning and exit supervision
//! - `ipc.rs` - Async Unix socket connection with request/response correlation
//! - `protocol.rs` - JSON command/response/event types
//! - `events.rs` - Subscriber registry for inbound messages
//! - `client.rs` - Session object tying the above together

mod client;
mod events;
mod ipc;
mod process;
mod protocol;

pub use client::{MpvClient, MpvError, SessionOptions, SessionStatus};
pub use events::{EventBus, EventFilter, EventHandler, Subscription};
pub use ipc::{ConnectOptions, IpcError, MpvIpc};
pub use process::{find_mpv, ProcessError};
pub use protocol::{
  MpvCommand, MpvEvent, MpvMessage, MpvResponse, SeekMode, EOF_PROPERTY, FILE_LOADED,
  PLAYBACK_ENDED, PROPERTY_CHANGE,
};
