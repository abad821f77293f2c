//! Playback orchestration on top of the MPV session.

mod backend;
#[cfg(test)]
pub(crate) mod fake;
mod orchestrator;
mod queue;
mod state;

pub use backend::PlayerBackend;
pub use orchestrator::{EnqueueOptions, PlaybackOrchestrator, PlayerError};
pub use queue::{MediaItem, Queue};
pub use state::{LoopMode, PlaybackState, PlaybackStatus};
