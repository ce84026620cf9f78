//! asciichat-app — wires capture, directory, signaling, transfer and playback
//! into the two call roles.

pub mod call;
pub mod prompt;
pub mod store;

pub use call::{CallOrchestrator, CallOutcome};
pub use prompt::StdinPrompt;
pub use store::{SessionStore, StoreError};
