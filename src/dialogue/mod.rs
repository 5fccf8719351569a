//! Dialogue state machine module.
//!
//! Tracks where each user is inside a multi-step flow (reporting an
//! expense, handing out money, ...).

mod state;
mod storage;

pub use state::{DialogueState, ItAction};
pub use storage::Dialogues;
