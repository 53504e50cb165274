//! Round state module
//!
//! The persisted round record and the state machine that owns it:
//! - `RoundRecord` / `RoundState` data model and overlay projection
//! - `RoundStateMachine` for validated, atomic persistence

pub mod machine;
pub mod record;

pub use machine::RoundStateMachine;
pub use record::{OverlayState, RoundRecord, RoundState};
