pub mod state;

pub use state::{CaptureChange, PlayerState, PlayerStateMachine, Transition};
