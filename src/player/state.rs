//! Decoder lifecycle as seen by the frame pipeline.
//!
//! ```text
//! Idle -> Preparing -> Prepared -> Playing <-> Paused
//!                                  Playing <-> Buffering
//! any -> Completed | Error | Released        (Released is terminal)
//! Completed | Error -> Preparing             (fresh resource)
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Preparing,
    Prepared,
    Playing,
    Paused,
    Buffering,
    Completed,
    Error,
    Released,
}

impl PlayerState {
    pub fn is_terminal(self) -> bool {
        self == Self::Released
    }

    pub fn can_transition_to(self, to: PlayerState) -> bool {
        use PlayerState::*;
        match (self, to) {
            (Released, _) => false,
            (_, Completed | Error | Released) => true,
            (Idle | Completed | Error, Preparing) => true,
            (Preparing, Prepared) => true,
            (Prepared | Paused | Buffering, Playing) => true,
            (Playing, Paused | Buffering) => true,
            _ => false,
        }
    }
}

/// What a transition means for frame capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureChange {
    Start,
    Stop,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PlayerState,
    pub to: PlayerState,
}

impl Transition {
    pub fn capture(self) -> CaptureChange {
        let was = self.from == PlayerState::Playing;
        let is = self.to == PlayerState::Playing;
        match (was, is) {
            (false, true) => CaptureChange::Start,
            (true, false) => CaptureChange::Stop,
            _ => CaptureChange::Unchanged,
        }
    }
}

/// Validates transitions and broadcasts the current state to watchers.
pub struct PlayerStateMachine {
    tx: watch::Sender<PlayerState>,
}

impl PlayerStateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PlayerState::Idle);
        Self { tx }
    }

    pub fn state(&self) -> PlayerState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.tx.subscribe()
    }

    /// Validate a transition without applying it.
    pub fn check(&self, to: PlayerState) -> Result<Transition, StateError> {
        let from = self.state();
        if from.is_terminal() {
            return Err(StateError::Released);
        }
        if !from.can_transition_to(to) {
            return Err(StateError::InvalidTransition { from, to });
        }
        Ok(Transition { from, to })
    }

    pub fn transition(&mut self, to: PlayerState) -> Result<Transition, StateError> {
        let transition = self.check(to)?;
        self.tx.send_replace(to);
        debug!("Player state {:?} -> {:?}", transition.from, to);
        Ok(transition)
    }

    /// Move to `Released`. Returns `None` if already released.
    pub fn release(&mut self) -> Option<Transition> {
        let from = self.state();
        if from.is_terminal() {
            return None;
        }
        self.tx.send_replace(PlayerState::Released);
        Some(Transition {
            from,
            to: PlayerState::Released,
        })
    }
}

impl Default for PlayerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::PlayerState::*;
    use super::*;

    fn playing() -> PlayerStateMachine {
        let mut machine = PlayerStateMachine::new();
        for state in [Preparing, Prepared, Playing] {
            machine.transition(state).unwrap();
        }
        machine
    }

    #[test]
    fn happy_path_starts_capture_once() {
        let mut machine = PlayerStateMachine::new();
        let changes: Vec<_> = [Preparing, Prepared, Playing]
            .into_iter()
            .map(|s| machine.transition(s).unwrap().capture())
            .collect();
        assert_eq!(
            changes,
            [
                CaptureChange::Unchanged,
                CaptureChange::Unchanged,
                CaptureChange::Start
            ]
        );
    }

    #[test]
    fn pause_and_buffering_stop_capture() {
        let mut machine = playing();
        assert_eq!(machine.transition(Paused).unwrap().capture(), CaptureChange::Stop);
        assert_eq!(machine.transition(Playing).unwrap().capture(), CaptureChange::Start);
        assert_eq!(machine.transition(Buffering).unwrap().capture(), CaptureChange::Stop);
        assert_eq!(machine.transition(Playing).unwrap().capture(), CaptureChange::Start);
    }

    #[test]
    fn rejects_skipping_preparation() {
        let mut machine = PlayerStateMachine::new();
        assert_eq!(
            machine.transition(Playing),
            Err(StateError::InvalidTransition {
                from: Idle,
                to: Playing
            })
        );
        assert_eq!(machine.state(), Idle);
    }

    #[test]
    fn error_requires_fresh_preparation() {
        let mut machine = playing();
        assert_eq!(machine.transition(Error).unwrap().capture(), CaptureChange::Stop);
        assert!(machine.transition(Playing).is_err());
        assert!(machine.transition(Preparing).is_ok());
    }

    #[test]
    fn released_is_terminal() {
        let mut machine = playing();
        let release = machine.release().unwrap();
        assert_eq!(release.capture(), CaptureChange::Stop);
        assert!(machine.release().is_none());
        assert_eq!(machine.transition(Preparing), Err(StateError::Released));
        assert_eq!(machine.transition(Released), Err(StateError::Released));
    }

    #[test]
    fn any_live_state_can_fail_or_complete() {
        for state in [Idle, Preparing, Prepared, Playing, Paused, Buffering, Completed, Error] {
            assert!(state.can_transition_to(Error), "{state:?}");
            assert!(state.can_transition_to(Completed), "{state:?}");
            assert!(state.can_transition_to(Released), "{state:?}");
        }
    }

    #[tokio::test]
    async fn watchers_see_transitions() {
        let mut machine = PlayerStateMachine::new();
        let mut rx = machine.subscribe();
        machine.transition(Preparing).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Preparing);
    }
}
