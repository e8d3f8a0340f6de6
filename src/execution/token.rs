//! One-shot token bookkeeping shared by every clone of a token.

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenState {
    Armed,
    Consumed,
}

#[derive(Debug, Clone)]
pub(crate) struct OneShot {
    state: Arc<Mutex<TokenState>>,
}

impl OneShot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TokenState::Armed)),
        }
    }

    /// Moves the token to `Consumed`. Returns `false` if it already was.
    pub fn consume(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            TokenState::Armed => {
                *state = TokenState::Consumed;
                true
            }
            TokenState::Consumed => false,
        }
    }

    pub fn state(&self) -> TokenState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
