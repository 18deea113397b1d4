use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::models::Principal;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("sign in required")]
    NotSignedIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Principal),
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated(Principal),
}

/// Caches the latest principal reported by the auth service and gates
/// actions that need one.
#[derive(Default)]
pub struct Gate {
    state: RwLock<SessionState>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.state.read(), SessionState::Authenticated(_))
    }

    pub fn current_principal(&self) -> Option<Principal> {
        match &*self.state.read() {
            SessionState::Authenticated(principal) => Some(principal.clone()),
            SessionState::Anonymous => None,
        }
    }

    pub fn require_principal(&self) -> Result<Principal, SessionError> {
        self.current_principal().ok_or(SessionError::NotSignedIn)
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn handle(&self, event: SessionEvent) {
        {
            let mut state = self.state.write();
            *state = match &event {
                SessionEvent::SignedIn(principal) => {
                    info!(user = %principal.id, "session authenticated");
                    SessionState::Authenticated(principal.clone())
                }
                SessionEvent::SignedOut => {
                    info!("session cleared");
                    SessionState::Anonymous
                }
            };
        }
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            id: "u1".into(),
            email: "sam@example.com".into(),
        }
    }

    #[test]
    fn starts_anonymous() {
        let gate = Gate::new();
        assert!(!gate.is_authenticated());
        assert!(matches!(
            gate.require_principal(),
            Err(SessionError::NotSignedIn)
        ));
    }

    #[test]
    fn sign_in_then_out() {
        let gate = Gate::new();
        gate.handle(SessionEvent::SignedIn(principal()));
        assert_eq!(gate.current_principal(), Some(principal()));
        assert_eq!(gate.require_principal().unwrap().email, "sam@example.com");

        gate.handle(SessionEvent::SignedOut);
        assert_eq!(gate.state(), SessionState::Anonymous);
    }

    #[test]
    fn subscribers_see_transitions() {
        let gate = Gate::new();
        let rx = gate.subscribe();
        let dropped = gate.subscribe();
        drop(dropped);

        gate.handle(SessionEvent::SignedIn(principal()));
        gate.handle(SessionEvent::SignedOut);
        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![SessionEvent::SignedIn(principal()), SessionEvent::SignedOut]
        );
        assert_eq!(gate.subscribers.lock().len(), 1);
    }
}
