//! Resolved identities and the session provider.

use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use stockroom_core::UserId;

use crate::claims::JwtClaims;

/// An authenticated user, as handed to core operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl From<&JwtClaims> for Identity {
    fn from(claims: &JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email.clone(),
        }
    }
}

/// Callback fired with the new identity (`None` on sign-out).
pub type IdentityListener = Arc<dyn Fn(Option<&Identity>) + Send + Sync>;

/// Source of the current identity.
///
/// Change subscriptions are for presentation code (refreshing a session
/// banner, dropping cached views). Core operations never subscribe; they take
/// the acting identity as an argument.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<Identity>;

    fn on_identity_change(&self, listener: IdentityListener);
}

/// Process-local session holder with explicit sign-in and sign-out.
#[derive(Default)]
pub struct SessionIdentityProvider {
    current: RwLock<Option<Identity>>,
    listeners: Mutex<Vec<IdentityListener>>,
}

impl SessionIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, identity: Identity) {
        self.replace(Some(identity));
    }

    pub fn sign_out(&self) {
        self.replace(None);
    }

    fn replace(&self, next: Option<Identity>) {
        match self.current.write() {
            Ok(mut guard) => *guard = next.clone(),
            Err(poisoned) => *poisoned.into_inner() = next.clone(),
        }

        // Snapshot so a listener may register another listener without deadlocking.
        let listeners: Vec<IdentityListener> = match self.listeners.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        tracing::debug!(
            signed_in = next.is_some(),
            listeners = listeners.len(),
            "identity changed"
        );
        for listener in listeners {
            listener(next.as_ref());
        }
    }
}

impl IdentityProvider for SessionIdentityProvider {
    fn current_user(&self) -> Option<Identity> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn on_identity_change(&self, listener: IdentityListener) {
        match self.listeners.lock() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }
}

impl core::fmt::Debug for SessionIdentityProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionIdentityProvider")
            .field("current", &self.current_user())
            .finish_non_exhaustive()
    }
}
