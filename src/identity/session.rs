use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::model::UserProfile;
use crate::routes::View;

use super::store::SessionStore;

/// Opaque bearer token issued by the API at login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self { Self(token.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn bearer(&self) -> String { format!("Bearer {}", self.0) }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Credential(***)") }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Restoring,
    Authenticated(UserProfile),
}

impl SessionState {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(u) => Some(u),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool { matches!(self, SessionState::Authenticated(_)) }
    pub fn is_restoring(&self) -> bool { matches!(self, SessionState::Restoring) }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Restoring => "restoring",
            SessionState::Authenticated(_) => "authenticated",
        }
    }
}

// credential is Some exactly when state is Restoring or Authenticated
struct Slot {
    state: SessionState,
    credential: Option<Credential>,
    generation: u64,
}

/// The one mutable session container. Only the identity module can reach the write side;
/// the rest of the crate holds `SessionView`s.
///
/// State changes happen under `slot`; store I/O happens under `io`, never under `slot`.
/// A writer only touches the store while its generation is still current.
pub(super) struct SessionCore {
    slot: RwLock<Slot>,
    io: Mutex<()>,
    store: Arc<dyn SessionStore>,
    redirect: watch::Sender<Option<View>>,
}

impl SessionCore {
    pub(super) fn new(store: Arc<dyn SessionStore>, stored: Option<Credential>) -> Arc<Self> {
        let state = if stored.is_some() { SessionState::Restoring } else { SessionState::Unauthenticated };
        let (redirect, _) = watch::channel(None);
        Arc::new(Self {
            slot: RwLock::new(Slot { state, credential: stored, generation: 0 }),
            io: Mutex::new(()),
            store,
            redirect,
        })
    }

    pub(super) fn state(&self) -> SessionState { self.slot.read().state.clone() }
    pub(super) fn generation(&self) -> u64 { self.slot.read().generation }

    /// Persist a freshly issued credential, then install it. `Ok(false)` when the session
    /// moved on since `expected` was observed. A failed save leaves the state untouched.
    pub(super) fn establish(&self, expected: u64, credential: Credential, profile: UserProfile) -> AppResult<bool> {
        let _io = self.io.lock();
        {
            let slot = self.slot.read();
            if slot.generation != expected || slot.state.is_authenticated() {
                return Ok(false);
            }
        }
        if let Err(e) = self.store.save(&credential, &profile) {
            warn!(target: "meterbill", "session not persisted, sign-in abandoned: {}", e);
            if let Err(e) = self.store.clear() {
                warn!(target: "meterbill", "partial session not cleared: {}", e);
            }
            return Err(e);
        }
        let mut slot = self.slot.write();
        if slot.generation != expected || slot.state.is_authenticated() {
            // a logout slipped in; it clears the store once `io` is released
            return Ok(false);
        }
        info!(target: "meterbill", "session: {} -> authenticated user_id={} role={}", slot.state.label(), profile.id, profile.role);
        slot.state = SessionState::Authenticated(profile);
        slot.credential = Some(credential);
        slot.generation += 1;
        Ok(true)
    }

    /// Finish restoration with the server's view of the profile; the credential is kept.
    pub(super) fn confirm(&self, expected: u64, profile: UserProfile) -> bool {
        let _io = self.io.lock();
        let credential = {
            let slot = self.slot.read();
            if slot.generation != expected || !slot.state.is_restoring() {
                return false;
            }
            slot.credential.clone()
        };
        let Some(credential) = credential else { return false; };
        // the stored credential is already valid; only the cached profile is stale
        if let Err(e) = self.store.save(&credential, &profile) {
            warn!(target: "meterbill", "refreshed profile not persisted: {}", e);
        }
        let mut slot = self.slot.write();
        if slot.generation != expected || !slot.state.is_restoring() {
            return false;
        }
        info!(target: "meterbill", "session: restoring -> authenticated user_id={} role={}", profile.id, profile.role);
        slot.state = SessionState::Authenticated(profile);
        true
    }

    /// End the session observed at `expected`. Returns false when that session already
    /// ended, so concurrent failures clear storage once.
    pub(super) fn end(&self, expected: u64, reason: &str) -> bool {
        let ended = {
            let mut slot = self.slot.write();
            if slot.generation != expected || slot.credential.is_none() {
                return false;
            }
            Self::reset(&mut slot, reason)
        };
        self.wipe(ended);
        true
    }

    /// Unconditional sign-out.
    pub(super) fn logout(&self) {
        let ended = {
            let mut slot = self.slot.write();
            Self::reset(&mut slot, "logout")
        };
        self.wipe(ended);
    }

    fn reset(slot: &mut Slot, reason: &str) -> u64 {
        info!(target: "meterbill", "session: {} -> unauthenticated ({})", slot.state.label(), reason);
        slot.state = SessionState::Unauthenticated;
        slot.credential = None;
        slot.generation += 1;
        slot.generation
    }

    // Clear the store for the sign-out that produced `generation`, unless a newer sign-in
    // already owns it.
    fn wipe(&self, generation: u64) {
        {
            let _io = self.io.lock();
            if self.generation() == generation {
                if let Err(e) = self.store.clear() {
                    warn!(target: "meterbill", "session store not cleared: {}", e);
                }
            }
        }
        self.redirect.send_replace(Some(View::Login));
    }
}

/// Read-only handle on the session, cheap to clone.
#[derive(Clone)]
pub struct SessionView {
    core: Arc<SessionCore>,
}

impl SessionView {
    pub(super) fn new(core: Arc<SessionCore>) -> Self { Self { core } }

    pub fn state(&self) -> SessionState { self.core.state() }
    pub fn user(&self) -> Option<UserProfile> { self.core.slot.read().state.user().cloned() }
    pub fn is_authenticated(&self) -> bool { self.core.slot.read().state.is_authenticated() }
    pub fn is_restoring(&self) -> bool { self.core.slot.read().state.is_restoring() }
    pub fn credential(&self) -> Option<Credential> { self.core.slot.read().credential.clone() }

    /// Bumped on every sign-in and sign-out; results tagged with an older value are stale.
    pub fn generation(&self) -> u64 { self.core.generation() }

    /// Credential and generation read under one lock.
    pub fn credential_with_generation(&self) -> Option<(Credential, u64)> {
        let slot = self.core.slot.read();
        slot.credential.clone().map(|c| (c, slot.generation))
    }

    /// Navigation requests issued by the session (sign-out sends the login view).
    pub fn redirects(&self) -> watch::Receiver<Option<View>> { self.core.redirect.subscribe() }
}

impl fmt::Debug for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionView").field("state", &self.core.state().label()).finish()
    }
}

/// Handed to the gateway so a rejected credential can end the session it belonged to.
#[derive(Clone)]
pub struct SignOutTrigger {
    core: Arc<SessionCore>,
}

impl SignOutTrigger {
    pub(super) fn new(core: Arc<SessionCore>) -> Self { Self { core } }

    pub fn unauthorized(&self, generation: u64) -> bool {
        self.core.end(generation, "credential rejected")
    }
}
