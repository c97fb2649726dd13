use std::sync::Arc;

use reqwest::Method;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::gateway::ApiGateway;
use crate::model::{AuthResponse, UserProfile};

use super::forms::{LoginForm, LoginRequest, RegisterForm};
use super::session::{Credential, SessionCore, SessionState, SessionView, SignOutTrigger};
use super::store::SessionStore;

/// Owner of the session state machine.
///
/// Transitions run one at a time: a second `login`/`register`/`validate` while one is in
/// flight is rejected rather than queued. `logout` is synchronous and always wins; a
/// transition that was in flight when it happened is discarded on completion.
pub struct AuthSessionManager {
    core: Arc<SessionCore>,
    gateway: ApiGateway,
    transition: Mutex<()>,
}

impl AuthSessionManager {
    /// Build the manager from whatever the store holds. The state is `Restoring` when a
    /// credential was found; nothing is sent until `validate` runs.
    pub fn new(config: &ClientConfig, store: Arc<dyn SessionStore>) -> AppResult<Self> {
        let stored = store.load();
        let core = SessionCore::new(store, stored.credential);
        let gateway = ApiGateway::new(config, SessionView::new(core.clone()), SignOutTrigger::new(core.clone()))?;
        debug!(target: "meterbill", "session manager starting in state {}", core.state().label());
        Ok(Self { core, gateway, transition: Mutex::new(()) })
    }

    /// `new` followed by restoration when a credential was stored. A failed restoration
    /// leaves the manager signed out; it is not an error for the caller.
    pub async fn start(config: &ClientConfig, store: Arc<dyn SessionStore>) -> AppResult<Self> {
        let manager = Self::new(config, store)?;
        if manager.core.state().is_restoring() {
            if let Err(e) = manager.validate().await {
                info!(target: "meterbill", "stored session not restored: {}", e);
            }
        }
        Ok(manager)
    }

    pub fn view(&self) -> SessionView { SessionView::new(self.core.clone()) }
    pub fn gateway(&self) -> &ApiGateway { &self.gateway }
    pub fn state(&self) -> SessionState { self.core.state() }

    pub async fn login(&self, form: &LoginForm) -> AppResult<UserProfile> {
        let request = form.validate()?;
        let _guard = self.begin_transition()?;
        self.require_signed_out()?;
        let generation = self.core.generation();
        self.sign_in(&request, generation).await
    }

    /// Create the account, then sign in with the same credentials. When the account is
    /// created but sign-in fails, the sign-in error is returned and nothing is retried.
    pub async fn register(&self, form: &RegisterForm) -> AppResult<UserProfile> {
        let request = form.validate()?;
        let _guard = self.begin_transition()?;
        self.require_signed_out()?;
        let generation = self.core.generation();
        let body = serde_json::to_value(&request)?;
        let created: UserProfile = self
            .gateway
            .send(Method::POST, "/auth/register", Some(&body), &[])
            .await
            .map_err(as_auth_failure)?;
        info!(target: "meterbill", "registered user_id={} role={}", created.id, created.role);
        self.sign_in(&request.login(), generation).await.map_err(|e| {
            warn!(target: "meterbill", "account {} created but sign-in failed: {}", created.email, e);
            e
        })
    }

    /// Restoring -> Authenticated with the profile the server returns, or -> Unauthenticated
    /// on any failure (expired credential and unreachable server alike).
    pub async fn validate(&self) -> AppResult<UserProfile> {
        let _guard = self.begin_transition()?;
        if !self.core.state().is_restoring() {
            return Err(AppError::conflict("not_restoring", "no stored session to restore"));
        }
        let generation = self.core.generation();
        match self.gateway.send::<UserProfile>(Method::GET, "/auth/me", None, &[]).await {
            Ok(profile) => {
                if !self.core.confirm(generation, profile.clone()) {
                    return Err(superseded());
                }
                Ok(profile)
            }
            Err(e) => {
                // a 401 already ended this generation inside the gateway
                self.core.end(generation, "restore failed");
                Err(e)
            }
        }
    }

    pub fn logout(&self) {
        self.core.logout();
    }

    async fn sign_in(&self, request: &LoginRequest, generation: u64) -> AppResult<UserProfile> {
        let body = serde_json::to_value(request)?;
        let resp: AuthResponse = self
            .gateway
            .send(Method::POST, "/auth/login", Some(&body), &[])
            .await
            .map_err(as_auth_failure)?;
        if !resp.token_type.eq_ignore_ascii_case("bearer") {
            debug!(target: "meterbill", "unexpected token_type '{}', sending as bearer", resp.token_type);
        }
        let profile = resp.user;
        if !self.core.establish(generation, Credential::new(resp.access_token), profile.clone())? {
            return Err(superseded());
        }
        Ok(profile)
    }

    fn begin_transition(&self) -> AppResult<MutexGuard<'_, ()>> {
        self.transition
            .try_lock()
            .map_err(|_| AppError::conflict("transition_in_progress", "another sign-in step is still running"))
    }

    fn require_signed_out(&self) -> AppResult<()> {
        match self.core.state() {
            SessionState::Unauthenticated => Ok(()),
            SessionState::Restoring => Err(AppError::conflict("restoring", "the stored session is still being restored")),
            SessionState::Authenticated(u) => Err(AppError::conflict(
                "already_authenticated".to_string(),
                format!("already signed in as {}; log out first", u.email),
            )),
        }
    }
}

fn superseded() -> AppError {
    AppError::conflict("superseded", "the session changed while the request was in flight")
}

/// Any refusal of login/registration is an authentication failure for the caller.
fn as_auth_failure(err: AppError) -> AppError {
    match err {
        AppError::Authorization { message, .. }
        | AppError::Forbidden { message, .. }
        | AppError::NotFound { message, .. }
        | AppError::Rejected { message, .. } => AppError::authentication("rejected".to_string(), message),
        other => other,
    }
}
