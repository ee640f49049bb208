//! Session lifecycle orchestration.
//!
//! The [`SessionController`] is the single writer of [`AuthState`], the
//! persisted session record and the completeness cache. Every state change
//! goes through one `watch::Sender::send_if_modified` call, so the comparison
//! against the current token or generation happens at write time, under the
//! same lock as the write.

mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::completeness::CompletenessEvaluator;
use crate::config::AuthConfig;
use crate::deadline;
use crate::routing::{Navigation, RoutePolicy};
use crate::storage::{
    CompletenessCache, CompletenessStatus, KeyValueStorage, MemoryStorage, SessionCache,
};
use crate::traits::{DataStore, Navigator, Notice, Notifier, SessionGateway, TracingNotifier};
use crate::types::{
    AuthEvent, AuthResult, OAuthProvider, Session, SignOutScope, UserAttributes, UserId,
};

pub use state::AuthState;
use state::{Adoption, Evaluation};

/// Wiring for a [`SessionController`].
pub struct ControllerBuilder<G, D> {
    gateway: Arc<G>,
    data_store: Arc<D>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    storage: Arc<dyn KeyValueStorage>,
    config: AuthConfig,
}

impl<G: SessionGateway, D: DataStore> ControllerBuilder<G, D> {
    #[must_use]
    pub fn with_config(mut self, config: AuthConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend for the persisted session and completeness caches
    /// (default: in-memory).
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Receiver of user-facing notices (default: the log).
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Build the controller and subscribe to the gateway's change events.
    ///
    /// Must be called inside a Tokio runtime. Call
    /// [`initialize`](SessionController::initialize) afterwards.
    #[must_use]
    pub fn start(self) -> Arc<SessionController<G, D>> {
        let completeness_cache =
            CompletenessCache::new(self.storage.clone(), self.config.completeness_prefix.clone());
        let session_cache = SessionCache::new(self.storage, self.config.session_key.clone());
        let evaluator = CompletenessEvaluator::new(
            self.data_store,
            completeness_cache.clone(),
            self.config.request_timeout,
        );
        let (state, _) = watch::channel(AuthState::default());

        let events = self.gateway.subscribe();
        let controller = Arc::new(SessionController {
            policy: RoutePolicy::new(self.config.routes.clone()),
            config: self.config,
            gateway: self.gateway,
            evaluator,
            session_cache,
            completeness_cache,
            navigator: self.navigator,
            notifier: self.notifier,
            state,
            initialized: AtomicBool::new(false),
            listener: Mutex::new(None),
        });

        let handle = tokio::spawn(listen(Arc::downgrade(&controller), events));
        *controller.listener_slot() = Some(handle);
        controller
    }
}

async fn listen<G: SessionGateway, D: DataStore>(
    controller: Weak<SessionController<G, D>>,
    mut events: broadcast::Receiver<AuthEvent>,
) {
    loop {
        let received = events.recv().await;
        let Some(controller) = controller.upgrade() else {
            break;
        };
        match received {
            Ok(event) => controller.on_remote_change(event).await,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Auth events dropped; revalidating session");
                controller.validate().await;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("Auth event stream closed");
                break;
            }
        }
    }
}

/// Owns the client's auth state and every operation that changes it.
pub struct SessionController<G, D> {
    config: AuthConfig,
    policy: RoutePolicy,
    gateway: Arc<G>,
    evaluator: CompletenessEvaluator<D>,
    session_cache: SessionCache,
    completeness_cache: CompletenessCache,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<AuthState>,
    initialized: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<G, D> SessionController<G, D>
where
    G: SessionGateway,
    D: DataStore,
{
    #[must_use]
    pub fn builder(
        gateway: Arc<G>,
        data_store: Arc<D>,
        navigator: Arc<dyn Navigator>,
    ) -> ControllerBuilder<G, D> {
        ControllerBuilder {
            gateway,
            data_store,
            navigator,
            notifier: Arc::new(TracingNotifier),
            storage: Arc::new(MemoryStorage::new()),
            config: AuthConfig::default(),
        }
    }

    // ── Observation ────────────────────────────────────────────────

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Restore and reconcile the session. Runs once; later calls return the
    /// current authentication flag.
    ///
    /// `loading` stays true until the service has answered (or failed).
    pub async fn initialize(&self) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return self.is_authenticated();
        }

        match self.session_cache.load() {
            Some(record) => {
                tracing::debug!(user_id = %record.user.id, "Restoring persisted session");
                self.state
                    .send_if_modified(|s| s.adopt_cached(record.session));
            }
            None => tracing::debug!("No persisted session; asking the service"),
        }

        let authenticated = self.validate().await;
        self.ensure_completeness().await;
        self.state.send_if_modified(AuthState::finish_loading);
        self.enforce_current_route();

        tracing::info!(authenticated, "Auth initialised");
        authenticated
    }

    /// Stop following the gateway's change events.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener_slot().take() {
            handle.abort();
            tracing::debug!("Auth event listener stopped");
        }
    }

    fn listener_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// Reconcile local state with the service's current session.
    pub async fn validate(&self) -> bool {
        let observed = self.state.borrow().generation();
        let remote = deadline::within(
            self.config.request_timeout,
            "get session",
            self.gateway.get_session(),
        )
        .await;

        match remote {
            Ok(Some(session)) => {
                self.adopt(session, Some(observed)).await;
                self.is_authenticated()
            }
            Ok(None) => {
                if self.clear_local(Some(observed)) {
                    tracing::info!("Local session was stale; cleared");
                    return false;
                }
                self.is_authenticated()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session check failed; treating as signed out");
                if self.clear_local(Some(observed)) {
                    return false;
                }
                self.is_authenticated()
            }
        }
    }

    /// Handle a change notification from the service.
    ///
    /// Safe to call repeatedly with the same event: identical sessions are
    /// recognised before any write.
    pub async fn on_remote_change(&self, event: AuthEvent) {
        tracing::debug!(kind = ?event.kind, has_session = event.session.is_some(), "Auth event");

        match event.session {
            Some(session) => self.adopt(session, None).await,
            None => {
                self.clear_local(None);
            }
        }

        self.state.send_if_modified(AuthState::finish_loading);
        self.enforce_current_route();
    }

    async fn adopt(&self, session: Session, observed: Option<u64>) {
        let mut outcome = Adoption::Unchanged;
        self.state.send_if_modified(|s| {
            outcome = s.adopt(session, observed);
            matches!(outcome, Adoption::Adopted { .. })
        });

        match outcome {
            Adoption::Adopted { evaluate } => {
                self.persist_current();
                if let Some(run) = evaluate {
                    tracing::info!(user_id = %run.user_id, "Session adopted");
                    self.evaluate_for(run).await;
                }
            }
            Adoption::Stale => tracing::debug!("Ignoring superseded session"),
            Adoption::Unchanged => {}
        }
    }

    /// Write whatever the state holds right now to the persisted record.
    fn persist_current(&self) {
        let (session, user) = {
            let state = self.state.borrow();
            (state.session().cloned(), state.user().cloned())
        };
        self.session_cache.save(session.as_ref(), user.as_ref());
    }

    /// Clear the in-memory session.
    ///
    /// A guarded clear (`observed` set) touches the caches only if it cleared
    /// something. An unguarded clear always empties both caches, even when the
    /// in-memory state was already signed out.
    fn clear_local(&self, observed: Option<u64>) -> bool {
        let cleared = self.state.send_if_modified(|s| s.clear(observed));
        if cleared || observed.is_none() {
            self.session_cache.clear();
            self.completeness_cache.clear(None);
        }
        cleared
    }

    async fn ensure_completeness(&self) {
        let pending = self.state.borrow().needs_completeness();
        if let Some(user_id) = pending {
            if let Some(run) = self.begin_completeness(&user_id, false) {
                self.evaluate_for(run).await;
            }
        }
    }

    /// Start a completeness run for the signed-in user, optionally dropping
    /// the cached entry under the same lock.
    fn begin_completeness(&self, user_id: &UserId, drop_cached: bool) -> Option<Evaluation> {
        let mut run = None;
        self.state.send_if_modified(|s| {
            if drop_cached {
                self.completeness_cache.clear(Some(user_id));
            }
            run = s.begin_completeness(user_id);
            run.is_some()
        });
        run
    }

    /// Evaluate and apply `run`. A freshly computed status is cached only
    /// when it was applied, so a superseded run never leaves its answer
    /// behind.
    async fn evaluate_for(&self, run: Evaluation) {
        let cached = self.evaluator.cached(&run.user_id);
        let fresh = cached.is_none();
        let status = match cached {
            Some(status) => status,
            None => self.evaluator.compute(&run.user_id).await,
        };

        let mut applied = None;
        self.state.send_if_modified(|s| {
            applied = s.apply_completeness(&run, status);
            if applied.is_some() && fresh {
                self.completeness_cache.set(&run.user_id, status);
            }
            applied == Some(true)
        });

        match applied {
            Some(true) => self.enforce_current_route(),
            Some(false) => {}
            None => tracing::debug!(
                user_id = %run.user_id,
                epoch = run.epoch,
                "Superseded completeness result dropped"
            ),
        }
    }

    // ── Routing ────────────────────────────────────────────────────

    /// Apply the route policy to `path`, issuing at most one navigation.
    pub fn enforce_route(&self, path: &str) -> Option<Navigation> {
        let inputs = self.state.borrow().route_inputs();
        let decision = self.policy.decide(&inputs, path);

        if decision.setup_complete {
            self.state
                .send_if_modified(AuthState::mark_initial_redirect_done);
        }
        if let Some(navigation) = &decision.navigation {
            tracing::debug!(from = path, to = %navigation.to, "Route guard redirect");
            self.navigator.navigate(navigation);
        }
        decision.navigation
    }

    fn enforce_current_route(&self) {
        let path = self.navigator.current_path();
        self.enforce_route(&path);
    }

    // ── Account operations ─────────────────────────────────────────

    /// Create an account. Errors come back in [`AuthResult::error`].
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult {
        let redirect = self.config.absolute(self.config.routes.auth_callback());
        let result = deadline::within(
            self.config.request_timeout,
            "sign up",
            self.gateway.sign_up(email, password, redirect.as_ref()),
        )
        .await;

        match result {
            Ok(response) => {
                tracing::info!(confirmed = response.session.is_some(), "Sign-up accepted");
                response.into()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sign-up failed");
                AuthResult::failed(e.user_message())
            }
        }
    }

    /// Sign in with e-mail and password. Errors come back in
    /// [`AuthResult::error`]; the session itself arrives through the
    /// change-event channel.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult {
        let result = deadline::within(
            self.config.request_timeout,
            "sign in",
            self.gateway.sign_in_with_password(email, password),
        )
        .await;

        match result {
            Ok(response) => {
                tracing::info!("Sign-in accepted");
                response.into()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sign-in failed");
                AuthResult::failed(e.user_message())
            }
        }
    }

    /// Sign out everywhere. Local state is cleared whatever the service says.
    ///
    /// The caches are emptied both before and after the remote call, so a
    /// session adopted while the call was in flight is not left persisted.
    pub async fn sign_out(&self) {
        self.session_cache.clear();
        self.completeness_cache.clear(None);

        let result = deadline::within(
            self.config.request_timeout,
            "sign out",
            self.gateway.sign_out(SignOutScope::Global),
        )
        .await;

        self.clear_local(None);

        match result {
            Ok(()) => {
                tracing::info!("Signed out");
                self.navigator
                    .navigate(&Navigation::push(self.config.routes.root()));
                self.notifier
                    .notify(Notice::success("Signed out", "You have been signed out."));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Remote sign-out failed; signed out locally");
                self.notifier.notify(Notice::error(
                    "Sign out problem",
                    "You are signed out on this device, but the server could not be reached.",
                ));
                self.enforce_current_route();
            }
        }
    }

    pub async fn reset_password(&self, email: &str) {
        let redirect = self.config.absolute(self.config.routes.password_update());
        let result = deadline::within(
            self.config.request_timeout,
            "reset password",
            self.gateway.reset_password_for_email(email, redirect.as_ref()),
        )
        .await;

        match result {
            Ok(()) => self.notifier.notify(Notice::success(
                "Check your email",
                "We sent you a link to reset your password.",
            )),
            Err(e) => {
                tracing::warn!(error = %e, "Password reset request failed");
                self.notifier
                    .notify(Notice::error("Password reset failed", e.user_message()));
            }
        }
    }

    pub async fn update_password(&self, new_password: &str) {
        let attributes = UserAttributes::password(new_password);
        let result = deadline::within(
            self.config.request_timeout,
            "update password",
            self.gateway.update_user(&attributes),
        )
        .await;

        match result {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "Password updated");
                self.notifier.notify(Notice::success(
                    "Password updated",
                    "Your password has been changed.",
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Password update failed");
                self.notifier
                    .notify(Notice::error("Password update failed", e.user_message()));
            }
        }
    }

    /// Ask the service for a fresh token. Returns whether one was obtained.
    pub async fn refresh_session(&self) -> bool {
        let observed = self.state.borrow().generation();
        let result = deadline::within(
            self.config.request_timeout,
            "refresh session",
            self.gateway.refresh_session(),
        )
        .await;

        match result {
            Ok(Some(session)) => {
                self.adopt(session, Some(observed)).await;
                tracing::debug!("Session refreshed");
                true
            }
            Ok(None) => {
                self.notifier.notify(Notice::error(
                    "Session expired",
                    "Please sign in again.",
                ));
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session refresh failed");
                self.notifier
                    .notify(Notice::error("Session refresh failed", e.user_message()));
                false
            }
        }
    }

    /// Start a social sign-in by sending the client to the provider.
    ///
    /// `redirect_target` is the in-app path to return to (default: landing).
    pub async fn handle_social_auth(&self, provider: OAuthProvider, redirect_target: Option<&str>) {
        let target = redirect_target.unwrap_or(self.config.routes.landing());
        let redirect = self.config.absolute(target);
        let result = deadline::within(
            self.config.request_timeout,
            "social sign-in",
            self.gateway.sign_in_with_oauth(&provider, redirect.as_ref()),
        )
        .await;

        match result {
            Ok(request) => {
                tracing::info!(provider = %request.provider, "Redirecting to identity provider");
                self.navigator.open_external(&request.url);
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "Social sign-in failed");
                self.notifier
                    .notify(Notice::error("Sign in failed", e.user_message()));
            }
        }
    }

    /// Forget cached completeness for `user_id` and, if it is the signed-in
    /// user, recompute it now. Call after the user edits their profile.
    pub async fn invalidate_profile_cache(&self, user_id: &UserId) -> Option<CompletenessStatus> {
        let Some(run) = self.begin_completeness(user_id, true) else {
            tracing::debug!(user_id = %user_id, "Not the signed-in user; cache entry dropped");
            return None;
        };
        self.evaluate_for(run).await;

        let state = self.state.borrow();
        Some(CompletenessStatus::new(
            state.has_core_profile(),
            state.has_required_music_preferences(),
        ))
    }
}

impl<G, D> Drop for SessionController<G, D> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
