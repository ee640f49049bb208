use std::collections::VecDeque;

use crate::routing::RouteInputs;
use crate::storage::CompletenessStatus;
use crate::types::{AccessToken, Session, User, UserId};

/// Tokens remembered after being superseded, to reject late re-deliveries.
const RETIRED_TOKENS: usize = 32;

/// In-memory auth state owned by the
/// [`SessionController`](super::SessionController).
///
/// Fields only change through the transition methods below, each of which
/// reports whether anything changed so the controller can skip no-op writes.
/// `is_authenticated` is derived from the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    user: Option<User>,
    session: Option<Session>,
    loading: bool,
    completion_check_loading: bool,
    has_core_profile: bool,
    has_required_music_preferences: bool,
    initial_redirect_to_match_done: bool,
    /// User whose completeness flags are known or being computed.
    completeness_user: Option<UserId>,
    /// Bumped on every change of the held session.
    generation: u64,
    /// Bumped every time a completeness run starts.
    completeness_epoch: u64,
    retired: VecDeque<AccessToken>,
}

/// One completeness run. Its result is only applied while it is the latest
/// run for the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Evaluation {
    pub(crate) user_id: UserId,
    pub(crate) epoch: u64,
}

/// Result of offering a session to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Adoption {
    /// Same token for the same user is already held.
    Unchanged,
    /// The offered session was superseded before it arrived.
    Stale,
    /// Adopted; `evaluate` is the completeness run to perform, if any.
    Adopted { evaluate: Option<Evaluation> },
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            session: None,
            loading: true,
            completion_check_loading: false,
            has_core_profile: false,
            has_required_music_preferences: false,
            initial_redirect_to_match_done: false,
            completeness_user: None,
            generation: 0,
            completeness_epoch: 0,
            retired: VecDeque::new(),
        }
    }
}

impl AuthState {
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn is_completion_check_loading(&self) -> bool {
        self.completion_check_loading
    }

    #[must_use]
    pub fn has_core_profile(&self) -> bool {
        self.has_core_profile
    }

    #[must_use]
    pub fn has_required_music_preferences(&self) -> bool {
        self.has_required_music_preferences
    }

    #[must_use]
    pub fn initial_redirect_to_match_done(&self) -> bool {
        self.initial_redirect_to_match_done
    }

    #[must_use]
    pub fn route_inputs(&self) -> RouteInputs {
        RouteInputs {
            loading: self.loading,
            completion_check_loading: self.completion_check_loading,
            is_authenticated: self.is_authenticated(),
            has_core_profile: self.has_core_profile,
            has_required_music_preferences: self.has_required_music_preferences,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn needs_completeness(&self) -> Option<UserId> {
        let id = self.user_id()?;
        (self.completeness_user.as_ref() != Some(id)).then(|| id.clone())
    }

    fn set_session(&mut self, session: Session) {
        if let Some(previous) = self.session.take() {
            if previous.access_token != session.access_token {
                self.retire(previous.access_token);
            }
        }
        self.user = Some(session.user.clone());
        self.session = Some(session);
        self.generation += 1;
    }

    fn retire(&mut self, token: AccessToken) {
        if self.retired.len() == RETIRED_TOKENS {
            self.retired.pop_front();
        }
        self.retired.push_back(token);
    }

    /// Take a persisted session at face value, before the service confirms it.
    /// Completeness stays unknown.
    pub(crate) fn adopt_cached(&mut self, session: Session) -> bool {
        if self.session.is_some() {
            return false;
        }
        self.set_session(session);
        true
    }

    /// Offer a session from the service.
    ///
    /// With `observed`, the offer is only valid if the state has not moved
    /// since that generation was read.
    pub(crate) fn adopt(&mut self, session: Session, observed: Option<u64>) -> Adoption {
        if self.session.as_ref().is_some_and(|held| held.same_as(&session)) {
            return Adoption::Unchanged;
        }
        match observed {
            // Pulled answer: valid as long as nothing moved while it was in flight.
            Some(generation) if generation != self.generation => return Adoption::Stale,
            Some(_) => {}
            // Pushed answer: may arrive late and out of order.
            None => {
                if self.retired.contains(&session.access_token) {
                    return Adoption::Stale;
                }
                if let Some(held) = &self.session {
                    if held.user.id == session.user.id && session.expires_at < held.expires_at {
                        return Adoption::Stale;
                    }
                }
            }
        }

        let user_id = session.user.id.clone();
        self.set_session(session);

        if self.completeness_user.as_ref() == Some(&user_id) {
            return Adoption::Adopted { evaluate: None };
        }
        Adoption::Adopted {
            evaluate: Some(self.begin_completeness_unchecked(user_id)),
        }
    }

    /// Forget the session and everything derived from it. `loading` is left
    /// alone; callers decide when loading ends.
    pub(crate) fn clear(&mut self, observed: Option<u64>) -> bool {
        if observed.is_some_and(|g| g != self.generation) {
            return false;
        }
        let changed = self.session.is_some()
            || self.user.is_some()
            || self.completion_check_loading
            || self.has_core_profile
            || self.has_required_music_preferences
            || self.initial_redirect_to_match_done
            || self.completeness_user.is_some();
        if !changed {
            return false;
        }

        if let Some(previous) = self.session.take() {
            self.retire(previous.access_token);
            self.generation += 1;
        }
        self.user = None;
        self.completion_check_loading = false;
        self.has_core_profile = false;
        self.has_required_music_preferences = false;
        self.initial_redirect_to_match_done = false;
        self.completeness_user = None;
        true
    }

    /// Start recomputing completeness for the current user. Any run already
    /// in flight is superseded.
    pub(crate) fn begin_completeness(&mut self, user_id: &UserId) -> Option<Evaluation> {
        if self.user_id() != Some(user_id) {
            return None;
        }
        Some(self.begin_completeness_unchecked(user_id.clone()))
    }

    fn begin_completeness_unchecked(&mut self, user_id: UserId) -> Evaluation {
        if self.completeness_user.as_ref() != Some(&user_id) {
            self.has_core_profile = false;
            self.has_required_music_preferences = false;
        }
        self.completeness_epoch += 1;
        self.completeness_user = Some(user_id.clone());
        self.completion_check_loading = true;
        Evaluation {
            user_id,
            epoch: self.completeness_epoch,
        }
    }

    /// Apply the result of `run`.
    ///
    /// `None` if the run was superseded (newer run, other user, signed out);
    /// otherwise whether anything changed.
    pub(crate) fn apply_completeness(
        &mut self,
        run: &Evaluation,
        status: CompletenessStatus,
    ) -> Option<bool> {
        if run.epoch != self.completeness_epoch
            || self.completeness_user.as_ref() != Some(&run.user_id)
            || self.user_id() != Some(&run.user_id)
        {
            return None;
        }
        let changed = self.completion_check_loading
            || self.has_core_profile != status.has_core_profile
            || self.has_required_music_preferences != status.has_required_music_preferences;
        self.has_core_profile = status.has_core_profile;
        self.has_required_music_preferences = status.has_required_music_preferences;
        self.completion_check_loading = false;
        Some(changed)
    }

    pub(crate) fn finish_loading(&mut self) -> bool {
        std::mem::replace(&mut self.loading, false)
    }

    pub(crate) fn mark_initial_redirect_done(&mut self) -> bool {
        !std::mem::replace(&mut self.initial_redirect_to_match_done, true)
    }
}
