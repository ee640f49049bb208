//! Scriptable stand-ins for the external collaborators, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use url::Url;

use crate::error::Error;
use crate::routing::Navigation;
use crate::traits::{Collection, DataStore, Navigator, Notice, Notifier, Row, SessionGateway};
use crate::types::{
    AccessToken, AuthEvent, AuthEventKind, AuthResponse, AuthorizationRequest, OAuthProvider,
    Session, SignOutScope, User, UserAttributes, UserId,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

pub(crate) fn session(token: &str, user: &str) -> Session {
    session_expiring(token, user, 1_900_000_000)
}

pub(crate) fn session_expiring(token: &str, user: &str, expires_at: i64) -> Session {
    Session::new(
        AccessToken::new(token),
        OffsetDateTime::from_unix_timestamp(expires_at).unwrap(),
        User::new(user).with_email(format!("{user}@example.com")),
    )
    .with_refresh_token(format!("refresh-{token}"))
}

fn service_error(operation: &'static str) -> Error {
    Error::Service {
        operation,
        status: Some(503),
        detail: format!("{operation} unavailable"),
    }
}

// ── Data store ─────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeDataStore {
    rows: Mutex<HashMap<(Collection, UserId), Row>>,
    failing: Mutex<HashSet<Collection>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl FakeDataStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, collection: Collection, user: &UserId, row: serde_json::Value) {
        let serde_json::Value::Object(row) = row else {
            panic!("row must be an object");
        };
        lock(&self.rows).insert((collection, user.clone()), row);
    }

    pub(crate) fn put_complete_profile(&self, user: &UserId) {
        self.put(
            Collection::Profiles,
            user,
            json!({"id": user.as_str(), "full_name": "Ana", "birth_date": "2000-01-01", "bio": "hi"}),
        );
    }

    pub(crate) fn put_complete_preferences(&self, user: &UserId) {
        self.put(
            Collection::MusicPreferences,
            user,
            json!({
                "user_id": user.as_str(),
                "genres": ["rock"],
                "artists": ["x"],
                "listening_moods": ["calm"],
            }),
        );
    }

    pub(crate) fn fail(&self, collection: Collection) {
        lock(&self.failing).insert(collection);
    }

    pub(crate) fn heal(&self, collection: Collection) {
        lock(&self.failing).remove(&collection);
    }

    /// Rows are read when the fetch starts and returned after `delay`.
    pub(crate) fn delay_fetches(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DataStore for FakeDataStore {
    async fn fetch_row(
        &self,
        collection: Collection,
        user_id: &UserId,
    ) -> Result<Option<Row>, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing).contains(&collection) {
            return Err(service_error("fetch row"));
        }
        let snapshot = lock(&self.rows).get(&(collection, user_id.clone())).cloned();
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }
}

// ── Gateway ────────────────────────────────────────────────────────

pub(crate) struct FakeGateway {
    current: Mutex<Option<Session>>,
    get_session_fails: AtomicBool,
    get_session_delay: Mutex<Option<Duration>>,
    sign_out_fails: AtomicBool,
    sign_out_delay: Mutex<Option<Duration>>,
    emit_events: AtomicBool,
    credentials: Mutex<HashMap<String, (String, Session)>>,
    calls: Mutex<Vec<&'static str>>,
    events: broadcast::Sender<AuthEvent>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            current: Mutex::new(None),
            get_session_fails: AtomicBool::new(false),
            get_session_delay: Mutex::new(None),
            sign_out_fails: AtomicBool::new(false),
            sign_out_delay: Mutex::new(None),
            emit_events: AtomicBool::new(true),
            credentials: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            events,
        }
    }

    pub(crate) fn with_session(self, session: Session) -> Self {
        *lock(&self.current) = Some(session);
        self
    }

    pub(crate) fn set_session(&self, session: Option<Session>) {
        *lock(&self.current) = session;
    }

    pub(crate) fn fail_get_session(&self, fail: bool) {
        self.get_session_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn delay_get_session(&self, delay: Duration) {
        *lock(&self.get_session_delay) = Some(delay);
    }

    pub(crate) fn fail_sign_out(&self, fail: bool) {
        self.sign_out_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn delay_sign_out(&self, delay: Duration) {
        *lock(&self.sign_out_delay) = Some(delay);
    }

    pub(crate) fn mute_events(&self) {
        self.emit_events.store(false, Ordering::SeqCst);
    }

    pub(crate) fn register(&self, email: &str, password: &str, session: Session) {
        lock(&self.credentials).insert(email.to_owned(), (password.to_owned(), session));
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| **c == name).count()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn record(&self, name: &'static str) {
        lock(&self.calls).push(name);
    }

    fn announce(&self, kind: AuthEventKind, session: Option<Session>) {
        if self.emit_events.load(Ordering::SeqCst) {
            self.emit(AuthEvent::new(kind, session));
        }
    }
}

impl SessionGateway for FakeGateway {
    async fn get_session(&self) -> Result<Option<Session>, Error> {
        self.record("get_session");
        let snapshot = lock(&self.current).clone();
        let delay = *lock(&self.get_session_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.get_session_fails.load(Ordering::SeqCst) {
            return Err(service_error("get session"));
        }
        Ok(snapshot)
    }

    async fn refresh_session(&self) -> Result<Option<Session>, Error> {
        self.record("refresh_session");
        let refreshed = {
            let mut current = lock(&self.current);
            let Some(old) = current.clone() else {
                return Err(Error::MissingSession);
            };
            let token = format!("{}-refreshed", old.access_token.as_str());
            let next = Session::new(
                AccessToken::new(token),
                old.expires_at + time::Duration::hours(1),
                old.user,
            );
            *current = Some(next.clone());
            next
        };
        self.announce(AuthEventKind::TokenRefreshed, Some(refreshed.clone()));
        Ok(Some(refreshed))
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _email_redirect_to: Option<&Url>,
    ) -> Result<AuthResponse, Error> {
        self.record("sign_up");
        if lock(&self.credentials).contains_key(email) {
            return Err(Error::Service {
                operation: "sign up",
                status: Some(422),
                detail: "User already registered".into(),
            });
        }
        Ok(AuthResponse {
            user: Some(User::new(format!("new-{email}")).with_email(email)),
            session: None,
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, Error> {
        self.record("sign_in_with_password");
        let found = lock(&self.credentials).get(email).cloned();
        match found {
            Some((expected, session)) if expected == password => {
                *lock(&self.current) = Some(session.clone());
                self.announce(AuthEventKind::SignedIn, Some(session.clone()));
                Ok(AuthResponse {
                    user: Some(session.user.clone()),
                    session: Some(session),
                })
            }
            _ => Err(Error::Service {
                operation: "sign in",
                status: Some(400),
                detail: "Invalid login credentials".into(),
            }),
        }
    }

    async fn sign_out(&self, _scope: SignOutScope) -> Result<(), Error> {
        self.record("sign_out");
        let delay = *lock(&self.sign_out_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.sign_out_fails.load(Ordering::SeqCst) {
            return Err(service_error("sign out"));
        }
        *lock(&self.current) = None;
        self.announce(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        _redirect_to: Option<&Url>,
    ) -> Result<(), Error> {
        self.record("reset_password_for_email");
        if email.contains('@') {
            Ok(())
        } else {
            Err(Error::Service {
                operation: "reset password",
                status: Some(400),
                detail: "Invalid email".into(),
            })
        }
    }

    async fn update_user(&self, attributes: &UserAttributes) -> Result<User, Error> {
        self.record("update_user");
        if attributes.password.as_deref().is_some_and(|p| p.len() < 6) {
            return Err(Error::Service {
                operation: "update user",
                status: Some(422),
                detail: "Password should be at least 6 characters".into(),
            });
        }
        lock(&self.current)
            .as_ref()
            .map(|s| s.user.clone())
            .ok_or(Error::MissingSession)
    }

    async fn sign_in_with_oauth(
        &self,
        provider: &OAuthProvider,
        redirect_to: Option<&Url>,
    ) -> Result<AuthorizationRequest, Error> {
        self.record("sign_in_with_oauth");
        let mut url: Url = "https://id.example.com/authorize".parse().unwrap();
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str());
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        Ok(AuthorizationRequest::new(provider.clone(), url))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

// ── Host surfaces ──────────────────────────────────────────────────

/// Navigator that behaves like browser history: navigating moves the path.
pub(crate) struct RecordingNavigator {
    path: Mutex<String>,
    history: Mutex<Vec<Navigation>>,
    external: Mutex<Vec<Url>>,
}

impl RecordingNavigator {
    pub(crate) fn at(path: &str) -> Self {
        Self {
            path: Mutex::new(path.to_owned()),
            history: Mutex::new(Vec::new()),
            external: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_path(&self, path: &str) {
        *lock(&self.path) = path.to_owned();
    }

    pub(crate) fn history(&self) -> Vec<Navigation> {
        lock(&self.history).clone()
    }

    pub(crate) fn external(&self) -> Vec<Url> {
        lock(&self.external).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_path(&self) -> String {
        lock(&self.path).clone()
    }

    fn navigate(&self, navigation: &Navigation) {
        *lock(&self.path) = navigation.to.clone();
        lock(&self.history).push(navigation.clone());
    }

    fn open_external(&self, url: &Url) {
        lock(&self.external).push(url.clone());
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub(crate) fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        lock(&self.notices).push(notice);
    }
}
