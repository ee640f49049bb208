use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use url::Url;

use super::{GatewayConfig, ensure_success};
use crate::error::Error;
use crate::pkce::PkcePair;
use crate::storage::SessionCache;
use crate::traits::SessionGateway;
use crate::types::{
    AccessToken, AuthEvent, AuthEventKind, AuthResponse, AuthorizationRequest, OAuthProvider,
    Session, SignOutScope, User, UserAttributes,
};

/// Lifetime assumed when the service omits both `expires_at` and `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix seconds; preferred over `expires_in` when present.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl TokenResponse {
    fn into_session(self, now: OffsetDateTime) -> Result<Session, Error> {
        let expires_at = match self.expires_at {
            Some(at) => OffsetDateTime::from_unix_timestamp(at)
                .map_err(|e| Error::Config(format!("expires_at out of range: {e}")))?,
            None => now + time::Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)),
        };
        let session = Session::new(AccessToken::new(self.access_token), expires_at, self.user);
        Ok(match self.refresh_token {
            Some(token) => session.with_refresh_token(token),
            None => session,
        })
    }
}

/// Sign-up answers with a session when confirmation is off, or with the bare
/// user while the confirmation e-mail is pending.
fn parse_sign_up(body: Value, now: OffsetDateTime) -> Result<AuthResponse, Error> {
    if body.get("access_token").is_some() {
        let session = serde_json::from_value::<TokenResponse>(body)?.into_session(now)?;
        return Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }
    let user = match body.get("user") {
        Some(user) => serde_json::from_value::<User>(user.clone())?,
        None => serde_json::from_value::<User>(body)?,
    };
    Ok(AuthResponse {
        user: Some(user),
        session: None,
    })
}

/// [`SessionGateway`] over the identity service's REST endpoints.
///
/// Holds the current session in memory and announces every change on the
/// event channel, the way a hosted-auth client SDK does.
pub struct HttpGateway {
    config: GatewayConfig,
    http: reqwest::Client,
    session: Mutex<Option<Session>>,
    pending_pkce: Mutex<Option<PkcePair>>,
    events: broadcast::Sender<AuthEvent>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HttpGateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            http: reqwest::Client::new(),
            session: Mutex::new(None),
            pending_pkce: Mutex::new(None),
            events,
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Start from a session obtained elsewhere (e.g. restored from disk).
    /// It is verified on the next [`get_session`](SessionGateway::get_session).
    #[must_use]
    pub fn with_session(self, session: Session) -> Self {
        *lock(&self.session) = Some(session);
        self
    }

    /// Start from the session a previous run persisted, if there is one.
    ///
    /// A restarted client otherwise holds no session here, and the
    /// controller's first check would sign the restored user out.
    #[must_use]
    pub fn with_persisted_session(self, cache: &SessionCache) -> Self {
        match cache.load() {
            Some(record) => {
                tracing::debug!(user_id = %record.user.id, "Gateway seeded from persisted session");
                self.with_session(record.session)
            }
            None => self,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Token to authorise table reads with, if signed in.
    #[must_use]
    pub fn current_access_token(&self) -> Option<AccessToken> {
        lock(&self.session).as_ref().map(|s| s.access_token.clone())
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Complete a social sign-in with the `code` the provider redirected back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Service`] if no social sign-in was started or the
    /// service rejects the code.
    pub async fn exchange_code_for_session(&self, code: &str) -> Result<Session, Error> {
        let Some(pkce) = lock(&self.pending_pkce).take() else {
            return Err(Error::Service {
                operation: "code exchange",
                status: None,
                detail: "No social sign-in in progress".into(),
            });
        };
        let session = self
            .token_grant(
                "pkce",
                &json!({"auth_code": code, "code_verifier": pkce.verifier()}),
                "code exchange",
            )
            .await?;
        self.store(Some(session.clone()), AuthEventKind::SignedIn);
        Ok(session)
    }

    fn auth_url(&self, endpoint: &str) -> Result<Url, Error> {
        self.config.auth_url(endpoint)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", self.config.api_key())
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &Value,
        operation: &'static str,
    ) -> Result<Session, Error> {
        let mut url = self.auth_url("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .request(reqwest::Method::POST, url)
            .json(body)
            .send()
            .await?;
        let response = ensure_success(response, operation).await?;
        response
            .json::<TokenResponse>()
            .await?
            .into_session(OffsetDateTime::now_utc())
    }

    /// Replace the held session and announce it.
    fn store(&self, session: Option<Session>, kind: AuthEventKind) {
        *lock(&self.session) = session.clone();
        self.announce(AuthEvent::new(kind, session));
    }

    /// Replace the held session only if it still carries `expected`; a
    /// concurrent sign-in or sign-out wins over a slower call.
    fn store_if_current(
        &self,
        expected: &AccessToken,
        session: Option<Session>,
        kind: AuthEventKind,
    ) -> bool {
        {
            let mut held = lock(&self.session);
            if held.as_ref().map(|s| &s.access_token) != Some(expected) {
                return false;
            }
            *held = session.clone();
        }
        self.announce(AuthEvent::new(kind, session));
        true
    }

    fn announce(&self, event: AuthEvent) {
        tracing::debug!(kind = ?event.kind, "Identity service state changed");
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn authorize_url(
        &self,
        provider: &OAuthProvider,
        redirect_to: Option<&Url>,
        pkce: &PkcePair,
    ) -> Result<Url, Error> {
        let mut url = self.auth_url("authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider.as_str());
            if let Some(redirect) = redirect_to {
                query.append_pair("redirect_to", redirect.as_str());
            }
            query
                .append_pair("code_challenge", pkce.challenge())
                .append_pair("code_challenge_method", pkce.method());
        }
        Ok(url)
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<Session, Error> {
        self.token_grant(
            "refresh_token",
            &json!({"refresh_token": refresh_token}),
            "token refresh",
        )
        .await
    }

    /// `GET user` with the held token. `None` means the service no longer
    /// accepts it.
    async fn fetch_user(&self, token: &AccessToken) -> Result<Option<User>, Error> {
        let response = self
            .request(reqwest::Method::GET, self.auth_url("user")?)
            .bearer_auth(token.as_str())
            .send()
            .await?;
        if matches!(
            response.status(),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }
        let response = ensure_success(response, "session check").await?;
        Ok(Some(response.json::<User>().await?))
    }
}

impl SessionGateway for HttpGateway {
    async fn get_session(&self) -> Result<Option<Session>, Error> {
        let Some(mut session) = lock(&self.session).clone() else {
            return Ok(None);
        };

        let margin = time::Duration::try_from(self.config.refresh_margin)
            .unwrap_or(time::Duration::MAX);
        if session.expires_within(margin) {
            let Some(refresh_token) = session.refresh_token.clone() else {
                tracing::info!(user_id = %session.user.id, "Session expired without refresh token");
                self.store_if_current(&session.access_token, None, AuthEventKind::SignedOut);
                return Ok(None);
            };
            match self.refresh_with(&refresh_token).await {
                Ok(fresh) => {
                    self.store_if_current(
                        &session.access_token,
                        Some(fresh.clone()),
                        AuthEventKind::TokenRefreshed,
                    );
                    session = fresh;
                }
                Err(Error::Service {
                    status: Some(400..=499),
                    detail,
                    ..
                }) => {
                    tracing::info!(detail = %detail, "Refresh token rejected; session ended");
                    self.store_if_current(&session.access_token, None, AuthEventKind::SignedOut);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        match self.fetch_user(&session.access_token).await? {
            Some(user) => {
                if user != session.user {
                    session.user = user;
                    let mut held = lock(&self.session);
                    if held.as_ref().is_some_and(|h| h.access_token == session.access_token) {
                        *held = Some(session.clone());
                    }
                }
                Ok(Some(session))
            }
            None => {
                tracing::info!(user_id = %session.user.id, "Session revoked by the service");
                self.store_if_current(&session.access_token, None, AuthEventKind::SignedOut);
                Ok(None)
            }
        }
    }

    async fn refresh_session(&self) -> Result<Option<Session>, Error> {
        let (token, refresh_token) = {
            let held = lock(&self.session);
            let session = held.as_ref().ok_or(Error::MissingSession)?;
            let refresh = session.refresh_token.clone().ok_or(Error::MissingSession)?;
            (session.access_token.clone(), refresh)
        };
        let fresh = self.refresh_with(&refresh_token).await?;
        self.store_if_current(&token, Some(fresh.clone()), AuthEventKind::TokenRefreshed);
        Ok(Some(fresh))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        email_redirect_to: Option<&Url>,
    ) -> Result<AuthResponse, Error> {
        let mut url = self.auth_url("signup")?;
        if let Some(redirect) = email_redirect_to {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({"email": email, "password": password}))
            .send()
            .await?;
        let response = ensure_success(response, "sign up").await?;
        let parsed = parse_sign_up(response.json::<Value>().await?, OffsetDateTime::now_utc())?;

        if let Some(session) = &parsed.session {
            self.store(Some(session.clone()), AuthEventKind::SignedIn);
        }
        Ok(parsed)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, Error> {
        let session = self
            .token_grant(
                "password",
                &json!({"email": email, "password": password}),
                "sign in",
            )
            .await?;
        self.store(Some(session.clone()), AuthEventKind::SignedIn);
        Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        })
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), Error> {
        let token = self.current_access_token();

        if let Some(token) = &token {
            let mut url = self.auth_url("logout")?;
            url.query_pairs_mut()
                .append_pair("scope", &scope.to_string());
            let response = self
                .request(reqwest::Method::POST, url)
                .bearer_auth(token.as_str())
                .send()
                .await?;
            match ensure_success(response, "sign out").await {
                Ok(_) => {}
                // Already gone at the service.
                Err(Error::Service {
                    status: Some(401 | 403 | 404),
                    ..
                }) => {}
                Err(e) => return Err(e),
            }
        }

        if scope != SignOutScope::Others {
            self.store(None, AuthEventKind::SignedOut);
        }
        Ok(())
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&Url>,
    ) -> Result<(), Error> {
        let mut url = self.auth_url("recover")?;
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({"email": email}))
            .send()
            .await?;
        ensure_success(response, "password reset").await?;
        Ok(())
    }

    async fn update_user(&self, attributes: &UserAttributes) -> Result<User, Error> {
        let token = self.current_access_token().ok_or(Error::MissingSession)?;
        let response = self
            .request(reqwest::Method::PUT, self.auth_url("user")?)
            .bearer_auth(token.as_str())
            .json(attributes)
            .send()
            .await?;
        let response = ensure_success(response, "update user").await?;
        let user = response.json::<User>().await?;

        let updated = {
            let mut held = lock(&self.session);
            match held.as_mut() {
                Some(session) if session.access_token == token => {
                    session.user = user.clone();
                    Some(session.clone())
                }
                _ => None,
            }
        };
        if let Some(session) = updated {
            self.announce(AuthEvent::new(AuthEventKind::UserUpdated, Some(session)));
        }
        Ok(user)
    }

    async fn sign_in_with_oauth(
        &self,
        provider: &OAuthProvider,
        redirect_to: Option<&Url>,
    ) -> Result<AuthorizationRequest, Error> {
        let pkce = PkcePair::generate();
        let url = self.authorize_url(provider, redirect_to, &pkce)?;
        *lock(&self.pending_pkce) = Some(pkce);
        tracing::debug!(provider = %provider, "Social sign-in prepared");
        Ok(AuthorizationRequest::new(provider.clone(), url))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{KeyValueStorage, MemoryStorage};
    use crate::types::UserId;

    fn gateway() -> HttpGateway {
        HttpGateway::new(GatewayConfig::new(
            "https://project.example.co".parse().unwrap(),
            "anon",
        ))
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn session(token: &str) -> Session {
        Session::new(
            AccessToken::new(token),
            OffsetDateTime::from_unix_timestamp(4_000_000_000).unwrap(),
            User::new("u1"),
        )
        .with_refresh_token("r1")
    }

    #[test]
    fn token_response_uses_expires_in() {
        let response: TokenResponse = serde_json::from_value(json!({
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "r1",
            "user": {"id": "u1", "email": "ana@example.com", "aud": "authenticated"}
        }))
        .unwrap();
        let session = response.into_session(now()).unwrap();

        assert_eq!(session.access_token, AccessToken::new("jwt"));
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert_eq!(session.expires_at.unix_timestamp(), 1_700_003_600);
        assert_eq!(session.user.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn token_response_prefers_expires_at() {
        let response: TokenResponse = serde_json::from_value(json!({
            "access_token": "jwt",
            "expires_in": 3600,
            "expires_at": 1_800_000_000,
            "user": {"id": "u1", "user_metadata": {"display_name": "Ana"}}
        }))
        .unwrap();
        let session = response.into_session(now()).unwrap();

        assert_eq!(session.expires_at.unix_timestamp(), 1_800_000_000);
        assert_eq!(session.user.metadata["display_name"], "Ana");
        assert!(session.refresh_token.is_none());
    }

    #[test]
    fn sign_up_pending_confirmation_has_no_session() {
        let parsed = parse_sign_up(
            json!({"id": "u1", "email": "ana@example.com", "confirmation_sent_at": "2024-01-01T00:00:00Z"}),
            now(),
        )
        .unwrap();
        assert_eq!(parsed.user.unwrap().id, UserId::from("u1"));
        assert!(parsed.session.is_none());
    }

    #[test]
    fn sign_up_with_auto_confirm_returns_session() {
        let parsed = parse_sign_up(
            json!({"access_token": "jwt", "expires_in": 60, "user": {"id": "u1"}}),
            now(),
        )
        .unwrap();
        assert_eq!(parsed.session.unwrap().access_token, AccessToken::new("jwt"));
    }

    #[test]
    fn authorize_url_carries_pkce_challenge() {
        let gateway = gateway();
        let pkce = PkcePair::from_verifier("dBjftJeZ4CVP-mJ0rznD5v0Eu96fBRUKEsHpvM4Nfzc");
        let redirect: Url = "https://harmony.example.com/match".parse().unwrap();
        let url = gateway
            .authorize_url(&OAuthProvider::from("spotify"), Some(&redirect), &pkce)
            .unwrap();

        assert!(url.as_str().starts_with("https://project.example.co/auth/v1/authorize?"));
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            query,
            vec![
                ("provider".into(), "spotify".into()),
                ("redirect_to".into(), "https://harmony.example.com/match".into()),
                ("code_challenge".into(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into()),
                ("code_challenge_method".into(), "s256".into()),
            ]
        );
    }

    #[tokio::test]
    async fn oauth_start_keeps_verifier_until_exchange() {
        let gateway = gateway();
        let request = gateway
            .sign_in_with_oauth(&OAuthProvider::from("google"), None)
            .await
            .unwrap();

        assert_eq!(request.provider, OAuthProvider::from("google"));
        let challenge = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "code_challenge")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let pending = lock(&gateway.pending_pkce).clone().unwrap();
        assert_eq!(pending.challenge(), challenge);
    }

    #[tokio::test]
    async fn exchange_without_pending_sign_in_fails() {
        let err = gateway().exchange_code_for_session("code").await.unwrap_err();
        assert!(matches!(err, Error::Service { operation: "code exchange", .. }));
    }

    #[tokio::test]
    async fn signed_out_gateway_answers_locally() {
        let gateway = gateway();
        assert_eq!(gateway.get_session().await.unwrap(), None);
        assert!(matches!(
            gateway.refresh_session().await,
            Err(Error::MissingSession)
        ));
        assert!(matches!(
            gateway.update_user(&UserAttributes::password("secret")).await,
            Err(Error::MissingSession)
        ));
    }

    #[tokio::test]
    async fn sign_out_without_session_still_announces() {
        let gateway = gateway();
        let mut events = gateway.subscribe();

        gateway.sign_out(SignOutScope::Global).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::signed_out());
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_ends() {
        let expired = Session::new(
            AccessToken::new("old"),
            OffsetDateTime::from_unix_timestamp(1_000).unwrap(),
            User::new("u1"),
        );
        let gateway = gateway().with_session(expired);
        let mut events = gateway.subscribe();

        assert_eq!(gateway.get_session().await.unwrap(), None);
        assert_eq!(gateway.current_access_token(), None);
        assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedOut);
    }

    #[test]
    fn persisted_session_seeds_gateway() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let cache = SessionCache::new(storage, "harmony.auth.session");
        assert_eq!(gateway().with_persisted_session(&cache).current_access_token(), None);

        let saved = session("restored");
        cache.save(Some(&saved), Some(&saved.user));
        assert_eq!(
            gateway().with_persisted_session(&cache).current_access_token(),
            Some(AccessToken::new("restored"))
        );
    }

    #[test]
    fn conditional_store_respects_newer_session() {
        let gateway = gateway().with_session(session("new"));
        assert!(!gateway.store_if_current(&AccessToken::new("old"), None, AuthEventKind::SignedOut));
        assert_eq!(gateway.current_access_token(), Some(AccessToken::new("new")));

        assert!(gateway.store_if_current(&AccessToken::new("new"), None, AuthEventKind::SignedOut));
        assert_eq!(gateway.current_access_token(), None);
    }
}
