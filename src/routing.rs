//! Navigation policy derived from auth and onboarding state.
//!
//! [`RoutePolicy::decide`] is pure: it reads a [`RouteInputs`] snapshot and
//! the current path and says where (if anywhere) the client must go. Applying
//! the decision is the controller's job.

/// Fixed paths the policy routes between.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RoutePaths {
    pub(crate) root: String,
    pub(crate) sign_in: String,
    pub(crate) profile_creation: String,
    pub(crate) music_preferences: String,
    pub(crate) landing: String,
    pub(crate) auth_callback: String,
    pub(crate) password_update: String,
    pub(crate) guest_prefixes: Vec<String>,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            root: "/".into(),
            sign_in: "/login".into(),
            profile_creation: "/create-profile".into(),
            music_preferences: "/music-preferences".into(),
            landing: "/match".into(),
            auth_callback: "/auth/callback".into(),
            password_update: "/update-password".into(),
            guest_prefixes: [
                "/",
                "/login",
                "/signup",
                "/forgot-password",
                "/update-password",
                "/auth/callback",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl RoutePaths {
    #[must_use]
    pub fn with_sign_in(mut self, path: impl Into<String>) -> Self {
        self.sign_in = path.into();
        self
    }

    #[must_use]
    pub fn with_profile_creation(mut self, path: impl Into<String>) -> Self {
        self.profile_creation = path.into();
        self
    }

    #[must_use]
    pub fn with_music_preferences(mut self, path: impl Into<String>) -> Self {
        self.music_preferences = path.into();
        self
    }

    #[must_use]
    pub fn with_landing(mut self, path: impl Into<String>) -> Self {
        self.landing = path.into();
        self
    }

    #[must_use]
    pub fn with_auth_callback(mut self, path: impl Into<String>) -> Self {
        self.auth_callback = path.into();
        self
    }

    #[must_use]
    pub fn with_password_update(mut self, path: impl Into<String>) -> Self {
        self.password_update = path.into();
        self
    }

    /// Replace the guest allow-list. The root entry matches only itself.
    #[must_use]
    pub fn with_guest_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.guest_prefixes = prefixes;
        self
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn sign_in(&self) -> &str {
        &self.sign_in
    }

    #[must_use]
    pub fn profile_creation(&self) -> &str {
        &self.profile_creation
    }

    #[must_use]
    pub fn music_preferences(&self) -> &str {
        &self.music_preferences
    }

    #[must_use]
    pub fn landing(&self) -> &str {
        &self.landing
    }

    #[must_use]
    pub fn auth_callback(&self) -> &str {
        &self.auth_callback
    }

    #[must_use]
    pub fn password_update(&self) -> &str {
        &self.password_update
    }

    /// Whether `path` is reachable without a session.
    #[must_use]
    pub fn is_guest_path(&self, path: &str) -> bool {
        self.guest_prefixes.iter().any(|prefix| {
            if *prefix == self.root {
                path == prefix
            } else {
                path.starts_with(prefix.as_str())
            }
        })
    }
}

/// How a navigation touches history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    Push,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub to: String,
    pub mode: NavigationMode,
}

impl Navigation {
    #[must_use]
    pub fn replace(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            mode: NavigationMode::Replace,
        }
    }

    #[must_use]
    pub fn push(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            mode: NavigationMode::Push,
        }
    }
}

/// The part of the auth state the policy looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteInputs {
    pub loading: bool,
    pub completion_check_loading: bool,
    pub is_authenticated: bool,
    pub has_core_profile: bool,
    pub has_required_music_preferences: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDecision {
    pub navigation: Option<Navigation>,
    /// The user is fully set up; the first landing redirect counts as done.
    pub setup_complete: bool,
}

impl RouteDecision {
    fn stay() -> Self {
        Self::default()
    }

    fn to(path: &str, current: &str) -> Self {
        Self {
            navigation: (path != current).then(|| Navigation::replace(path)),
            setup_complete: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    paths: RoutePaths,
}

impl RoutePolicy {
    #[must_use]
    pub fn new(paths: RoutePaths) -> Self {
        Self { paths }
    }

    #[must_use]
    pub fn paths(&self) -> &RoutePaths {
        &self.paths
    }

    /// First matching rule wins; a navigation is only returned when the
    /// target differs from `current_path`.
    #[must_use]
    pub fn decide(&self, inputs: &RouteInputs, current_path: &str) -> RouteDecision {
        let paths = &self.paths;

        if inputs.loading || inputs.completion_check_loading {
            return RouteDecision::stay();
        }

        if !inputs.is_authenticated {
            if paths.is_guest_path(current_path) {
                return RouteDecision::stay();
            }
            return RouteDecision::to(&paths.sign_in, current_path);
        }

        // Core profile outranks music preferences.
        if !inputs.has_core_profile {
            return RouteDecision::to(&paths.profile_creation, current_path);
        }
        if !inputs.has_required_music_preferences {
            return RouteDecision::to(&paths.music_preferences, current_path);
        }

        let onboarding_or_guest = current_path == paths.profile_creation
            || current_path == paths.music_preferences
            || (current_path != paths.root && paths.is_guest_path(current_path));

        let mut decision = if onboarding_or_guest {
            RouteDecision::to(&paths.landing, current_path)
        } else {
            RouteDecision::stay()
        };
        decision.setup_complete = true;
        decision
    }
}
