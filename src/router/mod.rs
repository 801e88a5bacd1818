//! Route table and the pre-navigation auth guard

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::SessionStore;
use crate::config::ClientOptions;

/// A navigable route and its access rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Path pattern; `:name` segments capture a parameter
    pub path: String,
    pub name: String,
    /// Only signed-in users may enter
    pub requires_auth: bool,
    /// Only signed-out users may enter
    pub requires_guest: bool,
}

impl Route {
    pub fn new(path: &str, name: &str) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            requires_auth: false,
            requires_guest: false,
        }
    }

    pub fn requires_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn requires_guest(mut self) -> Self {
        self.requires_guest = true;
        self
    }

    /// Match a path (without query or fragment) against this route
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let pattern: Vec<&str> = segments(&self.path).collect();
        let actual: Vec<&str> = segments(path).collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (expected, got) in pattern.iter().zip(&actual) {
            match expected.strip_prefix(':') {
                Some(name) => {
                    params.insert(name.to_string(), got.to_string());
                }
                None if expected == got => {}
                None => return None,
            }
        }
        Some(params)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// The application's routes
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new("/login", "Login").requires_guest(),
        Route::new("/", "Home").requires_auth(),
        Route::new("/events", "Events").requires_auth(),
        Route::new("/setup", "Setup").requires_auth(),
        Route::new("/invite/:inviteCode", "AcceptInvitation").requires_auth(),
        Route::new("/settings", "Settings").requires_auth(),
    ]
}

/// A resolved route with its captured parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: HashMap<String, String>,
}

/// Ordered route lookup; the first matching route wins
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(default_routes())
    }
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Find the route for a full path, ignoring query string and fragment
    pub fn resolve(&self, full_path: &str) -> Option<RouteMatch<'_>> {
        let path = full_path.split(['?', '#']).next().unwrap_or_default();
        self.routes.iter().find_map(|route| {
            route
                .match_path(path)
                .map(|params| RouteMatch { route, params })
        })
    }
}

/// What the guard decided for a navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(String),
}

/// Gates route entry on the session state
pub struct NavigationGuard {
    session: Arc<SessionStore>,
    routes: RouteTable,
    redirect_after_login: Mutex<Option<String>>,
    login_path: String,
    home_path: String,
}

impl NavigationGuard {
    pub fn new(session: Arc<SessionStore>, routes: RouteTable, options: &ClientOptions) -> Self {
        Self {
            session,
            routes,
            redirect_after_login: Mutex::new(None),
            login_path: options.login_path.clone(),
            home_path: options.home_path.clone(),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The path a signed-out visitor was turned away from, if any
    pub fn pending_redirect(&self) -> Option<String> {
        self.redirect_after_login.lock().clone()
    }

    /// Decide whether navigation to `to` (a full path) may proceed
    ///
    /// Waits for the session restore first. A protected path visited while
    /// signed out is remembered and used once as the destination after the
    /// next signed-in visit to a guest-only route.
    pub async fn before_each(&self, to: &str) -> Navigation {
        let user = self.session.verify_auth().await;
        let (requires_auth, requires_guest) = self
            .routes
            .resolve(to)
            .map(|m| (m.route.requires_auth, m.route.requires_guest))
            .unwrap_or((false, false));

        if requires_auth && user.is_none() {
            info!(to, "Sign-in required, redirecting to login");
            *self.redirect_after_login.lock() = Some(to.to_string());
            return Navigation::Redirect(self.login_path.clone());
        }

        if requires_guest && user.is_some() {
            let target = self
                .redirect_after_login
                .lock()
                .take()
                .unwrap_or_else(|| self.home_path.clone());
            debug!(to, %target, "Already signed in, redirecting");
            return Navigation::Redirect(target);
        }

        Navigation::Proceed
    }
}
