//! Navigation-time authorization.
//!
//! Every check is a synchronous decision over the stored token; nothing here
//! waits on the network.

use std::sync::Arc;

use tracing::debug;

use crate::config::RoutesConfig;
use crate::role::Role;
use crate::session::SessionService;

/// Where the caller should navigate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Home,
    AuthEntry,
    Login,
    AccessDenied,
    /// Landing page of a role.
    Dashboard(Role),
}

impl RouteTarget {
    /// Concrete path of this target. Roles without a dashboard land home.
    #[must_use]
    pub fn path<'a>(&self, routes: &'a RoutesConfig) -> &'a str {
        match self {
            Self::Home => &routes.home,
            Self::AuthEntry => &routes.auth_entry,
            Self::Login => &routes.login,
            Self::AccessDenied => &routes.access_denied,
            Self::Dashboard(role) => routes
                .dashboards
                .iter()
                .find(|(name, _)| Role::from(name.as_str()) == *role)
                .map_or(routes.home.as_str(), |(_, path)| path.as_str()),
        }
    }
}

/// A protected route and the roles it accepts.
///
/// `required_roles: None` admits any authenticated user. `Some(vec![])`
/// admits nobody.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequirement {
    pub path: String,
    pub required_roles: Option<Vec<Role>>,
}

impl RouteRequirement {
    /// Route open to any authenticated user.
    pub fn authenticated(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required_roles: None,
        }
    }

    pub fn for_roles(path: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            path: path.into(),
            required_roles: Some(roles.into_iter().collect()),
        }
    }
}

/// Outcome of one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(RouteTarget),
}

/// Gate for protected routes.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    session: SessionService,
    routes: Arc<RoutesConfig>,
}

impl RouteGuard {
    pub fn new(session: SessionService, routes: Arc<RoutesConfig>) -> Self {
        Self { session, routes }
    }

    /// Decide whether navigation to `route` may proceed.
    ///
    /// An absent or expired session logs out and redirects to login before
    /// roles are looked at.
    pub fn check(&self, route: &RouteRequirement) -> GuardDecision {
        if !self.session.is_authenticated() {
            self.session.logout();
            debug!(name: "guard.denied", path = %route.path, reason = "unauthenticated", "Redirecting to login");
            return GuardDecision::Redirect(RouteTarget::Login);
        }

        let role = self.session.get_user_role();
        let allowed = match (&route.required_roles, &role) {
            (None, _) => true,
            (Some(required), Some(role)) => required.contains(role),
            (Some(_), None) => false,
        };

        if allowed {
            debug!(name: "guard.allowed", path = %route.path, role = ?role, "Navigation allowed");
            GuardDecision::Allow
        } else {
            debug!(name: "guard.denied", path = %route.path, role = ?role, reason = "role", "Redirecting to access denied");
            GuardDecision::Redirect(RouteTarget::AccessDenied)
        }
    }

    /// [`check`](Self::check), resolved to the redirect path if any.
    pub fn redirect_path(&self, route: &RouteRequirement) -> Option<&str> {
        match self.check(route) {
            GuardDecision::Allow => None,
            GuardDecision::Redirect(target) => Some(target.path(&self.routes)),
        }
    }

    /// Landing route for the current session: its role's dashboard, the
    /// login route when signed out, home otherwise.
    pub fn landing_route(&self) -> &str {
        if !self.session.is_authenticated() {
            return RouteTarget::Login.path(&self.routes);
        }
        match self.session.get_user_role() {
            Some(role) => RouteTarget::Dashboard(role).path(&self.routes),
            None => RouteTarget::Home.path(&self.routes),
        }
    }

    #[must_use]
    pub fn routes(&self) -> &RoutesConfig {
        &self.routes
    }
}
