use super::{LOGIN_PATH, UNAUTHORIZED_PATH};
use crate::identity::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    RedirectToLogin,
    RedirectToUnauthorized,
}

impl GuardDecision {
    /// Redirect target, if the decision is not `Allow`
    pub fn redirect_path(&self) -> Option<&'static str> {
        match self {
            GuardDecision::Allow => None,
            GuardDecision::RedirectToLogin => Some(LOGIN_PATH),
            GuardDecision::RedirectToUnauthorized => Some(UNAUTHORIZED_PATH),
        }
    }
}

/// Decide whether a request with `session` may see a page requiring `required`.
///
/// No session always goes to login, whatever the page requires. A page with
/// no required role admits any signed-in identity.
pub fn authorize(session: Option<Role>, required: Option<Role>) -> GuardDecision {
    match (session, required) {
        (None, _) => GuardDecision::RedirectToLogin,
        (Some(_), None) => GuardDecision::Allow,
        (Some(role), Some(required)) if role == required => GuardDecision::Allow,
        (Some(_), Some(_)) => GuardDecision::RedirectToUnauthorized,
    }
}
