//! Route paths and the permissions each protected route requires.

use crmgate_core::authz::{Action, RequiredRule, Subject};

pub const GET_HEALTH: &str = "/health";
pub const POST_AUTH_REGISTER: &str = "/auth/register";
pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_VERIFY: &str = "/auth/verify";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const GET_AUTH_USER_ID: &str = "/auth/user/{id}";
pub const POST_AUTH_INVITE: &str = "/auth/invite";

/// Protected route → rules every caller must satisfy. Protected routes not
/// listed only need a verified token.
pub static ROUTE_REQUIREMENTS: &[(&str, &[RequiredRule])] = &[
    (
        GET_AUTH_USER_ID,
        &[RequiredRule::new(Action::Read, Subject::User)],
    ),
    (
        POST_AUTH_INVITE,
        &[RequiredRule::new(Action::Create, Subject::User)],
    ),
];

/// Rules for a matched route path.
pub fn requirements_for(path: &str) -> &'static [RequiredRule] {
    ROUTE_REQUIREMENTS
        .iter()
        .find(|(route, _)| *route == path)
        .map(|(_, rules)| *rules)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_requires_user_creation() {
        assert_eq!(
            requirements_for(POST_AUTH_INVITE),
            &[RequiredRule::new(Action::Create, Subject::User)]
        );
    }

    #[test]
    fn unlisted_routes_have_no_rules() {
        assert!(requirements_for(POST_AUTH_LOGOUT).is_empty());
        assert!(requirements_for("/unknown").is_empty());
    }
}
