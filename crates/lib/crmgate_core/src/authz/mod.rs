//! Role-based authorization.
//!
//! A role maps to a [`PermissionSet`] of `(action, subject)` rules. `Manage`
//! matches every action and `All` every subject. Forbidding rules always win
//! over granting rules that match the same pair.

use std::fmt;

use thiserror::Error;

use crate::models::auth::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Manage,
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Manage => "manage",
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    All,
    User,
    Customer,
    Transaction,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Subject::All => "all",
            Subject::User => "User",
            Subject::Customer => "Customer",
            Subject::Transaction => "Transaction",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rule {
    action: Action,
    subject: Subject,
    inverted: bool,
}

impl Rule {
    fn matches(&self, action: Action, subject: Subject) -> bool {
        (self.action == Action::Manage || self.action == action)
            && (self.subject == Subject::All || self.subject == subject)
    }
}

/// Rules granted to one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    rules: Vec<Rule>,
}

impl PermissionSet {
    /// A set granting nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn allow(mut self, action: Action, subject: Subject) -> Self {
        self.rules.push(Rule {
            action,
            subject,
            inverted: false,
        });
        self
    }

    pub fn forbid(mut self, action: Action, subject: Subject) -> Self {
        self.rules.push(Rule {
            action,
            subject,
            inverted: true,
        });
        self
    }

    pub fn can(&self, action: Action, subject: Subject) -> bool {
        let mut granted = false;
        for rule in self.rules.iter().filter(|r| r.matches(action, subject)) {
            if rule.inverted {
                return false;
            }
            granted = true;
        }
        granted
    }
}

/// What to assume when a verified principal carries no recognizable role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingRolePolicy {
    /// Grant nothing.
    #[default]
    Deny,
    /// Treat the principal as an admin. Legacy behaviour kept for migrations.
    Admin,
}

impl MissingRolePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "deny" => Some(MissingRolePolicy::Deny),
            "admin" => Some(MissingRolePolicy::Admin),
            _ => None,
        }
    }
}

/// Builds permission sets from roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbilityFactory {
    missing_role: MissingRolePolicy,
}

impl AbilityFactory {
    pub fn new(missing_role: MissingRolePolicy) -> Self {
        Self { missing_role }
    }

    pub fn create_for_role(&self, role: Option<Role>) -> PermissionSet {
        let role = role.or(match self.missing_role {
            MissingRolePolicy::Admin => Some(Role::Admin),
            MissingRolePolicy::Deny => None,
        });
        match role {
            Some(Role::Admin) => PermissionSet::empty().allow(Action::Manage, Subject::All),
            Some(Role::CustomerService) => PermissionSet::empty()
                .allow(Action::Read, Subject::Customer)
                .allow(Action::Read, Subject::Transaction)
                .allow(Action::Read, Subject::User)
                .forbid(Action::Create, Subject::User),
            None => PermissionSet::empty(),
        }
    }
}

/// One `(action, subject)` pair a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredRule {
    pub action: Action,
    pub subject: Subject,
}

impl RequiredRule {
    pub const fn new(action: Action, subject: Subject) -> Self {
        Self { action, subject }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("Forbidden: cannot {action} {subject}")]
    Forbidden { action: Action, subject: Subject },
}

/// Pass when every requirement is granted; otherwise name the first failure.
pub fn authorize(
    permissions: &PermissionSet,
    requirements: &[RequiredRule],
) -> Result<(), AuthzError> {
    match requirements
        .iter()
        .find(|r| !permissions.can(r.action, r.subject))
    {
        Some(rule) => Err(AuthzError::Forbidden {
            action: rule.action,
            subject: rule.subject,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE_USER: RequiredRule = RequiredRule::new(Action::Create, Subject::User);
    const READ_CUSTOMER: RequiredRule = RequiredRule::new(Action::Read, Subject::Customer);

    #[test]
    fn admin_manages_everything() {
        let admin = AbilityFactory::default().create_for_role(Some(Role::Admin));
        assert!(admin.can(Action::Create, Subject::User));
        assert!(admin.can(Action::Delete, Subject::Transaction));
        assert!(authorize(&admin, &[CREATE_USER, READ_CUSTOMER]).is_ok());
    }

    #[test]
    fn customer_service_reads_but_cannot_create_users() {
        let cs = AbilityFactory::default().create_for_role(Some(Role::CustomerService));
        assert!(cs.can(Action::Read, Subject::Customer));
        assert!(cs.can(Action::Read, Subject::User));
        assert!(!cs.can(Action::Create, Subject::User));
        assert!(!cs.can(Action::Update, Subject::Transaction));
    }

    #[test]
    fn forbid_overrides_broader_grant() {
        let perms = PermissionSet::empty()
            .forbid(Action::Create, Subject::User)
            .allow(Action::Manage, Subject::All);
        assert!(!perms.can(Action::Create, Subject::User));
        assert!(perms.can(Action::Create, Subject::Customer));
    }

    #[test]
    fn missing_role_follows_policy() {
        let denied = AbilityFactory::new(MissingRolePolicy::Deny).create_for_role(None);
        assert!(!denied.can(Action::Read, Subject::Customer));

        let legacy = AbilityFactory::new(MissingRolePolicy::Admin).create_for_role(None);
        assert!(legacy.can(Action::Create, Subject::User));
    }

    #[test]
    fn first_failing_rule_is_reported() {
        let cs = AbilityFactory::default().create_for_role(Some(Role::CustomerService));
        assert_eq!(
            authorize(&cs, &[READ_CUSTOMER, CREATE_USER]),
            Err(AuthzError::Forbidden {
                action: Action::Create,
                subject: Subject::User,
            })
        );
    }

    #[test]
    fn empty_requirements_always_pass() {
        assert!(authorize(&PermissionSet::empty(), &[]).is_ok());
    }

    #[test]
    fn policy_parses_known_values() {
        assert_eq!(MissingRolePolicy::parse(" Admin "), Some(MissingRolePolicy::Admin));
        assert_eq!(MissingRolePolicy::parse("deny"), Some(MissingRolePolicy::Deny));
        assert_eq!(MissingRolePolicy::parse("open"), None);
    }
}
