//! Role-based permission evaluation.

use crate::models::{Organization, UserProfile, UserRole};

/// Prefix of the permissions a `subscriber` is allowed to hold.
pub const VIEW_PERMISSION_PREFIX: &str = "view";

/// Deny-by-default permission check.
///
/// `organization` is the tenant record resolved at login; it is only
/// consulted for `org_admin` users.
pub fn has_permission(
    user: Option<&UserProfile>,
    organization: Option<&Organization>,
    permission: &str,
) -> bool {
    let Some(user) = user else {
        return false;
    };

    match user.role {
        role if role.is_administrative() => true,
        UserRole::OrgAdmin => organization
            .filter(|org| org.id == user.organization_id)
            .map(|org| org.grants_admin_permission(permission))
            .unwrap_or(false),
        UserRole::Subscriber => permission.starts_with(VIEW_PERMISSION_PREFIX),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrganizationId, UserId};
    use chrono::Utc;

    fn user(role: UserRole, organization_id: OrganizationId) -> UserProfile {
        UserProfile {
            id: UserId::new(),
            email: "ana@example.com".into(),
            first_name: "Ana".into(),
            last_name: "Silva".into(),
            role,
            organization_id,
            department_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            requires_password_change: false,
        }
    }

    fn org(id: OrganizationId, permissions: &[&str]) -> Organization {
        Organization {
            id,
            name: "Acme".into(),
            admin_permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn no_user_is_always_denied() {
        assert!(!has_permission(None, None, "view_reports"));
    }

    #[test]
    fn administrative_roles_hold_everything() {
        let org_id = OrganizationId::new();
        for role in [UserRole::Root, UserRole::SuperAdmin] {
            let u = user(role, org_id);
            assert!(has_permission(Some(&u), None, "delete_organization"));
            assert!(has_permission(Some(&u), None, ""));
        }
    }

    #[test]
    fn org_admin_uses_exact_organization_permissions() {
        let org_id = OrganizationId::new();
        let u = user(UserRole::OrgAdmin, org_id);
        let acme = org(org_id, &["manage_users", "export_data"]);
        assert!(has_permission(Some(&u), Some(&acme), "manage_users"));
        assert!(!has_permission(Some(&u), Some(&acme), "manage_users_all"));
        assert!(!has_permission(Some(&u), Some(&acme), "manage_emails"));
        assert!(!has_permission(Some(&u), None, "manage_users"));
    }

    #[test]
    fn org_admin_ignores_other_tenants_permission_set() {
        let u = user(UserRole::OrgAdmin, OrganizationId::new());
        let other = org(OrganizationId::new(), &["manage_users"]);
        assert!(!has_permission(Some(&u), Some(&other), "manage_users"));
    }

    #[test]
    fn subscriber_only_gets_view_permissions() {
        let u = user(UserRole::Subscriber, OrganizationId::new());
        assert!(has_permission(Some(&u), None, "view_reports"));
        assert!(has_permission(Some(&u), None, "viewer_dashboard"));
        assert!(!has_permission(Some(&u), None, "edit_reports"));
        assert!(!has_permission(Some(&u), None, "reports_view"));
    }

    #[test]
    fn remaining_roles_are_denied_by_default() {
        let org_id = OrganizationId::new();
        let acme = org(org_id, &["view_reports", "manage_users"]);
        for role in [UserRole::Reviewer, UserRole::Employee] {
            let u = user(role, org_id);
            assert!(!has_permission(Some(&u), Some(&acme), "view_reports"));
            assert!(!has_permission(Some(&u), Some(&acme), "manage_users"));
        }
    }
}
